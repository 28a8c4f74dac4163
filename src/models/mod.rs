//! Core data models for the DRS access service.
//!
//! `drs_object` holds the durable record and its staging lifecycle, `access`
//! the ephemeral values produced when resolving a request, and `events` the
//! typed payloads exchanged with the message bus.

pub mod access;
pub mod drs_object;
pub mod events;
