//! Typed payloads exchanged with the message bus.
//!
//! Inbound events are validated here, at the consumer boundary, before any
//! handler logic runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::drs_object::{
    MAX_OBJECT_ID_LEN, NewDrsObject, check_object_id, deserialize_creation_date,
};
use crate::errors::ValidationIssue;

/// An event delivered to `POST /events`.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum InboundEvent {
    ObjectToRegister(ObjectToRegister),
    ObjectStagedInOutbox(ObjectStagedInOutbox),
}

/// A file that finished ingest and should become a DRS object.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct ObjectToRegister {
    pub object_id: String,
    pub file_id: String,
    pub decrypted_sha256: String,
    pub decrypted_size: u64,
    #[serde(deserialize_with = "deserialize_creation_date")]
    pub creation_date: DateTime<Utc>,
}

/// The staging worker copied an object into the outbox.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct ObjectStagedInOutbox {
    pub object_id: String,
}

impl InboundEvent {
    pub fn object_id(&self) -> &str {
        match self {
            InboundEvent::ObjectToRegister(p) => &p.object_id,
            InboundEvent::ObjectStagedInOutbox(p) => &p.object_id,
        }
    }

    /// Field-level checks serde cannot express.
    pub fn validate(&self) -> Result<(), Vec<ValidationIssue>> {
        let mut issues = Vec::new();
        match self {
            InboundEvent::ObjectToRegister(p) => {
                check_event_object_id(&mut issues, &p.object_id);
                check_identifier(&mut issues, "file_id", &p.file_id);
                if p.decrypted_sha256.trim().is_empty() {
                    issues.push(ValidationIssue::body(
                        &["payload", "decrypted_sha256"],
                        "must not be empty",
                    ));
                }
                if i64::try_from(p.decrypted_size).is_err() {
                    issues.push(ValidationIssue::body(
                        &["payload", "decrypted_size"],
                        "exceeds the supported maximum",
                    ));
                }
            }
            InboundEvent::ObjectStagedInOutbox(p) => {
                check_event_object_id(&mut issues, &p.object_id);
            }
        }
        if issues.is_empty() { Ok(()) } else { Err(issues) }
    }
}

fn check_event_object_id(issues: &mut Vec<ValidationIssue>, object_id: &str) {
    if let Err(msg) = check_object_id(object_id) {
        issues.push(ValidationIssue::body(&["payload", "object_id"], msg));
    }
}

fn check_identifier(issues: &mut Vec<ValidationIssue>, field: &str, value: &str) {
    if value.is_empty() || value.len() > MAX_OBJECT_ID_LEN {
        issues.push(ValidationIssue::body(
            &["payload", field],
            "must be between 1 and 256 bytes",
        ));
    } else if value.chars().any(|c| c.is_whitespace() || c.is_control()) {
        issues.push(ValidationIssue::body(
            &["payload", field],
            "must not contain whitespace or control characters",
        ));
    }
}

impl From<ObjectToRegister> for NewDrsObject {
    fn from(p: ObjectToRegister) -> Self {
        Self {
            object_id: p.object_id,
            file_id: p.file_id,
            decrypted_sha256: p.decrypted_sha256,
            decrypted_size: p.decrypted_size,
            creation_date: p.creation_date,
        }
    }
}

/// Events this service publishes.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum OutboundEvent {
    StagingRequested(StagingRequested),
    DownloadServed(DownloadServed),
    FileRegistered(FileRegistered),
}

/// Asks the staging worker to copy an object into the outbox.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct StagingRequested {
    pub object_id: String,
    pub file_id: String,
    pub decrypted_sha256: String,
}

/// Audit record of a served download.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct DownloadServed {
    pub object_id: String,
    pub file_id: String,
    pub decrypted_sha256: String,
    pub context: String,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct FileRegistered {
    pub object_id: String,
    pub file_id: String,
    pub decrypted_sha256: String,
    pub upload_date: DateTime<Utc>,
    pub drs_uri: String,
}

impl OutboundEvent {
    pub fn type_name(&self) -> &'static str {
        match self {
            OutboundEvent::StagingRequested(_) => "staging_requested",
            OutboundEvent::DownloadServed(_) => "download_served",
            OutboundEvent::FileRegistered(_) => "file_registered",
        }
    }

    pub fn object_id(&self) -> &str {
        match self {
            OutboundEvent::StagingRequested(p) => &p.object_id,
            OutboundEvent::DownloadServed(p) => &p.object_id,
            OutboundEvent::FileRegistered(p) => &p.object_id,
        }
    }
}
