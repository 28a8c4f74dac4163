pub mod access_resolver;
pub mod envelope_client;
pub mod event_handlers;
pub mod event_publisher;
pub mod metadata_store;
pub mod object_gateway;

#[cfg(test)]
pub mod fakes;
