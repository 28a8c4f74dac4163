//! Shared state handed to every HTTP handler.

use crate::services::{
    access_resolver::AccessResolver, event_handlers::EventConsumer, metadata_store::MetadataStore,
};

#[derive(Clone)]
pub struct AppState {
    pub resolver: AccessResolver,
    pub consumer: EventConsumer,
    pub store: MetadataStore,
}
