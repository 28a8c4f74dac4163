//! Consumers for inbound bus events.
//!
//! Both handlers are idempotent and tolerate duplicate and out-of-order
//! delivery: the result depends only on the stored state and the payload.

use crate::{
    models::{
        drs_object::{DrsObject, NewDrsObject, StagingStatus},
        events::{FileRegistered, InboundEvent, ObjectStagedInOutbox, ObjectToRegister, OutboundEvent},
    },
    services::{
        event_publisher::EventPublisher,
        metadata_store::{MetadataStore, StoreError, UpsertOutcome},
    },
};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

/// Staging confirmation gives up after this many lost transitions and asks
/// for redelivery instead.
const MAX_TRANSITION_ATTEMPTS: usize = 3;

#[derive(Debug, Error)]
pub enum ConsumeError {
    #[error("staging confirmed for unknown DrsObject `{0}`")]
    UnknownObject(String),
    #[error("staging status of DrsObject `{0}` kept changing")]
    Contended(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    Registered,
    AlreadyRegistered,
    MarkedStaged,
    AlreadyStaged,
}

#[derive(Clone)]
pub struct EventConsumer {
    store: MetadataStore,
    publisher: Arc<dyn EventPublisher>,
    drs_server_uri: String,
}

impl EventConsumer {
    pub fn new(
        store: MetadataStore,
        publisher: Arc<dyn EventPublisher>,
        drs_server_uri: impl Into<String>,
    ) -> Self {
        Self {
            store,
            publisher,
            drs_server_uri: drs_server_uri.into(),
        }
    }

    /// Dispatch an already validated event to its handler.
    pub async fn handle(&self, event: InboundEvent) -> Result<ConsumeOutcome, ConsumeError> {
        match event {
            InboundEvent::ObjectToRegister(payload) => self.on_object_to_register(payload).await,
            InboundEvent::ObjectStagedInOutbox(payload) => self.on_object_staged(payload).await,
        }
    }

    pub async fn on_object_to_register(
        &self,
        payload: ObjectToRegister,
    ) -> Result<ConsumeOutcome, ConsumeError> {
        let new = NewDrsObject::from(payload);
        match self.store.upsert(&new).await {
            Ok(UpsertOutcome::Created(object)) => {
                self.announce_registration(&object).await;
                Ok(ConsumeOutcome::Registered)
            }
            Ok(UpsertOutcome::Unchanged(_)) => Ok(ConsumeOutcome::AlreadyRegistered),
            Err(err @ StoreError::MetadataConflict { .. }) => {
                error!(object_id = %new.object_id, "dropping registration event: {}", err);
                Err(err.into())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Mark an object as present in the outbox.
    ///
    /// Confirmations for objects that were never registered are rejected.
    pub async fn on_object_staged(
        &self,
        payload: ObjectStagedInOutbox,
    ) -> Result<ConsumeOutcome, ConsumeError> {
        let object_id = payload.object_id.as_str();

        for _ in 0..MAX_TRANSITION_ATTEMPTS {
            let Some(object) = self.store.get(object_id).await? else {
                warn!(object_id, "staging confirmed before registration, rejecting");
                return Err(ConsumeError::UnknownObject(object_id.to_string()));
            };

            let current = object.current_staging_status;
            if current == StagingStatus::Staged {
                return Ok(ConsumeOutcome::AlreadyStaged);
            }
            if self
                .store
                .compare_and_transition(object_id, current, StagingStatus::Staged)
                .await?
            {
                return Ok(ConsumeOutcome::MarkedStaged);
            }
        }

        warn!(object_id, "staging status kept changing, giving up on this delivery");
        Err(ConsumeError::Contended(object_id.to_string()))
    }

    /// Fire-and-forget announcement of a newly registered object.
    async fn announce_registration(&self, object: &DrsObject) {
        let event = OutboundEvent::FileRegistered(FileRegistered {
            object_id: object.object_id.clone(),
            file_id: object.file_id.clone(),
            decrypted_sha256: object.decrypted_sha256.clone(),
            upload_date: object.creation_date,
            drs_uri: format!("{}{}", self.drs_server_uri, object.object_id),
        });
        match self.publisher.publish(&event).await {
            Ok(()) => info!(object_id = %object.object_id, "file_registered published"),
            Err(err) => warn!(
                object_id = %object.object_id,
                "could not publish file_registered: {}",
                err
            ),
        }
    }
}
