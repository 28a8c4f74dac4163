//! src/services/access_resolver.rs
//!
//! AccessResolver decides for each request whether an object can be served
//! right away or must be staged first, and drives the side effects of that
//! decision. All coordination between concurrent requests goes through the
//! metadata store's conditional updates; nothing is cached in process.

use crate::{
    models::{
        access::{AccessDescriptor, AccessOutcome, RequesterKey},
        drs_object::{DrsObject, StagingStatus},
        events::{DownloadServed, OutboundEvent, StagingRequested},
    },
    services::{
        envelope_client::EnvelopeClient, event_publisher::EventPublisher,
        metadata_store::MetadataStore, object_gateway::ObjectGateway,
    },
};
use chrono::Utc;
use std::{fmt::Display, future::Future, sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Tunables for access resolution.
#[derive(Clone, Debug)]
pub struct ResolverSettings {
    /// Base of self URIs, `drs://host/`.
    pub drs_server_uri: String,
    /// Advised polling interval while staging is pending.
    pub retry_access_after: Duration,
    /// Lifetime of issued download URLs.
    pub presigned_url_expiry: Duration,
    /// Upper bound for every individual upstream call.
    pub upstream_timeout: Duration,
    /// A staging request unanswered for this long is issued again. `None`
    /// never re-issues: a pending request stays the only trigger.
    pub restage_after: Option<Duration>,
}

/// A dependency failed or timed out. Never retried here; the caller polls again.
#[derive(Debug, Error)]
#[error("{operation} failed for DrsObject `{object_id}`: {reason}")]
pub struct UpstreamUnavailable {
    pub object_id: String,
    pub operation: &'static str,
    pub reason: String,
}

/// What happened when this resolver tried to request staging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StagingRequest {
    /// This resolver won the transition and emitted the trigger.
    Triggered,
    /// A request is already pending and still fresh.
    AlreadyPending,
    /// Another resolver won the transition first.
    RaceLost,
}

#[derive(Clone)]
pub struct AccessResolver {
    store: MetadataStore,
    gateway: Arc<dyn ObjectGateway>,
    envelopes: Arc<dyn EnvelopeClient>,
    publisher: Arc<dyn EventPublisher>,
    settings: Arc<ResolverSettings>,
}

impl AccessResolver {
    pub fn new(
        store: MetadataStore,
        gateway: Arc<dyn ObjectGateway>,
        envelopes: Arc<dyn EnvelopeClient>,
        publisher: Arc<dyn EventPublisher>,
        settings: ResolverSettings,
    ) -> Self {
        Self {
            store,
            gateway,
            envelopes,
            publisher,
            settings: Arc::new(settings),
        }
    }

    pub fn settings(&self) -> &ResolverSettings {
        &self.settings
    }

    pub fn self_uri(&self, object_id: &str) -> String {
        format!("{}{}", self.settings.drs_server_uri, object_id)
    }

    fn delayed(&self) -> AccessOutcome {
        AccessOutcome::Delayed(self.settings.retry_access_after)
    }

    /// Resolve access to `object_id` on behalf of the holder of `key`.
    pub async fn resolve_access(
        &self,
        object_id: &str,
        key: &RequesterKey,
    ) -> Result<AccessOutcome, UpstreamUnavailable> {
        let Some(object) = self.lookup(object_id).await? else {
            debug!(object_id, "unknown DrsObject requested");
            return Ok(AccessOutcome::ObjectNotFound);
        };

        match object.current_staging_status {
            StagingStatus::Staged => self.serve_or_restage(&object, key).await,
            StagingStatus::Registered => {
                self.request_staging(&object, StagingStatus::Registered)
                    .await?;
                Ok(self.delayed())
            }
            StagingStatus::StagingRequested => {
                self.renew_stale_request(&object).await?;
                Ok(self.delayed())
            }
            StagingStatus::Unregistered => Ok(AccessOutcome::ObjectNotFound),
        }
    }

    /// Fetch the stored record for `object_id`.
    pub async fn lookup(&self, object_id: &str) -> Result<Option<DrsObject>, UpstreamUnavailable> {
        self.bounded(object_id, "metadata lookup", self.store.get(object_id))
            .await
    }

    /// The decryption envelope for `object` personalized for `key`, from the
    /// cache or freshly fetched from the keyserver.
    pub async fn envelope(
        &self,
        object: &DrsObject,
        key: &RequesterKey,
    ) -> Result<(String, Vec<u8>), UpstreamUnavailable> {
        let object_id = object.object_id.as_str();
        let envelope_id = key.envelope_id(&object.file_id);

        let cached = self
            .bounded(object_id, "envelope cache read", self.store.get_envelope(&envelope_id))
            .await?;
        if let Some(content) = cached {
            return Ok((envelope_id, content));
        }

        let content = self
            .bounded(
                object_id,
                "envelope fetch",
                self.envelopes.fetch_envelope(&object.file_id, key),
            )
            .await?;
        self.bounded(
            object_id,
            "envelope cache write",
            self.store.insert_envelope(&envelope_id, object_id, &content),
        )
        .await?;
        debug!(object_id, envelope_id = %envelope_id, "envelope fetched from keyserver");

        Ok((envelope_id, content))
    }

    /// A `Staged` status is advisory: presence in the outbox is verified before serving.
    async fn serve_or_restage(
        &self,
        object: &DrsObject,
        key: &RequesterKey,
    ) -> Result<AccessOutcome, UpstreamUnavailable> {
        let object_id = object.object_id.as_str();
        let present = self
            .bounded(
                object_id,
                "outbox presence check",
                self.gateway.object_exists(&object.file_id),
            )
            .await?;

        if !present {
            warn!(
                object_id,
                file_id = %object.file_id,
                "staged object missing from outbox, requesting staging again"
            );
            self.request_staging(object, StagingStatus::Staged).await?;
            return Ok(self.delayed());
        }

        let url = self
            .bounded(
                object_id,
                "presigned url",
                self.gateway
                    .presigned_download_url(&object.file_id, self.settings.presigned_url_expiry),
            )
            .await?;
        let (envelope_id, _) = self.envelope(object, key).await?;

        let descriptor =
            AccessDescriptor::compose(object, self.self_uri(object_id), url, envelope_id);
        self.emit_download_served(object).await;

        info!(object_id, expires_at = %descriptor.expires_at, "serving DrsObject");
        Ok(AccessOutcome::Serve(descriptor))
    }

    /// Move `object` from `from` to `StagingRequested`; only the winner of
    /// that transition emits the staging trigger.
    async fn request_staging(
        &self,
        object: &DrsObject,
        from: StagingStatus,
    ) -> Result<StagingRequest, UpstreamUnavailable> {
        let object_id = object.object_id.as_str();
        let won = self
            .bounded(
                object_id,
                "staging transition",
                self.store
                    .compare_and_transition(object_id, from, StagingStatus::StagingRequested),
            )
            .await?;

        if !won {
            debug!(object_id, from = %from, "staging race lost, another request is pending");
            return Ok(StagingRequest::RaceLost);
        }

        self.emit_staging_trigger(object).await?;
        Ok(StagingRequest::Triggered)
    }

    /// Issue the staging trigger again if re-staging is enabled and the
    /// pending request is older than `restage_after`. Guarded by a
    /// conditional write on the observed timestamp so one resolver at most
    /// re-triggers.
    async fn renew_stale_request(
        &self,
        object: &DrsObject,
    ) -> Result<StagingRequest, UpstreamUnavailable> {
        let object_id = object.object_id.as_str();
        let Some(restage_after) = self.settings.restage_after else {
            return Ok(StagingRequest::AlreadyPending);
        };
        let previous = object.latest_staging_request_timestamp;
        let stale = match previous {
            Some(requested_at) => (Utc::now() - requested_at)
                .to_std()
                .map(|age| age >= restage_after)
                .unwrap_or(false),
            None => true,
        };
        if !stale {
            return Ok(StagingRequest::AlreadyPending);
        }

        let won = self
            .bounded(
                object_id,
                "staging request refresh",
                self.store.refresh_staging_request(object_id, previous),
            )
            .await?;
        if !won {
            debug!(object_id, "stale staging request already renewed elsewhere");
            return Ok(StagingRequest::RaceLost);
        }

        warn!(object_id, "staging request went unanswered, requesting again");
        self.emit_staging_trigger(object).await?;
        Ok(StagingRequest::Triggered)
    }

    async fn emit_staging_trigger(&self, object: &DrsObject) -> Result<(), UpstreamUnavailable> {
        let event = OutboundEvent::StagingRequested(StagingRequested {
            object_id: object.object_id.clone(),
            file_id: object.file_id.clone(),
            decrypted_sha256: object.decrypted_sha256.clone(),
        });
        self.bounded(
            &object.object_id,
            "staging request publish",
            self.publisher.publish(&event),
        )
        .await?;
        info!(object_id = %object.object_id, "staging requested");
        Ok(())
    }

    /// Fire-and-forget: a failed audit event never fails the download.
    async fn emit_download_served(&self, object: &DrsObject) {
        let event = OutboundEvent::DownloadServed(DownloadServed {
            object_id: object.object_id.clone(),
            file_id: object.file_id.clone(),
            decrypted_sha256: object.decrypted_sha256.clone(),
            context: "unknown".into(),
        });
        if let Err(err) = self
            .bounded(
                &object.object_id,
                "download served publish",
                self.publisher.publish(&event),
            )
            .await
        {
            warn!(object_id = %object.object_id, "could not publish download_served: {}", err);
        }
    }

    /// Run one upstream call under the configured timeout.
    async fn bounded<T, E, F>(
        &self,
        object_id: &str,
        operation: &'static str,
        call: F,
    ) -> Result<T, UpstreamUnavailable>
    where
        F: Future<Output = Result<T, E>>,
        E: Display,
    {
        let limit = self.settings.upstream_timeout;
        match tokio::time::timeout(limit, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(UpstreamUnavailable {
                object_id: object_id.to_string(),
                operation,
                reason: err.to_string(),
            }),
            Err(_) => Err(UpstreamUnavailable {
                object_id: object_id.to_string(),
                operation,
                reason: format!("timed out after {:?}", limit),
            }),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::services::{
        fakes::{FakeEnvelopeClient, FakeEventPublisher, FakeObjectGateway},
        metadata_store::test_support::memory_store,
    };

    pub struct Harness {
        pub resolver: AccessResolver,
        pub store: MetadataStore,
        pub gateway: FakeObjectGateway,
        pub envelopes: FakeEnvelopeClient,
        pub publisher: FakeEventPublisher,
    }

    pub fn settings() -> ResolverSettings {
        ResolverSettings {
            drs_server_uri: "drs://localhost:8080/".into(),
            retry_access_after: Duration::from_secs(120),
            presigned_url_expiry: Duration::from_secs(60),
            upstream_timeout: Duration::from_secs(5),
            restage_after: None,
        }
    }

    pub async fn harness_with(settings: ResolverSettings) -> Harness {
        let store = memory_store().await;
        let gateway = FakeObjectGateway::new();
        let envelopes = FakeEnvelopeClient::new();
        let publisher = FakeEventPublisher::new();
        let resolver = AccessResolver::new(
            store.clone(),
            Arc::new(gateway.clone()),
            Arc::new(envelopes.clone()),
            Arc::new(publisher.clone()),
            settings,
        );
        Harness {
            resolver,
            store,
            gateway,
            envelopes,
            publisher,
        }
    }

    pub async fn harness() -> Harness {
        harness_with(settings()).await
    }
}
