//! In-memory stand-ins for the outbound adapters, used by tests.

use crate::{
    models::{
        access::{PresignedUrl, RequesterKey},
        events::OutboundEvent,
    },
    services::{
        envelope_client::{EnvelopeClient, EnvelopeError},
        event_publisher::{EventPublisher, PublishError},
        object_gateway::{GatewayError, ObjectGateway},
    },
};
use async_trait::async_trait;
use chrono::Utc;
use std::{
    collections::HashSet,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};
use tokio::sync::Mutex;

/// Outbox with a toggleable set of present files.
#[derive(Clone, Default)]
pub struct FakeObjectGateway {
    present: Arc<Mutex<HashSet<String>>>,
    fail: Arc<AtomicBool>,
    delay: Arc<Mutex<Option<Duration>>>,
    presign_calls: Arc<AtomicUsize>,
}

impl FakeObjectGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn fake_put(&self, file_id: &str) {
        self.present.lock().await.insert(file_id.to_string());
    }

    pub async fn fake_evict(&self, file_id: &str) {
        self.present.lock().await.remove(file_id);
    }

    pub fn fake_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Make every call hang for `delay` before answering.
    pub async fn fake_delay(&self, delay: Duration) {
        *self.delay.lock().await = Some(delay);
    }

    pub fn presign_calls(&self) -> usize {
        self.presign_calls.load(Ordering::SeqCst)
    }

    async fn simulate_latency(&self) -> Result<(), GatewayError> {
        let delay = *self.delay.lock().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(GatewayError::S3("simulated outage".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectGateway for FakeObjectGateway {
    async fn object_exists(&self, file_id: &str) -> Result<bool, GatewayError> {
        self.simulate_latency().await?;
        Ok(self.present.lock().await.contains(file_id))
    }

    async fn presigned_download_url(
        &self,
        file_id: &str,
        expires_in: Duration,
    ) -> Result<PresignedUrl, GatewayError> {
        self.simulate_latency().await?;
        self.presign_calls.fetch_add(1, Ordering::SeqCst);
        let expires_at = Utc::now()
            + chrono::Duration::from_std(expires_in)
                .map_err(|err| GatewayError::Presign(err.to_string()))?;
        Ok(PresignedUrl {
            url: format!(
                "https://outbox.example/{}?X-Amz-Expires={}",
                file_id,
                expires_in.as_secs()
            ),
            expires_at,
        })
    }
}

/// Keyserver returning `envelope:<secret>:<key>` for every request.
#[derive(Clone, Default)]
pub struct FakeEnvelopeClient {
    calls: Arc<AtomicUsize>,
    fail: Arc<AtomicBool>,
}

impl FakeEnvelopeClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fake_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EnvelopeClient for FakeEnvelopeClient {
    async fn fetch_envelope(
        &self,
        secret_id: &str,
        key: &RequesterKey,
    ) -> Result<Vec<u8>, EnvelopeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(EnvelopeError::BadResponse(500));
        }
        Ok(format!("envelope:{}:{}", secret_id, key.to_url_safe()).into_bytes())
    }
}

/// Records every published event.
#[derive(Clone, Default)]
pub struct FakeEventPublisher {
    events: Arc<Mutex<Vec<OutboundEvent>>>,
    fail: Arc<AtomicBool>,
}

impl FakeEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fake_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub async fn published(&self) -> Vec<OutboundEvent> {
        self.events.lock().await.clone()
    }

    /// Number of published events of the given type.
    pub async fn count(&self, type_name: &str) -> usize {
        self.events
            .lock()
            .await
            .iter()
            .filter(|e| e.type_name() == type_name)
            .count()
    }
}

#[async_trait]
impl EventPublisher for FakeEventPublisher {
    async fn publish(&self, event: &OutboundEvent) -> Result<(), PublishError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(PublishError::Rejected {
                event_type: event.type_name(),
                status: 503,
            });
        }
        self.events.lock().await.push(event.clone());
        Ok(())
    }
}
