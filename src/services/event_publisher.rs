//! Publishes domain events to the message bus through its REST proxy.

use crate::models::events::OutboundEvent;
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

const KAFKA_JSON_CONTENT_TYPE: &str = "application/vnd.kafka.json.v2+json";

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("event bus rejected `{event_type}` with status {status}")]
    Rejected {
        event_type: &'static str,
        status: u16,
    },
    #[error(transparent)]
    Serialize(#[from] serde_json::Error),
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
}

#[async_trait]
pub trait EventPublisher: Send + Sync + 'static {
    async fn publish(&self, event: &OutboundEvent) -> Result<(), PublishError>;
}

/// Topic per outbound event type.
#[derive(Clone, Debug)]
pub struct Topics {
    pub staging_requested: String,
    pub download_served: String,
    pub file_registered: String,
}

impl Topics {
    fn for_event(&self, event: &OutboundEvent) -> &str {
        match event {
            OutboundEvent::StagingRequested(_) => &self.staging_requested,
            OutboundEvent::DownloadServed(_) => &self.download_served,
            OutboundEvent::FileRegistered(_) => &self.file_registered,
        }
    }
}

/// `EventPublisher` posting records to a Kafka REST proxy.
/// Records are keyed by object id so events for one object stay ordered.
#[derive(Clone, Debug)]
pub struct HttpEventPublisher {
    http: reqwest::Client,
    base_url: String,
    topics: Topics,
}

impl HttpEventPublisher {
    pub fn new(base_url: &str, topics: Topics, timeout: Duration) -> Result<Self, PublishError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            topics,
        })
    }

    fn record_body(event: &OutboundEvent) -> Result<serde_json::Value, PublishError> {
        let mut value = serde_json::to_value(event)?;
        value["event_id"] = json!(Uuid::new_v4());
        Ok(json!({
            "records": [{ "key": event.object_id(), "value": value }]
        }))
    }
}

#[async_trait]
impl EventPublisher for HttpEventPublisher {
    async fn publish(&self, event: &OutboundEvent) -> Result<(), PublishError> {
        let topic = self.topics.for_event(event);
        let url = format!("{}/topics/{}", self.base_url, topic);
        let body = Self::record_body(event)?;

        let response = self
            .http
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, KAFKA_JSON_CONTENT_TYPE)
            .body(serde_json::to_vec(&body)?)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(PublishError::Rejected {
                event_type: event.type_name(),
                status: response.status().as_u16(),
            });
        }

        debug!(
            object_id = event.object_id(),
            event_type = event.type_name(),
            topic,
            "event published"
        );
        Ok(())
    }
}
