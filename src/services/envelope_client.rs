//! Client for the external keyserver that issues personalized decryption
//! envelopes.

use crate::models::access::RequesterKey;
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("keyserver has no secret `{0}`")]
    SecretNotFound(String),
    #[error("keyserver answered with unexpected status {0}")]
    BadResponse(u16),
    #[error("keyserver response could not be decoded: {0}")]
    Decode(String),
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
}

#[async_trait]
pub trait EnvelopeClient: Send + Sync + 'static {
    /// Fetch the envelope for `secret_id`, encrypted for `key`.
    async fn fetch_envelope(
        &self,
        secret_id: &str,
        key: &RequesterKey,
    ) -> Result<Vec<u8>, EnvelopeError>;
}

#[derive(Deserialize)]
struct EnvelopeResponse {
    content: String,
}

/// `EnvelopeClient` talking HTTP to the keyserver.
#[derive(Clone, Debug)]
pub struct HttpEnvelopeClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpEnvelopeClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, EnvelopeError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn envelope_url(&self, secret_id: &str, key: &RequesterKey) -> String {
        format!(
            "{}/secrets/{}/envelopes/{}",
            self.base_url,
            secret_id,
            key.to_url_safe()
        )
    }
}

#[async_trait]
impl EnvelopeClient for HttpEnvelopeClient {
    async fn fetch_envelope(
        &self,
        secret_id: &str,
        key: &RequesterKey,
    ) -> Result<Vec<u8>, EnvelopeError> {
        let response = self.http.get(self.envelope_url(secret_id, key)).send().await?;

        match response.status() {
            StatusCode::OK => {}
            StatusCode::NOT_FOUND => {
                return Err(EnvelopeError::SecretNotFound(secret_id.to_string()));
            }
            other => return Err(EnvelopeError::BadResponse(other.as_u16())),
        }

        let body: EnvelopeResponse = response.json().await?;
        general_purpose::STANDARD
            .decode(body.content)
            .map_err(|err| EnvelopeError::Decode(err.to_string()))
    }
}
