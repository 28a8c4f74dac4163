//! Presence checks and presigned download URLs for the outbox bucket.

use crate::{config::S3Settings, models::access::PresignedUrl};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::{Client, config::Credentials, error::SdkError, presigning::PresigningConfig};
use chrono::Utc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid presigning request: {0}")]
    Presign(String),
    #[error("object storage request failed: {0}")]
    S3(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Read-only view of the outbox bucket.
#[async_trait]
pub trait ObjectGateway: Send + Sync + 'static {
    /// Whether `file_id` is currently present in the outbox.
    async fn object_exists(&self, file_id: &str) -> Result<bool, GatewayError>;

    /// A URL granting download access to `file_id` for `expires_in`.
    async fn presigned_download_url(
        &self,
        file_id: &str,
        expires_in: Duration,
    ) -> Result<PresignedUrl, GatewayError>;
}

/// `ObjectGateway` backed by an S3-compatible bucket.
pub struct S3ObjectGateway {
    client: Client,
    bucket: String,
}

impl std::fmt::Debug for S3ObjectGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3ObjectGateway")
            .field("bucket", &self.bucket)
            .finish_non_exhaustive()
    }
}

impl S3ObjectGateway {
    pub async fn new(settings: &S3Settings, bucket: &str) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(settings.region.clone()));

        if let (Some(key_id), Some(secret)) =
            (&settings.access_key_id, &settings.secret_access_key)
        {
            loader = loader.credentials_provider(Credentials::new(
                key_id,
                secret,
                None,
                None,
                "drs-access-config",
            ));
        }

        let shared = loader.load().await;
        let mut builder =
            aws_sdk_s3::config::Builder::from(&shared).force_path_style(settings.force_path_style);
        if let Some(endpoint) = &settings.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        Self {
            client: Client::from_conf(builder.build()),
            bucket: bucket.to_string(),
        }
    }
}

#[async_trait]
impl ObjectGateway for S3ObjectGateway {
    async fn object_exists(&self, file_id: &str) -> Result<bool, GatewayError> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(file_id)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(SdkError::ServiceError(service_err))
                if service_err.raw().status().as_u16() == 404 =>
            {
                debug!(file_id, bucket = %self.bucket, "object absent from outbox");
                Ok(false)
            }
            Err(err) => Err(GatewayError::S3(Box::new(err))),
        }
    }

    async fn presigned_download_url(
        &self,
        file_id: &str,
        expires_in: Duration,
    ) -> Result<PresignedUrl, GatewayError> {
        let presigning = PresigningConfig::expires_in(expires_in)
            .map_err(|err| GatewayError::Presign(err.to_string()))?;
        let issued_at = Utc::now();

        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(file_id)
            .presigned(presigning)
            .await
            .map_err(|err| GatewayError::S3(Box::new(err)))?;

        let expires_at = issued_at
            + chrono::Duration::from_std(expires_in)
                .map_err(|err| GatewayError::Presign(err.to_string()))?;

        Ok(PresignedUrl {
            url: request.uri().to_string(),
            expires_at,
        })
    }
}
