use anyhow::{Context, Result, bail};
use clap::Parser;
use std::{env, fmt, str::FromStr, time::Duration};

use crate::services::{access_resolver::ResolverSettings, event_publisher::Topics};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub outbox_bucket: String,
    pub drs_server_uri: String,
    pub retry_access_after: u64,
    pub presigned_url_expiry: u64,
    pub ekss_base_url: String,
    pub event_bus_url: String,
    pub staging_requested_topic: String,
    pub download_served_topic: String,
    pub file_registered_topic: String,
    pub upstream_timeout: u64,
    pub restage_after: Option<u64>,
    pub s3: S3Settings,
}

/// Connection settings for the S3-compatible outbox.
#[derive(Clone)]
pub struct S3Settings {
    pub endpoint: Option<String>,
    pub region: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub force_path_style: bool,
}

impl fmt::Debug for S3Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Settings")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field(
                "secret_access_key",
                &self.secret_access_key.as_ref().map(|_| "<redacted>"),
            )
            .field("force_path_style", &self.force_path_style)
            .finish()
    }
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "GA4GH DRS object access service")]
pub struct Args {
    /// Host to bind to (overrides DRS_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides DRS_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Database URL (overrides DRS_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Bucket objects are served from (overrides DRS_OUTBOX_BUCKET)
    #[arg(long)]
    pub outbox_bucket: Option<String>,

    /// Base of self URIs, `drs://host/` (overrides DRS_SERVER_URI)
    #[arg(long)]
    pub drs_server_uri: Option<String>,

    /// Seconds a client should wait before polling again (overrides DRS_RETRY_ACCESS_AFTER)
    #[arg(long)]
    pub retry_access_after: Option<u64>,

    /// Lifetime of presigned download URLs in seconds (overrides DRS_PRESIGNED_URL_EXPIRY)
    #[arg(long)]
    pub presigned_url_expiry: Option<u64>,

    /// Keyserver base URL (overrides DRS_EKSS_BASE_URL)
    #[arg(long)]
    pub ekss_base_url: Option<String>,

    /// Event bus REST endpoint (overrides DRS_EVENT_BUS_URL)
    #[arg(long)]
    pub event_bus_url: Option<String>,

    /// Per-call timeout for upstream dependencies in seconds (overrides DRS_UPSTREAM_TIMEOUT)
    #[arg(long)]
    pub upstream_timeout: Option<u64>,

    /// Re-request staging after this many seconds without confirmation; unset disables it (overrides DRS_RESTAGE_AFTER)
    #[arg(long)]
    pub restage_after: Option<u64>,

    /// S3 endpoint override, e.g. for MinIO (overrides DRS_S3_ENDPOINT)
    #[arg(long)]
    pub s3_endpoint: Option<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        Ok((Self::from_args(args)?, migrate))
    }

    /// Merge `args` over `DRS_*` environment variables over defaults.
    pub fn from_args(args: Args) -> Result<Self> {
        let cfg = Self {
            host: args.host.unwrap_or_else(|| env_or("DRS_HOST", "0.0.0.0")),
            port: pick(args.port, "DRS_PORT", 8080)?,
            database_url: args
                .database_url
                .unwrap_or_else(|| env_or("DRS_DATABASE_URL", "sqlite://./data/drs.db")),
            outbox_bucket: required(args.outbox_bucket, "DRS_OUTBOX_BUCKET")?,
            drs_server_uri: required(args.drs_server_uri, "DRS_SERVER_URI")?,
            retry_access_after: pick(args.retry_access_after, "DRS_RETRY_ACCESS_AFTER", 120)?,
            presigned_url_expiry: pick(args.presigned_url_expiry, "DRS_PRESIGNED_URL_EXPIRY", 60)?,
            ekss_base_url: required(args.ekss_base_url, "DRS_EKSS_BASE_URL")?,
            event_bus_url: required(args.event_bus_url, "DRS_EVENT_BUS_URL")?,
            staging_requested_topic: env_or("DRS_STAGING_REQUESTED_TOPIC", "file_downloads"),
            download_served_topic: env_or("DRS_DOWNLOAD_SERVED_TOPIC", "file_downloads"),
            file_registered_topic: env_or("DRS_FILE_REGISTERED_TOPIC", "file_downloads"),
            upstream_timeout: pick(args.upstream_timeout, "DRS_UPSTREAM_TIMEOUT", 10)?,
            restage_after: pick_optional(args.restage_after, "DRS_RESTAGE_AFTER")?,
            s3: S3Settings {
                endpoint: args.s3_endpoint.or_else(|| env::var("DRS_S3_ENDPOINT").ok()),
                region: env_or("DRS_S3_REGION", "us-east-1"),
                access_key_id: env::var("DRS_S3_ACCESS_KEY_ID").ok(),
                secret_access_key: env::var("DRS_S3_SECRET_ACCESS_KEY").ok(),
                force_path_style: pick(None, "DRS_S3_FORCE_PATH_STYLE", false)?,
            },
        };
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        check_drs_server_uri(&self.drs_server_uri)?;
        if self.presigned_url_expiry == 0 {
            bail!("presigned_url_expiry must be at least one second");
        }
        if self.upstream_timeout == 0 {
            bail!("upstream_timeout must be at least one second");
        }
        if self.s3.access_key_id.is_some() != self.s3.secret_access_key.is_some() {
            bail!("DRS_S3_ACCESS_KEY_ID and DRS_S3_SECRET_ACCESS_KEY must be set together");
        }
        Ok(())
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn resolver_settings(&self) -> ResolverSettings {
        ResolverSettings {
            drs_server_uri: self.drs_server_uri.clone(),
            retry_access_after: Duration::from_secs(self.retry_access_after),
            presigned_url_expiry: Duration::from_secs(self.presigned_url_expiry),
            upstream_timeout: Duration::from_secs(self.upstream_timeout),
            restage_after: self.restage_after.map(Duration::from_secs),
        }
    }

    pub fn topics(&self) -> Topics {
        Topics {
            staging_requested: self.staging_requested_topic.clone(),
            download_served: self.download_served_topic.clone(),
            file_registered: self.file_registered_topic.clone(),
        }
    }
}

/// The self URI base must look like `drs://host/`.
pub fn check_drs_server_uri(value: &str) -> Result<()> {
    let valid = value
        .strip_prefix("drs://")
        .and_then(|rest| rest.strip_suffix('/'))
        .is_some_and(|host| !host.is_empty());
    if !valid {
        bail!(
            "drs_server_uri has to start with 'drs://' and end with '/', got: {}",
            value
        );
    }
    Ok(())
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.into())
}

fn required(arg: Option<String>, key: &str) -> Result<String> {
    match arg {
        Some(value) => Ok(value),
        None => env::var(key).with_context(|| format!("{} must be set", key)),
    }
}

fn pick<T>(arg: Option<T>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    Ok(pick_optional(arg, key)?.unwrap_or(default))
}

fn pick_optional<T>(arg: Option<T>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    if arg.is_some() {
        return Ok(arg);
    }
    match env::var(key) {
        Ok(value) => value
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("parsing {} value `{}`", key, value)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err).with_context(|| format!("reading {}", key)),
    }
}
