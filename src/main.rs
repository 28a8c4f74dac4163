use anyhow::{Context, Result};
use axum::Router;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::{fs, io::ErrorKind, path::Path, str::FromStr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod state;

use services::{
    access_resolver::AccessResolver, envelope_client::HttpEnvelopeClient,
    event_handlers::EventConsumer, event_publisher::HttpEventPublisher,
    metadata_store::MetadataStore, object_gateway::S3ObjectGateway,
};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting drs-access with config: {:?}", cfg);

    // --- Initialize SQLite connection ---
    let db_url = &cfg.database_url;
    let db_path = db_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    let options = SqliteConnectOptions::from_str(db_url)
        .with_context(|| format!("invalid database url `{}`", db_url))?
        .create_if_missing(true);
    let db = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?,
    );
    let store = MetadataStore::new(db);

    // --- Handle migration mode ---
    if migrate {
        let applied = store.apply_schema().await?;
        tracing::info!("Database migration complete ({} statements).", applied);
        return Ok(());
    }

    // --- Initialize adapters and services ---
    let timeout = Duration::from_secs(cfg.upstream_timeout);
    let gateway = S3ObjectGateway::new(&cfg.s3, &cfg.outbox_bucket).await;
    let envelopes = HttpEnvelopeClient::new(&cfg.ekss_base_url, timeout)?;
    let publisher = Arc::new(HttpEventPublisher::new(
        &cfg.event_bus_url,
        cfg.topics(),
        timeout,
    )?);

    let resolver = AccessResolver::new(
        store.clone(),
        Arc::new(gateway),
        Arc::new(envelopes),
        publisher.clone(),
        cfg.resolver_settings(),
    );
    let consumer = EventConsumer::new(store.clone(), publisher, cfg.drs_server_uri.clone());
    let state = state::AppState {
        resolver,
        consumer,
        store,
    };

    // --- Build router ---
    let app: Router = routes::routes::routes().with_state(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
