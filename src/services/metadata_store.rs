//! src/services/metadata_store.rs
//!
//! MetadataStore: durable record of DRS objects and their staging status,
//! backed by SQLite. Every status change is a single conditional UPDATE, so
//! concurrent resolvers (in this process or another) coordinate through the
//! database alone.

use crate::models::drs_object::{CorruptRow, DrsObject, DrsObjectRow, NewDrsObject, StagingStatus};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Schema applied by `--migrate` and by tests.
const MIGRATION_SQL: &str = include_str!("../../migrations/0001_init.sql");

const OBJECT_COLUMNS: &str = "object_id, file_id, decrypted_sha256, decrypted_size, \
     creation_date, staging_status, latest_staging_request_ms";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("DrsObject `{object_id}` is already registered with a different {field}")]
    MetadataConflict {
        object_id: String,
        field: &'static str,
    },
    #[error("staging status cannot move from {from} to {to}")]
    InvalidTransition {
        from: StagingStatus,
        to: StagingStatus,
    },
    #[error("decrypted size {0} exceeds the supported maximum")]
    SizeOutOfRange(u64),
    #[error("DrsObject `{0}` vanished while being registered")]
    Vanished(String),
    #[error(transparent)]
    CorruptRow(#[from] CorruptRow),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// What `upsert` did with a registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// A new record was created with status `Registered`.
    Created(DrsObject),
    /// An identical record already existed; nothing changed.
    Unchanged(DrsObject),
}

/// MetadataStore owns the authoritative staging status of every object.
/// Records are never deleted here.
#[derive(Clone)]
pub struct MetadataStore {
    /// Shared SQLite connection pool.
    pub db: Arc<SqlitePool>,
}

impl MetadataStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Apply the embedded schema. Statements are idempotent.
    pub async fn apply_schema(&self) -> StoreResult<usize> {
        let statements = MIGRATION_SQL
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        info!("Running {} migration statements...", statements.len());
        for stmt in &statements {
            debug!("Executing migration SQL: {}", stmt);
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(statements.len())
    }

    /// Cheap connectivity probe used by the readiness endpoint.
    pub async fn ping(&self) -> StoreResult<()> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await?;
        Ok(())
    }

    /// Fetch an object by its external id.
    pub async fn get(&self, object_id: &str) -> StoreResult<Option<DrsObject>> {
        let row = sqlx::query_as::<_, DrsObjectRow>(&format!(
            "SELECT {} FROM drs_objects WHERE object_id = ?",
            OBJECT_COLUMNS
        ))
        .bind(object_id)
        .fetch_optional(&*self.db)
        .await?;

        row.map(DrsObject::try_from)
            .transpose()
            .map_err(StoreError::from)
    }

    /// Register an object.
    ///
    /// - absent: created with status `Registered`
    /// - present with identical immutable fields: no-op
    /// - present with different immutable fields: `MetadataConflict`
    pub async fn upsert(&self, new: &NewDrsObject) -> StoreResult<UpsertOutcome> {
        let size = i64::try_from(new.decrypted_size)
            .map_err(|_| StoreError::SizeOutOfRange(new.decrypted_size))?;

        let inserted = sqlx::query(
            "INSERT INTO drs_objects (
                object_id, file_id, decrypted_sha256, decrypted_size,
                creation_date, staging_status, latest_staging_request_ms
            ) VALUES (?, ?, ?, ?, ?, ?, NULL)
            ON CONFLICT(object_id) DO NOTHING",
        )
        .bind(&new.object_id)
        .bind(&new.file_id)
        .bind(&new.decrypted_sha256)
        .bind(size)
        .bind(new.creation_date)
        .bind(StagingStatus::Registered)
        .execute(&*self.db)
        .await?;

        let stored = self
            .get(&new.object_id)
            .await?
            .ok_or_else(|| StoreError::Vanished(new.object_id.clone()))?;

        if inserted.rows_affected() == 1 {
            info!(object_id = %new.object_id, file_id = %new.file_id, "registered DrsObject");
            return Ok(UpsertOutcome::Created(stored));
        }

        if let Some(field) = stored.conflicting_field(new) {
            warn!(object_id = %new.object_id, field, "conflicting re-registration rejected");
            return Err(StoreError::MetadataConflict {
                object_id: new.object_id.clone(),
                field,
            });
        }

        debug!(object_id = %new.object_id, "duplicate registration ignored");
        Ok(UpsertOutcome::Unchanged(stored))
    }

    /// Atomically move `object_id` from `expected` to `new`.
    ///
    /// Returns `true` iff this call performed the transition. Entering
    /// `StagingRequested` also stamps the staging request time.
    pub async fn compare_and_transition(
        &self,
        object_id: &str,
        expected: StagingStatus,
        new: StagingStatus,
    ) -> StoreResult<bool> {
        if !expected.can_transition_to(new) {
            return Err(StoreError::InvalidTransition {
                from: expected,
                to: new,
            });
        }

        let result = if new == StagingStatus::StagingRequested {
            sqlx::query(
                "UPDATE drs_objects
                 SET staging_status = ?, latest_staging_request_ms = ?
                 WHERE object_id = ? AND staging_status = ?",
            )
            .bind(new)
            .bind(Utc::now().timestamp_millis())
            .bind(object_id)
            .bind(expected)
            .execute(&*self.db)
            .await?
        } else {
            sqlx::query(
                "UPDATE drs_objects SET staging_status = ?
                 WHERE object_id = ? AND staging_status = ?",
            )
            .bind(new)
            .bind(object_id)
            .bind(expected)
            .execute(&*self.db)
            .await?
        };

        let won = result.rows_affected() == 1;
        if won {
            info!(object_id, from = %expected, to = %new, "staging status changed");
        } else {
            debug!(object_id, from = %expected, to = %new, "staging status transition not applied");
        }
        Ok(won)
    }

    /// Re-stamp the staging request time of a `StagingRequested` object, but
    /// only if it still carries `previous`. Returns `true` for the single
    /// caller that refreshed it.
    pub async fn refresh_staging_request(
        &self,
        object_id: &str,
        previous: Option<DateTime<Utc>>,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE drs_objects SET latest_staging_request_ms = ?
             WHERE object_id = ? AND staging_status = ?
               AND latest_staging_request_ms IS ?",
        )
        .bind(Utc::now().timestamp_millis())
        .bind(object_id)
        .bind(StagingStatus::StagingRequested)
        .bind(previous.map(|ts| ts.timestamp_millis()))
        .execute(&*self.db)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Look up a cached decryption envelope.
    pub async fn get_envelope(&self, envelope_id: &str) -> StoreResult<Option<Vec<u8>>> {
        let content = sqlx::query_scalar::<_, Vec<u8>>(
            "SELECT content FROM envelopes WHERE envelope_id = ?",
        )
        .bind(envelope_id)
        .fetch_optional(&*self.db)
        .await?;
        Ok(content)
    }

    /// Cache an envelope. The first writer wins; later inserts are ignored.
    pub async fn insert_envelope(
        &self,
        envelope_id: &str,
        object_id: &str,
        content: &[u8],
    ) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO envelopes (envelope_id, object_id, content, created_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(envelope_id) DO NOTHING",
        )
        .bind(envelope_id)
        .bind(object_id)
        .bind(content)
        .bind(Utc::now())
        .execute(&*self.db)
        .await?;
        Ok(())
    }
}
