//! Represents a DRS object known to the service and its staging lifecycle.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use sqlx::FromRow;
use thiserror::Error;

/// Where an object currently sits on its way from cold storage into the outbox.
///
/// Statuses only move forward, with one exception: a `Staged` object whose
/// outbox copy disappeared falls back to `StagingRequested`.
#[derive(Serialize, Deserialize, sqlx::Type, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum StagingStatus {
    Unregistered,
    Registered,
    StagingRequested,
    Staged,
}

impl StagingStatus {
    /// Whether moving from `self` to `next` is a legal lifecycle step.
    pub fn can_transition_to(self, next: StagingStatus) -> bool {
        use StagingStatus::*;
        matches!(
            (self, next),
            (Unregistered, Registered)
                | (Registered, StagingRequested)
                | (Registered, Staged)
                | (StagingRequested, Staged)
                | (Staged, StagingRequested)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StagingStatus::Unregistered => "unregistered",
            StagingStatus::Registered => "registered",
            StagingStatus::StagingRequested => "staging_requested",
            StagingStatus::Staged => "staged",
        }
    }
}

impl std::fmt::Display for StagingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single logical file object served through DRS.
///
/// The checksum, size and creation date are fixed at registration time and
/// never change afterwards.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct DrsObject {
    /// Opaque external identifier used in requests.
    pub object_id: String,

    /// Internal storage identifier, also the key of the object in the outbox bucket.
    pub file_id: String,

    /// SHA-256 of the decrypted content.
    pub decrypted_sha256: String,

    /// Size of the decrypted content in bytes.
    pub decrypted_size: u64,

    /// When the file was originally uploaded.
    pub creation_date: DateTime<Utc>,

    pub current_staging_status: StagingStatus,

    /// When staging was last requested for this object, if ever.
    pub latest_staging_request_timestamp: Option<DateTime<Utc>>,
}

/// The immutable fields supplied when an object is registered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewDrsObject {
    pub object_id: String,
    pub file_id: String,
    pub decrypted_sha256: String,
    pub decrypted_size: u64,
    pub creation_date: DateTime<Utc>,
}

impl DrsObject {
    /// Name of the first immutable field that differs from `candidate`, if any.
    pub fn conflicting_field(&self, candidate: &NewDrsObject) -> Option<&'static str> {
        if self.file_id != candidate.file_id {
            Some("file_id")
        } else if self.decrypted_sha256 != candidate.decrypted_sha256 {
            Some("decrypted_sha256")
        } else if self.decrypted_size != candidate.decrypted_size {
            Some("decrypted_size")
        } else if self.creation_date != candidate.creation_date {
            Some("creation_date")
        } else {
            None
        }
    }
}

/// Raw `drs_objects` row as stored in SQLite.
#[derive(FromRow, Debug)]
pub struct DrsObjectRow {
    pub object_id: String,
    pub file_id: String,
    pub decrypted_sha256: String,
    pub decrypted_size: i64,
    pub creation_date: DateTime<Utc>,
    pub staging_status: StagingStatus,
    pub latest_staging_request_ms: Option<i64>,
}

/// A stored row that cannot be turned into a `DrsObject`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CorruptRow {
    #[error("DrsObject `{object_id}` has a negative decrypted size ({size})")]
    NegativeSize { object_id: String, size: i64 },
    #[error("DrsObject `{object_id}` has an unrepresentable staging request time ({ms})")]
    BadTimestamp { object_id: String, ms: i64 },
}

impl TryFrom<DrsObjectRow> for DrsObject {
    type Error = CorruptRow;

    fn try_from(row: DrsObjectRow) -> Result<Self, Self::Error> {
        let decrypted_size =
            u64::try_from(row.decrypted_size).map_err(|_| CorruptRow::NegativeSize {
                object_id: row.object_id.clone(),
                size: row.decrypted_size,
            })?;
        let latest_staging_request_timestamp = match row.latest_staging_request_ms {
            Some(ms) => Some(Utc.timestamp_millis_opt(ms).single().ok_or_else(|| {
                CorruptRow::BadTimestamp {
                    object_id: row.object_id.clone(),
                    ms,
                }
            })?),
            None => None,
        };

        Ok(Self {
            object_id: row.object_id,
            file_id: row.file_id,
            decrypted_sha256: row.decrypted_sha256,
            decrypted_size,
            creation_date: row.creation_date,
            current_staging_status: row.staging_status,
            latest_staging_request_timestamp,
        })
    }
}

/// Longest accepted `object_id`, in bytes.
pub const MAX_OBJECT_ID_LEN: usize = 256;

/// The one rule for object ids, applied at registration and on access alike,
/// so every registered object can be addressed as a single path segment.
pub fn check_object_id(object_id: &str) -> Result<(), &'static str> {
    if object_id.is_empty() || object_id.len() > MAX_OBJECT_ID_LEN {
        return Err("must be between 1 and 256 bytes");
    }
    if object_id
        .chars()
        .any(|c| c.is_whitespace() || c.is_control() || c == '/' || c == '\\')
    {
        return Err("contains characters that are not allowed");
    }
    Ok(())
}

/// Deserialize a creation date given either as RFC 3339 or as a bare
/// `YYYY-MM-DD` date (interpreted as midnight UTC).
pub fn deserialize_creation_date<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_creation_date(&raw).map_err(serde::de::Error::custom)
}

pub fn parse_creation_date(raw: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| format!("`{}` is neither an RFC 3339 timestamp nor a YYYY-MM-DD date", raw))
}
