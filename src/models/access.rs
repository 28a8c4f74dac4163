//! Values produced while resolving access to a DRS object. None of these are
//! persisted.

use base64::{Engine as _, engine::general_purpose};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::{fmt, time::Duration};

use super::drs_object::DrsObject;

/// The requester's public key, used to personalize the decryption envelope.
/// Not validated beyond being non-empty.
#[derive(Clone, PartialEq, Eq)]
pub struct RequesterKey(Vec<u8>);

impl RequesterKey {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Decode a key transmitted as standard base64.
    pub fn from_base64(encoded: &str) -> Result<Self, base64::DecodeError> {
        general_purpose::STANDARD
            .decode(encoded.trim())
            .map(Self)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// URL-safe, unpadded base64, suitable for a path segment.
    pub fn to_url_safe(&self) -> String {
        general_purpose::URL_SAFE_NO_PAD.encode(&self.0)
    }

    /// Identifier of the envelope personalized for this key and `file_id`.
    pub fn envelope_id(&self, file_id: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(file_id.as_bytes());
        hasher.update(&self.0);
        hex::encode(hasher.finalize())
    }
}

impl fmt::Debug for RequesterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RequesterKey({} bytes)", self.0.len())
    }
}

/// A time-limited download URL for one object in the outbox.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PresignedUrl {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

/// Everything a client needs to download and decrypt one object.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct AccessDescriptor {
    #[serde(rename = "id")]
    pub object_id: String,
    pub file_id: String,
    pub decrypted_sha256: String,
    pub decrypted_size: u64,
    pub creation_date: DateTime<Utc>,
    pub self_uri: String,
    pub access_url: String,
    #[serde(skip)]
    pub expires_at: DateTime<Utc>,
    #[serde(skip)]
    pub envelope_id: String,
}

impl AccessDescriptor {
    pub fn compose(
        object: &DrsObject,
        self_uri: String,
        url: PresignedUrl,
        envelope_id: String,
    ) -> Self {
        Self {
            object_id: object.object_id.clone(),
            file_id: object.file_id.clone(),
            decrypted_sha256: object.decrypted_sha256.clone(),
            decrypted_size: object.decrypted_size,
            creation_date: object.creation_date,
            self_uri,
            access_url: url.url,
            expires_at: url.expires_at,
            envelope_id,
        }
    }
}

/// Result of a single access resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessOutcome {
    /// The object is in the outbox and can be downloaded right away.
    Serve(AccessDescriptor),
    /// Staging is pending; the caller should poll again after this long.
    Delayed(Duration),
    ObjectNotFound,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_id_depends_on_file_and_key() {
        let key = RequesterKey::new(b"pk-1".to_vec());
        let other = RequesterKey::new(b"pk-2".to_vec());
        assert_eq!(key.envelope_id("f1"), key.envelope_id("f1"));
        assert_ne!(key.envelope_id("f1"), other.envelope_id("f1"));
        assert_ne!(key.envelope_id("f1"), key.envelope_id("f2"));
        assert_eq!(key.envelope_id("f1").len(), 64);
    }

    #[test]
    fn key_round_trips_between_encodings() {
        let key = RequesterKey::from_base64("cHVibGljLWtleT8/").unwrap();
        assert_eq!(key.as_bytes(), b"public-key??");
        assert_eq!(key.to_url_safe(), "cHVibGljLWtleT8_");
        assert!(RequesterKey::from_base64("not base64!").is_err());
    }
}
