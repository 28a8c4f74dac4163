use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::{Value, json};
use std::fmt;

use crate::services::{
    access_resolver::UpstreamUnavailable, event_handlers::ConsumeError,
    metadata_store::StoreError,
};

/// One entry of a 422 validation response.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    /// Location of the offending input, e.g. `["path", "object_id"]`.
    pub loc: Vec<String>,
    pub msg: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl ValidationIssue {
    pub fn new(loc: &[&str], msg: impl Into<String>) -> Self {
        Self {
            loc: loc.iter().map(|s| s.to_string()).collect(),
            msg: msg.into(),
            kind: "value_error".into(),
        }
    }

    pub fn body(loc: &[&str], msg: impl Into<String>) -> Self {
        let mut full = vec!["body"];
        full.extend_from_slice(loc);
        Self::new(&full, msg)
    }
}

/// An error rendered at the HTTP boundary.
///
/// Domain errors carry a stable `exception_id` and structured `data`;
/// validation errors carry a list of issues and always answer 422.
#[derive(Debug)]
pub enum AppError {
    Domain {
        status: StatusCode,
        exception_id: &'static str,
        description: String,
        data: Value,
    },
    Validation(Vec<ValidationIssue>),
}

impl AppError {
    /// Create a domain error with a specific status and exception id.
    pub fn new(
        status: StatusCode,
        exception_id: &'static str,
        description: impl Into<String>,
        data: Value,
    ) -> Self {
        Self::Domain {
            status,
            exception_id,
            description: description.into(),
            data,
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internalError",
            msg,
            json!({}),
        )
    }

    /// 404 for a DRS object that was never registered.
    pub fn no_such_object(object_id: &str) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            "noSuchObject",
            format!("The requested DrsObject wasn't found: {}", object_id),
            json!({ "object_id": object_id }),
        )
    }

    pub fn validation(issues: Vec<ValidationIssue>) -> Self {
        Self::Validation(issues)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Domain { description, .. } => write!(f, "{}", description),
            AppError::Validation(issues) => write!(f, "{} validation issue(s)", issues.len()),
        }
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Domain {
                status,
                exception_id,
                description,
                data,
            } => {
                let body = Json(json!({
                    "exception_id": exception_id,
                    "description": description,
                    "data": data,
                }));
                (status, body).into_response()
            }
            AppError::Validation(issues) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({ "detail": issues })),
            )
                .into_response(),
        }
    }
}

impl From<UpstreamUnavailable> for AppError {
    fn from(err: UpstreamUnavailable) -> Self {
        tracing::error!(
            object_id = %err.object_id,
            operation = err.operation,
            "upstream unavailable: {}",
            err.reason
        );
        AppError::Domain {
            status: StatusCode::SERVICE_UNAVAILABLE,
            exception_id: "upstreamUnavailable",
            description: err.to_string(),
            data: json!({ "object_id": err.object_id, "operation": err.operation }),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::MetadataConflict { object_id, field } => AppError::new(
                StatusCode::CONFLICT,
                "metadataConflict",
                format!(
                    "DrsObject {} is already registered with a different {}",
                    object_id, field
                ),
                json!({ "object_id": object_id, "field": field }),
            ),
            StoreError::InvalidTransition { .. }
            | StoreError::SizeOutOfRange(_)
            | StoreError::CorruptRow(_) => {
                AppError::internal(err.to_string())
            }
            other => AppError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "upstreamUnavailable",
                other.to_string(),
                json!({}),
            ),
        }
    }
}

impl From<ConsumeError> for AppError {
    fn from(err: ConsumeError) -> Self {
        match err {
            ConsumeError::Store(store) => store.into(),
            ConsumeError::Contended(object_id) => AppError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "upstreamUnavailable",
                format!("DrsObject {} is being updated concurrently", object_id),
                json!({ "object_id": object_id }),
            ),
            ConsumeError::UnknownObject(object_id) => AppError::new(
                StatusCode::NOT_FOUND,
                "unknownObject",
                format!(
                    "Staging confirmed for DrsObject {} before it was registered",
                    object_id
                ),
                json!({ "object_id": object_id }),
            ),
        }
    }
}
