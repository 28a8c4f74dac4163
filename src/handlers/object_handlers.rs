//! HTTP handlers for DRS object access. Request validation happens here;
//! the decision to serve or delay is delegated to `AccessResolver`.

use crate::{
    errors::{AppError, ValidationIssue},
    models::{
        access::{AccessOutcome, RequesterKey},
        drs_object::{StagingStatus, check_object_id},
    },
    state::AppState,
};
use axum::{
    Json,
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use std::time::Duration;

/// Header carrying the requester's public key (standard base64).
pub const PUBLIC_KEY_HEADER: &str = "x-public-key";

/// `GET /objects/{object_id}`: serve the object or ask the client to retry later.
pub async fn get_object(
    State(state): State<AppState>,
    Path(object_id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let key = validate_request(&object_id, &headers)?;

    match state.resolver.resolve_access(&object_id, &key).await? {
        AccessOutcome::Serve(descriptor) => Ok((StatusCode::OK, Json(descriptor)).into_response()),
        AccessOutcome::Delayed(retry_after) => Ok(retry_later(retry_after)),
        AccessOutcome::ObjectNotFound => Err(AppError::no_such_object(&object_id)),
    }
}

/// `GET /objects/{object_id}/envelopes`: the decryption envelope for the
/// requester's key. Only available once the object is staged.
pub async fn get_envelope(
    State(state): State<AppState>,
    Path(object_id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let key = validate_request(&object_id, &headers)?;

    let Some(object) = state.resolver.lookup(&object_id).await? else {
        return Err(AppError::no_such_object(&object_id));
    };
    if object.current_staging_status != StagingStatus::Staged {
        return Ok(retry_later(state.resolver.settings().retry_access_after));
    }

    let (_, content) = state.resolver.envelope(&object, &key).await?;
    let mut response = Response::new(Body::from(content));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    Ok(response)
}

/// 202 with an empty body and a `Retry-After` header.
fn retry_later(retry_after: Duration) -> Response {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::ACCEPTED;
    response
        .headers_mut()
        .insert(header::RETRY_AFTER, HeaderValue::from(retry_after.as_secs()));
    response
}

/// Check the path and headers, collecting every problem before failing.
fn validate_request(object_id: &str, headers: &HeaderMap) -> Result<RequesterKey, AppError> {
    let mut issues = Vec::new();
    if let Err(issue) = check_path_object_id(object_id) {
        issues.push(issue);
    }
    let key = match requester_key(headers) {
        Ok(key) => Some(key),
        Err(issue) => {
            issues.push(issue);
            None
        }
    };

    match key {
        Some(key) if issues.is_empty() => Ok(key),
        _ => Err(AppError::validation(issues)),
    }
}

fn check_path_object_id(object_id: &str) -> Result<(), ValidationIssue> {
    check_object_id(object_id).map_err(|msg| ValidationIssue::new(&["path", "object_id"], msg))
}

fn requester_key(headers: &HeaderMap) -> Result<RequesterKey, ValidationIssue> {
    let loc = ["header", PUBLIC_KEY_HEADER];
    let raw = headers
        .get(PUBLIC_KEY_HEADER)
        .ok_or_else(|| ValidationIssue::new(&loc, "field required"))?;
    let text = raw
        .to_str()
        .map_err(|_| ValidationIssue::new(&loc, "must be ASCII"))?;
    let key = RequesterKey::from_base64(text)
        .map_err(|err| ValidationIssue::new(&loc, format!("invalid base64: {}", err)))?;
    if key.as_bytes().is_empty() {
        return Err(ValidationIssue::new(&loc, "must not be empty"));
    }
    Ok(key)
}
