//! Push endpoint through which the message bus delivers inbound events.
//!
//! The payload is parsed into a tagged `InboundEvent` and validated before
//! it reaches the consumer. 2xx acknowledges the delivery; 4xx marks it as
//! permanently unprocessable; 503 asks for redelivery.

use crate::{
    errors::{AppError, ValidationIssue},
    models::events::InboundEvent,
    state::AppState,
};
use axum::{body::Bytes, extract::State, http::StatusCode};
use tracing::debug;

/// `POST /events`
pub async fn receive_event(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    let event: InboundEvent = serde_json::from_slice(&body).map_err(|err| {
        AppError::validation(vec![ValidationIssue::new(&["body"], err.to_string())])
    })?;
    event.validate().map_err(AppError::validation)?;

    let object_id = event.object_id().to_string();
    let outcome = state.consumer.handle(event).await?;
    debug!(object_id = %object_id, ?outcome, "inbound event processed");

    Ok(StatusCode::NO_CONTENT)
}
