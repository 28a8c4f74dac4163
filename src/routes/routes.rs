//! Defines routes for the DRS access service.
//!
//! ## Structure
//! - **Probes**
//!   - `GET  /health`, `/healthz`: liveness
//!   - `GET  /readyz`: readiness (metadata store reachable)
//!
//! - **Object access**
//!   - `GET  /objects/{object_id}`: serve (200) or retry later (202)
//!   - `GET  /objects/{object_id}/envelopes`: personalized decryption envelope
//!
//! - **Event delivery**
//!   - `POST /events`: inbound bus events (registration, staging confirmation)

use crate::{
    handlers::{
        health_handlers::{health, readyz},
        inbound_handlers::receive_event,
        object_handlers::{get_envelope, get_object},
    },
    state::AppState,
};
use axum::{
    Router,
    routing::{get, post},
};

/// Build and return the router. Every handler shares `AppState`.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health))
        .route("/readyz", get(readyz))
        .route("/objects/{object_id}", get(get_object))
        .route("/objects/{object_id}/envelopes", get(get_envelope))
        .route("/events", post(receive_event))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        handlers::object_handlers::PUBLIC_KEY_HEADER,
        services::{
            access_resolver::test_support::{Harness, harness},
            event_handlers::EventConsumer,
        },
    };
    use axum::{
        body::Body,
        http::{Request, StatusCode, header},
    };
    use serde_json::{Value, json};
    use std::sync::Arc;
    use tower::ServiceExt;

    // base64 of "requester-public-key"
    const KEY_B64: &str = "cmVxdWVzdGVyLXB1YmxpYy1rZXk=";

    struct TestApp {
        router: Router,
        h: Harness,
    }

    async fn app() -> TestApp {
        let h = harness().await;
        let consumer = EventConsumer::new(
            h.store.clone(),
            Arc::new(h.publisher.clone()),
            "drs://localhost:8080/",
        );
        let state = AppState {
            resolver: h.resolver.clone(),
            consumer,
            store: h.store.clone(),
        };
        TestApp {
            router: routes().with_state(state),
            h,
        }
    }

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, header::HeaderMap, Vec<u8>) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, headers, bytes.to_vec())
    }

    async fn get_object(router: &Router, object_id: &str) -> (StatusCode, header::HeaderMap, Vec<u8>) {
        let request = Request::builder()
            .uri(format!("/objects/{}", object_id))
            .header(PUBLIC_KEY_HEADER, KEY_B64)
            .body(Body::empty())
            .unwrap();
        send(router, request).await
    }

    async fn post_event(router: &Router, event: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri("/events")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(&event).unwrap()))
            .unwrap();
        let (status, _, body) = send(router, request).await;
        let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
        (status, json)
    }

    fn register_obj_1() -> Value {
        json!({
            "type": "object_to_register",
            "payload": {
                "object_id": "obj-1",
                "file_id": "f1",
                "decrypted_sha256": "abc",
                "decrypted_size": 100,
                "creation_date": "2023-01-01"
            }
        })
    }

    #[tokio::test]
    async fn health_is_ok() {
        let app = app().await;
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let (status, _, body) = send(&app.router, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            serde_json::from_slice::<Value>(&body).unwrap(),
            json!({ "status": "OK" })
        );
    }

    #[tokio::test]
    async fn readiness_checks_the_store() {
        let app = app().await;
        let request = Request::builder().uri("/readyz").body(Body::empty()).unwrap();
        let (status, _, _) = send(&app.router, request).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_object_is_404_with_structured_body() {
        let app = app().await;
        let (status, _, body) = get_object(&app.router, "obj-1").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["exception_id"], "noSuchObject");
        assert_eq!(body["data"]["object_id"], "obj-1");
        assert!(body["description"].is_string());
    }

    #[tokio::test]
    async fn missing_public_key_is_422() {
        let app = app().await;
        let request = Request::builder()
            .uri("/objects/obj-1")
            .body(Body::empty())
            .unwrap();
        let (status, _, body) = send(&app.router, request).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["detail"][0]["loc"], json!(["header", PUBLIC_KEY_HEADER]));
    }

    #[tokio::test]
    async fn register_request_stage_and_serve() {
        let app = app().await;

        let (status, _) = post_event(&app.router, register_obj_1()).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, headers, body) = get_object(&app.router, "obj-1").await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(headers[header::RETRY_AFTER], "120");
        assert!(body.is_empty());
        assert_eq!(app.h.publisher.count("staging_requested").await, 1);

        let (status, _, _) = get_object(&app.router, "obj-1").await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(app.h.publisher.count("staging_requested").await, 1);

        let (status, _) = post_event(
            &app.router,
            json!({ "type": "object_staged_in_outbox", "payload": { "object_id": "obj-1" } }),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        app.h.gateway.fake_put("f1").await;

        let (status, _, body) = get_object(&app.router, "obj-1").await;
        assert_eq!(status, StatusCode::OK);
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["id"], "obj-1");
        assert_eq!(body["file_id"], "f1");
        assert_eq!(body["decrypted_sha256"], "abc");
        assert_eq!(body["decrypted_size"], 100);
        assert_eq!(body["creation_date"], "2023-01-01T00:00:00Z");
        assert_eq!(body["self_uri"], "drs://localhost:8080/obj-1");
        assert!(body["access_url"].as_str().unwrap().contains("f1"));
        assert_eq!(app.h.publisher.count("download_served").await, 1);
    }

    #[tokio::test]
    async fn envelope_is_served_once_staged() {
        let app = app().await;
        post_event(&app.router, register_obj_1()).await;

        let request = || {
            Request::builder()
                .uri("/objects/obj-1/envelopes")
                .header(PUBLIC_KEY_HEADER, KEY_B64)
                .body(Body::empty())
                .unwrap()
        };
        let (status, _, _) = send(&app.router, request()).await;
        assert_eq!(status, StatusCode::ACCEPTED);

        post_event(
            &app.router,
            json!({ "type": "object_staged_in_outbox", "payload": { "object_id": "obj-1" } }),
        )
        .await;
        let (status, headers, body) = send(&app.router, request()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CONTENT_TYPE], "application/octet-stream");
        assert!(body.starts_with(b"envelope:f1:"));
    }

    #[tokio::test]
    async fn conflicting_registration_is_409() {
        let app = app().await;
        post_event(&app.router, register_obj_1()).await;

        let mut changed = register_obj_1();
        changed["payload"]["decrypted_size"] = json!(101);
        let (status, body) = post_event(&app.router, changed).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["exception_id"], "metadataConflict");
        assert_eq!(body["data"]["field"], "decrypted_size");
    }

    #[tokio::test]
    async fn staging_confirmation_for_unknown_object_is_rejected() {
        let app = app().await;
        let (status, body) = post_event(
            &app.router,
            json!({ "type": "object_staged_in_outbox", "payload": { "object_id": "ghost" } }),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["exception_id"], "unknownObject");
    }

    #[tokio::test]
    async fn malformed_events_are_422() {
        let app = app().await;

        let (status, body) =
            post_event(&app.router, json!({ "type": "file_deleted", "payload": {} })).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["detail"].is_array());

        let mut empty_id = register_obj_1();
        empty_id["payload"]["object_id"] = json!("");
        let (status, body) = post_event(&app.router, empty_id).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(
            body["detail"][0]["loc"],
            json!(["body", "payload", "object_id"])
        );
    }

    #[tokio::test]
    async fn registration_of_unaddressable_id_is_422() {
        let app = app().await;
        let mut event = register_obj_1();
        event["payload"]["object_id"] = json!("a\\b");

        let (status, body) = post_event(&app.router, event).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(
            body["detail"][0]["loc"],
            json!(["body", "payload", "object_id"])
        );
        assert!(app.h.store.get("a\\b").await.unwrap().is_none());
        assert_eq!(app.h.publisher.count("file_registered").await, 0);
    }

    #[tokio::test]
    async fn upstream_outage_is_503() {
        let app = app().await;
        post_event(&app.router, register_obj_1()).await;
        post_event(
            &app.router,
            json!({ "type": "object_staged_in_outbox", "payload": { "object_id": "obj-1" } }),
        )
        .await;
        app.h.gateway.fake_fail(true);

        let (status, _, body) = get_object(&app.router, "obj-1").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["exception_id"], "upstreamUnavailable");
    }
}
