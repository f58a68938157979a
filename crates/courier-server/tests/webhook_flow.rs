use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use courier_agents::{EchoLlmClient, LogMailClient};
use courier_security::SignatureVerifier;
use courier_server::{build_state, router, spawn_workers, AppState};
use courier_store::TaskStore;
use courier_types::{CourierConfig, RetryPolicyConfig, TaskStatus};

const SIGNING_KEY: &str = "integration-test-key";

async fn test_state() -> (AppState, Router, TempDir) {
    let tmp = TempDir::new().unwrap();
    let mut config = CourierConfig::default();
    config.webhook.signing_key = SIGNING_KEY.to_string();
    config.retry.agent = RetryPolicyConfig {
        max_attempts: 2,
        base_delay_ms: 1,
        max_delay_ms: 2,
        exp_base: 2.0,
    };
    let state = build_state(
        config,
        Arc::new(EchoLlmClient),
        Arc::new(LogMailClient),
        tmp.path().join("dlq.db"),
    )
    .await
    .unwrap();
    let app = router(state.clone());
    (state, app, tmp)
}

fn signed_envelope(token: &str, subject: &str, body: &str) -> Value {
    let verifier = SignatureVerifier::new(SIGNING_KEY.as_bytes().to_vec(), 120);
    let timestamp = chrono::Utc::now().timestamp().to_string();
    let signature = verifier.sign(token, &timestamp).unwrap();
    json!({
        "signature": {
            "timestamp": timestamp,
            "token": token,
            "signature": signature,
        },
        "event-data": {
            "event": "delivered",
            "recipient": "agent@courier.dev",
            "sender": "user@example.com",
            "message": {
                "headers": {
                    "from": "user@example.com",
                    "subject": subject,
                    "message-id": format!("<{token}@example.com>"),
                },
                "body-plain": body,
            }
        }
    })
}

fn json_post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn valid_webhook_is_accepted_and_queued() {
    let (state, app, _tmp) = test_state().await;
    let envelope = signed_envelope("tok-accept", "URGENT: login broken", "Users can't log in. Fix ASAP.");

    let response = app
        .oneshot(json_post("/webhooks/inbound", envelope))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "queued");
    let task_id = body["task_id"].as_str().unwrap();

    let task = state.store.get_task(task_id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Queued);
    assert_eq!(task.priority, courier_types::TaskPriority::Urgent);
    assert_eq!(task.task_type, courier_types::TaskType::BugReport);
    assert_eq!(state.queue.depth().await, 1);
}

#[tokio::test]
async fn duplicate_webhook_yields_exactly_one_task() {
    let (state, app, _tmp) = test_state().await;
    let envelope = signed_envelope("tok-dup", "Review my PR", "please review PR #42");

    let first = app
        .clone()
        .oneshot(json_post("/webhooks/inbound", envelope.clone()))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(body_json(first).await["status"], "queued");

    let second = app
        .oneshot(json_post("/webhooks/inbound", envelope))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(body_json(second).await["status"], "duplicate");

    assert_eq!(state.store.list_active().await.unwrap().len(), 1);
    assert_eq!(state.queue.depth().await, 1);
}

#[tokio::test]
async fn tampered_signature_is_rejected() {
    let (_state, app, _tmp) = test_state().await;
    let mut envelope = signed_envelope("tok-bad", "s", "b");
    envelope["signature"]["signature"] = json!("deadbeef".repeat(8));

    let response = app
        .oneshot(json_post("/webhooks/inbound", envelope))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_json(response).await["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn stale_timestamp_is_rejected() {
    let (_state, app, _tmp) = test_state().await;
    let verifier = SignatureVerifier::new(SIGNING_KEY.as_bytes().to_vec(), 120);
    let stale = (chrono::Utc::now().timestamp() - 1_000).to_string();
    let signature = verifier.sign("tok-stale", &stale).unwrap();
    let mut envelope = signed_envelope("tok-stale", "s", "b");
    envelope["signature"]["timestamp"] = json!(stale);
    envelope["signature"]["signature"] = json!(signature);

    let response = app
        .oneshot(json_post("/webhooks/inbound", envelope))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn non_json_body_is_unsupported_media() {
    let (_state, app, _tmp) = test_state().await;
    let request = Request::builder()
        .method("POST")
        .uri("/webhooks/inbound")
        .header(header::CONTENT_TYPE, "text/plain")
        .body(Body::from("hello"))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
}

#[tokio::test]
async fn malformed_json_is_a_bad_request() {
    let (_state, app, _tmp) = test_state().await;
    let request = Request::builder()
        .method("POST")
        .uri("/webhooks/inbound")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn missing_envelope_fields_fail_validation() {
    let (_state, app, _tmp) = test_state().await;
    let response = app
        .oneshot(json_post("/webhooks/inbound", json!({"event-data": {}})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["code"], "MISSING_PARAMETER");
    assert!(body["details"]["errors"].as_array().is_some());
}

#[tokio::test]
async fn health_reports_components() {
    let (_state, app, _tmp) = test_state().await;
    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["components"]["dead_letter_queue"], "healthy");
}

#[tokio::test]
async fn template_catalog_is_served() {
    let (_state, app, _tmp) = test_state().await;
    let request = Request::builder()
        .uri("/workflows/templates")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["templates"].as_array().unwrap().len(), 4);
}

#[tokio::test]
async fn dispatch_parse_email_returns_a_task_without_queueing() {
    let (state, app, _tmp) = test_state().await;
    let request = json_post(
        "/agents/dispatch",
        json!({
            "action": "parse_email",
            "parameters": {
                "email": {
                    "sender": "user@example.com",
                    "subject": "please document the API",
                    "body_plain": "write up the endpoints"
                }
            }
        }),
    );
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["task"]["task_type"], "documentation");
    assert_eq!(state.queue.depth().await, 0);
}

#[tokio::test]
async fn dispatch_without_email_parameter_is_rejected() {
    let (_state, app, _tmp) = test_state().await;
    let request = json_post(
        "/agents/dispatch",
        json!({ "action": "parse_email", "parameters": {} }),
    );
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "MISSING_PARAMETER");
}

#[tokio::test]
async fn dispatch_search_emails_reports_unavailable_dependency() {
    let (_state, app, _tmp) = test_state().await;
    let request = json_post(
        "/agents/dispatch",
        json!({ "action": "search_emails", "parameters": {} }),
    );
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(response).await["code"], "SERVICE_UNAVAILABLE");
}

#[tokio::test]
async fn queued_task_runs_to_completion_with_workers() {
    let (state, app, _tmp) = test_state().await;
    spawn_workers(&state, 2);

    let envelope = signed_envelope(
        "tok-e2e",
        "bug: the importer crashes",
        "The nightly importer crashes with a stack overflow.",
    );
    let response = app
        .oneshot(json_post("/webhooks/inbound", envelope))
        .await
        .unwrap();
    let task_id = body_json(response).await["task_id"]
        .as_str()
        .unwrap()
        .to_string();

    let mut completed = false;
    for _ in 0..200 {
        let task = state.store.get_task(&task_id).await.unwrap();
        if task.status == TaskStatus::Completed {
            assert_eq!(task.progress, 100);
            completed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert!(completed, "task did not complete in time");

    let conversation = state.store.conversation(&task_id).await.unwrap();
    assert!(!conversation.is_empty());
}
