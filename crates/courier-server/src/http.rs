use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};

use courier_orchestrator::RouteContext;
use courier_security::SecurityError;
use courier_types::{
    ComponentHealth, CourierError, DispatchAction, DispatchRequest, EmailEnvelope, HealthReport,
    Task, WebhookEnvelope,
};

use crate::{ingest_email, AppState};

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any);
    Router::new()
        .route("/webhooks/inbound", post(webhook_inbound))
        .route("/agents/dispatch", post(agents_dispatch))
        .route("/health", get(health))
        .route("/workflows/templates", get(workflow_templates))
        .route("/workflows/executions/{id}", get(workflow_execution))
        .route("/tasks/{id}", get(task_get))
        .route("/tasks/{id}/cancel", post(task_cancel))
        .route("/admin/breakers", get(breaker_status))
        .route("/admin/breakers/reset", post(breaker_reset))
        .route("/admin/dlq/retry", post(dlq_retry))
        .route("/admin/dlq/stats", get(dlq_stats))
        .route("/admin/cache/stats", get(cache_stats))
        .route("/admin/replay/stats", get(replay_stats))
        .layer(cors)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Error envelope
// ---------------------------------------------------------------------------

struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
    details: Option<Value>,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            details: None,
        }
    }

    fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = json!({
            "status": "error",
            "code": self.code,
            "message": self.message,
        });
        if let Some(details) = self.details {
            body["details"] = details;
        }
        (self.status, Json(body)).into_response()
    }
}

impl From<CourierError> for ApiError {
    fn from(err: CourierError) -> Self {
        let status = match &err {
            CourierError::Validation(_) | CourierError::PermanentRemote(_) => {
                StatusCode::BAD_REQUEST
            }
            CourierError::Authentication(_) => StatusCode::FORBIDDEN,
            CourierError::NotFound(_) => StatusCode::NOT_FOUND,
            CourierError::TransientRemote(_) | CourierError::CircuitOpen(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            CourierError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        // Internal detail never leaks to clients.
        let message = match &err {
            CourierError::Internal(_) => "internal error".to_string(),
            other => other.to_string(),
        };
        ApiError::new(status, err.code(), message)
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ---------------------------------------------------------------------------
// Webhook ingestion
// ---------------------------------------------------------------------------

async fn webhook_inbound(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let is_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("application/json"))
        .unwrap_or(false);
    if !is_json {
        return Err(ApiError::new(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "INVALID_PARAMETER",
            "request body must be application/json",
        ));
    }

    let raw: Value = serde_json::from_slice(&body).map_err(|err| {
        ApiError::new(
            StatusCode::BAD_REQUEST,
            "INVALID_PARAMETER",
            "request body is not valid JSON",
        )
        .with_details(json!({ "errors": [err.to_string()] }))
    })?;

    let envelope: WebhookEnvelope = serde_json::from_value(raw).map_err(|err| {
        ApiError::new(
            StatusCode::BAD_REQUEST,
            "MISSING_PARAMETER",
            "webhook envelope failed validation",
        )
        .with_details(json!({ "errors": [err.to_string()] }))
    })?;

    if let Err(err) = state.verifier.verify(&envelope.signature, Utc::now()) {
        return Err(match err {
            SecurityError::StaleTimestamp => ApiError::new(
                StatusCode::FORBIDDEN,
                "UNAUTHORIZED",
                "webhook timestamp outside the accepted window",
            ),
            SecurityError::BadSignature => ApiError::new(
                StatusCode::FORBIDDEN,
                "UNAUTHORIZED",
                "webhook signature verification failed",
            ),
            SecurityError::ConfigMissing => ApiError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "SERVICE_UNAVAILABLE",
                "webhook signing key is not configured",
            ),
        });
    }

    let email = EmailEnvelope::from_webhook(&envelope);
    let message_id = email
        .headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("message-id"))
        .map(|(_, v)| v.clone());

    // Replay short-circuit: the duplicate delivery is acknowledged but must
    // not produce a second task.
    let replay_context = json!({ "recipient": envelope.event_data.recipient });
    if state
        .replay
        .seen(&envelope.signature.token, Some(&replay_context))
        .await
    {
        return Ok(Json(json!({
            "status": "duplicate",
            "message_id": message_id,
        })));
    }

    let task = ingest_email(&state, &email).await.map_err(|err| {
        tracing::error!(error = %err, "webhook ingestion failed");
        ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_ERROR",
            "failed to ingest email",
        )
    })?;

    Ok(Json(json!({
        "status": "queued",
        "task_id": task.task_id,
        "message_id": message_id,
    })))
}

// ---------------------------------------------------------------------------
// Dispatch actions
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct EmailParams {
    email: EmailEnvelope,
}

#[derive(Debug, Deserialize)]
struct ComposeParams {
    prompt: String,
}

fn email_params(parameters: Value) -> ApiResult<EmailEnvelope> {
    let params: EmailParams = serde_json::from_value(parameters).map_err(|err| {
        ApiError::new(
            StatusCode::BAD_REQUEST,
            "MISSING_PARAMETER",
            "expected an `email` parameter",
        )
        .with_details(json!({ "errors": [err.to_string()] }))
    })?;
    Ok(params.email)
}

async fn agents_dispatch(
    State(state): State<AppState>,
    Json(request): Json<DispatchRequest>,
) -> ApiResult<Response> {
    match request.action {
        DispatchAction::ParseEmail => {
            let email = email_params(request.parameters)?;
            let task = state.parser.parse(&email);
            Ok(Json(json!({
                "status": "ok",
                "action": "parse_email",
                "task": task,
            }))
            .into_response())
        }
        DispatchAction::AnalyzeEmail => {
            let email = email_params(request.parameters)?;
            let task = state.parser.parse(&email);
            let plan = state
                .orchestrator
                .analyze_and_route(&task, &RouteContext::default());
            Ok(Json(json!({
                "status": "ok",
                "action": "analyze_email",
                "task": task,
                "plan": plan,
            }))
            .into_response())
        }
        DispatchAction::DispatchTask | DispatchAction::IngestEmail => {
            let email = email_params(request.parameters)?;
            let task = ingest_email(&state, &email).await.map_err(|err| {
                tracing::error!(error = %err, "dispatch ingestion failed");
                ApiError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "failed to ingest email",
                )
            })?;
            Ok((
                StatusCode::ACCEPTED,
                Json(json!({
                    "status": "queued",
                    "action": request.action,
                    "task_id": task.task_id,
                })),
            )
                .into_response())
        }
        DispatchAction::ComposeDraft => {
            let params: ComposeParams =
                serde_json::from_value(request.parameters).map_err(|_| {
                    ApiError::new(
                        StatusCode::BAD_REQUEST,
                        "MISSING_PARAMETER",
                        "expected a `prompt` parameter",
                    )
                })?;
            let output = state
                .executor
                .invoke_with_resilience("general", &params.prompt)
                .await
                .map_err(ApiError::from)?;
            Ok(Json(json!({
                "status": "ok",
                "action": "compose_draft",
                "draft": output.response,
            }))
            .into_response())
        }
        DispatchAction::SearchEmails => Err(ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "SERVICE_UNAVAILABLE",
            "mail search index is not configured",
        )),
    }
}

// ---------------------------------------------------------------------------
// Health and catalogs
// ---------------------------------------------------------------------------

async fn health(State(state): State<AppState>) -> Response {
    let mut components = HashMap::new();
    components.insert("task_store".to_string(), ComponentHealth::Healthy);
    components.insert("replay_cache".to_string(), ComponentHealth::Healthy);
    components.insert("result_cache".to_string(), ComponentHealth::Healthy);
    components.insert(
        "dead_letter_queue".to_string(),
        match state.dlq.stats().await {
            Ok(_) => ComponentHealth::Healthy,
            Err(_) => ComponentHealth::Degraded,
        },
    );

    let report = HealthReport::from_components(components);
    let status = match report.status {
        ComponentHealth::Healthy => StatusCode::OK,
        ComponentHealth::Degraded => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(report)).into_response()
}

async fn workflow_templates(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "templates": state.config.workflows }))
}

async fn workflow_execution(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let report = state
        .engine
        .export_report(&id)
        .await
        .map_err(|err| ApiError::from(CourierError::from(err)))?;
    let stages = state
        .engine
        .stage_view(&id)
        .await
        .map_err(|err| ApiError::from(CourierError::from(err)))?;
    Ok(Json(json!({ "report": report, "stages": stages })))
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

async fn task_get(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Task>> {
    if let Some(task) = state.snapshots.get(&id).await {
        return Ok(Json(task));
    }
    let task = state
        .store
        .get_task(&id)
        .await
        .map_err(|err| ApiError::from(CourierError::from(err)))?;
    state.snapshots.put(&task).await;
    Ok(Json(task))
}

async fn task_cancel(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    if state.cancellations.cancel(&id).await {
        Ok(Json(json!({ "status": "cancelling", "task_id": id })))
    } else {
        Err(ApiError::new(
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("no cancellable task `{id}`"),
        ))
    }
}

// ---------------------------------------------------------------------------
// Admin
// ---------------------------------------------------------------------------

async fn breaker_status(State(state): State<AppState>) -> Json<Value> {
    let statuses = state.executor.breakers().status_all().await;
    Json(json!({ "breakers": statuses }))
}

async fn breaker_reset(State(state): State<AppState>) -> Json<Value> {
    state.executor.breakers().reset_all().await;
    Json(json!({ "status": "ok" }))
}

#[derive(Debug, Deserialize)]
struct DlqRetryInput {
    #[serde(default = "default_retry_max")]
    max: usize,
}

fn default_retry_max() -> usize {
    10
}

/// Hand pending dead letters back to the execution queue. Each retried
/// entry becomes a fresh run of its stored task; a repeat failure re-enters
/// the queue through the normal dead-letter path.
async fn dlq_retry(
    State(state): State<AppState>,
    Json(input): Json<DlqRetryInput>,
) -> ApiResult<Json<Value>> {
    let entries = state
        .dlq
        .retry_next(input.max)
        .await
        .map_err(|err| ApiError::from(CourierError::from(err)))?;

    let mut task_ids = Vec::new();
    for entry in entries {
        let Ok(mut task) = serde_json::from_value::<Task>(entry.payload.clone()) else {
            tracing::warn!(entry_id = %entry.id, "dead letter payload is not a task, abandoning");
            let _ = state.dlq.abandon(&entry.id, "undecodable payload").await;
            continue;
        };
        task.status = courier_types::TaskStatus::Pending;
        task.note(format!(
            "requeued from dead-letter queue (attempt {})",
            entry.attempts
        ));
        if let Err(err) = state.store.create_task(task.clone()).await {
            tracing::warn!(error = %err, "failed to restore dead-lettered task");
            continue;
        }
        let plan = state
            .orchestrator
            .analyze_and_route(&task, &RouteContext::default());
        let task = match state
            .store
            .update_status(&task.task_id, courier_types::TaskStatus::Queued)
            .await
        {
            Ok(task) => task,
            Err(err) => {
                tracing::warn!(error = %err, "failed to queue restored task");
                continue;
            }
        };
        state
            .queue
            .push(crate::QueuedWork {
                task: task.clone(),
                workflow_type: plan.routing_decision.workflow_type.clone(),
            })
            .await;
        let _ = state.dlq.resolve(&entry.id).await;
        task_ids.push(task.task_id);
    }

    Ok(Json(json!({
        "status": "ok",
        "retried": task_ids.len(),
        "task_ids": task_ids,
    })))
}

async fn dlq_stats(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let stats = state
        .dlq
        .stats()
        .await
        .map_err(|err| ApiError::from(CourierError::from(err)))?;
    Ok(Json(json!({ "dlq": stats })))
}

async fn cache_stats(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "cache": state.cache.stats().await }))
}

async fn replay_stats(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "replay": state.replay.stats().await }))
}
