#![forbid(unsafe_code)]

//! **fabric-api** – HTTP surface for the execution fabric. Thin: handlers
//! call straight into `fabric-kernel`, `fabric-store`, and `fabric-artifacts`
//! and carry no business logic of their own.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use fabric_artifacts::ArtifactPlane;
use fabric_kernel::{ExecutionLifecycleManager, SessionManager};
use fabric_store::StateSurface;
use fabric_types::{ErrorKind, FabricError, Fields, Intent, IntentRequest};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::warn;

/// Everything a handler needs, shared across requests behind `Arc`s owned by
/// the caller that assembles them (the CLI binary, or a test harness).
#[derive(Clone)]
pub struct ApiState {
    /// Session Manager.
    pub sessions: Arc<SessionManager>,
    /// Execution Lifecycle Manager.
    pub lifecycle: Arc<ExecutionLifecycleManager>,
    /// Artifact Plane.
    pub artifacts: Arc<ArtifactPlane>,
    /// State Surface, read directly by the execution-status endpoint.
    pub state: Arc<StateSurface>,
    /// Reported in `/health`.
    pub service_name: String,
}

/// Build the router: session, intent, execution-status, artifact, and
/// health endpoints, wrapped in a trace layer.
pub fn create_app(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/session/create", post(create_session))
        .route("/api/session/upgrade", post(upgrade_session))
        .route("/api/session/:session_id", get(get_session))
        .route("/api/intent/submit", post(submit_intent))
        .route("/api/execution/:execution_id/status", get(execution_status))
        .route("/api/artifacts/:artifact_id", get(get_artifact))
        .route("/api/artifacts/visual/*visual_path", get(get_visual))
        .with_state(state)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).into_inner())
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::Authorization => StatusCode::FORBIDDEN,
        ErrorKind::Contract8A => StatusCode::INTERNAL_SERVER_ERROR,
        ErrorKind::BackendUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::LifecycleViolation => StatusCode::CONFLICT,
        ErrorKind::HandlerFailed | ErrorKind::IdempotencyReplay => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

struct ApiError(FabricError);

impl From<FabricError> for ApiError {
    fn from(err: FabricError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(self.0.kind);
        (status, Json(json!({"error": self.0.message, "kind": self.0.kind}))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

async fn health(State(state): State<ApiState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": state.service_name,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

//─────────────────────────────
//  Session API
//─────────────────────────────

#[derive(Debug, Deserialize)]
struct CreateSessionRequest {
    tenant_id: Option<String>,
    user_id: Option<String>,
    session_id: Option<String>,
    #[serde(default)]
    execution_contract: Fields,
    #[serde(default)]
    metadata: Fields,
}

async fn create_session(
    State(state): State<ApiState>,
    Json(req): Json<CreateSessionRequest>,
) -> ApiResult<Response> {
    let session = match (req.tenant_id, req.user_id) {
        (Some(tenant_id), Some(user_id)) => {
            state
                .sessions
                .create_authenticated_session(
                    tenant_id,
                    user_id,
                    req.session_id,
                    req.execution_contract,
                    req.metadata,
                )
                .await?
        }
        _ => state.sessions.create_anonymous_session(req.execution_contract, req.metadata).await?,
    };
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "session_id": session.session_id,
            "tenant_id": session.tenant_id,
            "user_id": session.user_id,
            "created_at": session.created_at,
        })),
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
struct UpgradeSessionRequest {
    session_id: String,
    user_id: String,
    tenant_id: String,
    #[serde(default)]
    metadata: Fields,
}

async fn upgrade_session(
    State(state): State<ApiState>,
    Json(req): Json<UpgradeSessionRequest>,
) -> ApiResult<Json<Value>> {
    let session = state
        .sessions
        .upgrade_session(&req.session_id, req.tenant_id, req.user_id, req.metadata)
        .await?;
    Ok(Json(serde_json::to_value(session).unwrap_or_else(|_| json!({}))))
}

#[derive(Debug, Deserialize)]
struct TenantQuery {
    tenant_id: Option<String>,
}

async fn get_session(
    State(state): State<ApiState>,
    Path(session_id): Path<String>,
    Query(query): Query<TenantQuery>,
) -> ApiResult<Response> {
    let session = state.sessions.get_session(&session_id, query.tenant_id.as_deref()).await?;
    match session {
        Some(session) => Ok(Json(session).into_response()),
        None => Ok(StatusCode::NOT_FOUND.into_response()),
    }
}

//─────────────────────────────
//  Intent API
//─────────────────────────────

#[derive(Debug, Deserialize)]
struct SubmitIntentRequest {
    intent_id: Option<String>,
    intent_type: String,
    tenant_id: String,
    session_id: String,
    solution_id: String,
    #[serde(default)]
    parameters: Fields,
    #[serde(default)]
    metadata: Fields,
    idempotency_key: Option<String>,
}

#[derive(Debug, Serialize)]
struct SubmitIntentResponse {
    execution_id: Option<String>,
    intent_id: String,
    status: &'static str,
    created_at: chrono::DateTime<chrono::Utc>,
}

async fn submit_intent(
    State(state): State<ApiState>,
    Json(req): Json<SubmitIntentRequest>,
) -> ApiResult<Response> {
    let intent = Intent::create(IntentRequest {
        intent_id: req.intent_id,
        intent_type: req.intent_type,
        tenant_id: req.tenant_id,
        session_id: req.session_id,
        solution_id: req.solution_id,
        parameters: req.parameters,
        metadata: req.metadata,
        idempotency_key: req.idempotency_key,
    })?;
    let intent_id = intent.intent_id.clone();

    match state.lifecycle.execute(intent).await {
        Ok(result) => Ok((
            StatusCode::OK,
            Json(SubmitIntentResponse {
                execution_id: Some(result.execution_id),
                intent_id,
                status: "accepted",
                created_at: chrono::Utc::now(),
            }),
        )
            .into_response()),
        Err(err) => {
            warn!(%err, "intent failed to accept");
            Ok((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(SubmitIntentResponse {
                    execution_id: None,
                    intent_id,
                    status: "failed",
                    created_at: chrono::Utc::now(),
                }),
            )
                .into_response())
        }
    }
}

//─────────────────────────────
//  Execution status
//─────────────────────────────

#[derive(Debug, Deserialize)]
struct ExecutionStatusQuery {
    tenant_id: String,
    #[serde(default, rename = "include-artifacts")]
    include_artifacts: bool,
    #[serde(default, rename = "include-visuals")]
    include_visuals: bool,
}

async fn execution_status(
    State(state): State<ApiState>,
    Path(execution_id): Path<String>,
    Query(query): Query<ExecutionStatusQuery>,
) -> ApiResult<Response> {
    let Some(fields) = state.state.get_execution_state(&query.tenant_id, &execution_id).await? else {
        return Ok(StatusCode::NOT_FOUND.into_response());
    };

    let mut response = json!({
        "execution_id": execution_id,
        "status": fields.get("status").cloned().unwrap_or(json!("unknown")),
        "intent_id": fields.get("intent_id").cloned().unwrap_or(Value::Null),
        "events": fields.get("events").cloned().unwrap_or(json!([])),
        "error": fields.get("error").cloned().unwrap_or(Value::Null),
    });

    let artifacts = fields.get("artifacts").cloned().unwrap_or_else(|| json!({}));
    let resolved = if query.include_artifacts {
        resolve_artifacts(&state, &query.tenant_id, &artifacts, query.include_visuals).await?
    } else {
        artifacts
    };
    response["artifacts"] = resolved;

    Ok(Json(response).into_response())
}

async fn resolve_artifacts(
    state: &ApiState,
    tenant_id: &str,
    artifacts: &Value,
    include_visuals: bool,
) -> ApiResult<Value> {
    let Some(map) = artifacts.as_object() else {
        return Ok(artifacts.clone());
    };
    let mut resolved = serde_json::Map::new();
    for (key, reference) in map {
        let Some(artifact_id) = reference.get("artifact_id").and_then(|v| v.as_str()) else {
            resolved.insert(key.clone(), reference.clone());
            continue;
        };
        let fetched = state.artifacts.get_artifact(tenant_id, artifact_id, true, include_visuals).await?;
        match fetched {
            Some(result) => resolved.insert(
                key.clone(),
                json!({"artifact_id": artifact_id, "payload": result.payload}),
            ),
            None => resolved.insert(key.clone(), reference.clone()),
        };
    }
    Ok(Value::Object(resolved))
}

//─────────────────────────────
//  Artifact API
//─────────────────────────────

#[derive(Debug, Deserialize)]
struct ArtifactQuery {
    tenant_id: String,
    #[serde(default, rename = "include-visuals")]
    include_visuals: bool,
}

async fn get_artifact(
    State(state): State<ApiState>,
    Path(artifact_id): Path<String>,
    Query(query): Query<ArtifactQuery>,
) -> ApiResult<Response> {
    let found = state
        .artifacts
        .get_artifact(&query.tenant_id, &artifact_id, true, query.include_visuals)
        .await?;
    match found {
        Some(result) => Ok(Json(json!({
            "record": result.record,
            "payload": result.payload,
        }))
        .into_response()),
        None => Ok(StatusCode::NOT_FOUND.into_response()),
    }
}

#[derive(Debug, Deserialize)]
struct VisualQuery {
    #[allow(dead_code)]
    tenant_id: String,
}

async fn get_visual(
    State(state): State<ApiState>,
    Path(visual_path): Path<String>,
    Query(_query): Query<VisualQuery>,
) -> ApiResult<Response> {
    let found = state.artifacts.get_visual(&visual_path).await?;
    match found {
        Some(payload) => Ok(Json(payload).into_response()),
        None => Ok(StatusCode::NOT_FOUND.into_response()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fabric_artifacts::InMemoryArtifactStorage;
    use fabric_bus::WriteAheadLog;
    use fabric_outbox::{InMemoryEventBus, Outbox};
    use fabric_steward::StaticDataSteward;
    use tower::ServiceExt;

    fn harness() -> Router {
        let intents = Arc::new(fabric_kernel::IntentRegistry::new());
        let state_surface = Arc::new(StateSurface::in_memory());
        let wal = Arc::new(WriteAheadLog::new(None));
        let outbox = Arc::new(Outbox::new(Box::new(InMemoryEventBus::new())));
        let artifacts = Arc::new(ArtifactPlane::new(
            StateSurface::in_memory(),
            Box::new(InMemoryArtifactStorage::new()),
        ));
        let sessions = Arc::new(SessionManager::new(state_surface.clone(), wal.clone()));
        let lifecycle = Arc::new(ExecutionLifecycleManager::new(
            intents,
            wal,
            state_surface.clone(),
            outbox,
            artifacts.clone(),
            Some(StaticDataSteward::shared()),
            sessions.clone(),
            ["ingest-file".to_string()].into_iter().collect(),
        ));
        create_app(ApiState {
            sessions,
            lifecycle,
            artifacts,
            state: state_surface,
            service_name: "fabric-test".to_string(),
        })
    }

    #[tokio::test]
    async fn health_reports_service_name() {
        let app = harness();
        let response = app
            .oneshot(axum::http::Request::builder().uri("/health").body(axum::body::Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn create_session_without_tenant_returns_anonymous_session() {
        let app = harness();
        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/api/session/create")
            .header("content-type", "application/json")
            .body(axum::body::Body::from("{}"))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn get_session_unknown_id_is_404() {
        let app = harness();
        let request = axum::http::Request::builder()
            .uri("/api/session/does-not-exist")
            .body(axum::body::Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn submit_intent_with_no_handler_returns_500_and_failed_status() {
        let app = harness();
        let body = json!({
            "intent_type": "no-such-intent",
            "tenant_id": "t1",
            "session_id": "s1",
            "solution_id": "sol1",
        });
        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/api/intent/submit")
            .header("content-type", "application/json")
            .body(axum::body::Body::from(body.to_string()))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
