//! REST API Server for the finance automation agents
//!
//! Exposes routing, task execution, run inspection and resume over HTTP.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::agent::Orchestrator;
use crate::error::OrchestrationError;
use crate::models::Task;

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TaskRequest {
    pub description: String,
    #[serde(default)]
    pub requested_by: Option<String>,
}

impl TaskRequest {
    fn into_task(self) -> Task {
        let mut task = Task::new(self.description);
        task.requested_by = self.requested_by;
        task
    }
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

type ApiResult = (StatusCode, Json<ApiResponse>);

fn respond<T: Serialize>(result: crate::Result<T>) -> ApiResult {
    match result {
        Ok(data) => (StatusCode::OK, Json(ApiResponse::success(data))),
        Err(e) => {
            let status = match &e {
                OrchestrationError::UnknownRun(_) => StatusCode::NOT_FOUND,
                OrchestrationError::RoutingError(_) | OrchestrationError::InvalidToolInput(_) => {
                    StatusCode::BAD_REQUEST
                }
                // Another resume owns the run, or it is still executing.
                OrchestrationError::InvalidRunTransition { .. } => StatusCode::CONFLICT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            warn!(status = status.as_u16(), error = %e, "Request failed");
            (status, Json(ApiResponse::error(e.to_string())))
        }
    }
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<Orchestrator>,
}

/// =============================
/// Handlers
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn run_task(State(state): State<ApiState>, Json(req): Json<TaskRequest>) -> ApiResult {
    info!("Received task: {}", req.description);
    respond(state.orchestrator.execute_task(req.into_task()).await)
}

async fn route_task(State(state): State<ApiState>, Json(req): Json<TaskRequest>) -> ApiResult {
    let decision = state.orchestrator.route(&req.into_task()).await;
    respond(Ok(decision))
}

async fn run_status(State(state): State<ApiState>, Path(run_id): Path<Uuid>) -> ApiResult {
    respond(state.orchestrator.run_status(run_id).await)
}

async fn resume_run(State(state): State<ApiState>, Path(run_id): Path<Uuid>) -> ApiResult {
    info!(run_id = %run_id, "Resume requested");
    respond(state.orchestrator.resume(run_id).await)
}

async fn audit_record(State(state): State<ApiState>, Path(audit_id): Path<Uuid>) -> ApiResult {
    match state.orchestrator.audit_log().get(audit_id).await {
        Ok(Some(record)) => respond(Ok(record)),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error(format!("Audit record `{}` not found", audit_id))),
        ),
        Err(e) => respond::<()>(Err(e)),
    }
}

/// =============================
/// Router
/// =============================

pub fn create_router(orchestrator: Arc<Orchestrator>) -> Router {
    let state = ApiState { orchestrator };

    Router::new()
        .route("/health", get(health))
        .route("/api/tasks", post(run_task))
        .route("/api/route", post(route_task))
        .route("/api/runs/:run_id", get(run_status))
        .route("/api/runs/:run_id/resume", post(resume_run))
        .route("/api/audit/:audit_id", get(audit_record))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    orchestrator: Arc<Orchestrator>,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(orchestrator);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    fn router() -> Router {
        let orchestrator = Orchestrator::from_settings(Settings::default()).unwrap();
        create_router(Arc::new(orchestrator))
    }

    async fn call(router: Router, request: Request<Body>) -> (StatusCode, ApiResponse) {
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = router()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_route_endpoint_uses_keywords() {
        let (status, body) = call(
            router(),
            post_json("/api/route", serde_json::json!({"description": "Run payroll for June"})),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let data = body.data.unwrap();
        assert_eq!(data["agent"], "payroll");
        assert_eq!(data["source"], "keywords");
    }

    #[tokio::test]
    async fn test_unroutable_task_is_bad_request() {
        let (status, body) = call(
            router(),
            post_json("/api/tasks", serde_json::json!({"description": "book a flight"})),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(!body.success);
        assert!(body.error.unwrap().contains("Routing"));
    }

    #[tokio::test]
    async fn test_unknown_run_and_audit_are_not_found() {
        let uri = format!("/api/runs/{}", Uuid::new_v4());
        let (status, body) = call(router(), Request::get(uri).body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(!body.success);

        let uri = format!("/api/runs/{}/resume", Uuid::new_v4());
        let (status, _) = call(router(), Request::post(uri).body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let uri = format!("/api/audit/{}", Uuid::new_v4());
        let (status, _) = call(router(), Request::get(uri).body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_run_transition_conflict_maps_to_409() {
        let (status, Json(body)) = respond::<()>(Err(OrchestrationError::InvalidRunTransition {
            from: "running".to_string(),
            to: "running".to_string(),
        }));
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(!body.success);
    }
}
