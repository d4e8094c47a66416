//! Admin HTTP surface.
//!
//! A small authenticated API for the external admin UI: re-enqueue a
//! failed job by id (from the live failed set or the dead-letter set,
//! the caller does not need to know which), and read circuit/budget/
//! queue status. Bearer-token auth on every route; the token comes from
//! the environment, never from the config file.

use axum::{
    extract::{Path, Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;

use crate::resilience::{BudgetEnforcer, CircuitBreaker, CircuitState};
use crate::store::{Store, StoreError};

/// Shared state for admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pub store: Arc<Store>,
    pub circuit: Arc<CircuitBreaker>,
    pub budget: Arc<BudgetEnforcer>,
    pub model_ids: Vec<String>,
    pub token: Arc<String>,
}

/// Errors surfaced as HTTP responses.
#[derive(Debug, thiserror::Error)]
pub enum AdminError {
    #[error("database error: {0}")]
    Store(#[from] StoreError),

    #[error("job '{0}' not found in the failed or dead sets")]
    JobNotRetryable(String),
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let status = match &self {
            AdminError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AdminError::JobNotRetryable(_) => StatusCode::NOT_FOUND,
        };
        (status, self.to_string()).into_response()
    }
}

pub fn router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/jobs/:id/retry", post(retry_job))
        .route("/admin/jobs", get(job_counts))
        .route("/admin/status", get(status))
        .layer(middleware::from_fn_with_state(state.clone(), require_bearer))
        .with_state(state)
}

/// Bind and serve until the process shuts down.
pub async fn serve(state: AdminState, bind: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!(bind, "admin surface listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn require_bearer(
    State(state): State<AdminState>,
    request: Request,
    next: Next,
) -> Response {
    let authorized = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|presented| !state.token.is_empty() && presented == state.token.as_str());

    if !authorized {
        return (StatusCode::UNAUTHORIZED, "missing or invalid bearer token").into_response();
    }
    next.run(request).await
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct RetryResponse {
    id: String,
    requeued: bool,
}

#[derive(Serialize)]
struct JobCountsResponse {
    counts: Vec<JobCount>,
}

#[derive(Serialize)]
struct JobCount {
    status: String,
    count: i64,
}

#[derive(Serialize)]
struct StatusResponse {
    models: Vec<ModelStatus>,
}

#[derive(Serialize)]
struct ModelStatus {
    model_id: String,
    circuit: String,
    budget_used: u32,
    budget_limit: u32,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Re-enqueue a failed job for immediate execution. Works for ids in
/// either the live failed set or the dead-letter set.
async fn retry_job(
    State(state): State<AdminState>,
    Path(id): Path<String>,
) -> Result<Json<RetryResponse>, AdminError> {
    if !state.store.retry_job(&id).await? {
        return Err(AdminError::JobNotRetryable(id));
    }
    tracing::info!(job = %id, "job re-enqueued via admin surface");
    Ok(Json(RetryResponse { id, requeued: true }))
}

async fn job_counts(
    State(state): State<AdminState>,
) -> Result<Json<JobCountsResponse>, AdminError> {
    let counts = state
        .store
        .job_counts()
        .await?
        .into_iter()
        .map(|(status, count)| JobCount { status, count })
        .collect();
    Ok(Json(JobCountsResponse { counts }))
}

async fn status(State(state): State<AdminState>) -> Json<StatusResponse> {
    let mut models = Vec::with_capacity(state.model_ids.len());
    for id in &state.model_ids {
        let circuit = match state.circuit.state(id).await {
            CircuitState::Closed { .. } => "closed",
            CircuitState::Open { .. } => "open",
            CircuitState::HalfOpen { .. } => "half-open",
        };
        models.push(ModelStatus {
            model_id: id.clone(),
            circuit: circuit.to_string(),
            budget_used: state.budget.used_today(id).await,
            budget_limit: state.budget.limit(id),
        });
    }
    Json(StatusResponse { models })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request as HttpRequest;
    use chrono::Utc;
    use scoreline_core::domain::{JobStatus, JobType};
    use tower::ServiceExt;

    async fn state() -> AdminState {
        let store = Arc::new(Store::open_in_memory().await.unwrap());
        AdminState {
            store: store.clone(),
            circuit: Arc::new(CircuitBreaker::new(store.clone(), Default::default())),
            budget: Arc::new(BudgetEnforcer::new(store, Default::default())),
            model_ids: vec!["claude".to_string()],
            token: Arc::new("sekrit".to_string()),
        }
    }

    fn authed(request: axum::http::request::Builder) -> axum::http::request::Builder {
        request.header(AUTHORIZATION, "Bearer sekrit")
    }

    #[tokio::test]
    async fn test_requests_without_token_are_rejected() {
        let app = router(state().await);
        let response = app
            .oneshot(
                HttpRequest::get("/admin/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_wrong_token_is_rejected() {
        let app = router(state().await);
        let response = app
            .oneshot(
                HttpRequest::get("/admin/status")
                    .header(AUTHORIZATION, "Bearer wrong")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_retry_failed_job() {
        let state = state().await;
        state
            .store
            .enqueue_job("analysis:m1", JobType::Analysis, "m1", Utc::now())
            .await
            .unwrap();
        state.store.claim_job("analysis:m1").await.unwrap();
        state
            .store
            .fail_job("analysis:m1", "boom", Utc::now(), 3)
            .await
            .unwrap();

        let app = router(state.clone());
        let response = app
            .oneshot(
                authed(HttpRequest::post("/admin/jobs/analysis:m1/retry"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let job = state.store.get_job("analysis:m1").await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn test_retry_unknown_job_is_404() {
        let app = router(state().await);
        let response = app
            .oneshot(
                authed(HttpRequest::post("/admin/jobs/ghost/retry"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_status_reports_models() {
        let app = router(state().await);
        let response = app
            .oneshot(
                authed(HttpRequest::get("/admin/status"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["models"][0]["model_id"], "claude");
        assert_eq!(body["models"][0]["circuit"], "closed");
    }
}
