use std::sync::Arc;

use axum::{
    http::StatusCode,
    middleware,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

use crate::{
    db::RecommendationStore,
    middleware::{make_span_with_request_id, request_id_middleware, require_admin},
    services::WorkerHandle,
};

pub mod jobs;
pub mod recommendations;

/// Shared handler state
pub struct AppState {
    pub store: Arc<dyn RecommendationStore>,
    pub worker: WorkerHandle,
    /// Bearer token for the admin routes; `None` leaves them open
    pub admin_token: Option<String>,
}

/// Creates the application router with all routes
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1/predlogi/admin", admin_routes(state.clone()))
        .layer(TraceLayer::new_for_http().make_span_with(make_span_with_request_id))
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

/// Admin routes under /api/v1/predlogi/admin
fn admin_routes(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/trigger-job", post(jobs::trigger_job))
        .route("/users/:user_id/trigger-job", post(jobs::trigger_user_job))
        .route("/jobs", get(jobs::list_jobs))
        .route("/jobs/:job_id", get(jobs::get_job))
        .route("/recommendations", get(recommendations::list))
        .route("/recommendations/:id", get(recommendations::get))
        .route(
            "/users/:user_id/recommendations",
            get(recommendations::list_for_user),
        )
        .route_layer(middleware::from_fn_with_state(state, require_admin))
}

/// Health check endpoint
async fn health_check() -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({ "status": "healthy" })))
}
