use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    middleware::RequestId,
    routes::AppState,
    services::{JobRecord, JobScope, JobTicket, JobTrigger},
};

#[derive(Debug, Serialize)]
pub struct TriggerResponse {
    pub message: &'static str,
    pub status: &'static str,
    pub job_id: Uuid,
}

impl From<JobTicket> for TriggerResponse {
    fn from(ticket: JobTicket) -> Self {
        Self {
            message: "Recommendation job triggered successfully",
            status: "processing",
            job_id: ticket.job_id,
        }
    }
}

/// Queues a run over every active user
pub async fn trigger_job(
    State(state): State<Arc<AppState>>,
    Extension(request_id): Extension<RequestId>,
) -> AppResult<(StatusCode, Json<TriggerResponse>)> {
    let ticket = state
        .worker
        .submit(JobScope::AllUsers, JobTrigger::Admin)
        .await?;

    tracing::info!(
        request_id = %request_id,
        job_id = %ticket.job_id,
        "Recommendation job triggered"
    );

    Ok((StatusCode::ACCEPTED, Json(ticket.into())))
}

/// Queues a run for one user
pub async fn trigger_user_job(
    State(state): State<Arc<AppState>>,
    Extension(request_id): Extension<RequestId>,
    Path(user_id): Path<Uuid>,
) -> AppResult<(StatusCode, Json<TriggerResponse>)> {
    let ticket = state
        .worker
        .submit(JobScope::User { user_id }, JobTrigger::Admin)
        .await?;

    tracing::info!(
        request_id = %request_id,
        job_id = %ticket.job_id,
        user_id = %user_id,
        "Recommendation job triggered for user"
    );

    Ok((StatusCode::ACCEPTED, Json(ticket.into())))
}

pub async fn list_jobs(State(state): State<Arc<AppState>>) -> Json<Vec<JobRecord>> {
    Json(state.worker.jobs().await)
}

pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<Uuid>,
) -> AppResult<Json<JobRecord>> {
    state
        .worker
        .job(job_id)
        .await
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("job {}", job_id)))
}
