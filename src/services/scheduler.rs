/// Periodic triggering of recommendation runs
///
/// The cron job only submits work to the batch worker and never runs a batch
/// itself.
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::{
    error::{AppError, AppResult},
    services::worker::{JobScope, JobTrigger, WorkerHandle},
};

/// Normalizes a cron expression to the 6-field form with seconds
pub fn normalize_schedule(input: &str) -> AppResult<String> {
    let trimmed = input.trim();

    match trimmed.split_whitespace().count() {
        5 => Ok(format!("0 {}", trimmed)),
        6 => Ok(trimmed.to_string()),
        fields => Err(AppError::InvalidInput(format!(
            "cron expression '{}' has {} fields, expected 5 or 6",
            trimmed, fields
        ))),
    }
}

/// Starts the cron scheduler that feeds the batch worker
///
/// When `run_on_startup` is set an all-users run is queued immediately. The
/// returned scheduler must be shut down by the caller.
pub async fn start_scheduler(
    schedule: &str,
    run_on_startup: bool,
    worker: WorkerHandle,
) -> AppResult<JobScheduler> {
    let cron_expr = normalize_schedule(schedule)?;

    let scheduler = JobScheduler::new()
        .await
        .map_err(|e| AppError::Scheduler(e.to_string()))?;

    let job_worker = worker.clone();
    let job = Job::new_async(cron_expr.as_str(), move |_uuid, _lock| {
        let worker = job_worker.clone();
        Box::pin(async move {
            tracing::info!("Scheduled recommendation run fired");
            if let Err(e) = worker.submit(JobScope::AllUsers, JobTrigger::Schedule).await {
                tracing::error!(error = %e, "Failed to queue scheduled recommendation run");
            }
        })
    })
    .map_err(|e| AppError::InvalidInput(format!("invalid schedule '{}': {}", cron_expr, e)))?;

    scheduler
        .add(job)
        .await
        .map_err(|e| AppError::Scheduler(e.to_string()))?;

    if run_on_startup {
        let ticket = worker
            .submit(JobScope::AllUsers, JobTrigger::Startup)
            .await?;
        tracing::info!(job_id = %ticket.job_id, "Startup recommendation run queued");
    }

    scheduler
        .start()
        .await
        .map_err(|e| AppError::Scheduler(e.to_string()))?;

    tracing::info!(schedule = %cron_expr, "Recommendation scheduler started");

    Ok(scheduler)
}
