use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::{
    sync::{mpsc, RwLock},
    task::JoinHandle,
    time::Instant,
};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// Finished jobs kept for inspection before the oldest are evicted
pub const MAX_FINISHED_JOBS: usize = 100;

/// Outcome tally of one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Executes recommendation runs on behalf of the worker
#[async_trait::async_trait]
pub trait BatchRunner: Send + Sync {
    /// One pass over every active user
    async fn run_batch(&self, deadline: Instant) -> AppResult<BatchSummary>;

    /// One pass for a single user, resolved by id
    async fn run_for_user(&self, user_id: Uuid, deadline: Instant) -> AppResult<BatchSummary>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobScope {
    AllUsers,
    User { user_id: Uuid },
}

/// What caused a job to be submitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobTrigger {
    Startup,
    Schedule,
    Admin,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Completed { summary: BatchSummary },
    Failed { error: String },
    Cancelled,
}

impl JobState {
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            JobState::Completed { .. } | JobState::Failed { .. } | JobState::Cancelled
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: Uuid,
    pub scope: JobScope,
    pub trigger: JobTrigger,
    pub state: JobState,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Returned to the submitter once a job is queued
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobTicket {
    pub job_id: Uuid,
    pub state: JobState,
}

/// Job records, with eviction of the oldest finished ones
#[derive(Debug, Default)]
struct JobRegistry {
    jobs: HashMap<Uuid, JobRecord>,
    finished: VecDeque<Uuid>,
}

impl JobRegistry {
    fn insert(&mut self, record: JobRecord) {
        self.jobs.insert(record.job_id, record);
    }

    fn start(&mut self, job_id: Uuid) {
        if let Some(record) = self.jobs.get_mut(&job_id) {
            record.state = JobState::Running;
            record.started_at = Some(Utc::now());
        }
    }

    fn finish(&mut self, job_id: Uuid, state: JobState) {
        let Some(record) = self.jobs.get_mut(&job_id) else {
            return;
        };
        if record.state.is_finished() {
            return;
        }

        record.state = state;
        record.finished_at = Some(Utc::now());
        self.finished.push_back(job_id);

        while self.finished.len() > MAX_FINISHED_JOBS {
            if let Some(evicted) = self.finished.pop_front() {
                self.jobs.remove(&evicted);
            }
        }
    }

    fn cancel_unfinished(&mut self) -> usize {
        let pending: Vec<Uuid> = self
            .jobs
            .values()
            .filter(|record| !record.state.is_finished())
            .map(|record| record.job_id)
            .collect();

        for job_id in &pending {
            self.finish(*job_id, JobState::Cancelled);
        }

        pending.len()
    }
}

struct QueuedJob {
    job_id: Uuid,
    scope: JobScope,
}

/// Cloneable submission side of the batch worker
#[derive(Clone)]
pub struct WorkerHandle {
    queue_tx: mpsc::UnboundedSender<QueuedJob>,
    registry: Arc<RwLock<JobRegistry>>,
}

impl WorkerHandle {
    /// Queues a run and returns its ticket without waiting for it to start
    pub async fn submit(&self, scope: JobScope, trigger: JobTrigger) -> AppResult<JobTicket> {
        let job_id = Uuid::new_v4();

        self.registry.write().await.insert(JobRecord {
            job_id,
            scope,
            trigger,
            state: JobState::Queued,
            submitted_at: Utc::now(),
            started_at: None,
            finished_at: None,
        });

        if self.queue_tx.send(QueuedJob { job_id, scope }).is_err() {
            self.registry.write().await.jobs.remove(&job_id);
            return Err(AppError::Unavailable(
                "batch worker is not accepting jobs".to_string(),
            ));
        }

        tracing::info!(job_id = %job_id, scope = ?scope, trigger = ?trigger, "Batch job queued");

        Ok(JobTicket {
            job_id,
            state: JobState::Queued,
        })
    }

    pub async fn job(&self, job_id: Uuid) -> Option<JobRecord> {
        self.registry.read().await.jobs.get(&job_id).cloned()
    }

    /// Every retained job, most recently submitted first
    pub async fn jobs(&self) -> Vec<JobRecord> {
        let mut jobs: Vec<JobRecord> = self.registry.read().await.jobs.values().cloned().collect();
        jobs.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
        jobs
    }
}

/// Handle for gracefully shutting down the batch worker
pub struct WorkerShutdown {
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
    registry: Arc<RwLock<JobRegistry>>,
}

impl WorkerShutdown {
    /// Stops the worker
    ///
    /// Queued jobs are cancelled. A running job gets `grace` to finish before
    /// its task is aborted and the job recorded as cancelled.
    pub async fn shutdown(mut self, grace: Duration) {
        let _ = self.shutdown_tx.send(()).await;
        tracing::info!("Batch worker shutdown signal sent");

        if tokio::time::timeout(grace, &mut self.task).await.is_err() {
            tracing::warn!(
                grace_secs = grace.as_secs_f64(),
                "Running batch job did not finish in time, aborting"
            );
            self.task.abort();
            let _ = (&mut self.task).await;
        }

        let cancelled = self.registry.write().await.cancel_unfinished();
        if cancelled > 0 {
            tracing::info!(cancelled, "Cancelled unfinished batch jobs");
        }

        tracing::info!("Batch worker stopped");
    }
}

/// Single-consumer job queue in front of a [`BatchRunner`]
pub struct BatchWorker;

impl BatchWorker {
    /// Spawns the background task that executes jobs one at a time
    ///
    /// Every job gets its own deadline of `job_timeout` measured from when it
    /// starts, not from when it was queued.
    pub fn spawn(
        runner: Arc<dyn BatchRunner>,
        job_timeout: Duration,
    ) -> (WorkerHandle, WorkerShutdown) {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let registry = Arc::new(RwLock::new(JobRegistry::default()));

        let task_registry = registry.clone();
        let task = tokio::spawn(async move {
            Self::worker_task(runner, job_timeout, task_registry, queue_rx, shutdown_rx).await;
        });

        let handle = WorkerHandle {
            queue_tx,
            registry: registry.clone(),
        };
        let shutdown = WorkerShutdown {
            shutdown_tx,
            task,
            registry,
        };

        (handle, shutdown)
    }

    async fn worker_task(
        runner: Arc<dyn BatchRunner>,
        job_timeout: Duration,
        registry: Arc<RwLock<JobRegistry>>,
        mut queue_rx: mpsc::UnboundedReceiver<QueuedJob>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        tracing::info!(
            job_timeout_secs = job_timeout.as_secs(),
            "Batch worker task started"
        );

        loop {
            tokio::select! {
                biased;
                Some(()) = shutdown_rx.recv() => {
                    tracing::info!("Batch worker shutting down");
                    break;
                }
                job = queue_rx.recv() => match job {
                    Some(job) => {
                        Self::run_job(runner.as_ref(), job_timeout, &registry, job).await;
                    }
                    None => break,
                },
            }
        }

        queue_rx.close();
        let mut registry = registry.write().await;
        while let Ok(job) = queue_rx.try_recv() {
            registry.finish(job.job_id, JobState::Cancelled);
            tracing::info!(job_id = %job.job_id, "Queued batch job cancelled");
        }
    }

    async fn run_job(
        runner: &dyn BatchRunner,
        job_timeout: Duration,
        registry: &RwLock<JobRegistry>,
        job: QueuedJob,
    ) {
        registry.write().await.start(job.job_id);

        let started = Instant::now();
        let deadline = started + job_timeout;

        tracing::info!(job_id = %job.job_id, scope = ?job.scope, "Batch job started");

        let result = match job.scope {
            JobScope::AllUsers => runner.run_batch(deadline).await,
            JobScope::User { user_id } => runner.run_for_user(user_id, deadline).await,
        };

        let state = match result {
            Ok(summary) => {
                tracing::info!(
                    job_id = %job.job_id,
                    total = summary.total,
                    succeeded = summary.succeeded,
                    failed = summary.failed,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Batch job completed"
                );
                JobState::Completed { summary }
            }
            Err(e) => {
                tracing::error!(
                    job_id = %job.job_id,
                    error = %e,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Batch job failed"
                );
                JobState::Failed {
                    error: e.to_string(),
                }
            }
        };

        registry.write().await.finish(job.job_id, state);
    }
}
