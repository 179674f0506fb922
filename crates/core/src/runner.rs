// crates/core/src/runner.rs
//! Spawns task bodies and drives their jobs through the lifecycle.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::error::{JobError, JobResult};
use crate::job::{JobRecord, JobStatus};
use crate::lifecycle::JobManager;

/// Handle given to a running task body.
///
/// Cancellation is cooperative: `report` starts failing once the job has been
/// settled elsewhere, and the body is expected to stop at that point.
#[derive(Clone)]
pub struct JobContext {
    id: String,
    manager: JobManager,
}

impl JobContext {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Report progress. Fails with `AlreadyTerminal` after cancellation.
    pub async fn report(&self, progress: u8) -> JobResult<()> {
        self.manager.update_progress(&self.id, progress).await.map(|_| ())
    }

    /// Checkpoint for bodies that do long stretches of work between reports.
    pub async fn is_cancelled(&self) -> bool {
        match self.manager.get_status(&self.id).await {
            Ok(record) => record.status == JobStatus::Cancelled,
            Err(e) => {
                warn!(job_id = %self.id, error = %e, "Cancellation check failed");
                false
            }
        }
    }
}

/// A started job: the record as created plus its background task.
pub struct JobHandle {
    pub record: JobRecord,
    task: JoinHandle<()>,
}

impl JobHandle {
    pub fn id(&self) -> &str {
        &self.record.id
    }

    /// Wait for the task body to finish and its outcome to be settled.
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            error!(job_id = %self.record.id, error = %e, "Job task panicked");
        }
    }
}

/// Runs task bodies on the tokio runtime, one task per job.
#[derive(Clone)]
pub struct JobRunner {
    manager: JobManager,
}

impl JobRunner {
    pub fn new(manager: JobManager) -> Self {
        Self { manager }
    }

    /// Create a job for `owner_id` and spawn `body` for it.
    ///
    /// The body's `Ok` value becomes the job result and its `Err` the error
    /// message. If the job was cancelled meanwhile, the outcome is discarded.
    pub async fn start<F, Fut>(&self, owner_id: &str, body: F) -> JobResult<JobHandle>
    where
        F: FnOnce(JobContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<serde_json::Value, String>> + Send + 'static,
    {
        let record = self.manager.create(owner_id).await?;
        let manager = self.manager.clone();
        let id = record.id.clone();

        let task = tokio::spawn(async move {
            match manager.mark_active(&id).await {
                Ok(_) => {}
                Err(e @ JobError::InvalidTransition { .. }) => {
                    // Cancelled before it ever ran.
                    info!(job_id = %id, error = %e, "Job not started");
                    return;
                }
                Err(e) => {
                    error!(job_id = %id, error = %e, "Failed to start job");
                    settle(&manager, &id, Err(format!("failed to start: {e}"))).await;
                    return;
                }
            }

            let ctx = JobContext {
                id: id.clone(),
                manager: manager.clone(),
            };
            // The body runs in its own task so a panic still settles the job.
            let outcome = match tokio::spawn(body(ctx)).await {
                Ok(outcome) => outcome,
                Err(e) if e.is_panic() => {
                    error!(job_id = %id, "Job task panicked");
                    Err("task panicked".to_string())
                }
                Err(e) => Err(format!("task aborted: {e}")),
            };
            settle(&manager, &id, outcome).await;
        });

        Ok(JobHandle { record, task })
    }
}

/// Record a body's outcome as the job's terminal state.
async fn settle(manager: &JobManager, id: &str, outcome: Result<serde_json::Value, String>) {
    let settled = match outcome {
        Ok(result) => manager.complete(id, result).await,
        Err(message) => manager.fail(id, &message).await,
    };

    match settled {
        Ok(record) => info!(job_id = %id, status = %record.status, "Job finished"),
        Err(JobError::AlreadyTerminal { status, .. }) => {
            info!(job_id = %id, %status, "Job settled elsewhere, discarding outcome");
        }
        Err(e) => error!(job_id = %id, error = %e, "Failed to settle job"),
    }
}

/// Built-in task body that advances progress evenly over `steps` ticks.
///
/// Stands in for real work (document analysis, generation) so the lifecycle
/// and stream can be exercised end to end.
pub async fn simulated_work(
    ctx: JobContext,
    steps: u32,
    step: Duration,
) -> Result<serde_json::Value, String> {
    for i in 1..=steps {
        tokio::time::sleep(step).await;
        let progress = (u64::from(i) * 100 / u64::from(steps)) as u8;
        ctx.report(progress).await.map_err(|e| e.to_string())?;
    }
    Ok(serde_json::json!({ "steps": steps }))
}
