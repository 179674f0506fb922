// crates/core/src/lifecycle.rs
//! Job lifecycle manager: the single writer of job records.
//!
//! Every mutation is a read-modify-write against the [`JobStore`] guarded by
//! compare-and-set on the stored version. A lost race re-reads and re-decides,
//! so a progress write racing a cancellation can never resurrect the job.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tracing::{debug, error, info, warn};

use crate::error::{JobError, JobResult};
use crate::job::{JobRecord, JobStatus, MAX_PROGRESS};
use crate::store::{JobStore, StoreError};

/// Tuning for the lifecycle manager.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Extra read-modify-write attempts after a compare-and-set conflict.
    pub max_cas_retries: u32,
    /// Upper bound on every individual store call.
    pub store_timeout: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_cas_retries: 8,
            store_timeout: Duration::from_secs(5),
        }
    }
}

/// Outcome of one decision over the current record.
enum Decision {
    Write(JobRecord),
    Keep,
}

/// Owns the job state machine.
///
/// Cheap to clone; clones share the same store.
#[derive(Clone)]
pub struct JobManager {
    store: Arc<dyn JobStore>,
    config: ManagerConfig,
}

impl JobManager {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self::with_config(store, ManagerConfig::default())
    }

    pub fn with_config(store: Arc<dyn JobStore>, config: ManagerConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> Arc<dyn JobStore> {
        Arc::clone(&self.store)
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Create a `pending` job owned by `owner_id`.
    pub async fn create(&self, owner_id: &str) -> JobResult<JobRecord> {
        let record = JobRecord::pending(owner_id);
        let id = self
            .timed(self.store.create(record.clone()))
            .await
            .map_err(|e| {
                error!(owner_id, error = %e, "Failed to create job");
                JobError::from(e)
            })?;
        counter!("jobwatch_job_transitions_total", "to" => JobStatus::Pending.as_str())
            .increment(1);
        info!(job_id = %id, owner_id, "Job created");
        Ok(record)
    }

    pub async fn get_status(&self, id: &str) -> JobResult<JobRecord> {
        match self.timed(self.store.get(id)).await? {
            Some(stored) => Ok(stored.record),
            None => Err(JobError::NotFound(id.to_string())),
        }
    }

    /// `pending -> active`. Already-active jobs are left untouched.
    pub async fn mark_active(&self, id: &str) -> JobResult<JobRecord> {
        let (record, _) = self
            .modify(id, |job| match job.status {
                JobStatus::Pending => Ok(Decision::Write(job.with_status(JobStatus::Active))),
                JobStatus::Active => Ok(Decision::Keep),
                from => Err(JobError::InvalidTransition {
                    job_id: job.id.clone(),
                    from,
                    to: JobStatus::Active,
                }),
            })
            .await?;
        Ok(record)
    }

    /// Raise progress. Regressions and values above 100 are rejected rather
    /// than clamped.
    pub async fn update_progress(&self, id: &str, progress: u8) -> JobResult<JobRecord> {
        let (record, _) = self
            .modify(id, |job| {
                ensure_live(job)?;
                if progress < job.progress || progress > MAX_PROGRESS {
                    return Err(JobError::InvalidProgress {
                        job_id: job.id.clone(),
                        current: job.progress,
                        requested: progress,
                    });
                }
                Ok(Decision::Write(job.with_progress(progress)))
            })
            .await?;
        Ok(record)
    }

    /// Settle the job as `completed`. A second settle is a caller error.
    pub async fn complete(&self, id: &str, result: serde_json::Value) -> JobResult<JobRecord> {
        let (record, _) = self
            .modify(id, |job| {
                ensure_live(job)?;
                Ok(Decision::Write(job.completed(result.clone())))
            })
            .await?;
        Ok(record)
    }

    pub async fn fail(&self, id: &str, error_message: &str) -> JobResult<JobRecord> {
        let (record, _) = self
            .modify(id, |job| {
                ensure_live(job)?;
                Ok(Decision::Write(job.failed(error_message.to_string())))
            })
            .await?;
        Ok(record)
    }

    /// Request cancellation on behalf of `requester_id`.
    ///
    /// Returns `Ok(false)` when the job had already finished. Ownership is
    /// checked before terminal state, so a non-owner is always rejected.
    pub async fn cancel(&self, id: &str, requester_id: &str) -> JobResult<bool> {
        let (_, written) = self
            .modify(id, |job| {
                if job.owner_id != requester_id {
                    return Err(JobError::Unauthorized {
                        job_id: job.id.clone(),
                        requester: requester_id.to_string(),
                    });
                }
                if job.status.is_terminal() {
                    return Ok(Decision::Keep);
                }
                Ok(Decision::Write(job.with_status(JobStatus::Cancelled)))
            })
            .await?;
        if !written {
            debug!(job_id = %id, "Cancel had no effect: job already finished");
        }
        Ok(written)
    }

    /// Read-modify-write loop. Returns the record as it stands afterwards and
    /// whether this call wrote it.
    async fn modify<F>(&self, id: &str, mut decide: F) -> JobResult<(JobRecord, bool)>
    where
        F: FnMut(&JobRecord) -> JobResult<Decision>,
    {
        let attempts = self.config.max_cas_retries.saturating_add(1);
        for attempt in 1..=attempts {
            let Some(current) = self.timed(self.store.get(id)).await? else {
                return Err(JobError::NotFound(id.to_string()));
            };

            let next = match decide(&current.record) {
                Ok(Decision::Write(next)) => next,
                Ok(Decision::Keep) => return Ok((current.record, false)),
                Err(e) => return Err(rejected(e)),
            };

            if self
                .timed(self.store.compare_and_set(id, current.version, next.clone()))
                .await?
            {
                record_write(&current.record, &next);
                return Ok((next, true));
            }
            debug!(job_id = %id, attempt, version = current.version, "Compare-and-set conflict, retrying");
        }

        let err = JobError::Contention {
            job_id: id.to_string(),
            attempts,
        };
        counter!("jobwatch_job_rejections_total", "kind" => err.kind()).increment(1);
        warn!(job_id = %id, attempts, "Giving up after repeated compare-and-set conflicts");
        Err(err)
    }

    async fn timed<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        match tokio::time::timeout(self.config.store_timeout, op).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.config.store_timeout)),
        }
    }
}

fn ensure_live(job: &JobRecord) -> JobResult<()> {
    if job.status.is_terminal() {
        return Err(JobError::AlreadyTerminal {
            job_id: job.id.clone(),
            status: job.status,
        });
    }
    Ok(())
}

fn rejected(err: JobError) -> JobError {
    counter!("jobwatch_job_rejections_total", "kind" => err.kind()).increment(1);
    if err.is_caller_misuse() {
        // Misuse means the task body is buggy (ran twice, regressed, ...).
        warn!(error = %err, "Rejected job state transition");
    } else {
        debug!(error = %err, "Rejected job request");
    }
    err
}

fn record_write(before: &JobRecord, after: &JobRecord) {
    if before.status != after.status {
        counter!("jobwatch_job_transitions_total", "to" => after.status.as_str()).increment(1);
        info!(
            job_id = %after.id,
            from = %before.status,
            to = %after.status,
            progress = after.progress,
            "Job transitioned"
        );
    } else {
        debug!(job_id = %after.id, progress = after.progress, "Job progress updated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryJobStore, Versioned};
    use async_trait::async_trait;
    use serde_json::json;

    fn manager() -> JobManager {
        JobManager::new(Arc::new(MemoryJobStore::new()))
    }

    #[tokio::test]
    async fn test_create_is_pending() {
        let jobs = manager();
        let job = jobs.create("u1").await.unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress, 0);

        let read = jobs.get_status(&job.id).await.unwrap();
        assert_eq!(read, job);
    }

    #[tokio::test]
    async fn test_get_status_not_found() {
        let jobs = manager();
        let err = jobs.get_status("nope").await.unwrap_err();
        assert!(matches!(err, JobError::NotFound(id) if id == "nope"));
    }

    #[tokio::test]
    async fn test_mark_active_is_idempotent() {
        let jobs = manager();
        let job = jobs.create("u1").await.unwrap();

        let active = jobs.mark_active(&job.id).await.unwrap();
        assert_eq!(active.status, JobStatus::Active);

        let again = jobs.mark_active(&job.id).await.unwrap();
        assert_eq!(again, active, "second mark_active must not write");
    }

    #[tokio::test]
    async fn test_progress_is_monotonic() {
        let jobs = manager();
        let job = jobs.create("u1").await.unwrap();
        jobs.mark_active(&job.id).await.unwrap();

        assert_eq!(jobs.update_progress(&job.id, 10).await.unwrap().progress, 10);
        assert_eq!(jobs.update_progress(&job.id, 10).await.unwrap().progress, 10);
        assert_eq!(jobs.update_progress(&job.id, 55).await.unwrap().progress, 55);

        let err = jobs.update_progress(&job.id, 20).await.unwrap_err();
        assert!(matches!(
            err,
            JobError::InvalidProgress { current: 55, requested: 20, .. }
        ));
        assert_eq!(jobs.get_status(&job.id).await.unwrap().progress, 55);
    }

    #[tokio::test]
    async fn test_progress_above_hundred_rejected() {
        let jobs = manager();
        let job = jobs.create("u1").await.unwrap();
        let err = jobs.update_progress(&job.id, 101).await.unwrap_err();
        assert!(matches!(err, JobError::InvalidProgress { requested: 101, .. }));
    }

    #[tokio::test]
    async fn test_complete_sets_result_once() {
        let jobs = manager();
        let job = jobs.create("u1").await.unwrap();
        jobs.mark_active(&job.id).await.unwrap();

        let done = jobs.complete(&job.id, json!({"topics": ["a"]})).await.unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.result, Some(json!({"topics": ["a"]})));
        assert!(done.error_message.is_none());

        let err = jobs.complete(&job.id, json!("again")).await.unwrap_err();
        assert!(matches!(
            err,
            JobError::AlreadyTerminal { status: JobStatus::Completed, .. }
        ));
        assert_eq!(jobs.get_status(&job.id).await.unwrap(), done);
    }

    #[tokio::test]
    async fn test_fail_sets_error_message() {
        let jobs = manager();
        let job = jobs.create("u1").await.unwrap();
        jobs.mark_active(&job.id).await.unwrap();

        let failed = jobs.fail(&job.id, "model timed out").await.unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.error_message.as_deref(), Some("model timed out"));
        assert!(failed.result.is_none());
    }

    #[tokio::test]
    async fn test_terminal_job_is_frozen() {
        let jobs = manager();
        let job = jobs.create("u1").await.unwrap();
        jobs.mark_active(&job.id).await.unwrap();
        jobs.update_progress(&job.id, 30).await.unwrap();
        let failed = jobs.fail(&job.id, "boom").await.unwrap();

        assert!(matches!(
            jobs.mark_active(&job.id).await.unwrap_err(),
            JobError::InvalidTransition { from: JobStatus::Failed, .. }
        ));
        assert!(matches!(
            jobs.update_progress(&job.id, 90).await.unwrap_err(),
            JobError::AlreadyTerminal { .. }
        ));
        assert!(matches!(
            jobs.complete(&job.id, json!(1)).await.unwrap_err(),
            JobError::AlreadyTerminal { .. }
        ));
        assert!(matches!(
            jobs.fail(&job.id, "again").await.unwrap_err(),
            JobError::AlreadyTerminal { .. }
        ));
        assert_eq!(jobs.get_status(&job.id).await.unwrap(), failed);
    }

    #[tokio::test]
    async fn test_cancel_by_owner() {
        let jobs = manager();
        let job = jobs.create("u1").await.unwrap();

        assert!(jobs.cancel(&job.id, "u1").await.unwrap());
        assert_eq!(
            jobs.get_status(&job.id).await.unwrap().status,
            JobStatus::Cancelled
        );
        assert!(!jobs.cancel(&job.id, "u1").await.unwrap());
    }

    #[tokio::test]
    async fn test_cancel_by_non_owner_rejected_in_any_state() {
        let jobs = manager();
        let job = jobs.create("u1").await.unwrap();
        assert!(matches!(
            jobs.cancel(&job.id, "u2").await.unwrap_err(),
            JobError::Unauthorized { .. }
        ));

        jobs.complete(&job.id, json!(null)).await.unwrap();
        assert!(matches!(
            jobs.cancel(&job.id, "u2").await.unwrap_err(),
            JobError::Unauthorized { .. }
        ));
    }

    #[tokio::test]
    async fn test_cancel_unknown_job() {
        let jobs = manager();
        assert!(matches!(
            jobs.cancel("nope", "u1").await.unwrap_err(),
            JobError::NotFound(_)
        ));
    }

    /// Store whose compare-and-set always loses.
    struct AlwaysConflicting(MemoryJobStore);

    #[async_trait]
    impl JobStore for AlwaysConflicting {
        async fn get(&self, id: &str) -> Result<Option<Versioned>, StoreError> {
            self.0.get(id).await
        }
        async fn create(&self, record: JobRecord) -> Result<String, StoreError> {
            self.0.create(record).await
        }
        async fn compare_and_set(
            &self,
            _id: &str,
            _expected_version: u64,
            _record: JobRecord,
        ) -> Result<bool, StoreError> {
            Ok(false)
        }
        async fn delete(&self, id: &str) -> Result<bool, StoreError> {
            self.0.delete(id).await
        }
    }

    #[tokio::test]
    async fn test_contention_after_bounded_retries() {
        let jobs = JobManager::with_config(
            Arc::new(AlwaysConflicting(MemoryJobStore::new())),
            ManagerConfig {
                max_cas_retries: 3,
                ..ManagerConfig::default()
            },
        );
        let job = jobs.create("u1").await.unwrap();
        let err = jobs.mark_active(&job.id).await.unwrap_err();
        assert!(matches!(err, JobError::Contention { attempts: 4, .. }));
    }

    /// Store whose reads never return.
    struct Hanging;

    #[async_trait]
    impl JobStore for Hanging {
        async fn get(&self, _id: &str) -> Result<Option<Versioned>, StoreError> {
            std::future::pending().await
        }
        async fn create(&self, _record: JobRecord) -> Result<String, StoreError> {
            std::future::pending().await
        }
        async fn compare_and_set(
            &self,
            _id: &str,
            _expected_version: u64,
            _record: JobRecord,
        ) -> Result<bool, StoreError> {
            std::future::pending().await
        }
        async fn delete(&self, _id: &str) -> Result<bool, StoreError> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_timeout_is_unavailable() {
        let jobs = JobManager::new(Arc::new(Hanging));
        assert!(matches!(
            jobs.create("u1").await.unwrap_err(),
            JobError::StoreUnavailable(StoreError::Timeout(_))
        ));
        assert!(matches!(
            jobs.get_status("j1").await.unwrap_err(),
            JobError::StoreUnavailable(StoreError::Timeout(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_progress_racing_cancel_never_resurrects() {
        let jobs = manager();
        let job = jobs.create("u1").await.unwrap();
        jobs.mark_active(&job.id).await.unwrap();

        let writer = {
            let jobs = jobs.clone();
            let id = job.id.clone();
            tokio::spawn(async move {
                for p in 1..=100u8 {
                    if jobs.update_progress(&id, p).await.is_err() {
                        break;
                    }
                    tokio::task::yield_now().await;
                }
            })
        };
        let canceller = {
            let jobs = jobs.clone();
            let id = job.id.clone();
            tokio::spawn(async move { jobs.cancel(&id, "u1").await })
        };

        writer.await.unwrap();
        let cancelled = canceller.await.unwrap().unwrap();

        // Nothing else settles the job, so the cancel must have landed.
        assert!(cancelled);
        let last = jobs.get_status(&job.id).await.unwrap();
        assert_eq!(last.status, JobStatus::Cancelled);
        let frozen = last.progress;
        assert!(jobs.update_progress(&job.id, 100).await.is_err());
        assert_eq!(jobs.get_status(&job.id).await.unwrap().progress, frozen);
    }
}
