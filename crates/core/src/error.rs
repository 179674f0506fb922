// crates/core/src/error.rs
use thiserror::Error;

use crate::job::{JobId, JobStatus};
use crate::store::StoreError;

/// Errors returned by the job lifecycle manager.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("job not found: {0}")]
    NotFound(JobId),

    #[error("requester {requester} does not own job {job_id}")]
    Unauthorized { job_id: JobId, requester: String },

    #[error("invalid transition for job {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("invalid progress for job {job_id}: {requested} (current {current})")]
    InvalidProgress {
        job_id: JobId,
        current: u8,
        requested: u8,
    },

    #[error("job {job_id} is already {status}")]
    AlreadyTerminal { job_id: JobId, status: JobStatus },

    #[error("job {job_id} still contended after {attempts} attempts")]
    Contention { job_id: JobId, attempts: u32 },

    #[error("job store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),
}

impl JobError {
    /// Short machine-readable name, used as a metrics label.
    pub fn kind(&self) -> &'static str {
        match self {
            JobError::NotFound(_) => "not_found",
            JobError::Unauthorized { .. } => "unauthorized",
            JobError::InvalidTransition { .. } => "invalid_transition",
            JobError::InvalidProgress { .. } => "invalid_progress",
            JobError::AlreadyTerminal { .. } => "already_terminal",
            JobError::Contention { .. } => "contention",
            JobError::StoreUnavailable(_) => "store_unavailable",
        }
    }

    /// True for state-machine misuse by the calling task body.
    pub fn is_caller_misuse(&self) -> bool {
        matches!(
            self,
            JobError::InvalidTransition { .. }
                | JobError::InvalidProgress { .. }
                | JobError::AlreadyTerminal { .. }
        )
    }
}

pub type JobResult<T> = Result<T, JobError>;
