// crates/core/src/job.rs
//! Job records and the status events derived from them.

use std::fmt;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Opaque job identifier (UUID v4 string).
pub type JobId = String;

/// Highest progress value a job can report.
pub const MAX_PROGRESS: u8 = 100;

/// Current time at millisecond precision, the finest any store keeps.
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "codegen", ts(export, export_to = "../../../web/src/types/generated/"))]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Active,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// `completed`, `failed` and `cancelled` are terminal.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Active => "active",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Parse the lowercase form written by [`JobStatus::as_str`].
    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "active" => Some(JobStatus::Active),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of trackable work.
///
/// `result` is only ever set on `completed` records and `error_message` only
/// on `failed` ones. Everything except `id`, `owner_id` and `created_at` is
/// frozen once the status is terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "codegen", ts(export, export_to = "../../../web/src/types/generated/"))]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: JobId,
    pub status: JobStatus,
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
    pub owner_id: String,
}

impl JobRecord {
    /// A fresh `pending` record with a newly allocated id.
    pub fn pending(owner_id: impl Into<String>) -> Self {
        let created = now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            status: JobStatus::Pending,
            progress: 0,
            result: None,
            error_message: None,
            created_at: created,
            updated_at: created,
            owner_id: owner_id.into(),
        }
    }

    /// The `(status, progress)` pair subscribers deduplicate on.
    pub fn key(&self) -> (JobStatus, u8) {
        (self.status, self.progress)
    }

    pub(crate) fn with_status(&self, status: JobStatus) -> Self {
        let mut next = self.clone();
        next.status = status;
        next.updated_at = now();
        next
    }

    pub(crate) fn with_progress(&self, progress: u8) -> Self {
        let mut next = self.clone();
        next.progress = progress;
        next.updated_at = now();
        next
    }

    pub(crate) fn completed(&self, result: serde_json::Value) -> Self {
        let mut next = self.with_status(JobStatus::Completed);
        next.result = Some(result);
        next
    }

    pub(crate) fn failed(&self, error_message: String) -> Self {
        let mut next = self.with_status(JobStatus::Failed);
        next.error_message = Some(error_message);
        next
    }
}

/// Kind of a [`StatusEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "codegen", ts(export, export_to = "../../../web/src/types/generated/"))]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Update,
    Complete,
    Error,
    Timeout,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Update => "update",
            EventKind::Complete => "complete",
            EventKind::Error => "error",
            EventKind::Timeout => "timeout",
        }
    }

    /// Every kind except `update` ends the subscription.
    pub fn is_final(self) -> bool {
        !matches!(self, EventKind::Update)
    }
}

/// A snapshot of a job as delivered to a stream subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "codegen", ts(export, export_to = "../../../web/src/types/generated/"))]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    pub kind: EventKind,
    pub job_id: JobId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Failure or timeout detail; never set on `update`/`complete`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl StatusEvent {
    pub fn snapshot(kind: EventKind, record: &JobRecord) -> Self {
        Self {
            kind,
            job_id: record.id.clone(),
            status: Some(record.status),
            progress: Some(record.progress),
            result: record.result.clone(),
            error_message: record.error_message.clone(),
            message: None,
        }
    }

    pub fn error(job_id: impl Into<JobId>, message: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Error,
            job_id: job_id.into(),
            status: None,
            progress: None,
            result: None,
            error_message: None,
            message: Some(message.into()),
        }
    }

    /// Timeout event carrying the last snapshot the subscriber saw.
    pub fn timeout(last: &JobRecord, message: impl Into<String>) -> Self {
        let mut event = Self::snapshot(EventKind::Timeout, last);
        event.message = Some(message.into());
        event
    }
}
