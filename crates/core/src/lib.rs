// crates/core/src/lib.rs
//! Job lifecycle tracking and status streaming.
//!
//! - [`JobManager`] is the only writer of job records and enforces the state
//!   machine with compare-and-set against a [`JobStore`].
//! - [`StatusStream`] turns store polling into a finite, deduplicated feed of
//!   [`StatusEvent`]s for one subscriber.
//! - [`JobRunner`] spawns task bodies and settles their jobs.

pub mod error;
pub mod job;
pub mod lifecycle;
pub mod runner;
pub mod store;
pub mod stream;

pub use error::{JobError, JobResult};
pub use job::{EventKind, JobId, JobRecord, JobStatus, StatusEvent, MAX_PROGRESS};
pub use lifecycle::{JobManager, ManagerConfig};
pub use runner::{simulated_work, JobContext, JobHandle, JobRunner};
pub use store::{JobStore, MemoryJobStore, StoreError, Versioned};
pub use stream::{StatusStream, StreamConfig, StreamFrame};
