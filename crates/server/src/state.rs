// crates/server/src/state.rs
//! Application state for the Axum server.

use std::sync::Arc;
use std::time::Instant;

use jobwatch_core::{
    JobManager, JobRunner, JobStore, ManagerConfig, MemoryJobStore, StatusStream, StreamConfig,
};

use crate::auth::AuthTokens;

/// Shared application state accessible from all route handlers.
pub struct AppState {
    /// Server start time for uptime tracking.
    pub start_time: Instant,
    /// Lifecycle manager; the only writer of job records.
    pub jobs: JobManager,
    /// Spawns task bodies submitted through `POST /api/jobs`.
    pub runner: JobRunner,
    /// Hands out SSE status subscriptions.
    pub stream: StatusStream,
    pub auth: AuthTokens,
}

impl AppState {
    /// Create a new application state wrapped in an Arc for sharing.
    pub fn new(
        store: Arc<dyn JobStore>,
        manager: ManagerConfig,
        stream: StreamConfig,
        auth: AuthTokens,
    ) -> Arc<Self> {
        let jobs = JobManager::with_config(Arc::clone(&store), manager);
        Arc::new(Self {
            start_time: Instant::now(),
            runner: JobRunner::new(jobs.clone()),
            jobs,
            stream: StatusStream::new(store, stream),
            auth,
        })
    }

    /// State over a fresh in-memory store with default tuning.
    pub fn in_memory(auth: AuthTokens) -> Arc<Self> {
        Self::new(
            Arc::new(MemoryJobStore::new()),
            ManagerConfig::default(),
            StreamConfig::default(),
            auth,
        )
    }

    /// Get the server uptime in seconds.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
