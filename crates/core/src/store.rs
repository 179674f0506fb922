// crates/core/src/store.rs
//! Job store interface and the in-memory implementation.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;

use crate::job::{JobId, JobRecord};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job already exists: {0}")]
    AlreadyExists(JobId),

    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("store backend error: {0}")]
    Backend(String),
}

/// A stored record together with its optimistic-concurrency version.
///
/// The version starts at 1 on create and increases by one on every
/// successful [`JobStore::compare_and_set`].
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned {
    pub record: JobRecord,
    pub version: u64,
}

/// Keyed storage for job records.
///
/// Implementations must make `compare_and_set` atomic per record: it writes
/// only if the stored version still equals `expected_version`.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<Versioned>, StoreError>;

    async fn create(&self, record: JobRecord) -> Result<JobId, StoreError>;

    /// Returns `Ok(false)` on a version mismatch or when the id is unknown.
    async fn compare_and_set(
        &self,
        id: &str,
        expected_version: u64,
        record: JobRecord,
    ) -> Result<bool, StoreError>;

    async fn delete(&self, id: &str) -> Result<bool, StoreError>;
}

/// In-memory store. Each record is guarded by its own shard entry, so
/// unrelated jobs never contend.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: DashMap<JobId, Versioned>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn get(&self, id: &str) -> Result<Option<Versioned>, StoreError> {
        Ok(self.jobs.get(id).map(|entry| entry.value().clone()))
    }

    async fn create(&self, record: JobRecord) -> Result<JobId, StoreError> {
        match self.jobs.entry(record.id.clone()) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists(record.id)),
            Entry::Vacant(slot) => {
                let id = record.id.clone();
                slot.insert(Versioned { record, version: 1 });
                Ok(id)
            }
        }
    }

    async fn compare_and_set(
        &self,
        id: &str,
        expected_version: u64,
        record: JobRecord,
    ) -> Result<bool, StoreError> {
        let Some(mut entry) = self.jobs.get_mut(id) else {
            return Ok(false);
        };
        if entry.version != expected_version {
            return Ok(false);
        }
        entry.version += 1;
        entry.record = record;
        Ok(true)
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.jobs.remove(id).is_some())
    }
}
