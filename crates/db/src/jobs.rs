// crates/db/src/jobs.rs
//! `JobStore` backed by the `jobs` table.
//!
//! Compare-and-set is a single conditional `UPDATE` on the `version` column,
//! so SQLite's write lock provides the per-record atomicity.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jobwatch_core::{JobId, JobRecord, JobStatus, JobStore, StoreError, Versioned};

use crate::{Database, DbError};

type JobRow = (
    String,         // id
    String,         // owner_id
    String,         // status
    i64,            // progress
    Option<String>, // result
    Option<String>, // error_message
    i64,            // created_at
    i64,            // updated_at
    i64,            // version
);

impl From<DbError> for StoreError {
    fn from(err: DbError) -> Self {
        StoreError::Backend(err.to_string())
    }
}

fn backend(err: sqlx::Error) -> StoreError {
    DbError::from(err).into()
}

fn corrupt(id: &str, reason: impl Into<String>) -> DbError {
    DbError::CorruptRow {
        id: id.to_string(),
        reason: reason.into(),
    }
}

fn timestamp(id: &str, millis: i64) -> Result<DateTime<Utc>, DbError> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| corrupt(id, format!("timestamp out of range: {millis}")))
}

fn row_to_versioned(row: JobRow) -> Result<Versioned, DbError> {
    let (id, owner_id, status, progress, result, error_message, created_at, updated_at, version) =
        row;

    let status = JobStatus::from_db_str(&status)
        .ok_or_else(|| corrupt(&id, format!("unknown status '{status}'")))?;
    let progress = u8::try_from(progress)
        .map_err(|_| corrupt(&id, format!("progress out of range: {progress}")))?;
    let result = result
        .map(|text| serde_json::from_str(&text))
        .transpose()
        .map_err(|e| corrupt(&id, format!("result is not JSON: {e}")))?;

    Ok(Versioned {
        record: JobRecord {
            status,
            progress,
            result,
            error_message,
            created_at: timestamp(&id, created_at)?,
            updated_at: timestamp(&id, updated_at)?,
            owner_id,
            id,
        },
        version: version as u64,
    })
}

fn result_text(record: &JobRecord) -> Option<String> {
    record.result.as_ref().map(|value| value.to_string())
}

#[async_trait]
impl JobStore for Database {
    async fn get(&self, id: &str) -> Result<Option<Versioned>, StoreError> {
        let row: Option<JobRow> = sqlx::query_as(
            r#"
            SELECT id, owner_id, status, progress, result, error_message,
                   created_at, updated_at, version
            FROM jobs
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(backend)?;

        Ok(row.map(row_to_versioned).transpose()?)
    }

    async fn create(&self, record: JobRecord) -> Result<JobId, StoreError> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO jobs (id, owner_id, status, progress, result, error_message,
                              created_at, updated_at, version)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1)
            "#,
        )
        .bind(&record.id)
        .bind(&record.owner_id)
        .bind(record.status.as_str())
        .bind(record.progress as i64)
        .bind(result_text(&record))
        .bind(&record.error_message)
        .bind(record.created_at.timestamp_millis())
        .bind(record.updated_at.timestamp_millis())
        .execute(self.pool())
        .await;

        match inserted {
            Ok(_) => Ok(record.id),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StoreError::AlreadyExists(record.id))
            }
            Err(e) => Err(backend(e)),
        }
    }

    async fn compare_and_set(
        &self,
        id: &str,
        expected_version: u64,
        record: JobRecord,
    ) -> Result<bool, StoreError> {
        let updated = sqlx::query(
            r#"
            UPDATE jobs
            SET status = ?1, progress = ?2, result = ?3, error_message = ?4,
                updated_at = ?5, version = version + 1
            WHERE id = ?6 AND version = ?7
            "#,
        )
        .bind(record.status.as_str())
        .bind(record.progress as i64)
        .bind(result_text(&record))
        .bind(&record.error_message)
        .bind(record.updated_at.timestamp_millis())
        .bind(id)
        .bind(expected_version as i64)
        .execute(self.pool())
        .await
        .map_err(backend)?;

        Ok(updated.rows_affected() == 1)
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let deleted = sqlx::query("DELETE FROM jobs WHERE id = ?1")
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(backend)?;
        Ok(deleted.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn setup() -> Database {
        Database::new_in_memory().await.unwrap()
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let db = setup().await;
        let record = JobRecord::pending("u1");
        let id = db.create(record.clone()).await.unwrap();
        assert_eq!(id, record.id);

        let stored = db.get(&id).await.unwrap().unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(stored.record.status, JobStatus::Pending);
        assert_eq!(stored.record.owner_id, "u1");
        assert_eq!(stored.record.progress, 0);
        assert_eq!(stored.record, record);

        assert!(db.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_create() {
        let db = setup().await;
        let record = JobRecord::pending("u1");
        db.create(record.clone()).await.unwrap();
        let err = db.create(record).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_compare_and_set_bumps_version() {
        let db = setup().await;
        let record = JobRecord::pending("u1");
        let id = db.create(record.clone()).await.unwrap();

        let mut done = record.clone();
        done.status = JobStatus::Completed;
        done.progress = 100;
        done.result = Some(json!({"topics": ["a", "b"]}));
        assert!(db.compare_and_set(&id, 1, done).await.unwrap());

        // Stale version loses and leaves the row untouched.
        assert!(!db.compare_and_set(&id, 1, record).await.unwrap());

        let stored = db.get(&id).await.unwrap().unwrap();
        assert_eq!(stored.version, 2);
        assert_eq!(stored.record.status, JobStatus::Completed);
        assert_eq!(stored.record.progress, 100);
        assert_eq!(stored.record.result, Some(json!({"topics": ["a", "b"]})));
    }

    #[tokio::test]
    async fn test_compare_and_set_unknown_id() {
        let db = setup().await;
        let record = JobRecord::pending("u1");
        assert!(!db.compare_and_set("nope", 1, record).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete() {
        let db = setup().await;
        let id = db.create(JobRecord::pending("u1")).await.unwrap();
        assert!(db.delete(&id).await.unwrap());
        assert!(!db.delete(&id).await.unwrap());
        assert!(db.get(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_status_is_backend_error() {
        let db = setup().await;
        let id = db.create(JobRecord::pending("u1")).await.unwrap();
        sqlx::query("UPDATE jobs SET status = 'running' WHERE id = ?1")
            .bind(&id)
            .execute(db.pool())
            .await
            .unwrap();

        let err = db.get(&id).await.unwrap_err();
        match err {
            StoreError::Backend(msg) => assert!(msg.contains("unknown status 'running'")),
            other => panic!("expected backend error, got {other:?}"),
        }
    }
}
