/// Inline SQL migrations for the jobwatch database schema.
///
/// We use simple inline migrations rather than sqlx migration files
/// because the schema is small and self-contained.

pub const MIGRATIONS: &[&str] = &[
    // Migration 1: jobs table
    r#"
CREATE TABLE IF NOT EXISTS jobs (
    id            TEXT PRIMARY KEY,
    owner_id      TEXT NOT NULL,
    status        TEXT NOT NULL,
    progress      INTEGER NOT NULL DEFAULT 0,
    result        TEXT,
    error_message TEXT,
    created_at    INTEGER NOT NULL,
    updated_at    INTEGER NOT NULL,
    version       INTEGER NOT NULL DEFAULT 1
);
"#,
    // Migration 2: owner index
    r#"CREATE INDEX IF NOT EXISTS idx_jobs_owner ON jobs(owner_id);"#,
    // Migration 3: status index
    r#"CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);"#,
];
