//! Database schema management.

use rusqlite::Connection;

/// Initialize the database schema.
pub(crate) fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA)
}

// Timestamps are integer milliseconds since the epoch (UTC).
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    reason TEXT NOT NULL,
    input TEXT NOT NULL,
    output TEXT,
    status TEXT NOT NULL,
    worker_id TEXT,
    version INTEGER NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    locked_at INTEGER,
    lease_expires_at INTEGER,
    deleted_at INTEGER
);

CREATE INDEX IF NOT EXISTS idx_jobs_poll ON jobs(status, created_at);
CREATE INDEX IF NOT EXISTS idx_jobs_project ON jobs(project_id, created_at);
CREATE INDEX IF NOT EXISTS idx_jobs_lease ON jobs(lease_expires_at) WHERE worker_id IS NOT NULL;

CREATE TABLE IF NOT EXISTS scheduled_job_rules (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    input TEXT NOT NULL,
    next_run_at INTEGER NOT NULL,
    status TEXT NOT NULL,
    processed_at INTEGER,
    output TEXT,
    worker_id TEXT,
    version INTEGER NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    locked_at INTEGER,
    lease_expires_at INTEGER,
    deleted_at INTEGER
);

CREATE INDEX IF NOT EXISTS idx_scheduled_poll ON scheduled_job_rules(status, next_run_at);
CREATE INDEX IF NOT EXISTS idx_scheduled_project ON scheduled_job_rules(project_id, created_at);

CREATE TABLE IF NOT EXISTS recurring_job_rules (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    input TEXT NOT NULL,
    cron TEXT NOT NULL,
    next_run_at INTEGER NOT NULL,
    disabled INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    last_processed_at INTEGER,
    worker_id TEXT,
    version INTEGER NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    locked_at INTEGER,
    lease_expires_at INTEGER,
    deleted_at INTEGER
);

CREATE INDEX IF NOT EXISTS idx_recurring_poll ON recurring_job_rules(disabled, next_run_at);
CREATE INDEX IF NOT EXISTS idx_recurring_project ON recurring_job_rules(project_id, created_at);

CREATE TABLE IF NOT EXISTS project_members (
    project_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    PRIMARY KEY (project_id, user_id)
);

CREATE TABLE IF NOT EXISTS api_keys (
    key TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    revoked INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    last_used_at INTEGER
);

CREATE INDEX IF NOT EXISTS idx_api_keys_project ON api_keys(project_id);

CREATE TABLE IF NOT EXISTS project_quotas (
    project_id TEXT NOT NULL,
    kind TEXT NOT NULL,
    remaining INTEGER NOT NULL CHECK (remaining >= 0),
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (project_id, kind)
);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_creation() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        for table in ["jobs", "scheduled_job_rules", "recurring_job_rules", "api_keys", "project_quotas"] {
            let mut stmt = conn
                .prepare("SELECT name FROM sqlite_master WHERE type='table' AND name=?1")
                .unwrap();
            assert!(stmt.exists([table]).unwrap(), "missing table {}", table);
        }
    }

    #[test]
    fn test_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();
    }
}
