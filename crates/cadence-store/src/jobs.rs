//! Job store.

use async_trait::async_trait;
use rusqlite::{params, OptionalExtension};
use tracing::{debug, warn};
use uuid::Uuid;

use cadence_core::{Cursor, Job, JobUpdate, NewJob, Page, SchedulerError};

use crate::cas::{update_if_version, Patch};
use crate::codec::{millis, opt_millis, to_json, JOBS};
use crate::db::Database;
use crate::protocol::{self, guard_error, Presence, Reaped};

/// Running jobs go back to pending when their lock is cleared; finished
/// jobs keep their status.
const REVERT_RUNNING: &str = ", status = CASE WHEN status = 'running' THEN 'pending' ELSE status END";

/// Persistence for ad-hoc jobs.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a pending, unlocked job at version 1.
    async fn create(&self, job: NewJob) -> Result<Job, SchedulerError>;

    async fn fetch(&self, id: Uuid) -> Result<Option<Job>, SchedulerError>;

    /// Claim the oldest pending job, or a running job whose lease expired.
    async fn poll(&self, worker_id: &str) -> Result<Option<Job>, SchedulerError>;

    /// Claim one specific job.
    async fn lock(&self, id: Uuid, worker_id: &str) -> Result<Job, SchedulerError>;

    async fn update(&self, id: Uuid, expected_version: i64, update: JobUpdate) -> Result<Job, SchedulerError>;

    async fn heartbeat(&self, id: Uuid, worker_id: &str) -> Result<Job, SchedulerError>;

    /// Clear the lock. Releasing an unlocked job returns it unchanged.
    async fn release(&self, id: Uuid) -> Result<Job, SchedulerError>;

    /// Clear the lock only while `worker_id` holds it.
    async fn release_held(&self, id: Uuid, worker_id: &str) -> Result<Job, SchedulerError>;

    async fn list(&self, project_id: &str, cursor: Option<&str>, limit: u32) -> Result<Page<Job>, SchedulerError>;

    async fn delete_by_project(&self, project_id: &str) -> Result<usize, SchedulerError>;

    async fn reap_expired(&self) -> Result<Reaped, SchedulerError>;
}

/// [`JobStore`] on the shared SQLite database.
#[derive(Clone)]
pub struct SqliteJobStore {
    db: Database,
}

impl SqliteJobStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn create(&self, job: NewJob) -> Result<Job, SchedulerError> {
        let id = Uuid::new_v4().to_string();
        let now = millis(self.db.now());

        let job = self
            .db
            .write(move |tx| {
                let sql = format!(
                    "INSERT INTO jobs (id, project_id, reason, input, status, version, created_at, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, 'pending', 1, ?5, ?5) \
                     RETURNING {}",
                    JOBS.columns
                );
                tx.query_row(
                    &sql,
                    params![id, job.project_id, to_json(&job.reason)?, job.input.to_string(), now],
                    JOBS.from_row,
                )
            })
            .await?;

        debug!("Created job {} in project {}", job.id, job.project_id);
        Ok(job)
    }

    async fn fetch(&self, id: Uuid) -> Result<Option<Job>, SchedulerError> {
        self.db
            .read(move |conn| protocol::fetch(conn, &JOBS, &id.to_string()))
            .await
    }

    async fn poll(&self, worker_id: &str) -> Result<Option<Job>, SchedulerError> {
        let now = self.db.now();
        let expires = opt_millis(self.db.lease_expiry(now));
        let now = millis(now);
        let worker = worker_id.to_string();

        let job = self
            .db
            .write(move |tx| {
                let sql = format!(
                    "UPDATE jobs SET status = 'running', worker_id = ?1, locked_at = ?2, \
                         lease_expires_at = ?3, version = version + 1, updated_at = ?2 \
                     WHERE id = ( \
                         SELECT id FROM jobs \
                         WHERE deleted_at IS NULL \
                           AND ((status = 'pending' AND worker_id IS NULL) \
                             OR (status = 'running' AND lease_expires_at <= ?2)) \
                         ORDER BY created_at ASC, id ASC \
                         LIMIT 1) \
                     RETURNING {}",
                    JOBS.columns
                );
                tx.query_row(&sql, params![worker, now, expires], JOBS.from_row)
                    .optional()
            })
            .await?;

        if let Some(job) = &job {
            debug!("Worker {} claimed job {} (version {})", worker_id, job.id, job.version);
        }
        Ok(job)
    }

    async fn lock(&self, id: Uuid, worker_id: &str) -> Result<Job, SchedulerError> {
        let now = self.db.now();
        let expires = opt_millis(self.db.lease_expiry(now));
        let now = millis(now);
        let key = id.to_string();
        let worker = worker_id.to_string();

        let outcome = self
            .db
            .write(move |tx| {
                let sql = format!(
                    "UPDATE jobs SET status = 'running', worker_id = ?2, locked_at = ?3, \
                         lease_expires_at = ?4, version = version + 1, updated_at = ?3 \
                     WHERE id = ?1 AND deleted_at IS NULL \
                       AND ((status = 'pending' AND worker_id IS NULL) \
                         OR (status = 'running' AND lease_expires_at <= ?3)) \
                     RETURNING {}",
                    JOBS.columns
                );
                match tx
                    .query_row(&sql, params![key, worker, now, expires], JOBS.from_row)
                    .optional()?
                {
                    Some(job) => Ok(Ok(job)),
                    None => Ok(Err(Presence::read(tx, &JOBS, &key)?)),
                }
            })
            .await?;

        match outcome {
            Ok(job) => {
                debug!("Worker {} locked job {}", worker_id, id);
                Ok(job)
            }
            Err(presence) if presence.is_gone() => Err(SchedulerError::not_found(JOBS.kind, id)),
            Err(_) => Err(SchedulerError::JobAcquisition(format!(
                "job '{}' is locked or no longer pending",
                id
            ))),
        }
    }

    async fn update(&self, id: Uuid, expected_version: i64, update: JobUpdate) -> Result<Job, SchedulerError> {
        let mut patch = Patch::new();
        if let Some(status) = update.status {
            patch = patch.set("status", status.as_str().to_string());
        }
        if let Some(output) = &update.output {
            patch = patch.set("output", output.to_string());
        }

        let now = millis(self.db.now());
        let key = id.to_string();
        let outcome = self
            .db
            .write(move |tx| update_if_version(tx, &JOBS, &key, expected_version, &patch, now))
            .await?;

        let job = outcome.into_result(JOBS.kind, &id.to_string(), expected_version)?;
        debug!("Updated job {} to version {} ({})", job.id, job.version, job.status);
        Ok(job)
    }

    async fn heartbeat(&self, id: Uuid, worker_id: &str) -> Result<Job, SchedulerError> {
        let now = self.db.now();
        let expires = opt_millis(self.db.lease_expiry(now));
        let now = millis(now);
        let key = id.to_string();
        let worker = worker_id.to_string();

        let outcome = self
            .db
            .write(move |tx| protocol::heartbeat(tx, &JOBS, &key, &worker, now, expires))
            .await?;
        outcome.map_err(|presence| guard_error(JOBS.kind, &id.to_string(), worker_id, presence))
    }

    async fn release(&self, id: Uuid) -> Result<Job, SchedulerError> {
        let now = millis(self.db.now());
        let key = id.to_string();

        let outcome = self
            .db
            .write(move |tx| protocol::release(tx, &JOBS, &key, now, REVERT_RUNNING))
            .await?;

        let job = outcome.into_result(JOBS.kind, &id.to_string())?;
        debug!("Released job {} ({})", job.id, job.status);
        Ok(job)
    }

    async fn release_held(&self, id: Uuid, worker_id: &str) -> Result<Job, SchedulerError> {
        let now = millis(self.db.now());
        let key = id.to_string();
        let worker = worker_id.to_string();

        let outcome = self
            .db
            .write(move |tx| protocol::release_held(tx, &JOBS, &key, &worker, now, REVERT_RUNNING))
            .await?;

        let job = outcome.map_err(|presence| guard_error(JOBS.kind, &id.to_string(), worker_id, presence))?;
        debug!("Worker {} released job {} ({})", worker_id, job.id, job.status);
        Ok(job)
    }

    async fn list(&self, project_id: &str, cursor: Option<&str>, limit: u32) -> Result<Page<Job>, SchedulerError> {
        let after = cursor.map(Cursor::decode).transpose()?;
        let project = project_id.to_string();
        self.db
            .read(move |conn| protocol::list(conn, &JOBS, &project, after.as_ref(), limit))
            .await
    }

    async fn delete_by_project(&self, project_id: &str) -> Result<usize, SchedulerError> {
        let now = millis(self.db.now());
        let project = project_id.to_string();
        let removed = self
            .db
            .write(move |tx| protocol::delete_by_project(tx, &JOBS, &project, now))
            .await?;

        debug!("Deleted {} jobs of project {}", removed, project_id);
        Ok(removed)
    }

    async fn reap_expired(&self) -> Result<Reaped, SchedulerError> {
        let now = millis(self.db.now());
        let reaped = self
            .db
            .write(move |tx| protocol::reap(tx, &JOBS, now, REVERT_RUNNING))
            .await?;

        if reaped.released > 0 {
            warn!("Reaped {} job locks with expired leases", reaped.released);
        }
        Ok(reaped)
    }
}

#[cfg(test)]
#[path = "jobs_tests.rs"]
mod tests;
