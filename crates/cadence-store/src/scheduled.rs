//! Scheduled (one-shot) rule store.

use async_trait::async_trait;
use rusqlite::{params, OptionalExtension};
use tracing::{debug, warn};
use uuid::Uuid;

use cadence_core::{
    Cursor, NewScheduledJobRule, Page, ScheduledJobRule, ScheduledJobRuleStatus, ScheduledJobRuleUpdate,
    SchedulerError,
};

use crate::cas::{update_if_version, Patch};
use crate::codec::{millis, opt_millis, SCHEDULED_RULES};
use crate::db::Database;
use crate::protocol::{self, guard_error, Reaped};

/// A rule whose holder gave up without triggering it becomes pending again.
const REVERT_PROCESSING: &str =
    ", status = CASE WHEN status = 'processing' THEN 'pending' ELSE status END";

#[async_trait]
pub trait ScheduledJobRuleStore: Send + Sync {
    async fn create(&self, rule: NewScheduledJobRule) -> Result<ScheduledJobRule, SchedulerError>;

    async fn fetch(&self, id: Uuid) -> Result<Option<ScheduledJobRule>, SchedulerError>;

    /// Claim the earliest due, unprocessed rule.
    async fn poll(&self, worker_id: &str) -> Result<Option<ScheduledJobRule>, SchedulerError>;

    async fn update(
        &self,
        id: Uuid,
        expected_version: i64,
        update: ScheduledJobRuleUpdate,
    ) -> Result<ScheduledJobRule, SchedulerError>;

    async fn heartbeat(&self, id: Uuid, worker_id: &str) -> Result<ScheduledJobRule, SchedulerError>;

    async fn release(&self, id: Uuid) -> Result<ScheduledJobRule, SchedulerError>;

    /// Clear the lock only while `worker_id` holds it.
    async fn release_held(&self, id: Uuid, worker_id: &str) -> Result<ScheduledJobRule, SchedulerError>;

    async fn list(
        &self,
        project_id: &str,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<Page<ScheduledJobRule>, SchedulerError>;

    /// `false` if no such rule exists.
    async fn delete(&self, id: Uuid) -> Result<bool, SchedulerError>;

    async fn delete_by_project(&self, project_id: &str) -> Result<usize, SchedulerError>;

    async fn reap_expired(&self) -> Result<Reaped, SchedulerError>;
}

#[derive(Clone)]
pub struct SqliteScheduledJobRuleStore {
    db: Database,
}

impl SqliteScheduledJobRuleStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ScheduledJobRuleStore for SqliteScheduledJobRuleStore {
    async fn create(&self, rule: NewScheduledJobRule) -> Result<ScheduledJobRule, SchedulerError> {
        let id = Uuid::new_v4().to_string();
        let now = millis(self.db.now());

        let rule = self
            .db
            .write(move |tx| {
                let sql = format!(
                    "INSERT INTO scheduled_job_rules \
                         (id, project_id, input, next_run_at, status, version, created_at, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, 'pending', 1, ?5, ?5) \
                     RETURNING {}",
                    SCHEDULED_RULES.columns
                );
                tx.query_row(
                    &sql,
                    params![
                        id,
                        rule.project_id,
                        rule.input.to_string(),
                        millis(rule.next_run_at),
                        now
                    ],
                    SCHEDULED_RULES.from_row,
                )
            })
            .await?;

        debug!(
            "Created scheduled rule {} in project {} for {}",
            rule.id, rule.project_id, rule.next_run_at
        );
        Ok(rule)
    }

    async fn fetch(&self, id: Uuid) -> Result<Option<ScheduledJobRule>, SchedulerError> {
        self.db
            .read(move |conn| protocol::fetch(conn, &SCHEDULED_RULES, &id.to_string()))
            .await
    }

    async fn poll(&self, worker_id: &str) -> Result<Option<ScheduledJobRule>, SchedulerError> {
        let now = self.db.now();
        let expires = opt_millis(self.db.lease_expiry(now));
        let now = millis(now);
        let worker = worker_id.to_string();

        let rule = self
            .db
            .write(move |tx| {
                let sql = format!(
                    "UPDATE scheduled_job_rules SET status = 'processing', worker_id = ?1, locked_at = ?2, \
                         lease_expires_at = ?3, version = version + 1, updated_at = ?2 \
                     WHERE id = ( \
                         SELECT id FROM scheduled_job_rules \
                         WHERE deleted_at IS NULL AND processed_at IS NULL AND next_run_at <= ?2 \
                           AND ((status = 'pending' AND worker_id IS NULL) \
                             OR (worker_id IS NOT NULL AND lease_expires_at <= ?2)) \
                         ORDER BY next_run_at ASC, id ASC \
                         LIMIT 1) \
                     RETURNING {}",
                    SCHEDULED_RULES.columns
                );
                tx.query_row(&sql, params![worker, now, expires], SCHEDULED_RULES.from_row)
                    .optional()
            })
            .await?;

        if let Some(rule) = &rule {
            debug!("Worker {} claimed scheduled rule {}", worker_id, rule.id);
        }
        Ok(rule)
    }

    async fn update(
        &self,
        id: Uuid,
        expected_version: i64,
        update: ScheduledJobRuleUpdate,
    ) -> Result<ScheduledJobRule, SchedulerError> {
        let now = millis(self.db.now());

        let mut patch = Patch::new();
        if let Some(status) = update.status {
            patch = patch.set("status", status.as_str().to_string());
            if status == ScheduledJobRuleStatus::Triggered {
                patch = patch.set("processed_at", now);
            }
        }
        if let Some(output) = &update.output {
            patch = patch.set("output", output.to_string());
        }

        let key = id.to_string();
        let outcome = self
            .db
            .write(move |tx| update_if_version(tx, &SCHEDULED_RULES, &key, expected_version, &patch, now))
            .await?;

        let rule = outcome.into_result(SCHEDULED_RULES.kind, &id.to_string(), expected_version)?;
        debug!("Updated scheduled rule {} to version {} ({})", rule.id, rule.version, rule.status);
        Ok(rule)
    }

    async fn heartbeat(&self, id: Uuid, worker_id: &str) -> Result<ScheduledJobRule, SchedulerError> {
        let now = self.db.now();
        let expires = opt_millis(self.db.lease_expiry(now));
        let now = millis(now);
        let key = id.to_string();
        let worker = worker_id.to_string();

        let outcome = self
            .db
            .write(move |tx| protocol::heartbeat(tx, &SCHEDULED_RULES, &key, &worker, now, expires))
            .await?;
        outcome.map_err(|presence| guard_error(SCHEDULED_RULES.kind, &id.to_string(), worker_id, presence))
    }

    async fn release(&self, id: Uuid) -> Result<ScheduledJobRule, SchedulerError> {
        let now = millis(self.db.now());
        let key = id.to_string();

        let outcome = self
            .db
            .write(move |tx| protocol::release(tx, &SCHEDULED_RULES, &key, now, REVERT_PROCESSING))
            .await?;

        let rule = outcome.into_result(SCHEDULED_RULES.kind, &id.to_string())?;
        debug!("Released scheduled rule {} ({})", rule.id, rule.status);
        Ok(rule)
    }

    async fn release_held(&self, id: Uuid, worker_id: &str) -> Result<ScheduledJobRule, SchedulerError> {
        let now = millis(self.db.now());
        let key = id.to_string();
        let worker = worker_id.to_string();

        let outcome = self
            .db
            .write(move |tx| {
                protocol::release_held(tx, &SCHEDULED_RULES, &key, &worker, now, REVERT_PROCESSING)
            })
            .await?;

        outcome.map_err(|presence| guard_error(SCHEDULED_RULES.kind, &id.to_string(), worker_id, presence))
    }

    async fn list(
        &self,
        project_id: &str,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<Page<ScheduledJobRule>, SchedulerError> {
        let after = cursor.map(Cursor::decode).transpose()?;
        let project = project_id.to_string();
        self.db
            .read(move |conn| protocol::list(conn, &SCHEDULED_RULES, &project, after.as_ref(), limit))
            .await
    }

    async fn delete(&self, id: Uuid) -> Result<bool, SchedulerError> {
        let now = millis(self.db.now());
        let key = id.to_string();
        let deleted = self
            .db
            .write(move |tx| protocol::delete(tx, &SCHEDULED_RULES, &key, now))
            .await?;

        if deleted {
            debug!("Deleted scheduled rule {}", id);
        }
        Ok(deleted)
    }

    async fn delete_by_project(&self, project_id: &str) -> Result<usize, SchedulerError> {
        let now = millis(self.db.now());
        let project = project_id.to_string();
        let removed = self
            .db
            .write(move |tx| protocol::delete_by_project(tx, &SCHEDULED_RULES, &project, now))
            .await?;

        debug!("Deleted {} scheduled rules of project {}", removed, project_id);
        Ok(removed)
    }

    async fn reap_expired(&self) -> Result<Reaped, SchedulerError> {
        let now = millis(self.db.now());
        let reaped = self
            .db
            .write(move |tx| protocol::reap(tx, &SCHEDULED_RULES, now, REVERT_PROCESSING))
            .await?;

        if reaped.released > 0 {
            warn!("Reaped {} scheduled rule locks with expired leases", reaped.released);
        }
        Ok(reaped)
    }
}

#[cfg(test)]
#[path = "scheduled_tests.rs"]
mod tests;
