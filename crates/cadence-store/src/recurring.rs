//! Recurring (cron) rule store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info, warn};
use uuid::Uuid;

use cadence_core::{
    CronSchedule, Cursor, NewRecurringJobRule, Page, RecurringJobRule, RecurringJobRuleUpdate, SchedulerError,
};

use crate::cas::{update_if_version, update_unlocked_if_version, Patch};
use crate::codec::{millis, opt_millis, RECURRING_RULES};
use crate::db::Database;
use crate::protocol::{self, guard_error, settle_held, settle_unreleased, Presence, Reaped, ReleaseOutcome, CLEAR_LOCK};

#[async_trait]
pub trait RecurringJobRuleStore: Send + Sync {
    /// Insert a rule whose first run is the next cron occurrence after now.
    async fn create(&self, rule: NewRecurringJobRule) -> Result<RecurringJobRule, SchedulerError>;

    async fn fetch(&self, id: Uuid) -> Result<Option<RecurringJobRule>, SchedulerError>;

    /// Claim the earliest due, enabled rule.
    async fn poll(&self, worker_id: &str) -> Result<Option<RecurringJobRule>, SchedulerError>;

    async fn update(
        &self,
        id: Uuid,
        expected_version: i64,
        update: RecurringJobRuleUpdate,
    ) -> Result<RecurringJobRule, SchedulerError>;

    async fn heartbeat(&self, id: Uuid, worker_id: &str) -> Result<RecurringJobRule, SchedulerError>;

    /// Clear the lock and schedule the next run.
    ///
    /// `error` is recorded as `last_error`; `None` clears it.
    async fn release(&self, id: Uuid, error: Option<String>) -> Result<RecurringJobRule, SchedulerError>;

    /// [`release`](Self::release), but only while `worker_id` holds the rule.
    async fn release_held(
        &self,
        id: Uuid,
        worker_id: &str,
        error: Option<String>,
    ) -> Result<RecurringJobRule, SchedulerError>;

    /// Enable or disable an unlocked rule. Re-enabling a rule whose next run
    /// is in the past moves it to the next occurrence after now.
    async fn toggle(&self, id: Uuid, disabled: bool) -> Result<RecurringJobRule, SchedulerError>;

    async fn list(
        &self,
        project_id: &str,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<Page<RecurringJobRule>, SchedulerError>;

    async fn delete(&self, id: Uuid) -> Result<bool, SchedulerError>;

    async fn delete_by_project(&self, project_id: &str) -> Result<usize, SchedulerError>;

    async fn reap_expired(&self) -> Result<Reaped, SchedulerError>;
}

#[derive(Clone)]
pub struct SqliteRecurringJobRuleStore {
    db: Database,
}

impl SqliteRecurringJobRuleStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

/// Where a released rule runs next.
enum NextRun {
    At(DateTime<Utc>),
    /// No occurrence left; the rule is disabled with this message.
    Exhausted(String),
}

fn next_run(rule: &RecurringJobRule, now: DateTime<Utc>) -> NextRun {
    let schedule = match CronSchedule::parse(&rule.cron) {
        Ok(schedule) => schedule,
        Err(e) => return NextRun::Exhausted(e.to_string()),
    };
    match schedule.next_after(now.max(rule.next_run_at)) {
        Some(at) => NextRun::At(at),
        None => NextRun::Exhausted(format!("cron expression '{}' has no further occurrences", rule.cron)),
    }
}

fn release_locked(
    conn: &Connection,
    rule: &RecurringJobRule,
    now: DateTime<Utc>,
    error: Option<String>,
) -> rusqlite::Result<RecurringJobRule> {
    let (next_run_at, disabled, last_error) = match next_run(rule, now) {
        NextRun::At(at) => (at, rule.disabled, error),
        NextRun::Exhausted(reason) => {
            let message = match error {
                Some(e) => format!("{}; {}", e, reason),
                None => reason,
            };
            (rule.next_run_at, true, Some(message))
        }
    };

    let sql = format!(
        "UPDATE recurring_job_rules SET {}, version = version + 1, updated_at = ?2, \
             last_processed_at = ?2, next_run_at = ?3, disabled = ?4, last_error = ?5 \
         WHERE id = ?1 \
         RETURNING {}",
        CLEAR_LOCK, RECURRING_RULES.columns
    );
    conn.query_row(
        &sql,
        params![
            rule.id.to_string(),
            millis(now),
            millis(next_run_at),
            disabled,
            last_error
        ],
        RECURRING_RULES.from_row,
    )
}

fn log_released(rule: &RecurringJobRule) {
    if rule.disabled {
        if let Some(reason) = &rule.last_error {
            info!("Recurring rule {} is disabled: {}", rule.id, reason);
        }
    }
    debug!("Released recurring rule {}, next run {}", rule.id, rule.next_run_at);
}

#[async_trait]
impl RecurringJobRuleStore for SqliteRecurringJobRuleStore {
    async fn create(&self, rule: NewRecurringJobRule) -> Result<RecurringJobRule, SchedulerError> {
        let now = self.db.now();
        let next_run_at = rule.cron.next_after(now).ok_or_else(|| {
            SchedulerError::BadRequest(format!("cron expression '{}' never fires", rule.cron))
        })?;
        let id = Uuid::new_v4().to_string();
        let now = millis(now);

        let rule = self
            .db
            .write(move |tx| {
                let sql = format!(
                    "INSERT INTO recurring_job_rules \
                         (id, project_id, input, cron, next_run_at, disabled, version, created_at, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, 0, 1, ?6, ?6) \
                     RETURNING {}",
                    RECURRING_RULES.columns
                );
                tx.query_row(
                    &sql,
                    params![
                        id,
                        rule.project_id,
                        rule.input.to_string(),
                        rule.cron.as_str(),
                        millis(next_run_at),
                        now
                    ],
                    RECURRING_RULES.from_row,
                )
            })
            .await?;

        debug!(
            "Created recurring rule {} in project {} ('{}', first run {})",
            rule.id, rule.project_id, rule.cron, rule.next_run_at
        );
        Ok(rule)
    }

    async fn fetch(&self, id: Uuid) -> Result<Option<RecurringJobRule>, SchedulerError> {
        self.db
            .read(move |conn| protocol::fetch(conn, &RECURRING_RULES, &id.to_string()))
            .await
    }

    async fn poll(&self, worker_id: &str) -> Result<Option<RecurringJobRule>, SchedulerError> {
        let now = self.db.now();
        let expires = opt_millis(self.db.lease_expiry(now));
        let now = millis(now);
        let worker = worker_id.to_string();

        let rule = self
            .db
            .write(move |tx| {
                let sql = format!(
                    "UPDATE recurring_job_rules SET worker_id = ?1, locked_at = ?2, \
                         lease_expires_at = ?3, version = version + 1, updated_at = ?2 \
                     WHERE id = ( \
                         SELECT id FROM recurring_job_rules \
                         WHERE deleted_at IS NULL AND disabled = 0 AND next_run_at <= ?2 \
                           AND (worker_id IS NULL OR lease_expires_at <= ?2) \
                         ORDER BY next_run_at ASC, id ASC \
                         LIMIT 1) \
                     RETURNING {}",
                    RECURRING_RULES.columns
                );
                tx.query_row(&sql, params![worker, now, expires], RECURRING_RULES.from_row)
                    .optional()
            })
            .await?;

        if let Some(rule) = &rule {
            debug!("Worker {} claimed recurring rule {} due {}", worker_id, rule.id, rule.next_run_at);
        }
        Ok(rule)
    }

    async fn update(
        &self,
        id: Uuid,
        expected_version: i64,
        update: RecurringJobRuleUpdate,
    ) -> Result<RecurringJobRule, SchedulerError> {
        let now = millis(self.db.now());

        let mut patch = Patch::new();
        if let Some(input) = &update.input {
            patch = patch.set("input", input.to_string());
        }
        if let Some(last_error) = update.last_error {
            patch = patch.set("last_error", last_error);
        }

        let key = id.to_string();
        let outcome = self
            .db
            .write(move |tx| update_if_version(tx, &RECURRING_RULES, &key, expected_version, &patch, now))
            .await?;

        let rule = outcome.into_result(RECURRING_RULES.kind, &id.to_string(), expected_version)?;
        debug!("Updated recurring rule {} to version {}", rule.id, rule.version);
        Ok(rule)
    }

    async fn heartbeat(&self, id: Uuid, worker_id: &str) -> Result<RecurringJobRule, SchedulerError> {
        let now = self.db.now();
        let expires = opt_millis(self.db.lease_expiry(now));
        let now = millis(now);
        let key = id.to_string();
        let worker = worker_id.to_string();

        let outcome = self
            .db
            .write(move |tx| protocol::heartbeat(tx, &RECURRING_RULES, &key, &worker, now, expires))
            .await?;
        outcome.map_err(|presence| guard_error(RECURRING_RULES.kind, &id.to_string(), worker_id, presence))
    }

    async fn release(&self, id: Uuid, error: Option<String>) -> Result<RecurringJobRule, SchedulerError> {
        let now = self.db.now();
        let key = id.to_string();

        let outcome = self
            .db
            .write(move |tx| match Presence::read(tx, &RECURRING_RULES, &key)? {
                Presence::Locked { .. } => match protocol::fetch(tx, &RECURRING_RULES, &key)? {
                    Some(rule) => Ok(ReleaseOutcome::Released(release_locked(tx, &rule, now, error)?)),
                    None => Ok(ReleaseOutcome::Missing),
                },
                _ => settle_unreleased(tx, &RECURRING_RULES, &key),
            })
            .await?;

        let rule = outcome.into_result(RECURRING_RULES.kind, &id.to_string())?;
        log_released(&rule);
        Ok(rule)
    }

    async fn release_held(
        &self,
        id: Uuid,
        worker_id: &str,
        error: Option<String>,
    ) -> Result<RecurringJobRule, SchedulerError> {
        let now = self.db.now();
        let key = id.to_string();
        let worker = worker_id.to_string();

        let outcome = self
            .db
            .write(move |tx| match Presence::read(tx, &RECURRING_RULES, &key)? {
                Presence::Locked { worker_id: holder, .. } if holder == worker => {
                    match protocol::fetch(tx, &RECURRING_RULES, &key)? {
                        Some(rule) => Ok(Ok(release_locked(tx, &rule, now, error)?)),
                        None => Ok(Err(Presence::Missing)),
                    }
                }
                _ => Ok(Err(settle_held(tx, &RECURRING_RULES, &key)?)),
            })
            .await?;

        let rule =
            outcome.map_err(|presence| guard_error(RECURRING_RULES.kind, &id.to_string(), worker_id, presence))?;
        log_released(&rule);
        Ok(rule)
    }

    async fn toggle(&self, id: Uuid, disabled: bool) -> Result<RecurringJobRule, SchedulerError> {
        let now = self.db.now();
        let key = id.to_string();

        let outcome = self
            .db
            .write(move |tx| {
                let Some(rule) = protocol::fetch(tx, &RECURRING_RULES, &key)? else {
                    return Ok(None);
                };

                let next_run_at = if !disabled && rule.next_run_at < now {
                    CronSchedule::parse(&rule.cron)
                        .ok()
                        .and_then(|schedule| schedule.next_after(now))
                        .unwrap_or(rule.next_run_at)
                } else {
                    rule.next_run_at
                };

                let patch = Patch::new()
                    .set("disabled", disabled)
                    .set("next_run_at", millis(next_run_at));
                update_unlocked_if_version(tx, &RECURRING_RULES, &key, rule.version, &patch, millis(now))
                    .map(|outcome| Some((rule.version, outcome)))
            })
            .await?;

        let Some((expected, outcome)) = outcome else {
            return Err(SchedulerError::not_found(RECURRING_RULES.kind, id));
        };
        let rule = outcome.into_result(RECURRING_RULES.kind, &id.to_string(), expected)?;

        info!(
            "Recurring rule {} {}",
            rule.id,
            if rule.disabled { "disabled" } else { "enabled" }
        );
        Ok(rule)
    }

    async fn list(
        &self,
        project_id: &str,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<Page<RecurringJobRule>, SchedulerError> {
        let after = cursor.map(Cursor::decode).transpose()?;
        let project = project_id.to_string();
        self.db
            .read(move |conn| protocol::list(conn, &RECURRING_RULES, &project, after.as_ref(), limit))
            .await
    }

    async fn delete(&self, id: Uuid) -> Result<bool, SchedulerError> {
        let now = millis(self.db.now());
        let key = id.to_string();
        let deleted = self
            .db
            .write(move |tx| protocol::delete(tx, &RECURRING_RULES, &key, now))
            .await?;

        if deleted {
            debug!("Deleted recurring rule {}", id);
        }
        Ok(deleted)
    }

    async fn delete_by_project(&self, project_id: &str) -> Result<usize, SchedulerError> {
        let now = millis(self.db.now());
        let project = project_id.to_string();
        let removed = self
            .db
            .write(move |tx| protocol::delete_by_project(tx, &RECURRING_RULES, &project, now))
            .await?;

        debug!("Deleted {} recurring rules of project {}", removed, project_id);
        Ok(removed)
    }

    async fn reap_expired(&self) -> Result<Reaped, SchedulerError> {
        let now = millis(self.db.now());
        let reaped = self
            .db
            .write(move |tx| protocol::reap(tx, &RECURRING_RULES, now, ""))
            .await?;

        if reaped.released > 0 {
            warn!("Reaped {} recurring rule locks with expired leases", reaped.released);
        }
        Ok(reaped)
    }
}

#[cfg(test)]
#[path = "recurring_tests.rs"]
mod tests;
