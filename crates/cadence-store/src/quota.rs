//! Per-project quota counters.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use cadence_core::SchedulerError;

use crate::codec::millis;
use crate::db::Database;

/// What a quota unit pays for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaKind {
    /// Creating, deleting or toggling items.
    ProjectAction,
    /// Executing one job.
    RunJob,
}

impl QuotaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuotaKind::ProjectAction => "project_action",
            QuotaKind::RunJob => "run_job",
        }
    }
}

impl fmt::Display for QuotaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuotaKind {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "project_action" => Ok(QuotaKind::ProjectAction),
            "run_job" => Ok(QuotaKind::RunJob),
            other => Err(SchedulerError::BadRequest(format!("unknown quota kind '{}'", other))),
        }
    }
}

/// Result of consuming one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaOutcome {
    /// A unit was taken; this many remain.
    Consumed(i64),
    /// The project has no counter for this kind.
    Unmetered,
    /// The counter is at zero.
    Exhausted,
}

#[async_trait]
pub trait QuotaStore: Send + Sync {
    /// Set the remaining allowance, creating the counter if needed.
    async fn set_quota(&self, project_id: &str, kind: QuotaKind, remaining: u32) -> Result<(), SchedulerError>;

    /// Drop the counter, making the kind unmetered again.
    async fn clear_quota(&self, project_id: &str, kind: QuotaKind) -> Result<bool, SchedulerError>;

    async fn remaining(&self, project_id: &str, kind: QuotaKind) -> Result<Option<i64>, SchedulerError>;

    /// Atomically take one unit if any is left.
    async fn consume(&self, project_id: &str, kind: QuotaKind) -> Result<QuotaOutcome, SchedulerError>;
}

#[derive(Clone)]
pub struct SqliteQuotaStore {
    db: Database,
}

impl SqliteQuotaStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl QuotaStore for SqliteQuotaStore {
    async fn set_quota(&self, project_id: &str, kind: QuotaKind, remaining: u32) -> Result<(), SchedulerError> {
        let now = millis(self.db.now());
        let project = project_id.to_string();
        self.db
            .write(move |tx| {
                tx.execute(
                    "INSERT INTO project_quotas (project_id, kind, remaining, updated_at) \
                     VALUES (?1, ?2, ?3, ?4) \
                     ON CONFLICT (project_id, kind) DO UPDATE \
                     SET remaining = excluded.remaining, updated_at = excluded.updated_at",
                    params![project, kind.as_str(), remaining, now],
                )
            })
            .await?;

        info!("Set {} quota of project {} to {}", kind, project_id, remaining);
        Ok(())
    }

    async fn clear_quota(&self, project_id: &str, kind: QuotaKind) -> Result<bool, SchedulerError> {
        let project = project_id.to_string();
        let removed = self
            .db
            .write(move |tx| {
                tx.execute(
                    "DELETE FROM project_quotas WHERE project_id = ?1 AND kind = ?2",
                    params![project, kind.as_str()],
                )
            })
            .await?;
        Ok(removed > 0)
    }

    async fn remaining(&self, project_id: &str, kind: QuotaKind) -> Result<Option<i64>, SchedulerError> {
        let project = project_id.to_string();
        self.db
            .read(move |conn| {
                conn.query_row(
                    "SELECT remaining FROM project_quotas WHERE project_id = ?1 AND kind = ?2",
                    params![project, kind.as_str()],
                    |row| row.get(0),
                )
                .optional()
            })
            .await
    }

    async fn consume(&self, project_id: &str, kind: QuotaKind) -> Result<QuotaOutcome, SchedulerError> {
        let now = millis(self.db.now());
        let project = project_id.to_string();

        let outcome = self
            .db
            .write(move |tx| {
                let remaining = tx
                    .query_row(
                        "UPDATE project_quotas SET remaining = remaining - 1, updated_at = ?3 \
                         WHERE project_id = ?1 AND kind = ?2 AND remaining > 0 \
                         RETURNING remaining",
                        params![project, kind.as_str(), now],
                        |row| row.get::<_, i64>(0),
                    )
                    .optional()?;
                if let Some(remaining) = remaining {
                    return Ok(QuotaOutcome::Consumed(remaining));
                }

                let metered = tx
                    .prepare_cached("SELECT 1 FROM project_quotas WHERE project_id = ?1 AND kind = ?2")?
                    .exists(params![project, kind.as_str()])?;
                Ok(if metered {
                    QuotaOutcome::Exhausted
                } else {
                    QuotaOutcome::Unmetered
                })
            })
            .await?;

        debug!("Consumed {} quota of project {}: {:?}", kind, project_id, outcome);
        Ok(outcome)
    }
}
