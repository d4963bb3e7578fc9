//! Cron-driven recurring rules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cron::CronSchedule;

/// A trigger that reschedules itself from a cron expression after each run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecurringJobRule {
    pub id: Uuid,
    pub project_id: String,
    pub input: serde_json::Value,
    pub cron: String,
    pub next_run_at: DateTime<Utc>,
    pub disabled: bool,
    /// Error from the most recent run, cleared by a successful one.
    pub last_error: Option<String>,
    pub last_processed_at: Option<DateTime<Utc>>,
    pub worker_id: Option<String>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub locked_at: Option<DateTime<Utc>>,
    pub lease_expires_at: Option<DateTime<Utc>>,
}

impl RecurringJobRule {
    pub fn is_locked(&self) -> bool {
        self.worker_id.is_some()
    }
}

/// Data for a new recurring rule. The first `next_run_at` is computed by the
/// store from its clock.
#[derive(Debug, Clone)]
pub struct NewRecurringJobRule {
    pub project_id: String,
    pub input: serde_json::Value,
    pub cron: CronSchedule,
}

impl NewRecurringJobRule {
    pub fn new(project_id: impl Into<String>, input: serde_json::Value, cron: CronSchedule) -> Self {
        Self {
            project_id: project_id.into(),
            input,
            cron,
        }
    }
}

/// Partial write made by the lock holder.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecurringJobRuleUpdate {
    pub input: Option<serde_json::Value>,
    /// `Some(None)` clears the recorded error.
    pub last_error: Option<Option<String>>,
}

impl RecurringJobRuleUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_input(mut self, input: serde_json::Value) -> Self {
        self.input = Some(input);
        self
    }

    pub fn with_last_error(mut self, error: Option<String>) -> Self {
        self.last_error = Some(error);
        self
    }
}
