//! One-time scheduled rules.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SchedulerError;

/// Scheduled rule status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduledJobRuleStatus {
    /// Waiting for its time.
    Pending,
    /// Claimed by a worker.
    Processing,
    /// Fired. Terminal.
    Triggered,
}

impl ScheduledJobRuleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduledJobRuleStatus::Pending => "pending",
            ScheduledJobRuleStatus::Processing => "processing",
            ScheduledJobRuleStatus::Triggered => "triggered",
        }
    }
}

impl fmt::Display for ScheduledJobRuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScheduledJobRuleStatus {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ScheduledJobRuleStatus::Pending),
            "processing" => Ok(ScheduledJobRuleStatus::Processing),
            "triggered" => Ok(ScheduledJobRuleStatus::Triggered),
            other => Err(SchedulerError::BadRequest(format!(
                "unknown scheduled rule status '{}'",
                other
            ))),
        }
    }
}

/// A trigger bound to one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledJobRule {
    pub id: Uuid,
    pub project_id: String,
    pub input: serde_json::Value,
    /// Fixed at creation.
    pub next_run_at: DateTime<Utc>,
    pub status: ScheduledJobRuleStatus,
    /// Set when the rule fires; the rule is terminal from then on.
    pub processed_at: Option<DateTime<Utc>>,
    pub output: Option<serde_json::Value>,
    pub worker_id: Option<String>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub locked_at: Option<DateTime<Utc>>,
    pub lease_expires_at: Option<DateTime<Utc>>,
}

impl ScheduledJobRule {
    pub fn is_locked(&self) -> bool {
        self.worker_id.is_some()
    }

    pub fn is_processed(&self) -> bool {
        self.processed_at.is_some()
    }
}

/// Data for a new scheduled rule.
#[derive(Debug, Clone)]
pub struct NewScheduledJobRule {
    pub project_id: String,
    pub input: serde_json::Value,
    pub next_run_at: DateTime<Utc>,
}

impl NewScheduledJobRule {
    pub fn new(
        project_id: impl Into<String>,
        input: serde_json::Value,
        next_run_at: DateTime<Utc>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            input,
            next_run_at,
        }
    }
}

/// Partial write made by the lock holder.
///
/// Writing [`ScheduledJobRuleStatus::Triggered`] also stamps `processed_at`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScheduledJobRuleUpdate {
    pub status: Option<ScheduledJobRuleStatus>,
    pub output: Option<serde_json::Value>,
}

impl ScheduledJobRuleUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: ScheduledJobRuleStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_output(mut self, output: serde_json::Value) -> Self {
        self.output = Some(output);
        self
    }
}
