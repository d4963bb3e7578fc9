//! Ad-hoc jobs.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SchedulerError;

/// Job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting to be claimed.
    Pending,
    /// Claimed by a worker.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Completed and failed jobs are never handed out again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(SchedulerError::BadRequest(format!("unknown job status '{}'", other))),
        }
    }
}

/// Why a job exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobReason {
    /// Created directly through the create-job use case.
    Api,
    /// Fired by a one-time scheduled rule.
    ScheduledJobRule { rule_id: Uuid },
    /// Fired by a cron rule.
    RecurringJobRule { rule_id: Uuid },
    /// Created by an external trigger source on an incoming event.
    ExternalTrigger {
        source: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        event_id: Option<String>,
    },
}

/// A unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub project_id: String,
    pub reason: JobReason,
    /// Opaque payload handed to the worker.
    pub input: serde_json::Value,
    /// Result written by the worker.
    pub output: Option<serde_json::Value>,
    pub status: JobStatus,
    /// Holder of the lock, if any.
    pub worker_id: Option<String>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub locked_at: Option<DateTime<Utc>>,
    /// When the current lock is considered abandoned. `None` while unlocked
    /// or when leases are disabled.
    pub lease_expires_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn is_locked(&self) -> bool {
        self.worker_id.is_some()
    }
}

/// Data for a new job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub project_id: String,
    pub reason: JobReason,
    pub input: serde_json::Value,
}

impl NewJob {
    pub fn new(project_id: impl Into<String>, reason: JobReason, input: serde_json::Value) -> Self {
        Self {
            project_id: project_id.into(),
            reason,
            input,
        }
    }
}

/// Partial write made by the lock holder.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub output: Option<serde_json::Value>,
}

impl JobUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_output(mut self, output: serde_json::Value) -> Self {
        self.output = Some(output);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.output.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip_through_str() {
        for status in [JobStatus::Pending, JobStatus::Running, JobStatus::Completed, JobStatus::Failed] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("done".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
    }

    #[test]
    fn test_reason_serialization_is_tagged() {
        let rule_id = Uuid::new_v4();
        let json = serde_json::to_value(JobReason::RecurringJobRule { rule_id }).unwrap();
        assert_eq!(json["type"], "recurring_job_rule");
        assert_eq!(json["rule_id"], rule_id.to_string());

        let trigger: JobReason = serde_json::from_value(serde_json::json!({
            "type": "external_trigger",
            "source": "github"
        }))
        .unwrap();
        assert_eq!(
            trigger,
            JobReason::ExternalTrigger {
                source: "github".to_string(),
                event_id: None
            }
        );
    }

    #[test]
    fn test_job_update_builder() {
        assert!(JobUpdate::new().is_empty());
        let update = JobUpdate::new()
            .with_status(JobStatus::Completed)
            .with_output(serde_json::json!({"ok": true}));
        assert_eq!(update.status, Some(JobStatus::Completed));
        assert!(!update.is_empty());
    }
}
