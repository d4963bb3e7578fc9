//! Request payloads.

use serde::{Deserialize, Serialize};

use cadence_core::JobReason;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateJobRequest {
    pub project_id: String,
    /// Defaults to [`JobReason::Api`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<JobReason>,
    #[serde(default)]
    pub input: serde_json::Value,
}

impl CreateJobRequest {
    pub fn new(project_id: impl Into<String>, input: serde_json::Value) -> Self {
        Self {
            project_id: project_id.into(),
            reason: None,
            input,
        }
    }

    pub fn with_reason(mut self, reason: JobReason) -> Self {
        self.reason = Some(reason);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateScheduledJobRuleRequest {
    pub project_id: String,
    #[serde(default)]
    pub input: serde_json::Value,
    /// ISO-8601 timestamp with offset.
    pub scheduled_time: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateRecurringJobRuleRequest {
    pub project_id: String,
    #[serde(default)]
    pub input: serde_json::Value,
    pub cron: String,
}

/// One page of a project's items.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListRequest {
    pub project_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

impl ListRequest {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            ..Default::default()
        }
    }

    pub fn after(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}
