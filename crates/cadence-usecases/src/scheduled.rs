//! Scheduled rule use cases.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use cadence_config::PaginationConfig;
use cadence_core::{NewScheduledJobRule, Page, ScheduledJobRule, SchedulerError};
use cadence_gates::CallerIdentity;
use cadence_store::ScheduledJobRuleStore;

use crate::guard::Guard;
use crate::request::{CreateScheduledJobRuleRequest, ListRequest};

#[derive(Clone)]
pub struct ScheduledJobRuleUseCases {
    store: Arc<dyn ScheduledJobRuleStore>,
    guard: Guard,
    pagination: PaginationConfig,
}

/// Parse an ISO-8601 timestamp with an explicit offset.
fn parse_scheduled_time(raw: &str) -> Result<DateTime<Utc>, SchedulerError> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| SchedulerError::BadRequest(format!("invalid scheduled time '{}': {}", raw, e)))
}

impl ScheduledJobRuleUseCases {
    pub fn new(store: Arc<dyn ScheduledJobRuleStore>, guard: Guard, pagination: PaginationConfig) -> Self {
        Self {
            store,
            guard,
            pagination,
        }
    }

    /// Schedule a one-shot job. A time in the past fires on the next poll.
    pub async fn create(
        &self,
        identity: CallerIdentity,
        request: CreateScheduledJobRuleRequest,
    ) -> Result<ScheduledJobRule, SchedulerError> {
        let next_run_at = parse_scheduled_time(&request.scheduled_time)?;
        self.guard.admit(identity, &request.project_id).await?;
        self.guard.charge(&request.project_id).await?;

        let rule = self
            .store
            .create(NewScheduledJobRule::new(request.project_id, request.input, next_run_at))
            .await?;

        info!(
            "Scheduled rule {} in project {} for {}",
            rule.id, rule.project_id, rule.next_run_at
        );
        Ok(rule)
    }

    pub async fn fetch(
        &self,
        identity: CallerIdentity,
        project_id: &str,
        id: Uuid,
    ) -> Result<ScheduledJobRule, SchedulerError> {
        self.guard.admit(identity, project_id).await?;
        match self.store.fetch(id).await? {
            Some(rule) if rule.project_id == project_id => Ok(rule),
            _ => Err(SchedulerError::not_found("scheduled job rule", id)),
        }
    }

    pub async fn list(
        &self,
        identity: CallerIdentity,
        request: ListRequest,
    ) -> Result<Page<ScheduledJobRule>, SchedulerError> {
        self.guard.admit(identity, &request.project_id).await?;
        let limit = self.pagination.resolve(request.limit);
        self.store
            .list(&request.project_id, request.cursor.as_deref(), limit)
            .await
    }

    /// `false` if the rule does not exist in `project_id`.
    pub async fn delete(&self, identity: CallerIdentity, project_id: &str, id: Uuid) -> Result<bool, SchedulerError> {
        self.guard.admit(identity, project_id).await?;
        match self.store.fetch(id).await? {
            Some(rule) if rule.project_id == project_id => {}
            _ => return Ok(false),
        }
        self.guard.charge(project_id).await?;

        let deleted = self.store.delete(id).await?;
        if deleted {
            info!("Deleted scheduled rule {} from project {}", id, project_id);
        }
        Ok(deleted)
    }
}
