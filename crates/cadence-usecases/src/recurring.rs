//! Recurring rule use cases.

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use cadence_config::PaginationConfig;
use cadence_core::{CronSchedule, NewRecurringJobRule, Page, RecurringJobRule, SchedulerError};
use cadence_gates::CallerIdentity;
use cadence_store::RecurringJobRuleStore;

use crate::guard::Guard;
use crate::request::{CreateRecurringJobRuleRequest, ListRequest};

#[derive(Clone)]
pub struct RecurringJobRuleUseCases {
    store: Arc<dyn RecurringJobRuleStore>,
    guard: Guard,
    pagination: PaginationConfig,
}

impl RecurringJobRuleUseCases {
    pub fn new(store: Arc<dyn RecurringJobRuleStore>, guard: Guard, pagination: PaginationConfig) -> Self {
        Self {
            store,
            guard,
            pagination,
        }
    }

    pub async fn create(
        &self,
        identity: CallerIdentity,
        request: CreateRecurringJobRuleRequest,
    ) -> Result<RecurringJobRule, SchedulerError> {
        let cron = CronSchedule::parse(&request.cron)?;
        self.guard.admit(identity, &request.project_id).await?;
        self.guard.charge(&request.project_id).await?;

        let rule = self
            .store
            .create(NewRecurringJobRule::new(request.project_id, request.input, cron))
            .await?;

        info!(
            "Created recurring rule {} in project {} ('{}')",
            rule.id, rule.project_id, rule.cron
        );
        Ok(rule)
    }

    pub async fn fetch(
        &self,
        identity: CallerIdentity,
        project_id: &str,
        id: Uuid,
    ) -> Result<RecurringJobRule, SchedulerError> {
        self.guard.admit(identity, project_id).await?;
        self.owned(project_id, id)
            .await?
            .ok_or_else(|| SchedulerError::not_found("recurring job rule", id))
    }

    pub async fn list(
        &self,
        identity: CallerIdentity,
        request: ListRequest,
    ) -> Result<Page<RecurringJobRule>, SchedulerError> {
        self.guard.admit(identity, &request.project_id).await?;
        let limit = self.pagination.resolve(request.limit);
        self.store
            .list(&request.project_id, request.cursor.as_deref(), limit)
            .await
    }

    pub async fn toggle(
        &self,
        identity: CallerIdentity,
        project_id: &str,
        id: Uuid,
        disabled: bool,
    ) -> Result<RecurringJobRule, SchedulerError> {
        self.guard.admit(identity, project_id).await?;
        if self.owned(project_id, id).await?.is_none() {
            return Err(SchedulerError::not_found("recurring job rule", id));
        }
        self.guard.charge(project_id).await?;

        self.store.toggle(id, disabled).await
    }

    /// `false` if the rule does not exist in `project_id`.
    pub async fn delete(&self, identity: CallerIdentity, project_id: &str, id: Uuid) -> Result<bool, SchedulerError> {
        self.guard.admit(identity, project_id).await?;
        if self.owned(project_id, id).await?.is_none() {
            return Ok(false);
        }
        self.guard.charge(project_id).await?;

        let deleted = self.store.delete(id).await?;
        if deleted {
            info!("Deleted recurring rule {} from project {}", id, project_id);
        }
        Ok(deleted)
    }

    async fn owned(&self, project_id: &str, id: Uuid) -> Result<Option<RecurringJobRule>, SchedulerError> {
        Ok(self
            .store
            .fetch(id)
            .await?
            .filter(|rule| rule.project_id == project_id))
    }
}
