//! Project-wide operations.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use cadence_core::SchedulerError;
use cadence_gates::CallerIdentity;
use cadence_store::{JobStore, RecurringJobRuleStore, ScheduledJobRuleStore};

use crate::guard::Guard;

/// How many items each store removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectDataDeleted {
    pub jobs: usize,
    pub scheduled_rules: usize,
    pub recurring_rules: usize,
}

impl ProjectDataDeleted {
    pub fn total(&self) -> usize {
        self.jobs + self.scheduled_rules + self.recurring_rules
    }
}

#[derive(Clone)]
pub struct ProjectUseCases {
    jobs: Arc<dyn JobStore>,
    scheduled: Arc<dyn ScheduledJobRuleStore>,
    recurring: Arc<dyn RecurringJobRuleStore>,
    guard: Guard,
}

impl ProjectUseCases {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        scheduled: Arc<dyn ScheduledJobRuleStore>,
        recurring: Arc<dyn RecurringJobRuleStore>,
        guard: Guard,
    ) -> Self {
        Self {
            jobs,
            scheduled,
            recurring,
            guard,
        }
    }

    /// Remove every job and rule of a project on behalf of a caller.
    ///
    /// Not quota-gated, so an exhausted project can still be cleaned up.
    pub async fn delete_project_data(
        &self,
        identity: CallerIdentity,
        project_id: &str,
    ) -> Result<ProjectDataDeleted, SchedulerError> {
        self.guard.admit(identity, project_id).await?;
        self.purge(project_id).await
    }

    /// Remove every job and rule of a project without any caller check.
    /// Locked items are tombstoned and disappear once their holder lets go.
    pub async fn purge(&self, project_id: &str) -> Result<ProjectDataDeleted, SchedulerError> {
        let deleted = ProjectDataDeleted {
            jobs: self.jobs.delete_by_project(project_id).await?,
            scheduled_rules: self.scheduled.delete_by_project(project_id).await?,
            recurring_rules: self.recurring.delete_by_project(project_id).await?,
        };

        info!(
            "Deleted data of project {}: {} jobs, {} scheduled rules, {} recurring rules",
            project_id, deleted.jobs, deleted.scheduled_rules, deleted.recurring_rules
        );
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{CreateJobRequest, CreateRecurringJobRuleRequest, CreateScheduledJobRuleRequest};
    use crate::test_support::*;
    use serde_json::json;

    async fn seed(h: &Harness, project: &str) {
        h.jobs
            .create(h.alice(), CreateJobRequest::new(project, json!({})))
            .await
            .unwrap();
        h.scheduled
            .create(
                h.alice(),
                CreateScheduledJobRuleRequest {
                    project_id: project.to_string(),
                    input: json!({}),
                    scheduled_time: "2026-03-10T11:00:00Z".to_string(),
                },
            )
            .await
            .unwrap();
        h.recurring
            .create(
                h.alice(),
                CreateRecurringJobRuleRequest {
                    project_id: project.to_string(),
                    input: json!({}),
                    cron: "0 * * * *".to_string(),
                },
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_delete_project_data_removes_only_that_project() {
        let h = Harness::new().await;
        h.members.add_member("p2", "alice").await.unwrap();
        seed(&h, "p1").await;
        seed(&h, "p2").await;

        let deleted = h.project.delete_project_data(h.alice(), "p1").await.unwrap();
        assert_eq!(
            deleted,
            ProjectDataDeleted {
                jobs: 1,
                scheduled_rules: 1,
                recurring_rules: 1
            }
        );
        assert_eq!(deleted.total(), 3);

        assert_eq!(h.job_count("p1").await, 0);
        assert_eq!(h.scheduled_count("p1").await, 0);
        assert_eq!(h.recurring_count("p1").await, 0);
        assert_eq!(h.job_count("p2").await, 1);
    }

    #[tokio::test]
    async fn test_delete_project_data_requires_authorization() {
        let h = Harness::new().await;
        seed(&h, "p1").await;

        let err = h
            .project
            .delete_project_data(CallerIdentity::user("mallory"), "p1")
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::NotAuthorized(_)));
        assert_eq!(h.job_count("p1").await, 1);
    }

    #[tokio::test]
    async fn test_locked_items_are_hidden_after_purge() {
        let h = Harness::new().await;
        seed(&h, "p1").await;
        let held = h.scheduled_store.poll("w1").await.unwrap().unwrap();

        h.project.purge("p1").await.unwrap();
        assert!(h.scheduled_store.fetch(held.id).await.unwrap().is_none());
        let err = h.scheduled_store.release(held.id).await.unwrap_err();
        assert!(matches!(err, SchedulerError::NotFound(_)));
    }
}
