//! Shared fixtures for use case tests.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};

pub(crate) use cadence_config::PaginationConfig;
pub(crate) use cadence_core::ManualClock;
pub(crate) use cadence_gates::{AuthorizationGate, CallerIdentity, QuotaGate};
pub(crate) use cadence_store::{
    ApiKeyStore, Database, JobStore, MembershipStore, QuotaKind, QuotaStore, RecurringJobRuleStore,
    ScheduledJobRuleStore, SqliteAccessStore, SqliteJobStore, SqliteQuotaStore,
    SqliteRecurringJobRuleStore, SqliteScheduledJobRuleStore,
};

use crate::{Guard, JobUseCases, ProjectUseCases, RecurringJobRuleUseCases, ScheduledJobRuleUseCases};

pub(crate) fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap()
}

/// Every store and use case on one in-memory database. `alice` is a member
/// of `p1`; no quotas are set.
pub(crate) struct Harness {
    pub clock: Arc<ManualClock>,
    pub members: SqliteAccessStore,
    pub quotas: SqliteQuotaStore,
    pub job_store: SqliteJobStore,
    pub scheduled_store: SqliteScheduledJobRuleStore,
    pub recurring_store: SqliteRecurringJobRuleStore,
    pub jobs: JobUseCases,
    pub scheduled: ScheduledJobRuleUseCases,
    pub recurring: RecurringJobRuleUseCases,
    pub project: ProjectUseCases,
}

impl Harness {
    pub async fn new() -> Self {
        let clock = Arc::new(ManualClock::new(start()));
        let db = Database::in_memory().await.unwrap().with_clock(clock.clone());

        let members = SqliteAccessStore::new(db.clone());
        let quotas = SqliteQuotaStore::new(db.clone());
        let job_store = SqliteJobStore::new(db.clone());
        let scheduled_store = SqliteScheduledJobRuleStore::new(db.clone());
        let recurring_store = SqliteRecurringJobRuleStore::new(db);

        let guard = Guard::new(
            AuthorizationGate::new(Arc::new(members.clone()), Arc::new(members.clone())),
            QuotaGate::new(Arc::new(quotas.clone())),
        );
        let pagination = PaginationConfig {
            default_limit: 2,
            max_limit: 3,
        };

        members.add_member("p1", "alice").await.unwrap();

        Self {
            jobs: JobUseCases::new(Arc::new(job_store.clone()), guard.clone(), pagination.clone()),
            scheduled: ScheduledJobRuleUseCases::new(
                Arc::new(scheduled_store.clone()),
                guard.clone(),
                pagination.clone(),
            ),
            recurring: RecurringJobRuleUseCases::new(
                Arc::new(recurring_store.clone()),
                guard.clone(),
                pagination,
            ),
            project: ProjectUseCases::new(
                Arc::new(job_store.clone()),
                Arc::new(scheduled_store.clone()),
                Arc::new(recurring_store.clone()),
                guard,
            ),
            clock,
            members,
            quotas,
            job_store,
            scheduled_store,
            recurring_store,
        }
    }

    pub fn alice(&self) -> CallerIdentity {
        CallerIdentity::user("alice")
    }

    /// A fresh API key for `p1`.
    pub async fn api_caller(&self) -> CallerIdentity {
        let key = self.members.issue_key("p1").await.unwrap();
        CallerIdentity::api(key.key)
    }

    pub async fn job_count(&self, project_id: &str) -> usize {
        self.job_store.list(project_id, None, 1000).await.unwrap().items.len()
    }

    pub async fn scheduled_count(&self, project_id: &str) -> usize {
        self.scheduled_store
            .list(project_id, None, 1000)
            .await
            .unwrap()
            .items
            .len()
    }

    pub async fn recurring_count(&self, project_id: &str) -> usize {
        self.recurring_store
            .list(project_id, None, 1000)
            .await
            .unwrap()
            .items
            .len()
    }
}
