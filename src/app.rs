//! Stores and use cases opened from configuration.

use std::sync::Arc;

use tracing::info;

use cadence_config::Config;
use cadence_core::SchedulerError;
use cadence_gates::{AuthorizationGate, QuotaGate};
use cadence_store::{
    Database, SqliteAccessStore, SqliteJobStore, SqliteQuotaStore, SqliteRecurringJobRuleStore,
    SqliteScheduledJobRuleStore,
};
use cadence_usecases::{
    Guard, JobUseCases, ProjectUseCases, RecurringJobRuleUseCases, ScheduledJobRuleUseCases,
};

pub(crate) struct App {
    pub access: SqliteAccessStore,
    pub quotas: SqliteQuotaStore,
    pub jobs: JobUseCases,
    pub scheduled: ScheduledJobRuleUseCases,
    pub recurring: RecurringJobRuleUseCases,
    pub project: ProjectUseCases,
}

impl App {
    pub async fn open(config: &Config) -> Result<Self, SchedulerError> {
        let db = Database::open(&config.store.path, config.store.busy_timeout())
            .await?
            .with_lease(config.store.lease());
        info!("Store: {}", config.store.path.display());

        let access = SqliteAccessStore::new(db.clone());
        let quotas = SqliteQuotaStore::new(db.clone());
        let job_store = Arc::new(SqliteJobStore::new(db.clone()));
        let scheduled_store = Arc::new(SqliteScheduledJobRuleStore::new(db.clone()));
        let recurring_store = Arc::new(SqliteRecurringJobRuleStore::new(db.clone()));

        let guard = Guard::new(
            AuthorizationGate::new(Arc::new(access.clone()), Arc::new(access.clone())),
            QuotaGate::new(Arc::new(quotas.clone())),
        );
        let pagination = config.pagination.clone();

        Ok(Self {
            jobs: JobUseCases::new(job_store.clone(), guard.clone(), pagination.clone()),
            scheduled: ScheduledJobRuleUseCases::new(
                scheduled_store.clone(),
                guard.clone(),
                pagination.clone(),
            ),
            recurring: RecurringJobRuleUseCases::new(recurring_store.clone(), guard.clone(), pagination),
            project: ProjectUseCases::new(job_store, scheduled_store, recurring_store, guard),
            access,
            quotas,
        })
    }
}
