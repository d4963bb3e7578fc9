//! Wires the worker loops onto one database.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{error, info};
use uuid::Uuid;

use cadence_config::{WorkKind, WorkerConfig};
use cadence_gates::QuotaGate;
use cadence_store::{
    Database, SqliteJobStore, SqliteQuotaStore, SqliteRecurringJobRuleStore,
    SqliteScheduledJobRuleStore,
};

use crate::handler::JobHandler;
use crate::job_worker::JobWorker;
use crate::reaper::LeaseReaper;
use crate::triggers::{RecurringRuleTrigger, ScheduledRuleTrigger};

/// The loops one worker process runs.
pub struct WorkerPool {
    worker_id: String,
    kinds: Vec<WorkKind>,
    jobs: JobWorker,
    scheduled: ScheduledRuleTrigger,
    recurring: RecurringRuleTrigger,
    reaper: Option<LeaseReaper>,
}

impl WorkerPool {
    /// Build every loop on `db`. The reaper only exists when `db` has a lease.
    pub fn new(db: Database, config: &WorkerConfig, handler: Arc<dyn JobHandler>) -> Self {
        let worker_id = config
            .worker_id
            .clone()
            .unwrap_or_else(|| format!("worker-{}", &Uuid::new_v4().simple().to_string()[..8]));

        let job_store = Arc::new(SqliteJobStore::new(db.clone()));
        let scheduled_store = Arc::new(SqliteScheduledJobRuleStore::new(db.clone()));
        let recurring_store = Arc::new(SqliteRecurringJobRuleStore::new(db.clone()));
        let quota = QuotaGate::new(Arc::new(SqliteQuotaStore::new(db.clone())));

        let heartbeat = db
            .lease()
            .and_then(|lease| (lease / 3).to_std().ok())
            .filter(|d| !d.is_zero());

        let jobs = JobWorker::new(worker_id.clone(), job_store.clone(), quota, handler)
            .with_concurrency(config.max_concurrency)
            .with_poll_interval(config.poll_interval())
            .with_heartbeat(heartbeat);
        let scheduled = ScheduledRuleTrigger::new(worker_id.clone(), scheduled_store.clone(), job_store.clone())
            .with_poll_interval(config.poll_interval());
        let recurring = RecurringRuleTrigger::new(worker_id.clone(), recurring_store.clone(), job_store.clone())
            .with_poll_interval(config.poll_interval());

        let reaper = db.lease().map(|_| {
            LeaseReaper::new(job_store, scheduled_store, recurring_store, config.reap_interval())
        });

        Self {
            worker_id,
            kinds: config.kinds.clone(),
            jobs,
            scheduled,
            recurring,
            reaper,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn job_worker(&self) -> &JobWorker {
        &self.jobs
    }

    /// Run the configured loops until `shutdown` fires, then wait for all of
    /// them to stop.
    pub async fn run(self, shutdown: &broadcast::Sender<()>) {
        let mut tasks = JoinSet::new();

        for kind in &self.kinds {
            match kind {
                WorkKind::Jobs => {
                    tasks.spawn(self.jobs.clone().run(shutdown.subscribe()));
                }
                WorkKind::Scheduled => {
                    tasks.spawn(self.scheduled.clone().run(shutdown.subscribe()));
                }
                WorkKind::Recurring => {
                    tasks.spawn(self.recurring.clone().run(shutdown.subscribe()));
                }
            }
        }
        if let Some(reaper) = &self.reaper {
            tasks.spawn(reaper.clone().run(shutdown.subscribe()));
        }

        info!(
            "Worker {} running {} loops ({})",
            self.worker_id,
            tasks.len(),
            self.kinds.iter().map(|k| k.as_str()).collect::<Vec<_>>().join(", ")
        );

        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!("Worker {} loop panicked: {}", self.worker_id, e);
            }
        }
        info!("Worker {} stopped", self.worker_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::EchoHandler;
    use cadence_core::{JobReason, JobStatus, NewJob};
    use cadence_store::JobStore;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn test_pool_runs_jobs_until_shutdown() {
        let db = Database::in_memory().await.unwrap();
        let store = SqliteJobStore::new(db.clone());
        let job = store
            .create(NewJob::new("p1", JobReason::Api, json!({ "n": 1 })))
            .await
            .unwrap();

        let config = WorkerConfig {
            worker_id: Some("w-test".to_string()),
            poll_interval_ms: 10,
            ..WorkerConfig::default()
        };
        let pool = WorkerPool::new(db, &config, Arc::new(EchoHandler));
        assert_eq!(pool.worker_id(), "w-test");
        assert!(pool.reaper.is_none());

        let (tx, _) = broadcast::channel(1);
        let shutdown = tx.clone();
        let handle = tokio::spawn(async move { pool.run(&shutdown).await });

        let mut done = None;
        for _ in 0..200 {
            let current = store.fetch(job.id).await.unwrap().unwrap();
            if current.status == JobStatus::Completed && !current.is_locked() {
                done = Some(current);
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        tx.send(()).unwrap();
        handle.await.unwrap();

        let done = done.expect("job was not completed");
        assert_eq!(done.output, Some(json!({ "echo": { "n": 1 } })));
    }

    #[tokio::test]
    async fn test_generated_worker_id_and_reaper() {
        let db = Database::in_memory()
            .await
            .unwrap()
            .with_lease(Some(Duration::from_secs(30)));
        let pool = WorkerPool::new(db, &WorkerConfig::default(), Arc::new(EchoHandler));

        assert!(pool.worker_id().starts_with("worker-"));
        assert!(pool.reaper.is_some());
    }
}
