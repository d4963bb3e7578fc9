//! Frees items whose lease ran out.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use cadence_store::{JobStore, Reaped, RecurringJobRuleStore, ScheduledJobRuleStore};

use crate::error::WorkerError;

#[derive(Clone)]
pub struct LeaseReaper {
    jobs: Arc<dyn JobStore>,
    scheduled: Arc<dyn ScheduledJobRuleStore>,
    recurring: Arc<dyn RecurringJobRuleStore>,
    interval: Duration,
}

impl LeaseReaper {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        scheduled: Arc<dyn ScheduledJobRuleStore>,
        recurring: Arc<dyn RecurringJobRuleStore>,
        interval: Duration,
    ) -> Self {
        Self {
            jobs,
            scheduled,
            recurring,
            interval,
        }
    }

    /// One pass over every store.
    pub async fn run_once(&self) -> Result<Reaped, WorkerError> {
        let passes = [
            ("jobs", self.jobs.reap_expired().await?),
            ("scheduled rules", self.scheduled.reap_expired().await?),
            ("recurring rules", self.recurring.reap_expired().await?),
        ];

        let mut total = Reaped::default();
        for (what, reaped) in passes {
            if reaped.released > 0 {
                warn!("Reclaimed {} expired {} leases", reaped.released, what);
            }
            total.released += reaped.released;
            total.purged += reaped.purged;
        }

        debug!("Reaper pass: {:?}", total);
        Ok(total)
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!("Lease reaper started (every {:?})", self.interval);
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once().await {
                        error!("Reaper pass failed: {}", e);
                    }
                }
            }
        }
        info!("Lease reaper stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::{JobReason, ManualClock, NewJob, NewScheduledJobRule};
    use cadence_store::{Database, SqliteJobStore, SqliteRecurringJobRuleStore, SqliteScheduledJobRuleStore};
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    #[tokio::test]
    async fn test_reaper_frees_abandoned_items() {
        let start = Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let db = Database::in_memory()
            .await
            .unwrap()
            .with_clock(clock.clone())
            .with_lease(Some(Duration::from_secs(30)));

        let jobs = SqliteJobStore::new(db.clone());
        let scheduled = SqliteScheduledJobRuleStore::new(db.clone());
        let recurring = SqliteRecurringJobRuleStore::new(db);
        let reaper = LeaseReaper::new(
            Arc::new(jobs.clone()),
            Arc::new(scheduled.clone()),
            Arc::new(recurring),
            Duration::from_secs(5),
        );

        let job = jobs
            .create(NewJob::new("p1", JobReason::Api, json!({})))
            .await
            .unwrap();
        scheduled
            .create(NewScheduledJobRule::new("p1", json!({}), start))
            .await
            .unwrap();
        jobs.poll("crashed").await.unwrap().unwrap();
        scheduled.poll("crashed").await.unwrap().unwrap();

        assert_eq!(reaper.run_once().await.unwrap().total(), 0);

        clock.advance(chrono::Duration::seconds(31));
        let reaped = reaper.run_once().await.unwrap();
        assert_eq!(reaped.released, 2);
        assert_eq!(reaped.purged, 0);

        let job = jobs.fetch(job.id).await.unwrap().unwrap();
        assert!(!job.is_locked());
        assert_eq!(job.status, cadence_core::JobStatus::Pending);
    }
}
