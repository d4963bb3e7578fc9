//! Turn due rules into jobs.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{debug, error, info, warn};

use cadence_core::{
    Job, JobReason, NewJob, RecurringJobRule, ScheduledJobRule, ScheduledJobRuleStatus,
    ScheduledJobRuleUpdate,
};
use cadence_store::{JobStore, RecurringJobRuleStore, ScheduledJobRuleStore};

use crate::error::WorkerError;

/// Whether a shutdown has been sent (or can no longer arrive).
pub(crate) fn shutdown_requested(shutdown: &mut broadcast::Receiver<()>) -> bool {
    !matches!(shutdown.try_recv(), Err(TryRecvError::Empty))
}

/// Call `step` until `shutdown` fires, sleeping `interval` whenever it
/// reports no work.
///
/// A step is never cancelled; shutdown is noticed between steps and during
/// the idle sleep.
pub(crate) async fn poll_until_shutdown<F, Fut>(
    name: &str,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
    mut step: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, WorkerError>>,
{
    info!("{} started", name);
    loop {
        if shutdown_requested(&mut shutdown) {
            break;
        }

        match step().await {
            Ok(true) => continue,
            Ok(false) => {}
            Err(e) => error!("{} failed: {}", name, e),
        }

        tokio::select! {
            _ = shutdown.recv() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }
    info!("{} stopped", name);
}

/// Fires one-time scheduled rules.
#[derive(Clone)]
pub struct ScheduledRuleTrigger {
    worker_id: String,
    rules: Arc<dyn ScheduledJobRuleStore>,
    jobs: Arc<dyn JobStore>,
    poll_interval: Duration,
}

impl ScheduledRuleTrigger {
    pub fn new(
        worker_id: impl Into<String>,
        rules: Arc<dyn ScheduledJobRuleStore>,
        jobs: Arc<dyn JobStore>,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            rules,
            jobs,
            poll_interval: Duration::from_secs(1),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Fire at most one due rule. Returns `false` when none was due.
    pub async fn run_once(&self) -> Result<bool, WorkerError> {
        let Some(rule) = self.rules.poll(&self.worker_id).await? else {
            return Ok(false);
        };
        self.fire(rule).await?;
        Ok(true)
    }

    /// Create the rule's job, mark the rule triggered and release it.
    pub async fn fire(&self, rule: ScheduledJobRule) -> Result<Job, WorkerError> {
        let job = match self
            .jobs
            .create(NewJob::new(
                rule.project_id.clone(),
                JobReason::ScheduledJobRule { rule_id: rule.id },
                rule.input.clone(),
            ))
            .await
        {
            Ok(job) => job,
            Err(e) => {
                if let Err(release) = self.rules.release_held(rule.id, &self.worker_id).await {
                    warn!("Could not release scheduled rule {}: {}", rule.id, release);
                }
                return Err(e.into());
            }
        };

        let update = ScheduledJobRuleUpdate::new()
            .with_status(ScheduledJobRuleStatus::Triggered)
            .with_output(json!({ "job_id": job.id }));
        if let Err(e) = self.rules.update(rule.id, rule.version, update).await {
            warn!("Scheduled rule {} fired job {} but was not marked: {}", rule.id, job.id, e);
        }
        self.rules.release_held(rule.id, &self.worker_id).await?;

        info!("Scheduled rule {} fired job {}", rule.id, job.id);
        Ok(job)
    }

    pub async fn run(self, shutdown: broadcast::Receiver<()>) {
        let name = format!("Scheduled trigger {}", self.worker_id);
        poll_until_shutdown(&name, self.poll_interval, shutdown, || self.run_once()).await;
    }
}

/// Fires cron rules and lets the store reschedule them.
#[derive(Clone)]
pub struct RecurringRuleTrigger {
    worker_id: String,
    rules: Arc<dyn RecurringJobRuleStore>,
    jobs: Arc<dyn JobStore>,
    poll_interval: Duration,
}

impl RecurringRuleTrigger {
    pub fn new(
        worker_id: impl Into<String>,
        rules: Arc<dyn RecurringJobRuleStore>,
        jobs: Arc<dyn JobStore>,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            rules,
            jobs,
            poll_interval: Duration::from_secs(1),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub async fn run_once(&self) -> Result<bool, WorkerError> {
        let Some(rule) = self.rules.poll(&self.worker_id).await? else {
            return Ok(false);
        };
        self.fire(rule).await?;
        Ok(true)
    }

    /// Create the rule's job and release the rule, recording a failure as
    /// its `last_error`.
    pub async fn fire(&self, rule: RecurringJobRule) -> Result<RecurringJobRule, WorkerError> {
        let created = self
            .jobs
            .create(NewJob::new(
                rule.project_id.clone(),
                JobReason::RecurringJobRule { rule_id: rule.id },
                rule.input.clone(),
            ))
            .await;

        let error = match &created {
            Ok(job) => {
                debug!("Recurring rule {} fired job {}", rule.id, job.id);
                None
            }
            Err(e) => {
                warn!("Recurring rule {} could not create its job: {}", rule.id, e);
                Some(e.to_string())
            }
        };

        let released = self.rules.release_held(rule.id, &self.worker_id, error).await?;
        if released.disabled {
            warn!(
                "Recurring rule {} disabled: {}",
                rule.id,
                released.last_error.as_deref().unwrap_or("no further runs")
            );
        } else {
            debug!("Recurring rule {} next runs at {}", rule.id, released.next_run_at);
        }
        Ok(released)
    }

    pub async fn run(self, shutdown: broadcast::Receiver<()>) {
        let name = format!("Recurring trigger {}", self.worker_id);
        poll_until_shutdown(&name, self.poll_interval, shutdown, || self.run_once()).await;
    }
}

#[cfg(test)]
#[path = "triggers_tests.rs"]
mod tests;
