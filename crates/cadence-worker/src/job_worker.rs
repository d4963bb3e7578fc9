//! Job execution loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use serde_json::json;
use tokio::sync::{broadcast, oneshot, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use cadence_core::{Job, JobStatus, JobUpdate, SchedulerError};
use cadence_gates::QuotaGate;
use cadence_store::JobStore;

use crate::error::WorkerError;
use crate::handler::JobHandler;
use crate::triggers::shutdown_requested;

/// Counters shared by every clone of a worker.
#[derive(Debug, Default)]
pub struct WorkerStats {
    completed: AtomicU64,
    failed: AtomicU64,
}

impl WorkerStats {
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::SeqCst)
    }
}

/// Polls the job store and runs claimed jobs through a handler.
#[derive(Clone)]
pub struct JobWorker {
    worker_id: String,
    jobs: Arc<dyn JobStore>,
    quota: QuotaGate,
    handler: Arc<dyn JobHandler>,
    semaphore: Arc<Semaphore>,
    max_concurrency: u32,
    poll_interval: Duration,
    heartbeat_interval: Option<Duration>,
    stats: Arc<WorkerStats>,
}

impl JobWorker {
    pub fn new(
        worker_id: impl Into<String>,
        jobs: Arc<dyn JobStore>,
        quota: QuotaGate,
        handler: Arc<dyn JobHandler>,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            jobs,
            quota,
            handler,
            semaphore: Arc::new(Semaphore::new(1)),
            max_concurrency: 1,
            poll_interval: Duration::from_secs(1),
            heartbeat_interval: None,
            stats: Arc::new(WorkerStats::default()),
        }
    }

    /// Run up to `n` jobs at once.
    pub fn with_concurrency(mut self, n: u32) -> Self {
        let n = n.max(1);
        self.max_concurrency = n;
        self.semaphore = Arc::new(Semaphore::new(n as usize));
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Heartbeat running jobs every `interval`. `None` disables heartbeats.
    pub fn with_heartbeat(mut self, interval: Option<Duration>) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }

    pub fn available_slots(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Claim at most one job and start it in the background.
    ///
    /// Waits for a free slot before polling. Returns `false` when nothing was
    /// claimable.
    pub async fn run_once(&self) -> Result<bool, WorkerError> {
        let permit = self.acquire_slot().await?;
        self.claim(permit).await
    }

    async fn acquire_slot(&self) -> Result<OwnedSemaphorePermit, WorkerError> {
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| WorkerError::Task(e.to_string()))
    }

    async fn claim(&self, permit: OwnedSemaphorePermit) -> Result<bool, WorkerError> {
        let Some(job) = self.jobs.poll(&self.worker_id).await? else {
            return Ok(false);
        };

        let worker = self.clone();
        tokio::spawn(async move {
            if let Err(e) = worker.process(job).await {
                error!("Worker {} failed to finish a job: {}", worker.worker_id, e);
            }
            drop(permit);
        });

        Ok(true)
    }

    /// Wait until every running job has been released.
    pub async fn drain(&self) -> Result<(), WorkerError> {
        let permits = self
            .semaphore
            .acquire_many(self.max_concurrency)
            .await
            .map_err(|e| WorkerError::Task(e.to_string()))?;
        drop(permits);
        Ok(())
    }

    /// Run a job this worker holds to completion, then release it.
    pub async fn process(&self, job: Job) -> Result<Job, WorkerError> {
        debug!("Worker {} processing job {}", self.worker_id, job.id);
        let version = Arc::new(AtomicI64::new(job.version));

        let update = match self.quota.assert_and_consume_run_job_action(&job.project_id).await {
            Ok(()) => self.execute(&job, version.clone()).await,
            Err(e @ SchedulerError::QuotaExceeded(_)) => {
                warn!("Job {} not run: {}", job.id, e);
                JobUpdate::new()
                    .with_status(JobStatus::Failed)
                    .with_output(json!({ "error": e.to_string() }))
            }
            Err(e) => {
                self.release(job.id).await;
                return Err(e.into());
            }
        };

        match self.jobs.update(job.id, version.load(Ordering::SeqCst), update).await {
            Ok(recorded) => match recorded.status {
                JobStatus::Failed => {
                    self.stats.failed.fetch_add(1, Ordering::SeqCst);
                }
                status if status.is_terminal() => {
                    self.stats.completed.fetch_add(1, Ordering::SeqCst);
                }
                _ => {}
            },
            // Lock lost to the reaper or another worker.
            Err(e @ (SchedulerError::VersionConflict { .. }
            | SchedulerError::JobAcquisition(_)
            | SchedulerError::NotFound(_))) => {
                warn!("Worker {} lost job {}: {}", self.worker_id, job.id, e);
                return Err(e.into());
            }
            Err(e) => warn!("Worker {} could not record job {}: {}", self.worker_id, job.id, e),
        }

        let released = self.jobs.release_held(job.id, &self.worker_id).await?;
        debug!("Worker {} released job {} ({})", self.worker_id, job.id, released.status);
        Ok(released)
    }

    /// Run the handler with a heartbeat alongside.
    async fn execute(&self, job: &Job, version: Arc<AtomicI64>) -> JobUpdate {
        let heartbeat = self
            .heartbeat_interval
            .map(|interval| self.spawn_heartbeat(job.id, interval, version));

        let result = self.handler.handle(job).await;

        if let Some((stop, task)) = heartbeat {
            let _ = stop.send(());
            if let Err(e) = task.await {
                warn!("Heartbeat task for job {} ended abnormally: {}", job.id, e);
            }
        }

        match result {
            Ok(output) => JobUpdate::new()
                .with_status(JobStatus::Completed)
                .with_output(output),
            Err(e) => {
                error!("Job {} failed: {}", job.id, e);
                JobUpdate::new()
                    .with_status(JobStatus::Failed)
                    .with_output(json!({ "error": e.to_string() }))
            }
        }
    }

    fn spawn_heartbeat(
        &self,
        id: Uuid,
        interval: Duration,
        version: Arc<AtomicI64>,
    ) -> (oneshot::Sender<()>, tokio::task::JoinHandle<()>) {
        let (stop_tx, mut stop_rx) = oneshot::channel();
        let jobs = self.jobs.clone();
        let worker_id = self.worker_id.clone();

        // A beat in flight always finishes, so `version` is final once the
        // task has been joined.
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = tokio::time::sleep(interval) => {
                        match jobs.heartbeat(id, &worker_id).await {
                            Ok(job) => version.store(job.version, Ordering::SeqCst),
                            Err(e) => {
                                warn!("Lost lock on job {}: {}", id, e);
                                break;
                            }
                        }
                    }
                }
            }
        });

        (stop_tx, task)
    }

    async fn release(&self, id: Uuid) {
        if let Err(e) = self.jobs.release_held(id, &self.worker_id).await {
            warn!("Worker {} could not release job {}: {}", self.worker_id, id, e);
        }
    }

    /// Poll until `shutdown` fires, then wait for running jobs.
    ///
    /// Shutdown only interrupts waiting: a poll that has started always
    /// hands its job to a task.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            "Job worker {} started ({} slots)",
            self.worker_id, self.max_concurrency
        );

        loop {
            if shutdown_requested(&mut shutdown) {
                break;
            }

            let permit = tokio::select! {
                _ = shutdown.recv() => break,
                permit = self.acquire_slot() => permit,
            };
            let claimed = match permit {
                Ok(permit) => self.claim(permit).await,
                Err(e) => Err(e),
            };
            match claimed {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => error!("Job worker {} poll failed: {}", self.worker_id, e),
            }

            tokio::select! {
                _ = shutdown.recv() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        if let Err(e) = self.drain().await {
            error!("Job worker {} could not drain: {}", self.worker_id, e);
        }
        info!("Job worker {} stopped", self.worker_id);
    }
}

#[cfg(test)]
#[path = "job_worker_tests.rs"]
mod tests;
