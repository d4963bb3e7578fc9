//! Shared fixtures for worker tests.

use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use cadence_core::{Job, JobUpdate, NewJob, Page, SchedulerError};
use cadence_store::{JobStore, Reaped, SqliteJobStore};

/// A job store that stalls after `poll` claims and after `create` inserts,
/// so a loop can be stopped while it is in the middle of an item.
#[derive(Clone)]
pub(crate) struct SlowJobStore {
    pub inner: SqliteJobStore,
    pub poll_delay: Duration,
    pub create_delay: Duration,
}

impl SlowJobStore {
    pub fn new(inner: SqliteJobStore) -> Self {
        Self {
            inner,
            poll_delay: Duration::ZERO,
            create_delay: Duration::ZERO,
        }
    }
}

#[async_trait]
impl JobStore for SlowJobStore {
    async fn create(&self, job: NewJob) -> Result<Job, SchedulerError> {
        let job = self.inner.create(job).await?;
        tokio::time::sleep(self.create_delay).await;
        Ok(job)
    }

    async fn fetch(&self, id: Uuid) -> Result<Option<Job>, SchedulerError> {
        self.inner.fetch(id).await
    }

    async fn poll(&self, worker_id: &str) -> Result<Option<Job>, SchedulerError> {
        let job = self.inner.poll(worker_id).await?;
        if job.is_some() {
            tokio::time::sleep(self.poll_delay).await;
        }
        Ok(job)
    }

    async fn lock(&self, id: Uuid, worker_id: &str) -> Result<Job, SchedulerError> {
        self.inner.lock(id, worker_id).await
    }

    async fn update(&self, id: Uuid, expected_version: i64, update: JobUpdate) -> Result<Job, SchedulerError> {
        self.inner.update(id, expected_version, update).await
    }

    async fn heartbeat(&self, id: Uuid, worker_id: &str) -> Result<Job, SchedulerError> {
        self.inner.heartbeat(id, worker_id).await
    }

    async fn release(&self, id: Uuid) -> Result<Job, SchedulerError> {
        self.inner.release(id).await
    }

    async fn release_held(&self, id: Uuid, worker_id: &str) -> Result<Job, SchedulerError> {
        self.inner.release_held(id, worker_id).await
    }

    async fn list(&self, project_id: &str, cursor: Option<&str>, limit: u32) -> Result<Page<Job>, SchedulerError> {
        self.inner.list(project_id, cursor, limit).await
    }

    async fn delete_by_project(&self, project_id: &str) -> Result<usize, SchedulerError> {
        self.inner.delete_by_project(project_id).await
    }

    async fn reap_expired(&self) -> Result<Reaped, SchedulerError> {
        self.inner.reap_expired().await
    }
}

/// Wait up to a second for `check` to hold.
pub(crate) async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached within a second");
}
