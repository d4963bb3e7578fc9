//! Job use cases.

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use cadence_config::PaginationConfig;
use cadence_core::{Job, JobReason, NewJob, Page, SchedulerError};
use cadence_gates::CallerIdentity;
use cadence_store::JobStore;

use crate::guard::Guard;
use crate::request::{CreateJobRequest, ListRequest};

/// Create, fetch and list jobs. Jobs are removed only with their project.
#[derive(Clone)]
pub struct JobUseCases {
    store: Arc<dyn JobStore>,
    guard: Guard,
    pagination: PaginationConfig,
}

impl JobUseCases {
    pub fn new(store: Arc<dyn JobStore>, guard: Guard, pagination: PaginationConfig) -> Self {
        Self {
            store,
            guard,
            pagination,
        }
    }

    /// Enqueue a job. External trigger sources pass their own reason.
    pub async fn create(&self, identity: CallerIdentity, request: CreateJobRequest) -> Result<Job, SchedulerError> {
        self.guard.admit(identity, &request.project_id).await?;
        self.guard.charge(&request.project_id).await?;

        let reason = request.reason.unwrap_or(JobReason::Api);
        let job = self
            .store
            .create(NewJob::new(request.project_id, reason, request.input))
            .await?;

        info!("Enqueued job {} in project {}", job.id, job.project_id);
        Ok(job)
    }

    /// A job of `project_id`. Jobs of other projects are reported missing.
    pub async fn fetch(&self, identity: CallerIdentity, project_id: &str, id: Uuid) -> Result<Job, SchedulerError> {
        self.guard.admit(identity, project_id).await?;
        match self.store.fetch(id).await? {
            Some(job) if job.project_id == project_id => Ok(job),
            _ => Err(SchedulerError::not_found("job", id)),
        }
    }

    pub async fn list(&self, identity: CallerIdentity, request: ListRequest) -> Result<Page<Job>, SchedulerError> {
        self.guard.admit(identity, &request.project_id).await?;
        let limit = self.pagination.resolve(request.limit);
        self.store
            .list(&request.project_id, request.cursor.as_deref(), limit)
            .await
    }
}
