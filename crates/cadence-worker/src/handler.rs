//! Job handlers.

use async_trait::async_trait;
use serde_json::json;

use cadence_core::Job;

use crate::error::WorkerError;

/// Executes one job.
///
/// The returned value becomes the job's output. An error marks the job
/// failed with `{"error": message}` as output.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> Result<serde_json::Value, WorkerError>;
}

/// Returns `{"echo": input}`.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoHandler;

#[async_trait]
impl JobHandler for EchoHandler {
    async fn handle(&self, job: &Job) -> Result<serde_json::Value, WorkerError> {
        Ok(json!({ "echo": job.input }))
    }
}
