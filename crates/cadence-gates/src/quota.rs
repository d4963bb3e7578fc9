//! Quota enforcement.

use std::sync::Arc;

use tracing::{debug, warn};

use cadence_core::SchedulerError;
use cadence_store::{QuotaKind, QuotaOutcome, QuotaStore};

/// Charges one quota unit per gated action.
#[derive(Clone)]
pub struct QuotaGate {
    store: Arc<dyn QuotaStore>,
}

impl QuotaGate {
    pub fn new(store: Arc<dyn QuotaStore>) -> Self {
        Self { store }
    }

    /// Charge a create, delete or toggle.
    pub async fn assert_and_consume_project_action(&self, project_id: &str) -> Result<(), SchedulerError> {
        self.consume(project_id, QuotaKind::ProjectAction).await
    }

    /// Charge one job execution.
    pub async fn assert_and_consume_run_job_action(&self, project_id: &str) -> Result<(), SchedulerError> {
        self.consume(project_id, QuotaKind::RunJob).await
    }

    async fn consume(&self, project_id: &str, kind: QuotaKind) -> Result<(), SchedulerError> {
        match self.store.consume(project_id, kind).await? {
            QuotaOutcome::Consumed(remaining) => {
                debug!("Project {} has {} {} units left", project_id, remaining, kind);
                Ok(())
            }
            QuotaOutcome::Unmetered => Ok(()),
            QuotaOutcome::Exhausted => {
                warn!("Project {} is out of {} quota", project_id, kind);
                Err(SchedulerError::QuotaExceeded(format!(
                    "project '{}' has no {} quota left",
                    project_id, kind
                )))
            }
        }
    }
}
