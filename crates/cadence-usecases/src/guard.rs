//! Caller admission.

use tracing::debug;

use cadence_core::SchedulerError;
use cadence_gates::{AuthorizationGate, Caller, CallerIdentity, QuotaGate};

/// Runs the gates in order: identity, authorization, then quota.
#[derive(Clone)]
pub struct Guard {
    authorization: AuthorizationGate,
    quota: QuotaGate,
}

impl Guard {
    pub fn new(authorization: AuthorizationGate, quota: QuotaGate) -> Self {
        Self { authorization, quota }
    }

    /// Validate the identity and authorize it for `project_id`.
    pub async fn admit(&self, identity: CallerIdentity, project_id: &str) -> Result<Caller, SchedulerError> {
        let caller = Caller::try_from(identity)?;
        self.authorization.authorize(&caller, project_id).await?;
        debug!("Admitted {} caller to project {}", caller.kind(), project_id);
        Ok(caller)
    }

    /// Charge one project action. Call after [`Guard::admit`].
    pub async fn charge(&self, project_id: &str) -> Result<(), SchedulerError> {
        self.quota.assert_and_consume_project_action(project_id).await
    }

    pub fn quota(&self) -> &QuotaGate {
        &self.quota
    }
}
