//! Project access checks.

use std::sync::Arc;

use tracing::warn;

use cadence_core::SchedulerError;
use cadence_store::{ApiKeyStore, MembershipStore};

use crate::caller::Caller;

/// Decides whether a caller may act on a project.
#[derive(Clone)]
pub struct AuthorizationGate {
    members: Arc<dyn MembershipStore>,
    keys: Arc<dyn ApiKeyStore>,
}

impl AuthorizationGate {
    pub fn new(members: Arc<dyn MembershipStore>, keys: Arc<dyn ApiKeyStore>) -> Self {
        Self { members, keys }
    }

    /// Users must be members of the project. API keys must belong to the
    /// project and not be revoked; a successful check stamps the key's
    /// `last_used_at`.
    pub async fn authorize(&self, caller: &Caller, project_id: &str) -> Result<(), SchedulerError> {
        if project_id.trim().is_empty() {
            return Err(SchedulerError::BadRequest("projectId is required".to_string()));
        }

        let allowed = match caller {
            Caller::User { user_id } => self.members.is_member(project_id, user_id).await?,
            Caller::Api { api_key } => self.keys.consume_key(api_key, project_id).await?,
        };

        if allowed {
            Ok(())
        } else {
            warn!("Rejected {} caller for project {}", caller.kind(), project_id);
            Err(SchedulerError::NotAuthorized(format!(
                "{} caller may not access project '{}'",
                caller.kind(),
                project_id
            )))
        }
    }
}
