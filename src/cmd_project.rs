//! `cadence project` handlers.

use tracing::{info, warn};

use cadence_store::{ApiKeyStore, MembershipStore, QuotaKind, QuotaStore};

use crate::app::App;
use crate::cli::ProjectAction;

/// Handle project subcommands.
pub(crate) async fn handle_project_command(
    app: &App,
    action: ProjectAction,
) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        ProjectAction::AddMember { project, user } => {
            app.access.add_member(&project, &user).await?;
            info!("Added {} to project {}", user, project);
            println!("{} is a member of {}", user, project);
        }
        ProjectAction::RemoveMember { project, user } => {
            if app.access.remove_member(&project, &user).await? {
                println!("{} removed from {}", user, project);
            } else {
                println!("{} was not a member of {}", user, project);
            }
        }
        ProjectAction::IssueKey { project } => {
            let key = app.access.issue_key(&project).await?;
            info!("Issued API key for project {}", project);
            println!("{}", serde_json::to_string_pretty(&key)?);
        }
        ProjectAction::RevokeKey { key } => {
            if app.access.revoke_key(&key).await? {
                println!("Key revoked");
            } else {
                warn!("Revoke requested for unknown key");
                println!("No such key");
            }
        }
        ProjectAction::SetQuota {
            project,
            kind,
            remaining,
            clear,
        } => {
            if clear {
                app.quotas.clear_quota(&project, kind).await?;
                println!("{} is unmetered for {}", project, kind);
            } else if let Some(remaining) = remaining {
                app.quotas.set_quota(&project, kind, remaining).await?;
                println!("{} has {} {} units left", project, remaining, kind);
            }
        }
        ProjectAction::Quota { project } => {
            for kind in [QuotaKind::ProjectAction, QuotaKind::RunJob] {
                match app.quotas.remaining(&project, kind).await? {
                    Some(left) => println!("{:<16} {}", kind.as_str(), left),
                    None => println!("{:<16} unmetered", kind.as_str()),
                }
            }
        }
        ProjectAction::DeleteData { scope } => {
            let deleted = app
                .project
                .delete_project_data(scope.identity(), &scope.project)
                .await?;
            println!("{}", serde_json::to_string_pretty(&deleted)?);
        }
        ProjectAction::Purge { project } => {
            let deleted = app.project.purge(&project).await?;
            println!("{}", serde_json::to_string_pretty(&deleted)?);
        }
    }
    Ok(())
}
