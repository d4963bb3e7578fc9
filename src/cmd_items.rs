//! Handlers that go through the use cases on behalf of a caller.

use serde::Serialize;
use uuid::Uuid;

use cadence_usecases::{
    CreateJobRequest, CreateRecurringJobRuleRequest, CreateScheduledJobRuleRequest, ListRequest,
};

use crate::app::App;
use crate::cli::{EnqueueAction, ItemKind, RuleKind, Scope};

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Handle enqueue subcommands.
pub(crate) async fn handle_enqueue(
    app: &App,
    action: EnqueueAction,
) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        EnqueueAction::Job { scope, input } => {
            let job = app
                .jobs
                .create(scope.identity(), CreateJobRequest::new(scope.project.clone(), input))
                .await?;
            print_json(&job)
        }
        EnqueueAction::Scheduled { scope, input, at } => {
            let request = CreateScheduledJobRuleRequest {
                project_id: scope.project.clone(),
                input,
                scheduled_time: at,
            };
            let rule = app.scheduled.create(scope.identity(), request).await?;
            print_json(&rule)
        }
        EnqueueAction::Recurring { scope, input, cron } => {
            let request = CreateRecurringJobRuleRequest {
                project_id: scope.project.clone(),
                input,
                cron,
            };
            let rule = app.recurring.create(scope.identity(), request).await?;
            print_json(&rule)
        }
    }
}

pub(crate) async fn list(
    app: &App,
    kind: ItemKind,
    scope: Scope,
    cursor: Option<String>,
    limit: Option<u32>,
) -> Result<(), Box<dyn std::error::Error>> {
    let request = ListRequest {
        project_id: scope.project.clone(),
        cursor,
        limit,
    };
    let identity = scope.identity();

    match kind {
        ItemKind::Jobs => print_json(&app.jobs.list(identity, request).await?),
        ItemKind::Scheduled => print_json(&app.scheduled.list(identity, request).await?),
        ItemKind::Recurring => print_json(&app.recurring.list(identity, request).await?),
    }
}

pub(crate) async fn show(app: &App, kind: ItemKind, id: Uuid, scope: Scope) -> Result<(), Box<dyn std::error::Error>> {
    let identity = scope.identity();
    let project = scope.project.as_str();

    match kind {
        ItemKind::Jobs => print_json(&app.jobs.fetch(identity, project, id).await?),
        ItemKind::Scheduled => print_json(&app.scheduled.fetch(identity, project, id).await?),
        ItemKind::Recurring => print_json(&app.recurring.fetch(identity, project, id).await?),
    }
}

pub(crate) async fn toggle(app: &App, id: Uuid, disabled: bool, scope: Scope) -> Result<(), Box<dyn std::error::Error>> {
    let rule = app
        .recurring
        .toggle(scope.identity(), &scope.project, id, disabled)
        .await?;
    print_json(&rule)
}

pub(crate) async fn delete(app: &App, kind: RuleKind, id: Uuid, scope: Scope) -> Result<(), Box<dyn std::error::Error>> {
    let identity = scope.identity();
    let deleted = match kind {
        RuleKind::Scheduled => app.scheduled.delete(identity, &scope.project, id).await?,
        RuleKind::Recurring => app.recurring.delete(identity, &scope.project, id).await?,
    };

    if deleted {
        println!("Deleted {}", id);
    } else {
        println!("No rule {} in project {}", id, scope.project);
    }
    Ok(())
}
