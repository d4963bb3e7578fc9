//! CLI definitions for Cadence.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use uuid::Uuid;

use cadence_config::WorkKind;
use cadence_gates::CallerIdentity;
use cadence_store::QuotaKind;

/// Cadence CLI.
#[derive(Parser)]
#[command(name = "cadence")]
#[command(about = "Broker-free job, schedule and cron work queue")]
#[command(version)]
pub(crate) struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config/default.toml", global = true)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Run the worker loops until Ctrl-C
    Worker {
        /// Worker identity (defaults to config, then a generated id)
        #[arg(long)]
        worker_id: Option<String>,

        /// Kinds of work to poll for
        #[arg(long, value_delimiter = ',', value_parser = parse_work_kind)]
        kinds: Option<Vec<WorkKind>>,

        /// Concurrent jobs
        #[arg(long)]
        max_concurrency: Option<u32>,
    },

    /// Project administration
    Project {
        #[command(subcommand)]
        action: ProjectAction,
    },

    /// Create work through the use cases
    Enqueue {
        #[command(subcommand)]
        action: EnqueueAction,
    },

    /// List a project's items as JSON
    List {
        #[arg(value_enum)]
        kind: ItemKind,

        #[command(flatten)]
        scope: Scope,

        /// Cursor from a previous page
        #[arg(long)]
        cursor: Option<String>,

        /// Page size
        #[arg(long)]
        limit: Option<u32>,
    },

    /// Show one item as JSON
    Show {
        #[arg(value_enum)]
        kind: ItemKind,

        #[arg(long)]
        id: Uuid,

        #[command(flatten)]
        scope: Scope,
    },

    /// Enable or disable a recurring rule
    Toggle {
        #[arg(long)]
        id: Uuid,

        #[arg(long, action = clap::ArgAction::Set)]
        disabled: bool,

        #[command(flatten)]
        scope: Scope,
    },

    /// Delete a scheduled or recurring rule
    Delete {
        #[arg(value_enum)]
        kind: RuleKind,

        #[arg(long)]
        id: Uuid,

        #[command(flatten)]
        scope: Scope,
    },
}

#[derive(Subcommand)]
pub(crate) enum ProjectAction {
    /// Grant a user access to a project
    AddMember {
        #[arg(long)]
        project: String,

        #[arg(long)]
        user: String,
    },

    /// Revoke a user's access to a project
    RemoveMember {
        #[arg(long)]
        project: String,

        #[arg(long)]
        user: String,
    },

    /// Issue a new API key for a project
    IssueKey {
        #[arg(long)]
        project: String,
    },

    /// Revoke an API key
    RevokeKey {
        #[arg(long)]
        key: String,
    },

    /// Set (or with --clear, remove) a project's quota
    SetQuota {
        #[arg(long)]
        project: String,

        #[arg(long, value_parser = parse_quota_kind)]
        kind: QuotaKind,

        /// Remaining units
        #[arg(long, required_unless_present = "clear")]
        remaining: Option<u32>,

        /// Make the project unmetered for this kind
        #[arg(long)]
        clear: bool,
    },

    /// Show a project's remaining quotas
    Quota {
        #[arg(long)]
        project: String,
    },

    /// Delete all of a project's data on behalf of a caller
    DeleteData {
        #[command(flatten)]
        scope: Scope,
    },

    /// Delete all of a project's data without a caller check
    Purge {
        #[arg(long)]
        project: String,
    },
}

#[derive(Subcommand)]
pub(crate) enum EnqueueAction {
    /// Create a job for immediate execution
    Job {
        #[command(flatten)]
        scope: Scope,

        /// JSON input
        #[arg(long, default_value = "{}", value_parser = parse_json)]
        input: serde_json::Value,
    },

    /// Schedule a job for one point in time
    Scheduled {
        #[command(flatten)]
        scope: Scope,

        #[arg(long, default_value = "{}", value_parser = parse_json)]
        input: serde_json::Value,

        /// RFC 3339 timestamp, e.g. 2026-03-10T12:00:00Z
        #[arg(long)]
        at: String,
    },

    /// Run a job on a five-field cron schedule
    Recurring {
        #[command(flatten)]
        scope: Scope,

        #[arg(long, default_value = "{}", value_parser = parse_json)]
        input: serde_json::Value,

        /// e.g. "*/15 * * * *"
        #[arg(long)]
        cron: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
pub(crate) enum ItemKind {
    Jobs,
    Scheduled,
    Recurring,
}

#[derive(Clone, Copy, ValueEnum)]
pub(crate) enum RuleKind {
    Scheduled,
    Recurring,
}

/// Project and caller of a request.
#[derive(Args)]
pub(crate) struct Scope {
    #[arg(long)]
    pub project: String,

    /// Act as this user (takes precedence over --api-key)
    #[arg(long)]
    pub user: Option<String>,

    /// Act with this API key
    #[arg(long, env = "CADENCE_API_KEY")]
    pub api_key: Option<String>,
}

impl Scope {
    pub fn identity(&self) -> CallerIdentity {
        match (&self.user, &self.api_key) {
            (Some(user), _) => CallerIdentity::user(user.clone()),
            (None, Some(key)) => CallerIdentity::api(key.clone()),
            (None, None) => CallerIdentity::default(),
        }
    }
}

fn parse_work_kind(s: &str) -> Result<WorkKind, String> {
    WorkKind::ALL
        .into_iter()
        .find(|kind| kind.as_str() == s.trim())
        .ok_or_else(|| format!("unknown kind '{}' (expected jobs, scheduled or recurring)", s))
}

fn parse_quota_kind(s: &str) -> Result<QuotaKind, String> {
    s.parse::<QuotaKind>().map_err(|e| e.to_string())
}

fn parse_json(s: &str) -> Result<serde_json::Value, String> {
    serde_json::from_str(s).map_err(|e| format!("invalid JSON: {}", e))
}
