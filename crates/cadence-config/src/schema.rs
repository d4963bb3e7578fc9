//! Configuration schema definitions.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub worker: WorkerConfig,

    #[serde(default)]
    pub pagination: PaginationConfig,

    #[serde(default)]
    pub log: LogConfig,
}

/// Shared store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database file shared by every worker process.
    #[serde(default = "default_store_path")]
    pub path: PathBuf,

    /// How long a writer waits for another process's write lock.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Lock lease length. Unset means locks never expire.
    #[serde(default)]
    pub lease_secs: Option<u64>,
}

impl StoreConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn lease(&self) -> Option<Duration> {
        self.lease_secs.map(Duration::from_secs)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            lease_secs: None,
        }
    }
}

fn default_store_path() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".cadence").join("cadence.db"))
        .unwrap_or_else(|| PathBuf::from("/tmp/cadence/cadence.db"))
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

/// Kinds of work a worker process polls for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkKind {
    Jobs,
    Scheduled,
    Recurring,
}

impl WorkKind {
    pub const ALL: [WorkKind; 3] = [WorkKind::Jobs, WorkKind::Scheduled, WorkKind::Recurring];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkKind::Jobs => "jobs",
            WorkKind::Scheduled => "scheduled",
            WorkKind::Recurring => "recurring",
        }
    }
}

/// Worker loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Identity recorded on locked items. Generated when unset.
    #[serde(default)]
    pub worker_id: Option<String>,

    /// Maximum number of jobs handled at once by one process.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: u32,

    /// Back-off after a poll that found nothing.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// How often expired leases are reclaimed.
    #[serde(default = "default_reap_interval_secs")]
    pub reap_interval_secs: u64,

    #[serde(default = "default_kinds")]
    pub kinds: Vec<WorkKind>,
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: None,
            max_concurrency: default_max_concurrency(),
            poll_interval_ms: default_poll_interval_ms(),
            reap_interval_secs: default_reap_interval_secs(),
            kinds: default_kinds(),
        }
    }
}

fn default_max_concurrency() -> u32 {
    4
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_reap_interval_secs() -> u64 {
    30
}

fn default_kinds() -> Vec<WorkKind> {
    WorkKind::ALL.to_vec()
}

/// Listing page sizes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginationConfig {
    #[serde(default = "default_page_limit")]
    pub default_limit: u32,

    #[serde(default = "default_max_page_limit")]
    pub max_limit: u32,
}

impl PaginationConfig {
    /// Resolve a caller-supplied limit.
    pub fn resolve(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.default_limit)
            .clamp(1, self.max_limit.max(1))
    }
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            default_limit: default_page_limit(),
            max_limit: default_max_page_limit(),
        }
    }
}

fn default_page_limit() -> u32 {
    50
}

fn default_max_page_limit() -> u32 {
    100
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for daily-rolling log files. Console only when unset.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            dir: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
#[path = "schema_tests.rs"]
mod tests;
