//! Scheduler errors.

use thiserror::Error;

/// Error taxonomy shared by the stores, gates and use cases.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Unknown id, or an id that belongs to another project.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed input: cron, identity fields, timestamps, cursors.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Membership or API key check failed.
    #[error("Not authorized: {0}")]
    NotAuthorized(String),

    /// The project has no allowance left.
    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    /// A targeted lock lost the race or the item is already held.
    #[error("Job acquisition failed: {0}")]
    JobAcquisition(String),

    /// A version-guarded write targeted a stale version.
    #[error("Version conflict on {id}: expected version {expected}, found {found}")]
    VersionConflict { id: String, expected: i64, found: i64 },

    /// Persistence failure.
    #[error("Database error: {0}")]
    Database(String),
}

impl SchedulerError {
    pub fn not_found(kind: &str, id: impl std::fmt::Display) -> Self {
        SchedulerError::NotFound(format!("{} '{}'", kind, id))
    }
}
