//! # Cadence Store
//!
//! SQLite-backed persistence for the Cadence work queue.
//!
//! ## Features
//!
//! - Job, scheduled-rule and recurring-rule stores sharing one
//!   poll/lock/release protocol
//! - Version-guarded compare-and-swap updates
//! - Lock leases with expiry and reaping
//! - Tombstoned deletes for items that are locked
//! - Project membership, API keys and per-project quota counters
//!
//! Every mutation runs as one statement (or one `BEGIN IMMEDIATE`
//! transaction), so concurrent processes sharing a database file can never
//! both claim the same item.

pub mod access;
pub mod cas;
mod codec;
pub mod db;
pub mod jobs;
mod protocol;
pub mod quota;
pub mod recurring;
pub mod scheduled;
mod schema;

pub use access::{ApiKey, ApiKeyStore, MembershipStore, SqliteAccessStore};
pub use cas::{CasOutcome, Patch};
pub use db::Database;
pub use jobs::{JobStore, SqliteJobStore};
pub use protocol::Reaped;
pub use quota::{QuotaKind, QuotaOutcome, QuotaStore, SqliteQuotaStore};
pub use recurring::{RecurringJobRuleStore, SqliteRecurringJobRuleStore};
pub use scheduled::{ScheduledJobRuleStore, SqliteScheduledJobRuleStore};
