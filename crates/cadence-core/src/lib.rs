//! # Cadence Core
//!
//! Shared domain model for the Cadence work queue.
//!
//! ## Contents
//!
//! - Work items: [`Job`], [`ScheduledJobRule`], [`RecurringJobRule`]
//! - Five-field cron validation and next-run computation
//! - Cursor pagination
//! - The [`SchedulerError`] taxonomy shared by every layer
//! - A [`Clock`] seam so time can be driven in tests

pub mod clock;
pub mod cron;
pub mod error;
pub mod job;
pub mod pagination;
pub mod recurring;
pub mod scheduled;

pub use clock::{Clock, ManualClock, SystemClock};
pub use cron::CronSchedule;
pub use error::SchedulerError;
pub use job::{Job, JobReason, JobStatus, JobUpdate, NewJob};
pub use pagination::{Cursor, Page};
pub use recurring::{NewRecurringJobRule, RecurringJobRule, RecurringJobRuleUpdate};
pub use scheduled::{
    NewScheduledJobRule, ScheduledJobRule, ScheduledJobRuleStatus, ScheduledJobRuleUpdate,
};
