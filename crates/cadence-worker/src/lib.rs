//! # Cadence Worker
//!
//! Reference worker loop built on the store protocol.
//!
//! - [`JobWorker`]: polls jobs, charges run-job quota, runs a [`JobHandler`]
//!   under a concurrency limit and heartbeats the lease meanwhile
//! - [`ScheduledRuleTrigger`] / [`RecurringRuleTrigger`]: turn due rules
//!   into jobs
//! - [`LeaseReaper`]: frees locks whose lease ran out
//! - [`WorkerPool`]: runs the above until a shutdown signal

pub mod error;
pub mod handler;
pub mod job_worker;
pub mod pool;
pub mod reaper;
pub mod triggers;

#[cfg(test)]
mod test_support;

pub use error::WorkerError;
pub use handler::{EchoHandler, JobHandler};
pub use job_worker::{JobWorker, WorkerStats};
pub use pool::WorkerPool;
pub use reaper::LeaseReaper;
pub use triggers::{RecurringRuleTrigger, ScheduledRuleTrigger};
