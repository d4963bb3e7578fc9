//! # Cadence Use Cases
//!
//! Entry points for clients and external trigger sources. Every operation
//! validates the caller, authorizes it for the project and, for mutations,
//! charges the project's action quota before the store is touched.

pub mod guard;
pub mod jobs;
pub mod project;
pub mod recurring;
pub mod request;
pub mod scheduled;

#[cfg(test)]
mod test_support;

pub use guard::Guard;
pub use jobs::JobUseCases;
pub use project::{ProjectDataDeleted, ProjectUseCases};
pub use recurring::RecurringJobRuleUseCases;
pub use request::{
    CreateJobRequest, CreateRecurringJobRuleRequest, CreateScheduledJobRuleRequest, ListRequest,
};
pub use scheduled::ScheduledJobRuleUseCases;
