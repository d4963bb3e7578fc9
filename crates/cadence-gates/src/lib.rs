//! # Cadence Gates
//!
//! Checks every use case runs before touching a store:
//!
//! - [`AuthorizationGate`]: may this caller act on this project?
//! - [`QuotaGate`]: does the project have allowance left?
//!
//! Both fail before any item is written, so a rejected request leaves no
//! trace beyond the quota unit (if any) it was charged.

pub mod authorization;
pub mod caller;
pub mod quota;

pub use authorization::AuthorizationGate;
pub use caller::{Caller, CallerIdentity};
pub use quota::QuotaGate;
