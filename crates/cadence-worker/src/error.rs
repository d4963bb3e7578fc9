//! Worker errors.

use thiserror::Error;

use cadence_core::SchedulerError;

#[derive(Debug, Error)]
pub enum WorkerError {
    /// A job handler failed; the job is marked failed with this message.
    #[error("Handler error: {0}")]
    Handler(String),

    /// A loop task panicked or was cancelled.
    #[error("Worker task error: {0}")]
    Task(String),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheduler_error_is_transparent() {
        let err: WorkerError = SchedulerError::NotFound("job 'x'".to_string()).into();
        assert_eq!(err.to_string(), "Not found: job 'x'");
    }

    #[test]
    fn test_handler_error_display() {
        let err = WorkerError::Handler("boom".to_string());
        assert_eq!(err.to_string(), "Handler error: boom");
    }
}
