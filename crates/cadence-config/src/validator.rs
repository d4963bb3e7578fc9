//! Configuration validation.

use crate::schema::Config;

/// Validation result.
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, path: &str, message: impl Into<String>) {
        self.errors.push(ValidationError {
            path: path.to_string(),
            message: message.into(),
        });
    }

    fn warning(&mut self, path: &str, message: impl Into<String>) {
        self.warnings.push(ValidationWarning {
            path: path.to_string(),
            message: message.into(),
        });
    }
}

/// A validation error.
#[derive(Debug)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

/// A validation warning.
#[derive(Debug)]
pub struct ValidationWarning {
    pub path: String,
    pub message: String,
}

/// Configuration validator.
pub struct ConfigValidator;

impl ConfigValidator {
    pub fn validate(config: &Config) -> ValidationResult {
        let mut result = ValidationResult::default();

        if config.store.path.as_os_str().is_empty() {
            result.error("store.path", "must not be empty");
        }
        match config.store.lease_secs {
            None => result.warning(
                "store.lease_secs",
                "unset; locks held by crashed workers are never reclaimed",
            ),
            Some(0) => result.error("store.lease_secs", "must be at least 1 second"),
            Some(_) => {}
        }

        if config.worker.max_concurrency == 0 {
            result.error("worker.max_concurrency", "must be at least 1");
        }
        if config.worker.poll_interval_ms == 0 {
            result.error("worker.poll_interval_ms", "must be at least 1");
        }
        if config.worker.kinds.is_empty() {
            result.warning("worker.kinds", "empty; the worker will poll nothing");
        }
        if config.store.lease_secs.is_some() && config.worker.reap_interval_secs == 0 {
            result.error("worker.reap_interval_secs", "must be at least 1 when leases are enabled");
        }

        if config.pagination.max_limit == 0 {
            result.error("pagination.max_limit", "must be at least 1");
        }
        if config.pagination.default_limit > config.pagination.max_limit {
            result.error(
                "pagination.default_limit",
                format!(
                    "{} exceeds pagination.max_limit {}",
                    config.pagination.default_limit, config.pagination.max_limit
                ),
            );
        }

        result
    }
}

#[cfg(test)]
#[path = "validator_tests.rs"]
mod tests;
