use super::*;
use crate::schema::{PaginationConfig, StoreConfig, WorkerConfig};

fn with_lease() -> Config {
    Config {
        store: StoreConfig {
            lease_secs: Some(60),
            ..Default::default()
        },
        ..Default::default()
    }
}

#[test]
fn test_valid_config() {
    let result = ConfigValidator::validate(&with_lease());
    assert!(result.is_valid());
    assert!(result.warnings.is_empty());
}

#[test]
fn test_missing_lease_is_a_warning() {
    let result = ConfigValidator::validate(&Config::default());
    assert!(result.is_valid());
    assert!(result.warnings.iter().any(|w| w.path == "store.lease_secs"));
}

#[test]
fn test_zero_concurrency() {
    let config = Config {
        worker: WorkerConfig {
            max_concurrency: 0,
            ..Default::default()
        },
        ..with_lease()
    };
    let result = ConfigValidator::validate(&config);
    assert!(!result.is_valid());
    assert!(result.errors.iter().any(|e| e.path == "worker.max_concurrency"));
}

#[test]
fn test_default_limit_above_max() {
    let config = Config {
        pagination: PaginationConfig {
            default_limit: 200,
            max_limit: 100,
        },
        ..with_lease()
    };
    let result = ConfigValidator::validate(&config);
    assert!(result.errors.iter().any(|e| e.path == "pagination.default_limit"));
}

#[test]
fn test_zero_lease() {
    let config = Config {
        store: StoreConfig {
            lease_secs: Some(0),
            ..Default::default()
        },
        ..Default::default()
    };
    assert!(!ConfigValidator::validate(&config).is_valid());
}
