//! Unit tests for engine configuration

use agentflow::config::{BackoffKind, EngineConfig, FailurePolicy};
use agentflow::retry::Backoff;
use agentflow::template::MissingVariablePolicy;
use std::time::Duration;
use tempfile::tempdir;

#[test]
fn test_defaults() {
    let config = EngineConfig::default();
    assert_eq!(config.default_timeout(), Duration::from_millis(60_000));
    assert_eq!(config.failure_policy, FailurePolicy::Abort);
    assert_eq!(config.missing_variables, MissingVariablePolicy::Empty);
    assert_eq!(config.backoff(), Backoff::None);
    assert_eq!(config.max_trace_events, 1000);
}

#[test]
fn test_load_explicit_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("agentflow.toml");
    std::fs::write(
        &path,
        "default_timeout_ms = 2500\nretry_backoff = \"exponential\"\nretry_delay_ms = 100\nmax_retry_delay_ms = 1000\nfailure_policy = \"continue\"\nmissing_variables = \"keep\"\n",
    )
    .unwrap();

    let config = EngineConfig::load(Some(path.to_str().unwrap())).unwrap();
    assert_eq!(config.default_timeout_ms, 2500);
    assert_eq!(config.retry_backoff, BackoffKind::Exponential);
    assert_eq!(config.failure_policy, FailurePolicy::Continue);
    assert_eq!(config.missing_variables, MissingVariablePolicy::Keep);
    assert_eq!(
        config.backoff(),
        Backoff::Exponential {
            initial: Duration::from_millis(100),
            max: Duration::from_millis(1000),
        }
    );
}

#[test]
fn test_missing_explicit_file_is_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nope.toml");
    assert!(EngineConfig::load(Some(path.to_str().unwrap())).is_err());
}

#[test]
fn test_env_style_overrides() {
    let mut config = EngineConfig::default();
    config
        .apply_overrides(|key| match key {
            "AGENTFLOW_DEFAULT_TIMEOUT_MS" => Some("750".to_string()),
            "AGENTFLOW_FAILURE_POLICY" => Some("continue".to_string()),
            _ => None,
        })
        .unwrap();
    assert_eq!(config.default_timeout_ms, 750);
    assert_eq!(config.failure_policy, FailurePolicy::Continue);
}

#[test]
fn test_zero_timeout_rejected() {
    let config = EngineConfig {
        default_timeout_ms: 0,
        ..EngineConfig::default()
    };
    assert!(config.validate().is_err());
}
