use super::*;
use crate::core::errors::CleanupError;

fn expect_validation_error<T: std::fmt::Debug>(result: Result<T>) -> CleanupError {
    result.expect_err("expected validation failure")
}

#[test]
fn default_config_validates_successfully() {
    CleanupConfig::default().validate().expect("default config");
}

#[test]
fn rejects_min_batch_above_max_batch() {
    let mut config = CleanupConfig::default();
    config.batching.min = 200;
    config.batching.max = 100;
    let err = expect_validation_error(config.validate());
    assert!(matches!(err, CleanupError::Config { .. }));
}

#[test]
fn rejects_zero_min_batch() {
    let mut config = CleanupConfig::default();
    config.batching.min = 0;
    expect_validation_error(config.validate());
}

#[test]
fn rejects_out_of_range_temperature() {
    let mut config = CleanupConfig::default();
    config.llm.temperature = 1.5;
    expect_validation_error(config.validate());
}

#[test]
fn rejects_empty_model_name() {
    let mut config = CleanupConfig::default();
    config.llm.model = "  ".to_string();
    expect_validation_error(config.validate());
}

#[test]
fn rejects_zero_max_entries() {
    let mut config = CleanupConfig::default();
    config.cache.max_entries = 0;
    expect_validation_error(config.validate());
}

#[test]
fn rejects_negative_cost_per_request() {
    let mut config = CleanupConfig::default();
    config.cost_per_request = -0.01;
    expect_validation_error(config.validate());
}

#[test]
fn unknown_keys_are_rejected_at_deserialization() {
    let json = serde_json::json!({
        "max_daily_requests": 10,
        "totally_unrecognized_option": true,
    });
    let result: std::result::Result<CleanupConfig, _> = serde_json::from_value(json);
    assert!(result.is_err());
}

#[test]
fn from_file_loads_yaml_by_extension() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("config.yaml");
    std::fs::write(&path, "max_daily_requests: 42\n").unwrap();
    let config = CleanupConfig::from_file(&path).expect("yaml config loads");
    assert_eq!(config.max_daily_requests, 42);
    assert_eq!(config.batching.min, BatchingConfig::default_min());
}

#[test]
fn from_file_loads_json_by_default() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, r#"{"max_daily_requests": 7}"#).unwrap();
    let config = CleanupConfig::from_file(&path).expect("json config loads");
    assert_eq!(config.max_daily_requests, 7);
}

#[test]
fn deserializes_with_defaults_for_missing_fields() {
    let json = serde_json::json!({});
    let config: CleanupConfig = serde_json::from_value(json).expect("empty object deserializes");
    assert_eq!(config.max_daily_requests, CleanupConfig::default_max_daily_requests());
    assert_eq!(config.batching.min, BatchingConfig::default_min());
    assert_eq!(config.llm.model, LlmConfig::default_model());
}
