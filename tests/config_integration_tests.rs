//! Configuration loading from files and environment

use confirmed_publisher::config::{ConfigLoader, ConfigurationError, PublisherConfig};
use std::io::Write;
use std::time::Duration;

fn config_file(suffix: &str, contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(suffix)
        .tempfile()
        .expect("create temp file");
    file.write_all(contents.as_bytes()).expect("write config");
    file
}

#[test]
fn test_yaml_file_is_loaded() {
    let file = config_file(
        ".yaml",
        r#"
confirms_enabled: true
max_retries: 0
confirm_timeout_seconds: 12
close_timeout_millis: -1
backoff:
  base_delay_millis: 250
  max_delay_millis: 4000
"#,
    );

    let config = ConfigLoader::new()
        .with_file(file.path())
        .with_env_prefix("PUBLISHER_IT_YAML")
        .load()
        .expect("yaml config loads");

    assert!(config.unbounded_retries());
    assert_eq!(config.confirm_timeout(), Duration::from_secs(12));
    assert_eq!(config.close_timeout(), None);
    assert_eq!(config.backoff.base_delay(), Duration::from_millis(250));
    assert_eq!(config.backoff.max_delay(), Duration::from_secs(4));
}

#[test]
fn test_json_file_is_loaded() {
    let file = config_file(".json", r#"{ "cache_sweep_interval_seconds": 3 }"#);

    let config = ConfigLoader::new()
        .with_file(file.path())
        .with_env_prefix("PUBLISHER_IT_JSON")
        .load()
        .expect("json config loads");

    assert_eq!(config.cache_sweep_interval(), Duration::from_secs(3));
    assert_eq!(config.max_retries, PublisherConfig::default().max_retries);
}

#[test]
fn test_nested_environment_override() {
    std::env::set_var("PUBLISHER_IT_NESTED_BACKOFF__BASE_DELAY_MILLIS", "50");
    std::env::set_var("PUBLISHER_IT_NESTED_CONFIRMS_ENABLED", "false");

    let config = ConfigLoader::new()
        .with_env_prefix("PUBLISHER_IT_NESTED")
        .load();

    std::env::remove_var("PUBLISHER_IT_NESTED_BACKOFF__BASE_DELAY_MILLIS");
    std::env::remove_var("PUBLISHER_IT_NESTED_CONFIRMS_ENABLED");

    let config = config.expect("environment config loads");
    assert_eq!(config.backoff.base_delay_millis, 50);
    assert!(!config.confirms_enabled);
}

#[test]
fn test_malformed_file_is_reported() {
    let file = config_file(".toml", "max_retries = [not valid");

    let result = ConfigLoader::new()
        .with_file(file.path())
        .with_env_prefix("PUBLISHER_IT_BROKEN")
        .load();

    assert!(matches!(
        result,
        Err(ConfigurationError::FileReadError { .. })
    ));
}

#[test]
fn test_backoff_cap_below_base_is_rejected() {
    let file = config_file(
        ".toml",
        "[backoff]\nbase_delay_millis = 5000\nmax_delay_millis = 100\n",
    );

    let result = ConfigLoader::new()
        .with_file(file.path())
        .with_env_prefix("PUBLISHER_IT_BACKOFF")
        .load();

    assert!(matches!(
        result,
        Err(ConfigurationError::InvalidValue { ref field, .. }) if field == "backoff.max_delay_millis"
    ));
}
