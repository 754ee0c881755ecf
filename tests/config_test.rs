//! Integration tests for configuration loading

use cartwatch::infra::Config;
use std::io::Write;
use tempfile::NamedTempFile;

#[test]
fn test_load_config_from_file() {
    let mut temp_file = NamedTempFile::new().unwrap();

    let config_content = r#"
[store]
id = "test-store"
name = "Test Store"

[[cameras]]
id = "cam-1"
name = "entrance"
script = "config/demo_script.json"

[[cameras]]
id = "cam-exit"
name = "exit gate"
exit = true
buffer_size = 16

[tracker]
detection_window_ms = 1500
min_return_ms = 400
return_confidence = 0.75
confidence_threshold = 0.6

[sessions]
timeout_secs = 1800
retention_secs = 43200
max_concurrent = 50

[carts]
timeout_secs = 120

[pricing]
file = "prices/test.csv"

[egress]
file = "out/transactions.jsonl"
records_dir = "out/records"

[metrics]
interval_secs = 5

[pipeline]
frame_poll_ms = 250
cleanup_interval_secs = 30
"#;

    temp_file.write_all(config_content.as_bytes()).unwrap();
    temp_file.flush().unwrap();

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.store_id(), "test-store");
    assert_eq!(config.store_name(), "Test Store");
    assert_eq!(config.cameras().len(), 2);
    assert_eq!(config.cameras()[0].script.as_deref(), Some("config/demo_script.json"));
    assert_eq!(config.cameras()[1].buffer_size, Some(16));
    assert_eq!(config.exit_camera_ids(), vec!["cam-exit"]);
    assert_eq!(config.detection_window_ms(), 1500);
    assert_eq!(config.min_return_ms(), 400);
    assert_eq!(config.confidence_threshold(), 0.6);
    assert_eq!(config.session_timeout_ms(), 1_800_000);
    assert_eq!(config.session_retention_ms(), 43_200_000);
    assert_eq!(config.max_concurrent_sessions(), 50);
    assert_eq!(config.cart_timeout_ms(), 120_000);
    assert_eq!(config.pricing_file(), "prices/test.csv");
    assert_eq!(config.egress_file(), "out/transactions.jsonl");
    assert_eq!(config.records_dir(), Some("out/records"));
    assert_eq!(config.metrics_interval_secs(), 5);
    assert_eq!(config.frame_poll_ms(), 250);
    assert_eq!(config.cleanup_interval_secs(), 30);
}

#[test]
fn test_minimal_config_uses_defaults() {
    let mut temp_file = NamedTempFile::new().unwrap();

    let config_content = r#"
[[cameras]]
id = "cam-1"
name = "solo"
"#;
    temp_file.write_all(config_content.as_bytes()).unwrap();
    temp_file.flush().unwrap();

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.cameras().len(), 1);
    assert!(!config.cameras()[0].exit);
    assert!(config.exit_camera_ids().is_empty());
    assert_eq!(config.detection_window_ms(), 2000);
    assert_eq!(config.min_return_ms(), 500);
    assert_eq!(config.session_timeout_ms(), 3_600_000);
    assert_eq!(config.cart_timeout_ms(), 300_000);
    assert_eq!(config.egress_file(), "transactions.jsonl");
    assert!(config.records_dir().is_none());
}

#[test]
fn test_load_from_path_fallback() {
    let config = Config::load_from_path("/nonexistent/config.toml");
    assert_eq!(config.config_file(), "default");
    assert_eq!(config.store_id(), "store");
    assert!(config.cameras().is_empty());
}
