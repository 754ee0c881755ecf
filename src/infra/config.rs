//! Configuration loading from TOML files
//!
//! Config file is selected via the --config command line argument
//! (default: config/dev.toml). A missing or unparsable file falls
//! back to built-in defaults with a warning.

use anyhow::Context;
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct StoreConfig {
    /// Unique store identifier (e.g., "store-42")
    #[serde(default = "default_store_id")]
    pub id: String,
    /// Display name used on receipts
    #[serde(default = "default_store_name")]
    pub name: String,
}

fn default_store_id() -> String {
    "store".to_string()
}

fn default_store_name() -> String {
    "Checkout Free Store".to_string()
}

/// One camera entry in the config file
#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    pub id: String,
    pub name: String,
    /// Customers seen on an exit camera are checked out
    #[serde(default)]
    pub exit: bool,
    /// Frame buffer capacity override
    #[serde(default)]
    pub buffer_size: Option<usize>,
    /// Path to a scripted source JSON (synthetic frames)
    #[serde(default)]
    pub script: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackerConfig {
    #[serde(default = "default_detection_window_ms")]
    pub detection_window_ms: u64,
    #[serde(default = "default_min_return_ms")]
    pub min_return_ms: u64,
    #[serde(default = "default_return_confidence")]
    pub return_confidence: f32,
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,
}

fn default_detection_window_ms() -> u64 {
    2_000
}

fn default_min_return_ms() -> u64 {
    500
}

fn default_return_confidence() -> f32 {
    0.8
}

fn default_confidence_threshold() -> f32 {
    0.5
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            detection_window_ms: default_detection_window_ms(),
            min_return_ms: default_min_return_ms(),
            return_confidence: default_return_confidence(),
            confidence_threshold: default_confidence_threshold(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionsConfig {
    #[serde(default = "default_session_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

fn default_session_timeout_secs() -> u64 {
    3_600
}

fn default_retention_secs() -> u64 {
    86_400
}

fn default_max_concurrent() -> usize {
    1_000
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_session_timeout_secs(),
            retention_secs: default_retention_secs(),
            max_concurrent: default_max_concurrent(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CartsConfig {
    #[serde(default = "default_cart_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_cart_timeout_secs() -> u64 {
    300
}

impl Default for CartsConfig {
    fn default() -> Self {
        Self { timeout_secs: default_cart_timeout_secs() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PricingConfig {
    /// CSV file of `label,price` lines
    #[serde(default = "default_pricing_file")]
    pub file: String,
}

fn default_pricing_file() -> String {
    "config/prices.csv".to_string()
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self { file: default_pricing_file() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EgressConfig {
    /// File path for transaction egress (JSONL format)
    #[serde(default = "default_egress_file")]
    pub file: String,
    /// Directory for per-transaction JSON records (unset to disable)
    #[serde(default)]
    pub records_dir: Option<String>,
}

impl Default for EgressConfig {
    fn default() -> Self {
        Self { file: default_egress_file(), records_dir: None }
    }
}

fn default_egress_file() -> String {
    "transactions.jsonl".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval_secs")]
    pub interval_secs: u64,
}

fn default_metrics_interval_secs() -> u64 {
    10
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval_secs() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// How long a camera task waits for the next frame
    #[serde(default = "default_frame_poll_ms")]
    pub frame_poll_ms: u64,
    /// Expiry sweep interval for sessions and carts
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

fn default_frame_poll_ms() -> u64 {
    500
}

fn default_cleanup_interval_secs() -> u64 {
    60
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            frame_poll_ms: default_frame_poll_ms(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub cameras: Vec<CameraConfig>,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub carts: CartsConfig,
    #[serde(default)]
    pub pricing: PricingConfig,
    #[serde(default)]
    pub egress: EgressConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    store_id: String,
    store_name: String,
    cameras: Vec<CameraConfig>,
    detection_window_ms: u64,
    min_return_ms: u64,
    return_confidence: f32,
    confidence_threshold: f32,
    session_timeout_secs: u64,
    session_retention_secs: u64,
    max_concurrent_sessions: usize,
    cart_timeout_secs: u64,
    pricing_file: String,
    egress_file: String,
    records_dir: Option<String>,
    metrics_interval_secs: u64,
    frame_poll_ms: u64,
    cleanup_interval_secs: u64,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_id: default_store_id(),
            store_name: default_store_name(),
            cameras: Vec::new(),
            detection_window_ms: default_detection_window_ms(),
            min_return_ms: default_min_return_ms(),
            return_confidence: default_return_confidence(),
            confidence_threshold: default_confidence_threshold(),
            session_timeout_secs: default_session_timeout_secs(),
            session_retention_secs: default_retention_secs(),
            max_concurrent_sessions: default_max_concurrent(),
            cart_timeout_secs: default_cart_timeout_secs(),
            pricing_file: default_pricing_file(),
            egress_file: default_egress_file(),
            records_dir: None,
            metrics_interval_secs: default_metrics_interval_secs(),
            frame_poll_ms: default_frame_poll_ms(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            config_file: "default".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self {
            store_id: toml_config.store.id,
            store_name: toml_config.store.name,
            cameras: toml_config.cameras,
            detection_window_ms: toml_config.tracker.detection_window_ms,
            min_return_ms: toml_config.tracker.min_return_ms,
            return_confidence: toml_config.tracker.return_confidence,
            confidence_threshold: toml_config.tracker.confidence_threshold,
            session_timeout_secs: toml_config.sessions.timeout_secs,
            session_retention_secs: toml_config.sessions.retention_secs,
            max_concurrent_sessions: toml_config.sessions.max_concurrent,
            cart_timeout_secs: toml_config.carts.timeout_secs,
            pricing_file: toml_config.pricing.file,
            egress_file: toml_config.egress.file,
            records_dir: toml_config.egress.records_dir,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            frame_poll_ms: toml_config.pipeline.frame_poll_ms,
            cleanup_interval_secs: toml_config.pipeline.cleanup_interval_secs,
            config_file: path.display().to_string(),
        })
    }

    /// Load configuration - tries the TOML file, falls back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {}. Using defaults.", e);
                Self::default()
            }
        }
    }

    // Getters for all config fields
    pub fn store_id(&self) -> &str {
        &self.store_id
    }

    pub fn store_name(&self) -> &str {
        &self.store_name
    }

    pub fn cameras(&self) -> &[CameraConfig] {
        &self.cameras
    }

    /// Ids of cameras flagged as exits
    pub fn exit_camera_ids(&self) -> Vec<&str> {
        self.cameras.iter().filter(|c| c.exit).map(|c| c.id.as_str()).collect()
    }

    pub fn detection_window_ms(&self) -> u64 {
        self.detection_window_ms
    }

    pub fn min_return_ms(&self) -> u64 {
        self.min_return_ms
    }

    pub fn return_confidence(&self) -> f32 {
        self.return_confidence
    }

    pub fn confidence_threshold(&self) -> f32 {
        self.confidence_threshold
    }

    pub fn session_timeout_ms(&self) -> u64 {
        self.session_timeout_secs * 1_000
    }

    pub fn session_retention_ms(&self) -> u64 {
        self.session_retention_secs * 1_000
    }

    pub fn max_concurrent_sessions(&self) -> usize {
        self.max_concurrent_sessions
    }

    pub fn cart_timeout_ms(&self) -> u64 {
        self.cart_timeout_secs * 1_000
    }

    pub fn pricing_file(&self) -> &str {
        &self.pricing_file
    }

    pub fn egress_file(&self) -> &str {
        &self.egress_file
    }

    pub fn records_dir(&self) -> Option<&str> {
        self.records_dir.as_deref()
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn frame_poll_ms(&self) -> u64 {
        self.frame_poll_ms
    }

    pub fn cleanup_interval_secs(&self) -> u64 {
        self.cleanup_interval_secs
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.store_id(), "store");
        assert_eq!(config.detection_window_ms(), 2_000);
        assert_eq!(config.min_return_ms(), 500);
        assert_eq!(config.return_confidence(), 0.8);
        assert_eq!(config.session_timeout_ms(), 3_600_000);
        assert_eq!(config.session_retention_ms(), 86_400_000);
        assert_eq!(config.max_concurrent_sessions(), 1_000);
        assert_eq!(config.cart_timeout_ms(), 300_000);
        assert_eq!(config.metrics_interval_secs(), 10);
        assert!(config.cameras().is_empty());
    }

    #[test]
    fn test_parse_toml() {
        let toml = r#"
            [store]
            id = "store-42"
            name = "Corner Shop"

            [[cameras]]
            id = "cam-1"
            name = "entrance"

            [[cameras]]
            id = "cam-2"
            name = "exit gate"
            exit = true
            buffer_size = 20

            [tracker]
            detection_window_ms = 1500

            [sessions]
            timeout_secs = 1800
        "#;
        let parsed: TomlConfig = toml::from_str(toml).unwrap();
        assert_eq!(parsed.store.id, "store-42");
        assert_eq!(parsed.cameras.len(), 2);
        assert!(!parsed.cameras[0].exit);
        assert!(parsed.cameras[1].exit);
        assert_eq!(parsed.cameras[1].buffer_size, Some(20));
        assert_eq!(parsed.tracker.detection_window_ms, 1500);
        // Unspecified fields keep their defaults
        assert_eq!(parsed.tracker.min_return_ms, 500);
        assert_eq!(parsed.sessions.timeout_secs, 1800);
        assert_eq!(parsed.sessions.max_concurrent, 1000);
    }

    #[test]
    fn test_exit_camera_ids() {
        let toml = r#"
            [[cameras]]
            id = "cam-1"
            name = "aisle"

            [[cameras]]
            id = "cam-exit"
            name = "exit"
            exit = true
        "#;
        let parsed: TomlConfig = toml::from_str(toml).unwrap();
        let config = Config {
            cameras: parsed.cameras,
            ..Config::default()
        };
        assert_eq!(config.exit_camera_ids(), vec!["cam-exit"]);
    }

    #[test]
    fn test_load_missing_file_falls_back() {
        let config = Config::load_from_path("/nonexistent/config.toml");
        assert_eq!(config.config_file(), "default");
    }

    #[test]
    fn test_egress_defaults() {
        let egress = EgressConfig::default();
        assert_eq!(egress.file, "transactions.jsonl");
        assert!(egress.records_dir.is_none());
    }
}
