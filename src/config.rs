//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use crate::resolution::{ManagerConfig, StateMachineConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub resolution: ResolutionConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub prefetch: PrefetchConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Tier selection configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ResolutionConfig {
    #[serde(default = "default_coarse_threshold")]
    pub coarse_threshold_us: i64,

    #[serde(default = "default_medium_threshold")]
    pub medium_threshold_us: i64,

    #[serde(default = "default_hysteresis")]
    pub hysteresis: f64,

    #[serde(default = "default_min_switch_interval")]
    pub min_switch_interval_ms: u64,

    #[serde(default = "default_zoom_tolerance")]
    pub zoom_tolerance: f64,

    #[serde(default = "default_transition_zone")]
    pub transition_zone: f64,

    #[serde(default = "default_prefetch_distance")]
    pub prefetch_distance: f64,
}

fn default_coarse_threshold() -> i64 {
    7_200_000_000 // 2 hours
}

fn default_medium_threshold() -> i64 {
    60_000_000 // 1 minute
}

fn default_hysteresis() -> f64 {
    0.05
}

fn default_min_switch_interval() -> u64 {
    100
}

fn default_zoom_tolerance() -> f64 {
    0.02
}

fn default_transition_zone() -> f64 {
    0.20
}

fn default_prefetch_distance() -> f64 {
    0.35
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            coarse_threshold_us: default_coarse_threshold(),
            medium_threshold_us: default_medium_threshold(),
            hysteresis: default_hysteresis(),
            min_switch_interval_ms: default_min_switch_interval(),
            zoom_tolerance: default_zoom_tolerance(),
            transition_zone: default_transition_zone(),
            prefetch_distance: default_prefetch_distance(),
        }
    }
}

/// Chunk and tier cache configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size_us: i64,

    #[serde(default = "default_capacity")]
    pub capacity: usize,

    #[serde(default = "default_warm_capacity")]
    pub warm_capacity: usize,

    #[serde(default = "default_detail_limit")]
    pub detail_limit: usize,

    #[serde(default)]
    pub preload_medium: bool,
}

fn default_chunk_size() -> i64 {
    60_000_000 // 1 minute
}

fn default_capacity() -> usize {
    50
}

fn default_warm_capacity() -> usize {
    8
}

fn default_detail_limit() -> usize {
    100_000
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            chunk_size_us: default_chunk_size(),
            capacity: default_capacity(),
            warm_capacity: default_warm_capacity(),
            detail_limit: default_detail_limit(),
            preload_medium: false,
        }
    }
}

/// Background prefetch configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PrefetchConfig {
    #[serde(default = "default_auto_adjacent")]
    pub auto_adjacent: bool,

    #[serde(default = "default_adjacent_count")]
    pub adjacent_count: usize,

    #[serde(default)]
    pub idle_delay_ms: u64,
}

fn default_auto_adjacent() -> bool {
    true
}

fn default_adjacent_count() -> usize {
    2
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            auto_adjacent: default_auto_adjacent(),
            adjacent_count: default_adjacent_count(),
            idle_delay_ms: 0,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,

    pub file: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Self::parse(&content).map_err(|e| match e {
            ConfigError::Parse { error, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                error,
            },
            other => other,
        })
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: PathBuf::new(),
            error: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("netzoom").join("config.toml")),
            Some(PathBuf::from("/etc/netzoom/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path_opt in config_paths.iter().flatten() {
            if path_opt.exists() {
                match Self::load_with_env(path_opt) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path_opt);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path_opt, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from any key lookup (unparseable values are ignored)
    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parsed<T: std::str::FromStr>(value: Option<String>) -> Option<T> {
            value.and_then(|v| v.trim().parse().ok())
        }

        // Resolution overrides
        if let Some(v) = parsed(lookup("NETZOOM_COARSE_THRESHOLD_US")) {
            self.resolution.coarse_threshold_us = v;
        }
        if let Some(v) = parsed(lookup("NETZOOM_MEDIUM_THRESHOLD_US")) {
            self.resolution.medium_threshold_us = v;
        }
        if let Some(v) = parsed(lookup("NETZOOM_HYSTERESIS")) {
            self.resolution.hysteresis = v;
        }

        // Cache overrides
        if let Some(v) = parsed(lookup("NETZOOM_CHUNK_SIZE_US")) {
            self.cache.chunk_size_us = v;
        }
        if let Some(v) = parsed(lookup("NETZOOM_CACHE_CAPACITY")) {
            self.cache.capacity = v;
        }
        if let Some(v) = parsed(lookup("NETZOOM_PRELOAD_MEDIUM")) {
            self.cache.preload_medium = v;
        }

        // Prefetch overrides
        if let Some(v) = parsed(lookup("NETZOOM_PREFETCH_ADJACENT")) {
            self.prefetch.auto_adjacent = v;
        }

        // Logging overrides
        if let Some(level) = lookup("NETZOOM_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("NETZOOM_LOG_FORMAT") {
            self.logging.format = format;
        }
    }

    /// Check field ranges that TOML alone cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.chunk_size_us <= 0 {
            return Err(ConfigError::Invalid(format!(
                "cache.chunk_size_us must be positive, got {}",
                self.cache.chunk_size_us
            )));
        }
        if self.cache.capacity == 0 {
            return Err(ConfigError::Invalid(
                "cache.capacity must be at least 1".to_string(),
            ));
        }
        self.state_machine_config()
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    fn state_machine_config(&self) -> StateMachineConfig {
        let r = &self.resolution;
        StateMachineConfig {
            coarse_threshold: r.coarse_threshold_us,
            medium_threshold: r.medium_threshold_us,
            hysteresis: r.hysteresis,
            min_switch_interval: Duration::from_millis(r.min_switch_interval_ms),
            zoom_tolerance: r.zoom_tolerance,
            transition_zone: r.transition_zone,
            prefetch_distance: r.prefetch_distance,
        }
    }

    /// Runtime manager configuration
    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            state_machine: self.state_machine_config(),
            chunk_size: self.cache.chunk_size_us,
            cache_capacity: self.cache.capacity,
            warm_capacity: self.cache.warm_capacity,
            detail_limit: self.cache.detail_limit,
            preload_medium: self.cache.preload_medium,
            adjacent_count: self.prefetch.adjacent_count,
            auto_prefetch_adjacent: self.prefetch.auto_adjacent,
            prefetch_idle: Duration::from_millis(self.prefetch.idle_delay_ms),
            ..ManagerConfig::default()
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# netzoom Configuration
#
# Environment variables override these settings:
# - NETZOOM_COARSE_THRESHOLD_US
# - NETZOOM_MEDIUM_THRESHOLD_US
# - NETZOOM_HYSTERESIS
# - NETZOOM_CHUNK_SIZE_US
# - NETZOOM_CACHE_CAPACITY
# - NETZOOM_PRELOAD_MEDIUM
# - NETZOOM_PREFETCH_ADJACENT
# - NETZOOM_LOG_LEVEL
# - NETZOOM_LOG_FORMAT

[resolution]
# Spans above this use the coarse tier (µs); clamped to the dataset extent
coarse_threshold_us = 7200000000

# Spans below this use the fine tier (µs)
medium_threshold_us = 60000000

# Fraction a span must clear a threshold by before switching back
hysteresis = 0.05

# Minimum time between two tier switches (ms)
min_switch_interval_ms = 100

# Relative span change that counts as a zoom gesture
zoom_tolerance = 0.02

# Cross-fade zone around each threshold
transition_zone = 0.20

# Warm the finer tier within this fraction above its threshold
prefetch_distance = 0.35

[cache]
# Fine-tier chunk width (µs)
chunk_size_us = 60000000

# Maximum cached chunks
capacity = 50

# Maximum warmed medium views
warm_capacity = 8

# Record cap per chunk fetch
detail_limit = 100000

# Load whole-dataset medium bins at startup
preload_medium = false

[prefetch]
# Queue neighbouring chunks after each fine-tier view
auto_adjacent = true

# Neighbours queued on each side
adjacent_count = 2

# Extra pause between prefetched chunks (ms)
idle_delay_ms = 0

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"

# Optional log file path
# file = "/var/log/netzoom/netzoom.log"
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_default_template_matches_defaults() {
        let config = Config::parse(&generate_default_config()).unwrap();
        let defaults = Config::default();

        assert_eq!(
            config.resolution.coarse_threshold_us,
            defaults.resolution.coarse_threshold_us
        );
        assert_eq!(config.cache.chunk_size_us, defaults.cache.chunk_size_us);
        assert_eq!(config.cache.capacity, 50);
        assert_eq!(config.prefetch.adjacent_count, 2);
        assert_eq!(config.logging.format, "pretty");
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config = Config::parse(
            r#"
            [cache]
            capacity = 12

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();

        assert_eq!(config.cache.capacity, 12);
        assert_eq!(config.cache.detail_limit, 100_000);
        assert_eq!(config.resolution.hysteresis, 0.05);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_invalid_values_rejected() {
        let inverted = Config::parse(
            r#"
            [resolution]
            coarse_threshold_us = 1000
            medium_threshold_us = 5000
            "#,
        );
        assert!(matches!(inverted, Err(ConfigError::Invalid(_))));

        let empty_cache = Config::parse("[cache]\ncapacity = 0\n");
        assert!(matches!(empty_cache, Err(ConfigError::Invalid(_))));

        let garbage = Config::parse("[cache\n");
        assert!(matches!(garbage, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[prefetch]\nauto_adjacent = false\nidle_delay_ms = 5").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert!(!config.prefetch.auto_adjacent);
        assert_eq!(config.prefetch.idle_delay_ms, 5);

        let missing = Config::load(Path::new("/nonexistent/netzoom.toml"));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_overrides_apply_and_ignore_garbage() {
        let vars: HashMap<&str, &str> = [
            ("NETZOOM_CACHE_CAPACITY", "7"),
            ("NETZOOM_CHUNK_SIZE_US", "not-a-number"),
            ("NETZOOM_PREFETCH_ADJACENT", "false"),
            ("NETZOOM_LOG_FORMAT", "json"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.cache.capacity, 7);
        assert_eq!(config.cache.chunk_size_us, 60_000_000);
        assert!(!config.prefetch.auto_adjacent);
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_manager_config_mapping() {
        let mut config = Config::default();
        config.resolution.min_switch_interval_ms = 250;
        config.cache.preload_medium = true;
        config.prefetch.idle_delay_ms = 3;

        let manager = config.manager_config();
        assert_eq!(manager.state_machine.min_switch_interval, Duration::from_millis(250));
        assert_eq!(manager.state_machine.medium_threshold, 60_000_000);
        assert_eq!(manager.chunk_size, 60_000_000);
        assert!(manager.preload_medium);
        assert_eq!(manager.prefetch_idle, Duration::from_millis(3));
        assert_eq!(manager.event_capacity, ManagerConfig::default().event_capacity);
    }
}
