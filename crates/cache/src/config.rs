//! Cache configuration
//!
//! Settings can be built programmatically, read from environment variables,
//! or loaded from a JSON file in the platform configuration directory.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::memory_budget::MemoryBudgetConfig;

pub const ENV_MAX_ENTRIES: &str = "FORMULA_CACHE_MAX_ENTRIES";
pub const ENV_RETENTION_MB: &str = "FORMULA_CACHE_RETENTION_MB";
pub const ENV_SINGLE_FLIGHT: &str = "FORMULA_CACHE_SINGLE_FLIGHT";

/// Errors that can occur while loading or saving configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: String, value: String },
    #[error("unable to resolve configuration directory")]
    NoConfigDirectory,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Configuration for a [`RenderCache`](crate::RenderCache)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of map entries (at least 1)
    pub max_entries: usize,
    /// Bytes of raster the cache keeps alive on its own
    pub retention_budget: usize,
    /// Retention utilization (0.0 to 1.0) that triggers releasing
    pub pressure_threshold: f64,
    /// Retention utilization (0.0 to 1.0) to release down to
    pub target_utilization: f64,
    /// Collapse concurrent misses on one signature into a single render
    pub single_flight: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let budget = MemoryBudgetConfig::default();
        Self {
            max_entries: usize::MAX,
            retention_budget: budget.total_budget,
            pressure_threshold: budget.pressure_threshold,
            target_utilization: budget.target_utilization,
            single_flight: true,
        }
    }
}

impl CacheConfig {
    /// Sets the maximum number of entries; values below 1 become 1.
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries.max(1);
        self
    }

    /// Sets the retention budget in megabytes, saturating at `usize::MAX` bytes.
    pub fn with_retention_mb(mut self, mb: usize) -> Self {
        self.retention_budget = mb.saturating_mul(1024 * 1024);
        self
    }

    /// Sets the retention budget in bytes.
    pub fn with_retention_bytes(mut self, bytes: usize) -> Self {
        self.retention_budget = bytes;
        self
    }

    pub fn with_single_flight(mut self, enabled: bool) -> Self {
        self.single_flight = enabled;
        self
    }

    /// Budget configuration for the retention ring
    pub fn memory_budget(&self) -> MemoryBudgetConfig {
        MemoryBudgetConfig::with_bytes(self.retention_budget)
            .with_pressure_threshold(self.pressure_threshold)
            .with_target_utilization(self.target_utilization)
    }

    /// Default configuration file location
    ///
    /// - Linux: ~/.config/formula-cache/cache.json
    /// - macOS: ~/Library/Application Support/formula-cache/cache.json
    /// - Windows: %APPDATA%\formula-cache\cache.json
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let dir = dirs::config_dir().ok_or(ConfigError::NoConfigDirectory)?;
        Ok(dir.join("formula-cache").join("cache.json"))
    }

    /// Loads the configuration file at the default location, falling back to
    /// defaults when it does not exist, then applies environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path()?;
        let config = if path.exists() {
            Self::from_file(&path)?
        } else {
            Self::default()
        };
        config.apply_env()
    }

    /// Loads configuration from environment variables on top of defaults.
    ///
    /// - `FORMULA_CACHE_MAX_ENTRIES`: maximum number of entries
    /// - `FORMULA_CACHE_RETENTION_MB`: retention budget in MB
    /// - `FORMULA_CACHE_SINGLE_FLIGHT`: `true`/`false` (or `1`/`0`)
    ///
    /// # Errors
    /// Returns an error if any variable holds an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().apply_env()
    }

    /// Applies environment overrides to this configuration.
    pub fn apply_env(mut self) -> Result<Self, ConfigError> {
        if let Ok(val) = std::env::var(ENV_MAX_ENTRIES) {
            let max: usize = parse_var(ENV_MAX_ENTRIES, &val)?;
            self = self.with_max_entries(max);
        }

        if let Ok(val) = std::env::var(ENV_RETENTION_MB) {
            let mb: usize = parse_var(ENV_RETENTION_MB, &val)?;
            self.retention_budget =
                mb.checked_mul(1024 * 1024)
                    .ok_or_else(|| ConfigError::InvalidValue {
                        key: ENV_RETENTION_MB.to_string(),
                        value: val,
                    })?;
        }

        if let Ok(val) = std::env::var(ENV_SINGLE_FLIGHT) {
            self.single_flight = match val.trim() {
                "1" => true,
                "0" => false,
                other => parse_var(ENV_SINGLE_FLIGHT, other)?,
            };
        }

        Ok(self)
    }

    /// Loads configuration from a JSON file. Missing fields take defaults.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let bytes = fs::read(path.as_ref())?;
        let config: Self = serde_json::from_slice(&bytes)?;
        let max_entries = config.max_entries;
        Ok(config.with_max_entries(max_entries))
    }

    /// Saves configuration to a JSON file, creating parent directories.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    const ALL_VARS: [&str; 3] = [ENV_MAX_ENTRIES, ENV_RETENTION_MB, ENV_SINGLE_FLIGHT];

    #[test]
    fn test_default_config() {
        let config = CacheConfig::default();
        assert_eq!(config.max_entries, usize::MAX);
        assert_eq!(config.retention_budget, 64 * 1024 * 1024);
        assert!(config.single_flight);
    }

    #[test]
    fn test_builder_methods() {
        let config = CacheConfig::default()
            .with_max_entries(0)
            .with_retention_mb(8)
            .with_single_flight(false);

        assert_eq!(config.max_entries, 1);
        assert_eq!(config.retention_budget, 8 * 1024 * 1024);
        assert!(!config.single_flight);
    }

    #[test]
    fn test_memory_budget_conversion() {
        let config = CacheConfig::default().with_retention_bytes(1000);
        let budget = config.memory_budget();
        assert_eq!(budget.total_budget, 1000);
        assert_eq!(budget.pressure_threshold, config.pressure_threshold);
        assert_eq!(budget.target_utilization, config.target_utilization);
    }

    #[test]
    #[serial]
    fn test_from_env() {
        let _guard = EnvGuard::new(&ALL_VARS);

        env::set_var(ENV_MAX_ENTRIES, "128");
        env::set_var(ENV_RETENTION_MB, "16");
        env::set_var(ENV_SINGLE_FLIGHT, "0");

        let config = CacheConfig::from_env().unwrap();
        assert_eq!(config.max_entries, 128);
        assert_eq!(config.retention_budget, 16 * 1024 * 1024);
        assert!(!config.single_flight);
    }

    #[test]
    #[serial]
    fn test_from_env_partial() {
        let _guard = EnvGuard::new(&ALL_VARS);

        env::remove_var(ENV_RETENTION_MB);
        env::remove_var(ENV_SINGLE_FLIGHT);
        env::set_var(ENV_MAX_ENTRIES, "0");

        let config = CacheConfig::from_env().unwrap();
        assert_eq!(config.max_entries, 1);
        assert_eq!(config.retention_budget, 64 * 1024 * 1024);
        assert!(config.single_flight);
    }

    #[test]
    #[serial]
    fn test_from_env_invalid() {
        let _guard = EnvGuard::new(&ALL_VARS);

        env::set_var(ENV_SINGLE_FLIGHT, "sometimes");
        let err = CacheConfig::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == ENV_SINGLE_FLIGHT));

        env::remove_var(ENV_SINGLE_FLIGHT);
        env::set_var(ENV_MAX_ENTRIES, "lots");
        assert!(CacheConfig::from_env().is_err());
    }

    #[test]
    #[serial]
    fn test_from_env_retention_overflow() {
        let _guard = EnvGuard::new(&ALL_VARS);

        env::remove_var(ENV_MAX_ENTRIES);
        env::remove_var(ENV_SINGLE_FLIGHT);
        env::set_var(ENV_RETENTION_MB, usize::MAX.to_string());

        let err = CacheConfig::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == ENV_RETENTION_MB));
    }

    #[test]
    fn test_retention_mb_builder_saturates() {
        let config = CacheConfig::default().with_retention_mb(usize::MAX);
        assert_eq!(config.retention_budget, usize::MAX);
    }

    // Saves and restores environment variables around a test
    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new(var_names: &[&str]) -> Self {
            let vars = var_names
                .iter()
                .map(|name| (name.to_string(), env::var(name).ok()))
                .collect();
            Self { vars }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (name, value) in &self.vars {
                match value {
                    Some(v) => env::set_var(name, v),
                    None => env::remove_var(name),
                }
            }
        }
    }

    #[test]
    fn test_file_save_and_load() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let path = temp.path().join("nested").join("cache.json");

        let config = CacheConfig::default()
            .with_max_entries(42)
            .with_retention_mb(3)
            .with_single_flight(false);
        config.save_to_file(&path).unwrap();

        let loaded = CacheConfig::from_file(&path).unwrap();
        assert_eq!(config, loaded);
    }

    #[test]
    fn test_from_file_partial_and_clamped() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let path = temp.path().join("cache.json");
        fs::write(&path, r#"{ "max_entries": 0 }"#).unwrap();

        let config = CacheConfig::from_file(&path).unwrap();
        assert_eq!(config.max_entries, 1);
        assert!(config.single_flight);
    }

    #[test]
    fn test_from_file_errors() {
        let temp = tempfile::tempdir().expect("temp dir should be created");

        let missing = CacheConfig::from_file(temp.path().join("missing.json"));
        assert!(matches!(missing, Err(ConfigError::Io(_))));

        let path = temp.path().join("broken.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(CacheConfig::from_file(&path), Err(ConfigError::Serde(_))));
    }
}
