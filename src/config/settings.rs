//! Import and pool settings
//!
//! Tunables stored in ~/.bulkgres/config.toml. Every threshold here is a
//! load-test knob, not an invariant; the defaults target many short-lived
//! replicas sharing one database, so the pool stays deliberately small.

use crate::config::ConnectionConfig;
use crate::error::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub pool: PoolSettings,

    #[serde(default)]
    pub import: ImportSettings,

    #[serde(default)]
    pub security: SecuritySettings,
}

/// Connection pool sizing and retry budget
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSettings {
    /// Warm connections kept open at all times
    #[serde(default = "default_min_connections")]
    pub min_connections: usize,

    /// Hard ceiling on open connections (checked-out + idle)
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Maximum seconds to wait for a free pool slot
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,

    /// Attempts before acquire gives up and the pool reinitializes
    #[serde(default = "default_acquire_attempts")]
    pub acquire_attempts: u32,

    /// Base of the linear backoff between attempts (ms); attempt N waits N × base
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

/// Import engine thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportSettings {
    /// At or below this many accepted rows, execute one statement per row
    #[serde(default = "default_single_row_max")]
    pub single_row_max: usize,

    /// Rows per multi-row INSERT statement in the batched phase
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// At or above this many accepted rows, stream through COPY
    #[serde(default = "default_full_bulk_min")]
    pub full_bulk_min: usize,

    /// Create the destination table when it does not exist
    #[serde(default = "default_true")]
    pub create_missing_tables: bool,

    /// Add record columns missing from an existing destination
    #[serde(default = "default_true")]
    pub add_missing_columns: bool,
}

/// Field validation tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecuritySettings {
    /// Field names (lowercase) that may legitimately contain query text and
    /// therefore get the exhaustive pattern set
    #[serde(default = "default_critical_fields")]
    pub critical_fields: Vec<String>,

    /// Values longer than this are rejected outright
    #[serde(default = "default_max_value_len")]
    pub max_value_len: usize,
}

fn default_min_connections() -> usize {
    2
}

fn default_max_connections() -> usize {
    10
}

fn default_acquire_timeout_secs() -> u64 {
    10
}

fn default_acquire_attempts() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_single_row_max() -> usize {
    10
}

fn default_batch_size() -> usize {
    1000
}

fn default_full_bulk_min() -> usize {
    20_000
}

fn default_true() -> bool {
    true
}

fn default_critical_fields() -> Vec<String> {
    ["query", "sql", "command", "script", "code"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_max_value_len() -> usize {
    5000
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            min_connections: default_min_connections(),
            max_connections: default_max_connections(),
            acquire_timeout_secs: default_acquire_timeout_secs(),
            acquire_attempts: default_acquire_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self {
            single_row_max: default_single_row_max(),
            batch_size: default_batch_size(),
            full_bulk_min: default_full_bulk_min(),
            create_missing_tables: default_true(),
            add_missing_columns: default_true(),
        }
    }
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            critical_fields: default_critical_fields(),
            max_value_len: default_max_value_len(),
        }
    }
}

impl PoolSettings {
    /// Acquire timeout as a [`Duration`]
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    /// Linear backoff base as a [`Duration`]
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Load settings from the config file, falling back to defaults
pub fn load_settings() -> ConfigResult<Settings> {
    let path = ConnectionConfig::config_dir()?.join("config.toml");
    if !path.exists() {
        return Ok(Settings::default());
    }
    let content = std::fs::read_to_string(&path)
        .map_err(|e| ConfigError::NotFound(format!("Failed to read config file: {}", e)))?;
    let settings: Settings = toml::from_str(&content)?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_favor_small_pool() {
        let settings = Settings::default();
        assert_eq!(settings.pool.min_connections, 2);
        assert_eq!(settings.pool.max_connections, 10);
        assert_eq!(settings.pool.acquire_attempts, 3);
    }

    #[test]
    fn test_phase_thresholds_ordered() {
        let import = ImportSettings::default();
        assert!(import.single_row_max < import.batch_size);
        assert!(import.batch_size < import.full_bulk_min);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let settings: Settings = toml::from_str(
            r#"
            [pool]
            max_connections = 4

            [import]
            full_bulk_min = 5000
            "#,
        )
        .unwrap();
        assert_eq!(settings.pool.max_connections, 4);
        assert_eq!(settings.pool.min_connections, 2);
        assert_eq!(settings.import.full_bulk_min, 5000);
        assert_eq!(settings.import.batch_size, 1000);
        assert_eq!(settings.security.max_value_len, 5000);
    }

    #[test]
    fn test_critical_field_defaults() {
        let security = SecuritySettings::default();
        assert!(security.critical_fields.contains(&"sql".to_string()));
        assert!(security.critical_fields.contains(&"script".to_string()));
        assert_eq!(security.critical_fields.len(), 5);
    }
}
