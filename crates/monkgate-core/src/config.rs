use anyhow::Result;
use monkgate_storage::{AppId, Database};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::error::GateError;

/// Placeholder host identifier. `monkgate init` replaces it with a real
/// window class or bundle id.
pub const DEFAULT_HOST_APP_ID: &str = "com.monkmode.app";

/// Unlock window granted after a passed daily task
pub const DEFAULT_UNLOCK_MINUTES: u64 = 20;

/// Get the local data directory for monkgate.
///
/// # Errors
///
/// Returns an error if the directory cannot be created.
pub fn get_data_dir() -> Result<PathBuf> {
    let path = Database::data_dir();
    fs::create_dir_all(&path)?;
    Ok(path)
}

/// Path of `config.toml` inside the data directory
///
/// # Errors
///
/// Returns an error if the data directory cannot be created.
pub fn config_path() -> Result<PathBuf> {
    Ok(get_data_dir()?.join("config.toml"))
}

/// Tuning for the monitor daemon and event delivery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    pub host_app_id: String,
    pub poll_interval_ms: u64,
    pub lookback_ms: u64,
    pub debounce_ms: u64,
    pub delivery: DeliveryConfig,
}

/// Retry budget for handing a `blocked` event to the UI subscriber
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub backoff_factor: u32,
    pub max_delay_ms: u64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            host_app_id: DEFAULT_HOST_APP_ID.to_string(),
            poll_interval_ms: 1_000,
            lookback_ms: 5_000,
            debounce_ms: 3_000,
            delivery: DeliveryConfig::default(),
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay_ms: 200,
            backoff_factor: 2,
            max_delay_ms: 1_000,
        }
    }
}

impl GateConfig {
    /// Load from a TOML file; a missing file yields defaults
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or holds invalid values
    pub fn load(path: &Path) -> Result<Self, GateError> {
        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)
            .map_err(|e| GateError::Config(format!("read {}: {e}", path.display())))?;
        let config: Self = toml::from_str(&contents)
            .map_err(|e| GateError::Config(format!("parse {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Load `config.toml` from the data directory
    ///
    /// # Errors
    ///
    /// Returns an error if the data directory is unavailable or the file is invalid
    pub fn load_default() -> Result<Self, GateError> {
        let path = config_path().map_err(|e| GateError::Config(format!("{e:#}")))?;
        Self::load(&path)
    }

    /// # Errors
    ///
    /// Returns an error if serialization or the write fails
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, contents)?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error describing the first invalid value
    pub fn validate(&self) -> Result<(), GateError> {
        self.host_app()?;
        if self.poll_interval_ms == 0 {
            return Err(GateError::Config("poll_interval_ms must be positive".into()));
        }
        if self.lookback_ms == 0 {
            return Err(GateError::Config("lookback_ms must be positive".into()));
        }
        if self.delivery.backoff_factor == 0 {
            return Err(GateError::Config("delivery.backoff_factor must be at least 1".into()));
        }
        if self.delivery.max_delay_ms < self.delivery.initial_delay_ms {
            return Err(GateError::Config(
                "delivery.max_delay_ms must not be below delivery.initial_delay_ms".into(),
            ));
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if `host_app_id` is not a valid identifier
    pub fn host_app(&self) -> Result<AppId, GateError> {
        AppId::parse(&self.host_app_id)
            .map_err(|e| GateError::Config(format!("host_app_id: {e}")))
    }

    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[must_use]
    pub const fn lookback(&self) -> Duration {
        Duration::from_millis(self.lookback_ms)
    }

    #[must_use]
    pub const fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl DeliveryConfig {
    /// Delay before retry number `retry` (0-based): exponential, capped
    #[must_use]
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        let factor = u64::from(self.backoff_factor).saturating_pow(retry);
        let delay_ms = self
            .initial_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = GateConfig::default();
        config.validate().unwrap();
        assert_eq!(config.host_app().unwrap().as_str(), DEFAULT_HOST_APP_ID);
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.debounce(), Duration::from_secs(3));
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let delivery = DeliveryConfig::default();
        let delays: Vec<u128> = (0..5)
            .map(|retry| delivery.backoff_delay(retry).as_millis())
            .collect();
        assert_eq!(delays, vec![200, 400, 800, 1_000, 1_000]);
    }

    #[test]
    fn test_backoff_factor_one_is_fixed_delay() {
        let delivery = DeliveryConfig {
            backoff_factor: 1,
            ..DeliveryConfig::default()
        };
        assert_eq!(delivery.backoff_delay(4), Duration::from_millis(200));
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = GateConfig::load(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config, GateConfig::default());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "poll_interval_ms = 500\n\n[delivery]\nmax_retries = 3\n",
        )
        .unwrap();

        let config = GateConfig::load(&path).unwrap();
        assert_eq!(config.poll_interval_ms, 500);
        assert_eq!(config.delivery.max_retries, 3);
        assert_eq!(config.delivery.initial_delay_ms, 200);
        assert_eq!(config.debounce_ms, 3_000);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let config = GateConfig {
            host_app_id: "org.example.host".into(),
            debounce_ms: 4_000,
            ..GateConfig::default()
        };
        config.save(&path).unwrap();
        assert_eq!(GateConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let zero_interval = GateConfig {
            poll_interval_ms: 0,
            ..GateConfig::default()
        };
        assert!(matches!(zero_interval.validate(), Err(GateError::Config(_))));

        let bad_host = GateConfig {
            host_app_id: "not a host".into(),
            ..GateConfig::default()
        };
        assert!(matches!(bad_host.validate(), Err(GateError::Config(_))));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "lookback_ms = 0\n").unwrap();
        assert!(GateConfig::load(&path).is_err());
    }
}
