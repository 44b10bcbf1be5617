//! Connector configuration.

use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::driver::nusb::DEFAULT_TIMEOUT;
use crate::identity::{DeviceIdentity, YUBICO_VENDOR_ID, YUBIHSM2_PRODUCT_ID};
use crate::proxy::{DEFAULT_MAX_REOPENS, RetryPolicy};

/// Configuration for the device connector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectorConfig {
    /// USB vendor ID.
    pub vendor_id: u16,
    /// USB product ID.
    pub product_id: u16,
    /// Only open the device with this serial number.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,
    /// Reopens allowed per request; 0 disables recovery, absent means the
    /// default ceiling. Use `unbounded_retries` to lift it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_reopens: Option<u32>,
    /// Retry for as long as reopening succeeds.
    pub unbounded_retries: bool,
    /// Per-transfer timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            vendor_id: YUBICO_VENDOR_ID,
            product_id: YUBIHSM2_PRODUCT_ID,
            serial: None,
            max_reopens: None,
            unbounded_retries: false,
            timeout_ms: DEFAULT_TIMEOUT.as_millis() as u64,
        }
    }
}

impl ConnectorConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ConnectorConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn identity(&self) -> DeviceIdentity {
        DeviceIdentity::new(self.vendor_id, self.product_id, self.serial.clone())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        if self.unbounded_retries {
            return RetryPolicy::unbounded();
        }
        RetryPolicy::bounded(self.max_reopens.unwrap_or(DEFAULT_MAX_REOPENS))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: ConnectorConfig = toml::from_str("").unwrap();
        assert_eq!(config, ConnectorConfig::default());
        assert_eq!(config.identity(), DeviceIdentity::default());
        assert_eq!(config.retry_policy(), RetryPolicy::bounded(DEFAULT_MAX_REOPENS));
        assert_eq!(config.timeout(), DEFAULT_TIMEOUT);
    }

    #[test]
    fn test_parse() {
        let config: ConnectorConfig = toml::from_str(
            r#"
            serial = "0007550001"
            max_reopens = 3
            timeout_ms = 500
            "#,
        )
        .unwrap();
        assert_eq!(config.identity().serial(), Some("0007550001"));
        assert_eq!(config.retry_policy(), RetryPolicy::bounded(3));
        assert_eq!(config.timeout(), Duration::from_millis(500));
    }

    #[test]
    fn test_unbounded() {
        let config = ConnectorConfig {
            max_reopens: Some(2),
            unbounded_retries: true,
            ..Default::default()
        };
        assert_eq!(config.retry_policy(), RetryPolicy::unbounded());
    }

    #[test]
    fn test_file_round_trip() {
        let path = std::env::temp_dir().join(format!("hsmlink-config-{}.toml", std::process::id()));
        let config = ConnectorConfig {
            serial: Some("0001234567".into()),
            ..Default::default()
        };
        config.save_to_file(&path).unwrap();
        let loaded = ConnectorConfig::load_from_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(loaded, config);
    }
}
