//! Provider configuration
//!
//! Read from a JSON file; every field is optional and falls back to the
//! defaults below.
//!
//! ```json
//! {
//!   "region": "aws.Region.ap_northeast_1",
//!   "timeouts": { "create_secs": 1800, "delete_secs": 600 },
//!   "poll_interval_secs": 5
//! }
//! ```

use std::path::Path;
use std::time::Duration;

use aws_config::{BehaviorVersion, Region, SdkConfig};
use converge_core::retry::RetrySpec;
use converge_core::wait::WaitSpec;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::utils::normalize_region;

/// Errors from loading provider configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {message}")]
    Io { path: String, message: String },

    #[error("Invalid config: {0}")]
    Parse(String),
}

/// Per-operation deadlines
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    pub create_secs: u64,
    pub update_secs: u64,
    pub delete_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            create_secs: 20 * 60,
            update_secs: 20 * 60,
            delete_secs: 20 * 60,
        }
    }
}

/// Configuration shared by all AWS clients in this crate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// AWS region; `None` uses the SDK default chain (env, profile, IMDS)
    pub region: Option<String>,
    pub timeouts: Timeouts,
    /// Interval between status checks while waiting
    pub poll_interval_secs: u64,
    /// Minimum spacing between two status checks
    pub min_poll_interval_secs: u64,
    /// How long to retry calls that fail during eventual-consistency windows
    pub propagation_timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            region: None,
            timeouts: Timeouts::default(),
            poll_interval_secs: 5,
            min_poll_interval_secs: 1,
            propagation_timeout_secs: 120,
        }
    }
}

impl ProviderConfig {
    /// Parse configuration from JSON text
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let mut config: ProviderConfig =
            serde_json::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.region = config.region.as_deref().map(normalize_region);
        Ok(config)
    }

    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_json(&content)
    }

    pub fn with_region(mut self, region: impl AsRef<str>) -> Self {
        self.region = Some(normalize_region(region.as_ref()));
        self
    }

    pub fn create_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.create_secs)
    }

    pub fn update_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.update_secs)
    }

    pub fn delete_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.delete_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Wait spec with this configuration's cadence
    pub fn wait_spec<P, T>(&self, pending: P, target: T, timeout: Duration) -> WaitSpec
    where
        P: IntoIterator<Item = &'static str>,
        T: IntoIterator<Item = &'static str>,
    {
        WaitSpec::new(pending, target)
            .with_timeout(timeout)
            .with_poll_interval(self.poll_interval())
            .with_min_poll_interval(Duration::from_secs(self.min_poll_interval_secs))
    }

    /// Load SDK configuration, overriding the region when one is set
    pub async fn sdk_config(&self) -> SdkConfig {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &self.region {
            loader = loader.region(Region::new(region.clone()));
        }
        loader.load().await
    }

    /// Retry spec for eventual-consistency windows
    pub fn propagation_retry(&self) -> RetrySpec {
        RetrySpec::with_timeout(Duration::from_secs(self.propagation_timeout_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = ProviderConfig::default();
        assert_eq!(config.region, None);
        assert_eq!(config.create_timeout(), Duration::from_secs(1200));
        assert_eq!(config.poll_interval(), Duration::from_secs(5));
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = ProviderConfig::from_json(
            r#"{"region": "aws.Region.ap_northeast_1", "timeouts": {"delete_secs": 60}}"#,
        )
        .unwrap();

        assert_eq!(config.region.as_deref(), Some("ap-northeast-1"));
        assert_eq!(config.delete_timeout(), Duration::from_secs(60));
        assert_eq!(config.create_timeout(), Duration::from_secs(1200));
        assert_eq!(config.propagation_timeout_secs, 120);
    }

    #[test]
    fn test_invalid_json() {
        let err = ProviderConfig::from_json(r#"{"poll_interval_secs": "fast"}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"poll_interval_secs": 2}}"#).unwrap();

        let config = ProviderConfig::load(file.path()).unwrap();
        assert_eq!(config.poll_interval(), Duration::from_secs(2));
    }

    #[test]
    fn test_load_missing_file() {
        let err = ProviderConfig::load(Path::new("/nonexistent/converge.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_wait_spec_uses_cadence() {
        let config = ProviderConfig::default().with_region("us_east_1");
        assert_eq!(config.region.as_deref(), Some("us-east-1"));

        let spec = config.wait_spec(["IN_PROGRESS"], ["SUCCESS"], Duration::from_secs(30));
        assert_eq!(spec.timeout, Duration::from_secs(30));
        assert_eq!(spec.poll_interval, Some(Duration::from_secs(5)));
        assert_eq!(spec.min_poll_interval, Duration::from_secs(1));
    }
}
