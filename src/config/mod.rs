//! # Publisher Configuration
//!
//! Settings recognised by [`SingleChannelPublisher`](crate::messaging::SingleChannelPublisher).
//! Values can be built in code with the `with_*` setters or loaded through
//! [`ConfigLoader`] from a file plus `PUBLISHER_*` environment overrides.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use confirmed_publisher::config::{ConfigLoader, PublisherConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // In code
//! let config = PublisherConfig::default()
//!     .with_confirms_enabled(true)
//!     .with_max_retries(5)
//!     .with_confirm_timeout_seconds(10);
//!
//! // From publisher.toml and the environment
//! let loaded = ConfigLoader::new().with_file("publisher.toml").load()?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigLoader;

/// Root publisher configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PublisherConfig {
    /// Track broker publish confirms. When false every accepted publish is
    /// treated as acknowledged immediately and no confirm cache exists.
    pub confirms_enabled: bool,

    /// Total attempts per message (and per channel acquisition); `<= 0` retries forever
    pub max_retries: i32,

    /// Sliding expiration for unconfirmed messages
    pub confirm_timeout_seconds: u64,

    /// Cadence of the confirm cache eviction sweep
    pub cache_sweep_interval_seconds: u64,

    /// Bound on waiting for outstanding confirms during shutdown; `<= 0` waits indefinitely
    pub close_timeout_millis: i64,

    /// Delay schedule between retries and channel creation attempts
    pub backoff: BackoffConfig,
}

/// Fibonacci backoff settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Length of one Fibonacci unit
    pub base_delay_millis: u64,
    /// Upper bound for any single delay
    pub max_delay_millis: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_millis: 1_000,
            max_delay_millis: 60_000,
        }
    }
}

impl BackoffConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_millis)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_millis)
    }
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            confirms_enabled: true,
            max_retries: 3,
            confirm_timeout_seconds: 30,
            cache_sweep_interval_seconds: 1,
            close_timeout_millis: 5_000,
            backoff: BackoffConfig::default(),
        }
    }
}

impl PublisherConfig {
    pub fn with_confirms_enabled(mut self, enabled: bool) -> Self {
        self.confirms_enabled = enabled;
        self
    }

    pub fn with_max_retries(mut self, max_retries: i32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_confirm_timeout_seconds(mut self, seconds: u64) -> Self {
        self.confirm_timeout_seconds = seconds;
        self
    }

    pub fn with_cache_sweep_interval_seconds(mut self, seconds: u64) -> Self {
        self.cache_sweep_interval_seconds = seconds;
        self
    }

    pub fn with_close_timeout_millis(mut self, millis: i64) -> Self {
        self.close_timeout_millis = millis;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Get confirm timeout as Duration
    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_secs(self.confirm_timeout_seconds)
    }

    /// Get cache sweep interval as Duration
    pub fn cache_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.cache_sweep_interval_seconds)
    }

    /// Shutdown wait bound, `None` meaning wait indefinitely
    pub fn close_timeout(&self) -> Option<Duration> {
        if self.close_timeout_millis > 0 {
            Some(Duration::from_millis(self.close_timeout_millis as u64))
        } else {
            None
        }
    }

    /// True when retries are not capped
    pub fn unbounded_retries(&self) -> bool {
        self.max_retries <= 0
    }

    /// Validate value ranges that would otherwise stall the publisher
    pub fn validate(&self) -> ConfigResult<()> {
        if self.confirms_enabled && self.confirm_timeout_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "confirm_timeout_seconds",
                "0",
                "must be greater than zero when confirms are enabled",
            ));
        }

        if self.confirms_enabled && self.cache_sweep_interval_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "cache_sweep_interval_seconds",
                "0",
                "must be greater than zero when confirms are enabled",
            ));
        }

        if self.backoff.max_delay_millis < self.backoff.base_delay_millis {
            return Err(ConfigurationError::invalid_value(
                "backoff.max_delay_millis",
                self.backoff.max_delay_millis.to_string(),
                format!(
                    "must not be smaller than backoff.base_delay_millis ({})",
                    self.backoff.base_delay_millis
                ),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = PublisherConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.confirms_enabled);
        assert_eq!(config.close_timeout(), Some(Duration::from_millis(5_000)));
    }

    #[test]
    fn test_non_positive_close_timeout_waits_indefinitely() {
        assert_eq!(
            PublisherConfig::default()
                .with_close_timeout_millis(0)
                .close_timeout(),
            None
        );
        assert_eq!(
            PublisherConfig::default()
                .with_close_timeout_millis(-1)
                .close_timeout(),
            None
        );
    }

    #[test]
    fn test_unbounded_retries() {
        assert!(PublisherConfig::default().with_max_retries(0).unbounded_retries());
        assert!(PublisherConfig::default().with_max_retries(-4).unbounded_retries());
        assert!(!PublisherConfig::default().with_max_retries(2).unbounded_retries());
    }

    #[test]
    fn test_zero_confirm_timeout_rejected_only_with_confirms() {
        let config = PublisherConfig::default().with_confirm_timeout_seconds(0);
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::InvalidValue { ref field, .. }) if field == "confirm_timeout_seconds"
        ));

        let config = config.with_confirms_enabled(false);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_backoff_cap_below_base_rejected() {
        let config = PublisherConfig::default().with_backoff(BackoffConfig {
            base_delay_millis: 500,
            max_delay_millis: 100,
        });
        assert!(config.validate().is_err());
    }
}
