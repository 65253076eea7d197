use crate::cross_chain::types::{PolicyError, TimelockPolicy};
use crate::escrow::Timelocks;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Unsafe default timelock policy: {0}")]
    UnsafePolicy(#[from] PolicyError),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

// Missing fields fall back to the defaults, so a config file only lists overrides
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwapConfig {
    // Chain interaction
    #[serde(with = "humantime_serde")]
    pub finality_timeout: Duration, // Per await_finality call
    pub max_submit_retries: u32,    // Retries after the first attempt
    #[serde(with = "humantime_serde")]
    pub retry_backoff: Duration, // Doubles per retry
    #[serde(with = "humantime_serde")]
    pub max_retry_backoff: Duration,

    // Driver loop
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,

    // Timelocks
    pub min_timelock_margin_secs: u64,
    pub default_timelock_policy: TimelockPolicy,
}

impl Default for SwapConfig {
    fn default() -> Self {
        SwapConfig {
            finality_timeout: Duration::from_secs(30),
            max_submit_retries: 3,
            retry_backoff: Duration::from_millis(200),
            max_retry_backoff: Duration::from_secs(5),

            poll_interval: Duration::from_secs(1),

            // Ten minutes of slack for clock skew and inclusion delay on the source chain
            min_timelock_margin_secs: 600,
            default_timelock_policy: TimelockPolicy {
                source: Timelocks {
                    withdrawal_delay: 300,
                    public_withdrawal_delay: 5_400,
                    cancellation_delay: 7_200,
                    public_cancellation_delay: 9_000,
                },
                destination: Timelocks {
                    withdrawal_delay: 300,
                    public_withdrawal_delay: 2_700,
                    cancellation_delay: 3_600,
                    public_cancellation_delay: 4_500,
                },
            },
        }
    }
}

impl SwapConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: SwapConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.finality_timeout.is_zero() {
            return Err(ConfigError::Invalid("finality_timeout must be non-zero".to_string()));
        }
        if self.retry_backoff > self.max_retry_backoff {
            return Err(ConfigError::Invalid(format!(
                "retry_backoff {:?} exceeds max_retry_backoff {:?}",
                self.retry_backoff, self.max_retry_backoff
            )));
        }
        self.default_timelock_policy.validate(self.min_timelock_margin_secs)?;
        Ok(())
    }

    /// Delay before retry number `attempt` (1-based): `retry_backoff * 2^(attempt-1)`, capped.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.retry_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_retry_backoff)
            .min(self.max_retry_backoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SwapConfig::default();
        assert_eq!(config.finality_timeout, Duration::from_secs(30));
        assert_eq!(config.max_submit_retries, 3);
        assert_eq!(config.min_timelock_margin_secs, 600);
        assert_eq!(config.default_timelock_policy.source.cancellation_delay, 7_200);
        assert_eq!(config.default_timelock_policy.destination.cancellation_delay, 3_600);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_overrides_defaults() {
        let config = SwapConfig::from_json_str(
            r#"{ "finality_timeout": "2s", "retry_backoff": "50ms", "max_submit_retries": 5 }"#,
        )
        .unwrap();
        assert_eq!(config.finality_timeout, Duration::from_secs(2));
        assert_eq!(config.retry_backoff, Duration::from_millis(50));
        assert_eq!(config.max_submit_retries, 5);
        assert_eq!(config.poll_interval, Duration::from_secs(1));
    }

    #[test]
    fn serialized_durations_are_human_readable() {
        let json = serde_json::to_value(SwapConfig::default()).unwrap();
        assert_eq!(json["finality_timeout"], "30s");
        assert_eq!(json["retry_backoff"], "200ms");
    }

    #[test]
    fn rejects_unsafe_policy_and_bad_values() {
        let mut config = SwapConfig::default();
        config.min_timelock_margin_secs = 4_000;
        assert!(matches!(config.validate(), Err(ConfigError::UnsafePolicy(_))));

        let config = SwapConfig { finality_timeout: Duration::ZERO, ..SwapConfig::default() };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        assert!(matches!(SwapConfig::from_json_str("{ not json"), Err(ConfigError::Parse(_))));
        assert!(matches!(
            SwapConfig::from_file("/nonexistent/htlc-swap.json"),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let config = SwapConfig {
            retry_backoff: Duration::from_millis(100),
            max_retry_backoff: Duration::from_millis(500),
            ..SwapConfig::default()
        };
        assert_eq!(config.backoff_for(1), Duration::from_millis(100));
        assert_eq!(config.backoff_for(2), Duration::from_millis(200));
        assert_eq!(config.backoff_for(3), Duration::from_millis(400));
        assert_eq!(config.backoff_for(4), Duration::from_millis(500));
        assert_eq!(config.backoff_for(40), Duration::from_millis(500));
    }
}
