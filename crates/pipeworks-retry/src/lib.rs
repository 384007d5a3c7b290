//! Retry strategies and backoff policies for pipeworks.
//!
//! This crate provides configurable retry strategies with support for:
//! - Multiple backoff strategies (immediate, exponential, linear, constant)
//! - Jitter for avoiding thundering herd problems
//! - Predefined policies for common use cases
//!
//! # Example
//!
//! ```
//! use pipeworks_retry::{RetryPolicy, RetryStrategyConfig, calculate_delay};
//!
//! let config = RetryPolicy::DataSend.to_config();
//! let delay = calculate_delay(&config, 2);
//! println!("Retry after: {:?}", delay);
//!
//! let custom = RetryStrategyConfig {
//!     max_attempts: 5,
//!     ..RetryStrategyConfig::default()
//! };
//! let _ = custom;
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Strategy type for retry behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategyType {
    /// No delay between retries - retry immediately
    Immediate,
    /// Exponential backoff: delay doubles each attempt (default)
    #[default]
    Exponential,
    /// Linear backoff: delay increases linearly each attempt
    Linear,
    /// Constant delay: same delay every attempt
    Constant,
}

/// Predefined retry policies with sensible defaults for different use cases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryPolicy {
    /// Default balanced retry behavior - good for most scenarios
    #[default]
    Default,
    /// Matches the data-flow merger's send loop: 10 attempts, 2s constant backoff,
    /// no jitter.
    DataSend,
    /// Fully custom configuration via explicit `RetryStrategyConfig` fields.
    Custom,
}

impl RetryPolicy {
    /// Get the default retry configuration for this policy.
    pub fn to_config(&self) -> RetryStrategyConfig {
        match self {
            RetryPolicy::Default => RetryStrategyConfig {
                strategy: RetryStrategyType::Exponential,
                max_attempts: 6,
                base_delay: Duration::from_secs(2),
                max_delay: Duration::from_secs(120),
                jitter: 0.5,
            },
            RetryPolicy::DataSend => RetryStrategyConfig {
                strategy: RetryStrategyType::Constant,
                max_attempts: 10,
                base_delay: Duration::from_secs(2),
                max_delay: Duration::from_secs(2),
                jitter: 0.0,
            },
            RetryPolicy::Custom => RetryStrategyConfig::default(),
        }
    }
}

/// Configuration for a retry strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryStrategyConfig {
    /// Strategy type for calculating delay between retries.
    #[serde(default)]
    pub strategy: RetryStrategyType,
    /// Maximum number of retry attempts.
    #[serde(default)]
    pub max_attempts: u32,
    /// Base delay for backoff calculations.
    #[serde(default = "default_base_delay")]
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
    /// Maximum delay cap for backoff.
    #[serde(default = "default_max_delay")]
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    /// Jitter factor for randomized delays (0.0 = no jitter, 1.0 = full jitter).
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_base_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(120)
}

fn default_jitter() -> f64 {
    0.5
}

impl Default for RetryStrategyConfig {
    fn default() -> Self {
        Self {
            strategy: RetryStrategyType::Exponential,
            max_attempts: 6,
            base_delay: default_base_delay(),
            max_delay: default_max_delay(),
            jitter: default_jitter(),
        }
    }
}

/// Calculate the delay for the next retry attempt based on the strategy configuration.
pub fn calculate_delay(config: &RetryStrategyConfig, attempt: u32) -> Duration {
    let delay = match config.strategy {
        RetryStrategyType::Immediate => Duration::ZERO,
        RetryStrategyType::Exponential => {
            let pow = attempt.saturating_sub(1).min(16);
            config.base_delay.saturating_mul(2_u32.saturating_pow(pow))
        }
        RetryStrategyType::Linear => config.base_delay.saturating_mul(attempt),
        RetryStrategyType::Constant => config.base_delay,
    };

    let capped = delay.min(config.max_delay);

    if config.jitter > 0.0 {
        apply_jitter(capped, config.jitter)
    } else {
        capped
    }
}

/// Apply jitter to a delay value.
/// Jitter factor of 0.5 means delay * (0.5 to 1.5).
fn apply_jitter(delay: Duration, jitter: f64) -> Duration {
    let jitter_range = 2.0 * jitter;
    let random_factor = 1.0 - jitter + (rand::random::<f64>() * jitter_range);
    let millis = (delay.as_millis() as f64 * random_factor).round() as u64;
    Duration::from_millis(millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_matches_expected_shape() {
        let config = RetryPolicy::Default.to_config();
        assert_eq!(config.strategy, RetryStrategyType::Exponential);
        assert_eq!(config.max_attempts, 6);
        assert_eq!(config.base_delay, Duration::from_secs(2));
        assert_eq!(config.max_delay, Duration::from_secs(120));
    }

    #[test]
    fn data_send_policy_matches_spec_send_loop() {
        let config = RetryPolicy::DataSend.to_config();
        assert_eq!(config.strategy, RetryStrategyType::Constant);
        assert_eq!(config.max_attempts, 10);
        assert_eq!(config.base_delay, Duration::from_secs(2));
        assert_eq!(config.jitter, 0.0);

        for attempt in 1..=10 {
            assert_eq!(calculate_delay(&config, attempt), Duration::from_secs(2));
        }
    }

    #[test]
    fn calculate_delay_immediate_is_always_zero() {
        let config = RetryStrategyConfig {
            strategy: RetryStrategyType::Immediate,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter: 0.0,
            max_attempts: 3,
        };

        assert_eq!(calculate_delay(&config, 1), Duration::ZERO);
        assert_eq!(calculate_delay(&config, 5), Duration::ZERO);
    }

    #[test]
    fn calculate_delay_exponential_doubles_and_caps() {
        let config = RetryStrategyConfig {
            strategy: RetryStrategyType::Exponential,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter: 0.0,
            max_attempts: 10,
        };

        assert_eq!(calculate_delay(&config, 1), Duration::from_secs(1));
        assert_eq!(calculate_delay(&config, 2), Duration::from_secs(2));
        assert_eq!(calculate_delay(&config, 3), Duration::from_secs(4));
        assert_eq!(calculate_delay(&config, 10), Duration::from_secs(60));
    }

    #[test]
    fn calculate_delay_linear_grows_and_caps() {
        let config = RetryStrategyConfig {
            strategy: RetryStrategyType::Linear,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            jitter: 0.0,
            max_attempts: 10,
        };

        assert_eq!(calculate_delay(&config, 1), Duration::from_secs(1));
        assert_eq!(calculate_delay(&config, 5), Duration::from_secs(5));
        assert_eq!(calculate_delay(&config, 15), Duration::from_secs(10));
    }

    #[test]
    fn calculate_delay_constant_is_flat() {
        let config = RetryStrategyConfig {
            strategy: RetryStrategyType::Constant,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(10),
            jitter: 0.0,
            max_attempts: 10,
        };

        assert_eq!(calculate_delay(&config, 1), Duration::from_secs(2));
        assert_eq!(calculate_delay(&config, 10), Duration::from_secs(2));
    }

    #[test]
    fn retry_strategy_config_serde_roundtrip() {
        let json = r#"{
            "strategy": "linear",
            "max_attempts": 3,
            "base_delay": "5s",
            "max_delay": "30s",
            "jitter": 0.2
        }"#;

        let config: RetryStrategyConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.strategy, RetryStrategyType::Linear);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.base_delay, Duration::from_secs(5));
        assert_eq!(config.max_delay, Duration::from_secs(30));
        assert!((config.jitter - 0.2).abs() < 0.001);
    }

    #[cfg(test)]
    mod proptests {
        use super::super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn delay_never_exceeds_max(
                base_ms in 0u64..5000,
                max_ms in 0u64..60000,
                attempt in 1u32..20,
                strategy_variant in 0u8..4,
            ) {
                let strategy = match strategy_variant {
                    0 => RetryStrategyType::Immediate,
                    1 => RetryStrategyType::Exponential,
                    2 => RetryStrategyType::Linear,
                    _ => RetryStrategyType::Constant,
                };
                let config = RetryStrategyConfig {
                    strategy,
                    max_attempts: 20,
                    base_delay: Duration::from_millis(base_ms),
                    max_delay: Duration::from_millis(max_ms),
                    jitter: 0.0,
                };
                let delay = calculate_delay(&config, attempt);
                prop_assert!(delay <= Duration::from_millis(max_ms));
            }
        }
    }
}
