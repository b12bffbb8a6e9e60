//! Retry strategies available to runner `main` implementations that shell
//! out to external batch schedulers or submission APIs.
//!
//! Adapted from `shipper`'s `RetryStrategyType`/`RetryPolicy`/
//! `calculate_delay` (`retry.rs`), generalized from "a crates.io publish
//! attempt" to "any blocking external submission a runner performs" — spec
//! §5 calls out that runners must be able to retry such submissions without
//! starving their peers, which this crate exists to serve.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Immediate,
    #[default]
    Exponential,
    Linear,
    Constant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Policy {
    #[default]
    Default,
    Aggressive,
    Conservative,
    Custom,
}

impl Policy {
    pub fn to_config(self) -> RetryConfig {
        match self {
            Policy::Default => RetryConfig {
                strategy: Strategy::Exponential,
                max_attempts: 6,
                base_delay: Duration::from_secs(2),
                max_delay: Duration::from_secs(120),
                jitter: 0.5,
            },
            Policy::Aggressive => RetryConfig {
                strategy: Strategy::Exponential,
                max_attempts: 10,
                base_delay: Duration::from_millis(500),
                max_delay: Duration::from_secs(30),
                jitter: 0.3,
            },
            Policy::Conservative => RetryConfig {
                strategy: Strategy::Linear,
                max_attempts: 3,
                base_delay: Duration::from_secs(5),
                max_delay: Duration::from_secs(60),
                jitter: 0.1,
            },
            Policy::Custom => RetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default)]
    pub strategy: Strategy,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(
        deserialize_with = "pipeweave_duration::deserialize_duration",
        serialize_with = "pipeweave_duration::serialize_duration",
        default = "default_base_delay"
    )]
    pub base_delay: Duration,
    #[serde(
        deserialize_with = "pipeweave_duration::deserialize_duration",
        serialize_with = "pipeweave_duration::serialize_duration",
        default = "default_max_delay"
    )]
    pub max_delay: Duration,
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_max_attempts() -> u32 {
    6
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

impl Default for RetryConfig {
    fn default() -> Self {
        Policy::Default.to_config()
    }
}

/// Compute the delay before the next attempt (1-indexed `attempt`).
pub fn calculate_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let delay = match config.strategy {
        Strategy::Immediate => Duration::ZERO,
        Strategy::Exponential => {
            let pow = attempt.saturating_sub(1).min(16);
            config.base_delay.saturating_mul(2_u32.saturating_pow(pow))
        }
        Strategy::Linear => config.base_delay.saturating_mul(attempt),
        Strategy::Constant => config.base_delay,
    };
    let capped = delay.min(config.max_delay);
    if config.jitter > 0.0 {
        apply_jitter(capped, config.jitter)
    } else {
        capped
    }
}

fn apply_jitter(delay: Duration, jitter: f64) -> Duration {
    let jitter_range = 2.0 * jitter;
    let random_factor = 1.0 - jitter + (rand::random::<f64>() * jitter_range);
    let millis = (delay.as_millis() as f64 * random_factor).round() as u64;
    Duration::from_millis(millis)
}

/// Run `op` until it succeeds or `config.max_attempts` is exhausted,
/// sleeping `calculate_delay` between attempts.
pub fn retry<T, E>(config: &RetryConfig, mut op: impl FnMut(u32) -> Result<T, E>) -> Result<T, E> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op(attempt) {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt >= config.max_attempts {
                    return Err(err);
                }
                std::thread::sleep(calculate_delay(config, attempt));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_delay_doubles_and_caps() {
        let config = RetryConfig {
            strategy: Strategy::Exponential,
            max_attempts: 10,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            jitter: 0.0,
        };
        assert_eq!(calculate_delay(&config, 1), Duration::from_secs(1));
        assert_eq!(calculate_delay(&config, 2), Duration::from_secs(2));
        assert_eq!(calculate_delay(&config, 5), Duration::from_secs(10));
    }

    #[test]
    fn retry_returns_first_success_without_exceeding_max_attempts() {
        let config = RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(0),
            max_delay: Duration::from_millis(0),
            jitter: 0.0,
            ..RetryConfig::default()
        };
        let mut calls = 0;
        let result: Result<i32, &str> = retry(&config, |attempt| {
            calls = attempt;
            if attempt < 2 { Err("not yet") } else { Ok(42) }
        });
        assert_eq!(result, Ok(42));
        assert_eq!(calls, 2);
    }

    #[test]
    fn retry_gives_up_after_max_attempts() {
        let config = RetryConfig {
            max_attempts: 2,
            base_delay: Duration::from_millis(0),
            max_delay: Duration::from_millis(0),
            jitter: 0.0,
            ..RetryConfig::default()
        };
        let result: Result<i32, &str> = retry(&config, |_| Err("always fails"));
        assert_eq!(result, Err("always fails"));
    }
}
