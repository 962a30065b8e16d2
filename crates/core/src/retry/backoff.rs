//! Backoff policy between retry attempts.

use rand::Rng;
use std::time::Duration;

use crate::config::{BackoffKind, RetryConfig};

/// Shape of the delay sequence.
#[derive(Debug, Clone, PartialEq)]
pub enum BackoffPolicy {
    Fixed {
        delay: Duration,
    },
    Exponential {
        initial: Duration,
        max: Duration,
        multiplier: f64,
    },
}

impl BackoffPolicy {
    /// Base delay before retry number `retry` (1-based), without jitter.
    pub fn base_delay(&self, retry: u32) -> Duration {
        match self {
            BackoffPolicy::Fixed { delay } => *delay,
            BackoffPolicy::Exponential {
                initial,
                max,
                multiplier,
            } => {
                let exponent = retry.saturating_sub(1).min(64) as i32;
                let secs = initial.as_secs_f64() * multiplier.powi(exponent);
                if secs.is_finite() && secs < max.as_secs_f64() {
                    Duration::from_secs_f64(secs)
                } else {
                    *max
                }
            }
        }
    }

    /// Room for jitter above the base delay of retry number `retry`.
    ///
    /// Bounded by the next base step so the sequence never decreases.
    fn jitter_span(&self, retry: u32) -> Duration {
        match self {
            BackoffPolicy::Fixed { delay } => *delay / 4,
            BackoffPolicy::Exponential { .. } => self
                .base_delay(retry + 1)
                .saturating_sub(self.base_delay(retry)),
        }
    }

    fn initial(&self) -> Duration {
        match self {
            BackoffPolicy::Fixed { delay } => *delay,
            BackoffPolicy::Exponential { initial, .. } => *initial,
        }
    }
}

/// Retry budget plus backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Re-attempts allowed after the first attempt.
    pub num_retries: u32,
    pub backoff: BackoffPolicy,
    pub jitter: bool,
}

impl RetryPolicy {
    pub fn new(num_retries: u32, backoff: BackoffPolicy) -> Self {
        Self {
            num_retries,
            backoff,
            jitter: false,
        }
    }

    pub fn from_config(num_retries: u32, config: &RetryConfig) -> Self {
        let initial = Duration::from_millis(config.initial_delay_ms);
        let backoff = match config.backoff {
            BackoffKind::Fixed => BackoffPolicy::Fixed { delay: initial },
            BackoffKind::Exponential => BackoffPolicy::Exponential {
                initial,
                max: Duration::from_millis(config.max_delay_ms),
                multiplier: config.multiplier,
            },
        };
        Self {
            num_retries,
            backoff,
            jitter: config.jitter,
        }
    }

    /// No delay between attempts.
    pub fn immediate(num_retries: u32) -> Self {
        Self::new(
            num_retries,
            BackoffPolicy::Fixed {
                delay: Duration::ZERO,
            },
        )
    }

    /// Max attempts a job may make.
    pub fn max_attempts(&self) -> u32 {
        self.num_retries.saturating_add(1)
    }

    /// Delay before retry number `retry` (1-based).
    ///
    /// Non-decreasing in `retry` for exponential backoff. Rate-limited
    /// failures wait at least twice the initial delay.
    pub fn delay_for(&self, retry: u32, rate_limited: bool) -> Duration {
        let mut delay = self.backoff.base_delay(retry);

        if self.jitter {
            let span = self.backoff.jitter_span(retry);
            if !span.is_zero() {
                let factor: f64 = rand::thread_rng().gen_range(0.0..=1.0);
                delay += span.mul_f64(factor);
            }
        }

        if rate_limited {
            delay = delay.max(self.backoff.initial().saturating_mul(2));
        }

        delay
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(3, &RetryConfig::default())
    }
}
