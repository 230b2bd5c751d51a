//! Serde-loadable knobs for the resilience stack.
//!
//! Every field has a default, so an empty table deserializes into the stock
//! policy. [`ResilienceSettings::validate`] must pass before the settings are
//! turned into builders.

use crate::circuitbreaker::{CircuitBreakerConfigBuilder, SlidingWindow};
use crate::error::ConfigError;
use crate::retry::{Backoff, RetryConfigBuilder};
use crate::timelimiter::TimeLimiterConfigBuilder;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ResilienceSettings {
    pub retry: RetrySettings,
    pub circuit_breaker: CircuitBreakerSettings,
    /// Upper bound on one protected call, retries included.
    pub timeout_ms: u64,
}

impl Default for ResilienceSettings {
    fn default() -> Self {
        Self {
            retry: RetrySettings::default(),
            circuit_breaker: CircuitBreakerSettings::default(),
            timeout_ms: 8_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Includes the first attempt.
    pub max_attempts: usize,
    pub backoff: Backoff,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowKind {
    CountBased,
    TimeBased,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    pub failure_rate_threshold: f64,
    pub sliding_window_type: WindowKind,
    /// Calls held by a count-based window.
    pub sliding_window_size: usize,
    /// Span of a time-based window.
    pub sliding_window_duration_ms: u64,
    pub minimum_number_of_calls: usize,
    pub wait_duration_in_open_ms: u64,
    pub permitted_calls_in_half_open: usize,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_rate_threshold: 0.5,
            sliding_window_type: WindowKind::CountBased,
            sliding_window_size: 10,
            sliding_window_duration_ms: 60_000,
            minimum_number_of_calls: 5,
            wait_duration_in_open_ms: 10_000,
            permitted_calls_in_half_open: 1,
        }
    }
}

impl CircuitBreakerSettings {
    pub fn sliding_window(&self) -> SlidingWindow {
        match self.sliding_window_type {
            WindowKind::CountBased => SlidingWindow::CountBased(self.sliding_window_size),
            WindowKind::TimeBased => {
                SlidingWindow::TimeBased(Duration::from_millis(self.sliding_window_duration_ms))
            }
        }
    }
}

impl RetrySettings {
    /// Longest time every attempt can take together when each attempt is
    /// bounded by `per_attempt`, backoff pauses included.
    pub fn worst_case_duration(&self, per_attempt: Duration) -> Duration {
        let attempts = u32::try_from(self.max_attempts).unwrap_or(u32::MAX);
        let calls = per_attempt.checked_mul(attempts).unwrap_or(Duration::MAX);
        (0..self.max_attempts.saturating_sub(1))
            .map(|retry| self.backoff.max_interval(retry))
            .fold(calls, Duration::saturating_add)
    }
}

impl ResilienceSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let retry = &self.retry;
        if retry.max_attempts == 0 {
            return Err(ConfigError::out_of_range(
                "retry.max_attempts",
                ">= 1",
                retry.max_attempts,
            ));
        }
        match retry.backoff {
            Backoff::Exponential { multiplier, .. } if multiplier < 1.0 || !multiplier.is_finite() => {
                return Err(ConfigError::out_of_range(
                    "retry.backoff.multiplier",
                    ">= 1.0",
                    multiplier,
                ));
            }
            Backoff::ExponentialJitter {
                multiplier,
                randomization_factor,
                ..
            } => {
                if multiplier < 1.0 || !multiplier.is_finite() {
                    return Err(ConfigError::out_of_range(
                        "retry.backoff.multiplier",
                        ">= 1.0",
                        multiplier,
                    ));
                }
                if !(0.0..=1.0).contains(&randomization_factor) {
                    return Err(ConfigError::out_of_range(
                        "retry.backoff.randomization_factor",
                        "0.0..=1.0",
                        randomization_factor,
                    ));
                }
            }
            _ => {}
        }

        let cb = &self.circuit_breaker;
        if !(cb.failure_rate_threshold > 0.0 && cb.failure_rate_threshold <= 1.0) {
            return Err(ConfigError::out_of_range(
                "circuit_breaker.failure_rate_threshold",
                "(0.0, 1.0]",
                cb.failure_rate_threshold,
            ));
        }
        match cb.sliding_window_type {
            WindowKind::CountBased if cb.sliding_window_size == 0 => {
                return Err(ConfigError::out_of_range(
                    "circuit_breaker.sliding_window_size",
                    ">= 1",
                    cb.sliding_window_size,
                ));
            }
            WindowKind::CountBased if cb.minimum_number_of_calls > cb.sliding_window_size => {
                return Err(ConfigError::out_of_range(
                    "circuit_breaker.minimum_number_of_calls",
                    "<= sliding_window_size",
                    cb.minimum_number_of_calls,
                ));
            }
            WindowKind::TimeBased if cb.sliding_window_duration_ms == 0 => {
                return Err(ConfigError::out_of_range(
                    "circuit_breaker.sliding_window_duration_ms",
                    ">= 1",
                    cb.sliding_window_duration_ms,
                ));
            }
            _ => {}
        }
        if cb.minimum_number_of_calls == 0 {
            return Err(ConfigError::out_of_range(
                "circuit_breaker.minimum_number_of_calls",
                ">= 1",
                cb.minimum_number_of_calls,
            ));
        }
        if cb.permitted_calls_in_half_open == 0 {
            return Err(ConfigError::out_of_range(
                "circuit_breaker.permitted_calls_in_half_open",
                ">= 1",
                cb.permitted_calls_in_half_open,
            ));
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::out_of_range("timeout_ms", ">= 1", self.timeout_ms));
        }
        Ok(())
    }

    /// Retry builder carrying these settings.
    pub fn retry_builder<E>(&self) -> RetryConfigBuilder<E> {
        RetryConfigBuilder::new()
            .max_attempts(self.retry.max_attempts)
            .backoff(self.retry.backoff.clone())
    }

    /// Circuit breaker builder carrying these settings.
    pub fn circuit_breaker_builder<Res, Err>(&self) -> CircuitBreakerConfigBuilder<Res, Err> {
        let cb = &self.circuit_breaker;
        CircuitBreakerConfigBuilder::new()
            .failure_rate_threshold(cb.failure_rate_threshold)
            .sliding_window(cb.sliding_window())
            .minimum_number_of_calls(cb.minimum_number_of_calls)
            .wait_duration_in_open(Duration::from_millis(cb.wait_duration_in_open_ms))
            .permitted_calls_in_half_open(cb.permitted_calls_in_half_open)
    }

    /// Time limiter builder carrying the overall timeout.
    pub fn time_limiter_builder(&self) -> TimeLimiterConfigBuilder {
        TimeLimiterConfigBuilder::new().timeout(self.timeout())
    }
}
