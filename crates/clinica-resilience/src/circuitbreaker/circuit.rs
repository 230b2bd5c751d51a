use super::config::CircuitBreakerConfig;
use super::window::RollingWindow;
use crate::events::CircuitBreakerEvent;
#[cfg(feature = "metrics")]
use metrics::{counter, gauge, histogram};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// State of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum CircuitState {
    /// Calls pass through and outcomes are recorded.
    Closed = 0,
    /// Calls are rejected without reaching the inner service.
    Open = 1,
    /// A limited number of trial calls test whether the dependency recovered.
    HalfOpen = 2,
}

impl CircuitState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }

    /// Label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a breaker's window and state.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitMetrics {
    pub state: CircuitState,
    /// Calls currently held in the rolling window.
    pub total_calls: usize,
    pub failure_count: usize,
    pub success_count: usize,
    /// Failure rate over the window (0.0 to 1.0).
    pub failure_rate: f64,
    pub time_since_state_change: Duration,
}

pub(crate) struct Circuit {
    state: CircuitState,
    state_atomic: Arc<AtomicU8>,
    last_state_change: Instant,
    window: RollingWindow,
    half_open_permits: usize,
    half_open_successes: usize,
    /// Bumped on every transition and reset; outcomes from an older
    /// generation are not counted.
    generation: u64,
}

impl Circuit {
    pub(crate) fn new(
        config: &CircuitBreakerConfig<impl Sized, impl Sized>,
        state_atomic: Arc<AtomicU8>,
    ) -> Self {
        state_atomic.store(CircuitState::Closed as u8, Ordering::Release);
        Self {
            state: CircuitState::Closed,
            state_atomic,
            last_state_change: Instant::now(),
            window: RollingWindow::new(config.sliding_window),
            half_open_permits: 0,
            half_open_successes: 0,
            generation: 0,
        }
    }

    pub(crate) fn state(&self) -> CircuitState {
        self.state
    }

    pub(crate) fn metrics(&mut self) -> CircuitMetrics {
        let now = Instant::now();
        let stats = self.window.stats(now);
        CircuitMetrics {
            state: self.state,
            total_calls: stats.total,
            failure_count: stats.failures,
            success_count: stats.successes(),
            failure_rate: stats.failure_rate(),
            time_since_state_change: now.duration_since(self.last_state_change),
        }
    }

    /// Decides whether a call may proceed, moving an expired open circuit to
    /// half-open on the way. A permitted call gets the generation its outcome
    /// must be recorded against.
    pub(crate) fn try_acquire(
        &mut self,
        config: &CircuitBreakerConfig<impl Sized, impl Sized>,
    ) -> Option<u64> {
        let now = Instant::now();
        if self.state == CircuitState::Open
            && now.duration_since(self.last_state_change) >= config.wait_duration_in_open
        {
            self.transition_to(CircuitState::HalfOpen, config);
        }

        let permitted = match self.state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => {
                if self.half_open_permits < config.permitted_calls_in_half_open {
                    self.half_open_permits += 1;
                    true
                } else {
                    false
                }
            }
        };

        if permitted {
            config
                .event_listeners
                .emit(&CircuitBreakerEvent::CallPermitted {
                    pattern_name: config.name.clone(),
                    timestamp: now,
                    state: self.state,
                });
        } else {
            tracing::debug!(breaker = %config.name, state = %self.state, "call rejected");
            config
                .event_listeners
                .emit(&CircuitBreakerEvent::CallRejected {
                    pattern_name: config.name.clone(),
                    timestamp: now,
                });

            #[cfg(feature = "metrics")]
            counter!("circuitbreaker_calls_total", "circuitbreaker" => config.name.clone(), "outcome" => "rejected").increment(1);
        }
        permitted.then_some(self.generation)
    }

    pub(crate) fn record_success(
        &mut self,
        config: &CircuitBreakerConfig<impl Sized, impl Sized>,
        generation: u64,
        duration: Duration,
    ) {
        let now = Instant::now();
        config
            .event_listeners
            .emit(&CircuitBreakerEvent::SuccessRecorded {
                pattern_name: config.name.clone(),
                timestamp: now,
                state: self.state,
            });

        #[cfg(feature = "metrics")]
        {
            counter!("circuitbreaker_calls_total", "circuitbreaker" => config.name.clone(), "outcome" => "success").increment(1);
            histogram!("circuitbreaker_call_duration_seconds", "circuitbreaker" => config.name.clone())
                .record(duration.as_secs_f64());
        }
        #[cfg(not(feature = "metrics"))]
        let _ = duration;

        if self.is_stale(config, generation) {
            return;
        }
        match self.state {
            CircuitState::HalfOpen => {
                self.half_open_successes += 1;
                if self.half_open_successes >= config.permitted_calls_in_half_open {
                    self.transition_to(CircuitState::Closed, config);
                }
            }
            CircuitState::Closed => {
                self.window.record(false, now);
                self.evaluate_window(config, now);
            }
            CircuitState::Open => {}
        }
    }

    pub(crate) fn record_failure(
        &mut self,
        config: &CircuitBreakerConfig<impl Sized, impl Sized>,
        generation: u64,
        duration: Duration,
    ) {
        let now = Instant::now();
        config
            .event_listeners
            .emit(&CircuitBreakerEvent::FailureRecorded {
                pattern_name: config.name.clone(),
                timestamp: now,
                state: self.state,
            });

        #[cfg(feature = "metrics")]
        {
            counter!("circuitbreaker_calls_total", "circuitbreaker" => config.name.clone(), "outcome" => "failure").increment(1);
            histogram!("circuitbreaker_call_duration_seconds", "circuitbreaker" => config.name.clone())
                .record(duration.as_secs_f64());
        }
        #[cfg(not(feature = "metrics"))]
        let _ = duration;

        if self.is_stale(config, generation) {
            return;
        }
        match self.state {
            CircuitState::HalfOpen => self.transition_to(CircuitState::Open, config),
            CircuitState::Closed => {
                self.window.record(true, now);
                self.evaluate_window(config, now);
            }
            CircuitState::Open => {}
        }
    }

    pub(crate) fn force_open(&mut self, config: &CircuitBreakerConfig<impl Sized, impl Sized>) {
        self.transition_to(CircuitState::Open, config);
    }

    pub(crate) fn force_closed(&mut self, config: &CircuitBreakerConfig<impl Sized, impl Sized>) {
        self.transition_to(CircuitState::Closed, config);
    }

    /// Closes the circuit and forgets every recorded outcome.
    pub(crate) fn reset(&mut self, config: &CircuitBreakerConfig<impl Sized, impl Sized>) {
        self.transition_to(CircuitState::Closed, config);
        self.window.clear();
        self.half_open_permits = 0;
        self.half_open_successes = 0;
        self.generation = self.generation.wrapping_add(1);
    }

    fn is_stale(&self, config: &CircuitBreakerConfig<impl Sized, impl Sized>, generation: u64) -> bool {
        if generation == self.generation {
            return false;
        }
        tracing::debug!(
            breaker = %config.name,
            state = %self.state,
            "ignoring outcome of a call admitted before the last transition"
        );
        true
    }

    fn evaluate_window(&mut self, config: &CircuitBreakerConfig<impl Sized, impl Sized>, now: Instant) {
        let stats = self.window.stats(now);
        if stats.total < config.minimum_number_of_calls {
            return;
        }
        if stats.failure_rate() >= config.failure_rate_threshold {
            tracing::warn!(
                breaker = %config.name,
                failures = stats.failures,
                calls = stats.total,
                "failure rate reached threshold"
            );
            self.transition_to(CircuitState::Open, config);
        }
    }

    fn transition_to(
        &mut self,
        state: CircuitState,
        config: &CircuitBreakerConfig<impl Sized, impl Sized>,
    ) {
        if self.state == state {
            return;
        }
        let from_state = self.state;
        let now = Instant::now();

        tracing::info!(breaker = %config.name, from = %from_state, to = %state, "circuit state transition");
        config
            .event_listeners
            .emit(&CircuitBreakerEvent::StateTransition {
                pattern_name: config.name.clone(),
                timestamp: now,
                from_state,
                to_state: state,
            });

        #[cfg(feature = "metrics")]
        {
            counter!(
                "circuitbreaker_transitions_total",
                "circuitbreaker" => config.name.clone(),
                "from" => from_state.as_str(),
                "to" => state.as_str()
            )
            .increment(1);
            gauge!("circuitbreaker_state", "circuitbreaker" => config.name.clone())
                .set(state as u8 as f64);
        }

        self.state = state;
        self.state_atomic.store(state as u8, Ordering::Release);
        self.last_state_change = now;
        self.half_open_permits = 0;
        self.half_open_successes = 0;
        self.generation = self.generation.wrapping_add(1);
        self.window.clear();
    }
}
