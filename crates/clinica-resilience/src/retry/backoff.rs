use rand::Rng;
use serde::Deserialize;
use std::time::Duration;

/// Computes the pause before a retry.
pub trait IntervalFunction: Send + Sync {
    /// Delay before retry number `retry` (0 for the first retry).
    fn next_interval(&self, retry: usize) -> Duration;
}

impl<F> IntervalFunction for F
where
    F: Fn(usize) -> Duration + Send + Sync,
{
    fn next_interval(&self, retry: usize) -> Duration {
        self(retry)
    }
}

/// Built-in backoff strategies.
///
/// Deserializes from a tagged table so it can sit in a config file:
///
/// ```toml
/// kind = "exponential"
/// initial_ms = 200
/// multiplier = 2.0
/// max_ms = 2000
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    /// The same pause before every retry.
    Fixed { interval_ms: u64 },
    /// `initial * multiplier^retry`, optionally capped.
    Exponential {
        initial_ms: u64,
        #[serde(default = "default_multiplier")]
        multiplier: f64,
        #[serde(default)]
        max_ms: Option<u64>,
    },
    /// Exponential growth with each pause drawn uniformly from
    /// `[d * (1 - factor), d * (1 + factor)]`.
    ExponentialJitter {
        initial_ms: u64,
        #[serde(default = "default_multiplier")]
        multiplier: f64,
        #[serde(default)]
        max_ms: Option<u64>,
        #[serde(default = "default_randomization_factor")]
        randomization_factor: f64,
    },
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_randomization_factor() -> f64 {
    0.5
}

impl Backoff {
    pub fn fixed(interval: Duration) -> Self {
        Backoff::Fixed {
            interval_ms: interval.as_millis() as u64,
        }
    }

    /// Doubling backoff capped at `max`.
    pub fn exponential(initial: Duration, max: Duration) -> Self {
        Backoff::Exponential {
            initial_ms: initial.as_millis() as u64,
            multiplier: default_multiplier(),
            max_ms: Some(max.as_millis() as u64),
        }
    }

    /// Doubling backoff capped at `max`, with +/- 50% jitter.
    pub fn exponential_jitter(initial: Duration, max: Duration) -> Self {
        Backoff::ExponentialJitter {
            initial_ms: initial.as_millis() as u64,
            multiplier: default_multiplier(),
            max_ms: Some(max.as_millis() as u64),
            randomization_factor: default_randomization_factor(),
        }
    }
}

impl Default for Backoff {
    /// 200ms doubling up to 2s.
    fn default() -> Self {
        Backoff::exponential(Duration::from_millis(200), Duration::from_secs(2))
    }
}

impl IntervalFunction for Backoff {
    fn next_interval(&self, retry: usize) -> Duration {
        match *self {
            Backoff::Fixed { interval_ms } => Duration::from_millis(interval_ms),
            Backoff::Exponential {
                initial_ms,
                multiplier,
                max_ms,
            } => grow(initial_ms, multiplier, max_ms, retry),
            Backoff::ExponentialJitter {
                initial_ms,
                multiplier,
                max_ms,
                randomization_factor,
            } => {
                let base = grow(initial_ms, multiplier, max_ms, retry);
                let factor = randomization_factor.clamp(0.0, 1.0);
                let secs = base.as_secs_f64();
                let delta = secs * factor;
                if delta <= 0.0 || !delta.is_finite() {
                    return base;
                }
                let jittered = rand::thread_rng().gen_range((secs - delta)..=(secs + delta));
                saturating_secs(jittered)
            }
        }
    }
}

impl Backoff {
    /// Longest pause this strategy can produce before retry number `retry`.
    pub fn max_interval(&self, retry: usize) -> Duration {
        match *self {
            Backoff::ExponentialJitter {
                initial_ms,
                multiplier,
                max_ms,
                randomization_factor,
            } => {
                let base = grow(initial_ms, multiplier, max_ms, retry).as_secs_f64();
                saturating_secs(base * (1.0 + randomization_factor.clamp(0.0, 1.0)))
            }
            _ => self.next_interval(retry),
        }
    }
}

fn saturating_secs(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(Duration::MAX)
}

fn grow(initial_ms: u64, multiplier: f64, max_ms: Option<u64>, retry: usize) -> Duration {
    let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
    let secs = Duration::from_millis(initial_ms).as_secs_f64() * multiplier.max(1.0).powi(exponent);
    let interval = saturating_secs(secs);
    match max_ms {
        Some(max) => interval.min(Duration::from_millis(max)),
        None => interval,
    }
}
