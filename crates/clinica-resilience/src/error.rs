use std::time::Duration;
use thiserror::Error;

/// Errors returned by the [`CircuitBreaker`](crate::CircuitBreaker) service.
#[derive(Debug, Clone, Error)]
pub enum BreakerError<E> {
    /// The circuit is open; the inner service was not called.
    #[error("circuit '{name}' is open; call not permitted")]
    OpenCircuit { name: String },

    /// An error returned by the inner service.
    #[error(transparent)]
    Inner(E),
}

impl<E> BreakerError<E> {
    /// Returns true if the call was short-circuited by an open circuit.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, BreakerError::OpenCircuit { .. })
    }

    /// Returns the inner error, if the inner service produced one.
    pub fn inner(&self) -> Option<&E> {
        match self {
            BreakerError::Inner(e) => Some(e),
            BreakerError::OpenCircuit { .. } => None,
        }
    }

    /// Consumes the error and returns the inner error, if any.
    pub fn into_inner(self) -> Option<E> {
        match self {
            BreakerError::Inner(e) => Some(e),
            BreakerError::OpenCircuit { .. } => None,
        }
    }
}

/// Errors returned by the [`Retry`](crate::Retry) service.
#[derive(Debug, Clone, Error)]
pub enum RetryError<E> {
    /// Every permitted attempt failed with a retryable error.
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: usize, last: E },

    /// The error was not retryable and was returned as-is.
    #[error("{error}")]
    NotRetried { attempts: usize, error: E },
}

impl<E> RetryError<E> {
    /// Attempts made, including the first.
    pub fn attempts(&self) -> usize {
        match self {
            RetryError::Exhausted { attempts, .. } | RetryError::NotRetried { attempts, .. } => {
                *attempts
            }
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, RetryError::Exhausted { .. })
    }

    /// The last error seen from the inner service.
    pub fn inner(&self) -> &E {
        match self {
            RetryError::Exhausted { last, .. } => last,
            RetryError::NotRetried { error, .. } => error,
        }
    }

    pub fn into_inner(self) -> E {
        match self {
            RetryError::Exhausted { last, .. } => last,
            RetryError::NotRetried { error, .. } => error,
        }
    }
}

/// Errors returned by the [`TimeLimiter`](crate::TimeLimiter) service.
#[derive(Debug, Clone, Error)]
pub enum TimeLimitError<E> {
    /// The limit elapsed before the inner call completed.
    #[error("call did not complete within {0:?}")]
    Elapsed(Duration),

    /// The detached inner task panicked or was aborted by the runtime.
    #[error("inner task failed: {0}")]
    Aborted(String),

    /// An error returned by the inner service.
    #[error(transparent)]
    Inner(E),
}

impl<E> TimeLimitError<E> {
    /// Returns true if the limit elapsed.
    pub fn is_elapsed(&self) -> bool {
        matches!(self, TimeLimitError::Elapsed(_))
    }

    /// Consumes the error and returns the inner error, if any.
    pub fn into_inner(self) -> Option<E> {
        match self {
            TimeLimitError::Inner(e) => Some(e),
            _ => None,
        }
    }
}

/// Errors raised while turning settings into middleware.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("{field} must be within {expected}, got {value}")]
    OutOfRange {
        field: &'static str,
        expected: &'static str,
        value: String,
    },
}

impl ConfigError {
    pub(crate) fn out_of_range(
        field: &'static str,
        expected: &'static str,
        value: impl ToString,
    ) -> Self {
        ConfigError::OutOfRange {
            field,
            expected,
            value: value.to_string(),
        }
    }
}
