//! Retry middleware with pluggable backoff.
//!
//! Failed calls are re-issued with a clone of the request until they succeed,
//! the predicate refuses the error, or `max_attempts` is reached. The pause
//! between attempts only suspends the calling task.

mod backoff;
mod config;

pub use backoff::{Backoff, IntervalFunction};
pub use config::{RetryConfig, RetryConfigBuilder};

use crate::error::RetryError;
use crate::events::RetryEvent;
use futures::future::BoxFuture;
#[cfg(feature = "metrics")]
use metrics::counter;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::time::Instant;
use tower::{Layer, Service, ServiceExt};

/// Applies [`Retry`] to an inner service.
pub struct RetryLayer<E> {
    config: Arc<RetryConfig<E>>,
}

impl<E> RetryLayer<E> {
    pub(crate) fn new(config: RetryConfig<E>) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn builder() -> RetryConfigBuilder<E> {
        RetryConfigBuilder::new()
    }
}

impl<E> Clone for RetryLayer<E> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
        }
    }
}

impl<S, E> Layer<S> for RetryLayer<E> {
    type Service = Retry<S, E>;

    fn layer(&self, inner: S) -> Self::Service {
        Retry {
            inner,
            config: Arc::clone(&self.config),
        }
    }
}

/// A service that retries failed calls.
pub struct Retry<S, E> {
    inner: S,
    config: Arc<RetryConfig<E>>,
}

impl<S: Clone, E> Clone for Retry<S, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            config: Arc::clone(&self.config),
        }
    }
}

impl<S, Req, E> Service<Req> for Retry<S, E>
where
    S: Service<Req, Error = E> + Clone + Send + 'static,
    S::Response: Send + 'static,
    S::Future: Send + 'static,
    Req: Clone + Send + 'static,
    E: Send + 'static,
{
    type Response = S::Response;
    type Error = RetryError<E>;
    type Future = BoxFuture<'static, Result<S::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner
            .poll_ready(cx)
            .map_err(|error| RetryError::NotRetried { attempts: 0, error })
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let clone = self.inner.clone();
        let mut first = std::mem::replace(&mut self.inner, clone);
        let service = self.inner.clone();
        let config = Arc::clone(&self.config);

        Box::pin(async move {
            let mut attempts = 1;
            let mut result = first.call(req.clone()).await;

            loop {
                let error = match result {
                    Ok(response) => {
                        config.event_listeners.emit(&RetryEvent::Success {
                            pattern_name: config.name.clone(),
                            timestamp: Instant::now(),
                            attempts,
                        });
                        #[cfg(feature = "metrics")]
                        counter!("retry_calls_total", "retry" => config.name.clone(), "outcome" => "success").increment(1);
                        return Ok(response);
                    }
                    Err(error) => error,
                };

                if !config.should_retry(&error) {
                    tracing::debug!(retry = %config.name, attempts, "error is not retryable");
                    config.event_listeners.emit(&RetryEvent::IgnoredError {
                        pattern_name: config.name.clone(),
                        timestamp: Instant::now(),
                        attempts,
                    });
                    #[cfg(feature = "metrics")]
                    counter!("retry_calls_total", "retry" => config.name.clone(), "outcome" => "not_retried").increment(1);
                    return Err(RetryError::NotRetried { attempts, error });
                }

                if attempts >= config.max_attempts {
                    tracing::warn!(retry = %config.name, attempts, "retries exhausted");
                    config.event_listeners.emit(&RetryEvent::Exhausted {
                        pattern_name: config.name.clone(),
                        timestamp: Instant::now(),
                        attempts,
                    });
                    #[cfg(feature = "metrics")]
                    counter!("retry_calls_total", "retry" => config.name.clone(), "outcome" => "exhausted").increment(1);
                    return Err(RetryError::Exhausted {
                        attempts,
                        last: error,
                    });
                }

                let delay = config.next_backoff(attempts - 1);
                tracing::debug!(retry = %config.name, attempt = attempts, ?delay, "retrying after failure");
                config.event_listeners.emit(&RetryEvent::Retry {
                    pattern_name: config.name.clone(),
                    timestamp: Instant::now(),
                    attempt: attempts,
                    delay,
                });
                #[cfg(feature = "metrics")]
                counter!("retry_attempts_total", "retry" => config.name.clone()).increment(1);

                tokio::time::sleep(delay).await;
                attempts += 1;
                let mut next = service.clone();
                result = match next.ready().await {
                    Ok(ready) => ready.call(req.clone()).await,
                    Err(error) => Err(error),
                };
            }
        })
    }
}
