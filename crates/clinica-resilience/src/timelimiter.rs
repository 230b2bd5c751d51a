//! Caller-side time limit.
//!
//! The inner call runs on its own task. If the limit elapses first, the caller
//! gets [`TimeLimitError::Elapsed`] and the task is left to finish in the
//! background with its result discarded.

use crate::error::TimeLimitError;
use crate::events::{EventListeners, FnListener, TimeLimiterEvent};
use futures::future::BoxFuture;
#[cfg(feature = "metrics")]
use metrics::{counter, histogram};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::time::Instant;
use tower::{Layer, Service, ServiceExt};

/// Configuration for the time limiter.
pub struct TimeLimiterConfig {
    timeout: Duration,
    event_listeners: EventListeners<TimeLimiterEvent>,
    name: String,
}

impl TimeLimiterConfig {
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Builder for [`TimeLimiterLayer`].
pub struct TimeLimiterConfigBuilder {
    timeout: Duration,
    event_listeners: EventListeners<TimeLimiterEvent>,
    name: String,
}

impl Default for TimeLimiterConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeLimiterConfigBuilder {
    /// Defaults to a 5 second limit.
    pub fn new() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            event_listeners: EventListeners::new(),
            name: String::from("<unnamed>"),
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn name<N: Into<String>>(mut self, name: N) -> Self {
        self.name = name.into();
        self
    }

    /// Called with the limit whenever a call is abandoned.
    pub fn on_timeout<F>(mut self, f: F) -> Self
    where
        F: Fn(Duration) + Send + Sync + 'static,
    {
        self.event_listeners
            .add(FnListener::new(move |event: &TimeLimiterEvent| {
                if let TimeLimiterEvent::Timeout { limit, .. } = event {
                    f(*limit);
                }
            }));
        self
    }

    pub fn on_event<F>(mut self, f: F) -> Self
    where
        F: Fn(&TimeLimiterEvent) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(f));
        self
    }

    pub fn build(self) -> TimeLimiterLayer {
        TimeLimiterLayer {
            config: Arc::new(TimeLimiterConfig {
                timeout: self.timeout,
                event_listeners: self.event_listeners,
                name: self.name,
            }),
        }
    }
}

/// Applies [`TimeLimiter`] to an inner service.
#[derive(Clone)]
pub struct TimeLimiterLayer {
    config: Arc<TimeLimiterConfig>,
}

impl TimeLimiterLayer {
    pub fn builder() -> TimeLimiterConfigBuilder {
        TimeLimiterConfigBuilder::new()
    }

    pub fn config(&self) -> &TimeLimiterConfig {
        &self.config
    }
}

impl<S> Layer<S> for TimeLimiterLayer {
    type Service = TimeLimiter<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TimeLimiter {
            inner,
            config: Arc::clone(&self.config),
        }
    }
}

/// A service whose calls are bounded by a deadline.
#[derive(Clone)]
pub struct TimeLimiter<S> {
    inner: S,
    config: Arc<TimeLimiterConfig>,
}

impl<S, Req> Service<Req> for TimeLimiter<S>
where
    S: Service<Req> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Response: Send + 'static,
    S::Error: Send + 'static,
    Req: Send + 'static,
{
    type Response = S::Response;
    type Error = TimeLimitError<S::Error>;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(TimeLimitError::Inner)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let clone = self.inner.clone();
        let inner = std::mem::replace(&mut self.inner, clone);
        let config = Arc::clone(&self.config);

        Box::pin(async move {
            let start = Instant::now();
            let mut task = tokio::spawn(inner.oneshot(req));

            match tokio::time::timeout(config.timeout, &mut task).await {
                Ok(Ok(result)) => {
                    let duration = start.elapsed();
                    config.event_listeners.emit(&TimeLimiterEvent::Completed {
                        pattern_name: config.name.clone(),
                        timestamp: Instant::now(),
                        duration,
                    });
                    #[cfg(feature = "metrics")]
                    {
                        let outcome = if result.is_ok() { "success" } else { "error" };
                        counter!("timelimiter_calls_total", "timelimiter" => config.name.clone(), "result" => outcome).increment(1);
                        histogram!("timelimiter_call_duration_seconds", "timelimiter" => config.name.clone())
                            .record(duration.as_secs_f64());
                    }
                    result.map_err(TimeLimitError::Inner)
                }
                Ok(Err(join_error)) => {
                    tracing::error!(timelimiter = %config.name, error = %join_error, "limited task failed");
                    Err(TimeLimitError::Aborted(join_error.to_string()))
                }
                Err(_) => {
                    tracing::warn!(
                        timelimiter = %config.name,
                        limit_ms = config.timeout.as_millis() as u64,
                        "call exceeded time limit; detaching"
                    );
                    config.event_listeners.emit(&TimeLimiterEvent::Timeout {
                        pattern_name: config.name.clone(),
                        timestamp: Instant::now(),
                        limit: config.timeout,
                    });
                    #[cfg(feature = "metrics")]
                    counter!("timelimiter_calls_total", "timelimiter" => config.name.clone(), "result" => "timeout").increment(1);
                    // Dropping the handle detaches the task; it still runs to completion.
                    drop(task);
                    Err(TimeLimitError::Elapsed(config.timeout))
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tower::service_fn;

    #[tokio::test(start_paused = true)]
    async fn completes_within_limit() {
        let layer = TimeLimiterLayer::builder()
            .timeout(Duration::from_millis(100))
            .build();
        let svc = layer.layer(service_fn(|x: u32| async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok::<_, ()>(x + 1)
        }));
        assert_eq!(svc.oneshot(1).await.unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn elapsed_call_keeps_running_detached() {
        let finished = Arc::new(AtomicBool::new(false));
        let f = Arc::clone(&finished);
        let layer = TimeLimiterLayer::builder()
            .name("lookup")
            .timeout(Duration::from_millis(50))
            .build();
        let svc = layer.layer(service_fn(move |_: ()| {
            let f = Arc::clone(&f);
            async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                f.store(true, Ordering::SeqCst);
                Ok::<_, ()>(())
            }
        }));

        let err = svc.oneshot(()).await.unwrap_err();
        assert!(err.is_elapsed());
        assert!(!finished.load(Ordering::SeqCst));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn inner_errors_pass_through() {
        let layer = TimeLimiterLayer::builder().build();
        let svc = layer.layer(service_fn(|_: ()| async { Err::<(), _>("boom") }));
        match svc.oneshot(()).await {
            Err(TimeLimitError::Inner(e)) => assert_eq!(e, "boom"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
