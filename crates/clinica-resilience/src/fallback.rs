//! Fallback middleware.
//!
//! When the inner service fails, a handler receives the original request and
//! the error and decides the final outcome: a substitute response or a
//! different error. The handler runs at most once per call and never calls the
//! inner service again.

use crate::events::{EventListeners, FallbackEvent, FnListener};
use futures::future::BoxFuture;
#[cfg(feature = "metrics")]
use metrics::counter;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::time::Instant;
use tower::{Layer, Service, ServiceExt};

type Handler<Req, Res, E, E2> = Arc<dyn Fn(Req, E) -> Result<Res, E2> + Send + Sync>;

/// Configuration for the fallback middleware.
pub struct FallbackConfig<Req, Res, E, E2> {
    handler: Handler<Req, Res, E, E2>,
    event_listeners: EventListeners<FallbackEvent>,
    name: String,
}

/// Builder for [`FallbackLayer`].
pub struct FallbackConfigBuilder<Req, Res, E, E2> {
    handler: Handler<Req, Res, E, E2>,
    event_listeners: EventListeners<FallbackEvent>,
    name: String,
}

impl<Req, Res, E, E2> FallbackConfigBuilder<Req, Res, E, E2> {
    pub fn name<N: Into<String>>(mut self, name: N) -> Self {
        self.name = name.into();
        self
    }

    /// Called each time the handler produces the outcome.
    pub fn on_applied<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.event_listeners
            .add(FnListener::new(move |event: &FallbackEvent| {
                if matches!(event, FallbackEvent::Applied { .. }) {
                    f();
                }
            }));
        self
    }

    pub fn on_event<F>(mut self, f: F) -> Self
    where
        F: Fn(&FallbackEvent) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(f));
        self
    }

    pub fn build(self) -> FallbackLayer<Req, Res, E, E2> {
        FallbackLayer {
            config: Arc::new(FallbackConfig {
                handler: self.handler,
                event_listeners: self.event_listeners,
                name: self.name,
            }),
        }
    }
}

/// Applies [`Fallback`] to an inner service.
pub struct FallbackLayer<Req, Res, E, E2> {
    config: Arc<FallbackConfig<Req, Res, E, E2>>,
}

impl<Req, Res, E, E2> FallbackLayer<Req, Res, E, E2> {
    /// Starts a builder around `handler`, which maps a failed call to its
    /// final outcome.
    pub fn builder<F>(handler: F) -> FallbackConfigBuilder<Req, Res, E, E2>
    where
        F: Fn(Req, E) -> Result<Res, E2> + Send + Sync + 'static,
    {
        FallbackConfigBuilder {
            handler: Arc::new(handler),
            event_listeners: EventListeners::new(),
            name: String::from("<unnamed>"),
        }
    }

    /// Every failure becomes the error returned by `f`.
    pub fn from_error<F>(f: F) -> Self
    where
        F: Fn(Req, E) -> E2 + Send + Sync + 'static,
    {
        Self::builder(move |req, err| Err(f(req, err))).build()
    }
}

impl<Req, Res, E, E2> Clone for FallbackLayer<Req, Res, E, E2> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
        }
    }
}

impl<S, Req, Res, E, E2> Layer<S> for FallbackLayer<Req, Res, E, E2> {
    type Service = Fallback<S, Req, Res, E, E2>;

    fn layer(&self, inner: S) -> Self::Service {
        Fallback {
            inner,
            config: Arc::clone(&self.config),
        }
    }
}

/// A service whose failures are routed through a fallback handler.
pub struct Fallback<S, Req, Res, E, E2> {
    inner: S,
    config: Arc<FallbackConfig<Req, Res, E, E2>>,
}

impl<S: Clone, Req, Res, E, E2> Clone for Fallback<S, Req, Res, E, E2> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            config: Arc::clone(&self.config),
        }
    }
}

impl<S, Req, Res, E, E2> Service<Req> for Fallback<S, Req, Res, E, E2>
where
    S: Service<Req, Response = Res, Error = E> + Clone + Send + 'static,
    S::Future: Send + 'static,
    Req: Clone + Send + 'static,
    Res: Send + 'static,
    E: Send + 'static,
    E2: Send + 'static,
{
    type Response = Res;
    type Error = E2;
    type Future = BoxFuture<'static, Result<Res, E2>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // Inner readiness is driven inside the call so its errors reach the handler.
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let mut inner = self.inner.clone();
        let config = Arc::clone(&self.config);
        let original = req.clone();

        Box::pin(async move {
            let result = match inner.ready().await {
                Ok(ready) => ready.call(req).await,
                Err(error) => Err(error),
            };
            match result {
                Ok(response) => {
                    config.event_listeners.emit(&FallbackEvent::Success {
                        pattern_name: config.name.clone(),
                        timestamp: Instant::now(),
                    });
                    #[cfg(feature = "metrics")]
                    counter!("fallback_calls_total", "fallback" => config.name.clone(), "result" => "success").increment(1);
                    Ok(response)
                }
                Err(error) => {
                    tracing::debug!(fallback = %config.name, "inner service failed; applying fallback");
                    config.event_listeners.emit(&FallbackEvent::Applied {
                        pattern_name: config.name.clone(),
                        timestamp: Instant::now(),
                    });
                    #[cfg(feature = "metrics")]
                    counter!("fallback_calls_total", "fallback" => config.name.clone(), "result" => "applied").increment(1);
                    (config.handler)(original, error)
                }
            }
        })
    }
}
