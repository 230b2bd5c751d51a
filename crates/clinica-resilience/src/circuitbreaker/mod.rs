//! Circuit breaker middleware.
//!
//! Every call passes through a shared [`Circuit`] guarded by one async mutex:
//! permit checks, outcome recording and transition evaluation each happen in a
//! single critical section. An atomic mirror of the state allows lock-free reads
//! from health endpoints.
//!
//! ```
//! use clinica_resilience::circuitbreaker::CircuitBreakerLayer;
//! use std::time::Duration;
//! use tower::{service_fn, Layer};
//!
//! let layer = CircuitBreakerLayer::<String, std::io::Error>::builder()
//!     .name("patients")
//!     .sliding_window_size(10)
//!     .minimum_number_of_calls(5)
//!     .wait_duration_in_open(Duration::from_secs(10))
//!     .build();
//!
//! let breaker = layer.layer(service_fn(|req: String| async move {
//!     Ok::<_, std::io::Error>(req)
//! }));
//! assert!(!breaker.is_open());
//! ```

mod circuit;
mod config;
mod window;

pub use circuit::{CircuitMetrics, CircuitState};
pub use config::{CircuitBreakerConfig, CircuitBreakerConfigBuilder};
pub use window::SlidingWindow;

use crate::error::BreakerError;
use circuit::Circuit;
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tower::{Layer, Service};

/// Applies a circuit breaker to an inner service.
///
/// Services produced by one layer value share nothing; clones of one
/// [`CircuitBreaker`] share the same circuit.
pub struct CircuitBreakerLayer<Res, Err> {
    config: Arc<CircuitBreakerConfig<Res, Err>>,
}

impl<Res, Err> CircuitBreakerLayer<Res, Err> {
    pub(crate) fn new(config: CircuitBreakerConfig<Res, Err>) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// Creates a builder.
    pub fn builder() -> CircuitBreakerConfigBuilder<Res, Err> {
        CircuitBreakerConfigBuilder::new()
    }
}

impl<Res, Err> Clone for CircuitBreakerLayer<Res, Err> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
        }
    }
}

impl<S, Res, Err> Layer<S> for CircuitBreakerLayer<Res, Err> {
    type Service = CircuitBreaker<S, Res, Err>;

    fn layer(&self, service: S) -> Self::Service {
        CircuitBreaker::new(service, Arc::clone(&self.config))
    }
}

/// Shared view of a circuit, detached from the wrapped service.
///
/// Handles outlive any particular service clone and are what health endpoints
/// and admin operations hold on to.
pub struct CircuitBreakerHandle<Res, Err> {
    circuit: Arc<Mutex<Circuit>>,
    state_atomic: Arc<AtomicU8>,
    config: Arc<CircuitBreakerConfig<Res, Err>>,
}

impl<Res, Err> Clone for CircuitBreakerHandle<Res, Err> {
    fn clone(&self) -> Self {
        Self {
            circuit: Arc::clone(&self.circuit),
            state_atomic: Arc::clone(&self.state_atomic),
            config: Arc::clone(&self.config),
        }
    }
}

impl<Res, Err> CircuitBreakerHandle<Res, Err> {
    /// Breaker name.
    pub fn name(&self) -> &str {
        self.config.name()
    }

    /// Current state, read under the lock.
    pub async fn state(&self) -> CircuitState {
        self.circuit.lock().await.state()
    }

    /// Current state without locking.
    pub fn state_sync(&self) -> CircuitState {
        CircuitState::from_u8(self.state_atomic.load(Ordering::Acquire))
    }

    /// Whether calls are currently being rejected.
    pub fn is_open(&self) -> bool {
        self.state_sync() == CircuitState::Open
    }

    /// Snapshot of the rolling window.
    pub async fn metrics(&self) -> CircuitMetrics {
        self.circuit.lock().await.metrics()
    }

    pub async fn force_open(&self) {
        self.circuit.lock().await.force_open(&self.config);
    }

    pub async fn force_closed(&self) {
        self.circuit.lock().await.force_closed(&self.config);
    }

    /// Closes the circuit and clears the window.
    pub async fn reset(&self) {
        self.circuit.lock().await.reset(&self.config);
    }

    /// 503 while open, 200 otherwise.
    pub fn http_status(&self) -> u16 {
        match self.state_sync() {
            CircuitState::Open => 503,
            CircuitState::Closed | CircuitState::HalfOpen => 200,
        }
    }

    /// "healthy", "degraded" (half-open) or "unhealthy" (open).
    pub fn health_status(&self) -> &'static str {
        match self.state_sync() {
            CircuitState::Closed => "healthy",
            CircuitState::HalfOpen => "degraded",
            CircuitState::Open => "unhealthy",
        }
    }
}

/// A service guarded by a circuit breaker.
pub struct CircuitBreaker<S, Res, Err> {
    inner: S,
    handle: CircuitBreakerHandle<Res, Err>,
}

impl<S, Res, Err> CircuitBreaker<S, Res, Err> {
    pub(crate) fn new(inner: S, config: Arc<CircuitBreakerConfig<Res, Err>>) -> Self {
        let state_atomic = Arc::new(AtomicU8::new(CircuitState::Closed as u8));
        let circuit = Circuit::new(&config, Arc::clone(&state_atomic));
        Self {
            inner,
            handle: CircuitBreakerHandle {
                circuit: Arc::new(Mutex::new(circuit)),
                state_atomic,
                config,
            },
        }
    }

    /// Returns a handle sharing this breaker's circuit.
    pub fn handle(&self) -> CircuitBreakerHandle<Res, Err> {
        self.handle.clone()
    }

    pub fn state_sync(&self) -> CircuitState {
        self.handle.state_sync()
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_open()
    }

    pub async fn state(&self) -> CircuitState {
        self.handle.state().await
    }

    pub async fn metrics(&self) -> CircuitMetrics {
        self.handle.metrics().await
    }

    pub async fn reset(&self) {
        self.handle.reset().await
    }
}

impl<S: Clone, Res, Err> Clone for CircuitBreaker<S, Res, Err> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            handle: self.handle.clone(),
        }
    }
}

impl<S, Req, Res, Err> Service<Req> for CircuitBreaker<S, Res, Err>
where
    S: Service<Req, Response = Res, Error = Err> + Clone + Send + 'static,
    S::Future: Send + 'static,
    Req: Send + 'static,
    Res: Send + 'static,
    Err: Send + 'static,
{
    type Response = Res;
    type Error = BreakerError<Err>;
    type Future = BoxFuture<'static, Result<Res, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(BreakerError::Inner)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let handle = self.handle.clone();

        Box::pin(async move {
            let config = &handle.config;
            let Some(generation) = handle.circuit.lock().await.try_acquire(config) else {
                return Err(BreakerError::OpenCircuit {
                    name: config.name.clone(),
                });
            };

            tracing::trace!(breaker = %config.name, "call permitted");
            let start = Instant::now();
            let result = inner.call(req).await;
            let duration = start.elapsed();

            let failed = (config.failure_classifier)(&result);
            {
                let mut circuit = handle.circuit.lock().await;
                if failed {
                    circuit.record_failure(config, generation, duration);
                } else {
                    circuit.record_success(config, generation, duration);
                }
            }

            result.map_err(BreakerError::Inner)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tower::{service_fn, ServiceExt};

    #[tokio::test]
    async fn classifier_can_ignore_errors() {
        let layer = CircuitBreakerLayer::<(), &'static str>::builder()
            .sliding_window_size(2)
            .minimum_number_of_calls(2)
            .failure_classifier(|result| matches!(result, Err(e) if *e != "absent"))
            .build();
        let breaker = layer.layer(service_fn(|_: ()| async { Err::<(), _>("absent") }));

        for _ in 0..5 {
            let err = breaker.clone().oneshot(()).await.unwrap_err();
            assert!(!err.is_circuit_open());
        }
        assert_eq!(breaker.state().await, CircuitState::Closed);
        assert_eq!(breaker.metrics().await.success_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn open_circuit_skips_inner_service() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let layer = CircuitBreakerLayer::<(), &'static str>::builder()
            .name("patients")
            .sliding_window_size(3)
            .minimum_number_of_calls(3)
            .wait_duration_in_open(Duration::from_secs(10))
            .build();
        let breaker = layer.layer(service_fn(move |_: ()| {
            c.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>("refused") }
        }));

        for _ in 0..3 {
            let _ = breaker.clone().oneshot(()).await;
        }
        assert!(breaker.is_open());
        let handle = breaker.handle();
        assert_eq!(handle.http_status(), 503);
        assert_eq!(handle.health_status(), "unhealthy");

        let err = breaker.clone().oneshot(()).await.unwrap_err();
        assert!(err.is_circuit_open());
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        handle.reset().await;
        assert_eq!(breaker.state_sync(), CircuitState::Closed);
        assert_eq!(handle.http_status(), 200);
    }

    #[tokio::test]
    async fn clones_share_one_circuit() {
        let layer = CircuitBreakerLayer::<(), ()>::builder().build();
        let breaker = layer.layer(service_fn(|_: ()| async { Ok::<_, ()>(()) }));
        let other = breaker.clone();

        breaker.handle().force_open().await;
        assert!(other.is_open());
    }
}
