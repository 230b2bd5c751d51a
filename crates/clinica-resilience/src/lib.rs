//! Resilience middleware for clinica's cross-service calls.
//!
//! Four Tower layers, meant to be stacked outermost first:
//!
//! - [`TimeLimiterLayer`]: bounds the whole protected call and detaches it on expiry
//! - [`FallbackLayer`]: maps whatever failure remains to the caller's error, once
//! - [`RetryLayer`]: re-issues failed calls with backoff
//! - [`CircuitBreakerLayer`]: short-circuits calls while the dependency is failing
//!
//! Each pattern emits typed events through [`events::EventListeners`], logs
//! through `tracing`, and with the `metrics` feature records counters, gauges
//! and histograms.
//!
//! ```
//! use clinica_resilience::{
//!     BreakerError, CircuitBreakerLayer, FallbackLayer, RetryError, RetryLayer, TimeLimiterLayer,
//! };
//! use std::time::Duration;
//! use tower::{service_fn, ServiceBuilder, ServiceExt};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let breaker = CircuitBreakerLayer::<u32, std::io::Error>::builder().name("demo").build();
//! let retry = RetryLayer::<BreakerError<std::io::Error>>::builder()
//!     .max_attempts(2)
//!     .retry_on(|e| !e.is_circuit_open())
//!     .build();
//! let fallback = FallbackLayer::<u32, u32, RetryError<BreakerError<std::io::Error>>, String>::from_error(
//!     |req, err| format!("request {req} failed: {err}"),
//! );
//! let limit = TimeLimiterLayer::builder().timeout(Duration::from_secs(1)).build();
//!
//! let svc = ServiceBuilder::new()
//!     .layer(limit)
//!     .layer(fallback)
//!     .layer(retry)
//!     .layer(breaker)
//!     .service(service_fn(|x: u32| async move { Ok::<_, std::io::Error>(x * 2) }));
//!
//! assert_eq!(svc.oneshot(21).await.unwrap(), 42);
//! # }
//! ```

pub mod circuitbreaker;
pub mod error;
pub mod events;
pub mod fallback;
pub mod retry;
pub mod settings;
pub mod timelimiter;

pub use circuitbreaker::{
    CircuitBreaker, CircuitBreakerHandle, CircuitBreakerLayer, CircuitMetrics, CircuitState,
    SlidingWindow,
};
pub use error::{BreakerError, ConfigError, RetryError, TimeLimitError};
pub use events::{EventListener, EventListeners, FnListener, ResilienceEvent};
pub use fallback::{Fallback, FallbackLayer};
pub use retry::{Backoff, IntervalFunction, Retry, RetryLayer};
pub use settings::{CircuitBreakerSettings, ResilienceSettings, RetrySettings, WindowKind};
pub use timelimiter::{TimeLimiter, TimeLimiterLayer};
