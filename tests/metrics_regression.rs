//! Metric names and labels are part of the service's operational contract:
//! dashboards and alerts for the patients dependency key on them.
//!
//! Run with: cargo test --features metrics --test metrics_regression

#[cfg(feature = "metrics")]
mod metrics_regression {
    use clinica_resilience::{
        BreakerError, CircuitBreakerLayer, FallbackLayer, RetryError, RetryLayer, TimeLimiterLayer,
    };
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};
    use serial_test::serial;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, LazyLock};
    use std::time::Duration;
    use tower::{service_fn, Layer, ServiceExt};

    static RECORDER: LazyLock<DebuggingRecorder> = LazyLock::new(DebuggingRecorder::default);

    fn init_recorder() {
        let _ = metrics::set_global_recorder(&*RECORDER);
    }

    fn snapshot() -> Vec<(
        metrics_util::CompositeKey,
        Option<metrics::Unit>,
        Option<metrics::SharedString>,
        DebugValue,
    )> {
        RECORDER.snapshotter().snapshot().into_vec()
    }

    fn assert_kind(name: &str, matches_kind: fn(&DebugValue) -> bool, kind: &str) {
        let found = snapshot()
            .iter()
            .any(|(key, _, _, value)| key.key().name() == name && matches_kind(value));
        assert!(found, "expected {kind} '{name}' not found");
    }

    fn assert_counter(name: &str) {
        assert_kind(name, |v| matches!(v, DebugValue::Counter(_)), "counter");
    }

    fn assert_gauge(name: &str) {
        assert_kind(name, |v| matches!(v, DebugValue::Gauge(_)), "gauge");
    }

    fn assert_histogram(name: &str) {
        assert_kind(name, |v| matches!(v, DebugValue::Histogram(_)), "histogram");
    }

    fn assert_label(name: &str, label: &str, value: &str) {
        let found = snapshot().iter().any(|(key, _, _, _)| {
            let key = key.key();
            key.name() == name && key.labels().any(|l| l.key() == label && l.value() == value)
        });
        assert!(found, "expected '{name}' with {label}='{value}' not found");
    }

    #[derive(Debug, Clone)]
    struct Refused;

    #[tokio::test]
    #[serial]
    async fn circuitbreaker_metrics() {
        init_recorder();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let breaker = CircuitBreakerLayer::<u32, Refused>::builder()
            .name("patients_cb")
            .sliding_window_size(4)
            .minimum_number_of_calls(4)
            .failure_rate_threshold(0.5)
            .build()
            .layer(service_fn(move |x: u32| {
                let n = c.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n % 2 == 0 {
                        Ok(x)
                    } else {
                        Err(Refused)
                    }
                }
            }));

        for i in 0..6 {
            let _ = breaker.clone().oneshot(i).await;
        }

        assert_counter("circuitbreaker_calls_total");
        assert_label("circuitbreaker_calls_total", "circuitbreaker", "patients_cb");
        assert_label("circuitbreaker_calls_total", "outcome", "success");
        assert_label("circuitbreaker_calls_total", "outcome", "failure");
        assert_label("circuitbreaker_calls_total", "outcome", "rejected");

        assert_counter("circuitbreaker_transitions_total");
        assert_label("circuitbreaker_transitions_total", "from", "closed");
        assert_label("circuitbreaker_transitions_total", "to", "open");

        assert_gauge("circuitbreaker_state");
        assert_label("circuitbreaker_state", "circuitbreaker", "patients_cb");

        assert_histogram("circuitbreaker_call_duration_seconds");
    }

    #[tokio::test]
    #[serial]
    async fn retry_metrics() {
        init_recorder();
        let retry = RetryLayer::<Refused>::builder()
            .name("patients_retry")
            .max_attempts(2)
            .fixed_backoff(Duration::from_millis(1))
            .build();

        let failing = retry.layer(service_fn(|_: u32| async { Err::<u32, _>(Refused) }));
        let _ = failing.oneshot(1).await;
        let ok = retry.layer(service_fn(|x: u32| async move { Ok::<_, Refused>(x) }));
        let _ = ok.oneshot(1).await;

        assert_counter("retry_calls_total");
        assert_label("retry_calls_total", "retry", "patients_retry");
        assert_label("retry_calls_total", "outcome", "exhausted");
        assert_label("retry_calls_total", "outcome", "success");
        assert_counter("retry_attempts_total");
        assert_label("retry_attempts_total", "retry", "patients_retry");
    }

    #[tokio::test]
    #[serial]
    async fn fallback_metrics() {
        init_recorder();
        let layer = FallbackLayer::<u32, u32, RetryError<BreakerError<Refused>>, String>::builder(
            |_, _| Err("unavailable".to_string()),
        )
        .name("patients_fallback")
        .build();

        let failing = layer.layer(service_fn(|_: u32| async {
            Err::<u32, _>(RetryError::Exhausted {
                attempts: 3,
                last: BreakerError::Inner(Refused),
            })
        }));
        let _ = failing.oneshot(1).await;
        let ok = layer.layer(service_fn(|x: u32| async move {
            Ok::<_, RetryError<BreakerError<Refused>>>(x)
        }));
        let _ = ok.oneshot(1).await;

        assert_counter("fallback_calls_total");
        assert_label("fallback_calls_total", "fallback", "patients_fallback");
        assert_label("fallback_calls_total", "result", "applied");
        assert_label("fallback_calls_total", "result", "success");
    }

    #[tokio::test]
    #[serial]
    async fn timelimiter_metrics() {
        init_recorder();
        let layer = TimeLimiterLayer::builder()
            .name("patients_timeout")
            .timeout(Duration::from_millis(20))
            .build();

        let slow = layer.layer(service_fn(|_: u32| async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok::<u32, Refused>(0)
        }));
        let _ = slow.oneshot(1).await;
        let fast = layer.layer(service_fn(|x: u32| async move { Ok::<_, Refused>(x) }));
        let _ = fast.oneshot(1).await;

        assert_counter("timelimiter_calls_total");
        assert_label("timelimiter_calls_total", "timelimiter", "patients_timeout");
        assert_label("timelimiter_calls_total", "result", "timeout");
        assert_label("timelimiter_calls_total", "result", "success");
        assert_histogram("timelimiter_call_duration_seconds");
    }
}
