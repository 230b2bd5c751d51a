//! Pattern-level behaviour of the resilience middleware, composed the way
//! the appointments service composes it.

use clinica_resilience::events::{CircuitBreakerEvent, RetryEvent};
use clinica_resilience::{
    Backoff, BreakerError, CircuitBreakerLayer, CircuitState, FallbackLayer, RetryError,
    RetryLayer, TimeLimitError, TimeLimiterLayer,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tower::util::BoxCloneService;
use tower::{service_fn, Layer, ServiceBuilder, ServiceExt};

#[derive(Debug, Clone, PartialEq)]
enum Upstream {
    Refused,
    BadRequest,
}

fn flaky(calls: Arc<AtomicUsize>, healthy: Arc<AtomicBool>) -> BoxCloneService<u32, u32, Upstream> {
    service_fn(move |x: u32| {
        calls.fetch_add(1, Ordering::SeqCst);
        let ok = healthy.load(Ordering::SeqCst);
        async move {
            if ok {
                Ok(x)
            } else {
                Err(Upstream::Refused)
            }
        }
    })
    .boxed_clone()
}

#[tokio::test(start_paused = true)]
async fn time_based_window_forgets_old_failures() {
    let calls = Arc::new(AtomicUsize::new(0));
    let healthy = Arc::new(AtomicBool::new(false));
    let breaker = CircuitBreakerLayer::<u32, Upstream>::builder()
        .sliding_window_duration(Duration::from_secs(30))
        .minimum_number_of_calls(4)
        .failure_rate_threshold(0.5)
        .build()
        .layer(flaky(calls.clone(), healthy.clone()));

    for _ in 0..3 {
        breaker.clone().oneshot(1).await.unwrap_err();
    }
    tokio::time::advance(Duration::from_secs(31)).await;

    // the three old failures have aged out; one new failure is below the minimum
    breaker.clone().oneshot(1).await.unwrap_err();
    assert_eq!(breaker.state_sync(), CircuitState::Closed);
    assert_eq!(breaker.metrics().await.total_calls, 1);

    for _ in 0..3 {
        breaker.clone().oneshot(1).await.unwrap_err();
    }
    assert_eq!(breaker.state_sync(), CircuitState::Open);
}

#[tokio::test(start_paused = true)]
async fn half_open_needs_every_trial_call_to_succeed() {
    let calls = Arc::new(AtomicUsize::new(0));
    let healthy = Arc::new(AtomicBool::new(false));
    let breaker = CircuitBreakerLayer::<u32, Upstream>::builder()
        .sliding_window_size(2)
        .minimum_number_of_calls(2)
        .wait_duration_in_open(Duration::from_secs(5))
        .permitted_calls_in_half_open(2)
        .build()
        .layer(flaky(calls.clone(), healthy.clone()));

    breaker.clone().oneshot(1).await.unwrap_err();
    breaker.clone().oneshot(1).await.unwrap_err();
    assert_eq!(breaker.state_sync(), CircuitState::Open);

    tokio::time::advance(Duration::from_secs(5)).await;
    healthy.store(true, Ordering::SeqCst);

    assert_eq!(breaker.clone().oneshot(7).await.unwrap(), 7);
    assert_eq!(breaker.state_sync(), CircuitState::HalfOpen);
    assert_eq!(breaker.clone().oneshot(8).await.unwrap(), 8);
    assert_eq!(breaker.state_sync(), CircuitState::Closed);
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[tokio::test(start_paused = true)]
async fn call_admitted_while_closed_does_not_count_as_a_trial_call() {
    let healthy = Arc::new(AtomicBool::new(false));
    let started = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let (h, s, r) = (healthy.clone(), started.clone(), release.clone());
    let breaker = CircuitBreakerLayer::<u32, Upstream>::builder()
        .sliding_window_size(2)
        .minimum_number_of_calls(2)
        .wait_duration_in_open(Duration::from_secs(5))
        .permitted_calls_in_half_open(2)
        .build()
        .layer(service_fn(move |x: u32| {
            let ok = h.load(Ordering::SeqCst);
            let (started, release) = (s.clone(), r.clone());
            async move {
                if x == 0 {
                    started.notify_one();
                    release.notified().await;
                    return Ok(0);
                }
                if ok {
                    Ok(x)
                } else {
                    Err(Upstream::Refused)
                }
            }
        }));

    let slow = tokio::spawn(breaker.clone().oneshot(0));
    started.notified().await;

    breaker.clone().oneshot(1).await.unwrap_err();
    breaker.clone().oneshot(1).await.unwrap_err();
    assert_eq!(breaker.state_sync(), CircuitState::Open);

    tokio::time::advance(Duration::from_secs(5)).await;
    healthy.store(true, Ordering::SeqCst);
    assert_eq!(breaker.clone().oneshot(7).await.unwrap(), 7);
    assert_eq!(breaker.state_sync(), CircuitState::HalfOpen);

    release.notify_one();
    assert_eq!(slow.await.unwrap().unwrap(), 0);
    assert_eq!(breaker.state_sync(), CircuitState::HalfOpen);

    assert_eq!(breaker.clone().oneshot(8).await.unwrap(), 8);
    assert_eq!(breaker.state_sync(), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn transitions_are_reported_in_order() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let healthy = Arc::new(AtomicBool::new(false));
    let breaker = CircuitBreakerLayer::<u32, Upstream>::builder()
        .name("patients")
        .sliding_window_size(1)
        .minimum_number_of_calls(1)
        .wait_duration_in_open(Duration::from_secs(1))
        .on_event(move |event| {
            if let CircuitBreakerEvent::StateTransition {
                from_state,
                to_state,
                ..
            } = event
            {
                sink.lock().unwrap().push((*from_state, *to_state));
            }
        })
        .build()
        .layer(flaky(Arc::new(AtomicUsize::new(0)), healthy.clone()));

    breaker.clone().oneshot(1).await.unwrap_err();
    tokio::time::advance(Duration::from_secs(1)).await;
    healthy.store(true, Ordering::SeqCst);
    breaker.clone().oneshot(1).await.unwrap();

    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            (CircuitState::Closed, CircuitState::Open),
            (CircuitState::Open, CircuitState::HalfOpen),
            (CircuitState::HalfOpen, CircuitState::Closed),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn retry_waits_the_configured_backoff() {
    let delays = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&delays);
    let calls = Arc::new(AtomicUsize::new(0));
    let retry = RetryLayer::<Upstream>::builder()
        .max_attempts(4)
        .backoff(Backoff::exponential(
            Duration::from_millis(200),
            Duration::from_millis(500),
        ))
        .on_event(move |event| {
            if let RetryEvent::Retry { delay, .. } = event {
                sink.lock().unwrap().push(*delay);
            }
        })
        .build();
    let svc = retry.layer(flaky(calls.clone(), Arc::new(AtomicBool::new(false))));

    let started = tokio::time::Instant::now();
    let err = svc.oneshot(1).await.unwrap_err();

    assert!(err.is_exhausted());
    assert_eq!(err.attempts(), 4);
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert_eq!(
        *delays.lock().unwrap(),
        vec![
            Duration::from_millis(200),
            Duration::from_millis(400),
            Duration::from_millis(500),
        ]
    );
    assert!(started.elapsed() >= Duration::from_millis(1100));
}

#[tokio::test]
async fn non_retryable_errors_return_after_one_attempt() {
    let calls = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&calls);
    let retry = RetryLayer::<Upstream>::builder()
        .retry_on(|e| *e == Upstream::Refused)
        .build();
    let svc = retry.layer(service_fn(move |_: u32| {
        c.fetch_add(1, Ordering::SeqCst);
        async { Err::<u32, _>(Upstream::BadRequest) }
    }));

    match svc.oneshot(1).await.unwrap_err() {
        RetryError::NotRetried { attempts, error } => {
            assert_eq!(attempts, 1);
            assert_eq!(error, Upstream::BadRequest);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn full_stack_applies_fallback_once_per_call() {
    let calls = Arc::new(AtomicUsize::new(0));
    let applied = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&applied);

    let svc = ServiceBuilder::new()
        .layer(TimeLimiterLayer::builder().timeout(Duration::from_secs(5)).build())
        .layer(
            FallbackLayer::<u32, u32, RetryError<BreakerError<Upstream>>, String>::builder(
                |req, err| Err(format!("request {req}: {err:?}")),
            )
            .on_applied(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .build(),
        )
        .layer(
            RetryLayer::<BreakerError<Upstream>>::builder()
                .max_attempts(3)
                .fixed_backoff(Duration::from_millis(50))
                .retry_on(|e| !e.is_circuit_open())
                .build(),
        )
        .layer(
            CircuitBreakerLayer::<u32, Upstream>::builder()
                .sliding_window_size(10)
                .minimum_number_of_calls(10)
                .build(),
        )
        .service(flaky(calls.clone(), Arc::new(AtomicBool::new(false))));

    let err = svc.clone().oneshot(9).await.unwrap_err();
    match err {
        TimeLimitError::Inner(message) => assert!(message.starts_with("request 9")),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(applied.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn time_limit_surfaces_elapsed_and_lets_the_call_finish() {
    let finished = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&finished);
    let svc = TimeLimiterLayer::builder()
        .timeout(Duration::from_millis(500))
        .build()
        .layer(service_fn(move |_: ()| {
            let flag = Arc::clone(&flag);
            async move {
                tokio::time::sleep(Duration::from_secs(2)).await;
                flag.store(true, Ordering::SeqCst);
                Ok::<_, Upstream>(())
            }
        }));

    let err = svc.oneshot(()).await.unwrap_err();
    assert!(err.is_elapsed());
    assert!(!finished.load(Ordering::SeqCst));

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(finished.load(Ordering::SeqCst));
}
