//! The patient lookup wrapped in time limit, fallback, retry and circuit
//! breaker, outermost first.
//!
//! Only transient lookup errors count as breaker failures and only they are
//! retried. A found or absent patient is a success at every layer. Whatever
//! failure survives the retries reaches the fallback exactly once and becomes
//! [`AppointmentError::DependencyUnavailable`]. The time limit bounds the whole
//! call and turns expiry into [`AppointmentError::DependencyTimeout`].

use crate::error::{AppointmentError, UnavailableCause};
use crate::lookup::{LookupError, LookupService, PatientLookup};
use crate::model::PatientRef;
use clinica_resilience::{
    BreakerError, CircuitBreaker, CircuitBreakerHandle, Fallback, FallbackLayer, ResilienceSettings,
    Retry, RetryError, TimeLimitError, TimeLimiter,
};
use std::sync::Arc;
use std::time::Duration;
use tower::{Layer, ServiceExt};

const NAME: &str = "patients";

type Lookup = Option<PatientRef>;
type Breaker = CircuitBreaker<LookupService, Lookup, LookupError>;
type Retried = Retry<Breaker, BreakerError<LookupError>>;
type Exhausted = RetryError<BreakerError<LookupError>>;
type Protected = TimeLimiter<Fallback<Retried, String, Lookup, Exhausted, AppointmentError>>;

/// Breaker handle exposed for health reporting.
pub type PatientsBreaker = CircuitBreakerHandle<Lookup, LookupError>;

pub struct ResilientPatientLookup {
    service: Protected,
    breaker: PatientsBreaker,
    timeout: Duration,
}

impl ResilientPatientLookup {
    /// Wraps `lookup` according to `settings`, which are expected to have
    /// passed [`ResilienceSettings::validate`].
    pub fn new(lookup: Arc<dyn PatientLookup>, settings: &ResilienceSettings) -> Self {
        let breaker = settings
            .circuit_breaker_builder::<Lookup, LookupError>()
            .name(NAME)
            .failure_classifier(|result| matches!(result, Err(e) if e.is_transient()))
            .build()
            .layer(LookupService::new(lookup));
        let handle = breaker.handle();

        let retry = settings
            .retry_builder::<BreakerError<LookupError>>()
            .name(NAME)
            .retry_on(|e| matches!(e, BreakerError::Inner(err) if err.is_transient()))
            .build();

        let fallback = FallbackLayer::<String, Lookup, Exhausted, AppointmentError>::builder(
            |document, err| Err(unavailable(document, err)),
        )
        .name(NAME)
        .build();

        let limiter = settings.time_limiter_builder().name(NAME).build();
        let timeout = limiter.config().timeout();

        Self {
            service: limiter.layer(fallback.layer(retry.layer(breaker))),
            breaker: handle,
            timeout,
        }
    }

    pub fn breaker(&self) -> &PatientsBreaker {
        &self.breaker
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Resolves a document number to a patient.
    ///
    /// `Ok(None)` means the patients service has no such patient.
    pub async fn resolve(&self, document_number: &str) -> Result<Option<PatientRef>, AppointmentError> {
        let document = document_number.to_string();
        match self.service.clone().oneshot(document.clone()).await {
            Ok(found) => Ok(found),
            Err(TimeLimitError::Inner(err)) => Err(err),
            Err(TimeLimitError::Elapsed(after)) => {
                Err(AppointmentError::DependencyTimeout { document, after })
            }
            Err(TimeLimitError::Aborted(reason)) => Err(AppointmentError::Internal(reason)),
        }
    }
}

fn unavailable(document: String, err: Exhausted) -> AppointmentError {
    let cause = match err {
        RetryError::Exhausted {
            attempts,
            last: BreakerError::Inner(last),
        } => UnavailableCause::RetriesExhausted { attempts, last },
        RetryError::NotRetried {
            attempts,
            error: BreakerError::Inner(error),
        } => {
            if error.is_transient() {
                UnavailableCause::RetriesExhausted {
                    attempts,
                    last: error,
                }
            } else {
                UnavailableCause::Rejected(error)
            }
        }
        RetryError::Exhausted {
            last: BreakerError::OpenCircuit { .. },
            ..
        }
        | RetryError::NotRetried {
            error: BreakerError::OpenCircuit { .. },
            ..
        } => UnavailableCause::CircuitOpen,
    };
    tracing::warn!(%document, %cause, "patients service unavailable; fallback applied");
    AppointmentError::DependencyUnavailable { document, cause }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use clinica_resilience::{Backoff, CircuitState};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Scripted {
        calls: AtomicUsize,
        answer: fn(usize) -> Result<Option<PatientRef>, LookupError>,
    }

    #[async_trait]
    impl PatientLookup for Scripted {
        async fn find_by_document(&self, _: &str) -> Result<Option<PatientRef>, LookupError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            (self.answer)(n)
        }
    }

    fn scripted(answer: fn(usize) -> Result<Option<PatientRef>, LookupError>) -> Arc<Scripted> {
        Arc::new(Scripted {
            calls: AtomicUsize::new(0),
            answer,
        })
    }

    fn settings() -> ResilienceSettings {
        let mut settings = ResilienceSettings::default();
        settings.retry.backoff = Backoff::fixed(Duration::from_millis(10));
        settings
    }

    fn ana() -> PatientRef {
        PatientRef {
            id: Some(1),
            document_number: "1".into(),
            first_name: "Ana".into(),
            last_name: "Gomez".into(),
            birth_date: None,
            phone: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_then_success() {
        let lookup = scripted(|n| {
            if n == 0 {
                Err(LookupError::Upstream { status: 502 })
            } else {
                Ok(Some(ana()))
            }
        });
        let resilient = ResilientPatientLookup::new(lookup.clone(), &settings());
        assert_eq!(resilient.resolve("1").await.unwrap(), Some(ana()));
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn absence_is_not_retried() {
        let lookup = scripted(|_| Ok(None));
        let resilient = ResilientPatientLookup::new(lookup.clone(), &settings());
        assert_eq!(resilient.resolve("987654321").await.unwrap(), None);
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 1);
        assert_eq!(resilient.breaker().state_sync(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_name_attempts_and_last_error() {
        let lookup = scripted(|_| Err(LookupError::Connect("connection refused".into())));
        let resilient = ResilientPatientLookup::new(lookup.clone(), &settings());

        let err = resilient.resolve("123").await.unwrap_err();
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 3);
        match err {
            AppointmentError::DependencyUnavailable { document, cause } => {
                assert_eq!(document, "123");
                assert_eq!(
                    cause,
                    UnavailableCause::RetriesExhausted {
                        attempts: 3,
                        last: LookupError::Connect("connection refused".into()),
                    }
                );
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn non_transient_errors_are_rejected_once() {
        let lookup = scripted(|_| Err(LookupError::UnexpectedStatus { status: 400 }));
        let resilient = ResilientPatientLookup::new(lookup.clone(), &settings());

        let err = resilient.resolve("1").await.unwrap_err();
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 1);
        assert!(matches!(
            err,
            AppointmentError::DependencyUnavailable {
                cause: UnavailableCause::Rejected(LookupError::UnexpectedStatus { status: 400 }),
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn open_breaker_short_circuits() {
        let lookup = scripted(|_| Err(LookupError::Timeout(Duration::from_secs(2))));
        let mut settings = settings();
        settings.retry.max_attempts = 1;
        settings.circuit_breaker.sliding_window_size = 2;
        settings.circuit_breaker.minimum_number_of_calls = 2;
        let resilient = ResilientPatientLookup::new(lookup.clone(), &settings);

        resilient.resolve("1").await.unwrap_err();
        resilient.resolve("1").await.unwrap_err();
        assert!(resilient.breaker().is_open());

        let err = resilient.resolve("1").await.unwrap_err();
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 2);
        assert!(matches!(
            err,
            AppointmentError::DependencyUnavailable {
                cause: UnavailableCause::CircuitOpen,
                ..
            }
        ));
    }
}
