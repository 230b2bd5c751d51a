use super::backoff::{Backoff, IntervalFunction};
use super::RetryLayer;
use crate::events::{EventListeners, FnListener, RetryEvent};
use std::sync::Arc;
use std::time::Duration;

pub(crate) type RetryPredicate<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

/// Configuration for the retry middleware.
pub struct RetryConfig<E> {
    pub(crate) max_attempts: usize,
    pub(crate) interval_fn: Arc<dyn IntervalFunction>,
    pub(crate) retry_predicate: RetryPredicate<E>,
    pub(crate) event_listeners: EventListeners<RetryEvent>,
    pub(crate) name: String,
}

impl<E> RetryConfig<E> {
    pub(crate) fn should_retry(&self, error: &E) -> bool {
        (self.retry_predicate)(error)
    }

    pub(crate) fn next_backoff(&self, retry: usize) -> Duration {
        self.interval_fn.next_interval(retry)
    }
}

/// Builder for [`RetryLayer`].
pub struct RetryConfigBuilder<E> {
    max_attempts: usize,
    interval_fn: Arc<dyn IntervalFunction>,
    retry_predicate: RetryPredicate<E>,
    event_listeners: EventListeners<RetryEvent>,
    name: String,
}

impl<E> Default for RetryConfigBuilder<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> RetryConfigBuilder<E> {
    /// Defaults: 3 attempts, [`Backoff::default`], every error retried.
    pub fn new() -> Self {
        Self {
            max_attempts: 3,
            interval_fn: Arc::new(Backoff::default()),
            retry_predicate: Arc::new(|_| true),
            event_listeners: EventListeners::new(),
            name: String::from("<unnamed>"),
        }
    }

    /// Total attempts including the first; `3` means one call and two retries.
    pub fn max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn fixed_backoff(self, interval: Duration) -> Self {
        self.backoff(Backoff::fixed(interval))
    }

    /// Doubling backoff from `initial`, capped at `max`.
    pub fn exponential_backoff(self, initial: Duration, max: Duration) -> Self {
        self.backoff(Backoff::exponential(initial, max))
    }

    /// Any interval function, including a `Fn(usize) -> Duration` closure.
    pub fn backoff<I>(mut self, interval_fn: I) -> Self
    where
        I: IntervalFunction + 'static,
    {
        self.interval_fn = Arc::new(interval_fn);
        self
    }

    /// Only errors for which `predicate` returns true are retried.
    pub fn retry_on<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.retry_predicate = Arc::new(predicate);
        self
    }

    pub fn name<N: Into<String>>(mut self, name: N) -> Self {
        self.name = name.into();
        self
    }

    /// Called before each retry with the retry number (1 for the first retry)
    /// and the pause that precedes it.
    pub fn on_retry<F>(mut self, f: F) -> Self
    where
        F: Fn(usize, Duration) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event: &RetryEvent| {
            if let RetryEvent::Retry { attempt, delay, .. } = event {
                f(*attempt, *delay);
            }
        }));
        self
    }

    /// Called when a call succeeds, with the attempts it took.
    pub fn on_success<F>(mut self, f: F) -> Self
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event: &RetryEvent| {
            if let RetryEvent::Success { attempts, .. } = event {
                f(*attempts);
            }
        }));
        self
    }

    /// Called when every attempt has failed.
    pub fn on_exhausted<F>(mut self, f: F) -> Self
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event: &RetryEvent| {
            if let RetryEvent::Exhausted { attempts, .. } = event {
                f(*attempts);
            }
        }));
        self
    }

    pub fn on_event<F>(mut self, f: F) -> Self
    where
        F: Fn(&RetryEvent) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(f));
        self
    }

    pub fn build(self) -> RetryLayer<E> {
        RetryLayer::new(RetryConfig {
            max_attempts: self.max_attempts,
            interval_fn: self.interval_fn,
            retry_predicate: self.retry_predicate,
            event_listeners: self.event_listeners,
            name: self.name,
        })
    }
}
