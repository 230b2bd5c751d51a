use super::window::SlidingWindow;
use super::{CircuitBreakerLayer, CircuitState};
use crate::events::{CircuitBreakerEvent, EventListeners, FnListener};
use std::sync::Arc;
use std::time::Duration;

pub(crate) type FailureClassifier<Res, Err> = Arc<dyn Fn(&Result<Res, Err>) -> bool + Send + Sync>;

/// Frozen breaker settings shared by every clone of the service.
pub struct CircuitBreakerConfig<Res, Err> {
    pub(crate) failure_rate_threshold: f64,
    pub(crate) sliding_window: SlidingWindow,
    pub(crate) minimum_number_of_calls: usize,
    pub(crate) wait_duration_in_open: Duration,
    pub(crate) permitted_calls_in_half_open: usize,
    pub(crate) failure_classifier: FailureClassifier<Res, Err>,
    pub(crate) event_listeners: EventListeners<CircuitBreakerEvent>,
    pub(crate) name: String,
}

impl<Res, Err> CircuitBreakerConfig<Res, Err> {
    /// Starts from the stock policy.
    pub fn builder() -> CircuitBreakerConfigBuilder<Res, Err> {
        CircuitBreakerConfigBuilder::new()
    }

    /// Name used in events, logs and metric labels.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cool-down spent in the open state before a trial call is allowed.
    pub fn wait_duration_in_open(&self) -> Duration {
        self.wait_duration_in_open
    }
}

/// Builder for [`CircuitBreakerLayer`].
pub struct CircuitBreakerConfigBuilder<Res, Err> {
    failure_rate_threshold: f64,
    sliding_window: SlidingWindow,
    minimum_number_of_calls: Option<usize>,
    wait_duration_in_open: Duration,
    permitted_calls_in_half_open: usize,
    failure_classifier: FailureClassifier<Res, Err>,
    event_listeners: EventListeners<CircuitBreakerEvent>,
    name: String,
}

impl<Res, Err> CircuitBreakerConfigBuilder<Res, Err> {
    /// Creates a builder with default values.
    ///
    /// Defaults: 50% threshold, count-based window of 10 calls, minimum of 5
    /// calls, 10 second cool-down, one half-open trial call, every error a failure.
    pub fn new() -> Self {
        Self {
            failure_rate_threshold: 0.5,
            sliding_window: SlidingWindow::CountBased(10),
            minimum_number_of_calls: None,
            wait_duration_in_open: Duration::from_secs(10),
            permitted_calls_in_half_open: 1,
            failure_classifier: Arc::new(|result| result.is_err()),
            event_listeners: EventListeners::new(),
            name: String::from("<unnamed>"),
        }
    }

    /// Failure rate (0.0 to 1.0) at or above which the circuit opens.
    pub fn failure_rate_threshold(mut self, rate: f64) -> Self {
        self.failure_rate_threshold = rate.clamp(0.0, 1.0);
        self
    }

    /// Uses a count-based window over the last `size` calls.
    pub fn sliding_window_size(mut self, size: usize) -> Self {
        self.sliding_window = SlidingWindow::CountBased(size.max(1));
        self
    }

    /// Uses a time-based window spanning `duration`.
    pub fn sliding_window_duration(mut self, duration: Duration) -> Self {
        self.sliding_window = SlidingWindow::TimeBased(duration);
        self
    }

    /// Sets the window directly.
    pub fn sliding_window(mut self, window: SlidingWindow) -> Self {
        self.sliding_window = match window {
            SlidingWindow::CountBased(size) => SlidingWindow::CountBased(size.max(1)),
            time => time,
        };
        self
    }

    /// Minimum recorded calls before the failure rate is evaluated.
    ///
    /// Default: the window size for count-based windows, 1 for time-based.
    pub fn minimum_number_of_calls(mut self, n: usize) -> Self {
        self.minimum_number_of_calls = Some(n.max(1));
        self
    }

    /// Cool-down before an open circuit lets a trial call through.
    pub fn wait_duration_in_open(mut self, duration: Duration) -> Self {
        self.wait_duration_in_open = duration;
        self
    }

    /// Trial calls permitted while half-open.
    pub fn permitted_calls_in_half_open(mut self, n: usize) -> Self {
        self.permitted_calls_in_half_open = n.max(1);
        self
    }

    /// Decides whether a result counts as a failure.
    ///
    /// Default: every `Err` is a failure.
    pub fn failure_classifier<F>(mut self, classifier: F) -> Self
    where
        F: Fn(&Result<Res, Err>) -> bool + Send + Sync + 'static,
    {
        self.failure_classifier = Arc::new(classifier);
        self
    }

    /// Names this breaker for observability.
    pub fn name<N: Into<String>>(mut self, name: N) -> Self {
        self.name = name.into();
        self
    }

    /// Registers a callback run on every state transition with `(from, to)`.
    pub fn on_state_transition<F>(mut self, f: F) -> Self
    where
        F: Fn(CircuitState, CircuitState) + Send + Sync + 'static,
    {
        self.event_listeners
            .add(FnListener::new(move |event: &CircuitBreakerEvent| {
                if let CircuitBreakerEvent::StateTransition {
                    from_state,
                    to_state,
                    ..
                } = event
                {
                    f(*from_state, *to_state);
                }
            }));
        self
    }

    /// Registers a callback run when a call is short-circuited.
    pub fn on_call_rejected<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.event_listeners
            .add(FnListener::new(move |event: &CircuitBreakerEvent| {
                if matches!(event, CircuitBreakerEvent::CallRejected { .. }) {
                    f();
                }
            }));
        self
    }

    /// Registers a callback run for every recorded failure.
    pub fn on_failure<F>(mut self, f: F) -> Self
    where
        F: Fn(CircuitState) + Send + Sync + 'static,
    {
        self.event_listeners
            .add(FnListener::new(move |event: &CircuitBreakerEvent| {
                if let CircuitBreakerEvent::FailureRecorded { state, .. } = event {
                    f(*state);
                }
            }));
        self
    }

    /// Registers a callback run for every recorded success.
    pub fn on_success<F>(mut self, f: F) -> Self
    where
        F: Fn(CircuitState) + Send + Sync + 'static,
    {
        self.event_listeners
            .add(FnListener::new(move |event: &CircuitBreakerEvent| {
                if let CircuitBreakerEvent::SuccessRecorded { state, .. } = event {
                    f(*state);
                }
            }));
        self
    }

    /// Registers an arbitrary listener.
    pub fn on_event<F>(mut self, f: F) -> Self
    where
        F: Fn(&CircuitBreakerEvent) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(f));
        self
    }

    /// Builds the layer.
    pub fn build(self) -> CircuitBreakerLayer<Res, Err> {
        CircuitBreakerLayer::new(self.into_config())
    }

    pub(crate) fn into_config(self) -> CircuitBreakerConfig<Res, Err> {
        let minimum_number_of_calls = self
            .minimum_number_of_calls
            .unwrap_or(match self.sliding_window {
                SlidingWindow::CountBased(size) => size,
                SlidingWindow::TimeBased(_) => 1,
            });

        CircuitBreakerConfig {
            failure_rate_threshold: self.failure_rate_threshold,
            sliding_window: self.sliding_window,
            minimum_number_of_calls,
            wait_duration_in_open: self.wait_duration_in_open,
            permitted_calls_in_half_open: self.permitted_calls_in_half_open,
            failure_classifier: self.failure_classifier,
            event_listeners: self.event_listeners,
            name: self.name,
        }
    }
}

impl<Res, Err> Default for CircuitBreakerConfigBuilder<Res, Err> {
    fn default() -> Self {
        Self::new()
    }
}
