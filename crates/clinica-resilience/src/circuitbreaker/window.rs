use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// How the breaker samples recent call history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlidingWindow {
    /// The last `n` recorded calls.
    CountBased(usize),
    /// Every call recorded within the trailing duration.
    TimeBased(Duration),
}

/// Aggregate over the calls currently held in the window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct WindowStats {
    pub(crate) total: usize,
    pub(crate) failures: usize,
}

impl WindowStats {
    pub(crate) fn successes(&self) -> usize {
        self.total - self.failures
    }

    pub(crate) fn failure_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.failures as f64 / self.total as f64
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Outcome {
    at: Instant,
    failed: bool,
}

/// Rolling record of call outcomes.
///
/// Count-based windows evict the oldest outcome once full; time-based windows
/// evict anything older than their span on every access.
#[derive(Debug)]
pub(crate) struct RollingWindow {
    kind: SlidingWindow,
    outcomes: VecDeque<Outcome>,
    failures: usize,
}

impl RollingWindow {
    pub(crate) fn new(kind: SlidingWindow) -> Self {
        let capacity = match kind {
            SlidingWindow::CountBased(n) => n,
            SlidingWindow::TimeBased(_) => 0,
        };
        Self {
            kind,
            outcomes: VecDeque::with_capacity(capacity),
            failures: 0,
        }
    }

    pub(crate) fn record(&mut self, failed: bool, now: Instant) {
        self.evict(now);
        if let SlidingWindow::CountBased(size) = self.kind {
            while self.outcomes.len() >= size.max(1) {
                self.pop_oldest();
            }
        }
        self.outcomes.push_back(Outcome { at: now, failed });
        if failed {
            self.failures += 1;
        }
    }

    pub(crate) fn stats(&mut self, now: Instant) -> WindowStats {
        self.evict(now);
        WindowStats {
            total: self.outcomes.len(),
            failures: self.failures,
        }
    }

    pub(crate) fn clear(&mut self) {
        self.outcomes.clear();
        self.failures = 0;
    }

    fn evict(&mut self, now: Instant) {
        if let SlidingWindow::TimeBased(span) = self.kind {
            while let Some(oldest) = self.outcomes.front() {
                if now.duration_since(oldest.at) > span {
                    self.pop_oldest();
                } else {
                    break;
                }
            }
        }
    }

    fn pop_oldest(&mut self) {
        if let Some(outcome) = self.outcomes.pop_front() {
            if outcome.failed {
                self.failures -= 1;
            }
        }
    }
}
