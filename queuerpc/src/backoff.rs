//! Fibonacci backoff between receive retries.

use std::time::Duration;

/// Fibonacci backoff clamped to `[min, max]`.
///
/// With `min = 2s, max = 60s` the delays are 2, 2, 4, 6, 10, 16, 26, 42, 60,
/// 60, ... seconds.
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    min: Duration,
    max: Duration,
    previous: Duration,
    current: Duration,
}

impl FibonacciBackoff {
    /// Create a backoff starting at `min`.
    pub fn new(min: Duration, max: Duration) -> Self {
        let max = max.max(min);
        Self {
            min,
            max,
            previous: Duration::ZERO,
            current: min,
        }
    }

    /// Next delay to wait.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current.min(self.max);
        let next = if self.previous.is_zero() {
            self.current
        } else {
            self.previous.saturating_add(self.current)
        };
        self.previous = self.current;
        self.current = next.min(self.max);
        delay
    }

    /// Start over from the minimum.
    pub fn reset(&mut self) {
        self.previous = Duration::ZERO;
        self.current = self.min;
    }
}
