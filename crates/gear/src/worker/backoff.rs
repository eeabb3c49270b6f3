//! Exponential backoff after broker errors

use std::time::Duration;

/// Grows the wait between retries up to a ceiling, resets on success
#[derive(Debug, Clone)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    multiplier: f64,
    current: Duration,
}

impl Backoff {
    pub fn new(min: Duration, max: Duration, multiplier: f64) -> Self {
        let max = max.max(min);
        Self {
            min,
            max,
            multiplier: multiplier.max(1.0),
            current: min,
        }
    }

    /// Interval the next wait will use
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Return the interval to wait now and grow the next one
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        let grown = Duration::try_from_secs_f64(self.current.as_secs_f64() * self.multiplier)
            .unwrap_or(self.max);
        self.current = grown.min(self.max);
        delay
    }

    /// Back to the minimum interval
    pub fn reset(&mut self) {
        self.current = self.min;
    }
}
