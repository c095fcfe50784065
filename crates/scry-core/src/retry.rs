//! Bounded retry of fallible checks.

use std::time::Duration;

use tracing::debug;

use crate::shutdown::ShutdownSignal;

/// How often and how long to retry an operation.
pub trait RetryStrategy {
    /// Maximum number of attempts, including the first.
    fn max_attempts(&self) -> u32;

    /// Delay before attempt `attempt` (1-based, so the first retry is 2).
    fn delay(&self, attempt: u32) -> Duration;

    /// Run `op` until it yields `Some`, attempts run out, or `shutdown`
    /// fires. Waits between attempts are interruptible.
    fn run<T, F>(&self, shutdown: &ShutdownSignal, mut op: F) -> Option<T>
    where
        F: FnMut(u32) -> Option<T>,
    {
        for attempt in 1..=self.max_attempts() {
            if attempt > 1 && shutdown.wait(self.delay(attempt)) {
                return None;
            }
            if let Some(value) = op(attempt) {
                return Some(value);
            }
            debug!("Attempt {}/{} failed", attempt, self.max_attempts());
        }
        None
    }
}

/// Fixed number of attempts with a constant delay between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedDelay {
    pub attempts: u32,
    pub delay: Duration,
}

impl FixedDelay {
    pub const fn new(attempts: u32, delay: Duration) -> Self {
        Self { attempts, delay }
    }
}

impl RetryStrategy for FixedDelay {
    fn max_attempts(&self) -> u32 {
        self.attempts
    }

    fn delay(&self, _attempt: u32) -> Duration {
        self.delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_succeeds_on_third_attempt() {
        let signal = ShutdownSignal::new();
        let strategy = FixedDelay::new(5, Duration::from_millis(1));
        let mut calls = 0;
        let result = strategy.run(&signal, |attempt| {
            calls += 1;
            (attempt == 3).then_some(attempt)
        });
        assert_eq!(result, Some(3));
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_gives_up_after_max_attempts() {
        let signal = ShutdownSignal::new();
        let strategy = FixedDelay::new(5, Duration::from_millis(10));
        let start = Instant::now();
        let mut calls = 0;
        let result: Option<()> = strategy.run(&signal, |_| {
            calls += 1;
            None
        });
        assert!(result.is_none());
        assert_eq!(calls, 5);
        // four waits between five attempts
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn test_shutdown_stops_retrying() {
        let signal = ShutdownSignal::new();
        signal.trigger();
        let strategy = FixedDelay::new(5, Duration::from_secs(10));
        let mut calls = 0;
        let result: Option<()> = strategy.run(&signal, |_| {
            calls += 1;
            None
        });
        assert!(result.is_none());
        assert_eq!(calls, 1);
    }
}
