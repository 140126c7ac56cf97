//! Reconnect delay for the relay worker.
//!
//! Linear in the number of consecutive failures, capped. A successful connect
//! resets the count.

use std::cmp;
use std::time::Duration;

pub const BACKOFF_STEP_SECS: u64 = 2;
pub const BACKOFF_MAX_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub struct Backoff {
    step: Duration,
    max: Duration,
    failures: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(
            Duration::from_secs(BACKOFF_STEP_SECS),
            Duration::from_secs(BACKOFF_MAX_SECS),
        )
    }
}

impl Backoff {
    pub fn new(step: Duration, max: Duration) -> Self {
        Self {
            step,
            max,
            failures: 0,
        }
    }

    /// Records a failure and returns how long to wait before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        let delay = self.step.saturating_mul(self.failures);
        cmp::min(delay, self.max)
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_by_step() {
        let mut backoff = Backoff::default();
        assert_eq!(backoff.next_delay(), Duration::from_secs(BACKOFF_STEP_SECS));
        assert_eq!(
            backoff.next_delay(),
            Duration::from_secs(BACKOFF_STEP_SECS * 2)
        );
        assert_eq!(backoff.failures(), 2);
    }

    #[test]
    fn test_backoff_is_capped() {
        let mut backoff = Backoff::default();
        for _ in 0..100 {
            backoff.next_delay();
        }
        assert_eq!(backoff.next_delay(), Duration::from_secs(BACKOFF_MAX_SECS));
    }

    #[test]
    fn test_backoff_resets_after_success() {
        let mut backoff = Backoff::default();
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(BACKOFF_STEP_SECS));
    }
}
