//! Capped exponential backoff.

use std::time::Duration;

/// Computes `min(base × 2^attempt, cap)` and tracks consecutive failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap: cap.max(base),
            attempt: 0,
        }
    }

    /// Delay for a given zero-based attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        // 2^31 already exceeds any practical cap
        let factor = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .map_or(self.cap, |d| d.min(self.cap))
    }

    /// Records a failure and returns the delay before the next retry.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.delay_for(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Number of consecutive failures recorded since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn cap(&self) -> Duration {
        self.cap
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(list: &[u64]) -> Vec<Duration> {
        list.iter().map(|s| Duration::from_secs(*s)).collect()
    }

    #[test]
    fn test_sequence_is_capped() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(30));
        let delays: Vec<Duration> = (0..8).map(|_| backoff.next_delay()).collect();
        assert_eq!(delays, secs(&[1, 2, 4, 8, 16, 30, 30, 30]));
        assert_eq!(backoff.attempt(), 8);
    }

    #[test]
    fn test_three_failures_then_reset() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(10));
        let delays: Vec<Duration> = (0..3).map(|_| backoff.next_delay()).collect();
        assert_eq!(delays, secs(&[1, 2, 4]));
        assert_eq!(backoff.attempt(), 3);

        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_non_decreasing_and_bounded_for_large_attempts() {
        let backoff = Backoff::new(Duration::from_millis(250), Duration::from_secs(60));
        let mut previous = Duration::ZERO;
        for attempt in 0..200 {
            let delay = backoff.delay_for(attempt);
            assert!(delay >= previous);
            assert!(delay <= Duration::from_secs(60));
            previous = delay;
        }
        assert_eq!(backoff.delay_for(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn test_cap_below_base_is_raised() {
        let backoff = Backoff::new(Duration::from_secs(5), Duration::from_secs(1));
        assert_eq!(backoff.cap(), Duration::from_secs(5));
        assert_eq!(backoff.delay_for(3), Duration::from_secs(5));
    }
}
