//! Reconnection policy and retry budget.
//!
//! The delay curve is capped exponential: each consecutive failure waits
//! longer, up to a ceiling, and any successful connect resets both the delay
//! and the attempt budget. The budget makes exhaustion a real, observable
//! terminal state instead of an endless background loop.

use std::time::Duration;

/// Backoff configuration for stream reconnection.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum scheduled retries between successful connects.
    pub max_attempts: u32,

    /// Delay before the first retry.
    pub initial_backoff: Duration,

    /// Ceiling for the backoff curve.
    pub max_backoff: Duration,

    /// Multiplier applied per consecutive failure.
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Backoff for a given attempt number (1-indexed).
    ///
    /// Monotonic non-decreasing in the attempt number, clamped to
    /// `max_backoff`.
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let multiplier = self
            .backoff_multiplier
            .powi(attempt.saturating_sub(1) as i32);
        let backoff = self.initial_backoff.mul_f64(multiplier);
        backoff.min(self.max_backoff)
    }
}

/// Attempt accounting for one session.
///
/// Counts consecutive failures since the last successful connect. The budget
/// is spent once `next_delay` has handed out `max_attempts` delays without a
/// reset in between; after that the caller parks until a manual retry.
#[derive(Debug)]
pub struct RetrySchedule {
    policy: RetryPolicy,
    attempts: u32,
}

impl RetrySchedule {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy, attempts: 0 }
    }

    /// Delay before the next reconnect attempt, or `None` once the budget is
    /// spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= self.policy.max_attempts {
            return None;
        }

        self.attempts += 1;
        Some(self.policy.backoff_for_attempt(self.attempts))
    }

    /// Reset the budget. Called after every successful connect and on manual
    /// retry.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Failures since the last successful connect.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_calculation() {
        let policy = RetryPolicy::default();

        // Attempt 1: initial_backoff * 2^0 = 500ms
        assert_eq!(policy.backoff_for_attempt(1), Duration::from_millis(500));

        // Attempt 2: initial_backoff * 2^1 = 1s
        assert_eq!(policy.backoff_for_attempt(2), Duration::from_millis(1000));

        // Attempt 3: initial_backoff * 2^2 = 2s
        assert_eq!(policy.backoff_for_attempt(3), Duration::from_millis(2000));

        // Eventually capped at max_backoff
        assert_eq!(policy.backoff_for_attempt(20), Duration::from_secs(30));
    }

    #[test]
    fn test_backoff_is_monotonic_non_decreasing() {
        let policy = RetryPolicy::default();

        let mut previous = Duration::ZERO;
        for attempt in 1..=32 {
            let delay = policy.backoff_for_attempt(attempt);
            assert!(delay >= previous, "delay shrank at attempt {}", attempt);
            previous = delay;
        }
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.initial_backoff, Duration::from_millis(500));
        assert_eq!(policy.max_backoff, Duration::from_secs(30));
        assert!((policy.backoff_multiplier - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_schedule_spends_budget_then_stops() {
        let mut schedule = RetrySchedule::new(RetryPolicy {
            max_attempts: 3,
            ..Default::default()
        });

        assert!(schedule.next_delay().is_some());
        assert!(schedule.next_delay().is_some());
        assert!(schedule.next_delay().is_some());
        assert_eq!(schedule.attempts(), 3);
        assert!(schedule.next_delay().is_none());
        assert!(schedule.next_delay().is_none());
    }

    #[test]
    fn test_schedule_reset_restores_base_delay_and_budget() {
        let mut schedule = RetrySchedule::new(RetryPolicy {
            max_attempts: 2,
            ..Default::default()
        });

        let first = schedule.next_delay().unwrap();
        let second = schedule.next_delay().unwrap();
        assert!(second > first);
        assert!(schedule.next_delay().is_none());

        schedule.reset();
        assert_eq!(schedule.attempts(), 0);
        assert_eq!(schedule.next_delay().unwrap(), first);
    }
}
