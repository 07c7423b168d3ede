//! Bounded polling with a fixed interval.

use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    interval: Duration,
}

impl RetryPolicy {
    /// `max_attempts` is clamped to at least one.
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            interval,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    Satisfied { attempts: u32 },
    Exhausted { attempts: u32 },
}

impl RetryOutcome {
    pub fn is_satisfied(&self) -> bool {
        matches!(self, RetryOutcome::Satisfied { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            RetryOutcome::Satisfied { attempts } | RetryOutcome::Exhausted { attempts } => {
                *attempts
            }
        }
    }
}

/// Evaluate `predicate` up to `max_attempts` times, sleeping `interval`
/// between evaluations. No sleep happens after the final attempt.
pub fn retry_until<F>(policy: RetryPolicy, mut predicate: F) -> RetryOutcome
where
    F: FnMut() -> bool,
{
    let mut attempts = 0;
    loop {
        attempts += 1;
        if predicate() {
            return RetryOutcome::Satisfied { attempts };
        }
        if attempts >= policy.max_attempts {
            return RetryOutcome::Exhausted { attempts };
        }
        if !policy.interval.is_zero() {
            thread::sleep(policy.interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn stops_at_first_success() {
        let mut calls = 0;
        let outcome = retry_until(RetryPolicy::new(5, Duration::ZERO), || {
            calls += 1;
            calls == 3
        });
        assert_eq!(outcome, RetryOutcome::Satisfied { attempts: 3 });
        assert_eq!(calls, 3);
    }

    #[test]
    fn exhausts_after_max_attempts() {
        let mut calls = 0;
        let outcome = retry_until(RetryPolicy::new(4, Duration::ZERO), || {
            calls += 1;
            false
        });
        assert_eq!(outcome, RetryOutcome::Exhausted { attempts: 4 });
        assert!(!outcome.is_satisfied());
        assert_eq!(calls, 4);
    }

    #[test]
    fn zero_attempts_still_checks_once() {
        let policy = RetryPolicy::new(0, Duration::ZERO);
        assert_eq!(policy.max_attempts(), 1);
        assert_eq!(retry_until(policy, || true).attempts(), 1);
    }

    #[test]
    fn sleeps_between_but_not_after_attempts() {
        let start = Instant::now();
        let outcome = retry_until(RetryPolicy::new(3, Duration::from_millis(20)), || false);
        let elapsed = start.elapsed();
        assert_eq!(outcome.attempts(), 3);
        assert!(elapsed >= Duration::from_millis(40));
        assert!(elapsed < Duration::from_millis(1_000));
    }
}
