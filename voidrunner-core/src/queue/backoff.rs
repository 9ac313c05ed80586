/// Retry backoff policy
///
/// Failed deliveries are parked in the retry queue with an exponentially
/// growing delay: `base * factor^(attempt - 1)`, jittered ±10% and capped
/// at `max_delay`. Once a message has been delivered `max_attempts` times
/// without an ack, the next failure dead-letters it.
///
/// # Defaults
///
/// | Setting | Value |
/// |---------|-------|
/// | base | 1 minute |
/// | factor | 2.0 |
/// | max_delay | 10 minutes |
/// | max_attempts | 5 |

use rand::Rng;
use std::time::Duration;

/// Relative jitter applied to each delay (±10%)
const JITTER_FRACTION: f64 = 0.10;

/// Exponential backoff policy for redeliveries
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// First-attempt delay
    pub base: Duration,

    /// Multiplier applied per subsequent attempt
    pub factor: f64,

    /// Upper bound on any single delay
    pub max_delay: Duration,

    /// Delivery attempts before a failure dead-letters the message
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(60),
            factor: 2.0,
            max_delay: Duration::from_secs(600),
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    /// Raw (unjittered) delay for the given delivery attempt, 1-based
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63);
        let delay = self.base.as_secs_f64() * self.factor.powi(exponent as i32);
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }

    /// Delay for the given attempt with ±10% jitter, still capped
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let raw = self.delay_for_attempt(attempt).as_secs_f64();
        let jitter = rand::thread_rng().gen_range(-JITTER_FRACTION..=JITTER_FRACTION);
        let delayed = raw * (1.0 + jitter);
        Duration::from_secs_f64(delayed.min(self.max_delay.as_secs_f64()).max(0.0))
    }

    /// True once the given delivery count exhausts the policy
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn millis_policy() -> RetryPolicy {
        RetryPolicy {
            base: Duration::from_millis(100),
            factor: 2.0,
            max_delay: Duration::from_secs(1),
            max_attempts: 5,
        }
    }

    #[test]
    fn test_delay_doubles_per_attempt() {
        let policy = millis_policy();
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(800));
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = millis_policy();
        assert_eq!(policy.delay_for_attempt(5), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(30), Duration::from_secs(1));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = millis_policy();
        for attempt in 1..=5 {
            let raw = policy.delay_for_attempt(attempt).as_secs_f64();
            for _ in 0..100 {
                let jittered = policy.jittered_delay(attempt).as_secs_f64();
                assert!(
                    jittered >= raw * 0.9 - f64::EPSILON,
                    "attempt {}: {} below lower bound",
                    attempt,
                    jittered
                );
                assert!(
                    jittered <= (raw * 1.1).min(policy.max_delay.as_secs_f64()) + f64::EPSILON,
                    "attempt {}: {} above upper bound",
                    attempt,
                    jittered
                );
            }
        }
    }

    #[test]
    fn test_exhaustion() {
        let policy = millis_policy();
        assert!(!policy.is_exhausted(4));
        assert!(policy.is_exhausted(5));
        assert!(policy.is_exhausted(6));
    }

    #[test]
    fn test_huge_attempt_does_not_overflow() {
        let policy = millis_policy();
        assert_eq!(policy.delay_for_attempt(u32::MAX), Duration::from_secs(1));
    }
}
