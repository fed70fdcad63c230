//! Exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;

/// Calculate exponential backoff delay with jitter.
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::from_millis(0);
    }

    let exponential_base = 2u64.saturating_pow(attempt - 1);
    let capped = base_ms.saturating_mul(exponential_base).min(max_ms);

    // Up to 10% extra.
    let jitter_range = capped / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(capped + jitter)
}

/// Delay before retrying a failed reconciliation.
///
/// The first `fast_retries` attempts back off exponentially in
/// milliseconds; after that the delay grows by a minute every
/// `fast_retries` attempts, up to `max_delay_mins`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub fast_retries: u32,
    pub base_ms: u64,
    pub max_ms: u64,
    pub max_delay_mins: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            fast_retries: 5,
            base_ms: 5,
            max_ms: 1000,
            max_delay_mins: 10,
        }
    }
}

impl RetryPolicy {
    pub fn delay(&self, attempt: u32) -> Duration {
        let fast = self.fast_retries.max(1);
        if attempt <= fast {
            calculate_backoff(attempt, self.base_ms, self.max_ms)
        } else {
            let minutes = u64::from(attempt / fast).min(self.max_delay_mins);
            Duration::from_secs(minutes * 60)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_calculation() {
        let b1 = calculate_backoff(1, 100, 2000);
        assert!(b1.as_millis() >= 100);

        let b2 = calculate_backoff(2, 100, 2000);
        assert!(b2.as_millis() >= 200);

        let max = calculate_backoff(10, 100, 1000);
        assert!(max.as_millis() >= 1000 && max.as_millis() < 1100);

        assert_eq!(calculate_backoff(0, 100, 1000), Duration::ZERO);
    }

    #[test]
    fn test_retry_policy_slows_down() {
        let policy = RetryPolicy::default();
        assert!(policy.delay(1) < Duration::from_secs(1));
        assert!(policy.delay(5) < Duration::from_secs(2));
        assert_eq!(policy.delay(6), Duration::from_secs(60));
        assert_eq!(policy.delay(10), Duration::from_secs(120));
        assert_eq!(policy.delay(500), Duration::from_secs(600));
    }
}
