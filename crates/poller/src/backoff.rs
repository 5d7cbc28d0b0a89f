//! Retry budget and exponential backoff for failed status fetches.

use std::time::Duration;

/// Upper bound on the delay between two fetch attempts.
pub const MAX_BACKOFF: Duration = Duration::from_millis(60_000);

/// Consecutive failed fetches tolerated before the poller gives up.
pub const MAX_RETRIES: u32 = 3;

/// Delay before the next attempt after `failure_count` consecutive
/// rate-limit/server failures: `base * 2^(failure_count - 1)`, capped at
/// `max`.
///
/// A `failure_count` of zero is treated as one.
pub fn backoff_delay(base: Duration, failure_count: u32, max: Duration) -> Duration {
    let exponent = failure_count.saturating_sub(1).min(31);
    base.checked_mul(1u32 << exponent).unwrap_or(max).min(max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_failure_uses_base_interval() {
        let d = backoff_delay(Duration::from_secs(15), 1, MAX_BACKOFF);
        assert_eq!(d, Duration::from_secs(15));
    }

    #[test]
    fn delay_doubles_per_failure() {
        let d = backoff_delay(Duration::from_secs(5), 3, MAX_BACKOFF);
        assert_eq!(d, Duration::from_secs(20));
    }

    #[test]
    fn delay_clamps_at_max() {
        let d = backoff_delay(Duration::from_secs(15), 4, MAX_BACKOFF);
        assert_eq!(d, MAX_BACKOFF);
    }

    #[test]
    fn full_backoff_sequence() {
        let base = Duration::from_millis(15_000);
        let expected = [15_000, 30_000, 60_000, 60_000, 60_000];

        for (i, &expected_ms) in expected.iter().enumerate() {
            let d = backoff_delay(base, i as u32 + 1, MAX_BACKOFF);
            assert_eq!(d.as_millis() as u64, expected_ms);
        }
    }

    #[test]
    fn huge_failure_counts_do_not_overflow() {
        let d = backoff_delay(Duration::from_secs(3600), u32::MAX, MAX_BACKOFF);
        assert_eq!(d, MAX_BACKOFF);
    }

    #[test]
    fn zero_failures_treated_as_one() {
        let d = backoff_delay(Duration::from_secs(2), 0, MAX_BACKOFF);
        assert_eq!(d, Duration::from_secs(2));
    }
}
