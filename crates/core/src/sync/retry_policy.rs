//! Backoff and give-up rules for queued sync mutations.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Delay before the first retry.
pub const SYNC_RETRY_BASE_DELAY_MS: u64 = 5_000;

/// Upper bound for any retry delay (5 minutes).
pub const SYNC_RETRY_MAX_DELAY_MS: u64 = 300_000;

/// Failed attempts after which a mutation is abandoned.
pub const MAX_SYNC_RETRIES: u32 = 5;

/// Exponential backoff with a cap and a bounded failure count.
///
/// Pure and deterministic: the same retry count always maps to the same delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: SYNC_RETRY_BASE_DELAY_MS,
            max_delay_ms: SYNC_RETRY_MAX_DELAY_MS,
            max_retries: MAX_SYNC_RETRIES,
        }
    }
}

impl RetryPolicy {
    /// `min(max_delay, base_delay * 2^retry_count)`, saturating.
    pub fn next_delay(&self, retry_count: u32) -> Duration {
        let factor = 1_u64.checked_shl(retry_count).unwrap_or(u64::MAX);
        let delay_ms = self
            .base_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }

    pub fn is_exhausted(&self, retry_count: u32) -> bool {
        retry_count >= self.max_retries
    }

    /// Earliest time a mutation that has already failed `retry_count` times may
    /// be attempted again after failing once more at `now`.
    pub fn next_eligible_at(&self, retry_count: u32, now: DateTime<Utc>) -> DateTime<Utc> {
        chrono::Duration::from_std(self.next_delay(retry_count))
            .ok()
            .and_then(|delay| now.checked_add_signed(delay))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

/// Backoff for `retry_count` under the default policy.
pub fn next_delay(retry_count: u32) -> Duration {
    RetryPolicy::default().next_delay(retry_count)
}

/// Whether `retry_count` failures exhaust the default policy.
pub fn is_exhausted(retry_count: u32) -> bool {
    RetryPolicy::default().is_exhausted(retry_count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_exponential_and_capped() {
        for n in 0..5 {
            let expected = (5_000_u64 * 2_u64.pow(n)).min(300_000);
            assert_eq!(next_delay(n), Duration::from_millis(expected));
        }
        assert_eq!(next_delay(0), Duration::from_millis(5_000));
        assert_eq!(next_delay(4), Duration::from_millis(80_000));
        assert_eq!(next_delay(10), Duration::from_millis(300_000));
    }

    #[test]
    fn backoff_saturates_for_huge_retry_counts() {
        assert_eq!(next_delay(64), Duration::from_millis(300_000));
        assert_eq!(next_delay(u32::MAX), Duration::from_millis(300_000));
    }

    #[test]
    fn exhaustion_starts_at_five_failures() {
        for n in 0..5 {
            assert!(!is_exhausted(n), "retry count {n} should not be exhausted");
        }
        assert!(is_exhausted(5));
        assert!(is_exhausted(6));
        assert!(is_exhausted(u32::MAX));
    }

    #[test]
    fn next_eligible_at_adds_delay() {
        let now = Utc::now();
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.next_eligible_at(1, now),
            now + chrono::Duration::milliseconds(10_000)
        );
    }
}
