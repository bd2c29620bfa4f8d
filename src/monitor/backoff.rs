use rand::Rng;
use std::time::Duration;

use crate::config::RetryConfig;

/// Delay before retrying after failed attempt number `attempt` (1-based).
///
/// Doubles from `initial_backoff_ms`, capped at `max_backoff_ms`, then
/// jittered into the upper half of that range.
pub fn retry_delay(attempt: u32, retry: &RetryConfig) -> Duration {
    let shift = attempt.saturating_sub(1).min(32);
    let base = retry
        .initial_backoff_ms
        .saturating_mul(1u64 << shift)
        .min(retry.max_backoff_ms);

    let mut rng = rand::thread_rng();
    let delay_ms = rng.gen_range(base / 2..=base);
    Duration::from_millis(delay_ms)
}
