//! Backoff delays for retrying step actions

use crate::models::RetryPolicy;
use std::time::Duration;

/// Delay to wait before retry number `retry` (1-based)
///
/// `delay * coefficient^(retry - 1)`, capped at `max_delay_seconds` when that is non-zero.
pub fn delay_for_retry(policy: &RetryPolicy, retry: u32) -> Duration {
    let exponent = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
    let coefficient = if policy.backoff_coefficient.is_finite() && policy.backoff_coefficient > 0.0 {
        policy.backoff_coefficient
    } else {
        1.0
    };

    let mut seconds = policy.delay_seconds as f64 * coefficient.powi(exponent);
    if policy.max_delay_seconds > 0 {
        seconds = seconds.min(policy.max_delay_seconds as f64);
    }

    Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX)
}

/// Overall retry deadline measured from the first attempt, `None` when disabled
pub fn retry_deadline(policy: &RetryPolicy) -> Option<Duration> {
    (policy.timeout_seconds > 0).then(|| Duration::from_secs(policy.timeout_seconds))
}
