//! Retry policy for `GraphNodeRunner`: exponential or fixed
//! backoff with a capped interval, plus an error-kind allowlist.

use std::time::Duration;

use crate::error::ErrorKind;
use crate::model::{BackoffKind, RetrySpec};

#[derive(Clone, Debug, PartialEq)]
pub enum RetryPolicy {
    None,
    Fixed {
        max_attempts: usize,
        interval: Duration,
    },
    Exponential {
        max_attempts: usize,
        initial_interval: Duration,
        max_interval: Duration,
        multiplier: f64,
    },
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::None
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        RetryPolicy::None
    }

    pub fn fixed(max_attempts: usize, interval: Duration) -> Self {
        RetryPolicy::Fixed {
            max_attempts,
            interval,
        }
    }

    pub fn exponential(
        max_attempts: usize,
        initial_interval: Duration,
        max_interval: Duration,
        multiplier: f64,
    ) -> Self {
        RetryPolicy::Exponential {
            max_attempts,
            initial_interval,
            max_interval,
            multiplier,
        }
    }

    /// Builds a policy from a node's `RetrySpec`.
    pub fn from_spec(spec: &RetrySpec) -> Self {
        let base = Duration::from_millis(spec.backoff_base_ms);
        match spec.backoff {
            BackoffKind::Fixed => RetryPolicy::fixed(spec.max_retries, base),
            BackoffKind::Exponential => RetryPolicy::exponential(
                spec.max_retries,
                base,
                Duration::from_secs(30),
                2.0,
            ),
        }
    }

    pub fn max_attempts(&self) -> usize {
        match self {
            RetryPolicy::None => 0,
            RetryPolicy::Fixed { max_attempts, .. } => *max_attempts,
            RetryPolicy::Exponential { max_attempts, .. } => *max_attempts,
        }
    }

    /// Whether attempt index `attempt` (0-based, the attempt that just failed)
    /// should be followed by another attempt.
    pub fn should_retry(&self, attempt: usize) -> bool {
        attempt < self.max_attempts()
    }

    pub fn delay(&self, attempt: usize) -> Duration {
        match self {
            RetryPolicy::None => Duration::ZERO,
            RetryPolicy::Fixed { interval, .. } => *interval,
            RetryPolicy::Exponential {
                initial_interval,
                max_interval,
                multiplier,
                ..
            } => {
                let secs = initial_interval.as_secs_f64() * multiplier.powi(attempt as i32);
                let capped = secs.min(max_interval.as_secs_f64());
                Duration::from_secs_f64(capped)
            }
        }
    }

    /// Whether `kind` is retryable under this node's `retryOnErrorTypes`
    /// allowlist (empty list means "all non-fatal kinds").
    pub fn allows_kind(kind: ErrorKind, retry_on_error_types: &[ErrorKind]) -> bool {
        if kind.is_fatal() {
            return false;
        }
        retry_on_error_types.is_empty() || retry_on_error_types.contains(&kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_never_retries() {
        let p = RetryPolicy::None;
        assert!(!p.should_retry(0));
        assert_eq!(p.delay(0), Duration::ZERO);
    }

    #[test]
    fn fixed_retries_up_to_max() {
        let p = RetryPolicy::fixed(2, Duration::from_millis(10));
        assert!(p.should_retry(0));
        assert!(p.should_retry(1));
        assert!(!p.should_retry(2));
        assert_eq!(p.delay(0), Duration::from_millis(10));
        assert_eq!(p.delay(1), Duration::from_millis(10));
    }

    #[test]
    fn exponential_backoff_doubles_and_caps() {
        let p = RetryPolicy::exponential(
            5,
            Duration::from_millis(10),
            Duration::from_millis(50),
            2.0,
        );
        assert_eq!(p.delay(0), Duration::from_millis(10));
        assert_eq!(p.delay(1), Duration::from_millis(20));
        assert_eq!(p.delay(2), Duration::from_millis(40));
        // 10 * 2^3 = 80ms, capped at 50ms
        assert_eq!(p.delay(3), Duration::from_millis(50));
    }

    #[test]
    fn fatal_kinds_never_allowed_even_with_empty_allowlist() {
        assert!(!RetryPolicy::allows_kind(ErrorKind::ValidationError, &[]));
        assert!(!RetryPolicy::allows_kind(ErrorKind::SystemError, &[]));
    }

    #[test]
    fn empty_allowlist_permits_all_nonfatal_kinds() {
        assert!(RetryPolicy::allows_kind(ErrorKind::ProviderError, &[]));
        assert!(RetryPolicy::allows_kind(ErrorKind::TimeoutError, &[]));
        assert!(RetryPolicy::allows_kind(ErrorKind::ToolError, &[]));
    }

    #[test]
    fn nonempty_allowlist_restricts_kinds() {
        let allow = [ErrorKind::ProviderError];
        assert!(RetryPolicy::allows_kind(ErrorKind::ProviderError, &allow));
        assert!(!RetryPolicy::allows_kind(ErrorKind::ToolError, &allow));
    }
}
