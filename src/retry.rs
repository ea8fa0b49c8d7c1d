//! Retry policy for queued operations
//!
//! Transient failures back off exponentially. Rate-limit signals back off
//! from a longer base (or the server's `Retry-After`) and have their own
//! attempt budget. Everything else surfaces immediately.

use std::time::Duration;

use crate::error::{ErrorKind, FetchError};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries for network, timeout and server failures
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Retries for rate-limit responses
    pub max_rate_limit_retries: u32,
    pub rate_limit_base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            max_rate_limit_retries: 3,
            rate_limit_base_delay: Duration::from_millis(5000),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            max_rate_limit_retries: 0,
            ..Self::default()
        }
    }

    /// How long to wait before retrying after `err`, or `None` to give up.
    ///
    /// `attempt` is the number of attempts already made, starting at 1.
    pub fn delay_for(&self, err: &FetchError, attempt: u32) -> Option<Duration> {
        let retries_so_far = attempt.saturating_sub(1);

        match err.kind() {
            ErrorKind::RateLimit => {
                if retries_so_far >= self.max_rate_limit_retries {
                    return None;
                }
                match err {
                    FetchError::RateLimited(Some(retry_after)) => {
                        Some((*retry_after).min(self.max_delay))
                    }
                    _ => Some(self.backoff(self.rate_limit_base_delay, retries_so_far)),
                }
            }
            kind if kind.is_transient() => {
                if retries_so_far >= self.max_retries {
                    return None;
                }
                Some(self.backoff(self.base_delay, retries_so_far))
            }
            _ => None,
        }
    }

    fn backoff(&self, base: Duration, exponent: u32) -> Duration {
        let factor = 2u32.saturating_pow(exponent);
        base.saturating_mul(factor).min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_backoff_doubles() {
        let policy = RetryPolicy::default();
        let err = FetchError::Network("reset".to_string());

        assert_eq!(policy.delay_for(&err, 1), Some(Duration::from_millis(1000)));
        assert_eq!(policy.delay_for(&err, 2), Some(Duration::from_millis(2000)));
        assert_eq!(policy.delay_for(&err, 3), Some(Duration::from_millis(4000)));
        assert_eq!(policy.delay_for(&err, 4), None);
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy {
            max_retries: 10,
            ..RetryPolicy::default()
        };
        let err = FetchError::Timeout("slow".to_string());

        assert_eq!(policy.delay_for(&err, 9), Some(Duration::from_millis(30_000)));
    }

    #[test]
    fn test_rate_limit_uses_longer_base() {
        let policy = RetryPolicy::default();
        let err = FetchError::RateLimited(None);

        assert_eq!(policy.delay_for(&err, 1), Some(Duration::from_millis(5000)));
        assert_eq!(policy.delay_for(&err, 2), Some(Duration::from_millis(10_000)));
        assert_eq!(policy.delay_for(&err, 3), Some(Duration::from_millis(20_000)));
        assert_eq!(policy.delay_for(&err, 4), None);
    }

    #[test]
    fn test_rate_limit_honors_retry_after() {
        let policy = RetryPolicy::default();
        let err = FetchError::RateLimited(Some(Duration::from_secs(2)));

        assert_eq!(policy.delay_for(&err, 1), Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_permanent_errors_not_retried() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.delay_for(&FetchError::Unauthorized, 1), None);
        assert_eq!(policy.delay_for(&FetchError::NotFound("x".into()), 1), None);
        assert_eq!(policy.delay_for(&FetchError::BadRequest("x".into()), 1), None);
        assert_eq!(
            policy.delay_for(&FetchError::CircuitOpen("x".into()), 1),
            None
        );
        assert_eq!(policy.delay_for(&FetchError::Offline("x".into()), 1), None);
    }

    #[test]
    fn test_none_policy() {
        let policy = RetryPolicy::none();
        assert_eq!(policy.delay_for(&FetchError::Network("x".into()), 1), None);
        assert_eq!(policy.delay_for(&FetchError::RateLimited(None), 1), None);
    }
}
