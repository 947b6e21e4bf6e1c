// src/fetch/retry.rs

//! Bounded retry with backoff for transient fetch failures

use super::{FetchError, Fetcher};
use crate::cancel::CancellationToken;
use crate::error::{Error, Result};
use std::time::Duration;
use tracing::warn;

/// Maximum attempts per resource
const MAX_RETRIES: u32 = 3;

/// Delay before the first retry in milliseconds; doubles per attempt
const RETRY_DELAY_MS: u64 = 1000;

/// Retry budget for one resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_RETRIES,
            base_delay: Duration::from_millis(RETRY_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts (tests, local mirrors)
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
        }
    }

    /// Delay after the given failed attempt (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(factor)
    }
}

/// Fetch `url`, retrying transient failures up to the policy's budget
///
/// Permanent failures are returned after the first attempt. The token is
/// checked before every attempt, so a cancelled run stops retrying.
pub fn fetch_with_retry(
    fetcher: &dyn Fetcher,
    url: &str,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<Vec<u8>> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        cancel.check()?;
        attempt += 1;
        match fetcher.fetch(url) {
            Ok(bytes) => return Ok(bytes),
            Err(e @ FetchError::Permanent { .. }) => {
                return Err(Error::ResourceFetchFailure {
                    url: url.to_string(),
                    attempts: attempt,
                    reason: e.reason().to_string(),
                });
            }
            Err(e) => {
                if attempt >= max_attempts {
                    return Err(Error::ResourceFetchFailure {
                        url: url.to_string(),
                        attempts: attempt,
                        reason: e.reason().to_string(),
                    });
                }
                warn!("Fetch attempt {} for {} failed: {}, retrying...", attempt, url, e);
                std::thread::sleep(policy.delay_for(attempt));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Fails with the queued errors, then succeeds
    struct Flaky {
        failures: Mutex<Vec<FetchError>>,
        calls: Mutex<u32>,
    }

    impl Flaky {
        fn new(failures: Vec<FetchError>) -> Self {
            Self {
                failures: Mutex::new(failures),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    impl Fetcher for Flaky {
        fn fetch(&self, _url: &str) -> std::result::Result<Vec<u8>, FetchError> {
            *self.calls.lock().unwrap() += 1;
            let mut failures = self.failures.lock().unwrap();
            if failures.is_empty() {
                Ok(b"ok".to_vec())
            } else {
                Err(failures.remove(0))
            }
        }
    }

    fn transient() -> FetchError {
        FetchError::Transient {
            url: "u".into(),
            reason: "connection reset".into(),
        }
    }

    #[test]
    fn test_recovers_from_transient_failures() {
        let fetcher = Flaky::new(vec![transient(), transient()]);
        let bytes = fetch_with_retry(
            &fetcher,
            "https://example.com/a",
            &RetryPolicy::immediate(3),
            &CancellationToken::new(),
        )
        .unwrap();
        assert_eq!(bytes, b"ok");
        assert_eq!(fetcher.calls(), 3);
    }

    #[test]
    fn test_budget_exhausted() {
        let fetcher = Flaky::new(vec![transient(), transient(), transient()]);
        let err = fetch_with_retry(
            &fetcher,
            "https://example.com/a",
            &RetryPolicy::immediate(2),
            &CancellationToken::new(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::ResourceFetchFailure { attempts: 2, .. }));
        assert_eq!(fetcher.calls(), 2);
    }

    #[test]
    fn test_permanent_not_retried() {
        let fetcher = Flaky::new(vec![FetchError::Permanent {
            url: "u".into(),
            reason: "HTTP 404 Not Found".into(),
        }]);
        let err = fetch_with_retry(
            &fetcher,
            "https://example.com/a",
            &RetryPolicy::immediate(5),
            &CancellationToken::new(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::ResourceFetchFailure { attempts: 1, .. }));
        assert_eq!(fetcher.calls(), 1);
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(4000));
    }

    #[test]
    fn test_cancelled_before_first_attempt() {
        let fetcher = Flaky::new(vec![]);
        let token = CancellationToken::new();
        token.cancel();
        let err = fetch_with_retry(&fetcher, "u", &RetryPolicy::default(), &token).unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert_eq!(fetcher.calls(), 0);
    }
}
