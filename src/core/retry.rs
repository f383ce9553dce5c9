/*!
 * Connect retry with a fixed back-off
 *
 * An unattended dispatcher waits for a flaky host rather than giving up, so
 * the default policy retries transient failures forever. `max_retries` caps
 * it when a caller wants a bound.
 */

use std::thread;
use std::time::Duration;

use tracing::warn;

use crate::transport::{TransportError, TransportResult};

/// Default pause between connect attempts
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Blocks the calling thread between attempts
pub trait Sleeper {
    fn sleep(&self, delay: Duration);
}

/// Sleeper backed by `std::thread::sleep`
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, delay: Duration) {
        thread::sleep(delay);
    }
}

/// How transient connect failures are retried
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Fixed delay before each retry
    pub delay: Duration,
    /// Retries after the first attempt; `None` retries forever
    pub max_retries: Option<u32>,
}

impl RetryPolicy {
    /// Retry forever with the given delay
    pub fn forever(delay: Duration) -> Self {
        Self {
            delay,
            max_retries: None,
        }
    }

    /// Retry at most `max_retries` times
    pub fn limited(delay: Duration, max_retries: u32) -> Self {
        Self {
            delay,
            max_retries: Some(max_retries),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::forever(DEFAULT_RETRY_DELAY)
    }
}

/// Run `operation` until it succeeds, fails permanently, or the policy gives up
pub fn with_retry<T, F>(
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
    endpoint: &str,
    mut operation: F,
) -> TransportResult<T>
where
    F: FnMut() -> TransportResult<T>,
{
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        match operation() {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_transient() => return Err(e),
            Err(e) => {
                if let Some(max) = policy.max_retries {
                    if attempt > max {
                        warn!(endpoint, attempts = attempt, "giving up: {}", e);
                        return Err(TransportError::RetriesExhausted {
                            endpoint: endpoint.to_string(),
                            attempts: attempt,
                        });
                    }
                }
                warn!(
                    "{}. Retrying in {}s (attempt {})...",
                    e,
                    policy.delay.as_secs(),
                    attempt
                );
                sleeper.sleep(policy.delay);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::io;

    #[derive(Default)]
    struct RecordingSleeper {
        slept: RefCell<Vec<Duration>>,
    }

    impl Sleeper for RecordingSleeper {
        fn sleep(&self, delay: Duration) {
            self.slept.borrow_mut().push(delay);
        }
    }

    fn refused() -> TransportError {
        TransportError::ConnectionFailed {
            endpoint: "lab:22".to_string(),
            source: io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
        }
    }

    #[test]
    fn test_transient_errors_retry_until_success() {
        let sleeper = RecordingSleeper::default();
        let policy = RetryPolicy::default();
        let mut attempts = 0;

        let result = with_retry(&policy, &sleeper, "lab:22", || {
            attempts += 1;
            if attempts < 4 {
                Err(refused())
            } else {
                Ok(attempts)
            }
        });

        assert_eq!(result.unwrap(), 4);
        assert_eq!(sleeper.slept.borrow().len(), 3);
        assert!(sleeper
            .slept
            .borrow()
            .iter()
            .all(|d| *d == DEFAULT_RETRY_DELAY));
    }

    #[test]
    fn test_permanent_error_no_retry() {
        let sleeper = RecordingSleeper::default();
        let mut attempts = 0;

        let result: TransportResult<()> =
            with_retry(&RetryPolicy::default(), &sleeper, "lab:22", || {
                attempts += 1;
                Err(TransportError::Authentication {
                    user: "erik".to_string(),
                    host: "lab".to_string(),
                    message: "denied".to_string(),
                })
            });

        assert!(matches!(result, Err(TransportError::Authentication { .. })));
        assert_eq!(attempts, 1, "Permanent error triggered retries!");
        assert!(sleeper.slept.borrow().is_empty());
    }

    #[test]
    fn test_limited_policy_gives_up() {
        let sleeper = RecordingSleeper::default();
        let policy = RetryPolicy::limited(Duration::from_millis(10), 2);
        let mut attempts = 0;

        let result: TransportResult<()> = with_retry(&policy, &sleeper, "lab:22", || {
            attempts += 1;
            Err(refused())
        });

        assert!(matches!(
            result,
            Err(TransportError::RetriesExhausted { attempts: 3, .. })
        ));
        assert_eq!(attempts, 3);
        assert_eq!(sleeper.slept.borrow().len(), 2);
    }
}
