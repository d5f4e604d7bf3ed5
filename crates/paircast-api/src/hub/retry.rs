//! Reconnect pacing policies.

use std::time::Duration;

use rand::Rng;

const MIN_BACKOFF_SECS: u64 = 5;
const MAX_BACKOFF_SECS: u64 = 20;

/// Decides how long to wait before reconnect attempt number `attempt`.
///
/// Consulted after each failed or dropped connection; `attempt` counts
/// consecutive failures since the connection was last up. Returning
/// `None` ends the retry loop.
pub trait RetryPolicy: Send + Sync {
    fn next_delay(&self, attempt: u32) -> Option<Duration>;
}

/// Retries indefinitely with randomized flat backoff.
///
/// The first reconnect fires immediately; later attempts wait between
/// five and twenty seconds so a restarting server does not get every
/// client back at the same instant.
#[derive(Debug, Clone, Copy, Default)]
pub struct ForeverRetry;

impl RetryPolicy for ForeverRetry {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 {
            return Some(Duration::ZERO);
        }
        let secs = rand::rng().random_range(MIN_BACKOFF_SECS..=MAX_BACKOFF_SECS);
        Some(Duration::from_secs(secs))
    }
}

/// Gives up after the first failure.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRetry;

impl RetryPolicy for NoRetry {
    fn next_delay(&self, _attempt: u32) -> Option<Duration> {
        None
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn forever_retry_first_attempt_is_immediate() {
        assert_eq!(ForeverRetry.next_delay(0), Some(Duration::ZERO));
    }

    #[test]
    fn forever_retry_backoff_stays_in_bounds() {
        for attempt in 1..100 {
            let delay = ForeverRetry.next_delay(attempt).unwrap();
            assert!(delay >= Duration::from_secs(MIN_BACKOFF_SECS));
            assert!(delay <= Duration::from_secs(MAX_BACKOFF_SECS));
        }
    }

    #[test]
    fn no_retry_never_yields_a_delay() {
        assert_eq!(NoRetry.next_delay(0), None);
        assert_eq!(NoRetry.next_delay(5), None);
    }
}
