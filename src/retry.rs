//! Retry and backoff utilities.
//!
//! `RetryPolicy`/`retry_async` bound the short-lived authentication requests.
//! `ReconnectBackoff` paces reconnect attempts of the long-lived stream.

use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::debug;

/// Policy controlling retry attempts and exponential backoff behavior.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Maximum number of attempts including the first attempt.
    pub max_attempts: usize,
    /// Delay used before the first retry.
    pub initial_backoff: Duration,
    /// Upper bound for exponential backoff delay growth.
    pub max_backoff: Duration,
    /// Maximum random jitter added to each retry delay.
    pub jitter: Duration,
}

impl RetryPolicy {
    /// Returns a policy suited to login and session-check requests.
    pub fn auth_requests() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(2),
            jitter: Duration::from_millis(100),
        }
    }

    /// Computes the delay to apply before the given retry attempt.
    ///
    /// `attempt` is 1-based and should correspond to the current attempt index.
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let mut delay = self.initial_backoff;
        for _ in 1..attempt {
            delay = std::cmp::min(delay.saturating_mul(2), self.max_backoff);
        }
        delay + jitter_duration(self.jitter, attempt)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::auth_requests()
    }
}

/// Executes an async operation with retry behavior controlled by `policy`.
///
/// `op` receives the 1-based attempt number and must return a future that
/// resolves to the operation result. `should_retry` determines whether each
/// error is retryable.
pub async fn retry_async<T, E, Op, Fut, ShouldRetry>(
    policy: &RetryPolicy,
    mut op: Op,
    mut should_retry: ShouldRetry,
) -> Result<T, E>
where
    Op: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    ShouldRetry: FnMut(&E) -> bool,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) => {
                if attempt >= max_attempts || !should_retry(&error) {
                    return Err(error);
                }

                let delay = policy.delay_for_attempt(attempt);
                debug!(
                    event = "retry_attempt_failed",
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64
                );
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                attempt += 1;
            }
        }
    }
}

/// Exponential reconnect pacing with jitter and a hard ceiling.
///
/// Unlike [`RetryPolicy`] there is no attempt limit: the stream is retried for
/// as long as the client runs. The returned delay, jitter included, never
/// exceeds `max`.
#[derive(Clone, Debug)]
pub struct ReconnectBackoff {
    min: Duration,
    max: Duration,
    jitter: Duration,
    attempt: u32,
}

impl ReconnectBackoff {
    pub fn new(min: Duration, max: Duration, jitter: Duration) -> Self {
        Self {
            min,
            max: max.max(min),
            jitter,
            attempt: 0,
        }
    }

    /// Number of delays handed out since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Returns the delay for the next reconnect and advances the attempt count.
    pub fn next_delay(&mut self) -> Duration {
        let shift = self.attempt.min(20);
        let base = self.min.saturating_mul(1_u32 << shift).min(self.max);
        self.attempt = self.attempt.saturating_add(1);
        std::cmp::min(
            base + jitter_duration(self.jitter, self.attempt as usize),
            self.max,
        )
    }

    /// Drops back to the minimum delay after a sustained healthy connection.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

fn jitter_duration(max_jitter: Duration, attempt: usize) -> Duration {
    if max_jitter.is_zero() {
        return Duration::ZERO;
    }

    let limit_nanos = max_jitter.as_nanos().min(u64::MAX as u128) as u64;
    if limit_nanos == 0 {
        return Duration::ZERO;
    }

    let now_nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos() as u64;
    let mixed = now_nanos ^ ((attempt as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15));
    Duration::from_nanos(mixed % (limit_nanos.saturating_add(1)))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use tokio::time::Instant;

    use super::{retry_async, ReconnectBackoff, RetryPolicy};
    use crate::auth::AuthError;

    fn session_check_policy(max_attempts: usize) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(2),
            jitter: Duration::ZERO,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn network_errors_are_retried_with_growing_delays() {
        let calls = AtomicUsize::new(0);
        let started = Instant::now();

        let account = retry_async(
            &session_check_policy(3),
            |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 3 {
                        Err(AuthError::NetworkError(format!("connect: attempt {attempt}")))
                    } else {
                        Ok("12345")
                    }
                }
            },
            AuthError::is_retryable,
        )
        .await;

        assert_eq!(account, Ok("12345"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(started.elapsed(), Duration::from_millis(600));
    }

    #[tokio::test(start_paused = true)]
    async fn revoked_session_is_not_retried() {
        let calls = AtomicUsize::new(0);

        let result: Result<(), AuthError> = retry_async(
            &session_check_policy(5),
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(AuthError::Revoked) }
            },
            AuthError::is_retryable,
        )
        .await;

        assert_eq!(result, Err(AuthError::Revoked));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn last_network_error_is_returned_once_attempts_run_out() {
        let result: Result<(), AuthError> = retry_async(
            &session_check_policy(2),
            |attempt| async move {
                Err(AuthError::NetworkError(format!("timeout: attempt {attempt}")))
            },
            AuthError::is_retryable,
        )
        .await;

        assert_eq!(
            result,
            Err(AuthError::NetworkError("timeout: attempt 2".to_string()))
        );
    }

    #[test]
    fn reconnect_backoff_doubles_then_caps() {
        let mut backoff = ReconnectBackoff::new(
            Duration::from_millis(100),
            Duration::from_millis(1_000),
            Duration::ZERO,
        );
        let delays: Vec<_> = (0..6).map(|_| backoff.next_delay()).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
                Duration::from_millis(800),
                Duration::from_millis(1_000),
                Duration::from_millis(1_000),
            ]
        );
    }

    #[test]
    fn reconnect_backoff_never_exceeds_max_with_jitter() {
        let max = Duration::from_millis(500);
        let mut backoff =
            ReconnectBackoff::new(Duration::from_millis(50), max, Duration::from_millis(400));
        for _ in 0..64 {
            assert!(backoff.next_delay() <= max);
        }
    }

    #[test]
    fn reconnect_backoff_reset_returns_to_min() {
        let mut backoff =
            ReconnectBackoff::new(Duration::from_millis(10), Duration::from_secs(1), Duration::ZERO);
        backoff.next_delay();
        backoff.next_delay();
        assert_eq!(backoff.attempt(), 2);
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(10));
    }
}
