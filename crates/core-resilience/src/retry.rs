//! Fixed-interval bounded retry
//!
//! The wait between attempts is constant; there is no backoff.

use crate::deadline::sleep_or_cancel;
use crate::error::ResilienceError;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Retry schedule: one warm-up wait, then `max_attempts` tries spaced by
/// `interval`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Wait before the first attempt
    pub initial_wait: Duration,

    /// Maximum number of attempts (at least 1)
    pub max_attempts: u32,

    /// Wait between consecutive attempts
    pub interval: Duration,
}

impl RetryPolicy {
    pub fn new(initial_wait: Duration, max_attempts: u32, interval: Duration) -> Self {
        Self {
            initial_wait,
            max_attempts,
            interval,
        }
    }

    /// Same schedule without the warm-up wait
    pub fn immediate(self) -> Self {
        Self {
            initial_wait: Duration::ZERO,
            ..self
        }
    }

    pub fn validate(&self) -> Result<(), ResilienceError> {
        if self.max_attempts == 0 {
            return Err(ResilienceError::InvalidPolicy(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Worst-case time spent waiting, excluding the attempts themselves
    pub fn worst_case_wait(&self) -> Duration {
        self.initial_wait + self.interval * self.max_attempts.saturating_sub(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_wait: Duration::from_secs(5),
            max_attempts: 30,
            interval: Duration::from_secs(2),
        }
    }
}

/// Successful outcome together with the attempt that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempted<T> {
    pub value: T,
    pub attempts: u32,
}

/// Run `operation` under `policy`.
///
/// `operation` receives the 1-based attempt number. The first `Ok` ends the
/// loop. Cancellation is honoured during every wait; an attempt already in
/// flight is allowed to finish.
pub async fn retry_fixed<T, E, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<Attempted<T>, ResilienceError>
where
    E: Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    policy.validate()?;

    if !policy.initial_wait.is_zero() {
        sleep_or_cancel(policy.initial_wait, cancel).await?;
    }

    let mut last_error = String::new();
    for attempt in 1..=policy.max_attempts {
        if cancel.is_cancelled() {
            return Err(ResilienceError::Cancelled);
        }

        match operation(attempt).await {
            Ok(value) => {
                return Ok(Attempted {
                    value,
                    attempts: attempt,
                })
            }
            Err(e) => {
                debug!(attempt, max_attempts = policy.max_attempts, error = %e, "Attempt failed");
                last_error = e.to_string();
            }
        }

        if attempt < policy.max_attempts {
            sleep_or_cancel(policy.interval, cancel).await?;
        }
    }

    Err(ResilienceError::Exhausted {
        attempts: policy.max_attempts,
        last_error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(Duration::from_secs(5), max_attempts, Duration::from_secs(2))
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_kth_attempt() {
        let cancel = CancellationToken::new();
        let start = Instant::now();

        let result = retry_fixed(&policy(10), &cancel, |attempt| async move {
            if attempt < 4 {
                Err("refused")
            } else {
                Ok("connected")
            }
        })
        .await
        .unwrap();

        assert_eq!(result.value, "connected");
        assert_eq!(result.attempts, 4);
        // 5s warm-up plus three 2s gaps
        assert_eq!(start.elapsed(), Duration::from_secs(11));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_reports_attempts_and_last_error() {
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let err = retry_fixed(&policy(3), &cancel, move |attempt| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { Err::<(), _>(format!("refused #{}", attempt)) }
        })
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            err,
            ResilienceError::Exhausted {
                attempts: 3,
                last_error: "refused #3".into()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_initial_wait() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let err = retry_fixed(&policy(5), &cancel, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, String>(()) }
        })
        .await
        .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_zero_attempts_rejected() {
        let cancel = CancellationToken::new();
        let err = retry_fixed(&policy(0), &cancel, |_| async { Ok::<_, String>(()) })
            .await
            .unwrap_err();
        assert!(matches!(err, ResilienceError::InvalidPolicy(_)));
    }

    #[test]
    fn test_worst_case_wait() {
        assert_eq!(policy(30).worst_case_wait(), Duration::from_secs(5 + 58));
        assert_eq!(policy(1).immediate().worst_case_wait(), Duration::ZERO);
    }
}
