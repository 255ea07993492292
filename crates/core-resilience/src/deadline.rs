//! Optional overall deadlines and cancellable sleeps

use crate::error::ResilienceError;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// A point in time after which a phase should give up, or none at all
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    expires_at: Option<Instant>,
    limit: Option<Duration>,
}

impl Deadline {
    /// Deadline `limit` from now; `None` never expires
    pub fn after(limit: Option<Duration>) -> Self {
        Self {
            expires_at: limit.map(|d| Instant::now() + d),
            limit,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at
            .map(|at| Instant::now() >= at)
            .unwrap_or(false)
    }

    /// Time left, or `None` for an unbounded deadline
    pub fn remaining(&self) -> Option<Duration> {
        self.expires_at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Configured limit in whole seconds (0 when unbounded)
    pub fn limit_secs(&self) -> u64 {
        self.limit.map(|d| d.as_secs()).unwrap_or(0)
    }

    /// Convert an expired deadline into an error
    pub fn check(&self) -> Result<(), ResilienceError> {
        if self.is_expired() {
            Err(ResilienceError::DeadlineExceeded {
                secs: self.limit_secs(),
            })
        } else {
            Ok(())
        }
    }

    /// Await `fut`, giving up once the deadline passes
    pub async fn bound<F: Future>(&self, fut: F) -> Result<F::Output, ResilienceError> {
        match self.remaining() {
            Some(remaining) => tokio::time::timeout(remaining, fut).await.map_err(|_| {
                ResilienceError::DeadlineExceeded {
                    secs: self.limit_secs(),
                }
            }),
            None => Ok(fut.await),
        }
    }
}

/// Sleep for `duration` unless `cancel` fires first
pub async fn sleep_or_cancel(
    duration: Duration,
    cancel: &CancellationToken,
) -> Result<(), ResilienceError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ResilienceError::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_deadline_expires() {
        let deadline = Deadline::after(Some(Duration::from_secs(10)));
        assert!(!deadline.is_expired());
        assert_eq!(deadline.remaining(), Some(Duration::from_secs(10)));

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(deadline.is_expired());
        assert_eq!(
            deadline.check(),
            Err(ResilienceError::DeadlineExceeded { secs: 10 })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_never_expires() {
        let deadline = Deadline::after(None);
        tokio::time::advance(Duration::from_secs(86_400)).await;
        assert!(!deadline.is_expired());
        assert_eq!(deadline.remaining(), None);
        assert_eq!(deadline.limit_secs(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bound_cuts_off_a_stalled_future() {
        let deadline = Deadline::after(Some(Duration::from_secs(10)));
        let start = Instant::now();

        let result = deadline.bound(std::future::pending::<()>()).await;

        assert_eq!(result, Err(ResilienceError::DeadlineExceeded { secs: 10 }));
        assert_eq!(start.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bound_passes_through_when_in_time() {
        let deadline = Deadline::after(Some(Duration::from_secs(10)));
        let value = deadline
            .bound(async {
                tokio::time::sleep(Duration::from_secs(3)).await;
                7
            })
            .await;
        assert_eq!(value, Ok(7));

        assert_eq!(Deadline::after(None).bound(async { 1 }).await, Ok(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_or_cancel() {
        let cancel = CancellationToken::new();
        assert_eq!(sleep_or_cancel(Duration::from_secs(3), &cancel).await, Ok(()));

        cancel.cancel();
        assert_eq!(
            sleep_or_cancel(Duration::from_secs(3), &cancel).await,
            Err(ResilienceError::Cancelled)
        );
    }
}
