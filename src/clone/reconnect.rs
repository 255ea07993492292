//! Bounded reacquisition of a target connection after the restart

use reclone_core_interface::{DbConnection, DbConnector, Endpoint};
use reclone_core_resilience::{retry_fixed, Attempted, ResilienceError, RetryPolicy};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::advance;
use super::session::{CloneSession, CloneState};
use crate::error::{CloneError, Result};
use crate::events::{CloneEvent, EventPublisher};

pub struct Reconnector<'a> {
    connector: &'a dyn DbConnector,
    policy: RetryPolicy,
    cancel: &'a CancellationToken,
    events: &'a EventPublisher,
}

impl<'a> Reconnector<'a> {
    pub fn new(
        connector: &'a dyn DbConnector,
        policy: RetryPolicy,
        cancel: &'a CancellationToken,
        events: &'a EventPublisher,
    ) -> Self {
        Self {
            connector,
            policy,
            cancel,
            events,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Wait for the target to accept connections again.
    ///
    /// Success stores the new handle and moves the session to Monitoring.
    /// Exhaustion moves it to Failed.
    pub async fn reconnect(&self, session: &mut CloneSession) -> Result<u32> {
        info!(
            initial_wait_secs = self.policy.initial_wait.as_secs(),
            attempts = self.policy.max_attempts,
            interval_secs = self.policy.interval.as_secs(),
            worst_case_secs = self.policy.worst_case_wait().as_secs(),
            "Waiting for target to come back online"
        );

        match self.acquire(&session.target.clone(), &self.policy).await {
            Ok(Attempted { value, attempts }) => {
                session.retry_count = attempts;
                session.target_conn = Some(value);
                info!(attempts, "Reconnected to target");
                self.events.publish(CloneEvent::Reconnected { attempts });
                advance(session, self.events, CloneState::Monitoring);
                Ok(attempts)
            }
            Err(ResilienceError::Exhausted {
                attempts,
                last_error,
            }) => {
                session.retry_count = attempts;
                let err = CloneError::TargetOffline { attempts };
                warn!(attempts, last_error = %last_error, "Target did not come back online");
                session.last_error = Some(err.to_string());
                advance(session, self.events, CloneState::Failed);
                Err(err)
            }
            Err(other) => Err(CloneError::from_reconnect(other)),
        }
    }

    /// Connect to `endpoint` under `policy`, publishing each attempt
    pub async fn acquire(
        &self,
        endpoint: &Endpoint,
        policy: &RetryPolicy,
    ) -> std::result::Result<Attempted<Box<dyn DbConnection>>, ResilienceError> {
        let connector = self.connector;
        let events = self.events;
        let max = policy.max_attempts;

        retry_fixed(policy, self.cancel, |attempt| {
            events.publish(CloneEvent::ReconnectAttempt { attempt, max });
            async move {
                let result = connector.connect(endpoint).await;
                if let Err(e) = &result {
                    debug!(attempt, max, error = %e, "Reconnect attempt failed");
                }
                result
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::{MockConnector, MockServer};
    use reclone_core_interface::DEFAULT_PORT;
    use std::time::Duration;

    fn reconnecting_session() -> CloneSession {
        let mut s = CloneSession::new(
            Endpoint::new("db-a", DEFAULT_PORT, "u", "p"),
            Endpoint::new("db-c", DEFAULT_PORT, "u", "p"),
        );
        s.transition(CloneState::PreflightPassed);
        s.transition(CloneState::Cloning);
        s.transition(CloneState::Reconnecting);
        s
    }

    fn policy(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(Duration::from_secs(5), attempts, Duration::from_secs(2))
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_kth_attempt() {
        let connector = MockConnector::new();
        connector.add_server("db-c", MockServer::default().refusing_connections(3));
        let cancel = CancellationToken::new();
        let events = EventPublisher::noop();
        let mut s = reconnecting_session();
        let start = tokio::time::Instant::now();

        let attempts = Reconnector::new(&connector, policy(5), &cancel, &events)
            .reconnect(&mut s)
            .await
            .unwrap();

        assert_eq!(attempts, 4);
        assert_eq!(s.retry_count, 4);
        assert_eq!(s.state(), CloneState::Monitoring);
        assert!(s.target_conn.is_some());
        assert_eq!(start.elapsed(), Duration::from_secs(5 + 3 * 2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_fails_session() {
        let connector = MockConnector::new();
        // No server registered for db-c: every handshake is refused
        let cancel = CancellationToken::new();
        let (events, subscriber) = EventPublisher::unbounded();
        let mut s = reconnecting_session();

        let err = Reconnector::new(&connector, policy(4), &cancel, &events)
            .reconnect(&mut s)
            .await
            .unwrap_err();

        assert!(matches!(err, CloneError::TargetOffline { attempts: 4 }));
        assert_eq!(s.state(), CloneState::Failed);
        assert!(s
            .last_error
            .as_deref()
            .unwrap()
            .contains("did not come back online after 4 attempts"));
        assert_eq!(connector.connect_count("db-c"), 4);

        let attempts: Vec<u32> = subscriber
            .drain()
            .into_iter()
            .filter_map(|e| match e {
                CloneEvent::ReconnectAttempt { attempt, .. } => Some(attempt),
                _ => None,
            })
            .collect();
        assert_eq!(attempts, vec![1, 2, 3, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_leaves_state_to_caller() {
        let connector = MockConnector::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let events = EventPublisher::noop();
        let mut s = reconnecting_session();

        let err = Reconnector::new(&connector, policy(4), &cancel, &events)
            .reconnect(&mut s)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(s.state(), CloneState::Reconnecting);
        assert_eq!(connector.connect_count("db-c"), 0);
    }
}
