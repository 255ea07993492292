//! Post-hoc validation of a finished clone
//!
//! Reads the target's own record of the last clone over a fresh connection.
//! A run only counts as successful when that record says so, whatever the
//! monitor concluded.

use reclone_core_interface::{DbConnection, DbConnector, DbError, DbErrorKind, DbResult};
use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};

use super::session::CloneSession;
use super::sql::{self, ServerIdentity, StatusRecord};
use crate::events::{CloneEvent, EventPublisher};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub ok: bool,

    /// Version and server id of the rebuilt target, read only on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<ServerIdentity>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<StatusRecord>,

    pub message: String,
}

impl ValidationResult {
    fn failed(status: Option<StatusRecord>, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            identity: None,
            status,
            message: message.into(),
        }
    }
}

pub struct Validator<'a> {
    connector: &'a dyn DbConnector,
    query_timeout: Duration,
    events: &'a EventPublisher,
}

impl<'a> Validator<'a> {
    /// `query_timeout` bounds the whole inspection, handshake included
    pub fn new(
        connector: &'a dyn DbConnector,
        query_timeout: Duration,
        events: &'a EventPublisher,
    ) -> Self {
        Self {
            connector,
            query_timeout,
            events,
        }
    }

    /// Never fails; problems reading the record are reported in the result
    pub async fn validate(&self, session: &CloneSession) -> ValidationResult {
        let inspected = tokio::time::timeout(self.query_timeout, self.inspect(session))
            .await
            .unwrap_or_else(|_| {
                Err(DbError::new(
                    DbErrorKind::Timeout,
                    format!("no answer within {}s", self.query_timeout.as_secs()),
                ))
            });
        let result = match inspected {
            Ok(result) => result,
            Err(e) => ValidationResult::failed(None, format!("could not read clone status: {}", e)),
        };

        if result.ok {
            info!(
                version = ?result.identity.as_ref().map(|i| i.version.as_str()),
                server_id = ?result.identity.as_ref().map(|i| i.server_id),
                "Clone validated"
            );
        } else {
            warn!(message = %result.message, "Clone validation failed");
        }
        self.events.publish(CloneEvent::Validated {
            ok: result.ok,
            message: result.message.clone(),
        });
        result
    }

    async fn inspect(&self, session: &CloneSession) -> DbResult<ValidationResult> {
        let mut conn = self.connector.connect(&session.target).await?;
        let outcome = Self::read(conn.as_mut()).await;
        let _ = conn.close().await;
        outcome
    }

    async fn read(conn: &mut dyn DbConnection) -> DbResult<ValidationResult> {
        let status = conn
            .query_one(sql::CLONE_STATUS, &[])
            .await?
            .map(|row| StatusRecord::from_row(&row));

        let Some(record) = status else {
            return Ok(ValidationResult::failed(None, "Unknown error"));
        };
        if !record.is_completed() || record.error_no != 0 {
            let message = record.failure_message();
            return Ok(ValidationResult::failed(Some(record), message));
        }

        let identity = conn
            .query_one(sql::SERVER_IDENTITY, &[])
            .await?
            .map(|row| ServerIdentity::from_row(&row));
        let message = match &identity {
            Some(id) => format!(
                "Clone completed; target runs MySQL {} (server_id {})",
                id.version, id.server_id
            ),
            None => "Clone completed".to_string(),
        };
        Ok(ValidationResult {
            ok: true,
            identity,
            status: Some(record),
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::{MockConnector, MockServer};
    use reclone_core_interface::{Endpoint, DEFAULT_PORT};

    fn session() -> CloneSession {
        CloneSession::new(
            Endpoint::new("db-a", DEFAULT_PORT, "u", "p"),
            Endpoint::new("db-c", DEFAULT_PORT, "u", "p"),
        )
    }

    #[tokio::test]
    async fn test_completed_record_is_ok() {
        let connector = MockConnector::new();
        connector.add_server(
            "db-c",
            MockServer::default().with_status([Ok(Some(StatusRecord::new("Completed", 0)))]),
        );
        let (events, subscriber) = EventPublisher::unbounded();

        let result = Validator::new(&connector, Duration::from_secs(30), &events)
            .validate(&session())
            .await;

        assert!(result.ok);
        assert_eq!(result.identity.as_ref().unwrap().version, "8.0.36");
        assert!(result.message.contains("8.0.36"));
        assert!(matches!(
            subscriber.try_recv(),
            Some(CloneEvent::Validated { ok: true, .. })
        ));
        assert_eq!(connector.close_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_record_carries_message() {
        let connector = MockConnector::new();
        connector.add_server(
            "db-c",
            MockServer::default().with_status([Ok(Some(
                StatusRecord::new("Failed", 3862).with_message("Clone Donor error"),
            ))]),
        );
        let events = EventPublisher::noop();

        let result = Validator::new(&connector, Duration::from_secs(30), &events)
            .validate(&session())
            .await;

        assert!(!result.ok);
        assert_eq!(result.message, "Clone Donor error");
        assert!(result.identity.is_none());
    }

    #[tokio::test]
    async fn test_missing_record_is_unknown_error() {
        let connector = MockConnector::new();
        connector.add_server("db-c", MockServer::default());
        let events = EventPublisher::noop();

        let result = Validator::new(&connector, Duration::from_secs(30), &events)
            .validate(&session())
            .await;

        assert!(!result.ok);
        assert_eq!(result.message, "Unknown error");
    }

    #[tokio::test]
    async fn test_unreachable_target() {
        let connector = MockConnector::new();
        let events = EventPublisher::noop();

        let result = Validator::new(&connector, Duration::from_secs(30), &events)
            .validate(&session())
            .await;

        assert!(!result.ok);
        assert!(result.message.starts_with("could not read clone status"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_target_is_bounded() {
        let connector = MockConnector::new();
        connector.add_server(
            "db-c",
            MockServer {
                stall_status_queries: true,
                ..Default::default()
            },
        );
        let events = EventPublisher::noop();
        let start = tokio::time::Instant::now();

        let result = Validator::new(&connector, Duration::from_secs(15), &events)
            .validate(&session())
            .await;

        assert!(!result.ok);
        assert!(result.message.contains("no answer within 15s"));
        assert_eq!(start.elapsed(), Duration::from_secs(15));
    }
}
