//! Pre-flight validation
//!
//! Every check runs and reports independently; nothing here modifies either
//! server. Connections opened for the checks are left on the session for the
//! initiator to reuse.

use reclone_core_interface::{DbConnection, DbConnector, DbError, DbErrorKind, Endpoint, Row};
use serde::Serialize;
use std::fmt;
use tracing::{debug, info, warn};

use super::session::CloneSession;
use super::sql;
use crate::config::PreflightSettings;
use crate::events::{CloneEvent, EventPublisher};

/// Which side of the clone an endpoint is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Source,
    Target,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Source => write!(f, "source"),
            Role::Target => write!(f, "target"),
        }
    }
}

/// One row of the target's process list
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActiveSession {
    pub id: u64,
    pub user: String,
    pub host: String,
    pub db: Option<String>,
    pub command: String,
    pub time: i64,
    pub state: Option<String>,
    pub info: Option<String>,
}

impl ActiveSession {
    pub fn from_row(row: &Row) -> Self {
        Self {
            id: row.get_u64("ID").unwrap_or(0),
            user: row.get_string("USER").unwrap_or_default(),
            host: row.get_string("HOST").unwrap_or_default(),
            db: row.get_string("DB"),
            command: row.get_string("COMMAND").unwrap_or_default(),
            time: row.get_i64("TIME").unwrap_or(0),
            state: row.get_string("STATE").filter(|s| !s.is_empty()),
            info: row.get_string("INFO"),
        }
    }

    pub fn to_row(&self) -> Row {
        Row::new()
            .with("ID", self.id)
            .with("USER", self.user.as_str())
            .with("HOST", self.host.as_str())
            .with("DB", self.db.clone())
            .with("COMMAND", self.command.as_str())
            .with("TIME", self.time)
            .with("STATE", self.state.clone())
            .with("INFO", self.info.clone())
    }
}

impl fmt::Display for ActiveSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "id={} {}@{} db={} command={} time={}s state={} info={}",
            self.id,
            self.user,
            self.host,
            self.db.as_deref().unwrap_or("-"),
            self.command,
            self.time,
            self.state.as_deref().unwrap_or("-"),
            self.info.as_deref().unwrap_or("-"),
        )
    }
}

/// A reason the clone must not (or, with force, may) proceed
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PreflightIssue {
    AuthenticationFailed { role: Role, endpoint: String, message: String },
    Unreachable { role: Role, endpoint: String, message: String },
    ConnectFailed { role: Role, endpoint: String, message: String },
    PluginNotInstalled { role: Role, endpoint: String },
    PluginInactive { role: Role, endpoint: String, status: String },
    PluginCheckFailed { role: Role, message: String },
    SessionCheckFailed { message: String },
    ActiveSessions { sessions: Vec<ActiveSession> },
}

impl PreflightIssue {
    /// Capability and connectivity problems cannot be overridden
    pub fn is_hard(&self) -> bool {
        !matches!(self, PreflightIssue::ActiveSessions { .. })
    }

    fn connect_failure(role: Role, endpoint: &Endpoint, err: &DbError) -> Self {
        let endpoint = endpoint.to_string();
        let message = err.message.clone();
        match err.kind {
            DbErrorKind::Authentication => PreflightIssue::AuthenticationFailed {
                role,
                endpoint,
                message,
            },
            DbErrorKind::Unreachable | DbErrorKind::Timeout | DbErrorKind::ConnectionLost => {
                PreflightIssue::Unreachable {
                    role,
                    endpoint,
                    message,
                }
            }
            _ => PreflightIssue::ConnectFailed {
                role,
                endpoint,
                message,
            },
        }
    }
}

impl fmt::Display for PreflightIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PreflightIssue::AuthenticationFailed {
                role,
                endpoint,
                message,
            } => write!(f, "Authentication to {} {} failed: {}", role, endpoint, message),
            PreflightIssue::Unreachable {
                role,
                endpoint,
                message,
            } => write!(f, "Cannot reach {} {}: {}", role, endpoint, message),
            PreflightIssue::ConnectFailed {
                role,
                endpoint,
                message,
            } => write!(f, "Cannot connect to {} {}: {}", role, endpoint, message),
            PreflightIssue::PluginNotInstalled { role, endpoint } => {
                write!(f, "Clone plugin is not installed on {} {}", role, endpoint)
            }
            PreflightIssue::PluginInactive {
                role,
                endpoint,
                status,
            } => write!(
                f,
                "Clone plugin is installed on {} {} but not active (status {})",
                role, endpoint, status
            ),
            PreflightIssue::PluginCheckFailed { role, message } => {
                write!(f, "Could not check the clone plugin on {}: {}", role, message)
            }
            PreflightIssue::SessionCheckFailed { message } => {
                write!(f, "Could not list sessions on target: {}", message)
            }
            PreflightIssue::ActiveSessions { sessions } => {
                write!(f, "Target has {} active session(s)", sessions.len())?;
                for session in sessions {
                    write!(f, "\n  - {}", session)?;
                }
                Ok(())
            }
        }
    }
}

/// Outcome of the pre-flight checks
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PreflightReport {
    pub issues: Vec<PreflightIssue>,
}

impl PreflightReport {
    pub fn ok(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn reasons(&self) -> Vec<String> {
        self.issues.iter().map(|i| i.to_string()).collect()
    }

    /// Whether the clone may go ahead; `force` only waives active sessions
    pub fn can_proceed(&self, force: bool) -> bool {
        self.issues.iter().all(|i| force && !i.is_hard())
    }

    pub fn has_hard_failure(&self) -> bool {
        self.issues.iter().any(PreflightIssue::is_hard)
    }
}

pub struct Preflight<'a> {
    connector: &'a dyn DbConnector,
    settings: &'a PreflightSettings,
    events: &'a EventPublisher,
}

impl<'a> Preflight<'a> {
    pub fn new(
        connector: &'a dyn DbConnector,
        settings: &'a PreflightSettings,
        events: &'a EventPublisher,
    ) -> Self {
        Self {
            connector,
            settings,
            events,
        }
    }

    /// Run every check. Connections that succeed are stored on the session.
    pub async fn validate(&self, session: &mut CloneSession) -> PreflightReport {
        let mut report = PreflightReport::default();

        session.source_conn = self.connect(Role::Source, &session.source, &mut report).await;
        session.target_conn = self.connect(Role::Target, &session.target, &mut report).await;

        if let Some(conn) = session.source_conn.as_mut() {
            self.check_plugin(Role::Source, &session.source, conn.as_mut(), &mut report)
                .await;
        }
        if let Some(conn) = session.target_conn.as_mut() {
            self.check_plugin(Role::Target, &session.target, conn.as_mut(), &mut report)
                .await;
            let own_user = session.target.user.clone();
            self.check_sessions(conn.as_mut(), &own_user, &mut report)
                .await;
        }

        if report.ok() {
            info!("Pre-flight checks passed");
        } else {
            for reason in report.reasons() {
                warn!(reason = %reason, "Pre-flight check failed");
            }
        }
        self.events.publish(CloneEvent::PreflightCompleted {
            reasons: report.reasons(),
            forced: self.settings.force && !report.ok() && report.can_proceed(true),
        });

        report
    }

    fn record(&self, check: &str, issue: Option<PreflightIssue>, report: &mut PreflightReport) {
        self.events.publish(CloneEvent::PreflightCheck {
            check: check.to_string(),
            passed: issue.is_none(),
            detail: issue.as_ref().map(|i| i.to_string()),
        });
        report.issues.extend(issue);
    }

    async fn connect(
        &self,
        role: Role,
        endpoint: &Endpoint,
        report: &mut PreflightReport,
    ) -> Option<Box<dyn DbConnection>> {
        let check = format!("{} connectivity ({})", role, endpoint.address());
        match self.connector.connect(endpoint).await {
            Ok(conn) => {
                debug!(%role, endpoint = %endpoint, "Connected");
                self.record(&check, None, report);
                Some(conn)
            }
            Err(e) => {
                let issue = PreflightIssue::connect_failure(role, endpoint, &e);
                self.record(&check, Some(issue), report);
                None
            }
        }
    }

    async fn check_plugin(
        &self,
        role: Role,
        endpoint: &Endpoint,
        conn: &mut dyn DbConnection,
        report: &mut PreflightReport,
    ) {
        let check = format!("{} clone plugin", role);
        let issue = match conn.query_one(sql::PLUGIN_STATUS, &[]).await {
            Ok(None) => Some(PreflightIssue::PluginNotInstalled {
                role,
                endpoint: endpoint.to_string(),
            }),
            Ok(Some(row)) => {
                let status = row.get_string("PLUGIN_STATUS").unwrap_or_default();
                if status.eq_ignore_ascii_case("ACTIVE") {
                    None
                } else {
                    Some(PreflightIssue::PluginInactive {
                        role,
                        endpoint: endpoint.to_string(),
                        status,
                    })
                }
            }
            Err(e) => Some(PreflightIssue::PluginCheckFailed {
                role,
                message: e.to_string(),
            }),
        };
        self.record(&check, issue, report);
    }

    async fn check_sessions(
        &self,
        conn: &mut dyn DbConnection,
        own_user: &str,
        report: &mut PreflightReport,
    ) {
        let check = "target quiescence";
        let own_id = match conn.query_one(sql::CONNECTION_ID, &[]).await {
            Ok(row) => row.and_then(|r| r.get_u64("ID")),
            Err(e) => {
                let issue = PreflightIssue::SessionCheckFailed {
                    message: e.to_string(),
                };
                self.record(check, Some(issue), report);
                return;
            }
        };

        let issue = match conn.execute_query(sql::PROCESSLIST, &[]).await {
            Ok(rows) => {
                let sessions: Vec<ActiveSession> = rows
                    .iter()
                    .map(ActiveSession::from_row)
                    .filter(|s| !self.is_ignored(s, own_id, own_user))
                    .collect();
                if sessions.is_empty() {
                    None
                } else {
                    Some(PreflightIssue::ActiveSessions { sessions })
                }
            }
            Err(e) => Some(PreflightIssue::SessionCheckFailed {
                message: e.to_string(),
            }),
        };
        self.record(check, issue, report);
    }

    /// Background threads, idle connections and our own sessions don't count
    fn is_ignored(&self, session: &ActiveSession, own_id: Option<u64>, own_user: &str) -> bool {
        if own_id == Some(session.id) {
            return true;
        }
        if self.settings.ignore_own_user && session.user == own_user {
            return true;
        }
        self.settings
            .ignored_commands
            .iter()
            .any(|c| c.eq_ignore_ascii_case(&session.command))
            || self
                .settings
                .ignored_users
                .iter()
                .any(|u| u.eq_ignore_ascii_case(&session.user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::{MockConnector, MockServer};
    use reclone_core_interface::DEFAULT_PORT;

    fn session() -> CloneSession {
        CloneSession::new(
            Endpoint::new("db-a", DEFAULT_PORT, "clone_user", "pw"),
            Endpoint::new("db-c", DEFAULT_PORT, "clone_user", "pw"),
        )
    }

    fn busy(id: u64, user: &str, command: &str) -> ActiveSession {
        ActiveSession {
            id,
            user: user.to_string(),
            host: "10.0.0.5:5123".to_string(),
            db: Some("shop".to_string()),
            command: command.to_string(),
            time: 12,
            state: None,
            info: Some("SELECT 1".to_string()),
        }
    }

    async fn run(connector: &MockConnector, settings: &PreflightSettings) -> PreflightReport {
        let events = EventPublisher::noop();
        let preflight = Preflight::new(connector, settings, &events);
        let mut s = session();
        preflight.validate(&mut s).await
    }

    #[tokio::test]
    async fn test_all_clear() {
        let connector = MockConnector::new();
        connector.add_server("db-a", MockServer::default());
        connector.add_server("db-c", MockServer::default());

        let report = run(&connector, &PreflightSettings::default()).await;
        assert!(report.ok(), "{:?}", report.reasons());
        assert!(report.can_proceed(false));
    }

    #[tokio::test]
    async fn test_plugin_states_are_distinct() {
        let connector = MockConnector::new();
        connector.add_server(
            "db-a",
            MockServer {
                plugin_status: None,
                ..Default::default()
            },
        );
        connector.add_server(
            "db-c",
            MockServer {
                plugin_status: Some("DISABLED".into()),
                ..Default::default()
            },
        );

        let report = run(&connector, &PreflightSettings::default()).await;
        assert_eq!(report.issues.len(), 2);
        assert!(matches!(
            report.issues[0],
            PreflightIssue::PluginNotInstalled {
                role: Role::Source,
                ..
            }
        ));
        assert!(matches!(
            report.issues[1],
            PreflightIssue::PluginInactive {
                role: Role::Target,
                ..
            }
        ));
        assert!(!report.can_proceed(true));
    }

    #[tokio::test]
    async fn test_connectivity_failures_reported_without_short_circuit() {
        let connector = MockConnector::new();
        connector.add_server(
            "db-a",
            MockServer {
                connect_error: Some(
                    DbError::new(DbErrorKind::Authentication, "Access denied").with_code(1045),
                ),
                ..Default::default()
            },
        );
        // db-c is not registered at all: unreachable

        let report = run(&connector, &PreflightSettings::default()).await;
        assert_eq!(report.issues.len(), 2);
        assert!(matches!(
            report.issues[0],
            PreflightIssue::AuthenticationFailed { .. }
        ));
        assert!(matches!(report.issues[1], PreflightIssue::Unreachable { .. }));
        assert!(report.has_hard_failure());
    }

    #[tokio::test]
    async fn test_active_sessions_filtered_by_allow_list() {
        let connector = MockConnector::new();
        connector.add_server("db-a", MockServer::default());
        connector.add_server(
            "db-c",
            MockServer {
                sessions: vec![
                    busy(1, "event_scheduler", "Daemon"),
                    busy(2, "app", "Sleep"),
                    busy(3, "system user", "Connect"),
                    busy(4, "clone_user", "Query"),
                    busy(5, "app", "Query"),
                ],
                ..Default::default()
            },
        );

        let report = run(&connector, &PreflightSettings::default()).await;
        assert_eq!(report.issues.len(), 1);
        match &report.issues[0] {
            PreflightIssue::ActiveSessions { sessions } => {
                assert_eq!(sessions.len(), 1);
                assert_eq!(sessions[0].id, 5);
            }
            other => panic!("unexpected issue {:?}", other),
        }
        assert!(!report.can_proceed(false));
        assert!(report.can_proceed(true));
        assert!(report.reasons()[0].contains("id=5 app@10.0.0.5:5123 db=shop"));
    }

    #[tokio::test]
    async fn test_own_user_sessions_count_when_not_ignored() {
        let connector = MockConnector::new();
        connector.add_server("db-a", MockServer::default());
        connector.add_server(
            "db-c",
            MockServer {
                sessions: vec![busy(4, "clone_user", "Query")],
                ..Default::default()
            },
        );
        let settings = PreflightSettings {
            ignore_own_user: false,
            ..Default::default()
        };

        let report = run(&connector, &settings).await;
        match &report.issues[..] {
            // Our own connection (CONNECTION_ID) is still excluded
            [PreflightIssue::ActiveSessions { sessions }] => assert_eq!(sessions.len(), 1),
            other => panic!("unexpected issues {:?}", other),
        }
    }
}
