//! In-memory MySQL and shell doubles for testing
//!
//! [`MockConnector`] scripts one or more fake servers keyed by host name:
//! plugin state, the process list, the reply to the clone directive, how many
//! handshakes fail while the target restarts, and what the progress and
//! status surfaces report on each poll. [`MockRemote`] records every shell
//! command and answers detached launches with a fixed PID.
//!
//! # Example
//!
//! ```rust
//! use reclone::backend::mock::{MockConnector, MockServer};
//!
//! let connector = MockConnector::new();
//! connector.add_server("db-a", MockServer::default());
//! connector.add_server(
//!     "db-c",
//!     MockServer {
//!         restart_connect_failures: 3,
//!         ..Default::default()
//!     },
//! );
//! ```

use async_trait::async_trait;
use reclone_core_interface::{
    DbConnection, DbConnector, DbError, DbErrorKind, DbResult, Endpoint, ExecOutput,
    RemoteConnector, RemoteError, RemoteResult, RemoteSession, Row, SqlValue,
};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::clone::preflight::ActiveSession;
use crate::clone::sql::{self, ProgressRow, ServerIdentity, StatusRecord};

/// Result of one poll of a monitored surface
pub type Scripted<T> = Result<T, DbError>;

/// Scripted behaviour of one fake server
#[derive(Debug, Clone)]
pub struct MockServer {
    /// Every handshake fails with this error
    pub connect_error: Option<DbError>,

    /// `PLUGIN_STATUS` of the clone plugin; `None` means not installed
    pub plugin_status: Option<String>,

    /// Id reported by `CONNECTION_ID()` for our own sessions
    pub connection_id: u64,

    /// Other sessions in the process list
    pub sessions: Vec<ActiveSession>,

    pub datadir: Scripted<String>,

    pub donor_list_error: Option<DbError>,

    /// Reply to `CLONE INSTANCE`; a connection loss or success restarts the server
    pub dispatch_result: Scripted<u64>,

    /// Handshakes refused after a restart before the server accepts again
    pub restart_connect_failures: u32,

    /// Handshakes refused before the first one succeeds
    pub refuse_connections: u32,

    /// Progress and status queries never answer, as on a half-open connection
    pub stall_status_queries: bool,

    /// One entry per progress poll; the last entry repeats
    pub progress: VecDeque<Scripted<Vec<ProgressRow>>>,

    /// One entry per status poll; the last entry repeats
    pub status: VecDeque<Scripted<Option<StatusRecord>>>,

    pub identity: ServerIdentity,
}

impl Default for MockServer {
    fn default() -> Self {
        Self {
            connect_error: None,
            plugin_status: Some("ACTIVE".to_string()),
            connection_id: 7,
            sessions: Vec::new(),
            datadir: Ok("/var/lib/mysql/".to_string()),
            donor_list_error: None,
            dispatch_result: Err(lost_connection()),
            restart_connect_failures: 0,
            refuse_connections: 0,
            stall_status_queries: false,
            progress: VecDeque::new(),
            status: VecDeque::new(),
            identity: ServerIdentity {
                version: "8.0.36".to_string(),
                server_id: 3,
                server_uuid: "5d1c2f3e-0000-11ee-9f00-0242ac120003".to_string(),
            },
        }
    }
}

impl MockServer {
    /// Refuse the next `n` handshakes, as a restarting server would
    pub fn refusing_connections(mut self, n: u32) -> Self {
        self.refuse_connections = n;
        self
    }

    /// Append progress polls
    pub fn with_progress(
        mut self,
        polls: impl IntoIterator<Item = Scripted<Vec<ProgressRow>>>,
    ) -> Self {
        self.progress.extend(polls);
        self
    }

    /// Append status polls
    pub fn with_status(
        mut self,
        polls: impl IntoIterator<Item = Scripted<Option<StatusRecord>>>,
    ) -> Self {
        self.status.extend(polls);
        self
    }
}

/// Progress rows for one poll, one row per `(completed, estimated)` pair
pub fn progress_rows(pairs: &[(u64, u64)]) -> Vec<ProgressRow> {
    pairs
        .iter()
        .map(|&(completed, estimated)| ProgressRow {
            stage: "FILE COPY".to_string(),
            state: "In Progress".to_string(),
            work_estimated: estimated,
            work_completed: completed,
        })
        .collect()
}

/// The error a client sees when the server restarts underneath it
pub fn lost_connection() -> DbError {
    DbError::new(
        DbErrorKind::ConnectionLost,
        "Lost connection to MySQL server during query",
    )
    .with_code(2013)
}

fn unreachable_host(host: &str) -> DbError {
    DbError::new(
        DbErrorKind::Unreachable,
        format!("Can't connect to MySQL server on '{}'", host),
    )
    .with_code(2003)
}

fn next_scripted<T: Clone + Default>(queue: &mut VecDeque<Scripted<T>>) -> Scripted<T> {
    if queue.len() > 1 {
        queue.pop_front().unwrap_or_else(|| Ok(T::default()))
    } else {
        queue.front().cloned().unwrap_or_else(|| Ok(T::default()))
    }
}

/// Restart bookkeeping of one server
#[derive(Debug, Default)]
struct Lifecycle {
    /// Bumped on every restart; handles from older generations are dead
    generation: u32,
    refusals_left: u32,
}

#[derive(Debug, Default)]
struct MockState {
    servers: HashMap<String, MockServer>,
    lifecycles: HashMap<String, Lifecycle>,
    statements: Vec<(String, String)>,
    connects: HashMap<String, u32>,
    closes: u32,
}

/// Database connector over scripted in-memory servers
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    state: Arc<Mutex<MockState>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add_server(&self, host: impl Into<String>, server: MockServer) {
        let host = host.into();
        let mut state = self.lock();
        state.lifecycles.insert(
            host.clone(),
            Lifecycle {
                generation: 0,
                refusals_left: server.refuse_connections,
            },
        );
        state.servers.insert(host, server);
    }

    /// Mutate a server in place
    pub fn update_server(&self, host: &str, f: impl FnOnce(&mut MockServer)) {
        if let Some(server) = self.lock().servers.get_mut(host) {
            f(server);
        }
    }

    /// Statements and queries sent to `host`, in order
    pub fn statements(&self, host: &str) -> Vec<String> {
        self.lock()
            .statements
            .iter()
            .filter(|(h, _)| h == host)
            .map(|(_, s)| s.clone())
            .collect()
    }

    /// Whether any statement sent to `host` starts with `prefix`
    pub fn saw_statement(&self, host: &str, prefix: &str) -> bool {
        self.statements(host).iter().any(|s| s.starts_with(prefix))
    }

    pub fn connect_count(&self, host: &str) -> u32 {
        self.lock().connects.get(host).copied().unwrap_or(0)
    }

    pub fn close_count(&self) -> u32 {
        self.lock().closes
    }
}

#[async_trait]
impl DbConnector for MockConnector {
    async fn connect(&self, endpoint: &Endpoint) -> DbResult<Box<dyn DbConnection>> {
        let mut guard = self.lock();
        let state = &mut *guard;
        *state.connects.entry(endpoint.host.clone()).or_insert(0) += 1;

        let server = state
            .servers
            .get(&endpoint.host)
            .ok_or_else(|| unreachable_host(&endpoint.host))?;
        if let Some(err) = &server.connect_error {
            return Err(err.clone());
        }
        let lifecycle = state.lifecycles.entry(endpoint.host.clone()).or_default();
        if lifecycle.refusals_left > 0 {
            lifecycle.refusals_left -= 1;
            return Err(unreachable_host(&endpoint.host));
        }

        Ok(Box::new(MockHandle {
            state: Arc::clone(&self.state),
            host: endpoint.host.clone(),
            user: endpoint.user.clone(),
            generation: lifecycle.generation,
            open: true,
        }))
    }
}

/// Connection to a scripted server
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
    host: String,
    user: String,
    generation: u32,
    open: bool,
}

impl MockHandle {
    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_current(&self, state: &MockState) -> bool {
        self.open
            && state
                .lifecycles
                .get(&self.host)
                .map(|l| l.generation == self.generation)
                .unwrap_or(false)
    }

    fn stalls(&self, stmt: &str) -> bool {
        (stmt == sql::CLONE_PROGRESS || stmt == sql::CLONE_STATUS)
            && self
                .lock()
                .servers
                .get(&self.host)
                .map(|s| s.stall_status_queries)
                .unwrap_or(false)
    }

    fn run_query(&self, stmt: &str) -> DbResult<Vec<Row>> {
        let mut guard = self.lock();
        let state = &mut *guard;
        state.statements.push((self.host.clone(), stmt.to_string()));
        if !self.is_current(state) {
            return Err(lost_connection());
        }
        let server = state
            .servers
            .get_mut(&self.host)
            .ok_or_else(lost_connection)?;

        match stmt {
            sql::PLUGIN_STATUS => Ok(server
                .plugin_status
                .iter()
                .map(|s| Row::new().with("PLUGIN_STATUS", s.as_str()))
                .collect()),
            sql::CONNECTION_ID => Ok(vec![Row::new().with("ID", server.connection_id)]),
            sql::PROCESSLIST => {
                let own = ActiveSession {
                    id: server.connection_id,
                    user: self.user.clone(),
                    host: "controller:51000".to_string(),
                    db: None,
                    command: "Query".to_string(),
                    time: 0,
                    state: Some("executing".to_string()),
                    info: Some(sql::PROCESSLIST.to_string()),
                };
                Ok(std::iter::once(&own)
                    .chain(server.sessions.iter())
                    .map(ActiveSession::to_row)
                    .collect())
            }
            sql::DATADIR => server
                .datadir
                .clone()
                .map(|dir| vec![Row::new().with("DATADIR", dir)]),
            sql::CLONE_PROGRESS => next_scripted(&mut server.progress)
                .map(|rows| rows.iter().map(ProgressRow::to_row).collect()),
            sql::CLONE_STATUS => next_scripted(&mut server.status)
                .map(|record| record.iter().map(StatusRecord::to_row).collect()),
            sql::SERVER_IDENTITY => Ok(vec![server.identity.to_row()]),
            other => Err(DbError::new(
                DbErrorKind::Syntax,
                format!("mock cannot answer: {}", other),
            )
            .with_code(1064)),
        }
    }

    fn run_statement(&self, stmt: &str) -> DbResult<u64> {
        let mut guard = self.lock();
        let state = &mut *guard;
        state.statements.push((self.host.clone(), stmt.to_string()));
        if !self.is_current(state) {
            return Err(lost_connection());
        }
        let server = state
            .servers
            .get(&self.host)
            .ok_or_else(lost_connection)?;

        if stmt.starts_with("SET GLOBAL clone_valid_donor_list") {
            return match &server.donor_list_error {
                Some(err) => Err(err.clone()),
                None => Ok(0),
            };
        }
        if stmt.starts_with("CLONE INSTANCE") {
            let result = server.dispatch_result.clone();
            let restarts = match &result {
                Ok(_) => true,
                Err(e) => e.is_connection_lost(),
            };
            if restarts {
                let refusals = server.restart_connect_failures;
                let lifecycle = state.lifecycles.entry(self.host.clone()).or_default();
                lifecycle.generation += 1;
                lifecycle.refusals_left = refusals;
            }
            return result;
        }
        Ok(0)
    }
}

#[async_trait]
impl DbConnection for MockHandle {
    async fn execute_query(&mut self, stmt: &str, _params: &[SqlValue]) -> DbResult<Vec<Row>> {
        if self.stalls(stmt) {
            std::future::pending::<()>().await;
        }
        self.run_query(stmt)
    }

    async fn execute_statement(&mut self, stmt: &str, _params: &[SqlValue]) -> DbResult<u64> {
        self.run_statement(stmt)
    }

    fn is_connected(&self) -> bool {
        self.is_current(&self.lock())
    }

    async fn close(&mut self) -> DbResult<()> {
        if self.open {
            self.open = false;
            self.lock().closes += 1;
        }
        Ok(())
    }
}

/// PID reported for every detached launch
pub const MOCK_PID: u32 = 4242;

#[derive(Debug, Default)]
struct RemoteState {
    open_error: Option<RemoteError>,
    commands: Vec<String>,
    inputs: Vec<String>,
    opened: u32,
    closed: u32,
}

/// Shell connector that records commands instead of running them
#[derive(Debug, Clone, Default)]
pub struct MockRemote {
    state: Arc<Mutex<RemoteState>>,
}

impl MockRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connector whose every `open` fails
    pub fn failing(err: RemoteError) -> Self {
        let remote = Self::default();
        remote.lock().open_error = Some(err);
        remote
    }

    fn lock(&self) -> MutexGuard<'_, RemoteState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn commands(&self) -> Vec<String> {
        self.lock().commands.clone()
    }

    /// Standard input sent with each command, in order; empty when none
    pub fn inputs(&self) -> Vec<String> {
        self.lock().inputs.clone()
    }

    /// PIDs passed to `kill`
    pub fn killed_pids(&self) -> Vec<u32> {
        self.lock()
            .commands
            .iter()
            .filter_map(|c| c.strip_prefix("kill "))
            .filter_map(|rest| rest.split_whitespace().next())
            .filter_map(|pid| pid.parse().ok())
            .collect()
    }

    pub fn opened(&self) -> u32 {
        self.lock().opened
    }

    pub fn closed(&self) -> u32 {
        self.lock().closed
    }
}

#[async_trait]
impl RemoteConnector for MockRemote {
    async fn open(&self, host: &str) -> RemoteResult<Box<dyn RemoteSession>> {
        let mut state = self.lock();
        if let Some(err) = &state.open_error {
            return Err(err.clone());
        }
        state.opened += 1;
        Ok(Box::new(MockShell {
            host: host.to_string(),
            state: Arc::clone(&self.state),
        }))
    }
}

struct MockShell {
    host: String,
    state: Arc<Mutex<RemoteState>>,
}

#[async_trait]
impl RemoteSession for MockShell {
    fn host(&self) -> &str {
        &self.host
    }

    async fn exec_with_input(&self, command: &str, input: &str) -> RemoteResult<ExecOutput> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.commands.push(command.to_string());
        state.inputs.push(input.to_string());
        let stdout = if command.contains("nohup sh -c ") {
            format!("{}\n", MOCK_PID)
        } else {
            String::new()
        };
        Ok(ExecOutput {
            exit_status: 0,
            stdout,
            stderr: String::new(),
        })
    }

    async fn close(&self) -> RemoteResult<()> {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).closed += 1;
        Ok(())
    }
}
