//! Database command executor abstraction

use crate::endpoint::Endpoint;
use crate::value::{Row, SqlValue};
use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

/// Structured classification of a database failure.
///
/// Adapters derive the kind from transport-level signals (I/O error kinds,
/// client and server error numbers) so that callers never need to parse
/// human-readable messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DbErrorKind {
    /// An established connection was closed or reset by the peer
    ConnectionLost,
    /// The server could not be reached at all
    Unreachable,
    /// The server rejected the credentials
    Authentication,
    /// The account lacks a privilege required by the statement
    PermissionDenied,
    /// The statement was rejected by the parser
    Syntax,
    /// A connect or query timed out on the client side
    Timeout,
    /// Any other error reported by the server
    Server,
    /// Malformed or unexpected wire traffic
    Protocol,
    /// Invalid client-side configuration
    Configuration,
}

impl fmt::Display for DbErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DbErrorKind::ConnectionLost => "connection lost",
            DbErrorKind::Unreachable => "unreachable",
            DbErrorKind::Authentication => "authentication failed",
            DbErrorKind::PermissionDenied => "permission denied",
            DbErrorKind::Syntax => "syntax error",
            DbErrorKind::Timeout => "timed out",
            DbErrorKind::Server => "server error",
            DbErrorKind::Protocol => "protocol error",
            DbErrorKind::Configuration => "configuration error",
        };
        write!(f, "{}", s)
    }
}

/// Error returned by the database command executor
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind}: {message}")]
pub struct DbError {
    pub kind: DbErrorKind,

    /// MySQL client or server error number, when one was reported
    pub code: Option<u16>,

    pub message: String,
}

impl DbError {
    pub fn new(kind: DbErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(mut self, code: u16) -> Self {
        self.code = Some(code);
        self
    }

    /// The connection dropped underneath an in-flight operation
    pub fn is_connection_lost(&self) -> bool {
        self.kind == DbErrorKind::ConnectionLost
    }

    /// Worth retrying with a fresh connection
    pub fn is_retriable(&self) -> bool {
        matches!(
            self.kind,
            DbErrorKind::ConnectionLost | DbErrorKind::Unreachable | DbErrorKind::Timeout
        )
    }

    pub fn is_auth_error(&self) -> bool {
        self.kind == DbErrorKind::Authentication
    }
}

pub type DbResult<T> = std::result::Result<T, DbError>;

/// One live connection to a database instance.
///
/// A connection is never reused after [`DbErrorKind::ConnectionLost`]; the
/// caller obtains a new one from its [`DbConnector`].
#[async_trait]
pub trait DbConnection: Send {
    /// Run a query and return all rows (possibly none)
    async fn execute_query(&mut self, stmt: &str, params: &[SqlValue]) -> DbResult<Vec<Row>>;

    /// Run a statement and return the affected-row count
    async fn execute_statement(&mut self, stmt: &str, params: &[SqlValue]) -> DbResult<u64>;

    /// Whether the handle still believes it is connected
    fn is_connected(&self) -> bool;

    /// Close the connection gracefully
    async fn close(&mut self) -> DbResult<()>;

    /// Run a query and return its first row
    async fn query_one(&mut self, stmt: &str, params: &[SqlValue]) -> DbResult<Option<Row>> {
        Ok(self.execute_query(stmt, params).await?.into_iter().next())
    }
}

/// Opens fresh connections; every call performs a full handshake
#[async_trait]
pub trait DbConnector: Send + Sync {
    async fn connect(&self, endpoint: &Endpoint) -> DbResult<Box<dyn DbConnection>>;
}
