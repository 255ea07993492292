//! MySQL command executor over sqlx
//!
//! Every handle wraps one dedicated `MySqlConnection` rather than a pool: a
//! reconnect must be a fresh handshake against a server that may have just
//! restarted, and a pool would hand back stale sockets.

use async_trait::async_trait;
use reclone_core_interface::{
    DbConnection, DbConnector, DbError, DbErrorKind, DbResult, Endpoint, Row, SqlValue,
};
use sqlx::mysql::{MySqlArguments, MySqlConnectOptions, MySqlConnection, MySqlDatabaseError, MySqlRow};
use sqlx::query::Query;
use sqlx::{Column, ConnectOptions, Connection, MySql, Row as _, ValueRef};
use std::io::ErrorKind;
use std::time::Duration;
use tracing::debug;

/// Client and server error numbers that mean the socket is gone
const CONNECTION_LOST_CODES: &[u16] = &[
    2006, // CR_SERVER_GONE_ERROR
    2013, // CR_SERVER_LOST
    1053, // ER_SERVER_SHUTDOWN
    1927, // ER_CONNECTION_KILLED
];

const UNREACHABLE_CODES: &[u16] = &[
    2003, // CR_CONN_HOST_ERROR
    2005, // CR_UNKNOWN_HOST
];

const PERMISSION_CODES: &[u16] = &[1044, 1142, 1227, 1370];

/// Only consulted for driver errors that carry nothing but text
const LOST_CONNECTION_MESSAGE: &str = "Lost connection to MySQL server";

/// Opens dedicated connections with a bounded handshake
#[derive(Debug, Clone)]
pub struct MySqlConnector {
    connect_timeout: Duration,
}

impl MySqlConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    fn options(endpoint: &Endpoint) -> MySqlConnectOptions {
        MySqlConnectOptions::new()
            .host(&endpoint.host)
            .port(endpoint.port)
            .username(&endpoint.user)
            .password(endpoint.password())
            .disable_statement_logging()
    }
}

impl Default for MySqlConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl DbConnector for MySqlConnector {
    async fn connect(&self, endpoint: &Endpoint) -> DbResult<Box<dyn DbConnection>> {
        let options = Self::options(endpoint);
        let conn = tokio::time::timeout(self.connect_timeout, options.connect())
            .await
            .map_err(|_| {
                DbError::new(
                    DbErrorKind::Timeout,
                    format!(
                        "connect to {} timed out after {}s",
                        endpoint.address(),
                        self.connect_timeout.as_secs()
                    ),
                )
            })?
            .map_err(|e| classify(&e))?;

        debug!(endpoint = %endpoint, "MySQL connection established");
        Ok(Box::new(MySqlHandle {
            conn: Some(conn),
            connected: true,
        }))
    }
}

/// One live MySQL connection
pub struct MySqlHandle {
    conn: Option<MySqlConnection>,
    connected: bool,
}

impl MySqlHandle {
    fn conn(&mut self) -> DbResult<&mut MySqlConnection> {
        match self.conn.as_mut() {
            Some(conn) if self.connected => Ok(conn),
            _ => Err(DbError::new(
                DbErrorKind::ConnectionLost,
                "connection is closed",
            )),
        }
    }

    fn observe<T>(&mut self, result: Result<T, sqlx::Error>) -> DbResult<T> {
        result.map_err(|e| {
            let err = classify(&e);
            if err.is_connection_lost() {
                self.connected = false;
            }
            err
        })
    }
}

fn bind_all<'q>(stmt: &'q str, params: &[SqlValue]) -> Query<'q, MySql, MySqlArguments> {
    params.iter().fold(sqlx::query(stmt), |query, param| match param {
        SqlValue::Null => query.bind(None::<String>),
        SqlValue::Int(v) => query.bind(*v),
        SqlValue::UInt(v) => query.bind(*v),
        SqlValue::Float(v) => query.bind(*v),
        SqlValue::Text(v) => query.bind(v.clone()),
        SqlValue::Bytes(v) => query.bind(v.clone()),
    })
}

#[async_trait]
impl DbConnection for MySqlHandle {
    async fn execute_query(&mut self, stmt: &str, params: &[SqlValue]) -> DbResult<Vec<Row>> {
        let conn = self.conn()?;
        // Executor method directly: RawSql's async wrapper trips sqlx's
        // higher-ranked Executor inference inside async_trait
        let result = if params.is_empty() {
            sqlx::Executor::fetch_all(&mut *conn, sqlx::raw_sql(stmt)).await
        } else {
            bind_all(stmt, params).fetch_all(&mut *conn).await
        };
        let rows = self.observe(result)?;
        Ok(rows.iter().map(convert_row).collect())
    }

    async fn execute_statement(&mut self, stmt: &str, params: &[SqlValue]) -> DbResult<u64> {
        let conn = self.conn()?;
        // Executor method directly: RawSql's async wrapper trips sqlx's
        // higher-ranked Executor inference inside async_trait
        let result = if params.is_empty() {
            sqlx::Executor::execute(&mut *conn, sqlx::raw_sql(stmt)).await
        } else {
            bind_all(stmt, params).execute(&mut *conn).await
        };
        Ok(self.observe(result)?.rows_affected())
    }

    fn is_connected(&self) -> bool {
        self.connected && self.conn.is_some()
    }

    async fn close(&mut self) -> DbResult<()> {
        self.connected = false;
        match self.conn.take() {
            Some(conn) => conn.close().await.map_err(|e| classify(&e)),
            None => Ok(()),
        }
    }
}

fn convert_row(row: &MySqlRow) -> Row {
    let mut out = Row::new();
    for (index, column) in row.columns().iter().enumerate() {
        out.push(column.name(), decode_column(row, index));
    }
    out
}

/// Decode one column into the loosest matching value
fn decode_column(row: &MySqlRow, index: usize) -> SqlValue {
    match row.try_get_raw(index) {
        Ok(raw) if raw.is_null() => return SqlValue::Null,
        Ok(_) => {}
        Err(_) => return SqlValue::Null,
    }

    if let Ok(v) = row.try_get::<i64, _>(index) {
        return SqlValue::Int(v);
    }
    if let Ok(v) = row.try_get::<u64, _>(index) {
        return SqlValue::UInt(v);
    }
    if let Ok(v) = row.try_get::<f64, _>(index) {
        return SqlValue::Float(v);
    }
    if let Ok(v) = row.try_get::<String, _>(index) {
        return SqlValue::Text(v);
    }
    if let Ok(v) = row.try_get::<Vec<u8>, _>(index) {
        return match String::from_utf8(v) {
            Ok(text) => SqlValue::Text(text),
            Err(e) => SqlValue::Bytes(e.into_bytes()),
        };
    }
    // DECIMAL and similar travel as ASCII on the wire
    row.try_get_unchecked::<String, _>(index)
        .map(SqlValue::Text)
        .unwrap_or(SqlValue::Null)
}

/// Map a driver error onto the structured kinds callers branch on
pub fn classify(err: &sqlx::Error) -> DbError {
    match err {
        sqlx::Error::Io(io) => {
            let kind = match io.kind() {
                ErrorKind::ConnectionReset
                | ErrorKind::ConnectionAborted
                | ErrorKind::UnexpectedEof
                | ErrorKind::BrokenPipe
                | ErrorKind::NotConnected => DbErrorKind::ConnectionLost,
                ErrorKind::TimedOut => DbErrorKind::Timeout,
                _ => DbErrorKind::Unreachable,
            };
            DbError::new(kind, io.to_string())
        }
        sqlx::Error::Database(db) => {
            let message = db.message().to_string();
            match db.try_downcast_ref::<MySqlDatabaseError>() {
                Some(mysql) => {
                    let code = mysql.number();
                    DbError::new(kind_for_code(code), message).with_code(code)
                }
                None => DbError::new(DbErrorKind::Server, message),
            }
        }
        sqlx::Error::Protocol(message) => message_only(message),
        sqlx::Error::Configuration(e) => DbError::new(DbErrorKind::Configuration, e.to_string()),
        sqlx::Error::Tls(e) => DbError::new(DbErrorKind::Configuration, e.to_string()),
        other => message_only(&other.to_string()),
    }
}

fn message_only(message: &str) -> DbError {
    let kind = if message.contains(LOST_CONNECTION_MESSAGE) {
        DbErrorKind::ConnectionLost
    } else {
        DbErrorKind::Protocol
    };
    DbError::new(kind, message)
}

/// Error number to kind
pub fn kind_for_code(code: u16) -> DbErrorKind {
    if CONNECTION_LOST_CODES.contains(&code) {
        DbErrorKind::ConnectionLost
    } else if UNREACHABLE_CODES.contains(&code) {
        DbErrorKind::Unreachable
    } else if PERMISSION_CODES.contains(&code) {
        DbErrorKind::PermissionDenied
    } else {
        match code {
            1045 => DbErrorKind::Authentication,
            1064 => DbErrorKind::Syntax,
            _ => DbErrorKind::Server,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_kind_for_code() {
        assert_eq!(kind_for_code(2013), DbErrorKind::ConnectionLost);
        assert_eq!(kind_for_code(2006), DbErrorKind::ConnectionLost);
        assert_eq!(kind_for_code(1053), DbErrorKind::ConnectionLost);
        assert_eq!(kind_for_code(1927), DbErrorKind::ConnectionLost);
        assert_eq!(kind_for_code(2003), DbErrorKind::Unreachable);
        assert_eq!(kind_for_code(1045), DbErrorKind::Authentication);
        assert_eq!(kind_for_code(1227), DbErrorKind::PermissionDenied);
        assert_eq!(kind_for_code(1064), DbErrorKind::Syntax);
        // ER_CLONE_DONOR (donor rejected the request)
        assert_eq!(kind_for_code(3862), DbErrorKind::Server);
    }

    #[test]
    fn test_io_reset_is_connection_lost() {
        let err = sqlx::Error::Io(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
        assert!(classify(&err).is_connection_lost());

        let err = sqlx::Error::Io(io::Error::new(io::ErrorKind::UnexpectedEof, "eof"));
        assert!(classify(&err).is_connection_lost());
    }

    #[test]
    fn test_io_refused_is_unreachable() {
        let err = sqlx::Error::Io(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
        assert_eq!(classify(&err).kind, DbErrorKind::Unreachable);
    }

    #[test]
    fn test_protocol_message_matching_is_narrow() {
        let err = sqlx::Error::Protocol("Lost connection to MySQL server during query".into());
        assert!(classify(&err).is_connection_lost());

        let err = sqlx::Error::Protocol("connection lost somewhere".into());
        assert_eq!(classify(&err).kind, DbErrorKind::Protocol);
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let connector = MySqlConnector::new(Duration::from_secs(2));
        let endpoint = Endpoint::new("127.0.0.1", 1, "nobody", "");
        let err = match connector.connect(&endpoint).await {
            Ok(_) => panic!("connect to port 1 should fail"),
            Err(e) => e,
        };
        assert!(matches!(
            err.kind,
            DbErrorKind::Unreachable | DbErrorKind::Timeout | DbErrorKind::ConnectionLost
        ));
    }
}
