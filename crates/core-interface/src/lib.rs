//! reclone Core Interface: collaborator abstractions
//!
//! The clone orchestrator never talks to a MySQL driver or an SSH library
//! directly. It depends on the narrow traits defined here, so the state
//! machine can be driven against real servers or against in-memory doubles.
//!
//! # Collaborators
//!
//! 1. **Database command executor** ([`DbConnector`] / [`DbConnection`]):
//!    opens a connection to an [`Endpoint`], runs queries returning generic
//!    [`Row`]s and statements returning an affected-row count, and reports
//!    whether it is still connected.
//! 2. **Remote command executor** ([`RemoteConnector`] / [`RemoteSession`]):
//!    opens an authenticated shell session on a host and launches detached
//!    background commands.
//!
//! # Error classification
//!
//! Failures from the database executor carry a structured [`DbErrorKind`].
//! The orchestrator relies on [`DbErrorKind::ConnectionLost`] to tell the
//! expected disconnect of a clone directive apart from every other failure,
//! so adapters must map transport signals onto kinds rather than leave the
//! caller to inspect message text.
//!
//! # Example
//!
//! ```rust,no_run
//! use reclone_core_interface::{DbConnector, DbResult, Endpoint};
//!
//! async fn server_version<C: DbConnector>(connector: &C, endpoint: &Endpoint) -> DbResult<Option<String>> {
//!     let mut conn = connector.connect(endpoint).await?;
//!     let row = conn.query_one("SELECT @@version AS version", &[]).await?;
//!     conn.close().await?;
//!     Ok(row.and_then(|r| r.get_string("version")))
//! }
//! ```

mod db;
mod endpoint;
mod remote;
mod value;

pub use db::{DbConnection, DbConnector, DbError, DbErrorKind, DbResult};
pub use endpoint::{Endpoint, DEFAULT_PORT};
pub use remote::{
    shell_quote, ExecOutput, RemoteConnector, RemoteError, RemoteResult, RemoteSession,
};
pub use value::{Row, SqlValue};
