//! Concrete collaborators behind the `reclone-core-interface` traits
//!
//! - [`MySqlConnector`]: the database command executor, one dedicated sqlx
//!   connection per handle
//! - [`SshConnector`]: the remote command executor, used to run the progress
//!   watcher on the target host
//! - [`mock`]: scripted in-memory doubles of both, used by the tests and
//!   usable by anything embedding the orchestrator
//!
//! # Example
//!
//! ```no_run
//! use reclone::backend::MySqlConnector;
//! use reclone_core_interface::{DbConnector, Endpoint};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let connector = MySqlConnector::new(Duration::from_secs(10));
//!     let target = Endpoint::new("db-c", 33306, "clone_user", "secret");
//!     let mut conn = connector.connect(&target).await?;
//!     let row = conn.query_one("SELECT @@version AS VERSION", &[]).await?;
//!     println!("{:?}", row.and_then(|r| r.get_string("VERSION")));
//!     conn.close().await?;
//!     Ok(())
//! }
//! ```

pub mod mock;
mod mysql;
mod ssh;

pub use mysql::{classify, kind_for_code, MySqlConnector, MySqlHandle};
pub use ssh::{SshAuth, SshConnector, SshShell};
