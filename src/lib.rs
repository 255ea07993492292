/*!
 * reclone - MySQL clone-plugin recovery orchestrator
 *
 * Rebuilds a target MySQL instance from a healthy donor with the server's
 * own `CLONE INSTANCE` facility:
 * - Pre-flight checks of connectivity, plugin state and target quiescence
 * - Donor authorisation and dispatch of the clone directive
 * - Bounded reconnection while the target restarts itself
 * - Progress monitoring with a monotonic percentage, optional deadline and
 *   operator interrupt
 * - Post-hoc validation against the server's recorded clone status
 * - An optional progress watcher on the target host, stopped at teardown
 *
 * Author: Shane Wall <shaneawall@gmail.com>
 */

pub mod backend;
pub mod cli_progress;
pub mod cli_style;
pub mod clone;
pub mod config;
pub mod error;
pub mod events;
pub mod logging;

// Re-export commonly used types
pub use clone::{CloneReport, CloneSession, CloneState, Orchestrator};
pub use config::{CloneConfig, LogLevel};
pub use error::{CloneError, ErrorCategory, Result};
pub use events::{CloneEvent, EventPublisher, EventSubscriber};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(VERSION, env!("CARGO_PKG_VERSION"));
    }
}
