//! Clone session: the state machine and the resources of one run
//!
//! # States
//!
//! ```text
//!   Init ──> PreflightPassed ──> Cloning ──> Reconnecting ──> Monitoring ──> Completed
//!    │              │               │              │               ├───────> Failed
//!    └──> Aborted <─┘               └──> Failed <──┘               └───────> TimedOut
//!
//!   every non-terminal state ──> Cancelled
//! ```
//!
//! Aborted means nothing on either server was changed. Terminal states are
//! final; the progress percentage freezes when one is entered.

use chrono::{DateTime, Utc};
use reclone_core_interface::{DbConnection, Endpoint, RemoteSession};
use reclone_core_resilience::ProgressRatchet;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

/// Ceiling on each teardown step so a dead peer cannot stall the exit
const TEARDOWN_STEP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CloneState {
    Init,
    PreflightPassed,
    Cloning,
    Reconnecting,
    Monitoring,
    Completed,
    Failed,
    Aborted,
    TimedOut,
    Cancelled,
}

impl CloneState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloneState::Init => "init",
            CloneState::PreflightPassed => "preflight_passed",
            CloneState::Cloning => "cloning",
            CloneState::Reconnecting => "reconnecting",
            CloneState::Monitoring => "monitoring",
            CloneState::Completed => "completed",
            CloneState::Failed => "failed",
            CloneState::Aborted => "aborted",
            CloneState::TimedOut => "timed_out",
            CloneState::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CloneState::Completed
                | CloneState::Failed
                | CloneState::Aborted
                | CloneState::TimedOut
                | CloneState::Cancelled
        )
    }

    pub fn can_transition_to(&self, to: CloneState) -> bool {
        use CloneState::*;

        if to == Cancelled {
            return !self.is_terminal();
        }
        matches!(
            (self, to),
            (Init, PreflightPassed)
                | (Init, Aborted)
                | (PreflightPassed, Cloning)
                | (PreflightPassed, Aborted)
                | (Cloning, Reconnecting)
                | (Cloning, Failed)
                | (Reconnecting, Monitoring)
                | (Reconnecting, Failed)
                | (Monitoring, Completed)
                | (Monitoring, Failed)
                | (Monitoring, TimedOut)
        )
    }
}

impl fmt::Display for CloneState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded state change
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateTransition {
    pub from: CloneState,
    pub to: CloneState,
    pub at: DateTime<Utc>,
}

/// Detached watcher process on the target host
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WatcherHandle {
    pub host: String,
    pub pid: u32,
    pub log_path: String,
}

/// Everything one clone run owns; created once and torn down on every exit path
pub struct CloneSession {
    pub source: Endpoint,
    pub target: Endpoint,
    pub source_conn: Option<Box<dyn DbConnection>>,
    pub target_conn: Option<Box<dyn DbConnection>>,
    pub shell: Option<Box<dyn RemoteSession>>,
    pub watcher: Option<WatcherHandle>,
    pub last_error: Option<String>,
    pub retry_count: u32,
    pub datadir: Option<String>,
    state: CloneState,
    progress: ProgressRatchet,
    transitions: Vec<StateTransition>,
}

impl CloneSession {
    pub fn new(source: Endpoint, target: Endpoint) -> Self {
        Self {
            source,
            target,
            source_conn: None,
            target_conn: None,
            shell: None,
            watcher: None,
            last_error: None,
            retry_count: 0,
            datadir: None,
            state: CloneState::Init,
            progress: ProgressRatchet::new(),
            transitions: Vec::new(),
        }
    }

    pub fn state(&self) -> CloneState {
        self.state
    }

    pub fn transitions(&self) -> &[StateTransition] {
        &self.transitions
    }

    pub fn percent(&self) -> u8 {
        self.progress.percent()
    }

    /// Move to `to`; illegal moves are refused and leave the state unchanged
    pub fn transition(&mut self, to: CloneState) -> Option<StateTransition> {
        if !self.state.can_transition_to(to) {
            warn!(from = %self.state, to = %to, "Refusing illegal clone state transition");
            return None;
        }

        let transition = StateTransition {
            from: self.state,
            to,
            at: Utc::now(),
        };
        debug!(from = %self.state, to = %to, "Clone state transition");

        self.state = to;
        if to.is_terminal() {
            self.progress.freeze();
        }
        self.transitions.push(transition.clone());
        Some(transition)
    }

    /// Record a progress sample; only meaningful while monitoring
    pub fn observe_progress(&mut self, completed: u64, estimated: u64) -> Option<u8> {
        if self.state != CloneState::Monitoring {
            return None;
        }
        self.progress.observe(completed, estimated)
    }

    /// Jump to 100% ahead of the Completed transition
    pub fn force_complete(&mut self) -> Option<u8> {
        if self.state != CloneState::Monitoring {
            return None;
        }
        self.progress.force_complete()
    }

    /// Release every remote resource. Safe to call more than once.
    pub async fn teardown(&mut self) {
        if let Some(handle) = self.watcher.take() {
            match self.shell.as_ref() {
                Some(shell) => {
                    match tokio::time::timeout(TEARDOWN_STEP_TIMEOUT, shell.terminate(handle.pid))
                        .await
                    {
                        Ok(Ok(())) => debug!(pid = handle.pid, host = %handle.host, "Watcher stopped"),
                        Ok(Err(e)) => warn!(pid = handle.pid, error = %e, "Failed to stop watcher"),
                        Err(_) => warn!(pid = handle.pid, "Timed out stopping watcher"),
                    }
                }
                None => warn!(pid = handle.pid, "No shell session left to stop watcher"),
            }
        }

        if let Some(shell) = self.shell.take() {
            match tokio::time::timeout(TEARDOWN_STEP_TIMEOUT, shell.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!(error = %e, "Error closing shell session"),
                Err(_) => debug!("Timed out closing shell session"),
            }
        }

        for (role, conn) in [
            ("source", self.source_conn.take()),
            ("target", self.target_conn.take()),
        ] {
            if let Some(mut conn) = conn {
                match tokio::time::timeout(TEARDOWN_STEP_TIMEOUT, conn.close()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => debug!(role, error = %e, "Error closing connection"),
                    Err(_) => debug!(role, "Timed out closing connection"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reclone_core_interface::DEFAULT_PORT;

    fn session() -> CloneSession {
        CloneSession::new(
            Endpoint::new("db-a", DEFAULT_PORT, "u", "p"),
            Endpoint::new("db-c", DEFAULT_PORT, "u", "p"),
        )
    }

    #[test]
    fn test_happy_path() {
        let mut s = session();
        for to in [
            CloneState::PreflightPassed,
            CloneState::Cloning,
            CloneState::Reconnecting,
            CloneState::Monitoring,
            CloneState::Completed,
        ] {
            let t = s.transition(to).unwrap();
            assert_eq!(t.to, to);
        }
        assert_eq!(s.transitions().len(), 5);
        assert!(s.state().is_terminal());
    }

    #[test]
    fn test_aborted_only_before_dispatch() {
        assert!(CloneState::Init.can_transition_to(CloneState::Aborted));
        assert!(CloneState::PreflightPassed.can_transition_to(CloneState::Aborted));
        assert!(!CloneState::Cloning.can_transition_to(CloneState::Aborted));
        assert!(!CloneState::Monitoring.can_transition_to(CloneState::Aborted));
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut s = session();
        s.transition(CloneState::Aborted).unwrap();
        assert!(s.transition(CloneState::PreflightPassed).is_none());
        assert!(s.transition(CloneState::Cancelled).is_none());
        assert_eq!(s.state(), CloneState::Aborted);
    }

    #[test]
    fn test_timed_out_only_from_monitoring() {
        assert!(CloneState::Monitoring.can_transition_to(CloneState::TimedOut));
        assert!(!CloneState::Reconnecting.can_transition_to(CloneState::TimedOut));
        assert!(!CloneState::Completed.can_transition_to(CloneState::Failed));
    }

    #[test]
    fn test_progress_only_while_monitoring() {
        let mut s = session();
        assert_eq!(s.observe_progress(50, 100), None);

        s.transition(CloneState::PreflightPassed);
        s.transition(CloneState::Cloning);
        s.transition(CloneState::Reconnecting);
        s.transition(CloneState::Monitoring);
        assert_eq!(s.observe_progress(50, 100), Some(50));
        assert_eq!(s.observe_progress(20, 100), None);

        s.transition(CloneState::Failed);
        assert_eq!(s.observe_progress(90, 100), None);
        assert_eq!(s.percent(), 50);
    }

    #[test]
    fn test_state_serializes_snake_case() {
        let json = serde_json::to_string(&CloneState::TimedOut).unwrap();
        assert_eq!(json, "\"timed_out\"");
    }
}
