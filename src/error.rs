/*!
 * Error types for reclone
 */

use std::fmt;

use reclone_core_interface::{DbError, RemoteError};
use reclone_core_resilience::ResilienceError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CloneError>;

/// Exit code constants for structured process exit
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_CLONE_FAILED: i32 = 1;
pub const EXIT_FATAL: i32 = 2;
pub const EXIT_DISPATCH: i32 = 3;
pub const EXIT_VALIDATION: i32 = 4;
pub const EXIT_TIMEOUT: i32 = 5;
pub const EXIT_INTERRUPTED: i32 = 130;

/// Step of the initiation sequence that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitiationStep {
    ReadDataDir,
    SetDonorList,
}

impl fmt::Display for InitiationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitiationStep::ReadDataDir => write!(f, "reading @@datadir"),
            InitiationStep::SetDonorList => write!(f, "setting clone_valid_donor_list"),
        }
    }
}

#[derive(Error, Debug, Clone)]
pub enum CloneError {
    /// One or more pre-flight checks failed; nothing was changed
    #[error("Pre-flight checks failed: {}", reasons.join("; "))]
    Preflight { reasons: Vec<String> },

    /// A preparatory statement failed before the clone was dispatched
    #[error("Clone initiation failed while {step}: {source}")]
    Initiation {
        step: InitiationStep,
        #[source]
        source: DbError,
    },

    /// The clone directive was rejected for a reason other than the expected disconnect
    #[error("Clone dispatch failed: {0}")]
    Dispatch(DbError),

    /// The target never accepted a connection after the restart
    #[error("Target did not come back online after {attempts} attempts")]
    TargetOffline { attempts: u32 },

    /// The server reported the clone as failed
    #[error("Clone failed: {message}")]
    CloneFailed { message: String },

    /// The monitor ceiling passed without a terminal status
    #[error("Clone monitoring timed out after {secs}s")]
    MonitorTimeout { secs: u64 },

    /// Operator interrupt
    #[error("Interrupted")]
    Cancelled,

    /// Clone reported completion but the result could not be confirmed
    #[error("Clone validation failed: {message}")]
    ValidationFailed { message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Db(#[from] DbError),

    #[error("Remote command error: {0}")]
    Remote(#[from] RemoteError),
}

impl CloneError {
    /// Get the process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CloneError::Preflight { .. } | CloneError::Config(_) => EXIT_FATAL,
            // Nothing destructive has happened yet; same class as pre-flight
            CloneError::Initiation { .. } => EXIT_FATAL,
            CloneError::Dispatch(_) => EXIT_DISPATCH,
            CloneError::TargetOffline { .. } | CloneError::CloneFailed { .. } => EXIT_CLONE_FAILED,
            CloneError::MonitorTimeout { .. } => EXIT_TIMEOUT,
            CloneError::Cancelled => EXIT_INTERRUPTED,
            CloneError::ValidationFailed { .. } => EXIT_VALIDATION,
            CloneError::Db(_) | CloneError::Remote(_) => EXIT_CLONE_FAILED,
        }
    }

    /// Whether the target may have been modified when this error surfaced
    pub fn is_after_dispatch(&self) -> bool {
        matches!(
            self,
            CloneError::TargetOffline { .. }
                | CloneError::CloneFailed { .. }
                | CloneError::MonitorTimeout { .. }
                | CloneError::ValidationFailed { .. }
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, CloneError::Cancelled)
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            CloneError::Preflight { .. } => ErrorCategory::Preflight,
            CloneError::Initiation { .. } | CloneError::Dispatch(_) => ErrorCategory::Dispatch,
            CloneError::TargetOffline { .. } => ErrorCategory::Retry,
            CloneError::CloneFailed { .. } => ErrorCategory::Operational,
            CloneError::MonitorTimeout { .. } => ErrorCategory::Timeout,
            CloneError::Cancelled => ErrorCategory::Interrupted,
            CloneError::ValidationFailed { .. } => ErrorCategory::Validation,
            CloneError::Config(_) => ErrorCategory::Configuration,
            CloneError::Db(e) if e.is_retriable() => ErrorCategory::Connectivity,
            CloneError::Db(_) => ErrorCategory::Database,
            CloneError::Remote(_) => ErrorCategory::Remote,
        }
    }

    /// Map a resilience failure from the reconnect phase
    pub fn from_reconnect(err: ResilienceError) -> Self {
        match err {
            ResilienceError::Exhausted { attempts, .. } => CloneError::TargetOffline { attempts },
            ResilienceError::Cancelled => CloneError::Cancelled,
            ResilienceError::DeadlineExceeded { secs } => CloneError::MonitorTimeout { secs },
            ResilienceError::InvalidPolicy(msg) => CloneError::Config(msg),
        }
    }
}

/// Error categories for logging and the summary report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Endpoint reachability
    Connectivity,
    /// Capability or quiescence checks
    Preflight,
    /// Statements issued before and during dispatch
    Dispatch,
    /// Reconnect exhaustion
    Retry,
    /// Failure reported by the server during the clone
    Operational,
    Timeout,
    Interrupted,
    Validation,
    Configuration,
    Database,
    Remote,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Connectivity => write!(f, "connectivity"),
            ErrorCategory::Preflight => write!(f, "preflight"),
            ErrorCategory::Dispatch => write!(f, "dispatch"),
            ErrorCategory::Retry => write!(f, "retry"),
            ErrorCategory::Operational => write!(f, "operational"),
            ErrorCategory::Timeout => write!(f, "timeout"),
            ErrorCategory::Interrupted => write!(f, "interrupted"),
            ErrorCategory::Validation => write!(f, "validation"),
            ErrorCategory::Configuration => write!(f, "configuration"),
            ErrorCategory::Database => write!(f, "database"),
            ErrorCategory::Remote => write!(f, "remote"),
        }
    }
}
