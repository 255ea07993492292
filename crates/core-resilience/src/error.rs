//! Error types for resilience primitives

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResilienceError {
    /// Every attempt allowed by the policy failed
    #[error("All {attempts} attempts exhausted; last error: {last_error}")]
    Exhausted { attempts: u32, last_error: String },

    /// The cancellation token fired while waiting or retrying
    #[error("Operation cancelled")]
    Cancelled,

    /// An overall deadline passed
    #[error("Deadline of {secs}s exceeded")]
    DeadlineExceeded { secs: u64 },

    /// The policy itself is unusable (for example zero attempts)
    #[error("Invalid policy: {0}")]
    InvalidPolicy(String),
}

impl ResilienceError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ResilienceError::Cancelled)
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, ResilienceError::Exhausted { .. })
    }
}
