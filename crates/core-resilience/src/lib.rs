//! reclone Core Resilience: pure-logic fault tolerance primitives
//!
//! # Overview
//!
//! Building blocks for driving an operation whose remote side disappears
//! and reappears on its own schedule:
//!
//! - **Fixed retry**: a fixed warm-up wait followed by a bounded number of
//!   attempts at a fixed interval, abortable through a cancellation token
//! - **Progress ratchet**: a percentage that never moves backward and can be
//!   frozen once the tracked operation is over
//! - **Deadline**: an optional overall ceiling on a polling phase
//!
//! # Key Principles
//!
//! This crate is **pure logic** with zero knowledge of MySQL, SSH or any
//! other protocol. All waits go through `tokio::time`, so callers can test
//! them with a paused clock.
//!
//! ```text
//!   initial_wait        interval        interval
//! ├──────────────┼─try 1─┼────────┼─try 2─┼────────┼─try N─┤
//!                    ✗                 ✗                ✓ / exhausted
//! ```
//!
//! # Usage Example
//!
//! ```no_run
//! use reclone_core_resilience::{retry_fixed, RetryPolicy};
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() {
//! let policy = RetryPolicy::new(Duration::from_secs(5), 30, Duration::from_secs(2));
//! let cancel = CancellationToken::new();
//!
//! let result = retry_fixed(&policy, &cancel, |attempt| async move {
//!     if attempt < 3 { Err("not yet") } else { Ok(attempt) }
//! })
//! .await;
//! # let _ = result;
//! # }
//! ```

pub mod deadline;
pub mod error;
pub mod ratchet;
pub mod retry;

pub use deadline::{sleep_or_cancel, Deadline};
pub use error::ResilienceError;
pub use ratchet::ProgressRatchet;
pub use retry::{retry_fixed, Attempted, RetryPolicy};
