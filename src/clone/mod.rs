/*!
 * Clone orchestration
 *
 * One run drives a single MySQL clone from pre-flight checks to post-hoc
 * validation:
 *
 * ```text
 * Init ─> PreflightPassed ─> Cloning ─> Reconnecting ─> Monitoring ─> Completed
 *   │           │               │            │              ├──> Failed
 *   └─> Aborted └─> Aborted     └─> Failed   └─> Failed     └──> TimedOut
 *
 *   any non-terminal state ─> Cancelled
 * ```
 *
 * Each phase lives in its own module and mutates the shared [`CloneSession`];
 * [`Orchestrator`] sequences them and guarantees teardown.
 */

pub mod initiator;
pub mod monitor;
pub mod orchestrator;
pub mod preflight;
pub mod reconnect;
pub mod session;
pub mod sql;
pub mod validator;
pub mod watcher;


pub use initiator::{InitiateResult, Initiator};
pub use monitor::{MonitorState, PollOutcome, PollSample, ProgressMonitor, Verdict};
pub use orchestrator::{CloneReport, Orchestrator};
pub use preflight::{ActiveSession, Preflight, PreflightIssue, PreflightReport, Role};
pub use reconnect::Reconnector;
pub use session::{CloneSession, CloneState, StateTransition, WatcherHandle};
pub use sql::{ProgressRow, ServerIdentity, StatusRecord};
pub use validator::{ValidationResult, Validator};
pub use watcher::RemoteWatcher;

use crate::events::{CloneEvent, EventPublisher};

/// Apply a transition and publish it. Returns false if the move was refused.
pub(crate) fn advance(session: &mut CloneSession, events: &EventPublisher, to: CloneState) -> bool {
    match session.transition(to) {
        Some(t) => {
            events.publish(CloneEvent::PhaseChanged {
                from: t.from,
                to: t.to,
            });
            true
        }
        None => false,
    }
}
