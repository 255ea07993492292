/*!
 * Clone event publisher for real-time operator feedback
 *
 * The orchestrator publishes every observable step of a run here. A renderer
 * on another thread turns the stream into terminal output, so the state
 * machine never blocks on the console.
 */

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};

use crate::clone::CloneState;

/// Clone event types
#[derive(Debug, Clone, PartialEq)]
pub enum CloneEvent {
    /// Session moved between states
    PhaseChanged { from: CloneState, to: CloneState },

    /// One pre-flight check finished
    PreflightCheck {
        check: String,
        passed: bool,
        detail: Option<String>,
    },

    /// All pre-flight checks finished
    PreflightCompleted { reasons: Vec<String>, forced: bool },

    /// Target data directory read during initiation
    DataDirectory { path: String },

    /// Remote watcher started on the target host
    WatcherLaunched {
        host: String,
        pid: u32,
        log_path: String,
    },

    /// Remote watcher could not be started; the run continues without it
    WatcherUnavailable { reason: String },

    /// `CLONE INSTANCE` sent to the target
    DispatchStarted { donor: String },

    /// The target dropped the control connection
    ConnectionDropped { detail: String },

    ReconnectAttempt { attempt: u32, max: u32 },

    Reconnected { attempts: u32 },

    /// Percentage advanced
    Progress { percent: u8, stage: Option<String> },

    /// Ambiguous or noteworthy condition the operator should know about
    Diagnostic { message: String },

    /// The server reported the clone as failed (published once)
    CloneFailureReported { code: Option<i64>, message: String },

    /// Monitoring reached a terminal state
    MonitorFinished { state: CloneState },

    /// Post-hoc validation result
    Validated { ok: bool, message: String },
}

/// Event publisher - sends events to subscribers
#[derive(Clone)]
pub struct EventPublisher {
    sender: Option<Sender<CloneEvent>>,
}

impl EventPublisher {
    /// Create a new publisher with bounded channel
    pub fn new(buffer_size: usize) -> (Self, EventSubscriber) {
        let (tx, rx) = bounded(buffer_size);
        (
            EventPublisher { sender: Some(tx) },
            EventSubscriber { receiver: rx },
        )
    }

    /// Create a new publisher with unbounded channel
    pub fn unbounded() -> (Self, EventSubscriber) {
        let (tx, rx) = unbounded();
        (
            EventPublisher { sender: Some(tx) },
            EventSubscriber { receiver: rx },
        )
    }

    /// Create a no-op publisher (for when output is disabled)
    pub fn noop() -> Self {
        EventPublisher { sender: None }
    }

    /// Publish an event
    pub fn publish(&self, event: CloneEvent) {
        if let Some(ref tx) = self.sender {
            // The renderer may already be gone during shutdown
            let _ = tx.send(event);
        }
    }

    pub fn diagnostic(&self, message: impl Into<String>) {
        self.publish(CloneEvent::Diagnostic {
            message: message.into(),
        });
    }
}

/// Event subscriber - receives events
pub struct EventSubscriber {
    receiver: Receiver<CloneEvent>,
}

impl EventSubscriber {
    pub fn receiver(&self) -> &Receiver<CloneEvent> {
        &self.receiver
    }

    /// Try to receive an event (non-blocking)
    pub fn try_recv(&self) -> Option<CloneEvent> {
        self.receiver.try_recv().ok()
    }

    /// Receive an event (blocking until every publisher is dropped)
    pub fn recv(&self) -> Option<CloneEvent> {
        self.receiver.recv().ok()
    }

    /// Drain everything published so far
    pub fn drain(&self) -> Vec<CloneEvent> {
        self.receiver.try_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publisher_subscriber() {
        let (publisher, subscriber) = EventPublisher::new(10);
        publisher.publish(CloneEvent::ReconnectAttempt { attempt: 1, max: 30 });

        match subscriber.try_recv() {
            Some(CloneEvent::ReconnectAttempt { attempt, max }) => {
                assert_eq!(attempt, 1);
                assert_eq!(max, 30);
            }
            other => panic!("Expected ReconnectAttempt, got {:?}", other),
        }
    }

    #[test]
    fn test_noop_publisher() {
        let publisher = EventPublisher::noop();
        publisher.diagnostic("nobody listening");
    }

    #[test]
    fn test_event_sequence() {
        let (publisher, subscriber) = EventPublisher::unbounded();
        publisher.publish(CloneEvent::DispatchStarted {
            donor: "db-a:33306".into(),
        });
        publisher.publish(CloneEvent::Progress {
            percent: 40,
            stage: Some("FILE COPY".into()),
        });
        publisher.publish(CloneEvent::MonitorFinished {
            state: CloneState::Completed,
        });

        let events = subscriber.drain();
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], CloneEvent::DispatchStarted { .. }));
        assert!(matches!(events[1], CloneEvent::Progress { percent: 40, .. }));
        assert!(matches!(
            events[2],
            CloneEvent::MonitorFinished {
                state: CloneState::Completed
            }
        ));
    }

    #[test]
    fn test_dropped_subscriber_is_ignored() {
        let (publisher, subscriber) = EventPublisher::new(1);
        drop(subscriber);
        publisher.diagnostic("still fine");
    }
}
