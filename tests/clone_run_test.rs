/*!
 * Integration tests for complete clone runs
 *
 * These drive the orchestrator through the public API against the in-memory
 * MySQL and shell doubles and check what an operator would see: the final
 * report, its JSON form and the event stream feeding the terminal display.
 */

use std::sync::{Arc, Mutex};
use std::thread;

use reclone::backend::mock::{progress_rows, MockConnector, MockRemote, MockServer};
use reclone::cli_progress::CliProgressRenderer;
use reclone::clone::{CloneState, Orchestrator, StatusRecord};
use reclone::config::CloneConfig;
use reclone::error::{EXIT_FATAL, EXIT_SUCCESS};
use reclone::events::{CloneEvent, EventPublisher};
use reclone_core_interface::{DbError, DbErrorKind, Endpoint, DEFAULT_PORT};
use tokio_util::sync::CancellationToken;

fn config() -> CloneConfig {
    let mut config = CloneConfig {
        source: Endpoint::new("donor.example", DEFAULT_PORT, "clone_user", "pw"),
        target: Endpoint::new("recipient.example", DEFAULT_PORT, "clone_user", "pw"),
        ..Default::default()
    };
    config.reconnect.attempts = 10;
    config
}

fn target() -> MockServer {
    MockServer {
        restart_connect_failures: 1,
        ..Default::default()
    }
    .with_progress([
        Ok(progress_rows(&[(50, 100), (0, 100), (0, 100)])),
        Ok(progress_rows(&[(100, 100), (100, 100), (100, 100)])),
    ])
    .with_status([
        Ok(Some(StatusRecord::new("In Progress", 0))),
        Ok(Some(StatusRecord::new("Completed", 0))),
    ])
}

fn servers() -> MockConnector {
    let connector = MockConnector::new();
    connector.add_server("donor.example", MockServer::default());
    connector.add_server("recipient.example", target());
    connector
}

/// Test that a complete run produces a report that serializes for `--json`
#[tokio::test(start_paused = true)]
async fn test_report_serializes_to_json() {
    let connector = servers();
    let remote = MockRemote::new();

    let orchestrator = Orchestrator::new(
        config(),
        Arc::new(connector.clone()),
        Some(Arc::new(remote.clone())),
        EventPublisher::noop(),
        CancellationToken::new(),
    );
    let report = orchestrator.run().await;
    assert_eq!(report.final_state, CloneState::Completed);
    assert_eq!(report.exit_code, EXIT_SUCCESS);

    let json: serde_json::Value = serde_json::to_value(&report).unwrap();
    assert_eq!(json["final_state"], "completed");
    assert_eq!(json["percent"], 100);
    assert_eq!(json["exit_code"], 0);
    assert_eq!(json["source"], "clone_user@donor.example:33306");
    assert_eq!(json["validation"]["ok"], true);
    assert_eq!(json["validation"]["identity"]["version"], "8.0.36");
    assert!(json.get("error").is_none(), "No error on success");

    let states: Vec<&str> = json["transitions"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["to"].as_str().unwrap())
        .collect();
    assert_eq!(
        states,
        vec![
            "preflight_passed",
            "cloning",
            "reconnecting",
            "monitoring",
            "completed"
        ]
    );

    // Passwords never leave the process through the report
    let text = serde_json::to_string(&report).unwrap();
    assert!(!text.contains("\"pw\""));
}

/// Test that the event stream of a real run drives the terminal renderer to completion
#[tokio::test(start_paused = true)]
async fn test_events_reach_renderer() {
    let connector = servers();
    let remote = MockRemote::new();

    let (publisher, subscriber) = EventPublisher::unbounded();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = seen.clone();
    let (tee, tee_subscriber) = EventPublisher::unbounded();
    let forwarder = thread::spawn(move || {
        for event in subscriber.receiver().iter() {
            seen_clone.lock().unwrap().push(event.clone());
            tee.publish(event);
        }
    });
    let renderer = CliProgressRenderer::new(tee_subscriber, true).spawn();

    let orchestrator = Orchestrator::new(
        config(),
        Arc::new(connector),
        Some(Arc::new(remote)),
        publisher,
        CancellationToken::new(),
    );
    let report = orchestrator.run().await;
    drop(orchestrator);

    forwarder.join().unwrap();
    assert!(renderer.join().unwrap().is_ok());

    assert!(report.succeeded());
    let events = seen.lock().unwrap();
    assert!(matches!(
        events.first(),
        Some(CloneEvent::PreflightCheck { .. })
    ));
    assert!(events
        .iter()
        .any(|e| matches!(e, CloneEvent::WatcherLaunched { .. })));
    assert!(events.iter().any(|e| matches!(
        e,
        CloneEvent::MonitorFinished {
            state: CloneState::Completed
        }
    )));
    assert!(matches!(
        events.last(),
        Some(CloneEvent::Validated { ok: true, .. })
    ));
}

/// Test that a run without remote access skips the watcher but still clones
#[tokio::test(start_paused = true)]
async fn test_run_without_remote_access() {
    let connector = servers();

    let orchestrator = Orchestrator::new(
        config(),
        Arc::new(connector.clone()),
        None,
        EventPublisher::noop(),
        CancellationToken::new(),
    );
    let report = orchestrator.run().await;

    assert_eq!(report.final_state, CloneState::Completed);
    assert!(report.watcher.is_none());
    assert!(connector.saw_statement("recipient.example", "CLONE INSTANCE FROM"));
}

/// Test that an unreachable donor stops the run before anything is changed
#[tokio::test(start_paused = true)]
async fn test_unreachable_source_aborts() {
    let connector = MockConnector::new();
    connector.add_server(
        "donor.example",
        MockServer {
            connect_error: Some(
                DbError::new(
                    DbErrorKind::Unreachable,
                    "Can't connect to MySQL server on 'donor.example'",
                )
                .with_code(2003),
            ),
            ..Default::default()
        },
    );
    connector.add_server("recipient.example", target());
    let remote = MockRemote::new();

    let orchestrator = Orchestrator::new(
        config(),
        Arc::new(connector.clone()),
        Some(Arc::new(remote.clone())),
        EventPublisher::noop(),
        CancellationToken::new(),
    );
    let report = orchestrator.run().await;

    assert_eq!(report.final_state, CloneState::Aborted);
    assert_eq!(report.exit_code, EXIT_FATAL);
    assert_eq!(report.error_category.as_deref(), Some("preflight"));
    assert!(report.error.unwrap().contains("donor.example"));
    assert!(!connector.saw_statement("recipient.example", "SET GLOBAL"));
    assert_eq!(remote.opened(), 0);
}
