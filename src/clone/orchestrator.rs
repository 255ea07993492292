//! Sequencing of one clone run
//!
//! The orchestrator owns the [`CloneSession`] and drives it through the
//! phases in order. Whatever happens, including an operator interrupt,
//! teardown runs before [`Orchestrator::run`] returns.
//!
//! Only one run may target a given server at a time: the donor list set
//! during initiation is a server-global variable, so two concurrent runs
//! against the same target would overwrite each other's setting. Nothing
//! here enforces that.

use chrono::{DateTime, Utc};
use reclone_core_interface::{DbConnector, RemoteConnector};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::advance;
use super::initiator::Initiator;
use super::monitor::ProgressMonitor;
use super::preflight::{Preflight, PreflightReport};
use super::reconnect::Reconnector;
use super::session::{CloneSession, CloneState, StateTransition, WatcherHandle};
use super::validator::{ValidationResult, Validator};
use super::watcher::RemoteWatcher;
use crate::config::CloneConfig;
use crate::error::{CloneError, Result, EXIT_SUCCESS};
use crate::events::EventPublisher;

/// Summary of a finished run
#[derive(Debug, Clone, Serialize)]
pub struct CloneReport {
    pub source: String,
    pub target: String,
    pub final_state: CloneState,
    pub percent: u8,
    pub retry_count: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub datadir: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub watcher: Option<WatcherHandle>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub preflight: Option<PreflightReport>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationResult>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_category: Option<String>,

    pub exit_code: i32,
    pub transitions: Vec<StateTransition>,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

impl CloneReport {
    pub fn succeeded(&self) -> bool {
        self.exit_code == EXIT_SUCCESS
    }
}

/// Artifacts collected while driving the session
#[derive(Default)]
struct RunRecord {
    preflight: Option<PreflightReport>,
    validation: Option<ValidationResult>,
}

pub struct Orchestrator {
    config: CloneConfig,
    connector: Arc<dyn DbConnector>,
    remote: Option<Arc<dyn RemoteConnector>>,
    events: EventPublisher,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        config: CloneConfig,
        connector: Arc<dyn DbConnector>,
        remote: Option<Arc<dyn RemoteConnector>>,
        events: EventPublisher,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            connector,
            remote,
            events,
            cancel,
        }
    }

    /// Token that interrupts the run when cancelled
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Drive one clone to a final state, then tear down
    pub async fn run(&self) -> CloneReport {
        let started_at = Utc::now();
        let clock = Instant::now();
        let mut session = CloneSession::new(self.config.source.clone(), self.config.target.clone());
        let mut record = RunRecord::default();

        info!(
            source = %session.source,
            target = %session.target,
            force = self.config.preflight.force,
            "Starting clone run"
        );

        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(CloneError::Cancelled),
            result = self.drive(&mut session, &mut record) => result,
        };

        if let Err(err) = &result {
            if err.is_cancelled() {
                warn!(state = %session.state(), "Clone run interrupted");
                if session.last_error.is_none() {
                    session.last_error = Some(err.to_string());
                }
                advance(&mut session, &self.events, CloneState::Cancelled);
            } else {
                error!(error = %err, category = %err.category(), state = %session.state(), "Clone run failed");
            }
        }

        let watcher = session.watcher.clone();
        session.teardown().await;

        let report = CloneReport {
            source: session.source.to_string(),
            target: session.target.to_string(),
            final_state: session.state(),
            percent: session.percent(),
            retry_count: session.retry_count,
            datadir: session.datadir.clone(),
            watcher,
            preflight: record.preflight,
            validation: record.validation,
            error: result.as_ref().err().map(|e| e.to_string()),
            error_category: result.as_ref().err().map(|e| e.category().to_string()),
            exit_code: result.as_ref().err().map(CloneError::exit_code).unwrap_or(EXIT_SUCCESS),
            transitions: session.transitions().to_vec(),
            started_at,
            elapsed_ms: clock.elapsed().as_millis() as u64,
        };

        info!(
            state = %report.final_state,
            percent = report.percent,
            retries = report.retry_count,
            exit_code = report.exit_code,
            "Clone run finished"
        );
        report
    }

    async fn drive(&self, session: &mut CloneSession, record: &mut RunRecord) -> Result<()> {
        let connector = self.connector.as_ref();

        let report = Preflight::new(connector, &self.config.preflight, &self.events)
            .validate(session)
            .await;
        record.preflight = Some(report.clone());
        if !report.can_proceed(self.config.preflight.force) {
            let err = CloneError::Preflight {
                reasons: report.reasons(),
            };
            session.last_error = Some(err.to_string());
            advance(session, &self.events, CloneState::Aborted);
            return Err(err);
        }
        if !report.ok() {
            warn!(
                reasons = report.issues.len(),
                "Proceeding despite active sessions on target (forced)"
            );
        }
        advance(session, &self.events, CloneState::PreflightPassed);

        if self.config.preflight_only {
            info!("Pre-flight only; nothing dispatched");
            return Ok(());
        }

        let watcher = match (&self.remote, self.config.watcher.enabled) {
            (Some(remote), true) => Some(RemoteWatcher::new(
                remote.as_ref(),
                &self.config.watcher,
                &self.events,
            )),
            _ => None,
        };
        Initiator::new(connector, watcher, &self.events)
            .initiate(session)
            .await?;

        let reconnector = Reconnector::new(
            connector,
            self.config.reconnect.policy(),
            &self.cancel,
            &self.events,
        );
        reconnector.reconnect(session).await?;

        let monitored = ProgressMonitor::new(
            &reconnector,
            &self.config.monitor,
            &self.cancel,
            &self.events,
        )
        .run(session)
        .await;

        match monitored {
            Ok(_) => {
                let query_timeout = self.config.monitor.query_timeout();
                let validation = Validator::new(connector, query_timeout, &self.events)
                    .validate(session)
                    .await;
                let ok = validation.ok;
                let message = validation.message.clone();
                record.validation = Some(validation);
                if ok {
                    Ok(())
                } else {
                    session.last_error = Some(message.clone());
                    Err(CloneError::ValidationFailed { message })
                }
            }
            Err(err @ CloneError::CloneFailed { .. }) => {
                let query_timeout = self.config.monitor.query_timeout();
                record.validation = Some(
                    Validator::new(connector, query_timeout, &self.events)
                        .validate(session)
                        .await,
                );
                Err(err)
            }
            Err(err) => Err(err),
        }
    }
}
