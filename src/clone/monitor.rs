//! Progress monitor
//!
//! Polls the two status surfaces of the target until the clone reaches an
//! outcome. The surfaces disagree, lag and occasionally go silent while the
//! server settles after its restart, so every cycle is interpreted by a pure
//! state machine ([`MonitorState`]) and only the async loop touches the
//! network.
//!
//! # Design
//!
//! ```text
//!   clone_progress rows? ──yes──> sum work, ratchet percentage
//!          │ no
//!          └──> clone_status: error 0 and not "Not Started"/"In Progress" ──> Completed
//!                            otherwise: diagnostic (once), keep polling
//!
//!   clone_status (every cycle): "Completed" ──> Completed (percent 100)
//!                               "Failed" or error != 0 ──> report once,
//!                                   Failed after the configured number of cycles
//! ```

use reclone_core_interface::{DbConnection, DbError, DbErrorKind, DbResult};
use reclone_core_resilience::{sleep_or_cancel, Deadline, ResilienceError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::advance;
use super::reconnect::Reconnector;
use super::session::{CloneSession, CloneState};
use super::sql::{self, ProgressRow, StatusRecord};
use crate::config::MonitorSettings;
use crate::error::{CloneError, Result};
use crate::events::{CloneEvent, EventPublisher};

/// What one poll cycle saw
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PollSample {
    pub progress: Vec<ProgressRow>,
    pub status: Option<StatusRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Continue,
    Completed,
    Failed { message: String },
}

/// Interpretation of one cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollOutcome {
    /// Summed `(completed, estimated)` work, when the estimate is nonzero
    pub work: Option<(u64, u64)>,

    /// Stage currently in progress
    pub stage: Option<String>,

    /// Set on the first failure sighting only
    pub failure_report: Option<(i64, String)>,

    /// Set the first time the surfaces are inconclusive
    pub diagnostic: Option<String>,

    pub verdict: Verdict,
}

/// Pure interpretation of successive samples
#[derive(Debug, Clone)]
pub struct MonitorState {
    failure_confirmations: u32,
    failure_sightings: u32,
    failure_reported: bool,
    ambiguity_reported: bool,
}

impl MonitorState {
    pub fn new(failure_confirmations: u32) -> Self {
        Self {
            failure_confirmations: failure_confirmations.max(1),
            failure_sightings: 0,
            failure_reported: false,
            ambiguity_reported: false,
        }
    }

    pub fn observe(&mut self, sample: &PollSample) -> PollOutcome {
        let mut outcome = PollOutcome {
            work: None,
            stage: None,
            failure_report: None,
            diagnostic: None,
            verdict: Verdict::Continue,
        };

        if sample.progress.is_empty() {
            match &sample.status {
                Some(status)
                    if status.error_no == 0 && !status.is_intermediate() && !status.is_failed() =>
                {
                    outcome.verdict = Verdict::Completed;
                    return outcome;
                }
                Some(status) if status.error_no != 0 || status.is_failed() => {}
                inconclusive => {
                    if !self.ambiguity_reported {
                        self.ambiguity_reported = true;
                        let state = inconclusive
                            .as_ref()
                            .map(|s| format!("status is '{}'", s.state))
                            .unwrap_or_else(|| "no status recorded".to_string());
                        outcome.diagnostic = Some(format!(
                            "No clone progress data available yet ({}); still polling",
                            state
                        ));
                    }
                }
            }
        } else {
            let (completed, estimated) =
                sample
                    .progress
                    .iter()
                    .fold((0u64, 0u64), |(c, e), row| {
                        (
                            c.saturating_add(row.work_completed),
                            e.saturating_add(row.work_estimated),
                        )
                    });
            if estimated > 0 {
                outcome.work = Some((completed, estimated));
            }
            outcome.stage = sample
                .progress
                .iter()
                .find(|row| row.state.eq_ignore_ascii_case("In Progress"))
                .map(|row| row.stage.clone());
        }

        match &sample.status {
            Some(status) if status.is_completed() && status.error_no == 0 => {
                outcome.verdict = Verdict::Completed;
            }
            Some(status) if status.is_failed() || status.error_no != 0 => {
                let message = status.failure_message();
                self.failure_sightings += 1;
                if !self.failure_reported {
                    self.failure_reported = true;
                    outcome.failure_report = Some((status.error_no, message.clone()));
                }
                if self.failure_sightings >= self.failure_confirmations {
                    outcome.verdict = Verdict::Failed { message };
                }
            }
            _ => self.failure_sightings = 0,
        }

        outcome
    }
}

pub struct ProgressMonitor<'a> {
    reconnector: &'a Reconnector<'a>,
    settings: &'a MonitorSettings,
    cancel: &'a CancellationToken,
    events: &'a EventPublisher,
}

impl<'a> ProgressMonitor<'a> {
    pub fn new(
        reconnector: &'a Reconnector<'a>,
        settings: &'a MonitorSettings,
        cancel: &'a CancellationToken,
        events: &'a EventPublisher,
    ) -> Self {
        Self {
            reconnector,
            settings,
            cancel,
            events,
        }
    }

    /// Poll until the clone completes, fails, times out or is cancelled.
    ///
    /// Completed, Failed and TimedOut are applied to the session here;
    /// cancellation is returned to the caller.
    pub async fn run(&self, session: &mut CloneSession) -> Result<CloneState> {
        let deadline = Deadline::after(self.settings.timeout());
        let mut state = MonitorState::new(self.settings.failure_confirmations);
        let mut consecutive_errors = 0u32;
        let mut cycles = 0u64;

        info!(
            poll_interval_secs = self.settings.poll_interval_secs,
            timeout_secs = ?self.settings.timeout_secs,
            "Monitoring clone progress"
        );

        loop {
            if self.cancel.is_cancelled() {
                return Err(CloneError::Cancelled);
            }
            if deadline.check().is_err() {
                return Err(self.time_out(session, deadline.limit_secs()));
            }

            cycles += 1;
            match self.poll_bounded(session, &deadline).await {
                Ok(sample) => {
                    consecutive_errors = 0;
                    let outcome = state.observe(&sample);
                    if let Some(result) = self.apply(session, outcome) {
                        debug!(cycles, "Monitoring finished");
                        return result;
                    }
                }
                Err(_) if deadline.is_expired() => {
                    return Err(self.time_out(session, deadline.limit_secs()));
                }
                Err(e) => {
                    consecutive_errors += 1;
                    warn!(error = %e, consecutive_errors, "Clone status query failed");
                    let dead = e.is_connection_lost() || e.kind == DbErrorKind::Timeout;
                    if dead || consecutive_errors >= self.settings.max_query_errors {
                        self.reestablish(session, &deadline).await?;
                        consecutive_errors = 0;
                    }
                }
            }

            let wait = match deadline.remaining() {
                Some(remaining) => remaining.min(self.settings.poll_interval()),
                None => self.settings.poll_interval(),
            };
            sleep_or_cancel(wait, self.cancel)
                .await
                .map_err(CloneError::from_reconnect)?;
        }
    }

    /// One poll, cut off at the query timeout or the monitoring deadline
    async fn poll_bounded(
        &self,
        session: &mut CloneSession,
        deadline: &Deadline,
    ) -> DbResult<PollSample> {
        let limit = match deadline.remaining() {
            Some(remaining) => remaining.min(self.settings.query_timeout()),
            None => self.settings.query_timeout(),
        };
        match tokio::time::timeout(limit, poll(session.target_conn.as_deref_mut())).await {
            Ok(polled) => polled,
            Err(_) => Err(DbError::new(
                DbErrorKind::Timeout,
                format!("clone status query did not answer within {}s", limit.as_secs()),
            )),
        }
    }

    /// Returns the final result once the verdict is terminal
    fn apply(&self, session: &mut CloneSession, outcome: PollOutcome) -> Option<Result<CloneState>> {
        if let Some((completed, estimated)) = outcome.work {
            if let Some(percent) = session.observe_progress(completed, estimated) {
                debug!(percent, completed, estimated, "Clone progress");
                self.events.publish(CloneEvent::Progress {
                    percent,
                    stage: outcome.stage.clone(),
                });
            }
        }

        if let Some(message) = outcome.diagnostic {
            warn!(message = %message, "Clone state ambiguous");
            self.events.diagnostic(message);
        }

        if let Some((code, message)) = outcome.failure_report {
            error!(code, message = %message, "Target reports clone failure");
            self.events.publish(CloneEvent::CloneFailureReported {
                code: Some(code).filter(|c| *c != 0),
                message,
            });
        }

        match outcome.verdict {
            Verdict::Continue => None,
            Verdict::Completed => {
                if let Some(percent) = session.force_complete() {
                    self.events.publish(CloneEvent::Progress {
                        percent,
                        stage: None,
                    });
                }
                info!("Clone completed");
                self.finish(session, CloneState::Completed);
                Some(Ok(CloneState::Completed))
            }
            Verdict::Failed { message } => {
                session.last_error = Some(message.clone());
                self.finish(session, CloneState::Failed);
                Some(Err(CloneError::CloneFailed { message }))
            }
        }
    }

    fn finish(&self, session: &mut CloneSession, state: CloneState) {
        advance(session, self.events, state);
        self.events
            .publish(CloneEvent::MonitorFinished { state });
    }

    fn time_out(&self, session: &mut CloneSession, secs: u64) -> CloneError {
        let err = CloneError::MonitorTimeout { secs };
        warn!(secs, "Clone monitoring timed out");
        session.last_error = Some(err.to_string());
        self.finish(session, CloneState::TimedOut);
        err
    }

    /// Replace a failing handle with a fresh one, giving up at the deadline
    async fn reestablish(&self, session: &mut CloneSession, deadline: &Deadline) -> Result<()> {
        if let Some(mut conn) = session.target_conn.take() {
            let _ = conn.close().await;
        }
        self.events
            .diagnostic("Lost the monitoring connection; reconnecting to target");

        let policy = self.reconnector.policy().immediate();
        let target = session.target.clone();
        let acquired = match deadline
            .bound(self.reconnector.acquire(&target, &policy))
            .await
        {
            Ok(acquired) => acquired,
            Err(_) => return Err(self.time_out(session, deadline.limit_secs())),
        };
        match acquired {
            Ok(attempted) => {
                session.retry_count += attempted.attempts;
                session.target_conn = Some(attempted.value);
                self.events.publish(CloneEvent::Reconnected {
                    attempts: attempted.attempts,
                });
                Ok(())
            }
            Err(ResilienceError::Exhausted { attempts, .. }) => {
                session.retry_count += attempts;
                let message = format!(
                    "lost connection to target during monitoring; no reconnect after {} attempts",
                    attempts
                );
                session.last_error = Some(message.clone());
                self.finish(session, CloneState::Failed);
                Err(CloneError::TargetOffline { attempts })
            }
            Err(other) => Err(CloneError::from_reconnect(other)),
        }
    }
}

/// One cycle: progress surface, then status surface
async fn poll(conn: Option<&mut (dyn DbConnection + 'static)>) -> DbResult<PollSample> {
    let conn = conn.ok_or_else(|| {
        DbError::new(DbErrorKind::ConnectionLost, "no monitoring connection")
    })?;
    let progress = conn
        .execute_query(sql::CLONE_PROGRESS, &[])
        .await?
        .iter()
        .map(ProgressRow::from_row)
        .collect();
    let status = conn
        .query_one(sql::CLONE_STATUS, &[])
        .await?
        .map(|row| StatusRecord::from_row(&row));
    Ok(PollSample { progress, status })
}
