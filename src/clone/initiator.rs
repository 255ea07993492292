//! Clone initiation
//!
//! Prepares the target, launches the watcher and sends `CLONE INSTANCE`. The
//! target restarts itself once the data has been copied, which severs our
//! connection; that disconnect is the expected outcome of a dispatch, not an
//! error.

use reclone_core_interface::{DbConnector, DbError, DbErrorKind};
use tracing::{debug, error, info, warn};

use super::advance;
use super::session::{CloneSession, CloneState};
use super::sql;
use super::watcher::RemoteWatcher;
use crate::error::{CloneError, InitiationStep, Result};
use crate::events::{CloneEvent, EventPublisher};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitiateResult {
    pub dispatched: bool,

    /// The directive ended in the expected connection loss rather than returning
    pub disconnected: bool,
}

pub struct Initiator<'a> {
    connector: &'a dyn DbConnector,
    watcher: Option<RemoteWatcher<'a>>,
    events: &'a EventPublisher,
}

impl<'a> Initiator<'a> {
    pub fn new(
        connector: &'a dyn DbConnector,
        watcher: Option<RemoteWatcher<'a>>,
        events: &'a EventPublisher,
    ) -> Self {
        Self {
            connector,
            watcher,
            events,
        }
    }

    /// Run the initiation steps. On success the session is Reconnecting; on
    /// failure it is Aborted (nothing changed yet) or Failed.
    pub async fn initiate(&self, session: &mut CloneSession) -> Result<InitiateResult> {
        if let Err(err) = self.prepare(session).await {
            session.last_error = Some(err.to_string());
            advance(session, self.events, CloneState::Aborted);
            return Err(err);
        }

        if let Some(watcher) = &self.watcher {
            watcher.launch(session).await;
        }

        advance(session, self.events, CloneState::Cloning);
        self.dispatch(session).await
    }

    /// Steps that must succeed before anything irreversible happens
    async fn prepare(&self, session: &mut CloneSession) -> Result<()> {
        if session.target_conn.is_none() {
            let conn = self
                .connector
                .connect(&session.target)
                .await
                .map_err(|source| CloneError::Initiation {
                    step: InitiationStep::ReadDataDir,
                    source,
                })?;
            session.target_conn = Some(conn);
        }
        let conn = session
            .target_conn
            .as_mut()
            .ok_or_else(|| CloneError::Config("target connection missing".to_string()))?;

        let datadir = conn
            .query_one(sql::DATADIR, &[])
            .await
            .map_err(|source| CloneError::Initiation {
                step: InitiationStep::ReadDataDir,
                source,
            })?
            .and_then(|row| row.get_string("DATADIR"));
        if let Some(path) = &datadir {
            info!(datadir = %path, "Target data directory (contents will be replaced)");
            self.events
                .publish(CloneEvent::DataDirectory { path: path.clone() });
        }
        session.datadir = datadir;

        let statement = sql::set_donor_list(&session.source);
        debug!(statement = %statement, "Setting donor list");
        conn.execute_statement(&statement, &[])
            .await
            .map_err(|source| CloneError::Initiation {
                step: InitiationStep::SetDonorList,
                source,
            })?;

        Ok(())
    }

    /// Send the directive exactly once and classify how it ended
    async fn dispatch(&self, session: &mut CloneSession) -> Result<InitiateResult> {
        let donor = session.source.address();
        info!(
            donor = %donor,
            statement = %sql::clone_instance_redacted(&session.source),
            "Dispatching clone"
        );
        self.events.publish(CloneEvent::DispatchStarted {
            donor: donor.clone(),
        });

        let statement = sql::clone_instance(&session.source);
        let outcome = match session.target_conn.as_mut() {
            Some(conn) => conn.execute_statement(&statement, &[]).await,
            None => Err(DbError::new(
                DbErrorKind::Protocol,
                "target connection missing before dispatch",
            )),
        };

        match outcome {
            Ok(_) => {
                // The target still restarts after a directive that returned
                info!("Clone directive returned; waiting for target restart");
                self.drop_target_conn(session);
                advance(session, self.events, CloneState::Reconnecting);
                Ok(InitiateResult {
                    dispatched: true,
                    disconnected: false,
                })
            }
            Err(e) if e.is_connection_lost() => {
                info!(error = %e, "Target dropped the connection as expected");
                self.events.publish(CloneEvent::ConnectionDropped {
                    detail: e.to_string(),
                });
                self.drop_target_conn(session);
                advance(session, self.events, CloneState::Reconnecting);
                Ok(InitiateResult {
                    dispatched: true,
                    disconnected: true,
                })
            }
            Err(e) => {
                error!(error = %e, code = ?e.code, "Clone dispatch failed");
                session.last_error = Some(e.to_string());
                advance(session, self.events, CloneState::Failed);
                Err(CloneError::Dispatch(e))
            }
        }
    }

    /// The handle is dead after a restart; it is never reused
    fn drop_target_conn(&self, session: &mut CloneSession) {
        if session.target_conn.take().is_some() {
            debug!("Discarded pre-restart target connection");
        } else {
            warn!("No target connection to discard");
        }
    }
}
