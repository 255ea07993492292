//! Remote watcher: a secondary view of clone progress on the target host
//!
//! The watcher is a plain shell loop that polls `clone_progress` with the
//! `mysql` client and appends to a log file. It keeps running while the
//! target restarts, so an operator can still follow the clone during the
//! window in which the SQL surface is unavailable to us. Its output is never
//! read back; the authoritative signal is the progress monitor.

use reclone_core_interface::{shell_quote, Endpoint, RemoteConnector};
use tracing::{info, warn};

use super::session::{CloneSession, WatcherHandle};
use crate::config::WatcherSettings;
use crate::events::{CloneEvent, EventPublisher};

const WATCH_QUERY: &str =
    "SELECT STAGE, STATE, ESTIMATE, DATA, BEGIN_TIME, END_TIME FROM performance_schema.clone_progress";

/// Shell loop run on the target host. Credentials other than the password
/// appear here; the password reaches the loop through `MYSQL_PWD`, fed over
/// the session's standard input.
pub fn watcher_script(target: &Endpoint, settings: &WatcherSettings) -> String {
    format!(
        "while :; do date '+%Y-%m-%d %H:%M:%S'; {} -h 127.0.0.1 -P {} -u {} -t -e {}; sleep {}; done",
        shell_quote(&settings.mysql_client),
        target.port,
        shell_quote(&target.user),
        shell_quote(WATCH_QUERY),
        settings.interval_secs
    )
}

pub struct RemoteWatcher<'a> {
    remote: &'a dyn RemoteConnector,
    settings: &'a WatcherSettings,
    events: &'a EventPublisher,
}

impl<'a> RemoteWatcher<'a> {
    pub fn new(
        remote: &'a dyn RemoteConnector,
        settings: &'a WatcherSettings,
        events: &'a EventPublisher,
    ) -> Self {
        Self {
            remote,
            settings,
            events,
        }
    }

    /// Start the loop on the target host. Failures are reported and swallowed.
    pub async fn launch(&self, session: &mut CloneSession) -> Option<WatcherHandle> {
        match self.try_launch(session).await {
            Ok(handle) => {
                info!(host = %handle.host, pid = handle.pid, log = %handle.log_path, "Remote watcher started");
                self.events.publish(CloneEvent::WatcherLaunched {
                    host: handle.host.clone(),
                    pid: handle.pid,
                    log_path: handle.log_path.clone(),
                });
                session.watcher = Some(handle.clone());
                Some(handle)
            }
            Err(reason) => {
                warn!(reason = %reason, "Remote watcher unavailable; continuing without it");
                self.events
                    .publish(CloneEvent::WatcherUnavailable { reason });
                None
            }
        }
    }

    async fn try_launch(&self, session: &mut CloneSession) -> Result<WatcherHandle, String> {
        if session.shell.is_none() {
            let shell = self
                .remote
                .open(&session.target.host)
                .await
                .map_err(|e| e.to_string())?;
            session.shell = Some(shell);
        }
        let shell = session
            .shell
            .as_ref()
            .ok_or_else(|| "no shell session".to_string())?;

        let script = watcher_script(&session.target, self.settings);
        let pid = shell
            .run_detached_with_env(
                &[("MYSQL_PWD", session.target.password())],
                &script,
                &self.settings.log_path,
            )
            .await
            .map_err(|e| e.to_string())?;

        Ok(WatcherHandle {
            host: session.target.host.clone(),
            pid,
            log_path: self.settings.log_path.clone(),
        })
    }
}
