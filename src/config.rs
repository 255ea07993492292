/*!
 * Configuration types for reclone
 */

use reclone_core_interface::Endpoint;
use reclone_core_resilience::RetryPolicy;
use secrecy::SecretString;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::clone::sql;
use crate::error::{CloneError, Result};

/// Main configuration for a clone run
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CloneConfig {
    /// Donor instance
    #[serde(default)]
    pub source: Endpoint,

    /// Recipient instance; its data is replaced
    #[serde(default)]
    pub target: Endpoint,

    #[serde(default)]
    pub ssh: SshSettings,

    #[serde(default)]
    pub preflight: PreflightSettings,

    #[serde(default)]
    pub reconnect: ReconnectSettings,

    #[serde(default)]
    pub monitor: MonitorSettings,

    #[serde(default)]
    pub watcher: WatcherSettings,

    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Write JSON logs to this file instead of the terminal
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Verbose output (forces debug logging)
    #[serde(default)]
    pub verbose: bool,

    /// Run the pre-flight checks and stop
    #[serde(default)]
    pub preflight_only: bool,
}

/// SSH access to the target host, used by the remote watcher
#[derive(Debug, Clone, Deserialize)]
pub struct SshSettings {
    /// Login user; falls back to the local user name
    #[serde(default)]
    pub user: Option<String>,

    #[serde(default = "default_ssh_port")]
    pub port: u16,

    /// Private key file; the SSH agent is used when neither key nor password is set
    #[serde(default)]
    pub key_path: Option<PathBuf>,

    #[serde(default, deserialize_with = "deserialize_optional_secret")]
    pub password: Option<SecretString>,

    #[serde(default = "default_ssh_timeout")]
    pub timeout_secs: u64,
}

/// Which target sessions count as "system" during the quiescence check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreflightSettings {
    #[serde(default = "default_ignored_commands")]
    pub ignored_commands: Vec<String>,

    #[serde(default = "default_ignored_users")]
    pub ignored_users: Vec<String>,

    /// Ignore other sessions of the account reclone connects as
    #[serde(default = "default_true")]
    pub ignore_own_user: bool,

    /// Proceed despite active sessions on the target
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectSettings {
    /// Wait after dispatch before the first attempt
    #[serde(default = "default_initial_wait")]
    pub initial_wait_secs: u64,

    #[serde(default = "default_reconnect_attempts")]
    pub attempts: u32,

    #[serde(default = "default_reconnect_interval")]
    pub interval_secs: u64,

    /// Ceiling on each handshake
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorSettings {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Give up after this many seconds of monitoring; unset polls indefinitely
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Consecutive cycles that must report "Failed" before the clone is declared failed
    #[serde(default = "default_failure_confirmations")]
    pub failure_confirmations: u32,

    /// Consecutive query errors tolerated before the connection is re-established
    #[serde(default = "default_max_query_errors")]
    pub max_query_errors: u32,

    /// Ceiling on one status query; a query that outlives it counts as a lost connection
    #[serde(default = "default_query_timeout")]
    pub query_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Remote file the watcher appends to
    #[serde(default = "default_watcher_log")]
    pub log_path: String,

    #[serde(default = "default_watcher_interval")]
    pub interval_secs: u64,

    /// `mysql` client binary on the target host
    #[serde(default = "default_mysql_client")]
    pub mysql_client: String,
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(format!("unknown log level '{}'", other)),
        }
    }
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            user: None,
            port: default_ssh_port(),
            key_path: None,
            password: None,
            timeout_secs: default_ssh_timeout(),
        }
    }
}

impl SshSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for PreflightSettings {
    fn default() -> Self {
        Self {
            ignored_commands: default_ignored_commands(),
            ignored_users: default_ignored_users(),
            ignore_own_user: true,
            force: false,
        }
    }
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            initial_wait_secs: default_initial_wait(),
            attempts: default_reconnect_attempts(),
            interval_secs: default_reconnect_interval(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl ReconnectSettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_secs(self.initial_wait_secs),
            self.attempts,
            Duration::from_secs(self.interval_secs),
        )
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            timeout_secs: None,
            failure_confirmations: default_failure_confirmations(),
            max_query_errors: default_max_query_errors(),
            query_timeout_secs: default_query_timeout(),
        }
    }
}

impl MonitorSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            log_path: default_watcher_log(),
            interval_secs: default_watcher_interval(),
            mysql_client: default_mysql_client(),
        }
    }
}

// Default value functions for serde
fn default_true() -> bool {
    true
}

fn default_ssh_port() -> u16 {
    22
}

fn default_ssh_timeout() -> u64 {
    30
}

fn default_ignored_commands() -> Vec<String> {
    vec!["Daemon".to_string(), "Sleep".to_string()]
}

fn default_ignored_users() -> Vec<String> {
    vec!["event_scheduler".to_string(), "system user".to_string()]
}

fn default_initial_wait() -> u64 {
    5
}

fn default_reconnect_attempts() -> u32 {
    30
}

fn default_reconnect_interval() -> u64 {
    2
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_poll_interval() -> u64 {
    2
}

fn default_failure_confirmations() -> u32 {
    2
}

fn default_query_timeout() -> u64 {
    30
}

fn default_max_query_errors() -> u32 {
    5
}

fn default_watcher_log() -> String {
    "/tmp/clone_progress.log".to_string()
}

fn default_watcher_interval() -> u64 {
    1
}

fn default_mysql_client() -> String {
    "mysql".to_string()
}

fn deserialize_optional_secret<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.map(SecretString::from))
}

impl CloneConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            CloneError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        toml::from_str(&contents)
            .map_err(|e| CloneError::Config(format!("Invalid config {}: {}", path.display(), e)))
    }

    /// Reject settings that can never lead to a successful run
    pub fn validate(&self) -> Result<()> {
        for (role, endpoint) in [("source", &self.source), ("target", &self.target)] {
            if endpoint.host.trim().is_empty() {
                return Err(CloneError::Config(format!("{} host is required", role)));
            }
            if endpoint.port == 0 {
                return Err(CloneError::Config(format!("{} port must be nonzero", role)));
            }
            if endpoint.user.trim().is_empty() {
                return Err(CloneError::Config(format!("{} user is required", role)));
            }
        }

        // the donor's credentials are spliced into CLONE INSTANCE as literals
        for (field, value) in [
            ("host", self.source.host.as_str()),
            ("user", self.source.user.as_str()),
            ("password", self.source.password()),
        ] {
            if !sql::is_quotable(value) {
                return Err(CloneError::Config(format!(
                    "source {} must not contain a backslash or NUL character",
                    field
                )));
            }
        }

        if self.reconnect.attempts == 0 {
            return Err(CloneError::Config(
                "reconnect.attempts must be at least 1".to_string(),
            ));
        }
        if self.reconnect.interval_secs == 0 {
            return Err(CloneError::Config(
                "reconnect.interval_secs must be nonzero".to_string(),
            ));
        }
        if self.reconnect.connect_timeout_secs == 0 {
            return Err(CloneError::Config(
                "reconnect.connect_timeout_secs must be nonzero".to_string(),
            ));
        }
        if self.monitor.poll_interval_secs == 0 {
            return Err(CloneError::Config(
                "monitor.poll_interval_secs must be nonzero".to_string(),
            ));
        }
        if self.monitor.timeout_secs == Some(0) {
            return Err(CloneError::Config(
                "monitor.timeout_secs must be nonzero when set".to_string(),
            ));
        }
        if self.monitor.failure_confirmations == 0 {
            return Err(CloneError::Config(
                "monitor.failure_confirmations must be at least 1".to_string(),
            ));
        }
        if self.monitor.query_timeout_secs == 0 {
            return Err(CloneError::Config(
                "monitor.query_timeout_secs must be nonzero".to_string(),
            ));
        }
        if self.monitor.max_query_errors == 0 {
            return Err(CloneError::Config(
                "monitor.max_query_errors must be at least 1".to_string(),
            ));
        }
        if self.watcher.enabled && self.watcher.interval_secs == 0 {
            return Err(CloneError::Config(
                "watcher.interval_secs must be nonzero".to_string(),
            ));
        }
        if self.source.host == self.target.host && self.source.port == self.target.port {
            return Err(CloneError::Config(
                "source and target must be different instances".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reclone_core_interface::DEFAULT_PORT;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn valid() -> CloneConfig {
        CloneConfig {
            source: Endpoint::new("db-a", DEFAULT_PORT, "clone_user", "pw"),
            target: Endpoint::new("db-c", DEFAULT_PORT, "clone_user", "pw"),
            ..Default::default()
        }
    }

    #[test]
    fn test_default_config() {
        let config = CloneConfig::default();
        assert_eq!(config.reconnect.attempts, 30);
        assert_eq!(config.reconnect.interval_secs, 2);
        assert_eq!(config.reconnect.initial_wait_secs, 5);
        assert_eq!(config.monitor.poll_interval_secs, 2);
        assert_eq!(config.monitor.timeout_secs, None);
        assert_eq!(config.monitor.query_timeout(), Duration::from_secs(30));
        assert!(config.watcher.enabled);
        assert_eq!(config.watcher.log_path, "/tmp/clone_progress.log");
        assert_eq!(config.preflight.ignored_commands, vec!["Daemon", "Sleep"]);
        assert!(config.preflight.ignore_own_user);
        assert!(!config.preflight.force);
        assert_eq!(config.ssh.port, 22);
    }

    #[test]
    fn test_validate() {
        assert!(valid().validate().is_ok());

        let mut config = valid();
        config.source.host.clear();
        assert!(config.validate().is_err());

        let mut config = valid();
        config.reconnect.attempts = 0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.monitor.poll_interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.monitor.query_timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.target.host = "db-a".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_backslash_in_donor_credentials() {
        let mut config = valid();
        config.source = Endpoint::new("db-a", DEFAULT_PORT, "clone_user", r"pa\ss");
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("source password"));

        let mut config = valid();
        config.source.user = "clone\0user".into();
        assert!(config.validate().is_err());

        // quotes are fine; they are doubled
        let mut config = valid();
        config.source = Endpoint::new("db-a", DEFAULT_PORT, "clone_user", "it's");
        assert!(config.validate().is_ok());

        // the target's credentials never reach a SQL literal
        let mut config = valid();
        config.target = Endpoint::new("db-c", DEFAULT_PORT, "clone_user", r"pa\ss");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
log_level = "debug"

[source]
host = "db-a"
user = "clone_user"
password = "secret"

[target]
host = "db-c"
port = 3306
user = "clone_user"

[ssh]
user = "ops"
key_path = "/home/ops/.ssh/id_ed25519"

[monitor]
timeout_secs = 3600

[preflight]
ignored_users = ["event_scheduler", "system user", "monitoring"]
"#
        )
        .unwrap();

        let config = CloneConfig::from_file(file.path()).unwrap();
        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.source.port, DEFAULT_PORT);
        assert_eq!(config.source.password(), "secret");
        assert_eq!(config.target.port, 3306);
        assert_eq!(config.target.password(), "");
        assert_eq!(config.ssh.user.as_deref(), Some("ops"));
        assert!(config.ssh.password.is_none());
        assert_eq!(config.monitor.timeout(), Some(Duration::from_secs(3600)));
        assert_eq!(config.preflight.ignored_users.len(), 3);
        assert_eq!(config.preflight.ignored_commands, vec!["Daemon", "Sleep"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file_rejects_garbage() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[source\nhost = ").unwrap();
        let err = CloneConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, CloneError::Config(_)));
    }

    #[test]
    fn test_log_level_parse() {
        assert_eq!("WARN".parse::<LogLevel>(), Ok(LogLevel::Warn));
        assert!("loud".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_reconnect_policy() {
        let policy = ReconnectSettings::default().policy();
        assert_eq!(policy.initial_wait, Duration::from_secs(5));
        assert_eq!(policy.max_attempts, 30);
        assert_eq!(policy.interval, Duration::from_secs(2));
    }
}
