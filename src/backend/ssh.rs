//! SSH remote command executor
//!
//! Runs shell commands on the target host over SSH. `ssh2` is blocking, so
//! every call is moved onto the blocking thread pool.

use async_trait::async_trait;
use reclone_core_interface::{ExecOutput, RemoteConnector, RemoteError, RemoteResult, RemoteSession};
use secrecy::{ExposeSecret, SecretString};
use ssh2::Session;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

use crate::config::SshSettings;

/// SSH authentication method
#[derive(Debug, Clone)]
pub enum SshAuth {
    /// Password authentication
    Password(SecretString),

    /// Public key authentication with private key file
    KeyFile {
        key_path: PathBuf,
        passphrase: Option<SecretString>,
    },

    /// SSH agent authentication
    Agent,
}

/// Opens SSH sessions with one fixed set of credentials
#[derive(Debug, Clone)]
pub struct SshConnector {
    pub username: String,
    pub port: u16,
    pub auth: SshAuth,
    pub timeout_secs: u64,
}

impl SshConnector {
    pub fn new(username: impl Into<String>, auth: SshAuth) -> Self {
        Self {
            username: username.into(),
            port: 22,
            auth,
            timeout_secs: 30,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Key file wins over password; with neither, the agent is used
    pub fn from_settings(settings: &SshSettings) -> Self {
        let auth = match (&settings.key_path, &settings.password) {
            (Some(key_path), _) => SshAuth::KeyFile {
                key_path: key_path.clone(),
                passphrase: None,
            },
            (None, Some(password)) => SshAuth::Password(password.clone()),
            (None, None) => SshAuth::Agent,
        };
        let username = settings.user.clone().unwrap_or_else(local_username);

        Self::new(username, auth)
            .with_port(settings.port)
            .with_timeout(settings.timeout_secs)
    }

    fn connect_blocking(&self, host: &str) -> RemoteResult<Session> {
        let addr = format!("{}:{}", host, self.port);
        let connection_failed = |message: String| RemoteError::ConnectionFailed {
            host: host.to_string(),
            message,
        };
        let auth_failed = |message: String| RemoteError::AuthenticationFailed {
            host: host.to_string(),
            message,
        };

        let tcp = TcpStream::connect(&addr).map_err(|e| connection_failed(e.to_string()))?;
        let timeout = std::time::Duration::from_secs(self.timeout_secs);
        tcp.set_read_timeout(Some(timeout)).ok();
        tcp.set_write_timeout(Some(timeout)).ok();

        let mut session = Session::new()
            .map_err(|e| connection_failed(format!("Failed to create SSH session: {}", e)))?;
        session.set_tcp_stream(tcp);
        session.set_timeout(timeout_millis(self.timeout_secs));
        session
            .handshake()
            .map_err(|e| connection_failed(e.to_string()))?;

        match &self.auth {
            SshAuth::Password(password) => {
                session
                    .userauth_password(&self.username, password.expose_secret())
                    .map_err(|e| auth_failed(format!("Password authentication failed: {}", e)))?;
            }
            SshAuth::KeyFile {
                key_path,
                passphrase,
            } => {
                let pass: Option<&str> = passphrase.as_ref().map(|p| p.expose_secret());
                session
                    .userauth_pubkey_file(&self.username, None, key_path, pass)
                    .map_err(|e| auth_failed(format!("Key file authentication failed: {}", e)))?;
            }
            SshAuth::Agent => {
                let mut agent = session
                    .agent()
                    .map_err(|e| auth_failed(format!("Failed to connect to SSH agent: {}", e)))?;
                agent
                    .connect()
                    .map_err(|e| auth_failed(format!("Failed to connect to SSH agent: {}", e)))?;
                agent
                    .list_identities()
                    .map_err(|e| auth_failed(format!("Failed to list SSH agent identities: {}", e)))?;
                let identities = agent
                    .identities()
                    .map_err(|e| auth_failed(format!("Failed to get SSH agent identities: {}", e)))?;

                let authenticated = identities
                    .iter()
                    .any(|identity| agent.userauth(&self.username, identity).is_ok());
                if !authenticated {
                    return Err(auth_failed("No valid identity found in SSH agent".to_string()));
                }
            }
        }

        if !session.authenticated() {
            return Err(auth_failed("Authentication failed".to_string()));
        }

        Ok(session)
    }
}

fn local_username() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "root".to_string())
}

#[async_trait]
impl RemoteConnector for SshConnector {
    async fn open(&self, host: &str) -> RemoteResult<Box<dyn RemoteSession>> {
        let connector = self.clone();
        let host_owned = host.to_string();
        let session = tokio::task::spawn_blocking(move || connector.connect_blocking(&host_owned))
            .await
            .map_err(|e| RemoteError::Exec(format!("Task join error: {}", e)))??;

        debug!(host, user = %self.username, "SSH session established");
        Ok(Box::new(SshShell {
            host: host.to_string(),
            session: Arc::new(session),
        }))
    }
}

/// Authenticated SSH session on one host
pub struct SshShell {
    host: String,
    session: Arc<Session>,
}

fn exec_blocking(session: &Session, command: &str, input: &str) -> RemoteResult<ExecOutput> {
    let exec_err = |e: ssh2::Error| RemoteError::Exec(e.to_string());

    let mut channel = session.channel_session().map_err(exec_err)?;
    channel.exec(command).map_err(exec_err)?;
    if !input.is_empty() {
        channel
            .write_all(input.as_bytes())
            .map_err(|e| RemoteError::Exec(e.to_string()))?;
    }
    channel.send_eof().map_err(exec_err)?;

    let mut stdout = String::new();
    channel
        .read_to_string(&mut stdout)
        .map_err(|e| RemoteError::Exec(e.to_string()))?;
    let mut stderr = String::new();
    channel
        .stderr()
        .read_to_string(&mut stderr)
        .map_err(|e| RemoteError::Exec(e.to_string()))?;

    channel.wait_close().map_err(exec_err)?;
    let exit_status = channel.exit_status().map_err(exec_err)?;

    Ok(ExecOutput {
        exit_status,
        stdout,
        stderr,
    })
}

#[async_trait]
impl RemoteSession for SshShell {
    fn host(&self) -> &str {
        &self.host
    }

    async fn exec_with_input(&self, command: &str, input: &str) -> RemoteResult<ExecOutput> {
        let session = Arc::clone(&self.session);
        let command = command.to_string();
        let input = input.to_string();
        tokio::task::spawn_blocking(move || exec_blocking(&session, &command, &input))
            .await
            .map_err(|e| RemoteError::Exec(format!("Task join error: {}", e)))?
    }

    async fn close(&self) -> RemoteResult<()> {
        let session = Arc::clone(&self.session);
        tokio::task::spawn_blocking(move || {
            session
                .disconnect(None, "Closing connection", None)
                .map_err(|e| RemoteError::Exec(e.to_string()))
        })
        .await
        .map_err(|e| RemoteError::Exec(format!("Task join error: {}", e)))?
    }
}

/// libssh2 takes its blocking timeout in milliseconds as a `u32`
fn timeout_millis(secs: u64) -> u32 {
    u32::try_from(secs.saturating_mul(1000)).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_millis_saturates() {
        assert_eq!(timeout_millis(30), 30_000);
        assert_eq!(timeout_millis(4_294_967), 4_294_967_000);
        assert_eq!(timeout_millis(4_294_968), u32::MAX);
        assert_eq!(timeout_millis(u64::MAX), u32::MAX);
    }

    #[test]
    fn test_from_settings_prefers_key_file() {
        let settings = SshSettings {
            user: Some("ops".into()),
            port: 2222,
            key_path: Some(PathBuf::from("/home/ops/.ssh/id_ed25519")),
            password: Some(SecretString::from("pw".to_string())),
            timeout_secs: 15,
        };

        let connector = SshConnector::from_settings(&settings);
        assert_eq!(connector.username, "ops");
        assert_eq!(connector.port, 2222);
        assert_eq!(connector.timeout_secs, 15);
        assert!(matches!(connector.auth, SshAuth::KeyFile { .. }));
    }

    #[test]
    fn test_from_settings_password_then_agent() {
        let settings = SshSettings {
            password: Some(SecretString::from("pw".to_string())),
            ..Default::default()
        };
        assert!(matches!(
            SshConnector::from_settings(&settings).auth,
            SshAuth::Password(_)
        ));

        let connector = SshConnector::from_settings(&SshSettings::default());
        assert!(matches!(connector.auth, SshAuth::Agent));
        assert_eq!(connector.port, 22);
        assert!(!connector.username.is_empty());
    }

    #[tokio::test]
    async fn test_open_unreachable_host_fails() {
        let connector = SshConnector::new("nobody", SshAuth::Agent)
            .with_port(1)
            .with_timeout(2);
        let result = connector.open("127.0.0.1").await;
        assert!(matches!(result, Err(RemoteError::ConnectionFailed { .. })));
    }
}
