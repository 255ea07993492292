//! Remote command executor abstraction

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RemoteError {
    #[error("Connection to {host} failed: {message}")]
    ConnectionFailed { host: String, message: String },

    #[error("Authentication to {host} failed: {message}")]
    AuthenticationFailed { host: String, message: String },

    #[error("Remote command failed: {0}")]
    Exec(String),

    #[error("Remote command exited with status {status}: {stderr}")]
    NonZeroExit { status: i32, stderr: String },

    #[error("Unexpected output from remote command: {0}")]
    InvalidOutput(String),
}

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Captured result of a remote command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_status == 0
    }
}

/// An authenticated shell session on one host
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Host this session is connected to
    fn host(&self) -> &str;

    /// Run a command to completion and capture its output
    async fn exec(&self, command: &str) -> RemoteResult<ExecOutput> {
        self.exec_with_input(command, "").await
    }

    /// Run a command with `input` on its standard input, then end of file
    async fn exec_with_input(&self, command: &str, input: &str) -> RemoteResult<ExecOutput>;

    /// Close the session
    async fn close(&self) -> RemoteResult<()>;

    /// Start `command` detached from the session, appending stdout and
    /// stderr to `output_path`, and return its process id.
    ///
    /// The process keeps running after the session closes.
    async fn run_detached(&self, command: &str, output_path: &str) -> RemoteResult<u32> {
        self.run_detached_with_env(&[], command, output_path).await
    }

    /// Like [`run_detached`](Self::run_detached), with extra environment
    /// variables for the detached process.
    ///
    /// Values are written to the command's standard input and exported by
    /// the remote shell, so they appear on no command line, local or remote.
    async fn run_detached_with_env(
        &self,
        env: &[(&str, &str)],
        command: &str,
        output_path: &str,
    ) -> RemoteResult<u32> {
        let mut exports = String::new();
        let mut input = String::new();
        for (key, value) in env {
            if value.contains(['\n', '\r']) {
                return Err(RemoteError::Exec(format!(
                    "value of {} spans more than one line",
                    key
                )));
            }
            exports.push_str(&format!("IFS= read -r {key} || exit 1; export {key}; "));
            input.push_str(value);
            input.push('\n');
        }
        let wrapped = format!(
            "{}nohup sh -c {} >> {} 2>&1 < /dev/null & echo $!",
            exports,
            shell_quote(command),
            shell_quote(output_path)
        );
        let output = self.exec_with_input(&wrapped, &input).await?;
        if !output.success() {
            return Err(RemoteError::NonZeroExit {
                status: output.exit_status,
                stderr: output.stderr,
            });
        }
        let pid = output
            .stdout
            .lines()
            .last()
            .and_then(|line| line.trim().parse::<u32>().ok());
        pid.ok_or(RemoteError::InvalidOutput(output.stdout))
    }

    /// Stop a process previously started with [`run_detached`](Self::run_detached)
    async fn terminate(&self, pid: u32) -> RemoteResult<()> {
        let output = self.exec(&format!("kill {} 2>/dev/null || true", pid)).await?;
        if output.success() {
            Ok(())
        } else {
            Err(RemoteError::NonZeroExit {
                status: output.exit_status,
                stderr: output.stderr,
            })
        }
    }
}

/// Opens shell sessions; credentials are owned by the connector
#[async_trait]
pub trait RemoteConnector: Send + Sync {
    async fn open(&self, host: &str) -> RemoteResult<Box<dyn RemoteSession>>;
}

/// Quote a string for POSIX `sh` using single quotes
pub fn shell_quote(raw: &str) -> String {
    format!("'{}'", raw.replace('\'', r"'\''"))
}
