//! Remote execution on managed proxy hosts.
//!
//! The rollout core only talks to hosts through [`RemoteExecutor`]. Every
//! failure to reach or drive a host is surfaced as a [`RemoteError`] value so
//! callers can turn it into a structured result instead of a crash.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

mod shell;
mod ssh;

pub use shell::{quote, render_command};
pub use ssh::SshExecutor;

/// Captured result of one remote command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Convenience constructor for a successful command
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Convenience constructor for a failed command
    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Host {0} is not registered")]
    UnknownHost(String),

    #[error("Host {host} is unreachable: {message}")]
    Unreachable { host: String, message: String },

    #[error("Command on {host} timed out after {timeout:?}")]
    Timeout { host: String, timeout: Duration },

    #[error("Failed to write {path} on {host}: {message}")]
    WriteFailed {
        host: String,
        path: String,
        message: String,
    },
}

impl RemoteError {
    /// Whether the host itself could not be reached, as opposed to a command
    /// or write misbehaving once connected
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            RemoteError::UnknownHost(_) | RemoteError::Unreachable { .. } | RemoteError::Timeout { .. }
        )
    }
}

/// Runs commands and writes files on a named remote host
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run a shell command with a bounded timeout
    async fn execute(
        &self,
        host: &str,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, RemoteError>;

    /// Write `content` to `path`, replacing any existing file
    async fn write_file(&self, host: &str, path: &str, content: &str) -> Result<(), RemoteError>;

    /// Name of this executor for logging
    fn name(&self) -> &str;
}

/// Run `command` and enforce `timeout` around the executor call itself, so a
/// misbehaving executor can never block the caller indefinitely.
pub async fn execute_bounded(
    executor: &dyn RemoteExecutor,
    host: &str,
    command: &str,
    timeout: Duration,
) -> Result<CommandOutput, RemoteError> {
    match tokio::time::timeout(timeout, executor.execute(host, command, timeout)).await {
        Ok(result) => result,
        Err(_) => Err(RemoteError::Timeout {
            host: host.to_string(),
            timeout,
        }),
    }
}

/// Bounded variant of [`RemoteExecutor::write_file`]
pub async fn write_bounded(
    executor: &dyn RemoteExecutor,
    host: &str,
    path: &str,
    content: &str,
    timeout: Duration,
) -> Result<(), RemoteError> {
    match tokio::time::timeout(timeout, executor.write_file(host, path, content)).await {
        Ok(result) => result,
        Err(_) => Err(RemoteError::Timeout {
            host: host.to_string(),
            timeout,
        }),
    }
}
