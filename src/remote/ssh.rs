use super::{quote, CommandOutput, RemoteError, RemoteExecutor};
use crate::config::{HostEntry, RemoteConfig};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// ssh reserves this exit status for its own connection failures
const SSH_CONNECTION_FAILURE: i32 = 255;

const WRITE_TIMEOUT: Duration = Duration::from_secs(120);

/// Remote executor that shells out to the system `ssh` client
#[derive(Debug, Clone)]
pub struct SshExecutor {
    ssh_binary: String,
    connect_timeout: Duration,
    hosts: BTreeMap<String, HostEntry>,
}

impl SshExecutor {
    pub fn new(config: &RemoteConfig) -> Self {
        Self {
            ssh_binary: config.ssh_binary.clone(),
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            hosts: config.hosts.clone(),
        }
    }

    fn entry(&self, host: &str) -> Result<&HostEntry, RemoteError> {
        self.hosts
            .get(host)
            .ok_or_else(|| RemoteError::UnknownHost(host.to_string()))
    }

    pub(crate) fn ssh_args(&self, entry: &HostEntry) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)),
            "-p".to_string(),
            entry.port.to_string(),
        ];
        if let Some(identity) = &entry.identity_file {
            args.push("-i".to_string());
            args.push(identity.clone());
        }
        args.push(format!("{}@{}", entry.user, entry.address));
        args
    }

    fn command(&self, host: &str, remote_command: &str) -> Result<Command, RemoteError> {
        let entry = self.entry(host)?;
        let mut cmd = Command::new(&self.ssh_binary);
        cmd.args(self.ssh_args(entry))
            .arg("--")
            .arg(remote_command)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        Ok(cmd)
    }

    fn unreachable(host: &str, message: impl Into<String>) -> RemoteError {
        RemoteError::Unreachable {
            host: host.to_string(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn execute(
        &self,
        host: &str,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, RemoteError> {
        debug!("ssh {}: {}", host, command);
        let mut cmd = self.command(host, command)?;
        cmd.stdin(Stdio::null());

        let output = match tokio::time::timeout(timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(Self::unreachable(host, e.to_string())),
            Err(_) => {
                return Err(RemoteError::Timeout {
                    host: host.to_string(),
                    timeout,
                })
            }
        };

        let exit_code = output.status.code().unwrap_or(-1);
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if exit_code == SSH_CONNECTION_FAILURE {
            return Err(Self::unreachable(host, stderr));
        }

        Ok(CommandOutput {
            exit_code,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr,
        })
    }

    async fn write_file(&self, host: &str, path: &str, content: &str) -> Result<(), RemoteError> {
        debug!("ssh {}: write {} ({} bytes)", host, path, content.len());
        let remote_command = format!("cat > {}", quote(path));
        let mut cmd = self.command(host, &remote_command)?;
        cmd.stdin(Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|e| Self::unreachable(host, e.to_string()))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(content.as_bytes())
                .await
                .map_err(|e| Self::unreachable(host, e.to_string()))?;
            // Dropping stdin closes the pipe so the remote `cat` sees EOF
        }

        let output = match tokio::time::timeout(WRITE_TIMEOUT, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(Self::unreachable(host, e.to_string())),
            Err(_) => {
                return Err(RemoteError::Timeout {
                    host: host.to_string(),
                    timeout: WRITE_TIMEOUT,
                })
            }
        };

        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        match output.status.code() {
            Some(0) => Ok(()),
            Some(SSH_CONNECTION_FAILURE) => Err(Self::unreachable(host, stderr)),
            _ => Err(RemoteError::WriteFailed {
                host: host.to_string(),
                path: path.to_string(),
                message: stderr,
            }),
        }
    }

    fn name(&self) -> &str {
        "ssh"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn executor() -> SshExecutor {
        let mut hosts = BTreeMap::new();
        hosts.insert(
            "web-1".to_string(),
            HostEntry {
                address: "10.0.0.5".to_string(),
                user: "deploy".to_string(),
                port: 2222,
                identity_file: Some("/home/deploy/.ssh/id_ed25519".to_string()),
            },
        );
        SshExecutor::new(&RemoteConfig {
            ssh_binary: "ssh".to_string(),
            connect_timeout_secs: 10,
            hosts,
        })
    }

    #[test]
    fn test_ssh_args() {
        let executor = executor();
        let entry = executor.entry("web-1").unwrap();
        let args = executor.ssh_args(entry);

        assert!(args.contains(&"BatchMode=yes".to_string()));
        assert!(args.contains(&"ConnectTimeout=10".to_string()));
        assert!(args.contains(&"2222".to_string()));
        assert!(args.contains(&"-i".to_string()));
        assert_eq!(args.last().unwrap(), "deploy@10.0.0.5");
    }

    #[tokio::test]
    async fn test_unknown_host_is_rejected_without_spawning() {
        let executor = executor();
        let result = executor
            .execute("web-404", "true", Duration::from_secs(1))
            .await;
        assert_eq!(result, Err(RemoteError::UnknownHost("web-404".to_string())));

        let result = executor.write_file("web-404", "/tmp/x", "body").await;
        assert_eq!(result, Err(RemoteError::UnknownHost("web-404".to_string())));
    }
}
