use super::phase::DeployPhase;
use crate::config::{RemoteLayout, RolloutSettings};
use crate::error::{Result, RolloutError};
use crate::remote::{execute_bounded, quote, render_command, write_bounded, RemoteError, RemoteExecutor};
use crate::sanitize::sanitize_error;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// What to put on the host
#[derive(Debug, Clone, Copy)]
pub struct DeployTarget<'a> {
    pub host: &'a str,
    pub config_name: &'a str,
    pub version: u64,
    pub content: &'a str,
}

/// Where a successful deploy left things on the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployReport {
    pub backup_path: String,
    pub active_path: String,
    pub enabled_path: String,
    pub phases: Vec<DeployPhase>,
}

/// Backup, stage, test, swap and reload on one host
///
/// Performs remote I/O only; the caller owns every lifecycle write.
pub struct DeployProtocol {
    executor: Arc<dyn RemoteExecutor>,
    layout: RemoteLayout,
    command_timeout: Duration,
    test_timeout: Duration,
}

impl DeployProtocol {
    pub fn new(executor: Arc<dyn RemoteExecutor>, layout: RemoteLayout, settings: &RolloutSettings) -> Self {
        Self {
            executor,
            layout,
            command_timeout: settings.command_timeout(),
            test_timeout: settings.remote_test_timeout(),
        }
    }

    pub fn executor(&self) -> &Arc<dyn RemoteExecutor> {
        &self.executor
    }

    pub fn service_name(&self) -> &str {
        &self.layout.service_name
    }

    pub async fn run(&self, target: DeployTarget<'_>, correlation_id: &str) -> Result<DeployReport> {
        let host = target.host;
        let stem = format!("{}_{}", target.config_name, target.version);
        let staged_path = format!("{}/{}.conf", self.layout.drafts_dir, stem);
        let active_path = format!("{}/{}.conf", self.layout.managed_dir, stem);
        let enabled_path = format!(
            "{}/{}.conf",
            self.layout.sites_enabled_dir, target.config_name
        );
        let mut phases = Vec::with_capacity(5);

        phases.push(DeployPhase::BackingUp);
        let backup_path = self.backup(host, correlation_id).await?;

        phases.push(DeployPhase::Staging);
        self.enter(host, DeployPhase::Staging, correlation_id);
        self.run_step(host, DeployPhase::Staging, &format!("mkdir -p {}", quote(&self.layout.drafts_dir)))
            .await?;
        write_bounded(
            self.executor.as_ref(),
            host,
            &staged_path,
            target.content,
            self.command_timeout,
        )
        .await
        .map_err(|e| step_error(DeployPhase::Staging, &format!("write {}", staged_path), e))?;

        phases.push(DeployPhase::Testing);
        self.enter(host, DeployPhase::Testing, correlation_id);
        self.test_staged(host, &staged_path).await?;

        phases.push(DeployPhase::Swapping);
        self.enter(host, DeployPhase::Swapping, correlation_id);
        self.run_step(
            host,
            DeployPhase::Swapping,
            &format!("mv {} {}", quote(&staged_path), quote(&active_path)),
        )
        .await?;
        self.run_step(
            host,
            DeployPhase::Swapping,
            &format!("ln -sf {} {}", quote(&active_path), quote(&enabled_path)),
        )
        .await?;

        phases.push(DeployPhase::Reloading);
        self.enter(host, DeployPhase::Reloading, correlation_id);
        self.run_step(host, DeployPhase::Reloading, &self.layout.reload_command)
            .await?;

        info!(
            "Deployed {} v{} to {} [{}]",
            target.config_name, target.version, host, correlation_id
        );
        Ok(DeployReport {
            backup_path,
            active_path,
            enabled_path,
            phases,
        })
    }

    fn enter(&self, host: &str, phase: DeployPhase, correlation_id: &str) {
        info!("{} entering {} [{}]", host, phase, correlation_id);
    }

    async fn backup(&self, host: &str, correlation_id: &str) -> Result<String> {
        self.enter(host, DeployPhase::BackingUp, correlation_id);
        let backup_path = format!(
            "{}/{}_{}",
            self.layout.backup_root,
            Utc::now().format("%Y%m%d_%H%M%S"),
            correlation_id
        );
        let dir = quote(&backup_path);
        let status_file = quote(&format!("{}/nginx_status.txt", backup_path));
        let test_file = quote(&format!("{}/nginx_test.txt", backup_path));

        let steps = [
            format!("mkdir -p {}", dir),
            format!("cp -r {} {}/", quote(&self.layout.nginx_root), dir),
            format!(
                "systemctl status {} > {} 2>&1 || true",
                quote(&self.layout.service_name),
                status_file
            ),
            format!("{} 2> {} || true", self.layout.test_command, test_file),
        ];
        for step in &steps {
            self.run_step(host, DeployPhase::BackingUp, step).await?;
        }

        debug!("Backup of {} stored at {}", host, backup_path);
        Ok(backup_path)
    }

    async fn test_staged(&self, host: &str, staged_path: &str) -> Result<()> {
        let command = render_command(&self.layout.test_file_command, &[("path", staged_path)]);
        let output = execute_bounded(self.executor.as_ref(), host, &command, self.test_timeout)
            .await
            .map_err(|e| step_error(DeployPhase::Testing, &command, e))?;

        if output.success() {
            return Ok(());
        }

        let cleanup = format!("rm -f {}", quote(staged_path));
        if let Err(e) = execute_bounded(self.executor.as_ref(), host, &cleanup, self.command_timeout).await {
            warn!("Failed to remove staged file on {}: {}", host, sanitize_error(&e.to_string()));
        }

        let message = format!("nginx -t failed: {}", sanitize_error(&output.stderr));
        warn!("Staged config rejected on {}: {}", host, message);
        Err(RolloutError::RemoteTestFailure(vec![message]))
    }

    async fn run_step(&self, host: &str, phase: DeployPhase, command: &str) -> Result<()> {
        debug!("{} [{}]: {}", host, phase, command);
        let output = execute_bounded(self.executor.as_ref(), host, command, self.command_timeout)
            .await
            .map_err(|e| step_error(phase, command, e))?;

        if output.success() {
            return Ok(());
        }

        let message = format!(
            "Command failed '{}': {}",
            command,
            sanitize_error(&output.stderr)
        );
        error!("{} failed while {}: {}", host, phase, message);
        Err(RolloutError::protocol(phase, message))
    }
}

/// Transport failures before the swap leave the host untouched and are
/// retryable; from the swap on the host may be half-updated.
fn step_error(phase: DeployPhase, command: &str, err: RemoteError) -> RolloutError {
    let detail = sanitize_error(&err.to_string());
    if phase.touches_serving_path() || !err.is_unavailable() {
        error!("Remote step failed while {}: {}", phase, detail);
        RolloutError::protocol(phase, format!("Command failed '{}': {}", command, detail))
    } else {
        warn!("Host unavailable while {}: {}", phase, detail);
        RolloutError::Transport(detail)
    }
}
