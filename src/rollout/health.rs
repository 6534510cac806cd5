use super::locks::HostGuard;
use super::orchestrator::RolloutOrchestrator;
use super::rollback::{RollbackCause, RollbackCoordinator};
use crate::audit::AuditStatus;
use crate::config::{RolloutSettings, ShutdownMode, UnreachablePolicy};
use crate::error::{Result, RolloutError};
use crate::notify::Severity;
use crate::remote::{execute_bounded, quote, RemoteError};
use crate::sanitize::sanitize_error;
use crate::types::*;
use serde_json::json;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// What a watcher did when its window elapsed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchOutcome {
    /// The version was no longer the one to judge
    Stale,
    Healthy { check_ran: bool },
    RolledBack { to_version: u64 },
    RollbackFailed { error: String },
    /// The probe itself failed; the version was left as-is
    CheckFailed { error: String },
}

struct WatcherContext {
    orchestrator: Arc<RolloutOrchestrator>,
    rollback: Arc<RollbackCoordinator>,
    settings: RolloutSettings,
}

/// Background post-deploy health checks
///
/// Each scheduled check sleeps for the version's watch window, then takes the
/// host lock (queueing behind any in-flight apply) before judging it.
pub struct HealthWatcher {
    ctx: Arc<WatcherContext>,
    tasks: Mutex<JoinSet<WatchOutcome>>,
}

impl HealthWatcher {
    pub fn new(
        orchestrator: Arc<RolloutOrchestrator>,
        rollback: Arc<RollbackCoordinator>,
        settings: RolloutSettings,
    ) -> Self {
        Self {
            ctx: Arc::new(WatcherContext {
                orchestrator,
                rollback,
                settings,
            }),
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    fn tasks(&self) -> MutexGuard<'_, JoinSet<WatchOutcome>> {
        match self.tasks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Schedule a check of `key` after `window`
    pub fn schedule(&self, key: VersionKey, window: Duration, origin_correlation_id: String) {
        let ctx = self.ctx.clone();
        let mut tasks = self.tasks();
        // Reap finished checks so the set only holds outstanding ones
        while tasks.try_join_next().is_some() {}

        info!(
            "Health check for {} scheduled in {:?} [{}]",
            key, window, origin_correlation_id
        );
        tasks.spawn(async move {
            tokio::time::sleep(window).await;
            ctx.watch(key, origin_correlation_id).await
        });
    }

    /// Number of checks not yet finished
    pub fn outstanding(&self) -> usize {
        let mut tasks = self.tasks();
        while tasks.try_join_next().is_some() {}
        tasks.len()
    }

    /// Stop accepting responsibility for outstanding checks
    ///
    /// `Wait` lets every pending check run to completion, `Abandon` aborts
    /// them. Returns the outcomes of the checks that completed.
    pub async fn shutdown(&self, mode: ShutdownMode) -> Vec<WatchOutcome> {
        let mut tasks = std::mem::take(&mut *self.tasks());
        if mode == ShutdownMode::Abandon {
            info!("Abandoning {} outstanding health checks", tasks.len());
            tasks.abort_all();
        } else {
            info!("Waiting for {} outstanding health checks", tasks.len());
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) if e.is_cancelled() => {}
                Err(e) => error!("Health check task panicked: {}", e),
            }
        }
        outcomes
    }
}

impl WatcherContext {
    async fn watch(&self, key: VersionKey, origin: String) -> WatchOutcome {
        let guard = self.orchestrator.locks().acquire(&key.host_id).await;
        let correlation_id = format!("{}_health", origin);

        let version = match self.orchestrator.store().get_version(&key).await {
            Some(v) if v.is_active() => v,
            _ => {
                debug!("{} is no longer active, skipping health check", key);
                return WatchOutcome::Stale;
            }
        };

        let audit = self.orchestrator.audit();
        audit
            .begin(
                &correlation_id,
                "nginx_config_health_check",
                "system",
                json!({ "host": key.host_id, "version": key.version }),
            )
            .await;

        let outcome = match self.check(&guard, &version, &origin).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let message = sanitize_error(&e.to_string());
                error!("Health check of {} failed: {}", key, message);
                self.orchestrator
                    .notifier()
                    .notify(
                        Severity::Warning,
                        &format!("Health Check Failed - {}", key.host_id),
                        &message,
                        json!({ "host": key.host_id, "version": key.version }),
                    )
                    .await;
                WatchOutcome::CheckFailed { error: message }
            }
        };

        let (status, payload) = match &outcome {
            WatchOutcome::CheckFailed { error } | WatchOutcome::RollbackFailed { error } => {
                (AuditStatus::Failed, json!(error))
            }
            other => (AuditStatus::Success, json!(format!("{:?}", other))),
        };
        audit.complete(&correlation_id, status, payload).await;
        outcome
    }

    async fn check(&self, guard: &HostGuard, version: &ConfigVersion, origin: &str) -> Result<WatchOutcome> {
        let key = version.key();
        let result = self.probe(&key.host_id).await?;
        let store = self.orchestrator.store();
        store.record_health(&key, &result).await?;

        if !result.check_ran {
            self.orchestrator
                .notifier()
                .notify(
                    Severity::Warning,
                    &format!("Health Check Could Not Run - {}", key.host_id),
                    result.reason.as_deref().unwrap_or("host unreachable"),
                    json!({ "host": key.host_id, "version": key.version, "healthy": result.healthy }),
                )
                .await;
        }

        if result.healthy {
            info!("{} passed its health check", key);
            return Ok(WatchOutcome::Healthy {
                check_ran: result.check_ran,
            });
        }

        let cause = result.reason.clone().unwrap_or_else(|| "unhealthy".to_string());
        let reason = format!("Automatic rollback due to health check failure: {}", cause);
        warn!("{}: {}", key, reason);
        store.flag_rollback(&key, &reason).await?;

        let rollback_cause = RollbackCause {
            actor: "system".to_string(),
            triggered_by: Some(key.version),
            reason: Some(reason.clone()),
        };
        let notifier = self.orchestrator.notifier();

        match self.rollback.rollback_locked(guard, None, &rollback_cause).await {
            Ok(outcome) => {
                notifier
                    .notify(
                        Severity::Warning,
                        &format!("Automatic Rollback Triggered - {}", key.host_id),
                        &format!(
                            "Version {} rolled back to version {}: {}",
                            key.version, outcome.version, cause
                        ),
                        json!({
                            "host": key.host_id,
                            "failed_version": key.version,
                            "restored_version": outcome.version,
                            "correlation_id": origin,
                        }),
                    )
                    .await;
                Ok(WatchOutcome::RolledBack {
                    to_version: outcome.version,
                })
            }
            Err(e) => {
                let message = sanitize_error(&e.to_string());
                notifier
                    .notify(
                        Severity::Critical,
                        &format!("Automatic Rollback Failed - {}", key.host_id),
                        &format!("Version {} is unhealthy ({}) and could not be rolled back: {}", key.version, cause, message),
                        json!({
                            "host": key.host_id,
                            "failed_version": key.version,
                            "correlation_id": origin,
                        }),
                    )
                    .await;
                Ok(WatchOutcome::RollbackFailed { error: message })
            }
        }
    }

    /// Probe the daemon state and its recent error log
    async fn probe(&self, host: &str) -> Result<HealthCheckResult> {
        let mut details = HealthDetails {
            error_threshold: self.settings.health_error_threshold,
            ..Default::default()
        };
        let executor = self.orchestrator.deploy().executor().as_ref();
        let timeout = self.settings.command_timeout();
        let service = quote(&self.orchestrator.deploy().service_name());

        let status_cmd = format!("systemctl is-active {}", service);
        let state = match execute_bounded(executor, host, &status_cmd, timeout).await {
            Ok(output) => output.stdout.trim().to_string(),
            Err(e) => return self.unreachable(e, details),
        };
        details.service_state = Some(state.clone());
        if state != "active" {
            return Ok(HealthCheckResult::unhealthy(
                format!("Nginx service is not active ({})", state),
                details,
            ));
        }

        let errors_cmd = format!(
            "journalctl -u {} --since={} | grep -i error | wc -l",
            service,
            quote(&self.settings.health_error_window)
        );
        let output = match execute_bounded(executor, host, &errors_cmd, timeout).await {
            Ok(output) => output,
            Err(e) => return self.unreachable(e, details),
        };
        let count_text = output.stdout.trim();
        let count: u32 = if count_text.is_empty() {
            0
        } else {
            count_text.parse().map_err(|_| {
                RolloutError::HealthCheck(format!(
                    "Unexpected error count output: {}",
                    sanitize_error(count_text)
                ))
            })?
        };
        details.error_count = Some(count);

        if count > self.settings.health_error_threshold {
            return Ok(HealthCheckResult::unhealthy(
                format!(
                    "High error rate detected: {} errors since {}",
                    count, self.settings.health_error_window
                ),
                details,
            ));
        }

        Ok(HealthCheckResult::healthy(details))
    }

    fn unreachable(&self, err: RemoteError, mut details: HealthDetails) -> Result<HealthCheckResult> {
        // A hanging probe on a connected host says nothing about reachability
        if matches!(err, RemoteError::Timeout { .. }) {
            return Err(RolloutError::HealthCheck(format!("Health probe hung: {}", err)));
        }
        if !err.is_unavailable() {
            return Err(RolloutError::Transport(err.to_string()));
        }

        let message = sanitize_error(&err.to_string());
        details.probe_error = Some(message.clone());
        let healthy = self.settings.unreachable_policy == UnreachablePolicy::AssumeHealthy;
        warn!(
            "Health probe could not reach host ({}); policy {:?} applies",
            message, self.settings.unreachable_policy
        );
        Ok(HealthCheckResult::not_run(
            healthy,
            format!("Health probe could not run: {}", message),
            details,
        ))
    }
}
