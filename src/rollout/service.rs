use super::deploy::DeployProtocol;
use super::health::{HealthWatcher, WatchOutcome};
use super::locks::HostLocks;
use super::orchestrator::{ApplyOutcome, ApplyRequest, RolloutOrchestrator};
use super::rollback::{RollbackCause, RollbackCoordinator, RollbackOutcome};
use crate::audit::{AuditSink, AuditStatus};
use crate::config::{RemoteLayout, RolloutSettings};
use crate::error::{Result, RolloutError};
use crate::notify::{Notifier, Severity};
use crate::remote::RemoteExecutor;
use crate::sanitize::{mask_sensitive_content, sanitize_error};
use crate::store::VersionStore;
use crate::types::*;
use crate::validation::{ConfigValidator, RemoteTestRunner, StaticValidator, ValidatorPolicy};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Collaborators needed to build a [`RolloutService`]
pub struct ServiceParts {
    pub store: Arc<VersionStore>,
    pub executor: Arc<dyn RemoteExecutor>,
    pub audit: Arc<dyn AuditSink>,
    pub notifier: Arc<dyn Notifier>,
    pub policy: ValidatorPolicy,
    pub settings: RolloutSettings,
    pub layout: RemoteLayout,
}

/// Input for creating a version; unset fields take service defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateVersionRequest {
    pub host_id: HostId,
    pub content: String,
    pub author_id: String,
    pub summary: Option<String>,
    pub config_name: Option<String>,
    pub config_type: Option<ConfigType>,
    pub watch_window_secs: Option<u64>,
}

/// Point-in-time view of a host
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostStatus {
    pub host_id: HostId,
    pub active: Option<VersionSummary>,
    pub latest_version: Option<u64>,
    pub total_versions: usize,
    pub last_known_good: Option<u64>,
    pub busy: bool,
}

/// Entry point for every rollout operation
pub struct RolloutService {
    store: Arc<VersionStore>,
    orchestrator: Arc<RolloutOrchestrator>,
    rollback: Arc<RollbackCoordinator>,
    watcher: HealthWatcher,
    settings: RolloutSettings,
}

impl RolloutService {
    pub fn new(parts: ServiceParts) -> Result<Self> {
        let static_validator = StaticValidator::new(parts.policy)?;
        let remote_test = RemoteTestRunner::new(
            parts.executor.clone(),
            &parts.layout,
            parts.settings.remote_test_timeout(),
            parts.settings.command_timeout(),
        );
        let deploy = DeployProtocol::new(parts.executor, parts.layout, &parts.settings);

        let orchestrator = Arc::new(RolloutOrchestrator::new(
            parts.store.clone(),
            ConfigValidator::new(static_validator, remote_test),
            deploy,
            HostLocks::new(),
            parts.audit,
            parts.notifier,
        ));
        let rollback = Arc::new(RollbackCoordinator::new(orchestrator.clone()));
        let watcher = HealthWatcher::new(orchestrator.clone(), rollback.clone(), parts.settings.clone());

        Ok(Self {
            store: parts.store,
            orchestrator,
            rollback,
            watcher,
            settings: parts.settings,
        })
    }

    pub fn store(&self) -> &Arc<VersionStore> {
        &self.store
    }

    pub async fn create_version(&self, request: CreateVersionRequest) -> Result<ConfigVersion> {
        let correlation_id = new_correlation_id();
        let audit = self.orchestrator.audit();
        audit
            .begin(
                &correlation_id,
                "nginx_config_create",
                &request.author_id,
                json!({ "host": request.host_id, "config_name": request.config_name }),
            )
            .await;

        let new = NewVersion {
            host_id: request.host_id,
            content: request.content,
            author_id: request.author_id,
            summary: request.summary,
            config_name: request.config_name.unwrap_or_else(|| "default".to_string()),
            config_type: request.config_type.unwrap_or_default(),
            watch_window_secs: request
                .watch_window_secs
                .unwrap_or(self.settings.default_watch_window_secs),
        };

        match self.store.create_version(new).await {
            Ok(version) => {
                audit
                    .complete(
                        &correlation_id,
                        AuditStatus::Success,
                        json!({
                            "version": version.version,
                            "changes": version.diff.as_ref().map(|d| d.summary()),
                        }),
                    )
                    .await;
                Ok(version)
            }
            Err(e) => {
                audit
                    .complete(
                        &correlation_id,
                        AuditStatus::Failed,
                        json!(sanitize_error(&e.to_string())),
                    )
                    .await;
                Err(e)
            }
        }
    }

    /// Versions of a host, newest first
    pub async fn list_versions(&self, host_id: &str) -> Vec<VersionSummary> {
        self.store
            .list_versions(host_id)
            .await
            .iter()
            .map(ConfigVersion::summarize)
            .collect()
    }

    pub async fn get_version(&self, host_id: &str, version: u64) -> Result<ConfigVersion> {
        let key = VersionKey::new(host_id, version);
        self.store
            .get_version(&key)
            .await
            .ok_or_else(|| RolloutError::not_found(format!("Version {} not found", key)))
    }

    /// Decrypted body of a version, optionally with credentials masked
    pub async fn get_content(&self, host_id: &str, version: u64, mask: bool) -> Result<String> {
        let content = self
            .store
            .read_content(&VersionKey::new(host_id, version))
            .await?;
        Ok(if mask {
            mask_sensitive_content(&content)
        } else {
            content
        })
    }

    /// Validate text without creating a version
    pub async fn validate(&self, host_id: &str, content: &str, dry_run: bool) -> Result<ValidationResult> {
        validate_identifier("host id", host_id)?;
        Ok(self
            .orchestrator
            .validator()
            .validate(host_id, content, dry_run, &new_correlation_id())
            .await)
    }

    /// Apply a version and hand a successful deploy to the health watcher
    pub async fn apply(&self, request: ApplyRequest) -> Result<ApplyOutcome> {
        let key = request.key.clone();
        let outcome = self.orchestrator.apply(request).await?;

        if let ApplyOutcome::Applied {
            correlation_id,
            watch_window_secs,
            ..
        } = &outcome
        {
            if *watch_window_secs > 0 {
                self.watcher.schedule(
                    key,
                    Duration::from_secs(*watch_window_secs),
                    correlation_id.clone(),
                );
            }
        }
        Ok(outcome)
    }

    pub async fn rollback(
        &self,
        host_id: &str,
        target: Option<u64>,
        actor: &str,
    ) -> Result<RollbackOutcome> {
        self.rollback
            .rollback(host_id, target, RollbackCause::manual(actor))
            .await
    }

    pub async fn status(&self, host_id: &str) -> HostStatus {
        let versions = self.store.list_versions(host_id).await;
        let last_known_good = self.store.last_known_good(host_id).await;

        HostStatus {
            host_id: host_id.to_string(),
            active: versions.iter().find(|v| v.is_active()).map(ConfigVersion::summarize),
            latest_version: versions.first().map(|v| v.version),
            total_versions: versions.len(),
            last_known_good: last_known_good.map(|v| v.version),
            busy: self.orchestrator.locks().is_locked(host_id),
        }
    }

    /// Apply every version whose scheduled time has passed
    ///
    /// Each uses the watch window recorded with its schedule. A retryable
    /// failure keeps the schedule for the next tick until
    /// `max_scheduled_attempts` is reached; any other failure drops it.
    pub async fn apply_due(&self) -> Vec<(VersionKey, Result<ApplyOutcome>)> {
        let due = self.store.due_scheduled(Utc::now()).await;
        let mut results = Vec::with_capacity(due.len());

        for key in due {
            let Some(version) = self.store.get_version(&key).await else {
                continue;
            };
            info!("Scheduled apply of {} is due", key);
            let result = self
                .apply(ApplyRequest {
                    key: key.clone(),
                    actor: "scheduler".to_string(),
                    dry_run: false,
                    scheduled_at: None,
                    watch_window_secs: version.scheduled_watch_window_secs,
                })
                .await;
            if let Err(e) = &result {
                self.settle_scheduled_failure(&key, e).await;
            }
            results.push((key, result));
        }
        results
    }

    async fn settle_scheduled_failure(&self, key: &VersionKey, err: &RolloutError) {
        let message = sanitize_error(&err.to_string());
        let limit = self.settings.max_scheduled_attempts;

        if err.is_retryable() {
            let attempts = match self.store.record_scheduled_attempt(key).await {
                Ok(attempts) => attempts,
                Err(e) => {
                    warn!("Could not record scheduled attempt of {}: {}", key, e);
                    return;
                }
            };
            if attempts < limit {
                warn!(
                    "Scheduled apply of {} failed (attempt {}/{}), retrying on next tick: {}",
                    key, attempts, limit, message
                );
                return;
            }
            self.orchestrator
                .notifier()
                .notify(
                    Severity::Warning,
                    &format!("Nginx Scheduled Apply Abandoned - {}", key.host_id),
                    &format!(
                        "Scheduled apply of version {} gave up after {} attempts: {}",
                        key.version, attempts, message
                    ),
                    json!({ "host": key.host_id, "version": key.version, "attempts": attempts }),
                )
                .await;
        }

        warn!("Scheduled apply of {} failed, dropping its schedule: {}", key, message);
        if let Err(e) = self.store.clear_schedule(key).await {
            warn!("Could not clear schedule of {}: {}", key, e);
        }
    }

    pub fn pending_health_checks(&self) -> usize {
        self.watcher.outstanding()
    }

    /// Settle outstanding health checks according to the configured mode
    pub async fn shutdown(&self) -> Vec<WatchOutcome> {
        self.watcher.shutdown(self.settings.shutdown_mode).await
    }
}
