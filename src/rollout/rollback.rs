use super::locks::HostGuard;
use super::orchestrator::RolloutOrchestrator;
use crate::audit::AuditStatus;
use crate::error::{Result, RolloutError};
use crate::notify::Severity;
use crate::sanitize::sanitize_error;
use crate::types::*;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};

/// Result of a successful rollback
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackOutcome {
    pub correlation_id: String,
    pub host_id: HostId,
    pub version: u64,
    pub applied_at: DateTime<Utc>,
    pub superseded: Vec<u64>,
}

/// Who asked for a rollback and why
#[derive(Debug, Clone)]
pub struct RollbackCause {
    pub actor: String,
    /// Version whose watcher triggered this rollback, if any
    pub triggered_by: Option<u64>,
    pub reason: Option<String>,
}

impl RollbackCause {
    pub fn manual(actor: impl Into<String>) -> Self {
        Self {
            actor: actor.into(),
            triggered_by: None,
            reason: None,
        }
    }
}

/// Selects a rollback target and re-enters the deploy protocol with it
pub struct RollbackCoordinator {
    orchestrator: Arc<RolloutOrchestrator>,
}

impl RollbackCoordinator {
    pub fn new(orchestrator: Arc<RolloutOrchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Roll a host back, rejecting the request if the host is busy
    pub async fn rollback(
        &self,
        host_id: &str,
        target: Option<u64>,
        cause: RollbackCause,
    ) -> Result<RollbackOutcome> {
        let guard = self.orchestrator.locks().try_acquire(host_id)?;
        self.rollback_locked(&guard, target, &cause).await
    }

    /// Resolve the version to restore
    ///
    /// An explicit target must have been deployed before; otherwise the last
    /// known good version is used.
    pub async fn resolve_target(&self, host_id: &str, target: Option<u64>) -> Result<ConfigVersion> {
        let store = self.orchestrator.store();
        let candidate = match target {
            Some(version) => store
                .get_version(&VersionKey::new(host_id, version))
                .await
                .filter(|v| {
                    v.was_deployed()
                        && matches!(v.status, VersionStatus::Applied | VersionStatus::RolledBack)
                }),
            None => store.last_known_good(host_id).await,
        };

        candidate.ok_or_else(|| RolloutError::NoRollbackTarget(host_id.to_string()))
    }

    pub(crate) async fn rollback_locked(
        &self,
        guard: &HostGuard,
        target: Option<u64>,
        cause: &RollbackCause,
    ) -> Result<RollbackOutcome> {
        let host_id = guard.host().to_string();
        let target = self.resolve_target(&host_id, target).await?;
        let correlation_id = new_correlation_id();
        let audit = self.orchestrator.audit();

        audit
            .begin(
                &correlation_id,
                "nginx_config_rollback",
                &cause.actor,
                json!({
                    "host": host_id,
                    "target_version": target.version,
                    "triggered_by": cause.triggered_by,
                    "reason": cause.reason,
                }),
            )
            .await;

        match self.execute(guard, &target, &correlation_id).await {
            Ok(outcome) => {
                info!(
                    "Rolled back {} to v{}, superseded {:?} [{}]",
                    host_id, outcome.version, outcome.superseded, correlation_id
                );
                audit
                    .complete(
                        &correlation_id,
                        AuditStatus::Success,
                        serde_json::to_value(&outcome).unwrap_or_default(),
                    )
                    .await;
                Ok(outcome)
            }
            Err(e) => {
                let message = sanitize_error(&e.to_string());
                error!("Rollback of {} failed: {} [{}]", host_id, message, correlation_id);
                audit
                    .complete(&correlation_id, AuditStatus::Failed, json!(message))
                    .await;
                self.orchestrator
                    .notifier()
                    .notify(
                        Severity::Critical,
                        &format!("Nginx Config Rollback Failed - {}", host_id),
                        &message,
                        json!({
                            "host": host_id,
                            "target_version": target.version,
                            "correlation_id": correlation_id,
                        }),
                    )
                    .await;
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        guard: &HostGuard,
        target: &ConfigVersion,
        correlation_id: &str,
    ) -> Result<RollbackOutcome> {
        let content = self.orchestrator.store().read_content(&target.key()).await?;
        let (_report, applied_at, superseded) = self
            .orchestrator
            .redeploy_locked(guard, target, &content, target.watch_window_secs, correlation_id)
            .await?;

        Ok(RollbackOutcome {
            correlation_id: correlation_id.to_string(),
            host_id: target.host_id.clone(),
            version: target.version,
            applied_at,
            superseded,
        })
    }
}
