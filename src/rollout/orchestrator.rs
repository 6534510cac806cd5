use super::deploy::{DeployProtocol, DeployReport, DeployTarget};
use super::locks::{HostGuard, HostLocks};
use super::phase::DeployPhase;
use crate::audit::{AuditSink, AuditStatus};
use crate::error::{ErrorKind, Result, RolloutError};
use crate::notify::{Notifier, Severity};
use crate::sanitize::sanitize_error;
use crate::store::VersionStore;
use crate::types::*;
use crate::validation::ConfigValidator;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

/// A request to put a version live
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyRequest {
    pub key: VersionKey,
    pub actor: String,
    #[serde(default)]
    pub dry_run: bool,
    /// Apply later instead of now; ignored when not in the future
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Overrides the version's own watch window
    pub watch_window_secs: Option<u64>,
}

/// Result of an apply request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ApplyOutcome {
    Scheduled {
        correlation_id: String,
        scheduled_at: DateTime<Utc>,
    },
    DryRun {
        correlation_id: String,
        validation: ValidationResult,
    },
    Applied {
        correlation_id: String,
        version: u64,
        applied_at: DateTime<Utc>,
        watch_window_secs: u64,
        warnings: Vec<String>,
        backup_path: String,
        superseded: Vec<u64>,
    },
}

impl ApplyOutcome {
    pub fn correlation_id(&self) -> &str {
        match self {
            ApplyOutcome::Scheduled { correlation_id, .. }
            | ApplyOutcome::DryRun { correlation_id, .. }
            | ApplyOutcome::Applied { correlation_id, .. } => correlation_id,
        }
    }
}

/// Drives a version through validation and the deploy protocol
///
/// The only writer of `applied` state, through [`VersionStore::promote_applied`].
pub struct RolloutOrchestrator {
    store: Arc<VersionStore>,
    validator: ConfigValidator,
    deploy: DeployProtocol,
    locks: HostLocks,
    audit: Arc<dyn AuditSink>,
    notifier: Arc<dyn Notifier>,
}

impl RolloutOrchestrator {
    pub fn new(
        store: Arc<VersionStore>,
        validator: ConfigValidator,
        deploy: DeployProtocol,
        locks: HostLocks,
        audit: Arc<dyn AuditSink>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            validator,
            deploy,
            locks,
            audit,
            notifier,
        }
    }

    pub fn store(&self) -> &Arc<VersionStore> {
        &self.store
    }

    pub fn locks(&self) -> &HostLocks {
        &self.locks
    }

    pub fn validator(&self) -> &ConfigValidator {
        &self.validator
    }

    pub fn deploy(&self) -> &DeployProtocol {
        &self.deploy
    }

    pub fn audit(&self) -> &Arc<dyn AuditSink> {
        &self.audit
    }

    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }

    /// Apply a version, rejecting the request if the host is busy
    pub async fn apply(&self, request: ApplyRequest) -> Result<ApplyOutcome> {
        let guard = self.locks.try_acquire(&request.key.host_id)?;
        let correlation_id = new_correlation_id();

        self.audit
            .begin(
                &correlation_id,
                "nginx_config_apply",
                &request.actor,
                json!({
                    "host": request.key.host_id,
                    "version": request.key.version,
                    "dry_run": request.dry_run,
                    "scheduled_at": request.scheduled_at,
                }),
            )
            .await;

        let result = self.apply_locked(&guard, &request, &correlation_id).await;

        match &result {
            Ok(outcome) => {
                self.audit
                    .complete(
                        &correlation_id,
                        AuditStatus::Success,
                        serde_json::to_value(outcome).unwrap_or_default(),
                    )
                    .await;
            }
            Err(e) => {
                let message = sanitize_error(&e.to_string());
                self.audit
                    .complete(&correlation_id, AuditStatus::Failed, json!(message))
                    .await;
                if !request.dry_run && !matches!(e.kind(), ErrorKind::NotFound | ErrorKind::Conflict) {
                    self.notifier
                        .notify(
                            Severity::Warning,
                            &format!("Nginx Config Apply Failed - {}", request.key.host_id),
                            &message,
                            json!({
                                "host": request.key.host_id,
                                "version": request.key.version,
                                "correlation_id": correlation_id,
                                "error_kind": e.kind(),
                            }),
                        )
                        .await;
                }
            }
        }

        result
    }

    async fn apply_locked(
        &self,
        guard: &HostGuard,
        request: &ApplyRequest,
        correlation_id: &str,
    ) -> Result<ApplyOutcome> {
        let key = &request.key;
        let version = self
            .store
            .get_version(key)
            .await
            .ok_or_else(|| RolloutError::not_found(format!("Version {} not found", key)))?;

        if version.status == VersionStatus::Failed {
            return Err(RolloutError::validation(format!(
                "Version {} failed; create a new version to retry",
                key
            )));
        }

        if let Some(at) = request.scheduled_at.filter(|at| *at > Utc::now()) {
            self.store
                .mark_scheduled(key, at, request.watch_window_secs, correlation_id)
                .await?;
            info!("{} entering {} for {} [{}]", key, DeployPhase::Scheduled, at, correlation_id);
            return Ok(ApplyOutcome::Scheduled {
                correlation_id: correlation_id.to_string(),
                scheduled_at: at,
            });
        }

        let content = self.store.read_content(key).await?;
        let previously_deployed = version.was_deployed();

        info!("{} entering {} [{}]", key, DeployPhase::Validating, correlation_id);
        let validation = self
            .validator
            .validate(&key.host_id, &content, request.dry_run, correlation_id)
            .await;
        self.store.record_validation(key, &validation).await?;

        if let Some(err) = validation.to_error() {
            self.settle_failure(key, &err, previously_deployed, correlation_id)
                .await;
            return Err(err);
        }

        if request.dry_run {
            info!("Dry run of {} passed [{}]", key, correlation_id);
            return Ok(ApplyOutcome::DryRun {
                correlation_id: correlation_id.to_string(),
                validation,
            });
        }

        let watch_window_secs = request
            .watch_window_secs
            .unwrap_or(version.watch_window_secs);

        match self
            .redeploy_locked(guard, &version, &content, watch_window_secs, correlation_id)
            .await
        {
            Ok((report, applied_at, superseded)) => Ok(ApplyOutcome::Applied {
                correlation_id: correlation_id.to_string(),
                version: key.version,
                applied_at,
                watch_window_secs,
                warnings: validation.warnings,
                backup_path: report.backup_path,
                superseded,
            }),
            Err(err) => {
                self.settle_failure(key, &err, previously_deployed, correlation_id)
                    .await;
                Err(err)
            }
        }
    }

    /// Run the deploy protocol for `version` and promote it on success
    ///
    /// Requires the host lock; performs no lifecycle write on failure.
    pub(crate) async fn redeploy_locked(
        &self,
        guard: &HostGuard,
        version: &ConfigVersion,
        content: &str,
        watch_window_secs: u64,
        correlation_id: &str,
    ) -> Result<(DeployReport, DateTime<Utc>, Vec<u64>)> {
        debug_assert_eq!(guard.host(), version.host_id);

        let report = self
            .deploy
            .run(
                DeployTarget {
                    host: &version.host_id,
                    config_name: &version.config_name,
                    version: version.version,
                    content,
                },
                correlation_id,
            )
            .await?;

        let applied_at = Utc::now();
        let superseded = self
            .commit_applied(&version.key(), applied_at, watch_window_secs, correlation_id)
            .await?;
        Ok((report, applied_at, superseded))
    }

    async fn commit_applied(
        &self,
        key: &VersionKey,
        applied_at: DateTime<Utc>,
        watch_window_secs: u64,
        correlation_id: &str,
    ) -> Result<Vec<u64>> {
        let superseded = self
            .store
            .promote_applied(key, applied_at, watch_window_secs, correlation_id)
            .await?;
        info!("{} entering {} [{}]", key, DeployPhase::Applied, correlation_id);
        Ok(superseded)
    }

    /// Decide whether a failed attempt marks the version `failed`
    ///
    /// A version that never went live fails on any content or protocol
    /// error. A re-apply only fails once the serving path was touched.
    /// Transport failures always leave the version retryable.
    async fn settle_failure(
        &self,
        key: &VersionKey,
        err: &RolloutError,
        previously_deployed: bool,
        correlation_id: &str,
    ) {
        let fail = match err {
            RolloutError::Protocol { phase, .. } => {
                phase.touches_serving_path() || !previously_deployed
            }
            RolloutError::PolicyViolation(_)
            | RolloutError::Syntax(_)
            | RolloutError::RemoteTestFailure(_) => !previously_deployed,
            _ => false,
        };

        if !fail {
            warn!(
                "{} left unchanged after failed attempt: {} [{}]",
                key,
                sanitize_error(&err.to_string()),
                correlation_id
            );
            return;
        }

        info!("{} entering {} [{}]", key, DeployPhase::Failed, correlation_id);
        if let Err(e) = self.store.mark_failed(key, correlation_id).await {
            warn!("Failed to record failure of {}: {}", key, e);
        }
    }
}
