use crate::error::{Result, RolloutError};
use crate::types::*;
use super::types::VersionStore;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

impl VersionStore {
    /// Apply `f` to one version under the write lock and persist it
    async fn update_version<F>(&self, key: &VersionKey, f: F) -> Result<ConfigVersion>
    where
        F: FnOnce(&mut ConfigVersion) -> Result<()>,
    {
        let mut versions = self.versions.write().await;
        let current = versions
            .get(&key.host_id)
            .and_then(|v| v.get(&key.version))
            .ok_or_else(|| RolloutError::not_found(format!("Version {} not found", key)))?;

        let mut updated = current.clone();
        f(&mut updated)?;
        self.persist_versions(&[&updated], None)?;

        if let Some(slot) = versions
            .get_mut(&key.host_id)
            .and_then(|v| v.get_mut(&key.version))
        {
            *slot = updated.clone();
        }
        Ok(updated)
    }

    /// Record a future apply time and the watch window to use then
    ///
    /// Drafts stay drafts; deployed versions keep their status until the
    /// scheduler re-applies them.
    pub async fn mark_scheduled(
        &self,
        key: &VersionKey,
        at: DateTime<Utc>,
        watch_window_secs: Option<u64>,
        correlation_id: &str,
    ) -> Result<ConfigVersion> {
        self.update_version(key, |v| {
            if v.status == VersionStatus::Failed {
                return Err(RolloutError::validation(format!(
                    "Version {} failed and cannot be scheduled; create a new version",
                    key
                )));
            }
            v.scheduled_apply_at = Some(at);
            v.scheduled_watch_window_secs = watch_window_secs;
            v.scheduled_attempts = 0;
            v.last_correlation_id = Some(correlation_id.to_string());
            Ok(())
        })
        .await
    }

    /// Count one failed scheduler run; returns the new attempt count
    pub async fn record_scheduled_attempt(&self, key: &VersionKey) -> Result<u32> {
        let updated = self
            .update_version(key, |v| {
                v.scheduled_attempts = v.scheduled_attempts.saturating_add(1);
                Ok(())
            })
            .await?;
        Ok(updated.scheduled_attempts)
    }

    /// Drop a pending schedule without applying it
    pub async fn clear_schedule(&self, key: &VersionKey) -> Result<ConfigVersion> {
        self.update_version(key, |v| {
            v.scheduled_apply_at = None;
            v.scheduled_watch_window_secs = None;
            v.scheduled_attempts = 0;
            Ok(())
        })
        .await
    }

    /// Store the validation result of the latest apply attempt
    pub async fn record_validation(
        &self,
        key: &VersionKey,
        result: &ValidationResult,
    ) -> Result<ConfigVersion> {
        self.update_version(key, |v| {
            v.remote_test_result = Some(result.clone());
            v.last_correlation_id = Some(result.correlation_id.clone());
            Ok(())
        })
        .await
    }

    pub async fn mark_failed(&self, key: &VersionKey, correlation_id: &str) -> Result<ConfigVersion> {
        let updated = self
            .update_version(key, |v| {
                v.status = VersionStatus::Failed;
                v.last_correlation_id = Some(correlation_id.to_string());
                Ok(())
            })
            .await?;
        warn!("Version {} marked failed [{}]", key, correlation_id);
        Ok(updated)
    }

    pub async fn record_health(
        &self,
        key: &VersionKey,
        result: &HealthCheckResult,
    ) -> Result<ConfigVersion> {
        self.update_version(key, |v| {
            v.health_check = Some(result.clone());
            Ok(())
        })
        .await
    }

    /// Flag an applied version as reverted by its health watcher
    ///
    /// The status stays `applied` until a rollback supersedes it, so a failed
    /// rollback leaves the version visibly applied but no longer active.
    pub async fn flag_rollback(&self, key: &VersionKey, reason: &str) -> Result<ConfigVersion> {
        self.update_version(key, |v| {
            if v.status != VersionStatus::Applied {
                return Err(RolloutError::validation(format!(
                    "Version {} is {} and cannot be flagged for rollback",
                    key, v.status
                )));
            }
            v.rollback_triggered = true;
            v.rollback_reason = Some(reason.to_string());
            Ok(())
        })
        .await
    }

    /// Make `key` the active version of its host
    ///
    /// Every other `applied` version of the host becomes `rolled_back` in the
    /// same write batch. Returns the superseded version numbers.
    pub async fn promote_applied(
        &self,
        key: &VersionKey,
        applied_at: DateTime<Utc>,
        watch_window_secs: u64,
        correlation_id: &str,
    ) -> Result<Vec<u64>> {
        let mut versions = self.versions.write().await;
        let host_versions = versions
            .get(&key.host_id)
            .ok_or_else(|| RolloutError::not_found(format!("Host {} has no versions", key.host_id)))?;

        let mut target = host_versions
            .get(&key.version)
            .cloned()
            .ok_or_else(|| RolloutError::not_found(format!("Version {} not found", key)))?;
        target.status = VersionStatus::Applied;
        target.applied_at = Some(applied_at);
        target.watch_window_secs = watch_window_secs;
        target.scheduled_apply_at = None;
        target.scheduled_watch_window_secs = None;
        target.scheduled_attempts = 0;
        target.rollback_triggered = false;
        target.rollback_reason = None;
        target.last_correlation_id = Some(correlation_id.to_string());

        let superseded: Vec<ConfigVersion> = host_versions
            .values()
            .filter(|v| v.version != key.version && v.status == VersionStatus::Applied)
            .map(|v| {
                let mut v = v.clone();
                v.status = VersionStatus::RolledBack;
                v.last_correlation_id = Some(correlation_id.to_string());
                v
            })
            .collect();

        let mut batch: Vec<&ConfigVersion> = superseded.iter().collect();
        batch.push(&target);
        self.persist_versions(&batch, None)?;

        let superseded_numbers: Vec<u64> = superseded.iter().map(|v| v.version).collect();
        if let Some(host_versions) = versions.get_mut(&key.host_id) {
            for v in superseded {
                host_versions.insert(v.version, v);
            }
            host_versions.insert(target.version, target);
        }

        info!(
            "Version {} is now active, superseded {:?} [{}]",
            key, superseded_numbers, correlation_id
        );
        Ok(superseded_numbers)
    }
}
