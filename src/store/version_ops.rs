use crate::diff::diff_configs;
use crate::error::{Result, RolloutError};
use crate::types::*;
use super::types::VersionStore;
use chrono::Utc;
use tracing::info;

impl VersionStore {
    /// Create the next version for a host
    ///
    /// The number is allocated and the diff against the previous body is
    /// computed under the write lock, so concurrent creates for the same host
    /// get consecutive numbers and each diff is against its true predecessor.
    pub async fn create_version(&self, new: NewVersion) -> Result<ConfigVersion> {
        validate_identifier("host id", &new.host_id)?;
        validate_identifier("config name", &new.config_name)?;
        if new.content.trim().is_empty() {
            return Err(RolloutError::validation(
                "Configuration content cannot be empty",
            ));
        }
        if new.author_id.trim().is_empty() {
            return Err(RolloutError::validation("author_id cannot be empty"));
        }

        let mut versions = self.versions.write().await;
        let host_versions = versions.get(&new.host_id);

        let previous = host_versions.and_then(|v| v.values().next_back());
        let next = previous.map_or(1, |p| p.version + 1);

        let previous_body = previous
            .map(|p| self.secrets.decrypt(&p.content_encrypted))
            .transpose()?;
        let diff = diff_configs(previous_body.as_deref(), &new.content);
        let content_encrypted = self.secrets.encrypt(&new.content)?;

        let version = ConfigVersion {
            host_id: new.host_id.clone(),
            version: next,
            config_name: new.config_name,
            config_type: new.config_type,
            author_id: new.author_id,
            content_encrypted,
            content_hash: content_hash(&new.content),
            summary: new.summary,
            diff,
            status: VersionStatus::Draft,
            watch_window_secs: new.watch_window_secs,
            rollback_triggered: false,
            rollback_reason: None,
            remote_test_result: None,
            health_check: None,
            created_at: Utc::now(),
            applied_at: None,
            scheduled_apply_at: None,
            scheduled_watch_window_secs: None,
            scheduled_attempts: 0,
            last_correlation_id: None,
        };

        self.persist_versions(&[&version], Some((&new.host_id, next)))?;
        versions
            .entry(new.host_id)
            .or_default()
            .insert(next, version.clone());

        info!(
            "Created version {} ({})",
            version.key(),
            version
                .diff
                .as_ref()
                .map_or_else(|| "initial".to_string(), |d| d.summary())
        );
        Ok(version)
    }

    /// Decrypt the body of a stored version and check it against its hash
    pub async fn read_content(&self, key: &VersionKey) -> Result<String> {
        let version = self
            .get_version(key)
            .await
            .ok_or_else(|| RolloutError::not_found(format!("Version {} not found", key)))?;

        let content = self.secrets.decrypt(&version.content_encrypted)?;
        if !version.verify_integrity(&content) {
            return Err(RolloutError::storage(format!(
                "Content hash mismatch for version {}",
                key
            )));
        }
        Ok(content)
    }
}
