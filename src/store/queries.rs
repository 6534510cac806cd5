use crate::types::*;
use super::types::VersionStore;
use chrono::{DateTime, Utc};

impl VersionStore {
    pub async fn get_version(&self, key: &VersionKey) -> Option<ConfigVersion> {
        self.versions
            .read()
            .await
            .get(&key.host_id)?
            .get(&key.version)
            .cloned()
    }

    /// All versions of a host, newest first
    pub async fn list_versions(&self, host_id: &str) -> Vec<ConfigVersion> {
        self.versions
            .read()
            .await
            .get(host_id)
            .map(|v| v.values().rev().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn latest_version(&self, host_id: &str) -> Option<ConfigVersion> {
        self.versions
            .read()
            .await
            .get(host_id)?
            .values()
            .next_back()
            .cloned()
    }

    /// The applied, non-reverted version of a host
    pub async fn active_version(&self, host_id: &str) -> Option<ConfigVersion> {
        self.versions
            .read()
            .await
            .get(host_id)?
            .values()
            .rev()
            .find(|v| v.is_active())
            .cloned()
    }

    /// Most recently applied version that was never reverted by a watcher
    pub async fn last_known_good(&self, host_id: &str) -> Option<ConfigVersion> {
        self.versions
            .read()
            .await
            .get(host_id)?
            .values()
            .filter(|v| v.is_known_good())
            .max_by_key(|v| (v.applied_at, v.version))
            .cloned()
    }

    /// Versions whose scheduled apply time has passed
    ///
    /// Failed versions never apply, so their schedules are ignored.
    pub async fn due_scheduled(&self, now: DateTime<Utc>) -> Vec<VersionKey> {
        self.versions
            .read()
            .await
            .values()
            .flat_map(|v| v.values())
            .filter(|v| {
                v.status != VersionStatus::Failed
                    && v.scheduled_apply_at.is_some_and(|at| at <= now)
            })
            .map(|v| v.key())
            .collect()
    }

    pub async fn hosts(&self) -> Vec<HostId> {
        self.versions.read().await.keys().cloned().collect()
    }
}
