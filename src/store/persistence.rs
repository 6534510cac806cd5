use crate::error::{Result, RolloutError};
use crate::types::*;
use super::constants::*;
use super::types::VersionStore;
use rocksdb::WriteBatch;
use std::collections::BTreeMap;
use tracing::warn;

impl VersionStore {
    /// Load existing versions from RocksDB into the memory cache
    pub(crate) async fn load_from_disk(&self) -> Result<usize> {
        let cf_versions = self.db.cf_handle(CF_VERSIONS).ok_or_else(|| {
            RolloutError::storage("Versions column family not found".to_string())
        })?;

        let mut versions = self.versions.write().await;
        let mut loaded = 0usize;
        let iter = self
            .db
            .iterator_cf(cf_versions, rocksdb::IteratorMode::Start);
        for item in iter {
            let (_key, value) = item.map_err(|e| {
                RolloutError::storage(format!("Failed to read version: {}", e))
            })?;
            let version: ConfigVersion = serde_json::from_slice(&value).map_err(|e| {
                RolloutError::storage(format!("Failed to deserialize version: {}", e))
            })?;

            versions
                .entry(version.host_id.clone())
                .or_insert_with(BTreeMap::new)
                .insert(version.version, version);
            loaded += 1;
        }

        // The counter is written in the same batch as each new version, so a
        // mismatch means the column families were edited out of band
        for (host_id, host_versions) in versions.iter() {
            let latest = host_versions.keys().next_back().copied().unwrap_or(0);
            let counter = self.read_counter(host_id)?;
            if counter != latest {
                warn!(
                    "Version counter for {} is {} but latest stored version is {}",
                    host_id, counter, latest
                );
            }
        }

        Ok(loaded)
    }

    fn read_counter(&self, host_id: &str) -> Result<u64> {
        let cf_meta = self
            .db
            .cf_handle(CF_META)
            .ok_or_else(|| RolloutError::storage("Meta column family not found".to_string()))?;

        let raw = self
            .db
            .get_cf(cf_meta, make_counter_key(host_id))
            .map_err(|e| RolloutError::storage(format!("Failed to read counter: {}", e)))?;

        match raw {
            Some(bytes) => {
                let bytes: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                    RolloutError::storage(format!("Corrupt version counter for {}", host_id))
                })?;
                Ok(u64::from_be_bytes(bytes))
            }
            None => Ok(0),
        }
    }

    /// Persist versions atomically, optionally bumping a host's counter
    pub(crate) fn persist_versions(
        &self,
        versions: &[&ConfigVersion],
        counter: Option<(&str, u64)>,
    ) -> Result<()> {
        let cf_versions = self.db.cf_handle(CF_VERSIONS).ok_or_else(|| {
            RolloutError::storage("Versions column family not found".to_string())
        })?;

        let mut batch = WriteBatch::default();
        for version in versions {
            let serialized = serde_json::to_vec(version).map_err(|e| {
                RolloutError::storage(format!("Failed to serialize version: {}", e))
            })?;
            batch.put_cf(cf_versions, make_version_key(&version.key()), serialized);
        }

        if let Some((host_id, next)) = counter {
            let cf_meta = self.db.cf_handle(CF_META).ok_or_else(|| {
                RolloutError::storage("Meta column family not found".to_string())
            })?;
            batch.put_cf(cf_meta, make_counter_key(host_id), next.to_be_bytes());
        }

        self.db.write(batch).map_err(|e| {
            RolloutError::storage(format!("Failed to persist versions: {}", e))
        })?;

        Ok(())
    }
}
