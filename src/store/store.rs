use crate::error::Result;
use crate::secrets::SecretStore;
use super::constants::*;
use super::types::VersionStore;
use rocksdb::{ColumnFamilyDescriptor, Options as RocksDbOptions, DB};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

impl VersionStore {
    /// Open (or create) the store at `path` and load it into memory
    pub async fn open<P: AsRef<Path>>(path: P, secrets: Arc<dyn SecretStore>) -> Result<Self> {
        // Create RocksDB options
        let mut opts = RocksDbOptions::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        // Define column families
        let cfs = vec![
            ColumnFamilyDescriptor::new(CF_VERSIONS, RocksDbOptions::default()),
            ColumnFamilyDescriptor::new(CF_META, RocksDbOptions::default()),
        ];

        // Open database
        let db = DB::open_cf_descriptors(&opts, path.as_ref(), cfs).map_err(|e| {
            crate::error::RolloutError::storage(format!("Failed to open RocksDB: {}", e))
        })?;

        let store = Self {
            db: Arc::new(db),
            versions: Arc::new(RwLock::new(BTreeMap::new())),
            secrets,
        };

        // Load existing data from RocksDB into memory cache
        let loaded = store.load_from_disk().await?;
        info!(
            "Version store opened at {} with {} versions",
            path.as_ref().display(),
            loaded
        );

        Ok(store)
    }
}
