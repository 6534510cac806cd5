use crate::secrets::SecretStore;
use crate::types::{ConfigVersion, HostId};
use rocksdb::DB;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Per-host version history
pub(crate) type HostVersions = BTreeMap<u64, ConfigVersion>;

/// Version store with RocksDB backend and an in-memory cache
///
/// Every mutation takes the cache write lock, persists to RocksDB in one
/// write batch and only then updates the cache, so readers never observe a
/// state that is not on disk.
#[derive(Clone)]
pub struct VersionStore {
    /// RocksDB instance for persistent storage
    pub(crate) db: Arc<DB>,

    /// In-memory cache of all versions, keyed by host then version number
    pub(crate) versions: Arc<RwLock<BTreeMap<HostId, HostVersions>>>,

    /// Seals configuration bodies at rest
    pub(crate) secrets: Arc<dyn SecretStore>,
}

impl std::fmt::Debug for VersionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionStore")
            .field("key_id", &self.secrets.key_id())
            .finish_non_exhaustive()
    }
}
