//! `sled`-backed `ConfigStore`: the document lives under a fixed `data` key
//! in its own tree, and each save snapshots the previous bytes under a
//! `rev-{versionShort8}` key with a JSON-encoded index tracking insertion
//! order (spec §4.B "Record variant").

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::hash::{ContentHasher, PathGuard, PathGuardError};
use crate::model::{CatalogSourcesConfig, ConfigRevision};
use crate::store::{ConfigStore, StoreError, Version};

const DATA_KEY: &[u8] = b"data";
const INDEX_KEY: &[u8] = b"rev-index";

/// Revisions kept before the oldest is evicted (spec §4.B "Record variant").
pub const MAX_RECORD_REVISIONS: usize = 10;

/// 900 KiB, the record-store data-slot payload limit (spec §3 invariant iii).
pub const MAX_RECORD_BYTES: usize = 900 * 1024;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct IndexEntry {
    version: String,
    timestamp: chrono::DateTime<Utc>,
    size: usize,
}

/// A `CatalogSourcesConfig` stored in a `sled::Tree`, revisioned the same
/// way [`super::file::FileConfigStore`] is but without touching the
/// filesystem directly — the substrate for deployments that run the
/// management server without a mounted config volume.
pub struct RecordConfigStore {
    tree: sled::Tree,
    hasher: ContentHasher,
    guard: PathGuard,
    lock: Arc<Mutex<()>>,
}

impl RecordConfigStore {
    pub fn open(db: &sled::Db, tree_name: &str) -> Result<Self, StoreError> {
        let tree = db
            .open_tree(tree_name)
            .map_err(|e| StoreError::Backend(anyhow::anyhow!(e)))?;
        Ok(Self {
            tree,
            hasher: ContentHasher::new(),
            guard: PathGuard::new(MAX_RECORD_BYTES),
            lock: Arc::new(Mutex::new(())),
        })
    }

    fn current_bytes(&self) -> Result<Vec<u8>, StoreError> {
        match self
            .tree
            .get(DATA_KEY)
            .map_err(|e| StoreError::Backend(anyhow::anyhow!(e)))?
        {
            Some(ivec) => Ok(ivec.to_vec()),
            None => Ok(serde_yaml::to_vec(&CatalogSourcesConfig::empty())?),
        }
    }

    fn index(&self) -> Result<Vec<IndexEntry>, StoreError> {
        match self
            .tree
            .get(INDEX_KEY)
            .map_err(|e| StoreError::Backend(anyhow::anyhow!(e)))?
        {
            Some(ivec) => serde_json::from_slice(&ivec)
                .map_err(|e| StoreError::Backend(anyhow::anyhow!(e))),
            None => Ok(Vec::new()),
        }
    }

    fn write_index(&self, index: &[IndexEntry]) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(index).map_err(|e| StoreError::Backend(anyhow::anyhow!(e)))?;
        self.tree
            .insert(INDEX_KEY, bytes)
            .map_err(|e| StoreError::Backend(anyhow::anyhow!(e)))?;
        Ok(())
    }

    fn snapshot_key(version_short: &str) -> Vec<u8> {
        format!("rev-{version_short}").into_bytes()
    }

    fn snapshot(&self, bytes: &[u8], version: &Version) -> Result<(), StoreError> {
        self.tree
            .insert(Self::snapshot_key(version.short()), bytes)
            .map_err(|e| StoreError::Backend(anyhow::anyhow!(e)))?;

        let mut index = self.index()?;
        index.push(IndexEntry {
            version: version.short().to_string(),
            timestamp: Utc::now(),
            size: bytes.len(),
        });
        if index.len() > MAX_RECORD_REVISIONS {
            let evicted = index.remove(0);
            let _ = self.tree.remove(Self::snapshot_key(&evicted.version));
        }
        self.write_index(&index)
    }
}

#[async_trait]
impl ConfigStore for RecordConfigStore {
    async fn load(&self) -> Result<(CatalogSourcesConfig, Version), StoreError> {
        let _guard = self.lock.lock().await;
        let bytes = self.current_bytes()?;
        let version = self.hasher.hash(&bytes);
        let config: CatalogSourcesConfig = serde_yaml::from_slice(&bytes)?;
        Ok((config, version))
    }

    async fn save(
        &self,
        config: &CatalogSourcesConfig,
        expected_version: &Version,
    ) -> Result<Version, StoreError> {
        let _guard = self.lock.lock().await;
        let current_bytes = self.current_bytes()?;
        let current_version = self.hasher.hash(&current_bytes);
        if &current_version != expected_version {
            return Err(StoreError::VersionConflict {
                expected: expected_version.0.clone(),
                current: current_version.0,
            });
        }

        let new_bytes = serde_yaml::to_vec(config)?;
        self.guard.check_size(&new_bytes).map_err(|e| match e {
            PathGuardError::TooLarge { actual, limit } => StoreError::FileTooLarge { actual, limit },
            other => StoreError::Backend(anyhow::anyhow!(other)),
        })?;

        self.snapshot(&current_bytes, &current_version)?;

        self.tree
            .insert(DATA_KEY, new_bytes.clone())
            .map_err(|e| StoreError::Backend(anyhow::anyhow!(e)))?;
        self.tree
            .flush_async()
            .await
            .map_err(|e| StoreError::Backend(anyhow::anyhow!(e)))?;
        Ok(self.hasher.hash(&new_bytes))
    }

    async fn list_revisions(&self) -> Result<Vec<ConfigRevision>, StoreError> {
        let mut revisions: Vec<ConfigRevision> = self
            .index()?
            .into_iter()
            .map(|entry| ConfigRevision {
                version: entry.version,
                timestamp: entry.timestamp,
                size: entry.size,
            })
            .collect();
        revisions.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(revisions)
    }

    async fn rollback(&self, version: &str) -> Result<(CatalogSourcesConfig, Version), StoreError> {
        let _guard = self.lock.lock().await;
        let prefix = &version[..version.len().min(8)];
        let snapshot_bytes = self
            .tree
            .get(Self::snapshot_key(prefix))
            .map_err(|e| StoreError::Backend(anyhow::anyhow!(e)))?
            .ok_or_else(|| StoreError::RevisionNotFound(prefix.to_string()))?
            .to_vec();
        let config: CatalogSourcesConfig = serde_yaml::from_slice(&snapshot_bytes)?;

        let current_bytes = self.current_bytes()?;
        let current_version = self.hasher.hash(&current_bytes);
        self.snapshot(&current_bytes, &current_version)?;

        self.tree
            .insert(DATA_KEY, snapshot_bytes.clone())
            .map_err(|e| StoreError::Backend(anyhow::anyhow!(e)))?;
        self.tree
            .flush_async()
            .await
            .map_err(|e| StoreError::Backend(anyhow::anyhow!(e)))?;
        let new_version = self.hasher.hash(&snapshot_bytes);
        Ok((config, new_version))
    }
}
