//! File-backed `ConfigStore`: a YAML document plus a `.history/` snapshot
//! directory, atomic writes, and a bounded, timestamp-ordered revision
//! history (spec §4.B "File variant").

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::hash::{ContentHasher, PathGuard};
use crate::model::{CatalogSourcesConfig, ConfigRevision};
use crate::store::{ConfigStore, StoreError, Version};

/// 1 MiB, the file-variant payload limit (spec §3 invariant iii).
pub const MAX_FILE_BYTES: usize = 1024 * 1024;

/// Newest-first revisions kept in `.history/` before pruning (spec §4.B).
pub const MAX_FILE_REVISIONS: usize = 20;

/// A YAML file on local disk, with atomic replace-on-save and a sibling
/// `.history/` directory of content-hash-named snapshots.
pub struct FileConfigStore {
    path: PathBuf,
    history_dir: PathBuf,
    hasher: ContentHasher,
    guard: PathGuard,
    /// Serializes Load/Save/Rollback within this store instance (spec §5:
    /// "ConfigStore variants serialize Load/Save/Rollback with an internal
    /// mutex per store instance").
    lock: Arc<Mutex<()>>,
}

impl FileConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let history_dir = path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(".history");
        Self {
            path,
            history_dir,
            hasher: ContentHasher::new(),
            guard: PathGuard::new(MAX_FILE_BYTES),
            lock: Arc::new(Mutex::new(())),
        }
    }

    async fn read_bytes(&self) -> Result<Vec<u8>, StoreError> {
        self.guard
            .check_path(&self.path)
            .map_err(|e| StoreError::PathTraversal(e.to_string()))?;
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => {
                self.guard
                    .check_size(&bytes)
                    .map_err(|e| match e {
                        crate::hash::PathGuardError::TooLarge { actual, limit } => {
                            StoreError::FileTooLarge { actual, limit }
                        }
                        other => StoreError::PathTraversal(other.to_string()),
                    })?;
                Ok(bytes)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(serde_yaml::to_vec(&CatalogSourcesConfig::empty())?)
            }
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    async fn snapshot(&self, bytes: &[u8], version: &Version) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.history_dir).await?;
        let name = format!("{}_{}.yaml", Utc::now().timestamp(), version.short());
        let snapshot_path = self.history_dir.join(name);
        tokio::fs::write(&snapshot_path, bytes).await?;
        self.prune_history().await
    }

    /// Keeps the newest `MAX_FILE_REVISIONS` snapshots by filename-ascending
    /// sort (names are `{unix-ts}_{version}.yaml`, so lexical order is
    /// chronological order) and deletes the rest.
    async fn prune_history(&self) -> Result<(), StoreError> {
        let mut entries = Vec::new();
        let mut read_dir = match tokio::fs::read_dir(&self.history_dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(StoreError::Io(e)),
        };
        while let Some(entry) = read_dir.next_entry().await? {
            if entry.file_type().await?.is_file() {
                entries.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        entries.sort();
        if entries.len() > MAX_FILE_REVISIONS {
            let to_remove = entries.len() - MAX_FILE_REVISIONS;
            for name in &entries[..to_remove] {
                let _ = tokio::fs::remove_file(self.history_dir.join(name)).await;
            }
        }
        Ok(())
    }

    /// Temp-file-in-same-directory, write, fsync, rename; the temp file is
    /// removed on any failure path.
    async fn atomic_write(&self, bytes: &[u8]) -> Result<(), StoreError> {
        let dir = self
            .path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;
        let tmp_path = dir.join(format!(
            ".{}.tmp-{}",
            self.path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "config".to_string()),
            uuid::Uuid::new_v4()
        ));

        let write_result = async {
            let mut file = tokio::fs::File::create(&tmp_path).await?;
            file.write_all(bytes).await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&tmp_path, &self.path).await?;
            Ok::<(), std::io::Error>(())
        }
        .await;

        if write_result.is_err() {
            let _ = tokio::fs::remove_file(&tmp_path).await;
        }
        write_result.map_err(StoreError::Io)
    }

    async fn find_snapshot(&self, version_prefix: &str) -> Result<Vec<u8>, StoreError> {
        let mut read_dir = match tokio::fs::read_dir(&self.history_dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::RevisionNotFound(version_prefix.to_string()))
            }
            Err(e) => return Err(StoreError::Io(e)),
        };
        let mut candidates = Vec::new();
        while let Some(entry) = read_dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(&format!("_{}.yaml", version_prefix)) {
                candidates.push(entry.path());
            }
        }
        candidates.sort();
        match candidates.pop() {
            Some(path) => Ok(tokio::fs::read(path).await?),
            None => Err(StoreError::RevisionNotFound(version_prefix.to_string())),
        }
    }
}

#[async_trait]
impl ConfigStore for FileConfigStore {
    async fn load(&self) -> Result<(CatalogSourcesConfig, Version), StoreError> {
        let _guard = self.lock.lock().await;
        let bytes = self.read_bytes().await?;
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
        let current_bytes = self.read_bytes().await?;
        let current_version = self.hasher.hash(&current_bytes);
        if &current_version != expected_version {
            return Err(StoreError::VersionConflict {
                expected: expected_version.0.clone(),
                current: current_version.0,
            });
        }

        self.snapshot(&current_bytes, &current_version).await?;

        let new_bytes = serde_yaml::to_vec(config)?;
        self.guard
            .check_size(&new_bytes)
            .map_err(|e| match e {
                crate::hash::PathGuardError::TooLarge { actual, limit } => {
                    StoreError::FileTooLarge { actual, limit }
                }
                other => StoreError::PathTraversal(other.to_string()),
            })?;
        self.atomic_write(&new_bytes).await?;
        Ok(self.hasher.hash(&new_bytes))
    }

    async fn list_revisions(&self) -> Result<Vec<ConfigRevision>, StoreError> {
        let mut entries = match tokio::fs::read_dir(&self.history_dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::Io(e)),
        };
        let mut revisions = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(stem) = name.strip_suffix(".yaml") else {
                continue;
            };
            let Some((ts, version_short)) = stem.split_once('_') else {
                continue;
            };
            let Ok(ts) = ts.parse::<i64>() else { continue };
            let Some(timestamp) = chrono::DateTime::from_timestamp(ts, 0) else {
                continue;
            };
            let size = entry.metadata().await.map(|m| m.len() as usize).unwrap_or(0);
            revisions.push(ConfigRevision {
                version: version_short.to_string(),
                timestamp,
                size,
            });
        }
        // Newest-first by timestamp.
        revisions.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(revisions)
    }

    async fn rollback(&self, version: &str) -> Result<(CatalogSourcesConfig, Version), StoreError> {
        let prefix = &version[..version.len().min(8)];
        let snapshot_bytes = self.find_snapshot(prefix).await?;
        let config: CatalogSourcesConfig = serde_yaml::from_slice(&snapshot_bytes)?;

        let current_bytes = self.read_bytes().await?;
        let current_version = self.hasher.hash(&current_bytes);

        let new_version = self.save(&config, &current_version).await?;
        Ok((config, new_version))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn temp_store() -> (tempfile::TempDir, FileConfigStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileConfigStore::new(dir.path().join("sources.yaml"));
        (dir, store)
    }

    #[tokio::test]
    async fn load_on_missing_file_returns_empty_config() {
        let (_dir, store) = temp_store().await;
        let (config, _version) = store.load().await.unwrap();
        assert!(config.catalogs.is_empty());
    }

    #[tokio::test]
    async fn save_then_load_round_trips_and_changes_version_iff_bytes_change() {
        let (_dir, store) = temp_store().await;
        let (mut config, v0) = store.load().await.unwrap();
        config.section_mut("models").sources.push(crate::model::SourceConfig {
            id: "src-1".into(),
            name: "One".into(),
            source_type: "yaml".into(),
            enabled: true,
            labels: Default::default(),
            properties: Default::default(),
        });
        let v1 = store.save(&config, &v0).await.unwrap();
        assert_ne!(v0, v1);

        let (reloaded, v1_again) = store.load().await.unwrap();
        assert_eq!(reloaded, config);
        assert_eq!(v1, v1_again);

        // Saving byte-identical content again should not change the version.
        let v2 = store.save(&config, &v1).await.unwrap();
        assert_eq!(v1, v2);
    }

    #[tokio::test]
    async fn stale_version_is_rejected_and_bytes_unchanged() {
        let (_dir, store) = temp_store().await;
        let (config, v0) = store.load().await.unwrap();
        let stale = Version("0".repeat(64));
        let err = store.save(&config, &stale).await.unwrap_err();
        assert!(matches!(err, StoreError::VersionConflict { .. }));

        let (after, v_after) = store.load().await.unwrap();
        assert_eq!(after, config);
        assert_eq!(v0, v_after);
    }

    #[tokio::test]
    async fn revision_history_is_bounded_and_newest_first() {
        let (_dir, store) = temp_store().await;
        let (mut config, mut version) = store.load().await.unwrap();
        for i in 0..(MAX_FILE_REVISIONS + 5) {
            config.section_mut("models").sources = vec![crate::model::SourceConfig {
                id: format!("src-{i}"),
                name: format!("Source {i}"),
                source_type: "yaml".into(),
                enabled: true,
                labels: Default::default(),
                properties: Default::default(),
            }];
            version = store.save(&config, &version).await.unwrap();
        }
        let revisions = store.list_revisions().await.unwrap();
        assert!(revisions.len() <= MAX_FILE_REVISIONS);
        for pair in revisions.windows(2) {
            assert!(pair[0].timestamp >= pair[1].timestamp);
        }
    }

    #[tokio::test]
    async fn rollback_restores_byte_identical_config_and_records_new_revision() {
        let (_dir, store) = temp_store().await;
        let (config0, v0) = store.load().await.unwrap();
        let revisions0 = store.list_revisions().await.unwrap();

        let mut config1 = config0.clone();
        config1.section_mut("models").sources.push(crate::model::SourceConfig {
            id: "src-1".into(),
            name: "One".into(),
            source_type: "yaml".into(),
            enabled: true,
            labels: Default::default(),
            properties: Default::default(),
        });
        let v1 = store.save(&config1, &v0).await.unwrap();

        let (rolled_back, v2) = store.rollback(v0.short()).await.unwrap();
        assert_eq!(rolled_back, config0);
        assert_ne!(v2, v1);

        let revisions2 = store.list_revisions().await.unwrap();
        assert!(revisions2.len() >= revisions0.len());
    }

    #[tokio::test]
    async fn oversized_payload_is_rejected() {
        let (_dir, store) = temp_store().await;
        let (mut config, v0) = store.load().await.unwrap();
        let huge_value = "x".repeat(MAX_FILE_BYTES + 1);
        let mut properties = std::collections::BTreeMap::new();
        properties.insert(
            "content".to_string(),
            crate::model::PropertyValue::String(huge_value),
        );
        config.section_mut("models").sources.push(crate::model::SourceConfig {
            id: "src-huge".into(),
            name: "Huge".into(),
            source_type: "yaml".into(),
            enabled: true,
            labels: Default::default(),
            properties,
        });
        let err = store.save(&config, &v0).await.unwrap_err();
        assert!(matches!(err, StoreError::FileTooLarge { .. }));
    }
}
