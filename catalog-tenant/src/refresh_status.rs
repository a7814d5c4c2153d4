//! Durable refresh-status persistence, keyed by `{namespace, source-id}`.
//! Survives restarts so `GET /sources` can enrich in-flight `SourceInfo`
//! with the last refresh outcome even right after the server comes back up
//! and before any plugin has refreshed again.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use catalog_core::model::normalize_namespace;

/// `{namespace, source-id}` primary key, with `plugin` indexed alongside
/// it so `list_refresh_statuses(namespace, plugin)` can scan by prefix.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RefreshStatusKey {
    pub namespace: String,
    pub plugin: String,
    pub source_id: String,
}

impl RefreshStatusKey {
    pub fn new(namespace: &str, plugin: impl Into<String>, source_id: impl Into<String>) -> Self {
        Self {
            namespace: normalize_namespace(namespace).to_string(),
            plugin: plugin.into(),
            source_id: source_id.into(),
        }
    }

    fn storage_key(&self) -> Vec<u8> {
        format!("{}\0{}\0{}", self.namespace, self.plugin, self.source_id).into_bytes()
    }

    fn scan_prefix(namespace: &str, plugin: &str) -> Vec<u8> {
        format!("{}\0{}\0", normalize_namespace(namespace), plugin).into_bytes()
    }
}

/// `success` or `error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshOutcome {
    Success,
    Error,
}

/// The body of a refresh-status row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RefreshStatusRecord {
    pub last_refresh_time: DateTime<Utc>,
    pub last_refresh_status: RefreshOutcome,
    #[serde(default)]
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default)]
    pub entities_loaded: u64,
    #[serde(default)]
    pub entities_removed: u64,
    pub duration_ms: u64,
}

#[derive(Debug, Error)]
pub enum RefreshStatusError {
    #[error("refresh status store backend error: {0}")]
    Backend(#[from] anyhow::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// A `sled`-backed store of [`RefreshStatusRecord`]s, one row per
/// `{namespace, source-id}`.
pub struct RefreshStatusStore {
    tree: sled::Tree,
}

impl RefreshStatusStore {
    pub fn open(db: &sled::Db, tree_name: &str) -> Result<Self, RefreshStatusError> {
        let tree = db.open_tree(tree_name).map_err(|e| anyhow::anyhow!(e))?;
        Ok(Self { tree })
    }

    /// Upserts the row at `key`, replacing any prior record wholesale.
    pub fn upsert(
        &self,
        key: &RefreshStatusKey,
        record: &RefreshStatusRecord,
    ) -> Result<(), RefreshStatusError> {
        let bytes = serde_json::to_vec(record)?;
        self.tree
            .insert(key.storage_key(), bytes)
            .map_err(|e| anyhow::anyhow!(e))?;
        Ok(())
    }

    pub fn get(
        &self,
        key: &RefreshStatusKey,
    ) -> Result<Option<RefreshStatusRecord>, RefreshStatusError> {
        match self.tree.get(key.storage_key()).map_err(|e| anyhow::anyhow!(e))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn delete(&self, key: &RefreshStatusKey) -> Result<(), RefreshStatusError> {
        self.tree.remove(key.storage_key()).map_err(|e| anyhow::anyhow!(e))?;
        Ok(())
    }

    /// All rows for `{namespace, plugin}`, keyed by source id — used by
    /// `GET /sources` to enrich the in-flight source list.
    pub fn list_for_plugin(
        &self,
        namespace: &str,
        plugin: &str,
    ) -> Result<BTreeMap<String, RefreshStatusRecord>, RefreshStatusError> {
        let prefix = RefreshStatusKey::scan_prefix(namespace, plugin);
        let mut out = BTreeMap::new();
        for entry in self.tree.scan_prefix(&prefix) {
            let (key, value) = entry.map_err(|e| anyhow::anyhow!(e))?;
            let key_str = String::from_utf8_lossy(&key).into_owned();
            let Some(source_id) = key_str.rsplit('\0').next() else {
                continue;
            };
            out.insert(source_id.to_string(), serde_json::from_slice(&value)?);
        }
        Ok(out)
    }

    /// Deletes every row for `{namespace, plugin}`, used on plugin
    /// unmount/cleanup.
    pub fn delete_all_for_plugin(&self, namespace: &str, plugin: &str) -> Result<(), RefreshStatusError> {
        let prefix = RefreshStatusKey::scan_prefix(namespace, plugin);
        let keys: Vec<_> = self
            .tree
            .scan_prefix(&prefix)
            .keys()
            .filter_map(|k| k.ok())
            .collect();
        for key in keys {
            self.tree.remove(key).map_err(|e| anyhow::anyhow!(e))?;
        }
        Ok(())
    }
}
