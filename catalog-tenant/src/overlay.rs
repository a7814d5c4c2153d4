//! Per-tenant CRUD of user-applied metadata overlays.
//!
//! An overlay is keyed by `{namespace, plugin, entity_kind, entity_uid}`
//! and carries the bits a catalog UI layers on top of plugin-reported
//! entity info: tags, annotations, labels, and a lifecycle phase. The
//! three builtin action handlers (`tag`, `annotate`, `deprecate`) are the
//! only writers most deployments ever need; `OverlayStore` itself is a
//! plain composite-key store underneath them.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use catalog_core::model::normalize_namespace;

/// `{namespace, plugin-name, entity-kind, entity-uid}` — the composite
/// primary key every overlay row is addressed by.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OverlayKey {
    pub namespace: String,
    pub plugin: String,
    pub entity_kind: String,
    pub entity_uid: String,
}

impl OverlayKey {
    pub fn new(
        namespace: &str,
        plugin: impl Into<String>,
        entity_kind: impl Into<String>,
        entity_uid: impl Into<String>,
    ) -> Self {
        Self {
            namespace: normalize_namespace(namespace).to_string(),
            plugin: plugin.into(),
            entity_kind: entity_kind.into(),
            entity_uid: entity_uid.into(),
        }
    }

    fn storage_key(&self) -> Vec<u8> {
        format!(
            "{}\0{}\0{}\0{}",
            self.namespace, self.plugin, self.entity_kind, self.entity_uid
        )
        .into_bytes()
    }

    /// The namespace/plugin prefix used to scan rows for one plugin, e.g.
    /// when a plugin is removed and its overlays must be bulk-deleted.
    fn scan_prefix(namespace: &str, plugin: &str) -> Vec<u8> {
        format!("{}\0{}\0", normalize_namespace(namespace), plugin).into_bytes()
    }
}

/// The body of an overlay row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct OverlayRecord {
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub lifecycle: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum OverlayError {
    #[error("overlay store backend error: {0}")]
    Backend(#[from] anyhow::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// A `sled`-backed composite-key store for [`OverlayRecord`]s.
pub struct OverlayStore {
    tree: sled::Tree,
}

impl OverlayStore {
    pub fn open(db: &sled::Db, tree_name: &str) -> Result<Self, OverlayError> {
        let tree = db.open_tree(tree_name).map_err(|e| anyhow::anyhow!(e))?;
        Ok(Self { tree })
    }

    /// Returns `Ok(None)` on miss — a miss is not an error.
    pub fn get(&self, key: &OverlayKey) -> Result<Option<OverlayRecord>, OverlayError> {
        match self.tree.get(key.storage_key()).map_err(|e| anyhow::anyhow!(e))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Replaces the row at `key` wholesale.
    pub fn upsert(&self, key: &OverlayKey, record: &OverlayRecord) -> Result<(), OverlayError> {
        let bytes = serde_json::to_vec(record)?;
        self.tree
            .insert(key.storage_key(), bytes)
            .map_err(|e| anyhow::anyhow!(e))?;
        Ok(())
    }

    pub fn delete(&self, key: &OverlayKey) -> Result<(), OverlayError> {
        self.tree
            .remove(key.storage_key())
            .map_err(|e| anyhow::anyhow!(e))?;
        Ok(())
    }

    /// Deletes every overlay row for `{namespace, plugin}`, used when a
    /// plugin is unmounted.
    pub fn delete_all_for_plugin(&self, namespace: &str, plugin: &str) -> Result<(), OverlayError> {
        let prefix = OverlayKey::scan_prefix(namespace, plugin);
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

/// `dryRun=true` on a builtin handler returns this without touching the
/// store — a dry run must never create a row as a side effect.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DryRunResult {
    pub status: &'static str,
    pub preview: OverlayRecord,
}

/// `tag`: replaces `tags` wholesale, creating the row if absent.
pub fn apply_tag(
    store: &OverlayStore,
    key: &OverlayKey,
    tags: Vec<String>,
    dry_run: bool,
) -> Result<Result<OverlayRecord, DryRunResult>, OverlayError> {
    let mut record = store.get(key)?.unwrap_or_default();
    record.tags = tags;
    record.updated_at = Utc::now();
    if dry_run {
        return Ok(Err(DryRunResult {
            status: "dry-run",
            preview: record,
        }));
    }
    store.upsert(key, &record)?;
    Ok(Ok(record))
}

/// `annotate`: merges into existing annotations; new keys win on conflict.
pub fn apply_annotate(
    store: &OverlayStore,
    key: &OverlayKey,
    annotations: BTreeMap<String, String>,
    dry_run: bool,
) -> Result<Result<OverlayRecord, DryRunResult>, OverlayError> {
    let mut record = store.get(key)?.unwrap_or_default();
    record.annotations.extend(annotations);
    record.updated_at = Utc::now();
    if dry_run {
        return Ok(Err(DryRunResult {
            status: "dry-run",
            preview: record,
        }));
    }
    store.upsert(key, &record)?;
    Ok(Ok(record))
}

/// `deprecate`: sets `lifecycle` to `phase`, defaulting to `"deprecated"`.
pub fn apply_deprecate(
    store: &OverlayStore,
    key: &OverlayKey,
    phase: Option<String>,
    dry_run: bool,
) -> Result<Result<OverlayRecord, DryRunResult>, OverlayError> {
    let mut record = store.get(key)?.unwrap_or_default();
    record.lifecycle = phase.unwrap_or_else(|| "deprecated".to_string());
    record.updated_at = Utc::now();
    if dry_run {
        return Ok(Err(DryRunResult {
            status: "dry-run",
            preview: record,
        }));
    }
    store.upsert(key, &record)?;
    Ok(Ok(record))
}
