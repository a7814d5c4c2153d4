//! The versioned configuration store (spec §4.B).
//!
//! `ConfigStore` is implemented twice — [`file::FileConfigStore`] backed by
//! a YAML file plus a `.history/` snapshot directory, and
//! [`record::RecordConfigStore`] backed by a `sled` tree keyed the way a
//! namespaced record store with annotations would be. Both share the same
//! optimistic-concurrency contract: `Version` is the content hash of the
//! serialized bytes, and `Save`/`Rollback` re-validate it under lock before
//! writing.

pub mod file;
pub mod record;

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::CatalogSourcesConfig;

/// The SHA-256 hex digest of a document's serialized bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Version(pub String);

impl Version {
    /// First 8 hex characters, used as the snapshot/annotation key suffix.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(8)]
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Typed sentinels a `ConfigStore` returns; `catalog-api` maps each to an
/// HTTP status per spec §7.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("version conflict: expected {expected}, current is {current}")]
    VersionConflict { expected: String, current: String },

    #[error("no revision found for version prefix {0}")]
    RevisionNotFound(String),

    #[error("config payload of {actual} bytes exceeds the {limit} byte limit")]
    FileTooLarge { actual: usize, limit: usize },

    #[error("path traversal rejected: {0}")]
    PathTraversal(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_yaml::Error),

    #[error("store backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

/// Four operations every `ConfigStore` implementation provides (spec §4.B).
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn load(&self) -> Result<(CatalogSourcesConfig, Version), StoreError>;

    async fn save(
        &self,
        config: &CatalogSourcesConfig,
        expected_version: &Version,
    ) -> Result<Version, StoreError>;

    async fn list_revisions(&self) -> Result<Vec<crate::model::ConfigRevision>, StoreError>;

    async fn rollback(
        &self,
        version: &str,
    ) -> Result<(CatalogSourcesConfig, Version), StoreError>;

    /// Optional change-notification channel. The default returns `None`;
    /// both shipped variants rely on the server's 30s reconciliation poll
    /// instead (spec §4.B "Watch").
    async fn watch(&self) -> Option<tokio::sync::watch::Receiver<()>> {
        None
    }
}

/// Error returned by [`retry_on_conflict`] once its attempt budget is
/// exhausted, or immediately for any non-conflict error from `mutate` or
/// the store.
#[derive(Debug, Error)]
pub enum RetryError {
    #[error("exhausted {attempts} attempts, still conflicting")]
    ExhaustedAttempts { attempts: u32 },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// `Load -> mutate copy -> Save`, retrying from a fresh `Load` on
/// `VersionConflict` up to `max_attempts` times. Any other error aborts
/// immediately (spec §4.B, §9 "Retry-on-conflict").
pub async fn retry_on_conflict<S, F>(
    store: &S,
    max_attempts: u32,
    mut mutate: F,
) -> Result<(CatalogSourcesConfig, Version), RetryError>
where
    S: ConfigStore + ?Sized,
    F: FnMut(&mut CatalogSourcesConfig),
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        let (mut config, version) = store.load().await?;
        mutate(&mut config);
        match store.save(&config, &version).await {
            Ok(new_version) => return Ok((config, new_version)),
            Err(StoreError::VersionConflict { .. }) if attempt < max_attempts => {
                tracing::debug!(attempt, max_attempts, "retrying after version conflict");
                continue;
            }
            Err(StoreError::VersionConflict { .. }) => {
                return Err(RetryError::ExhaustedAttempts { attempts: attempt })
            }
            Err(other) => return Err(RetryError::Store(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_short_is_first_eight_hex_chars() {
        let v = Version("abcdef0123456789".to_string());
        assert_eq!(v.short(), "abcdef01");
    }
}
