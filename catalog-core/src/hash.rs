//! Content hashing and path safety for the file-backed configuration store.
//!
//! `ContentHasher` gives every persisted config document its `Version`: the
//! SHA-256 hex digest of its serialized bytes. `PathGuard` rejects the two
//! ways a path derived from user input could escape the store's directory
//! or blow past its size budget — `..` traversal and oversized files.

use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::store::Version;

/// Hashes configuration bytes into a `Version`.
///
/// Stateless by design: every call re-derives the digest from the bytes
/// given, so two stores never need to agree on anything but the bytes
/// themselves to agree on a version.
#[derive(Debug, Default, Clone, Copy)]
pub struct ContentHasher;

impl ContentHasher {
    pub fn new() -> Self {
        Self
    }

    /// SHA-256 hex digest of `bytes`, used as the document's `Version`.
    pub fn hash(&self, bytes: &[u8]) -> Version {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Version(hex::encode(hasher.finalize()))
    }
}

/// Errors raised while validating a path or payload against store limits.
#[derive(Debug, Error)]
pub enum PathGuardError {
    #[error("path contains a '..' traversal segment: {0}")]
    Traversal(String),

    #[error("config payload of {actual} bytes exceeds the {limit} byte limit")]
    TooLarge { actual: usize, limit: usize },
}

/// Rejects `..` traversal and oversized payloads ahead of any filesystem or
/// record-store write.
#[derive(Debug, Clone, Copy)]
pub struct PathGuard {
    max_bytes: usize,
}

impl PathGuard {
    pub fn new(max_bytes: usize) -> Self {
        Self { max_bytes }
    }

    /// Rejects any path with a literal `..` component, regardless of
    /// whether the filesystem would actually resolve it outside the store
    /// root — the check is structural, not a `canonicalize` round trip,
    /// so it also works against the config-map variant's virtual paths.
    pub fn check_path(&self, path: &std::path::Path) -> Result<(), PathGuardError> {
        for component in path.components() {
            if component == std::path::Component::ParentDir {
                return Err(PathGuardError::Traversal(path.display().to_string()));
            }
        }
        Ok(())
    }

    pub fn check_size(&self, bytes: &[u8]) -> Result<(), PathGuardError> {
        if bytes.len() > self.max_bytes {
            return Err(PathGuardError::TooLarge {
                actual: bytes.len(),
                limit: self.max_bytes,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable_and_sensitive_to_content() {
        let hasher = ContentHasher::new();
        let a = hasher.hash(b"hello");
        let b = hasher.hash(b"hello");
        let c = hasher.hash(b"hello!");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.0.len(), 64);
    }

    #[test]
    fn guard_rejects_traversal() {
        let guard = PathGuard::new(1024);
        assert!(guard
            .check_path(std::path::Path::new("../../etc/passwd"))
            .is_err());
        assert!(guard.check_path(std::path::Path::new("models/a.yaml")).is_ok());
    }

    #[test]
    fn guard_enforces_size_boundary() {
        let guard = PathGuard::new(4);
        assert!(guard.check_size(b"1234").is_ok());
        assert!(guard.check_size(b"12345").is_err());
    }
}
