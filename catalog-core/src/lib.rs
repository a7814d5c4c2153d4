//! # Catalog Core
//!
//! ## Overview
//!
//! `catalog-core` is the management substrate shared by every catalog
//! plugin (models, datasets, MCP servers, ...). It owns nothing about any
//! particular plugin's data; it only provides the versioned configuration
//! store, the content-hashing and path-safety primitives that store relies
//! on, the wire data model for catalog sources, and the multi-layer source
//! validation pipeline.
//!
//! ## Key Components
//!
//! - [`hash`] — `ContentHasher` (SHA-256 versioning) and `PathGuard`
//!   (traversal/size rejection) used by the file-backed `ConfigStore`.
//! - [`model`] — `CatalogSourcesConfig`, `SourceConfig`, `SecretRef`,
//!   `PropertyValue`, `ConfigRevision`: the durable and wire representation
//!   of a plugin's sources.
//! - [`store`] — the `ConfigStore` trait and its file/record-store
//!   implementations, plus the `retry_on_conflict` helper.
//! - [`validate`] — the ordered validator pipeline (syntactic → structural
//!   → semantic → advisory → provider).

pub mod hash;
pub mod model;
pub mod store;
pub mod validate;

pub use hash::{ContentHasher, PathGuard, PathGuardError};
pub use model::{
    CatalogSection, CatalogSourcesConfig, ConfigRevision, PropertyValue, SecretRef, SourceConfig,
};
pub use store::{retry_on_conflict, ConfigStore, RetryError, StoreError, Version};
pub use validate::{
    DetailedValidationResult, ValidationError, ValidationLayer, ValidationOutcome, Validator,
};
