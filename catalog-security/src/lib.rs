//! # Catalog Security
//!
//! ## Overview
//!
//! `catalog-security` owns two narrow jobs for every catalog plugin:
//! resolving a [`catalog_core::SecretRef`] against an external secret
//! backend before a plugin operation runs, and redacting sensitive-looking
//! plain-string properties before a `SourceConfig` is ever sent back over
//! HTTP.
//!
//! Persisted config and resolved runtime config are deliberately different
//! shapes: `ConfigStore` only ever sees unresolved `SecretRef`s, a plugin
//! operation only ever sees resolved strings, and an HTTP response only
//! ever sees redacted output. Mixing these up is the one mistake this
//! crate exists to make impossible to make by accident.

use std::collections::BTreeMap;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use catalog_core::{PropertyValue, SecretRef};

/// Property key substrings that mark a plain-string value as sensitive
/// (spec §4.C `RedactSensitiveProperties`), matched case-insensitively.
const SENSITIVE_SUBSTRINGS: &[&str] = &["password", "token", "secret", "apikey", "api_key", "credential"];

static SENSITIVE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    let alternation = SENSITIVE_SUBSTRINGS.join("|");
    Regex::new(&format!("(?i){alternation}")).unwrap()
});

/// Errors raised resolving a `SecretRef` against a [`SecretBackend`].
#[derive(Debug, Error)]
pub enum SecretError {
    #[error("secret {name} in namespace {namespace} not found")]
    NotFound { namespace: String, name: String },

    #[error("secret {name} in namespace {namespace} has no key {key}")]
    KeyNotFound {
        namespace: String,
        name: String,
        key: String,
    },

    #[error("failed to resolve secret {name}/{key}: {source}")]
    Backend {
        name: String,
        key: String,
        #[source]
        source: anyhow::Error,
    },
}

/// The external secret store a deployment plugs in — a Kubernetes Secret
/// lookup, a Vault client, an env-var map for local development, and so
/// on. Mirrors the `ConfigSource`/`SecretManager` seam a config-manager
/// layer typically exposes for external credential stores.
#[async_trait]
pub trait SecretBackend: Send + Sync {
    /// Returns the raw string value for `{namespace, name, key}`.
    async fn get(&self, namespace: &str, name: &str, key: &str) -> Result<String, SecretError>;
}

/// Structural SecretRef detection: true for any `PropertyValue::SecretRef`.
/// Exposed so callers that only have a `serde_json::Value` in hand can
/// route it through [`catalog_core::PropertyValue::from_json`] first and
/// then ask this question uniformly.
pub fn is_secret_ref(value: &PropertyValue) -> bool {
    matches!(value, PropertyValue::SecretRef(_))
}

/// `Resolve(ref)`: look up `{namespace or "default", name}` in `backend`
/// and return the raw string at `key` (spec §4.C).
pub async fn resolve_secret_ref(
    backend: &dyn SecretBackend,
    secret_ref: &SecretRef,
) -> Result<String, SecretError> {
    let namespace = secret_ref.namespace.as_deref().unwrap_or("default");
    backend.get(namespace, &secret_ref.name, &secret_ref.key).await
}

/// `ResolveSecretRefs(props)`: a shallow copy of `props` with every
/// `SecretRef` value replaced by its resolved string. Never mutates the
/// input; the first resolution error aborts the whole call with context
/// identifying which property failed (spec §4.C).
pub async fn resolve_secret_refs(
    backend: &dyn SecretBackend,
    properties: &BTreeMap<String, PropertyValue>,
) -> Result<BTreeMap<String, PropertyValue>, SecretError> {
    let mut resolved = BTreeMap::new();
    for (key, value) in properties {
        let resolved_value = match value {
            PropertyValue::SecretRef(secret_ref) => {
                PropertyValue::String(resolve_secret_ref(backend, secret_ref).await?)
            }
            other => other.clone(),
        };
        resolved.insert(key.clone(), resolved_value);
    }
    Ok(resolved)
}

/// `RedactSensitiveProperties(props)`: replaces plain-string values whose
/// key matches a sensitive substring with `"***"`. `SecretRef` values pass
/// through untouched — a UI can still render `{name,key}` without ever
/// seeing the secret (spec §4.C).
pub fn redact_sensitive_properties(
    properties: &BTreeMap<String, PropertyValue>,
) -> BTreeMap<String, PropertyValue> {
    properties
        .iter()
        .map(|(key, value)| {
            let redacted = match value {
                PropertyValue::String(_) if SENSITIVE_PATTERN.is_match(key) => {
                    PropertyValue::String("***REDACTED***".to_string())
                }
                other => other.clone(),
            };
            (key.clone(), redacted)
        })
        .collect()
}

/// An in-memory [`SecretBackend`] keyed by `{namespace}/{name}/{key}`, used
/// for tests and for deployments that configure secrets directly rather
/// than through an external store.
#[derive(Debug, Default)]
pub struct StaticSecretBackend {
    secrets: BTreeMap<(String, String), BTreeMap<String, String>>,
}

impl StaticSecretBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(
        mut self,
        namespace: impl Into<String>,
        name: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.secrets
            .entry((namespace.into(), name.into()))
            .or_default()
            .insert(key.into(), value.into());
        self
    }
}

#[async_trait]
impl SecretBackend for StaticSecretBackend {
    async fn get(&self, namespace: &str, name: &str, key: &str) -> Result<String, SecretError> {
        let keys = self
            .secrets
            .get(&(namespace.to_string(), name.to_string()))
            .ok_or_else(|| SecretError::NotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            })?;
        keys.get(key).cloned().ok_or_else(|| SecretError::KeyNotFound {
            namespace: namespace.to_string(),
            name: name.to_string(),
            key: key.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret_ref(name: &str, key: &str) -> SecretRef {
        SecretRef {
            name: name.to_string(),
            namespace: None,
            key: key.to_string(),
        }
    }

    #[tokio::test]
    async fn resolve_secret_ref_uses_default_namespace_when_absent() {
        let backend = StaticSecretBackend::new().with_secret("default", "creds", "api-key", "sk-123");
        let value = resolve_secret_ref(&backend, &secret_ref("creds", "api-key")).await.unwrap();
        assert_eq!(value, "sk-123");
    }

    #[tokio::test]
    async fn resolve_secret_ref_reports_missing_secret() {
        let backend = StaticSecretBackend::new();
        let err = resolve_secret_ref(&backend, &secret_ref("missing", "api-key"))
            .await
            .unwrap_err();
        assert!(matches!(err, SecretError::NotFound { .. }));
    }

    #[tokio::test]
    async fn resolve_secret_ref_reports_missing_key_on_existing_secret() {
        let backend = StaticSecretBackend::new().with_secret("default", "creds", "api-key", "sk-123");
        let err = resolve_secret_ref(&backend, &secret_ref("creds", "other-key"))
            .await
            .unwrap_err();
        assert!(matches!(err, SecretError::KeyNotFound { .. }));
    }

    #[tokio::test]
    async fn resolve_secret_refs_replaces_only_secret_ref_values() {
        let backend = StaticSecretBackend::new().with_secret("default", "creds", "api-key", "sk-123");
        let mut properties = BTreeMap::new();
        properties.insert("url".to_string(), PropertyValue::String("https://x".to_string()));
        properties.insert(
            "apiKey".to_string(),
            PropertyValue::SecretRef(secret_ref("creds", "api-key")),
        );

        let resolved = resolve_secret_refs(&backend, &properties).await.unwrap();
        assert_eq!(resolved.get("url"), properties.get("url"));
        assert_eq!(
            resolved.get("apiKey"),
            Some(&PropertyValue::String("sk-123".to_string()))
        );
    }

    #[tokio::test]
    async fn resolve_secret_refs_never_mutates_input() {
        let backend = StaticSecretBackend::new().with_secret("default", "creds", "api-key", "sk-123");
        let mut properties = BTreeMap::new();
        properties.insert(
            "apiKey".to_string(),
            PropertyValue::SecretRef(secret_ref("creds", "api-key")),
        );
        let before = properties.clone();
        let _ = resolve_secret_refs(&backend, &properties).await.unwrap();
        assert_eq!(properties, before);
    }

    #[test]
    fn redact_replaces_plain_string_but_preserves_secret_ref() {
        let mut properties = BTreeMap::new();
        properties.insert("password".to_string(), PropertyValue::String("hunter2".to_string()));
        properties.insert(
            "apiKey".to_string(),
            PropertyValue::SecretRef(secret_ref("creds", "api-key")),
        );
        properties.insert("url".to_string(), PropertyValue::String("https://x".to_string()));

        let redacted = redact_sensitive_properties(&properties);
        assert_eq!(
            redacted.get("password"),
            Some(&PropertyValue::String("***REDACTED***".to_string()))
        );
        assert_eq!(redacted.get("apiKey"), properties.get("apiKey"));
        assert_eq!(redacted.get("url"), properties.get("url"));
    }

    #[test]
    fn is_secret_ref_detects_only_secret_ref_variant() {
        assert!(is_secret_ref(&PropertyValue::SecretRef(secret_ref("creds", "api-key"))));
        assert!(!is_secret_ref(&PropertyValue::String("x".to_string())));
    }
}
