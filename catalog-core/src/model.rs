//! The wire and durable data model for catalog sources (spec §3).
//!
//! `CatalogSourcesConfig` is the root document every `ConfigStore`
//! implementation loads and saves. Everything under `properties` is
//! dynamically shaped — plugin-specific — so it is carried as
//! [`PropertyValue`] rather than leaking a particular JSON/YAML crate's
//! `Value` type across the store/validator boundary; the axum layer in
//! `catalog-api` flattens it to `serde_json::Value` only at the HTTP
//! boundary where an opaque value is the right call.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Root document: `{apiVersion, kind, catalogs: mapping<plugin-config-key, CatalogSection>}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CatalogSourcesConfig {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    /// Keyed by the plugin's config key (see `SourceKeyProvider` in
    /// `catalog-plugins`), which may differ from the plugin's own name.
    pub catalogs: BTreeMap<String, CatalogSection>,
}

impl CatalogSourcesConfig {
    pub fn empty() -> Self {
        Self {
            api_version: "catalog.example.com/v1".to_string(),
            kind: "CatalogSourcesConfig".to_string(),
            catalogs: BTreeMap::new(),
        }
    }

    pub fn section(&self, config_key: &str) -> Option<&CatalogSection> {
        self.catalogs.get(config_key)
    }

    pub fn section_mut(&mut self, config_key: &str) -> &mut CatalogSection {
        self.catalogs.entry(config_key.to_string()).or_default()
    }
}

/// An ordered sequence of `SourceConfig` for one plugin's config key.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CatalogSection {
    pub sources: Vec<SourceConfig>,
}

impl CatalogSection {
    pub fn find(&self, id: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.id == id)
    }

    pub fn find_index(&self, id: &str) -> Option<usize> {
        self.sources.iter().position(|s| s.id == id)
    }

    /// Replace the source with `id`, or append if absent — the semantics
    /// `apply-source` needs (§4.J step 5).
    pub fn upsert(&mut self, source: SourceConfig) {
        if let Some(idx) = self.find_index(&source.id) {
            self.sources[idx] = source;
        } else {
            self.sources.push(source);
        }
    }

    pub fn remove(&mut self, id: &str) -> Option<SourceConfig> {
        let idx = self.find_index(id)?;
        Some(self.sources.remove(idx))
    }
}

/// `{id, name, type, enabled?, labels?, properties}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceConfig {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub source_type: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyValue>,
}

fn default_enabled() -> bool {
    true
}

/// A dynamically-shaped property value. Carries scalars, sequences, nested
/// mappings, and — distinctly — a `SecretRef`, so the SecretRef-vs-plain-value
/// distinction survives serialization instead of collapsing into an
/// untyped mapping the way a bare `serde_json::Value` would.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum PropertyValue {
    SecretRef(SecretRef),
    String(String),
    Number(serde_json::Number),
    Bool(bool),
    Sequence(Vec<PropertyValue>),
    Mapping(BTreeMap<String, PropertyValue>),
    Null,
}

impl PropertyValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_secret_ref(&self) -> Option<&SecretRef> {
        match self {
            PropertyValue::SecretRef(r) => Some(r),
            _ => None,
        }
    }

    /// Converts to `serde_json::Value` for the axum HTTP boundary.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            PropertyValue::SecretRef(r) => serde_json::to_value(r).unwrap_or(serde_json::Value::Null),
            PropertyValue::String(s) => serde_json::Value::String(s.clone()),
            PropertyValue::Number(n) => serde_json::Value::Number(n.clone()),
            PropertyValue::Bool(b) => serde_json::Value::Bool(*b),
            PropertyValue::Sequence(seq) => {
                serde_json::Value::Array(seq.iter().map(PropertyValue::to_json).collect())
            }
            PropertyValue::Mapping(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
            PropertyValue::Null => serde_json::Value::Null,
        }
    }

    /// Converts from a `serde_json::Value` arriving over HTTP, recognizing
    /// the `{name, [namespace,] key}` shape as a `SecretRef` the same way
    /// `catalog_security::is_secret_ref` does, so a round trip through the
    /// HTTP boundary never silently demotes a SecretRef to a plain mapping.
    pub fn from_json(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => PropertyValue::Null,
            serde_json::Value::Bool(b) => PropertyValue::Bool(b),
            serde_json::Value::Number(n) => PropertyValue::Number(n),
            serde_json::Value::String(s) => PropertyValue::String(s),
            serde_json::Value::Array(arr) => {
                PropertyValue::Sequence(arr.into_iter().map(PropertyValue::from_json).collect())
            }
            serde_json::Value::Object(obj) => {
                if let Some(secret_ref) = SecretRef::from_json_object(&obj) {
                    return PropertyValue::SecretRef(secret_ref);
                }
                PropertyValue::Mapping(
                    obj.into_iter()
                        .map(|(k, v)| (k, PropertyValue::from_json(v)))
                        .collect(),
                )
            }
        }
    }
}

/// `{name, namespace?, key}` — a reference to an external secret. Detected
/// structurally: any mapping with non-empty string `name` and `key` is a
/// SecretRef, `namespace` is optional (spec §3, §4.C).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SecretRef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub key: String,
}

impl SecretRef {
    pub(crate) fn from_json_object(obj: &serde_json::Map<String, serde_json::Value>) -> Option<Self> {
        let name = obj.get("name")?.as_str()?.to_string();
        let key = obj.get("key")?.as_str()?.to_string();
        if name.is_empty() || key.is_empty() {
            return None;
        }
        let namespace = obj
            .get("namespace")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());
        Some(Self { name, namespace, key })
    }
}

/// `{version, timestamp, size}` — a durable snapshot of a config document
/// keyed by its content hash.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConfigRevision {
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub size: usize,
}

/// Normalizes an empty namespace to `"default"` (invariant viii, shared by
/// `OverlayStore` and `RefreshStatusStore` keys).
pub fn normalize_namespace(namespace: &str) -> &str {
    if namespace.is_empty() {
        "default"
    } else {
        namespace
    }
}

/// `^[a-z0-9][a-z0-9_-]*$`, the source id pattern (invariant i).
pub fn is_valid_source_id(id: &str) -> bool {
    static ID_PATTERN: once_cell::sync::Lazy<regex::Regex> =
        once_cell::sync::Lazy::new(|| regex::Regex::new(r"^[a-z0-9][a-z0-9_-]*$").unwrap());
    ID_PATTERN.is_match(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_ref_requires_name_and_key() {
        let obj: serde_json::Map<_, _> =
            serde_json::json!({"name": "api-credentials", "key": "api-key"})
                .as_object()
                .unwrap()
                .clone();
        assert!(SecretRef::from_json_object(&obj).is_some());

        let not_a_ref: serde_json::Map<_, _> = serde_json::json!({"name": "x"})
            .as_object()
            .unwrap()
            .clone();
        assert!(SecretRef::from_json_object(&not_a_ref).is_none());
    }

    #[test]
    fn property_value_json_round_trip_preserves_secret_ref() {
        let value = serde_json::json!({
            "url": "https://models.example.com",
            "apiKey": {"name": "api-credentials", "key": "api-key"}
        });
        let props = PropertyValue::from_json(value);
        match &props {
            PropertyValue::Mapping(map) => {
                assert!(matches!(map.get("apiKey"), Some(PropertyValue::SecretRef(_))));
                assert!(matches!(map.get("url"), Some(PropertyValue::String(_))));
            }
            _ => panic!("expected mapping"),
        }
    }

    #[test]
    fn source_id_pattern() {
        assert!(is_valid_source_id("src-3"));
        assert!(is_valid_source_id("a"));
        assert!(!is_valid_source_id("Src-3"));
        assert!(!is_valid_source_id("-src"));
        assert!(!is_valid_source_id(""));
    }

    #[test]
    fn empty_namespace_normalizes_to_default() {
        assert_eq!(normalize_namespace(""), "default");
        assert_eq!(normalize_namespace("tenant-a"), "tenant-a");
    }

    #[test]
    fn catalog_section_upsert_replaces_existing_id() {
        let mut section = CatalogSection::default();
        section.upsert(SourceConfig {
            id: "src-1".into(),
            name: "One".into(),
            source_type: "yaml".into(),
            enabled: true,
            labels: BTreeMap::new(),
            properties: BTreeMap::new(),
        });
        section.upsert(SourceConfig {
            id: "src-1".into(),
            name: "One renamed".into(),
            source_type: "yaml".into(),
            enabled: true,
            labels: BTreeMap::new(),
            properties: BTreeMap::new(),
        });
        assert_eq!(section.sources.len(), 1);
        assert_eq!(section.sources[0].name, "One renamed");
    }
}
