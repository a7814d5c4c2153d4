//! A minimal, fully-featured catalog plugin: implements every optional
//! capability probe so `catalog-api`'s integration tests can exercise the
//! management router end to end without depending on a real catalog
//! backend.
//!
//! Entities are materialized in memory only — `apply_source`/`refresh`
//! just copy the source's properties into an `items` map, there's no
//! actual upstream to load from.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::Path;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::RwLock;

use catalog_core::{PropertyValue, SourceConfig};
use catalog_plugins::{
    ActionDefinition, ActionProvider, ActionRequest, ActionScope, CapabilitiesProvider,
    CliHintsProvider, DiagnosticsProvider, EntityKindV1, Plugin, PluginConfig, PluginError,
    RefreshOutcomeDetail, RefreshProvider, SourceInfo, SourceManager, UiHintsProvider,
};
use catalog_tenant::RefreshOutcome;

/// `Plugin::name()`/config key for this reference implementation.
pub const PLUGIN_NAME: &str = "reference";

pub struct ReferencePlugin {
    sources: Arc<DashMap<String, SourceConfig>>,
    items: Arc<DashMap<String, serde_json::Value>>,
    started: AtomicBool,
    last_refresh: RwLock<Option<chrono::DateTime<Utc>>>,
}

impl Default for ReferencePlugin {
    fn default() -> Self {
        Self {
            sources: Arc::new(DashMap::new()),
            items: Arc::new(DashMap::new()),
            started: AtomicBool::new(false),
            last_refresh: RwLock::new(None),
        }
    }
}

impl ReferencePlugin {
    pub fn new() -> Self {
        Self::default()
    }

    fn materialize(&self, source: &SourceConfig) {
        self.items.insert(
            source.id.clone(),
            serde_json::json!({
                "id": source.id,
                "name": source.name,
                "type": source.source_type,
                "enabled": source.enabled,
                "propertyCount": source.properties.len(),
            }),
        );
    }

    fn source_info(source: &SourceConfig) -> SourceInfo {
        SourceInfo {
            id: source.id.clone(),
            name: source.name.clone(),
            source_type: source.source_type.clone(),
            enabled: source.enabled,
            properties: source.properties.clone(),
            last_refresh_time: None,
            last_refresh_status: None,
            summary: Some(format!("{} propert(y/ies)", source.properties.len())),
        }
    }
}

#[async_trait]
impl Plugin for ReferencePlugin {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn version(&self) -> &str {
        "v1"
    }

    fn description(&self) -> &str {
        "Reference plugin exercising the full optional-capability surface"
    }

    async fn init(&self, config: PluginConfig) -> Result<(), PluginError> {
        self.sources.clear();
        self.items.clear();
        for source in &config.section.sources {
            self.sources.insert(source.id.clone(), source.clone());
            self.materialize(source);
        }
        Ok(())
    }

    async fn start(&self) -> Result<(), PluginError> {
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<(), PluginError> {
        self.started.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn healthy(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    fn register_routes(&self) -> Router {
        let items = Arc::clone(&self.items);
        let items_one = Arc::clone(&self.items);
        Router::new()
            .route(
                "/items",
                get(move || {
                    let items = Arc::clone(&items);
                    async move {
                        let all: Vec<_> = items.iter().map(|entry| entry.value().clone()).collect();
                        Json(serde_json::json!({ "items": all }))
                    }
                }),
            )
            .route(
                "/items/:id",
                get(move |Path(id): Path<String>| {
                    let items = Arc::clone(&items_one);
                    async move {
                        match items.get(&id) {
                            Some(item) => Json(item.value().clone()).into_response(),
                            None => axum::http::StatusCode::NOT_FOUND.into_response(),
                        }
                    }
                }),
            )
    }

    fn as_capabilities_provider(&self) -> Option<&dyn CapabilitiesProvider> {
        Some(self)
    }
    fn as_source_manager(&self) -> Option<&dyn SourceManager> {
        Some(self)
    }
    fn as_refresh_provider(&self) -> Option<&dyn RefreshProvider> {
        Some(self)
    }
    fn as_diagnostics_provider(&self) -> Option<&dyn DiagnosticsProvider> {
        Some(self)
    }
    fn as_action_provider(&self) -> Option<&dyn ActionProvider> {
        Some(self)
    }
    fn as_ui_hints_provider(&self) -> Option<&dyn UiHintsProvider> {
        Some(self)
    }
    fn as_cli_hints_provider(&self) -> Option<&dyn CliHintsProvider> {
        Some(self)
    }
    fn as_provider_validator(&self) -> Option<&dyn catalog_core::validate::ProviderValidator> {
        Some(self)
    }
}

impl CapabilitiesProvider for ReferencePlugin {
    fn entity_kinds(&self) -> Vec<EntityKindV1> {
        vec![EntityKindV1 {
            kind: "Item".to_string(),
            list: true,
            get: true,
        }]
    }
}

#[async_trait]
impl SourceManager for ReferencePlugin {
    async fn list_sources(&self) -> Result<Vec<SourceInfo>, PluginError> {
        Ok(self.sources.iter().map(|entry| Self::source_info(entry.value())).collect())
    }

    async fn apply_source(&self, resolved: &SourceConfig) -> Result<(), PluginError> {
        self.sources.insert(resolved.id.clone(), resolved.clone());
        self.materialize(resolved);
        Ok(())
    }

    async fn enable_source(&self, id: &str, enabled: bool) -> Result<(), PluginError> {
        let mut entry = self
            .sources
            .get_mut(id)
            .ok_or_else(|| PluginError::Other(anyhow::anyhow!("source {id:?} not found")))?;
        entry.enabled = enabled;
        Ok(())
    }

    async fn delete_source(&self, id: &str) -> Result<(), PluginError> {
        self.sources
            .remove(id)
            .ok_or_else(|| PluginError::Other(anyhow::anyhow!("source {id:?} not found")))?;
        self.items.remove(id);
        Ok(())
    }
}

#[async_trait]
impl RefreshProvider for ReferencePlugin {
    async fn refresh(&self, source_id: Option<&str>) -> Result<RefreshOutcomeDetail, PluginError> {
        let mut loaded = 0u64;
        match source_id {
            Some(id) => {
                let source = self
                    .sources
                    .get(id)
                    .ok_or_else(|| PluginError::Other(anyhow::anyhow!("source {id:?} not found")))?;
                self.materialize(&source);
                loaded = 1;
            }
            None => {
                for entry in self.sources.iter() {
                    self.materialize(entry.value());
                    loaded += 1;
                }
            }
        }
        *self.last_refresh.write().await = Some(Utc::now());
        Ok(RefreshOutcomeDetail {
            status: RefreshOutcome::Success,
            summary: format!("materialized {loaded} item(s)"),
            last_error: None,
            entities_loaded: loaded,
            entities_removed: 0,
        })
    }
}

#[async_trait]
impl DiagnosticsProvider for ReferencePlugin {
    async fn diagnostics(&self) -> serde_json::Value {
        serde_json::json!({
            "sourceCount": self.sources.len(),
            "itemCount": self.items.len(),
            "lastRefresh": *self.last_refresh.read().await,
        })
    }
}

#[async_trait]
impl ActionProvider for ReferencePlugin {
    fn actions(&self, scope: ActionScope) -> Vec<ActionDefinition> {
        if scope != ActionScope::Source {
            return Vec::new();
        }
        vec![ActionDefinition {
            id: "resync".to_string(),
            display_name: "Resync".to_string(),
            description: "Re-materialize this source's item immediately".to_string(),
            scope: ActionScope::Source,
            supports_dry_run: false,
            idempotent: true,
            destructive: false,
        }]
    }

    async fn dispatch(
        &self,
        scope: ActionScope,
        _entity_kind: &str,
        entity_uid: &str,
        request: &ActionRequest,
    ) -> Result<serde_json::Value, PluginError> {
        if scope != ActionScope::Source || request.action != "resync" {
            return Err(PluginError::CapabilityMissing("resync"));
        }
        let source = self
            .sources
            .get(entity_uid)
            .ok_or_else(|| PluginError::Other(anyhow::anyhow!("source {entity_uid:?} not found")))?;
        self.materialize(&source);
        Ok(serde_json::json!({ "resynced": entity_uid }))
    }
}

impl UiHintsProvider for ReferencePlugin {
    fn ui_hints(&self) -> serde_json::Value {
        serde_json::json!({ "icon": "box", "color": "#6b7280" })
    }
}

impl CliHintsProvider for ReferencePlugin {
    fn cli_hints(&self) -> serde_json::Value {
        serde_json::json!({ "aliases": ["ref", "reference"] })
    }
}

impl catalog_core::validate::ProviderValidator for ReferencePlugin {
    /// Rejects a `kind: "broken"` property purely so tests can exercise the
    /// provider-validation layer; nothing about the reference plugin's own
    /// semantics needs it.
    fn validate_source(&self, source: &SourceConfig) -> Result<(), Vec<catalog_core::validate::ValidationError>> {
        if matches!(source.properties.get("kind"), Some(PropertyValue::String(s)) if s == "broken") {
            return Err(vec![catalog_core::validate::ValidationError::on_field(
                "properties.kind",
                "reference plugin rejects kind \"broken\"",
            )]);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn source(id: &str) -> SourceConfig {
        SourceConfig {
            id: id.to_string(),
            name: format!("Source {id}"),
            source_type: "demo".to_string(),
            enabled: true,
            labels: BTreeMap::new(),
            properties: BTreeMap::new(),
        }
    }

    fn config(sources: Vec<SourceConfig>) -> PluginConfig {
        PluginConfig {
            section: catalog_core::CatalogSection { sources },
            db: None,
            logger: tracing::Span::none(),
            base_path: "/api/reference_catalog/v1".to_string(),
            config_paths: Vec::new(),
        }
    }

    #[tokio::test]
    async fn init_materializes_every_source_into_items() {
        let plugin = ReferencePlugin::new();
        plugin.init(config(vec![source("a"), source("b")])).await.unwrap();
        assert_eq!(plugin.items.len(), 2);
        assert_eq!(SourceManager::list_sources(&plugin).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn apply_source_upserts_and_materializes() {
        let plugin = ReferencePlugin::new();
        plugin.init(config(vec![])).await.unwrap();
        plugin.apply_source(&source("a")).await.unwrap();
        assert_eq!(plugin.items.len(), 1);
        plugin.apply_source(&source("a")).await.unwrap();
        assert_eq!(plugin.items.len(), 1);
    }

    #[tokio::test]
    async fn delete_source_removes_both_maps() {
        let plugin = ReferencePlugin::new();
        plugin.init(config(vec![source("a")])).await.unwrap();
        plugin.delete_source("a").await.unwrap();
        assert!(plugin.items.is_empty());
        assert!(SourceManager::list_sources(&plugin).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_unknown_source_errors() {
        let plugin = ReferencePlugin::new();
        plugin.init(config(vec![])).await.unwrap();
        assert!(plugin.delete_source("missing").await.is_err());
    }

    #[tokio::test]
    async fn refresh_all_stamps_last_refresh_time() {
        let plugin = ReferencePlugin::new();
        plugin.init(config(vec![source("a"), source("b")])).await.unwrap();
        let outcome = plugin.refresh(None).await.unwrap();
        assert_eq!(outcome.entities_loaded, 2);
        assert!(plugin.last_refresh.read().await.is_some());
    }

    #[tokio::test]
    async fn resync_action_requires_known_source() {
        let plugin = ReferencePlugin::new();
        plugin.init(config(vec![source("a")])).await.unwrap();
        let request = ActionRequest {
            action: "resync".to_string(),
            dry_run: false,
            params: serde_json::Value::Null,
        };
        assert!(plugin
            .dispatch(ActionScope::Source, "source", "a", &request)
            .await
            .is_ok());
        assert!(plugin
            .dispatch(ActionScope::Source, "source", "missing", &request)
            .await
            .is_err());
    }

    #[test]
    fn provider_validator_rejects_broken_kind() {
        let plugin = ReferencePlugin::new();
        let mut broken = source("a");
        broken.properties.insert("kind".to_string(), PropertyValue::String("broken".to_string()));
        assert!(catalog_core::validate::ProviderValidator::validate_source(&plugin, &broken).is_err());
        assert!(catalog_core::validate::ProviderValidator::validate_source(&plugin, &source("a")).is_ok());
    }
}
