//! The plugin trait itself, plus the optional-capability traits a plugin
//! implements on its own type alongside it (spec §4.I, §9 "Plugin
//! interface design").
//!
//! Rust has no interface-probing by default, so the pattern here is a
//! closed set of `as_*` default methods on [`Plugin`] that return `None`
//! unless a concrete plugin overrides them to hand back `Some(self)`. A
//! capability consumer (capability assembly, the management router,
//! lifecycle init) calls the probe and works with the narrow trait object
//! it gets back, never downcasting or matching on a plugin's concrete
//! type. This is the Rust analogue of the "feature-test, not inheritance"
//! requirement in the spec — no plugin ever has to implement a trait it
//! doesn't support, and the core `Plugin` trait never grows a method per
//! optional capability.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use catalog_core::{CatalogSection, PropertyValue, SourceConfig};
use catalog_tenant::RefreshOutcome;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Constructed by [`crate::lifecycle::init_all`] and handed to
/// [`Plugin::init`]. Carries everything a plugin needs to resolve its own
/// config section and wire up its own storage without reaching back into
/// the server (spec §4.I "build plugin Config").
pub struct PluginConfig {
    /// This plugin's slice of `CatalogSourcesConfig.catalogs`, already
    /// resolved by config key. Empty (no sources) if the key is absent.
    pub section: CatalogSection,
    /// The shared embedded database, for plugins that want their own
    /// `sled::Tree` rather than managing their own files.
    pub db: Option<Arc<sled::Db>>,
    /// A span pre-tagged with this plugin's name, so everything the
    /// plugin logs during init/start nests under it.
    pub logger: tracing::Span,
    pub base_path: String,
    pub config_paths: Vec<PathBuf>,
}

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("plugin init failed: {0}")]
    InitFailed(#[source] anyhow::Error),

    #[error("plugin does not implement the {0} capability")]
    CapabilityMissing(&'static str),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// One entry in the migration set a plugin reports from [`Plugin::migrations`].
/// Orchestrating these under an advisory lock before any plugin's `init`
/// runs is [`crate::lifecycle::run_migrations`]'s job, not the plugin's.
pub struct Migration {
    pub id: String,
    pub description: String,
    pub apply: Box<dyn Fn() -> Result<(), anyhow::Error> + Send + Sync>,
}

/// The minimum surface every plugin implements (spec §4.I).
///
/// Everything beyond name/version/description/lifecycle/routes/migrations
/// is optional and discovered through the `as_*` probes below.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;
    fn version(&self) -> &str;
    fn description(&self) -> &str;

    async fn init(&self, config: PluginConfig) -> Result<(), PluginError>;
    async fn start(&self) -> Result<(), PluginError>;
    async fn stop(&self) -> Result<(), PluginError>;
    async fn healthy(&self) -> bool;

    /// Routes this plugin mounts under its own `base_path`, entirely
    /// outside the generic `ManagementRouter` surface — these are the
    /// plugin's own REST API, not governed by RBAC or the error taxonomy
    /// catalog-api applies to the management routes.
    fn register_routes(&self) -> Router;

    fn migrations(&self) -> Vec<Migration> {
        Vec::new()
    }

    fn as_capabilities_provider(&self) -> Option<&dyn CapabilitiesProvider> {
        None
    }
    fn as_capabilities_v2_provider(&self) -> Option<&dyn CapabilitiesV2Provider> {
        None
    }
    fn as_source_manager(&self) -> Option<&dyn SourceManager> {
        None
    }
    fn as_refresh_provider(&self) -> Option<&dyn RefreshProvider> {
        None
    }
    fn as_diagnostics_provider(&self) -> Option<&dyn DiagnosticsProvider> {
        None
    }
    fn as_action_provider(&self) -> Option<&dyn ActionProvider> {
        None
    }
    fn as_ui_hints_provider(&self) -> Option<&dyn UiHintsProvider> {
        None
    }
    fn as_cli_hints_provider(&self) -> Option<&dyn CliHintsProvider> {
        None
    }
    fn as_base_path_provider(&self) -> Option<&dyn BasePathProvider> {
        None
    }
    fn as_source_key_provider(&self) -> Option<&dyn SourceKeyProvider> {
        None
    }
    fn as_entity_getter(&self) -> Option<&dyn EntityGetter> {
        None
    }
    fn as_asset_lister(&self) -> Option<&dyn AssetLister> {
        None
    }
    fn as_asset_getter(&self) -> Option<&dyn AssetGetter> {
        None
    }
    fn as_asset_mapper_provider(&self) -> Option<&dyn AssetMapperProvider> {
        None
    }
    fn as_provider_validator(&self) -> Option<&dyn catalog_core::validate::ProviderValidator> {
        None
    }
}

/// V1 capability reporting: a flat list of entity kinds and whether each
/// supports list/get. Superseded by [`CapabilitiesV2Provider`] when a
/// plugin implements both — see [`crate::assembler::assemble_capabilities`].
pub trait CapabilitiesProvider: Send + Sync {
    fn entity_kinds(&self) -> Vec<EntityKindV1>;
}

pub struct EntityKindV1 {
    pub kind: String,
    pub list: bool,
    pub get: bool,
}

/// V2 capability reporting: the plugin builds the full document itself,
/// including its own endpoint shapes. The assembler still injects the
/// fixed governance block into every entity (spec §4.H).
pub trait CapabilitiesV2Provider: Send + Sync {
    fn capabilities_v2(&self) -> crate::assembler::CapabilityDocumentV2;
}

/// `{id, name, type, enabled, properties, last-refresh-*}` as a plugin can
/// report it for free — the last-refresh fields here are best-effort; the
/// management router always reconciles them against the persisted
/// [`catalog_tenant::RefreshStatusStore`] record, filling in only the
/// fields this struct leaves `None` (spec §4.J "status enrichment policy").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceInfo {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub source_type: String,
    pub enabled: bool,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_refresh_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_refresh_status: Option<RefreshOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// Source CRUD the plugin itself owns — typically loading/materializing
/// whatever the source actually points at (a directory, a remote API, ...).
/// Persisting `SourceConfig` into the `ConfigStore` is the router's job,
/// not this trait's; this trait is called only after the store write
/// succeeds; `apply_source` always receives a copy with `SecretRef`
/// properties already resolved (spec §4.C, §4.J step 5).
#[async_trait]
pub trait SourceManager: Send + Sync {
    async fn list_sources(&self) -> Result<Vec<SourceInfo>, PluginError>;
    async fn apply_source(&self, resolved: &SourceConfig) -> Result<(), PluginError>;
    async fn enable_source(&self, id: &str, enabled: bool) -> Result<(), PluginError>;
    async fn delete_source(&self, id: &str) -> Result<(), PluginError>;
}

/// The outcome of one refresh call, before the router stamps the
/// wall-clock `duration_ms` and persists it (spec §4.F).
pub struct RefreshOutcomeDetail {
    pub status: RefreshOutcome,
    pub summary: String,
    pub last_error: Option<String>,
    pub entities_loaded: u64,
    pub entities_removed: u64,
}

#[async_trait]
pub trait RefreshProvider: Send + Sync {
    /// `source_id = None` means "refresh everything this plugin owns".
    async fn refresh(&self, source_id: Option<&str>) -> Result<RefreshOutcomeDetail, PluginError>;
}

#[async_trait]
pub trait DiagnosticsProvider: Send + Sync {
    async fn diagnostics(&self) -> serde_json::Value;
}

/// Action scope: whether an action applies to a source entity or to an
/// arbitrary plugin-owned entity (spec §3 `ActionDefinition.scope`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionScope {
    Source,
    Asset,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionDefinition {
    pub id: String,
    #[serde(rename = "displayName")]
    pub display_name: String,
    pub description: String,
    pub scope: ActionScope,
    #[serde(rename = "supportsDryRun")]
    pub supports_dry_run: bool,
    pub idempotent: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub destructive: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActionRequest {
    pub action: String,
    #[serde(rename = "dryRun", default)]
    pub dry_run: bool,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// A plugin's own actions, beyond the builtins `catalog-plugins` always
/// provides (tag/annotate/deprecate — see [`crate::actions`]).
#[async_trait]
pub trait ActionProvider: Send + Sync {
    fn actions(&self, scope: ActionScope) -> Vec<ActionDefinition>;

    async fn dispatch(
        &self,
        scope: ActionScope,
        entity_kind: &str,
        entity_uid: &str,
        request: &ActionRequest,
    ) -> Result<serde_json::Value, PluginError>;
}

pub trait UiHintsProvider: Send + Sync {
    fn ui_hints(&self) -> serde_json::Value;
}

pub trait CliHintsProvider: Send + Sync {
    fn cli_hints(&self) -> serde_json::Value;
}

/// Overrides the default `/api/{name}_catalog/{version}` mount point
/// (spec §4.I).
pub trait BasePathProvider: Send + Sync {
    fn base_path(&self) -> String;
}

/// Overrides the default config key (`plugin.name()`) used to look the
/// plugin's section up in `CatalogSourcesConfig.catalogs` (spec §4.I).
pub trait SourceKeyProvider: Send + Sync {
    fn source_key(&self) -> String;
}

/// Generic entity access, for plugins whose entities aren't sources —
/// mounted by the plugin's own `register_routes`, not by the management
/// router.
#[async_trait]
pub trait EntityGetter: Send + Sync {
    async fn get_entity(&self, kind: &str, uid: &str) -> Result<Option<serde_json::Value>, PluginError>;
}

#[async_trait]
pub trait AssetLister: Send + Sync {
    async fn list_assets(&self, kind: &str) -> Result<Vec<serde_json::Value>, PluginError>;
}

#[async_trait]
pub trait AssetGetter: Send + Sync {
    async fn get_asset(&self, kind: &str, uid: &str) -> Result<Option<serde_json::Value>, PluginError>;
}

/// Maps a plugin-native asset representation into the uniform JSON shape
/// `AssetLister`/`AssetGetter` return.
pub trait AssetMapperProvider: Send + Sync {
    fn map_asset(&self, kind: &str, raw: serde_json::Value) -> serde_json::Value;
}
