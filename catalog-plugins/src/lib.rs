//! # Catalog Plugins
//!
//! ## Overview
//!
//! `catalog-plugins` is the seam between the management substrate in
//! `catalog-core`/`catalog-tenant` and any number of concrete catalog
//! plugins (models, datasets, MCP servers, ...). It owns three things:
//!
//! - [`capability`] — the [`Plugin`](capability::Plugin) trait and the
//!   closed set of optional capability traits a plugin implements
//!   alongside it, discovered by feature-test (`as_*` probes), not
//!   inheritance (spec §4.I, §9).
//! - [`registry`] and [`lifecycle`] — the process-wide plugin registry and
//!   the startup-order orchestration that resolves each plugin's config
//!   section, builds its `PluginConfig`, and calls `init`/`start`/`stop`
//!   with per-plugin failure isolation (spec §4.I).
//! - [`assembler`] — derives the capability document a plugin publishes
//!   at `GET /api/plugins/{name}/capabilities` (spec §4.H).
//! - [`actions`] — generic action dispatch plus the three built-in
//!   handlers (`tag`, `annotate`, `deprecate`) backed by
//!   `catalog_tenant::OverlayStore` (spec §4.L).
//!
//! No concrete plugin lives in this crate; see `demos/reference-plugin`
//! for one that exercises the full optional-capability surface.

pub mod actions;
pub mod assembler;
pub mod capability;
pub mod lifecycle;
pub mod registry;

pub use actions::{is_builtin_action, ActionDispatcher, ActionError, ActionOutcome};
pub use assembler::{assemble_capabilities, CapabilityDocumentV2};
pub use capability::{
    ActionDefinition, ActionProvider, ActionRequest, ActionScope, AssetGetter, AssetLister,
    AssetMapperProvider, BasePathProvider, CapabilitiesProvider, CapabilitiesV2Provider,
    CliHintsProvider, DiagnosticsProvider, EntityGetter, EntityKindV1, Migration, Plugin,
    PluginConfig, PluginError, RefreshOutcomeDetail, RefreshProvider, SourceInfo, SourceKeyProvider,
    SourceManager, UiHintsProvider,
};
pub use lifecycle::{init_all, run_migrations, start_all, stop_all, FailedPlugin, InitOutcome, InitializedPlugin};
pub use registry::PluginRegistry;
