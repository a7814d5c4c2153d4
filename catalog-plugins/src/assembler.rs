//! Capability assembly (spec §4.H): derives the capability document a
//! plugin publishes at `GET /api/plugins/{name}/capabilities` from
//! whichever capability traits the plugin actually implements.
//!
//! A [`CapabilitiesV2Provider`](crate::capability::CapabilitiesV2Provider)
//! plugin builds its own document and the assembler only injects the
//! fixed governance block; everything else is derived from the V1
//! `entity_kinds()` list plus the source-management/refresh probes.

use serde::Serialize;

use crate::capability::{ActionDefinition, ActionScope, Plugin};

#[derive(Debug, Clone, Serialize)]
pub struct CapabilityDocumentV2 {
    #[serde(rename = "schemaVersion")]
    pub schema_version: String,
    pub plugin: PluginCapabilityInfo,
    pub entities: Vec<EntityCapabilities>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sources: Option<SourceCapabilities>,
    pub actions: Vec<ActionDefinition>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PluginCapabilityInfo {
    pub name: String,
    pub version: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct EntityCapabilities {
    pub kind: String,
    pub plural: String,
    pub endpoints: EntityEndpoints,
    pub governance: GovernanceCapabilities,
}

#[derive(Debug, Clone, Serialize)]
pub struct EntityEndpoints {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub list: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub get: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceCapabilities {
    pub manageable: bool,
    pub refreshable: bool,
}

/// Every entity gets the same governance surface regardless of plugin —
/// lifecycle phases, versioning environments, and whether approvals or
/// provenance tracking are turned on are substrate-wide decisions, not
/// per-plugin ones (spec §4.H "governance capability injection").
#[derive(Debug, Clone, Serialize)]
pub struct GovernanceCapabilities {
    #[serde(rename = "lifecycleStates")]
    pub lifecycle_states: Vec<String>,
    #[serde(rename = "defaultState")]
    pub default_state: String,
    #[serde(rename = "versioningEnvironments")]
    pub versioning_environments: Vec<String>,
    #[serde(rename = "approvalsEnabled")]
    pub approvals_enabled: bool,
    #[serde(rename = "provenanceEnabled")]
    pub provenance_enabled: bool,
}

fn governance_block() -> GovernanceCapabilities {
    GovernanceCapabilities {
        lifecycle_states: vec![
            "draft".to_string(),
            "active".to_string(),
            "deprecated".to_string(),
            "retired".to_string(),
        ],
        default_state: "active".to_string(),
        versioning_environments: vec!["dev".to_string(), "staging".to_string(), "prod".to_string()],
        approvals_enabled: false,
        provenance_enabled: true,
    }
}

fn action_definitions(plugin: &dyn Plugin, scope: ActionScope) -> Vec<ActionDefinition> {
    let mut actions = crate::actions::builtin_action_definitions(scope);
    if let Some(provider) = plugin.as_action_provider() {
        actions.extend(provider.actions(scope));
    }
    actions
}

/// Builds the capability document for `plugin`, preferring its own V2
/// document when it publishes one.
pub fn assemble_capabilities(plugin: &dyn Plugin) -> CapabilityDocumentV2 {
    if let Some(v2) = plugin.as_capabilities_v2_provider() {
        let mut doc = v2.capabilities_v2();
        for entity in &mut doc.entities {
            entity.governance = governance_block();
        }
        return doc;
    }

    let mut doc = CapabilityDocumentV2 {
        schema_version: "v1".to_string(),
        plugin: PluginCapabilityInfo {
            name: plugin.name().to_string(),
            version: plugin.version().to_string(),
            description: plugin.description().to_string(),
        },
        entities: Vec::new(),
        sources: None,
        actions: action_definitions(plugin, ActionScope::Asset),
    };

    if let Some(v1) = plugin.as_capabilities_provider() {
        for kind in v1.entity_kinds() {
            let plural_slug = format!("{}s", kind.kind.to_lowercase());
            doc.entities.push(EntityCapabilities {
                kind: kind.kind.clone(),
                plural: plural_slug.clone(),
                endpoints: EntityEndpoints {
                    list: kind.list.then(|| format!("/entities/{plural_slug}")),
                    get: kind.get.then(|| format!("/entities/{plural_slug}/{{uid}}")),
                },
                governance: governance_block(),
            });
        }
    }

    let manageable = plugin.as_source_manager().is_some();
    let refreshable = plugin.as_refresh_provider().is_some();
    if manageable || refreshable {
        doc.sources = Some(SourceCapabilities { manageable, refreshable });
        doc.actions = action_definitions(plugin, ActionScope::Source)
            .into_iter()
            .chain(doc.actions)
            .collect();
    }

    doc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{CapabilitiesProvider, EntityKindV1, Plugin, PluginConfig, PluginError};
    use async_trait::async_trait;
    use axum::Router;

    struct FakePlugin;

    #[async_trait]
    impl Plugin for FakePlugin {
        fn name(&self) -> &str {
            "models"
        }
        fn version(&self) -> &str {
            "v1"
        }
        fn description(&self) -> &str {
            "fake models plugin"
        }
        async fn init(&self, _config: PluginConfig) -> Result<(), PluginError> {
            Ok(())
        }
        async fn start(&self) -> Result<(), PluginError> {
            Ok(())
        }
        async fn stop(&self) -> Result<(), PluginError> {
            Ok(())
        }
        async fn healthy(&self) -> bool {
            true
        }
        fn register_routes(&self) -> Router {
            Router::new()
        }
        fn as_capabilities_provider(&self) -> Option<&dyn CapabilitiesProvider> {
            Some(self)
        }
    }

    impl CapabilitiesProvider for FakePlugin {
        fn entity_kinds(&self) -> Vec<EntityKindV1> {
            vec![EntityKindV1 {
                kind: "Model".to_string(),
                list: true,
                get: true,
            }]
        }
    }

    #[test]
    fn v1_fallback_derives_entities_with_governance() {
        let plugin = FakePlugin;
        let doc = assemble_capabilities(&plugin);
        assert_eq!(doc.schema_version, "v1");
        assert_eq!(doc.entities.len(), 1);
        assert_eq!(doc.entities[0].kind, "Model");
        assert_eq!(doc.entities[0].endpoints.list.as_deref(), Some("/entities/models"));
        assert_eq!(doc.entities[0].governance.default_state, "active");
        assert!(doc.sources.is_none());
    }

    #[test]
    fn no_source_manager_or_refresh_provider_means_no_sources_block() {
        let plugin = FakePlugin;
        let doc = assemble_capabilities(&plugin);
        assert!(doc.sources.is_none());
    }
}
