//! Generic action dispatch and the three built-in handlers (spec §4.L).
//!
//! `tag`, `annotate`, and `deprecate` are available on every plugin's
//! sources and asset entities, because they only ever touch the
//! namespace-scoped [`catalog_tenant::OverlayStore`] — they need no
//! cooperation from the plugin at all. Anything else goes to the
//! plugin's own [`ActionProvider`](crate::capability::ActionProvider), if
//! it has one.

use std::collections::BTreeMap;
use std::sync::Arc;

use catalog_tenant::{apply_annotate, apply_deprecate, apply_tag, DryRunResult, OverlayError, OverlayKey, OverlayRecord, OverlayStore};
use thiserror::Error;

use crate::capability::{ActionDefinition, ActionRequest, ActionScope, Plugin};

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("unknown action {0:?}")]
    Unknown(String),

    #[error("action {0:?} does not support dry-run")]
    DryRunNotSupported(String),

    #[error("plugin {0:?} does not support actions")]
    NotImplemented(String),

    #[error("overlay store error: {0}")]
    Overlay(#[from] OverlayError),

    #[error(transparent)]
    Plugin(#[from] crate::capability::PluginError),
}

/// Either the applied [`OverlayRecord`] or, for a `dryRun` call, the
/// preview that would have been applied — mirrors the plugin-handler
/// return shape in `catalog_tenant::overlay` (spec §4.D, §4.L).
pub enum ActionOutcome {
    Applied(serde_json::Value),
    DryRun(DryRunResult),
}

fn builtin_action_ids() -> &'static [&'static str] {
    &["tag", "annotate", "deprecate"]
}

/// Whether `id` names one of the three builtins (`tag`/`annotate`/
/// `deprecate`) available on every plugin regardless of `ActionProvider`.
pub fn is_builtin_action(id: &str) -> bool {
    builtin_action_ids().contains(&id)
}

/// The three built-ins, published on every scope regardless of plugin
/// (spec §4.L).
pub fn builtin_action_definitions(scope: ActionScope) -> Vec<ActionDefinition> {
    vec![
        ActionDefinition {
            id: "tag".to_string(),
            display_name: "Tag".to_string(),
            description: "Replace the entity's tag set".to_string(),
            scope,
            supports_dry_run: true,
            idempotent: true,
            destructive: false,
        },
        ActionDefinition {
            id: "annotate".to_string(),
            display_name: "Annotate".to_string(),
            description: "Merge key/value annotations onto the entity".to_string(),
            scope,
            supports_dry_run: true,
            idempotent: true,
            destructive: false,
        },
        ActionDefinition {
            id: "deprecate".to_string(),
            display_name: "Deprecate".to_string(),
            description: "Mark the entity's lifecycle phase as deprecated".to_string(),
            scope,
            supports_dry_run: true,
            idempotent: true,
            destructive: false,
        },
    ]
}

/// Dispatches `ActionRequest`s for one plugin instance: builtins first,
/// then the plugin's own `ActionProvider` if it has one.
pub struct ActionDispatcher {
    overlay: Arc<OverlayStore>,
}

impl ActionDispatcher {
    pub fn new(overlay: Arc<OverlayStore>) -> Self {
        Self { overlay }
    }

    /// The full published action list for a scope: builtins plus whatever
    /// the plugin's `ActionProvider` (if any) declares.
    pub fn actions_for_scope(&self, plugin: &dyn Plugin, scope: ActionScope) -> Vec<ActionDefinition> {
        let mut actions = builtin_action_definitions(scope);
        if let Some(provider) = plugin.as_action_provider() {
            actions.extend(provider.actions(scope));
        }
        actions
    }

    pub async fn dispatch(
        &self,
        plugin: &dyn Plugin,
        namespace: &str,
        entity_kind: &str,
        entity_uid: &str,
        request: &ActionRequest,
    ) -> Result<ActionOutcome, ActionError> {
        if is_builtin_action(&request.action) {
            return self.dispatch_builtin(plugin.name(), namespace, entity_kind, entity_uid, request);
        }

        let provider = plugin
            .as_action_provider()
            .ok_or_else(|| ActionError::NotImplemented(plugin.name().to_string()))?;

        let known = provider
            .actions(ActionScope::Source)
            .into_iter()
            .chain(provider.actions(ActionScope::Asset))
            .any(|def| def.id == request.action);
        if !known {
            return Err(ActionError::Unknown(request.action.clone()));
        }

        let scope = if entity_kind == "source" {
            ActionScope::Source
        } else {
            ActionScope::Asset
        };
        let result = provider
            .dispatch(scope, entity_kind, entity_uid, request)
            .await?;
        Ok(ActionOutcome::Applied(result))
    }

    fn dispatch_builtin(
        &self,
        plugin: &str,
        namespace: &str,
        entity_kind: &str,
        entity_uid: &str,
        request: &ActionRequest,
    ) -> Result<ActionOutcome, ActionError> {
        let key = OverlayKey::new(namespace, plugin, entity_kind, entity_uid);

        let outcome = match request.action.as_str() {
            "tag" => {
                let tags: Vec<String> = request
                    .params
                    .get("tags")
                    .and_then(|v| v.as_array())
                    .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
                    .unwrap_or_default();
                apply_tag(&self.overlay, &key, tags, request.dry_run)?
            }
            "annotate" => {
                let annotations: BTreeMap<String, String> = request
                    .params
                    .get("annotations")
                    .and_then(|v| v.as_object())
                    .map(|obj| {
                        obj.iter()
                            .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                            .collect()
                    })
                    .unwrap_or_default();
                apply_annotate(&self.overlay, &key, annotations, request.dry_run)?
            }
            "deprecate" => {
                let phase = request
                    .params
                    .get("phase")
                    .and_then(|v| v.as_str())
                    .map(str::to_string);
                apply_deprecate(&self.overlay, &key, phase, request.dry_run)?
            }
            other => return Err(ActionError::Unknown(other.to_string())),
        };

        match outcome {
            Ok(record) => Ok(ActionOutcome::Applied(overlay_record_to_json(&record))),
            Err(dry_run) => Ok(ActionOutcome::DryRun(dry_run)),
        }
    }
}

fn overlay_record_to_json(record: &OverlayRecord) -> serde_json::Value {
    serde_json::json!({
        "tags": record.tags,
        "annotations": record.annotations,
        "labels": record.labels,
        "lifecycle": record.lifecycle,
        "updatedAt": record.updated_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_overlay() -> (tempfile::TempDir, Arc<OverlayStore>) {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path()).unwrap();
        let store = OverlayStore::open(&db, "overlay").unwrap();
        (dir, Arc::new(store))
    }

    #[test]
    fn builtin_tag_applies_through_overlay_store() {
        let (_dir, overlay) = temp_overlay();
        let dispatcher = ActionDispatcher::new(overlay.clone());
        let request = ActionRequest {
            action: "tag".to_string(),
            dry_run: false,
            params: serde_json::json!({"tags": ["beta", "pii"]}),
        };
        let outcome = dispatcher
            .dispatch_builtin("models", "default", "source", "src-1", &request)
            .unwrap();
        assert!(matches!(outcome, ActionOutcome::Applied(_)));

        let key = OverlayKey {
            namespace: "default".to_string(),
            plugin: "models".to_string(),
            entity_kind: "source".to_string(),
            entity_uid: "src-1".to_string(),
        };
        let record = overlay.get(&key).unwrap().unwrap();
        assert_eq!(record.tags, vec!["beta".to_string(), "pii".to_string()]);
    }

    #[test]
    fn builtin_dry_run_does_not_persist() {
        let (_dir, overlay) = temp_overlay();
        let dispatcher = ActionDispatcher::new(overlay.clone());
        let request = ActionRequest {
            action: "deprecate".to_string(),
            dry_run: true,
            params: serde_json::json!({}),
        };
        let outcome = dispatcher
            .dispatch_builtin("models", "default", "source", "src-1", &request)
            .unwrap();
        assert!(matches!(outcome, ActionOutcome::DryRun(_)));

        let key = OverlayKey {
            namespace: "default".to_string(),
            plugin: "models".to_string(),
            entity_kind: "source".to_string(),
            entity_uid: "src-1".to_string(),
        };
        assert!(overlay.get(&key).unwrap().is_none());
    }

    #[test]
    fn unknown_builtin_action_name_is_rejected() {
        let (_dir, overlay) = temp_overlay();
        let dispatcher = ActionDispatcher::new(overlay);
        let request = ActionRequest {
            action: "nonexistent".to_string(),
            dry_run: false,
            params: serde_json::json!({}),
        };
        let err = dispatcher
            .dispatch_builtin("models", "default", "source", "src-1", &request)
            .unwrap_err();
        assert!(matches!(err, ActionError::Unknown(_)));
    }
}
