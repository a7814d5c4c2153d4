//! The per-plugin management HTTP surface (spec §4.J): source CRUD,
//! validation, config rollback, refresh, diagnostics, and action dispatch —
//! everything gated by [`crate::role::Role`] and a plugin's declared
//! optional capabilities.
//!
//! Custom-method routes like `POST /sources/{id}:rollback` follow the same
//! "verb glued onto the resource path" convention as AIP-136 custom
//! methods, which axum's router can't match directly — a path segment is
//! either a literal or a capture, never both. The whole `{id}:verb`
//! segment is captured as one param and split on the first `:` in the
//! handler; `:` falls outside the source-id alphabet
//! (`^[a-z0-9][a-z0-9_-]*$`), so the split is unambiguous.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use catalog_core::store::ConfigStore;
use catalog_core::validate::{ValidationContext, Validator};
use catalog_core::{CatalogSection, ConfigRevision, SourceConfig};
use catalog_plugins::{ActionDispatcher, ActionOutcome, ActionRequest, ActionScope, Plugin, PluginError};
use catalog_security::SecretBackend;
use catalog_tenant::{RefreshRateLimiter, RefreshStatusKey, RefreshStatusRecord, RefreshStatusStore};

use crate::error::ApiError;
use crate::role::Role;

/// Re-initializes the owning plugin against a freshly-resolved
/// [`CatalogSection`], built by [`crate::server::Server`] so the rollback
/// handler never has to know how a `PluginConfig` is assembled.
pub type ReinitFn = Arc<
    dyn Fn(CatalogSection) -> Pin<Box<dyn Future<Output = Result<(), PluginError>> + Send>>
        + Send
        + Sync,
>;

/// Everything one mounted plugin's management router needs, built once by
/// [`crate::server::Server::router`] (spec §4.I "MountRoutes").
pub struct ManagementContext {
    pub plugin: Arc<dyn Plugin>,
    pub config_key: String,
    pub namespace: String,
    pub store: Option<Arc<dyn ConfigStore>>,
    pub secret_backend: Option<Arc<dyn SecretBackend>>,
    pub action_dispatcher: Arc<ActionDispatcher>,
    pub refresh_status: Arc<RefreshStatusStore>,
    pub refresh_limiter: Arc<RefreshRateLimiter>,
    pub reinit: ReinitFn,
}

/// Builds the full management route table for one plugin instance (spec
/// §4.J). Capability gating happens per-handler rather than per-route: a
/// plugin lacking, say, `SourceManager` still gets `/sources` mounted, it
/// just answers 501.
pub fn mount(ctx: ManagementContext) -> Router {
    let state = Arc::new(ctx);
    Router::new()
        .route("/sources", get(list_sources))
        .route("/validate-source", post(validate_source_provider_only))
        .route("/apply-source", post(apply_source))
        .route("/sources/:id/enable", post(enable_source))
        .route("/sources/:id/revisions", get(list_revisions))
        .route("/sources/:id", delete(delete_source).post(sources_id_verb))
        .route("/refresh", post(refresh_all))
        .route("/refresh/:id", post(refresh_one))
        .route("/diagnostics", get(diagnostics))
        .route("/entities/:name", post(entities_name_verb))
        .route("/actions/:scope", get(list_actions))
        .with_state(state)
}

fn require_role(role: Role, required: Role) -> Result<(), ApiError> {
    if role.satisfies(required) {
        Ok(())
    } else {
        Err(ApiError::Forbidden(format!("requires at least the {required:?} role")))
    }
}

fn bad_json(rejection: JsonRejection) -> ApiError {
    ApiError::bad_request(rejection.body_text())
}

/// `Load -> mutate copy -> Save` via [`catalog_core::retry_on_conflict`],
/// logged rather than surfaced on failure. The in-memory mutation this
/// follows has already been applied to the plugin by the time this runs,
/// so a persistence failure here is a degraded-durability warning, not a
/// request failure — the route table's only `VersionConflict -> 409` row
/// is rollback, which writes directly instead of through this helper.
async fn persist_mutation(store: &dyn ConfigStore, mutate: impl FnMut(&mut catalog_core::CatalogSourcesConfig)) {
    if let Err(error) = catalog_core::retry_on_conflict(store, 3, mutate).await {
        tracing::warn!(%error, "failed to persist config after an already-applied in-memory mutation");
    }
}

async fn list_sources(
    State(ctx): State<Arc<ManagementContext>>,
    Extension(role): Extension<Role>,
) -> Result<impl IntoResponse, ApiError> {
    require_role(role, Role::Viewer)?;
    let manager = ctx
        .plugin
        .as_source_manager()
        .ok_or(PluginError::CapabilityMissing("SourceManager"))?;

    let mut sources = manager.list_sources().await?;
    let statuses = ctx.refresh_status.list_for_plugin(&ctx.namespace, ctx.plugin.name())?;
    for source in &mut sources {
        if let Some(status) = statuses.get(&source.id) {
            source.last_refresh_time.get_or_insert(status.last_refresh_time);
            source.last_refresh_status.get_or_insert(status.last_refresh_status);
            if source.summary.is_none() {
                source.summary = Some(status.summary.clone());
            }
        }
        source.properties = catalog_security::redact_sensitive_properties(&source.properties);
    }
    Ok(Json(sources))
}

async fn validate_source_provider_only(
    State(ctx): State<Arc<ManagementContext>>,
    Extension(role): Extension<Role>,
    body: Result<Json<SourceConfig>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    require_role(role, Role::Operator)?;
    let Json(source) = body.map_err(bad_json)?;
    let validator = Validator::provider_only();
    let vctx = ValidationContext {
        provider: ctx.plugin.as_provider_validator(),
    };
    Ok(Json(validator.run(&vctx, &source)))
}

#[derive(Debug, Deserialize)]
struct ApplySourceRequest {
    #[serde(flatten)]
    source: SourceConfig,
    #[serde(rename = "refreshAfterApply", default)]
    refresh_after_apply: bool,
}

async fn apply_source(
    State(ctx): State<Arc<ManagementContext>>,
    Extension(role): Extension<Role>,
    body: Result<Json<ApplySourceRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    require_role(role, Role::Operator)?;
    let Json(request) = body.map_err(bad_json)?;
    let source = request.source;

    let manager = ctx
        .plugin
        .as_source_manager()
        .ok_or(PluginError::CapabilityMissing("SourceManager"))?;

    let validator = Validator::standard();
    let vctx = ValidationContext {
        provider: ctx.plugin.as_provider_validator(),
    };
    let validation = validator.run(&vctx, &source);
    if !validation.valid {
        return Err(ApiError::ValidationFailed(Box::new(validation)));
    }

    let resolved_properties = match &ctx.secret_backend {
        Some(backend) => catalog_security::resolve_secret_refs(backend.as_ref(), &source.properties).await?,
        None => source.properties.clone(),
    };
    let resolved_source = SourceConfig {
        properties: resolved_properties,
        ..source.clone()
    };
    manager.apply_source(&resolved_source).await?;

    if let Some(store) = &ctx.store {
        let persisted = source.clone();
        let config_key = ctx.config_key.clone();
        persist_mutation(store.as_ref(), move |config| {
            config.section_mut(&config_key).upsert(persisted.clone());
        })
        .await;
    }

    let mut response = json!({ "status": "applied" });
    if request.refresh_after_apply {
        if let Some(refresh_provider) = ctx.plugin.as_refresh_provider() {
            let started = Instant::now();
            match refresh_provider.refresh(Some(&source.id)).await {
                Ok(outcome) => {
                    let record = RefreshStatusRecord {
                        last_refresh_time: Utc::now(),
                        last_refresh_status: outcome.status,
                        summary: outcome.summary,
                        last_error: outcome.last_error,
                        entities_loaded: outcome.entities_loaded,
                        entities_removed: outcome.entities_removed,
                        duration_ms: started.elapsed().as_millis() as u64,
                    };
                    let key = RefreshStatusKey::new(&ctx.namespace, ctx.plugin.name(), &source.id);
                    if let Err(error) = ctx.refresh_status.upsert(&key, &record) {
                        tracing::warn!(%error, "failed to persist refresh status after apply-source");
                    }
                    response["refresh"] = json!({ "status": record.last_refresh_status, "summary": record.summary });
                }
                Err(error) => {
                    tracing::warn!(%error, source = %source.id, "refresh-after-apply failed");
                    response["refreshError"] = json!(error.to_string());
                }
            }
        }
    }

    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
struct EnableSourceRequest {
    #[serde(default = "default_true")]
    enabled: bool,
}

fn default_true() -> bool {
    true
}

async fn enable_source(
    State(ctx): State<Arc<ManagementContext>>,
    Extension(role): Extension<Role>,
    Path(id): Path<String>,
    body: Result<Json<EnableSourceRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    require_role(role, Role::Operator)?;
    let Json(request) = body.map_err(bad_json)?;
    let manager = ctx
        .plugin
        .as_source_manager()
        .ok_or(PluginError::CapabilityMissing("SourceManager"))?;
    manager.enable_source(&id, request.enabled).await?;

    if let Some(store) = &ctx.store {
        let config_key = ctx.config_key.clone();
        let id = id.clone();
        persist_mutation(store.as_ref(), move |config| {
            let section = config.section_mut(&config_key);
            if let Some(idx) = section.find_index(&id) {
                section.sources[idx].enabled = request.enabled;
            }
        })
        .await;
    }

    Ok(Json(json!({ "status": "updated" })))
}

async fn delete_source(
    State(ctx): State<Arc<ManagementContext>>,
    Extension(role): Extension<Role>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    require_role(role, Role::Operator)?;
    let manager = ctx
        .plugin
        .as_source_manager()
        .ok_or(PluginError::CapabilityMissing("SourceManager"))?;
    manager.delete_source(&id).await?;

    if let Some(store) = &ctx.store {
        let config_key = ctx.config_key.clone();
        let deleted_id = id.clone();
        persist_mutation(store.as_ref(), move |config| {
            config.section_mut(&config_key).remove(&deleted_id);
        })
        .await;
    }

    let status_key = RefreshStatusKey::new(&ctx.namespace, ctx.plugin.name(), &id);
    if let Err(error) = ctx.refresh_status.delete(&status_key) {
        tracing::warn!(%error, "failed to purge refresh status on source delete");
    }

    Ok(StatusCode::NO_CONTENT)
}

async fn list_revisions(
    State(ctx): State<Arc<ManagementContext>>,
    Extension(role): Extension<Role>,
    Path(_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    require_role(role, Role::Viewer)?;
    match &ctx.store {
        Some(store) => Ok(Json(store.list_revisions().await?)),
        None => Ok(Json(Vec::<ConfigRevision>::new())),
    }
}

/// Dispatches the three `{id}:verb` POST operations that share a single
/// route (`validate`, `rollback`, `action`) — see module docs.
async fn sources_id_verb(
    State(ctx): State<Arc<ManagementContext>>,
    Extension(role): Extension<Role>,
    Path(id_verb): Path<String>,
    body: axum::body::Bytes,
) -> Result<Response, ApiError> {
    let Some((id, verb)) = id_verb.split_once(':') else {
        return Err(ApiError::bad_request(format!(
            "expected POST /sources/{{id}}:verb, got /sources/{id_verb}"
        )));
    };

    match verb {
        "validate" => {
            require_role(role, Role::Operator)?;
            let source: SourceConfig =
                serde_json::from_slice(&body).map_err(|e| ApiError::bad_request(e.to_string()))?;
            let validator = Validator::standard();
            let vctx = ValidationContext {
                provider: ctx.plugin.as_provider_validator(),
            };
            Ok(Json(validator.run(&vctx, &source)).into_response())
        }
        "rollback" => {
            require_role(role, Role::Operator)?;
            #[derive(Deserialize)]
            struct RollbackRequest {
                version: String,
            }
            let request: RollbackRequest =
                serde_json::from_slice(&body).map_err(|e| ApiError::bad_request(e.to_string()))?;
            let store = ctx
                .store
                .as_ref()
                .ok_or_else(|| ApiError::bad_request("no config store is configured for this plugin"))?;
            let (new_config, new_version) = store.rollback(&request.version).await?;
            let new_section = new_config.section(&ctx.config_key).cloned().unwrap_or_default();

            let mut response = json!({ "status": "rolled_back", "version": new_version.0 });
            if let Err(error) = (ctx.reinit)(new_section).await {
                tracing::error!(%error, plugin = %ctx.plugin.name(), "reinit after rollback failed");
                response["reinitError"] = json!(error.to_string());
            }
            Ok(Json(response).into_response())
        }
        "action" => {
            require_role(role, Role::Operator)?;
            let request: ActionRequest =
                serde_json::from_slice(&body).map_err(|e| ApiError::bad_request(e.to_string()))?;
            Ok(dispatch_action(&ctx, "source", id, request).await?.into_response())
        }
        other => Err(ApiError::bad_request(format!("unknown management operation {other:?}"))),
    }
}

async fn refresh_all(
    State(ctx): State<Arc<ManagementContext>>,
    Extension(role): Extension<Role>,
) -> Result<impl IntoResponse, ApiError> {
    require_role(role, Role::Operator)?;
    let provider = ctx
        .plugin
        .as_refresh_provider()
        .ok_or(PluginError::CapabilityMissing("RefreshProvider"))?;

    let key = RefreshRateLimiter::all_sources_key(ctx.plugin.name());
    let decision = ctx.refresh_limiter.allow(&key);
    if let Some(retry_after_secs) = decision.retry_after_seconds() {
        return Err(ApiError::RateLimited { retry_after_secs });
    }

    let started = Instant::now();
    let outcome = provider.refresh(None).await?;
    Ok(Json(json!({
        "status": outcome.status,
        "summary": outcome.summary,
        "lastError": outcome.last_error,
        "entitiesLoaded": outcome.entities_loaded,
        "entitiesRemoved": outcome.entities_removed,
        "durationMs": started.elapsed().as_millis() as u64,
    })))
}

async fn refresh_one(
    State(ctx): State<Arc<ManagementContext>>,
    Extension(role): Extension<Role>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    require_role(role, Role::Operator)?;
    let provider = ctx
        .plugin
        .as_refresh_provider()
        .ok_or(PluginError::CapabilityMissing("RefreshProvider"))?;

    let key = RefreshRateLimiter::per_source_key(ctx.plugin.name(), &id);
    let decision = ctx.refresh_limiter.allow(&key);
    if let Some(retry_after_secs) = decision.retry_after_seconds() {
        return Err(ApiError::RateLimited { retry_after_secs });
    }

    let started = Instant::now();
    let outcome = provider.refresh(Some(&id)).await?;
    let record = RefreshStatusRecord {
        last_refresh_time: Utc::now(),
        last_refresh_status: outcome.status,
        summary: outcome.summary,
        last_error: outcome.last_error,
        entities_loaded: outcome.entities_loaded,
        entities_removed: outcome.entities_removed,
        duration_ms: started.elapsed().as_millis() as u64,
    };
    let status_key = RefreshStatusKey::new(&ctx.namespace, ctx.plugin.name(), &id);
    ctx.refresh_status.upsert(&status_key, &record)?;
    Ok(Json(record))
}

async fn diagnostics(
    State(ctx): State<Arc<ManagementContext>>,
    Extension(role): Extension<Role>,
) -> Result<impl IntoResponse, ApiError> {
    require_role(role, Role::Viewer)?;
    let provider = ctx
        .plugin
        .as_diagnostics_provider()
        .ok_or(PluginError::CapabilityMissing("DiagnosticsProvider"))?;
    Ok(Json(provider.diagnostics().await))
}

#[derive(Debug, Deserialize)]
struct EntityActionQuery {
    #[serde(default = "default_entity_kind")]
    kind: String,
}

fn default_entity_kind() -> String {
    "asset".to_string()
}

async fn entities_name_verb(
    State(ctx): State<Arc<ManagementContext>>,
    Extension(role): Extension<Role>,
    Path(name_verb): Path<String>,
    Query(query): Query<EntityActionQuery>,
    body: axum::body::Bytes,
) -> Result<impl IntoResponse, ApiError> {
    require_role(role, Role::Operator)?;
    let Some((uid, "action")) = name_verb.split_once(':') else {
        return Err(ApiError::bad_request(format!(
            "expected POST /entities/{{name}}:action, got /entities/{name_verb}"
        )));
    };
    let request: ActionRequest =
        serde_json::from_slice(&body).map_err(|e| ApiError::bad_request(e.to_string()))?;
    dispatch_action(&ctx, &query.kind, uid, request).await
}

async fn dispatch_action(
    ctx: &ManagementContext,
    entity_kind: &str,
    entity_uid: &str,
    request: ActionRequest,
) -> Result<Json<serde_json::Value>, ApiError> {
    let scope = if entity_kind == "source" {
        ActionScope::Source
    } else {
        ActionScope::Asset
    };
    // Builtins (`tag`/`annotate`/`deprecate`) are always dispatchable; any
    // other action id requires the plugin to implement `ActionProvider` —
    // checked here so a non-builtin id on a provider-less plugin maps to
    // 501, not 400 (spec §4.J "501 if plugin lacks ActionProvider").
    if !catalog_plugins::is_builtin_action(&request.action) && ctx.plugin.as_action_provider().is_none() {
        return Err(PluginError::CapabilityMissing("ActionProvider").into());
    }
    let definition = ctx
        .action_dispatcher
        .actions_for_scope(ctx.plugin.as_ref(), scope)
        .into_iter()
        .find(|def| def.id == request.action)
        .ok_or_else(|| ApiError::bad_request(format!("unknown action {:?}", request.action)))?;
    if request.dry_run && !definition.supports_dry_run {
        return Err(ApiError::bad_request(format!(
            "action {:?} does not support dry-run",
            request.action
        )));
    }

    let outcome = ctx
        .action_dispatcher
        .dispatch(ctx.plugin.as_ref(), &ctx.namespace, entity_kind, entity_uid, &request)
        .await?;
    Ok(Json(match outcome {
        ActionOutcome::Applied(value) => json!({ "status": "applied", "result": value }),
        ActionOutcome::DryRun(preview) => json!({ "status": preview.status, "preview": preview.preview }),
    }))
}

async fn list_actions(
    State(ctx): State<Arc<ManagementContext>>,
    Extension(role): Extension<Role>,
    Path(scope): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    require_role(role, Role::Viewer)?;
    let scope = match scope.as_str() {
        "source" => ActionScope::Source,
        "asset" => ActionScope::Asset,
        other => return Err(ApiError::bad_request(format!("unknown action scope {other:?}"))),
    };
    Ok(Json(ctx.action_dispatcher.actions_for_scope(ctx.plugin.as_ref(), scope)))
}
