//! The composition root: discovery/health endpoints, per-plugin route
//! mounting, and the 30s reconciliation loop (spec §4.I "MountRoutes",
//! §4.K).
//!
//! `ServerState` is the reader-writer-locked state the spec calls out in
//! §5: `{config, configVersion, initialized, failed, initialLoadDone}`.
//! Handlers snapshot what they need under a read lock and release it
//! before calling outward — the one exception is the reconciliation loop
//! itself, which takes the write lock only for the in-memory swap, not
//! for the plugin re-init calls that precede it.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{http::StatusCode, Json, Router};
use serde_json::json;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use catalog_core::store::{ConfigStore, Version};
use catalog_core::CatalogSourcesConfig;
use catalog_plugins::{
    assemble_capabilities, init_all, run_migrations, FailedPlugin, InitializedPlugin, Plugin, PluginConfig,
};
use catalog_security::SecretBackend;
use catalog_tenant::{RefreshRateLimiter, RefreshStatusStore};

use crate::management::{self, ManagementContext};
use crate::middleware;
use crate::role::RoleExtractor;

/// Bootstrap configuration for the composition root. Distinct from the
/// managed [`CatalogSourcesConfig`] the [`ConfigStore`] versions — this is
/// the server binary's own config (spec §10.3).
pub struct ServerConfig {
    pub namespace: String,
    /// `CATALOG_NAMESPACES`, comma-split; `["default"]` when unset.
    pub visible_namespaces: Vec<String>,
    pub refresh_interval: Duration,
    pub reconcile_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            visible_namespaces: vec!["default".to_string()],
            refresh_interval: Duration::from_secs(30),
            reconcile_interval: Duration::from_secs(30),
        }
    }
}

struct ServerState {
    config: CatalogSourcesConfig,
    config_version: Option<Version>,
    initialized: Vec<InitializedPlugin>,
    failed: Vec<FailedPlugin>,
    initial_load_done: bool,
}

pub struct Server {
    state: RwLock<ServerState>,
    config: ServerConfig,
    store: Option<Arc<dyn ConfigStore>>,
    secret_backend: Option<Arc<dyn SecretBackend>>,
    db: Option<Arc<sled::Db>>,
    overlay: Arc<catalog_tenant::OverlayStore>,
    refresh_status: Arc<RefreshStatusStore>,
    refresh_limiter: Arc<RefreshRateLimiter>,
    role_extractor: Arc<dyn RoleExtractor>,
    started_at: Instant,
}

impl Server {
    /// Runs plugin migrations and the initial `init_all` pass, then builds
    /// the `Server`. `registered_count` is the number of plugins passed in,
    /// used only to compute `initialLoadDone` (spec §4.I).
    pub async fn new(
        config: ServerConfig,
        plugins: Vec<Arc<dyn Plugin>>,
        store: Option<Arc<dyn ConfigStore>>,
        secret_backend: Option<Arc<dyn SecretBackend>>,
        db: Option<Arc<sled::Db>>,
        overlay: Arc<catalog_tenant::OverlayStore>,
        refresh_status: Arc<RefreshStatusStore>,
        role_extractor: Arc<dyn RoleExtractor>,
    ) -> anyhow::Result<Arc<Self>> {
        let (initial_config, config_version) = match &store {
            Some(store) => {
                let (config, version) = store.load().await?;
                (config, Some(version))
            }
            None => (CatalogSourcesConfig::empty(), None),
        };

        // Shared DB migrations run once, under an advisory lock, before any
        // plugin's `init` sees the config (spec §4.I "run shared DB
        // migrations (optionally under an advisory lock)"). Skipped
        // entirely when no embedded database is configured — there is
        // nothing to migrate.
        if let Some(db) = &db {
            if let Err(error) = run_migrations(&plugins, db) {
                tracing::error!(%error, "plugin migrations failed");
                return Err(error);
            }
        }

        let registered_count = plugins.len();
        let outcome = init_all(&plugins, &initial_config, db.as_ref(), &[]).await;
        let initial_load_done = outcome.initial_load_done(registered_count);
        let _ = catalog_plugins::start_all(&outcome.initialized).await;

        let refresh_limiter = Arc::new(RefreshRateLimiter::new(config.refresh_interval));

        Ok(Arc::new(Self {
            state: RwLock::new(ServerState {
                config: initial_config,
                config_version,
                initialized: outcome.initialized,
                failed: outcome.failed,
                initial_load_done,
            }),
            config,
            store,
            secret_backend,
            db,
            overlay,
            refresh_status,
            refresh_limiter,
            role_extractor,
            started_at: Instant::now(),
        }))
    }

    /// Spawns the background reconciliation loop (spec §4.K), returning a
    /// handle that cancels it when `token` is cancelled or dropped by the
    /// caller's own shutdown sequence.
    pub fn spawn_reconciliation(self: &Arc<Self>, token: CancellationToken) -> tokio::task::JoinHandle<()> {
        let server = Arc::clone(self);
        tokio::spawn(async move {
            let Some(store) = server.store.clone() else {
                return;
            };
            let mut interval = tokio::time::interval(server.config.reconcile_interval);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        tracing::info!("reconciliation loop cancelled");
                        return;
                    }
                    _ = interval.tick() => {
                        server.reconcile_once(store.as_ref()).await;
                    }
                }
            }
        })
    }

    async fn reconcile_once(&self, store: &dyn ConfigStore) {
        let (new_config, new_version) = match store.load().await {
            Ok(loaded) => loaded,
            Err(error) => {
                tracing::warn!(%error, "reconciliation load failed, will retry next tick");
                return;
            }
        };

        let unchanged = {
            let state = self.state.read().await;
            state.config_version.as_ref() == Some(&new_version)
        };
        if unchanged {
            return;
        }

        let initialized = {
            let state = self.state.read().await;
            state
                .initialized
                .iter()
                .map(|entry| (Arc::clone(&entry.plugin), entry.config_key.clone(), entry.base_path.clone()))
                .collect::<Vec<_>>()
        };

        for (plugin, config_key, base_path) in &initialized {
            let section = new_config.section(config_key).cloned().unwrap_or_default();
            let plugin_config = PluginConfig {
                section,
                db: self.db.clone(),
                logger: tracing::info_span!("plugin", name = %plugin.name()),
                base_path: base_path.clone(),
                config_paths: Vec::new(),
            };
            if let Err(error) = plugin.init(plugin_config).await {
                tracing::error!(plugin = %plugin.name(), %error, "reconciliation re-init failed, keeping prior state");
            }
        }

        let mut state = self.state.write().await;
        state.config = new_config;
        state.config_version = Some(new_version);
    }

    fn reinit_fn(self: &Arc<Self>, plugin: Arc<dyn Plugin>, config_key: String, base_path: String) -> management::ReinitFn {
        let server = Arc::clone(self);
        Arc::new(move |section| {
            let server = Arc::clone(&server);
            let plugin = Arc::clone(&plugin);
            let config_key = config_key.clone();
            let base_path = base_path.clone();
            Box::pin(async move {
                let plugin_config = PluginConfig {
                    section,
                    db: server.db.clone(),
                    logger: tracing::info_span!("plugin", name = %plugin.name()),
                    base_path,
                    config_paths: Vec::new(),
                };
                plugin.init(plugin_config).await
            }) as Pin<Box<dyn Future<Output = Result<(), catalog_plugins::PluginError>> + Send>>
        })
    }

    /// Builds the full axum `Router`: discovery, health, and — per
    /// successfully-initialized plugin — its own routes under `base_path`
    /// plus, if it exposes any management capability, the
    /// [`management::mount`] router nested at `{base_path}/management`.
    pub async fn router(self: &Arc<Self>) -> Router {
        let mut router = Router::new()
            .route("/api/plugins", get(list_plugins))
            .route("/api/plugins/:name/capabilities", get(plugin_capabilities))
            .route("/api/tenancy/v1alpha1/namespaces", get(list_namespaces))
            .route("/healthz", get(healthz))
            .route("/livez", get(healthz))
            .route("/readyz", get(readyz));

        let initialized: Vec<_> = {
            let state = self.state.read().await;
            state
                .initialized
                .iter()
                .map(|entry| (Arc::clone(&entry.plugin), entry.config_key.clone(), entry.base_path.clone()))
                .collect()
        };

        for (plugin, config_key, base_path) in initialized {
            let mut plugin_router = plugin.register_routes();

            let has_management_capability = plugin.as_source_manager().is_some()
                || plugin.as_refresh_provider().is_some()
                || plugin.as_diagnostics_provider().is_some()
                || plugin.as_action_provider().is_some();

            if has_management_capability {
                let ctx = ManagementContext {
                    plugin: Arc::clone(&plugin),
                    config_key: config_key.clone(),
                    namespace: self.config.namespace.clone(),
                    store: self.store.clone(),
                    secret_backend: self.secret_backend.clone(),
                    action_dispatcher: Arc::new(catalog_plugins::ActionDispatcher::new(Arc::clone(&self.overlay))),
                    refresh_status: Arc::clone(&self.refresh_status),
                    refresh_limiter: Arc::clone(&self.refresh_limiter),
                    reinit: self.reinit_fn(Arc::clone(&plugin), config_key.clone(), base_path.clone()),
                };
                plugin_router = plugin_router.nest("/management", management::mount(ctx));
            }

            // plugin_router's state is already fully resolved (either `()`
            // from `register_routes()` or baked in by `management::mount`),
            // so it merges into this still-generic router as an opaque
            // service rather than through the state-matching `nest`.
            router = router.nest_service(&base_path, plugin_router);
        }

        router
            .layer(axum::middleware::from_fn(middleware::role_middleware))
            .layer(axum::Extension(Arc::clone(&self.role_extractor)))
            .layer(middleware::cors_layer())
            .layer(middleware::catch_panic_layer())
            .layer(middleware::trace_layer())
            .layer(middleware::propagate_request_id_layer())
            .layer(middleware::request_id_layer())
            .with_state(Arc::clone(self))
    }
}

async fn list_plugins(State(server): State<Arc<Server>>) -> impl IntoResponse {
    let (initialized, failed) = {
        let state = server.state.read().await;
        (
            state
                .initialized
                .iter()
                .map(|entry| (Arc::clone(&entry.plugin), entry.base_path.clone()))
                .collect::<Vec<_>>(),
            state
                .failed
                .iter()
                .map(|entry| (Arc::clone(&entry.plugin), entry.error.clone()))
                .collect::<Vec<_>>(),
        )
    };

    let mut plugins = Vec::new();
    for (plugin, base_path) in &initialized {
        let plugin = plugin.as_ref();
        let healthy = plugin.healthy().await;
        plugins.push(json!({
            "name": plugin.name(),
            "version": plugin.version(),
            "description": plugin.description(),
            "basePath": base_path,
            "capabilities": assemble_capabilities(plugin),
            "uiHints": plugin.as_ui_hints_provider().map(|p| p.ui_hints()),
            "cliHints": plugin.as_cli_hints_provider().map(|p| p.cli_hints()),
            "status": if healthy { "healthy" } else { "unhealthy" },
        }));
    }
    for (plugin, error) in &failed {
        plugins.push(json!({
            "name": plugin.name(),
            "version": plugin.version(),
            "description": plugin.description(),
            "status": "failed",
            "error": error,
        }));
    }

    Json(json!({ "plugins": plugins }))
}

async fn plugin_capabilities(
    State(server): State<Arc<Server>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, crate::error::ApiError> {
    let state = server.state.read().await;
    let entry = state
        .initialized
        .iter()
        .find(|entry| entry.plugin.name() == name)
        .ok_or_else(|| crate::error::ApiError::not_found(format!("plugin {name:?} is not initialized")))?;
    Ok(Json(assemble_capabilities(entry.plugin.as_ref())))
}

async fn list_namespaces(State(server): State<Arc<Server>>) -> impl IntoResponse {
    Json(json!({ "namespaces": server.config.visible_namespaces }))
}

async fn healthz(State(server): State<Arc<Server>>) -> impl IntoResponse {
    Json(json!({
        "status": "alive",
        "uptime": server.started_at.elapsed().as_secs(),
    }))
}

async fn readyz(State(server): State<Arc<Server>>) -> impl IntoResponse {
    let (initialized, any_failed, initial_load_done) = {
        let state = server.state.read().await;
        (
            state
                .initialized
                .iter()
                .map(|entry| Arc::clone(&entry.plugin))
                .collect::<Vec<_>>(),
            !state.failed.is_empty(),
            state.initial_load_done,
        )
    };

    // sled is embedded and already open by the time the server accepts
    // traffic; there's no separate round-trip to ping, so "configured"
    // and "ok" coincide.
    let database_ok = true;

    let mut all_healthy = !any_failed;
    for plugin in &initialized {
        if !plugin.healthy().await {
            all_healthy = false;
        }
    }

    let components = json!({
        "database": database_ok,
        "initial_load": initial_load_done,
        "plugins": all_healthy,
        "leader_election": true,
    });

    let ready = database_ok && initial_load_done && all_healthy;
    let status = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (
        status,
        Json(json!({
            "status": if ready { "ready" } else { "not_ready" },
            "components": components,
        })),
    )
}
