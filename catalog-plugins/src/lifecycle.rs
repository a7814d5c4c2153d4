//! Plugin lifecycle orchestration (spec §4.I).
//!
//! `init_all` resolves each registered plugin's config key, its section of
//! `CatalogSourcesConfig`, and its mount `base_path`; builds a
//! [`PluginConfig`]; and calls `Plugin::init`. A single plugin's init
//! failure is isolated — it's recorded and the rest still start — so one
//! misconfigured plugin never takes the whole server down (spec §4.I
//! "failure isolation").

use std::path::PathBuf;
use std::sync::Arc;

use catalog_core::CatalogSourcesConfig;

use crate::capability::{Plugin, PluginConfig};

/// A plugin that failed `init`, with enough context to surface in
/// `GET /api/plugins` and the readiness probe.
pub struct FailedPlugin {
    pub plugin: Arc<dyn Plugin>,
    pub error: String,
}

/// A plugin that finished `init` successfully, with the resolved
/// config key and base path it was mounted under.
pub struct InitializedPlugin {
    pub plugin: Arc<dyn Plugin>,
    pub config_key: String,
    pub base_path: String,
}

pub struct InitOutcome {
    pub initialized: Vec<InitializedPlugin>,
    pub failed: Vec<FailedPlugin>,
}

impl InitOutcome {
    /// `initialLoadDone` (spec §4.I): true once every registered plugin
    /// has been attempted, regardless of whether it succeeded.
    pub fn initial_load_done(&self, registered_count: usize) -> bool {
        self.initialized.len() + self.failed.len() == registered_count
    }
}

fn default_base_path(plugin: &dyn Plugin) -> String {
    format!("/api/{}_catalog/{}", plugin.name(), plugin.version())
}

fn config_key_for(plugin: &dyn Plugin) -> String {
    plugin
        .as_source_key_provider()
        .map(|p| p.source_key())
        .unwrap_or_else(|| plugin.name().to_string())
}

fn base_path_for(plugin: &dyn Plugin) -> String {
    plugin
        .as_base_path_provider()
        .map(|p| p.base_path())
        .unwrap_or_else(|| default_base_path(plugin))
}

/// Initializes every plugin in `plugins`, in order, against `config`.
/// `db` is shared with every plugin that wants its own `sled::Tree`;
/// `config_paths` is passed through unchanged so a plugin backed by
/// files on disk knows where to look.
pub async fn init_all(
    plugins: &[Arc<dyn Plugin>],
    config: &CatalogSourcesConfig,
    db: Option<&Arc<sled::Db>>,
    config_paths: &[PathBuf],
) -> InitOutcome {
    let mut initialized = Vec::new();
    let mut failed = Vec::new();

    for plugin in plugins {
        let config_key = config_key_for(plugin.as_ref());
        let base_path = base_path_for(plugin.as_ref());
        let section = config.section(&config_key).cloned().unwrap_or_default();

        let plugin_config = PluginConfig {
            section,
            db: db.cloned(),
            logger: tracing::info_span!("plugin", name = %plugin.name(), version = %plugin.version()),
            base_path: base_path.clone(),
            config_paths: config_paths.to_vec(),
        };

        match plugin.init(plugin_config).await {
            Ok(()) => {
                tracing::info!(plugin = %plugin.name(), base_path = %base_path, "plugin initialized");
                initialized.push(InitializedPlugin {
                    plugin: Arc::clone(plugin),
                    config_key,
                    base_path,
                });
            }
            Err(error) => {
                tracing::error!(plugin = %plugin.name(), %error, "plugin init failed, isolating");
                failed.push(FailedPlugin {
                    plugin: Arc::clone(plugin),
                    error: error.to_string(),
                });
            }
        }
    }

    InitOutcome { initialized, failed }
}

/// Calls `start` on every initialized plugin, best-effort: a `start`
/// failure demotes the plugin to unhealthy rather than aborting the
/// others (mirrors the `init` failure-isolation policy).
pub async fn start_all(initialized: &[InitializedPlugin]) -> Vec<FailedPlugin> {
    let mut failed = Vec::new();
    for entry in initialized {
        if let Err(error) = entry.plugin.start().await {
            tracing::error!(plugin = %entry.plugin.name(), %error, "plugin start failed");
            failed.push(FailedPlugin {
                plugin: Arc::clone(&entry.plugin),
                error: error.to_string(),
            });
        }
    }
    failed
}

/// Calls `stop` on every initialized plugin in reverse init order,
/// logging failures but not propagating them — shutdown must make
/// progress through every plugin even if one of them errors.
pub async fn stop_all(initialized: &[InitializedPlugin]) {
    for entry in initialized.iter().rev() {
        if let Err(error) = entry.plugin.stop().await {
            tracing::warn!(plugin = %entry.plugin.name(), %error, "plugin stop failed");
        }
    }
}

const MIGRATIONS_LOCK_KEY: &[u8] = b"lock";
const MIGRATIONS_APPLIED_TREE: &str = "catalog_migrations_applied";
const MIGRATIONS_LOCK_TREE: &str = "catalog_migrations_lock";

/// Runs every registered plugin's declared [`crate::capability::Migration`]s
/// exactly once, before any plugin's `init` runs (spec §4.I "run shared DB
/// migrations (optionally under an advisory lock)"). The lock is advisory
/// and held via `sled::Tree::compare_and_swap`: a process that loses the
/// race skips running migrations itself and trusts the winner to finish
/// them, since `db` is the same embedded store every process in this
/// deployment shares.
pub fn run_migrations(plugins: &[Arc<dyn Plugin>], db: &sled::Db) -> Result<(), anyhow::Error> {
    let lock_tree = db.open_tree(MIGRATIONS_LOCK_TREE)?;
    let holder = uuid::Uuid::new_v4().to_string();
    let acquired = lock_tree
        .compare_and_swap(MIGRATIONS_LOCK_KEY, None as Option<&[u8]>, Some(holder.as_bytes()))?
        .is_ok();
    if !acquired {
        tracing::info!("migrations lock held elsewhere, skipping");
        return Ok(());
    }

    let result = (|| -> Result<(), anyhow::Error> {
        let applied_tree = db.open_tree(MIGRATIONS_APPLIED_TREE)?;
        for plugin in plugins {
            for migration in plugin.migrations() {
                if applied_tree.contains_key(migration.id.as_bytes())? {
                    continue;
                }
                tracing::info!(plugin = %plugin.name(), migration = %migration.id, "applying migration");
                (migration.apply)()?;
                applied_tree.insert(migration.id.as_bytes(), &[1u8])?;
            }
        }
        Ok(())
    })();

    let _ = lock_tree.remove(MIGRATIONS_LOCK_KEY);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::PluginError;
    use async_trait::async_trait;
    use axum::Router;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct GoodPlugin {
        started: AtomicBool,
    }

    #[async_trait]
    impl Plugin for GoodPlugin {
        fn name(&self) -> &str {
            "models"
        }
        fn version(&self) -> &str {
            "v1"
        }
        fn description(&self) -> &str {
            "good plugin"
        }
        async fn init(&self, _config: PluginConfig) -> Result<(), PluginError> {
            Ok(())
        }
        async fn start(&self) -> Result<(), PluginError> {
            self.started.store(true, Ordering::SeqCst);
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
    }

    struct BadPlugin;

    #[async_trait]
    impl Plugin for BadPlugin {
        fn name(&self) -> &str {
            "datasets"
        }
        fn version(&self) -> &str {
            "v1"
        }
        fn description(&self) -> &str {
            "bad plugin"
        }
        async fn init(&self, _config: PluginConfig) -> Result<(), PluginError> {
            Err(PluginError::InitFailed(anyhow::anyhow!("missing credentials")))
        }
        async fn start(&self) -> Result<(), PluginError> {
            Ok(())
        }
        async fn stop(&self) -> Result<(), PluginError> {
            Ok(())
        }
        async fn healthy(&self) -> bool {
            false
        }
        fn register_routes(&self) -> Router {
            Router::new()
        }
    }

    #[tokio::test]
    async fn one_plugin_failing_init_does_not_stop_the_others() {
        let plugins: Vec<Arc<dyn Plugin>> = vec![
            Arc::new(GoodPlugin { started: AtomicBool::new(false) }),
            Arc::new(BadPlugin),
        ];
        let config = CatalogSourcesConfig::empty();
        let outcome = init_all(&plugins, &config, None, &[]).await;

        assert_eq!(outcome.initialized.len(), 1);
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.initialized[0].plugin.name(), "models");
        assert_eq!(outcome.failed[0].plugin.name(), "datasets");
        assert!(outcome.initial_load_done(2));
    }

    #[tokio::test]
    async fn default_base_path_uses_name_and_version() {
        let plugins: Vec<Arc<dyn Plugin>> = vec![Arc::new(GoodPlugin { started: AtomicBool::new(false) })];
        let config = CatalogSourcesConfig::empty();
        let outcome = init_all(&plugins, &config, None, &[]).await;
        assert_eq!(outcome.initialized[0].base_path, "/api/models_catalog/v1");
    }

    #[tokio::test]
    async fn start_all_runs_every_initialized_plugin() {
        let plugin = Arc::new(GoodPlugin { started: AtomicBool::new(false) });
        let plugins: Vec<Arc<dyn Plugin>> = vec![plugin.clone()];
        let config = CatalogSourcesConfig::empty();
        let outcome = init_all(&plugins, &config, None, &[]).await;
        let failed = start_all(&outcome.initialized).await;
        assert!(failed.is_empty());
        assert!(plugin.started.load(Ordering::SeqCst));
    }
}
