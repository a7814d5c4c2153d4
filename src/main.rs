// Composition root for the catalog management server: loads the binary's
// own bootstrap config, wires the storage/security/tenant substrate,
// collects registered plugins, builds the axum router, and serves it with
// graceful shutdown.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use catalog_api::{HeaderRoleExtractor, Server, ServerConfig};
use catalog_core::store::file::FileConfigStore;
use catalog_core::store::record::RecordConfigStore;
use catalog_core::store::ConfigStore;
use catalog_plugins::PluginRegistry;
use catalog_security::StaticSecretBackend;
use catalog_tenant::{OverlayStore, RefreshStatusStore};

/// The server binary's own configuration: bind address, which `ConfigStore`
/// backend to run, and the default refresh/reconcile cadence. Distinct from
/// the `CatalogSourcesConfig` document that backend then versions.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct BootstrapConfig {
    bind_address: String,
    store: StoreBackend,
    refresh_interval_secs: u64,
    reconcile_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind")]
enum StoreBackend {
    /// YAML file plus `.history/` directory, rooted at `path`.
    File { path: PathBuf },
    /// `sled` tree inside `data_dir`, tree name `config`.
    Record { data_dir: PathBuf },
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            store: StoreBackend::File {
                path: PathBuf::from("./data/sources.yaml"),
            },
            refresh_interval_secs: 30,
            reconcile_interval_secs: 30,
        }
    }
}

impl BootstrapConfig {
    const PATH: &'static str = "config.yaml";

    /// Loads `config.yaml` next to the binary, or writes and returns a
    /// generated default on first run.
    async fn load() -> Result<Self> {
        match tokio::fs::read_to_string(Self::PATH).await {
            Ok(content) => serde_yaml::from_str(&content).context("failed to parse config.yaml"),
            Err(_) => {
                let default_config = Self::default();
                default_config.save().await?;
                Ok(default_config)
            }
        }
    }

    async fn save(&self) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        tokio::fs::write(Self::PATH, content).await?;
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("catalog_server=info,catalog_api=info")),
        )
        .json()
        .init();

    info!("starting catalog management server");

    let bootstrap = BootstrapConfig::load().await?;

    let namespace = std::env::var("CATALOG_CONFIG_NAMESPACE").unwrap_or_else(|_| "default".to_string());
    let visible_namespaces = std::env::var("CATALOG_NAMESPACES")
        .ok()
        .map(|raw| {
            raw.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
        })
        .filter(|namespaces| !namespaces.is_empty())
        .unwrap_or_else(|| vec!["default".to_string()]);

    let server_config = ServerConfig {
        namespace,
        visible_namespaces,
        refresh_interval: Duration::from_secs(bootstrap.refresh_interval_secs),
        reconcile_interval: Duration::from_secs(bootstrap.reconcile_interval_secs),
    };

    // The record store shares its sled database with the tenant-scoped
    // overlay/refresh-status trees; the file store doesn't need one, but
    // those tenant trees still do, so a database is opened either way.
    let (store, tenant_db): (Arc<dyn ConfigStore>, Arc<sled::Db>) = match &bootstrap.store {
        StoreBackend::File { path } => {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await.context("creating config dir")?;
            }
            let data_dir = PathBuf::from("./data");
            tokio::fs::create_dir_all(&data_dir).await.context("creating data dir")?;
            let db = sled::open(data_dir.join("catalog.sled")).context("opening sled database")?;
            (Arc::new(FileConfigStore::new(path.clone())), Arc::new(db))
        }
        StoreBackend::Record { data_dir } => {
            tokio::fs::create_dir_all(data_dir).await.context("creating data dir")?;
            let db = sled::open(data_dir.join("catalog.sled")).context("opening sled database")?;
            let store = RecordConfigStore::open(&db, "config").context("opening config tree")?;
            (Arc::new(store), Arc::new(db))
        }
    };

    let overlay = Arc::new(OverlayStore::open(&tenant_db, "overlay").context("opening overlay tree")?);
    let refresh_status =
        Arc::new(RefreshStatusStore::open(&tenant_db, "refresh_status").context("opening refresh-status tree")?);

    // No external secret manager is wired up out of the box; operators
    // supply their own `SecretBackend` by swapping this construction for
    // one that talks to theirs.
    let secret_backend = Arc::new(StaticSecretBackend::new());

    let plugins = PluginRegistry::all();
    info!(count = plugins.len(), "registered plugins");

    let server = Server::new(
        server_config,
        plugins,
        Some(store),
        Some(secret_backend),
        Some(tenant_db),
        overlay,
        refresh_status,
        Arc::new(HeaderRoleExtractor),
    )
    .await
    .context("failed to initialize server")?;

    let shutdown = CancellationToken::new();
    let reconciliation = server.spawn_reconciliation(shutdown.clone());

    let router = server.router().await;

    let listener = tokio::net::TcpListener::bind(&bootstrap.bind_address)
        .await
        .with_context(|| format!("binding {}", bootstrap.bind_address))?;
    info!(address = %bootstrap.bind_address, "listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(wait_for_shutdown_signal())
        .await
        .context("server error")?;

    info!("shutdown signal received, stopping background tasks");
    shutdown.cancel();
    if let Err(error) = reconciliation.await {
        error!(%error, "reconciliation task panicked during shutdown");
    }

    info!("catalog management server stopped");
    Ok(())
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
