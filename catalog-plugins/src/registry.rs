//! Process-wide plugin registry (spec §4.I, §9 "Global registry").
//!
//! Plugins register themselves once, typically from their crate's own
//! `inventory`-less `fn register()` called at process startup before
//! [`crate::lifecycle::init_all`] runs. [`PluginRegistry::reset`] exists
//! purely so integration tests don't see plugins registered by an earlier
//! test in the same process.

use std::sync::{Arc, Mutex, OnceLock};

use crate::capability::Plugin;

static REGISTRY: OnceLock<Mutex<Vec<Arc<dyn Plugin>>>> = OnceLock::new();

fn cell() -> &'static Mutex<Vec<Arc<dyn Plugin>>> {
    REGISTRY.get_or_init(|| Mutex::new(Vec::new()))
}

pub struct PluginRegistry;

impl PluginRegistry {
    pub fn register(plugin: Arc<dyn Plugin>) {
        cell().lock().expect("plugin registry lock poisoned").push(plugin);
    }

    pub fn all() -> Vec<Arc<dyn Plugin>> {
        cell().lock().expect("plugin registry lock poisoned").clone()
    }

    /// Clears the registry. Test-only: production code never needs to
    /// unregister a plugin once the process is up.
    pub fn reset() {
        cell().lock().expect("plugin registry lock poisoned").clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{PluginConfig, PluginError};
    use async_trait::async_trait;
    use axum::Router;

    struct NoopPlugin(&'static str);

    #[async_trait]
    impl Plugin for NoopPlugin {
        fn name(&self) -> &str {
            self.0
        }
        fn version(&self) -> &str {
            "v1"
        }
        fn description(&self) -> &str {
            "test plugin"
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
    }

    #[test]
    fn register_and_reset_round_trip() {
        PluginRegistry::reset();
        assert!(PluginRegistry::all().is_empty());
        PluginRegistry::register(Arc::new(NoopPlugin("models")));
        PluginRegistry::register(Arc::new(NoopPlugin("datasets")));
        assert_eq!(PluginRegistry::all().len(), 2);
        PluginRegistry::reset();
        assert!(PluginRegistry::all().is_empty());
    }
}
