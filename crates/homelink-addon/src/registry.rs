//! Per-slug add-on manager registry.
//!
//! One manager exists per add-on slug per running instance. The registry is
//! owned by the application context and passed by reference into flow
//! constructors; there is no global cache.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::manager::AddonManager;

/// Registry mapping add-on slug to its shared manager.
#[derive(Default)]
pub struct AddonManagerRegistry {
    managers: RwLock<HashMap<String, Arc<dyn AddonManager>>>,
}

impl AddonManagerRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a manager for its slug, replacing any previous one.
    pub fn register(&self, manager: Arc<dyn AddonManager>) {
        self.managers
            .write()
            .insert(manager.addon_slug().to_string(), manager);
    }

    /// Get the manager for a slug.
    pub fn get(&self, slug: &str) -> Option<Arc<dyn AddonManager>> {
        self.managers.read().get(slug).cloned()
    }

    /// Get the manager for a slug, or register the one produced by `make`.
    pub fn get_or_register<F>(&self, slug: &str, make: F) -> Arc<dyn AddonManager>
    where
        F: FnOnce() -> Arc<dyn AddonManager>,
    {
        if let Some(manager) = self.get(slug) {
            return manager;
        }
        let mut managers = self.managers.write();
        managers
            .entry(slug.to_string())
            .or_insert_with(make)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::{AddonError, AddonInfo};
    use async_trait::async_trait;
    use serde_json::{Map, Value};

    struct DummyManager {
        slug: String,
    }

    #[async_trait]
    impl AddonManager for DummyManager {
        fn addon_name(&self) -> &str {
            "Dummy"
        }

        fn addon_slug(&self) -> &str {
            &self.slug
        }

        async fn async_get_addon_info(&self) -> Result<AddonInfo, AddonError> {
            Ok(AddonInfo::not_installed())
        }

        async fn async_schedule_install_addon(&self) -> Result<(), AddonError> {
            Ok(())
        }

        async fn async_schedule_start_addon(&self) -> Result<(), AddonError> {
            Ok(())
        }

        async fn async_stop_addon(&self) -> Result<(), AddonError> {
            Ok(())
        }

        async fn async_uninstall_addon(&self) -> Result<(), AddonError> {
            Ok(())
        }

        async fn async_set_addon_options(
            &self,
            _options: Map<String, Value>,
        ) -> Result<(), AddonError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_one_manager_per_slug() {
        let registry = AddonManagerRegistry::new();
        let first = registry.get_or_register("multiprotocol", || {
            Arc::new(DummyManager {
                slug: "multiprotocol".to_string(),
            })
        });
        let second = registry.get_or_register("multiprotocol", || {
            panic!("must reuse the registered manager")
        });
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_unknown_slug() {
        let registry = AddonManagerRegistry::new();
        assert!(registry.get("flasher").is_none());
    }
}
