//! Dependency manager: owns every component manager created against one
//! registry, and tears them all down together on bundle stop.

use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;

use crate::component::{ComponentManager, ComponentManagerHandle};
use crate::config::ComponentManagerConfig;
use crate::registry::ServiceRegistry;

/// Owns a collection of [`ComponentManager`]s sharing one
/// [`ServiceRegistry`], mirroring the per-bundle dependency manager of
/// spec.md §4.4.
pub struct DependencyManager {
    registry: Arc<dyn ServiceRegistry>,
    default_locking_strategy: crate::dependency::LockingStrategy,
    components: DashMap<Uuid, Arc<dyn ComponentManagerHandle>>,
}

impl Default for DependencyManager {
    fn default() -> Self {
        DependencyManager::with_config(ComponentManagerConfig::default())
    }
}

impl DependencyManager {
    /// Creates a manager with a private, in-process registry.
    #[must_use]
    pub fn new() -> Self {
        DependencyManager::default()
    }

    /// Creates a manager against the registry (or default) named in `config`.
    #[must_use]
    pub fn with_config(config: ComponentManagerConfig) -> Self {
        DependencyManager {
            registry: config.resolve_registry(),
            default_locking_strategy: config.default_locking_strategy(),
            components: DashMap::new(),
        }
    }

    /// The registry this manager's component managers subscribe their
    /// dependencies against.
    #[must_use]
    pub fn registry(&self) -> Arc<dyn ServiceRegistry> {
        self.registry.clone()
    }

    /// Creates a new, disabled component manager wrapping `instance`,
    /// registers it with this dependency manager, and returns its handle.
    pub fn create_component<T: Send + Sync + 'static>(&self, name: impl Into<String>, instance: Arc<T>) -> ComponentManager<T> {
        let cm = ComponentManager::new(name, instance, self.registry.clone(), self.default_locking_strategy);
        self.components.insert(cm.uuid(), Arc::new(cm.clone()));
        cm
    }

    /// Number of component managers currently tracked.
    #[must_use]
    pub fn component_count(&self) -> usize {
        self.components.len()
    }

    /// Looks up a component manager's type-erased handle by uuid.
    #[must_use]
    pub fn find(&self, uuid: Uuid) -> Option<Arc<dyn ComponentManagerHandle>> {
        self.components.get(&uuid).map(|entry| entry.value().clone())
    }

    /// Drops a component manager from this dependency manager's bookkeeping
    /// without disabling it first. Prefer [`DependencyManager::on_bundle_stop`]
    /// for an orderly shutdown.
    pub fn forget(&self, uuid: Uuid) {
        self.components.remove(&uuid);
    }

    /// Disables every tracked component manager, then drops this manager's
    /// references to them. Mirrors what a bundle activator's `stop` does in
    /// the originating Celix model: every component owned by the bundle is
    /// torn down before the bundle itself is unloaded.
    pub fn on_bundle_stop(&self) {
        for entry in self.components.iter() {
            if let Err(err) = entry.value().disable() {
                tracing::warn!(
                    uuid = %entry.key(),
                    name = entry.value().name(),
                    error = %err,
                    "component manager failed to disable cleanly during bundle stop"
                );
            }
        }
        self.components.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[test]
    fn create_component_tracks_it_until_bundle_stop() {
        let manager = DependencyManager::new();
        let cm = manager.create_component("svc", Arc::new(Noop));
        assert_eq!(manager.component_count(), 1);
        assert!(manager.find(cm.uuid()).is_some());

        cm.enable().expect("enable succeeds");
        manager.on_bundle_stop();

        assert_eq!(manager.component_count(), 0);
        assert!(!cm.is_enabled());
    }
}
