//! Construction-time configuration for a [`crate::manager::DependencyManager`].

use std::sync::Arc;

use crate::dependency::LockingStrategy;
use crate::registry::{LocalRegistry, ServiceRegistry};

/// Configures a [`crate::manager::DependencyManager`].
///
/// # Examples
///
/// ```
/// use component_manager::config::ComponentManagerConfig;
/// use component_manager::DependencyManager;
///
/// let manager = DependencyManager::with_config(ComponentManagerConfig::default());
/// assert_eq!(manager.component_count(), 0);
/// ```
#[derive(Default)]
pub struct ComponentManagerConfig {
    registry: Option<Arc<dyn ServiceRegistry>>,
    default_locking_strategy: LockingStrategy,
}

impl ComponentManagerConfig {
    /// Starts from defaults: a fresh, private [`LocalRegistry`] and
    /// [`LockingStrategy::Suspend`] for every new dependency.
    #[must_use]
    pub fn new() -> Self {
        ComponentManagerConfig::default()
    }

    /// Supplies the registry every component manager created from this
    /// configuration subscribes its dependencies against. Without this, a
    /// private [`LocalRegistry`] is created automatically.
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<dyn ServiceRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Sets the [`LockingStrategy`] every dependency created through
    /// [`crate::component::ComponentManager::add_service_dependency`] starts
    /// with, in place of [`LockingStrategy::default`]. Individual
    /// dependencies can still override it via
    /// [`crate::dependency::ServiceDependency::set_strategy`] while disabled.
    #[must_use]
    pub fn with_default_locking_strategy(mut self, strategy: LockingStrategy) -> Self {
        self.default_locking_strategy = strategy;
        self
    }

    pub(crate) fn resolve_registry(&self) -> Arc<dyn ServiceRegistry> {
        self.registry.clone().unwrap_or_else(|| Arc::new(LocalRegistry::new()))
    }

    pub(crate) fn default_locking_strategy(&self) -> LockingStrategy {
        self.default_locking_strategy
    }
}
