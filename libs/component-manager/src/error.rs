//! Error taxonomy for the component manager.
//!
//! `CallbackPanic` from spec §7 has no public variant here: a panicking user
//! callback is caught at the component-manager boundary, logged with the
//! owning component's name and uuid, and the transition is simply abandoned.
//! It is never returned to a caller (see `component::ComponentManager::call`).

use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by component-manager and service-dependency operations.
#[derive(Debug, Error)]
pub enum ComponentError {
    /// A mutator was called while the target was in a state that forbids it
    /// (e.g. configuring a [`crate::dependency::ServiceDependency`] that is
    /// currently enabled, or looking up an unknown dependency uuid).
    #[error("invalid state: {reason}")]
    InvalidState {
        /// Human-readable explanation of which precondition was violated.
        reason: String,
    },

    /// `disable()` or `remove_service_dependency()` was called from within a
    /// lifecycle or dependency callback running on behalf of the same
    /// component manager.
    #[error("reentrant call into component '{name}' ({uuid}) from its own callback")]
    Reentrant {
        /// Name of the component manager the reentrant call targeted.
        name: String,
        /// Uuid of the component manager the reentrant call targeted.
        uuid: Uuid,
    },

    /// A service dependency could not subscribe to the registry. The
    /// dependency remains configured but unresolved and is retried the next
    /// time it is enabled.
    #[error("registry unavailable for dependency {uuid}: {reason}")]
    RegistryUnavailable {
        /// Uuid of the affected service dependency.
        uuid: Uuid,
        /// Underlying cause reported by the registry.
        reason: String,
    },

    /// A filter string could not be parsed as an LDAP-style expression.
    #[error("invalid filter '{filter}': {reason}")]
    InvalidFilter {
        /// The filter text that failed to parse.
        filter: String,
        /// Description of the parse failure.
        reason: String,
    },
}

/// Convenience alias used throughout the crate's public API.
pub type Result<T> = std::result::Result<T, ComponentError>;
