//! A dependency-injection component manager in the Apache Celix/Felix
//! dependency-manager mould: declare a component's service dependencies,
//! register lifecycle callbacks, and let the manager drive `init`/`start`/
//! `stop`/`deinit` automatically as dependency resolution changes.
//!
//! The moving pieces, bottom-up:
//!
//! - [`registry`] — the consumed service-registry contract ([`registry::ServiceRegistry`])
//!   plus an in-process reference implementation ([`registry::LocalRegistry`]).
//! - [`tracker`] — [`tracker::ServiceTracker`], a ranked, deduplicated view
//!   over one `(service_type, filter)` subscription.
//! - [`dependency`] — [`dependency::ServiceDependency`], pairing a tracker
//!   with cardinality/required-ness and user callbacks.
//! - [`component`] — [`component::ComponentManager`], the four-state
//!   lifecycle machine (`Disabled` → `Uninitialized` → `Initialized` →
//!   `Started`) that a set of dependencies gates.
//! - [`manager`] — [`manager::DependencyManager`], the per-bundle container
//!   owning every component manager sharing one registry.
//!
//! ```
//! use std::sync::Arc;
//! use component_manager::manager::DependencyManager;
//!
//! struct Greeter;
//!
//! let dm = DependencyManager::new();
//! let cm = dm.create_component("greeter", Arc::new(Greeter));
//! cm.set_callbacks(
//!     Some(|_: &Arc<Greeter>| println!("init")),
//!     Some(|_: &Arc<Greeter>| println!("start")),
//!     Some(|_: &Arc<Greeter>| println!("stop")),
//!     Some(|_: &Arc<Greeter>| println!("deinit")),
//! );
//! cm.enable().expect("enable succeeds");
//! assert_eq!(cm.state(), component_manager::component::ComponentState::Started);
//! ```

pub mod component;
pub mod config;
pub mod dependency;
pub mod error;
pub mod gate;
pub mod manager;
pub mod registry;
pub mod tracker;

pub use component::{ComponentManager, ComponentManagerHandle, ComponentState};
pub use config::ComponentManagerConfig;
pub use dependency::{Cardinality, LockingStrategy, ServiceDependency, ServiceEvent};
pub use error::{ComponentError, Result};
pub use manager::DependencyManager;
pub use registry::{Filter, LocalRegistry, PropValue, Properties, ServiceRef, ServiceRegistry};
