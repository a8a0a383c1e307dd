//! The per-component-manager locking-strategy gate (spec.md §5).
//!
//! Lifecycle callbacks (`init`/`start`/`stop`/`deinit`) always take the write
//! side. Dependency callbacks take the read side under
//! [`crate::dependency::LockingStrategy::Suspend`] (so several dependency
//! events may run concurrently with each other, but never alongside a
//! lifecycle callback) or the write side under
//! [`crate::dependency::LockingStrategy::Locking`] (fully serialized with
//! lifecycle callbacks and with each other).

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// A reader/writer gate shared between a `ComponentManager` and its
/// `ServiceDependency`s.
#[derive(Default)]
pub struct Gate(RwLock<()>);

impl Gate {
    /// Creates an unlocked gate.
    #[must_use]
    pub fn new() -> Self {
        Gate(RwLock::new(()))
    }

    /// Acquires the write side, used for lifecycle callbacks and for
    /// dependency callbacks under [`crate::dependency::LockingStrategy::Locking`].
    pub fn write(&self) -> RwLockWriteGuard<'_, ()> {
        self.0.write()
    }

    /// Acquires the read side, used for dependency callbacks under
    /// [`crate::dependency::LockingStrategy::Suspend`].
    pub fn read(&self) -> RwLockReadGuard<'_, ()> {
        self.0.read()
    }
}

/// Holds whichever guard a dependency callback needed to acquire, keeping
/// both branches alive for the duration of the callback.
pub enum GateGuard<'a> {
    /// Held by `Suspend`-strategy dependency callbacks.
    Read(RwLockReadGuard<'a, ()>),
    /// Held by lifecycle callbacks and `Locking`-strategy dependency
    /// callbacks.
    Write(RwLockWriteGuard<'a, ()>),
}
