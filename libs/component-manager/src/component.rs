//! Component manager: owns a user instance, its lifecycle callbacks, and its
//! declared service dependencies, and drives the four-state lifecycle
//! machine described in spec §4.3.

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex};
use uuid::Uuid;

use crate::dependency::{LockingStrategy, ServiceDependency};
use crate::error::{ComponentError, Result};
use crate::gate::Gate;
use crate::registry::ServiceRegistry;

/// The four lifecycle states a component manager moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentState {
    /// Not enabled. The resting state before the first `enable()` and after
    /// a full `disable()`.
    Disabled,
    /// Enabled, but not yet resolved enough to run `init`.
    Uninitialized,
    /// `init` has run (and `deinit` has not since); not yet `Started`.
    Initialized,
    /// `init` and `start` have both run; all required dependencies resolved.
    Started,
}

impl fmt::Display for ComponentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ComponentState::Disabled => "Disabled",
            ComponentState::Uninitialized => "Uninitialized",
            ComponentState::Initialized => "Initialized",
            ComponentState::Started => "Started",
        };
        write!(f, "{label}")
    }
}

/// Target state derived purely from the enabled flag and required-dependency
/// resolution (spec §4.3's `T`, restricted to its reachable range — see
/// `DESIGN.md` for why `Initialized` is never a computed target here).
fn target_state(enabled: bool, all_required_resolved: bool) -> ComponentState {
    if !enabled {
        ComponentState::Disabled
    } else if all_required_resolved {
        ComponentState::Started
    } else {
        ComponentState::Uninitialized
    }
}

#[derive(Debug, Clone, Copy)]
enum CallbackKind {
    Init,
    Start,
    Stop,
    Deinit,
}

impl CallbackKind {
    fn label(self) -> &'static str {
        match self {
            CallbackKind::Init => "init",
            CallbackKind::Start => "start",
            CallbackKind::Stop => "stop",
            CallbackKind::Deinit => "deinit",
        }
    }
}

struct Callbacks<T> {
    init: Option<Arc<dyn Fn(&Arc<T>) + Send + Sync>>,
    start: Option<Arc<dyn Fn(&Arc<T>) + Send + Sync>>,
    stop: Option<Arc<dyn Fn(&Arc<T>) + Send + Sync>>,
    deinit: Option<Arc<dyn Fn(&Arc<T>) + Send + Sync>>,
}

impl<T> Default for Callbacks<T> {
    fn default() -> Self {
        Callbacks { init: None, start: None, stop: None, deinit: None }
    }
}

struct StateInner {
    state: ComponentState,
    enabled: bool,
    initialized: bool,
    /// Set by any producer that just changed something the target state
    /// depends on; cleared by the drain holder once it has recomputed the
    /// target against that change.
    dirty: bool,
    /// Whether some thread currently holds the right to run transitions for
    /// this CM. Only one thread may run transitions at a time; `dirty` and
    /// `draining` are read and written together under `state`'s own lock so
    /// a producer that loses the race to become the holder is guaranteed the
    /// current holder will observe its write before relinquishing — see
    /// `update_state`/`drain_loop`.
    draining: bool,
}

struct Inner<T> {
    uuid: Uuid,
    name: String,
    registry: Arc<dyn ServiceRegistry>,
    default_strategy: LockingStrategy,
    instance: Arc<T>,
    gate: Arc<Gate>,
    callbacks: Mutex<Callbacks<T>>,
    deps: Mutex<HashMap<Uuid, Arc<ServiceDependency>>>,
    state: Mutex<StateInner>,
    drain_done: Condvar,
    callback_thread: Mutex<Option<ThreadId>>,
}

/// The state machine owning one component instance. Cheap to clone (an
/// `Arc` handle); every clone refers to the same underlying component.
pub struct ComponentManager<T: Send + Sync + 'static> {
    inner: Arc<Inner<T>>,
}

impl<T: Send + Sync + 'static> Clone for ComponentManager<T> {
    fn clone(&self) -> Self {
        ComponentManager { inner: self.inner.clone() }
    }
}

impl<T: Send + Sync + 'static> ComponentManager<T> {
    pub(crate) fn new(name: impl Into<String>, instance: Arc<T>, registry: Arc<dyn ServiceRegistry>, default_strategy: LockingStrategy) -> Self {
        ComponentManager {
            inner: Arc::new(Inner {
                uuid: Uuid::now_v7(),
                name: name.into(),
                registry,
                default_strategy,
                instance,
                gate: Arc::new(Gate::new()),
                callbacks: Mutex::new(Callbacks::default()),
                deps: Mutex::new(HashMap::new()),
                state: Mutex::new(StateInner {
                    state: ComponentState::Disabled,
                    enabled: false,
                    initialized: false,
                    dirty: false,
                    draining: false,
                }),
                drain_done: Condvar::new(),
                callback_thread: Mutex::new(None),
            }),
        }
    }

    /// This component's identity.
    #[must_use]
    pub fn uuid(&self) -> Uuid {
        self.inner.uuid
    }

    /// This component's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// A snapshot of the currently published lifecycle state.
    #[must_use]
    pub fn state(&self) -> ComponentState {
        self.inner.state.lock().state
    }

    /// Whether `enable()` has been called without a matching `disable()`.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.inner.state.lock().enabled
    }

    /// Whether every required dependency is currently resolved.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.all_required_resolved()
    }

    /// The shared user instance this component manager owns.
    #[must_use]
    pub fn instance(&self) -> &Arc<T> {
        &self.inner.instance
    }

    /// Registers lifecycle callbacks. Each is optional; omitted callbacks are
    /// treated as a no-op for that transition.
    pub fn set_callbacks(
        &self,
        init: Option<impl Fn(&Arc<T>) + Send + Sync + 'static>,
        start: Option<impl Fn(&Arc<T>) + Send + Sync + 'static>,
        stop: Option<impl Fn(&Arc<T>) + Send + Sync + 'static>,
        deinit: Option<impl Fn(&Arc<T>) + Send + Sync + 'static>,
    ) -> &Self {
        let mut callbacks = self.inner.callbacks.lock();
        callbacks.init = init.map(|f| Arc::new(f) as Arc<dyn Fn(&Arc<T>) + Send + Sync>);
        callbacks.start = start.map(|f| Arc::new(f) as Arc<dyn Fn(&Arc<T>) + Send + Sync>);
        callbacks.stop = stop.map(|f| Arc::new(f) as Arc<dyn Fn(&Arc<T>) + Send + Sync>);
        callbacks.deinit = deinit.map(|f| Arc::new(f) as Arc<dyn Fn(&Arc<T>) + Send + Sync>);
        self
    }

    /// Adds a new service dependency on `service_type`, returning its handle.
    /// If this component manager is currently enabled, the dependency is
    /// enabled immediately (its tracker opens right away).
    pub fn add_service_dependency(&self, service_type: &'static str) -> Arc<ServiceDependency> {
        let gate = self.inner.gate.clone();
        let inner = self.inner.clone();
        let dep = ServiceDependency::new(
            service_type,
            self.inner.registry.clone(),
            gate,
            self.inner.default_strategy,
            Box::new(move || Self::notify_state_changed(&inner)),
        );
        self.inner.deps.lock().insert(dep.uuid(), dep.clone());
        if self.is_enabled() {
            if let Err(err) = dep.enable() {
                tracing::warn!(name = %self.inner.name, uuid = %dep.uuid(), error = %err, "dependency failed to enable");
            }
        }
        self.update_state(false);
        dep
    }

    fn notify_state_changed(inner: &Arc<Inner<T>>) {
        let cm = ComponentManager { inner: inner.clone() };
        cm.update_state(false);
    }

    /// Looks up a dependency by uuid.
    #[must_use]
    pub fn find_service_dependency(&self, uuid: Uuid) -> Option<Arc<ServiceDependency>> {
        self.inner.deps.lock().get(&uuid).cloned()
    }

    /// Removes a dependency entirely. If the component manager is currently
    /// `Started` or `Initialized`, this forces a full teardown to
    /// `Uninitialized` before the state machine re-evaluates against the
    /// remaining dependencies (spec boundary behavior B2).
    ///
    /// # Errors
    ///
    /// Returns [`ComponentError::InvalidState`] if `uuid` is not a known
    /// dependency, or [`ComponentError::Reentrant`] if called from within a
    /// callback of this same component manager.
    pub fn remove_service_dependency(&self, uuid: Uuid) -> Result<()> {
        self.reject_if_reentrant()?;
        let dep = {
            let mut deps = self.inner.deps.lock();
            deps.remove(&uuid).ok_or_else(|| ComponentError::InvalidState {
                reason: format!("no such service dependency: {uuid}"),
            })?
        };
        dep.disable();
        self.force_recycle();
        self.update_state(true);
        Ok(())
    }

    /// Enables the component manager and all its dependencies, then drives
    /// the lifecycle as far toward `Started` as current resolution allows.
    /// Idempotent when already fully settled at the target state (no extra
    /// callbacks fire — spec R1); when called again after a stalled
    /// transition (spec B3, e.g. a panicking `start`), this retries it.
    ///
    /// # Errors
    ///
    /// Never returns `Err` today: unlike `disable`, `enable` is not rejected
    /// when called reentrantly from within a callback of this same component
    /// manager (only `disable`/`remove_service_dependency` are, per spec), and
    /// a dependency that fails to enable is logged and skipped rather than
    /// propagated. Returns `Result` for symmetry with the other lifecycle
    /// operations and to leave room for a future fallible precondition.
    pub fn enable(&self) -> Result<()> {
        let was_enabled = {
            let mut state = self.inner.state.lock();
            let was_enabled = state.enabled;
            state.enabled = true;
            was_enabled
        };
        if !was_enabled {
            let deps: Vec<Arc<ServiceDependency>> = self.inner.deps.lock().values().cloned().collect();
            for dep in deps {
                if let Err(err) = dep.enable() {
                    tracing::warn!(name = %self.inner.name, uuid = %dep.uuid(), error = %err, "dependency failed to enable");
                }
            }
        }
        self.update_state(true);
        Ok(())
    }

    /// Disables the component manager: synchronously drives the lifecycle
    /// back down to `Disabled` and closes every dependency's tracker.
    ///
    /// # Errors
    ///
    /// Returns [`ComponentError::Reentrant`] if called from within a
    /// callback of this same component manager — such a call cannot be
    /// satisfied without risking deadlock or reordered callbacks, so it is
    /// rejected instead.
    pub fn disable(&self) -> Result<()> {
        self.reject_if_reentrant()?;
        let was_enabled = {
            let mut state = self.inner.state.lock();
            let was_enabled = state.enabled;
            state.enabled = false;
            was_enabled
        };
        if was_enabled {
            let deps: Vec<Arc<ServiceDependency>> = self.inner.deps.lock().values().cloned().collect();
            for dep in &deps {
                dep.disable();
            }
        }
        self.update_state(true);
        Ok(())
    }

    fn reject_if_reentrant(&self) -> Result<()> {
        if *self.inner.callback_thread.lock() == Some(thread::current().id()) {
            return Err(ComponentError::Reentrant { name: self.inner.name.clone(), uuid: self.inner.uuid });
        }
        Ok(())
    }

    fn all_required_resolved(&self) -> bool {
        let deps = self.inner.deps.lock();
        deps.values().filter(|d| d.is_required()).all(|d| d.is_resolved())
    }

    /// Marks the target state as possibly-changed and either drains it
    /// itself (becoming the sole holder of `draining`) or, finding another
    /// thread already holding it, trusts that holder to observe the `dirty`
    /// flag this call just set before it relinquishes. The check-and-set of
    /// `dirty`/`draining` is one critical section, and so is the holder's
    /// matching check-and-clear in `drain_loop`, so the two can never
    /// "cross" without one observing the other's write — see `drain_loop`.
    ///
    /// When `blocking`, the caller needs the fully-settled result before
    /// returning (`enable`/`disable`): if this call did not become the
    /// holder, it waits for whoever did to relinquish.
    fn update_state(&self, blocking: bool) {
        let became_holder = {
            let mut state = self.inner.state.lock();
            state.dirty = true;
            if state.draining {
                false
            } else {
                state.draining = true;
                true
            }
        };
        if became_holder {
            self.drain_loop();
        } else if blocking {
            self.wait_for_idle();
        }
    }

    /// Blocks until no thread holds the drain/recycle right for this CM.
    fn wait_for_idle(&self) {
        let mut state = self.inner.state.lock();
        while state.draining {
            self.inner.drain_done.wait(&mut state);
        }
    }

    /// Blocks until this thread itself holds the drain/recycle right,
    /// waiting out any in-progress holder first.
    fn become_holder_blocking(&self) {
        let mut state = self.inner.state.lock();
        while state.draining {
            self.inner.drain_done.wait(&mut state);
        }
        state.draining = true;
    }

    /// Forces the published state down to `Uninitialized` right now,
    /// regardless of the computed target, then relinquishes the holder
    /// right so a subsequent `update_state` can recompute against the new
    /// dependency set. Used only by `remove_service_dependency` (B2): the
    /// dependency set just changed structurally, so any cached references
    /// the instance holds must be torn down before the state machine
    /// reconsiders the new set.
    fn force_recycle(&self) {
        self.become_holder_blocking();
        loop {
            let current = self.inner.state.lock().state;
            match current {
                ComponentState::Uninitialized | ComponentState::Disabled => break,
                ComponentState::Started => self.run_transition(ComponentState::Started, ComponentState::Uninitialized),
                ComponentState::Initialized => self.run_transition(ComponentState::Initialized, ComponentState::Uninitialized),
            }
        }
        let mut state = self.inner.state.lock();
        state.draining = false;
        self.inner.drain_done.notify_all();
    }

    /// Consumes exactly one `dirty` pulse per loop iteration: recomputes the
    /// target and, if it disagrees with the published state, attempts a
    /// single transition toward it (which may only get partway, e.g. a
    /// panicking `start` leaves the CM at `Initialized` rather than
    /// `Started` — spec B3). It does **not** keep retrying a stalled
    /// transition on its own; that only happens when a fresh `dirty` pulse
    /// arrives (another dependency event, or the caller re-invoking
    /// `enable`/`disable`). Once a full iteration finds nothing newly dirty,
    /// the holder right is relinquished in that same critical section, so a
    /// producer that saw `draining == true` is guaranteed this loop observes
    /// its write first.
    fn drain_loop(&self) {
        loop {
            let all_resolved = self.all_required_resolved();
            let (current, target) = {
                let mut state = self.inner.state.lock();
                state.dirty = false;
                let target = target_state(state.enabled, all_resolved);
                (state.state, target)
            };
            if current != target {
                self.run_transition(current, target);
            }
            let mut state = self.inner.state.lock();
            if state.dirty {
                continue;
            }
            state.draining = false;
            self.inner.drain_done.notify_all();
            return;
        }
    }

    fn run_transition(&self, from: ComponentState, to: ComponentState) {
        use ComponentState::{Disabled, Initialized, Started, Uninitialized};
        match (from, to) {
            (Disabled, Uninitialized) => self.publish(Uninitialized),
            (Uninitialized, Disabled) => self.publish(Disabled),
            (Disabled, Started) | (Uninitialized, Started) => {
                if self.call(CallbackKind::Init) {
                    self.set_initialized(true);
                    self.publish(Initialized);
                    if self.call(CallbackKind::Start) {
                        self.publish(Started);
                    }
                }
            }
            (Initialized, Uninitialized) => {
                if self.call(CallbackKind::Deinit) {
                    self.set_initialized(false);
                    self.publish(Uninitialized);
                }
            }
            (Initialized, Disabled) => {
                if self.call(CallbackKind::Deinit) {
                    self.set_initialized(false);
                    self.publish(Uninitialized);
                    self.publish(Disabled);
                }
            }
            (Initialized, Started) => {
                if self.call(CallbackKind::Start) {
                    self.publish(Started);
                }
            }
            (Started, Initialized) => {
                if self.call(CallbackKind::Stop) {
                    self.publish(Initialized);
                }
            }
            (Started, Uninitialized) => {
                if self.call(CallbackKind::Stop) {
                    self.publish(Initialized);
                    if self.call(CallbackKind::Deinit) {
                        self.set_initialized(false);
                        self.publish(Uninitialized);
                    }
                }
            }
            (Started, Disabled) => {
                if self.call(CallbackKind::Stop) {
                    self.publish(Initialized);
                    if self.call(CallbackKind::Deinit) {
                        self.set_initialized(false);
                        self.publish(Uninitialized);
                        self.publish(Disabled);
                    }
                }
            }
            _ => {
                tracing::debug!(name = %self.inner.name, uuid = %self.inner.uuid, %from, %to, "no-op transition");
            }
        }
    }

    fn publish(&self, state: ComponentState) {
        self.inner.state.lock().state = state;
        tracing::info!(name = %self.inner.name, uuid = %self.inner.uuid, %state, "component state changed");
    }

    fn set_initialized(&self, value: bool) {
        self.inner.state.lock().initialized = value;
    }

    /// Invokes one lifecycle callback, holding the gate's write side (so it
    /// never overlaps a dependency callback under a `Locking` strategy, nor
    /// another lifecycle callback), catching any panic at this boundary.
    /// Returns `false` (and leaves the CM at its pre-callback published
    /// state) if the callback panicked.
    fn call(&self, kind: CallbackKind) -> bool {
        let callback = {
            let callbacks = self.inner.callbacks.lock();
            match kind {
                CallbackKind::Init => callbacks.init.clone(),
                CallbackKind::Start => callbacks.start.clone(),
                CallbackKind::Stop => callbacks.stop.clone(),
                CallbackKind::Deinit => callbacks.deinit.clone(),
            }
        };
        let Some(callback) = callback else { return true };

        *self.inner.callback_thread.lock() = Some(thread::current().id());
        let _gate = self.inner.gate.write();
        let instance = self.inner.instance.clone();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| callback(&instance)));
        drop(_gate);
        *self.inner.callback_thread.lock() = None;

        match outcome {
            Ok(()) => true,
            Err(_payload) => {
                tracing::warn!(
                    name = %self.inner.name,
                    uuid = %self.inner.uuid,
                    callback = kind.label(),
                    "user callback panicked; transition abandoned at pre-callback state"
                );
                false
            }
        }
    }
}

/// Object-safe view of a `ComponentManager<T>` for heterogeneous storage in
/// a [`crate::manager::DependencyManager`].
pub trait ComponentManagerHandle: Send + Sync {
    /// This component's identity.
    fn uuid(&self) -> Uuid;
    /// This component's name.
    fn name(&self) -> &str;
    /// A snapshot of the currently published lifecycle state.
    fn state(&self) -> ComponentState;
    /// Whether `enable()` has been called without a matching `disable()`.
    fn is_enabled(&self) -> bool;
    /// Whether every required dependency is currently resolved.
    fn is_resolved(&self) -> bool;
    /// Disables the component manager.
    ///
    /// # Errors
    ///
    /// Returns [`ComponentError::Reentrant`] under the same conditions as
    /// [`ComponentManager::disable`].
    fn disable(&self) -> Result<()>;
}

impl<T: Send + Sync + 'static> ComponentManagerHandle for ComponentManager<T> {
    fn uuid(&self) -> Uuid {
        ComponentManager::uuid(self)
    }
    fn name(&self) -> &str {
        ComponentManager::name(self)
    }
    fn state(&self) -> ComponentState {
        ComponentManager::state(self)
    }
    fn is_enabled(&self) -> bool {
        ComponentManager::is_enabled(self)
    }
    fn is_resolved(&self) -> bool {
        ComponentManager::is_resolved(self)
    }
    fn disable(&self) -> Result<()> {
        ComponentManager::disable(self)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::registry::LocalRegistry;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counters {
        init: AtomicUsize,
        start: AtomicUsize,
        stop: AtomicUsize,
        deinit: AtomicUsize,
    }

    impl Counters {
        fn new() -> Arc<Self> {
            Arc::new(Counters {
                init: AtomicUsize::new(0),
                start: AtomicUsize::new(0),
                stop: AtomicUsize::new(0),
                deinit: AtomicUsize::new(0),
            })
        }
    }

    fn wire_counting_callbacks(cm: &ComponentManager<Counters>) {
        cm.set_callbacks(
            Some(|c: &Arc<Counters>| {
                c.init.fetch_add(1, Ordering::SeqCst);
            }),
            Some(|c: &Arc<Counters>| {
                c.start.fetch_add(1, Ordering::SeqCst);
            }),
            Some(|c: &Arc<Counters>| {
                c.stop.fetch_add(1, Ordering::SeqCst);
            }),
            Some(|c: &Arc<Counters>| {
                c.deinit.fetch_add(1, Ordering::SeqCst);
            }),
        );
    }

    #[test]
    #[tracing_test::traced_test]
    fn s1_simple_lifecycle_no_deps() {
        let registry: Arc<dyn ServiceRegistry> = Arc::new(LocalRegistry::new());
        let instance = Counters::new();
        let cm = ComponentManager::new("A", instance.clone(), registry, LockingStrategy::default());
        wire_counting_callbacks(&cm);

        cm.enable().expect("enable succeeds");
        assert_eq!(cm.state(), ComponentState::Started);
        assert!(logs_contain("component state changed"));
        cm.disable().expect("disable succeeds");

        assert_eq!(instance.init.load(Ordering::SeqCst), 1);
        assert_eq!(instance.start.load(Ordering::SeqCst), 1);
        assert_eq!(instance.stop.load(Ordering::SeqCst), 1);
        assert_eq!(instance.deinit.load(Ordering::SeqCst), 1);
        assert_eq!(cm.state(), ComponentState::Disabled);
    }

    #[test]
    fn s2_required_dep_arrives_late() {
        let local = LocalRegistry::new();
        let registry: Arc<dyn ServiceRegistry> = Arc::new(local.clone());
        let instance = Counters::new();
        let cm = ComponentManager::new("B", instance.clone(), registry, LockingStrategy::default());
        wire_counting_callbacks(&cm);

        let dep = cm.add_service_dependency("I");
        dep.set_required(true).expect("disabled");

        cm.enable().expect("enable succeeds");
        assert_eq!(cm.state(), ComponentState::Uninitialized);
        assert_eq!(instance.init.load(Ordering::SeqCst), 0);

        let mut props = crate::registry::Properties::new();
        props.insert(crate::registry::SERVICE_RANKING.to_owned(), 0.into());
        local.register("I", Arc::new(42_i32), props);

        assert_eq!(instance.init.load(Ordering::SeqCst), 1);
        assert_eq!(instance.start.load(Ordering::SeqCst), 1);
        assert_eq!(cm.state(), ComponentState::Started);
    }

    #[test]
    fn s4_losing_required_dep_while_started() {
        let local = LocalRegistry::new();
        let registry: Arc<dyn ServiceRegistry> = Arc::new(local.clone());
        let instance = Counters::new();
        let cm = ComponentManager::new("D", instance.clone(), registry, LockingStrategy::default());
        wire_counting_callbacks(&cm);

        let dep = cm.add_service_dependency("I");
        dep.set_required(true).expect("disabled");
        let id = local.register("I", Arc::new(1_i32), crate::registry::Properties::new());
        cm.enable().expect("enable succeeds");
        assert_eq!(cm.state(), ComponentState::Started);

        local.unregister(id, "I");

        assert_eq!(cm.state(), ComponentState::Uninitialized);
        assert!(cm.is_enabled());
        assert_eq!(instance.stop.load(Ordering::SeqCst), 1);
        assert_eq!(instance.deinit.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn s5_panic_in_start_then_retries() {
        let registry: Arc<dyn ServiceRegistry> = Arc::new(LocalRegistry::new());
        let instance = Counters::new();
        let cm = ComponentManager::new("E", instance.clone(), registry, LockingStrategy::default());
        let attempt = Arc::new(AtomicUsize::new(0));
        let attempt2 = attempt.clone();
        cm.set_callbacks(
            Some(|_: &Arc<Counters>| {}),
            Some(move |_: &Arc<Counters>| {
                if attempt2.fetch_add(1, Ordering::SeqCst) == 0 {
                    panic!("boom");
                }
            }),
            Some(|_: &Arc<Counters>| {}),
            Some(|_: &Arc<Counters>| {}),
        );

        // Catch the panic unwind boundary at the test level too, since
        // parking_lot guards are not poisoned by panics elsewhere but a test
        // harness thread panic would otherwise abort the test binary in
        // some configurations.
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| cm.enable()));
        assert!(result.is_ok());
        assert_eq!(cm.state(), ComponentState::Initialized);

        cm.enable().expect("idempotent re-enable retries the transition");
        assert_eq!(cm.state(), ComponentState::Started);
    }

    #[test]
    fn s6_reentrant_disable_is_rejected() {
        let registry: Arc<dyn ServiceRegistry> = Arc::new(LocalRegistry::new());
        let instance = Counters::new();
        let cm = ComponentManager::new("F", instance.clone(), registry, LockingStrategy::default());
        let cm_for_callback = cm.clone();
        cm.set_callbacks(
            Some(|_: &Arc<Counters>| {}),
            Some(move |_: &Arc<Counters>| {
                let result = cm_for_callback.disable();
                assert!(matches!(result, Err(ComponentError::Reentrant { .. })));
            }),
            Some(|_: &Arc<Counters>| {}),
            Some(|_: &Arc<Counters>| {}),
        );

        cm.enable().expect("enable succeeds");
        assert_eq!(cm.state(), ComponentState::Started);
    }

    #[test]
    fn r1_enable_is_idempotent() {
        let registry: Arc<dyn ServiceRegistry> = Arc::new(LocalRegistry::new());
        let instance = Counters::new();
        let cm = ComponentManager::new("G", instance.clone(), registry, LockingStrategy::default());
        wire_counting_callbacks(&cm);

        cm.enable().expect("enable succeeds");
        cm.enable().expect("enable is idempotent");
        assert_eq!(instance.init.load(Ordering::SeqCst), 1);
        assert_eq!(instance.start.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn b2_removing_last_required_dep_recycles_through_uninitialized() {
        let local = LocalRegistry::new();
        let registry: Arc<dyn ServiceRegistry> = Arc::new(local.clone());
        let instance = Counters::new();
        let cm = ComponentManager::new("H", instance.clone(), registry, LockingStrategy::default());
        wire_counting_callbacks(&cm);

        let always_resolved = cm.add_service_dependency("Always");
        always_resolved.set_required(true).expect("disabled");
        local.register("Always", Arc::new(1_i32), crate::registry::Properties::new());

        let removable = cm.add_service_dependency("I");
        removable.set_required(true).expect("disabled");
        local.register("I", Arc::new(2_i32), crate::registry::Properties::new());

        cm.enable().expect("enable succeeds");
        assert_eq!(cm.state(), ComponentState::Started);

        cm.remove_service_dependency(removable.uuid()).expect("remove succeeds");

        assert_eq!(cm.state(), ComponentState::Started);
        assert_eq!(instance.stop.load(Ordering::SeqCst), 1);
        assert_eq!(instance.deinit.load(Ordering::SeqCst), 1);
        assert_eq!(instance.init.load(Ordering::SeqCst), 2);
        assert_eq!(instance.start.load(Ordering::SeqCst), 2);
    }
}
