//! Service dependency: a typed binding between a component and a service
//! interface, backed by a [`crate::tracker::ServiceTracker`].

use std::any::Any;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::{ComponentError, Result};
use crate::gate::{Gate, GateGuard};
use crate::registry::{Filter, Properties, ServiceId, ServiceRef, ServiceRegistry};
use crate::tracker::{ServiceTracker, TrackerEvent, TrackerSink};

/// How many matching services a dependency binds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Cardinality {
    /// Binds to at most one service: the highest-ranked match.
    #[default]
    One,
    /// Binds to every matching service.
    Many,
}

/// How dependency callbacks are serialized against lifecycle callbacks, per
/// `Phase3LockingActivator.cc` in the Celix sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockingStrategy {
    /// Dependency callbacks run concurrently with each other but never
    /// alongside a lifecycle callback running on the same component.
    #[default]
    Suspend,
    /// Dependency callbacks are fully serialized with lifecycle callbacks,
    /// the same as Celix's "locking" update strategy.
    Locking,
}

/// A single service observation handed to `add`/`remove`/`set`/`update`
/// callbacks: the richer `(service, properties, owner)` shape from
/// `ComponentManager.h`'s `setFunctionCallbacks` overload.
#[derive(Clone)]
pub struct ServiceEvent {
    /// Identity of the observed service.
    pub id: ServiceId,
    /// `service.ranking` at the time of this event.
    pub ranking: i64,
    /// Properties at the time of this event.
    pub props: Properties,
    instance: Arc<dyn Any + Send + Sync>,
    /// Identity of the bundle that registered the service, when the
    /// registry tracks one. `LocalRegistry` never populates this.
    pub owner: Option<String>,
}

impl ServiceEvent {
    fn from_ref(svc: ServiceRef) -> ServiceEvent {
        ServiceEvent { id: svc.id, ranking: svc.ranking, props: svc.props, instance: svc.instance, owner: None }
    }

    /// Downcasts the type-erased instance to the concrete service interface
    /// `I`. Returns `None` if `I` does not match the instance's concrete
    /// type — callers that registered the dependency for a single type `I`
    /// can treat this as infallible in practice.
    #[must_use]
    pub fn service<I: 'static + Send + Sync>(&self) -> Option<Arc<I>> {
        self.instance.clone().downcast::<I>().ok()
    }
}

#[derive(Default)]
struct Callbacks {
    set: Option<Arc<dyn Fn(Option<&ServiceEvent>) + Send + Sync>>,
    add: Option<Arc<dyn Fn(&ServiceEvent) + Send + Sync>>,
    remove: Option<Arc<dyn Fn(&ServiceEvent) + Send + Sync>>,
    update: Option<Arc<dyn Fn(&[ServiceEvent]) + Send + Sync>>,
}

struct Inner {
    filter: Filter,
    required: bool,
    cardinality: Cardinality,
    strategy: LockingStrategy,
    tracker: Option<Arc<ServiceTracker>>,
    match_count: usize,
    callbacks: Callbacks,
}

/// A dependency on services of a given type, owned by exactly one
/// [`crate::component::ComponentManager`].
pub struct ServiceDependency {
    uuid: Uuid,
    service_type: &'static str,
    registry: Arc<dyn ServiceRegistry>,
    gate: Arc<Gate>,
    state_changed: Box<dyn Fn() + Send + Sync>,
    inner: Mutex<Inner>,
}

impl ServiceDependency {
    /// Creates a new, disabled dependency on `service_type`. `state_changed`
    /// is invoked once after every tracker event has been forwarded to user
    /// callbacks, so the owning component manager can recompute its
    /// resolution state.
    pub(crate) fn new(
        service_type: &'static str,
        registry: Arc<dyn ServiceRegistry>,
        gate: Arc<Gate>,
        default_strategy: LockingStrategy,
        state_changed: Box<dyn Fn() + Send + Sync>,
    ) -> Arc<ServiceDependency> {
        Arc::new(ServiceDependency {
            uuid: Uuid::now_v7(),
            service_type,
            registry,
            gate,
            state_changed,
            inner: Mutex::new(Inner {
                filter: Filter::Always,
                required: false,
                cardinality: Cardinality::default(),
                strategy: default_strategy,
                tracker: None,
                match_count: 0,
                callbacks: Callbacks::default(),
            }),
        })
    }

    /// This dependency's identity.
    #[must_use]
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Whether this dependency currently has an open tracker.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.inner.lock().tracker.is_some()
    }

    /// Per spec.md D2: resolved iff a tracker is open and, given
    /// cardinality and `required`, enough matches exist.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        let inner = self.inner.lock();
        let Some(_tracker) = inner.tracker.as_ref() else { return false };
        match inner.cardinality {
            Cardinality::One => inner.match_count >= 1,
            Cardinality::Many => !inner.required || inner.match_count >= 1,
        }
    }

    /// Whether this dependency blocks its owning component manager's
    /// resolution when unresolved.
    #[must_use]
    pub fn is_required(&self) -> bool {
        self.inner.lock().required
    }

    /// Sets the LDAP-style filter restricting matches.
    ///
    /// # Errors
    ///
    /// Returns [`ComponentError::InvalidState`] if the dependency is
    /// currently enabled.
    pub fn set_filter(self: &Arc<Self>, filter: Filter) -> Result<&Arc<Self>> {
        let mut inner = self.inner.lock();
        Self::require_disabled(&inner)?;
        inner.filter = filter;
        Ok(self)
    }

    /// Sets whether this dependency is required for its owner to resolve.
    ///
    /// # Errors
    ///
    /// Returns [`ComponentError::InvalidState`] if the dependency is
    /// currently enabled.
    pub fn set_required(self: &Arc<Self>, required: bool) -> Result<&Arc<Self>> {
        let mut inner = self.inner.lock();
        Self::require_disabled(&inner)?;
        inner.required = required;
        Ok(self)
    }

    /// Sets the cardinality (`One` or `Many`).
    ///
    /// # Errors
    ///
    /// Returns [`ComponentError::InvalidState`] if the dependency is
    /// currently enabled.
    pub fn set_cardinality(self: &Arc<Self>, cardinality: Cardinality) -> Result<&Arc<Self>> {
        let mut inner = self.inner.lock();
        Self::require_disabled(&inner)?;
        inner.cardinality = cardinality;
        Ok(self)
    }

    /// Sets the locking strategy used when forwarding dependency callbacks.
    ///
    /// # Errors
    ///
    /// Returns [`ComponentError::InvalidState`] if the dependency is
    /// currently enabled.
    pub fn set_strategy(self: &Arc<Self>, strategy: LockingStrategy) -> Result<&Arc<Self>> {
        let mut inner = self.inner.lock();
        Self::require_disabled(&inner)?;
        inner.strategy = strategy;
        Ok(self)
    }

    fn require_disabled(inner: &Inner) -> Result<()> {
        if inner.tracker.is_some() {
            return Err(ComponentError::InvalidState {
                reason: "service dependency cannot be reconfigured while enabled".to_owned(),
            });
        }
        Ok(())
    }

    /// Registers the callback invoked when the highest-ranked match changes
    /// (cardinality `One` only).
    ///
    /// # Errors
    ///
    /// Returns [`ComponentError::InvalidState`] if the dependency is
    /// currently enabled.
    pub fn set_callback(self: &Arc<Self>, callback: impl Fn(Option<&ServiceEvent>) + Send + Sync + 'static) -> Result<Arc<Self>> {
        let mut inner = self.inner.lock();
        Self::require_disabled(&inner)?;
        inner.callbacks.set = Some(Arc::new(callback));
        drop(inner);
        Ok(self.clone())
    }

    /// Registers the callback invoked for every newly-matched service.
    ///
    /// # Errors
    ///
    /// Returns [`ComponentError::InvalidState`] if the dependency is
    /// currently enabled.
    pub fn on_add(self: &Arc<Self>, callback: impl Fn(&ServiceEvent) + Send + Sync + 'static) -> Result<Arc<Self>> {
        let mut inner = self.inner.lock();
        Self::require_disabled(&inner)?;
        inner.callbacks.add = Some(Arc::new(callback));
        drop(inner);
        Ok(self.clone())
    }

    /// Registers the callback invoked for every service that stops matching.
    ///
    /// # Errors
    ///
    /// Returns [`ComponentError::InvalidState`] if the dependency is
    /// currently enabled.
    pub fn on_remove(self: &Arc<Self>, callback: impl Fn(&ServiceEvent) + Send + Sync + 'static) -> Result<Arc<Self>> {
        let mut inner = self.inner.lock();
        Self::require_disabled(&inner)?;
        inner.callbacks.remove = Some(Arc::new(callback));
        drop(inner);
        Ok(self.clone())
    }

    /// Registers the callback invoked with the full ranked sequence after
    /// every tracker event.
    ///
    /// # Errors
    ///
    /// Returns [`ComponentError::InvalidState`] if the dependency is
    /// currently enabled.
    pub fn on_update(self: &Arc<Self>, callback: impl Fn(&[ServiceEvent]) + Send + Sync + 'static) -> Result<Arc<Self>> {
        let mut inner = self.inner.lock();
        Self::require_disabled(&inner)?;
        inner.callbacks.update = Some(Arc::new(callback));
        drop(inner);
        Ok(self.clone())
    }

    /// Opens the underlying tracker. Idempotent: a no-op if already enabled.
    ///
    /// # Errors
    ///
    /// Returns [`ComponentError::RegistryUnavailable`] if the registry
    /// rejects the subscription; the dependency remains disabled.
    pub fn enable(self: &Arc<Self>) -> Result<()> {
        let filter;
        let cardinality;
        {
            let mut inner = self.inner.lock();
            if inner.tracker.is_some() {
                return Ok(());
            }
            inner.match_count = 0;
            filter = inner.filter.clone();
            cardinality = inner.cardinality;
        }
        let sink: Arc<dyn TrackerSink> = Arc::new(DepSink { dep: Arc::downgrade(self) });
        let tracker = ServiceTracker::open(&self.registry, self.service_type, filter, cardinality, sink)?;
        self.inner.lock().tracker = Some(Arc::new(tracker));
        Ok(())
    }

    /// Closes the underlying tracker. Idempotent: a no-op if already
    /// disabled.
    pub fn disable(&self) {
        let tracker = self.inner.lock().tracker.take();
        drop(tracker);
    }

    fn handle_tracker_event(&self, event: TrackerEvent) {
        let (strategy, set_cb, add_cb, remove_cb, update_cb) = {
            let mut inner = self.inner.lock();
            inner.match_count = event.ranked.len();
            (
                inner.strategy,
                inner.callbacks.set.clone(),
                inner.callbacks.add.clone(),
                inner.callbacks.remove.clone(),
                inner.callbacks.update.clone(),
            )
        };

        let _gate_guard = match strategy {
            LockingStrategy::Suspend => GateGuard::Read(self.gate.read()),
            LockingStrategy::Locking => GateGuard::Write(self.gate.write()),
        };

        for svc in event.removed {
            if let Some(cb) = &remove_cb {
                cb(&ServiceEvent::from_ref(svc));
            }
        }
        for svc in event.added {
            if let Some(cb) = &add_cb {
                cb(&ServiceEvent::from_ref(svc));
            }
        }
        if event.set_changed {
            if let Some(cb) = &set_cb {
                let view = event.set_value.map(ServiceEvent::from_ref);
                cb(view.as_ref());
            }
        }
        if let Some(cb) = &update_cb {
            let views: Vec<ServiceEvent> = event.ranked.into_iter().map(ServiceEvent::from_ref).collect();
            cb(&views);
        }

        drop(_gate_guard);
        (self.state_changed)();
    }
}

struct DepSink {
    dep: Weak<ServiceDependency>,
}

impl TrackerSink for DepSink {
    fn on_tracker_event(&self, event: TrackerEvent) {
        if let Some(dep) = self.dep.upgrade() {
            dep.handle_tracker_event(event);
        }
    }
}
