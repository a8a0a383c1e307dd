//! Service tracker: turns registry events for a single `(service_type,
//! filter)` pair into a ranked, deduplicated view, and forwards changes to a
//! [`TrackerSink`] in the fixed order remove → add → set → update.

use std::cmp::Reverse;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use crate::dependency::Cardinality;
use crate::error::Result;
use crate::registry::{Filter, RegistryListener, ServiceId, ServiceRef, ServiceRegistry, Subscription};

/// One combined registry-event outcome, ready to forward to user callbacks in
/// order: `removed`, then `added`, then (cardinality `One` only) the `set`
/// change, then `ranked` (the full post-event sequence).
pub struct TrackerEvent {
    /// Services that left the matching set in this event.
    pub removed: Vec<ServiceRef>,
    /// Services that joined the matching set in this event.
    pub added: Vec<ServiceRef>,
    /// Whether the highest-ranked identity changed as a result of this event.
    /// Only ever `true` for cardinality `One` trackers.
    pub set_changed: bool,
    /// The new highest-ranked service, or `None` if the matching set is now
    /// empty. Meaningful only when `set_changed` is `true`.
    pub set_value: Option<ServiceRef>,
    /// The full ranked sequence after this event, highest-ranked first.
    pub ranked: Vec<ServiceRef>,
}

/// Receives forwarded tracker events. Implemented by
/// [`crate::dependency::ServiceDependency`]; kept as a trait so the tracker
/// itself stays independent of dependency-level bookkeeping (resolution
/// state, user callbacks, locking strategy).
pub trait TrackerSink: Send + Sync {
    /// Called once per registry event this tracker reacts to, after the
    /// ranked sequence has been recomputed.
    fn on_tracker_event(&self, event: TrackerEvent);
}

fn rank_key(svc: &ServiceRef) -> (Reverse<i64>, ServiceId) {
    (Reverse(svc.ranking), svc.id)
}

fn rank(mut services: Vec<ServiceRef>) -> Vec<ServiceRef> {
    services.sort_by_key(rank_key);
    services
}

fn highest(ranked: &[ServiceRef]) -> Option<ServiceId> {
    ranked.first().map(|s| s.id)
}

struct TrackerState {
    matching: Mutex<Vec<ServiceRef>>,
    ranked: ArcSwap<Vec<ServiceRef>>,
    dispatch: Mutex<()>,
    sink: Arc<dyn TrackerSink>,
    cardinality: Cardinality,
}

impl TrackerState {
    fn recompute_and_dispatch<F>(&self, mutate: F)
    where
        F: FnOnce(&mut Vec<ServiceRef>) -> (Vec<ServiceRef>, Vec<ServiceRef>),
    {
        // Serializes delivery: all four callback kinds for one registry
        // event are emitted sequentially from a single thread.
        let _guard = self.dispatch.lock();
        let (removed, added) = {
            let mut matching = self.matching.lock();
            mutate(&mut matching)
        };
        let old_ranked = self.ranked.load();
        let old_top = highest(&old_ranked);

        let new_ranked = rank(self.matching.lock().clone());
        let new_top = highest(&new_ranked);

        let set_changed = matches!(self.cardinality, Cardinality::One) && old_top != new_top;
        let set_value = if set_changed { new_ranked.first().cloned() } else { None };

        self.ranked.store(Arc::new(new_ranked.clone()));

        self.sink.on_tracker_event(TrackerEvent {
            removed,
            added,
            set_changed,
            set_value,
            ranked: new_ranked,
        });
    }
}

struct TrackerListener {
    state: Arc<TrackerState>,
}

impl RegistryListener for TrackerListener {
    fn registered(&self, svc: ServiceRef) {
        self.state.recompute_and_dispatch(|matching| {
            matching.retain(|s| s.id != svc.id);
            matching.push(svc.clone());
            (Vec::new(), vec![svc])
        });
    }

    fn modified(&self, svc: ServiceRef) {
        self.state.recompute_and_dispatch(|matching| {
            if let Some(existing) = matching.iter_mut().find(|s| s.id == svc.id) {
                *existing = svc;
            }
            (Vec::new(), Vec::new())
        });
    }

    fn unregistering(&self, id: ServiceId) {
        self.state.recompute_and_dispatch(|matching| {
            let removed: Vec<ServiceRef> = matching.iter().filter(|s| s.id == id).cloned().collect();
            matching.retain(|s| s.id != id);
            (removed, Vec::new())
        });
    }
}

/// Tracks every service of a given type matching a filter, maintaining a
/// ranked (descending `service.ranking`, ascending `service.id`) view and
/// forwarding changes to a [`TrackerSink`].
pub struct ServiceTracker {
    state: Arc<TrackerState>,
    subscription: Box<dyn Subscription>,
}

impl ServiceTracker {
    /// Opens a tracker: subscribes to the registry immediately, delivering
    /// the initial batch of already-registered matches before returning.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::ComponentError::RegistryUnavailable`] if the
    /// registry rejects the subscription.
    pub fn open(
        registry: &Arc<dyn ServiceRegistry>,
        service_type: &'static str,
        filter: Filter,
        cardinality: Cardinality,
        sink: Arc<dyn TrackerSink>,
    ) -> Result<ServiceTracker> {
        let state = Arc::new(TrackerState {
            matching: Mutex::new(Vec::new()),
            ranked: ArcSwap::from_pointee(Vec::new()),
            dispatch: Mutex::new(()),
            sink,
            cardinality,
        });
        let listener = Arc::new(TrackerListener { state: state.clone() });
        let subscription = registry.subscribe(service_type, filter, listener)?;
        Ok(ServiceTracker { state, subscription })
    }

    /// Closes the tracker: unsubscribes from the registry. Synchronous — no
    /// further tracker events are delivered after this returns.
    pub fn close(&self) {
        self.subscription.close();
    }

    /// Number of services currently matching this tracker.
    #[must_use]
    pub fn tracked_count(&self) -> usize {
        self.state.ranked.load().len()
    }

    /// A snapshot of the current ranked sequence.
    #[must_use]
    pub fn ranked_snapshot(&self) -> Vec<ServiceRef> {
        (**self.state.ranked.load()).clone()
    }
}

impl Drop for ServiceTracker {
    fn drop(&mut self) {
        self.close();
    }
}
