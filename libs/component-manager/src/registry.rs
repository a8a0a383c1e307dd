//! The consumed service-registry contract, plus an in-process reference
//! implementation (`LocalRegistry`) used by this crate's own tests and by
//! callers who have no OSGi-style registry of their own.
//!
//! `LocalRegistry` is deliberately not a performance-oriented production
//! registry: matching is O(services-of-type) per mutation, guarded by a
//! single mutex. It exists so `ServiceTracker` has something real to open
//! against.

use std::any::Any;
use std::collections::HashMap;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::error::{ComponentError, Result};

/// Monotonically increasing identity assigned by the registry on
/// registration. Ordering of `ServiceId`s is registration order.
pub type ServiceId = u64;

/// A single property value. Properties are a case-sensitive string-keyed map
/// of scalars — no nested structures, matching spec.md §3.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropValue {
    /// A string-valued property.
    Str(String),
    /// An integer-valued property (`service.ranking` is always this kind).
    Int(i64),
    /// A boolean-valued property.
    Bool(bool),
}

impl PropValue {
    fn as_match_string(&self) -> String {
        match self {
            PropValue::Str(s) => s.clone(),
            PropValue::Int(i) => i.to_string(),
            PropValue::Bool(b) => b.to_string(),
        }
    }
}

impl fmt::Display for PropValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropValue::Str(s) => write!(f, "{s}"),
            PropValue::Int(i) => write!(f, "{i}"),
            PropValue::Bool(b) => write!(f, "{b}"),
        }
    }
}

impl From<&str> for PropValue {
    fn from(value: &str) -> Self {
        PropValue::Str(value.to_owned())
    }
}

impl From<i64> for PropValue {
    fn from(value: i64) -> Self {
        PropValue::Int(value)
    }
}

impl From<bool> for PropValue {
    fn from(value: bool) -> Self {
        PropValue::Bool(value)
    }
}

/// Service properties: a case-sensitive `String -> PropValue` mapping.
pub type Properties = HashMap<String, PropValue>;

/// Well-known `service.ranking` property key. Defaults to `0` when absent.
pub const SERVICE_RANKING: &str = "service.ranking";

/// Reads `service.ranking` from `props`, defaulting to `0`.
#[must_use]
pub fn ranking_of(props: &Properties) -> i64 {
    match props.get(SERVICE_RANKING) {
        Some(PropValue::Int(i)) => *i,
        _ => 0,
    }
}

/// An LDAP-style filter expression, as spec.md §4.1 describes: attribute
/// equality, presence, and boolean composition. An empty filter matches
/// every service of the subscribed type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// Matches unconditionally (the empty filter).
    Always,
    /// `(attr=value)`
    Eq(String, String),
    /// `(attr=*)`
    Present(String),
    /// `(&f1 f2 ...)`
    And(Vec<Filter>),
    /// `(|f1 f2 ...)`
    Or(Vec<Filter>),
    /// `(!f)`
    Not(Box<Filter>),
}

impl Filter {
    /// Parses an LDAP-style filter string.
    ///
    /// # Errors
    ///
    /// Returns [`ComponentError::InvalidFilter`] if `text` is not empty and
    /// does not parse as a well-formed filter expression.
    pub fn parse(text: &str) -> Result<Filter> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Ok(Filter::Always);
        }
        let mut parser = FilterParser { chars: trimmed.chars().collect(), pos: 0 };
        let expr = parser.parse_expr(trimmed)?;
        if parser.pos != parser.chars.len() {
            return Err(ComponentError::InvalidFilter {
                filter: trimmed.to_owned(),
                reason: "trailing input after expression".to_owned(),
            });
        }
        Ok(expr)
    }

    /// Evaluates the filter against a property map.
    #[must_use]
    pub fn matches(&self, props: &Properties) -> bool {
        match self {
            Filter::Always => true,
            Filter::Eq(attr, value) => props.get(attr).is_some_and(|v| &v.as_match_string() == value),
            Filter::Present(attr) => props.contains_key(attr),
            Filter::And(inner) => inner.iter().all(|f| f.matches(props)),
            Filter::Or(inner) => inner.iter().any(|f| f.matches(props)),
            Filter::Not(inner) => !inner.matches(props),
        }
    }
}

struct FilterParser {
    chars: Vec<char>,
    pos: usize,
}

impl FilterParser {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn expect(&mut self, c: char, filter: &str) -> Result<()> {
        if self.bump() == Some(c) {
            Ok(())
        } else {
            Err(ComponentError::InvalidFilter {
                filter: filter.to_owned(),
                reason: format!("expected '{c}'"),
            })
        }
    }

    fn parse_expr(&mut self, filter: &str) -> Result<Filter> {
        self.expect('(', filter)?;
        let expr = match self.peek() {
            Some('&') => {
                self.bump();
                Filter::And(self.parse_list(filter)?)
            }
            Some('|') => {
                self.bump();
                Filter::Or(self.parse_list(filter)?)
            }
            Some('!') => {
                self.bump();
                Filter::Not(Box::new(self.parse_expr(filter)?))
            }
            _ => self.parse_attr_expr(filter)?,
        };
        self.expect(')', filter)?;
        Ok(expr)
    }

    fn parse_list(&mut self, filter: &str) -> Result<Vec<Filter>> {
        let mut items = Vec::new();
        while self.peek() == Some('(') {
            items.push(self.parse_expr(filter)?);
        }
        if items.is_empty() {
            return Err(ComponentError::InvalidFilter {
                filter: filter.to_owned(),
                reason: "& and | require at least one operand".to_owned(),
            });
        }
        Ok(items)
    }

    fn parse_attr_expr(&mut self, filter: &str) -> Result<Filter> {
        let mut attr = String::new();
        while let Some(c) = self.peek() {
            if c == '=' {
                break;
            }
            attr.push(c);
            self.bump();
        }
        if attr.is_empty() {
            return Err(ComponentError::InvalidFilter {
                filter: filter.to_owned(),
                reason: "missing attribute name".to_owned(),
            });
        }
        self.expect('=', filter)?;
        let mut value = String::new();
        while let Some(c) = self.peek() {
            if c == ')' {
                break;
            }
            value.push(c);
            self.bump();
        }
        if value == "*" {
            Ok(Filter::Present(attr))
        } else {
            Ok(Filter::Eq(attr, value))
        }
    }
}

/// A registered service as handed to trackers: its identity, ranking,
/// properties, and the type-erased instance.
#[derive(Clone)]
pub struct ServiceRef {
    /// Identity assigned at registration time.
    pub id: ServiceId,
    /// `service.ranking`, read once at dispatch time.
    pub ranking: i64,
    /// Properties as they stood at the moment of this event.
    pub props: Properties,
    /// The registered instance, type-erased.
    pub instance: Arc<dyn Any + Send + Sync>,
}

impl fmt::Debug for ServiceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRef")
            .field("id", &self.id)
            .field("ranking", &self.ranking)
            .field("props", &self.props)
            .finish_non_exhaustive()
    }
}

/// Events a [`Subscription`]'s listener receives.
pub trait RegistryListener: Send + Sync {
    /// A new service now matches this subscription's type and filter.
    fn registered(&self, svc: ServiceRef);
    /// A previously-matching service's properties changed and it still
    /// matches.
    fn modified(&self, svc: ServiceRef);
    /// A service no longer matches (either it unregistered, or a property
    /// change moved it out of the filter).
    fn unregistering(&self, id: ServiceId);
}

/// A live subscription. Dropping this handle does not close it — call
/// [`Subscription::close`] explicitly, as a `ServiceTracker` does.
pub trait Subscription: Send + Sync {
    /// Unsubscribes. Synchronous: no callback for this subscription is in
    /// flight after this call returns.
    fn close(&self);
}

/// The contract a service registry must offer trackers: subscribe to a
/// service type under a filter and receive an initial batch plus
/// incremental events.
pub trait ServiceRegistry: Send + Sync {
    /// Subscribes to services of `service_type` matching `filter`.
    ///
    /// The returned subscription immediately (before this call returns)
    /// delivers `registered` for every currently-matching service, then
    /// delivers incremental events as the registry changes.
    ///
    /// # Errors
    ///
    /// Returns [`ComponentError::RegistryUnavailable`] if the registry
    /// cannot accept new subscriptions (e.g. it is shutting down).
    fn subscribe(
        &self,
        service_type: &'static str,
        filter: Filter,
        listener: Arc<dyn RegistryListener>,
    ) -> Result<Box<dyn Subscription>>;
}

struct SubEntry {
    id: u64,
    filter: Filter,
    listener: Arc<dyn RegistryListener>,
    dispatch_lock: Arc<Mutex<()>>,
    currently_matching: HashSet<ServiceId>,
}

struct TypeBucket {
    services: Vec<ServiceRef>,
    subs: Vec<SubEntry>,
}

struct RegistryState {
    next_id: AtomicU64,
    next_sub_id: AtomicU64,
    buckets: Mutex<HashMap<&'static str, TypeBucket>>,
}

/// An in-process reference [`ServiceRegistry`] implementation: register,
/// modify, and unregister services by type, with LDAP-filtered delivery to
/// subscribers.
#[derive(Clone)]
pub struct LocalRegistry {
    state: Arc<RegistryState>,
}

impl Default for LocalRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        LocalRegistry {
            state: Arc::new(RegistryState {
                next_id: AtomicU64::new(1),
                next_sub_id: AtomicU64::new(1),
                buckets: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Registers a service instance of `service_type` with `props`, returning
    /// its assigned id.
    pub fn register(
        &self,
        service_type: &'static str,
        instance: Arc<dyn Any + Send + Sync>,
        props: Properties,
    ) -> ServiceId {
        let id = self.state.next_id.fetch_add(1, Ordering::SeqCst);
        let ranking = ranking_of(&props);
        let svc = ServiceRef { id, ranking, props, instance };

        let mut deliveries: Vec<(Arc<Mutex<()>>, Arc<dyn RegistryListener>, ServiceRef)> = Vec::new();
        {
            let mut buckets = self.state.buckets.lock();
            let bucket = buckets.entry(service_type).or_insert_with(|| TypeBucket { services: Vec::new(), subs: Vec::new() });
            bucket.services.push(svc.clone());
            for sub in &mut bucket.subs {
                if sub.filter.matches(&svc.props) {
                    sub.currently_matching.insert(id);
                    deliveries.push((sub.dispatch_lock.clone(), sub.listener.clone(), svc.clone()));
                }
            }
        }
        for (lock, listener, svc) in deliveries {
            let _guard = lock.lock();
            listener.registered(svc);
        }
        id
    }

    /// Replaces the properties of an already-registered service, redelivering
    /// events to affected subscriptions (`registered`/`modified`/
    /// `unregistering` depending on the filter-match transition).
    pub fn modify(&self, id: ServiceId, service_type: &'static str, new_props: Properties) {
        enum Delivery {
            Registered(ServiceRef),
            Modified(ServiceRef),
            Unregistering(ServiceId),
        }
        let mut deliveries: Vec<(Arc<Mutex<()>>, Arc<dyn RegistryListener>, Delivery)> = Vec::new();
        {
            let mut buckets = self.state.buckets.lock();
            let Some(bucket) = buckets.get_mut(service_type) else { return };
            let Some(svc) = bucket.services.iter_mut().find(|s| s.id == id) else { return };
            svc.ranking = ranking_of(&new_props);
            svc.props = new_props;
            let snapshot = svc.clone();
            for sub in &mut bucket.subs {
                let now_matches = sub.filter.matches(&snapshot.props);
                let was_matching = sub.currently_matching.contains(&id);
                match (was_matching, now_matches) {
                    (true, true) => deliveries.push((sub.dispatch_lock.clone(), sub.listener.clone(), Delivery::Modified(snapshot.clone()))),
                    (true, false) => {
                        sub.currently_matching.remove(&id);
                        deliveries.push((sub.dispatch_lock.clone(), sub.listener.clone(), Delivery::Unregistering(id)));
                    }
                    (false, true) => {
                        sub.currently_matching.insert(id);
                        deliveries.push((sub.dispatch_lock.clone(), sub.listener.clone(), Delivery::Registered(snapshot.clone())));
                    }
                    (false, false) => {}
                }
            }
        }
        for (lock, listener, delivery) in deliveries {
            let _guard = lock.lock();
            match delivery {
                Delivery::Registered(svc) => listener.registered(svc),
                Delivery::Modified(svc) => listener.modified(svc),
                Delivery::Unregistering(id) => listener.unregistering(id),
            }
        }
    }

    /// Unregisters a service, notifying every subscription currently
    /// matching it.
    pub fn unregister(&self, id: ServiceId, service_type: &'static str) {
        let mut deliveries: Vec<(Arc<Mutex<()>>, Arc<dyn RegistryListener>)> = Vec::new();
        {
            let mut buckets = self.state.buckets.lock();
            let Some(bucket) = buckets.get_mut(service_type) else { return };
            bucket.services.retain(|s| s.id != id);
            for sub in &mut bucket.subs {
                if sub.currently_matching.remove(&id) {
                    deliveries.push((sub.dispatch_lock.clone(), sub.listener.clone()));
                }
            }
        }
        for (lock, listener) in deliveries {
            let _guard = lock.lock();
            listener.unregistering(id);
        }
    }
}

impl ServiceRegistry for LocalRegistry {
    fn subscribe(
        &self,
        service_type: &'static str,
        filter: Filter,
        listener: Arc<dyn RegistryListener>,
    ) -> Result<Box<dyn Subscription>> {
        let sub_id = self.state.next_sub_id.fetch_add(1, Ordering::SeqCst);
        let dispatch_lock = Arc::new(Mutex::new(()));
        let mut initial: Vec<ServiceRef> = Vec::new();
        let mut currently_matching = HashSet::new();
        {
            let mut buckets = self.state.buckets.lock();
            let bucket = buckets.entry(service_type).or_insert_with(|| TypeBucket { services: Vec::new(), subs: Vec::new() });
            for svc in &bucket.services {
                if filter.matches(&svc.props) {
                    currently_matching.insert(svc.id);
                    initial.push(svc.clone());
                }
            }
            bucket.subs.push(SubEntry {
                id: sub_id,
                filter,
                listener: listener.clone(),
                dispatch_lock: dispatch_lock.clone(),
                currently_matching,
            });
        }
        for svc in initial {
            let _guard = dispatch_lock.lock();
            listener.registered(svc);
        }
        Ok(Box::new(LocalSubscription {
            state: self.state.clone(),
            service_type,
            sub_id,
        }))
    }
}

struct LocalSubscription {
    state: Arc<RegistryState>,
    service_type: &'static str,
    sub_id: u64,
}

impl Subscription for LocalSubscription {
    fn close(&self) {
        let dispatch_lock = {
            let mut buckets = self.state.buckets.lock();
            let Some(bucket) = buckets.get_mut(self.service_type) else { return };
            let pos = bucket.subs.iter().position(|s| s.id == self.sub_id);
            pos.map(|i| bucket.subs.remove(i).dispatch_lock)
        };
        // Block until any dispatch already in flight for this subscription
        // finishes; the entry is already gone so no new one can start.
        if let Some(lock) = dispatch_lock {
            let _guard = lock.lock();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    trait Greeter: Send + Sync {
        fn greet(&self) -> &str;
    }

    struct Hello;
    impl Greeter for Hello {
        fn greet(&self) -> &str {
            "hello"
        }
    }

    struct Recording {
        registered: Mutex<Vec<ServiceId>>,
        unregistered: Mutex<Vec<ServiceId>>,
    }

    impl Recording {
        fn new() -> Self {
            Recording { registered: Mutex::new(Vec::new()), unregistered: Mutex::new(Vec::new()) }
        }
    }

    impl RegistryListener for Recording {
        fn registered(&self, svc: ServiceRef) {
            self.registered.lock().push(svc.id);
        }
        fn modified(&self, _svc: ServiceRef) {}
        fn unregistering(&self, id: ServiceId) {
            self.unregistered.lock().push(id);
        }
    }

    #[test]
    fn filter_parses_and_matches() {
        let f = Filter::parse("(&(objectClass=IGreeter)(service.lang=rust))").expect("parses");
        let mut props = Properties::new();
        props.insert("objectClass".into(), "IGreeter".into());
        props.insert("service.lang".into(), "rust".into());
        assert!(f.matches(&props));
        props.insert("service.lang".into(), "cpp".into());
        assert!(!f.matches(&props));
    }

    #[test]
    fn empty_filter_matches_everything() {
        let f = Filter::parse("").expect("parses");
        assert!(f.matches(&Properties::new()));
    }

    #[test]
    fn subscribe_delivers_initial_batch_then_incremental_events() {
        let registry = LocalRegistry::new();
        let id1 = registry.register("IGreeter", Arc::new(Hello), Properties::new());

        let listener = Arc::new(Recording::new());
        let sub = registry
            .subscribe("IGreeter", Filter::Always, listener.clone())
            .expect("subscribe succeeds");
        assert_eq!(*listener.registered.lock(), vec![id1]);

        let id2 = registry.register("IGreeter", Arc::new(Hello), Properties::new());
        assert_eq!(*listener.registered.lock(), vec![id1, id2]);

        registry.unregister(id1, "IGreeter");
        assert_eq!(*listener.unregistered.lock(), vec![id1]);

        sub.close();
        registry.unregister(id2, "IGreeter");
        assert_eq!(*listener.unregistered.lock(), vec![id1]);
    }

    #[test]
    fn modify_out_of_filter_emits_unregistering() {
        let registry = LocalRegistry::new();
        let mut props = Properties::new();
        props.insert("tier".into(), "gold".into());
        let id = registry.register("IGreeter", Arc::new(Hello), props);

        let filter = Filter::parse("(tier=gold)").expect("parses");
        let listener = Arc::new(Recording::new());
        registry.subscribe("IGreeter", filter, listener.clone()).expect("subscribe");
        assert_eq!(*listener.registered.lock(), vec![id]);

        let mut downgraded = Properties::new();
        downgraded.insert("tier".into(), "silver".into());
        registry.modify(id, "IGreeter", downgraded);
        assert_eq!(*listener.unregistered.lock(), vec![id]);
    }
}
