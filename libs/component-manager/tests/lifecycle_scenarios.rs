//! End-to-end lifecycle scenarios exercised through the public API only.
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use component_manager::{Cardinality, ComponentState, DependencyManager, LocalRegistry, Properties, ServiceRegistry};

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

fn counting_callbacks(dm: &DependencyManager, name: &str) -> (component_manager::ComponentManager<Counters>, Arc<Counters>) {
    let instance = Counters::new();
    let cm = dm.create_component(name, instance.clone());
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
    (cm, instance)
}

#[test]
fn s1_simple_lifecycle_no_deps() {
    let dm = DependencyManager::new();
    let (cm, counters) = counting_callbacks(&dm, "A");

    cm.enable().expect("enable succeeds");
    cm.disable().expect("disable succeeds");

    assert_eq!(counters.init.load(Ordering::SeqCst), 1);
    assert_eq!(counters.start.load(Ordering::SeqCst), 1);
    assert_eq!(counters.stop.load(Ordering::SeqCst), 1);
    assert_eq!(counters.deinit.load(Ordering::SeqCst), 1);
    assert_eq!(cm.state(), ComponentState::Disabled);
}

#[test]
fn s2_required_dep_arrives_late() {
    let local = LocalRegistry::new();
    let dm = DependencyManager::with_config(component_manager::ComponentManagerConfig::default().with_registry(Arc::new(local.clone())));
    let (cm, counters) = counting_callbacks(&dm, "B");
    let dep = cm.add_service_dependency("I");
    dep.set_required(true).expect("disabled before enable");

    let last_added = Arc::new(Mutex::new(None));
    let last_added2 = last_added.clone();
    dep.on_add(move |event| {
        *last_added2.lock().expect("add-callback lock") = Some(event.id);
    })
    .expect("disabled before enable");

    cm.enable().expect("enable succeeds");
    assert_eq!(cm.state(), ComponentState::Uninitialized);
    assert_eq!(counters.init.load(Ordering::SeqCst), 0);

    let mut props = Properties::new();
    props.insert("service.ranking".to_owned(), 0_i64.into());
    local.register("I", Arc::new(1_i32), props);

    assert_eq!(counters.init.load(Ordering::SeqCst), 1);
    assert_eq!(counters.start.load(Ordering::SeqCst), 1);
    assert_eq!(cm.state(), ComponentState::Started);
}

#[test]
fn s3_ranking_tie_break() {
    let local = LocalRegistry::new();
    let dm = DependencyManager::with_config(component_manager::ComponentManagerConfig::default().with_registry(Arc::new(local.clone())));
    let (cm, _counters) = counting_callbacks(&dm, "C");
    let dep = cm.add_service_dependency("I");
    dep.set_cardinality(Cardinality::One).expect("disabled before enable");

    let set_log = Arc::new(Mutex::new(Vec::new()));
    let set_log2 = set_log.clone();
    dep.set_callback(move |event| {
        set_log2.lock().expect("set-log lock").push(event.map(|e| e.id));
    })
    .expect("disabled before enable");

    cm.enable().expect("enable succeeds");

    let mut low = Properties::new();
    low.insert("service.ranking".to_owned(), 0_i64.into());
    let id1 = local.register("I", Arc::new(1_i32), low);

    let mut hi_a = Properties::new();
    hi_a.insert("service.ranking".to_owned(), 10_i64.into());
    let id2 = local.register("I", Arc::new(2_i32), hi_a);

    let mut hi_b = Properties::new();
    hi_b.insert("service.ranking".to_owned(), 10_i64.into());
    let _id3 = local.register("I", Arc::new(3_i32), hi_b);

    {
        let log = set_log.lock().expect("set-log lock");
        assert_eq!(*log, vec![Some(id1), Some(id2)]);
    }

    local.unregister(id2, "I");

    let log = set_log.lock().expect("set-log lock");
    assert_eq!(log.last().copied().flatten(), Some(_id3));
}

#[test]
fn s4_losing_required_dep_while_started() {
    let local = LocalRegistry::new();
    let dm = DependencyManager::with_config(component_manager::ComponentManagerConfig::default().with_registry(Arc::new(local.clone())));
    let (cm, counters) = counting_callbacks(&dm, "D");
    let dep = cm.add_service_dependency("I");
    dep.set_required(true).expect("disabled before enable");

    let id = local.register("I", Arc::new(1_i32), Properties::new());
    cm.enable().expect("enable succeeds");
    assert_eq!(cm.state(), ComponentState::Started);

    local.unregister(id, "I");

    assert_eq!(counters.stop.load(Ordering::SeqCst), 1);
    assert_eq!(counters.deinit.load(Ordering::SeqCst), 1);
    assert_eq!(cm.state(), ComponentState::Uninitialized);
    assert!(cm.is_enabled());
}

#[test]
fn s5_panic_in_start_recovers_on_retry() {
    let dm = DependencyManager::new();
    let instance = Counters::new();
    let cm = dm.create_component("E", instance.clone());
    let attempt = Arc::new(AtomicUsize::new(0));
    let attempt2 = attempt.clone();
    cm.set_callbacks(
        Some(|c: &Arc<Counters>| {
            c.init.fetch_add(1, Ordering::SeqCst);
        }),
        Some(move |c: &Arc<Counters>| {
            c.start.fetch_add(1, Ordering::SeqCst);
            if attempt2.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("first start attempt always fails");
            }
        }),
        Some(|c: &Arc<Counters>| {
            c.stop.fetch_add(1, Ordering::SeqCst);
        }),
        Some(|c: &Arc<Counters>| {
            c.deinit.fetch_add(1, Ordering::SeqCst);
        }),
    );

    std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| cm.enable())).expect("enable call itself never unwinds").expect("enable returns Ok even after a callback panic");
    assert_eq!(cm.state(), ComponentState::Initialized);
    assert_eq!(instance.init.load(Ordering::SeqCst), 1);
    assert_eq!(instance.start.load(Ordering::SeqCst), 1);

    cm.enable().expect("idempotent re-enable retries the stalled transition");
    assert_eq!(cm.state(), ComponentState::Started);
    assert_eq!(instance.init.load(Ordering::SeqCst), 1, "init does not re-run on retry");
    assert_eq!(instance.start.load(Ordering::SeqCst), 2);
}

#[test]
fn s6_reentrant_disable_is_rejected_and_settles_at_started() {
    let dm = DependencyManager::new();
    let instance = Counters::new();
    let cm = dm.create_component("F", instance.clone());
    let cm_for_callback = cm.clone();
    let reentrant_result = Arc::new(Mutex::new(None));
    let reentrant_result2 = reentrant_result.clone();

    cm.set_callbacks(
        Some(|_: &Arc<Counters>| {}),
        Some(move |_: &Arc<Counters>| {
            *reentrant_result2.lock().expect("result lock") = Some(cm_for_callback.disable());
        }),
        Some(|_: &Arc<Counters>| {}),
        Some(|_: &Arc<Counters>| {}),
    );

    cm.enable().expect("outer enable succeeds");

    assert!(matches!(
        reentrant_result.lock().expect("result lock").take(),
        Some(Err(component_manager::ComponentError::Reentrant { .. }))
    ));
    assert_eq!(cm.state(), ComponentState::Started);
}

#[test]
fn b1_zero_required_deps_resolves_immediately() {
    let dm = DependencyManager::new();
    let (cm, _counters) = counting_callbacks(&dm, "ZeroDeps");
    cm.enable().expect("enable succeeds");
    assert_eq!(cm.state(), ComponentState::Started);
    assert!(cm.is_resolved());
}

#[test]
fn r1_enable_is_idempotent() {
    let dm = DependencyManager::new();
    let (cm, counters) = counting_callbacks(&dm, "Idempotent");
    cm.enable().expect("first enable");
    cm.enable().expect("second enable is a no-op");
    assert_eq!(counters.init.load(Ordering::SeqCst), 1);
    assert_eq!(counters.start.load(Ordering::SeqCst), 1);
}

#[test]
fn r2_enable_then_disable_matches_callbacks() {
    let dm = DependencyManager::new();
    let (cm, counters) = counting_callbacks(&dm, "RoundTrip");
    cm.enable().expect("enable succeeds");
    cm.disable().expect("disable succeeds");
    assert_eq!(counters.init.load(Ordering::SeqCst), counters.deinit.load(Ordering::SeqCst));
    assert_eq!(counters.start.load(Ordering::SeqCst), counters.stop.load(Ordering::SeqCst));
    assert_eq!(cm.state(), ComponentState::Disabled);
}

#[test]
fn bundle_stop_disables_every_component() {
    let dm = DependencyManager::new();
    let (cm_a, counters_a) = counting_callbacks(&dm, "BundleA");
    let (cm_b, counters_b) = counting_callbacks(&dm, "BundleB");
    cm_a.enable().expect("enable a");
    cm_b.enable().expect("enable b");

    dm.on_bundle_stop();

    assert_eq!(dm.component_count(), 0);
    assert_eq!(counters_a.deinit.load(Ordering::SeqCst), 1);
    assert_eq!(counters_b.deinit.load(Ordering::SeqCst), 1);
    assert!(!cm_a.is_enabled());
    assert!(!cm_b.is_enabled());
}
