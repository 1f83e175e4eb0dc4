//! Tests for sharing incrementer factories across threads.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use pagefill_core::{
    Accumulator, Calculation, ComparableIncrementerFactory, IncrementerCache, IncrementerFactory,
    NumberIncrementerFactory, Value,
};

static SLOW_BUILDS: AtomicUsize = AtomicUsize::new(0);
static BLOCKED_ENTERED: AtomicBool = AtomicBool::new(false);
static BLOCKED_RELEASE: AtomicBool = AtomicBool::new(false);

fn slow_factory() -> Result<Arc<dyn IncrementerFactory>, String> {
    SLOW_BUILDS.fetch_add(1, Ordering::SeqCst);
    thread::sleep(std::time::Duration::from_millis(20));
    Ok(Arc::new(NumberIncrementerFactory))
}

fn blocked_factory() -> Result<Arc<dyn IncrementerFactory>, String> {
    BLOCKED_ENTERED.store(true, Ordering::SeqCst);
    while !BLOCKED_RELEASE.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(1));
    }
    Ok(Arc::new(NumberIncrementerFactory))
}

#[test]
fn test_concurrent_named_lookups_share_one_instance() {
    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                IncrementerCache::global().get_named("number").unwrap()
            })
        })
        .collect();

    let factories: Vec<_> = handles.into_iter().map(|handle| handle.join().unwrap()).collect();
    for factory in &factories[1..] {
        assert!(Arc::ptr_eq(&factories[0], factory));
    }
}

#[test]
fn test_concurrent_construction_runs_once() {
    let cache = Arc::new(IncrementerCache::new());
    cache.register("slow", slow_factory);

    let threads = 6;
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let cache = cache.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                cache.get_named("slow").unwrap()
            })
        })
        .collect();

    let factories: Vec<_> = handles.into_iter().map(|handle| handle.join().unwrap()).collect();
    assert_eq!(SLOW_BUILDS.load(Ordering::SeqCst), 1);
    assert!(factories.iter().all(|factory| Arc::ptr_eq(factory, &factories[0])));
}

#[test]
fn test_typed_and_named_lookups_share_one_entry() {
    let cache = IncrementerCache::new();
    let typed = cache.get::<NumberIncrementerFactory>();
    let named = cache.get_named("number").unwrap();
    assert!(Arc::ptr_eq(&typed, &named));
    assert_eq!(cache.len(), 1);
}

#[test]
fn test_slow_construction_does_not_block_other_kinds() {
    let cache = Arc::new(IncrementerCache::new());
    cache.register("blocked", blocked_factory);

    let builder = {
        let cache = cache.clone();
        thread::spawn(move || cache.get_named("blocked").map(|_| ()))
    };
    while !BLOCKED_ENTERED.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(1));
    }

    let number = cache.get_named("number").unwrap();
    let comparable = cache.get::<ComparableIncrementerFactory>();
    assert_eq!(number.name(), "number");
    assert_eq!(comparable.name(), "comparable");
    assert!(!builder.is_finished());

    BLOCKED_RELEASE.store(true, Ordering::SeqCst);
    builder.join().unwrap().unwrap();
    assert_eq!(cache.len(), 3);
}

#[test]
fn test_eviction_rebuilds_released_entries() {
    let cache = IncrementerCache::new();
    let held = cache.get_named("comparable").unwrap();
    drop(cache.get_named("number").unwrap());

    assert_eq!(cache.evict_unused(), 1);
    assert!(Arc::ptr_eq(&held, &cache.get_named("comparable").unwrap()));

    let rebuilt = cache.get_named("number").unwrap();
    assert_eq!(cache.len(), 2);
    assert!(Arc::ptr_eq(&rebuilt, &cache.get_named("number").unwrap()));
}

#[test]
fn test_shared_factory_accumulates_independently_per_thread() {
    let handles: Vec<_> = [1.0_f64, 10.0, 100.0]
        .into_iter()
        .map(|step| {
            thread::spawn(move || {
                let factory = IncrementerCache::global().get_named("number").unwrap();
                let sum = factory.incrementer(Calculation::Sum);
                let mut acc = Accumulator::new(sum.initial_value());
                for _ in 0..4 {
                    acc.apply(sum, &Value::Float(step));
                }
                acc.value().clone()
            })
        })
        .collect();

    let totals: Vec<Value> = handles.into_iter().map(|handle| handle.join().unwrap()).collect();
    assert_eq!(totals, vec![Value::Float(4.0), Value::Float(40.0), Value::Float(400.0)]);
}
