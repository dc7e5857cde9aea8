//! Integration tests for the reactive engine.
//!
//! These exercise the pieces together: cells feeding derived cells feeding
//! transforms, disposal cascading across the graph, and async pipelines
//! driven end to end.

use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;

use filament_core::transform;
use filament_core::{
    AsyncCell, AsyncState, CellFamily, DerivedCell, LifecycleObserver, OpError, RuntimeConfig,
    StateCell,
};

/// A cell, a derived cell, and a listener work together end to end.
#[test]
fn full_reactive_chain() {
    let celsius = StateCell::new(0i32);
    let fahrenheit = DerivedCell::new(
        {
            let celsius = celsius.clone();
            move || celsius.get() * 9 / 5 + 32
        },
        &[&celsius],
    )
    .unwrap();

    let observed = Arc::new(AtomicI32::new(0));
    let observed_clone = observed.clone();
    fahrenheit.listen(move |value| {
        observed_clone.store(*value, Ordering::SeqCst);
    });

    celsius.set(100).unwrap();

    assert_eq!(fahrenheit.get(), 212);
    assert_eq!(observed.load(Ordering::SeqCst), 212);
}

/// A batch on the source coalesces into a single recomputation wave.
#[test]
fn batch_coalesces_through_derived_cells() {
    let base = StateCell::new(0);
    let doubled = DerivedCell::new(
        {
            let base = base.clone();
            move || base.get() * 2
        },
        &[&base],
    )
    .unwrap();

    let notifications = Arc::new(AtomicUsize::new(0));
    let notifications_clone = notifications.clone();
    doubled.listen(move |_| {
        notifications_clone.fetch_add(1, Ordering::SeqCst);
    });

    base.batch(|| {
        base.set(1).unwrap();
        base.set(2).unwrap();
        base.set(3).unwrap();
    });

    assert_eq!(doubled.get(), 6);
    assert_eq!(notifications.load(Ordering::SeqCst), 1);
}

/// Disposing the source of every transform kind disposes the result, and
/// disposing the result returns the source's listener count to its prior
/// value.
#[tokio::test]
async fn transform_lifecycles_are_bidirectional() {
    // Result-side disposal detaches from the source.
    let source = StateCell::new(0);
    assert_eq!(source.listener_count(), 0);

    let mapped = transform::map(&source, |v| v + 1);
    let filtered = transform::filter(&source, |v| v % 2 == 0);
    let debounced = transform::debounce(&source, Duration::from_millis(10));
    let throttled = transform::throttle(&source, Duration::from_millis(10));
    assert_eq!(source.listener_count(), 4);

    mapped.dispose();
    filtered.dispose();
    debounced.dispose();
    throttled.dispose();
    assert_eq!(source.listener_count(), 0);

    // Source-side disposal cascades to every live result.
    let source = StateCell::new(0);
    let mapped = transform::map(&source, |v| v + 1);
    let filtered = transform::filter(&source, |v| v % 2 == 0);
    let debounced = transform::debounce(&source, Duration::from_millis(10));

    source.dispose();
    assert!(mapped.is_disposed());
    assert!(filtered.is_disposed());
    assert!(debounced.is_disposed());

    // The async operators follow the same recipe.
    let async_source: AsyncCell<i32> = AsyncCell::new();
    let mapped = transform::map_async(&async_source, |v| Ok(*v));
    let chained = transform::chain(&async_source, |n| async move { Ok(n) }.boxed());
    let cache = transform::cached(&async_source, Duration::from_secs(60));
    assert_eq!(async_source.listener_count(), 3);

    mapped.dispose();
    assert_eq!(async_source.listener_count(), 2);

    async_source.dispose();
    assert!(chained.is_disposed());
    assert!(cache.is_disposed());
}

/// A search pipeline: term cell -> debounce -> async fetch.
#[tokio::test(start_paused = true)]
async fn debounced_async_search_pipeline() {
    let term = StateCell::new(String::new());
    let settled = transform::debounce(&term, Duration::from_millis(200));
    let results: AsyncCell<Vec<String>> = AsyncCell::new();

    let results_clone = results.clone();
    settled.listen(move |query: &String| {
        let query = query.clone();
        let results = results_clone.clone();
        tokio::spawn(async move {
            let _ = results
                .execute(
                    move || async move { Ok(vec![format!("match for {query}")]) },
                    false,
                )
                .await;
        });
    });

    // Three keystrokes inside the debounce window.
    term.set("r".to_string()).unwrap();
    term.set("ru".to_string()).unwrap();
    term.set("rust".to_string()).unwrap();

    tokio::time::advance(Duration::from_millis(210)).await;
    tokio::task::yield_now().await;
    tokio::task::yield_now().await;
    tokio::task::yield_now().await;

    // Only the settled term was fetched.
    assert_eq!(
        results.state().data(),
        Some(&vec!["match for rust".to_string()])
    );
}

/// combine_async across cells that resolve at different times.
#[tokio::test]
async fn combine_async_settles_once_every_input_does() {
    let profile: AsyncCell<i32> = AsyncCell::new();
    let settings: AsyncCell<i32> = AsyncCell::new();
    let ready = transform::combine_async(&[profile.clone(), settings.clone()]);

    profile
        .execute(|| async { Ok(1) }, false)
        .await
        .unwrap();
    assert!(!ready.state().is_success());

    settings
        .execute(|| async { Ok(2) }, false)
        .await
        .unwrap();
    assert_eq!(ready.state().data(), Some(&vec![1, 2]));
}

/// A family of derived cells disposes cleanly in bulk.
#[test]
fn family_of_derived_cells() {
    let base = StateCell::new(10);
    let base_for_factory = base.clone();
    let family: CellFamily<i32, DerivedCell<i32>> = CellFamily::new(move |factor| {
        let factor = *factor;
        let base = base_for_factory.clone();
        DerivedCell::new(
            {
                let base = base.clone();
                move || base.get() * factor
            },
            &[&base],
        )
        .expect("acyclic by construction")
    });

    let tripled = family.get(&3);
    assert_eq!(tripled.get(), 30);

    base.set(20).unwrap();
    assert_eq!(tripled.get(), 60);
    assert_eq!(family.get(&5).get(), 100);

    family.dispose_all();
    assert!(tripled.is_disposed());
    assert!(family.is_empty());

    // The base survives its dependents.
    base.set(30).unwrap();
    assert_eq!(base.get(), 30);
}

#[derive(Default)]
struct CountingObserver {
    created: AtomicUsize,
    disposed: AtomicUsize,
}

impl LifecycleObserver for CountingObserver {
    fn cell_created(&self, _id: &str) {
        self.created.fetch_add(1, Ordering::SeqCst);
    }

    fn cell_disposed(&self, _id: &str) {
        self.disposed.fetch_add(1, Ordering::SeqCst);
    }
}

/// The observer sees every cell a transform chain creates and disposes.
#[test]
fn observer_follows_a_transform_chain() {
    let observer = Arc::new(CountingObserver::default());
    let config = RuntimeConfig {
        observer: Some(observer.clone()),
        ..RuntimeConfig::default()
    };

    let source = StateCell::builder(0).config(config).build();
    // map propagates the source's config to the result cell.
    let mapped = transform::map(&source, |v| v + 1);
    assert_eq!(observer.created.load(Ordering::SeqCst), 2);

    source.dispose();
    assert!(mapped.is_disposed());
    assert_eq!(observer.disposed.load(Ordering::SeqCst), 2);
}

/// The error taxonomy: usage errors are loud, operation errors travel both
/// channels.
#[tokio::test]
async fn error_channels() {
    // Usage error: writing to a derived cell.
    let source = StateCell::new(1);
    let derived = DerivedCell::builder(
        {
            let source = source.clone();
            move || source.get()
        },
        &[&source],
    )
    .id("derived-total")
    .build()
    .unwrap();

    let message = derived.set(5).unwrap_err().to_string();
    assert!(message.contains("derived-total"));
    assert!(message.contains("dependencies"));

    // Operation error: pushed into state and returned to the caller.
    let cell: AsyncCell<i32> = AsyncCell::new();
    let seen_states = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let seen_clone = seen_states.clone();
    cell.listen(move |state: &AsyncState<i32>| {
        seen_clone.lock().push(state.clone());
    });

    let outcome = cell
        .execute(|| async { Err(OpError::msg("fetch failed")) }, false)
        .await;
    assert_eq!(outcome.unwrap_err().to_string(), "fetch failed");

    let states = seen_states.lock();
    assert!(states[0].is_loading());
    assert_eq!(states[1].error().unwrap().to_string(), "fetch failed");
}
