//! Value-based transforms: map, filter, combine.

use std::sync::Arc;

use crate::cell::{ListenerId, StateCell, WeakStateCell};
use crate::transform::link_lifecycles;

/// A cell carrying `mapper(source)`.
///
/// A panicking mapper is contained by the notification fan-out; the result
/// keeps its last good value.
pub fn map<T, U, F>(source: &StateCell<T>, mapper: F) -> StateCell<U>
where
    T: Clone + PartialEq + Send + Sync + 'static,
    U: Clone + PartialEq + Send + Sync + 'static,
    F: Fn(&T) -> U + Send + Sync + 'static,
{
    let initial = source.with(|value| mapper(value));
    let result = StateCell::builder(initial)
        .id(format!("{}:map", source.id()))
        .config(source.config().clone())
        .build();

    let listener = ListenerId::new();
    let weak_result = result.downgrade();
    source.subscribe(listener, move |value| {
        if let Some(result) = weak_result.upgrade() {
            result.force_set(mapper(value));
        }
    });

    link_lifecycles(source, &result, listener, None);
    result
}

/// A cell carrying the source values that pass `predicate`.
///
/// The result needs an initial value, so the source's current value seeds it
/// even when it fails the predicate.
pub fn filter<T, P>(source: &StateCell<T>, predicate: P) -> StateCell<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
    P: Fn(&T) -> bool + Send + Sync + 'static,
{
    let result = StateCell::builder(source.get())
        .id(format!("{}:filter", source.id()))
        .config(source.config().clone())
        .build();

    let listener = ListenerId::new();
    let weak_result = result.downgrade();
    source.subscribe(listener, move |value| {
        if predicate(value) {
            if let Some(result) = weak_result.upgrade() {
                result.force_set(value.clone());
            }
        }
    });

    link_lifecycles(source, &result, listener, None);
    result
}

/// A cell carrying `combiner` over the current values of every source,
/// recomputed when any of them changes.
///
/// Sources share one value type; heterogeneous derivation is
/// [`DerivedCell`](crate::cell::DerivedCell)'s job.
pub fn combine<T, U, F>(sources: &[StateCell<T>], combiner: F) -> StateCell<U>
where
    T: Clone + PartialEq + Send + Sync + 'static,
    U: Clone + PartialEq + Send + Sync + 'static,
    F: Fn(&[T]) -> U + Send + Sync + 'static,
{
    let combiner = Arc::new(combiner);
    let initial = {
        let values: Vec<T> = sources.iter().map(StateCell::get).collect();
        combiner(&values)
    };
    let result = StateCell::builder(initial).build();

    let weak_sources: Vec<WeakStateCell<T>> =
        sources.iter().map(StateCell::downgrade).collect();
    for source in sources {
        let listener = ListenerId::new();
        let weak_result = result.downgrade();
        let weak_sources = weak_sources.clone();
        let combiner = Arc::clone(&combiner);
        source.subscribe(listener, move |_| {
            let Some(result) = weak_result.upgrade() else {
                return;
            };
            let mut values = Vec::with_capacity(weak_sources.len());
            for weak in &weak_sources {
                match weak.upgrade() {
                    Some(cell) => values.push(cell.get()),
                    None => return,
                }
            }
            result.force_set(combiner(&values));
        });
        link_lifecycles(source, &result, listener, None);
    }

    result
}
