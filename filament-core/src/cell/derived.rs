//! Derived cells: values computed from other cells.
//!
//! A [`DerivedCell`] owns a compute function and a fixed set of sources
//! declared at construction. It computes eagerly once, then recomputes
//! whenever any source notifies, feeding the result through the normal set
//! path so an unchanged result does not cascade further downstream.
//!
//! Links are non-owning in both directions: the derived cell holds `Weak`
//! references to its sources and each source holds a `Weak` reference back.
//! Cells are keyed by their string id, which is also what the
//! construction-time cycle walk operates on: if the id of the cell being
//! built is reachable from any proposed source, construction fails with
//! [`StateError::CircularDependency`] before a single link is installed.
//!
//! Direct writes are rejected: only a derived cell's dependencies may change
//! its value.

use std::collections::HashSet;
use std::fmt::{self, Debug};
use std::sync::Arc;
use std::time::Duration;

use crate::cell::container::{CellInner, ReactiveNode, SourceCell, StateCell, WeakStateCell};
use crate::cell::listener::ListenerId;
use crate::config::RuntimeConfig;
use crate::error::StateError;

/// Walk the transitive dependencies of `node`, looking for `target_id`.
///
/// Visited ids guard against re-walking shared sub-graphs; the graph itself
/// is acyclic by this very check.
fn reaches(node: &Arc<dyn ReactiveNode>, target_id: &str, visited: &mut HashSet<String>) -> bool {
    if node.node_id() == target_id {
        return true;
    }
    if !visited.insert(node.node_id().to_string()) {
        return false;
    }
    node.dependency_nodes()
        .iter()
        .any(|dependency| reaches(dependency, target_id, visited))
}

/// A cell whose value is a pure function of other cells.
///
/// # Example
///
/// ```rust,ignore
/// let count = StateCell::new(2);
/// let doubled = DerivedCell::new(
///     {
///         let count = count.clone();
///         move || count.get() * 2
///     },
///     &[&count],
/// )?;
///
/// count.set(5)?;
/// assert_eq!(doubled.get(), 10);
/// ```
pub struct DerivedCell<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    cell: StateCell<T>,
}

impl<T> DerivedCell<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Create a derived cell with default options.
    ///
    /// The compute function runs once, eagerly, to seed the initial value.
    /// A compute panic here propagates: a constructor that cannot produce a
    /// first value is a programming mistake, not a runtime fault.
    pub fn new<F>(compute: F, sources: &[&dyn SourceCell]) -> Result<Self, StateError>
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::builder(compute, sources).build()
    }

    /// Start building a derived cell with explicit id, auto-dispose, or
    /// config.
    pub fn builder<'a, F>(compute: F, sources: &'a [&'a dyn SourceCell]) -> DerivedCellBuilder<'a, T, F>
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        DerivedCellBuilder {
            compute,
            sources,
            id: None,
            auto_dispose: false,
            dispose_timeout: None,
            config: RuntimeConfig::default(),
        }
    }

    /// The cell's stable id.
    pub fn id(&self) -> &str {
        self.cell.id()
    }

    /// Current value, cloned out.
    pub fn get(&self) -> T {
        self.cell.get()
    }

    /// Read the current value by reference without cloning.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.cell.with(f)
    }

    /// Always fails: only this cell's dependencies may change its value.
    pub fn set(&self, value: T) -> Result<(), StateError> {
        self.cell.set(value)
    }

    /// Always fails, same as [`set`](Self::set).
    pub fn update(&self, f: impl FnOnce(&T) -> T) -> Result<(), StateError> {
        self.cell.update(f)
    }

    /// Register a listener under a caller-held id.
    pub fn subscribe<F>(&self, id: ListenerId, listener: F)
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.cell.subscribe(id, listener);
    }

    /// Register a listener under a freshly generated id and return it.
    pub fn listen<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.cell.listen(listener)
    }

    /// Remove a listener. Absent ids are a silent no-op.
    pub fn unsubscribe(&self, id: ListenerId) {
        self.cell.unsubscribe(id);
    }

    /// Number of currently registered listeners.
    pub fn listener_count(&self) -> usize {
        self.cell.listener_count()
    }

    /// Register a cleanup hook, run exactly once at disposal.
    pub fn on_dispose<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.cell.on_dispose(callback);
    }

    /// Tear the cell down, severing its back-links from every source.
    pub fn dispose(&self) {
        self.cell.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.cell.is_disposed()
    }

    /// Non-owning handle to the underlying cell.
    pub fn downgrade(&self) -> WeakStateCell<T> {
        self.cell.downgrade()
    }
}

impl<T> Clone for DerivedCell<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
        }
    }
}

impl<T> PartialEq for DerivedCell<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn eq(&self, other: &Self) -> bool {
        self.cell == other.cell
    }
}

impl<T> Eq for DerivedCell<T> where T: Clone + PartialEq + Send + Sync + 'static {}

impl<T> Debug for DerivedCell<T>
where
    T: Clone + PartialEq + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedCell")
            .field("id", &self.id())
            .field("value", &self.get())
            .field("listener_count", &self.listener_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl<T> SourceCell for DerivedCell<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn node(&self) -> Arc<dyn ReactiveNode> {
        self.cell.node()
    }
}

/// Builder for [`DerivedCell`].
pub struct DerivedCellBuilder<'a, T, F>
where
    T: Clone + PartialEq + Send + Sync + 'static,
    F: Fn() -> T + Send + Sync + 'static,
{
    compute: F,
    sources: &'a [&'a dyn SourceCell],
    id: Option<String>,
    auto_dispose: bool,
    dispose_timeout: Option<Duration>,
    config: RuntimeConfig,
}

impl<'a, T, F> DerivedCellBuilder<'a, T, F>
where
    T: Clone + PartialEq + Send + Sync + 'static,
    F: Fn() -> T + Send + Sync + 'static,
{
    /// Stable identity for diagnostics and graph keying.
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Dispose automatically once the last listener leaves.
    pub fn auto_dispose(mut self, enabled: bool) -> Self {
        self.auto_dispose = enabled;
        self
    }

    /// Timeout before an unobserved auto-disposing cell tears down.
    pub fn dispose_timeout(mut self, timeout: Duration) -> Self {
        self.dispose_timeout = Some(timeout);
        self
    }

    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Seed the value, check the graph for cycles, then link both
    /// directions.
    ///
    /// Fails before any existing cell is touched: the cycle walk runs over
    /// every proposed source before the first link is installed.
    pub fn build(self) -> Result<DerivedCell<T>, StateError> {
        let id = self.id.unwrap_or_else(crate::cell::container::next_cell_id);

        for source in self.sources {
            let node = source.node();
            let mut visited = HashSet::new();
            if reaches(&node, &id, &mut visited) {
                return Err(StateError::CircularDependency {
                    dependent: id,
                    source: node.node_id().to_string(),
                });
            }
        }

        let initial = (self.compute)();
        let inner = CellInner::create(
            initial,
            Some(Box::new(self.compute)),
            Some(id),
            self.auto_dispose,
            self.dispose_timeout,
            self.config,
        );

        let self_node: Arc<dyn ReactiveNode> = inner.clone();
        let self_weak = Arc::downgrade(&self_node);
        for source in self.sources {
            let node = source.node();
            node.add_dependent(inner.id(), self_weak.clone());
            inner.add_dependency(node.node_id().to_string(), Arc::downgrade(&node));
        }

        Ok(DerivedCell {
            cell: StateCell::from_inner(inner),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[test]
    fn computes_eagerly_and_tracks_source() {
        let count = StateCell::new(2);
        let doubled = DerivedCell::new(
            {
                let count = count.clone();
                move || count.get() * 2
            },
            &[&count],
        )
        .unwrap();

        assert_eq!(doubled.get(), 4);

        count.set(5).unwrap();
        assert_eq!(doubled.get(), 10);
    }

    #[test]
    fn recomputes_transitively_through_a_chain() {
        let base = StateCell::new(1);
        let plus_one = DerivedCell::new(
            {
                let base = base.clone();
                move || base.get() + 1
            },
            &[&base],
        )
        .unwrap();
        let doubled = DerivedCell::new(
            {
                let plus_one = plus_one.clone();
                move || plus_one.get() * 2
            },
            &[&plus_one],
        )
        .unwrap();
        let squared = DerivedCell::new(
            {
                let doubled = doubled.clone();
                move || doubled.get() * doubled.get()
            },
            &[&doubled],
        )
        .unwrap();

        assert_eq!(squared.get(), 16);

        base.set(4).unwrap();
        assert_eq!(plus_one.get(), 5);
        assert_eq!(doubled.get(), 10);
        assert_eq!(squared.get(), 100);
    }

    #[test]
    fn tracks_multiple_sources() {
        let first = StateCell::new(1);
        let second = StateCell::new(10);
        let sum = DerivedCell::new(
            {
                let first = first.clone();
                let second = second.clone();
                move || first.get() + second.get()
            },
            &[&first, &second],
        )
        .unwrap();

        assert_eq!(sum.get(), 11);

        first.set(2).unwrap();
        assert_eq!(sum.get(), 12);

        second.set(20).unwrap();
        assert_eq!(sum.get(), 22);
    }

    #[test]
    fn direct_mutation_is_rejected() {
        let source = StateCell::new(1);
        let derived = DerivedCell::builder(
            {
                let source = source.clone();
                move || source.get()
            },
            &[&source],
        )
        .id("total")
        .build()
        .unwrap();

        let err = derived.set(99).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("total"));
        assert!(message.contains("dependencies"));

        // The rejected write left no trace.
        assert_eq!(derived.get(), 1);

        assert!(derived.update(|v| v + 1).is_err());
        assert_eq!(derived.get(), 1);
    }

    #[test]
    fn cycle_by_id_is_rejected_at_construction() {
        let source = StateCell::builder(1).id("source").build();
        let derived = DerivedCell::builder(
            {
                let source = source.clone();
                move || source.get() + 1
            },
            &[&source],
        )
        .id("derived")
        .build()
        .unwrap();

        // A new cell claiming the id "source" while tracking "derived"
        // would close source -> derived -> source.
        let result = DerivedCell::builder(
            {
                let derived = derived.clone();
                move || derived.get()
            },
            &[&derived],
        )
        .id("source")
        .build();

        assert_eq!(
            result.unwrap_err(),
            StateError::CircularDependency {
                dependent: "source".to_string(),
                source: "derived".to_string(),
            }
        );

        // The existing graph still works.
        source.set(5).unwrap();
        assert_eq!(derived.get(), 6);
    }

    #[test]
    fn self_tracking_is_rejected() {
        let source = StateCell::builder(1).id("looped").build();

        let result = DerivedCell::builder(
            {
                let source = source.clone();
                move || source.get()
            },
            &[&source],
        )
        .id("looped")
        .build();

        assert!(matches!(
            result,
            Err(StateError::CircularDependency { .. })
        ));
    }

    #[test]
    fn unchanged_recomputation_does_not_cascade() {
        let source = StateCell::new(1);
        let clamped = DerivedCell::new(
            {
                let source = source.clone();
                move || source.get().min(10)
            },
            &[&source],
        )
        .unwrap();

        let calls = Arc::new(AtomicI32::new(0));
        let calls_clone = calls.clone();
        clamped.listen(move |_| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });

        source.set(5).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Both 20 and 30 clamp to 10: one notification, then silence.
        source.set(20).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        source.set(30).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn panicking_compute_keeps_last_good_value_and_siblings_run() {
        let source = StateCell::new(1);
        let fragile = DerivedCell::new(
            {
                let source = source.clone();
                move || {
                    let v = source.get();
                    if v > 5 {
                        panic!("compute fault");
                    }
                    v * 2
                }
            },
            &[&source],
        )
        .unwrap();

        let seen = Arc::new(AtomicI32::new(0));
        let seen_clone = seen.clone();
        source.listen(move |value| {
            seen_clone.store(*value, Ordering::SeqCst);
        });

        source.set(9).unwrap();

        // The derived value stalled, the direct listener did not.
        assert_eq!(fragile.get(), 2);
        assert_eq!(seen.load(Ordering::SeqCst), 9);
    }

    #[test]
    fn disposing_derived_unlinks_it_from_the_source() {
        let source = StateCell::new(1);
        let derived = DerivedCell::new(
            {
                let source = source.clone();
                move || source.get() * 2
            },
            &[&source],
        )
        .unwrap();

        derived.dispose();
        assert!(derived.is_disposed());

        // The source notifies without touching the disposed dependent.
        source.set(3).unwrap();
        assert_eq!(derived.get(), 2);
    }

    #[test]
    fn disposing_source_cascades_to_dependents() {
        let source = StateCell::new(1);
        let derived = DerivedCell::new(
            {
                let source = source.clone();
                move || source.get() * 2
            },
            &[&source],
        )
        .unwrap();

        source.dispose();
        assert!(derived.is_disposed());
    }

    #[test]
    fn derived_of_derived_cascades_on_root_disposal() {
        let root = StateCell::new(1);
        let middle = DerivedCell::new(
            {
                let root = root.clone();
                move || root.get() + 1
            },
            &[&root],
        )
        .unwrap();
        let leaf = DerivedCell::new(
            {
                let middle = middle.clone();
                move || middle.get() + 1
            },
            &[&middle],
        )
        .unwrap();

        root.dispose();
        assert!(middle.is_disposed());
        assert!(leaf.is_disposed());
    }
}
