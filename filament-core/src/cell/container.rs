//! The base reactive cell.
//!
//! A [`StateCell`] holds one current value and a set of change listeners.
//! Everything else in the crate builds on it: derived cells add a compute
//! function, async cells store an [`AsyncState`](crate::cell::AsyncState),
//! and the transform operators wire cells together.
//!
//! # How cells work
//!
//! 1. `set` replaces the value (never mutates it in place) and, when the new
//!    value differs from the old, notifies observers.
//!
//! 2. Notification is ordered: derived cells tracking this one recompute
//!    first, then direct listeners run in registration order. Each callback
//!    is isolated, so one fault never starves the rest.
//!
//! 3. Listener count doubles as the reference count. When it drops to zero
//!    on an auto-disposing cell, a timer is armed; adding a listener cancels
//!    it, letting cells survive the listener churn of overlapping UI
//!    lifecycles without leaking when they are truly abandoned.
//!
//! # Sharing
//!
//! `StateCell` is a handle: `Clone` shares the same cell. Dependency and
//! dependent links between cells are held as `Weak` references in both
//! directions, so the graph never keeps a cell alive and dead entries are
//! pruned during the next notification pass.
//!
//! # Threading
//!
//! The intended host is a single-threaded cooperative scheduler (a
//! current-thread Tokio runtime). The locks below exist for interior
//! mutability, not for concurrent mutation, and no lock is held while a user
//! callback runs; a listener may therefore call back into `set`.

use std::fmt::{self, Debug};
use std::hash::{Hash, Hasher};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use smallvec::SmallVec;

use crate::cell::listener::{self, ListenerFn, ListenerId, ListenerSet};
use crate::config::RuntimeConfig;
use crate::diagnostics;
use crate::error::StateError;

static CELL_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a fresh cell id for cells that did not supply one.
pub(crate) fn next_cell_id() -> String {
    format!("cell-{}", CELL_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
}

/// Type-erased view of a cell as a node in the dependency graph.
///
/// Sources hold `Weak<dyn ReactiveNode>` links to their dependents and push
/// recomputation through this trait without knowing the dependent's value
/// type or lifetime.
pub trait ReactiveNode: Send + Sync {
    /// The cell's stable id.
    fn node_id(&self) -> &str;

    /// Live direct dependencies (dead links are skipped).
    fn dependency_nodes(&self) -> Vec<Arc<dyn ReactiveNode>>;

    /// Re-run the compute function, if any. No-op for plain cells.
    fn recompute(&self);

    /// Dispose the cell behind this node.
    fn dispose_node(&self);

    /// Register a dependent. No-op when the id is already linked.
    fn add_dependent(&self, id: &str, dependent: Weak<dyn ReactiveNode>);

    /// Remove a dependent link by id. No-op when absent.
    fn remove_dependent(&self, id: &str);
}

/// Anything that can serve as the source of a derived cell.
///
/// Implemented by all three cell kinds, so a derived cell can track plain,
/// derived, and async cells uniformly.
pub trait SourceCell {
    /// The graph node behind this handle.
    fn node(&self) -> Arc<dyn ReactiveNode>;
}

type Links = SmallVec<[(String, Weak<dyn ReactiveNode>); 2]>;

#[derive(Default)]
struct BatchState {
    suspended: bool,
    coalesced: bool,
}

pub(crate) struct CellInner<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    id: String,
    config: RuntimeConfig,
    value: RwLock<T>,
    listeners: Mutex<ListenerSet<T>>,
    /// Present only on derived cells; doubles as the "is derived" flag.
    compute: Option<Box<dyn Fn() -> T + Send + Sync>>,
    /// Non-owning links to the cells this one reads from (derived cells).
    dependencies: Mutex<Links>,
    /// Non-owning links to the derived cells reading from this one.
    dependents: Mutex<Links>,
    dispose_callbacks: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
    disposed: AtomicBool,
    auto_dispose: bool,
    dispose_timeout: Option<Duration>,
    dispose_timer: Mutex<Option<tokio::task::JoinHandle<()>>>,
    batch: Mutex<BatchState>,
}

impl<T> CellInner<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    pub(crate) fn create(
        value: T,
        compute: Option<Box<dyn Fn() -> T + Send + Sync>>,
        id: Option<String>,
        auto_dispose: bool,
        dispose_timeout: Option<Duration>,
        config: RuntimeConfig,
    ) -> Arc<Self> {
        let inner = Arc::new(Self {
            id: id.unwrap_or_else(next_cell_id),
            config,
            value: RwLock::new(value),
            listeners: Mutex::new(ListenerSet::new()),
            compute,
            dependencies: Mutex::new(Links::new()),
            dependents: Mutex::new(Links::new()),
            dispose_callbacks: Mutex::new(Vec::new()),
            disposed: AtomicBool::new(false),
            auto_dispose,
            dispose_timeout,
            dispose_timer: Mutex::new(None),
            batch: Mutex::new(BatchState::default()),
        });
        diagnostics::emit_created(&inner.config, &inner.id);
        inner
    }

    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub(crate) fn is_derived(&self) -> bool {
        self.compute.is_some()
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    pub(crate) fn get(&self) -> T {
        self.value.read().clone()
    }

    pub(crate) fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.value.read())
    }

    pub(crate) fn listener_count(&self) -> usize {
        if self.is_disposed() {
            return 0;
        }
        self.listeners.lock().len()
    }

    /// Store and notify, bypassing the derived-cell mutation guard.
    ///
    /// The sole de-duplication rule: a value equal to the current one is
    /// dropped before any replacement or notification work happens.
    pub(crate) fn set_internal(&self, new_value: T) {
        {
            let mut value = self.value.write();
            if *value == new_value {
                return;
            }
            *value = new_value;
        }

        // Disposed cells keep accepting writes but notify no one.
        if self.is_disposed() {
            return;
        }

        {
            let mut batch = self.batch.lock();
            if batch.suspended {
                batch.coalesced = true;
                return;
            }
        }

        self.notify();
    }

    /// Fan out the current value: dependents first, then direct listeners.
    ///
    /// The cell's own value is already stored, so observers always read a
    /// consistent snapshot regardless of earlier callback failures.
    fn notify(&self) {
        diagnostics::emit_updated(&self.config, &self.id);

        let dependents: Vec<Arc<dyn ReactiveNode>> = {
            let mut links = self.dependents.lock();
            links.retain(|(_, weak)| weak.strong_count() > 0);
            links.iter().filter_map(|(_, weak)| weak.upgrade()).collect()
        };
        for dependent in dependents {
            // recompute() isolates its own compute faults.
            dependent.recompute();
        }

        let value = self.value.read().clone();
        let callbacks = self.listeners.lock().snapshot();
        for callback in callbacks {
            listener::invoke_isolated(self.config.debug, &self.id, callback.as_ref(), &value);
        }
    }

    pub(crate) fn subscribe(&self, id: ListenerId, listener: ListenerFn<T>) {
        if self.is_disposed() {
            return;
        }
        let added = self.listeners.lock().insert(id, listener);
        if added {
            self.cancel_dispose_timer();
        }
    }

    pub(crate) fn unsubscribe(this: &Arc<Self>, id: ListenerId) {
        if this.is_disposed() {
            return;
        }
        let (removed, remaining) = {
            let mut listeners = this.listeners.lock();
            (listeners.remove(id), listeners.len())
        };
        if removed && remaining == 0 && this.auto_dispose {
            Self::arm_dispose_timer(this);
        }
    }

    /// Arm the self-teardown timer. Requires a Tokio runtime.
    fn arm_dispose_timer(this: &Arc<Self>) {
        let timeout = this
            .dispose_timeout
            .unwrap_or(this.config.default_dispose_timeout);
        let weak = Arc::downgrade(this);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(inner) = weak.upgrade() {
                // A listener may have re-appeared while we slept.
                if inner.listeners.lock().len() == 0 {
                    inner.dispose();
                }
            }
        });
        if let Some(previous) = this.dispose_timer.lock().replace(handle) {
            previous.abort();
        }
    }

    fn cancel_dispose_timer(&self) {
        if let Some(handle) = self.dispose_timer.lock().take() {
            handle.abort();
        }
    }

    pub(crate) fn on_dispose(&self, callback: Box<dyn FnOnce() + Send>) {
        if self.is_disposed() {
            // Too late to defer: honor the hook immediately.
            let _ = catch_unwind(AssertUnwindSafe(callback));
            return;
        }
        self.dispose_callbacks.lock().push(callback);
    }

    /// Tear the cell down. Idempotent.
    pub(crate) fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel_dispose_timer();

        let callbacks: Vec<Box<dyn FnOnce() + Send>> =
            std::mem::take(&mut *self.dispose_callbacks.lock());
        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(callback)).is_err() && self.config.debug {
                tracing::warn!(cell = %self.id, "dispose callback panicked");
            }
        }

        self.listeners.lock().clear();

        // Sever our back-link from every source so it never iterates a
        // dangling entry.
        let dependencies: Links = std::mem::take(&mut *self.dependencies.lock());
        for (_, weak) in dependencies {
            if let Some(source) = weak.upgrade() {
                source.remove_dependent(&self.id);
            }
        }

        // A source going away takes its live dependents with it.
        let dependents: Links = std::mem::take(&mut *self.dependents.lock());
        for (_, weak) in dependents {
            if let Some(dependent) = weak.upgrade() {
                dependent.dispose_node();
            }
        }

        diagnostics::emit_disposed(&self.config, &self.id);
    }

    pub(crate) fn add_dependency(&self, id: String, source: Weak<dyn ReactiveNode>) {
        self.dependencies.lock().push((id, source));
    }
}

impl<T> ReactiveNode for CellInner<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn node_id(&self) -> &str {
        &self.id
    }

    fn dependency_nodes(&self) -> Vec<Arc<dyn ReactiveNode>> {
        self.dependencies
            .lock()
            .iter()
            .filter_map(|(_, weak)| weak.upgrade())
            .collect()
    }

    fn recompute(&self) {
        if self.is_disposed() {
            return;
        }
        let Some(compute) = &self.compute else {
            return;
        };
        match catch_unwind(AssertUnwindSafe(|| compute())) {
            // Feeds the normal set path, so an unchanged result does not
            // cascade further.
            Ok(value) => self.set_internal(value),
            Err(_) => {
                if self.config.debug {
                    tracing::warn!(
                        cell = %self.id,
                        "compute panicked during recomputation; keeping last good value"
                    );
                }
            }
        }
    }

    fn dispose_node(&self) {
        self.dispose();
    }

    fn add_dependent(&self, id: &str, dependent: Weak<dyn ReactiveNode>) {
        let mut links = self.dependents.lock();
        if links.iter().any(|(existing, _)| existing == id) {
            return;
        }
        links.push((id.to_string(), dependent));
    }

    fn remove_dependent(&self, id: &str) {
        self.dependents
            .lock()
            .retain(|(existing, _)| existing != id);
    }
}

/// The base reactive cell: one current value plus a set of change listeners.
///
/// `Clone` produces another handle to the same cell.
///
/// # Example
///
/// ```rust,ignore
/// let count = StateCell::new(0);
///
/// let id = count.listen(|value| println!("count is {value}"));
/// count.set(5)?;   // prints "count is 5"
/// count.unsubscribe(id);
/// ```
pub struct StateCell<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    inner: Arc<CellInner<T>>,
}

impl<T> StateCell<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Create a cell with default options.
    pub fn new(initial: T) -> Self {
        Self::builder(initial).build()
    }

    /// Start building a cell with explicit id, auto-dispose, or config.
    pub fn builder(initial: T) -> StateCellBuilder<T> {
        StateCellBuilder {
            initial,
            id: None,
            auto_dispose: false,
            dispose_timeout: None,
            config: RuntimeConfig::default(),
        }
    }

    pub(crate) fn from_inner(inner: Arc<CellInner<T>>) -> Self {
        Self { inner }
    }

    pub(crate) fn inner(&self) -> &Arc<CellInner<T>> {
        &self.inner
    }

    pub(crate) fn config(&self) -> &RuntimeConfig {
        self.inner.config()
    }

    /// The cell's stable id. Handle equality and hashing use it.
    pub fn id(&self) -> &str {
        self.inner.id()
    }

    /// Current value, cloned out.
    pub fn get(&self) -> T {
        self.inner.get()
    }

    /// Read the current value by reference without cloning.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.inner.with(f)
    }

    /// Replace the value and notify observers.
    ///
    /// Setting a value equal to the current one is a silent no-op. The only
    /// error is writing to a derived cell.
    pub fn set(&self, value: T) -> Result<(), StateError> {
        if self.inner.is_derived() {
            return Err(StateError::MutationOnDerived {
                id: self.inner.id().to_string(),
            });
        }
        self.inner.set_internal(value);
        Ok(())
    }

    /// `set(f(&current))`.
    pub fn update(&self, f: impl FnOnce(&T) -> T) -> Result<(), StateError> {
        let next = self.inner.with(|current| f(current));
        self.set(next)
    }

    /// Write without the derived-cell guard; transform plumbing only.
    pub(crate) fn force_set(&self, value: T) {
        self.inner.set_internal(value);
    }

    /// Register a listener under a caller-held id.
    ///
    /// Re-registering an id already present is a no-op. A successful add
    /// cancels any pending dispose timer.
    pub fn subscribe<F>(&self, id: ListenerId, listener: F)
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.inner.subscribe(id, Arc::new(listener));
    }

    /// Register a listener under a freshly generated id and return it.
    pub fn listen<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = ListenerId::new();
        self.subscribe(id, listener);
        id
    }

    /// Remove a listener. Absent ids are a silent no-op.
    ///
    /// When the last listener leaves an auto-disposing cell, the dispose
    /// timer is armed (cell timeout, falling back to the config default).
    pub fn unsubscribe(&self, id: ListenerId) {
        CellInner::unsubscribe(&self.inner, id);
    }

    /// Number of currently registered listeners; pinned at 0 after disposal.
    ///
    /// This is the cell's reference count for auto-dispose purposes.
    pub fn listener_count(&self) -> usize {
        self.inner.listener_count()
    }

    /// Run `f` with notification suspended.
    ///
    /// Multiple `set` calls inside coalesce into at most one notification
    /// carrying the final value. Single-level: nested batches share the
    /// outer flag.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        {
            let mut batch = self.inner.batch.lock();
            batch.suspended = true;
        }
        let out = f();
        let coalesced = {
            let mut batch = self.inner.batch.lock();
            batch.suspended = false;
            std::mem::take(&mut batch.coalesced)
        };
        if coalesced && !self.inner.is_disposed() {
            self.inner.notify();
        }
        out
    }

    /// Register a cleanup hook, run exactly once at disposal in
    /// registration order. On an already-disposed cell the hook runs
    /// immediately.
    pub fn on_dispose<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.on_dispose(Box::new(callback));
    }

    /// Tear the cell down. Idempotent; see the module docs for the exact
    /// sequence.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }

    /// Non-owning handle for lifecycle hooks and timers.
    pub fn downgrade(&self) -> WeakStateCell<T> {
        WeakStateCell {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

impl<T> Clone for StateCell<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> PartialEq for StateCell<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn eq(&self, other: &Self) -> bool {
        self.inner.id() == other.inner.id()
    }
}

impl<T> Eq for StateCell<T> where T: Clone + PartialEq + Send + Sync + 'static {}

impl<T> Hash for StateCell<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id().hash(state);
    }
}

impl<T> Debug for StateCell<T>
where
    T: Clone + PartialEq + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateCell")
            .field("id", &self.inner.id())
            .field("value", &self.inner.get())
            .field("listener_count", &self.inner.listener_count())
            .field("disposed", &self.inner.is_disposed())
            .finish()
    }
}

impl<T> SourceCell for StateCell<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn node(&self) -> Arc<dyn ReactiveNode> {
        self.inner.clone()
    }
}

/// Non-owning handle to a [`StateCell`].
pub struct WeakStateCell<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    inner: Weak<CellInner<T>>,
}

impl<T> WeakStateCell<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    pub fn upgrade(&self) -> Option<StateCell<T>> {
        self.inner.upgrade().map(StateCell::from_inner)
    }
}

impl<T> Clone for WeakStateCell<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Weak::clone(&self.inner),
        }
    }
}

/// Builder for [`StateCell`].
pub struct StateCellBuilder<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    initial: T,
    id: Option<String>,
    auto_dispose: bool,
    dispose_timeout: Option<Duration>,
    config: RuntimeConfig,
}

impl<T> StateCellBuilder<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
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

    pub fn build(self) -> StateCell<T> {
        StateCell::from_inner(CellInner::create(
            self.initial,
            None,
            self.id,
            self.auto_dispose,
            self.dispose_timeout,
            self.config,
        ))
    }
}
