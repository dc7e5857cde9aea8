//! Async cells: one logical operation at a time, latest request wins.
//!
//! An [`AsyncCell`] is a [`StateCell`] holding an
//! [`AsyncState`](crate::cell::AsyncState), plus the machinery to run
//! operations against it: a monotonic generation counter for cancellation, a
//! pre-loading snapshot for `cancel()`, and a stored operation for
//! `refresh()`.
//!
//! # Cancellation model
//!
//! The cell never aborts an in-flight future. Instead every `execute`,
//! `cancel`, and `clear` bumps the generation, and a completing operation
//! commits its result only if the generation it started with is still
//! current. "Is this still the operation I care about" is an integer
//! comparison, and no cooperation is required from the user's future, a
//! property most operations (network calls, file reads) cannot offer.
//!
//! A superseded completion is expected control flow: it is discarded with no
//! notification and no log line.
//!
//! # Caller vs. container
//!
//! `execute` always returns the true outcome of *that* call to its caller,
//! committed or not. Only the cell's externally visible state is subject to
//! latest-wins.

use std::fmt::{self, Debug};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;

use crate::cell::async_state::{AsyncState, OpError};
use crate::cell::container::{CellInner, ReactiveNode, SourceCell, StateCell};
use crate::cell::listener::ListenerId;
use crate::config::RuntimeConfig;

type StoredOp<T> = Arc<dyn Fn() -> BoxFuture<'static, Result<T, OpError>> + Send + Sync>;

struct OpMachine<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    generation: AtomicU64,
    /// Snapshot taken right before entering `Loading`; restored by `cancel`.
    pre_loading: Mutex<Option<AsyncState<T>>>,
    /// Operation remembered by `execute_and_store`, with its
    /// keep-previous-data flag, re-run by `refresh`.
    last_operation: Mutex<Option<(StoredOp<T>, bool)>>,
}

impl<T> OpMachine<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn new() -> Self {
        Self {
            generation: AtomicU64::new(0),
            pre_loading: Mutex::new(None),
            last_operation: Mutex::new(None),
        }
    }

    fn bump(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn current(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}

/// A cell running asynchronous operations with an idle/loading/success/error
/// lifecycle.
///
/// `Clone` produces another handle to the same cell.
pub struct AsyncCell<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    cell: StateCell<AsyncState<T>>,
    ops: Arc<OpMachine<T>>,
}

impl<T> AsyncCell<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Create an idle cell with default options.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Start building a cell with explicit id, auto-dispose, or config.
    pub fn builder() -> AsyncCellBuilder<T> {
        AsyncCellBuilder {
            id: None,
            auto_dispose: false,
            dispose_timeout: None,
            config: RuntimeConfig::default(),
            _marker: std::marker::PhantomData,
        }
    }

    /// The cell's stable id.
    pub fn id(&self) -> &str {
        self.cell.id()
    }

    /// Current lifecycle state, cloned out.
    pub fn state(&self) -> AsyncState<T> {
        self.cell.get()
    }

    /// Read the current state by reference without cloning.
    pub fn with_state<R>(&self, f: impl FnOnce(&AsyncState<T>) -> R) -> R {
        self.cell.with(f)
    }

    /// Generation of the most recent `execute`/`cancel`/`clear`.
    pub fn generation(&self) -> u64 {
        self.ops.current()
    }

    /// The plain cell carrying the state; transform plumbing only.
    pub(crate) fn base(&self) -> &StateCell<AsyncState<T>> {
        &self.cell
    }

    /// Direct state write bypassing the operation pipeline.
    pub(crate) fn set_state(&self, state: AsyncState<T>) {
        self.cell.force_set(state);
    }

    /// Run one operation through the cell.
    ///
    /// Captures the pre-loading snapshot, bumps the generation, enters
    /// `Loading` (carrying the previous data as stale when `keep_previous`),
    /// then awaits `op()`. The outcome is committed only if no newer
    /// `execute`/`cancel`/`clear` intervened; it is returned to the caller
    /// either way, and a failure is both stored and re-thrown.
    pub async fn execute<F, Fut>(&self, op: F, keep_previous: bool) -> Result<T, OpError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, OpError>>,
    {
        let (generation, stale) = self.begin(keep_previous);
        let outcome = op().await;
        self.finish(generation, stale, &outcome);
        outcome
    }

    /// Same as [`execute`](Self::execute), remembering the operation so
    /// [`refresh`](Self::refresh) can re-run it later.
    pub async fn execute_and_store<F, Fut>(&self, op: F, keep_previous: bool) -> Result<T, OpError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, OpError>> + Send + 'static,
    {
        let stored: StoredOp<T> =
            Arc::new(move || Box::pin(op()) as BoxFuture<'static, Result<T, OpError>>);
        *self.ops.last_operation.lock() = Some((stored.clone(), keep_previous));
        self.execute(move || stored(), keep_previous).await
    }

    /// Re-run the operation remembered by
    /// [`execute_and_store`](Self::execute_and_store).
    ///
    /// Returns `None` (and changes nothing) when no operation is stored.
    pub async fn refresh(&self) -> Option<Result<T, OpError>> {
        let (op, keep_previous) = self.ops.last_operation.lock().clone()?;
        Some(self.execute(move || op(), keep_previous).await)
    }

    /// Invalidate any in-flight operation and restore the pre-loading state.
    ///
    /// The in-flight future keeps running; its completion is discarded by
    /// the generation check. When the cell is not `Loading` the state is
    /// left untouched.
    pub fn cancel(&self) {
        self.ops.bump();
        if self.cell.with(AsyncState::is_loading) {
            if let Some(previous) = self.ops.pre_loading.lock().take() {
                self.set_state(previous);
            }
        }
    }

    /// Invalidate any in-flight operation and reset to `Idle`.
    pub fn clear(&self) {
        self.ops.bump();
        *self.ops.pre_loading.lock() = None;
        self.set_state(AsyncState::Idle);
    }

    /// Inject a success directly, e.g. for optimistic updates.
    ///
    /// Does not touch the generation: an in-flight operation will still
    /// commit over this when it completes.
    pub fn set_data(&self, data: T) {
        self.set_state(AsyncState::Success { data });
    }

    /// Inject a failure directly. Does not touch the generation.
    pub fn set_error(&self, error: OpError) {
        self.set_state(AsyncState::Error { error, stale: None });
    }

    /// Register a listener under a caller-held id.
    pub fn subscribe<F>(&self, id: ListenerId, listener: F)
    where
        F: Fn(&AsyncState<T>) + Send + Sync + 'static,
    {
        self.cell.subscribe(id, listener);
    }

    /// Register a listener under a freshly generated id and return it.
    pub fn listen<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&AsyncState<T>) + Send + Sync + 'static,
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

    /// Cancel any in-flight operation, then tear the cell down.
    pub fn dispose(&self) {
        self.cancel();
        self.cell.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.cell.is_disposed()
    }

    /// Non-owning handle for lifecycle hooks and timers.
    pub fn downgrade(&self) -> WeakAsyncCell<T> {
        WeakAsyncCell {
            cell: Arc::downgrade(self.cell.inner()),
            ops: Arc::downgrade(&self.ops),
        }
    }

    fn begin(&self, keep_previous: bool) -> (u64, Option<T>) {
        let current = self.state();
        let stale = if keep_previous {
            current.data_or_stale().cloned()
        } else {
            None
        };
        *self.ops.pre_loading.lock() = Some(current);
        let generation = self.ops.bump();
        self.set_state(AsyncState::Loading {
            stale: stale.clone(),
        });
        (generation, stale)
    }

    fn finish(&self, generation: u64, stale: Option<T>, outcome: &Result<T, OpError>) {
        if self.ops.current() != generation {
            // Superseded: discarding is expected control flow.
            return;
        }
        *self.ops.pre_loading.lock() = None;
        match outcome {
            Ok(data) => self.set_state(AsyncState::Success { data: data.clone() }),
            Err(error) => self.set_state(AsyncState::Error {
                error: error.clone(),
                stale,
            }),
        }
    }
}

impl<T> Default for AsyncCell<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for AsyncCell<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
            ops: Arc::clone(&self.ops),
        }
    }
}

impl<T> PartialEq for AsyncCell<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn eq(&self, other: &Self) -> bool {
        self.cell == other.cell
    }
}

impl<T> Eq for AsyncCell<T> where T: Clone + PartialEq + Send + Sync + 'static {}

impl<T> Debug for AsyncCell<T>
where
    T: Clone + PartialEq + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncCell")
            .field("id", &self.id())
            .field("state", &self.state())
            .field("generation", &self.generation())
            .finish()
    }
}

impl<T> SourceCell for AsyncCell<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn node(&self) -> Arc<dyn ReactiveNode> {
        self.cell.node()
    }
}

/// Non-owning handle to an [`AsyncCell`].
pub struct WeakAsyncCell<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    cell: Weak<CellInner<AsyncState<T>>>,
    ops: Weak<OpMachine<T>>,
}

impl<T> WeakAsyncCell<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    pub fn upgrade(&self) -> Option<AsyncCell<T>> {
        Some(AsyncCell {
            cell: StateCell::from_inner(self.cell.upgrade()?),
            ops: self.ops.upgrade()?,
        })
    }
}

impl<T> Clone for WeakAsyncCell<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            cell: Weak::clone(&self.cell),
            ops: Weak::clone(&self.ops),
        }
    }
}

/// Builder for [`AsyncCell`].
pub struct AsyncCellBuilder<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    id: Option<String>,
    auto_dispose: bool,
    dispose_timeout: Option<Duration>,
    config: RuntimeConfig,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T> AsyncCellBuilder<T>
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

    pub fn build(self) -> AsyncCell<T> {
        let cell = StateCell::from_inner(CellInner::create(
            AsyncState::Idle,
            None,
            self.id,
            self.auto_dispose,
            self.dispose_timeout,
            self.config,
        ));
        AsyncCell {
            cell,
            ops: Arc::new(OpMachine::new()),
        }
    }
}
