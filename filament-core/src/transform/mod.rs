//! Transform operators: build one cell from another.
//!
//! Every operator here follows the same recipe:
//!
//! 1. Create a result cell seeded from the source's current state (or idle
//!    for async combinators).
//! 2. Register a listener on the source(s) under a held [`ListenerId`].
//! 3. On the **result's** dispose hook: remove that listener from the
//!    source(s) and abort any timer the transform owns.
//! 4. On the **source's** dispose hook: dispose the result.
//!
//! Steps 3 and 4 are the load-bearing part. Omitting either leaves a
//! dangling listener retaining cells that should be collectible, or a
//! disposed source feeding a derived cell that is silently frozen. The hooks
//! hold only `Weak` handles, so neither side keeps the other alive.
//!
//! A panic inside a transform's mapper/predicate is contained by the
//! notification fan-out: pure transforms keep the result's last good value,
//! async transforms surface failures as the result's error state.
//!
//! Timer-owning operators (debounce, TTL cache) and the async combinators
//! spawn onto the ambient Tokio runtime.

mod async_ops;
mod time;
mod value;

pub use async_ops::{
    cached, chain, combine_async, computed_async, debounce_async, execute_with_retry, map_async,
};
pub use time::{debounce, throttle};
pub use value::{combine, filter, map};

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::cell::{ListenerId, StateCell};

/// Single-slot holder for a transform-owned timer task.
///
/// Replacing the slot aborts the previous task, so at most one timer per
/// transform is ever pending.
#[derive(Clone)]
pub(crate) struct TimerSlot {
    handle: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl TimerSlot {
    pub(crate) fn new() -> Self {
        Self {
            handle: Arc::new(Mutex::new(None)),
        }
    }

    pub(crate) fn replace(&self, handle: JoinHandle<()>) {
        if let Some(previous) = self.handle.lock().replace(handle) {
            previous.abort();
        }
    }

    pub(crate) fn abort(&self) {
        if let Some(handle) = self.handle.lock().take() {
            handle.abort();
        }
    }
}

/// Install the bidirectional disposal hooks of the transform recipe.
pub(crate) fn link_lifecycles<S, R>(
    source: &StateCell<S>,
    result: &StateCell<R>,
    listener: ListenerId,
    timer: Option<TimerSlot>,
) where
    S: Clone + PartialEq + Send + Sync + 'static,
    R: Clone + PartialEq + Send + Sync + 'static,
{
    let weak_source = source.downgrade();
    result.on_dispose(move || {
        if let Some(source) = weak_source.upgrade() {
            source.unsubscribe(listener);
        }
        if let Some(timer) = timer {
            timer.abort();
        }
    });

    let weak_result = result.downgrade();
    source.on_dispose(move || {
        if let Some(result) = weak_result.upgrade() {
            result.dispose();
        }
    });
}
