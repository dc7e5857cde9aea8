//! Listener identities and the isolated fan-out registry.
//!
//! A listener is addressed by a caller-held [`ListenerId`], which is what
//! makes later removal possible: the id, not the closure, is the identity.
//! Registering an id that is already present is a no-op, as is removing one
//! that is absent.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use smallvec::SmallVec;

/// Unique identity for a registered listener.
///
/// Generated from an atomic counter so ids are unique across threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Generate a new unique listener id.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ListenerId {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) type ListenerFn<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Ordered, de-duplicating registry of value-change callbacks.
pub(crate) struct ListenerSet<T> {
    entries: SmallVec<[(ListenerId, ListenerFn<T>); 4]>,
}

impl<T> ListenerSet<T> {
    pub(crate) fn new() -> Self {
        Self {
            entries: SmallVec::new(),
        }
    }

    /// Returns false (and changes nothing) when the id is already registered.
    pub(crate) fn insert(&mut self, id: ListenerId, listener: ListenerFn<T>) -> bool {
        if self.entries.iter().any(|(existing, _)| *existing == id) {
            return false;
        }
        self.entries.push((id, listener));
        true
    }

    /// Returns false when the id was not registered.
    pub(crate) fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(existing, _)| *existing != id);
        self.entries.len() != before
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    /// Callbacks in registration order, cloned out so no lock is held while
    /// they run.
    pub(crate) fn snapshot(&self) -> SmallVec<[ListenerFn<T>; 4]> {
        self.entries
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect()
    }
}

/// Invoke one callback, containing any panic it raises.
///
/// A fault in one listener must never starve the listeners registered after
/// it, so the worst outcome here is a `warn` event when debug is on.
pub(crate) fn invoke_isolated<T>(
    debug: bool,
    cell_id: &str,
    listener: &(dyn Fn(&T) + Send + Sync),
    value: &T,
) {
    if catch_unwind(AssertUnwindSafe(|| listener(value))).is_err() && debug {
        tracing::warn!(
            cell = %cell_id,
            "listener panicked during notification; remaining listeners unaffected"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI32;

    #[test]
    fn listener_ids_are_unique() {
        let a = ListenerId::new();
        let b = ListenerId::new();
        let c = ListenerId::new();

        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_ne!(a, c);
    }

    #[test]
    fn duplicate_insert_is_a_noop() {
        let mut set: ListenerSet<i32> = ListenerSet::new();
        let id = ListenerId::new();

        assert!(set.insert(id, Arc::new(|_| {})));
        assert!(!set.insert(id, Arc::new(|_| {})));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn remove_absent_is_a_noop() {
        let mut set: ListenerSet<i32> = ListenerSet::new();

        assert!(!set.remove(ListenerId::new()));
        assert_eq!(set.len(), 0);
    }

    #[test]
    fn snapshot_preserves_registration_order() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut set: ListenerSet<i32> = ListenerSet::new();

        for tag in ["first", "second", "third"] {
            let order = order.clone();
            set.insert(
                ListenerId::new(),
                Arc::new(move |_| order.lock().unwrap().push(tag)),
            );
        }

        for listener in set.snapshot() {
            listener(&0);
        }

        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn invoke_isolated_contains_panics() {
        let hits = Arc::new(AtomicI32::new(0));
        let hits_clone = hits.clone();

        let panicking: ListenerFn<i32> = Arc::new(|_| panic!("listener fault"));
        let counting: ListenerFn<i32> = Arc::new(move |_| {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        });

        invoke_isolated(false, "cell-0", panicking.as_ref(), &1);
        invoke_isolated(false, "cell-0", counting.as_ref(), &1);

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
