//! Keyed cell families: a map from key to lazily-created cell.
//!
//! A family is an arena-with-lookup: the first access for a key runs the
//! factory, later accesses return a handle to the same cell. Disposal is
//! per-key or bulk, in insertion order.

use std::hash::Hash;

use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::cell::{AsyncCell, DerivedCell, StateCell};

/// Handle to a cell that can be torn down.
///
/// The seam that lets [`CellFamily`] manage any cell kind uniformly.
pub trait Disposable {
    fn dispose(&self);
    fn is_disposed(&self) -> bool;
}

impl<T> Disposable for StateCell<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn dispose(&self) {
        StateCell::dispose(self);
    }

    fn is_disposed(&self) -> bool {
        StateCell::is_disposed(self)
    }
}

impl<T> Disposable for DerivedCell<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn dispose(&self) {
        DerivedCell::dispose(self);
    }

    fn is_disposed(&self) -> bool {
        DerivedCell::is_disposed(self)
    }
}

impl<T> Disposable for AsyncCell<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn dispose(&self) {
        AsyncCell::dispose(self);
    }

    fn is_disposed(&self) -> bool {
        AsyncCell::is_disposed(self)
    }
}

/// A map from key to lazily-created cell.
///
/// # Example
///
/// ```rust,ignore
/// let per_user: CellFamily<u64, StateCell<String>> =
///     CellFamily::new(|id| StateCell::builder(String::new()).id(format!("user-{id}")).build());
///
/// let alice = per_user.get(&1);
/// let same = per_user.get(&1);
/// assert_eq!(alice, same);
/// ```
pub struct CellFamily<K, C>
where
    K: Eq + Hash + Clone,
    C: Disposable + Clone,
{
    cells: Mutex<IndexMap<K, C>>,
    factory: Box<dyn Fn(&K) -> C + Send + Sync>,
}

impl<K, C> CellFamily<K, C>
where
    K: Eq + Hash + Clone,
    C: Disposable + Clone,
{
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn(&K) -> C + Send + Sync + 'static,
    {
        Self {
            cells: Mutex::new(IndexMap::new()),
            factory: Box::new(factory),
        }
    }

    /// The cell for `key`, created on first access.
    pub fn get(&self, key: &K) -> C {
        let mut cells = self.cells.lock();
        if let Some(cell) = cells.get(key) {
            return cell.clone();
        }
        let cell = (self.factory)(key);
        cells.insert(key.clone(), cell.clone());
        cell
    }

    pub fn contains(&self, key: &K) -> bool {
        self.cells.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.cells.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.lock().is_empty()
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> Vec<K> {
        self.cells.lock().keys().cloned().collect()
    }

    /// Dispose and drop the cell for `key`. Returns whether one existed.
    pub fn dispose_key(&self, key: &K) -> bool {
        let removed = self.cells.lock().shift_remove(key);
        match removed {
            Some(cell) => {
                cell.dispose();
                true
            }
            None => false,
        }
    }

    /// Dispose and drop every cell, in insertion order.
    pub fn dispose_all(&self) {
        let cells: IndexMap<K, C> = std::mem::take(&mut *self.cells.lock());
        for (_, cell) in cells {
            cell.dispose();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn string_family() -> CellFamily<u64, StateCell<String>> {
        CellFamily::new(|id| {
            StateCell::builder(String::new())
                .id(format!("user-{id}"))
                .build()
        })
    }

    #[test]
    fn get_creates_once_per_key() {
        let counter = Arc::new(AtomicUsize::new(0));
        let family: CellFamily<u32, StateCell<i32>> = CellFamily::new({
            let counter = counter.clone();
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                StateCell::new(0)
            }
        });

        let first = family.get(&1);
        let again = family.get(&1);
        let other = family.get(&2);

        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(first, again);
        assert_ne!(first, other);
        assert_eq!(family.len(), 2);
    }

    #[test]
    fn family_cells_share_state_across_lookups() {
        let family = string_family();

        family.get(&7).set("alice".to_string()).unwrap();
        assert_eq!(family.get(&7).get(), "alice");
    }

    #[test]
    fn dispose_key_tears_down_and_forgets() {
        let family = string_family();
        let cell = family.get(&1);

        assert!(family.dispose_key(&1));
        assert!(cell.is_disposed());
        assert!(!family.contains(&1));

        // Absent keys are a no-op.
        assert!(!family.dispose_key(&1));

        // A later lookup creates a fresh cell.
        let fresh = family.get(&1);
        assert!(!fresh.is_disposed());
    }

    #[test]
    fn dispose_all_walks_insertion_order() {
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let family = string_family();

        for key in [3u64, 1, 2] {
            let cell = family.get(&key);
            let order = order.clone();
            cell.on_dispose(move || order.lock().push(key));
        }

        family.dispose_all();
        assert!(family.is_empty());
        assert_eq!(*order.lock(), vec![3, 1, 2]);
    }
}
