//! Passive lifecycle diagnostics.
//!
//! An external registry (a devtools panel, a perf monitor) can observe cell
//! lifecycle events by installing a [`LifecycleObserver`] in the
//! [`RuntimeConfig`](crate::config::RuntimeConfig). The observer is strictly
//! one-way: the core calls into it and never reads anything back, and a
//! panicking observer is isolated exactly like a panicking listener.

use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::config::RuntimeConfig;

/// Hooks invoked by the core as cells move through their lifecycle.
///
/// All methods have empty default bodies so an observer only implements the
/// events it cares about.
pub trait LifecycleObserver: Send + Sync {
    /// A cell finished construction.
    fn cell_created(&self, _id: &str) {}

    /// A cell was disposed (explicitly or by its auto-dispose timer).
    fn cell_disposed(&self, _id: &str) {}

    /// A cell's value changed and its observers were notified.
    fn cell_updated(&self, _id: &str) {}
}

pub(crate) fn emit_created(config: &RuntimeConfig, id: &str) {
    if let Some(observer) = &config.observer {
        let _ = catch_unwind(AssertUnwindSafe(|| observer.cell_created(id)));
    }
    if config.debug {
        tracing::trace!(cell = %id, "cell created");
    }
}

pub(crate) fn emit_disposed(config: &RuntimeConfig, id: &str) {
    if let Some(observer) = &config.observer {
        let _ = catch_unwind(AssertUnwindSafe(|| observer.cell_disposed(id)));
    }
    if config.debug {
        tracing::trace!(cell = %id, "cell disposed");
    }
}

pub(crate) fn emit_updated(config: &RuntimeConfig, id: &str) {
    if let Some(observer) = &config.observer {
        let _ = catch_unwind(AssertUnwindSafe(|| observer.cell_updated(id)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

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

    #[test]
    fn observer_receives_lifecycle_events() {
        let observer = Arc::new(CountingObserver::default());
        let config = RuntimeConfig {
            observer: Some(observer.clone()),
            ..RuntimeConfig::default()
        };

        emit_created(&config, "a");
        emit_created(&config, "b");
        emit_disposed(&config, "a");

        assert_eq!(observer.created.load(Ordering::SeqCst), 2);
        assert_eq!(observer.disposed.load(Ordering::SeqCst), 1);
    }

    struct PanickingObserver;

    impl LifecycleObserver for PanickingObserver {
        fn cell_created(&self, _id: &str) {
            panic!("observer fault");
        }
    }

    #[test]
    fn panicking_observer_is_isolated() {
        let config = RuntimeConfig {
            observer: Some(Arc::new(PanickingObserver)),
            ..RuntimeConfig::default()
        };

        // Must not propagate into the core.
        emit_created(&config, "a");
    }
}
