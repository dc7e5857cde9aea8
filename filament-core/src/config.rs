//! Runtime configuration threaded through cell construction.
//!
//! There is no process-wide mutable state: every cell captures a
//! [`RuntimeConfig`] at construction (the builder default is
//! `RuntimeConfig::default()`), so two parts of an application can run with
//! different debug settings or dispose timeouts without interfering.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::diagnostics::LifecycleObserver;

/// Fallback applied when a cell enables auto-dispose without its own timeout.
pub const DEFAULT_DISPOSE_TIMEOUT: Duration = Duration::from_secs(30);

/// Construction-time configuration shared by every cell kind.
#[derive(Clone)]
pub struct RuntimeConfig {
    /// When set, isolated listener/compute faults are reported through
    /// `tracing` instead of being dropped silently.
    pub debug: bool,

    /// Timeout used by auto-disposing cells that did not specify their own.
    pub default_dispose_timeout: Duration,

    /// Optional passive observer of cell lifecycle events.
    pub observer: Option<Arc<dyn LifecycleObserver>>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            debug: false,
            default_dispose_timeout: DEFAULT_DISPOSE_TIMEOUT,
            observer: None,
        }
    }
}

impl fmt::Debug for RuntimeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeConfig")
            .field("debug", &self.debug)
            .field("default_dispose_timeout", &self.default_dispose_timeout)
            .field("observer", &self.observer.is_some())
            .finish()
    }
}
