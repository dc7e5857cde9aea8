//! Usage errors raised by the reactive engine.
//!
//! Only two conditions fail loudly: writing to a derived cell and linking a
//! dependency that would close a cycle. Both indicate a programming mistake
//! at the call site, so they carry the offending cell ids in the message.
//! Everything else (duplicate subscribe, double dispose, absent unsubscribe)
//! is a silent no-op, because those are expected during overlapping UI
//! lifecycles.

use std::fmt;

/// Errors produced by cell construction and mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    /// A `set`/`update` was attempted on a derived cell.
    MutationOnDerived {
        /// Id of the derived cell that rejected the write.
        id: String,
    },

    /// Linking `dependent` to `source` would make the dependency graph cyclic.
    ///
    /// Raised at construction, before any link is installed.
    CircularDependency {
        /// Id of the cell being constructed.
        dependent: String,
        /// Id of the proposed source that closes the cycle.
        source: String,
    },
}

impl fmt::Display for StateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateError::MutationOnDerived { id } => write!(
                f,
                "cell `{id}` is derived and cannot be set directly; its value changes only through its dependencies"
            ),
            StateError::CircularDependency { dependent, source } => write!(
                f,
                "cell `{dependent}` cannot track `{source}`: the link would close a dependency cycle"
            ),
        }
    }
}

impl std::error::Error for StateError {}
