//! The tagged state carried by async cells, plus the shared operation error.
//!
//! [`AsyncState`] models the full lifecycle of one logical operation:
//! `Idle` before anything ran, `Loading` while in flight (optionally showing
//! the last good data as stale), then `Success` or `Error`. The
//! [`when`](AsyncState::when) / [`maybe_when`](AsyncState::maybe_when)
//! helpers give callers total and partial pattern matching without exposing
//! the enum layout at every call site.

use std::error::Error;
use std::fmt::{self, Debug, Display};
use std::sync::Arc;

/// Cheaply cloneable, shareable operation error.
///
/// Async state is cloned on every read, so the underlying error lives behind
/// an `Arc`. Equality is pointer identity: two `OpError`s are equal only when
/// they share the same underlying error object, which is exactly the
/// de-duplication an error state needs (deep equality over arbitrary error
/// types does not exist).
#[derive(Clone)]
pub struct OpError {
    inner: Arc<dyn Error + Send + Sync>,
}

impl OpError {
    /// Wrap any error type.
    pub fn new<E>(error: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(error),
        }
    }

    /// Build an error from a bare message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(MessageError(message.into())),
        }
    }

    /// Borrow the underlying error.
    pub fn get_ref(&self) -> &(dyn Error + Send + Sync + 'static) {
        self.inner.as_ref()
    }

    /// The error and its source chain, one frame per line.
    ///
    /// This is the diagnostic trace surfaced alongside the error state.
    pub fn trace(&self) -> String {
        let mut out = self.inner.to_string();
        let mut source = self.inner.source();
        while let Some(cause) = source {
            out.push_str("\ncaused by: ");
            out.push_str(&cause.to_string());
            source = cause.source();
        }
        out
    }
}

impl PartialEq for OpError {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for OpError {}

impl Display for OpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.inner, f)
    }
}

impl Debug for OpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Debug::fmt(&self.inner, f)
    }
}

impl From<String> for OpError {
    fn from(message: String) -> Self {
        Self::msg(message)
    }
}

impl From<&str> for OpError {
    fn from(message: &str) -> Self {
        Self::msg(message)
    }
}

#[derive(Debug)]
struct MessageError(String);

impl Display for MessageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Error for MessageError {}

/// Lifecycle state of an async cell's current operation.
#[derive(Clone, Debug)]
pub enum AsyncState<T> {
    /// No operation has run (or the cell was cleared).
    Idle,

    /// An operation is in flight. `stale` carries the previous data when the
    /// caller asked to keep it visible.
    Loading { stale: Option<T> },

    /// The latest operation committed a value.
    Success { data: T },

    /// The latest operation failed. `stale` mirrors what `Loading` showed.
    Error { error: OpError, stale: Option<T> },
}

impl<T: PartialEq> PartialEq for AsyncState<T> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Idle, Self::Idle) => true,
            (Self::Loading { stale: a }, Self::Loading { stale: b }) => a == b,
            (Self::Success { data: a }, Self::Success { data: b }) => a == b,
            (
                Self::Error { error: ea, stale: sa },
                Self::Error { error: eb, stale: sb },
            ) => ea == eb && sa == sb,
            _ => false,
        }
    }
}

impl<T> AsyncState<T> {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Loading { .. })
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    /// Committed data, if any.
    pub fn data(&self) -> Option<&T> {
        match self {
            Self::Success { data } => Some(data),
            _ => None,
        }
    }

    /// Stale data shown while loading or after a failure.
    pub fn stale(&self) -> Option<&T> {
        match self {
            Self::Loading { stale } | Self::Error { stale, .. } => stale.as_ref(),
            _ => None,
        }
    }

    /// Committed data, falling back to stale data.
    pub fn data_or_stale(&self) -> Option<&T> {
        self.data().or_else(|| self.stale())
    }

    /// The failure, if any.
    pub fn error(&self) -> Option<&OpError> {
        match self {
            Self::Error { error, .. } => Some(error),
            _ => None,
        }
    }

    /// Total pattern match: exactly one branch runs.
    pub fn when<R>(
        &self,
        idle: impl FnOnce() -> R,
        loading: impl FnOnce(Option<&T>) -> R,
        success: impl FnOnce(&T) -> R,
        error: impl FnOnce(&OpError, Option<&T>) -> R,
    ) -> R {
        match self {
            Self::Idle => idle(),
            Self::Loading { stale } => loading(stale.as_ref()),
            Self::Success { data } => success(data),
            Self::Error { error: e, stale } => error(e, stale.as_ref()),
        }
    }

    /// Partial pattern match: absent branches fall through to `or_else`.
    pub fn maybe_when<R>(
        &self,
        idle: Option<&dyn Fn() -> R>,
        loading: Option<&dyn Fn(Option<&T>) -> R>,
        success: Option<&dyn Fn(&T) -> R>,
        error: Option<&dyn Fn(&OpError, Option<&T>) -> R>,
        or_else: &dyn Fn() -> R,
    ) -> R {
        match self {
            Self::Idle => idle.map_or_else(or_else, |f| f()),
            Self::Loading { stale } => loading.map_or_else(or_else, |f| f(stale.as_ref())),
            Self::Success { data } => success.map_or_else(or_else, |f| f(data)),
            Self::Error { error: e, stale } => {
                error.map_or_else(or_else, |f| f(e, stale.as_ref()))
            }
        }
    }
}
