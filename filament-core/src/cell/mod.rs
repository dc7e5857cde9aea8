//! Reactive cells.
//!
//! This module implements the reactive engine: plain cells, derived cells,
//! and async cells.
//!
//! # Concepts
//!
//! ## State cells
//!
//! A [`StateCell`] holds one mutable value and notifies registered listeners
//! when it changes. Listener count doubles as a reference count driving
//! optional auto-disposal.
//!
//! ## Derived cells
//!
//! A [`DerivedCell`] computes its value from other cells. It recomputes
//! synchronously when any source notifies and rejects direct writes. The
//! dependency graph is checked for cycles at construction and linked with
//! non-owning references in both directions.
//!
//! ## Async cells
//!
//! An [`AsyncCell`] holds an [`AsyncState`] and runs one logical operation
//! at a time. Cancellation is observational: a monotonic generation counter
//! decides whether a completing operation may commit, and superseded results
//! are discarded silently.

mod async_cell;
mod async_state;
mod container;
mod derived;
mod listener;

pub use async_cell::{AsyncCell, AsyncCellBuilder, WeakAsyncCell};
pub use async_state::{AsyncState, OpError};
pub use container::{
    ReactiveNode, SourceCell, StateCell, StateCellBuilder, WeakStateCell,
};
pub use derived::{DerivedCell, DerivedCellBuilder};
pub use listener::ListenerId;
