//! Filament Core
//!
//! This crate provides the reactive engine for the Filament framework.
//! It implements:
//!
//! - Reactive cells (state, derived, async)
//! - Non-owning dependency tracking with construction-time cycle detection
//! - An async operation state machine with generation-based cancellation
//! - Transform operators (map, filter, combine, chain, debounce, throttle,
//!   TTL cache, retry) built on one bidirectional-disposal recipe
//! - Keyed cell families and passive lifecycle diagnostics
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `cell`: the reactive engine (state, derived, and async cells)
//! - `transform`: operators deriving new cells from existing ones
//! - `family`: keyed arenas of lazily-created cells
//! - `config`: explicit runtime configuration (no ambient globals)
//! - `diagnostics`: passive lifecycle observation hooks
//! - `error`: the usage-error taxonomy
//!
//! # Example
//!
//! ```rust,ignore
//! use filament_core::{DerivedCell, StateCell};
//!
//! // Create a cell
//! let count = StateCell::new(0);
//!
//! // Create a derived value
//! let doubled = DerivedCell::new(
//!     {
//!         let count = count.clone();
//!         move || count.get() * 2
//!     },
//!     &[&count],
//! )?;
//!
//! // Observe changes
//! doubled.listen(|value| println!("doubled: {value}"));
//!
//! // Update the cell
//! count.set(5)?;
//! // Listener runs, prints: "doubled: 10"
//! ```
//!
//! # Concurrency model
//!
//! Cells assume a single logical thread of control (a current-thread Tokio
//! runtime). Mutation, notification, and recomputation run synchronously;
//! suspension happens only inside async cell operations, and cancellation is
//! observational rather than preemptive. Auto-dispose and the timer-owning
//! transforms spawn onto the ambient Tokio runtime.

pub mod cell;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod family;
pub mod transform;

pub use cell::{
    AsyncCell, AsyncState, DerivedCell, ListenerId, OpError, StateCell, WeakStateCell,
};
pub use config::RuntimeConfig;
pub use diagnostics::LifecycleObserver;
pub use error::StateError;
pub use family::{CellFamily, Disposable};
