#![forbid(unsafe_code)]

//! Cell-graph runtime: reactive storage units with derivation and
//! change notification.
//!
//! The model is a small, store-parametrized reactive graph:
//!
//! - [`Cell`]: a primitive storage description with an initial value, an
//!   equality policy for write suppression, and an optional mount hook.
//! - [`DerivedCell`]: a computation over other cells, optionally writable
//!   through an action-dispatch function.
//! - [`Store`]: owner of all cell state — cached values, dependency edges,
//!   subscriptions, mount lifecycle. Cells are descriptions; the same cell
//!   reads independently through different stores.
//!
//! Reads are lazy and memoized; writes eagerly refresh mounted dependents
//! and notify their subscribers. Everything is single-threaded.

pub mod cell;
pub mod store;

pub use cell::{Cell, CellId, CellSetter, DerivedCell, Readable, Unmount};
pub use store::{CellSubscription, ReadCtx, Store, WeakStore, WriteCtx};
