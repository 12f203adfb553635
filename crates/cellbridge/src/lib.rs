#![forbid(unsafe_code)]

//! Bridges between two reactive state models: the cell graph
//! ([`cellbridge_graph`]) and tracked mutable state ([`cellbridge_track`]).
//!
//! Application code holds one mutable tree or one cell value; the bridges
//! keep both models consistent with no manual synchronization:
//!
//! - [`snapshot_bridge`]: projects a [`TrackedObject`] as a read/write cell
//!   of immutable snapshots. Reads see the latest observed snapshot; writes
//!   run a deep structural diff and mutate the tracked tree minimally and
//!   in place ([`apply_changes`]).
//! - [`mutable_cell`]: exposes an initial value as a cell yielding a
//!   stable, mutation-trackable `{ value }` wrapper ([`WrapperView`]),
//!   notifying subscribers once per accepted write and suppressing the echo
//!   between the two models.
//!
//! Both constructors are pure: no I/O, no ambient store, one bridge per
//! logical piece of state. The returned handles behave like any other cell
//! toward the surrounding reactive system.

pub mod diff;
pub mod mutable_cell;
pub mod snapshot_bridge;

pub use diff::apply_changes;
pub use mutable_cell::{
    MutableCellOptions, ProxyFn, RejectedWrite, WrapperView, mutable_cell,
};
pub use snapshot_bridge::{SnapshotBridgeOptions, SnapshotUpdate, snapshot_bridge};

pub use cellbridge_graph::{
    Cell, CellId, CellSetter, CellSubscription, DerivedCell, ReadCtx, Readable, Store, Unmount,
    WeakStore, WriteCtx,
};
pub use cellbridge_track::{
    PathSeg, ScalarWrapper, Scheduler, Snapshot, TrackSubscription, TrackedObject,
    WrapperSubscription,
};

/// Re-exported runtime crates for callers that need the full module paths.
pub use cellbridge_graph as graph;
pub use cellbridge_track as track;
