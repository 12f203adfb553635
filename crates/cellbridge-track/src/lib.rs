#![forbid(unsafe_code)]

//! Tracked mutable state with structurally shared snapshots.
//!
//! This crate provides the mutable half of the cellbridge model:
//!
//! - [`Snapshot`]: an immutable, structurally shared value tree, with
//!   identity comparison ([`Snapshot::same`]) as the change-detection
//!   primitive.
//! - [`TrackedObject`]: a path-addressed mutable tree whose mutations are
//!   observable and whose snapshot capture is O(1).
//! - [`ScalarWrapper`]: a tracked single-field `{ value }` container for
//!   values of any type, with write stamps standing in for reference
//!   identity.
//! - [`Scheduler`]: the explicit single-threaded queue that deferred
//!   notifications coalesce on.
//!
//! Everything is single-threaded and callback-driven; no operation blocks.
//! Enable the `state-persistence` feature for JSON conversion of snapshot
//! trees.

pub mod scheduler;
pub mod tracked;
pub mod value;
pub mod wrapper;

#[cfg(feature = "state-persistence")]
pub mod persist;

pub use scheduler::Scheduler;
pub use tracked::{TrackSubscription, TrackedObject};
pub use value::{PathSeg, Snapshot};
pub use wrapper::{ScalarWrapper, WrapperSubscription};
