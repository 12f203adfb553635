#![forbid(unsafe_code)]

//! One-directional bridge: a tracked tree projected into a cell of
//! immutable snapshots, with diff/patch write-back.
//!
//! # Design
//!
//! The bridge is a cell pair. A private base cell holds the latest observed
//! snapshot; its mount hook subscribes to the tracked tree, publishes an
//! immediate first snapshot (covering mutations between construction and
//! mount), and hands the subscription guard back as the unmount closure.
//! The public derived cell reads through to the base and implements writes
//! by diffing the caller's replacement against a **fresh** snapshot and
//! applying the difference onto the live tree in place.
//!
//! The base cell's value is always a snapshot that was actually captured
//! from the tracked tree — never synthesized. Re-publishing an identical
//! snapshot is suppressed by snapshot identity, so subscribers fire only on
//! structural change.
//!
//! Writes do not assume synchronous propagation back into the cell: the
//! mutation notifies the tracked tree's subscribers, and the base cell
//! republishes on that path — within the write call when the bridge was
//! built with `sync`, on the next scheduler drain otherwise.

use cellbridge_graph::{Cell, DerivedCell, Unmount};
use cellbridge_track::{Snapshot, TrackedObject};

use crate::diff::apply_changes;

/// Recognized options for [`snapshot_bridge`].
#[derive(Clone, Copy, Debug, Default)]
pub struct SnapshotBridgeOptions {
    /// Propagate tracked-tree mutations into the cell synchronously, within
    /// the mutating call, instead of coalescing them on the scheduler.
    pub sync: bool,
}

/// A write accepted by the bridge cell: a literal replacement snapshot or
/// an updater run against the current one.
pub enum SnapshotUpdate {
    Replace(Snapshot),
    With(Box<dyn FnOnce(Snapshot) -> Snapshot>),
}

impl SnapshotUpdate {
    /// An updater computed from the current snapshot.
    pub fn with(f: impl FnOnce(Snapshot) -> Snapshot + 'static) -> Self {
        Self::With(Box::new(f))
    }
}

impl From<Snapshot> for SnapshotUpdate {
    fn from(snapshot: Snapshot) -> Self {
        Self::Replace(snapshot)
    }
}

impl std::fmt::Debug for SnapshotUpdate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Replace(snapshot) => f.debug_tuple("Replace").field(snapshot).finish(),
            Self::With(_) => f.debug_tuple("With").finish_non_exhaustive(),
        }
    }
}

/// Project `tracked` as a read/write cell of immutable snapshots.
///
/// Reading yields the most recent observed snapshot. Writing diffs the
/// given replacement against the live tree and applies the minimal set of
/// in-place mutations; identity-stable subtrees stay stable.
pub fn snapshot_bridge(
    tracked: &TrackedObject,
    options: SnapshotBridgeOptions,
) -> DerivedCell<Snapshot, SnapshotUpdate> {
    let base = Cell::with_eq(tracked.snapshot(), |a: &Snapshot, b: &Snapshot| a.same(b))
        .labeled("snapshot-bridge-base")
        .mark_private();

    let sync = options.sync;
    {
        let tracked = tracked.clone();
        base.set_on_mount(move |setter| {
            let subscription = {
                let tracked = tracked.clone();
                let setter = setter.clone();
                tracked.clone().subscribe(
                    move || setter.set(tracked.snapshot()),
                    sync,
                )
            };
            // First publish covers anything mutated before this mount.
            setter.set(tracked.snapshot());
            tracing::debug!(sync, "snapshot bridge mounted");
            Some(Box::new(move || drop(subscription)) as Unmount)
        });
    }

    let read_base = base.clone();
    let write_base = base.clone();
    let write_tracked = tracked.clone();
    DerivedCell::writable(
        move |ctx| ctx.get(&read_base),
        move |ctx, update: SnapshotUpdate| {
            let next = match update {
                SnapshotUpdate::Replace(snapshot) => snapshot,
                SnapshotUpdate::With(f) => f(ctx.get(&write_base)),
            };
            // Diff against a fresh snapshot, not the cell's cached one.
            let prev = write_tracked.snapshot();
            apply_changes(&write_tracked, &prev, &next);
        },
    )
    .labeled("snapshot-bridge")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
