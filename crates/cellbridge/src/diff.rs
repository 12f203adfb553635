#![forbid(unsafe_code)]

//! Deep diff/patch: reconcile a tracked tree with a target snapshot using
//! the minimum set of in-place mutations.
//!
//! # Design
//!
//! [`apply_changes`] walks `prev` (a fresh snapshot of the tracked tree)
//! and `next` (the caller's replacement) together:
//!
//! - object vs object: keys absent from `next` are deleted; keys whose
//!   values are [`same`](Snapshot::same) are skipped; everything else
//!   recurses.
//! - array vs array: shared indices recurse the same way, appended indices
//!   are assigned, and a shorter `next` truncates the tracked array last.
//! - any other shape pairing assigns `next` wholesale at the current path.
//!
//! Because `prev` is always captured from the tracked tree at call time,
//! the walk's picture of the live structure is exact, and the recursion can
//! rely on it.
//!
//! The strategy is last-writer-wins between two snapshots of the same tree
//! — there is no three-way merge. Subtrees the walk skips keep their node
//! identity, so downstream consumers that re-render per touched subtree do
//! the minimum work.
//!
//! # Invariants
//!
//! 1. After `apply_changes(t, snapshot(t), next)`, `snapshot(t)` is
//!    structurally equal to `next`.
//! 2. `apply_changes(t, s, s)` performs zero mutations.
//! 3. The walk itself never fails; unreachable assignments degrade to the
//!    tracked runtime's silent no-op semantics.

use cellbridge_track::{PathSeg, Snapshot, TrackedObject};

/// Mutate `target` in place so its tree becomes `next`, diffing against
/// `prev` to touch as little as possible.
///
/// `prev` should be a fresh snapshot of `target`; stale `prev` values skew
/// the diff toward larger (but still last-writer-wins) assignments.
pub fn apply_changes(target: &TrackedObject, prev: &Snapshot, next: &Snapshot) {
    let mut path = Vec::new();
    apply_at(target, &mut path, prev, next);
}

fn apply_at(target: &TrackedObject, path: &mut Vec<PathSeg>, prev: &Snapshot, next: &Snapshot) {
    match (prev, next) {
        (Snapshot::Object(prev_map), Snapshot::Object(next_map)) => {
            for (key, prev_value) in prev_map.iter() {
                match next_map.get(key) {
                    None => {
                        path.push(PathSeg::Key(key.clone()));
                        target.remove(path);
                        path.pop();
                    }
                    Some(next_value) if prev_value.same(next_value) => {}
                    Some(next_value) => {
                        path.push(PathSeg::Key(key.clone()));
                        apply_at(target, path, prev_value, next_value);
                        path.pop();
                    }
                }
            }
            for (key, next_value) in next_map.iter() {
                if !prev_map.contains_key(key) {
                    path.push(PathSeg::Key(key.clone()));
                    target.set(path, next_value.clone());
                    path.pop();
                }
            }
        }
        (Snapshot::Array(prev_vec), Snapshot::Array(next_vec)) => {
            for (index, (prev_value, next_value)) in
                prev_vec.iter().zip(next_vec.iter()).enumerate()
            {
                if prev_value.same(next_value) {
                    continue;
                }
                path.push(PathSeg::Index(index));
                apply_at(target, path, prev_value, next_value);
                path.pop();
            }
            for index in prev_vec.len()..next_vec.len() {
                if let Some(next_value) = next_vec.get(index) {
                    path.push(PathSeg::Index(index));
                    target.set(path, next_value.clone());
                    path.pop();
                }
            }
            if next_vec.len() < prev_vec.len() {
                target.truncate(path, next_vec.len());
            }
        }
        // Shape mismatch or scalar leaf: assign wholesale. The tracked
        // runtime drops the write silently if nothing actually changes.
        _ => {
            target.set(path, next.clone());
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
