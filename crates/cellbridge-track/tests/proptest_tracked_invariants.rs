//! Property-based invariants for the tracked-tree runtime. These must hold
//! for **any** tree shape and mutation:
//!
//! 1. Set-then-get round trip: a written leaf reads back identical.
//! 2. Sibling identity: writing one top-level key never rebuilds another.
//! 3. Snapshot identity tracks the version counter exactly: the snapshot
//!    changes identity iff a mutation changed the tree.

use cellbridge_track::{PathSeg, Snapshot, TrackedObject};
use proptest::prelude::*;

// ── Strategies ──────────────────────────────────────────────────────────

fn leaf_strategy() -> impl Strategy<Value = Snapshot> {
    prop_oneof![
        Just(Snapshot::Null),
        any::<bool>().prop_map(Snapshot::from),
        (-1_000i64..1_000).prop_map(Snapshot::from),
        "[a-z]{0,6}".prop_map(Snapshot::from),
    ]
}

fn tree_strategy() -> impl Strategy<Value = Snapshot> {
    leaf_strategy().prop_recursive(3, 16, 4, |inner| {
        prop_oneof![
            proptest::collection::vec(inner.clone(), 0..4).prop_map(Snapshot::array),
            proptest::collection::btree_map("[a-e]", inner, 0..4).prop_map(Snapshot::object),
        ]
    })
}

fn root_strategy() -> impl Strategy<Value = Snapshot> {
    proptest::collection::btree_map("[a-e]", tree_strategy(), 0..5).prop_map(Snapshot::object)
}

// ═════════════════════════════════════════════════════════════════════════
// 1. Set-then-get round trip
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn set_then_get_round_trip(root in root_strategy(), key in "[a-e]", value in tree_strategy()) {
        let tracked = TrackedObject::new(root);
        let path = [PathSeg::key(key)];

        tracked.set(&path, value.clone());
        let read_back = tracked.get(&path).expect("top-level key was just written");
        prop_assert!(
            read_back.same(&value),
            "written leaf must read back identical: {:?} vs {:?}",
            read_back,
            value
        );
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 2. Writing one key never rebuilds a sibling
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn sibling_keys_keep_identity(root in root_strategy(), key in "[a-e]", value in tree_strategy()) {
        let tracked = TrackedObject::new(root);
        let before = tracked.snapshot();

        tracked.set(&[PathSeg::key(key.clone())], value);
        let after = tracked.snapshot();

        if let (Snapshot::Object(prev), Snapshot::Object(now)) = (&before, &after) {
            for (sibling, prev_value) in prev.iter() {
                if *sibling == key {
                    continue;
                }
                let now_value = now.get(sibling).expect("siblings are never dropped");
                prop_assert!(
                    prev_value.same(now_value),
                    "sibling '{}' was rebuilt",
                    sibling
                );
            }
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 3. Snapshot identity tracks the version counter
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn snapshot_identity_matches_version(
        root in root_strategy(),
        key in "[a-e]",
        value in leaf_strategy(),
    ) {
        let tracked = TrackedObject::new(root);
        let before = tracked.snapshot();
        let version_before = tracked.version();

        tracked.set(&[PathSeg::key(key)], value);

        let changed = tracked.version() != version_before;
        prop_assert_eq!(
            !tracked.snapshot().same(&before),
            changed,
            "snapshot identity must move exactly when the version does"
        );
    }
}
