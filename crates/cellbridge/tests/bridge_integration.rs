//! End-to-end scenarios for the two bridges through the public facade:
//! direct mutations, functional writes, sync vs deferred propagation, and
//! cross-remount continuity.

use std::cell::Cell as StdCell;
use std::rc::Rc;

use cellbridge::{
    Cell, DerivedCell, MutableCellOptions, PathSeg, Snapshot, SnapshotBridgeOptions,
    SnapshotUpdate, Store, TrackedObject, mutable_cell, snapshot_bridge,
};

fn count_path() -> [PathSeg; 1] {
    [PathSeg::key("count")]
}

#[test]
fn snapshot_bridge_counter_round_trip() {
    // T = {count: 0}; increment directly, then write back through the cell.
    let tracked = TrackedObject::new(Snapshot::object([("count", Snapshot::from(0))]));
    let bridge = snapshot_bridge(&tracked, SnapshotBridgeOptions { sync: true });
    let store = Store::new();
    let _sub = store.subscribe(&bridge, || {});

    tracked.set(&count_path(), Snapshot::from(1));
    assert_eq!(
        store.get(&bridge).get("count").and_then(Snapshot::as_i64),
        Some(1)
    );

    store.dispatch(
        &bridge,
        SnapshotUpdate::with(|prev| {
            let count = prev.get("count").and_then(Snapshot::as_i64).unwrap_or(0);
            Snapshot::object([("count", Snapshot::from(count + 1))])
        }),
    );
    assert_eq!(
        tracked.get(&count_path()).and_then(|s| s.as_i64()),
        Some(2)
    );
    assert_eq!(
        store.get(&bridge).get("count").and_then(Snapshot::as_i64),
        Some(2)
    );
}

#[test]
fn nested_write_keeps_untouched_sibling_stable() {
    let tracked = TrackedObject::new(Snapshot::object([
        ("nested", Snapshot::object([("count", Snapshot::from(0))])),
        ("other", Snapshot::empty_object()),
    ]));
    let bridge = snapshot_bridge(&tracked, SnapshotBridgeOptions { sync: true });
    let store = Store::new();
    let _sub = store.subscribe(&bridge, || {});

    let other_before = store.get(&bridge).get("other").cloned().unwrap();

    store.dispatch(
        &bridge,
        SnapshotUpdate::with(|prev| {
            let count = prev
                .get_path(&[PathSeg::key("nested"), PathSeg::key("count")])
                .and_then(Snapshot::as_i64)
                .unwrap_or(0);
            Snapshot::object([
                ("nested", Snapshot::object([("count", Snapshot::from(count + 1))])),
                ("other", prev.get("other").cloned().unwrap()),
            ])
        }),
    );

    let after = store.get(&bridge);
    assert_eq!(
        after
            .get_path(&[PathSeg::key("nested"), PathSeg::key("count")])
            .and_then(Snapshot::as_i64),
        Some(1)
    );
    assert!(after.get("other").unwrap().same(&other_before));

    // Direct mutation of the nested counter: same stability guarantee.
    tracked.set(
        &[PathSeg::key("nested"), PathSeg::key("count")],
        Snapshot::from(2),
    );
    assert!(store.get(&bridge).get("other").unwrap().same(&other_before));
}

#[test]
fn replacement_array_truncates_tracked_array() {
    let tracked = TrackedObject::new(Snapshot::object([(
        "array",
        Snapshot::array([Snapshot::from(0), Snapshot::from(0)]),
    )]));
    let bridge = snapshot_bridge(&tracked, SnapshotBridgeOptions { sync: true });
    let store = Store::new();
    let _sub = store.subscribe(&bridge, || {});

    store.dispatch(
        &bridge,
        SnapshotUpdate::Replace(Snapshot::object([(
            "array",
            Snapshot::array([Snapshot::from(1)]),
        )])),
    );

    let array = tracked.get(&[PathSeg::key("array")]).unwrap();
    assert_eq!(array.len(), Some(1));
    assert_eq!(array.at(0).and_then(Snapshot::as_i64), Some(1));
}

#[test]
fn sync_bridge_composes_with_plain_cells_in_one_write_turn() {
    // A write function selects an id in a plain cell, then inserts the
    // element into the tracked tree; with `sync` the projection already
    // contains the element when the same turn reads it back.
    let tracked = TrackedObject::new(Snapshot::object([("elements", Snapshot::empty_object())]));
    let bridge = snapshot_bridge(&tracked, SnapshotBridgeOptions { sync: true });
    let selected = Cell::new(String::new());

    let store = Store::new();
    let _sub = store.subscribe(&bridge, || {});

    let write_selected = selected.clone();
    let write_tracked = tracked.clone();
    let create_element = DerivedCell::writable(
        |_ctx| (),
        move |ctx, (): ()| {
            ctx.set(&write_selected, "123".to_owned());
            write_tracked.set(
                &[PathSeg::key("elements"), PathSeg::key("123")],
                Snapshot::from("element"),
            );
        },
    );

    store.dispatch(&create_element, ());

    let id = store.get(&selected);
    assert_eq!(id, "123");
    assert_eq!(
        store
            .get(&bridge)
            .get_path(&[PathSeg::key("elements"), PathSeg::key(id)])
            .and_then(|s| s.as_str().map(str::to_owned)),
        Some("element".to_owned())
    );
}

#[test]
fn deferred_bridge_coalesces_until_flush() {
    let tracked = TrackedObject::new(Snapshot::object([("count", Snapshot::from(0))]));
    let bridge = snapshot_bridge(&tracked, SnapshotBridgeOptions::default());
    let store = Store::new();
    let notified = Rc::new(StdCell::new(0u32));
    let n = Rc::clone(&notified);
    let _sub = store.subscribe(&bridge, move || n.set(n.get() + 1));

    for i in 1..=5 {
        tracked.set(&count_path(), Snapshot::from(i));
    }
    assert_eq!(notified.get(), 0);

    tracked.flush();
    assert_eq!(notified.get(), 1);
    assert_eq!(
        store.get(&bridge).get("count").and_then(Snapshot::as_i64),
        Some(5)
    );
}

#[test]
fn mutable_cell_double_increment() {
    // W = mutable_cell(0): two synchronous increments, individual delivery.
    let store = Store::new();
    let counter = mutable_cell(0, MutableCellOptions::default());
    let notified = Rc::new(StdCell::new(0u32));
    let n = Rc::clone(&notified);
    let _sub = store.subscribe(&counter, move || n.set(n.get() + 1));

    assert_eq!(store.get(&counter).value(), 0);

    let view = store.get(&counter);
    view.update_value(|v| *v += 1);
    view.update_value(|v| *v += 1);

    assert_eq!(store.get(&counter).value(), 2);
    assert_eq!(notified.get(), 2, "one notification per discrete mutation");
}

#[test]
fn mutable_cell_remount_continuity() {
    let store = Store::new();
    let counter = mutable_cell(0, MutableCellOptions::default());

    let sub = store.subscribe(&counter, || {});
    let view = store.get(&counter);
    view.update_value(|v| *v += 1);

    drop(sub);
    view.update_value(|v| *v += 1);

    let _sub = store.subscribe(&counter, || {});
    let remounted = store.get(&counter);
    assert_eq!(remounted.value(), 2);
    assert!(
        !remounted.ptr_eq(&view),
        "full unmount/remount rebuilds the wrapper identity"
    );
}

#[test]
fn mutable_cell_read_through_indirection() {
    // Reading through another derived cell changes how the bridge is
    // mounted, not what it yields.
    let store = Store::new();
    let counter = mutable_cell(0, MutableCellOptions::default());

    let inner = counter.clone();
    let indirect = DerivedCell::new(move |ctx| ctx.get(&inner));

    let _sub = store.subscribe(&indirect, || {});
    store.get(&indirect).update_value(|v| *v += 1);
    assert_eq!(store.get(&indirect).value(), 1);
    assert_eq!(store.get(&counter).value(), 1);
}

#[test]
fn both_bridges_share_a_store() {
    let tracked = TrackedObject::new(Snapshot::object([("count", Snapshot::from(0))]));
    let state = snapshot_bridge(&tracked, SnapshotBridgeOptions { sync: true });
    let counter = mutable_cell(0i64, MutableCellOptions::default());
    let store = Store::new();

    let _sa = store.subscribe(&state, || {});
    let _sb = store.subscribe(&counter, || {});

    tracked.set(&count_path(), Snapshot::from(3));
    store.get(&counter).set_value(4);

    let total = store
        .get(&state)
        .get("count")
        .and_then(Snapshot::as_i64)
        .unwrap_or(0)
        + store.get(&counter).value();
    assert_eq!(total, 7);
}
