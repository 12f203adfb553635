#![forbid(unsafe_code)]

//! Demo: both bridges driving a toy application state.
//!
//! Scenario 1 projects a tracked game state through a snapshot bridge and
//! shows direct mutation, functional write-back, and deferred coalescing.
//! Scenario 2 holds a counter in a mutable cell and shows wrapper identity
//! stability across mutations versus a remount.
//!
//! Run with `RUST_LOG=trace` to watch the propagation paths.

use std::cell::Cell as StdCell;
use std::rc::Rc;

use cellbridge::track::persist::snapshot_to_string;
use cellbridge::{
    MutableCellOptions, PathSeg, Snapshot, SnapshotBridgeOptions, SnapshotUpdate, Store,
    TrackedObject, mutable_cell, snapshot_bridge,
};
use tracing::info;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    snapshot_bridge_scenario();
    mutable_cell_scenario();
}

fn snapshot_bridge_scenario() {
    info!("-- snapshot bridge --");

    let tracked = TrackedObject::new(Snapshot::object([
        ("score", Snapshot::from(0)),
        ("player", Snapshot::object([("name", Snapshot::from("ada"))])),
        ("log", Snapshot::array([])),
    ]));
    let state = snapshot_bridge(&tracked, SnapshotBridgeOptions { sync: true });
    let store = Store::new();

    let renders = Rc::new(StdCell::new(0u32));
    let r = Rc::clone(&renders);
    let _sub = store.subscribe(&state, move || r.set(r.get() + 1));

    // Direct mutation: visible through the cell immediately (sync bridge).
    tracked.set(&[PathSeg::key("score")], Snapshot::from(10));
    info!(state = %snapshot_to_string(&store.get(&state)), renders = renders.get(), "after direct mutation");

    // Functional write-back: diffed onto the tracked tree in place.
    store.dispatch(
        &state,
        SnapshotUpdate::with(|prev| {
            let score = prev.get("score").and_then(Snapshot::as_i64).unwrap_or(0);
            Snapshot::object([
                ("score", Snapshot::from(score + 5)),
                ("player", prev.get("player").cloned().unwrap_or(Snapshot::Null)),
                ("log", Snapshot::array([Snapshot::from("bonus")])),
            ])
        }),
    );
    info!(
        score = tracked.get(&[PathSeg::key("score")]).and_then(|s| s.as_i64()),
        renders = renders.get(),
        "after functional write"
    );

    // Deferred variant: mutations coalesce until the scheduler drains.
    let deferred = TrackedObject::new(Snapshot::object([("ticks", Snapshot::from(0))]));
    let deferred_state = snapshot_bridge(&deferred, SnapshotBridgeOptions::default());
    let ticks_seen = Rc::new(StdCell::new(0u32));
    let t = Rc::clone(&ticks_seen);
    let _dsub = store.subscribe(&deferred_state, move || t.set(t.get() + 1));

    for tick in 1..=3 {
        deferred.set(&[PathSeg::key("ticks")], Snapshot::from(tick));
    }
    info!(publishes = ticks_seen.get(), "before drain");
    deferred.flush();
    info!(
        publishes = ticks_seen.get(),
        ticks = store
            .get(&deferred_state)
            .get("ticks")
            .and_then(Snapshot::as_i64),
        "after drain: three mutations, one publish"
    );
}

fn mutable_cell_scenario() {
    info!("-- mutable cell --");

    let store = Store::new();
    let counter = mutable_cell(0i64, MutableCellOptions::default());

    let renders = Rc::new(StdCell::new(0u32));
    let r = Rc::clone(&renders);
    let sub = store.subscribe(&counter, move || r.set(r.get() + 1));

    let view = store.get(&counter);
    view.update_value(|v| *v += 1);
    view.update_value(|v| *v += 1);
    info!(
        value = store.get(&counter).value(),
        renders = renders.get(),
        stable = view.ptr_eq(&store.get(&counter)),
        "after two increments"
    );

    // Writes to anything but `value` are rejected.
    if let Err(err) = view.set_field("NOT_VALUE", 99) {
        info!(%err, "rejected write");
    }

    // Remount: the value survives, the wrapper identity does not.
    drop(sub);
    view.update_value(|v| *v += 1);
    let _sub = store.subscribe(&counter, || {});
    let remounted = store.get(&counter);
    info!(
        value = remounted.value(),
        fresh_identity = !remounted.ptr_eq(&view),
        "after unmount/remount"
    );
}
