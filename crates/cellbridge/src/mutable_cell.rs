#![forbid(unsafe_code)]

//! Bidirectional bridge: a tracked `{ value }` wrapper exposed through a
//! cell, with stable wrapper identity and single-echo loop suppression.
//!
//! # Design
//!
//! Three cooperating cells:
//!
//! - The **value cell** (private primitive) holds `Versioned<V>` — the
//!   authoritative value plus the stamp of the write that produced it.
//!   Equality is stamp equality, so it notifies once per accepted wrapper
//!   write. Nothing outside this module writes it.
//! - The **store cell** (private derived) materializes, once per mount, a
//!   record holding a fresh [`ScalarWrapper`] seeded from the value cell's
//!   *current* contents (peeked, so no feedback dependency) and a
//!   [`ValuePort`] — the explicit two-method interface that indirects every
//!   read/write through the store cell's single action-dispatch write
//!   handler instead of capturing the value cell. The record attaches a
//!   detached synchronous wrapper subscription: on each write `(v, stamp)`
//!   it forwards into the value cell unless the port already holds that
//!   stamp. The subscription is never cancelled; it lives and dies with the
//!   wrapper.
//! - The **public cell** (read-only derived) depends on the value cell (so
//!   consumers re-fire on every accepted write), reads the memoized store
//!   record, and returns a write-guarded [`WrapperView`].
//!
//! Loop avoidance is asymmetric by construction: wrapper writes flow into
//! the value cell exactly once (stamp comparison kills the echo), and no
//! path ever writes the wrapper in response to a value-cell change.
//! External writers mutate state by reading the current view and writing
//! its `value` field.
//!
//! Unmounting evicts the store record; the value cell persists. A remount
//! therefore builds a **new** wrapper seeded from the current value — state
//! survives, wrapper identity does not. Writes through a view that outlived
//! an unmount still reach the value cell via the abandoned subscription.

use std::fmt;
use std::rc::Rc;

use cellbridge_graph::{Cell, DerivedCell, WeakStore};
use cellbridge_track::ScalarWrapper;

/// A value paired with the stamp of the wrapper write that produced it.
/// Stamp 0 is the construction-time seed.
#[derive(Clone, Debug)]
struct Versioned<V> {
    value: V,
    stamp: u64,
}

enum StoreAction<V> {
    SetValue(Versioned<V>),
    GetValue,
}

/// Rejected write to a field other than `value` on a [`WrapperView`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedWrite {
    /// The field the caller attempted to write.
    pub field: String,
}

impl fmt::Display for RejectedWrite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "write rejected: scalar wrappers have no writable field '{}'",
            self.field
        )
    }
}

impl std::error::Error for RejectedWrite {}

type ActionCell<V> = DerivedCell<WrapperStore<V>, StoreAction<V>, Option<Versioned<V>>>;

/// The explicit getter/setter pair over the value cell, indirected through
/// the store cell's write handler. Holds the store weakly so an abandoned
/// port cannot keep a dropped store alive.
struct ValuePort<V> {
    store: WeakStore,
    actions: ActionCell<V>,
}

impl<V> Clone for ValuePort<V> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            actions: self.actions.clone(),
        }
    }
}

impl<V: Clone + 'static> ValuePort<V> {
    fn get(&self) -> Option<Versioned<V>> {
        self.store
            .upgrade()
            .and_then(|store| store.dispatch(&self.actions, StoreAction::GetValue))
    }

    fn held_stamp(&self) -> Option<u64> {
        self.get().map(|held| held.stamp)
    }

    fn set(&self, value: Versioned<V>) {
        if let Some(store) = self.store.upgrade() {
            store.dispatch(&self.actions, StoreAction::SetValue(value));
        }
    }
}

/// Store-cell record: one tracked wrapper plus its port. Created once per
/// mount, memoized until the last subscriber detaches.
struct WrapperStore<V> {
    wrapper: ScalarWrapper<V>,
    #[allow(dead_code)] // Held so the port's identity is as stable as the record's.
    port: ValuePort<V>,
}

impl<V> Clone for WrapperStore<V> {
    fn clone(&self) -> Self {
        Self {
            wrapper: self.wrapper.clone(),
            port: self.port.clone(),
        }
    }
}

/// Write-guarded view over the tracked wrapper returned by a
/// [`mutable_cell`]. Reads pass through; writes are accepted only for the
/// field named `value`.
pub struct WrapperView<V> {
    wrapper: ScalarWrapper<V>,
}

impl<V> Clone for WrapperView<V> {
    fn clone(&self) -> Self {
        Self {
            wrapper: self.wrapper.clone(),
        }
    }
}

impl<V: fmt::Debug> fmt::Debug for WrapperView<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WrapperView")
            .field("wrapper", &self.wrapper)
            .finish()
    }
}

impl<V: Clone + 'static> WrapperView<V> {
    /// Read the wrapped value.
    #[must_use]
    pub fn value(&self) -> V {
        self.wrapper.get()
    }

    /// Read the wrapped value by reference.
    pub fn with_value<R>(&self, f: impl FnOnce(&V) -> R) -> R {
        self.wrapper.with(f)
    }

    /// Write the `value` field, straight onto the underlying wrapper. The
    /// store subscription forwards it into the cell graph once.
    pub fn set_value(&self, value: V) {
        self.wrapper.set(value);
    }

    /// Mutate the `value` field in place. One accepted write.
    pub fn update_value(&self, f: impl FnOnce(&mut V)) {
        self.wrapper.update(f);
    }

    /// Dynamic field write: only `"value"` is accepted; any other name is a
    /// rejected write and leaves the wrapper untouched.
    pub fn set_field(&self, field: &str, value: V) -> Result<(), RejectedWrite> {
        if field == "value" {
            self.set_value(value);
            Ok(())
        } else {
            tracing::debug!(field, "rejected scalar wrapper field write");
            Err(RejectedWrite {
                field: field.to_owned(),
            })
        }
    }

    /// Whether two views expose the same underlying wrapper.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.wrapper.ptr_eq(&other.wrapper)
    }
}

/// Substitute tracking constructor for the wrapper, e.g. one with different
/// notification granularity.
pub type ProxyFn<V> = Rc<dyn Fn(V) -> ScalarWrapper<V>>;

/// Recognized options for [`mutable_cell`].
pub struct MutableCellOptions<V> {
    /// Tracking constructor for the wrapper; defaults to
    /// [`ScalarWrapper::new`].
    pub proxy_fn: Option<ProxyFn<V>>,
}

impl<V> Default for MutableCellOptions<V> {
    fn default() -> Self {
        Self { proxy_fn: None }
    }
}

impl<V> fmt::Debug for MutableCellOptions<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutableCellOptions")
            .field("proxy_fn", &self.proxy_fn.is_some())
            .finish()
    }
}

/// Expose `initial` as a cell yielding a stable, mutation-trackable
/// `{ value }` wrapper.
///
/// Reading the returned cell yields a [`WrapperView`]; mutating its `value`
/// notifies subscribers once per accepted write. Between writes,
/// consecutive reads return views over the identical wrapper. Across a full
/// unmount/remount cycle the wrapper identity changes but the value
/// carries over.
pub fn mutable_cell<V: Clone + 'static>(
    initial: V,
    options: MutableCellOptions<V>,
) -> DerivedCell<WrapperView<V>> {
    let proxy_fn: ProxyFn<V> = options
        .proxy_fn
        .unwrap_or_else(|| Rc::new(ScalarWrapper::new));

    let value_cell = Cell::with_eq(
        Versioned {
            value: initial,
            stamp: 0,
        },
        |a: &Versioned<V>, b: &Versioned<V>| a.stamp == b.stamp,
    )
    .labeled("mutable-cell-value")
    .mark_private();

    // The store cell's read needs its own handle to build the port. The
    // slot breaks the definition cycle; the read side holds it weakly (the
    // public cell below anchors it) so the definitions stay collectable.
    let action_slot: Rc<std::cell::RefCell<Option<ActionCell<V>>>> =
        Rc::new(std::cell::RefCell::new(None));

    let read_value_cell = value_cell.clone();
    let read_slot = Rc::downgrade(&action_slot);
    let store_read = move |ctx: &mut cellbridge_graph::ReadCtx<'_>| -> WrapperStore<V> {
        // Seed from the *current* contents so state survives remounts.
        // Peeked: a value-cell write must not rebuild the wrapper.
        let seed = ctx.peek(&read_value_cell);
        let wrapper = proxy_fn(seed.value);
        let port = ValuePort {
            store: ctx.store(),
            // Reads only happen through the public cell, which keeps the
            // slot alive; the expect states that invariant.
            actions: read_slot
                .upgrade()
                .and_then(|slot| slot.borrow().clone())
                .expect("action cell is installed and anchored by the public cell"),
        };

        // Forward wrapper writes into the value cell, once each: the stamp
        // comparison drops the echo when the write already landed. Never
        // cancelled; collected with the wrapper.
        let forward_port = port.clone();
        wrapper.subscribe_detached(
            move |value: &V, stamp: u64| {
                if forward_port.held_stamp() != Some(stamp) {
                    forward_port.set(Versioned {
                        value: value.clone(),
                        stamp,
                    });
                }
            },
            true,
        );
        tracing::debug!(seed_stamp = seed.stamp, "scalar wrapper store created");
        WrapperStore { wrapper, port }
    };

    let write_value_cell = value_cell.clone();
    let store_write = move |ctx: &mut cellbridge_graph::WriteCtx<'_>,
                            action: StoreAction<V>|
          -> Option<Versioned<V>> {
        match action {
            StoreAction::SetValue(versioned) => {
                ctx.set(&write_value_cell, versioned);
                None
            }
            StoreAction::GetValue => Some(ctx.get(&write_value_cell)),
        }
    };

    let action_cell: ActionCell<V> = DerivedCell::writable(store_read, store_write)
        .labeled("mutable-cell-store")
        .mark_private();
    *action_slot.borrow_mut() = Some(action_cell);

    let public_value_cell = value_cell.clone();
    DerivedCell::new(move |ctx| {
        // Depend on the value cell so consumers re-fire on every write…
        let _ = ctx.get(&public_value_cell);
        // …and hand out the memoized wrapper.
        let actions = action_slot
            .borrow()
            .clone()
            .expect("installed at construction");
        let record = ctx.get(&actions);
        WrapperView {
            wrapper: record.wrapper.clone(),
        }
    })
    .labeled("mutable-cell")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use cellbridge_graph::Store;
    use std::cell::Cell as StdCell;

    #[test]
    fn defined_on_first_read() {
        let store = Store::new();
        let counter = mutable_cell(0, MutableCellOptions::default());
        assert_eq!(store.get(&counter).value(), 0);
    }

    #[test]
    fn identity_stable_between_mutations() {
        let store = Store::new();
        let counter = mutable_cell(0, MutableCellOptions::default());
        let _sub = store.subscribe(&counter, || {});

        let a = store.get(&counter);
        let b = store.get(&counter);
        assert!(a.ptr_eq(&b));

        a.update_value(|v| *v += 1);
        let c = store.get(&counter);
        assert!(a.ptr_eq(&c), "mutation does not replace the wrapper");
        assert_eq!(c.value(), 1);
    }

    #[test]
    fn one_notification_per_accepted_write() {
        let store = Store::new();
        let counter = mutable_cell(0, MutableCellOptions::default());
        let notified = Rc::new(StdCell::new(0u32));
        let n = Rc::clone(&notified);
        let _sub = store.subscribe(&counter, move || n.set(n.get() + 1));

        let view = store.get(&counter);
        view.update_value(|v| *v += 1);
        view.update_value(|v| *v += 1);

        assert_eq!(store.get(&counter).value(), 2);
        // Individual delivery policy: two increments, two notifications.
        assert_eq!(notified.get(), 2);
    }

    #[test]
    fn equal_value_write_still_notifies() {
        let store = Store::new();
        let counter = mutable_cell(0, MutableCellOptions::default());
        let notified = Rc::new(StdCell::new(0u32));
        let n = Rc::clone(&notified);
        let _sub = store.subscribe(&counter, move || n.set(n.get() + 1));

        store.get(&counter).set_value(0);
        assert_eq!(store.get(&counter).value(), 0);
        assert_eq!(notified.get(), 1, "a write of an equal value is a write");
    }

    #[test]
    fn rejected_write_leaves_value_untouched() {
        let store = Store::new();
        let counter = mutable_cell(7, MutableCellOptions::default());
        let view = store.get(&counter);

        assert!(view.set_field("value", 8).is_ok());
        let err = view.set_field("NOT_VALUE", 99).unwrap_err();
        assert_eq!(err.field, "NOT_VALUE");
        assert!(err.to_string().contains("NOT_VALUE"));
        assert_eq!(view.value(), 8);
    }

    #[test]
    fn unmount_remount_keeps_value_changes_identity() {
        let store = Store::new();
        let counter = mutable_cell(0, MutableCellOptions::default());

        let sub = store.subscribe(&counter, || {});
        let view = store.get(&counter);
        view.update_value(|v| *v += 1);
        assert_eq!(view.value(), 1);

        drop(sub);
        // Mutation while fully unmounted still reaches the value cell
        // through the abandoned subscription.
        view.update_value(|v| *v += 1);

        let _sub = store.subscribe(&counter, || {});
        let remounted = store.get(&counter);
        assert_eq!(remounted.value(), 2, "both mutations survived the remount");
        assert!(!remounted.ptr_eq(&view), "remount rebuilds the wrapper");

        remounted.update_value(|v| *v += 1);
        assert_eq!(store.get(&counter).value(), 3);
    }

    #[test]
    fn update_works_without_any_subscriber() {
        let store = Store::new();
        let counter = mutable_cell(0, MutableCellOptions::default());

        store.get(&counter).update_value(|v| *v += 1);
        assert_eq!(store.get(&counter).value(), 1);
    }

    #[test]
    fn all_subscribers_notified() {
        let store = Store::new();
        let counter = mutable_cell(0, MutableCellOptions::default());
        let a = Rc::new(StdCell::new(0u32));
        let b = Rc::new(StdCell::new(0u32));

        let ca = Rc::clone(&a);
        let _sa = store.subscribe(&counter, move || ca.set(ca.get() + 1));
        let cb = Rc::clone(&b);
        let _sb = store.subscribe(&counter, move || cb.set(cb.get() + 1));

        store.get(&counter).update_value(|v| *v += 1);
        assert_eq!(a.get(), 1);
        assert_eq!(b.get(), 1);
    }

    #[test]
    fn stores_function_values() {
        type Callable = Rc<dyn Fn() -> &'static str>;
        let store = Store::new();
        let cell = mutable_cell::<Callable>(Rc::new(|| "foo"), MutableCellOptions::default());
        let _sub = store.subscribe(&cell, || {});

        assert_eq!((store.get(&cell).value())(), "foo");
        store.get(&cell).set_value(Rc::new(|| "bar"));
        assert_eq!((store.get(&cell).value())(), "bar");
    }

    #[test]
    fn nested_state_mutation_notifies() {
        #[derive(Clone, Debug, PartialEq)]
        struct Nested {
            array: Vec<i32>,
            key: String,
        }

        let store = Store::new();
        let cell = mutable_cell(
            Nested {
                array: vec![1, 2],
                key: "value".to_owned(),
            },
            MutableCellOptions::default(),
        );
        let notified = Rc::new(StdCell::new(0u32));
        let n = Rc::clone(&notified);
        let _sub = store.subscribe(&cell, move || n.set(n.get() + 1));

        store.get(&cell).update_value(|v| v.array.push(3));
        assert_eq!(
            store.get(&cell).with_value(|v| v.array.clone()),
            vec![1, 2, 3]
        );
        assert_eq!(notified.get(), 1);

        store.get(&cell).update_value(|v| v.key = "newValue".to_owned());
        assert_eq!(store.get(&cell).value().key, "newValue");
        assert_eq!(notified.get(), 2);
    }

    #[test]
    fn custom_proxy_fn_is_used() {
        let created = Rc::new(StdCell::new(0u32));
        let c = Rc::clone(&created);
        let options = MutableCellOptions {
            proxy_fn: Some(Rc::new(move |value| {
                c.set(c.get() + 1);
                ScalarWrapper::new(value)
            }) as ProxyFn<i32>),
        };

        let store = Store::new();
        let cell = mutable_cell(0, options);
        assert_eq!(created.get(), 0, "wrapper is built lazily");
        let _ = store.get(&cell);
        assert_eq!(created.get(), 1);
        let _ = store.get(&cell);
        assert_eq!(created.get(), 1, "memoized while cached");
    }

    #[test]
    fn write_from_derived_write_function_is_synchronous() {
        let store = Store::new();
        let counter = mutable_cell(0, MutableCellOptions::default());

        let read_counter = counter.clone();
        let positive = DerivedCell::new(move |ctx| ctx.get(&read_counter).value() > 0);

        let write_counter = counter.clone();
        let increment = DerivedCell::writable(
            move |_ctx| (),
            move |ctx, (): ()| {
                let view = ctx.get(&write_counter);
                view.update_value(|v| *v += 1);
                // The forward path is synchronous: dependents observe the
                // new value within this write turn.
                assert!(ctx.get(&positive));
            },
        );

        let _sub = store.subscribe(&counter, || {});
        store.dispatch(&increment, ());
        assert_eq!(store.get(&counter).value(), 1);
    }

    #[test]
    #[should_panic(expected = "read computation is active")]
    fn mutating_wrapper_inside_a_read_is_rejected() {
        let store = Store::new();
        let counter = mutable_cell(0, MutableCellOptions::default());

        let inner = counter.clone();
        let evil = DerivedCell::new(move |ctx| {
            let view = ctx.get(&inner);
            view.update_value(|v| *v += 1);
            view.value()
        });

        let _sub = store.subscribe(&counter, || {});
        let _ = store.get(&evil);
    }
}
