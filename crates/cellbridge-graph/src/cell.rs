#![forbid(unsafe_code)]

//! Cell descriptions: primitive storage and derived computations.
//!
//! # Design
//!
//! A cell is a *description*, not storage: it carries a process-unique id,
//! an initial value or a read/write function pair, and policy (equality
//! suppression, mount hook). All state lives in a [`Store`]; the same cell
//! can be read through any number of independent stores. Cloning a cell
//! clones the description handle, not the state.
//!
//! Primitive cells optionally install an `on_mount` hook after
//! construction. The hook runs when the first subscriber (direct or via a
//! mounted dependent) attaches in a given store, receives a
//! [`CellSetter`] bound to that store, and may return an unmount closure
//! that runs when the last subscriber detaches.

use std::cell::{Cell as StdCell, RefCell};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::store::{ReadCtx, Store, WeakStore, WriteCtx};

/// Process-unique cell identifier.
pub type CellId = u64;

static NEXT_CELL_ID: AtomicU64 = AtomicU64::new(1);

fn next_cell_id() -> CellId {
    NEXT_CELL_ID.fetch_add(1, Ordering::Relaxed)
}

pub(crate) type EqFn<T> = Rc<dyn Fn(&T, &T) -> bool>;

/// Closure run when a mounted cell's last subscriber detaches.
pub type Unmount = Box<dyn FnOnce()>;

pub(crate) type MountFn<T> = Rc<dyn Fn(CellSetter<T>) -> Option<Unmount>>;

/// A primitive cell: plain storage with an initial value.
pub struct Cell<T> {
    id: CellId,
    pub(crate) def: Rc<CellDef<T>>,
}

pub(crate) struct CellDef<T> {
    pub(crate) initial: T,
    /// Writes where this returns true are suppressed (no version bump, no
    /// notification). `None` means every write counts.
    pub(crate) eq: Option<EqFn<T>>,
    pub(crate) on_mount: RefCell<Option<MountFn<T>>>,
    pub(crate) label: RefCell<Option<String>>,
    pub(crate) private: StdCell<bool>,
}

impl<T> Clone for Cell<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            def: Rc::clone(&self.def),
        }
    }
}

impl<T> std::fmt::Debug for Cell<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cell")
            .field("id", &self.id)
            .field("label", &self.def.label.borrow())
            .finish_non_exhaustive()
    }
}

impl<T: Clone + 'static> Cell<T> {
    /// A cell that suppresses writes of values equal to the current one.
    #[must_use]
    pub fn new(initial: T) -> Self
    where
        T: PartialEq,
    {
        Self::build(initial, Some(Rc::new(|a: &T, b: &T| a == b)))
    }

    /// A cell with a custom suppression predicate: writes where
    /// `eq(current, new)` returns true are no-ops.
    #[must_use]
    pub fn with_eq(initial: T, eq: impl Fn(&T, &T) -> bool + 'static) -> Self {
        Self::build(initial, Some(Rc::new(eq)))
    }

    /// A cell where every write counts as a change.
    #[must_use]
    pub fn always_notify(initial: T) -> Self {
        Self::build(initial, None)
    }

    fn build(initial: T, eq: Option<EqFn<T>>) -> Self {
        Self {
            id: next_cell_id(),
            def: Rc::new(CellDef {
                initial,
                eq,
                on_mount: RefCell::new(None),
                label: RefCell::new(None),
                private: StdCell::new(false),
            }),
        }
    }

    /// Install the mount hook. The hook runs in each store where this cell
    /// becomes mounted and may return an unmount closure.
    pub fn set_on_mount(&self, hook: impl Fn(CellSetter<T>) -> Option<Unmount> + 'static) {
        *self.def.on_mount.borrow_mut() = Some(Rc::new(hook));
    }

    /// Attach a debug label, surfaced in tracing events.
    #[must_use]
    pub fn labeled(self, label: impl Into<String>) -> Self {
        *self.def.label.borrow_mut() = Some(label.into());
        self
    }

    /// Hide this cell from store introspection output.
    #[must_use]
    pub fn mark_private(self) -> Self {
        self.def.private.set(true);
        self
    }
}

/// A setter bound to one store, handed to mount hooks.
///
/// Writes are silently dropped if the store has been dropped.
pub struct CellSetter<T> {
    pub(crate) store: WeakStore,
    pub(crate) cell: Cell<T>,
}

impl<T> Clone for CellSetter<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            cell: self.cell.clone(),
        }
    }
}

impl<T: Clone + 'static> CellSetter<T> {
    /// Write the cell in the bound store.
    pub fn set(&self, value: T) {
        if let Some(store) = self.store.upgrade() {
            store.set(&self.cell, value);
        }
    }
}

pub(crate) type WriteFn<A, R> = Rc<dyn Fn(&mut WriteCtx<'_>, A) -> R>;

/// A derived cell: a read function over other cells, optionally writable
/// through an action-dispatch function.
///
/// The type parameters are the read value `T`, the write action `A`, and
/// the write result `R`. A read-only derived cell is `DerivedCell<T>`.
pub struct DerivedCell<T, A = (), R = ()> {
    id: CellId,
    pub(crate) def: Rc<DerivedDef<T, A, R>>,
}

pub(crate) struct DerivedDef<T, A, R> {
    pub(crate) read: Rc<dyn Fn(&mut ReadCtx<'_>) -> T>,
    pub(crate) write: Option<WriteFn<A, R>>,
    /// Recomputations where this returns true do not notify. `None` means
    /// every recomputation notifies.
    pub(crate) eq: Option<EqFn<T>>,
    pub(crate) label: RefCell<Option<String>>,
    pub(crate) private: StdCell<bool>,
}

impl<T, A, R> Clone for DerivedCell<T, A, R> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            def: Rc::clone(&self.def),
        }
    }
}

impl<T, A, R> std::fmt::Debug for DerivedCell<T, A, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedCell")
            .field("id", &self.id)
            .field("label", &self.def.label.borrow())
            .field("writable", &self.def.write.is_some())
            .finish_non_exhaustive()
    }
}

impl<T: Clone + 'static> DerivedCell<T> {
    /// A read-only derived cell.
    #[must_use]
    pub fn new(read: impl Fn(&mut ReadCtx<'_>) -> T + 'static) -> Self {
        Self::build(Rc::new(read), None, None)
    }
}

impl<T: Clone + 'static, A: 'static, R: 'static> DerivedCell<T, A, R> {
    /// A derived cell with a write function: `dispatch`ing an action `A`
    /// runs it with get/set access and returns `R`.
    #[must_use]
    pub fn writable(
        read: impl Fn(&mut ReadCtx<'_>) -> T + 'static,
        write: impl Fn(&mut WriteCtx<'_>, A) -> R + 'static,
    ) -> Self {
        Self::build(Rc::new(read), Some(Rc::new(write)), None)
    }

    fn build(
        read: Rc<dyn Fn(&mut ReadCtx<'_>) -> T>,
        write: Option<WriteFn<A, R>>,
        eq: Option<EqFn<T>>,
    ) -> Self {
        Self {
            id: next_cell_id(),
            def: Rc::new(DerivedDef {
                read,
                write,
                eq,
                label: RefCell::new(None),
                private: StdCell::new(false),
            }),
        }
    }

    /// Suppress notifications for recomputations where `eq(old, new)`
    /// returns true.
    #[must_use]
    pub fn with_eq(self, eq: impl Fn(&T, &T) -> bool + 'static) -> Self {
        Self {
            id: self.id,
            def: Rc::new(DerivedDef {
                read: Rc::clone(&self.def.read),
                write: self.def.write.clone(),
                eq: Some(Rc::new(eq)),
                label: RefCell::new(self.def.label.borrow().clone()),
                private: StdCell::new(self.def.private.get()),
            }),
        }
    }

    /// Attach a debug label, surfaced in tracing events.
    #[must_use]
    pub fn labeled(self, label: impl Into<String>) -> Self {
        *self.def.label.borrow_mut() = Some(label.into());
        self
    }

    /// Hide this cell from store introspection output.
    #[must_use]
    pub fn mark_private(self) -> Self {
        self.def.private.set(true);
        self
    }
}

/// Anything a [`Store`] can read: primitive or derived cells.
pub trait Readable<T: Clone + 'static> {
    /// The cell's process-unique id.
    fn id(&self) -> CellId;

    #[doc(hidden)]
    fn register(&self, store: &Store);

    /// Recompute/refresh the cached value in `store`; returns whether the
    /// value changed.
    #[doc(hidden)]
    fn refresh(&self, store: &Store) -> bool;
}

impl<T: Clone + 'static> Readable<T> for Cell<T> {
    fn id(&self) -> CellId {
        self.id
    }

    fn register(&self, store: &Store) {
        store.register_primitive(self);
    }

    fn refresh(&self, store: &Store) -> bool {
        store.refresh_primitive(self)
    }
}

impl<T: Clone + 'static, A: 'static, R: 'static> Readable<T> for DerivedCell<T, A, R> {
    fn id(&self) -> CellId {
        self.id
    }

    fn register(&self, store: &Store) {
        store.register_derived(self);
    }

    fn refresh(&self, store: &Store) -> bool {
        store.refresh_derived(self)
    }
}
