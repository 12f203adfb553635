#![forbid(unsafe_code)]

//! Store: owns all cell state and drives recomputation and notification.
//!
//! # Design
//!
//! A [`Store`] maps cell ids to cached values, version counters, dependency
//! edges, and mount records. Recomputation is lazy pull: a read recomputes
//! only when the cached value is missing or a recorded dependency's version
//! has moved. Writes push: a primitive write dirties its transitive
//! dependents, eagerly refreshes the mounted ones (so subscribers can be
//! told whether anything actually changed), and delivers notifications
//! after every interior borrow is released.
//!
//! There is no ambient global store. Every handle that needs to write back
//! later ([`CellSetter`], bridge ports) carries a [`WeakStore`], so state
//! never outlives the store that owns it.
//!
//! # Invariants
//!
//! 1. A cell's version increments exactly once per accepted change.
//! 2. A mounted cell's cached value is never stale after a write returns.
//! 3. Derived caches are evicted when the cell fully unmounts; primitive
//!    values persist for the store's lifetime.
//! 4. Subscriber callbacks always run with no interior borrow held.
//!
//! # Failure Modes
//!
//! - **Write during read**: writing any cell while a read computation is on
//!   the stack panics. Mutating state from inside a derivation is a design
//!   bug in the cell graph, and rejecting it is what keeps read functions
//!   loop-free.
//! - **Cyclic reads**: a read function that (transitively) reads its own
//!   cell panics with the offending cell id.

use std::any::Any;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::cell::{Cell, CellId, CellSetter, DerivedCell, Readable, Unmount};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum CellKind {
    Primitive,
    Derived,
}

struct MountRecord {
    subscribers: Vec<(u64, Rc<dyn Fn()>)>,
    next_sub: u64,
    /// Mounted cells that depend on this one.
    dependent_refs: HashSet<CellId>,
    unmount: Option<Unmount>,
}

impl MountRecord {
    fn new() -> Self {
        Self {
            subscribers: Vec::new(),
            next_sub: 0,
            dependent_refs: HashSet::new(),
            unmount: None,
        }
    }

    fn is_idle(&self) -> bool {
        self.subscribers.is_empty() && self.dependent_refs.is_empty()
    }
}

struct CellState {
    value: Option<Box<dyn Any>>,
    version: u64,
    dirty: bool,
    /// Dependencies recorded at the last computation, with the version each
    /// one had then.
    deps: Vec<(CellId, u64)>,
    dependents: HashSet<CellId>,
    kind: CellKind,
    label: Option<String>,
    /// Hidden from introspection output (internal bridge plumbing).
    private: bool,
    refresher: Option<Rc<dyn Fn(&Store) -> bool>>,
    mount_hook: Option<Rc<dyn Fn(&Store) -> Option<Unmount>>>,
    mount: Option<MountRecord>,
}

struct StoreInner {
    cells: RefCell<HashMap<CellId, CellState>>,
    /// Cells whose read function is currently executing.
    read_stack: RefCell<Vec<CellId>>,
}

/// Owner of all cell state. Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct Store {
    inner: Rc<StoreInner>,
}

/// Non-owning store handle for write-back paths that must not keep the
/// store alive.
#[derive(Clone)]
pub struct WeakStore {
    inner: Weak<StoreInner>,
}

impl WeakStore {
    #[must_use]
    pub fn upgrade(&self) -> Option<Store> {
        self.inner.upgrade().map(|inner| Store { inner })
    }
}

impl fmt::Debug for WeakStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakStore")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cells = self.inner.cells.borrow();
        let mounted = cells.values().filter(|st| st.mount.is_some()).count();
        let private = cells.values().filter(|st| st.private).count();
        f.debug_struct("Store")
            .field("cells", &cells.len())
            .field("mounted", &mounted)
            .field("private", &private)
            .finish()
    }
}

impl Store {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(StoreInner {
                cells: RefCell::new(HashMap::new()),
                read_stack: RefCell::new(Vec::new()),
            }),
        }
    }

    #[must_use]
    pub fn downgrade(&self) -> WeakStore {
        WeakStore {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// Read a cell's current value, computing it if necessary.
    pub fn get<T: Clone + 'static>(&self, cell: &impl Readable<T>) -> T {
        cell.register(self);
        let id = cell.id();
        let needs = {
            let cells = self.inner.cells.borrow();
            let st = &cells[&id];
            st.dirty || st.value.is_none()
        };
        if needs {
            cell.refresh(self);
        }
        let cells = self.inner.cells.borrow();
        cells[&id]
            .value
            .as_ref()
            .and_then(|boxed| boxed.downcast_ref::<T>())
            .cloned()
            .expect("cell cache is filled by refresh")
    }

    /// Write a primitive cell. Suppressed when the cell's equality policy
    /// considers the value unchanged.
    ///
    /// # Panics
    ///
    /// Panics if called while a read computation is active.
    pub fn set<T: Clone + 'static>(&self, cell: &Cell<T>, value: T) {
        assert!(
            self.inner.read_stack.borrow().is_empty(),
            "cell {} written while a read computation is active; \
             mutating state from a derivation is unsupported",
            cell.id(),
        );
        self.register_primitive(cell);
        let id = cell.id();
        let changed = {
            let mut cells = self.inner.cells.borrow_mut();
            let st = cells.get_mut(&id).expect("registered above");
            let suppressed = match (cell.def.eq.as_ref(), st.value.as_ref()) {
                (Some(eq), Some(old)) => old
                    .downcast_ref::<T>()
                    .is_some_and(|old| eq(old, &value)),
                (Some(eq), None) => eq(&cell.def.initial, &value),
                (None, _) => false,
            };
            if suppressed {
                false
            } else {
                st.value = Some(Box::new(value));
                st.version += 1;
                true
            }
        };
        if changed {
            tracing::trace!(cell = id, label = cell.def.label.borrow().as_deref(), "cell write");
            self.after_change(id);
        } else {
            tracing::trace!(cell = id, "cell write suppressed");
        }
    }

    /// Run a writable derived cell's write function with `action`.
    ///
    /// # Panics
    ///
    /// Panics when the cell has no write function.
    pub fn dispatch<T: Clone + 'static, A: 'static, R: 'static>(
        &self,
        cell: &DerivedCell<T, A, R>,
        action: A,
    ) -> R {
        self.register_derived(cell);
        let write = cell
            .def
            .write
            .clone()
            .expect("dispatch on a cell without a write function");
        let mut ctx = WriteCtx { store: self };
        write(&mut ctx, action)
    }

    /// Subscribe to changes of a cell. The first subscriber mounts the cell
    /// (and, transitively, its dependencies); dropping the last guard
    /// unmounts it.
    pub fn subscribe<T: Clone + 'static>(
        &self,
        cell: &impl Readable<T>,
        callback: impl Fn() + 'static,
    ) -> CellSubscription {
        cell.register(self);
        // Compute before mounting so the dependency edges are known.
        let _ = self.get(cell);
        let id = cell.id();
        let (sub_id, newly_mounted) = {
            let mut cells = self.inner.cells.borrow_mut();
            let st = cells.get_mut(&id).expect("registered above");
            let newly = st.mount.is_none();
            let record = st.mount.get_or_insert_with(MountRecord::new);
            let sub_id = record.next_sub;
            record.next_sub += 1;
            record.subscribers.push((sub_id, Rc::new(callback)));
            (sub_id, newly)
        };
        if newly_mounted {
            tracing::debug!(cell = id, "cell mounted");
            self.mount_deps_of(id);
            self.run_mount_hook(id);
        }
        CellSubscription {
            store: self.downgrade(),
            cell: id,
            sub: sub_id,
        }
    }

    /// Version of the cell's cached value (0 if never computed).
    #[must_use]
    pub fn version_of(&self, id: CellId) -> u64 {
        self.inner
            .cells
            .borrow()
            .get(&id)
            .map_or(0, |st| st.version)
    }

    /// Whether the cell currently has subscribers or mounted dependents.
    #[must_use]
    pub fn is_mounted<T: Clone + 'static>(&self, cell: &impl Readable<T>) -> bool {
        self.inner
            .cells
            .borrow()
            .get(&cell.id())
            .is_some_and(|st| st.mount.is_some())
    }

    /// Number of cells this store has state for.
    #[must_use]
    pub fn cell_count(&self) -> usize {
        self.inner.cells.borrow().len()
    }

    // -- registration -------------------------------------------------------

    pub(crate) fn register_primitive<T: Clone + 'static>(&self, cell: &Cell<T>) {
        let mut cells = self.inner.cells.borrow_mut();
        cells.entry(cell.id()).or_insert_with(|| {
            let hook_cell = cell.clone();
            let mount_hook: Rc<dyn Fn(&Store) -> Option<Unmount>> = Rc::new(move |store| {
                let hook = hook_cell.def.on_mount.borrow().clone();
                hook.and_then(|hook| {
                    hook(CellSetter {
                        store: store.downgrade(),
                        cell: hook_cell.clone(),
                    })
                })
            });
            CellState {
                value: None,
                version: 0,
                dirty: false,
                deps: Vec::new(),
                dependents: HashSet::new(),
                kind: CellKind::Primitive,
                label: cell.def.label.borrow().clone(),
                private: cell.def.private.get(),
                refresher: None,
                mount_hook: Some(mount_hook),
                mount: None,
            }
        });
    }

    pub(crate) fn register_derived<T: Clone + 'static, A: 'static, R: 'static>(
        &self,
        cell: &DerivedCell<T, A, R>,
    ) {
        let mut cells = self.inner.cells.borrow_mut();
        cells.entry(cell.id()).or_insert_with(|| {
            let refresh_cell = cell.clone();
            let refresher: Rc<dyn Fn(&Store) -> bool> =
                Rc::new(move |store| store.refresh_derived(&refresh_cell));
            CellState {
                value: None,
                version: 0,
                dirty: false,
                deps: Vec::new(),
                dependents: HashSet::new(),
                kind: CellKind::Derived,
                label: cell.def.label.borrow().clone(),
                private: cell.def.private.get(),
                refresher: Some(refresher),
                mount_hook: None,
                mount: None,
            }
        });
    }

    // -- recomputation ------------------------------------------------------

    pub(crate) fn refresh_primitive<T: Clone + 'static>(&self, cell: &Cell<T>) -> bool {
        let mut cells = self.inner.cells.borrow_mut();
        let st = cells.get_mut(&cell.id()).expect("registered");
        if st.value.is_none() {
            st.value = Some(Box::new(cell.def.initial.clone()));
        }
        false
    }

    pub(crate) fn refresh_derived<T: Clone + 'static, A: 'static, R: 'static>(
        &self,
        cell: &DerivedCell<T, A, R>,
    ) -> bool {
        let id = cell.id();

        // Memoization: cached and no dependency version moved.
        let fresh_cached = {
            let cells = self.inner.cells.borrow();
            match cells.get(&id) {
                Some(st) if st.value.is_some() => st
                    .deps
                    .iter()
                    .all(|(dep, seen)| cells.get(dep).is_some_and(|d| d.version == *seen)),
                _ => false,
            }
        };
        if fresh_cached {
            if let Some(st) = self.inner.cells.borrow_mut().get_mut(&id) {
                st.dirty = false;
            }
            return false;
        }

        {
            let stack = self.inner.read_stack.borrow();
            assert!(
                !stack.contains(&id),
                "cyclic dependency: cell {id} is already being computed",
            );
        }

        self.inner.read_stack.borrow_mut().push(id);
        let mut ctx = ReadCtx {
            store: self,
            deps: Vec::new(),
        };
        let value = (cell.def.read)(&mut ctx);
        let new_deps = ctx.deps;
        self.inner.read_stack.borrow_mut().pop();

        let (old_deps, mounted, changed) = {
            let mut cells = self.inner.cells.borrow_mut();
            let (old_deps, mounted, changed) = {
                let st = cells.get_mut(&id).expect("registered");
                let changed = match (st.value.as_ref(), cell.def.eq.as_ref()) {
                    (None, _) | (Some(_), None) => true,
                    (Some(old), Some(eq)) => old
                        .downcast_ref::<T>()
                        .is_none_or(|old| !eq(old, &value)),
                };
                st.value = Some(Box::new(value));
                if changed {
                    st.version += 1;
                }
                st.dirty = false;
                let old_deps: Vec<CellId> = st.deps.iter().map(|(dep, _)| *dep).collect();
                st.deps = new_deps.clone();
                (old_deps, st.mount.is_some(), changed)
            };
            for (dep, _) in &new_deps {
                if let Some(dep_state) = cells.get_mut(dep) {
                    dep_state.dependents.insert(id);
                }
            }
            for dep in &old_deps {
                if !new_deps.iter().any(|(new_dep, _)| new_dep == dep) {
                    if let Some(dep_state) = cells.get_mut(dep) {
                        dep_state.dependents.remove(&id);
                    }
                }
            }
            (old_deps, mounted, changed)
        };

        // Keep the mounted-dependency graph in step with dynamic deps.
        if mounted {
            for (dep, _) in &new_deps {
                if !old_deps.contains(dep) {
                    self.mount_dependency(*dep, id);
                }
            }
            for dep in &old_deps {
                if !new_deps.iter().any(|(new_dep, _)| new_dep == dep) {
                    self.release_dependency(*dep, id);
                }
            }
        }

        tracing::trace!(cell = id, changed, "derived cell recomputed");
        changed
    }

    // -- change propagation -------------------------------------------------

    fn after_change(&self, id: CellId) {
        // Dirty every transitive dependent.
        let affected = {
            let mut cells = self.inner.cells.borrow_mut();
            let mut queue: VecDeque<CellId> = cells
                .get(&id)
                .map(|st| st.dependents.iter().copied().collect())
                .unwrap_or_default();
            let mut seen: HashSet<CellId> = queue.iter().copied().collect();
            let mut affected = Vec::new();
            while let Some(next) = queue.pop_front() {
                if let Some(st) = cells.get_mut(&next) {
                    st.dirty = true;
                    affected.push(next);
                    for dependent in &st.dependents {
                        if seen.insert(*dependent) {
                            queue.push_back(*dependent);
                        }
                    }
                }
            }
            affected
        };

        // Refresh mounted dirty cells and collect every notification due.
        let mut notifications = self.subscribers_of(id);
        for affected_id in affected {
            let (mounted, dirty, refresher) = {
                let cells = self.inner.cells.borrow();
                match cells.get(&affected_id) {
                    Some(st) => (st.mount.is_some(), st.dirty, st.refresher.clone()),
                    None => (false, false, None),
                }
            };
            if mounted && dirty {
                if let Some(refresher) = refresher {
                    if refresher(self) {
                        notifications.extend(self.subscribers_of(affected_id));
                    }
                }
            }
        }

        tracing::trace!(cell = id, notified = notifications.len(), "change propagated");
        for callback in notifications {
            callback();
        }
    }

    fn subscribers_of(&self, id: CellId) -> Vec<Rc<dyn Fn()>> {
        self.inner
            .cells
            .borrow()
            .get(&id)
            .and_then(|st| st.mount.as_ref())
            .map(|record| {
                record
                    .subscribers
                    .iter()
                    .map(|(_, callback)| Rc::clone(callback))
                    .collect()
            })
            .unwrap_or_default()
    }

    // -- mount lifecycle ----------------------------------------------------

    fn mount_deps_of(&self, id: CellId) {
        let deps: Vec<CellId> = {
            let cells = self.inner.cells.borrow();
            cells
                .get(&id)
                .map(|st| st.deps.iter().map(|(dep, _)| *dep).collect())
                .unwrap_or_default()
        };
        for dep in deps {
            self.mount_dependency(dep, id);
        }
    }

    fn mount_dependency(&self, dep: CellId, dependent: CellId) {
        let newly_mounted = {
            let mut cells = self.inner.cells.borrow_mut();
            match cells.get_mut(&dep) {
                Some(st) => {
                    let newly = st.mount.is_none();
                    let record = st.mount.get_or_insert_with(MountRecord::new);
                    record.dependent_refs.insert(dependent);
                    newly
                }
                None => false,
            }
        };
        if newly_mounted {
            tracing::debug!(cell = dep, via = dependent, "dependency mounted");
            self.mount_deps_of(dep);
            self.run_mount_hook(dep);
        }
    }

    fn run_mount_hook(&self, id: CellId) {
        let hook = {
            let cells = self.inner.cells.borrow();
            cells.get(&id).and_then(|st| st.mount_hook.clone())
        };
        let Some(hook) = hook else {
            return;
        };
        // The hook may write cells (publish-on-mount), so no borrow is held.
        if let Some(unmount) = hook(self) {
            let mut cells = self.inner.cells.borrow_mut();
            if let Some(record) = cells.get_mut(&id).and_then(|st| st.mount.as_mut()) {
                record.unmount = Some(unmount);
            } else {
                drop(cells);
                unmount();
            }
        }
    }

    fn release_dependency(&self, dep: CellId, dependent: CellId) {
        let should_unmount = {
            let mut cells = self.inner.cells.borrow_mut();
            match cells.get_mut(&dep).and_then(|st| st.mount.as_mut()) {
                Some(record) => {
                    record.dependent_refs.remove(&dependent);
                    record.is_idle()
                }
                None => false,
            }
        };
        if should_unmount {
            self.unmount_cell(dep);
        }
    }

    fn unmount_cell(&self, id: CellId) {
        let (record, deps, kind) = {
            let mut cells = self.inner.cells.borrow_mut();
            match cells.get_mut(&id) {
                Some(st) => {
                    let record = st.mount.take();
                    let deps: Vec<CellId> = st.deps.iter().map(|(dep, _)| *dep).collect();
                    (record, deps, st.kind)
                }
                None => return,
            }
        };
        let Some(mut record) = record else {
            return;
        };
        tracing::debug!(cell = id, "cell unmounted");
        if let Some(unmount) = record.unmount.take() {
            unmount();
        }
        if kind == CellKind::Derived {
            // Evict the cache so a remount recomputes from scratch.
            let mut cells = self.inner.cells.borrow_mut();
            if let Some(st) = cells.get_mut(&id) {
                st.value = None;
                st.deps.clear();
                st.dirty = false;
            }
            for dep in &deps {
                if let Some(dep_state) = cells.get_mut(dep) {
                    dep_state.dependents.remove(&id);
                }
            }
        }
        for dep in deps {
            self.release_dependency(dep, id);
        }
    }

    fn remove_subscriber(&self, cell: CellId, sub: u64) {
        let should_unmount = {
            let mut cells = self.inner.cells.borrow_mut();
            match cells.get_mut(&cell).and_then(|st| st.mount.as_mut()) {
                Some(record) => {
                    record.subscribers.retain(|(id, _)| *id != sub);
                    record.is_idle()
                }
                None => false,
            }
        };
        if should_unmount {
            self.unmount_cell(cell);
        }
    }
}

/// Dependency-tracking read context handed to derived read functions.
pub struct ReadCtx<'a> {
    store: &'a Store,
    deps: Vec<(CellId, u64)>,
}

impl ReadCtx<'_> {
    /// Read a cell and record it as a dependency of the computation.
    pub fn get<T: Clone + 'static>(&mut self, cell: &impl Readable<T>) -> T {
        let value = self.store.get(cell);
        let version = self.store.version_of(cell.id());
        self.deps.push((cell.id(), version));
        value
    }

    /// Read a cell **without** recording a dependency. Changes to the peeked
    /// cell will not recompute this computation.
    pub fn peek<T: Clone + 'static>(&self, cell: &impl Readable<T>) -> T {
        self.store.get(cell)
    }

    /// A weak handle to the store this computation runs in.
    #[must_use]
    pub fn store(&self) -> WeakStore {
        self.store.downgrade()
    }
}

/// Write context handed to derived write functions.
pub struct WriteCtx<'a> {
    store: &'a Store,
}

impl WriteCtx<'_> {
    pub fn get<T: Clone + 'static>(&self, cell: &impl Readable<T>) -> T {
        self.store.get(cell)
    }

    pub fn set<T: Clone + 'static>(&self, cell: &Cell<T>, value: T) {
        self.store.set(cell, value);
    }

    pub fn dispatch<T: Clone + 'static, A: 'static, R: 'static>(
        &self,
        cell: &DerivedCell<T, A, R>,
        action: A,
    ) -> R {
        self.store.dispatch(cell, action)
    }

    /// A weak handle to the store this write runs in.
    #[must_use]
    pub fn store(&self) -> WeakStore {
        self.store.downgrade()
    }
}

/// RAII guard for a cell subscription. Dropping the guard detaches the
/// subscriber and unmounts the cell if it was the last attachment.
pub struct CellSubscription {
    store: WeakStore,
    cell: CellId,
    sub: u64,
}

impl Drop for CellSubscription {
    fn drop(&mut self) {
        if let Some(store) = self.store.upgrade() {
            store.remove_subscriber(self.cell, self.sub);
        }
    }
}

impl fmt::Debug for CellSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CellSubscription")
            .field("cell", &self.cell)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
