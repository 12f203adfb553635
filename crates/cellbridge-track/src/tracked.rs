#![forbid(unsafe_code)]

//! Mutable object trees with change notification and snapshots.
//!
//! # Design
//!
//! [`TrackedObject`] is the "mutable-with-notification" abstraction: a
//! path-addressed object tree whose in-place mutations are observable and
//! whose state can be summarized at any moment as an immutable
//! [`Snapshot`]. Internally the live state *is* a persistent tree — every
//! mutation rebuilds only the path it touches, so a snapshot is an O(1)
//! root clone, snapshot identity changes exactly when the tree changed, and
//! untouched subtrees keep their node identity across snapshots.
//!
//! # Invariants
//!
//! 1. `version` increments by exactly 1 per tree-changing mutation.
//! 2. A mutation that leaves the tree identical (same leaf, unreachable
//!    path) is a silent no-op: no version bump, no notification.
//! 3. Synchronous subscribers run once per mutation, within the mutating
//!    call, after the interior borrow is released.
//! 4. Deferred subscribers are coalesced: any number of mutations between
//!    drains produce exactly one delivery per subscriber.
//!
//! # Failure Modes
//!
//! - Unreachable paths (missing intermediates, out-of-range indices, key
//!   lookups on scalars) are silent no-ops by contract; the mutation surface
//!   is deliberately permissive.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::scheduler::Scheduler;
use crate::value::{PathSeg, Snapshot, remove_at, set_at, truncate_at};

type CallbackRc = Rc<dyn Fn()>;
type CallbackWeak = Weak<dyn Fn()>;

struct TrackSub {
    sync: bool,
    callback: CallbackWeak,
}

struct TrackedInner {
    root: Snapshot,
    version: u64,
    subscribers: Vec<TrackSub>,
    /// Whether a deferred delivery job is already queued.
    queued: bool,
}

/// A mutable, observable object tree.
///
/// Cloning a `TrackedObject` creates a new handle to the **same** tree —
/// the identity of the tracked state never changes for its lifetime.
pub struct TrackedObject {
    inner: Rc<RefCell<TrackedInner>>,
    scheduler: Scheduler,
}

impl Clone for TrackedObject {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
            scheduler: self.scheduler.clone(),
        }
    }
}

impl fmt::Debug for TrackedObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("TrackedObject")
            .field("root", &inner.root)
            .field("version", &inner.version)
            .field("subscriber_count", &inner.subscribers.len())
            .finish()
    }
}

impl TrackedObject {
    /// Create a tracked tree with its own private deferred queue.
    ///
    /// The root is normally a compound node (object or array); scalar roots
    /// are accepted but cannot be mutated field by field.
    #[must_use]
    pub fn new(root: Snapshot) -> Self {
        Self::with_scheduler(root, &Scheduler::new())
    }

    /// Create a tracked tree whose deferred notifications coalesce on a
    /// shared [`Scheduler`].
    #[must_use]
    pub fn with_scheduler(root: Snapshot, scheduler: &Scheduler) -> Self {
        Self {
            inner: Rc::new(RefCell::new(TrackedInner {
                root,
                version: 0,
                subscribers: Vec::new(),
                queued: false,
            })),
            scheduler: scheduler.clone(),
        }
    }

    /// Capture the current state as an immutable snapshot. O(1).
    ///
    /// Two snapshots are [`same`](Snapshot::same) exactly when no mutation
    /// changed the tree between the two captures.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        self.inner.borrow().root.clone()
    }

    /// Read the node at `path`, if it exists.
    #[must_use]
    pub fn get(&self, path: &[PathSeg]) -> Option<Snapshot> {
        self.inner.borrow().root.get_path(path).cloned()
    }

    /// Write `value` at `path`. The empty path replaces the root.
    ///
    /// No-op (no notification) when the existing leaf is already `same` as
    /// `value` or the path is unreachable.
    pub fn set(&self, path: &[PathSeg], value: Snapshot) {
        let rebuilt = {
            let inner = self.inner.borrow();
            set_at(&inner.root, path, value)
        };
        match rebuilt {
            Some(root) => self.commit(root, path, "set"),
            None => trace_noop(path, "set"),
        }
    }

    /// Delete the child at `path`. Removing an array index shifts later
    /// elements down. No-op when the path does not exist.
    pub fn remove(&self, path: &[PathSeg]) {
        let rebuilt = {
            let inner = self.inner.borrow();
            remove_at(&inner.root, path)
        };
        match rebuilt {
            Some(root) => self.commit(root, path, "remove"),
            None => trace_noop(path, "remove"),
        }
    }

    /// Shrink the array at `path` to `len` elements. No-op when the path
    /// does not name an array longer than `len`.
    pub fn truncate(&self, path: &[PathSeg], len: usize) {
        let rebuilt = {
            let inner = self.inner.borrow();
            truncate_at(&inner.root, path, len)
        };
        match rebuilt {
            Some(root) => self.commit(root, path, "truncate"),
            None => trace_noop(path, "truncate"),
        }
    }

    /// Number of tree-changing mutations so far.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.borrow().version
    }

    /// Subscribe to mutations. With `sync` the callback runs within each
    /// mutating call; otherwise deliveries are coalesced until the
    /// scheduler drains. Dropping the guard unsubscribes.
    pub fn subscribe(&self, callback: impl Fn() + 'static, sync: bool) -> TrackSubscription {
        let strong: CallbackRc = Rc::new(callback);
        self.inner.borrow_mut().subscribers.push(TrackSub {
            sync,
            callback: Rc::downgrade(&strong),
        });
        TrackSubscription {
            _guard: Box::new(strong),
        }
    }

    /// Number of registered subscribers (including dead entries not yet
    /// pruned).
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.borrow().subscribers.len()
    }

    /// The scheduler carrying this tree's deferred notifications.
    #[must_use]
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Run deferred deliveries. Returns the number of jobs executed.
    pub fn flush(&self) -> usize {
        self.scheduler.drain()
    }

    /// Whether two handles refer to the same tracked tree.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    fn commit(&self, root: Snapshot, path: &[PathSeg], op: &'static str) {
        let version = {
            let mut inner = self.inner.borrow_mut();
            inner.root = root;
            inner.version += 1;
            inner.version
        };
        tracing::trace!(op, path = %fmt_path(path), version, "tracked mutation");
        self.notify();
    }

    fn notify(&self) {
        let (sync_callbacks, has_deferred) = {
            let mut inner = self.inner.borrow_mut();
            inner
                .subscribers
                .retain(|sub| sub.callback.strong_count() > 0);
            let sync_callbacks: Vec<CallbackRc> = inner
                .subscribers
                .iter()
                .filter(|sub| sub.sync)
                .filter_map(|sub| sub.callback.upgrade())
                .collect();
            let has_deferred = inner.subscribers.iter().any(|sub| !sub.sync);
            (sync_callbacks, has_deferred)
        };

        for cb in &sync_callbacks {
            cb();
        }

        if has_deferred && !self.inner.borrow().queued {
            self.inner.borrow_mut().queued = true;
            let weak = Rc::downgrade(&self.inner);
            self.scheduler.defer(move || deliver_deferred(&weak));
        }
    }
}

fn deliver_deferred(weak: &Weak<RefCell<TrackedInner>>) {
    let Some(inner) = weak.upgrade() else {
        return;
    };
    let callbacks: Vec<CallbackRc> = {
        let mut inner = inner.borrow_mut();
        inner.queued = false;
        inner
            .subscribers
            .iter()
            .filter(|sub| !sub.sync)
            .filter_map(|sub| sub.callback.upgrade())
            .collect()
    };
    for cb in &callbacks {
        cb();
    }
}

fn trace_noop(path: &[PathSeg], op: &'static str) {
    tracing::trace!(op, path = %fmt_path(path), "tracked mutation no-op");
}

fn fmt_path(path: &[PathSeg]) -> String {
    if path.is_empty() {
        return "$".to_owned();
    }
    path.iter().map(ToString::to_string).collect()
}

/// RAII guard for a tracked-tree subscription.
///
/// Dropping the guard drops the strong callback reference; the tree prunes
/// the dead entry on the next notification cycle.
pub struct TrackSubscription {
    _guard: Box<dyn Any>,
}

impl fmt::Debug for TrackSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackSubscription").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
