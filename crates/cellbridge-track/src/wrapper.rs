#![forbid(unsafe_code)]

//! Tracked single-field `{ value }` container.
//!
//! # Design
//!
//! [`ScalarWrapper<V>`] holds one value of any `Clone` type (including
//! callables) and reports every accepted write to its subscribers. Because
//! this runtime has no reference-identity notion for arbitrary `V`, each
//! write is tagged with a process-wide monotonic **stamp**; subscribers
//! receive `(new value, stamp)` and can use the stamp as the write's
//! identity. A freshly constructed wrapper carries stamp 0, which no write
//! ever reuses.
//!
//! # Failure Modes
//!
//! - **Detached subscriptions**
//!   ([`subscribe_detached`](ScalarWrapper::subscribe_detached)) are never
//!   cancelled. The callback lives exactly as long as the wrapper does;
//!   this is a documented, bounded leak for callers that want mutation
//!   forwarding to outlive their own bookkeeping.
//! - Callbacks run after the interior borrow is released, so a callback may
//!   write the wrapper again; each write is delivered individually.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::scheduler::Scheduler;

static NEXT_STAMP: AtomicU64 = AtomicU64::new(1);

/// Allocate a fresh, process-unique write stamp.
fn next_stamp() -> u64 {
    NEXT_STAMP.fetch_add(1, Ordering::Relaxed)
}

type CallbackRc<V> = Rc<dyn Fn(&V, u64)>;
type CallbackWeak<V> = Weak<dyn Fn(&V, u64)>;

enum Callback<V> {
    /// Kept alive by a [`WrapperSubscription`] guard.
    Guarded(CallbackWeak<V>),
    /// Kept alive by the wrapper itself; never cancelled.
    Pinned(CallbackRc<V>),
}

impl<V> Callback<V> {
    fn upgrade(&self) -> Option<CallbackRc<V>> {
        match self {
            Self::Guarded(weak) => weak.upgrade(),
            Self::Pinned(rc) => Some(Rc::clone(rc)),
        }
    }

    fn is_live(&self) -> bool {
        match self {
            Self::Guarded(weak) => weak.strong_count() > 0,
            Self::Pinned(_) => true,
        }
    }
}

struct WrapperSub<V> {
    sync: bool,
    callback: Callback<V>,
}

struct WrapperInner<V> {
    value: V,
    stamp: u64,
    subscribers: Vec<WrapperSub<V>>,
    /// Whether a deferred delivery job is already queued.
    queued: bool,
}

/// A tracked `{ value }` container.
///
/// Cloning a `ScalarWrapper` creates a new handle to the **same** tracked
/// state; [`ptr_eq`](ScalarWrapper::ptr_eq) compares that identity.
pub struct ScalarWrapper<V> {
    inner: Rc<RefCell<WrapperInner<V>>>,
    scheduler: Scheduler,
}

impl<V> Clone for ScalarWrapper<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
            scheduler: self.scheduler.clone(),
        }
    }
}

impl<V: fmt::Debug> fmt::Debug for ScalarWrapper<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("ScalarWrapper")
            .field("value", &inner.value)
            .field("stamp", &inner.stamp)
            .field("subscriber_count", &inner.subscribers.len())
            .finish()
    }
}

impl<V: Clone + 'static> ScalarWrapper<V> {
    /// Create a wrapper with its own private deferred queue.
    #[must_use]
    pub fn new(value: V) -> Self {
        Self::with_scheduler(value, &Scheduler::new())
    }

    /// Create a wrapper whose deferred notifications coalesce on a shared
    /// [`Scheduler`].
    #[must_use]
    pub fn with_scheduler(value: V, scheduler: &Scheduler) -> Self {
        Self {
            inner: Rc::new(RefCell::new(WrapperInner {
                value,
                stamp: 0,
                subscribers: Vec::new(),
                queued: false,
            })),
            scheduler: scheduler.clone(),
        }
    }

    /// Get a clone of the current value.
    #[must_use]
    pub fn get(&self) -> V {
        self.inner.borrow().value.clone()
    }

    /// Access the current value by reference without cloning.
    pub fn with<R>(&self, f: impl FnOnce(&V) -> R) -> R {
        f(&self.inner.borrow().value)
    }

    /// Replace the value. Every write is an accepted mutation: the stamp
    /// advances and subscribers are notified, even if the new value happens
    /// to compare equal to the old one.
    pub fn set(&self, value: V) {
        let stamp = next_stamp();
        {
            let mut inner = self.inner.borrow_mut();
            inner.value = value;
            inner.stamp = stamp;
        }
        tracing::trace!(stamp, "scalar wrapper write");
        self.notify(stamp);
    }

    /// Mutate the value in place. Counts as one accepted write.
    pub fn update(&self, f: impl FnOnce(&mut V)) {
        let stamp = next_stamp();
        {
            let mut inner = self.inner.borrow_mut();
            f(&mut inner.value);
            inner.stamp = stamp;
        }
        tracing::trace!(stamp, "scalar wrapper in-place write");
        self.notify(stamp);
    }

    /// Stamp of the last accepted write; 0 if the wrapper has never been
    /// written.
    #[must_use]
    pub fn stamp(&self) -> u64 {
        self.inner.borrow().stamp
    }

    /// Subscribe to writes. The callback receives the new value and the
    /// write stamp. Dropping the returned guard unsubscribes.
    pub fn subscribe(
        &self,
        callback: impl Fn(&V, u64) + 'static,
        sync: bool,
    ) -> WrapperSubscription {
        let strong: CallbackRc<V> = Rc::new(callback);
        self.inner.borrow_mut().subscribers.push(WrapperSub {
            sync,
            callback: Callback::Guarded(Rc::downgrade(&strong)),
        });
        WrapperSubscription {
            _guard: Box::new(strong),
        }
    }

    /// Subscribe without a guard. The callback is pinned inside the wrapper
    /// and fires for every write until the wrapper itself is dropped.
    pub fn subscribe_detached(&self, callback: impl Fn(&V, u64) + 'static, sync: bool) {
        self.inner.borrow_mut().subscribers.push(WrapperSub {
            sync,
            callback: Callback::Pinned(Rc::new(callback)),
        });
    }

    /// Number of registered subscribers (including dead guarded entries not
    /// yet pruned).
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.borrow().subscribers.len()
    }

    /// Whether two handles refer to the same tracked state.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Run deferred deliveries queued by this wrapper's scheduler.
    pub fn flush(&self) -> usize {
        self.scheduler.drain()
    }

    fn notify(&self, stamp: u64) {
        // Collect live sync callbacks and note whether any deferred
        // subscriber exists, pruning dead entries while the borrow is held.
        let (sync_callbacks, has_deferred, value) = {
            let mut inner = self.inner.borrow_mut();
            inner.subscribers.retain(|sub| sub.callback.is_live());
            let sync_callbacks: Vec<CallbackRc<V>> = inner
                .subscribers
                .iter()
                .filter(|sub| sub.sync)
                .filter_map(|sub| sub.callback.upgrade())
                .collect();
            let has_deferred = inner.subscribers.iter().any(|sub| !sub.sync);
            (sync_callbacks, has_deferred, inner.value.clone())
        };

        for cb in &sync_callbacks {
            cb(&value, stamp);
        }

        if has_deferred && !self.inner.borrow().queued {
            self.inner.borrow_mut().queued = true;
            let weak = Rc::downgrade(&self.inner);
            self.scheduler.defer(move || deliver_deferred(&weak));
        }
    }
}

/// Deliver one coalesced batch to deferred subscribers, if the wrapper is
/// still alive.
fn deliver_deferred<V: Clone + 'static>(weak: &Weak<RefCell<WrapperInner<V>>>) {
    let Some(inner) = weak.upgrade() else {
        return;
    };
    let (callbacks, value, stamp) = {
        let mut inner = inner.borrow_mut();
        inner.queued = false;
        let callbacks: Vec<CallbackRc<V>> = inner
            .subscribers
            .iter()
            .filter(|sub| !sub.sync)
            .filter_map(|sub| sub.callback.upgrade())
            .collect();
        (callbacks, inner.value.clone(), inner.stamp)
    };
    for cb in &callbacks {
        cb(&value, stamp);
    }
}

/// RAII guard for a guarded wrapper subscription.
///
/// Dropping the guard drops the strong callback reference; the wrapper
/// prunes the dead entry on the next write.
pub struct WrapperSubscription {
    _guard: Box<dyn Any>,
}

impl fmt::Debug for WrapperSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WrapperSubscription").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
