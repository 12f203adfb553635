#![forbid(unsafe_code)]

//! Deferred-notification queue for the tracked runtimes.
//!
//! A [`Scheduler`] is a single-threaded FIFO of deferred jobs. Tracked
//! containers enqueue at most one delivery job per notification batch;
//! [`drain`](Scheduler::drain) runs jobs until the queue is idle, including
//! jobs enqueued by the jobs themselves. There are no threads, timers, or
//! cancellation — "deferred" only means "after the current callback turn,
//! coalesced with whatever else is pending".

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

type Job = Box<dyn FnOnce()>;

struct SchedulerInner {
    queue: RefCell<VecDeque<Job>>,
    draining: Cell<bool>,
}

/// A shared FIFO of deferred jobs.
///
/// Cloning a `Scheduler` creates a new handle to the **same** queue, so
/// multiple tracked containers can coalesce their deferred work on one
/// drain call.
#[derive(Clone)]
pub struct Scheduler {
    inner: Rc<SchedulerInner>,
}

impl Scheduler {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(SchedulerInner {
                queue: RefCell::new(VecDeque::new()),
                draining: Cell::new(false),
            }),
        }
    }

    /// Enqueue a job for the next drain.
    pub fn defer(&self, job: impl FnOnce() + 'static) {
        self.inner.queue.borrow_mut().push_back(Box::new(job));
    }

    /// Run queued jobs until the queue is idle. Returns the number of jobs
    /// executed. A re-entrant drain (from within a job) is a no-op; the
    /// outer drain picks up anything the job enqueued.
    pub fn drain(&self) -> usize {
        if self.inner.draining.get() {
            return 0;
        }
        self.inner.draining.set(true);
        let mut ran = 0;
        loop {
            let job = self.inner.queue.borrow_mut().pop_front();
            match job {
                Some(job) => {
                    ran += 1;
                    job();
                }
                None => break,
            }
        }
        self.inner.draining.set(false);
        ran
    }

    /// Number of jobs waiting.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.queue.borrow().len()
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.pending() == 0
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("pending", &self.pending())
            .field("draining", &self.inner.draining.get())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
