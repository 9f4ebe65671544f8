//! Deferred reclamation of fragment bodies.
//!
//! Releasing a display list can happen in the frame end interrupt handler,
//! where DMA memory must not be freed. Fragments detached from released
//! lists are parked on their manager and freed later by a [`GcWork`] item
//! that the platform runs in a context allowed to sleep.

use alloc::sync::Weak;
use alloc::vec::Vec;

use portable_atomic::{AtomicBool, Ordering};

/// Something holding memory that can be freed outside interrupt context.
pub trait Reclaim: Send + Sync {
    /// Free everything awaiting reclamation.
    ///
    /// May sleep. Must not be called with the owner's lock held.
    fn reclaim(&self);
}

/// A unit of deferred work: drain one manager's orphaned fragments.
///
/// Holds a weak reference, so a work item that outlives its manager runs
/// as a no-op.
#[derive(Clone)]
pub struct GcWork {
    target: Weak<dyn Reclaim>,
}

impl GcWork {
    pub(crate) fn new(target: Weak<dyn Reclaim>) -> Self {
        Self { target }
    }

    /// Run the work item. Returns `false` if the target is gone.
    pub fn run(&self) -> bool {
        match self.target.upgrade() {
            Some(target) => {
                target.reclaim();
                true
            }
            None => false,
        }
    }
}

impl core::fmt::Debug for GcWork {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("GcWork")
            .field("alive", &(self.target.strong_count() > 0))
            .finish()
    }
}

/// Deferred execution provided by the platform.
///
/// `register` is called once per manager from thread context, when the
/// manager is created. `schedule` is called after the manager lock is
/// released, possibly from interrupt context: it must not block, must not
/// take a lock thread context can hold, and must not run the work inline.
/// Scheduling work that is already scheduled may be coalesced.
pub trait WorkQueue: Send + Sync {
    fn register(&self, _work: &GcWork) {}

    fn schedule(&self, work: &GcWork);
}

/// A [`WorkQueue`] that records requests for the owner to run later.
///
/// The owner calls [`run_pending`](Self::run_pending) from a context that
/// may sleep, such as a driver thread loop or a test. One queue can serve
/// several managers; a run drains every registered manager.
#[derive(Default)]
pub struct PollingWorkQueue {
    scheduled: AtomicBool,
    /// Every distinct work item registered
    work: spin::Mutex<Vec<GcWork>>,
}

impl PollingWorkQueue {
    pub const fn new() -> Self {
        Self {
            scheduled: AtomicBool::new(false),
            work: spin::Mutex::new(Vec::new()),
        }
    }

    /// Whether work has been scheduled since the last run.
    pub fn is_scheduled(&self) -> bool {
        self.scheduled.load(Ordering::Acquire)
    }

    /// Run the scheduled work, if any. Returns whether work ran.
    pub fn run_pending(&self) -> bool {
        if !self.scheduled.swap(false, Ordering::AcqRel) {
            return false;
        }

        let work: Vec<GcWork> = {
            let mut items = self.work.lock();
            items.retain(|item| item.target.strong_count() > 0);
            items.clone()
        };

        let mut ran = false;
        for item in &work {
            ran |= item.run();
        }
        ran
    }
}

impl WorkQueue for PollingWorkQueue {
    fn register(&self, work: &GcWork) {
        let mut items = self.work.lock();
        if !items.iter().any(|item| Weak::ptr_eq(&item.target, &work.target)) {
            items.push(work.clone());
        }
    }

    fn schedule(&self, _work: &GcWork) {
        self.scheduled.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::sync::Arc;
    use portable_atomic::AtomicUsize;

    struct Counter(AtomicUsize);

    impl Reclaim for Counter {
        fn reclaim(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn work_for(target: &Arc<Counter>) -> GcWork {
        let target: Arc<dyn Reclaim> = target.clone();
        GcWork::new(Arc::downgrade(&target))
    }

    #[test]
    fn test_polling_queue_runs_once() {
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let queue = PollingWorkQueue::new();
        let work = work_for(&counter);

        queue.register(&work);
        queue.register(&work);
        assert!(!queue.run_pending());

        queue.schedule(&work);
        queue.schedule(&work);
        assert!(queue.is_scheduled());

        assert!(queue.run_pending());
        assert!(!queue.run_pending());
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_polling_queue_serves_several_targets() {
        let first = Arc::new(Counter(AtomicUsize::new(0)));
        let second = Arc::new(Counter(AtomicUsize::new(0)));
        let queue = PollingWorkQueue::new();

        queue.register(&work_for(&first));
        queue.register(&work_for(&second));
        queue.schedule(&work_for(&first));
        assert!(queue.run_pending());

        assert_eq!(first.0.load(Ordering::SeqCst), 1);
        assert_eq!(second.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_schedule_while_run_holds_lock() {
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let queue = PollingWorkQueue::new();
        let work = work_for(&counter);
        queue.register(&work);

        // An interrupt landing while a thread is inside run_pending.
        let items = queue.work.lock();
        queue.schedule(&work);
        drop(items);

        assert!(queue.is_scheduled());
        assert!(queue.run_pending());
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dead_targets_are_dropped_on_run() {
        let live = Arc::new(Counter(AtomicUsize::new(0)));
        let dead = Arc::new(Counter(AtomicUsize::new(0)));
        let queue = PollingWorkQueue::new();
        queue.register(&work_for(&live));
        queue.register(&work_for(&dead));
        drop(dead);

        queue.schedule(&work_for(&live));
        assert!(queue.run_pending());
        assert_eq!(queue.work.lock().len(), 1);
    }

    #[test]
    fn test_work_outliving_target_is_noop() {
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let work = work_for(&counter);
        drop(counter);

        assert!(!work.run());
    }
}
