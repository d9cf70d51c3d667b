//! Scheduling primitives: wait queues, cancellable sleep, and wakeup.
//!
//! The kernel is cooperative within a single processor. A sleeping thread
//! hands its lock guard to the wait primitive, which releases the lock
//! while the thread is queued and reacquires it on wakeup, so the
//! release-and-sleep step is atomic with respect to other lock holders.

use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::{Mutex, MutexGuard};

use crate::kern::thread::{KThread, ThreadState};

// ============================================================================
// Wait Results
// ============================================================================

/// Result of a wait operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitResult {
    /// Thread was awakened normally
    Normal,
    /// Thread was cancelled while waiting
    Interrupted,
}

// ============================================================================
// Wait Queue
// ============================================================================

/// A queue of threads waiting for a condition.
///
/// Wakeup order is FIFO. A waker removes threads from the queue; a queued
/// thread that notices its cancelled bit removes itself.
#[derive(Debug)]
pub struct WaitQueue {
    waiters: Mutex<Vec<Arc<KThread>>>,
}

impl WaitQueue {
    pub const fn new() -> Self {
        Self {
            waiters: Mutex::new(Vec::new()),
        }
    }

    fn enqueue(&self, thread: &Arc<KThread>) {
        thread.set_state(ThreadState::WAIT);
        self.waiters.lock().push(Arc::clone(thread));
    }

    fn remove(&self, thread: &Arc<KThread>) {
        self.waiters.lock().retain(|t| !Arc::ptr_eq(t, thread));
    }

    fn contains(&self, thread: &Arc<KThread>) -> bool {
        self.waiters.lock().iter().any(|t| Arc::ptr_eq(t, thread))
    }

    /// Number of threads currently queued.
    pub fn waiter_count(&self) -> usize {
        self.waiters.lock().len()
    }

    /// Wake the longest-waiting thread. Returns whether one was woken.
    pub fn wakeup_one(&self) -> bool {
        let mut waiters = self.waiters.lock();
        if waiters.is_empty() {
            return false;
        }
        let thread = waiters.remove(0);
        thread.set_state(ThreadState::RUN);
        true
    }

    /// Wake every queued thread. Returns how many were woken.
    pub fn wakeup_all(&self) -> usize {
        let mut waiters = self.waiters.lock();
        let count = waiters.len();
        for thread in waiters.drain(..) {
            thread.set_state(ThreadState::RUN);
        }
        count
    }

    /// Sleep on this queue until woken or cancelled, releasing `guard`
    /// while queued.
    ///
    /// The guard is dropped only after the thread is on the queue, so a
    /// wakeup racing with the release cannot be lost. On return the lock
    /// has been reacquired. `Interrupted` means the thread's cancelled
    /// bit was set; the caller must unwind.
    pub fn cancellable_sleep_on<'a, T>(
        &self,
        lock: &'a Mutex<T>,
        guard: MutexGuard<'a, T>,
        thread: &Arc<KThread>,
    ) -> (MutexGuard<'a, T>, WaitResult) {
        if thread.is_cancelled() {
            return (guard, WaitResult::Interrupted);
        }

        self.enqueue(thread);
        drop(guard);

        loop {
            if thread.is_cancelled() {
                self.remove(thread);
                thread.set_state(ThreadState::RUN);
                return (lock.lock(), WaitResult::Interrupted);
            }
            if !self.contains(thread) {
                // A waker dequeued us.
                return (lock.lock(), WaitResult::Normal);
            }
            core::hint::spin_loop();
        }
    }
}

impl Default for WaitQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wakeup_order_is_fifo() {
        let wq = WaitQueue::new();
        let a = KThread::new();
        let b = KThread::new();
        wq.enqueue(&a);
        wq.enqueue(&b);
        assert_eq!(wq.waiter_count(), 2);

        assert!(wq.wakeup_one());
        assert!(a.state().contains(ThreadState::RUN));
        assert!(b.state().contains(ThreadState::WAIT));

        assert_eq!(wq.wakeup_all(), 1);
        assert!(b.state().contains(ThreadState::RUN));
        assert!(!wq.wakeup_one());
    }

    #[test]
    fn test_cancelled_sleep_returns_interrupted() {
        let wq = WaitQueue::new();
        let lock = Mutex::new(0u32);
        let thr = KThread::new();
        thr.cancel(-1);

        let guard = lock.lock();
        let (guard, result) = wq.cancellable_sleep_on(&lock, guard, &thr);
        assert_eq!(result, WaitResult::Interrupted);
        assert_eq!(*guard, 0);
        assert_eq!(wq.waiter_count(), 0);
    }

    #[test]
    fn test_sleep_wakes_on_wakeup_all() {
        let wq = Arc::new(WaitQueue::new());
        let lock = Arc::new(Mutex::new(0u32));
        let thr = KThread::new();

        let sleeper = {
            let wq = Arc::clone(&wq);
            let lock = Arc::clone(&lock);
            let thr = Arc::clone(&thr);
            std::thread::spawn(move || {
                let guard = lock.lock();
                let (guard, result) = wq.cancellable_sleep_on(&lock, guard, &thr);
                (*guard, result)
            })
        };

        // Wait for the sleeper to queue itself, then wake it.
        while wq.waiter_count() == 0 {
            std::thread::yield_now();
        }
        *lock.lock() = 9;
        wq.wakeup_all();

        let (seen, result) = sleeper.join().unwrap();
        assert_eq!(result, WaitResult::Normal);
        assert_eq!(seen, 9);
    }

    #[test]
    fn test_cancel_during_sleep() {
        let wq = Arc::new(WaitQueue::new());
        let lock = Arc::new(Mutex::new(0u32));
        let thr = KThread::new();

        let sleeper = {
            let wq = Arc::clone(&wq);
            let lock = Arc::clone(&lock);
            let thr = Arc::clone(&thr);
            std::thread::spawn(move || {
                let guard = lock.lock();
                let (_guard, result) = wq.cancellable_sleep_on(&lock, guard, &thr);
                result
            })
        };

        while wq.waiter_count() == 0 {
            std::thread::yield_now();
        }
        thr.cancel(-1);

        assert_eq!(sleeper.join().unwrap(), WaitResult::Interrupted);
        assert_eq!(wq.waiter_count(), 0);
    }
}
