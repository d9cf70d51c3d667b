//! Kernel thread management.
//!
//! Threads are the unit of execution. A thread belongs to exactly one
//! process, which provides its address space. The scheduler here is
//! cooperative and single-core: a thread runs until it sleeps, yields, or
//! exits, so thread state transitions happen only at those points.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, AtomicU32, Ordering};

use crate::types::Tid;

// ============================================================================
// Thread State Flags
// ============================================================================

/// Thread state flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ThreadState(pub u32);

impl ThreadState {
    /// Thread has not been made runnable yet
    pub const NO_STATE: Self = Self(0);
    /// Thread is running or on the run queue
    pub const RUN: Self = Self(0x01);
    /// Thread is queued on a wait queue
    pub const WAIT: Self = Self(0x02);
    /// Thread has exited
    pub const EXITED: Self = Self(0x04);

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }
}

impl core::ops::BitOr for ThreadState {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

// ============================================================================
// Kernel Thread
// ============================================================================

/// A kernel thread.
///
/// Shared via `Arc`; the fields mutated from outside the thread itself
/// (cancellation, wakeup state) are atomics so wakers never need the
/// thread's cooperation.
#[derive(Debug)]
pub struct KThread {
    /// Thread ID
    id: Tid,

    /// Current state bits
    state: AtomicU32,

    /// Set when the thread has been cancelled; checked at every
    /// cancellable suspension point
    cancelled: AtomicBool,

    /// Return value, meaningful once exited
    retval: AtomicI64,

    /// Per-thread errno of the last failing syscall
    errno: AtomicI32,
}

impl KThread {
    /// Create a fresh thread in `NO_STATE`.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            id: Tid::alloc(),
            state: AtomicU32::new(ThreadState::NO_STATE.bits()),
            cancelled: AtomicBool::new(false),
            retval: AtomicI64::new(0),
            errno: AtomicI32::new(0),
        })
    }

    /// Create a thread that is a clone of `self`, for `fork`.
    ///
    /// Carries over the return value, errno, and cancellation state; the
    /// rest is freshly initialized.
    pub fn clone_thread(&self) -> Arc<Self> {
        Arc::new(Self {
            id: Tid::alloc(),
            state: AtomicU32::new(ThreadState::NO_STATE.bits()),
            cancelled: AtomicBool::new(self.cancelled.load(Ordering::SeqCst)),
            retval: AtomicI64::new(self.retval.load(Ordering::SeqCst)),
            errno: AtomicI32::new(self.errno.load(Ordering::SeqCst)),
        })
    }

    pub fn id(&self) -> Tid {
        self.id
    }

    pub fn state(&self) -> ThreadState {
        ThreadState(self.state.load(Ordering::SeqCst))
    }

    pub fn set_state(&self, state: ThreadState) {
        self.state.store(state.bits(), Ordering::SeqCst);
    }

    /// Mark the thread cancelled and record its return value. The thread
    /// notices at its next cancellable suspension point and unwinds.
    pub fn cancel(&self, retval: i64) {
        self.retval.store(retval, Ordering::SeqCst);
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Mark the thread exited with a return value.
    pub fn exit(&self, retval: i64) {
        self.retval.store(retval, Ordering::SeqCst);
        self.set_state(ThreadState::EXITED);
    }

    pub fn retval(&self) -> i64 {
        self.retval.load(Ordering::SeqCst)
    }

    pub fn set_errno(&self, errno: i32) {
        self.errno.store(errno, Ordering::SeqCst);
    }

    pub fn errno(&self) -> i32 {
        self.errno.load(Ordering::SeqCst)
    }
}
