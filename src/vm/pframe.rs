//! Page frames: cached pages belonging to memory objects.

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec;
use core::sync::atomic::{AtomicBool, Ordering};
use spin::{Mutex, MutexGuard};

use crate::vm::page::PAGE_SIZE;

/// A cached page of some memory object.
///
/// The frame belongs to exactly one mobj at a given page number. Its pin
/// count is the `Arc` strong count; holding an `Arc<PFrame>` keeps the
/// frame resident. The data mutex is the pframe lock, the innermost lock
/// rank in the kernel; it is held for the duration of a fill, flush, or
/// byte copy and across nothing else.
#[derive(Debug)]
pub struct PFrame {
    /// Page number within the owning mobj
    pagenum: usize,

    /// Page contents, behind the pframe lock
    data: Mutex<Box<[u8]>>,

    /// Set when the page has been written since its last flush
    dirty: AtomicBool,
}

impl PFrame {
    /// Allocate a zeroed frame for `pagenum`.
    pub fn new(pagenum: usize) -> Arc<Self> {
        Arc::new(Self {
            pagenum,
            data: Mutex::new(vec![0u8; PAGE_SIZE].into_boxed_slice()),
            dirty: AtomicBool::new(false),
        })
    }

    pub fn pagenum(&self) -> usize {
        self.pagenum
    }

    /// Lock and return the page contents.
    pub fn data(&self) -> MutexGuard<'_, Box<[u8]>> {
        self.data.lock()
    }

    /// Kernel virtual address of the page contents. Stands in for the
    /// physical translation when installing a page-table entry.
    pub fn kvaddr(&self) -> usize {
        self.data.lock().as_ptr() as usize
    }

    pub fn set_dirty(&self) {
        self.dirty.store(true, Ordering::SeqCst);
    }

    pub fn clear_dirty(&self) {
        self.dirty.store(false, Ordering::SeqCst);
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }
}
