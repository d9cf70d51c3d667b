//! Software model of the hardware page tables.
//!
//! The real MMU primitives are outside this kernel's scope; this pmap
//! records installed translations and TLB shootdowns so the fault
//! resolver and unmap paths have an observable effect.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicU64, Ordering};
use spin::Mutex;

// ============================================================================
// Page Table Entry Flags
// ============================================================================

/// Page-table entry flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PtFlags(pub u32);

impl PtFlags {
    pub const PRESENT: Self = Self(0x1);
    pub const WRITE: Self = Self(0x2);
    pub const USER: Self = Self(0x4);

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }
}

impl core::ops::BitOr for PtFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// An installed translation.
#[derive(Debug, Clone, Copy)]
pub struct PtEntry {
    /// Physical address of the frame (here, its kernel virtual address)
    pub paddr: usize,
    pub flags: PtFlags,
}

// ============================================================================
// Physical Map
// ============================================================================

/// Per-process page-table state, keyed by virtual page number.
#[derive(Debug)]
pub struct Pmap {
    entries: Mutex<BTreeMap<usize, PtEntry>>,
    tlb_flushes: AtomicU64,
}

impl Pmap {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(BTreeMap::new()),
            tlb_flushes: AtomicU64::new(0),
        })
    }

    /// Install a translation for virtual page `vfn`.
    pub fn map(&self, vfn: usize, paddr: usize, flags: PtFlags) {
        self.entries.lock().insert(vfn, PtEntry { paddr, flags });
    }

    /// Remove the translations for every page in `[lo, hi)`.
    pub fn unmap_range(&self, lo: usize, hi: usize) {
        self.entries.lock().retain(|&vfn, _| vfn < lo || vfn >= hi);
    }

    pub fn lookup(&self, vfn: usize) -> Option<PtEntry> {
        self.entries.lock().get(&vfn).copied()
    }

    pub fn mapped_count(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn tlb_flush(&self, _vaddr: usize) {
        self.tlb_flushes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tlb_flush_range(&self, _lopage: usize, _npages: usize) {
        self.tlb_flushes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tlb_flush_all(&self) {
        self.tlb_flushes.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of TLB shootdowns issued so far.
    pub fn tlb_flush_count(&self) -> u64 {
        self.tlb_flushes.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_unmap_range() {
        let pmap = Pmap::new();
        for vfn in 10..20 {
            pmap.map(vfn, vfn << 12, PtFlags::PRESENT | PtFlags::USER);
        }
        assert_eq!(pmap.mapped_count(), 10);

        pmap.unmap_range(12, 15);
        assert_eq!(pmap.mapped_count(), 7);
        assert!(pmap.lookup(12).is_none());
        assert!(pmap.lookup(15).is_some());
    }

    #[test]
    fn test_entry_flags() {
        let pmap = Pmap::new();
        pmap.map(1, 0x1000, PtFlags::PRESENT | PtFlags::USER | PtFlags::WRITE);
        let entry = pmap.lookup(1).unwrap();
        assert!(entry.flags.contains(PtFlags::WRITE));
        assert_eq!(entry.paddr, 0x1000);
    }
}
