//! Page-fault resolution.
//!
//! Validates a user fault against the address-space map, obtains the
//! backing frame, and installs the translation. Any failure is fatal to
//! the faulting process: the caller terminates it with `EFAULT` status.
//! A kernel-mode fault never reaches this path; it panics in the trap
//! handler instead.

use crate::console::DbgArea;
use crate::errno::{Errno, KResult};
use crate::klog;
use crate::vm::page::{addr_to_pn, page_align_down, pn_to_addr, USER_MEM_HIGH, USER_MEM_LOW};
use crate::vm::pmap::{Pmap, PtFlags};
use crate::vm::vmmap::{Prot, VmMap};

/// Fault cause flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultCause(pub u32);

impl FaultCause {
    /// Fault taken in user mode; always set on this path
    pub const USER: Self = Self(1);
    /// Fault on a write access
    pub const WRITE: Self = Self(2);
    /// Fault on an instruction fetch
    pub const EXEC: Self = Self(4);

    pub const fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }
}

impl core::ops::BitOr for FaultCause {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Resolve a user page fault at `vaddr`.
///
/// On success the translation for the faulting page is installed in
/// `pmap` and the TLB entry flushed. On any error the process must be
/// killed with `EFAULT` status.
pub fn handle_pagefault(
    map: &VmMap,
    pmap: &Pmap,
    vaddr: usize,
    cause: FaultCause,
) -> KResult<()> {
    klog!(DbgArea::Vm, "pagefault at {:#x}, cause {:#x}", vaddr, cause.0);

    if vaddr < USER_MEM_LOW || vaddr >= USER_MEM_HIGH {
        return Err(Errno::EFAULT);
    }

    let vfn = addr_to_pn(vaddr);
    let area = map.lookup(vfn).ok_or(Errno::EFAULT)?;

    if area.prot == Prot::NONE {
        return Err(Errno::EFAULT);
    }
    if cause.contains(FaultCause::WRITE) {
        if !area.prot.contains(Prot::WRITE) {
            return Err(Errno::EFAULT);
        }
    } else if cause.contains(FaultCause::EXEC) {
        if !area.prot.contains(Prot::EXEC) {
            return Err(Errno::EFAULT);
        }
    } else if !area.prot.contains(Prot::READ) {
        return Err(Errno::EFAULT);
    }

    let forwrite = cause.contains(FaultCause::WRITE);
    let pf = area
        .mobj
        .get_pframe(area.pagenum_of(vfn), forwrite)
        .map_err(|_| Errno::EFAULT)?;

    // Stand-in for the virtual-to-physical translation of the frame.
    let paddr = pf.kvaddr();
    let mut flags = PtFlags::PRESENT | PtFlags::USER;
    if forwrite {
        flags = flags | PtFlags::WRITE;
    }
    pmap.map(vfn, paddr, flags);
    pmap.tlb_flush(page_align_down(pn_to_addr(vfn)));
    Ok(())
}
