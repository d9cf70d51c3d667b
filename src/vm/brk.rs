//! The process break: a single private anonymous vmarea whose end grows
//! and shrinks on request.
//!
//! The starting break is the end of the loaded image's data and need not
//! be page aligned; its partial page belongs to the data region, so the
//! heap proper begins at the next page boundary. The heap is at most one
//! vmarea.

use crate::console::DbgArea;
use crate::errno::{Errno, KResult};
use crate::klog;
use crate::vm::page::{addr_to_pn, page_align_up, USER_MEM_HIGH};
use crate::vm::pmap::Pmap;
use crate::vm::vmmap::{Dir, MapFlags, Prot, VmMap};

/// Break bookkeeping for one process.
#[derive(Debug, Clone, Copy)]
pub struct BrkState {
    /// End of the static image; the heap floor. Set at exec, never moves.
    pub start_brk: usize,
    /// Current break.
    pub brk: usize,
}

impl BrkState {
    pub fn new(start_brk: usize) -> Self {
        Self {
            start_brk,
            brk: start_brk,
        }
    }
}

/// Set the process break to `addr`, or report it when `addr` is `None`.
///
/// Returns the resulting break. The break may not drop below the starting
/// break nor rise beyond the top of user space; growth may not run into an
/// existing mapping.
pub fn do_brk(
    map: &mut VmMap,
    pmap: &Pmap,
    state: &mut BrkState,
    addr: Option<usize>,
) -> KResult<usize> {
    let addr = match addr {
        Some(a) => a,
        None => return Ok(state.brk),
    };

    if addr > USER_MEM_HIGH || addr < state.start_brk {
        return Err(Errno::ENOMEM);
    }

    // The heap occupies pages [lo, hi): the partial page of start_brk
    // belongs to the data region.
    let lo = addr_to_pn(page_align_up(state.start_brk));
    let cur_hi = addr_to_pn(page_align_up(state.brk));
    let new_hi = addr_to_pn(page_align_up(addr));

    if new_hi > cur_hi {
        let grow_from = cur_hi.max(lo);
        if !map.is_range_empty(grow_from, new_hi - grow_from) {
            return Err(Errno::ENOMEM);
        }
        if cur_hi <= lo {
            klog!(DbgArea::Vm, "creating heap [{:#x}, {:#x})", lo, new_hi);
            map.map(
                pmap,
                None,
                lo,
                new_hi - lo,
                Prot::READ | Prot::WRITE,
                MapFlags::PRIVATE | MapFlags::ANON | MapFlags::FIXED,
                0,
                Dir::HiLo,
            )?;
        } else {
            let heap = map.lookup_mut(lo).expect("break set but heap area missing");
            heap.end = new_hi;
        }
    } else if new_hi < cur_hi {
        map.remove(pmap, new_hi, cur_hi - new_hi)?;
    }

    state.brk = addr;
    Ok(addr)
}
