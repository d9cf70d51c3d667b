//! Address-space maps: ordered sets of vmareas.
//!
//! A vmarea binds a half-open page interval to a memory object at an
//! offset, with protection and sharing flags. Areas within one map are
//! disjoint and kept sorted by start page; every page `p` in
//! `[start, end)` resolves to the area's mobj at `off + (p - start)`.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::errno::{Errno, KResult};
use crate::fs::vnode::Vnode;
use crate::vm::mobj::{Mobj, MobjType};
use crate::vm::page::{
    addr_to_pn, page_offset, PAGE_SHIFT, PAGE_SIZE, USER_MEM_HIGH_PN, USER_MEM_LOW_PN,
};
use crate::vm::pmap::Pmap;

// ============================================================================
// Protection and Mapping Flags
// ============================================================================

/// Memory protection flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Prot(pub u32);

impl Prot {
    /// No access
    pub const NONE: Self = Self(0);
    /// Read access
    pub const READ: Self = Self(1);
    /// Write access
    pub const WRITE: Self = Self(2);
    /// Execute access
    pub const EXEC: Self = Self(4);

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }
}

impl core::ops::BitOr for Prot {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Mapping flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapFlags(pub u32);

impl MapFlags {
    /// Writes are visible to every mapper of the object
    pub const SHARED: Self = Self(1);
    /// Copy-on-write: writes stay private to this mapping
    pub const PRIVATE: Self = Self(2);
    /// Map at exactly the requested address, displacing overlaps
    pub const FIXED: Self = Self(4);
    /// No backing file
    pub const ANON: Self = Self(8);

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }
}

impl core::ops::BitOr for MapFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Search direction for free-range scans
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dir {
    /// Lowest usable gap, scanning up from the bottom of user space
    LoHi,
    /// Highest usable gap, scanning down from the top of user space
    HiLo,
}

// ============================================================================
// VM Area
// ============================================================================

/// A contiguous run of virtual pages bound to one memory object.
#[derive(Debug)]
pub struct VmArea {
    /// First page of the interval
    pub start: usize,
    /// One past the last page
    pub end: usize,
    /// Offset into the mobj, in pages
    pub off: usize,
    pub prot: Prot,
    pub flags: MapFlags,
    /// One strong reference per area referring to the object
    pub mobj: Arc<Mobj>,
}

impl VmArea {
    pub fn npages(&self) -> usize {
        self.end - self.start
    }

    pub fn contains(&self, vfn: usize) -> bool {
        self.start <= vfn && vfn < self.end
    }

    /// The mobj page number backing virtual page `vfn`.
    pub fn pagenum_of(&self, vfn: usize) -> usize {
        debug_assert!(self.contains(vfn));
        self.off + (vfn - self.start)
    }
}

// ============================================================================
// VM Map
// ============================================================================

/// A process address space: disjoint vmareas ordered by start page.
#[derive(Debug, Default)]
pub struct VmMap {
    areas: BTreeMap<usize, VmArea>,
}

impl VmMap {
    pub fn new() -> Self {
        Self {
            areas: BTreeMap::new(),
        }
    }

    pub fn area_count(&self) -> usize {
        self.areas.len()
    }

    pub fn areas(&self) -> impl Iterator<Item = &VmArea> {
        self.areas.values()
    }

    /// Insert an area, which must not overlap any existing one.
    pub fn insert(&mut self, area: VmArea) {
        assert!(area.start < area.end, "empty vmarea");
        assert!(
            self.is_range_empty(area.start, area.npages()),
            "overlapping vmarea insert"
        );
        self.areas.insert(area.start, area);
    }

    /// The unique area containing page `vfn`, if any.
    pub fn lookup(&self, vfn: usize) -> Option<&VmArea> {
        self.areas
            .range(..=vfn)
            .next_back()
            .map(|(_, a)| a)
            .filter(|a| a.end > vfn)
    }

    pub fn lookup_mut(&mut self, vfn: usize) -> Option<&mut VmArea> {
        self.areas
            .range_mut(..=vfn)
            .next_back()
            .map(|(_, a)| a)
            .filter(|a| a.end > vfn)
    }

    /// True iff no existing area intersects `[start, start + npages)`.
    pub fn is_range_empty(&self, start: usize, npages: usize) -> bool {
        let end = start + npages;
        self.areas
            .range(..end)
            .next_back()
            .map_or(true, |(_, a)| a.end <= start)
    }

    /// First-fit scan for `npages` consecutive free pages inside user
    /// space. `HiLo` prefers the highest such gap, `LoHi` the lowest.
    /// Returns the starting page, or `None` when no gap fits.
    pub fn find_range(&self, npages: usize, dir: Dir) -> Option<usize> {
        if npages == 0 || npages > USER_MEM_HIGH_PN - USER_MEM_LOW_PN {
            return None;
        }
        match dir {
            Dir::LoHi => {
                let mut prev = USER_MEM_LOW_PN;
                for area in self.areas.values() {
                    let gap_end = area.start.min(USER_MEM_HIGH_PN);
                    if gap_end > prev && gap_end - prev >= npages {
                        return Some(prev);
                    }
                    prev = prev.max(area.end);
                }
                if USER_MEM_HIGH_PN > prev && USER_MEM_HIGH_PN - prev >= npages {
                    Some(prev)
                } else {
                    None
                }
            }
            Dir::HiLo => {
                let mut next = USER_MEM_HIGH_PN;
                for area in self.areas.values().rev() {
                    let gap_start = area.end.max(USER_MEM_LOW_PN);
                    if next > gap_start && next - gap_start >= npages {
                        return Some(next - npages);
                    }
                    next = next.min(area.start);
                }
                if next > USER_MEM_LOW_PN && next - USER_MEM_LOW_PN >= npages {
                    Some(next - npages)
                } else {
                    None
                }
            }
        }
    }

    // ========================================================================
    // Mapping and Unmapping
    // ========================================================================

    /// Establish a mapping of `npages` pages.
    ///
    /// With `lopage == 0` the placement comes from `find_range`; otherwise
    /// the mapping lands exactly at `lopage`, and `FIXED` displaces any
    /// overlapping areas first. A `file` supplies the backing object via
    /// its mmap operation; otherwise the mapping is anonymous. `PRIVATE`
    /// mappings wrap the backing object in a fresh shadow so writes stay
    /// local. `off` is a page-aligned byte offset into the object.
    ///
    /// Returns the starting page of the new area.
    #[allow(clippy::too_many_arguments)]
    pub fn map(
        &mut self,
        pmap: &Pmap,
        file: Option<&Arc<Vnode>>,
        lopage: usize,
        npages: usize,
        prot: Prot,
        flags: MapFlags,
        off: usize,
        dir: Dir,
    ) -> KResult<usize> {
        debug_assert!(npages > 0);
        debug_assert!(page_offset(off) == 0);

        let start = if lopage == 0 {
            self.find_range(npages, dir).ok_or(Errno::ENOMEM)?
        } else {
            lopage
        };

        let mobj = match file {
            Some(vnode) => vnode.mmap()?,
            None => Mobj::anon_create(),
        };
        // The shadow consumes the backing reference; the area's object is
        // the shadow from here on.
        let mobj = if flags.contains(MapFlags::PRIVATE) {
            Mobj::shadow_create(mobj)
        } else {
            mobj
        };

        if flags.contains(MapFlags::FIXED) && lopage != 0 && !self.is_range_empty(start, npages) {
            self.remove(pmap, start, npages)?;
        }

        self.insert(VmArea {
            start,
            end: start + npages,
            off: off >> PAGE_SHIFT,
            prot,
            flags,
            mobj,
        });
        Ok(start)
    }

    /// Unmap every page in `[lopage, lopage + npages)`.
    ///
    /// Intersecting areas are truncated, advanced, split in two, or
    /// removed outright; the page tables are unmapped and the TLB flushed
    /// over each removed subrange.
    pub fn remove(&mut self, pmap: &Pmap, lopage: usize, npages: usize) -> KResult<()> {
        debug_assert!(npages > 0);
        let endpage = lopage + npages;

        let keys: Vec<usize> = self
            .areas
            .range(..endpage)
            .filter(|(_, a)| a.end > lopage)
            .map(|(&k, _)| k)
            .collect();

        for key in keys {
            let (astart, aend) = {
                let a = &self.areas[&key];
                (a.start, a.end)
            };

            if astart < lopage && aend > endpage {
                // Region strictly inside the area: split it around the hole.
                let right = {
                    let area = self.areas.get_mut(&key).unwrap();
                    let old_end = area.end;
                    area.end = lopage;
                    VmArea {
                        start: endpage,
                        end: old_end,
                        off: area.off + (endpage - area.start),
                        prot: area.prot,
                        flags: area.flags,
                        mobj: Arc::clone(&area.mobj),
                    }
                };
                self.areas.insert(right.start, right);
            } else if astart >= lopage && aend > endpage {
                // Region covers the area's head: advance start and offset.
                let mut area = self.areas.remove(&key).unwrap();
                area.off += endpage - area.start;
                area.start = endpage;
                self.areas.insert(area.start, area);
            } else if astart < lopage {
                // Region covers the area's tail: pull the end in.
                self.areas.get_mut(&key).unwrap().end = lopage;
            } else {
                // Region swallows the area. Dropping it puts its mobj.
                self.areas.remove(&key);
            }

            let ulo = astart.max(lopage);
            let uhi = aend.min(endpage);
            pmap.unmap_range(ulo, uhi);
            pmap.tlb_flush_range(ulo, uhi - ulo);
        }
        Ok(())
    }

    // ========================================================================
    // Fork Support
    // ========================================================================

    /// Clone this map for `fork`, setting up copy-on-write.
    ///
    /// Shared areas share the source object. For each private area two
    /// fresh shadows of the current object are created, one for the parent
    /// and one for the child; the parent's objects are only swapped in
    /// after the whole clone has been built, so a failed clone leaves this
    /// map untouched.
    pub fn clone_cow(&mut self) -> KResult<VmMap> {
        let mut child = VmMap::new();
        let mut replacements: Vec<(usize, Arc<Mobj>)> = Vec::new();

        for (&start, area) in self.areas.iter() {
            let child_mobj = if area.flags.contains(MapFlags::SHARED) {
                Arc::clone(&area.mobj)
            } else {
                let parent_shadow = Mobj::shadow_create(Arc::clone(&area.mobj));
                let child_shadow = Mobj::shadow_create(Arc::clone(&area.mobj));
                replacements.push((start, parent_shadow));
                child_shadow
            };
            child.insert(VmArea {
                start: area.start,
                end: area.end,
                off: area.off,
                prot: area.prot,
                flags: area.flags,
                mobj: child_mobj,
            });
        }

        // Commit: swap the parent's private objects for their shadows.
        // The displaced references drop here.
        for (start, shadow) in replacements {
            self.areas.get_mut(&start).unwrap().mobj = shadow;
        }
        Ok(child)
    }

    /// Collapse the shadow chain of every private area. Called after a
    /// sharer of the chains has exited.
    pub fn collapse_all(&self) {
        for area in self.areas.values() {
            if area.mobj.mtype() == MobjType::Shadow {
                area.mobj.shadow_collapse();
            }
        }
    }

    // ========================================================================
    // Bulk Copy
    // ========================================================================

    /// Copy `buf.len()` bytes out of this address space starting at
    /// `vaddr`, which need not be page aligned.
    pub fn read(&self, vaddr: usize, buf: &mut [u8]) -> KResult<()> {
        let mut copied = 0;
        let mut pos = vaddr;
        while copied < buf.len() {
            let vfn = addr_to_pn(pos);
            let area = self.lookup(vfn).ok_or(Errno::EFAULT)?;
            let pf = area.mobj.get_pframe(area.pagenum_of(vfn), false)?;
            let off = page_offset(pos);
            let n = (PAGE_SIZE - off).min(buf.len() - copied);
            let data = pf.data();
            buf[copied..copied + n].copy_from_slice(&data[off..off + n]);
            copied += n;
            pos += n;
        }
        Ok(())
    }

    /// Copy `buf` into this address space starting at `vaddr`. Pages are
    /// acquired for writing and marked dirty.
    pub fn write(&self, vaddr: usize, buf: &[u8]) -> KResult<()> {
        let mut copied = 0;
        let mut pos = vaddr;
        while copied < buf.len() {
            let vfn = addr_to_pn(pos);
            let area = self.lookup(vfn).ok_or(Errno::EFAULT)?;
            let pf = area.mobj.get_pframe(area.pagenum_of(vfn), true)?;
            let off = page_offset(pos);
            let n = (PAGE_SIZE - off).min(buf.len() - copied);
            {
                let mut data = pf.data();
                data[off..off + n].copy_from_slice(&buf[copied..copied + n]);
            }
            pf.set_dirty();
            copied += n;
            pos += n;
        }
        Ok(())
    }
}
