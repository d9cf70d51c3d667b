//! Memory objects: the page-producing entities behind every mapping.
//!
//! A memory object caches page frames and knows how to fill and flush
//! them. Anonymous objects zero-fill; vnode objects back regular files
//! (the in-memory filesystem keeps file bytes in these pages, so there is
//! no store to flush to); device objects delegate to their character
//! device; shadow objects overlay another object for copy-on-write.
//!
//! Shadow chains always terminate in a non-shadow *bottom* object, cached
//! on every link so the read path can reach it without recursion. A
//! shadow's own page cache holds only pages that have diverged from its
//! parent chain.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};
use spin::Mutex;

use crate::drivers;
use crate::errno::{Errno, KResult};
use crate::types::DevId;
use crate::vm::pframe::PFrame;

// ============================================================================
// Memory Object Types
// ============================================================================

/// Memory object type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MobjType {
    /// Zero-filled, no backing store
    Anon,
    /// Backs a regular file's bytes
    Vnode,
    /// Copy-on-write overlay of another object
    Shadow,
    /// Pages produced by a character device
    Dev,
}

/// What produces and consumes this object's pages.
#[derive(Debug)]
enum Backing {
    Anon,
    Vnode,
    Dev {
        dev: DevId,
    },
    Shadow {
        /// Immediate parent in the chain, itself possibly a shadow.
        /// Mutable because chain collapse splices links out.
        shadowed: Mutex<Arc<Mobj>>,
        /// The non-shadow base of the chain, cached for O(1) access.
        bottom: Arc<Mobj>,
    },
}

// ============================================================================
// Memory Object
// ============================================================================

/// A reference-counted memory object. `Arc<Mobj>` is the reference count;
/// functions that consume a reference take the `Arc` by value.
#[derive(Debug)]
pub struct Mobj {
    /// Object ID, for debugging
    id: u64,

    /// Resident pages indexed by page number, behind the mobj mutex
    pages: Mutex<BTreeMap<usize, Arc<PFrame>>>,

    backing: Backing,
}

fn next_mobj_id() -> u64 {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

impl Mobj {
    fn with_backing(backing: Backing) -> Arc<Self> {
        Arc::new(Self {
            id: next_mobj_id(),
            pages: Mutex::new(BTreeMap::new()),
            backing,
        })
    }

    /// Create an anonymous object.
    pub fn anon_create() -> Arc<Self> {
        Self::with_backing(Backing::Anon)
    }

    /// Create the memory object backing a regular file.
    pub fn vnode_create() -> Arc<Self> {
        Self::with_backing(Backing::Vnode)
    }

    /// Create an object whose pages are produced by a character device.
    pub fn dev_create(dev: DevId) -> Arc<Self> {
        Self::with_backing(Backing::Dev { dev })
    }

    /// Create a shadow object over `shadowed`, consuming that reference.
    ///
    /// If `shadowed` is itself a shadow, the new object inherits its
    /// bottom; otherwise `shadowed` is the bottom.
    pub fn shadow_create(shadowed: Arc<Mobj>) -> Arc<Self> {
        let bottom = match &shadowed.backing {
            Backing::Shadow { bottom, .. } => Arc::clone(bottom),
            _ => Arc::clone(&shadowed),
        };
        debug_assert!(bottom.mtype() != MobjType::Shadow);
        Self::with_backing(Backing::Shadow {
            shadowed: Mutex::new(shadowed),
            bottom,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn mtype(&self) -> MobjType {
        match self.backing {
            Backing::Anon => MobjType::Anon,
            Backing::Vnode => MobjType::Vnode,
            Backing::Dev { .. } => MobjType::Dev,
            Backing::Shadow { .. } => MobjType::Shadow,
        }
    }

    /// Number of resident pages.
    pub fn nresident(&self) -> usize {
        self.pages.lock().len()
    }

    /// Look up a resident page without filling.
    pub fn find_pframe(&self, pagenum: usize) -> Option<Arc<PFrame>> {
        self.pages.lock().get(&pagenum).cloned()
    }

    // ========================================================================
    // Page Acquisition
    // ========================================================================

    /// Return a pinned frame for `pagenum`.
    ///
    /// With `forwrite` the returned frame is writable without further
    /// copying: for a shadow object that means a frame in the shadow's own
    /// cache, populated from the chain. Reads may be satisfied by any
    /// object in the chain that has the page.
    pub fn get_pframe(&self, pagenum: usize, forwrite: bool) -> KResult<Arc<PFrame>> {
        match &self.backing {
            Backing::Shadow { .. } if !forwrite => self.shadow_read_pframe(pagenum),
            _ => self.default_get_pframe(pagenum),
        }
    }

    /// Look up the frame in this object's own cache, creating and filling
    /// it on a miss.
    fn default_get_pframe(&self, pagenum: usize) -> KResult<Arc<PFrame>> {
        let mut pages = self.pages.lock();
        if let Some(pf) = pages.get(&pagenum) {
            return Ok(Arc::clone(pf));
        }
        let pf = PFrame::new(pagenum);
        self.fill_pframe(&pf)?;
        pages.insert(pagenum, Arc::clone(&pf));
        Ok(pf)
    }

    /// Read path for shadows: nearest cached copy in the chain, else the
    /// bottom object. Iterative; a long chain must not recurse.
    fn shadow_read_pframe(&self, pagenum: usize) -> KResult<Arc<PFrame>> {
        if let Some(pf) = self.find_pframe(pagenum) {
            return Ok(pf);
        }
        let mut cur = match &self.backing {
            Backing::Shadow { shadowed, .. } => shadowed.lock().clone(),
            _ => unreachable!("shadow read path on non-shadow object"),
        };
        loop {
            let next = match &cur.backing {
                Backing::Shadow { shadowed, .. } => {
                    if let Some(pf) = cur.find_pframe(pagenum) {
                        return Ok(pf);
                    }
                    shadowed.lock().clone()
                }
                _ => return cur.get_pframe(pagenum, false),
            };
            cur = next;
        }
    }

    /// Populate a freshly created frame.
    fn fill_pframe(&self, pf: &PFrame) -> KResult<()> {
        match &self.backing {
            // New frames are already zeroed; nothing further to produce.
            Backing::Anon | Backing::Vnode => Ok(()),
            Backing::Dev { dev } => drivers::chardev_lookup(*dev)
                .ok_or(Errno::ENODEV)?
                .fill_pframe(pf),
            Backing::Shadow { shadowed, .. } => {
                let mut cur = shadowed.lock().clone();
                loop {
                    let next = match &cur.backing {
                        Backing::Shadow { shadowed, .. } => {
                            if let Some(src) = cur.find_pframe(pf.pagenum()) {
                                pf.data().copy_from_slice(&src.data());
                                return Ok(());
                            }
                            shadowed.lock().clone()
                        }
                        _ => break,
                    };
                    cur = next;
                }
                // Whole chain missed; the bottom object produces the page.
                let src = cur.get_pframe(pf.pagenum(), false)?;
                pf.data().copy_from_slice(&src.data());
                Ok(())
            }
        }
    }

    /// Write a dirty page back to its backing store. Anonymous and shadow
    /// objects have none, and vnode objects *are* the store for their
    /// file's bytes, so every variant just retires the dirty bit.
    pub fn flush_pframe(&self, pf: &PFrame) -> KResult<()> {
        pf.clear_dirty();
        Ok(())
    }

    // ========================================================================
    // Shadow Chain Collapse
    // ========================================================================

    /// Shorten this object's shadow chain as far as possible.
    ///
    /// Each singly-referenced shadow link above us is absorbed: frames we
    /// have not diverged on migrate into our cache, then the link is
    /// spliced out and destroyed. Stops at the first link still shared
    /// with another chain. A no-op on non-shadow objects.
    pub fn shadow_collapse(&self) {
        let shadowed = match &self.backing {
            Backing::Shadow { shadowed, .. } => shadowed,
            _ => return,
        };
        loop {
            let parent = shadowed.lock().clone();
            let next = match &parent.backing {
                Backing::Shadow {
                    shadowed: parent_link,
                    ..
                } => {
                    // Two counts on an exclusively-chained link: the chain
                    // reference and our local handle.
                    if Arc::strong_count(&parent) != 2 {
                        break;
                    }
                    {
                        let mut own = self.pages.lock();
                        let parent_pages = parent.pages.lock();
                        for (pn, pf) in parent_pages.iter() {
                            own.entry(*pn).or_insert_with(|| Arc::clone(pf));
                        }
                    }
                    parent_link.lock().clone()
                }
                _ => break,
            };
            // Splicing out the old link drops its last reference.
            *shadowed.lock() = next;
        }
    }

    /// The non-shadow object at the base of a shadow's chain. `None` for
    /// objects that are not shadows, which are their own base.
    pub fn bottom(&self) -> Option<Arc<Mobj>> {
        match &self.backing {
            Backing::Shadow { bottom, .. } => Some(Arc::clone(bottom)),
            _ => None,
        }
    }

    /// Immediate parent of a shadow object.
    pub fn shadowed(&self) -> Option<Arc<Mobj>> {
        match &self.backing {
            Backing::Shadow { shadowed, .. } => Some(shadowed.lock().clone()),
            _ => None,
        }
    }

    /// Drop every cached page. Used when a file is truncated to zero.
    pub fn clear_pages(&self) {
        self.pages.lock().clear();
    }
}

impl Drop for Mobj {
    fn drop(&mut self) {
        // Flush dirty frames before the object goes away. The shadowed and
        // bottom references of a shadow drop with the struct.
        let frames: Vec<Arc<PFrame>> = self.pages.get_mut().values().cloned().collect();
        for pf in frames {
            if pf.is_dirty() {
                let _ = self.flush_pframe(&pf);
            }
        }
    }
}
