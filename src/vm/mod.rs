//! Virtual memory: page frames, memory objects with copy-on-write shadow
//! chains, per-process address-space maps, and the page-fault resolver.

pub mod brk;
pub mod mmap;
pub mod mobj;
pub mod page;
pub mod pagefault;
pub mod pframe;
pub mod pmap;
pub mod vmmap;

pub use mobj::{Mobj, MobjType};
pub use pframe::PFrame;
pub use vmmap::{Dir, MapFlags, Prot, VmArea, VmMap};
