//! Device drivers.
//!
//! Character devices register here by device id; the VFS routes reads,
//! writes, and mmap requests on device special files through the
//! registry.

pub mod memdevs;
pub mod tty;

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use spin::{Mutex, Once};

use crate::errno::{Errno, KResult};
use crate::kern::thread::KThread;
use crate::types::DevId;
use crate::vm::mobj::Mobj;
use crate::vm::pframe::PFrame;

/// Major number of the memory devices.
pub const MEM_MAJOR: u16 = 1;
/// Major number of TTYs.
pub const TTY_MAJOR: u16 = 2;

/// The null device.
pub const MEM_NULL_DEVID: DevId = DevId::new(MEM_MAJOR, 0);
/// The zero device.
pub const MEM_ZERO_DEVID: DevId = DevId::new(MEM_MAJOR, 1);

// ============================================================================
// Character Device Interface
// ============================================================================

/// Operations a character device may support. Devices without a memory
/// side leave the mmap and page operations at their defaults, which
/// report `ENODEV` to callers.
pub trait CharDev: Send + Sync {
    /// Read up to `buf.len()` bytes. `thr` is the calling thread, for
    /// devices whose reads can block.
    fn read(&self, thr: &Arc<KThread>, pos: usize, buf: &mut [u8]) -> KResult<usize>;

    /// Write `buf` to the device.
    fn write(&self, pos: usize, buf: &[u8]) -> KResult<usize>;

    /// Produce a memory object for mapping this device.
    fn mmap(&self) -> KResult<Arc<Mobj>> {
        Err(Errno::ENODEV)
    }

    /// Fill one page of a device-backed memory object.
    fn fill_pframe(&self, _pf: &PFrame) -> KResult<()> {
        Err(Errno::ENODEV)
    }
}

// ============================================================================
// Device Registry
// ============================================================================

static CHARDEVS: Once<Mutex<BTreeMap<DevId, Arc<dyn CharDev>>>> = Once::new();

fn registry() -> &'static Mutex<BTreeMap<DevId, Arc<dyn CharDev>>> {
    CHARDEVS.call_once(|| Mutex::new(BTreeMap::new()))
}

/// Register a character device under `id`.
pub fn chardev_register(id: DevId, dev: Arc<dyn CharDev>) -> KResult<()> {
    let mut devs = registry().lock();
    if devs.contains_key(&id) {
        return Err(Errno::EEXIST);
    }
    devs.insert(id, dev);
    Ok(())
}

/// Find the character device registered under `id`.
pub fn chardev_lookup(id: DevId) -> Option<Arc<dyn CharDev>> {
    registry().lock().get(&id).cloned()
}

/// Register the built-in devices. Safe to call more than once.
pub fn init() {
    memdevs::init();
    tty::init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_rejects_duplicates() {
        init();
        assert!(chardev_lookup(MEM_NULL_DEVID).is_some());
        let dev = chardev_lookup(MEM_ZERO_DEVID).unwrap();
        assert_eq!(
            chardev_register(MEM_ZERO_DEVID, dev).unwrap_err(),
            Errno::EEXIST
        );
    }

    #[test]
    fn test_lookup_unknown_device() {
        assert!(chardev_lookup(DevId::new(200, 0)).is_none());
    }
}
