//! The memory devices: `null` and `zero`.
//!
//! The trivial reference drivers. Reads from `null` see end-of-file;
//! reads from `zero` see zeros; writes to either succeed in full and go
//! nowhere. Only `zero` supports mapping, and each map gets a fresh
//! anonymous object.

use alloc::sync::Arc;

use crate::drivers::{chardev_register, CharDev, MEM_NULL_DEVID, MEM_ZERO_DEVID};
use crate::errno::KResult;
use crate::kern::thread::KThread;
use crate::vm::mobj::Mobj;
use crate::vm::pframe::PFrame;

struct NullDev;

impl CharDev for NullDev {
    fn read(&self, _thr: &Arc<KThread>, _pos: usize, _buf: &mut [u8]) -> KResult<usize> {
        Ok(0)
    }

    fn write(&self, _pos: usize, buf: &[u8]) -> KResult<usize> {
        Ok(buf.len())
    }

    // No mmap: mapping /dev/null is refused with ENODEV.
}

struct ZeroDev;

impl CharDev for ZeroDev {
    fn read(&self, _thr: &Arc<KThread>, _pos: usize, buf: &mut [u8]) -> KResult<usize> {
        buf.fill(0);
        Ok(buf.len())
    }

    fn write(&self, _pos: usize, buf: &[u8]) -> KResult<usize> {
        Ok(buf.len())
    }

    fn mmap(&self) -> KResult<Arc<Mobj>> {
        Ok(Mobj::anon_create())
    }

    fn fill_pframe(&self, pf: &PFrame) -> KResult<()> {
        pf.data().fill(0);
        Ok(())
    }
}

/// Register the null and zero devices.
pub fn init() {
    let _ = chardev_register(MEM_NULL_DEVID, Arc::new(NullDev));
    let _ = chardev_register(MEM_ZERO_DEVID, Arc::new(ZeroDev));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::chardev_lookup;
    use crate::errno::Errno;
    use crate::vm::mobj::MobjType;

    #[test]
    fn test_null_reads_nothing_writes_everything() {
        crate::drivers::init();
        let null = chardev_lookup(MEM_NULL_DEVID).unwrap();
        let thr = KThread::new();

        let mut buf = [0xFFu8; 16];
        assert_eq!(null.read(&thr, 0, &mut buf), Ok(0));
        assert_eq!(null.write(0, &buf), Ok(16));
        assert_eq!(null.mmap().unwrap_err(), Errno::ENODEV);
    }

    #[test]
    fn test_zero_reads_zeros() {
        crate::drivers::init();
        let zero = chardev_lookup(MEM_ZERO_DEVID).unwrap();
        let thr = KThread::new();

        let mut buf = [0xFFu8; 16];
        assert_eq!(zero.read(&thr, 0, &mut buf), Ok(16));
        assert!(buf.iter().all(|&b| b == 0));
        assert_eq!(zero.write(0, &buf), Ok(16));
    }

    #[test]
    fn test_zero_mmap_is_fresh_anon() {
        crate::drivers::init();
        let zero = chardev_lookup(MEM_ZERO_DEVID).unwrap();
        let a = zero.mmap().unwrap();
        let b = zero.mmap().unwrap();
        assert_eq!(a.mtype(), MobjType::Anon);
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_dev_backed_mobj_fills_from_device() {
        crate::drivers::init();
        let mobj = Mobj::dev_create(MEM_ZERO_DEVID);
        let pf = mobj.get_pframe(0, false).unwrap();
        assert!(pf.data().iter().all(|&b| b == 0));
    }
}
