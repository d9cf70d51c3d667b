//! The mmap and munmap syscalls.

use crate::errno::{Errno, KResult};
use crate::fs::file::FMode;
use crate::proc::CurrentTask;
use crate::vm::page::{
    addr_to_pn, page_aligned, pages_for, pn_to_addr, USER_MEM_HIGH, USER_MEM_LOW,
};
use crate::vm::vmmap::{Dir, MapFlags, Prot};

/// Add a mapping to the calling process's address space.
///
/// `addr == 0` lets the kernel place the mapping (highest available
/// range); a nonzero `addr` requests that exact placement, and `FIXED`
/// additionally displaces whatever was there. Returns the address of the
/// mapping.
pub fn do_mmap(
    task: &CurrentTask,
    addr: usize,
    len: usize,
    prot: Prot,
    flags: MapFlags,
    fd: i32,
    off: usize,
) -> KResult<usize> {
    if len == 0 {
        return Err(Errno::EINVAL);
    }
    if !flags.contains(MapFlags::PRIVATE) && !flags.contains(MapFlags::SHARED) {
        return Err(Errno::EINVAL);
    }
    if !page_aligned(off) {
        return Err(Errno::EINVAL);
    }
    if flags.contains(MapFlags::FIXED) && !page_aligned(addr) {
        return Err(Errno::EINVAL);
    }
    if addr != 0 {
        let end = addr.checked_add(len).ok_or(Errno::EINVAL)?;
        if addr < USER_MEM_LOW || end > USER_MEM_HIGH {
            return Err(Errno::EINVAL);
        }
    }

    let file = if flags.contains(MapFlags::ANON) {
        None
    } else {
        let file = task.proc.files.lock().get(fd).ok_or(Errno::EBADF)?;
        if !file.mode.contains(FMode::READ) {
            return Err(Errno::EACCES);
        }
        if file.mode.contains(FMode::APPEND) && prot.contains(Prot::WRITE) {
            return Err(Errno::EACCES);
        }
        if flags.contains(MapFlags::SHARED)
            && prot.contains(Prot::WRITE)
            && !file.mode.contains(FMode::WRITE)
        {
            return Err(Errno::EACCES);
        }
        Some(file)
    };

    let lopage = addr_to_pn(addr);
    let npages = pages_for(len);
    let mut map = task.proc.vmmap.lock();
    let start = map.map(
        &task.proc.pmap,
        file.as_ref().map(|f| &f.vnode),
        lopage,
        npages,
        prot,
        flags,
        off,
        Dir::HiLo,
    )?;

    // The range may carry stale translations from a previous tenant.
    task.proc.pmap.tlb_flush_range(start, npages);
    Ok(pn_to_addr(start))
}

/// Remove every mapping in `[addr, addr + len)`.
pub fn do_munmap(task: &CurrentTask, addr: usize, len: usize) -> KResult<()> {
    if !page_aligned(addr) || len == 0 {
        return Err(Errno::EINVAL);
    }
    let end = addr.checked_add(len).ok_or(Errno::EINVAL)?;
    if addr < USER_MEM_LOW || end > USER_MEM_HIGH {
        return Err(Errno::EINVAL);
    }

    let mut map = task.proc.vmmap.lock();
    map.remove(&task.proc.pmap, addr_to_pn(addr), pages_for(len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::MEM_NULL_DEVID;
    use crate::fs::file::File;
    use crate::fs::ramfs::RamFs;
    use crate::fs::{FileMode, OFlags};
    use crate::proc::spawn_init;
    use crate::types::DevId;
    use crate::vm::mobj::MobjType;
    use crate::vm::page::PAGE_SIZE;

    fn task_with_fs() -> (CurrentTask, alloc::sync::Arc<RamFs>) {
        let fs = RamFs::new();
        let task = spawn_init("mmap-test", fs.root());
        (task, fs)
    }

    fn open_file(
        task: &CurrentTask,
        fs: &alloc::sync::Arc<RamFs>,
        path: &str,
        mode: FMode,
    ) -> i32 {
        let vnode = crate::fs::namev::open(
            &fs.root(),
            path,
            OFlags::CREAT,
            FileMode::IFREG,
            DevId::NULL,
        )
        .unwrap();
        let file = File::new(vnode, mode);
        let mut files = task.proc.files.lock();
        let fd = files.get_empty_fd().unwrap();
        files.set(fd, file);
        fd
    }

    #[test]
    fn test_mmap_argument_validation() {
        let (task, _fs) = task_with_fs();
        let anon_priv = MapFlags::PRIVATE | MapFlags::ANON;

        assert_eq!(
            do_mmap(&task, 0, 0, Prot::READ, anon_priv, -1, 0),
            Err(Errno::EINVAL)
        );
        assert_eq!(
            do_mmap(&task, 0, PAGE_SIZE, Prot::READ, MapFlags::ANON, -1, 0),
            Err(Errno::EINVAL)
        );
        assert_eq!(
            do_mmap(&task, 0, PAGE_SIZE, Prot::READ, anon_priv, -1, 3),
            Err(Errno::EINVAL)
        );
        assert_eq!(
            do_mmap(
                &task,
                USER_MEM_LOW + 1,
                PAGE_SIZE,
                Prot::READ,
                anon_priv | MapFlags::FIXED,
                -1,
                0
            ),
            Err(Errno::EINVAL)
        );
        // A file mapping without a file.
        assert_eq!(
            do_mmap(
                &task,
                0,
                PAGE_SIZE,
                Prot::READ,
                MapFlags::PRIVATE,
                7,
                0
            ),
            Err(Errno::EBADF)
        );
    }

    #[test]
    fn test_mmap_anon_roundtrip() {
        let (task, _fs) = task_with_fs();
        let addr = do_mmap(
            &task,
            0,
            100,
            Prot::READ | Prot::WRITE,
            MapFlags::PRIVATE | MapFlags::ANON,
            -1,
            0,
        )
        .unwrap();
        assert!(page_aligned(addr));

        task.proc.vmmap.lock().write(addr, b"hello").unwrap();
        let mut buf = [0u8; 5];
        task.proc.vmmap.lock().read(addr, &mut buf).unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn test_mmap_shared_file_aliases_contents() {
        let (task, fs) = task_with_fs();
        let fd = open_file(&task, &fs, "/data", FMode::READ | FMode::WRITE);

        // Write through the file, then observe it through the mapping.
        let file = task.proc.files.lock().get(fd).unwrap();
        {
            let mut inner = file.vnode.lock();
            file.vnode.write(&mut inner, 0, b"mapped!").unwrap();
        }

        let addr = do_mmap(
            &task,
            0,
            PAGE_SIZE,
            Prot::READ,
            MapFlags::SHARED,
            fd,
            0,
        )
        .unwrap();
        let mut buf = [0u8; 7];
        task.proc.vmmap.lock().read(addr, &mut buf).unwrap();
        assert_eq!(&buf, b"mapped!");
    }

    #[test]
    fn test_mmap_access_checks() {
        let (task, fs) = task_with_fs();
        let wr_only = open_file(&task, &fs, "/w", FMode::WRITE);
        assert_eq!(
            do_mmap(&task, 0, 8, Prot::READ, MapFlags::PRIVATE, wr_only, 0),
            Err(Errno::EACCES)
        );

        let rd_only = open_file(&task, &fs, "/r", FMode::READ);
        assert_eq!(
            do_mmap(
                &task,
                0,
                8,
                Prot::READ | Prot::WRITE,
                MapFlags::SHARED,
                rd_only,
                0
            ),
            Err(Errno::EACCES)
        );
        // A private writable mapping of a read-only file is fine.
        assert!(do_mmap(
            &task,
            0,
            8,
            Prot::READ | Prot::WRITE,
            MapFlags::PRIVATE,
            rd_only,
            0
        )
        .is_ok());
    }

    #[test]
    fn test_mmap_device_without_mmap_is_enodev() {
        let (task, fs) = task_with_fs();
        crate::drivers::init();
        let vnode = crate::fs::namev::open(
            &fs.root(),
            "/null",
            OFlags::CREAT,
            FileMode::IFCHR,
            MEM_NULL_DEVID,
        )
        .unwrap();
        let file = File::new(vnode, FMode::READ);
        let mut files = task.proc.files.lock();
        let fd = files.get_empty_fd().unwrap();
        files.set(fd, file);
        drop(files);

        assert_eq!(
            do_mmap(&task, 0, 8, Prot::READ, MapFlags::SHARED, fd, 0),
            Err(Errno::ENODEV)
        );
    }

    #[test]
    fn test_mmap_zero_device_yields_anon() {
        let (task, fs) = task_with_fs();
        crate::drivers::init();
        let vnode = crate::fs::namev::open(
            &fs.root(),
            "/zero",
            OFlags::CREAT,
            FileMode::IFCHR,
            crate::drivers::MEM_ZERO_DEVID,
        )
        .unwrap();
        let file = File::new(vnode, FMode::READ);
        let fd = {
            let mut files = task.proc.files.lock();
            let fd = files.get_empty_fd().unwrap();
            files.set(fd, file);
            fd
        };

        let addr = do_mmap(&task, 0, PAGE_SIZE, Prot::READ, MapFlags::SHARED, fd, 0).unwrap();
        let map = task.proc.vmmap.lock();
        let area = map.lookup(addr_to_pn(addr)).unwrap();
        assert_eq!(area.mobj.mtype(), MobjType::Anon);
    }

    #[test]
    fn test_munmap_validation_and_removal() {
        let (task, _fs) = task_with_fs();
        let addr = do_mmap(
            &task,
            0,
            4 * PAGE_SIZE,
            Prot::READ | Prot::WRITE,
            MapFlags::PRIVATE | MapFlags::ANON,
            -1,
            0,
        )
        .unwrap();

        assert_eq!(do_munmap(&task, addr + 1, 8), Err(Errno::EINVAL));
        assert_eq!(do_munmap(&task, addr, 0), Err(Errno::EINVAL));

        do_munmap(&task, addr, 4 * PAGE_SIZE).unwrap();
        assert!(task.proc.vmmap.lock().lookup(addr_to_pn(addr)).is_none());
    }
}
