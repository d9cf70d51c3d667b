//! Descriptor-level filesystem syscalls.
//!
//! Each operation validates the descriptor or path, locks the vnodes it
//! touches, delegates to the vnode operation, and updates the file
//! position by exactly what the operation reported.

use alloc::sync::Arc;
use spin::Mutex;

use crate::errno::{Errno, KResult};
use crate::fs::file::{FMode, File};
use crate::fs::namev;
use crate::fs::vnode::{lock_two, Vnode};
use crate::fs::{Dirent, FileMode, OFlags, Stat, Whence};
use crate::proc::CurrentTask;
use crate::types::DevId;

/// Serializes renames that move a directory between parents. Outermost
/// in the lock order, ahead of any vnode mutex.
static RENAME_MUTEX: Mutex<()> = Mutex::new(());

fn cwd(task: &CurrentTask) -> Arc<Vnode> {
    task.proc.cwd.lock().clone()
}

fn get_file(task: &CurrentTask, fd: i32) -> KResult<Arc<File>> {
    task.proc.files.lock().get(fd).ok_or(Errno::EBADF)
}

// ============================================================================
// Descriptor Operations
// ============================================================================

/// Open `path`, allocating the lowest free descriptor for it.
pub fn do_open(task: &CurrentTask, path: &str, oflags: OFlags, mode: FileMode) -> KResult<i32> {
    let fmode = FMode::from_oflags(oflags)?;
    let create_mode = FileMode(FileMode::IFREG.0 | (mode.0 & !FileMode::IFMT.0));
    let vnode = namev::open(&cwd(task), path, oflags, create_mode, DevId::NULL)?;

    if vnode.mode().is_dir() && fmode.contains(FMode::WRITE) {
        return Err(Errno::EISDIR);
    }
    if oflags.contains(OFlags::TRUNC) && fmode.contains(FMode::WRITE) {
        let mut inner = vnode.lock();
        vnode.truncate(&mut inner);
    }

    let file = File::new(vnode, fmode);
    let mut files = task.proc.files.lock();
    let fd = files.get_empty_fd()?;
    files.set(fd, file);
    Ok(fd)
}

/// Read from the file at `fd` into `buf`, advancing the position by the
/// number of bytes read.
pub fn do_read(task: &CurrentTask, fd: i32, buf: &mut [u8]) -> KResult<usize> {
    let file = get_file(task, fd)?;
    let vnode = &file.vnode;
    let inner = vnode.lock();
    if vnode.mode().is_dir() {
        return Err(Errno::EISDIR);
    }
    if !file.mode.contains(FMode::READ) {
        return Err(Errno::EBADF);
    }
    let pos = file.pos();
    let n = vnode.read(&task.thread, &inner, pos, buf)?;
    drop(inner);
    file.set_pos(pos + n);
    Ok(n)
}

/// Write `buf` to the file at `fd`. In append mode the write starts at
/// the end of the file regardless of the stored position.
pub fn do_write(task: &CurrentTask, fd: i32, buf: &[u8]) -> KResult<usize> {
    let file = get_file(task, fd)?;
    if !file.mode.contains(FMode::WRITE) {
        return Err(Errno::EBADF);
    }
    let vnode = &file.vnode;
    let mut inner = vnode.lock();
    let pos = if file.mode.contains(FMode::APPEND) {
        inner.len
    } else {
        file.pos()
    };
    let n = vnode.write(&mut inner, pos, buf)?;
    drop(inner);
    file.set_pos(pos + n);
    Ok(n)
}

/// Close the descriptor `fd`.
pub fn do_close(task: &CurrentTask, fd: i32) -> KResult<()> {
    task.proc
        .files
        .lock()
        .remove(fd)
        .map(|_| ())
        .ok_or(Errno::EBADF)
}

/// Duplicate `fd` onto the lowest free descriptor.
pub fn do_dup(task: &CurrentTask, fd: i32) -> KResult<i32> {
    let mut files = task.proc.files.lock();
    let file = files.get(fd).ok_or(Errno::EBADF)?;
    let new_fd = files.get_empty_fd()?;
    files.set(new_fd, file);
    Ok(new_fd)
}

/// Duplicate `ofd` onto `nfd`, closing `nfd` first if it was open.
/// Duplicating a descriptor onto itself is a no-op.
pub fn do_dup2(task: &CurrentTask, ofd: i32, nfd: i32) -> KResult<i32> {
    use crate::fs::file::FileTable;
    if !FileTable::fd_in_range(nfd) {
        return Err(Errno::EBADF);
    }
    let mut files = task.proc.files.lock();
    let file = files.get(ofd).ok_or(Errno::EBADF)?;
    if ofd == nfd {
        return Ok(nfd);
    }
    files.remove(nfd);
    files.set(nfd, file);
    Ok(nfd)
}

/// Reposition the file offset.
pub fn do_lseek(task: &CurrentTask, fd: i32, offset: isize, whence: Whence) -> KResult<usize> {
    let file = get_file(task, fd)?;
    let new_pos = match whence {
        Whence::Set => offset,
        Whence::Cur => file.pos() as isize + offset,
        Whence::End => {
            let inner = file.vnode.lock();
            inner.len as isize + offset
        }
    };
    if new_pos < 0 {
        return Err(Errno::EINVAL);
    }
    file.set_pos(new_pos as usize);
    Ok(new_pos as usize)
}

/// Read one directory entry at the file's position into `dirp`.
/// Returns the size of a dirent, or 0 at the end of the directory.
pub fn do_getdent(task: &CurrentTask, fd: i32, dirp: &mut Dirent) -> KResult<usize> {
    let file = get_file(task, fd)?;
    let vnode = &file.vnode;
    if !vnode.mode().is_dir() {
        return Err(Errno::ENOTDIR);
    }
    let inner = vnode.lock();
    let pos = file.pos();
    match vnode.readdir(&inner, pos)? {
        Some((dirent, consumed)) => {
            drop(inner);
            *dirp = dirent;
            file.set_pos(pos + consumed);
            Ok(core::mem::size_of::<Dirent>())
        }
        None => Ok(0),
    }
}

// ============================================================================
// Path Operations
// ============================================================================

/// Create a regular file or device node at `path`.
pub fn do_mknod(task: &CurrentTask, path: &str, mode: FileMode, devid: DevId) -> KResult<()> {
    match mode.file_type() {
        FileMode::IFREG | FileMode::IFCHR | FileMode::IFBLK => {}
        _ => return Err(Errno::EINVAL),
    }
    // The reference from creation drops immediately; the filesystem's
    // inode table keeps the object alive.
    let _vnode = namev::open(&cwd(task), path, OFlags::CREAT, mode, devid)?;
    Ok(())
}

/// Create a directory at `path`.
pub fn do_mkdir(task: &CurrentTask, path: &str) -> KResult<()> {
    let base = cwd(task);
    let (parent, name) = namev::dir(&base, path)?;
    if name.len() > crate::fs::NAME_LEN {
        return Err(Errno::ENAMETOOLONG);
    }
    let mut inner = parent.lock();
    match namev::lookup(&parent, &inner, name) {
        Ok(_existing) => Err(Errno::EEXIST),
        Err(Errno::ENOENT) => {
            let _created = parent.mkdir(&mut inner, name)?;
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Remove the directory named by `path`.
///
/// The `"."` and `".."` checks apply to the basename token the resolver
/// returns, never to the raw path tail.
pub fn do_rmdir(task: &CurrentTask, path: &str) -> KResult<()> {
    let base = cwd(task);
    let (parent, name) = namev::dir(&base, path)?;
    match name {
        "" | "." => return Err(Errno::EINVAL),
        ".." => return Err(Errno::ENOTEMPTY),
        _ => {}
    }
    if name.len() > crate::fs::NAME_LEN {
        return Err(Errno::ENAMETOOLONG);
    }
    if !parent.mode().is_dir() {
        return Err(Errno::ENOTDIR);
    }
    let mut inner = parent.lock();
    parent.rmdir(&mut inner, name)
}

/// Remove the non-directory entry named by `path`.
pub fn do_unlink(task: &CurrentTask, path: &str) -> KResult<()> {
    let base = cwd(task);
    let (parent, name) = namev::dir(&base, path)?;
    if name.len() > crate::fs::NAME_LEN {
        return Err(Errno::ENAMETOOLONG);
    }
    if !parent.mode().is_dir() {
        return Err(Errno::ENOTDIR);
    }
    let mut inner = parent.lock();
    let found = namev::lookup(&parent, &inner, name)?;
    if found.mode().is_dir() {
        return Err(Errno::EPERM);
    }
    parent.unlink(&mut inner, name)
}

/// Create a hard link `newpath` to the file named by `oldpath`.
/// Directories cannot be linked.
pub fn do_link(task: &CurrentTask, oldpath: &str, newpath: &str) -> KResult<()> {
    let base = cwd(task);
    let target = namev::resolve(&base, oldpath)?;
    if target.mode().is_dir() {
        return Err(Errno::EPERM);
    }
    let (parent, name) = namev::dir(&base, newpath)?;
    if name.len() > crate::fs::NAME_LEN {
        return Err(Errno::ENAMETOOLONG);
    }
    if !parent.mode().is_dir() {
        return Err(Errno::ENOTDIR);
    }

    let (mut target_inner, parent_inner) = lock_two(&target, &parent);
    let mut parent_inner = parent_inner.ok_or(Errno::EINVAL)?;
    parent.link(&mut parent_inner, name, &target, &mut target_inner)
}

/// Rename `oldpath` to `newpath`.
///
/// Parents lock in ancestor order; moving a directory additionally
/// serializes on the global rename mutex and may not move it under its
/// own subtree.
pub fn do_rename(task: &CurrentTask, oldpath: &str, newpath: &str) -> KResult<()> {
    let base = cwd(task);
    let (old_parent, old_name) = namev::dir(&base, oldpath)?;
    let (new_parent, new_name) = namev::dir(&base, newpath)?;
    if matches!(old_name, "" | "." | "..") || matches!(new_name, "" | "." | "..") {
        return Err(Errno::EINVAL);
    }
    if old_name.len() > crate::fs::NAME_LEN || new_name.len() > crate::fs::NAME_LEN {
        return Err(Errno::ENAMETOOLONG);
    }
    if !old_parent.mode().is_dir() || !new_parent.mode().is_dir() {
        return Err(Errno::ENOTDIR);
    }

    let src = {
        let inner = old_parent.lock();
        namev::lookup(&old_parent, &inner, old_name)?
    };

    let _rename_guard;
    if src.mode().is_dir() {
        _rename_guard = RENAME_MUTEX.lock();
        if namev::is_descendant(&new_parent, &src) {
            return Err(Errno::EINVAL);
        }
    }

    let fs = old_parent.fs();
    let (mut old_inner, new_inner) = lock_two(&old_parent, &new_parent);
    match new_inner {
        Some(mut new_inner) => fs.dir_rename(
            &old_parent,
            &mut old_inner,
            old_name,
            &new_parent,
            Some(&mut new_inner),
            new_name,
        ),
        None => fs.dir_rename(
            &old_parent,
            &mut old_inner,
            old_name,
            &new_parent,
            None,
            new_name,
        ),
    }
}

/// Change the working directory to `path`.
pub fn do_chdir(task: &CurrentTask, path: &str) -> KResult<()> {
    let target = namev::resolve(&cwd(task), path)?;
    if !target.mode().is_dir() {
        return Err(Errno::ENOTDIR);
    }
    // The displaced cwd reference drops here.
    *task.proc.cwd.lock() = target;
    Ok(())
}

/// Status of the file named by `path`.
pub fn do_stat(task: &CurrentTask, path: &str, buf: &mut Stat) -> KResult<()> {
    let vnode = namev::resolve(&cwd(task), path)?;
    let inner = vnode.lock();
    *buf = vnode.stat(&inner);
    Ok(())
}
