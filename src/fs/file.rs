//! Open files and per-process descriptor tables.

use alloc::sync::Arc;
use core::array;
use spin::Mutex;

use crate::errno::{Errno, KResult};
use crate::fs::vnode::Vnode;
use crate::fs::{OFlags, NFILES};

// ============================================================================
// File Mode Flags
// ============================================================================

/// Per-open-file mode flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FMode(pub u32);

impl FMode {
    pub const READ: Self = Self(1);
    pub const WRITE: Self = Self(2);
    pub const APPEND: Self = Self(4);

    pub const fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    /// Translate open flags; appending implies writing.
    pub fn from_oflags(oflags: OFlags) -> KResult<Self> {
        let mut mode = match oflags.accmode() {
            0 => Self::READ,
            1 => Self::WRITE,
            2 => Self(Self::READ.0 | Self::WRITE.0),
            _ => return Err(Errno::EINVAL),
        };
        if oflags.contains(OFlags::APPEND) {
            mode = Self(mode.0 | Self::WRITE.0 | Self::APPEND.0);
        }
        Ok(mode)
    }
}

impl core::ops::BitOr for FMode {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

// ============================================================================
// Open File
// ============================================================================

/// Per-open-file state, shared between the descriptors that `dup`ed it.
#[derive(Debug)]
pub struct File {
    pub vnode: Arc<Vnode>,
    pub mode: FMode,
    pos: Mutex<usize>,
}

impl File {
    pub fn new(vnode: Arc<Vnode>, mode: FMode) -> Arc<Self> {
        Arc::new(Self {
            vnode,
            mode,
            pos: Mutex::new(0),
        })
    }

    pub fn pos(&self) -> usize {
        *self.pos.lock()
    }

    pub fn set_pos(&self, pos: usize) {
        *self.pos.lock() = pos;
    }
}

// ============================================================================
// Descriptor Table
// ============================================================================

/// Fixed-size map from descriptor to open file.
#[derive(Debug)]
pub struct FileTable {
    slots: [Option<Arc<File>>; NFILES],
}

impl FileTable {
    pub fn new() -> Self {
        Self {
            slots: array::from_fn(|_| None),
        }
    }

    /// Whether `fd` is within the table at all.
    pub fn fd_in_range(fd: i32) -> bool {
        fd >= 0 && (fd as usize) < NFILES
    }

    /// The open file at `fd`, if any.
    pub fn get(&self, fd: i32) -> Option<Arc<File>> {
        if !Self::fd_in_range(fd) {
            return None;
        }
        self.slots[fd as usize].clone()
    }

    /// Install `file` at `fd`, returning whatever was there.
    pub fn set(&mut self, fd: i32, file: Arc<File>) -> Option<Arc<File>> {
        debug_assert!(Self::fd_in_range(fd));
        self.slots[fd as usize].replace(file)
    }

    /// Remove and return the file at `fd`.
    pub fn remove(&mut self, fd: i32) -> Option<Arc<File>> {
        if !Self::fd_in_range(fd) {
            return None;
        }
        self.slots[fd as usize].take()
    }

    /// The lowest unused descriptor.
    pub fn get_empty_fd(&self) -> KResult<i32> {
        self.slots
            .iter()
            .position(|s| s.is_none())
            .map(|fd| fd as i32)
            .ok_or(Errno::EMFILE)
    }

    /// Share every open file into a new table, for `fork`.
    pub fn clone_shared(&self) -> Self {
        Self {
            slots: array::from_fn(|i| self.slots[i].clone()),
        }
    }

    pub fn open_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
}

impl Default for FileTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::ramfs::RamFs;

    fn some_file() -> Arc<File> {
        let fs = RamFs::new();
        File::new(fs.root(), FMode::READ)
    }

    #[test]
    fn test_fmode_translation() {
        assert_eq!(FMode::from_oflags(OFlags::RDONLY), Ok(FMode::READ));
        assert_eq!(FMode::from_oflags(OFlags::WRONLY), Ok(FMode::WRITE));
        let rw = FMode::from_oflags(OFlags::RDWR).unwrap();
        assert!(rw.contains(FMode::READ) && rw.contains(FMode::WRITE));

        let appending = FMode::from_oflags(OFlags::RDONLY | OFlags::APPEND).unwrap();
        assert!(appending.contains(FMode::WRITE));
        assert!(appending.contains(FMode::APPEND));

        assert_eq!(FMode::from_oflags(OFlags(3)), Err(Errno::EINVAL));
    }

    #[test]
    fn test_lowest_free_descriptor() {
        let mut table = FileTable::new();
        assert_eq!(table.get_empty_fd(), Ok(0));
        table.set(0, some_file());
        table.set(1, some_file());
        assert_eq!(table.get_empty_fd(), Ok(2));
        table.remove(0);
        assert_eq!(table.get_empty_fd(), Ok(0));
    }

    #[test]
    fn test_table_fills_up() {
        let mut table = FileTable::new();
        for fd in 0..NFILES {
            table.set(fd as i32, some_file());
        }
        assert_eq!(table.get_empty_fd(), Err(Errno::EMFILE));
    }

    #[test]
    fn test_out_of_range_fds() {
        let table = FileTable::new();
        assert!(table.get(-1).is_none());
        assert!(table.get(NFILES as i32).is_none());
    }

    #[test]
    fn test_clone_shared_shares_files() {
        let mut table = FileTable::new();
        let f = some_file();
        table.set(3, Arc::clone(&f));
        let cloned = table.clone_shared();
        assert!(Arc::ptr_eq(&cloned.get(3).unwrap(), &f));
        assert_eq!(cloned.open_count(), 1);
    }
}
