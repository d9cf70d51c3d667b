//! The virtual file system: vnodes, the in-memory filesystem behind
//! them, pathname resolution, and the descriptor-level syscalls.

pub mod file;
pub mod namev;
pub mod ramfs;
pub mod vfs_syscall;
pub mod vnode;

use alloc::sync::Arc;
use spin::Once;

pub use crate::config::{NAME_LEN, NFILES};
use crate::types::Ino;
use ramfs::RamFs;

// ============================================================================
// File Modes
// ============================================================================

/// File mode bits. The type field distinguishes regular files,
/// directories, and device special files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileMode(pub u32);

impl FileMode {
    /// Mask of the file-type field
    pub const IFMT: Self = Self(0xF000);
    /// Character device
    pub const IFCHR: Self = Self(0x2000);
    /// Directory
    pub const IFDIR: Self = Self(0x4000);
    /// Block device
    pub const IFBLK: Self = Self(0x6000);
    /// Regular file
    pub const IFREG: Self = Self(0x8000);

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// The type field alone.
    pub const fn file_type(self) -> Self {
        Self(self.0 & Self::IFMT.0)
    }

    pub const fn is_dir(self) -> bool {
        self.file_type().0 == Self::IFDIR.0
    }

    pub const fn is_reg(self) -> bool {
        self.file_type().0 == Self::IFREG.0
    }

    pub const fn is_chr(self) -> bool {
        self.file_type().0 == Self::IFCHR.0
    }

    pub const fn is_blk(self) -> bool {
        self.file_type().0 == Self::IFBLK.0
    }
}

// ============================================================================
// Open Flags
// ============================================================================

/// Flags to `open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OFlags(pub u32);

impl OFlags {
    pub const RDONLY: Self = Self(0);
    pub const WRONLY: Self = Self(1);
    pub const RDWR: Self = Self(2);
    pub const CREAT: Self = Self(0x100);
    pub const TRUNC: Self = Self(0x200);
    pub const APPEND: Self = Self(0x400);

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// The access-mode field (RDONLY, WRONLY, or RDWR).
    pub const fn accmode(self) -> u32 {
        self.0 & 0x3
    }

    pub const fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }
}

impl core::ops::BitOr for OFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// `lseek` origins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Set,
    Cur,
    End,
}

// ============================================================================
// Directory Entries and Stat
// ============================================================================

/// A directory entry as returned by `getdent`.
#[derive(Debug, Clone, Copy)]
pub struct Dirent {
    pub ino: u64,
    /// Zero-terminated name
    pub name: [u8; NAME_LEN + 1],
}

impl Dirent {
    pub fn new(ino: Ino, name: &str) -> Self {
        debug_assert!(name.len() <= NAME_LEN);
        let mut buf = [0u8; NAME_LEN + 1];
        buf[..name.len()].copy_from_slice(name.as_bytes());
        Self { ino: ino.0, name: buf }
    }

    pub const fn empty() -> Self {
        Self {
            ino: 0,
            name: [0; NAME_LEN + 1],
        }
    }

    pub fn name_str(&self) -> &str {
        let len = self
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.name.len());
        core::str::from_utf8(&self.name[..len]).unwrap_or("")
    }
}

/// File status, filled by the vnode stat operation.
#[derive(Debug, Clone, Copy, Default)]
pub struct Stat {
    pub ino: u64,
    pub mode: u32,
    pub size: usize,
    pub nlink: u32,
    pub rdev: u32,
}

// ============================================================================
// Root Filesystem
// ============================================================================

static VFS_ROOT: Once<Arc<RamFs>> = Once::new();

/// Create the kernel's root filesystem. Idempotent.
pub fn init() {
    VFS_ROOT.call_once(RamFs::new);
}

/// The mounted root filesystem.
pub fn vfs_root_fs() -> &'static Arc<RamFs> {
    VFS_ROOT.get().expect("VFS not initialized")
}
