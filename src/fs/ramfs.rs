//! The in-memory filesystem.
//!
//! Inodes live in one table keyed by inode number; directory entries
//! store numbers, not pointers, and resolve through the table. Regular
//! file bytes live in the file's memory object, so mapping a file shares
//! storage with read and write. Nothing here touches a disk.

use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::sync::{Arc, Weak};
use core::sync::atomic::{AtomicU64, Ordering};
use spin::Mutex;

use crate::errno::{Errno, KResult};
use crate::fs::vnode::{Vnode, VnodeData, VnodeInner};
use crate::fs::{FileMode, NAME_LEN};
use crate::types::{DevId, Ino};
use crate::vm::mobj::Mobj;

/// The filesystem: an inode table and an allocator for inode numbers.
#[derive(Debug)]
pub struct RamFs {
    vnodes: Mutex<BTreeMap<Ino, Arc<Vnode>>>,
    next_ino: AtomicU64,
    root_ino: Ino,
    /// Handle the filesystem gives out to its own vnodes.
    self_weak: Weak<RamFs>,
}

impl RamFs {
    /// Create a filesystem containing only a root directory.
    pub fn new() -> Arc<Self> {
        let fs = Arc::new_cyclic(|weak| Self {
            vnodes: Mutex::new(BTreeMap::new()),
            next_ino: AtomicU64::new(2),
            root_ino: Ino(1),
            self_weak: weak.clone(),
        });

        let mut entries = BTreeMap::new();
        entries.insert(".".to_string(), fs.root_ino);
        // The root is its own parent.
        entries.insert("..".to_string(), fs.root_ino);
        let root = Vnode::new(
            fs.weak(),
            fs.root_ino,
            FileMode::IFDIR,
            VnodeInner {
                len: 0,
                nlink: 2,
                data: VnodeData::Directory { entries },
            },
        );
        fs.vnodes.lock().insert(fs.root_ino, root);
        fs
    }

    fn weak(&self) -> Weak<RamFs> {
        self.self_weak.clone()
    }

    /// The root directory.
    pub fn root(&self) -> Arc<Vnode> {
        self.get(self.root_ino).expect("root vnode missing")
    }

    /// Fetch a vnode by inode number.
    pub fn get(&self, ino: Ino) -> Option<Arc<Vnode>> {
        self.vnodes.lock().get(&ino).cloned()
    }

    fn alloc_ino(&self) -> Ino {
        Ino(self.next_ino.fetch_add(1, Ordering::Relaxed))
    }

    /// Drop an unnamed inode from the table. Outstanding references keep
    /// the object alive until they are put.
    fn release(&self, ino: Ino) {
        self.vnodes.lock().remove(&ino);
    }

    fn validate_name(name: &str) -> KResult<()> {
        if name.is_empty() || name.len() > NAME_LEN {
            return Err(Errno::ENAMETOOLONG);
        }
        Ok(())
    }

    fn entries<'a>(inner: &'a VnodeInner) -> &'a BTreeMap<String, Ino> {
        match &inner.data {
            VnodeData::Directory { entries } => entries,
            _ => unreachable!("directory op on non-directory vnode"),
        }
    }

    fn entries_mut<'a>(inner: &'a mut VnodeInner) -> &'a mut BTreeMap<String, Ino> {
        match &mut inner.data {
            VnodeData::Directory { entries } => entries,
            _ => unreachable!("directory op on non-directory vnode"),
        }
    }

    // ========================================================================
    // Directory Operations
    // ========================================================================

    pub(crate) fn dir_lookup(&self, inner: &VnodeInner, name: &str) -> KResult<Arc<Vnode>> {
        let ino = *Self::entries(inner).get(name).ok_or(Errno::ENOENT)?;
        self.get(ino).ok_or(Errno::ENOENT)
    }

    pub(crate) fn dir_mknod(
        &self,
        inner: &mut VnodeInner,
        name: &str,
        mode: FileMode,
        devid: DevId,
    ) -> KResult<Arc<Vnode>> {
        Self::validate_name(name)?;
        let entries = Self::entries_mut(inner);
        if entries.contains_key(name) {
            return Err(Errno::EEXIST);
        }

        let data = match mode.file_type() {
            FileMode::IFREG => VnodeData::Regular {
                mobj: Mobj::vnode_create(),
            },
            FileMode::IFCHR => VnodeData::Char { dev: devid },
            FileMode::IFBLK => VnodeData::Block { dev: devid },
            _ => return Err(Errno::EINVAL),
        };
        let ino = self.alloc_ino();
        let vnode = Vnode::new(
            self.weak(),
            ino,
            mode,
            VnodeInner {
                len: 0,
                nlink: 1,
                data,
            },
        );
        self.vnodes.lock().insert(ino, Arc::clone(&vnode));
        entries.insert(name.to_string(), ino);
        Ok(vnode)
    }

    pub(crate) fn dir_mkdir(
        &self,
        parent_ino: Ino,
        inner: &mut VnodeInner,
        name: &str,
    ) -> KResult<Arc<Vnode>> {
        Self::validate_name(name)?;
        let entries = Self::entries_mut(inner);
        if entries.contains_key(name) {
            return Err(Errno::EEXIST);
        }

        let ino = self.alloc_ino();
        let mut child_entries = BTreeMap::new();
        child_entries.insert(".".to_string(), ino);
        child_entries.insert("..".to_string(), parent_ino);
        let vnode = Vnode::new(
            self.weak(),
            ino,
            FileMode::IFDIR,
            VnodeInner {
                len: 0,
                nlink: 2,
                data: VnodeData::Directory {
                    entries: child_entries,
                },
            },
        );
        self.vnodes.lock().insert(ino, Arc::clone(&vnode));
        entries.insert(name.to_string(), ino);
        // The child's ".." names the parent.
        inner.nlink += 1;
        Ok(vnode)
    }

    pub(crate) fn dir_rmdir(&self, inner: &mut VnodeInner, name: &str) -> KResult<()> {
        Self::validate_name(name)?;
        let ino = *Self::entries(inner).get(name).ok_or(Errno::ENOENT)?;
        let target = self.get(ino).ok_or(Errno::ENOENT)?;
        if !target.mode().is_dir() {
            return Err(Errno::ENOTDIR);
        }
        {
            // Ancestor-first: the parent is already locked.
            let target_inner = target.lock();
            if Self::entries(&target_inner).len() > 2 {
                return Err(Errno::ENOTEMPTY);
            }
        }
        Self::entries_mut(inner).remove(name);
        inner.nlink -= 1;
        self.release(ino);
        Ok(())
    }

    pub(crate) fn dir_link(
        &self,
        inner: &mut VnodeInner,
        name: &str,
        target: &Arc<Vnode>,
        target_inner: &mut VnodeInner,
    ) -> KResult<()> {
        Self::validate_name(name)?;
        if target.mode().is_dir() {
            return Err(Errno::EPERM);
        }
        let entries = Self::entries_mut(inner);
        if entries.contains_key(name) {
            return Err(Errno::EEXIST);
        }
        entries.insert(name.to_string(), target.ino());
        target_inner.nlink += 1;
        Ok(())
    }

    pub(crate) fn dir_unlink(&self, inner: &mut VnodeInner, name: &str) -> KResult<()> {
        Self::validate_name(name)?;
        let ino = *Self::entries(inner).get(name).ok_or(Errno::ENOENT)?;
        let target = self.get(ino).ok_or(Errno::ENOENT)?;
        if target.mode().is_dir() {
            return Err(Errno::EPERM);
        }
        Self::entries_mut(inner).remove(name);
        let nlink = {
            let mut target_inner = target.lock();
            target_inner.nlink -= 1;
            target_inner.nlink
        };
        if nlink == 0 {
            self.release(ino);
        }
        Ok(())
    }

    /// Move `old_name` in `old_inner` to `new_name` in `new_inner`. Pass
    /// `None` for `new_inner` when both directories are the same vnode.
    /// An existing non-directory target is replaced; a directory target
    /// refuses with `EEXIST`.
    pub(crate) fn dir_rename(
        &self,
        old_dir: &Arc<Vnode>,
        old_inner: &mut VnodeInner,
        old_name: &str,
        new_dir: &Arc<Vnode>,
        mut new_inner: Option<&mut VnodeInner>,
        new_name: &str,
    ) -> KResult<()> {
        Self::validate_name(old_name)?;
        Self::validate_name(new_name)?;

        let src_ino = *Self::entries(old_inner).get(old_name).ok_or(Errno::ENOENT)?;
        let src = self.get(src_ino).ok_or(Errno::ENOENT)?;

        // Renaming something onto itself is a no-op.
        if core::ptr::eq(Arc::as_ptr(old_dir), Arc::as_ptr(new_dir)) && old_name == new_name {
            return Ok(());
        }

        {
            let dst_entries = match new_inner.as_deref() {
                Some(inner) => Self::entries(inner),
                None => Self::entries(old_inner),
            };
            if let Some(&existing) = dst_entries.get(new_name) {
                let existing = self.get(existing).ok_or(Errno::ENOENT)?;
                if existing.mode().is_dir() {
                    return Err(Errno::EEXIST);
                }
            }
        }

        // Drop a replaced target through the unlink path.
        {
            let has_target = match new_inner.as_deref() {
                Some(inner) => Self::entries(inner).contains_key(new_name),
                None => Self::entries(old_inner).contains_key(new_name),
            };
            if has_target {
                match new_inner.as_deref_mut() {
                    Some(inner) => self.dir_unlink(inner, new_name)?,
                    None => self.dir_unlink(old_inner, new_name)?,
                }
            }
        }

        Self::entries_mut(old_inner).remove(old_name);
        match new_inner.as_deref_mut() {
            Some(inner) => {
                Self::entries_mut(inner).insert(new_name.to_string(), src_ino);
            }
            None => {
                Self::entries_mut(old_inner).insert(new_name.to_string(), src_ino);
            }
        }

        // A moved directory re-parents: its ".." changes, and the link
        // counts of both parents follow it.
        if src.mode().is_dir() && !core::ptr::eq(Arc::as_ptr(old_dir), Arc::as_ptr(new_dir)) {
            {
                let mut src_inner = src.lock();
                Self::entries_mut(&mut src_inner).insert("..".to_string(), new_dir.ino());
            }
            old_inner.nlink -= 1;
            if let Some(inner) = new_inner.as_deref_mut() {
                inner.nlink += 1;
            }
        }
        Ok(())
    }

    /// Number of live inodes, for tests and diagnostics.
    pub fn inode_count(&self) -> usize {
        self.vnodes.lock().len()
    }
}
