//! Pathname resolution.
//!
//! A walk is directory-relative: absolute paths restart at the root of
//! the starting vnode's filesystem, everything else begins at `base`.
//! Locking is hand-over-hand in the weak sense the reference counts
//! allow: the previous directory is unlocked and released before the
//! next is locked, since the walker's reference keeps the current
//! directory alive without its lock.

use alloc::sync::Arc;

use crate::errno::{Errno, KResult};
use crate::fs::vnode::{Vnode, VnodeInner};
use crate::fs::{FileMode, OFlags, NAME_LEN};
use crate::types::DevId;

/// Split a path into its non-empty components. Runs of `/` collapse;
/// trailing slashes vanish.
pub fn tokenize(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|c| !c.is_empty())
}

/// Look up `name` in the locked directory `dir`.
///
/// A zero-length name resolves to `dir` itself with a fresh reference.
/// The result comes back unlocked; looking up `"."` returns the very
/// same vnode, whose lock the caller already holds.
pub fn lookup(dir: &Arc<Vnode>, inner: &VnodeInner, name: &str) -> KResult<Arc<Vnode>> {
    if !dir.mode().is_dir() {
        return Err(Errno::ENOTDIR);
    }
    if name.is_empty() {
        return Ok(Arc::clone(dir));
    }
    dir.lookup(inner, name)
}

/// Resolve all but the last component of `path`.
///
/// Returns the directory that would contain the basename, referenced and
/// unlocked, along with the basename itself (aliasing into `path`; empty
/// for paths that are nothing but slashes). The empty path is `EINVAL`.
pub fn dir<'p>(base: &Arc<Vnode>, path: &'p str) -> KResult<(Arc<Vnode>, &'p str)> {
    if path.is_empty() {
        return Err(Errno::EINVAL);
    }

    let mut cur = if path.starts_with('/') {
        base.fs().root()
    } else {
        Arc::clone(base)
    };

    let mut components = tokenize(path).peekable();
    while let Some(component) = components.next() {
        if components.peek().is_none() {
            // The final component is the basename; its parent is `cur`.
            return Ok((cur, component));
        }
        let next = {
            let inner = cur.lock();
            lookup(&cur, &inner, component)?
        };
        // The old directory's reference drops here, after its lock.
        cur = next;
    }
    Ok((cur, ""))
}

/// Resolve `path` to a vnode, creating the basename with the parent's
/// mknod operation when `O_CREAT` is set and the file does not exist.
///
/// The result is referenced and unlocked. A path whose last component is
/// followed by `/` must name a directory; creating through such a path
/// is refused.
pub fn open(
    base: &Arc<Vnode>,
    path: &str,
    oflags: OFlags,
    mode: FileMode,
    devid: DevId,
) -> KResult<Arc<Vnode>> {
    let (parent, name) = dir(base, path)?;
    if name.len() > NAME_LEN {
        return Err(Errno::ENAMETOOLONG);
    }
    let trailing_slash = path.ends_with('/');

    let mut inner = parent.lock();
    match lookup(&parent, &inner, name) {
        Ok(vnode) => {
            if trailing_slash && !vnode.mode().is_dir() {
                return Err(Errno::ENOTDIR);
            }
            Ok(vnode)
        }
        Err(Errno::ENOENT) if oflags.contains(OFlags::CREAT) => {
            if trailing_slash {
                return Err(Errno::EINVAL);
            }
            parent.mknod(&mut inner, name, mode, devid)
        }
        Err(e) => Err(e),
    }
}

/// Resolve `path` without creating anything.
pub fn resolve(base: &Arc<Vnode>, path: &str) -> KResult<Arc<Vnode>> {
    open(base, path, OFlags::RDONLY, FileMode::default(), DevId::NULL)
}

/// The parent of a directory, via its own `".."` entry.
pub fn get_parent(dir: &Arc<Vnode>) -> KResult<Arc<Vnode>> {
    let inner = dir.lock();
    lookup(dir, &inner, "..")
}

/// Whether `a` is `b` or a descendant of `b`, walking `".."` up to the
/// filesystem root.
pub fn is_descendant(a: &Arc<Vnode>, b: &Arc<Vnode>) -> bool {
    let root = a.fs().root();
    let mut cur = Arc::clone(a);
    loop {
        if cur.ino() == b.ino() {
            return true;
        }
        if cur.ino() == root.ino() {
            return false;
        }
        cur = match get_parent(&cur) {
            Ok(parent) => parent,
            Err(_) => return false,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::ramfs::RamFs;

    /// Build /a/b and /dev, plus /file.
    fn fixture() -> (Arc<RamFs>, Arc<Vnode>) {
        let fs = RamFs::new();
        let root = fs.root();
        let a = {
            let mut inner = root.lock();
            root.mknod(&mut inner, "file", FileMode::IFREG, DevId::NULL)
                .unwrap();
            root.mkdir(&mut inner, "dev").unwrap();
            root.mkdir(&mut inner, "a").unwrap()
        };
        {
            let mut inner = a.lock();
            a.mkdir(&mut inner, "b").unwrap();
        }
        (fs, root)
    }

    #[test]
    fn test_tokenize() {
        let parts: alloc::vec::Vec<&str> = tokenize("/a/.././//b/ccc/").collect();
        assert_eq!(parts, ["a", "..", ".", "b", "ccc"]);
        assert_eq!(tokenize("///").count(), 0);
    }

    #[test]
    fn test_dir_splits_basename() {
        let (_fs, root) = fixture();
        let (parent, name) = dir(&root, "/a/b/c").unwrap();
        assert_eq!(name, "c");
        let b = resolve(&root, "/a/b").unwrap();
        assert!(Arc::ptr_eq(&parent, &b));

        // Trailing slashes are ignored for the split.
        let (parent, name) = dir(&root, "a/b/").unwrap();
        assert_eq!(name, "b");
        let a = resolve(&root, "a").unwrap();
        assert!(Arc::ptr_eq(&parent, &a));
    }

    #[test]
    fn test_dir_of_all_slashes_returns_start() {
        let (_fs, root) = fixture();
        let (parent, name) = dir(&root, "///").unwrap();
        assert!(Arc::ptr_eq(&parent, &root));
        assert_eq!(name, "");
    }

    #[test]
    fn test_dir_empty_path_is_einval() {
        let (_fs, root) = fixture();
        assert_eq!(dir(&root, "").unwrap_err(), Errno::EINVAL);
    }

    #[test]
    fn test_resolve_root() {
        let (_fs, root) = fixture();
        let v = resolve(&root, "/").unwrap();
        assert!(Arc::ptr_eq(&v, &root));
    }

    #[test]
    fn test_resolve_relative_vs_absolute() {
        let (_fs, root) = fixture();
        let a = resolve(&root, "a").unwrap();
        let also_a = resolve(&root, "/a").unwrap();
        assert!(Arc::ptr_eq(&a, &also_a));

        // Relative resolution starts at the given base.
        let b = resolve(&a, "b").unwrap();
        let abs_b = resolve(&root, "/a/b").unwrap();
        assert!(Arc::ptr_eq(&b, &abs_b));
    }

    #[test]
    fn test_resolve_dot_chains() {
        let (_fs, root) = fixture();
        let a = resolve(&root, "a").unwrap();
        let v = resolve(&a, "./.").unwrap();
        assert!(Arc::ptr_eq(&v, &a));

        let v = resolve(&a, "../a/b/..").unwrap();
        assert!(Arc::ptr_eq(&v, &a));
    }

    #[test]
    fn test_trailing_slash_on_regular_file() {
        let (_fs, root) = fixture();
        assert_eq!(resolve(&root, "/file/").unwrap_err(), Errno::ENOTDIR);
        assert!(resolve(&root, "/a/").is_ok());
    }

    #[test]
    fn test_lookup_through_file_is_enotdir() {
        let (_fs, root) = fixture();
        assert_eq!(resolve(&root, "/file/x").unwrap_err(), Errno::ENOTDIR);
    }

    #[test]
    fn test_open_creates_missing_basename() {
        let (_fs, root) = fixture();
        assert_eq!(resolve(&root, "/a/new").unwrap_err(), Errno::ENOENT);

        let v = open(
            &root,
            "/a/new",
            OFlags::CREAT,
            FileMode::IFREG,
            DevId::NULL,
        )
        .unwrap();
        assert!(v.mode().is_reg());
        assert!(resolve(&root, "/a/new").is_ok());
    }

    #[test]
    fn test_open_creat_with_trailing_slash_is_einval() {
        let (_fs, root) = fixture();
        assert_eq!(
            open(
                &root,
                "/a/new/",
                OFlags::CREAT,
                FileMode::IFREG,
                DevId::NULL
            )
            .unwrap_err(),
            Errno::EINVAL
        );
    }

    #[test]
    fn test_name_too_long() {
        let (_fs, root) = fixture();
        let long = alloc::format!("/a/{}", "x".repeat(NAME_LEN + 1));
        assert_eq!(resolve(&root, &long).unwrap_err(), Errno::ENAMETOOLONG);
    }

    #[test]
    fn test_get_parent_and_descendants() {
        let (_fs, root) = fixture();
        let a = resolve(&root, "/a").unwrap();
        let b = resolve(&root, "/a/b").unwrap();
        let dev = resolve(&root, "/dev").unwrap();

        assert!(Arc::ptr_eq(&get_parent(&b).unwrap(), &a));
        assert!(is_descendant(&b, &a));
        assert!(is_descendant(&b, &root));
        assert!(is_descendant(&a, &a));
        assert!(!is_descendant(&a, &b));
        assert!(!is_descendant(&dev, &a));
    }
}
