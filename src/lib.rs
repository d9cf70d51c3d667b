//! Osprey - a small Unix-like operating system kernel core
//!
//! This crate implements the heart of a teaching-grade kernel: virtual
//! memory with copy-on-write fork built on shadow memory objects, a
//! path-resolving virtual file system over an in-memory filesystem, and
//! a TTY line discipline, together with the cooperative thread and
//! process machinery that ties them together.

#![cfg_attr(not(test), no_std)]
// Kernel types often have specialized constructors that don't fit Default
#![allow(clippy::new_without_default)]
// Mapping setup genuinely takes this many parameters
#![allow(clippy::too_many_arguments)]

extern crate alloc;

// Core types
pub mod types;

// Infrastructure
pub mod config;
pub mod console;
pub mod errno;

// Execution primitives
pub mod kern;
pub mod proc;

// Virtual memory
pub mod vm;

// File system
pub mod fs;

// Device drivers
pub mod drivers;

/// Kernel version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
/// Kernel name
pub const NAME: &str = "Osprey";

/// Initialize the kernel and return the init task.
///
/// Brings up the console, the root filesystem, and the device registry,
/// then creates the first process with the filesystem root as its
/// working directory.
pub fn init() -> proc::CurrentTask {
    console::init();
    fs::init();
    drivers::init();
    proc::spawn_init("init", fs::vfs_root_fs().root())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(NAME, "Osprey");
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_init_brings_up_the_world() {
        let task = init();
        assert_eq!(task.proc.name(), "init");
        assert!(task.proc.cwd.lock().mode().is_dir());
        assert!(drivers::chardev_lookup(drivers::MEM_NULL_DEVID).is_some());

        // The init task can use the syscall surface immediately.
        fs::vfs_syscall::do_mkdir(&task, "/dev").unwrap();
        fs::vfs_syscall::do_mknod(
            &task,
            "/dev/null",
            fs::FileMode::IFCHR,
            drivers::MEM_NULL_DEVID,
        )
        .unwrap();
        let fd =
            fs::vfs_syscall::do_open(&task, "/dev/null", fs::OFlags::WRONLY, fs::FileMode(0))
                .unwrap();
        assert_eq!(fs::vfs_syscall::do_write(&task, fd, b"discard"), Ok(7));
    }
}
