//! Common identifier types used across the kernel.
//!
//! This module defines shared newtypes to avoid circular dependencies.

use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Process identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Pid(pub u32);

impl Pid {
    /// Allocate a new process ID with a unique auto-incremented value
    pub fn alloc() -> Self {
        static COUNTER: AtomicU32 = AtomicU32::new(1);
        Pid(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Kernel thread identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Tid(pub u64);

impl Tid {
    /// Allocate a new thread ID with a unique auto-incremented value
    pub fn alloc() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Tid(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Inode number, unique within one filesystem
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Ino(pub u64);

/// Device identifier, a (major, minor) pair packed into one word
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct DevId(pub u32);

impl DevId {
    /// No device.
    pub const NULL: Self = Self(0);

    /// Compose a device id from a major and minor number.
    pub const fn new(major: u16, minor: u16) -> Self {
        Self(((major as u32) << 16) | minor as u32)
    }

    pub const fn major(self) -> u16 {
        (self.0 >> 16) as u16
    }

    pub const fn minor(self) -> u16 {
        self.0 as u16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_devid_composition() {
        let id = DevId::new(2, 7);
        assert_eq!(id.major(), 2);
        assert_eq!(id.minor(), 7);
        assert_ne!(id, DevId::NULL);
    }

    #[test]
    fn test_id_allocation_is_unique() {
        let a = Tid::alloc();
        let b = Tid::alloc();
        assert_ne!(a, b);
    }
}
