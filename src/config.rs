//! Kernel configuration constants.
//!
//! Every tunable lives here so the rest of the kernel never hard-codes a
//! size. Address-space bounds are in bytes; the page-number forms are
//! derived in `vm::page`.

use static_assertions::const_assert;

/// log2 of the page size.
pub const PAGE_SHIFT: usize = 12;

/// Size of a page in bytes.
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;

/// Lowest user-mappable virtual address.
pub const USER_MEM_LOW: usize = 0x0040_0000;

/// Highest user-mappable virtual address (exclusive).
pub const USER_MEM_HIGH: usize = 0x0000_8000_0000_0000;

/// Number of file descriptors per process.
pub const NFILES: usize = 32;

/// Maximum length of a single path component, not counting the terminator.
pub const NAME_LEN: usize = 28;

/// Capacity of a line discipline's circular buffer.
pub const LDISC_BUFFER_SIZE: usize = 128;

const_assert!(PAGE_SIZE.is_power_of_two());
const_assert!(USER_MEM_LOW % PAGE_SIZE == 0);
const_assert!(USER_MEM_HIGH % PAGE_SIZE == 0);
const_assert!(LDISC_BUFFER_SIZE >= 4);
const_assert!(NFILES >= 3);
