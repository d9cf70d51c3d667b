//! POSIX error codes.
//!
//! Every fallible kernel operation returns `KResult<T>`; the syscall
//! boundary converts an `Errno` to the conventional negative integer.

use core::fmt;

/// Result type used throughout the kernel.
pub type KResult<T> = Result<T, Errno>;

/// Error kinds, with their standard errno values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Errno {
    /// Operation not permitted
    EPERM = 1,
    /// No such file or directory
    ENOENT = 2,
    /// Interrupted system call
    EINTR = 4,
    /// Bad file number
    EBADF = 9,
    /// No child processes
    ECHILD = 10,
    /// Out of memory
    ENOMEM = 12,
    /// Permission denied
    EACCES = 13,
    /// Bad address
    EFAULT = 14,
    /// File exists
    EEXIST = 17,
    /// No such device
    ENODEV = 19,
    /// Not a directory
    ENOTDIR = 20,
    /// Is a directory
    EISDIR = 21,
    /// Invalid argument
    EINVAL = 22,
    /// Too many open files
    EMFILE = 24,
    /// Math result not representable
    ERANGE = 34,
    /// File name too long
    ENAMETOOLONG = 36,
    /// Directory not empty
    ENOTEMPTY = 39,
}

impl Errno {
    /// The negative form used at the syscall boundary.
    pub const fn as_neg(self) -> i64 {
        -(self as i32 as i64)
    }

    pub const fn message(self) -> &'static str {
        match self {
            Errno::EPERM => "operation not permitted",
            Errno::ENOENT => "no such file or directory",
            Errno::EINTR => "interrupted system call",
            Errno::EBADF => "bad file number",
            Errno::ECHILD => "no child processes",
            Errno::ENOMEM => "out of memory",
            Errno::EACCES => "permission denied",
            Errno::EFAULT => "bad address",
            Errno::EEXIST => "file exists",
            Errno::ENODEV => "no such device",
            Errno::ENOTDIR => "not a directory",
            Errno::EISDIR => "is a directory",
            Errno::EINVAL => "invalid argument",
            Errno::EMFILE => "too many open files",
            Errno::ERANGE => "result out of range",
            Errno::ENAMETOOLONG => "file name too long",
            Errno::ENOTEMPTY => "directory not empty",
        }
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Convert a syscall result to the POSIX integer convention: a
/// non-negative value on success, a negative errno on failure.
pub fn syscall_ret(res: KResult<usize>) -> i64 {
    match res {
        Ok(v) => v as i64,
        Err(e) => e.as_neg(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_values() {
        assert_eq!(Errno::EPERM as i32, 1);
        assert_eq!(Errno::EINVAL as i32, 22);
        assert_eq!(Errno::EINTR.as_neg(), -4);
    }

    #[test]
    fn test_syscall_ret() {
        assert_eq!(syscall_ret(Ok(42)), 42);
        assert_eq!(syscall_ret(Err(Errno::EBADF)), -9);
    }
}
