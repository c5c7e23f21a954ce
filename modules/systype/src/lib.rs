#![cfg_attr(not(test), no_std)]

use strum::FromRepr;

pub type SysResult<T> = Result<T, SysError>;

/// Linux error codes the trap layer hands back to its callers.
/// Defined in <asm-generic/errno-base.h>.
#[derive(FromRepr, Clone, Copy, Debug, Eq, PartialEq)]
#[repr(i32)]
pub enum SysError {
    /// Operation not permitted
    EPERM = 1,
    /// Interrupted system call
    EINTR = 4,
    /// Out of memory
    ENOMEM = 12,
    /// Permission denied
    EACCES = 13,
    /// Bad address
    EFAULT = 14,
    /// Invalid argument
    EINVAL = 22,
}

impl SysError {
    pub const fn as_str(&self) -> &'static str {
        use self::SysError::*;
        match self {
            EPERM => "Operation not permitted",
            EINTR => "Interrupted system call",
            ENOMEM => "Out of memory",
            EACCES => "Permission denied",
            EFAULT => "Bad address",
            EINVAL => "Invalid argument",
        }
    }

    pub fn from_i32(value: i32) -> Option<Self> {
        Self::from_repr(value)
    }

    /// Returns the error code value in `i32`.
    pub const fn code(self) -> i32 {
        self as i32
    }

    /// The value a failed syscall leaves in the user's `a0`.
    pub const fn as_syscall_ret(self) -> usize {
        -(self as isize) as usize
    }
}

impl core::fmt::Display for SysError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}
