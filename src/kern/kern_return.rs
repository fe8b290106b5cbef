//! Kernel return codes
//!
//! Mach `kern_return_t` values and the typed error the `kern` primitives
//! return in their place.

use thiserror::Error;

/// Raw Mach kernel return code
pub type KernReturn = i32;

pub const KERN_SUCCESS: KernReturn = 0;
pub const KERN_INVALID_ARGUMENT: KernReturn = 4;
pub const KERN_INTERRUPTED: KernReturn = 28;

/// Failure of a kernel primitive
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernError {
    /// An interruptible wait was cut short; the caller acquired nothing
    #[error("wait interrupted")]
    Interrupted,

    /// A conditional wait found the word no longer held the expected value.
    /// Reported to callers as `KERN_INVALID_ARGUMENT`.
    #[error("value changed before wait")]
    NotWaiting,
}

impl KernError {
    /// Mach return code for this error
    pub const fn code(self) -> KernReturn {
        match self {
            KernError::Interrupted => KERN_INTERRUPTED,
            KernError::NotWaiting => KERN_INVALID_ARGUMENT,
        }
    }
}

/// Collapse a kernel result into a raw return code
pub fn kern_return<T>(result: &Result<T, KernError>) -> KernReturn {
    match result {
        Ok(_) => KERN_SUCCESS,
        Err(e) => e.code(),
    }
}
