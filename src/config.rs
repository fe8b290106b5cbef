//! Kernel tunables
//!
//! Compile-time constants shared by the device layer, plus the small
//! runtime configuration handed to [`crate::init`].

use log::LevelFilter;

/// Machine page size
pub const PAGE_SIZE: usize = 4096;

/// Largest single transfer `minphys` lets through (256 KiB)
pub const MAXPHYS: usize = 256 * 1024;

/// Writes at or below this size are copied into a kernel buffer;
/// larger ones are wired in place and the caller waits for completion.
pub const DEVICE_IO_INBAND_MAX: usize = PAGE_SIZE;

/// Round a byte count up to a whole number of pages
#[inline]
pub const fn round_page(size: usize) -> usize {
    (size + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

/// [`round_page`] that reports overflow instead of wrapping
#[inline]
pub const fn checked_round_page(size: usize) -> Option<usize> {
    match size.checked_add(PAGE_SIZE - 1) {
        Some(end) => Some(end & !(PAGE_SIZE - 1)),
        None => None,
    }
}

/// Runtime kernel configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelConfig {
    /// Maximum level emitted by the console logger
    pub log_level: LevelFilter,
    /// Copy threshold for device writes
    pub inband_max: usize,
    /// Cap on bytes the device layer may hold at once (None = unlimited)
    pub io_memory_limit: Option<usize>,
}

impl KernelConfig {
    pub fn with_log_level(mut self, level: LevelFilter) -> Self {
        self.log_level = level;
        self
    }

    pub fn with_inband_max(mut self, bytes: usize) -> Self {
        self.inband_max = bytes;
        self
    }

    pub fn with_io_memory_limit(mut self, bytes: usize) -> Self {
        self.io_memory_limit = Some(bytes);
        self
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            log_level: LevelFilter::Info,
            inband_max: DEVICE_IO_INBAND_MAX,
            io_memory_limit: None,
        }
    }
}
