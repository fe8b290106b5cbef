//! Mach_R kernel I/O core
//!
//! The synchronization and block-I/O layer of a Mach-style kernel:
//! atomic primitives, simple locks, the sleep/wakeup contract, the
//! kernel mutex and global sync built on them, and the generic block
//! device dispatcher with its completion handshake.

#![no_std]
// Kernel-appropriate clippy configuration
// Many kernel types have specialized initialization that doesn't fit Default
#![allow(clippy::new_without_default)]
// Kernel code often needs explicit casts for memory-mapped I/O
#![allow(clippy::unnecessary_cast)]
#![allow(clippy::len_without_is_empty)]

// Standard library replacement for no_std
extern crate alloc;

#[cfg(any(test, feature = "std"))]
extern crate std;

// Core types
pub mod types;

pub mod config;
pub mod console;

// Mach kern subsystem (locks, sleep/wakeup, kmutex, gsync)
pub mod kern;

// Mach Device subsystem
pub mod device;

pub use config::KernelConfig;

/// Kernel version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
/// Kernel name
pub const NAME: &str = "Mach_R";

/// Initialize the kernel library
///
/// Sets up the console and routes the `log` facade to it.
pub fn init(config: &KernelConfig) -> Result<(), log::SetLoggerError> {
    console::init();
    console::init_logging(config.log_level)?;

    log::info!("{} {} starting", NAME, VERSION);
    Ok(())
}
