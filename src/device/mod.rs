//! Mach Device Subsystem
//!
//! Based on Mach4 device/ subsystem.
//! Provides the generic half of block I/O:
//! - I/O request handling
//! - Block dispatch, transfer limits and disk queue ordering
//! - Request memory and the completion handshake
//! - Block device switch
//!
//! Drivers plug in through [`BlockDevice`].

pub mod blkio;
pub mod conf;
pub mod ds_routines;
pub mod io_req;
pub mod subrs;

pub use blkio::{block_io, minphys, BlockDevice, BlockIoStatus, DiskQueue};
pub use conf::BlockDevSwitch;
pub use ds_routines::{iodone, iowait, IoDoneQueue, IoMemory, KernelIoMemory};
pub use io_req::{IoMode, IoOp, IoRequest, IoReturn};
