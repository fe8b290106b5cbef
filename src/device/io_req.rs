//! I/O Request
//!
//! Based on Mach4 device/io_req.h
//!
//! An I/O request travels from the caller through [`block_io`] to a
//! driver's strategy routine and back through [`iodone`]. It is shared as
//! `Arc<IoRequest>` between those parties; every field that changes along
//! the way is atomic or behind a lock, and the embedded interlock orders
//! the done/wanted handshake between [`iowait`] and [`iodone`].
//!
//! [`block_io`]: crate::device::blkio::block_io
//! [`iowait`]: crate::device::ds_routines::iowait
//! [`iodone`]: crate::device::ds_routines::iodone

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use spin::Mutex;
use thiserror::Error;

use crate::kern::lock::SimpleLock;
use crate::types::{DeviceId, IoReqId};

// ============================================================================
// I/O Operation Flags
// ============================================================================

/// I/O operation word: direction plus status bits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoOp(u32);

impl IoOp {
    /// Write operation (no direction bit set)
    pub const WRITE: Self = Self(0x00000000);
    /// Read operation
    pub const READ: Self = Self(0x00000001);
    /// Open operation
    pub const OPEN: Self = Self(0x00000002);
    /// Operation complete
    pub const DONE: Self = Self(0x00000100);
    /// Error on operation
    pub const ERROR: Self = Self(0x00000200);
    /// Operation in progress
    pub const BUSY: Self = Self(0x00000400);
    /// Wakeup when no longer busy
    pub const WANTED: Self = Self(0x00000800);
    /// Bad disk block
    pub const BAD: Self = Self(0x00001000);
    /// Hand to the io_done thread when done
    pub const CALL: Self = Self(0x00002000);
    /// Data is inband (copied into the kernel)
    pub const INBAND: Self = Self(0x00004000);
    /// Internal, driver-specific
    pub const INTERNAL: Self = Self(0x00008000);
    /// Request loaned by another module
    pub const LOANED: Self = Self(0x00010000);

    const DIRECTION: u32 = Self::READ.0 | Self::OPEN.0;

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }

    pub const fn from_bits_truncate(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    pub const fn is_read(&self) -> bool {
        (self.0 & Self::READ.0) != 0
    }

    pub const fn is_open(&self) -> bool {
        (self.0 & Self::OPEN.0) != 0
    }

    /// A write is an operation with neither the read nor the open bit
    pub const fn is_write(&self) -> bool {
        (self.0 & Self::DIRECTION) == 0
    }

    pub const fn is_done(&self) -> bool {
        (self.0 & Self::DONE.0) != 0
    }

    pub const fn is_error(&self) -> bool {
        (self.0 & Self::ERROR.0) != 0
    }
}

impl core::ops::BitOr for IoOp {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl core::ops::BitOrAssign for IoOp {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl Default for IoOp {
    fn default() -> Self {
        Self::empty()
    }
}

// ============================================================================
// I/O Mode
// ============================================================================

/// I/O mode flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoMode(u32);

impl IoMode {
    /// Fail with `WouldBlock` rather than make the caller wait for the I/O
    pub const NOWAIT: Self = Self(0x0008);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }

    pub const fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }
}

impl Default for IoMode {
    fn default() -> Self {
        Self::empty()
    }
}

// ============================================================================
// Device Return Codes
// ============================================================================

/// Raw Mach device return code
pub type IoReturnCode = i32;

pub const D_SUCCESS: IoReturnCode = 0;
pub const D_IO_QUEUED: IoReturnCode = -1;

/// Device operation failure
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoReturn {
    #[error("hardware I/O error")]
    IoError,
    #[error("operation would block")]
    WouldBlock,
    #[error("no such device")]
    NoSuchDevice,
    #[error("device already open")]
    AlreadyOpen,
    #[error("device down")]
    DeviceDown,
    #[error("invalid operation")]
    InvalidOperation,
    #[error("invalid record number")]
    InvalidRecnum,
    #[error("invalid size")]
    InvalidSize,
    #[error("memory allocation failure")]
    NoMemory,
    #[error("device is read-only")]
    ReadOnly,
}

impl IoReturn {
    /// Mach `D_*` code for this error
    pub const fn code(self) -> IoReturnCode {
        match self {
            IoReturn::IoError => 2500,
            IoReturn::WouldBlock => 2501,
            IoReturn::NoSuchDevice => 2502,
            IoReturn::AlreadyOpen => 2503,
            IoReturn::DeviceDown => 2504,
            IoReturn::InvalidOperation => 2505,
            IoReturn::InvalidRecnum => 2506,
            IoReturn::InvalidSize => 2507,
            IoReturn::NoMemory => 2508,
            IoReturn::ReadOnly => 2509,
        }
    }
}

// ============================================================================
// I/O Request
// ============================================================================

/// Completion routine run by the io_done thread for `CALL` requests.
/// Returns `true` when the request is finished with.
pub type IoDoneFn = fn(&Arc<IoRequest>) -> bool;

/// I/O Request
///
/// Based on struct io_req from Mach4.
pub struct IoRequest {
    pub id: IoReqId,
    pub device_id: DeviceId,
    /// Unit number (minor device)
    pub unit: u32,
    op: AtomicU32,
    pub mode: IoMode,
    /// Starting record number (for random-access devices)
    pub recnum: u64,
    /// Amount requested; drivers may clamp it
    count: AtomicUsize,
    /// Amount of buffer memory attached
    alloc_size: AtomicUsize,
    /// Caller's original size, kept across clamping
    total: usize,
    /// Amount NOT done
    residual: AtomicUsize,
    error: Mutex<Option<IoReturn>>,
    data: Mutex<Vec<u8>>,
    wired: AtomicBool,
    pub done: Option<IoDoneFn>,
    pub(crate) interlock: SimpleLock,
}

impl core::fmt::Debug for IoRequest {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("IoRequest")
            .field("id", &self.id)
            .field("device_id", &self.device_id)
            .field("unit", &self.unit)
            .field("op", &self.op())
            .field("recnum", &self.recnum)
            .field("count", &self.count())
            .field("residual", &self.residual())
            .finish()
    }
}

impl IoRequest {
    fn with_op(device_id: DeviceId, unit: u32, op: IoOp, recnum: u64, count: usize) -> Self {
        Self {
            id: IoReqId::new(),
            device_id,
            unit,
            op: AtomicU32::new(op.bits()),
            mode: IoMode::empty(),
            recnum,
            count: AtomicUsize::new(count),
            alloc_size: AtomicUsize::new(0),
            total: count,
            residual: AtomicUsize::new(0),
            error: Mutex::new(None),
            data: Mutex::new(Vec::new()),
            wired: AtomicBool::new(false),
            done: None,
            interlock: SimpleLock::new(),
        }
    }

    /// Read `count` bytes starting at `recnum`; the buffer is allocated later
    pub fn read(device_id: DeviceId, unit: u32, recnum: u64, count: usize) -> Self {
        Self::with_op(device_id, unit, IoOp::READ, recnum, count)
    }

    /// Write caller-supplied `data` starting at `recnum`
    pub fn write(device_id: DeviceId, unit: u32, recnum: u64, data: Vec<u8>) -> Self {
        let req = Self::with_op(device_id, unit, IoOp::WRITE, recnum, data.len());
        *req.data.lock() = data;
        req
    }

    pub fn open(device_id: DeviceId, unit: u32) -> Self {
        Self::with_op(device_id, unit, IoOp::OPEN, 0, 0)
    }

    pub fn with_mode(mut self, mode: IoMode) -> Self {
        self.mode = mode;
        self
    }

    /// Route completion through the io_done thread
    pub fn with_done(mut self, done: IoDoneFn) -> Self {
        self.done = Some(done);
        self.op.fetch_or(IoOp::CALL.bits(), Ordering::Relaxed);
        self
    }

    pub fn op(&self) -> IoOp {
        IoOp::from_bits_truncate(self.op.load(Ordering::Acquire))
    }

    pub fn set_op(&self, op: IoOp) {
        self.op.fetch_or(op.bits(), Ordering::AcqRel);
    }

    pub fn clear_op(&self, op: IoOp) {
        self.op.fetch_and(!op.bits(), Ordering::AcqRel);
    }

    pub fn is_done(&self) -> bool {
        self.op().is_done()
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    pub fn set_count(&self, count: usize) {
        self.count.store(count, Ordering::Release);
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn alloc_size(&self) -> usize {
        self.alloc_size.load(Ordering::Acquire)
    }

    pub fn set_alloc_size(&self, size: usize) {
        self.alloc_size.store(size, Ordering::Release);
    }

    pub fn residual(&self) -> usize {
        self.residual.load(Ordering::Acquire)
    }

    pub fn set_residual(&self, residual: usize) {
        self.residual.store(residual, Ordering::Release);
    }

    /// Error recorded by the driver, if any
    pub fn error(&self) -> Option<IoReturn> {
        *self.error.lock()
    }

    /// Completion status as a `Result`
    pub fn result(&self) -> Result<(), IoReturn> {
        self.error().map_or(Ok(()), Err)
    }

    /// Record a driver-side failure; completion still goes through `iodone`
    pub fn set_error(&self, error: IoReturn) {
        *self.error.lock() = Some(error);
        self.set_op(IoOp::ERROR);
    }

    pub fn is_wired(&self) -> bool {
        self.wired.load(Ordering::Acquire)
    }

    pub(crate) fn set_wired(&self, wired: bool) {
        self.wired.store(wired, Ordering::Release);
    }

    /// Run `f` on the request buffer
    pub fn with_data<R>(&self, f: impl FnOnce(&mut Vec<u8>) -> R) -> R {
        f(&mut self.data.lock())
    }

    /// Copy of the buffer contents
    pub fn data(&self) -> Vec<u8> {
        self.data.lock().clone()
    }

    /// Detach the buffer from the request
    pub fn take_data(&self) -> Vec<u8> {
        core::mem::take(&mut *self.data.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn test_io_op_direction() {
        assert!(IoOp::READ.is_read());
        assert!(!IoOp::READ.is_write());
        assert!(IoOp::WRITE.is_write());
        assert!((IoOp::WRITE | IoOp::BUSY).is_write());
        // Open is neither a read nor a write
        assert!(!IoOp::OPEN.is_write());
        assert!(!IoOp::OPEN.is_read());
    }

    #[test]
    fn test_request_flags() {
        let req = IoRequest::read(DeviceId(1), 0, 0, 512);
        assert!(!req.is_done());
        req.set_op(IoOp::BUSY);
        assert!(req.op().contains(IoOp::BUSY));
        req.clear_op(IoOp::BUSY);
        req.set_op(IoOp::DONE);
        assert!(req.is_done());
        assert!(!req.op().contains(IoOp::BUSY));
    }

    #[test]
    fn test_write_keeps_total() {
        let req = IoRequest::write(DeviceId(2), 1, 8, vec![0xaa; 4096]);
        assert_eq!(req.count(), 4096);
        req.set_count(1024);
        assert_eq!(req.total(), 4096);
        assert_eq!(req.data().len(), 4096);
    }

    #[test]
    fn test_error_recording() {
        let req = IoRequest::write(DeviceId(2), 0, 0, vec![1, 2, 3]);
        assert_eq!(req.result(), Ok(()));
        req.set_error(IoReturn::IoError);
        assert_eq!(req.result(), Err(IoReturn::IoError));
        assert!(req.op().is_error());
        assert_eq!(IoReturn::IoError.code(), 2500);
    }

    #[test]
    fn test_with_done_sets_call() {
        fn done(_: &Arc<IoRequest>) -> bool {
            true
        }
        let req = IoRequest::read(DeviceId(3), 0, 0, 16).with_done(done);
        assert!(req.op().contains(IoOp::CALL));
        assert!(req.done.is_some());
    }
}
