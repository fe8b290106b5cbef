//! Block I/O
//!
//! Based on Mach4 device/blkio.c
//!
//! Generic dispatch for block devices: clamp the transfer, get the memory
//! ready, hand the request to the driver, and wait only when the caller's
//! memory is still in use by the device.

use alloc::collections::VecDeque;
use alloc::sync::Arc;

use crate::config::MAXPHYS;
use crate::counter;
use crate::device::ds_routines::{iowait, IoMemory};
use crate::device::io_req::{IoMode, IoOp, IoRequest, IoReturn, IoReturnCode, D_IO_QUEUED, D_SUCCESS};
use crate::kern::counters::{C_BLOCK_IO_QUEUED, C_BLOCK_IO_SYNC};
use crate::kern::sched_prim::Scheduler;

// ============================================================================
// Driver interface
// ============================================================================

/// Capabilities a block driver provides to the generic layer
pub trait BlockDevice: Send + Sync {
    /// Driver name, used in error reports
    fn name(&self) -> &str {
        "blk"
    }

    /// Start the transfer described by `ior`.
    ///
    /// The driver completes it later with [`iodone`](crate::device::ds_routines::iodone).
    fn strategy(&self, ior: Arc<IoRequest>);

    /// Clamp `ior`'s count to what the device can move in one transfer
    fn max_transfer(&self, ior: &IoRequest) {
        minphys(ior);
    }
}

/// How [`block_io`] left the request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockIoStatus {
    /// The transfer finished before returning; check [`IoRequest::result`]
    Done,
    /// The driver owns the request; completion arrives through `iodone`
    Queued,
}

impl BlockIoStatus {
    pub const fn code(self) -> IoReturnCode {
        match self {
            BlockIoStatus::Done => D_SUCCESS,
            BlockIoStatus::Queued => D_IO_QUEUED,
        }
    }
}

// ============================================================================
// Dispatch
// ============================================================================

/// Run a read or write through a block driver.
///
/// Memory failures are returned before the driver ever sees the request.
/// A request in [`IoMode::NOWAIT`] that would have to wait for the device
/// fails with [`IoReturn::WouldBlock`] instead, its memory released.
pub fn block_io<D, M, S>(
    dev: &D,
    ior: &Arc<IoRequest>,
    mem: &M,
    sched: &S,
) -> Result<BlockIoStatus, IoReturn>
where
    D: BlockDevice + ?Sized,
    M: IoMemory + ?Sized,
    S: Scheduler + ?Sized,
{
    dev.max_transfer(ior);

    let prepared = if ior.op().is_read() {
        mem.read_alloc(ior, ior.count()).map(|()| false)
    } else {
        mem.write_get(ior)
    };
    let must_wait = prepared.inspect_err(|err| {
        log::warn!("block_io: {}: request {:?} not started: {}", dev.name(), ior.id, err);
    })?;

    if must_wait && ior.mode.contains(IoMode::NOWAIT) {
        mem.release(ior);
        log::debug!("block_io: {}: request {:?} would block", dev.name(), ior.id);
        return Err(IoReturn::WouldBlock);
    }

    log::debug!(
        "block_io: {}: recnum {} count {} ({})",
        dev.name(),
        ior.recnum,
        ior.count(),
        if must_wait { "sync" } else { "queued" }
    );

    ior.set_op(IoOp::BUSY);
    dev.strategy(Arc::clone(ior));

    if must_wait {
        iowait(ior, sched);
        counter!(C_BLOCK_IO_SYNC);
        Ok(BlockIoStatus::Done)
    } else {
        counter!(C_BLOCK_IO_QUEUED);
        Ok(BlockIoStatus::Queued)
    }
}

/// Default transfer limit.
///
/// Only reads (and opens) are clamped; a write is left alone because its
/// memory has already been prepared for the full size.
pub fn minphys(ior: &IoRequest) {
    if ior.op().is_write() {
        return;
    }
    if ior.count() > MAXPHYS {
        ior.set_count(MAXPHYS);
    }
}

// ============================================================================
// Disk queue
// ============================================================================

/// Pending requests for one drive, in elevator order.
///
/// The front entry is the one the drive is working on.
#[derive(Debug, Default)]
pub struct DiskQueue {
    queue: VecDeque<Arc<IoRequest>>,
}

impl DiskQueue {
    pub const fn new() -> Self {
        Self {
            queue: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn front(&self) -> Option<&Arc<IoRequest>> {
        self.queue.front()
    }

    pub fn pop_front(&mut self) -> Option<Arc<IoRequest>> {
        self.queue.pop_front()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<IoRequest>> {
        self.queue.iter()
    }

    /// Insert `ior` using a one-way elevator on record number.
    ///
    /// The queue holds at most two ascending runs: the current sweep, which
    /// starts at the active request, then the next sweep for requests below
    /// it. Equal record numbers keep arrival order.
    pub fn disksort(&mut self, ior: Arc<IoRequest>) {
        let q = &mut self.queue;
        if q.is_empty() {
            q.push_back(ior);
            return;
        }

        let key = ior.recnum;
        let mut at = 0;

        if key < q[0].recnum {
            // Goes in the next sweep: skip to the inversion, then sort in.
            while at + 1 < q.len() {
                if q[at + 1].recnum < q[at].recnum {
                    while at + 1 < q.len() && key >= q[at + 1].recnum {
                        at += 1;
                    }
                    break;
                }
                at += 1;
            }
        } else {
            while at + 1 < q.len() {
                let next = q[at + 1].recnum;
                if next < q[at].recnum || key < next {
                    break;
                }
                at += 1;
            }
        }

        q.insert(at + 1, ior);
    }
}

pub fn disksort(queue: &mut DiskQueue, ior: Arc<IoRequest>) {
    queue.disksort(ior);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::ds_routines::{iodone, IoDoneQueue, KernelIoMemory};
    use crate::kern::sched_prim::{event_from_addr, WaitQueueScheduler};
    use crate::types::DeviceId;
    use alloc::vec;
    use alloc::vec::Vec;
    use spin::Mutex;
    use std::thread;

    /// Records what reached the strategy routine; never completes anything
    #[derive(Default)]
    struct Recorder {
        started: Mutex<Vec<Arc<IoRequest>>>,
    }

    impl BlockDevice for Recorder {
        fn strategy(&self, ior: Arc<IoRequest>) {
            self.started.lock().push(ior);
        }
    }

    struct Refuse;

    impl IoMemory for Refuse {
        fn read_alloc(&self, _: &IoRequest, _: usize) -> Result<(), IoReturn> {
            Err(IoReturn::NoMemory)
        }

        fn write_get(&self, _: &IoRequest) -> Result<bool, IoReturn> {
            Err(IoReturn::NoMemory)
        }
    }

    fn req(recnum: u64) -> Arc<IoRequest> {
        Arc::new(IoRequest::read(DeviceId(1), 0, recnum, 512))
    }

    fn recnums(q: &DiskQueue) -> Vec<u64> {
        q.iter().map(|r| r.recnum).collect()
    }

    #[test]
    fn test_minphys_clamps_large_read() {
        let ior = IoRequest::read(DeviceId(1), 0, 0, 300 * 1024);
        minphys(&ior);
        assert_eq!(ior.count(), 262_144);
    }

    #[test]
    fn test_minphys_leaves_writes() {
        let ior = IoRequest::write(DeviceId(1), 0, 0, vec![0; MAXPHYS + 1]);
        minphys(&ior);
        assert_eq!(ior.count(), MAXPHYS + 1);

        let small = IoRequest::read(DeviceId(1), 0, 0, 100);
        minphys(&small);
        assert_eq!(small.count(), 100);
    }

    #[test]
    fn test_block_io_read_is_queued() {
        let dev = Recorder::default();
        let mem = KernelIoMemory::new();
        let sched = WaitQueueScheduler::new();
        let ior = Arc::new(IoRequest::read(DeviceId(1), 0, 8, 300 * 1024));

        assert_eq!(block_io(&dev, &ior, &mem, &sched), Ok(BlockIoStatus::Queued));
        assert_eq!(ior.count(), MAXPHYS);
        assert_eq!(ior.alloc_size(), MAXPHYS);
        assert!(ior.op().contains(IoOp::BUSY));
        assert_eq!(dev.started.lock().len(), 1);
        assert_eq!(sched.sleeps(), 0);
    }

    #[test]
    fn test_block_io_small_write_is_queued() {
        let dev = Recorder::default();
        let mem = KernelIoMemory::new();
        let sched = WaitQueueScheduler::new();
        let ior = Arc::new(IoRequest::write(DeviceId(1), 0, 0, vec![1; 128]));

        assert_eq!(block_io(&dev, &ior, &mem, &sched), Ok(BlockIoStatus::Queued));
        assert!(ior.op().contains(IoOp::INBAND));
        assert_eq!(BlockIoStatus::Queued.code(), D_IO_QUEUED);
    }

    #[test]
    fn test_block_io_memory_failure_skips_strategy() {
        let dev = Recorder::default();
        let sched = WaitQueueScheduler::new();

        let read = req(0);
        assert_eq!(block_io(&dev, &read, &Refuse, &sched), Err(IoReturn::NoMemory));
        let write = Arc::new(IoRequest::write(DeviceId(1), 0, 0, vec![0; 64]));
        assert_eq!(block_io(&dev, &write, &Refuse, &sched), Err(IoReturn::NoMemory));

        assert!(dev.started.lock().is_empty());
        assert!(!read.op().contains(IoOp::BUSY));
    }

    #[test]
    fn test_block_io_nowait_write_would_block() {
        let dev = Recorder::default();
        let mem = KernelIoMemory::new();
        let sched = WaitQueueScheduler::new();
        let ior = Arc::new(
            IoRequest::write(DeviceId(1), 0, 0, vec![9; 64 * 1024]).with_mode(IoMode::NOWAIT),
        );

        assert_eq!(block_io(&dev, &ior, &mem, &sched), Err(IoReturn::WouldBlock));
        assert!(dev.started.lock().is_empty());
        assert!(!ior.is_wired());
        assert_eq!(mem.in_use(), 0);

        // Nothing to wait for: a copied write goes through as usual.
        let small = Arc::new(
            IoRequest::write(DeviceId(1), 0, 0, vec![9; 128]).with_mode(IoMode::NOWAIT),
        );
        assert_eq!(block_io(&dev, &small, &mem, &sched), Ok(BlockIoStatus::Queued));
    }

    #[test]
    fn test_block_io_large_write_waits() {
        let dev = Arc::new(Recorder::default());
        let mem = KernelIoMemory::new();
        let sched = Arc::new(WaitQueueScheduler::new());
        let done_queue = Arc::new(IoDoneQueue::new());
        let ior = Arc::new(IoRequest::write(DeviceId(1), 0, 0, vec![9; 64 * 1024]));

        let caller = {
            let dev = Arc::clone(&dev);
            let sched = Arc::clone(&sched);
            let ior = Arc::clone(&ior);
            thread::spawn(move || block_io(&*dev, &ior, &mem, &*sched))
        };

        // Play the interrupt handler once the caller is parked.
        while sched.waiter_count(event_from_addr(&*ior)) == 0 {
            thread::yield_now();
        }
        let started = dev.started.lock().pop();
        let started = started.unwrap();
        assert!(Arc::ptr_eq(&started, &ior));
        iodone(&started, &*sched, &done_queue);

        assert_eq!(caller.join().unwrap(), Ok(BlockIoStatus::Done));
        assert!(ior.is_done());
        assert!(ior.is_wired());
    }

    #[test]
    fn test_disksort_elevator_order() {
        let mut q = DiskQueue::new();
        for recnum in [50, 70, 60, 10, 90, 5, 55] {
            q.disksort(req(recnum));
        }
        assert_eq!(recnums(&q), vec![50, 55, 60, 70, 90, 5, 10]);
    }

    #[test]
    fn test_disksort_never_displaces_head() {
        let mut q = DiskQueue::new();
        q.disksort(req(40));
        q.disksort(req(1));
        q.disksort(req(0));
        assert_eq!(recnums(&q), vec![40, 0, 1]);

        assert_eq!(q.pop_front().map(|r| r.recnum), Some(40));
        disksort(&mut q, req(2));
        assert_eq!(recnums(&q), vec![0, 1, 2]);
    }

    #[test]
    fn test_disksort_equal_keys_fifo() {
        let mut q = DiskQueue::new();
        let first = req(10);
        let second = req(20);
        let third = req(20);
        q.disksort(first);
        q.disksort(Arc::clone(&second));
        q.disksort(Arc::clone(&third));
        let order: Vec<_> = q.iter().map(|r| r.id).collect();
        assert_eq!(order[1], second.id);
        assert_eq!(order[2], third.id);
    }
}
