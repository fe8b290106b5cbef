//! Device Service Routines
//!
//! Based on Mach4 device/ds_routines.c
//!
//! Memory handling for device requests (`device_read_alloc`,
//! `device_write_get`) and the completion handshake (`iowait`, `iodone`,
//! the io_done list).

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use spin::Mutex;

use crate::config::{checked_round_page, KernelConfig, DEVICE_IO_INBAND_MAX};
use crate::counter;
use crate::device::io_req::{IoOp, IoRequest, IoReturn};
use crate::kern::counters::{C_IOWAIT_BLOCK, C_IO_DONE_THREAD_BLOCK};
use crate::kern::lock::SimpleLock;
use crate::kern::sched_prim::{event_from_addr, Scheduler, WaitEvent};

// ============================================================================
// Request memory
// ============================================================================

/// Buffer management for device requests
pub trait IoMemory: Sync {
    /// Attach a kernel buffer of `size` bytes to a read request
    fn read_alloc(&self, ior: &IoRequest, size: usize) -> Result<(), IoReturn>;

    /// Make a write request's data safe for the device to use.
    ///
    /// Returns `true` if the caller must wait for the I/O to complete
    /// before its memory may be touched again.
    fn write_get(&self, ior: &IoRequest) -> Result<bool, IoReturn>;

    /// Give back whatever `read_alloc`/`write_get` attached
    fn release(&self, _ior: &IoRequest) {}
}

/// Heap-backed request memory with an optional ceiling
#[derive(Debug)]
pub struct KernelIoMemory {
    inband_max: usize,
    limit: Option<usize>,
    in_use: AtomicUsize,
}

impl KernelIoMemory {
    pub const fn new() -> Self {
        Self {
            inband_max: DEVICE_IO_INBAND_MAX,
            limit: None,
            in_use: AtomicUsize::new(0),
        }
    }

    pub fn from_config(config: &KernelConfig) -> Self {
        Self {
            inband_max: config.inband_max,
            limit: config.io_memory_limit,
            in_use: AtomicUsize::new(0),
        }
    }

    pub fn with_limit(mut self, bytes: usize) -> Self {
        self.limit = Some(bytes);
        self
    }

    /// Bytes currently attached to requests
    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Acquire)
    }

    fn reserve(&self, size: usize) -> Result<(), IoReturn> {
        let limit = self.limit.unwrap_or(usize::MAX);
        self.in_use
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(size).filter(|&n| n <= limit)
            })
            .map(|_| ())
            .map_err(|_| IoReturn::NoMemory)
    }

    fn unreserve(&self, size: usize) {
        self.in_use.fetch_sub(size, Ordering::AcqRel);
    }
}

impl Default for KernelIoMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl IoMemory for KernelIoMemory {
    fn read_alloc(&self, ior: &IoRequest, size: usize) -> Result<(), IoReturn> {
        let alloc = checked_round_page(size).ok_or(IoReturn::NoMemory)?;
        self.reserve(alloc)?;

        let grown = ior.with_data(|data| {
            data.clear();
            data.try_reserve_exact(alloc).map(|()| data.resize(size, 0))
        });
        if grown.is_err() {
            self.unreserve(alloc);
            return Err(IoReturn::NoMemory);
        }
        ior.set_alloc_size(alloc);
        Ok(())
    }

    fn write_get(&self, ior: &IoRequest) -> Result<bool, IoReturn> {
        let count = ior.count();

        if ior.op().contains(IoOp::INBAND) || count <= self.inband_max {
            // Small writes are copied; the caller's memory is free at once.
            self.reserve(count)?;
            ior.set_op(IoOp::INBAND);
            ior.set_alloc_size(count);
            return Ok(false);
        }

        // Large writes are wired where they are; the caller has to wait.
        let alloc = checked_round_page(ior.total()).ok_or(IoReturn::NoMemory)?;
        self.reserve(alloc)?;
        ior.set_wired(true);
        ior.set_alloc_size(alloc);
        Ok(true)
    }

    fn release(&self, ior: &IoRequest) {
        let size = ior.alloc_size();
        if size != 0 {
            self.unreserve(size);
            ior.set_alloc_size(0);
        }
        ior.set_wired(false);
    }
}

pub fn device_read_alloc<M: IoMemory + ?Sized>(
    mem: &M,
    ior: &IoRequest,
    size: usize,
) -> Result<(), IoReturn> {
    mem.read_alloc(ior, size)
}

pub fn device_write_get<M: IoMemory + ?Sized>(mem: &M, ior: &IoRequest) -> Result<bool, IoReturn> {
    mem.write_get(ior)
}

pub fn device_io_release<M: IoMemory + ?Sized>(mem: &M, ior: &IoRequest) {
    mem.release(ior);
}

// ============================================================================
// Completion
// ============================================================================

/// Block until `ior` has been marked done by [`iodone`]
pub fn iowait<S: Scheduler + ?Sized>(ior: &IoRequest, sched: &S) {
    let event = event_from_addr(ior);
    let mut slept = false;

    ior.interlock.lock();
    while !ior.is_done() {
        ior.set_op(IoOp::WANTED);
        slept = true;
        sched.thread_sleep(event, &ior.interlock, false);
        ior.interlock.lock();
    }
    ior.interlock.unlock();

    if slept {
        counter!(C_IOWAIT_BLOCK);
    }
}

/// Mark `ior` complete and notify whoever is waiting for it.
///
/// Requests flagged `CALL` go on the io_done list for the completion
/// thread; a caller blocked in [`iowait`] is woken either way.
pub fn iodone<S: Scheduler + ?Sized>(ior: &Arc<IoRequest>, sched: &S, done_queue: &IoDoneQueue) {
    ior.interlock.lock();
    ior.set_op(IoOp::DONE);
    ior.clear_op(IoOp::BUSY);

    let op = ior.op();
    if op.contains(IoOp::CALL) {
        done_queue.enqueue(Arc::clone(ior), sched);
    }
    if op.contains(IoOp::WANTED) {
        ior.clear_op(IoOp::WANTED);
        sched.thread_wakeup(event_from_addr(&**ior));
    }
    ior.interlock.unlock();
}

/// Completed `CALL` requests waiting for the io_done thread
pub struct IoDoneQueue {
    list: Mutex<VecDeque<Arc<IoRequest>>>,
    interlock: SimpleLock,
    running: AtomicBool,
}

impl IoDoneQueue {
    pub const fn new() -> Self {
        Self {
            list: Mutex::new(VecDeque::new()),
            interlock: SimpleLock::new(),
            running: AtomicBool::new(true),
        }
    }

    fn event(&self) -> WaitEvent {
        event_from_addr(self)
    }

    pub fn len(&self) -> usize {
        self.list.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn enqueue<S: Scheduler + ?Sized>(&self, ior: Arc<IoRequest>, sched: &S) {
        self.interlock.lock();
        self.list.lock().push_back(ior);
        sched.thread_wakeup_one(self.event());
        self.interlock.unlock();
    }

    /// Stop the io_done thread after it drains what is queued
    pub fn shutdown<S: Scheduler + ?Sized>(&self, sched: &S) {
        self.interlock.lock();
        self.running.store(false, Ordering::Release);
        sched.thread_wakeup(self.event());
        self.interlock.unlock();
    }

    fn pop(&self) -> Option<Arc<IoRequest>> {
        self.list.lock().pop_front()
    }
}

impl Default for IoDoneQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Run completion routines for everything on the io_done list.
///
/// Returns the number of requests processed.
pub fn io_done_thread_continue(queue: &IoDoneQueue) -> usize {
    let mut processed = 0;
    while let Some(ior) = queue.pop() {
        let finished = match ior.done {
            Some(done) => done(&ior),
            None => true,
        };
        if !finished {
            log::debug!("io_done: request {:?} kept by its completion routine", ior.id);
        }
        processed += 1;
    }
    processed
}

/// Body of the io_done thread: process completions until shut down
pub fn io_done_thread<S: Scheduler + ?Sized>(queue: &IoDoneQueue, sched: &S) -> usize {
    let mut processed = 0;
    loop {
        processed += io_done_thread_continue(queue);

        queue.interlock.lock();
        if !queue.is_empty() {
            queue.interlock.unlock();
            continue;
        }
        if !queue.running.load(Ordering::Acquire) {
            queue.interlock.unlock();
            return processed;
        }
        counter!(C_IO_DONE_THREAD_BLOCK);
        sched.thread_sleep(queue.event(), &queue.interlock, false);
    }
}
