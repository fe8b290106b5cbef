//! Scheduling Primitives - Wait/Wakeup on Events
//!
//! Based on Mach4 kern/sched_prim.h/c
//!
//! The sleeping primitives in this crate do not know how threads are
//! switched; they talk to a [`Scheduler`]. The contract is the Mach one:
//! a thread sleeps on a [`WaitEvent`] (usually the address of the object
//! it waits for), and another thread wakes one or all sleepers on that
//! event. `thread_sleep` drops the caller's interlock only once the caller
//! is on the wait queue, so a wakeup issued under that interlock can never
//! be missed.
//!
//! [`WaitQueueScheduler`] is a self-contained implementation of the
//! contract: sleepers park on a per-waiter slot and spin (or yield, with
//! the `std` feature) until a wakeup posts a result into it.

use alloc::collections::{BTreeMap, VecDeque};
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};
use spin::Mutex;

use crate::kern::counters::MachCounter;
use crate::kern::lock::SimpleLock;
use crate::types::WaiterId;

// ============================================================================
// Wait Results
// ============================================================================

/// Why a sleeping thread woke up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum WaitResult {
    /// Woken by a wakeup on its event
    Normal = 0,
    /// Wait was cleared by an interruption (signal, termination)
    Interrupted = 2,
    /// The operation should be restarted
    Restart = 3,
}

impl WaitResult {
    const fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(WaitResult::Normal),
            2 => Some(WaitResult::Interrupted),
            3 => Some(WaitResult::Restart),
            _ => None,
        }
    }
}

// ============================================================================
// Wait Event
// ============================================================================

/// Event that threads can wait on; in Mach, an address cast to an integer
pub type WaitEvent = usize;

/// Special value indicating no event
pub const EVENT_NULL: WaitEvent = 0;

/// Create an event from the address of an object
pub fn event_from_addr<T: ?Sized>(addr: &T) -> WaitEvent {
    addr as *const T as *const () as usize
}

// ============================================================================
// Scheduler contract
// ============================================================================

/// Block/wakeup services the kernel primitives are built on
pub trait Scheduler: Sync {
    /// Sleep on `event`, releasing `interlock` atomically with entering
    /// the wait. Returns with `interlock` released.
    fn thread_sleep(&self, event: WaitEvent, interlock: &SimpleLock, interruptible: bool)
        -> WaitResult;

    /// Wake one or all threads sleeping on `event` with `result`.
    /// Returns how many threads were woken.
    fn thread_wakeup_prim(&self, event: WaitEvent, one_thread: bool, result: WaitResult) -> usize;

    /// Wake at most one sleeper; reports whether there was one
    fn thread_wakeup_one(&self, event: WaitEvent) -> bool {
        self.thread_wakeup_prim(event, true, WaitResult::Normal) != 0
    }

    /// Wake every sleeper on `event`
    fn thread_wakeup(&self, event: WaitEvent) -> usize {
        self.thread_wakeup_prim(event, false, WaitResult::Normal)
    }

    /// Move up to `count` sleepers from `from` to `to` without waking them.
    ///
    /// Schedulers that cannot move waiters wake everyone on `from`
    /// instead; the sleepers then re-check their condition.
    fn thread_requeue(&self, from: WaitEvent, _to: WaitEvent, _count: usize) -> usize {
        self.thread_wakeup(from);
        0
    }

    /// Assert the caller holds no simple locks before it may block
    fn check_simple_locks(&self) {}
}

// ============================================================================
// Waiter Entry
// ============================================================================

const SLOT_PENDING: u32 = u32::MAX;

/// Where a wakeup delivers its result to a parked thread
#[derive(Debug)]
struct WaitSlot {
    result: AtomicU32,
}

impl WaitSlot {
    fn new() -> Self {
        Self {
            result: AtomicU32::new(SLOT_PENDING),
        }
    }

    fn post(&self, result: WaitResult) {
        self.result.store(result as u32, Ordering::Release);
    }

    fn poll(&self) -> Option<WaitResult> {
        WaitResult::from_raw(self.result.load(Ordering::Acquire))
    }
}

/// A thread waiting on an event
#[derive(Debug, Clone)]
pub struct Waiter {
    pub id: WaiterId,
    pub event: WaitEvent,
    pub interruptible: bool,
    slot: Arc<WaitSlot>,
}

impl Waiter {
    fn wake(&self, result: WaitResult) {
        self.slot.post(result);
    }
}

// ============================================================================
// Wait Queue
// ============================================================================

/// Threads waiting, grouped by event
#[derive(Debug)]
pub struct WaitQueue {
    waiters: BTreeMap<WaitEvent, VecDeque<Waiter>>,
    count: usize,
}

impl WaitQueue {
    pub const fn new() -> Self {
        Self {
            waiters: BTreeMap::new(),
            count: 0,
        }
    }

    pub fn add(&mut self, waiter: Waiter) {
        self.waiters.entry(waiter.event).or_default().push_back(waiter);
        self.count += 1;
    }

    /// Remove a specific waiter
    pub fn remove(&mut self, id: WaiterId) -> Option<Waiter> {
        let (event, pos) = self.waiters.iter().find_map(|(event, waiters)| {
            waiters.iter().position(|w| w.id == id).map(|pos| (*event, pos))
        })?;
        self.take(event, pos)
    }

    pub fn find(&self, id: WaiterId) -> Option<&Waiter> {
        self.waiters.values().flat_map(|w| w.iter()).find(|w| w.id == id)
    }

    fn take(&mut self, event: WaitEvent, pos: usize) -> Option<Waiter> {
        let waiters = self.waiters.get_mut(&event)?;
        let waiter = waiters.remove(pos)?;
        if waiters.is_empty() {
            self.waiters.remove(&event);
        }
        self.count -= 1;
        Some(waiter)
    }

    /// Dequeue one waiter on `event`
    pub fn wakeup_one(&mut self, event: WaitEvent) -> Option<Waiter> {
        self.take(event, 0)
    }

    /// Dequeue every waiter on `event`
    pub fn wakeup_all(&mut self, event: WaitEvent) -> Vec<Waiter> {
        match self.waiters.remove(&event) {
            Some(waiters) => {
                self.count -= waiters.len();
                waiters.into_iter().collect()
            }
            None => Vec::new(),
        }
    }

    /// Dequeue the interruptible waiters on `event`, leaving the rest
    pub fn take_interruptible(&mut self, event: WaitEvent) -> Vec<Waiter> {
        let Some(waiters) = self.waiters.get_mut(&event) else {
            return Vec::new();
        };
        let (taken, kept): (VecDeque<Waiter>, VecDeque<Waiter>) =
            waiters.drain(..).partition(|w| w.interruptible);
        *waiters = kept;
        if waiters.is_empty() {
            self.waiters.remove(&event);
        }
        self.count -= taken.len();
        taken.into_iter().collect()
    }

    /// Move up to `max` waiters from `from` onto the tail of `to`
    pub fn requeue(&mut self, from: WaitEvent, to: WaitEvent, max: usize) -> usize {
        if from == to {
            return 0;
        }
        let Some(source) = self.waiters.get_mut(&from) else {
            return 0;
        };
        let n = max.min(source.len());
        let mut moved: VecDeque<Waiter> = source.drain(..n).collect();
        if source.is_empty() {
            self.waiters.remove(&from);
        }
        for waiter in moved.iter_mut() {
            waiter.event = to;
        }
        self.waiters.entry(to).or_default().extend(moved);
        n
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn count_on(&self, event: WaitEvent) -> usize {
        self.waiters.get(&event).map_or(0, |w| w.len())
    }

    pub fn has_waiters(&self, event: WaitEvent) -> bool {
        self.count_on(event) != 0
    }
}

impl Default for WaitQueue {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Wait-queue scheduler
// ============================================================================

#[inline]
fn relax() {
    #[cfg(any(test, feature = "std"))]
    std::thread::yield_now();
    #[cfg(not(any(test, feature = "std")))]
    core::hint::spin_loop();
}

/// Scheduler whose sleepers park on a wait queue
pub struct WaitQueueScheduler {
    queue: Mutex<WaitQueue>,
    sleeps: MachCounter,
    wakeups: MachCounter,
    lock_checks: MachCounter,
}

impl WaitQueueScheduler {
    pub const fn new() -> Self {
        Self {
            queue: Mutex::new(WaitQueue::new()),
            sleeps: MachCounter::new("sched_sleeps"),
            wakeups: MachCounter::new("sched_wakeups"),
            lock_checks: MachCounter::new("sched_lock_checks"),
        }
    }

    /// Deliver an abnormal wakeup to one waiter.
    ///
    /// An `Interrupted` result is only delivered to interruptible waits.
    pub fn clear_wait(&self, id: WaiterId, result: WaitResult) -> bool {
        let mut wq = self.queue.lock();
        match wq.find(id) {
            Some(w) if result != WaitResult::Interrupted || w.interruptible => {}
            _ => return false,
        }
        match wq.remove(id) {
            Some(waiter) => {
                waiter.wake(result);
                true
            }
            None => false,
        }
    }

    /// Interrupt every interruptible waiter on `event`
    pub fn interrupt_event(&self, event: WaitEvent) -> usize {
        let mut wq = self.queue.lock();
        let waiters = wq.take_interruptible(event);
        for waiter in waiters.iter() {
            waiter.wake(WaitResult::Interrupted);
        }
        log::trace!("interrupted {} waiter(s) on {:#x}", waiters.len(), event);
        waiters.len()
    }

    /// Waiters currently parked on `event`
    pub fn waiter_count(&self, event: WaitEvent) -> usize {
        self.queue.lock().count_on(event)
    }

    /// IDs of the waiters parked on `event`, oldest first
    pub fn waiters_on(&self, event: WaitEvent) -> Vec<WaiterId> {
        let wq = self.queue.lock();
        wq.waiters
            .get(&event)
            .map(|w| w.iter().map(|w| w.id).collect())
            .unwrap_or_default()
    }

    /// Total number of sleeps entered
    pub fn sleeps(&self) -> u64 {
        self.sleeps.get()
    }

    /// Total number of threads woken
    pub fn wakeups(&self) -> u64 {
        self.wakeups.get()
    }

    /// Number of `check_simple_locks` calls seen
    pub fn lock_checks(&self) -> u64 {
        self.lock_checks.get()
    }
}

impl Default for WaitQueueScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for WaitQueueScheduler {
    fn thread_sleep(
        &self,
        event: WaitEvent,
        interlock: &SimpleLock,
        interruptible: bool,
    ) -> WaitResult {
        let slot = Arc::new(WaitSlot::new());
        {
            let mut wq = self.queue.lock();
            wq.add(Waiter {
                id: WaiterId::new(),
                event,
                interruptible,
                slot: Arc::clone(&slot),
            });
            // Enqueued before the interlock drops: wakeups can't slip past.
            interlock.unlock();
        }
        self.sleeps.inc();

        loop {
            if let Some(result) = slot.poll() {
                return result;
            }
            relax();
        }
    }

    fn thread_wakeup_prim(&self, event: WaitEvent, one_thread: bool, result: WaitResult) -> usize {
        let mut wq = self.queue.lock();
        let woken = if one_thread {
            match wq.wakeup_one(event) {
                Some(waiter) => {
                    waiter.wake(result);
                    1
                }
                None => 0,
            }
        } else {
            let waiters = wq.wakeup_all(event);
            for waiter in waiters.iter() {
                waiter.wake(result);
            }
            waiters.len()
        };
        self.wakeups.add(woken as u64);
        woken
    }

    fn thread_requeue(&self, from: WaitEvent, to: WaitEvent, count: usize) -> usize {
        self.queue.lock().requeue(from, to, count)
    }

    fn check_simple_locks(&self) {
        self.lock_checks.inc();
    }
}
