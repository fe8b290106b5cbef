//! Kernel Mutex
//!
//! Based on Mach kern/kmutex.h/c
//!
//! A sleeping lock with a lock-free fast path. The state word has three
//! values:
//!
//! - `Available`: nobody holds the mutex and nobody waits for it
//! - `Locked`: held, and no waiter has announced itself
//! - `Contended`: held, and waiters may be asleep on the mutex address
//!
//! Uncontended lock and unlock are a single compare-and-swap each. Only a
//! thread that finds the mutex taken goes to the interlock, marks the state
//! `Contended` and sleeps. Unlock from `Contended` wakes one sleeper and
//! hands ownership to it directly: the state stays `Contended` and the
//! woken thread returns from [`KMutex::lock`] as the owner. If every waiter
//! was interrupted away before the unlock, the unlock finds nobody to wake
//! and resets the state to `Available`.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicU32, Ordering};

use crate::counter;
use crate::kern::atomic::{self, MemOrder};
use crate::kern::counters::{
    C_KMUTEX_BLOCK, C_KMUTEX_FAST_LOCK, C_KMUTEX_HANDOFF, C_KMUTEX_INTERRUPTED,
    C_KMUTEX_SLOW_LOCK,
};
use crate::kern::kern_return::KernError;
use crate::kern::lock::SimpleLock;
use crate::kern::sched_prim::{event_from_addr, Scheduler, WaitEvent, WaitResult};

/// Mutex state word values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum KmutexState {
    Available = 0,
    Locked = 1,
    Contended = 2,
}

impl KmutexState {
    const fn from_raw(raw: u32) -> Self {
        match raw {
            0 => KmutexState::Available,
            1 => KmutexState::Locked,
            _ => KmutexState::Contended,
        }
    }
}

const KMUTEX_AVAIL: u32 = KmutexState::Available as u32;
const KMUTEX_LOCKED: u32 = KmutexState::Locked as u32;
const KMUTEX_CONTENDED: u32 = KmutexState::Contended as u32;

/// A kernel mutex, meant to be embedded in the structure it protects
#[repr(C)]
pub struct KMutex {
    state: AtomicU32,
    lock: SimpleLock,
}

impl core::fmt::Debug for KMutex {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("KMutex")
            .field("state", &self.state())
            .finish()
    }
}

impl KMutex {
    pub const fn new() -> Self {
        Self {
            state: AtomicU32::new(KMUTEX_AVAIL),
            lock: SimpleLock::new(),
        }
    }

    /// Reset to `Available` with a fresh interlock
    pub fn init(&self) {
        atomic::store(&self.state, KMUTEX_AVAIL, MemOrder::Release);
        self.lock.init();
    }

    /// Current state (racy; for diagnostics and tests)
    pub fn state(&self) -> KmutexState {
        KmutexState::from_raw(self.state.load(Ordering::Relaxed))
    }

    /// Wait channel sleepers on this mutex use
    pub fn event(&self) -> WaitEvent {
        event_from_addr(self)
    }

    /// Acquire the mutex, sleeping if it is held.
    ///
    /// The caller must not hold any simple lock. With `interruptible`, an
    /// interruption of the sleep returns [`KernError::Interrupted`] and the
    /// caller does not own the mutex.
    pub fn lock<S: Scheduler + ?Sized>(&self, sched: &S, interruptible: bool) -> Result<(), KernError> {
        sched.check_simple_locks();

        if atomic::atomic_cas_acq(&self.state, KMUTEX_AVAIL, KMUTEX_LOCKED) {
            counter!(C_KMUTEX_FAST_LOCK);
            return Ok(());
        }

        counter!(C_KMUTEX_SLOW_LOCK);
        self.lock.lock();

        if atomic::atomic_swap_acq(&self.state, KMUTEX_CONTENDED) == KMUTEX_AVAIL {
            // Released between the failed CAS and the swap.
            self.lock.unlock();
            return Ok(());
        }

        log::trace!("kmutex {:#x}: contended, sleeping", self.event());
        counter!(C_KMUTEX_BLOCK);
        match sched.thread_sleep(self.event(), &self.lock, interruptible) {
            WaitResult::Interrupted => {
                counter!(C_KMUTEX_INTERRUPTED);
                Err(KernError::Interrupted)
            }
            // Woken by unlock: ownership was handed to us.
            _ => Ok(()),
        }
    }

    /// Acquire the mutex only if it is available right now
    pub fn try_lock(&self) -> bool {
        atomic::atomic_cas_acq(&self.state, KMUTEX_AVAIL, KMUTEX_LOCKED)
    }

    /// Release the mutex, passing it to one sleeper if any
    pub fn unlock<S: Scheduler + ?Sized>(&self, sched: &S) {
        if atomic::atomic_cas_rel(&self.state, KMUTEX_LOCKED, KMUTEX_AVAIL) {
            return;
        }

        self.lock.lock();
        if sched.thread_wakeup_one(self.event()) {
            counter!(C_KMUTEX_HANDOFF);
            log::trace!("kmutex {:#x}: handed off", self.event());
        } else {
            // Every waiter was interrupted and left.
            atomic::store(&self.state, KMUTEX_AVAIL, MemOrder::Release);
            log::trace!("kmutex {:#x}: no waiters, reset", self.event());
        }
        self.lock.unlock();
    }
}

impl Default for KMutex {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Mutex-protected data
// ============================================================================

/// Data protected by a [`KMutex`]
pub struct KMutexCell<T> {
    mutex: KMutex,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for KMutexCell<T> {}
unsafe impl<T: Send> Sync for KMutexCell<T> {}

impl<T> KMutexCell<T> {
    pub const fn new(data: T) -> Self {
        Self {
            mutex: KMutex::new(),
            data: UnsafeCell::new(data),
        }
    }

    pub fn mutex(&self) -> &KMutex {
        &self.mutex
    }

    /// Lock and return a guard that unlocks on drop
    pub fn lock<'a, S: Scheduler + ?Sized>(
        &'a self,
        sched: &'a S,
        interruptible: bool,
    ) -> Result<KMutexGuard<'a, T, S>, KernError> {
        self.mutex.lock(sched, interruptible)?;
        Ok(KMutexGuard { cell: self, sched })
    }

    pub fn try_lock<'a, S: Scheduler + ?Sized>(&'a self, sched: &'a S) -> Option<KMutexGuard<'a, T, S>> {
        if self.mutex.try_lock() {
            Some(KMutexGuard { cell: self, sched })
        } else {
            None
        }
    }

    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

/// RAII guard for a [`KMutexCell`]
pub struct KMutexGuard<'a, T, S: Scheduler + ?Sized> {
    cell: &'a KMutexCell<T>,
    sched: &'a S,
}

impl<T, S: Scheduler + ?Sized> Deref for KMutexGuard<'_, T, S> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.cell.data.get() }
    }
}

impl<T, S: Scheduler + ?Sized> DerefMut for KMutexGuard<'_, T, S> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.cell.data.get() }
    }
}

impl<T, S: Scheduler + ?Sized> Drop for KMutexGuard<'_, T, S> {
    fn drop(&mut self) {
        self.cell.mutex.unlock(self.sched);
    }
}

// ============================================================================
// Compatibility Functions
// ============================================================================

pub fn kmutex_init(mtx: &KMutex) {
    mtx.init();
}

pub fn kmutex_lock<S: Scheduler + ?Sized>(
    mtx: &KMutex,
    sched: &S,
    interruptible: bool,
) -> Result<(), KernError> {
    mtx.lock(sched, interruptible)
}

pub fn kmutex_trylock(mtx: &KMutex) -> bool {
    mtx.try_lock()
}

pub fn kmutex_unlock<S: Scheduler + ?Sized>(mtx: &KMutex, sched: &S) {
    mtx.unlock(sched);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kern::sched_prim::WaitQueueScheduler;
    use alloc::sync::Arc;
    use alloc::vec::Vec;
    use std::thread;

    /// Scheduler that must never be asked to sleep or wake
    struct NoSleep;

    impl Scheduler for NoSleep {
        fn thread_sleep(&self, _: WaitEvent, _: &SimpleLock, _: bool) -> WaitResult {
            panic!("fast path slept");
        }

        fn thread_wakeup_prim(&self, _: WaitEvent, _: bool, _: WaitResult) -> usize {
            panic!("fast path woke");
        }
    }

    fn wait_for_sleepers(sched: &WaitQueueScheduler, mtx: &KMutex, n: usize) {
        while sched.waiter_count(mtx.event()) < n {
            thread::yield_now();
        }
    }

    #[test]
    fn test_fresh_lock_trylock_unlock() {
        let mtx = KMutex::new();
        assert_eq!(mtx.state(), KmutexState::Available);

        assert_eq!(kmutex_lock(&mtx, &NoSleep, false), Ok(()));
        assert_eq!(mtx.state(), KmutexState::Locked);

        assert!(!kmutex_trylock(&mtx));
        assert_eq!(mtx.state(), KmutexState::Locked);

        kmutex_unlock(&mtx, &NoSleep);
        assert_eq!(mtx.state(), KmutexState::Available);
    }

    #[test]
    fn test_lock_checks_simple_locks() {
        let sched = WaitQueueScheduler::new();
        let mtx = KMutex::new();
        mtx.lock(&sched, false).unwrap();
        mtx.unlock(&sched);
        assert_eq!(sched.lock_checks(), 1);
        assert_eq!(sched.sleeps(), 0);
    }

    #[test]
    fn test_init_resets() {
        let mtx = KMutex::new();
        assert!(mtx.try_lock());
        kmutex_init(&mtx);
        assert_eq!(mtx.state(), KmutexState::Available);
        assert!(mtx.try_lock());
    }

    #[test]
    fn test_handoff_keeps_contended() {
        let sched = Arc::new(WaitQueueScheduler::new());
        let mtx = Arc::new(KMutex::new());

        mtx.lock(&*sched, false).unwrap();

        let b = {
            let sched = Arc::clone(&sched);
            let mtx = Arc::clone(&mtx);
            thread::spawn(move || {
                mtx.lock(&*sched, false).unwrap();
                // Ownership arrived with the wakeup
                assert_eq!(mtx.state(), KmutexState::Contended);
            })
        };

        wait_for_sleepers(&sched, &mtx, 1);
        assert_eq!(mtx.state(), KmutexState::Contended);

        mtx.unlock(&*sched);
        b.join().unwrap();
        assert_eq!(mtx.state(), KmutexState::Contended);
        assert!(!mtx.try_lock());

        // B's owner role passed back to us; no waiters left, so reset
        mtx.unlock(&*sched);
        assert_eq!(mtx.state(), KmutexState::Available);
    }

    #[test]
    fn test_interrupted_waiter_does_not_acquire() {
        let sched = Arc::new(WaitQueueScheduler::new());
        let mtx = Arc::new(KMutex::new());

        mtx.lock(&*sched, false).unwrap();

        let b = {
            let sched = Arc::clone(&sched);
            let mtx = Arc::clone(&mtx);
            thread::spawn(move || mtx.lock(&*sched, true))
        };

        wait_for_sleepers(&sched, &mtx, 1);
        assert_eq!(sched.interrupt_event(mtx.event()), 1);
        assert_eq!(b.join().unwrap(), Err(KernError::Interrupted));

        // Interruption leaves the state alone
        assert_eq!(mtx.state(), KmutexState::Contended);

        // Nobody to wake: unlock recovers the mutex
        mtx.unlock(&*sched);
        assert_eq!(mtx.state(), KmutexState::Available);
        assert!(mtx.try_lock());
        mtx.unlock(&*sched);
    }

    #[test]
    fn test_uninterruptible_waiter_ignores_interrupt() {
        let sched = Arc::new(WaitQueueScheduler::new());
        let mtx = Arc::new(KMutex::new());

        mtx.lock(&*sched, false).unwrap();
        let b = {
            let sched = Arc::clone(&sched);
            let mtx = Arc::clone(&mtx);
            thread::spawn(move || {
                let r = mtx.lock(&*sched, false);
                mtx.unlock(&*sched);
                r
            })
        };

        wait_for_sleepers(&sched, &mtx, 1);
        assert_eq!(sched.interrupt_event(mtx.event()), 0);
        mtx.unlock(&*sched);
        assert_eq!(b.join().unwrap(), Ok(()));
        assert_eq!(mtx.state(), KmutexState::Available);
    }

    #[test]
    fn test_mutual_exclusion_under_contention() {
        const THREADS: usize = 6;
        const ITERS: usize = 500;

        let sched = Arc::new(WaitQueueScheduler::new());
        let cell = Arc::new(KMutexCell::new(0usize));

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let sched = Arc::clone(&sched);
                let cell = Arc::clone(&cell);
                thread::spawn(move || {
                    for _ in 0..ITERS {
                        let mut guard = cell.lock(&*sched, false).unwrap();
                        let v = *guard;
                        thread::yield_now();
                        *guard = v + 1;
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(*cell.lock(&*sched, false).unwrap(), THREADS * ITERS);
        assert_eq!(cell.mutex().state(), KmutexState::Available);
    }

    #[test]
    fn test_try_lock_guard() {
        let sched = WaitQueueScheduler::new();
        let cell = KMutexCell::new(5u32);
        {
            let mut g = cell.try_lock(&sched).unwrap();
            *g += 1;
            assert!(cell.try_lock(&sched).is_none());
        }
        assert_eq!(cell.into_inner(), 6);
    }
}
