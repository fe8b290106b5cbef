//! Simple Locks
//!
//! Based on Mach4 kern/lock.h/c by Avadis Tevanian, Jr. and Michael Wayne Young
//!
//! The simple lock is the interlock underneath every sleeping primitive in
//! this crate: it guards the short window in which a thread inspects a
//! state word and decides to enqueue itself on a wait channel. It must never
//! be held across a sleep; [`crate::kern::sched_prim::Scheduler::thread_sleep`]
//! releases it as part of entering the wait.

use core::sync::atomic::{AtomicBool, Ordering};

use crate::kern::atomic::{self, MemOrder};

/// A simple spin lock
///
/// Test-and-test-and-set: contenders spin on a relaxed load and only retry
/// the compare-and-swap once the lock looks free.
#[repr(C)]
pub struct SimpleLock {
    lock_data: AtomicBool,
}

impl core::fmt::Debug for SimpleLock {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SimpleLock")
            .field("locked", &self.is_locked())
            .finish()
    }
}

impl SimpleLock {
    /// Create a new unlocked simple lock
    pub const fn new() -> Self {
        Self {
            lock_data: AtomicBool::new(false),
        }
    }

    /// Reset the lock to the unlocked state
    pub fn init(&self) {
        atomic::store(&self.lock_data, false, MemOrder::Release);
    }

    /// Acquire the lock, spinning until available
    pub fn lock(&self) {
        while !atomic::atomic_cas_acq(&self.lock_data, false, true) {
            while self.lock_data.load(Ordering::Relaxed) {
                core::hint::spin_loop();
            }
        }
    }

    /// Release the lock
    pub fn unlock(&self) {
        atomic::store(&self.lock_data, false, MemOrder::Release);
    }

    /// Try to acquire the lock without spinning
    pub fn try_lock(&self) -> bool {
        atomic::atomic_cas_acq(&self.lock_data, false, true)
    }

    /// Check if the lock is held
    pub fn is_locked(&self) -> bool {
        self.lock_data.load(Ordering::Relaxed)
    }

    /// Acquire the lock and release it when the guard drops
    pub fn guard(&self) -> SimpleLockGuard<'_> {
        SimpleLockGuard::new(self)
    }
}

impl Default for SimpleLock {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard for a simple lock
pub struct SimpleLockGuard<'a> {
    lock: &'a SimpleLock,
}

impl<'a> SimpleLockGuard<'a> {
    pub fn new(lock: &'a SimpleLock) -> Self {
        lock.lock();
        Self { lock }
    }
}

impl Drop for SimpleLockGuard<'_> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}

// ============================================================================
// Compatibility Functions
// ============================================================================

pub fn simple_lock_init(lock: &SimpleLock) {
    lock.init();
}

pub fn simple_lock(lock: &SimpleLock) {
    lock.lock();
}

pub fn simple_unlock(lock: &SimpleLock) {
    lock.unlock();
}

pub fn simple_lock_try(lock: &SimpleLock) -> bool {
    lock.try_lock()
}

pub fn simple_lock_taken(lock: &SimpleLock) -> bool {
    lock.is_locked()
}
