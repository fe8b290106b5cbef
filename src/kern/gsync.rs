//! Global Synchronization
//!
//! Based on Mach kern/gsync.h
//!
//! Address-keyed wait and wake on a 32-bit word, the kernel half of
//! user-level locks: a thread sleeps only while the word still holds the
//! value it expects, and a waker may store a new value into the word as
//! part of the wakeup. The word's address is the wait channel.
//!
//! Each address hashes onto one of a fixed set of bucket interlocks. The
//! value check and the enqueue happen under the bucket lock, and a wake
//! that mutates the word takes the same lock, so a wake can never fall
//! between a waiter's check and its sleep.

use core::sync::atomic::AtomicU32;

use crate::kern::atomic::{self, MemOrder};
use crate::kern::kern_return::KernError;
use crate::kern::lock::SimpleLock;
use crate::kern::sched_prim::{event_from_addr, Scheduler, WaitEvent, WaitResult};

/// Number of bucket interlocks
pub const GSYNC_NBUCKETS: usize = 64;

/// Address-keyed wait/wake table
pub struct Gsync {
    buckets: [SimpleLock; GSYNC_NBUCKETS],
}

impl Gsync {
    pub const fn new() -> Self {
        Self {
            buckets: [const { SimpleLock::new() }; GSYNC_NBUCKETS],
        }
    }

    fn bucket_index(event: WaitEvent) -> usize {
        // Words are at least 4-byte aligned; drop the always-zero bits.
        (event >> 2) % GSYNC_NBUCKETS
    }

    fn bucket(&self, event: WaitEvent) -> &SimpleLock {
        &self.buckets[Self::bucket_index(event)]
    }

    /// Sleep on `word` as long as it holds `expected`.
    ///
    /// Returns [`KernError::NotWaiting`] without sleeping if the word
    /// already changed, [`KernError::Interrupted`] if an interruptible
    /// sleep was cut short.
    pub fn wait<S: Scheduler + ?Sized>(
        &self,
        sched: &S,
        word: &AtomicU32,
        expected: u32,
        interruptible: bool,
    ) -> Result<(), KernError> {
        sched.check_simple_locks();

        let event = event_from_addr(word);
        let lock = self.bucket(event);
        lock.lock();

        if atomic::load(word, MemOrder::Acquire) != expected {
            lock.unlock();
            return Err(KernError::NotWaiting);
        }

        match sched.thread_sleep(event, lock, interruptible) {
            WaitResult::Interrupted => Err(KernError::Interrupted),
            _ => Ok(()),
        }
    }

    /// Wake one (or all) sleepers on `word`, storing `mutate` first if given.
    ///
    /// Returns the number of threads woken.
    pub fn wake<S: Scheduler + ?Sized>(
        &self,
        sched: &S,
        word: &AtomicU32,
        wake_all: bool,
        mutate: Option<u32>,
    ) -> usize {
        let event = event_from_addr(word);
        let lock = self.bucket(event);
        lock.lock();

        if let Some(value) = mutate {
            atomic::store(word, value, MemOrder::Release);
        }
        let woken = sched.thread_wakeup_prim(event, !wake_all, WaitResult::Normal);

        lock.unlock();
        woken
    }

    /// Move the sleepers on `from` over to `to`, optionally waking one first.
    ///
    /// Returns the number of threads moved.
    pub fn requeue<S: Scheduler + ?Sized>(
        &self,
        sched: &S,
        from: &AtomicU32,
        to: &AtomicU32,
        wake_one: bool,
    ) -> usize {
        let src = event_from_addr(from);
        let dst = event_from_addr(to);
        if src == dst {
            return 0;
        }

        let (a, b) = (Self::bucket_index(src), Self::bucket_index(dst));
        let (first, second) = if a <= b { (a, b) } else { (b, a) };
        self.buckets[first].lock();
        if second != first {
            self.buckets[second].lock();
        }

        if wake_one {
            sched.thread_wakeup_prim(src, true, WaitResult::Normal);
        }
        let moved = sched.thread_requeue(src, dst, usize::MAX);

        if second != first {
            self.buckets[second].unlock();
        }
        self.buckets[first].unlock();
        moved
    }
}

impl Default for Gsync {
    fn default() -> Self {
        Self::new()
    }
}
