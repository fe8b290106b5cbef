//! Kernel Event Counters
//!
//! Based on Mach4 kern/counters.h/c by CMU (1987-1991)
//!
//! Kernel-wide counters tracking which paths the synchronization and
//! device primitives take. Cheap enough to leave on; useful when checking
//! that the uncontended paths really stay uncontended.

use core::sync::atomic::{AtomicU64, Ordering};

// ============================================================================
// Counter Type
// ============================================================================

/// Mach counter type (atomically updated)
#[derive(Debug)]
pub struct MachCounter {
    value: AtomicU64,
    name: &'static str,
}

impl MachCounter {
    pub const fn new(name: &'static str) -> Self {
        Self {
            value: AtomicU64::new(0),
            name,
        }
    }

    #[inline]
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn reset(&self) {
        self.value.store(0, Ordering::Relaxed);
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

// ============================================================================
// Kernel mutex counters
// ============================================================================

/// kmutex_lock satisfied by the fast path
pub static C_KMUTEX_FAST_LOCK: MachCounter = MachCounter::new("kmutex_fast_lock");
/// kmutex_lock that had to take the interlock
pub static C_KMUTEX_SLOW_LOCK: MachCounter = MachCounter::new("kmutex_slow_lock");
/// kmutex_lock that actually slept
pub static C_KMUTEX_BLOCK: MachCounter = MachCounter::new("kmutex_block");
/// kmutex_lock waits cut short by interruption
pub static C_KMUTEX_INTERRUPTED: MachCounter = MachCounter::new("kmutex_interrupted");
/// kmutex_unlock that passed ownership to a sleeper
pub static C_KMUTEX_HANDOFF: MachCounter = MachCounter::new("kmutex_handoff");

// ============================================================================
// Device counters
// ============================================================================

/// block_io requests left queued for asynchronous completion
pub static C_BLOCK_IO_QUEUED: MachCounter = MachCounter::new("block_io_queued");
/// block_io requests the caller waited for
pub static C_BLOCK_IO_SYNC: MachCounter = MachCounter::new("block_io_sync");
/// iowait calls that slept at least once
pub static C_IOWAIT_BLOCK: MachCounter = MachCounter::new("iowait_block");
/// io_done thread wakeups
pub static C_IO_DONE_THREAD_BLOCK: MachCounter = MachCounter::new("io_done_thread_block");

/// Whether counters are enabled
pub const MACH_COUNTERS_ENABLED: bool = true;

/// Increment counter (only if counters enabled)
#[macro_export]
macro_rules! counter {
    ($counter:expr) => {
        if $crate::kern::counters::MACH_COUNTERS_ENABLED {
            $counter.inc();
        }
    };
}

// ============================================================================
// Snapshot
// ============================================================================

/// All counter values at one instant
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub kmutex_fast_lock: u64,
    pub kmutex_slow_lock: u64,
    pub kmutex_block: u64,
    pub kmutex_interrupted: u64,
    pub kmutex_handoff: u64,
    pub block_io_queued: u64,
    pub block_io_sync: u64,
    pub iowait_block: u64,
    pub io_done_thread_block: u64,
}

impl CounterSnapshot {
    pub fn capture() -> Self {
        Self {
            kmutex_fast_lock: C_KMUTEX_FAST_LOCK.get(),
            kmutex_slow_lock: C_KMUTEX_SLOW_LOCK.get(),
            kmutex_block: C_KMUTEX_BLOCK.get(),
            kmutex_interrupted: C_KMUTEX_INTERRUPTED.get(),
            kmutex_handoff: C_KMUTEX_HANDOFF.get(),
            block_io_queued: C_BLOCK_IO_QUEUED.get(),
            block_io_sync: C_BLOCK_IO_SYNC.get(),
            iowait_block: C_IOWAIT_BLOCK.get(),
            io_done_thread_block: C_IO_DONE_THREAD_BLOCK.get(),
        }
    }
}

/// Reset all counters to zero
pub fn reset_all_counters() {
    C_KMUTEX_FAST_LOCK.reset();
    C_KMUTEX_SLOW_LOCK.reset();
    C_KMUTEX_BLOCK.reset();
    C_KMUTEX_INTERRUPTED.reset();
    C_KMUTEX_HANDOFF.reset();
    C_BLOCK_IO_QUEUED.reset();
    C_BLOCK_IO_SYNC.reset();
    C_IOWAIT_BLOCK.reset();
    C_IO_DONE_THREAD_BLOCK.reset();
}
