//! Common types used across the kernel
//!
//! This module defines shared identifiers to avoid circular dependencies.

use core::sync::atomic::{AtomicU64, Ordering};

/// Identity of one blocked wait (a thread parked on an event)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct WaiterId(pub u64);

impl WaiterId {
    /// Create a new waiter ID with a unique auto-incremented value
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        WaiterId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Device identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct DeviceId(pub u32);

impl DeviceId {
    pub const NULL: Self = Self(0);
}

/// I/O request identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct IoReqId(pub u64);

impl IoReqId {
    /// Allocate a fresh request ID
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        IoReqId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}
