//! Kern subsystem - Core kernel synchronization
//!
//! Based on Mach kern/ directory.
//! Atomic primitives, simple locks, the wait/wakeup contract, and the
//! sleeping locks built from them.

pub mod atomic;
pub mod counters;
pub mod gsync;
pub mod kern_return;
pub mod kmutex;
pub mod lock;
pub mod sched_prim;

pub use atomic::MemOrder;
pub use counters::{CounterSnapshot, MachCounter};
pub use gsync::Gsync;
pub use kern_return::{KernError, KernReturn, KERN_SUCCESS};
pub use kmutex::{KMutex, KMutexCell, KMutexGuard, KmutexState};
pub use lock::{SimpleLock, SimpleLockGuard};
pub use sched_prim::{event_from_addr, Scheduler, WaitEvent, WaitQueueScheduler, WaitResult};
