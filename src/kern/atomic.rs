//! Atomic Primitives
//!
//! Based on Mach kern/atomic.h
//!
//! Thin wrappers over compare-and-swap and exchange with an explicit
//! memory-ordering strength. These are the only operations the lock-free
//! paths of [`crate::kern::kmutex`] and [`crate::kern::gsync`] use to move
//! state words around.
//!
//! A failed compare-and-swap always performs a relaxed load: the caller
//! learns the observed value but no ordering is established.

use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};

/// Ordering strength for an atomic operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemOrder {
    /// Later accesses cannot move before a successful operation
    Acquire,
    /// Earlier writes are visible to anyone who later acquires
    Release,
    /// Single total order across all threads
    SeqCst,
}

impl MemOrder {
    /// Ordering for a read-modify-write that succeeds
    #[inline]
    pub const fn rmw(self) -> Ordering {
        match self {
            MemOrder::Acquire => Ordering::Acquire,
            MemOrder::Release => Ordering::Release,
            MemOrder::SeqCst => Ordering::SeqCst,
        }
    }

    /// Ordering for a plain load (release degrades to relaxed)
    #[inline]
    pub const fn load(self) -> Ordering {
        match self {
            MemOrder::Acquire => Ordering::Acquire,
            MemOrder::Release => Ordering::Relaxed,
            MemOrder::SeqCst => Ordering::SeqCst,
        }
    }

    /// Ordering for a plain store (acquire degrades to relaxed)
    #[inline]
    pub const fn store(self) -> Ordering {
        match self {
            MemOrder::Acquire => Ordering::Relaxed,
            MemOrder::Release => Ordering::Release,
            MemOrder::SeqCst => Ordering::SeqCst,
        }
    }
}

/// A machine word that supports the primitive operations
pub trait AtomicWord {
    type Value: Copy + PartialEq;

    fn cas(&self, expected: Self::Value, new: Self::Value, order: MemOrder)
        -> Result<Self::Value, Self::Value>;
    fn xchg(&self, new: Self::Value, order: MemOrder) -> Self::Value;
    fn read(&self, order: MemOrder) -> Self::Value;
    fn write(&self, value: Self::Value, order: MemOrder);
}

macro_rules! atomic_word {
    ($atomic:ty, $value:ty) => {
        impl AtomicWord for $atomic {
            type Value = $value;

            #[inline]
            fn cas(&self, expected: $value, new: $value, order: MemOrder) -> Result<$value, $value> {
                self.compare_exchange(expected, new, order.rmw(), Ordering::Relaxed)
            }

            #[inline]
            fn xchg(&self, new: $value, order: MemOrder) -> $value {
                self.swap(new, order.rmw())
            }

            #[inline]
            fn read(&self, order: MemOrder) -> $value {
                self.load(order.load())
            }

            #[inline]
            fn write(&self, value: $value, order: MemOrder) {
                self.store(value, order.store())
            }
        }
    };
}

atomic_word!(AtomicU32, u32);
atomic_word!(AtomicU64, u64);
atomic_word!(AtomicUsize, usize);
atomic_word!(AtomicBool, bool);

// ============================================================================
// Primitive operations
// ============================================================================

/// Store `new` if `*ptr == expected`; returns whether the store happened
#[inline]
pub fn compare_and_swap<A: AtomicWord>(
    ptr: &A,
    expected: A::Value,
    new: A::Value,
    order: MemOrder,
) -> bool {
    ptr.cas(expected, new, order).is_ok()
}

/// Like [`compare_and_swap`], but hands back the observed value on failure
#[inline]
pub fn compare_and_swap_observe<A: AtomicWord>(
    ptr: &A,
    expected: A::Value,
    new: A::Value,
    order: MemOrder,
) -> Result<A::Value, A::Value> {
    ptr.cas(expected, new, order)
}

/// Unconditionally store `new`, returning the previous contents
#[inline]
pub fn exchange<A: AtomicWord>(ptr: &A, new: A::Value, order: MemOrder) -> A::Value {
    ptr.xchg(new, order)
}

#[inline]
pub fn load<A: AtomicWord>(ptr: &A, order: MemOrder) -> A::Value {
    ptr.read(order)
}

#[inline]
pub fn store<A: AtomicWord>(ptr: &A, value: A::Value, order: MemOrder) {
    ptr.write(value, order)
}

// ============================================================================
// Mach shorthands
// ============================================================================

#[inline]
pub fn atomic_cas_acq<A: AtomicWord>(ptr: &A, expected: A::Value, new: A::Value) -> bool {
    compare_and_swap(ptr, expected, new, MemOrder::Acquire)
}

#[inline]
pub fn atomic_cas_rel<A: AtomicWord>(ptr: &A, expected: A::Value, new: A::Value) -> bool {
    compare_and_swap(ptr, expected, new, MemOrder::Release)
}

#[inline]
pub fn atomic_cas_seq<A: AtomicWord>(ptr: &A, expected: A::Value, new: A::Value) -> bool {
    compare_and_swap(ptr, expected, new, MemOrder::SeqCst)
}

#[inline]
pub fn atomic_swap_acq<A: AtomicWord>(ptr: &A, new: A::Value) -> A::Value {
    exchange(ptr, new, MemOrder::Acquire)
}

#[inline]
pub fn atomic_swap_rel<A: AtomicWord>(ptr: &A, new: A::Value) -> A::Value {
    exchange(ptr, new, MemOrder::Release)
}

#[inline]
pub fn atomic_swap_seq<A: AtomicWord>(ptr: &A, new: A::Value) -> A::Value {
    exchange(ptr, new, MemOrder::SeqCst)
}
