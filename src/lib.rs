//! A pair of low-level region allocators exposing a common
//! allocate/free/resize contract over a single pre-reserved buffer.
//!
//! Both strategies serve requests out of one fixed-capacity region
//! reserved from the operating system at construction time:
//!
//! ```text
//! LinearAllocator                          PoolAllocator
//!
//! +--------------------------+            +------+------+------+------+
//! | used      |   free       |            | blk0 | blk1 | blk2 | blk3 |
//! +--------------------------+            +------+------+------+------+
//!             ^ cursor                    occupancy bitmask:  1 1 0 0
//! ```
//!
//! - [`LinearAllocator`] bumps a cursor forward on every request. Individual
//!   `free` is a no-op; reclaim is bulk and scope-based via
//!   [`LinearAllocator::reset`].
//! - [`PoolAllocator`] carves the region into fixed-size blocks and tracks
//!   them with a one-bit-per-block occupancy mask held outside the region.
//!
//! Callers hold some [`Allocator`] (concretely or as `&mut dyn Allocator`)
//! and never need to know which strategy backs it.
//!
//! # The caller-trusted contract
//!
//! The allocators keep no record mapping addresses back to sizes. The
//! [`Address`] a caller retains, together with the originally requested size,
//! *is* the allocation handle, and the caller must hand the same pair back on
//! `free` and `resize`. Passing a span that was never allocated here is a
//! precondition violation: the strategies differ in how loudly they react,
//! but none of them can detect it in general. This is a deliberate
//! trade-off that keeps both strategies metadata-free.
//!
//! # Single-owner, non-reentrant
//!
//! Nothing here is synchronized. An allocator instance must be owned and
//! driven by one caller at a time; if concurrent use is wanted, wrap the
//! whole thing in a mutex or give each thread its own instance.

mod error;
mod linear;
mod pool;
mod region;
mod utils;

pub use error::{AllocError, AllocResult};
pub use linear::LinearAllocator;
pub use pool::PoolAllocator;

/// Opaque handle to an allocated span: the base-relative byte offset of its
/// first byte.
///
/// Handles are plain offsets rather than raw pointers, so they stay
/// meaningful (and harmless) even after the region is gone. Materialize one
/// into a pointer with [`LinearAllocator::ptr`] or [`PoolAllocator::ptr`] on
/// the instance that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Address {
    offset: usize,
}

impl Address {
    pub(crate) fn new(offset: usize) -> Self {
        Self { offset }
    }

    /// Byte offset of the span from the start of the backing region.
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }
}

/// The contract every allocation strategy satisfies.
///
/// All three operations are bounded, synchronous computations over
/// in-process memory: O(1) for the linear strategy, O(block count) worst
/// case for the pool scan.
pub trait Allocator {
    /// Allocates `size` bytes whose address is a multiple of `alignment`.
    ///
    /// `alignment` must be a power of two and `size` non-zero; violations
    /// are reported as [`AllocError::InvalidArgument`]. When no space
    /// satisfies the request the strategy returns an error and mutates
    /// nothing; an allocation is never partially committed.
    fn allocate(&mut self, size: usize, alignment: usize) -> AllocResult<Address>;

    /// Releases a previously allocated span of exactly `size` bytes at
    /// `address`.
    ///
    /// The pair must correspond to a live allocation made by this instance
    /// (see the crate-level notes on the caller-trusted contract). The
    /// linear strategy documents this as a no-op.
    fn free(&mut self, address: Address, size: usize);

    /// Attempts to grow or shrink the span in place.
    ///
    /// On success the span keeps its address. A refusal is not fatal: the
    /// caller is expected to allocate fresh and copy, which the allocator
    /// never does on its own.
    fn resize(
        &mut self,
        address: Address,
        old_size: usize,
        new_size: usize,
    ) -> AllocResult<Address>;
}

#[cfg(test)]
mod tests {
    use super::*;

    // Drives an allocator through the contract without knowing the strategy,
    // the way real callers hold one.
    fn exercise(allocator: &mut dyn Allocator) {
        let first = allocator.allocate(16, 8).unwrap();
        let second = allocator.allocate(16, 8).unwrap();

        assert_ne!(first, second);

        let resized = allocator.resize(second, 16, 32).unwrap();
        assert_eq!(second, resized);

        allocator.free(resized, 32);
        allocator.free(first, 16);
    }

    #[test]
    fn both_strategies_satisfy_the_contract() {
        let mut linear = LinearAllocator::new(256).unwrap();
        exercise(&mut linear);

        let mut pool = PoolAllocator::new(16, 8).unwrap();
        exercise(&mut pool);
    }

    #[test]
    fn invalid_requests_are_reported_not_undefined() {
        let mut linear = LinearAllocator::new(64).unwrap();
        let mut pool = PoolAllocator::new(16, 4).unwrap();

        for allocator in [&mut linear as &mut dyn Allocator, &mut pool] {
            assert!(matches!(
                allocator.allocate(8, 3),
                Err(AllocError::InvalidArgument(_))
            ));
            assert!(matches!(
                allocator.allocate(0, 8),
                Err(AllocError::InvalidArgument(_))
            ));
        }
    }
}
