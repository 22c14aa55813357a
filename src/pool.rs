use std::fmt;
use std::ptr::NonNull;

use log::trace;

use crate::error::{AllocError, AllocResult};
use crate::region::Region;
use crate::utils::check_request;
use crate::{Address, Allocator};

/// Fixed-block allocator over a single region.
///
/// The region is carved into `block_count` blocks of `block_size` bytes, the
/// minimum allocation granularity. Occupancy lives in a side bitmask, one
/// bit per block, never inside the region itself:
///
/// ```text
/// region:    +------+------+------+------+------+------+
///            | blk0 | blk1 | blk2 | blk3 | blk4 | blk5 |
///            +------+------+------+------+------+------+
/// occupancy:    1      1      1      0      0      1
/// ```
///
/// An allocation of `size` bytes occupies `ceil(size / block_size)`
/// contiguous blocks; a set bit means the block is the start of, or part of,
/// a live allocation's span. Requests are served first-fit from the lowest
/// free run that is long enough.
///
/// Block addresses are only ever multiples of `block_size` from the region
/// base, so the pool cannot reposition within a block to satisfy an
/// alignment: pick a `block_size` that is a multiple of every alignment you
/// intend to request, or [`allocate`](Allocator::allocate) will report
/// [`AllocError::AlignmentUnsatisfiable`].
pub struct PoolAllocator {
    /// The backing buffer of `block_size * block_count` bytes.
    region: Region,
    /// Size of each block in bytes, the minimum allocation granularity.
    block_size: usize,
    /// Number of blocks in the region.
    block_count: usize,
    /// One bit per block, `ceil(block_count / 8)` bytes, all-free at start.
    occupancy: Box<[u8]>,
}

impl PoolAllocator {
    /// Reserves a `block_size * block_count` byte region and an all-free
    /// occupancy bitmask.
    pub fn new(block_size: usize, block_count: usize) -> AllocResult<Self> {
        if block_size == 0 {
            return Err(AllocError::InvalidArgument("block size must be non-zero"));
        }
        if block_count == 0 {
            return Err(AllocError::InvalidArgument("block count must be non-zero"));
        }

        let capacity = block_size
            .checked_mul(block_count)
            .ok_or(AllocError::InvalidArgument("pool capacity overflows"))?;

        let region = Region::reserve(capacity)?;
        let occupancy = vec![0u8; block_count.div_ceil(8)].into_boxed_slice();

        Ok(Self {
            region,
            block_size,
            block_count,
            occupancy,
        })
    }

    /// Size of each block in bytes.
    #[inline]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Number of blocks in the pool.
    #[inline]
    pub fn block_count(&self) -> usize {
        self.block_count
    }

    /// Number of blocks currently marked used.
    pub fn used_blocks(&self) -> usize {
        (0..self.block_count)
            .filter(|&block| self.is_block_used(block))
            .count()
    }

    /// Materializes an [`Address`] issued by this instance into a pointer
    /// into the region.
    ///
    /// The pointer is valid until the allocator is dropped.
    #[inline]
    pub fn ptr(&self, address: Address) -> NonNull<u8> {
        debug_assert!(address.offset() < self.region.len());

        // SAFETY: base is non-null and offsets issued by this instance lie
        // within the region, so the sum cannot wrap.
        unsafe { NonNull::new_unchecked(self.region.base().as_ptr().add(address.offset())) }
    }

    /// How many blocks a `size` byte request spans.
    #[inline]
    fn blocks_for(&self, size: usize) -> usize {
        size.div_ceil(self.block_size)
    }

    fn is_block_used(&self, block: usize) -> bool {
        self.occupancy[block / 8] & (1 << (block % 8)) != 0
    }

    fn set_block_used(&mut self, block: usize) {
        self.occupancy[block / 8] |= 1 << (block % 8);
    }

    fn set_block_free(&mut self, block: usize) {
        self.occupancy[block / 8] &= !(1 << (block % 8));
    }

    /// First block at or after `from` whose bit is clear.
    fn next_free_block(&self, from: usize) -> Option<usize> {
        (from..self.block_count).find(|&block| !self.is_block_used(block))
    }

    /// First block at or after `from` whose bit is set.
    fn next_used_block(&self, from: usize) -> Option<usize> {
        (from..self.block_count).find(|&block| self.is_block_used(block))
    }

    /// First-fit search for a free run of at least `blocks_needed` blocks.
    ///
    /// Each candidate run starts at the next free block and is bounded by
    /// the next *used* block (or the end of the pool); runs that are too
    /// short are skipped by resuming the scan past that boundary.
    fn find_run(&self, blocks_needed: usize) -> Option<usize> {
        let mut scan = 0;

        while let Some(start) = self.next_free_block(scan) {
            let boundary = self.next_used_block(start).unwrap_or(self.block_count);

            if boundary - start >= blocks_needed {
                return Some(start);
            }

            scan = boundary;
        }

        None
    }
}

impl Allocator for PoolAllocator {
    fn allocate(&mut self, size: usize, alignment: usize) -> AllocResult<Address> {
        check_request(size, alignment)?;

        let blocks_needed = self.blocks_for(size);

        let start = match self.find_run(blocks_needed) {
            Some(start) => start,
            None => {
                trace!("pool allocate refused: no free run of {blocks_needed} blocks");
                return Err(AllocError::OutOfSpace);
            }
        };

        let offset = start * self.block_size;
        if (self.region.base_addr() + offset) % alignment != 0 {
            trace!("pool allocate refused: block {start} misses alignment {alignment}");
            return Err(AllocError::AlignmentUnsatisfiable);
        }

        // All checks passed, commit the whole span.
        for block in start..start + blocks_needed {
            self.set_block_used(block);
        }

        trace!("pool allocate: {size} bytes in {blocks_needed} block(s) from block {start}");

        Ok(Address::new(offset))
    }

    /// Clears the span's occupancy bits.
    ///
    /// The `(address, size)` pair is caller-trusted: the pool does not check
    /// that the blocks were actually marked used. A span that lies outside
    /// the pool panics on the bitmask bounds rather than corrupting
    /// neighboring state.
    fn free(&mut self, address: Address, size: usize) {
        let start = address.offset() / self.block_size;
        let blocks_used = self.blocks_for(size);

        for block in start..start + blocks_used {
            self.set_block_free(block);
        }

        trace!("pool free: {blocks_used} block(s) from block {start}");
    }

    fn resize(
        &mut self,
        address: Address,
        old_size: usize,
        new_size: usize,
    ) -> AllocResult<Address> {
        if new_size == 0 {
            return Err(AllocError::InvalidArgument("size must be non-zero"));
        }

        let start = address.offset() / self.block_size;
        let old_blocks = self.blocks_for(old_size);
        let new_blocks = self.blocks_for(new_size);

        if new_blocks > old_blocks {
            let span_end = start + old_blocks;
            let wanted_end = start + new_blocks;

            if wanted_end > self.block_count {
                return Err(AllocError::OutOfSpace);
            }

            // All-or-nothing: check every trailing neighbor before touching
            // any bit.
            if (span_end..wanted_end).any(|block| self.is_block_used(block)) {
                trace!("pool resize refused: neighbor of block {start} is in use");
                return Err(AllocError::Blocked);
            }

            for block in span_end..wanted_end {
                self.set_block_used(block);
            }

            trace!(
                "pool resize: grew block {start} span from {old_blocks} to {new_blocks} block(s)"
            );
        } else if new_blocks < old_blocks {
            // Shrinking releases exactly the surplus trailing blocks.
            for block in start + new_blocks..start + old_blocks {
                self.set_block_free(block);
            }

            trace!(
                "pool resize: shrank block {start} span from {old_blocks} to {new_blocks} block(s)"
            );
        }

        Ok(address)
    }
}

/// Renders occupancy one marker per block: `#` used, `_` free.
impl fmt::Display for PoolAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for block in 0..self.block_count {
            let marker = if self.is_block_used(block) { '#' } else { '_' };
            write!(f, "{marker}")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequential_requests_fill_the_lowest_blocks() {
        let mut pool = PoolAllocator::new(32, 8).unwrap();

        // A 20 byte request still fits one 32 byte block.
        let a = pool.allocate(1, 1).unwrap();
        let b = pool.allocate(20, 4).unwrap();
        let c = pool.allocate(1, 1).unwrap();
        let d = pool.allocate(1, 1).unwrap();

        assert_eq!([0, 32, 64, 96], [a.offset(), b.offset(), c.offset(), d.offset()]);
        assert_eq!("####____", pool.to_string());
        assert_eq!(4, pool.used_blocks());
    }

    #[test]
    fn spanning_requests_mark_every_block_of_the_span() {
        let mut pool = PoolAllocator::new(16, 8).unwrap();

        let span = pool.allocate(40, 1).unwrap();

        assert_eq!(0, span.offset());
        assert_eq!("###_____", pool.to_string());
    }

    #[test]
    fn allocate_then_free_restores_occupancy_exactly() {
        let mut pool = PoolAllocator::new(16, 8).unwrap();

        pool.allocate(16, 1).unwrap();
        let before = pool.to_string();

        let span = pool.allocate(40, 1).unwrap();
        pool.free(span, 40);

        assert_eq!(before, pool.to_string());
    }

    #[test]
    fn freed_blocks_are_reused_first_fit() {
        let mut pool = PoolAllocator::new(16, 4).unwrap();

        let first = pool.allocate(16, 1).unwrap();
        let second = pool.allocate(16, 1).unwrap();

        pool.free(first, 16);

        // The hole at block 0 is the lowest fitting run.
        let reused = pool.allocate(16, 1).unwrap();
        assert_eq!(first, reused);

        pool.free(second, 16);
    }

    #[test]
    fn fragmented_pool_skips_short_runs() {
        let mut pool = PoolAllocator::new(16, 8).unwrap();

        // Occupy every other block: _#_#_#_# after the frees below.
        let spans: Vec<_> = (0..8).map(|_| pool.allocate(16, 1).unwrap()).collect();
        for span in spans.iter().step_by(2) {
            pool.free(*span, 16);
        }
        assert_eq!("_#_#_#_#", pool.to_string());

        // Single blocks still fit, two contiguous blocks never do.
        assert!(pool.allocate(16, 1).is_ok());
        assert_eq!(Err(AllocError::OutOfSpace), pool.allocate(32, 1));
    }

    #[test]
    fn exhaustion_commits_nothing() {
        let mut pool = PoolAllocator::new(16, 4).unwrap();

        pool.allocate(16, 1).unwrap();
        pool.allocate(32, 1).unwrap();
        let before = pool.to_string();
        assert_eq!("###_", before);

        // Longest free run is one block, so two blocks cannot be served.
        assert_eq!(Err(AllocError::OutOfSpace), pool.allocate(32, 1));
        assert_eq!(before, pool.to_string());
    }

    #[test]
    fn unsatisfiable_alignment_is_reported_without_commit() {
        let mut pool = PoolAllocator::new(1, 8).unwrap();

        pool.allocate(1, 1).unwrap();

        // The next free block sits one byte past the page-aligned base and
        // can never be realigned within a one-byte block.
        assert_eq!(
            Err(AllocError::AlignmentUnsatisfiable),
            pool.allocate(1, 2)
        );
        assert_eq!("#_______", pool.to_string());
    }

    #[test]
    fn grow_into_free_neighbors_keeps_the_address() {
        let mut pool = PoolAllocator::new(16, 4).unwrap();

        let span = pool.allocate(32, 1).unwrap();
        let resized = pool.resize(span, 32, 64).unwrap();

        assert_eq!(span, resized);
        assert_eq!("####", pool.to_string());
    }

    #[test]
    fn grow_into_a_used_neighbor_is_blocked_atomically() {
        let mut pool = PoolAllocator::new(16, 4).unwrap();

        let first = pool.allocate(16, 1).unwrap();
        pool.allocate(16, 1).unwrap();
        let before = pool.to_string();

        assert_eq!(Err(AllocError::Blocked), pool.resize(first, 16, 32));
        assert_eq!(before, pool.to_string());
    }

    #[test]
    fn grow_past_the_end_of_the_pool_is_out_of_space() {
        let mut pool = PoolAllocator::new(16, 4).unwrap();

        let span = pool.allocate(48, 1).unwrap();

        assert_eq!(Err(AllocError::OutOfSpace), pool.resize(span, 48, 80));
        assert_eq!("###_", pool.to_string());
    }

    #[test]
    fn shrink_releases_exactly_the_surplus_tail() {
        let mut pool = PoolAllocator::new(16, 4).unwrap();

        let span = pool.allocate(64, 1).unwrap();
        let resized = pool.resize(span, 64, 16).unwrap();

        assert_eq!(span, resized);
        assert_eq!("#___", pool.to_string());
    }

    #[test]
    fn same_block_count_resize_is_a_no_op() {
        let mut pool = PoolAllocator::new(32, 4).unwrap();

        let span = pool.allocate(20, 1).unwrap();
        let before = pool.to_string();

        // 20 and 30 bytes both round up to a single 32 byte block.
        let resized = pool.resize(span, 20, 30).unwrap();

        assert_eq!(span, resized);
        assert_eq!(before, pool.to_string());
    }

    #[test]
    fn scan_primitives_agree_with_the_bitmask() {
        let mut pool = PoolAllocator::new(16, 8).unwrap();

        pool.allocate(16, 1).unwrap();
        pool.allocate(16, 1).unwrap();
        let hole = pool.allocate(16, 1).unwrap();
        pool.allocate(16, 1).unwrap();
        pool.free(hole, 16);
        assert_eq!("##_#____", pool.to_string());

        assert_eq!(Some(2), pool.next_free_block(0));
        assert_eq!(Some(4), pool.next_free_block(3));
        assert_eq!(Some(0), pool.next_used_block(0));
        assert_eq!(Some(3), pool.next_used_block(2));
        assert_eq!(None, pool.next_used_block(4));
        assert_eq!(None, pool.next_free_block(8));
    }

    #[test]
    fn allocations_are_writable_through_ptr() {
        let mut pool = PoolAllocator::new(32, 4).unwrap();

        let addr = pool.allocate(4, 4).unwrap();
        let ptr = pool.ptr(addr).as_ptr();

        unsafe {
            ptr.cast::<u32>().write(0xCAFE_F00D);
            assert_eq!(0xCAFE_F00D, ptr.cast::<u32>().read());
        }
    }

    #[test]
    fn zero_geometry_is_rejected() {
        assert!(matches!(
            PoolAllocator::new(0, 8).map(|p| p.block_count()),
            Err(AllocError::InvalidArgument(_))
        ));
        assert!(matches!(
            PoolAllocator::new(8, 0).map(|p| p.block_count()),
            Err(AllocError::InvalidArgument(_))
        ));
        assert!(matches!(
            PoolAllocator::new(usize::MAX, 2).map(|p| p.block_count()),
            Err(AllocError::InvalidArgument(_))
        ));
    }
}
