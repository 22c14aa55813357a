use std::ptr::NonNull;

use log::trace;

use crate::error::{AllocError, AllocResult};
use crate::region::Region;
use crate::utils::{check_request, padding_for};
use crate::{Address, Allocator};

/// Bump-pointer allocator over a single region.
///
/// Allocation advances a cursor; that is all. Whatever padding a request
/// needs to reach its alignment becomes part of the gap in front of it and
/// is never reclaimed independently:
///
/// ```text
/// +-------------+---------+-----+-------------+------------------+
/// | allocation  | padding | ... | allocation  |      free        |
/// +-------------+---------+-----+-------------+------------------+
///                                             ^ cursor
/// ```
///
/// Individual [`free`](Allocator::free) is a no-op by design: bump
/// allocators are built for bulk, scope-based reclaim, which [`reset`]
/// provides. Only the most recently allocated span can be resized in place,
/// since anything allocated after it would be overrun.
///
/// [`reset`]: LinearAllocator::reset
pub struct LinearAllocator {
    /// The backing buffer, owned exclusively by this instance.
    region: Region,
    /// Offset of the first free byte. Invariant: `cursor <= capacity`.
    /// Only moves forward, except through `resize` on the trailing span
    /// and through `reset`.
    cursor: usize,
}

impl LinearAllocator {
    /// Reserves a `capacity` byte region and places the cursor at its start.
    pub fn new(capacity: usize) -> AllocResult<Self> {
        let region = Region::reserve(capacity)?;

        Ok(Self { region, cursor: 0 })
    }

    /// Total capacity of the region in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.region.len()
    }

    /// Bytes consumed so far, alignment padding included.
    #[inline]
    pub fn used(&self) -> usize {
        self.cursor
    }

    /// Bytes still available at the end of the region.
    #[inline]
    pub fn available(&self) -> usize {
        self.capacity() - self.cursor
    }

    /// Rewinds the cursor to the start of the region, reclaiming everything
    /// at once.
    ///
    /// Every [`Address`] issued before the reset becomes invalid; the caller
    /// is responsible for not materializing or recycling them afterwards.
    pub fn reset(&mut self) {
        trace!("linear reset: reclaiming {} bytes", self.cursor);
        self.cursor = 0;
    }

    /// Materializes an [`Address`] issued by this instance into a pointer
    /// into the region.
    ///
    /// The pointer is valid until the allocator is reset or dropped.
    #[inline]
    pub fn ptr(&self, address: Address) -> NonNull<u8> {
        debug_assert!(address.offset() < self.capacity());

        // SAFETY: base is non-null and offsets issued by this instance lie
        // within the region, so the sum cannot wrap.
        unsafe { NonNull::new_unchecked(self.region.base().as_ptr().add(address.offset())) }
    }
}

impl Allocator for LinearAllocator {
    fn allocate(&mut self, size: usize, alignment: usize) -> AllocResult<Address> {
        check_request(size, alignment)?;

        // Pad the current address up to the requested alignment. The padding
        // is only committed together with the allocation itself, so a failed
        // call leaves the cursor exactly where it was.
        let padding = padding_for(self.region.base_addr() + self.cursor, alignment);

        let offset = match self.cursor.checked_add(padding) {
            Some(offset) => offset,
            None => return Err(AllocError::OutOfSpace),
        };

        let end = match offset.checked_add(size) {
            Some(end) => end,
            None => return Err(AllocError::OutOfSpace),
        };

        if end > self.capacity() {
            trace!(
                "linear allocate refused: {size} bytes at offset {offset} exceeds capacity {}",
                self.capacity()
            );
            return Err(AllocError::OutOfSpace);
        }

        self.cursor = end;
        trace!("linear allocate: {size} bytes at offset {offset} ({padding} bytes padding)");

        Ok(Address::new(offset))
    }

    /// Always a no-op: the linear strategy never reclaims individual spans.
    fn free(&mut self, _address: Address, _size: usize) {}

    fn resize(
        &mut self,
        address: Address,
        old_size: usize,
        new_size: usize,
    ) -> AllocResult<Address> {
        if new_size == 0 {
            return Err(AllocError::InvalidArgument("size must be non-zero"));
        }

        // In-place resize only works on the trailing span: nothing may have
        // been allocated after it.
        let is_last = address
            .offset()
            .checked_add(old_size)
            .is_some_and(|end| end == self.cursor);

        if !is_last {
            trace!(
                "linear resize refused: offset {} is not the trailing allocation",
                address.offset()
            );
            return Err(AllocError::NotLastAllocation);
        }

        let end = match address.offset().checked_add(new_size) {
            Some(end) => end,
            None => return Err(AllocError::OutOfSpace),
        };

        if end > self.capacity() {
            return Err(AllocError::OutOfSpace);
        }

        trace!(
            "linear resize: offset {} from {old_size} to {new_size} bytes",
            address.offset()
        );
        self.cursor = end;

        Ok(address)
    }
}
