//! Helper functions shared by both allocator strategies.
//! These don't particularly belong to any concrete module of the crate.

use crate::error::{AllocError, AllocResult};

/// Number of padding bytes needed to move `addr` up to the next multiple
/// of `alignment`. Returns zero when `addr` is already aligned.
///
/// `alignment` must be a power of two; callers validate that through
/// [`check_request`] before doing any arithmetic with it.
pub(crate) fn padding_for(addr: usize, alignment: usize) -> usize {
    (alignment - (addr % alignment)) % alignment
}

/// Validates the `(size, alignment)` pair every `allocate` call receives.
///
/// A non-power-of-two alignment would make the padding arithmetic silently
/// wrong, so it is rejected here instead of being left as a precondition.
pub(crate) fn check_request(size: usize, alignment: usize) -> AllocResult<()> {
    if size == 0 {
        return Err(AllocError::InvalidArgument("size must be non-zero"));
    }
    if !alignment.is_power_of_two() {
        return Err(AllocError::InvalidArgument(
            "alignment must be a power of two",
        ));
    }
    Ok(())
}
