use thiserror::Error;

/// Result alias used by every fallible allocator operation.
pub type AllocResult<T> = Result<T, AllocError>;

/// Failure taxonomy of the allocators.
///
/// Every operation-level failure is reported through this enum as a plain
/// return value, never as a panic or abort. Only [`AllocError::OutOfMemory`]
/// is fatal, and only to the instance being constructed; everything else is
/// recoverable and the caller is expected to have a fallback path (typically
/// allocate-fresh-and-copy when a `resize` is refused).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
    /// The backing region could not be reserved from the operating system.
    /// Fatal to the allocator instance under construction.
    #[error("unable to reserve backing storage from the operating system")]
    OutOfMemory,

    /// No contiguous span of the region satisfies the request. The region
    /// itself is untouched, so the caller may retry with a smaller request
    /// or a different allocator.
    #[error("no contiguous space satisfies the request")]
    OutOfSpace,

    /// The pool's block geometry cannot honor the requested alignment. The
    /// pool cannot reposition within a block boundary, so the block size
    /// should itself be a multiple of every alignment the caller intends
    /// to request.
    #[error("block geometry cannot honor the requested alignment")]
    AlignmentUnsatisfiable,

    /// A linear `resize` targeted a span that is not the most recent
    /// allocation. Growing or shrinking a non-trailing span in place is
    /// structurally impossible for a bump allocator.
    #[error("only the most recent allocation can be resized in place")]
    NotLastAllocation,

    /// A pool `resize` tried to grow into a block that is already part of a
    /// live allocation. No occupancy bit was changed.
    #[error("a neighboring block is already in use")]
    Blocked,

    /// The request itself is malformed: zero size, non-power-of-two
    /// alignment, zero block geometry and the like.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
}
