use std::ptr::NonNull;

use log::debug;

use crate::error::{AllocError, AllocResult};

/// A contiguous byte buffer reserved directly from the operating system.
///
/// The `Region` is the single backing resource of an allocator instance: it
/// is acquired once at construction, owned exclusively by that instance for
/// its whole lifetime and returned to the kernel exactly once, on drop. If
/// construction of the owning allocator fails after the region has been
/// reserved, dropping the partially built state releases the buffer too, so
/// no exit path leaks it.
///
/// The buffer is opaque: the allocators only ever hand out offsets into it
/// and never store their own bookkeeping inside of it.
pub(crate) struct Region {
    /// Start of the buffer as returned by the kernel.
    start: NonNull<u8>,
    /// Size of the buffer in bytes.
    len: usize,
}

/// This trait provides an abstraction to handle low level memory requests
/// and syscalls, since the allocators themselves have nothing to do with the
/// concrete APIs offered by each kernel.
trait PlatformMemory {
    /// Requests a memory region of size `len` from the kernel. Returns a
    /// pointer to it, or `None` if the underlying syscall fails.
    unsafe fn request_memory(len: usize) -> Option<NonNull<u8>>;

    /// Returns the memory of size `len` starting at `addr` back to the kernel.
    unsafe fn return_memory(addr: *mut u8, len: usize);
}

impl Region {
    /// Reserves a fresh `len` byte region.
    ///
    /// A refusal by the operating system is reported as
    /// [`AllocError::OutOfMemory`] rather than a crash.
    pub(crate) fn reserve(len: usize) -> AllocResult<Self> {
        if len == 0 {
            return Err(AllocError::InvalidArgument(
                "region capacity must be non-zero",
            ));
        }

        // SAFETY: `len` is non-zero and the result is checked before use.
        let start = unsafe { Self::request_memory(len) }.ok_or(AllocError::OutOfMemory)?;

        debug!("reserved {len} byte region at {start:p}");

        Ok(Self { start, len })
    }

    /// Pointer to the first byte of the region.
    #[inline]
    pub(crate) fn base(&self) -> NonNull<u8> {
        self.start
    }

    /// Start of the region as a plain integer, for alignment arithmetic.
    #[inline]
    pub(crate) fn base_addr(&self) -> usize {
        self.start.as_ptr() as usize
    }

    /// Size of the region in bytes.
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.len
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        // SAFETY: `start` and `len` are exactly what `request_memory` handed
        // out, and drop runs at most once.
        unsafe { Self::return_memory(self.start.as_ptr(), self.len) }
    }
}

#[cfg(unix)]
mod unix {
    use std::os::raw::{c_int, c_void};
    use std::ptr::NonNull;

    use libc::{mmap, munmap, off_t, size_t};

    use super::{PlatformMemory, Region};

    impl PlatformMemory for Region {
        unsafe fn request_memory(len: usize) -> Option<NonNull<u8>> {
            // mmap parameters.
            const ADDR: *mut c_void = std::ptr::null_mut::<c_void>();
            // Read-Write only memory.
            const PROT: c_int = libc::PROT_READ | libc::PROT_WRITE;
            const FLAGS: c_int = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
            const FD: c_int = -1;
            const OFFSET: off_t = 0;

            unsafe {
                let addr = mmap(ADDR, len as size_t, PROT, FLAGS, FD, OFFSET);

                match addr {
                    libc::MAP_FAILED => None,
                    addr => Some(NonNull::new_unchecked(addr).cast::<u8>()),
                }
            }
        }

        unsafe fn return_memory(addr: *mut u8, len: usize) {
            unsafe {
                munmap(addr as *mut c_void, len as size_t);
            }
        }
    }
}

#[cfg(windows)]
mod windows {
    use std::os::raw::c_void;
    use std::ptr::NonNull;

    use windows::Win32::System::Memory;

    use super::{PlatformMemory, Region};

    impl PlatformMemory for Region {
        unsafe fn request_memory(len: usize) -> Option<NonNull<u8>> {
            // Read-Write only.
            let protection = Memory::PAGE_READWRITE;

            let flags = Memory::MEM_RESERVE | Memory::MEM_COMMIT;

            unsafe {
                let addr = Memory::VirtualAlloc(None, len, flags, protection);

                NonNull::new(addr.cast())
            }
        }

        unsafe fn return_memory(addr: *mut u8, _len: usize) {
            unsafe {
                let _ = Memory::VirtualFree(addr as *mut c_void, 0, Memory::MEM_RELEASE);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_and_release() {
        let region = Region::reserve(4096).unwrap();

        assert_eq!(4096, region.len());
        assert_eq!(region.base_addr(), region.base().as_ptr() as usize);

        // The buffer must actually be ours to read and write.
        unsafe {
            region.base().as_ptr().write(0xAB);
            assert_eq!(0xAB, region.base().as_ptr().read());
        }
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert_eq!(
            Err(AllocError::InvalidArgument(
                "region capacity must be non-zero"
            )),
            Region::reserve(0).map(|r| r.len())
        );
    }

    #[test]
    fn small_regions_are_usable_end_to_end() {
        let region = Region::reserve(100).unwrap();

        unsafe {
            for i in 0..100 {
                region.base().as_ptr().add(i).write(i as u8);
            }
            assert_eq!(99, region.base().as_ptr().add(99).read());
        }
    }
}
