use kernel_info::errno::{EFAULT, EINVAL, ENOMEM, Errno};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage};

/// Source of physically contiguous runs of 4 KiB frames.
///
/// Every caller shares one allocator, so the methods take `&self`; the
/// implementation serializes internally. Returned runs are page aligned.
pub trait FrameAlloc {
    /// Allocate `count` physically contiguous frames and return the first.
    ///
    /// # Errors
    /// [`FrameAllocError::InvalidCount`] for `count == 0`,
    /// [`FrameAllocError::OutOfMemory`] if no run of that length is free.
    fn alloc_frames(&self, count: usize) -> Result<PhysicalPage, FrameAllocError>;

    /// Release the run that starts at `first`.
    ///
    /// # Errors
    /// Rejects frames that are not the start of an allocated run and frames
    /// the allocator does not manage. Nothing is released in that case.
    fn free_frames(&self, first: PhysicalPage) -> Result<(), FrameAllocError>;

    /// Convenience for a single frame.
    ///
    /// # Errors
    /// As for [`alloc_frames`](Self::alloc_frames).
    #[inline]
    fn alloc_frame(&self) -> Result<PhysicalPage, FrameAllocError> {
        self.alloc_frames(1)
    }
}

impl<A: FrameAlloc + ?Sized> FrameAlloc for &A {
    #[inline]
    fn alloc_frames(&self, count: usize) -> Result<PhysicalPage, FrameAllocError> {
        (**self).alloc_frames(count)
    }

    #[inline]
    fn free_frames(&self, first: PhysicalPage) -> Result<(), FrameAllocError> {
        (**self).free_frames(first)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameAllocError {
    #[error("frame count must be at least one")]
    InvalidCount,
    #[error("out of memory: no run of {requested} free frames")]
    OutOfMemory { requested: usize },
    #[error("frame {frame} is at position {position} of its run, not its start")]
    NotRunStart { frame: usize, position: u16 },
    #[error("frame {frame} is not allocated")]
    NotAllocated { frame: usize },
    #[error("address {0} is outside the managed frame range")]
    Unmanaged(PhysicalAddress),
    #[error("no usable memory left for the frame table")]
    NoUsableMemory,
}

impl FrameAllocError {
    /// Errno reported to user space.
    #[must_use]
    pub const fn errno(&self) -> Errno {
        match self {
            Self::OutOfMemory { .. } | Self::NoUsableMemory => ENOMEM,
            Self::InvalidCount => EINVAL,
            Self::NotRunStart { .. } | Self::NotAllocated { .. } | Self::Unmanaged(_) => EFAULT,
        }
    }
}
