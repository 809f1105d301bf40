//! Early boot allocator.
//!
//! Before the frame table exists the kernel carves pages off the bottom of
//! RAM with a monotonic bump pointer. Nothing handed out here is ever
//! returned. Once the frame table takes over the remaining range the bump
//! allocator refuses every further request.

use kernel_info::boot::RamRange;
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress, PhysicalPage, align_up};
use kernel_vmem::FrameAllocError;

#[derive(Debug)]
pub struct StealMem {
    next: PhysicalAddress,
    last: PhysicalAddress,
    handed_over: bool,
}

impl StealMem {
    #[must_use]
    pub const fn new(range: RamRange) -> Self {
        Self {
            next: range.first,
            last: range.last,
            handed_over: false,
        }
    }

    /// Take `pages` contiguous pages off the bottom of the remaining range.
    ///
    /// # Errors
    /// [`FrameAllocError::InvalidCount`] for `pages == 0`,
    /// [`FrameAllocError::OutOfMemory`] if the range is exhausted, and
    /// [`FrameAllocError::NoUsableMemory`] after [`take_remaining`](Self::take_remaining).
    pub fn steal(&mut self, pages: usize) -> Result<PhysicalPage, FrameAllocError> {
        if self.handed_over {
            return Err(FrameAllocError::NoUsableMemory);
        }
        if pages == 0 {
            return Err(FrameAllocError::InvalidCount);
        }

        let out_of_memory = FrameAllocError::OutOfMemory { requested: pages };
        let start = align_up(self.next.as_u32(), PAGE_SIZE).ok_or(out_of_memory)?;
        let end = u32::try_from(pages)
            .ok()
            .and_then(|p| p.checked_mul(PAGE_SIZE))
            .and_then(|bytes| start.checked_add(bytes))
            .filter(|&end| end <= self.last.as_u32())
            .ok_or(out_of_memory)?;

        self.next = PhysicalAddress::new(end);
        Ok(PhysicalAddress::new(start).page())
    }

    /// Hand the untouched rest of RAM to the frame table.
    ///
    /// A second call returns an empty range.
    pub const fn take_remaining(&mut self) -> RamRange {
        let rest = RamRange::new(self.next, self.last);
        self.next = self.last;
        self.handed_over = true;
        rest
    }

    /// What is still available for stealing.
    #[must_use]
    pub const fn remaining(&self) -> RamRange {
        RamRange::new(self.next, self.last)
    }

    #[must_use]
    pub const fn is_handed_over(&self) -> bool {
        self.handed_over
    }
}
