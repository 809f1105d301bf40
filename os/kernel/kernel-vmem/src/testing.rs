//! Shared helpers for unit tests.

use crate::sim::SimRam;
use crate::{FrameAlloc, FrameAllocError};
use core::cell::RefCell;
use kernel_memory_addresses::PhysicalPage;

/// Hands out single frames of a [`SimRam`] and tracks which are in use.
pub struct PoolAlloc {
    first: u32,
    used: RefCell<Vec<bool>>,
}

impl PoolAlloc {
    pub fn new(ram: &SimRam, frames: usize) -> Self {
        Self {
            first: ram.base().page().number(),
            used: RefCell::new(vec![false; frames]),
        }
    }

    pub fn in_use(&self) -> usize {
        self.used.borrow().iter().filter(|&&u| u).count()
    }
}

impl FrameAlloc for PoolAlloc {
    fn alloc_frames(&self, count: usize) -> Result<PhysicalPage, FrameAllocError> {
        assert_eq!(count, 1, "address spaces allocate single frames");
        let mut used = self.used.borrow_mut();
        let i = used
            .iter()
            .position(|&u| !u)
            .ok_or(FrameAllocError::OutOfMemory { requested: count })?;
        used[i] = true;
        Ok(PhysicalPage::from_number(self.first + u32::try_from(i).unwrap()))
    }

    fn free_frames(&self, first: PhysicalPage) -> Result<(), FrameAllocError> {
        let i = (first.number() - self.first) as usize;
        let mut used = self.used.borrow_mut();
        if !used[i] {
            return Err(FrameAllocError::NotAllocated { frame: i });
        }
        used[i] = false;
        Ok(())
    }
}
