//! # Frame table (coremap)
//!
//! One [`FrameSlot`] per managed 4 KiB frame. A free frame holds position `0`;
//! the `k`-th frame of an allocated run of length `L` holds `{ pos: k, len: L }`,
//! so a run of three frames reads `1, 2, 3` in the position column:
//!
//! ```text
//! index     0  1  2  3  4  5  6  7 ...
//! pos       1  2  3  0  0  1  2  0 ...
//! len       3  3  3  0  0  2  2  0 ...
//!           └─run─┘        └run┘
//! ```
//!
//! Storing the run length next to the position lets [`FrameTable::free`]
//! verify the whole run before touching it, so freeing from the middle of a
//! run (or freeing twice) is rejected instead of corrupting neighbours.

use bitfield_struct::bitfield;
use core::fmt;
use kernel_info::boot::RamRange;
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress, PhysicalPage, align_down, align_up};
use kernel_vmem::{FrameAllocError, PAGE_BYTES, PhysMapper};
use log::{error, info};

/// State of one managed frame.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct FrameSlot {
    /// 1-based position within the run; `0` if the frame is free.
    pub pos: u16,
    /// Length of the run this frame belongs to; `0` if free.
    pub len: u16,
}

impl FrameSlot {
    pub const FREE: Self = Self::new();

    #[inline]
    #[must_use]
    pub const fn is_free(self) -> bool {
        self.pos() == 0
    }
}

/// Frame table over the RAM left after early boot.
///
/// Not synchronized by itself; the kernel page allocator keeps it behind a
/// [`SpinLock`](kernel_sync::SpinLock).
pub struct FrameTable<'m> {
    first: PhysicalPage,
    slots: &'m mut [FrameSlot],
    free: usize,
}

impl<'m> FrameTable<'m> {
    /// Manage `slots.len()` frames starting at `first`, all free.
    #[must_use]
    pub fn new(slots: &'m mut [FrameSlot], first: PhysicalPage) -> Self {
        slots.fill(FrameSlot::FREE);
        let free = slots.len();
        Self { first, slots, free }
    }

    /// Build the table in place at the start of `range`.
    ///
    /// The slot array is written at the first word-aligned address of the
    /// range; the managed frames start at the next page boundary after it and
    /// run up to the last whole page below `range.last`.
    ///
    /// # Errors
    /// [`FrameAllocError::NoUsableMemory`] if not a single frame remains after
    /// the table itself.
    ///
    /// # Safety
    /// `range` must be RAM that nothing else uses for `'m`, reachable through
    /// `mapper`.
    #[allow(clippy::cast_possible_truncation)]
    pub unsafe fn bootstrap<M: PhysMapper>(
        range: RamRange,
        mapper: &M,
    ) -> Result<Self, FrameAllocError> {
        let slot_size = size_of::<FrameSlot>() as u32;
        let last = align_down(range.last.as_u32(), PAGE_SIZE);
        let table =
            align_up(range.first.as_u32(), slot_size).ok_or(FrameAllocError::NoUsableMemory)?;
        if table >= last {
            return Err(FrameAllocError::NoUsableMemory);
        }

        // Upper bound on the frame count; the table eats into it a little.
        let estimate = (last - table) / PAGE_SIZE;
        let managed = estimate
            .checked_mul(slot_size)
            .and_then(|bytes| table.checked_add(bytes))
            .and_then(|end| align_up(end, PAGE_SIZE))
            .filter(|&start| start < last)
            .ok_or(FrameAllocError::NoUsableMemory)?;
        let total = ((last - managed) / PAGE_SIZE) as usize;

        // SAFETY: the caller hands us `range`; `total <= estimate` slots fit
        // between `table` and `managed`.
        let slots: &'m mut [FrameSlot] =
            unsafe { mapper.phys_to_slice_mut(PhysicalAddress::new(table), total) };
        let this = Self::new(slots, PhysicalAddress::new(managed).page());

        info!(
            "vm: frame table at {}, {total} frames in {}..{}",
            PhysicalAddress::new(table),
            PhysicalAddress::new(managed),
            PhysicalAddress::new(last)
        );
        Ok(this)
    }

    /// Number of frames under management.
    #[inline]
    #[must_use]
    pub const fn total_frames(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    #[must_use]
    pub const fn free_count(&self) -> usize {
        self.free
    }

    /// First managed frame.
    #[inline]
    #[must_use]
    pub const fn first_frame(&self) -> PhysicalPage {
        self.first
    }

    /// Physical range the table hands out frames from.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn managed_range(&self) -> RamRange {
        let first = self.first.base();
        RamRange::new(first, first + (self.slots.len() * PAGE_BYTES) as u32)
    }

    /// Position of frame `index` within its run (`0` = free).
    ///
    /// # Panics
    /// If `index` is not a managed frame.
    #[inline]
    #[must_use]
    pub fn run_position(&self, index: usize) -> u16 {
        self.slots[index].pos()
    }

    /// Length of the run frame `index` belongs to (`0` = free).
    ///
    /// # Panics
    /// If `index` is not a managed frame.
    #[inline]
    #[must_use]
    pub fn run_len(&self, index: usize) -> u16 {
        self.slots[index].len()
    }

    /// Base address of frame `index`, if it is managed.
    #[must_use]
    pub fn frame_address(&self, index: usize) -> Option<PhysicalAddress> {
        if index >= self.slots.len() {
            return None;
        }
        let index = u32::try_from(index).ok()?;
        self.first.checked_add_pages(index).map(PhysicalPage::base)
    }

    /// Index of the frame containing `addr`, if it is managed.
    #[must_use]
    pub fn frame_index(&self, addr: PhysicalAddress) -> Option<usize> {
        let index = addr.page().pages_since(self.first)? as usize;
        (index < self.slots.len()).then_some(index)
    }

    /// First-fit allocation of `count` contiguous frames.
    ///
    /// # Errors
    /// [`FrameAllocError::InvalidCount`] for `count == 0`,
    /// [`FrameAllocError::OutOfMemory`] if no free run is long enough.
    pub fn alloc(&mut self, count: usize) -> Result<PhysicalPage, FrameAllocError> {
        if count == 0 {
            return Err(FrameAllocError::InvalidCount);
        }
        let out_of_memory = FrameAllocError::OutOfMemory { requested: count };
        let len = u16::try_from(count).map_err(|_| out_of_memory)?;
        if count > self.free {
            return Err(out_of_memory);
        }

        let mut start = 0;
        while start + count <= self.slots.len() {
            let window = &mut self.slots[start..start + count];
            match window.iter().rposition(|s| !s.is_free()) {
                // No run starting at or before the busy frame can fit.
                Some(busy) => start += busy + 1,
                None => {
                    for (pos, slot) in (1..=len).zip(window.iter_mut()) {
                        *slot = FrameSlot::new().with_pos(pos).with_len(len);
                    }
                    self.free -= count;
                    let index = u32::try_from(start).map_err(|_| out_of_memory)?;
                    return self.first.checked_add_pages(index).ok_or(out_of_memory);
                }
            }
        }
        Err(out_of_memory)
    }

    /// Release the run starting at `first` and return its length.
    ///
    /// # Errors
    /// Rejects unmanaged frames, free frames and frames in the middle of a
    /// run. The table is left unchanged.
    pub fn free(&mut self, first: PhysicalPage) -> Result<usize, FrameAllocError> {
        let Some(index) = self.frame_index(first.base()) else {
            error!("vm: free of unmanaged frame {}", first.base());
            return Err(FrameAllocError::Unmanaged(first.base()));
        };

        let head = self.slots[index];
        match head.pos() {
            0 => {
                error!("vm: free of free frame {index}");
                return Err(FrameAllocError::NotAllocated { frame: index });
            }
            1 => {}
            position => {
                error!("vm: free of frame {index} at position {position} of its run");
                return Err(FrameAllocError::NotRunStart {
                    frame: index,
                    position,
                });
            }
        }

        let len = usize::from(head.len());
        let run = &mut self.slots[index..index + len];
        assert!(
            (1..).zip(run.iter()).all(|(k, s)| s.pos() == k && s.len() == head.len()),
            "vm: frame table run at {index} is corrupt"
        );
        run.fill(FrameSlot::FREE);
        self.free += len;

        #[cfg(feature = "coremap-dump")]
        log::trace!("vm: coremap {}", Positions(&*self.slots));

        Ok(len)
    }

    /// Iterate over the `(index, slot)` pairs of allocated frames.
    pub fn allocated(&self) -> impl Iterator<Item = (usize, FrameSlot)> + '_ {
        self.slots
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, s)| !s.is_free())
    }
}

impl fmt::Debug for FrameTable<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameTable")
            .field("first", &self.first)
            .field("total", &self.slots.len())
            .field("free", &self.free)
            .finish()
    }
}

/// The position column, space separated.
#[cfg(feature = "coremap-dump")]
struct Positions<'a>(&'a [FrameSlot]);

#[cfg(feature = "coremap-dump")]
impl fmt::Display for Positions<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, slot) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}", slot.pos())?;
        }
        f.write_str("]")
    }
}
