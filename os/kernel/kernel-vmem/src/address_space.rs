//! # Address Space (flat, two segments plus a fixed stack)
//!
//! One descriptor per user process. Instead of a page table, each segment
//! keeps one physical frame per virtual page in a plain array, so the fault
//! engine translates with a single index operation.
//!
//! ```text
//! 0x0000_0000 ┌──────────────┐
//!             │  (unmapped)  │
//! segment 1   ├──────────────┤ ◄─ frames[0..n1]
//!             │   text       │
//!             ├──────────────┤
//!             │  (unmapped)  │
//! segment 2   ├──────────────┤ ◄─ frames[0..n2]
//!             │   data/bss   │
//!             ├──────────────┤
//!             │  (unmapped)  │
//! stack base  ├──────────────┤ ◄─ stack[0..STACK_PAGES]
//!             │   stack      │
//! USERSTACK   └──────────────┘ 0x8000_0000
//! ```
//!
//! ## Lifecycle
//!
//! 1. [`AddressSpace::create`]: empty, no regions.
//! 2. [`define_region`](AddressSpace::define_region), twice: segment geometry.
//! 3. [`prepare_load`](AddressSpace::prepare_load): allocate and zero one
//!    frame per page of both segments and the stack.
//! 4. The loader copies the program in; then
//!    [`complete_load`](AddressSpace::complete_load).
//! 5. [`define_stack`](AddressSpace::define_stack): marshal `argv`.
//! 6. [`copy`](AddressSpace::copy) on fork, [`destroy`](AddressSpace::destroy)
//!    on exit.
//!
//! Frames of one segment are allocated one at a time and are **not**
//! physically contiguous.
//!
//! Protection flags are recorded but not enforced: every page is mapped
//! read-write.

use crate::copyout::{CopyError, CopyOut, FrameCopyOut};
use crate::tlb::{Tlb, invalidate_all};
use crate::{FrameAlloc, PhysMapper};
use alloc::vec::Vec;
use bitfield_struct::bitfield;
use core::ffi::CStr;
use kernel_info::errno::{E2BIG, EINVAL, ENOMEM, EUNIMP, Errno};
use kernel_info::memory::{STACK_PAGES, USERSTACK, USERSTACK_BASE};
use kernel_memory_addresses::{
    PAGE_SIZE, PhysicalAddress, PhysicalPage, VirtualAddress, VirtualPage, align_up,
};
use kernel_sync::InterruptControl;
use log::{debug, error, warn};

/// Requested access rights of a region. Recorded, not enforced.
#[bitfield(u8)]
#[derive(PartialEq, Eq)]
pub struct Protection {
    pub readable: bool,
    pub writable: bool,
    pub executable: bool,
    #[bits(5)]
    __: u8,
}

impl Protection {
    #[must_use]
    pub const fn rwx(readable: bool, writable: bool, executable: bool) -> Self {
        Self::new()
            .with_readable(readable)
            .with_writable(writable)
            .with_executable(executable)
    }
}

/// Where a user address falls within an address space.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Region {
    Segment1,
    Segment2,
    Stack,
    Unmapped,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressSpaceError {
    #[error("out of memory")]
    OutOfMemory,
    #[error("too many regions")]
    TooManyRegions,
    #[error("invalid region at {0}")]
    InvalidRegion(VirtualAddress),
    #[error("both segments must be defined first")]
    MissingRegion,
    #[error("backing frames are already allocated")]
    AlreadyPrepared,
    #[error("backing frames are not allocated")]
    NotPrepared,
    #[error("arguments do not fit on the user stack")]
    ArgumentsTooLarge,
    #[error(transparent)]
    Copy(#[from] CopyError),
}

impl AddressSpaceError {
    /// Errno reported to user space.
    #[must_use]
    pub const fn errno(&self) -> Errno {
        match self {
            Self::OutOfMemory => ENOMEM,
            Self::TooManyRegions => EUNIMP,
            Self::InvalidRegion(_)
            | Self::MissingRegion
            | Self::AlreadyPrepared
            | Self::NotPrepared => EINVAL,
            Self::ArgumentsTooLarge => E2BIG,
            Self::Copy(e) => e.errno(),
        }
    }
}

/// A general-purpose segment: `page_count` pages starting at `base`.
#[derive(Debug)]
pub struct Segment {
    base: VirtualPage,
    page_count: u32,
    protection: Protection,
    /// `frames[i]` backs `base + i` pages. Empty until `prepare_load`.
    frames: Vec<PhysicalPage>,
}

impl Segment {
    const fn new(base: VirtualPage, page_count: u32, protection: Protection) -> Self {
        Self {
            base,
            page_count,
            protection,
            frames: Vec::new(),
        }
    }

    /// Same geometry, no frames.
    const fn geometry(&self) -> Self {
        Self::new(self.base, self.page_count, self.protection)
    }

    #[inline]
    #[must_use]
    pub const fn base(&self) -> VirtualPage {
        self.base
    }

    #[inline]
    #[must_use]
    pub const fn page_count(&self) -> u32 {
        self.page_count
    }

    #[inline]
    #[must_use]
    pub const fn protection(&self) -> Protection {
        self.protection
    }

    /// One past the last byte. Regions end at or below the stack, so this
    /// cannot overflow.
    #[inline]
    #[must_use]
    pub const fn end(&self) -> VirtualAddress {
        VirtualAddress::new(self.base.base().as_u32() + self.page_count * PAGE_SIZE)
    }

    #[inline]
    #[must_use]
    pub fn frames(&self) -> &[PhysicalPage] {
        &self.frames
    }

    #[inline]
    #[must_use]
    pub fn contains(&self, addr: VirtualAddress) -> bool {
        self.base.base() <= addr && addr < self.end()
    }

    fn overlaps(&self, start: VirtualAddress, end: VirtualAddress) -> bool {
        start < self.end() && self.base.base() < end
    }

    fn frame_for(&self, page: VirtualPage) -> Option<PhysicalPage> {
        let index = page.pages_since(self.base)?;
        self.frames.get(index as usize).copied()
    }
}

/// Per-process virtual memory: two segments and a fixed stack.
#[derive(Debug, Default)]
pub struct AddressSpace {
    segment1: Option<Segment>,
    segment2: Option<Segment>,
    /// Frames backing the fixed stack, lowest page first.
    stack: Vec<PhysicalPage>,
    load_complete: bool,
}

impl AddressSpace {
    /// An empty address space with no regions.
    #[must_use]
    pub const fn create() -> Self {
        Self {
            segment1: None,
            segment2: None,
            stack: Vec::new(),
            load_complete: false,
        }
    }

    /// First page of the fixed stack.
    #[must_use]
    pub const fn stack_base() -> VirtualPage {
        VirtualPage::containing_address(VirtualAddress::new(USERSTACK_BASE))
    }

    #[must_use]
    pub const fn segment1(&self) -> Option<&Segment> {
        self.segment1.as_ref()
    }

    #[must_use]
    pub const fn segment2(&self) -> Option<&Segment> {
        self.segment2.as_ref()
    }

    #[must_use]
    pub fn stack_frames(&self) -> &[PhysicalPage] {
        &self.stack
    }

    #[must_use]
    pub fn is_prepared(&self) -> bool {
        !self.stack.is_empty()
    }

    #[must_use]
    pub const fn is_load_complete(&self) -> bool {
        self.load_complete
    }

    /// Every frame owned by this space: segment 1, segment 2, then the stack.
    pub fn frames(&self) -> impl Iterator<Item = PhysicalPage> + '_ {
        [&self.segment1, &self.segment2]
            .into_iter()
            .flatten()
            .flat_map(|s| s.frames.iter().copied())
            .chain(self.stack.iter().copied())
    }

    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.segment1.as_ref().map_or(0, |s| s.frames.len())
            + self.segment2.as_ref().map_or(0, |s| s.frames.len())
            + self.stack.len()
    }

    /// Declare a region covering `[vaddr, vaddr + size)`.
    ///
    /// The base is rounded down and the end up to page boundaries. The first
    /// call defines segment 1, the second segment 2.
    ///
    /// # Errors
    /// - [`TooManyRegions`](AddressSpaceError::TooManyRegions) on a third region.
    /// - [`InvalidRegion`](AddressSpaceError::InvalidRegion) for an empty
    ///   region, one touching page 0, one overlapping another region or the
    ///   stack.
    /// - [`AlreadyPrepared`](AddressSpaceError::AlreadyPrepared) once frames
    ///   have been allocated.
    pub fn define_region(
        &mut self,
        vaddr: VirtualAddress,
        size: u32,
        protection: Protection,
    ) -> Result<(), AddressSpaceError> {
        if self.segment1.is_some() && self.segment2.is_some() {
            warn!("vm: too many regions");
            return Err(AddressSpaceError::TooManyRegions);
        }
        if self.is_prepared() {
            return Err(AddressSpaceError::AlreadyPrepared);
        }

        let invalid = AddressSpaceError::InvalidRegion(vaddr);
        if size == 0 {
            return Err(invalid);
        }
        let start = vaddr.page();
        let end = vaddr
            .as_u32()
            .checked_add(size)
            .and_then(|e| align_up(e, PAGE_SIZE))
            .map(VirtualAddress::new)
            .ok_or(invalid)?;

        if start.number() == 0 || end > Self::stack_base().base() {
            return Err(invalid);
        }
        let clash = |s: &Option<Segment>| s.as_ref().is_some_and(|s| s.overlaps(start.base(), end));
        if clash(&self.segment1) || clash(&self.segment2) {
            return Err(invalid);
        }

        let page_count = (end.as_u32() - start.base().as_u32()) / PAGE_SIZE;
        let segment = Segment::new(start, page_count, protection);
        debug!("vm: region {}..{} ({page_count} pages)", start.base(), end);
        if self.segment1.is_none() {
            self.segment1 = Some(segment);
        } else {
            self.segment2 = Some(segment);
        }
        Ok(())
    }

    /// Allocate and zero one frame per page of both segments and the stack.
    ///
    /// On failure every frame allocated by this call is released again and
    /// the descriptor is left unprepared.
    ///
    /// # Errors
    /// [`MissingRegion`](AddressSpaceError::MissingRegion) unless both
    /// segments are defined, [`AlreadyPrepared`](AddressSpaceError::AlreadyPrepared)
    /// on a second call, [`OutOfMemory`](AddressSpaceError::OutOfMemory) when
    /// frames run out.
    pub fn prepare_load<A, M>(&mut self, alloc: &A, mapper: &M) -> Result<(), AddressSpaceError>
    where
        A: FrameAlloc + ?Sized,
        M: PhysMapper,
    {
        if self.is_prepared() {
            return Err(AddressSpaceError::AlreadyPrepared);
        }
        let (Some(s1), Some(s2)) = (self.segment1.as_mut(), self.segment2.as_mut()) else {
            return Err(AddressSpaceError::MissingRegion);
        };

        let f1 = alloc_zeroed_frames(alloc, mapper, s1.page_count)?;
        let f2 = alloc_zeroed_frames(alloc, mapper, s2.page_count).inspect_err(|_| {
            release_frames(alloc, &f1);
        })?;
        let stack = alloc_zeroed_frames(alloc, mapper, STACK_PAGES).inspect_err(|_| {
            release_frames(alloc, &f1);
            release_frames(alloc, &f2);
        })?;

        s1.frames = f1;
        s2.frames = f2;
        self.stack = stack;
        Ok(())
    }

    /// Mark program loading as finished.
    pub const fn complete_load(&mut self) {
        self.load_complete = true;
    }

    /// Lay out `argv` at the top of the stack and return the initial stack
    /// pointer.
    ///
    /// Strings are placed from the top down, each 8-byte aligned, followed by
    /// the NULL-terminated array of pointers to them:
    ///
    /// ```text
    /// USERSTACK ─► ┌───────────────┐
    ///              │ argv[0] "..." │
    ///              │ argv[1] "..." │
    ///              │      ...      │
    ///              ├───────────────┤
    ///              │ NULL          │
    ///              │ &argv[n-1]    │
    ///              │      ...      │
    ///   returned ─►│ &argv[0]      │
    ///              └───────────────┘
    /// ```
    ///
    /// # Errors
    /// [`NotPrepared`](AddressSpaceError::NotPrepared) before `prepare_load`,
    /// [`ArgumentsTooLarge`](AddressSpaceError::ArgumentsTooLarge) if the
    /// layout would leave the stack, or the copier's error.
    pub fn define_stack<C>(
        &self,
        copier: &mut C,
        argv: &[&CStr],
    ) -> Result<VirtualAddress, AddressSpaceError>
    where
        C: CopyOut + ?Sized,
    {
        if !self.is_prepared() {
            return Err(AddressSpaceError::NotPrepared);
        }

        let mut pointers: Vec<u32> = Vec::new();
        pointers
            .try_reserve_exact(argv.len() + 1)
            .map_err(|_| AddressSpaceError::OutOfMemory)?;

        let mut sp = USERSTACK;
        for arg in argv {
            let len = arg.to_bytes_with_nul().len();
            sp = push_below(sp, len)?;
            copier.copyoutstr(arg, VirtualAddress::new(sp), len)?;
            pointers.push(sp);
        }
        pointers.push(0);

        let table: Vec<u8> = pointers.iter().flat_map(|p| p.to_ne_bytes()).collect();
        sp = push_below(sp, table.len())?;
        copier.copyout(&table, VirtualAddress::new(sp))?;

        Ok(VirtualAddress::new(sp))
    }

    /// [`define_stack`](Self::define_stack) writing through this space's own
    /// frames.
    ///
    /// # Errors
    /// As for [`define_stack`](Self::define_stack).
    pub fn define_stack_in<M: PhysMapper>(
        &self,
        mapper: &M,
        argv: &[&CStr],
    ) -> Result<VirtualAddress, AddressSpaceError> {
        self.define_stack(&mut FrameCopyOut::new(self, mapper), argv)
    }

    /// Duplicate this space for `fork`: same geometry, fresh frames, identical
    /// contents.
    ///
    /// # Errors
    /// [`MissingRegion`](AddressSpaceError::MissingRegion) or
    /// [`NotPrepared`](AddressSpaceError::NotPrepared) if there is nothing
    /// to copy yet; [`OutOfMemory`](AddressSpaceError::OutOfMemory) if the
    /// copy cannot be backed. The partial copy is destroyed before returning.
    pub fn copy<A, M>(&self, alloc: &A, mapper: &M) -> Result<Self, AddressSpaceError>
    where
        A: FrameAlloc + ?Sized,
        M: PhysMapper,
    {
        let (Some(s1), Some(s2)) = (self.segment1.as_ref(), self.segment2.as_ref()) else {
            return Err(AddressSpaceError::MissingRegion);
        };
        if !self.is_prepared() {
            return Err(AddressSpaceError::NotPrepared);
        }

        let mut new = Self::create();
        new.segment1 = Some(s1.geometry());
        new.segment2 = Some(s2.geometry());
        if let Err(e) = new.prepare_load(alloc, mapper) {
            new.destroy(alloc);
            return Err(e);
        }

        for (dst, src) in new.frames().zip(self.frames()) {
            // SAFETY: `src` is ours, `dst` was just allocated for `new`.
            unsafe { mapper.copy_frame(dst, src) };
        }
        new.load_complete = self.load_complete;
        Ok(new)
    }

    /// Release every frame and the descriptor itself.
    pub fn destroy<A: FrameAlloc + ?Sized>(mut self, alloc: &A) {
        let owned: Vec<PhysicalPage> = self.frames().collect();
        release_frames(alloc, &owned);
        self.forget_frames();
    }

    fn forget_frames(&mut self) {
        for seg in [&mut self.segment1, &mut self.segment2].into_iter().flatten() {
            seg.frames = Vec::new();
        }
        self.stack = Vec::new();
    }

    /// Make this the current space on this core: drop every TLB entry.
    pub fn activate<T, I>(&self, tlb: &mut T, irq: &I)
    where
        T: Tlb + ?Sized,
        I: InterruptControl + ?Sized,
    {
        invalidate_all(tlb, irq);
    }

    /// Nothing to do; [`activate`](Self::activate) does all the work.
    pub const fn deactivate(&self) {}

    /// Which region `addr` falls into.
    #[must_use]
    pub fn classify(&self, addr: VirtualAddress) -> Region {
        if self.segment1.as_ref().is_some_and(|s| s.contains(addr)) {
            Region::Segment1
        } else if self.segment2.as_ref().is_some_and(|s| s.contains(addr)) {
            Region::Segment2
        } else if Self::stack_base().base() <= addr && addr.as_u32() < USERSTACK {
            Region::Stack
        } else {
            Region::Unmapped
        }
    }

    /// The frame backing `page` within `region`, if allocated.
    #[must_use]
    pub fn frame_for(&self, region: Region, page: VirtualPage) -> Option<PhysicalPage> {
        match region {
            Region::Segment1 => self.segment1.as_ref()?.frame_for(page),
            Region::Segment2 => self.segment2.as_ref()?.frame_for(page),
            Region::Stack => {
                let index = page.pages_since(Self::stack_base())?;
                self.stack.get(index as usize).copied()
            }
            Region::Unmapped => None,
        }
    }

    /// Translate a user address through this space's frames.
    #[must_use]
    pub fn translate(&self, addr: VirtualAddress) -> Option<PhysicalAddress> {
        let (page, offset) = addr.split();
        self.frame_for(self.classify(addr), page)
            .map(|f| f.join(offset))
    }

    /// Check the invariants the fault engine relies on.
    ///
    /// # Panics
    /// If either segment is missing, empty, or at page 0, or if backing
    /// frames were never allocated. Each means the lifecycle was misused.
    pub fn assert_well_formed(&self) {
        for (n, seg) in [(1, &self.segment1), (2, &self.segment2)] {
            let Some(seg) = seg else {
                panic!("vm: segment {n} is not defined");
            };
            assert!(seg.base.number() != 0, "vm: segment {n} is at page 0");
            assert!(seg.page_count != 0, "vm: segment {n} is empty");
            assert_eq!(
                seg.frames.len(),
                seg.page_count as usize,
                "vm: segment {n} has no backing frames"
            );
        }
        assert_eq!(
            self.stack.len(),
            STACK_PAGES as usize,
            "vm: stack has no backing frames"
        );
    }
}

impl Drop for AddressSpace {
    fn drop(&mut self) {
        let leaked = self.frame_count();
        if leaked != 0 {
            error!("vm: address space dropped without destroy, leaking {leaked} frames");
        }
    }
}

/// Move `sp` down far enough to hold `len` bytes plus 8 bytes of slack,
/// 8-byte aligned, and stay inside the stack.
fn push_below(sp: u32, len: usize) -> Result<u32, AddressSpaceError> {
    u32::try_from(len)
        .ok()
        .and_then(|len| sp.checked_sub(len)?.checked_sub(8))
        .and_then(|sp| align_up(sp, 8))
        .filter(|&sp| sp >= USERSTACK_BASE)
        .ok_or(AddressSpaceError::ArgumentsTooLarge)
}

/// Allocate `count` single frames and zero each.
fn alloc_zeroed_frames<A, M>(
    alloc: &A,
    mapper: &M,
    count: u32,
) -> Result<Vec<PhysicalPage>, AddressSpaceError>
where
    A: FrameAlloc + ?Sized,
    M: PhysMapper,
{
    let mut frames = Vec::new();
    frames
        .try_reserve_exact(count as usize)
        .map_err(|_| AddressSpaceError::OutOfMemory)?;

    for _ in 0..count {
        match alloc.alloc_frame() {
            Ok(frame) => {
                // SAFETY: freshly allocated, nobody else references it.
                unsafe { mapper.zero_frame(frame) };
                frames.push(frame);
            }
            Err(e) => {
                debug!("vm: out of frames after {} of {count}: {e}", frames.len());
                release_frames(alloc, &frames);
                return Err(AddressSpaceError::OutOfMemory);
            }
        }
    }
    Ok(frames)
}

fn release_frames<A: FrameAlloc + ?Sized>(alloc: &A, frames: &[PhysicalPage]) {
    for &frame in frames {
        if let Err(e) = alloc.free_frames(frame) {
            error!("vm: failed to release {frame:?}: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PAGE_BYTES;
    use crate::sim::SimRam;
    use crate::testing::PoolAlloc;

    const RW: Protection = Protection::rwx(true, true, false);

    fn two_regions() -> AddressSpace {
        let mut a = AddressSpace::create();
        a.define_region(VirtualAddress::new(0x0040_0000), 2 * PAGE_SIZE, RW).unwrap();
        a.define_region(VirtualAddress::new(0x0050_0000), 3 * PAGE_SIZE, RW).unwrap();
        a
    }

    #[test]
    fn define_region_page_aligns() {
        let mut a = AddressSpace::create();
        a.define_region(VirtualAddress::new(0x0040_0FF0), 0x20, RW).unwrap();
        let s = a.segment1().unwrap();
        assert_eq!(s.base().base().as_u32(), 0x0040_0000);
        assert_eq!(s.page_count(), 2);
        assert_eq!(s.end().as_u32(), 0x0040_2000);
        assert!(s.protection().readable());
        assert!(!s.protection().executable());
    }

    #[test]
    fn third_region_is_rejected() {
        let mut a = two_regions();
        let err = a
            .define_region(VirtualAddress::new(0x0060_0000), PAGE_SIZE, RW)
            .unwrap_err();
        assert_eq!(err, AddressSpaceError::TooManyRegions);
        assert_eq!(err.errno(), EUNIMP);
    }

    #[test]
    fn bad_regions_are_rejected() {
        let mut a = AddressSpace::create();
        let va = VirtualAddress::new;
        assert!(matches!(
            a.define_region(va(0x0040_0000), 0, RW),
            Err(AddressSpaceError::InvalidRegion(_))
        ));
        assert!(a.define_region(va(0x10), 0x10, RW).is_err(), "page 0");
        assert!(a.define_region(va(USERSTACK_BASE - 0x10), 0x20, RW).is_err(), "stack");
        assert!(a.define_region(va(0xFFFF_F000), 0x2000, RW).is_err(), "wraps");

        a.define_region(va(0x0040_0000), 0x3000, RW).unwrap();
        assert!(a.define_region(va(0x0040_2000), 0x1000, RW).is_err(), "overlap");
        assert!(a.define_region(va(0x0040_3000), 0x1000, RW).is_ok(), "adjacent");
    }

    #[test]
    fn prepare_load_needs_both_segments() {
        let ram = SimRam::new(PhysicalAddress::new(0), 32);
        let pool = PoolAlloc::new(&ram, 32);
        let mut a = AddressSpace::create();
        a.define_region(VirtualAddress::new(0x0040_0000), PAGE_SIZE, RW).unwrap();
        assert_eq!(a.prepare_load(&pool, &ram), Err(AddressSpaceError::MissingRegion));
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn prepare_load_allocates_and_zeroes() {
        let ram = SimRam::new(PhysicalAddress::new(0), 32);
        ram.write(PhysicalAddress::new(0), &[0xAA; PAGE_BYTES * 4]);
        let pool = PoolAlloc::new(&ram, 32);

        let mut a = two_regions();
        a.prepare_load(&pool, &ram).unwrap();
        assert_eq!(a.frame_count(), 2 + 3 + STACK_PAGES as usize);
        assert_eq!(pool.in_use(), a.frame_count());
        assert!(a.frames().all(|f| ram.frame_bytes(f).iter().all(|&b| b == 0)));
        assert_eq!(a.prepare_load(&pool, &ram), Err(AddressSpaceError::AlreadyPrepared));

        a.destroy(&pool);
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn prepare_load_rolls_back_on_exhaustion() {
        let ram = SimRam::new(PhysicalAddress::new(0), 10);
        let pool = PoolAlloc::new(&ram, 10);
        let mut a = two_regions();
        let err = a.prepare_load(&pool, &ram).unwrap_err();
        assert_eq!(err, AddressSpaceError::OutOfMemory);
        assert_eq!(err.errno(), ENOMEM);
        assert_eq!(pool.in_use(), 0);
        assert!(!a.is_prepared());
    }

    #[test]
    fn classify_and_translate() {
        let ram = SimRam::new(PhysicalAddress::new(0), 32);
        let pool = PoolAlloc::new(&ram, 32);
        let mut a = two_regions();
        a.prepare_load(&pool, &ram).unwrap();

        let va = VirtualAddress::new;
        assert_eq!(a.classify(va(0x0040_1FFF)), Region::Segment1);
        assert_eq!(a.classify(va(0x0040_2000)), Region::Unmapped);
        assert_eq!(a.classify(va(0x0050_2000)), Region::Segment2);
        assert_eq!(a.classify(va(USERSTACK - 1)), Region::Stack);
        assert_eq!(a.classify(va(USERSTACK_BASE - 1)), Region::Unmapped);
        assert_eq!(a.classify(va(USERSTACK)), Region::Unmapped);

        let s2 = a.segment2().unwrap().frames()[1];
        assert_eq!(a.translate(va(0x0050_1234)), Some(s2.join(va(0x234).offset())));
        assert_eq!(a.translate(va(0x10)), None);

        a.destroy(&pool);
    }

    #[test]
    fn define_stack_lays_out_argv() {
        let ram = SimRam::new(PhysicalAddress::new(0), 32);
        let pool = PoolAlloc::new(&ram, 32);
        let mut a = two_regions();
        a.prepare_load(&pool, &ram).unwrap();

        let argv = [c"prog", c"hello"];
        let sp = a.define_stack_in(&ram, &argv).unwrap();

        // "prog\0": 0x8000_0000 - 5 - 8 = 0x7FFF_FFF3, rounded up to 8.
        let p0 = 0x7FFF_FFF8;
        // "hello\0": p0 - 6 - 8 = 0x7FFF_FFEA, rounded up to 8.
        let p1 = 0x7FFF_FFF0;
        // Three pointers: p1 - 12 - 8 = 0x7FFF_FFDC, rounded up to 8.
        assert_eq!(sp.as_u32(), 0x7FFF_FFE0);

        let read = |addr: u32, len: usize| {
            let mut buf = vec![0u8; len];
            ram.read(a.translate(VirtualAddress::new(addr)).unwrap(), &mut buf);
            buf
        };
        assert_eq!(read(p0, 5), b"prog\0");
        assert_eq!(read(p1, 6), b"hello\0");

        let table = read(sp.as_u32(), 12);
        let ptr = |i: usize| u32::from_ne_bytes(table[i * 4..i * 4 + 4].try_into().unwrap());
        assert_eq!((ptr(0), ptr(1), ptr(2)), (p0, p1, 0));

        a.destroy(&pool);
    }

    #[test]
    fn define_stack_requires_frames_and_room() {
        let ram = SimRam::new(PhysicalAddress::new(0), 32);
        let pool = PoolAlloc::new(&ram, 32);
        let mut a = two_regions();
        assert_eq!(
            a.define_stack_in(&ram, &[c"x"]),
            Err(AddressSpaceError::NotPrepared)
        );

        a.prepare_load(&pool, &ram).unwrap();
        let huge = std::ffi::CString::new(vec![b'a'; STACK_PAGES as usize * PAGE_BYTES]).unwrap();
        let err = a.define_stack_in(&ram, &[huge.as_c_str()]).unwrap_err();
        assert_eq!(err, AddressSpaceError::ArgumentsTooLarge);
        assert_eq!(err.errno(), E2BIG);

        a.destroy(&pool);
    }

    #[test]
    fn copy_duplicates_contents_into_fresh_frames() {
        let ram = SimRam::new(PhysicalAddress::new(0), 64);
        let pool = PoolAlloc::new(&ram, 64);
        let mut a = two_regions();
        a.prepare_load(&pool, &ram).unwrap();
        for (i, f) in a.frames().enumerate() {
            ram.write(f.base(), &[u8::try_from(i).unwrap() + 1; 16]);
        }
        a.complete_load();

        let b = a.copy(&pool, &ram).unwrap();
        assert!(b.is_load_complete());
        assert_eq!(b.frame_count(), a.frame_count());
        for (fa, fb) in a.frames().zip(b.frames()) {
            assert_ne!(fa, fb);
            assert_eq!(ram.frame_bytes(fa), ram.frame_bytes(fb));
        }

        a.destroy(&pool);
        b.destroy(&pool);
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn copy_failure_leaves_nothing_behind() {
        let ram = SimRam::new(PhysicalAddress::new(0), 20);
        let pool = PoolAlloc::new(&ram, 20);
        let mut a = two_regions();
        a.prepare_load(&pool, &ram).unwrap();
        let before = pool.in_use();

        assert_eq!(a.copy(&pool, &ram).unwrap_err(), AddressSpaceError::OutOfMemory);
        assert_eq!(pool.in_use(), before);
        a.destroy(&pool);
    }

    #[test]
    #[should_panic(expected = "segment 2 is not defined")]
    fn missing_second_segment_fails_the_invariant_check() {
        let mut a = AddressSpace::create();
        a.define_region(VirtualAddress::new(0x0040_0000), PAGE_SIZE, RW).unwrap();
        if let Some(s1) = a.segment1.as_mut() {
            s1.frames = vec![PhysicalPage::from_number(0x10)];
        }
        a.assert_well_formed();
    }

    #[test]
    #[should_panic(expected = "segment 1 has no backing frames")]
    fn unprepared_space_fails_the_invariant_check() {
        two_regions().assert_well_formed();
    }

    #[test]
    #[should_panic(expected = "stack has no backing frames")]
    fn missing_stack_fails_the_invariant_check() {
        let mut a = two_regions();
        for (seg, first) in [(a.segment1.as_mut(), 0x10), (a.segment2.as_mut(), 0x20)] {
            if let Some(seg) = seg {
                seg.frames = (first..first + seg.page_count)
                    .map(PhysicalPage::from_number)
                    .collect();
            }
        }
        a.assert_well_formed();
    }
}
