//! # Virtual Memory Support (MIPS32, software-managed TLB)
//!
//! The virtual-memory core as seen by the rest of the kernel: per-process
//! address spaces, the TLB refill path, and the seams to the frame allocator
//! and to physical memory.
//!
//! ## What you get
//! - An [`AddressSpace`] descriptor with two general segments and one fixed
//!   stack, plus its whole lifecycle (define, prepare, load, copy, destroy).
//! - The [`vm_fault`] engine that turns a TLB miss into an installed entry.
//! - MIPS [`EntryHi`]/[`EntryLo`] encodings and the [`Tlb`] hardware seam.
//! - A tiny allocator/mapper interface ([`FrameAlloc`], [`PhysMapper`]).
//! - A [`CopyOut`] seam for writing into user memory.
//!
//! ## Translation on MIPS32
//!
//! There is no hardware page-table walker. Every user access goes through a
//! 64-entry TLB; a miss traps into the kernel, which looks the page up in the
//! current address space and writes an entry itself.
//!
//! ```text
//! | 31 ‒ 12 | 11 ‒ 0 |
//! |   VPN   | Offset |
//!
//!   access ──► TLB hit? ──yes──► physical frame | offset
//!                 │
//!                 no
//!                 ▼
//!            vm_fault(kind, addr)
//!                 │  classify addr: Segment1 | Segment2 | Stack | Unmapped
//!                 │  frame = segment.frames[(addr - base) / PAGE_SIZE]
//!                 ▼
//!            write {VPN → PFN, V, D} into a free (or random) TLB slot
//! ```
//!
//! ### Address spaces are flat
//!
//! Each segment keeps one physical frame per virtual page in a plain array.
//! This only works because an address space has at most two general segments
//! and a fixed-size stack; a third region is rejected with
//! [`AddressSpaceError::TooManyRegions`].
//!
//! ### Kernel memory
//!
//! The kernel runs in `kseg0`, which maps physical memory directly at
//! `0x8000_0000` and never goes through the TLB. [`PhysMapper`] is how this
//! crate reaches a physical frame to zero or copy it.

#![cfg_attr(not(test), no_std)]
#![allow(unsafe_code, clippy::inline_always)]

extern crate alloc;

pub mod address_space;
pub mod copyout;
pub mod fault;
mod frame_alloc;
#[cfg(any(test, feature = "sim"))]
pub mod sim;
#[cfg(test)]
mod testing;
pub mod tlb;

pub use crate::address_space::{AddressSpace, AddressSpaceError, Protection, Region, Segment};
pub use crate::copyout::{CopyError, CopyOut, FrameCopyOut};
pub use crate::fault::{FaultError, FaultKind, Installed, vm_fault, vm_fault_raw};
pub use crate::frame_alloc::{FrameAlloc, FrameAllocError};
pub use crate::tlb::{
    EntryHi, EntryLo, Tlb, TlbEntry, TlbShootdown, invalidate_all, tlb_shootdown,
    tlb_shootdown_all,
};

/// Re-export constants as info module.
pub use kernel_info::memory as info;

use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress, PhysicalPage};

/// Size of a page in bytes, as `usize` for slice work.
pub const PAGE_BYTES: usize = PAGE_SIZE as usize;

/// Converts physical addresses to *temporarily* usable references in the
/// kernel's address space.
///
/// On MIPS this is the `kseg0` direct map (`paddr + 0x8000_0000`); host tests
/// back it with a heap buffer.
///
/// # Safety
/// - Lifetime `'a` is purely borrow-checked; the mapping must remain valid
///   for `'a`.
/// - Type `T` must match the bytes at `pa`, and no other live reference may
///   alias them.
pub trait PhysMapper {
    /// Convert a *physical* address to a usable mutable reference.
    ///
    /// # Safety
    /// See the trait documentation. `pa` must lie in RAM known to the mapper
    /// and be suitably aligned for `T`.
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T;

    /// View `len` consecutive `T`s starting at `pa`.
    ///
    /// # Safety
    /// As for [`phys_to_mut`](Self::phys_to_mut), for the whole range.
    #[inline]
    unsafe fn phys_to_slice_mut<'a, T>(&self, pa: PhysicalAddress, len: usize) -> &'a mut [T] {
        let first: &mut T = unsafe { self.phys_to_mut(pa) };
        unsafe { core::slice::from_raw_parts_mut(core::ptr::from_mut(first), len) }
    }

    /// Borrow a whole frame as bytes.
    ///
    /// # Safety
    /// The caller must own `frame` and hold no other reference into it.
    #[inline]
    unsafe fn frame_mut<'a>(&self, frame: PhysicalPage) -> &'a mut [u8; PAGE_BYTES] {
        unsafe { self.phys_to_mut(frame.base()) }
    }

    /// Fill a frame with zeroes.
    ///
    /// # Safety
    /// The caller must own `frame`.
    #[inline]
    unsafe fn zero_frame(&self, frame: PhysicalPage) {
        unsafe { self.frame_mut(frame) }.fill(0);
    }

    /// Copy the contents of `src` into `dst`.
    ///
    /// # Safety
    /// The caller must own both frames, and they must differ.
    #[inline]
    unsafe fn copy_frame(&self, dst: PhysicalPage, src: PhysicalPage) {
        debug_assert_ne!(dst, src, "copying a frame onto itself");
        let from: &[u8; PAGE_BYTES] = unsafe { self.frame_mut(src) };
        unsafe { self.frame_mut(dst) }.copy_from_slice(from);
    }
}

impl<M: PhysMapper> PhysMapper for &M {
    #[inline]
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        unsafe { (**self).phys_to_mut(pa) }
    }
}
