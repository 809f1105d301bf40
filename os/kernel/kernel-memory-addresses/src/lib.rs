//! # Virtual and Physical Memory Address Types (MIPS32)
//!
//! Strongly typed wrappers for raw 32-bit memory addresses and page bases used
//! by the frame allocator, the address-space descriptors, and the TLB refill
//! path.
//!
//! ## Overview
//!
//! The MIPS R3000 family has a single, fixed page size of 4 KiB and no
//! hardware page-table walker. Every translation is installed by software, so
//! mixing up a virtual page number with a physical frame number is the most
//! common way to corrupt a TLB entry. These types make that a compile error
//! while remaining zero-cost wrappers around `u32`.
//!
//! | Type | Meaning |
//! |------|---------|
//! | [`MemoryAddress`] | A raw 32-bit address, either physical or virtual. |
//! | [`PageOffset`] | The byte offset inside a 4 KiB page (`0..PAGE_SIZE`). |
//! | [`VirtualAddress`] / [`VirtualPage`] | A user or kernel virtual address and its page. |
//! | [`PhysicalAddress`] / [`PhysicalPage`] | A physical address and the frame containing it. |
//!
//! ## Typical Usage
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let va = VirtualAddress::new(0x0040_1234);
//! let (page, off) = va.split();
//! assert_eq!(page.base().as_u32(), 0x0040_1000);
//! assert_eq!(off.as_u32(), 0x234);
//! assert_eq!(page.join(off), va);
//!
//! let frame = PhysicalPage::from_number(0x2A);
//! assert_eq!(frame.base().as_u32(), 0x0002_A000);
//! ```
//!
//! ## Design Notes
//!
//! - The types are `#[repr(transparent)]` and implement `Copy`, `Eq`, `Ord`,
//!   and `Hash`.
//! - Page types can only be built aligned; the low [`PAGE_SHIFT`] bits of a
//!   page base are always zero.
//! - Arithmetic that can leave the 32-bit address space is `checked_*` and
//!   returns `Option`.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(clippy::inline_always)]

mod memory_address;
mod page;
mod page_offset;
mod physical_address;
mod virtual_address;

pub use memory_address::MemoryAddress;
pub use page::{MemoryPage, PhysicalPage, UnalignedAddress, VirtualPage};
pub use page_offset::PageOffset;
pub use physical_address::PhysicalAddress;
pub use virtual_address::VirtualAddress;

/// Size of a page (and of a physical frame) in bytes.
pub const PAGE_SIZE: u32 = 4096;

/// `log2(PAGE_SIZE)`, i.e. the number of offset bits in an address.
pub const PAGE_SHIFT: u32 = 12;

/// Mask selecting the page-number bits of an address.
pub const PAGE_FRAME: u32 = !(PAGE_SIZE - 1);

const _: () = assert!(1 << PAGE_SHIFT == PAGE_SIZE);

/// Align `x` down to the nearest multiple of `a`.
///
/// `a` must be a non-zero power of two.
///
/// ```rust
/// # use kernel_memory_addresses::align_down;
/// assert_eq!(align_down(0x1234, 4096), 0x1000);
/// assert_eq!(align_down(0x2000, 4096), 0x2000);
/// ```
#[inline(always)]
#[must_use]
pub const fn align_down(x: u32, a: u32) -> u32 {
    x & !(a - 1)
}

/// Align `x` up to the nearest multiple of `a`.
///
/// `a` must be a non-zero power of two. Returns `None` if the result does not
/// fit into 32 bits.
///
/// ```rust
/// # use kernel_memory_addresses::align_up;
/// assert_eq!(align_up(1, 8), Some(8));
/// assert_eq!(align_up(0x1000, 4096), Some(0x1000));
/// assert_eq!(align_up(u32::MAX, 4096), None);
/// ```
#[inline(always)]
#[must_use]
pub const fn align_up(x: u32, a: u32) -> Option<u32> {
    match x.checked_add(a - 1) {
        Some(v) => Some(v & !(a - 1)),
        None => None,
    }
}

/// Number of whole pages needed to hold `bytes` bytes.
#[inline]
#[must_use]
pub const fn pages_for(bytes: u32) -> u32 {
    bytes.div_ceil(PAGE_SIZE)
}
