//! # KSEG0 PhysMapper for the MIPS kernel
//!
//! This module provides a [`PhysMapper`] implementation for the MIPS `kseg0`
//! segment. It lets the kernel touch a physical frame (to zero it, copy it,
//! or keep the frame table in it) without going through the TLB.
//!
//! ## Why is this needed?
//! - Code can only dereference virtual addresses, not physical ones.
//! - The frame table, segment backing frames and user stacks are all
//!   physical memory that the kernel has to fill in.
//! - Host tests back physical memory with a heap buffer instead, so the
//!   mapping strategy sits behind a trait.
//!
//! ## How does it work?
//! - `kseg0` is an unmapped, cached window: virtual `0x8000_0000 + pa` is
//!   physical `pa` for the low 512 MiB.
//! - This implementation adds [`MIPS_KSEG0`] to the physical address and
//!   returns a pointer.
//!
//! ## Example
//! ```rust
//! use kernel_alloc::phys_mapper::{kvaddr_to_paddr, paddr_to_kvaddr};
//! use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
//!
//! let pa = PhysicalAddress::new(0x0040_2000);
//! let va = paddr_to_kvaddr(pa);
//! assert_eq!(va, VirtualAddress::new(0x8040_2000));
//! assert_eq!(kvaddr_to_paddr(va), Some(pa));
//! assert_eq!(kvaddr_to_paddr(VirtualAddress::new(0x0040_2000)), None);
//! ```

use kernel_info::memory::{MIPS_KSEG0, MIPS_KSEG0_SIZE};
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
use kernel_vmem::PhysMapper;

/// Kernel virtual address of physical `pa` in `kseg0`.
///
/// # Panics
/// In debug builds, if `pa` lies above the 512 MiB `kseg0` window.
#[inline]
#[must_use]
pub const fn paddr_to_kvaddr(pa: PhysicalAddress) -> VirtualAddress {
    debug_assert!(pa.as_u32() < MIPS_KSEG0_SIZE, "physical address outside kseg0");
    VirtualAddress::new(pa.as_u32() | MIPS_KSEG0)
}

/// Physical address behind a `kseg0` kernel address, or `None` if `va` is
/// not in `kseg0`.
#[inline]
#[must_use]
pub const fn kvaddr_to_paddr(va: VirtualAddress) -> Option<PhysicalAddress> {
    match va.as_u32().checked_sub(MIPS_KSEG0) {
        Some(offset) if offset < MIPS_KSEG0_SIZE => Some(PhysicalAddress::new(offset)),
        _ => None,
    }
}

/// [`PhysMapper`] implementation for the MIPS `kseg0` direct map.
///
/// # Safety
/// - Only physical addresses below 512 MiB are reachable.
/// - The returned reference must only be used for RAM the caller owns.
#[derive(Debug, Copy, Clone, Default)]
pub struct Kseg0PhysMapper;

impl PhysMapper for Kseg0PhysMapper {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        let va = paddr_to_kvaddr(pa).as_u32() as usize as *mut T;
        // SAFETY: Caller must ensure the physical address is RAM it owns.
        unsafe { &mut *va }
    }
}
