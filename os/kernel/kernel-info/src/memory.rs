//! # Memory Layout

pub use kernel_memory_addresses::{PAGE_FRAME, PAGE_SHIFT, PAGE_SIZE};

/// Base of the direct-mapped kernel segment.
/// Physical address `pa` is visible to the kernel at `MIPS_KSEG0 + pa`.
pub const MIPS_KSEG0: u32 = 0x8000_0000;

/// Size of the direct-mapped kernel segment (512 MiB).
pub const MIPS_KSEG0_SIZE: u32 = 0x2000_0000;

/// One past the highest user virtual address; the user stack grows down from here.
pub const USERSTACK: u32 = MIPS_KSEG0;

/// Number of pages in every process's fixed-size user stack.
pub const STACK_PAGES: u32 = 12;

/// Lowest address of the fixed user stack region.
pub const USERSTACK_BASE: u32 = USERSTACK - STACK_PAGES * PAGE_SIZE;

/// Number of hardware TLB slots.
pub const NUM_TLB: usize = 64;

const _: () = {
    assert!(PAGE_SIZE.is_power_of_two());
    assert!(USERSTACK.is_multiple_of(PAGE_SIZE));
    assert!(USERSTACK_BASE > PAGE_SIZE);
};
