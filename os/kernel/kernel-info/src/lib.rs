//! # Kernel Configuration and Platform Interface
//!
//! This crate defines the memory layout constants, the boot hand-over
//! contract, and the kernel error numbers shared by the allocator, the
//! virtual-memory core, and the system-call layer. It is the single source
//! of truth for values that several crates must agree on.
//!
//! ## Architecture
//!
//! ### Memory Layout ([`memory`])
//! The fixed MIPS32 virtual address map:
//! * **`kuseg`**: user space, `0x0000_0000..0x8000_0000`, translated through the TLB
//! * **`kseg0`**: kernel, direct-mapped onto physical memory at [`memory::MIPS_KSEG0`]
//! * **User stack**: [`memory::STACK_PAGES`] pages ending at [`memory::USERSTACK`]
//!
//! ```text
//! Virtual Address Space Layout (32-bit):
//!
//! 0x0000_0000 ┌─────────────────────────────────┐
//!             │  (page 0 never mapped)          │
//!             │  User segments (text, data)     │
//!             │             ...                 │
//!             │  User stack (12 pages)          │
//! USERSTACK   ├─────────────────────────────────┤ 0x8000_0000
//!             │  kseg0: paddr + 0x8000_0000     │
//!             │  (kernel code, data, frames)    │
//! 0xA000_0000 ├─────────────────────────────────┤
//!             │  kseg1, kseg2 (unused here)     │
//! 0xFFFF_FFFF └─────────────────────────────────┘
//! ```
//!
//! ### Boot Information ([`boot`])
//! The physical RAM range the platform reports after the kernel image and
//! early allocations have been placed.
//!
//! ### Error Numbers ([`errno`])
//! The numeric error codes returned to user space.
//!
//! ## Safety Guarantees
//! * **Compile-time checks**: layout constants are asserted consistent in `const` blocks.
//! * **No unsafe code**: the crate is marked `#![deny(unsafe_code)]`.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod boot;
pub mod errno;
pub mod memory;
