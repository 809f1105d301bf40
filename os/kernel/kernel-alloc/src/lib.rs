//! # Kernel Physical Memory Allocation
//!
//! This crate owns physical memory. It decides which 4 KiB frames are free,
//! hands out contiguous runs of them to address spaces and kernel code, and
//! takes them back. Everything above it (address spaces, the fault engine)
//! only sees the [`FrameAlloc`] and [`PhysMapper`] seams from `kernel-vmem`.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │            Kernel Page Allocator (kpages)           │
//! │    • FrameAlloc for every address space             │
//! │    • alloc_kpages / free_kpages in kseg0            │
//! │    • Switches from bump to frame table at boot      │
//! └──────────────┬───────────────────────┬──────────────┘
//!                │                       │
//! ┌──────────────▼─────────────┐ ┌───────▼──────────────┐
//! │   Frame Table (coremap)    │ │  Bump Allocator      │
//! │    • One slot per frame    │ │    • Early boot only │
//! │    • First-fit runs        │ │    • Never freed     │
//! │    • Checked frees         │ │                      │
//! └──────────────┬─────────────┘ └──────────────────────┘
//!                │
//! ┌──────────────▼──────────────────────────────────────┐
//! │              Physical Mapper (kseg0)                │
//! │    • paddr + 0x8000_0000, no TLB involved           │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Boot sequence
//!
//! 1. The platform reports the usable RAM range `[first, last)`.
//! 2. [`KernelPageAllocator::new`] wraps it; early allocations bump a pointer
//!    through it ([`bump`]).
//! 3. [`KernelPageAllocator::bootstrap`] hands the untouched rest to the
//!    [`frame_table`], which stores its slot array in the first page(s) of
//!    that rest and manages every whole page after it.
//!
//! ```text
//!   first                                                        last
//!   │ kernel/bump │ slots[] │ frame 0 │ frame 1 │ ... │ frame N-1 │
//!                 ▲         ▲
//!                 │         page boundary after the slot array
//!                 handed over at bootstrap
//! ```
//!
//! ## Concurrency
//!
//! The bump allocator and the frame table each sit behind their own
//! [`SpinLock`](kernel_sync::SpinLock). The "frame table ready" switch is a
//! [`SyncOnceCell`](kernel_sync::SyncOnceCell), so a caller checks it once and
//! then takes exactly one of the two locks.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use kernel_alloc::KernelPageAllocator;
//! use kernel_alloc::phys_mapper::Kseg0PhysMapper;
//! use kernel_info::boot::RamRange;
//! use kernel_memory_addresses::PhysicalAddress;
//! use kernel_vmem::FrameAlloc;
//!
//! let ram = RamRange::new(PhysicalAddress::new(0x0004_0000), PhysicalAddress::new(0x0080_0000));
//! // SAFETY: the platform reported this range as unused RAM.
//! let pages = unsafe { KernelPageAllocator::new(Kseg0PhysMapper, ram) };
//! let early = pages.alloc_frame().unwrap();
//! pages.bootstrap().unwrap();
//! let kva = pages.alloc_kpages(2).unwrap();
//! pages.free_kpages(kva).unwrap();
//! # let _ = early;
//! ```

#![cfg_attr(not(test), no_std)]
#![allow(unsafe_code)]

pub mod bump;
pub mod frame_table;
pub mod kpages;
pub mod phys_mapper;

pub use crate::frame_table::{FrameSlot, FrameTable};
pub use crate::kpages::KernelPageAllocator;
pub use kernel_vmem::{FrameAlloc, FrameAllocError};
