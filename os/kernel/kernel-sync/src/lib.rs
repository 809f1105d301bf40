//! # Kernel synchronization primitives
//!
//! * [`SpinLock`]: test-and-test-and-set lock with an RAII guard; protects the
//!   frame table and the early bump allocator.
//! * [`SyncOnceCell`]: write-once cell used to publish state that becomes
//!   ready exactly once (the frame table after bootstrap, the console sink).
//! * [`IrqGuard`]: masks interrupts on the current core for a scope and
//!   restores the previous level on drop (`splhigh`/`splx`).

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod irq;
mod spin_lock;
mod sync_once_cell;

pub use irq::{InterruptControl, IrqGuard};
pub use spin_lock::{SpinLock, SpinLockGuard};
pub use sync_once_cell::SyncOnceCell;
