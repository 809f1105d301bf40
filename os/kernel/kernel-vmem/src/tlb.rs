//! # MIPS32 TLB entries
//!
//! Each TLB slot is a pair of CP0 registers:
//!
//! | Register  | Bits    | Field      | Meaning |
//! |-----------|---------|------------|---------|
//! | `EntryHi` | 31 ‒ 12 | `VPN`      | Virtual page number (the tag) |
//! |           | 11 ‒ 6  | `PID`      | Address-space id (unused, always 0) |
//! | `EntryLo` | 31 ‒ 12 | `PFN`      | Physical frame number |
//! |           | 11      | `N`        | Uncached |
//! |           | 10      | `D`        | Dirty, i.e. writes allowed |
//! |           | 9       | `V`        | Valid |
//! |           | 8       | `G`        | Global, ignore PID |
//!
//! The TLB is per-core hardware state. Mutations are a register sequence and
//! must run with interrupts disabled; see [`kernel_sync::IrqGuard`].

use bitfield_struct::bitfield;
use core::fmt;
use kernel_memory_addresses::{PhysicalPage, VirtualPage};
use kernel_sync::{InterruptControl, IrqGuard};

/// VPN used for invalid slot `0`; slot `i` gets `INVALID_VPN_BASE + i`.
/// These pages lie in `kseg0`, which never goes through the TLB.
const INVALID_VPN_BASE: u32 = 0x8_0000;

#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct EntryHi {
    #[bits(6)]
    __: u8,
    /// Address-space id.
    #[bits(6)]
    pub pid: u8,
    /// Virtual page number (`vaddr >> 12`).
    #[bits(20)]
    pub vpn: u32,
}

impl EntryHi {
    #[inline]
    #[must_use]
    pub const fn for_page(page: VirtualPage) -> Self {
        Self::new().with_vpn(page.number())
    }

    #[inline]
    #[must_use]
    pub const fn page(self) -> VirtualPage {
        VirtualPage::from_number(self.vpn())
    }
}

#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct EntryLo {
    #[bits(8)]
    __: u8,
    /// Ignore the PID when matching.
    pub global: bool,
    /// The entry translates; clear means the slot is free.
    pub valid: bool,
    /// Writes are permitted.
    pub dirty: bool,
    /// Bypass the cache.
    pub no_cache: bool,
    /// Physical frame number (`paddr >> 12`).
    #[bits(20)]
    pub pfn: u32,
}

impl EntryLo {
    /// A valid, writable mapping onto `frame`.
    #[inline]
    #[must_use]
    pub const fn for_frame(frame: PhysicalPage) -> Self {
        Self::new()
            .with_pfn(frame.number())
            .with_valid(true)
            .with_dirty(true)
    }

    #[inline]
    #[must_use]
    pub const fn frame(self) -> PhysicalPage {
        PhysicalPage::from_number(self.pfn())
    }
}

/// One TLB slot's worth of state.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct TlbEntry {
    pub hi: EntryHi,
    pub lo: EntryLo,
}

impl TlbEntry {
    #[inline]
    #[must_use]
    pub const fn new(hi: EntryHi, lo: EntryLo) -> Self {
        Self { hi, lo }
    }

    /// The invalid entry for `slot`. Every slot gets a distinct tag so the
    /// hardware never sees two matching entries.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn invalid(slot: usize) -> Self {
        Self {
            hi: EntryHi::new().with_vpn(INVALID_VPN_BASE + slot as u32),
            lo: EntryLo::new(),
        }
    }

    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.lo.valid()
    }
}

impl fmt::Debug for TlbEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(
                f,
                "TlbEntry({:?} -> {:?}{})",
                self.hi.page(),
                self.lo.frame(),
                if self.lo.dirty() { ", D" } else { "" }
            )
        } else {
            f.write_str("TlbEntry(invalid)")
        }
    }
}

/// The per-core TLB (`tlbr`, `tlbwi`, `tlbwr`, `tlbp`).
///
/// Callers must hold an [`IrqGuard`] across any read-modify-write sequence.
pub trait Tlb {
    /// Number of slots (64 on the R3000).
    fn slot_count(&self) -> usize;

    /// Read slot `slot` (`tlbr`).
    fn read(&self, slot: usize) -> TlbEntry;

    /// Overwrite slot `slot` (`tlbwi`).
    fn write(&mut self, slot: usize, entry: TlbEntry);

    /// Overwrite a slot chosen by the hardware (`tlbwr`); returns the slot.
    fn write_random(&mut self, entry: TlbEntry) -> usize;

    /// Find the slot whose tag matches `hi` (`tlbp`).
    fn probe(&self, hi: EntryHi) -> Option<usize>;
}

/// Invalidate every slot of `tlb` with interrupts disabled.
pub fn invalidate_all<T, I>(tlb: &mut T, irq: &I)
where
    T: Tlb + ?Sized,
    I: InterruptControl + ?Sized,
{
    let _irq = IrqGuard::new(irq);
    for slot in 0..tlb.slot_count() {
        tlb.write(slot, TlbEntry::invalid(slot));
    }
}

/// A request to drop one translation on another core.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TlbShootdown {
    pub page: VirtualPage,
}

/// Cross-core TLB invalidation is not supported.
///
/// # Panics
/// Always; frames never change under a live mapping in this kernel, so any
/// request means an earlier bug.
pub fn tlb_shootdown_all() -> ! {
    panic!("vm: tried to do tlb shootdown?!");
}

/// Cross-core TLB invalidation is not supported.
///
/// # Panics
/// Always; see [`tlb_shootdown_all`].
pub fn tlb_shootdown(ts: &TlbShootdown) -> ! {
    panic!("vm: tried to do tlb shootdown of {:?}?!", ts.page);
}
