//! # Simulated hardware
//!
//! Host-side stand-ins for the pieces of a MIPS board the VM core touches:
//! physical RAM ([`SimRam`]), the per-core TLB ([`SoftTlb`]), and the CPU's
//! interrupt-enable bit ([`SimCpu`]). Enabled for unit tests and by the `sim`
//! feature.

use crate::tlb::{EntryHi, Tlb, TlbEntry};
use crate::{PAGE_BYTES, PhysMapper};
use alloc::alloc::{Layout, alloc_zeroed, dealloc, handle_alloc_error};
use alloc::vec::Vec;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use kernel_info::boot::RamRange;
use kernel_info::memory::NUM_TLB;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, VirtualAddress};
use kernel_sync::InterruptControl;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// A zeroed, page-aligned host buffer posing as physical memory starting at
/// `base`.
pub struct SimRam {
    base: PhysicalAddress,
    /// Requested size; the allocation itself is never smaller than a page.
    bytes: usize,
    ptr: NonNull<u8>,
    layout: Layout,
}

// Safety: the buffer is plain bytes; synchronization is the caller's job,
// exactly as with real RAM.
unsafe impl Send for SimRam {}
unsafe impl Sync for SimRam {}

impl SimRam {
    /// # Panics
    /// If `base` is not page aligned or the size does not fit 32 bits.
    #[must_use]
    pub fn new(base: PhysicalAddress, pages: usize) -> Self {
        assert!(base.is_page_aligned(), "simulated RAM must start on a page");
        let bytes = pages * PAGE_BYTES;
        assert!(
            u32::try_from(bytes)
                .ok()
                .and_then(|b| base.checked_add(b))
                .is_some(),
            "simulated RAM exceeds the 32-bit physical space"
        );

        let layout = Layout::from_size_align(bytes.max(PAGE_BYTES), PAGE_BYTES)
            .unwrap_or_else(|_| panic!("bad simulated RAM layout"));
        // SAFETY: non-zero size.
        let raw = unsafe { alloc_zeroed(layout) };
        let Some(ptr) = NonNull::new(raw) else {
            handle_alloc_error(layout);
        };
        Self {
            base,
            bytes,
            ptr,
            layout,
        }
    }

    /// The range this RAM covers, as the platform would report it at boot.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn range(&self) -> RamRange {
        RamRange::new(self.base, self.base + self.bytes as u32)
    }

    #[must_use]
    pub const fn base(&self) -> PhysicalAddress {
        self.base
    }

    fn offset_of(&self, pa: PhysicalAddress, len: usize) -> usize {
        let off = pa
            .as_u32()
            .checked_sub(self.base.as_u32())
            .unwrap_or_else(|| panic!("{pa:?} below simulated RAM")) as usize;
        assert!(
            off + len <= self.bytes,
            "{pa:?}+{len:#x} beyond simulated RAM"
        );
        off
    }

    /// Copy bytes out of simulated RAM.
    pub fn read(&self, pa: PhysicalAddress, buf: &mut [u8]) {
        let off = self.offset_of(pa, buf.len());
        // SAFETY: bounds checked above.
        unsafe {
            core::ptr::copy_nonoverlapping(self.ptr.as_ptr().add(off), buf.as_mut_ptr(), buf.len());
        }
    }

    /// Copy bytes into simulated RAM.
    pub fn write(&self, pa: PhysicalAddress, data: &[u8]) {
        let off = self.offset_of(pa, data.len());
        // SAFETY: bounds checked above.
        unsafe {
            core::ptr::copy_nonoverlapping(data.as_ptr(), self.ptr.as_ptr().add(off), data.len());
        }
    }

    /// A copy of one whole frame.
    #[must_use]
    pub fn frame_bytes(&self, frame: PhysicalPage) -> [u8; PAGE_BYTES] {
        let mut buf = [0u8; PAGE_BYTES];
        self.read(frame.base(), &mut buf);
        buf
    }
}

impl PhysMapper for SimRam {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        let off = self.offset_of(pa, size_of::<T>());
        // SAFETY: in bounds; the caller vouches for type and aliasing.
        unsafe { &mut *self.ptr.as_ptr().add(off).cast::<T>() }
    }

    unsafe fn phys_to_slice_mut<'a, T>(&self, pa: PhysicalAddress, len: usize) -> &'a mut [T] {
        let off = self.offset_of(pa, len * size_of::<T>());
        // SAFETY: in bounds; the caller vouches for type and aliasing.
        unsafe { core::slice::from_raw_parts_mut(self.ptr.as_ptr().add(off).cast::<T>(), len) }
    }
}

impl Drop for SimRam {
    fn drop(&mut self) {
        // SAFETY: allocated in `new` with this layout.
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) }
    }
}

/// The interrupt-enable bit of one simulated core.
///
/// Also counts TLB writes that happened while interrupts were enabled, which
/// is always a bug.
#[derive(Debug)]
pub struct SimCpu {
    enabled: AtomicBool,
    unguarded_writes: AtomicUsize,
}

impl Default for SimCpu {
    fn default() -> Self {
        Self::new()
    }
}

impl SimCpu {
    /// A core with interrupts enabled.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            enabled: AtomicBool::new(true),
            unguarded_writes: AtomicUsize::new(0),
        }
    }

    fn record_tlb_write(&self) {
        if self.are_enabled() {
            self.unguarded_writes.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[must_use]
    pub fn writes_with_interrupts_on(&self) -> usize {
        self.unguarded_writes.load(Ordering::Relaxed)
    }
}

impl InterruptControl for SimCpu {
    fn disable(&self) -> bool {
        self.enabled.swap(false, Ordering::AcqRel)
    }

    fn enable(&self) {
        self.enabled.store(true, Ordering::Release);
    }

    fn are_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }
}

/// A software TLB with uniform random replacement.
pub struct SoftTlb<'c> {
    slots: Vec<TlbEntry>,
    rng: SmallRng,
    cpu: &'c SimCpu,
}

impl<'c> SoftTlb<'c> {
    /// A fully invalidated 64-slot TLB attached to `cpu`.
    #[must_use]
    pub fn new(cpu: &'c SimCpu, seed: u64) -> Self {
        Self::with_slots(cpu, NUM_TLB, seed)
    }

    #[must_use]
    pub fn with_slots(cpu: &'c SimCpu, slots: usize, seed: u64) -> Self {
        Self {
            slots: (0..slots).map(TlbEntry::invalid).collect(),
            rng: SmallRng::seed_from_u64(seed),
            cpu,
        }
    }

    /// Translate like the hardware would on a memory access.
    #[must_use]
    pub fn translate(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        let slot = self.probe(EntryHi::for_page(va.page()))?;
        let entry = self.slots[slot];
        entry.is_valid().then(|| entry.lo.frame().join(va.offset()))
    }

    pub fn valid_entries(&self) -> impl Iterator<Item = &TlbEntry> {
        self.slots.iter().filter(|e| e.is_valid())
    }
}

impl Tlb for SoftTlb<'_> {
    fn slot_count(&self) -> usize {
        self.slots.len()
    }

    fn read(&self, slot: usize) -> TlbEntry {
        self.slots[slot]
    }

    fn write(&mut self, slot: usize, entry: TlbEntry) {
        self.cpu.record_tlb_write();
        self.slots[slot] = entry;
    }

    fn write_random(&mut self, entry: TlbEntry) -> usize {
        let slot = self.rng.gen_range(0..self.slots.len());
        self.write(slot, entry);
        slot
    }

    fn probe(&self, hi: EntryHi) -> Option<usize> {
        self.slots.iter().position(|e| e.hi.vpn() == hi.vpn())
    }
}
