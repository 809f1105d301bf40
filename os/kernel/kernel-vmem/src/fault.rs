//! # TLB refill
//!
//! Entry point for every TLB miss raised by user code. One pass, no retries:
//!
//! 1. Decode the fault kind; read-only faults cannot happen because every
//!    page is mapped writable, so they are refused.
//! 2. Without a current address space (early boot, kernel threads) fail with
//!    [`FaultError::NoAddressSpace`] instead of faulting forever.
//! 3. Assert the address space is fully set up.
//! 4. Classify the page: segment 1, segment 2, stack, or unmapped.
//! 5. Look up its frame.
//! 6. With interrupts off, write the entry into the first invalid slot, or a
//!    random one if the TLB is full.
//!
//! After [`complete_load`](AddressSpace::complete_load), segment 1 (text) is
//! installed without the dirty bit. Nothing re-faults on the resulting
//! read-only exception, so this is advisory only.

use crate::address_space::{AddressSpace, Region};
use crate::tlb::{EntryHi, EntryLo, Tlb, TlbEntry};
use kernel_info::errno::{EFAULT, EINVAL, Errno};
use kernel_memory_addresses::VirtualAddress;
use kernel_sync::{InterruptControl, IrqGuard};
use log::debug;

/// What the access that missed was trying to do.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u32)]
pub enum FaultKind {
    /// TLB miss on a load.
    Read = 0,
    /// TLB miss on a store.
    Write = 1,
    /// Store to a page whose entry lacks the dirty bit.
    ReadOnly = 2,
}

impl TryFrom<u32> for FaultKind {
    type Error = FaultError;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Self::Read),
            1 => Ok(Self::Write),
            2 => Ok(Self::ReadOnly),
            other => Err(FaultError::InvalidArgument(other)),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FaultError {
    #[error("unknown fault code {0}")]
    InvalidArgument(u32),
    #[error("no address space to fault into")]
    NoAddressSpace,
    #[error("address {0} is outside every region")]
    OutOfRange(VirtualAddress),
    #[error("write to read-only page at {0}")]
    ReadOnly(VirtualAddress),
}

impl FaultError {
    /// Errno handed back to the trap dispatcher.
    #[must_use]
    pub const fn errno(&self) -> Errno {
        match self {
            Self::InvalidArgument(_) => EINVAL,
            Self::NoAddressSpace | Self::OutOfRange(_) | Self::ReadOnly(_) => EFAULT,
        }
    }
}

/// The translation a successful fault installed.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Installed {
    pub slot: usize,
    pub entry: TlbEntry,
    pub region: Region,
}

/// Handle a TLB miss at `addr` in `space`, the current process's address
/// space (if any).
///
/// # Errors
/// See [`FaultError`]. On error the TLB is left untouched.
///
/// # Panics
/// If `space` is not fully set up; see [`AddressSpace::assert_well_formed`].
pub fn vm_fault<T, I>(
    kind: FaultKind,
    addr: VirtualAddress,
    space: Option<&AddressSpace>,
    tlb: &mut T,
    irq: &I,
) -> Result<Installed, FaultError>
where
    T: Tlb + ?Sized,
    I: InterruptControl + ?Sized,
{
    let page = addr.page();
    debug!("vm: fault: {}", page.base());

    match kind {
        FaultKind::ReadOnly => return Err(FaultError::ReadOnly(addr)),
        FaultKind::Read | FaultKind::Write => {}
    }

    let space = space.ok_or(FaultError::NoAddressSpace)?;
    space.assert_well_formed();

    let region = space.classify(page.base());
    let frame = space
        .frame_for(region, page)
        .ok_or(FaultError::OutOfRange(addr))?;

    let mut lo = EntryLo::for_frame(frame);
    if space.is_load_complete() && region == Region::Segment1 {
        lo.set_dirty(false);
    }
    let entry = TlbEntry::new(EntryHi::for_page(page), lo);

    let _irq = IrqGuard::new(irq);
    let slot = match (0..tlb.slot_count()).find(|&s| !tlb.read(s).is_valid()) {
        Some(slot) => {
            tlb.write(slot, entry);
            slot
        }
        None => tlb.write_random(entry),
    };
    debug!("vm: {} -> {}", page.base(), frame.base());

    Ok(Installed {
        slot,
        entry,
        region,
    })
}

/// [`vm_fault`] with the raw fault code and address from the trap frame.
///
/// # Errors
/// [`FaultError::InvalidArgument`] for an unknown code, otherwise as for
/// [`vm_fault`].
pub fn vm_fault_raw<T, I>(
    code: u32,
    addr: u32,
    space: Option<&AddressSpace>,
    tlb: &mut T,
    irq: &I,
) -> Result<Installed, FaultError>
where
    T: Tlb + ?Sized,
    I: InterruptControl + ?Sized,
{
    vm_fault(FaultKind::try_from(code)?, VirtualAddress::new(addr), space, tlb, irq)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address_space::Protection;
    use crate::sim::{SimCpu, SimRam, SoftTlb};
    use crate::testing::PoolAlloc;
    use kernel_info::memory::{USERSTACK, USERSTACK_BASE};
    use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress};

    struct Fixture {
        ram: SimRam,
        pool: PoolAlloc,
        cpu: SimCpu,
    }

    impl Fixture {
        fn new() -> Self {
            let ram = SimRam::new(PhysicalAddress::new(0x0010_0000), 64);
            let pool = PoolAlloc::new(&ram, 64);
            Self {
                ram,
                pool,
                cpu: SimCpu::new(),
            }
        }

        fn space(&self) -> AddressSpace {
            let rw = Protection::rwx(true, true, false);
            let mut a = AddressSpace::create();
            a.define_region(VirtualAddress::new(0x0040_0000), 2 * PAGE_SIZE, rw)
                .unwrap();
            a.define_region(VirtualAddress::new(0x0050_0000), 3 * PAGE_SIZE, rw)
                .unwrap();
            a.prepare_load(&self.pool, &self.ram).unwrap();
            a
        }
    }

    #[test]
    fn every_mapped_page_translates_to_its_frame() {
        let fx = Fixture::new();
        let space = fx.space();
        let mut tlb = SoftTlb::new(&fx.cpu, 1);

        let segments = [space.segment1().unwrap(), space.segment2().unwrap()];
        for seg in segments {
            for (i, &frame) in seg.frames().iter().enumerate() {
                let page = seg.base().checked_add_pages(u32::try_from(i).unwrap()).unwrap();
                let got = vm_fault(FaultKind::Read, page.base(), Some(&space), &mut tlb, &fx.cpu)
                    .unwrap();
                assert_eq!(got.entry.lo.frame(), frame);
                assert_eq!(got.entry.hi.page(), page);
                assert!(got.entry.lo.valid() && got.entry.lo.dirty());
                assert_eq!(tlb.read(got.slot), got.entry);
            }
        }

        let top = VirtualAddress::new(USERSTACK - 4);
        let got = vm_fault(FaultKind::Write, top, Some(&space), &mut tlb, &fx.cpu).unwrap();
        assert_eq!(got.region, Region::Stack);
        assert_eq!(got.entry.lo.frame(), *space.stack_frames().last().unwrap());

        assert!(fx.cpu.are_enabled());
        assert_eq!(fx.cpu.writes_with_interrupts_on(), 0);
        space.destroy(&fx.pool);
    }

    #[test]
    fn two_regions_scenario() {
        let fx = Fixture::new();
        let space = fx.space();
        let mut tlb = SoftTlb::new(&fx.cpu, 2);

        let a = vm_fault(
            FaultKind::Read,
            VirtualAddress::new(0x0040_0000),
            Some(&space),
            &mut tlb,
            &fx.cpu,
        )
        .unwrap();
        let b = vm_fault(
            FaultKind::Read,
            VirtualAddress::new(0x0040_1000),
            Some(&space),
            &mut tlb,
            &fx.cpu,
        )
        .unwrap();
        assert_ne!(a.entry.lo.frame(), b.entry.lo.frame());
        assert_ne!(a.slot, b.slot);
        assert_eq!(
            tlb.translate(VirtualAddress::new(0x0040_1004)),
            Some(b.entry.lo.frame().base() + 4)
        );

        let past = VirtualAddress::new(0x0040_2000);
        assert_eq!(
            vm_fault(FaultKind::Read, past, Some(&space), &mut tlb, &fx.cpu),
            Err(FaultError::OutOfRange(past))
        );
        space.destroy(&fx.pool);
    }

    #[test]
    fn out_of_range_installs_nothing() {
        let fx = Fixture::new();
        let space = fx.space();
        let mut tlb = SoftTlb::new(&fx.cpu, 3);

        for addr in [0, 0x1000, 0x0045_0000, USERSTACK_BASE - 1, USERSTACK, 0xFFFF_F000] {
            let err = vm_fault(
                FaultKind::Write,
                VirtualAddress::new(addr),
                Some(&space),
                &mut tlb,
                &fx.cpu,
            )
            .unwrap_err();
            assert_eq!(err.errno(), EFAULT);
        }
        assert_eq!(tlb.valid_entries().count(), 0);
        space.destroy(&fx.pool);
    }

    #[test]
    fn fault_kinds() {
        let fx = Fixture::new();
        let space = fx.space();
        let mut tlb = SoftTlb::new(&fx.cpu, 4);
        let va = VirtualAddress::new(0x0050_0000);

        assert_eq!(
            vm_fault_raw(7, va.as_u32(), Some(&space), &mut tlb, &fx.cpu),
            Err(FaultError::InvalidArgument(7))
        );
        assert_eq!(FaultError::InvalidArgument(7).errno(), EINVAL);
        assert_eq!(
            vm_fault_raw(2, va.as_u32(), Some(&space), &mut tlb, &fx.cpu),
            Err(FaultError::ReadOnly(va))
        );
        assert!(vm_fault_raw(0, va.as_u32(), Some(&space), &mut tlb, &fx.cpu).is_ok());
        assert!(vm_fault_raw(1, va.as_u32(), Some(&space), &mut tlb, &fx.cpu).is_ok());
        space.destroy(&fx.pool);
    }

    #[test]
    fn no_address_space() {
        let cpu = SimCpu::new();
        let mut tlb = SoftTlb::new(&cpu, 5);
        assert_eq!(
            vm_fault(FaultKind::Read, VirtualAddress::new(0x0040_0000), None, &mut tlb, &cpu),
            Err(FaultError::NoAddressSpace)
        );
        assert_eq!(tlb.valid_entries().count(), 0);
    }

    #[test]
    fn text_is_clean_after_load() {
        let fx = Fixture::new();
        let mut space = fx.space();
        let mut tlb = SoftTlb::new(&fx.cpu, 6);
        let text = VirtualAddress::new(0x0040_0000);
        let data = VirtualAddress::new(0x0050_0000);

        let before = vm_fault(FaultKind::Read, text, Some(&space), &mut tlb, &fx.cpu).unwrap();
        assert!(before.entry.lo.dirty());

        space.complete_load();
        let after = vm_fault(FaultKind::Read, text, Some(&space), &mut tlb, &fx.cpu).unwrap();
        assert!(!after.entry.lo.dirty());
        let other = vm_fault(FaultKind::Read, data, Some(&space), &mut tlb, &fx.cpu).unwrap();
        assert!(other.entry.lo.dirty());
        space.destroy(&fx.pool);
    }

    #[test]
    fn full_tlb_uses_random_replacement() {
        let fx = Fixture::new();
        let space = fx.space();
        let mut tlb = SoftTlb::with_slots(&fx.cpu, 4, 7);

        let pages = [0x0040_0000, 0x0040_1000, 0x0050_0000, 0x0050_1000];
        for (i, &p) in pages.iter().enumerate() {
            let got = vm_fault(
                FaultKind::Read,
                VirtualAddress::new(p),
                Some(&space),
                &mut tlb,
                &fx.cpu,
            )
            .unwrap();
            assert_eq!(got.slot, i, "free slots are used first");
        }

        let extra = vm_fault(
            FaultKind::Read,
            VirtualAddress::new(0x0050_2000),
            Some(&space),
            &mut tlb,
            &fx.cpu,
        )
        .unwrap();
        assert!(extra.slot < 4);
        assert_eq!(tlb.read(extra.slot), extra.entry);
        assert_eq!(tlb.valid_entries().count(), 4);
        assert_eq!(fx.cpu.writes_with_interrupts_on(), 0);
        space.destroy(&fx.pool);
    }

    #[test]
    fn activate_flushes_previous_translations() {
        let fx = Fixture::new();
        let space = fx.space();
        let mut tlb = SoftTlb::new(&fx.cpu, 8);
        vm_fault(FaultKind::Read, VirtualAddress::new(0x0040_0000), Some(&space), &mut tlb, &fx.cpu)
            .unwrap();
        assert_eq!(tlb.valid_entries().count(), 1);

        space.activate(&mut tlb, &fx.cpu);
        assert_eq!(tlb.valid_entries().count(), 0);
        space.deactivate();
        space.destroy(&fx.pool);
    }

    #[test]
    #[should_panic(expected = "no backing frames")]
    fn unprepared_space_is_fatal() {
        let cpu = SimCpu::new();
        let mut tlb = SoftTlb::new(&cpu, 9);
        let rw = Protection::rwx(true, true, false);
        let mut space = AddressSpace::create();
        space.define_region(VirtualAddress::new(0x0040_0000), PAGE_SIZE, rw).unwrap();
        space.define_region(VirtualAddress::new(0x0050_0000), PAGE_SIZE, rw).unwrap();
        let _ = vm_fault(
            FaultKind::Read,
            VirtualAddress::new(0x0040_0000),
            Some(&space),
            &mut tlb,
            &cpu,
        );
    }
}
