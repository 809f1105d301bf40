use kernel_alloc::KernelPageAllocator;
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress, VirtualAddress};
use kernel_vmem::sim::{SimCpu, SimRam, SoftTlb};
use kernel_vmem::{
    AddressSpace, AddressSpaceError, FaultError, FaultKind, Protection, Region, vm_fault,
};

const TEXT: u32 = 0x0040_0000;
const DATA: u32 = 0x0050_0000;

fn boot(ram: &SimRam) -> KernelPageAllocator<'_, &SimRam> {
    // SAFETY: the simulated RAM belongs to this test alone.
    let pages = unsafe { KernelPageAllocator::new(ram, ram.range()) };
    pages.bootstrap().unwrap();
    pages
}

fn loaded(
    pages: &KernelPageAllocator<'_, &SimRam>,
    ram: &SimRam,
    text: u32,
    data: u32,
) -> AddressSpace {
    let mut space = AddressSpace::create();
    space
        .define_region(
            VirtualAddress::new(TEXT),
            text * PAGE_SIZE,
            Protection::rwx(true, false, true),
        )
        .unwrap();
    space
        .define_region(
            VirtualAddress::new(DATA),
            data * PAGE_SIZE,
            Protection::rwx(true, true, false),
        )
        .unwrap();
    space.prepare_load(pages, ram).unwrap();
    space
}

fn poke(ram: &SimRam, space: &AddressSpace, va: u32, bytes: &[u8]) {
    let pa = space.translate(VirtualAddress::new(va)).unwrap();
    ram.write(pa, bytes);
}

fn peek(ram: &SimRam, space: &AddressSpace, va: u32, len: usize) -> Vec<u8> {
    let pa = space.translate(VirtualAddress::new(va)).unwrap();
    let mut buf = vec![0; len];
    ram.read(pa, &mut buf);
    buf
}

#[test]
fn two_regions_fault_to_distinct_frames() {
    let ram = SimRam::new(PhysicalAddress::zero(), 128);
    let pages = boot(&ram);
    let space = loaded(&pages, &ram, 2, 3);
    let cpu = SimCpu::new();
    let mut tlb = SoftTlb::new(&cpu, 7);

    let first = vm_fault(
        FaultKind::Read,
        VirtualAddress::new(TEXT),
        Some(&space),
        &mut tlb,
        &cpu,
    )
    .unwrap();
    let second = vm_fault(
        FaultKind::Read,
        VirtualAddress::new(TEXT + PAGE_SIZE),
        Some(&space),
        &mut tlb,
        &cpu,
    )
    .unwrap();
    assert_eq!(first.region, Region::Segment1);
    assert_ne!(first.entry.lo.frame(), second.entry.lo.frame());
    for frame in [first.entry.lo.frame(), second.entry.lo.frame()] {
        let run = pages.with_frame_table(|t| t.frame_index(frame.base())).flatten();
        let index = run.unwrap();
        assert_eq!(pages.with_frame_table(|t| t.run_position(index)), Some(1));
    }

    let past = VirtualAddress::new(TEXT + 2 * PAGE_SIZE);
    assert_eq!(
        vm_fault(FaultKind::Read, past, Some(&space), &mut tlb, &cpu).map(|i| i.slot),
        Err(FaultError::OutOfRange(past))
    );
    assert_eq!(tlb.valid_entries().count(), 2);
    assert_eq!(cpu.writes_with_interrupts_on(), 0);

    space.destroy(&pages);
}

#[test]
fn every_page_translates_to_its_backing_frame() {
    let ram = SimRam::new(PhysicalAddress::zero(), 128);
    let pages = boot(&ram);
    let space = loaded(&pages, &ram, 4, 6);
    let cpu = SimCpu::new();
    let mut tlb = SoftTlb::new(&cpu, 11);

    for segment in [space.segment1().unwrap(), space.segment2().unwrap()] {
        for (i, &frame) in segment.frames().iter().enumerate() {
            let va = segment.base().base() + u32::try_from(i).unwrap() * PAGE_SIZE;
            let installed = vm_fault(FaultKind::Write, va, Some(&space), &mut tlb, &cpu).unwrap();
            assert_eq!(installed.entry.lo.frame(), frame);
            assert_eq!(tlb.translate(va + 0x123), Some(frame.base() + 0x123));
        }
    }

    let top = VirtualAddress::new(0x7fff_fffc);
    let installed = vm_fault(FaultKind::Write, top, Some(&space), &mut tlb, &cpu).unwrap();
    assert_eq!(installed.region, Region::Stack);
    assert_eq!(space.stack_frames().last().copied(), Some(installed.entry.lo.frame()));

    space.destroy(&pages);
}

#[test]
fn destroy_returns_every_frame() {
    let ram = SimRam::new(PhysicalAddress::zero(), 128);
    let pages = boot(&ram);
    let before = pages.free_count();

    let space = loaded(&pages, &ram, 3, 5);
    assert_eq!(space.frame_count(), 3 + 5 + 12);
    assert_eq!(pages.free_count(), before - space.frame_count());

    space.destroy(&pages);
    assert_eq!(pages.free_count(), before);
}

#[test]
fn failed_prepare_gives_back_partial_allocations() {
    // 24 frames cannot back 4 + 10 + 12 pages.
    let ram = SimRam::new(PhysicalAddress::zero(), 25);
    let pages = boot(&ram);
    assert_eq!(pages.total_frames(), 24);

    let mut space = AddressSpace::create();
    space
        .define_region(VirtualAddress::new(TEXT), 4 * PAGE_SIZE, Protection::rwx(true, false, true))
        .unwrap();
    space
        .define_region(
            VirtualAddress::new(DATA),
            10 * PAGE_SIZE,
            Protection::rwx(true, true, false),
        )
        .unwrap();
    assert_eq!(
        space.prepare_load(&pages, &ram),
        Err(AddressSpaceError::OutOfMemory)
    );
    assert_eq!(pages.free_count(), 24);
    assert!(!space.is_prepared());
    space.destroy(&pages);
}

#[test]
fn copy_is_faithful_and_independent() {
    let ram = SimRam::new(PhysicalAddress::zero(), 128);
    let pages = boot(&ram);
    let mut parent = loaded(&pages, &ram, 2, 2);
    poke(&ram, &parent, TEXT + 0x10, b"\x3c\x1c\x10\x00");
    poke(&ram, &parent, DATA + PAGE_SIZE + 8, b"counter=1");
    poke(&ram, &parent, 0x7fff_fff0, b"stack");
    parent.complete_load();

    let child = parent.copy(&pages, &ram).unwrap();
    assert!(child.is_load_complete());
    assert_eq!(child.frame_count(), parent.frame_count());
    assert_eq!(pages.free_count(), pages.total_frames() - 2 * parent.frame_count());

    for (c, p) in child.frames().zip(parent.frames()) {
        assert_ne!(c, p);
        assert_eq!(ram.frame_bytes(c), ram.frame_bytes(p));
    }
    let (cs, ps) = (child.segment2().unwrap(), parent.segment2().unwrap());
    assert_eq!((cs.base(), cs.page_count()), (ps.base(), ps.page_count()));

    poke(&ram, &parent, DATA + PAGE_SIZE + 8, b"counter=2");
    assert_eq!(peek(&ram, &child, DATA + PAGE_SIZE + 8, 9), b"counter=1");
    assert_eq!(peek(&ram, &parent, DATA + PAGE_SIZE + 8, 9), b"counter=2");

    child.destroy(&pages);
    parent.destroy(&pages);
    assert_eq!(pages.free_count(), pages.total_frames());
}

#[test]
fn argv_lands_on_the_new_stack() {
    let ram = SimRam::new(PhysicalAddress::zero(), 64);
    let pages = boot(&ram);
    let space = loaded(&pages, &ram, 1, 1);

    let sp = space.define_stack_in(&ram, &[c"/bin/sh", c"-c", c"true"]).unwrap();
    let table = peek(&ram, &space, sp.as_u32(), 16);
    let words: Vec<u32> = table
        .chunks_exact(4)
        .map(|w| u32::from_ne_bytes(w.try_into().unwrap()))
        .collect();
    assert_eq!(words[3], 0);
    assert_eq!(peek(&ram, &space, words[0], 8), b"/bin/sh\0");
    assert_eq!(peek(&ram, &space, words[1], 3), b"-c\0");
    assert_eq!(peek(&ram, &space, words[2], 5), b"true\0");
    assert!(words[..3].iter().all(|&p| p > sp.as_u32() && p % 8 == 0));

    space.destroy(&pages);
}
