//! # Kernel page allocator
//!
//! The single [`FrameAlloc`] the kernel hands to every address space. Before
//! [`bootstrap`](KernelPageAllocator::bootstrap) requests are served by the
//! bump allocator; afterwards by the frame table. Each path has its own lock
//! and a call only ever takes one of them.
//!
//! ```text
//!   alloc_frames(n)
//!        │
//!        ├── frame table ready? ──yes──► SpinLock<FrameTable>   first fit
//!        │
//!        └── no ───────────────────────► SpinLock<StealMem>     bump, never freed
//! ```

use crate::bump::StealMem;
use crate::frame_table::FrameTable;
use crate::phys_mapper::{kvaddr_to_paddr, paddr_to_kvaddr};
use core::fmt;
use kernel_info::boot::RamRange;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, VirtualAddress};
use kernel_sync::{SpinLock, SyncOnceCell};
use kernel_vmem::{FrameAlloc, FrameAllocError, PhysMapper};
use log::error;

pub struct KernelPageAllocator<'m, M: PhysMapper> {
    mapper: M,
    early: SpinLock<StealMem>,
    coremap: SyncOnceCell<SpinLock<FrameTable<'m>>>,
}

impl<'m, M: PhysMapper> KernelPageAllocator<'m, M> {
    /// An allocator over the boot RAM range, serving early requests from the
    /// bump allocator until [`bootstrap`](Self::bootstrap).
    ///
    /// # Safety
    /// `range` must be RAM that nothing else uses for `'m`, reachable through
    /// `mapper`.
    #[must_use]
    pub const unsafe fn new(mapper: M, range: RamRange) -> Self {
        Self {
            mapper,
            early: SpinLock::new(StealMem::new(range)),
            coremap: SyncOnceCell::new(),
        }
    }

    /// Build the frame table over whatever the bump allocator has not handed
    /// out and switch every later request over to it.
    ///
    /// # Errors
    /// [`FrameAllocError::NoUsableMemory`] if nothing is left to manage,
    /// including on a second call.
    ///
    /// A failed bootstrap leaves the bump allocator in charge.
    pub fn bootstrap(&self) -> Result<(), FrameAllocError> {
        let mut early = self.early.lock();
        if early.is_handed_over() {
            return Err(FrameAllocError::NoUsableMemory);
        }

        // SAFETY: `new` made the caller vouch for the range, and the bump
        // allocator gives up the rest below before anyone else can steal it.
        let table = unsafe { FrameTable::bootstrap(early.remaining(), &self.mapper) }?;
        early.take_remaining();
        self.coremap
            .set(SpinLock::new(table))
            .map_err(|_| FrameAllocError::NoUsableMemory)
    }

    /// Whether the frame table serves requests.
    #[inline]
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.coremap.is_initialized()
    }

    #[inline]
    #[must_use]
    pub const fn mapper(&self) -> &M {
        &self.mapper
    }

    /// Free frames in the table; `0` before bootstrap.
    #[must_use]
    pub fn free_count(&self) -> usize {
        self.with_frame_table(|t| t.free_count()).unwrap_or(0)
    }

    /// Frames under management; `0` before bootstrap.
    #[must_use]
    pub fn total_frames(&self) -> usize {
        self.with_frame_table(|t| t.total_frames()).unwrap_or(0)
    }

    /// Run `f` on the frame table under its lock, if it exists.
    pub fn with_frame_table<R>(&self, f: impl FnOnce(&mut FrameTable<'m>) -> R) -> Option<R> {
        self.coremap.get().map(|table| table.with_lock(f))
    }

    /// Allocate `count` contiguous pages and return their `kseg0` address.
    ///
    /// # Errors
    /// As for [`FrameAlloc::alloc_frames`].
    pub fn alloc_kpages(&self, count: usize) -> Result<VirtualAddress, FrameAllocError> {
        self.alloc_frames(count)
            .map(|first| paddr_to_kvaddr(first.base()))
    }

    /// Free the run whose `kseg0` address is `va`.
    ///
    /// # Errors
    /// [`FrameAllocError::Unmanaged`] for addresses outside `kseg0` or not
    /// page aligned, otherwise as for [`FrameAlloc::free_frames`].
    pub fn free_kpages(&self, va: VirtualAddress) -> Result<(), FrameAllocError> {
        let Some(pa) = kvaddr_to_paddr(va) else {
            error!("vm: free_kpages of {va} outside kseg0");
            return Err(FrameAllocError::Unmanaged(PhysicalAddress::new(va.as_u32())));
        };
        let first = PhysicalPage::try_from(pa).map_err(|_| {
            error!("vm: free_kpages of unaligned {va}");
            FrameAllocError::Unmanaged(pa)
        })?;
        self.free_frames(first)
    }
}

impl<M: PhysMapper> FrameAlloc for KernelPageAllocator<'_, M> {
    fn alloc_frames(&self, count: usize) -> Result<PhysicalPage, FrameAllocError> {
        match self.coremap.get() {
            Some(table) => table.lock().alloc(count),
            None => {
                let mut early = self.early.lock();
                if !early.is_handed_over() {
                    return early.steal(count);
                }
                drop(early);
                // Lost a race with bootstrap; the table is set by now.
                self.coremap
                    .get()
                    .ok_or(FrameAllocError::NoUsableMemory)?
                    .lock()
                    .alloc(count)
            }
        }
    }

    fn free_frames(&self, first: PhysicalPage) -> Result<(), FrameAllocError> {
        let Some(table) = self.coremap.get() else {
            error!("vm: free of early frame {} before bootstrap", first.base());
            return Err(FrameAllocError::Unmanaged(first.base()));
        };
        table.lock().free(first).map(|_| ())
    }
}

impl<M: PhysMapper> fmt::Debug for KernelPageAllocator<'_, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelPageAllocator")
            .field("ready", &self.is_ready())
            .field("free", &self.free_count())
            .field("total", &self.total_frames())
            .finish_non_exhaustive()
    }
}
