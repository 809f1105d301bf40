//! # Kernel Boot Information

use core::fmt;
use kernel_memory_addresses::PhysicalAddress;

/// The usable physical RAM range `[first, last)` reported by the platform.
///
/// `first` is the lowest address not occupied by the kernel image; `last` is
/// one past the end of RAM. Neither bound is required to be page aligned.
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct RamRange {
    pub first: PhysicalAddress,
    pub last: PhysicalAddress,
}

impl RamRange {
    #[must_use]
    pub const fn new(first: PhysicalAddress, last: PhysicalAddress) -> Self {
        Self { first, last }
    }

    /// Size of the range in bytes, `0` if it is empty or inverted.
    #[must_use]
    pub const fn len(&self) -> u32 {
        self.last.as_u32().saturating_sub(self.first.as_u32())
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for RamRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RamRange({:?}..{:?})", self.first, self.last)
    }
}
