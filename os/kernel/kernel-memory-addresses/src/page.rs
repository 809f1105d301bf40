use crate::{
    MemoryAddress, PAGE_FRAME, PAGE_SHIFT, PageOffset, PhysicalAddress, VirtualAddress,
};
use core::fmt;

/// The base of a 4 KiB page (address with the offset bits cleared).
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct MemoryPage(MemoryAddress);

impl MemoryPage {
    #[inline]
    #[must_use]
    pub const fn containing(addr: MemoryAddress) -> Self {
        Self(MemoryAddress::new(addr.as_u32() & PAGE_FRAME))
    }

    /// Build from a page number (`address >> PAGE_SHIFT`).
    #[inline]
    #[must_use]
    pub const fn from_number(number: u32) -> Self {
        Self(MemoryAddress::new(number << PAGE_SHIFT))
    }

    #[inline]
    #[must_use]
    pub const fn base(self) -> MemoryAddress {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn number(self) -> u32 {
        self.0.as_u32() >> PAGE_SHIFT
    }

    #[inline]
    #[must_use]
    pub const fn join(self, offset: PageOffset) -> MemoryAddress {
        MemoryAddress::new(self.0.as_u32() | offset.as_u32())
    }

    /// The page `n` pages above this one, if it exists.
    #[inline]
    #[must_use]
    pub const fn checked_add_pages(self, n: u32) -> Option<Self> {
        match self.number().checked_add(n) {
            Some(num) if num <= (u32::MAX >> PAGE_SHIFT) => Some(Self::from_number(num)),
            _ => None,
        }
    }

    /// Distance in pages from `base` up to `self`, or `None` if `self < base`.
    #[inline]
    #[must_use]
    pub const fn pages_since(self, base: Self) -> Option<u32> {
        self.number().checked_sub(base.number())
    }
}

impl fmt::Debug for MemoryPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Page(0x{:08X})", self.0.as_u32())
    }
}

/// Error returned when converting an unaligned address into a page.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct UnalignedAddress(pub u32);

impl fmt::Display for UnalignedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "address 0x{:08X} is not page aligned", self.0)
    }
}

macro_rules! typed_page {
    ($(#[$meta:meta])* $name:ident, $addr:ident, $tag:literal) => {
        $(#[$meta])*
        #[repr(transparent)]
        #[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
        pub struct $name(MemoryPage);

        impl $name {
            #[inline]
            #[must_use]
            pub const fn containing_address(addr: $addr) -> Self {
                Self(MemoryPage::containing(addr.0))
            }

            #[inline]
            #[must_use]
            pub const fn from_number(number: u32) -> Self {
                Self(MemoryPage::from_number(number))
            }

            #[inline]
            #[must_use]
            pub const fn base(self) -> $addr {
                $addr(self.0.base())
            }

            #[inline]
            #[must_use]
            pub const fn number(self) -> u32 {
                self.0.number()
            }

            #[inline]
            #[must_use]
            pub const fn join(self, offset: PageOffset) -> $addr {
                $addr(self.0.join(offset))
            }

            #[inline]
            #[must_use]
            pub const fn checked_add_pages(self, n: u32) -> Option<Self> {
                match self.0.checked_add_pages(n) {
                    Some(p) => Some(Self(p)),
                    None => None,
                }
            }

            #[inline]
            #[must_use]
            pub const fn pages_since(self, base: Self) -> Option<u32> {
                self.0.pages_since(base.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($tag, "(0x{:08X})"), self.0.base().as_u32())
            }
        }

        impl TryFrom<$addr> for $name {
            type Error = UnalignedAddress;

            fn try_from(addr: $addr) -> Result<Self, Self::Error> {
                if addr.is_page_aligned() {
                    Ok(Self::containing_address(addr))
                } else {
                    Err(UnalignedAddress(addr.as_u32()))
                }
            }
        }
    };
}

typed_page!(
    /// A physical frame, identified by its page-aligned base address.
    PhysicalPage,
    PhysicalAddress,
    "Frame"
);

typed_page!(
    /// A virtual page, identified by its page-aligned base address.
    VirtualPage,
    VirtualAddress,
    "VPage"
);
