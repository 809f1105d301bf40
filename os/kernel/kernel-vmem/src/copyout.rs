//! # Copying into user memory
//!
//! The kernel writes into a user address space while building a new
//! process's stack. [`CopyOut`] is that boundary; [`FrameCopyOut`] does it
//! by walking the destination descriptor's frames through the kernel's
//! direct map, so the target space need not be the active one.

use crate::address_space::AddressSpace;
use crate::PhysMapper;
use core::ffi::CStr;
use kernel_info::errno::{EFAULT, ENAMETOOLONG, Errno};
use kernel_memory_addresses::VirtualAddress;

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CopyError {
    #[error("bad user address {0}")]
    Fault(VirtualAddress),
    #[error("string longer than the allowed length")]
    NameTooLong,
}

impl CopyError {
    #[must_use]
    pub const fn errno(&self) -> Errno {
        match self {
            Self::Fault(_) => EFAULT,
            Self::NameTooLong => ENAMETOOLONG,
        }
    }
}

/// Kernel-to-user copy.
pub trait CopyOut {
    /// Copy `src` to user address `dst`.
    ///
    /// # Errors
    /// [`CopyError::Fault`] if any byte of the destination is not mapped; in
    /// that case nothing is written.
    fn copyout(&mut self, src: &[u8], dst: VirtualAddress) -> Result<(), CopyError>;

    /// Copy a NUL-terminated string, at most `max_len` bytes including the
    /// terminator. Returns the number of bytes written.
    ///
    /// # Errors
    /// [`CopyError::NameTooLong`] if the string with its NUL exceeds
    /// `max_len`, otherwise as for [`copyout`](Self::copyout).
    fn copyoutstr(
        &mut self,
        src: &CStr,
        dst: VirtualAddress,
        max_len: usize,
    ) -> Result<usize, CopyError> {
        let bytes = src.to_bytes_with_nul();
        if bytes.len() > max_len {
            return Err(CopyError::NameTooLong);
        }
        self.copyout(bytes, dst)?;
        Ok(bytes.len())
    }
}

/// Writes into `space` through its own frames.
pub struct FrameCopyOut<'a, M: PhysMapper> {
    space: &'a AddressSpace,
    mapper: &'a M,
}

impl<'a, M: PhysMapper> FrameCopyOut<'a, M> {
    #[must_use]
    pub const fn new(space: &'a AddressSpace, mapper: &'a M) -> Self {
        Self { space, mapper }
    }

    /// Split `[dst, dst + len)` into per-page chunks: `(user address, chunk length)`.
    fn chunks(dst: VirtualAddress, len: usize) -> impl Iterator<Item = (VirtualAddress, usize)> {
        let mut addr = dst;
        let mut left = len;
        core::iter::from_fn(move || {
            if left == 0 {
                return None;
            }
            let n = left.min(addr.offset().remaining() as usize);
            let here = addr;
            // Only the final chunk can end exactly at 4 GiB; nothing reads `addr` after it.
            #[allow(clippy::cast_possible_truncation)]
            let next = addr.as_u32().wrapping_add(n as u32);
            addr = VirtualAddress::new(next);
            left -= n;
            Some((here, n))
        })
    }
}

impl<M: PhysMapper> CopyOut for FrameCopyOut<'_, M> {
    fn copyout(&mut self, src: &[u8], dst: VirtualAddress) -> Result<(), CopyError> {
        if src.is_empty() {
            return Ok(());
        }
        let last = u32::try_from(src.len() - 1)
            .ok()
            .and_then(|l| dst.checked_add(l))
            .ok_or(CopyError::Fault(dst))?;

        // Validate the whole range before touching memory.
        for (addr, _) in Self::chunks(dst, src.len()) {
            self.space.translate(addr).ok_or(CopyError::Fault(addr))?;
        }
        self.space.translate(last).ok_or(CopyError::Fault(last))?;

        let mut copied = 0;
        for (addr, n) in Self::chunks(dst, src.len()) {
            let pa = self.space.translate(addr).ok_or(CopyError::Fault(addr))?;
            // SAFETY: the frame belongs to `space` and the chunk stays inside it.
            let to: &mut [u8] = unsafe { self.mapper.phys_to_slice_mut(pa, n) };
            to.copy_from_slice(&src[copied..copied + n]);
            copied += n;
        }
        Ok(())
    }
}
