//! Interrupt masking for the current core.
//!
//! TLB reads and writes are a multi-register sequence (`EntryHi`, `EntryLo`,
//! `Index`, then `tlbwi`/`tlbwr`). An interrupt in the middle of that
//! sequence can run a handler that faults and rewrites the same registers,
//! so every TLB mutation happens under an [`IrqGuard`].

/// Per-core interrupt enable/disable.
///
/// On MIPS this is the `IE` bit of the CP0 `Status` register. The platform
/// layer provides the implementation; tests use a simulated CPU.
pub trait InterruptControl {
    /// Disable interrupts and return whether they were enabled before.
    fn disable(&self) -> bool;

    /// Enable interrupts.
    fn enable(&self);

    /// Whether interrupts are currently enabled.
    fn are_enabled(&self) -> bool;
}

impl<I: InterruptControl + ?Sized> InterruptControl for &I {
    #[inline]
    fn disable(&self) -> bool {
        (**self).disable()
    }

    #[inline]
    fn enable(&self) {
        (**self).enable();
    }

    #[inline]
    fn are_enabled(&self) -> bool {
        (**self).are_enabled()
    }
}

/// RAII guard that disables interrupts on creation and restores them on drop.
///
/// Interrupts are re-enabled **only** if they were enabled when the guard was
/// created, so guards nest correctly.
///
/// # Examples
///
/// ```
/// use core::cell::Cell;
/// use kernel_sync::{InterruptControl, IrqGuard};
///
/// struct Cpu(Cell<bool>);
/// impl InterruptControl for Cpu {
///     fn disable(&self) -> bool { self.0.replace(false) }
///     fn enable(&self) { self.0.set(true) }
///     fn are_enabled(&self) -> bool { self.0.get() }
/// }
///
/// let cpu = Cpu(Cell::new(true));
/// {
///     let _outer = IrqGuard::new(&cpu);
///     {
///         let _inner = IrqGuard::new(&cpu);
///     }
///     assert!(!cpu.are_enabled());
/// }
/// assert!(cpu.are_enabled());
/// ```
#[must_use = "interrupts are restored as soon as the guard is dropped"]
pub struct IrqGuard<'a, I: InterruptControl + ?Sized> {
    cpu: &'a I,
    /// Whether interrupts were enabled when the guard was created.
    were_enabled: bool,
}

impl<'a, I: InterruptControl + ?Sized> IrqGuard<'a, I> {
    #[inline]
    pub fn new(cpu: &'a I) -> Self {
        let were_enabled = cpu.disable();
        Self { cpu, were_enabled }
    }

    #[inline]
    #[must_use]
    pub const fn were_enabled(&self) -> bool {
        self.were_enabled
    }
}

impl<I: InterruptControl + ?Sized> Drop for IrqGuard<'_, I> {
    fn drop(&mut self) {
        if self.were_enabled {
            self.cpu.enable();
        }
    }
}
