//! # Kernel Console Output
//!
//! Early and diagnostic text output for the kernel. The platform registers a
//! byte sink (the serial console on the simulated MIPS board) once during
//! boot; everything else writes through [`kprintf!`] or the `log` facade.
//!
//! ## Output Mechanism
//! ```text
//! log::info!(..)          kprintf!(..)
//!     ↓                       ↓
//! ConsoleLogger (log::Log)    │
//!     ↓                       ↓
//!     └──────→ ConsoleWriter (fmt::Write)
//!                  ↓
//!          ConsoleSink::putch()
//! ```
//!
//! Output written before a sink is registered is dropped.
//!
//! ## `enabled` Feature (default)
//! When disabled, [`kprintf!`] and the logger compile to no-ops and no sink
//! is ever called.
//!
//! ## Usage
//! ```rust,no_run
//! use kernel_console::{ConsoleLogger, ConsoleSink, kprintf, set_sink};
//! use log::{LevelFilter, info};
//!
//! struct Serial;
//! impl ConsoleSink for Serial {
//!     fn putch(&self, _c: u8) { /* write to the UART */ }
//! }
//! static SERIAL: Serial = Serial;
//!
//! set_sink(&SERIAL).ok();
//! ConsoleLogger::new(LevelFilter::Debug).init().ok();
//! kprintf!("booting with {} KiB\n", 4096);
//! info!("vm: frame table ready");
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]

mod logger;

use kernel_sync::SyncOnceCell;

pub use logger::ConsoleLogger;

/// A byte-oriented output device.
pub trait ConsoleSink: Sync {
    /// Emit one byte. Must not block on anything that may itself log.
    fn putch(&self, c: u8);
}

static SINK: SyncOnceCell<&'static dyn ConsoleSink> = SyncOnceCell::new();

/// Register the console sink. Only the first registration takes effect.
///
/// # Errors
/// Returns the rejected sink if one was already registered.
pub fn set_sink(sink: &'static dyn ConsoleSink) -> Result<(), &'static dyn ConsoleSink> {
    SINK.set(sink)
}

/// The registered sink, if any.
#[must_use]
pub fn sink() -> Option<&'static dyn ConsoleSink> {
    SINK.get().copied()
}

#[cfg(feature = "enabled")]
#[doc(hidden)]
pub mod console_fmt {
    use core::fmt::{self, Write};

    /// `fmt::Write` adapter over the registered sink.
    pub struct ConsoleWriter;

    impl Write for ConsoleWriter {
        #[inline]
        fn write_str(&mut self, s: &str) -> fmt::Result {
            if let Some(sink) = crate::sink() {
                s.bytes().for_each(|b| sink.putch(b));
            }
            Ok(())
        }
    }

    #[doc(hidden)]
    #[inline]
    pub fn console_write(args: fmt::Arguments) {
        // Best effort; there is nowhere to report a failed console write.
        let _ = fmt::write(&mut ConsoleWriter, args);
    }
}

#[cfg(not(feature = "enabled"))]
#[doc(hidden)]
pub mod console_fmt {
    use core::fmt;

    #[doc(hidden)]
    #[inline(always)]
    #[allow(clippy::inline_always)]
    pub fn console_write(_: fmt::Arguments) {}
}

/// Formatted output straight to the console, bypassing the log facade.
#[macro_export]
macro_rules! kprintf {
    ($($arg:tt)*) => {{
        $crate::console_fmt::console_write(core::format_args!($($arg)*));
    }};
}
