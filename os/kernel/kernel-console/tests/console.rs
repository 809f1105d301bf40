//! The sink and logger are process-wide, so everything runs in one test.

use kernel_console::{ConsoleLogger, ConsoleSink, kprintf, set_sink, sink};
use log::LevelFilter;
use std::sync::Mutex;

struct Capture(Mutex<Vec<u8>>);

impl Capture {
    fn take(&self) -> String {
        String::from_utf8(std::mem::take(&mut *self.0.lock().unwrap())).unwrap()
    }
}

impl ConsoleSink for Capture {
    fn putch(&self, c: u8) {
        self.0.lock().unwrap().push(c);
    }
}

static CAPTURE: Capture = Capture(Mutex::new(Vec::new()));
static OTHER: Capture = Capture(Mutex::new(Vec::new()));

#[test]
fn console_output_and_logging() {
    kprintf!("dropped before a sink exists\n");
    assert!(sink().is_none());

    assert!(set_sink(&CAPTURE).is_ok());
    assert!(set_sink(&OTHER).is_err());

    kprintf!("frames: {}\n", 256);
    assert_eq!(CAPTURE.take(), "frames: 256\n");

    ConsoleLogger::new(LevelFilter::Info).init().unwrap();
    assert!(ConsoleLogger::new(LevelFilter::Trace).init().is_err());

    log::info!(target: "vm", "frame table ready");
    log::debug!(target: "vm", "filtered out");
    assert_eq!(CAPTURE.take(), "[INFO] vm: frame table ready\n");

    assert!(OTHER.take().is_empty());
}
