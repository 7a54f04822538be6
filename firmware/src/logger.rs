//! Console logger for the `log` facade.
//!
//! Records are written to the firmware console as
//! `[LEVEL] target: message` and kept in a ring of the most recent
//! entries, so a failed boot can be inspected from the shell afterwards.
//! Until [`init`] runs, records are dropped.

use alloc::collections::VecDeque;
use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};

use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};
use spin::Mutex;

use crate::proto::console::ConsoleOut;

/// Entries kept for later inspection.
pub const MAX_LOG_ENTRIES: usize = 64;

struct Sink(ConsoleOut);

// Pre-boot code runs on one processor; the sink is only touched under the
// logger's lock.
unsafe impl Send for Sink {}

pub struct ConsoleLogger {
    ring: Mutex<VecDeque<String>>,
    sink: Mutex<Option<Sink>>,
    // Set while a line is being written, so records raised by the write
    // itself are dropped instead of re-entering the sink
    writing: AtomicBool,
}

static LOGGER: ConsoleLogger = ConsoleLogger::new();

impl ConsoleLogger {
    pub const fn new() -> Self {
        Self {
            ring: Mutex::new(VecDeque::new()),
            sink: Mutex::new(None),
            writing: AtomicBool::new(false),
        }
    }

    pub fn set_console(&self, console: Option<ConsoleOut>) {
        *self.sink.lock() = console.map(Sink);
    }

    /// Stop writing to the console and return it. The ring keeps filling.
    pub fn take_console(&self) -> Option<ConsoleOut> {
        self.sink.lock().take().map(|sink| sink.0)
    }

    /// The retained entries, oldest first.
    pub fn recent(&self) -> Vec<String> {
        self.ring.lock().iter().cloned().collect()
    }

    fn remember(&self, line: String) {
        let mut ring = self.ring.lock();
        if ring.len() == MAX_LOG_ENTRIES {
            ring.pop_front();
        }
        ring.push_back(line);
    }
}

impl Default for ConsoleLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        if self.writing.swap(true, Ordering::Acquire) {
            return;
        }
        let line = format!("[{}] {}: {}", record.level(), record.target(), record.args());
        if let Some(sink) = self.sink.lock().as_ref() {
            let _ = sink.0.write_text(&line);
            let _ = sink.0.write_text("\n");
        }
        self.remember(line);
        self.writing.store(false, Ordering::Release);
    }

    fn flush(&self) {}
}

/// Install the global logger writing to `console`.
pub fn init(console: Option<ConsoleOut>, level: LevelFilter) -> Result<(), SetLoggerError> {
    LOGGER.set_console(console);
    log::set_logger(&LOGGER)?;
    log::set_max_level(level);
    Ok(())
}

/// Detach the console, keeping the ring, while another image owns it.
/// Hand the result back to [`attach_console`] once that image returns.
pub fn detach_console() -> Option<ConsoleOut> {
    LOGGER.take_console()
}

pub fn attach_console(console: Option<ConsoleOut>) {
    LOGGER.set_console(console);
}

/// Retained entries of the global logger.
pub fn recent() -> Vec<String> {
    LOGGER.recent()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeConsole;

    fn emit(logger: &ConsoleLogger, level: log::Level, msg: &str) {
        logger.log(
            &Record::builder()
                .level(level)
                .target("keel::flow")
                .args(format_args!("{}", msg))
                .build(),
        );
    }

    #[test]
    fn test_line_format_on_console() {
        log::set_max_level(LevelFilter::Trace);
        let console = FakeConsole::new();
        let logger = ConsoleLogger::new();
        logger.set_console(Some(console.output()));
        emit(&logger, log::Level::Info, "root volume opened");
        assert_eq!(console.written(), "[INFO] keel::flow: root volume opened\r\n");
        assert_eq!(logger.recent(), ["[INFO] keel::flow: root volume opened"]);
    }

    #[test]
    fn test_detached_console_is_silent() {
        log::set_max_level(LevelFilter::Trace);
        let console = FakeConsole::new();
        let logger = ConsoleLogger::new();
        logger.set_console(Some(console.output()));

        let taken = logger.take_console();
        assert!(taken.is_some());
        emit(&logger, log::Level::Info, "kernel running");
        assert_eq!(console.written(), "");

        logger.set_console(taken);
        emit(&logger, log::Level::Warn, "kernel returned");
        assert_eq!(console.written(), "[WARN] keel::flow: kernel returned\r\n");
        assert_eq!(
            logger.recent(),
            ["[INFO] keel::flow: kernel running", "[WARN] keel::flow: kernel returned"]
        );
    }

    #[test]
    fn test_ring_keeps_most_recent() {
        log::set_max_level(LevelFilter::Trace);
        let logger = ConsoleLogger::new();
        for i in 0..(MAX_LOG_ENTRIES + 6) {
            emit(&logger, log::Level::Warn, &format!("entry {}", i));
        }
        let recent = logger.recent();
        assert_eq!(recent.len(), MAX_LOG_ENTRIES);
        assert_eq!(recent[0], "[WARN] keel::flow: entry 6");
    }
}
