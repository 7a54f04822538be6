//! Text console as a byte stream.
//!
//! Output goes through `OutputString` with `\n` expanded to `\r\n`. Input
//! is read with `ReadKeyStroke`, waiting on the `WaitForKey` event through
//! the cooperative poll loop.

use core::fmt;
use core::ptr;

use crate::call::{addr, call, issue, FnRef, FirmwareLayout, Word};
use crate::guid::{self, Guid};
use crate::locator::{Interface, Protocol};
use crate::poll::{self, Budget};
use crate::status::{Result, Status};
use crate::table::{BootServices, Event, Handle};

/// Code units per `OutputString` call, terminator included.
const OUT_CHUNK: usize = 128;

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputKey {
    pub scan_code: u16,
    pub unicode_char: u16,
}

unsafe impl FirmwareLayout for InputKey {}

#[repr(C)]
pub struct TextInputProtocol {
    pub reset: FnRef,
    pub read_key_stroke: FnRef,
    pub wait_for_key: Event,
}

impl Protocol for TextInputProtocol {
    const GUID: Guid = guid::SIMPLE_TEXT_INPUT_PROTOCOL;
    const NAME: &'static str = "SimpleTextInput";
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct TextOutputMode {
    pub max_mode: i32,
    pub mode: i32,
    pub attribute: i32,
    pub cursor_column: i32,
    pub cursor_row: i32,
    pub cursor_visible: bool,
}

#[repr(C)]
pub struct TextOutputProtocol {
    pub reset: FnRef,
    pub output_string: FnRef,
    pub test_string: FnRef,
    pub query_mode: FnRef,
    pub set_mode: FnRef,
    pub set_attribute: FnRef,
    pub clear_screen: FnRef,
    pub set_cursor_position: FnRef,
    pub enable_cursor: FnRef,
    pub mode: *const TextOutputMode,
}

impl Protocol for TextOutputProtocol {
    const GUID: Guid = guid::SIMPLE_TEXT_OUTPUT_PROTOCOL;
    const NAME: &'static str = "SimpleTextOutput";
}

// ==================== Output ====================

/// Console output stream.
pub struct ConsoleOut {
    iface: Interface<TextOutputProtocol>,
}

impl ConsoleOut {
    /// # Safety
    /// `ptr` must be a live text output table, as found in the system table.
    pub unsafe fn from_raw(handle: Handle, ptr: *mut TextOutputProtocol) -> Result<Self> {
        Ok(Self {
            iface: Interface::from_raw(handle, ptr as *mut core::ffi::c_void)?,
        })
    }

    /// Raw address of the table, for handing to another owner.
    pub fn as_ptr(&self) -> *mut TextOutputProtocol {
        self.iface.as_ptr()
    }

    fn flush_units(&self, units: &mut [u16; OUT_CHUNK], len: &mut usize) -> Result<()> {
        if *len == 0 {
            return Ok(());
        }
        units[*len] = 0;
        let status = unsafe {
            issue(
                self.iface.output_string,
                [self.iface.this(), addr(&units[..=*len])],
            )
        };
        *len = 0;
        // Unknown glyphs are a warning, the rest of the text was written
        status.to_result()
    }

    /// Write `text`, expanding `\n` to `\r\n`.
    pub fn write_text(&self, text: &str) -> Result<()> {
        let mut units = [0u16; OUT_CHUNK];
        let mut len = 0usize;
        let mut prev = '\0';
        for c in text.chars() {
            // Room for CR, a surrogate pair and the terminator
            if len + 4 > OUT_CHUNK {
                self.flush_units(&mut units, &mut len)?;
            }
            if c == '\n' && prev != '\r' {
                units[len] = b'\r' as u16;
                len += 1;
            }
            let mut pair = [0u16; 2];
            for &unit in c.encode_utf16(&mut pair).iter() {
                units[len] = unit;
                len += 1;
            }
            prev = c;
        }
        self.flush_units(&mut units, &mut len)
    }

    pub fn clear(&self) -> Result<()> {
        unsafe { call(self.iface.clear_screen, [self.iface.this()]) }
    }

    pub fn set_attribute(&self, attribute: usize) -> Result<()> {
        unsafe { call(self.iface.set_attribute, [self.iface.this(), Word(attribute)]) }
    }

    pub fn mode(&self) -> Option<TextOutputMode> {
        let mode = unsafe { ptr::read_volatile(&(*self.iface.as_ptr()).mode) };
        if mode.is_null() {
            None
        } else {
            Some(unsafe { ptr::read_volatile(mode) })
        }
    }
}

impl fmt::Write for ConsoleOut {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.write_text(s).map_err(|_| fmt::Error)
    }
}

// ==================== Input ====================

/// Console input stream.
pub struct ConsoleIn {
    iface: Interface<TextInputProtocol>,
}

impl ConsoleIn {
    /// # Safety
    /// `ptr` must be a live text input table.
    pub unsafe fn from_raw(handle: Handle, ptr: *mut TextInputProtocol) -> Result<Self> {
        Ok(Self {
            iface: Interface::from_raw(handle, ptr as *mut core::ffi::c_void)?,
        })
    }

    /// One key if one is pending.
    pub fn read_key(&self) -> Result<Option<InputKey>> {
        let mut key = InputKey::default();
        let status = unsafe {
            issue(
                self.iface.read_key_stroke,
                [self.iface.this(), crate::call::Ref::layout_mut(&mut key).word()],
            )
        };
        match status {
            Status::NOT_READY => Ok(None),
            other => other.to_result_with(Some(key)),
        }
    }

    /// Wait for a key within `budget`, yielding between checks.
    pub fn wait_key(
        &self,
        bs: &BootServices,
        budget: Budget,
        mut yield_now: impl FnMut(),
    ) -> Result<InputKey> {
        let event = unsafe { ptr::read_volatile(&(*self.iface.as_ptr()).wait_for_key) };
        if event.is_null() {
            return poll::poll_until(budget, || self.read_key(), yield_now);
        }
        loop {
            poll::wait_for_event(bs, event, budget, &mut yield_now)?;
            // Signalled but the key can be gone already
            if let Some(key) = self.read_key()? {
                return Ok(key);
            }
        }
    }

    /// Next byte of input. Carriage return reads as `\n`; keys with no
    /// character (arrows, function keys) are skipped and non-ASCII reads
    /// as `?`.
    pub fn read_byte(
        &self,
        bs: &BootServices,
        budget: Budget,
        mut yield_now: impl FnMut(),
    ) -> Result<u8> {
        loop {
            let key = self.wait_key(bs, budget, &mut yield_now)?;
            if let Some(byte) = key_to_byte(key) {
                return Ok(byte);
            }
        }
    }
}

fn key_to_byte(key: InputKey) -> Option<u8> {
    match key.unicode_char {
        0 => None,
        0x0d => Some(b'\n'),
        c if c < 0x80 => Some(c as u8),
        _ => Some(b'?'),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeConsole, FakeFirmware};
    use core::fmt::Write;

    #[test]
    fn test_newline_expansion() {
        let console = FakeConsole::new();
        let mut out = console.output();
        write!(out, "boot\nok\r\n").unwrap();
        assert_eq!(console.written(), "boot\r\nok\r\n");
    }

    #[test]
    fn test_long_output_is_chunked() {
        let console = FakeConsole::new();
        let out = console.output();
        let text: String = core::iter::repeat('x').take(1000).collect();
        out.write_text(&text).unwrap();
        assert_eq!(console.written(), text);
        assert!(console.output_calls() >= 8);
    }

    #[test]
    fn test_read_byte_maps_keys() {
        let fw = FakeFirmware::new();
        let console = FakeConsole::new();
        console.push_keys(&[
            InputKey { scan_code: 0x01, unicode_char: 0 },
            InputKey { scan_code: 0, unicode_char: b'a' as u16 },
            InputKey { scan_code: 0, unicode_char: 0x0d },
        ]);
        let input = console.input(&fw);
        let bs = fw.boot_services();
        assert_eq!(input.read_byte(bs, Budget::Polls(16), || {}).unwrap(), b'a');
        assert_eq!(input.read_byte(bs, Budget::Polls(16), || {}).unwrap(), b'\n');
        let err = input.read_byte(bs, Budget::Polls(4), || {}).unwrap_err();
        assert_eq!(err.kind(), crate::status::ErrorKind::Timeout);
    }

    #[test]
    fn test_key_to_byte() {
        assert_eq!(key_to_byte(InputKey { scan_code: 0, unicode_char: 0x263a }), Some(b'?'));
        assert_eq!(key_to_byte(InputKey { scan_code: 0x17, unicode_char: 0 }), None);
    }
}
