//! LoadFile2 protocol and an implementation that serves a memory buffer.

use core::ffi::c_void;
use core::ptr;

use crate::call::{FirmwareLayout, FnRef};
use crate::guid::{self, Guid};
use crate::locator::Protocol;
use crate::status::Status;

#[repr(C)]
pub struct LoadFile2Protocol {
    pub load_file: FnRef,
}

impl Protocol for LoadFile2Protocol {
    const GUID: Guid = guid::LOAD_FILE2_PROTOCOL;
    const NAME: &'static str = "LoadFile2";
}

/// LoadFile2 table followed by the buffer it serves.
///
/// Firmware hands the callback a pointer to the table; the buffer fields
/// are found right behind it.
#[repr(C)]
pub struct MemoryLoadFile {
    protocol: LoadFile2Protocol,
    data: *const u8,
    len: usize,
}

unsafe impl FirmwareLayout for MemoryLoadFile {}

impl MemoryLoadFile {
    /// # Safety
    /// `data` must outlive every firmware call into the returned table.
    pub unsafe fn new(data: &[u8]) -> Self {
        Self {
            protocol: LoadFile2Protocol {
                load_file: FnRef::from_raw(serve_from_memory as usize),
            },
            data: data.as_ptr(),
            len: data.len(),
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_interface(&mut self) -> *mut c_void {
        self as *mut Self as *mut c_void
    }
}

/// LoadFile2 entry point for [`MemoryLoadFile`].
///
/// Runs inside firmware (usually while the kernel's stub is executing), so
/// it touches only its own memory and never calls back into firmware.
unsafe extern "efiapi" fn serve_from_memory(
    this: *mut LoadFile2Protocol,
    _file_path: *const c_void,
    boot_policy: bool,
    buffer_size: *mut usize,
    buffer: *mut c_void,
) -> usize {
    if this.is_null() || buffer_size.is_null() {
        return Status::INVALID_PARAMETER.0;
    }
    if boot_policy {
        // LoadFile2 never serves boot selections
        return Status::UNSUPPORTED.0;
    }

    let source = this as *const MemoryLoadFile;
    let required = (*source).len;

    if buffer.is_null() || *buffer_size < required {
        *buffer_size = required;
        return Status::BUFFER_TOO_SMALL.0;
    }

    if required != 0 {
        ptr::copy_nonoverlapping((*source).data, buffer as *mut u8, required);
    }
    *buffer_size = required;
    Status::SUCCESS.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::{addr, issue, Ref, Word};

    #[test]
    fn test_size_query_then_copy() {
        let initrd = b"070701 newc archive".to_vec();
        let mut served = unsafe { MemoryLoadFile::new(&initrd) };
        let this = unsafe { Ref::firmware(served.as_interface()) }.word();
        let entry = served.protocol.load_file;

        let mut size = 0usize;
        let status = unsafe {
            issue(entry, [this, Word::NULL, Word::from(false), addr(&mut size), Word::NULL])
        };
        assert_eq!(status, Status::BUFFER_TOO_SMALL);
        assert_eq!(size, initrd.len());

        let mut out = vec![0u8; size];
        let status = unsafe {
            issue(
                entry,
                [this, Word::NULL, Word::from(false), addr(&mut size), addr(out.as_mut_slice())],
            )
        };
        assert!(status.is_success());
        assert_eq!(out, initrd);
    }

    #[test]
    fn test_boot_policy_rejected() {
        let data = [1u8];
        let mut served = unsafe { MemoryLoadFile::new(&data) };
        let this = unsafe { Ref::firmware(served.as_interface()) }.word();
        let mut size = 1usize;
        let status = unsafe {
            issue(
                served.protocol.load_file,
                [this, Word::NULL, Word::from(true), addr(&mut size), Word::NULL],
            )
        };
        assert_eq!(status, Status::UNSUPPORTED);
    }
}
