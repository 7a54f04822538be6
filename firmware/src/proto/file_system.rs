//! Simple file system and file protocols.
//!
//! A [`File`] owns one firmware file handle and closes it exactly once,
//! either through [`File::close`] or on drop.

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use core::ffi::c_void;
use core::mem::ManuallyDrop;
use core::ptr::{self, NonNull};

use crate::call::{addr, call, issue, FnRef, Ref, Word};
use crate::guid::{self, Guid};
use crate::locator::{Interface, Protocol};
use crate::status::{EfiError, ErrorKind, Result, Status};
use crate::wide::WideString;

/// Chunk size for reads when the file size is unknown.
const READ_CHUNK: usize = 64 * 1024;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FileMode: u64 {
        const READ = 0x0000_0000_0000_0001;
        const WRITE = 0x0000_0000_0000_0002;
        const CREATE = 0x8000_0000_0000_0000;
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FileAttribute: u64 {
        const READ_ONLY = 0x01;
        const HIDDEN = 0x02;
        const SYSTEM = 0x04;
        const RESERVED = 0x08;
        const DIRECTORY = 0x10;
        const ARCHIVE = 0x20;
    }
}

#[repr(C)]
pub struct SimpleFileSystemProtocol {
    pub revision: u64,
    pub open_volume: FnRef,
}

impl Protocol for SimpleFileSystemProtocol {
    const GUID: Guid = guid::SIMPLE_FILE_SYSTEM_PROTOCOL;
    const NAME: &'static str = "SimpleFileSystem";
}

#[repr(C)]
pub struct FileProtocol {
    pub revision: u64,
    pub open: FnRef,
    pub close: FnRef,
    pub delete: FnRef,
    pub read: FnRef,
    pub write: FnRef,
    pub get_position: FnRef,
    pub set_position: FnRef,
    pub get_info: FnRef,
    pub set_info: FnRef,
    pub flush: FnRef,
}

impl Interface<SimpleFileSystemProtocol> {
    /// Open the root directory of the volume.
    pub fn open_volume(&self) -> Result<File> {
        let mut root: *mut c_void = ptr::null_mut();
        unsafe { call(self.open_volume, [self.this(), addr(&mut root)])? };
        unsafe { File::from_raw(root) }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// FILE INFO
// ═══════════════════════════════════════════════════════════════════════════

/// Decoded `EFI_FILE_INFO`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub file_size: u64,
    pub physical_size: u64,
    pub attribute: FileAttribute,
    pub name: String,
}

impl FileInfo {
    const FILE_SIZE: usize = 8;
    const PHYSICAL_SIZE: usize = 16;
    const ATTRIBUTE: usize = 72;
    const NAME: usize = 80;

    pub fn parse(raw: &[u8]) -> Result<Self> {
        if raw.len() < Self::NAME {
            return Err(EfiError::new(Status::VOLUME_CORRUPTED));
        }
        let u64_at = |off: usize| {
            let mut b = [0u8; 8];
            b.copy_from_slice(&raw[off..off + 8]);
            u64::from_le_bytes(b)
        };
        let units: Vec<u16> = raw[Self::NAME..]
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        Ok(Self {
            file_size: u64_at(Self::FILE_SIZE),
            physical_size: u64_at(Self::PHYSICAL_SIZE),
            attribute: FileAttribute::from_bits_retain(u64_at(Self::ATTRIBUTE)),
            name: WideString::decode(&units),
        })
    }

    /// Encode in firmware layout. Timestamps are zero.
    pub fn encode(&self) -> Vec<u8> {
        let mut name: Vec<u16> = self.name.encode_utf16().take_while(|&u| u != 0).collect();
        name.push(0);
        let total = Self::NAME + name.len() * 2;
        let mut raw = vec![0u8; total];
        raw[0..8].copy_from_slice(&(total as u64).to_le_bytes());
        raw[Self::FILE_SIZE..Self::FILE_SIZE + 8].copy_from_slice(&self.file_size.to_le_bytes());
        raw[Self::PHYSICAL_SIZE..Self::PHYSICAL_SIZE + 8]
            .copy_from_slice(&self.physical_size.to_le_bytes());
        raw[Self::ATTRIBUTE..Self::ATTRIBUTE + 8].copy_from_slice(&self.attribute.bits().to_le_bytes());
        for (i, unit) in name.iter().enumerate() {
            let at = Self::NAME + i * 2;
            raw[at..at + 2].copy_from_slice(&unit.to_le_bytes());
        }
        raw
    }

    pub fn is_directory(&self) -> bool {
        self.attribute.contains(FileAttribute::DIRECTORY)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// FILE HANDLE
// ═══════════════════════════════════════════════════════════════════════════

/// An open firmware file.
pub struct File {
    ptr: NonNull<FileProtocol>,
}

impl File {
    /// # Safety
    /// `raw` must be a file handle firmware just returned; ownership moves
    /// to the new `File`.
    unsafe fn from_raw(raw: *mut c_void) -> Result<Self> {
        NonNull::new(raw as *mut FileProtocol)
            .map(|ptr| Self { ptr })
            .ok_or(EfiError::new(Status::DEVICE_ERROR))
    }

    fn table(&self) -> &FileProtocol {
        unsafe { self.ptr.as_ref() }
    }

    fn this(&self) -> Word {
        unsafe { Ref::firmware(self.ptr.as_ptr()) }.word()
    }

    /// Open `path` relative to this file. `/` separators are accepted.
    pub fn open(&self, path: &str, mode: FileMode, attributes: FileAttribute) -> Result<File> {
        let name = WideString::path(path).map_err(|err| {
            log::warn!("rejecting path {:?}: {}", path, err);
            EfiError::new(Status::INVALID_PARAMETER)
        })?;
        let mut handle: *mut c_void = ptr::null_mut();
        unsafe {
            call(
                self.table().open,
                [
                    self.this(),
                    addr(&mut handle),
                    addr(&name),
                    Word::from(mode.bits()),
                    Word::from(attributes.bits()),
                ],
            )?;
            File::from_raw(handle)
        }
    }

    /// Read into `buf`. Returns the byte count; zero at end of file.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut size = buf.len();
        unsafe { call(self.table().read, [self.this(), addr(&mut size), addr(buf)])? };
        Ok(size)
    }

    pub fn write(&mut self, data: &[u8]) -> Result<usize> {
        let mut size = data.len();
        unsafe { call(self.table().write, [self.this(), addr(&mut size), addr(data)])? };
        Ok(size)
    }

    pub fn position(&self) -> Result<u64> {
        let mut position = 0u64;
        unsafe { call(self.table().get_position, [self.this(), addr(&mut position)])? };
        Ok(position)
    }

    pub fn set_position(&mut self, position: u64) -> Result<()> {
        unsafe { call(self.table().set_position, [self.this(), Word::from(position)]) }
    }

    /// Raw metadata of the given kind (`FILE_INFO`, `FILE_SYSTEM_INFO`, ...).
    pub fn get_info_raw(&self, kind: &Guid) -> Result<Vec<u8>> {
        let mut buffer = vec![0u8; 128];
        loop {
            let mut size = buffer.len();
            let status = unsafe {
                issue(
                    self.table().get_info,
                    [
                        self.this(),
                        addr(kind),
                        addr(&mut size),
                        addr(buffer.as_mut_slice()),
                    ],
                )
            };
            match status.to_result() {
                Ok(()) => {
                    buffer.truncate(size);
                    return Ok(buffer);
                }
                Err(err) if err.kind() == ErrorKind::BufferTooSmall && size > buffer.len() => {
                    buffer.resize(size, 0);
                }
                Err(err) => return Err(err),
            }
        }
    }

    pub fn set_info_raw(&mut self, kind: &Guid, data: &[u8]) -> Result<()> {
        unsafe {
            call(
                self.table().set_info,
                [self.this(), addr(kind), Word(data.len()), addr(data)],
            )
        }
    }

    pub fn info(&self) -> Result<FileInfo> {
        FileInfo::parse(&self.get_info_raw(&guid::FILE_INFO)?)
    }

    pub fn flush(&mut self) -> Result<()> {
        unsafe { call(self.table().flush, [self.this()]) }
    }

    /// Read from the current position to end of file.
    pub fn read_to_end(&mut self) -> Result<Vec<u8>> {
        let hint = match self.info() {
            Ok(info) if info.is_directory() => {
                return Err(EfiError::new(Status::INVALID_PARAMETER));
            }
            Ok(info) => info.file_size as usize,
            Err(err) => {
                log::debug!("file size unknown ({}), reading in chunks", err);
                READ_CHUNK
            }
        };
        let mut data = Vec::new();
        // The size comes from the volume and is not trusted
        data.try_reserve_exact(hint)
            .map_err(|_| EfiError::new(Status::OUT_OF_RESOURCES))?;
        let mut chunk = vec![0u8; hint.clamp(1, READ_CHUNK)];
        loop {
            let n = self.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            data.extend_from_slice(&chunk[..n]);
        }
        Ok(data)
    }

    /// Delete the file. The handle is closed by firmware either way.
    pub fn delete(self) -> Result<()> {
        let this = ManuallyDrop::new(self);
        let status = unsafe { issue(this.table().delete, [this.this()]) };
        if status == Status::WARN_DELETE_FAILURE {
            return Err(EfiError::new(Status::ACCESS_DENIED));
        }
        status.to_result()
    }

    pub fn close(self) -> Result<()> {
        let this = ManuallyDrop::new(self);
        unsafe { call(this.table().close, [this.this()]) }
    }
}

impl Drop for File {
    fn drop(&mut self) {
        if let Err(err) = unsafe { call(self.table().close, [self.this()]) } {
            log::warn!("closing file handle failed: {}", err);
        }
    }
}
