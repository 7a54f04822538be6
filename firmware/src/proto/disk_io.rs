//! Byte-addressed disk access.
//!
//! A [`Disk`] pairs the Disk I/O protocol (byte offsets) with the Block I/O
//! protocol on the same handle (media state, flush). Offsets are absolute;
//! no alignment is done here.

use alloc::vec;
use alloc::vec::Vec;

use crate::call::{addr, call, FnRef, Word};
use crate::guid::{self, Guid};
use crate::locator::{self, Interface, Protocol};
use crate::proto::block_io::{BlockIoMedia, BlockIoProtocol};
use crate::status::{EfiError, ErrorKind, Result, Status};
use crate::table::{BootServices, Handle};

#[repr(C)]
pub struct DiskIoProtocol {
    pub revision: u64,
    pub read_disk: FnRef,
    pub write_disk: FnRef,
}

impl Protocol for DiskIoProtocol {
    const GUID: Guid = guid::DISK_IO_PROTOCOL;
    const NAME: &'static str = "DiskIo";
}

pub struct Disk {
    disk_io: Interface<DiskIoProtocol>,
    block_io: Interface<BlockIoProtocol>,
}

impl Disk {
    /// Bind both protocols on `handle`.
    pub fn open(bs: &BootServices, handle: Handle) -> Result<Self> {
        let disk_io = locator::bind_protocol::<DiskIoProtocol>(bs, handle)?;
        let block_io = locator::bind_protocol::<BlockIoProtocol>(bs, handle)?;
        Ok(Self { disk_io, block_io })
    }

    pub fn handle(&self) -> Handle {
        self.disk_io.handle()
    }

    pub fn media(&self) -> Result<BlockIoMedia> {
        self.block_io.media()
    }

    pub fn size(&self) -> Result<u64> {
        Ok(self.media()?.size())
    }

    pub fn sector_size(&self) -> Result<u32> {
        Ok(self.media()?.block_size)
    }

    pub fn is_read_only(&self) -> Result<bool> {
        Ok(self.media()?.read_only)
    }

    fn present_media(&self) -> Result<BlockIoMedia> {
        let media = self.media()?;
        if !media.media_present {
            return Err(EfiError::new(Status::NO_MEDIA));
        }
        Ok(media)
    }

    /// Read `length` bytes starting at `offset`.
    pub fn read_at(&self, offset: u64, length: usize) -> Result<Vec<u8>> {
        let media = self.present_media()?;
        let mut buffer = vec![0u8; length];
        unsafe {
            call(
                self.disk_io.read_disk,
                [
                    self.disk_io.this(),
                    Word::from(media.media_id),
                    Word::from(offset),
                    Word(length),
                    addr(buffer.as_mut_slice()),
                ],
            )?;
        }
        Ok(buffer)
    }

    /// Write `data` at `offset`. Returns the number of bytes written.
    pub fn write_at(&self, offset: u64, data: &[u8]) -> Result<usize> {
        let media = self.present_media()?;
        if media.read_only {
            return Err(EfiError::new(Status::WRITE_PROTECTED));
        }
        unsafe {
            call(
                self.disk_io.write_disk,
                [
                    self.disk_io.this(),
                    Word::from(media.media_id),
                    Word::from(offset),
                    Word(data.len()),
                    addr(data),
                ],
            )?;
        }
        Ok(data.len())
    }

    pub fn flush(&self) -> Result<()> {
        self.block_io.flush()
    }
}

/// Every handle exposing Disk I/O, paired with its Block I/O. Handles
/// without a Block I/O are skipped.
pub fn enumerate_disks(bs: &BootServices) -> Result<Vec<Disk>> {
    let handles = locator::locate_handles(bs, &DiskIoProtocol::GUID)?;
    let mut disks = Vec::new();
    for &handle in handles.iter() {
        match Disk::open(bs, handle) {
            Ok(disk) => disks.push(disk),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                log::debug!("disk handle {:?} has no block I/O", handle);
            }
            Err(err) => return Err(err),
        }
    }
    Ok(disks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeDisk, FakeFirmware};

    #[test]
    fn test_read_and_write() {
        let fw = FakeFirmware::new();
        let fake = FakeDisk::new(4096, false);
        let handle = fake.install(&fw);
        let disk = Disk::open(fw.boot_services(), handle).unwrap();

        assert_eq!(disk.write_at(100, b"keel").unwrap(), 4);
        assert_eq!(disk.read_at(100, 4).unwrap(), b"keel".to_vec());
        assert_eq!(disk.size().unwrap(), 4096);
        assert_eq!(disk.sector_size().unwrap(), 512);
        disk.flush().unwrap();
        assert_eq!(fake.flushes(), 1);
    }

    #[test]
    fn test_write_protected() {
        let fw = FakeFirmware::new();
        let fake = FakeDisk::new(4096, true);
        let disk = Disk::open(fw.boot_services(), fake.install(&fw)).unwrap();
        let err = disk.write_at(0, b"x").unwrap_err();
        assert_eq!(err.status(), Status::WRITE_PROTECTED);
        assert!(disk.read_at(0, 1).is_ok());
    }

    #[test]
    fn test_no_media() {
        let fw = FakeFirmware::new();
        let fake = FakeDisk::new(4096, false);
        let disk = Disk::open(fw.boot_services(), fake.install(&fw)).unwrap();
        fake.eject();
        assert_eq!(disk.read_at(0, 1).unwrap_err().status(), Status::NO_MEDIA);
        assert_eq!(disk.write_at(0, b"x").unwrap_err().status(), Status::NO_MEDIA);
    }

    #[test]
    fn test_enumerate() {
        let fw = FakeFirmware::new();
        assert!(enumerate_disks(fw.boot_services()).unwrap().is_empty());
        let a = FakeDisk::new(1024, false);
        let b = FakeDisk::new(2048, true);
        a.install(&fw);
        b.install(&fw);
        let disks = enumerate_disks(fw.boot_services()).unwrap();
        assert_eq!(disks.len(), 2);
        assert!(disks[1].is_read_only().unwrap());
    }
}
