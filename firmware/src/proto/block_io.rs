// Block I/O protocol: media description and flush

use core::ptr;

use crate::call::{call, FnRef};
use crate::guid::{self, Guid};
use crate::locator::{Interface, Protocol};
use crate::status::{EfiError, Result, Status};

#[repr(C)]
pub struct BlockIoProtocol {
    pub revision: u64,
    pub media: *const BlockIoMedia,
    pub reset: FnRef,
    pub read_blocks: FnRef,
    pub write_blocks: FnRef,
    pub flush_blocks: FnRef,
}

impl Protocol for BlockIoProtocol {
    const GUID: Guid = guid::BLOCK_IO_PROTOCOL;
    const NAME: &'static str = "BlockIo";
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct BlockIoMedia {
    pub media_id: u32,
    pub removable_media: bool,
    pub media_present: bool,
    pub logical_partition: bool,
    pub read_only: bool,
    pub write_caching: bool,
    pub block_size: u32,
    pub io_align: u32,
    pub last_block: u64,
    // Revision 2 and later
    pub lowest_aligned_lba: u64,
    pub logical_blocks_per_physical_block: u32,
    pub optimal_transfer_length_granularity: u32,
}

impl BlockIoMedia {
    /// Capacity in bytes.
    pub fn size(&self) -> u64 {
        if !self.media_present || self.block_size == 0 {
            return 0;
        }
        (self.last_block + 1) * self.block_size as u64
    }
}

impl Interface<BlockIoProtocol> {
    /// Snapshot of the media record. Re-read on every call; firmware
    /// updates it in place when media changes.
    pub fn media(&self) -> Result<BlockIoMedia> {
        let media = unsafe { ptr::read_volatile(&(*self.as_ptr()).media) };
        if media.is_null() {
            return Err(EfiError::new(Status::NO_MEDIA));
        }
        Ok(unsafe { ptr::read_volatile(media) })
    }

    pub fn flush(&self) -> Result<()> {
        unsafe { call(self.flush_blocks, [self.this()]) }
    }
}
