// Device path nodes for images and media served from memory

use core::mem::size_of;

use crate::boot_services::MemoryType;
use crate::call::FirmwareLayout;
use crate::guid::{self, Guid};

pub const HARDWARE_DEVICE_PATH: u8 = 0x01;
pub const MEDIA_DEVICE_PATH: u8 = 0x04;
pub const END_DEVICE_PATH: u8 = 0x7f;

pub const MEMORY_MAPPED_SUBTYPE: u8 = 0x03;
pub const VENDOR_MEDIA_SUBTYPE: u8 = 0x03;
pub const END_ENTIRE_SUBTYPE: u8 = 0xff;

/// Generic device path node header.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DevicePath {
    pub kind: u8,
    pub sub_kind: u8,
    pub length: [u8; 2],
}

impl DevicePath {
    pub const fn new(kind: u8, sub_kind: u8, length: u16) -> Self {
        Self {
            kind,
            sub_kind,
            length: length.to_le_bytes(),
        }
    }

    pub const fn end() -> Self {
        Self::new(END_DEVICE_PATH, END_ENTIRE_SUBTYPE, size_of::<Self>() as u16)
    }

    pub fn len(&self) -> u16 {
        u16::from_le_bytes(self.length)
    }

    pub fn is_end(&self) -> bool {
        self.kind == END_DEVICE_PATH && self.sub_kind == END_ENTIRE_SUBTYPE
    }

    pub fn as_ptr(&self) -> *const DevicePath {
        self as *const DevicePath
    }
}

#[repr(C)]
struct MemoryMappedNode {
    header: DevicePath,
    memory_type: u32,
    start_address: u64,
    end_address: u64,
}

/// Path naming an image that lives in a memory buffer.
#[repr(C)]
pub struct MemoryMappedPath {
    mem: MemoryMappedNode,
    end: DevicePath,
}

impl MemoryMappedPath {
    pub fn new(buffer: &[u8]) -> Self {
        let start = buffer.as_ptr() as u64;
        Self {
            mem: MemoryMappedNode {
                header: DevicePath::new(
                    HARDWARE_DEVICE_PATH,
                    MEMORY_MAPPED_SUBTYPE,
                    size_of::<MemoryMappedNode>() as u16,
                ),
                memory_type: MemoryType::LoaderData as u32,
                start_address: start,
                end_address: start + buffer.len() as u64,
            },
            end: DevicePath::end(),
        }
    }

    /// First node of the path.
    pub fn as_device_path(&self) -> &DevicePath {
        &self.mem.header
    }

    pub fn range(&self) -> (u64, u64) {
        (self.mem.start_address, self.mem.end_address)
    }
}

#[repr(C, packed)]
struct VendorNode {
    header: DevicePath,
    vendor_guid: [u8; 16],
}

/// Vendor media path the Linux EFI stub looks up to find its initrd.
#[repr(C, packed)]
pub struct InitrdMediaPath {
    vendor: VendorNode,
    end: DevicePath,
}

impl InitrdMediaPath {
    pub const fn new() -> Self {
        Self {
            vendor: VendorNode {
                header: DevicePath::new(
                    MEDIA_DEVICE_PATH,
                    VENDOR_MEDIA_SUBTYPE,
                    size_of::<VendorNode>() as u16,
                ),
                vendor_guid: guid::LINUX_EFI_INITRD_MEDIA.to_bytes(),
            },
            end: DevicePath::end(),
        }
    }

    pub fn vendor(&self) -> Guid {
        Guid::from_bytes(self.vendor.vendor_guid)
    }
}

impl Default for InitrdMediaPath {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl FirmwareLayout for DevicePath {}
unsafe impl FirmwareLayout for MemoryMappedPath {}
unsafe impl FirmwareLayout for InitrdMediaPath {}

const _: () = {
    assert!(size_of::<DevicePath>() == 4);
    assert!(size_of::<MemoryMappedNode>() == 24);
    assert!(size_of::<VendorNode>() == 20);
    assert!(size_of::<InitrdMediaPath>() == 24);
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_mapped_path_covers_buffer() {
        let buffer = [0u8; 100];
        let path = MemoryMappedPath::new(&buffer);
        let (start, end) = path.range();
        assert_eq!(end - start, 100);
        assert_eq!(path.as_device_path().len(), 24);
        assert!(path.end.is_end());
    }

    #[test]
    fn test_initrd_path_vendor() {
        let path = InitrdMediaPath::new();
        assert_eq!(path.vendor(), guid::LINUX_EFI_INITRD_MEDIA);
        let header = { path.vendor.header };
        assert_eq!(header.len(), 20);
    }
}
