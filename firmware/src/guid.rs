//! Protocol and variable-vendor identifiers.

use core::fmt;

/// 128-bit firmware identifier in its published in-memory layout.
///
/// Equality is byte-for-byte over the in-memory representation.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct Guid {
    pub data1: u32,
    pub data2: u16,
    pub data3: u16,
    pub data4: [u8; 8],
}

impl Guid {
    /// Create a GUID from component values.
    pub const fn from_values(data1: u32, data2: u16, data3: u16, data4: [u8; 8]) -> Self {
        Self {
            data1,
            data2,
            data3,
            data4,
        }
    }

    /// In-memory bytes, little-endian leading fields.
    pub const fn to_bytes(&self) -> [u8; 16] {
        let a = self.data1.to_le_bytes();
        let b = self.data2.to_le_bytes();
        let c = self.data3.to_le_bytes();
        let d = self.data4;
        [
            a[0], a[1], a[2], a[3], b[0], b[1], c[0], c[1], d[0], d[1], d[2], d[3], d[4], d[5],
            d[6], d[7],
        ]
    }

    /// Rebuild from in-memory bytes.
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self {
            data1: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            data2: u16::from_le_bytes([bytes[4], bytes[5]]),
            data3: u16::from_le_bytes([bytes[6], bytes[7]]),
            data4: [
                bytes[8], bytes[9], bytes[10], bytes[11], bytes[12], bytes[13], bytes[14],
                bytes[15],
            ],
        }
    }
}

impl PartialEq for Guid {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl Eq for Guid {}

impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let d = &self.data4;
        write!(
            f,
            "{:08x}-{:04x}-{:04x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            self.data1, self.data2, self.data3, d[0], d[1], d[2], d[3], d[4], d[5], d[6], d[7]
        )
    }
}

// ==================== Protocol identifiers ====================

pub const LOADED_IMAGE_PROTOCOL: Guid = Guid::from_values(
    0x5b1b31a1,
    0x9562,
    0x11d2,
    [0x8e, 0x3f, 0x00, 0xa0, 0xc9, 0x69, 0x72, 0x3b],
);

pub const SIMPLE_FILE_SYSTEM_PROTOCOL: Guid = Guid::from_values(
    0x964e5b22,
    0x6459,
    0x11d2,
    [0x8e, 0x39, 0x00, 0xa0, 0xc9, 0x69, 0x72, 0x3b],
);

pub const BLOCK_IO_PROTOCOL: Guid = Guid::from_values(
    0x964e5b21,
    0x6459,
    0x11d2,
    [0x8e, 0x39, 0x00, 0xa0, 0xc9, 0x69, 0x72, 0x3b],
);

pub const DISK_IO_PROTOCOL: Guid = Guid::from_values(
    0xce345171,
    0xba0b,
    0x11d2,
    [0x8e, 0x4f, 0x00, 0xa0, 0xc9, 0x69, 0x72, 0x3b],
);

pub const DEVICE_PATH_PROTOCOL: Guid = Guid::from_values(
    0x09576e91,
    0x6d3f,
    0x11d2,
    [0x8e, 0x39, 0x00, 0xa0, 0xc9, 0x69, 0x72, 0x3b],
);

pub const LOAD_FILE2_PROTOCOL: Guid = Guid::from_values(
    0x4006c0c1,
    0xfcb3,
    0x403e,
    [0x99, 0x6d, 0x4a, 0x6c, 0x87, 0x24, 0xe0, 0x6d],
);

pub const SIMPLE_TEXT_INPUT_PROTOCOL: Guid = Guid::from_values(
    0x387477c1,
    0x69c7,
    0x11d2,
    [0x8e, 0x39, 0x00, 0xa0, 0xc9, 0x69, 0x72, 0x3b],
);

pub const SIMPLE_TEXT_OUTPUT_PROTOCOL: Guid = Guid::from_values(
    0x387477c2,
    0x69c7,
    0x11d2,
    [0x8e, 0x39, 0x00, 0xa0, 0xc9, 0x69, 0x72, 0x3b],
);

// ==================== File information kinds ====================

pub const FILE_INFO: Guid = Guid::from_values(
    0x09576e92,
    0x6d3f,
    0x11d2,
    [0x8e, 0x39, 0x00, 0xa0, 0xc9, 0x69, 0x72, 0x3b],
);

pub const FILE_SYSTEM_INFO: Guid = Guid::from_values(
    0x09576e93,
    0x6d3f,
    0x11d2,
    [0x8e, 0x39, 0x00, 0xa0, 0xc9, 0x69, 0x72, 0x3b],
);

pub const FILE_SYSTEM_VOLUME_LABEL: Guid = Guid::from_values(
    0xdb47d7d3,
    0xfe81,
    0x11d3,
    [0x9a, 0x35, 0x00, 0x90, 0x27, 0x3f, 0xc1, 0x4d],
);

// ==================== Vendor identifiers ====================

/// Vendor media device path the Linux EFI stub looks up for its initrd.
pub const LINUX_EFI_INITRD_MEDIA: Guid = Guid::from_values(
    0x5568e427,
    0x68fc,
    0x4f3d,
    [0xac, 0x74, 0xca, 0x55, 0x52, 0x31, 0xcc, 0x68],
);

/// Namespace of the architectural global variables (`SecureBoot`, `SetupMode`, ...).
pub const GLOBAL_VARIABLE: Guid = Guid::from_values(
    0x8be4df61,
    0x93ca,
    0x11d2,
    [0xaa, 0x0d, 0x00, 0xe0, 0x98, 0x03, 0x2b, 0x8c],
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guid_size() {
        assert_eq!(core::mem::size_of::<Guid>(), 16);
    }

    #[test]
    fn test_byte_layout() {
        let bytes = LOADED_IMAGE_PROTOCOL.to_bytes();
        assert_eq!(&bytes[..4], &[0xa1, 0x31, 0x1b, 0x5b]);
        assert_eq!(&bytes[4..6], &[0x62, 0x95]);
        assert_eq!(Guid::from_bytes(bytes), LOADED_IMAGE_PROTOCOL);
    }

    #[test]
    fn test_distinct_protocols_differ() {
        // Block I/O and simple file system differ only in the last byte of data1
        assert_ne!(BLOCK_IO_PROTOCOL, SIMPLE_FILE_SYSTEM_PROTOCOL);
        assert_ne!(SIMPLE_TEXT_INPUT_PROTOCOL, SIMPLE_TEXT_OUTPUT_PROTOCOL);
    }

    #[test]
    fn test_display() {
        let text = alloc::format!("{}", GLOBAL_VARIABLE);
        assert_eq!(text, "8be4df61-93ca-11d2-aa0d-00e098032b8c");
    }
}
