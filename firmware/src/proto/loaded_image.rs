//! Loaded image record.
//!
//! The record is owned by firmware. The load options fields may only be
//! written between `LoadImage` and `StartImage`.

use core::ffi::c_void;
use core::ptr;

use crate::call::{call, FnRef, Word};
use crate::guid::{self, Guid};
use crate::locator::{Interface, Protocol};
use crate::status::{EfiError, Result, Status};
use crate::table::{Handle, SystemTable};
use crate::wide::WideString;

#[repr(C)]
pub struct LoadedImageProtocol {
    pub revision: u32,
    pub parent_handle: Handle,
    pub system_table: *const SystemTable,
    pub device_handle: Handle,
    pub file_path: *const c_void,
    pub reserved: *const c_void,
    pub load_options_size: u32,
    pub load_options: *const c_void,
    pub image_base: *mut c_void,
    pub image_size: u64,
    pub image_code_type: u32,
    pub image_data_type: u32,
    pub unload: FnRef,
}

impl Protocol for LoadedImageProtocol {
    const GUID: Guid = guid::LOADED_IMAGE_PROTOCOL;
    const NAME: &'static str = "LoadedImage";
}

#[cfg(target_pointer_width = "64")]
const _: () = {
    use core::mem::{offset_of, size_of};
    assert!(offset_of!(LoadedImageProtocol, load_options_size) == 48);
    assert!(offset_of!(LoadedImageProtocol, load_options) == 56);
    assert!(offset_of!(LoadedImageProtocol, image_base) == 64);
    assert!(offset_of!(LoadedImageProtocol, image_size) == 72);
    assert!(offset_of!(LoadedImageProtocol, unload) == 88);
    assert!(size_of::<LoadedImageProtocol>() == 96);
};

impl Interface<LoadedImageProtocol> {
    pub fn image_base(&self) -> *mut c_void {
        unsafe { ptr::read_volatile(&(*self.as_ptr()).image_base) }
    }

    pub fn image_size(&self) -> u64 {
        unsafe { ptr::read_volatile(&(*self.as_ptr()).image_size) }
    }

    pub fn device_handle(&self) -> Handle {
        unsafe { ptr::read_volatile(&(*self.as_ptr()).device_handle) }
    }

    pub fn load_options_size(&self) -> u32 {
        unsafe { ptr::read_volatile(&(*self.as_ptr()).load_options_size) }
    }

    pub fn load_options(&self) -> *const c_void {
        unsafe { ptr::read_volatile(&(*self.as_ptr()).load_options) }
    }

    /// Point the image's load options at `options`.
    ///
    /// The length field is the byte size of the text without its
    /// terminator; the terminator stays in the buffer.
    ///
    /// # Safety
    /// The image must be loaded and not yet started, and `options` must
    /// outlive the image's use of it (in practice: until `StartImage`
    /// returns).
    pub unsafe fn set_load_options(&self, options: &WideString) -> Result<()> {
        let size = u32::try_from(options.byte_len())
            .map_err(|_| EfiError::new(Status::BAD_BUFFER_SIZE))?;
        let record = self.as_ptr();
        ptr::write_volatile(ptr::addr_of_mut!((*record).load_options), options.as_ptr() as *const c_void);
        ptr::write_volatile(ptr::addr_of_mut!((*record).load_options_size), size);
        Ok(())
    }

    /// Clear the load options.
    ///
    /// # Safety
    /// Same window as [`set_load_options`](Self::set_load_options).
    pub unsafe fn clear_load_options(&self) {
        let record = self.as_ptr();
        ptr::write_volatile(ptr::addr_of_mut!((*record).load_options), ptr::null());
        ptr::write_volatile(ptr::addr_of_mut!((*record).load_options_size), 0);
    }

    /// Call the image's own unload entry.
    pub fn unload(&self) -> Result<()> {
        let unload = unsafe { ptr::read_volatile(&(*self.as_ptr()).unload) };
        unsafe { call(unload, [Word::from(self.handle())]) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{blank_loaded_image, FakeFirmware};

    #[test]
    fn test_record_offsets() {
        use core::mem::offset_of;
        assert_eq!(offset_of!(LoadedImageProtocol, load_options_size), 48);
        assert_eq!(offset_of!(LoadedImageProtocol, load_options), 56);
    }

    #[test]
    fn test_load_options_length_excludes_terminator() {
        let fw = FakeFirmware::new();
        let mut record = blank_loaded_image();
        let handle = fw.install(
            &LoadedImageProtocol::GUID,
            &mut record as *mut LoadedImageProtocol as *mut c_void,
        );
        let image = crate::locator::bind_protocol::<LoadedImageProtocol>(fw.boot_services(), handle)
            .unwrap();

        let cmdline = WideString::new("root=/dev/sda1 ro").unwrap();
        unsafe { image.set_load_options(&cmdline).unwrap() };

        assert_eq!(image.load_options_size(), 17 * 2);
        assert_eq!(image.load_options(), cmdline.as_ptr() as *const c_void);
        // Terminator sits right after the counted bytes
        let units = unsafe { core::slice::from_raw_parts(cmdline.as_ptr(), 18) };
        assert_eq!(units[17], 0);

        unsafe { image.clear_load_options() };
        assert_eq!(image.load_options_size(), 0);
        assert!(image.load_options().is_null());
    }

    #[test]
    fn test_unload_without_entry_is_unsupported() {
        let fw = FakeFirmware::new();
        let mut record = blank_loaded_image();
        let handle = fw.install(
            &LoadedImageProtocol::GUID,
            &mut record as *mut LoadedImageProtocol as *mut c_void,
        );
        let image = crate::locator::bind_protocol::<LoadedImageProtocol>(fw.boot_services(), handle)
            .unwrap();
        assert_eq!(image.unload().unwrap_err().status(), Status::UNSUPPORTED);
    }
}
