//! Verified initrd handed to the kernel from memory.
//!
//! The Linux EFI stub looks for a LoadFile2 protocol on a handle whose
//! device path is the `LINUX_EFI_INITRD_MEDIA` vendor node. Publishing the
//! already-verified bytes there means the initrd is never read from disk a
//! second time.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::ffi::c_void;

use keel_firmware::guid;
use keel_firmware::proto::device_path::InitrdMediaPath;
use keel_firmware::proto::load_file::MemoryLoadFile;
use keel_firmware::{BootServices, Handle, Result};

struct Published {
    load_file: Box<MemoryLoadFile>,
    path: Box<InitrdMediaPath>,
    // Backing store for `load_file`; its heap buffer never moves
    data: Vec<u8>,
}

/// An initrd published to firmware. Dropping it withdraws the protocols.
pub struct InitrdRegistration<'a> {
    bs: &'a BootServices,
    handle: Handle,
    published: Option<Published>,
}

impl<'a> InitrdRegistration<'a> {
    pub fn install(bs: &'a BootServices, data: Vec<u8>) -> Result<Self> {
        let mut load_file = Box::new(unsafe { MemoryLoadFile::new(&data) });
        let mut path = Box::new(InitrdMediaPath::new());
        let path_ptr = &mut *path as *mut InitrdMediaPath as *mut c_void;

        let mut handle = Handle::NULL;
        unsafe { bs.install_protocol_interface(&mut handle, &guid::DEVICE_PATH_PROTOCOL, path_ptr)? };

        let installed = unsafe {
            bs.install_protocol_interface(&mut handle, &guid::LOAD_FILE2_PROTOCOL, load_file.as_interface())
        };
        if let Err(err) = installed {
            if unsafe { bs.uninstall_protocol_interface(handle, &guid::DEVICE_PATH_PROTOCOL, path_ptr) }
                .is_err()
            {
                // Firmware still holds the path
                core::mem::forget(path);
            }
            return Err(err);
        }

        log::debug!("initrd published ({} bytes)", data.len());
        Ok(Self {
            bs,
            handle,
            published: Some(Published {
                load_file,
                path,
                data,
            }),
        })
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn len(&self) -> usize {
        self.published.as_ref().map_or(0, |p| p.data.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn uninstall(mut self) -> Result<()> {
        self.withdraw()
    }

    fn withdraw(&mut self) -> Result<()> {
        let Some(mut published) = self.published.take() else {
            return Ok(());
        };
        // LoadFile2 first, so the media path never outlives its loader
        let load_file = unsafe {
            self.bs.uninstall_protocol_interface(
                self.handle,
                &guid::LOAD_FILE2_PROTOCOL,
                published.load_file.as_interface(),
            )
        };
        let path = unsafe {
            self.bs.uninstall_protocol_interface(
                self.handle,
                &guid::DEVICE_PATH_PROTOCOL,
                &mut *published.path as *mut InitrdMediaPath as *mut c_void,
            )
        };
        let result = load_file.and(path);
        if result.is_err() {
            // Still reachable through firmware; never free it
            core::mem::forget(published);
        }
        result
    }
}

impl Drop for InitrdRegistration<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.withdraw() {
            log::warn!("could not withdraw initrd: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_firmware::testing::FakeFirmware;
    use keel_firmware::Status;

    #[test]
    fn test_publish_and_withdraw() {
        let fw = FakeFirmware::new();
        let reg = InitrdRegistration::install(fw.boot_services(), b"070701".to_vec()).unwrap();
        assert_eq!(reg.len(), 6);
        assert!(fw.has_protocol(&guid::LOAD_FILE2_PROTOCOL));
        assert!(fw.has_protocol(&guid::DEVICE_PATH_PROTOCOL));

        reg.uninstall().unwrap();
        assert!(!fw.has_protocol(&guid::LOAD_FILE2_PROTOCOL));
        assert!(!fw.has_protocol(&guid::DEVICE_PATH_PROTOCOL));
    }

    #[test]
    fn test_drop_withdraws() {
        let fw = FakeFirmware::new();
        {
            let _reg = InitrdRegistration::install(fw.boot_services(), vec![1, 2, 3]).unwrap();
            assert!(fw.has_protocol(&guid::LOAD_FILE2_PROTOCOL));
        }
        assert!(!fw.has_protocol(&guid::LOAD_FILE2_PROTOCOL));
        assert_eq!(fw.calls_named("uninstall_protocol_interface"), 2);
    }

    #[test]
    fn test_install_failure_leaves_nothing() {
        let fw = FakeFirmware::new();
        fw.fail_next("install_protocol_interface", Status::OUT_OF_RESOURCES);
        let err = InitrdRegistration::install(fw.boot_services(), vec![0; 16]).err().unwrap();
        assert_eq!(err.status(), Status::OUT_OF_RESOURCES);
        assert!(!fw.has_protocol(&guid::DEVICE_PATH_PROTOCOL));
        assert!(!fw.has_protocol(&guid::LOAD_FILE2_PROTOCOL));
    }
}
