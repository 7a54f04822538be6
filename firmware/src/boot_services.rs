//! Typed boot services.
//!
//! Thin methods over [`BootServices`] slots. Each one marshals its arguments
//! through the call bridge and classifies the status; none retries.

use core::convert::Infallible;
use core::ffi::c_void;
use core::ptr::{self, NonNull};

use crate::call::{addr, call, issue, Ref, Word};
use crate::guid::Guid;
use crate::proto::device_path::DevicePath;
use crate::status::{EfiError, Result, Status};
use crate::table::{BootServices, Event, Handle};

/// Memory type for pool allocations.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryType {
    LoaderCode = 1,
    LoaderData = 2,
    BootServicesData = 4,
    RuntimeServicesData = 6,
}

/// Search mode for handle enumeration.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchType {
    AllHandles = 0,
    ByRegisterNotify = 1,
    ByProtocol = 2,
}

/// `OpenProtocol` attributes.
pub mod open_attr {
    pub const BY_HANDLE_PROTOCOL: u32 = 0x01;
    pub const GET_PROTOCOL: u32 = 0x02;
    pub const TEST_PROTOCOL: u32 = 0x04;
    pub const BY_CHILD_CONTROLLER: u32 = 0x08;
    pub const BY_DRIVER: u32 = 0x10;
    pub const EXCLUSIVE: u32 = 0x20;
}

const NATIVE_INTERFACE: usize = 0;

impl BootServices {
    // ==================== Memory ====================

    pub fn allocate_pool(&self, memory_type: MemoryType, size: usize) -> Result<NonNull<u8>> {
        let mut buffer: *mut c_void = ptr::null_mut();
        unsafe {
            call(
                self.allocate_pool,
                [Word::from(memory_type as u32), Word(size), addr(&mut buffer)],
            )?;
        }
        NonNull::new(buffer as *mut u8).ok_or(EfiError::new(Status::OUT_OF_RESOURCES))
    }

    /// # Safety
    /// `buffer` must come from [`allocate_pool`](Self::allocate_pool) (or a
    /// firmware call that returns pool memory) and not be used afterwards.
    pub unsafe fn free_pool(&self, buffer: *mut u8) -> Result<()> {
        call(self.free_pool, [Ref::firmware(buffer).word()])
    }

    // ==================== Events ====================

    /// `true` when the event is signalled, `false` while it is still pending.
    pub fn check_event(&self, event: Event) -> Result<bool> {
        let status = unsafe { issue(self.check_event, [event.into()]) };
        match status {
            Status::NOT_READY => Ok(false),
            other => other.to_result_with(true),
        }
    }

    // ==================== Protocol handlers ====================

    /// Raw interface pointer for `guid` on `handle`.
    pub fn handle_protocol(&self, handle: Handle, guid: &Guid) -> Result<*mut c_void> {
        let mut interface: *mut c_void = ptr::null_mut();
        unsafe {
            call(
                self.handle_protocol,
                [handle.into(), addr(guid), addr(&mut interface)],
            )?;
        }
        Ok(interface)
    }

    pub fn open_protocol(
        &self,
        handle: Handle,
        guid: &Guid,
        agent: Handle,
        controller: Handle,
        attributes: u32,
    ) -> Result<*mut c_void> {
        let mut interface: *mut c_void = ptr::null_mut();
        unsafe {
            call(
                self.open_protocol,
                [
                    handle.into(),
                    addr(guid),
                    addr(&mut interface),
                    agent.into(),
                    controller.into(),
                    Word::from(attributes),
                ],
            )?;
        }
        Ok(interface)
    }

    pub fn locate_protocol(&self, guid: &Guid) -> Result<*mut c_void> {
        let mut interface: *mut c_void = ptr::null_mut();
        unsafe {
            call(
                self.locate_protocol,
                [addr(guid), Word::NULL, addr(&mut interface)],
            )?;
        }
        Ok(interface)
    }

    /// Pool-allocated handle array for `guid`. The caller owns the array.
    pub fn locate_handle_buffer(
        &self,
        search: SearchType,
        guid: Option<&Guid>,
    ) -> Result<(usize, *mut Handle)> {
        let mut count = 0usize;
        let mut buffer: *mut c_void = ptr::null_mut();
        let guid_word = match guid {
            Some(guid) => addr(guid),
            None => Word::NULL,
        };
        unsafe {
            call(
                self.locate_handle_buffer,
                [
                    Word::from(search as u32),
                    guid_word,
                    Word::NULL,
                    addr(&mut count),
                    addr(&mut buffer),
                ],
            )?;
        }
        Ok((count, buffer as *mut Handle))
    }

    /// Install `interface` under `guid`. A null `handle` asks firmware to
    /// create a new one, which is written back.
    ///
    /// # Safety
    /// `interface` must stay valid until it is uninstalled.
    pub unsafe fn install_protocol_interface(
        &self,
        handle: &mut Handle,
        guid: &Guid,
        interface: *mut c_void,
    ) -> Result<()> {
        call(
            self.install_protocol_interface,
            [
                addr(handle),
                addr(guid),
                Word(NATIVE_INTERFACE),
                Ref::firmware(interface).word(),
            ],
        )
    }

    /// # Safety
    /// `interface` must be the pointer that was installed.
    pub unsafe fn uninstall_protocol_interface(
        &self,
        handle: Handle,
        guid: &Guid,
        interface: *mut c_void,
    ) -> Result<()> {
        call(
            self.uninstall_protocol_interface,
            [handle.into(), addr(guid), Ref::firmware(interface).word()],
        )
    }

    // ==================== Images ====================

    /// Load an image from an in-memory buffer.
    pub fn load_image(
        &self,
        parent: Handle,
        device_path: Option<&DevicePath>,
        source: &[u8],
    ) -> Result<Handle> {
        let mut image = Handle::NULL;
        let path_word = match device_path {
            Some(path) => Ref::layout(path).word(),
            None => Word::NULL,
        };
        unsafe {
            call(
                self.load_image,
                [
                    Word::from(false),
                    parent.into(),
                    path_word,
                    addr(source),
                    Word(source.len()),
                    addr(&mut image),
                ],
            )?;
        }
        Ok(image)
    }

    /// Transfer control to a loaded image. Returns when the image exits.
    pub fn start_image(&self, image: Handle) -> Result<()> {
        let mut exit_data_size = 0usize;
        let mut exit_data: *mut c_void = ptr::null_mut();
        let status = unsafe {
            issue(
                self.start_image,
                [image.into(), addr(&mut exit_data_size), addr(&mut exit_data)],
            )
        };
        if !exit_data.is_null() {
            let _ = unsafe { self.free_pool(exit_data as *mut u8) };
        }
        status.to_result()
    }

    pub fn unload_image(&self, image: Handle) -> Result<()> {
        unsafe { call(self.unload_image, [image.into()]) }
    }

    /// Exit the running image. Only returns on failure.
    pub fn exit(&self, image: Handle, exit_status: Status) -> Result<Infallible> {
        unsafe {
            call(
                self.exit,
                [image.into(), Word::from(exit_status), Word(0), Word::NULL],
            )?;
        }
        Err(EfiError::new(Status::ABORTED))
    }

    // ==================== Miscellaneous ====================

    pub fn stall(&self, microseconds: usize) -> Result<()> {
        unsafe { call(self.stall, [Word(microseconds)]) }
    }

    /// Arm the watchdog; zero seconds disables it.
    pub fn set_watchdog_timer(&self, seconds: usize) -> Result<()> {
        unsafe {
            call(
                self.set_watchdog_timer,
                [Word(seconds), Word(0), Word(0), Word::NULL],
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeFirmware;

    #[test]
    fn test_pool_roundtrip() {
        let fw = FakeFirmware::new();
        let bs = fw.boot_services();
        let p = bs.allocate_pool(MemoryType::LoaderData, 64).unwrap();
        assert_eq!(fw.live_allocations(), 1);
        unsafe { bs.free_pool(p.as_ptr()).unwrap() };
        assert_eq!(fw.live_allocations(), 0);
    }

    #[test]
    fn test_check_event_pending_then_signalled() {
        let fw = FakeFirmware::new();
        let event = fw.event_signalled_after(2);
        let bs = fw.boot_services();
        assert_eq!(bs.check_event(event), Ok(false));
        assert_eq!(bs.check_event(event), Ok(false));
        assert_eq!(bs.check_event(event), Ok(true));
    }

    #[test]
    fn test_load_image_returns_handle() {
        let fw = FakeFirmware::new();
        let image = fw
            .boot_services()
            .load_image(Handle::NULL, None, b"MZ fake image")
            .unwrap();
        assert!(!image.is_null());
        assert_eq!(fw.loaded_bytes(), b"MZ fake image".to_vec());
    }

    #[test]
    fn test_watchdog_disable() {
        let fw = FakeFirmware::new();
        fw.boot_services().set_watchdog_timer(0).unwrap();
        assert_eq!(fw.watchdog_seconds(), Some(0));
    }
}
