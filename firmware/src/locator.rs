//! Protocol discovery and binding
//!
//! Every protocol wrapper is built from the three primitives here:
//! [`locate_handles`], [`bind_protocol`] and [`locate_singleton`]. No
//! wrapper walks the handle database on its own.

use alloc::vec::Vec;
use core::ffi::c_void;
use core::ops::Deref;
use core::ptr::NonNull;

use crate::boot_services::SearchType;
use crate::call::{Ref, Word};
use crate::guid::Guid;
use crate::status::{EfiError, ErrorKind, Result, Status};
use crate::table::{BootServices, Handle};

/// A firmware protocol: an identifier plus the layout of its operation table.
pub trait Protocol {
    const GUID: Guid;
    const NAME: &'static str;
}

/// Non-owning typed reference to a protocol's operation table on a handle.
///
/// The table belongs to firmware. Fields are read through the pointer on
/// every access, never cached.
pub struct Interface<P: Protocol> {
    ptr: NonNull<P>,
    handle: Handle,
}

impl<P: Protocol> Interface<P> {
    /// # Safety
    /// `ptr` must point at a live table of layout `P`.
    pub unsafe fn from_raw(handle: Handle, ptr: *mut c_void) -> Result<Self> {
        match NonNull::new(ptr as *mut P) {
            Some(ptr) => Ok(Self { ptr, handle }),
            None => {
                log::error!("{} bound to a null interface", P::NAME);
                Err(EfiError::new(Status::DEVICE_ERROR))
            }
        }
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn as_ptr(&self) -> *mut P {
        self.ptr.as_ptr()
    }

    /// The `this` argument for calls through this table.
    pub fn this(&self) -> Word {
        unsafe { Ref::firmware(self.ptr.as_ptr()) }.word()
    }
}

impl<P: Protocol> Deref for Interface<P> {
    type Target = P;

    fn deref(&self) -> &P {
        unsafe { self.ptr.as_ref() }
    }
}

impl<P: Protocol> Clone for Interface<P> {
    fn clone(&self) -> Self {
        Self {
            ptr: self.ptr,
            handle: self.handle,
        }
    }
}

impl<P: Protocol> core::fmt::Debug for Interface<P> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Interface")
            .field("protocol", &P::NAME)
            .field("handle", &self.handle)
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// HANDLE ENUMERATION
// ═══════════════════════════════════════════════════════════════════════════

/// Pool-allocated handle array, freed exactly once on drop.
pub struct HandleBuffer<'a> {
    bs: &'a BootServices,
    ptr: *mut Handle,
    len: usize,
}

impl<'a> HandleBuffer<'a> {
    fn empty(bs: &'a BootServices) -> Self {
        Self {
            bs,
            ptr: core::ptr::null_mut(),
            len: 0,
        }
    }
}

impl Deref for HandleBuffer<'_> {
    type Target = [Handle];

    fn deref(&self) -> &[Handle] {
        if self.ptr.is_null() {
            &[]
        } else {
            unsafe { core::slice::from_raw_parts(self.ptr, self.len) }
        }
    }
}

impl Drop for HandleBuffer<'_> {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            if let Err(err) = unsafe { self.bs.free_pool(self.ptr as *mut u8) } {
                log::warn!("freeing handle buffer failed: {}", err);
            }
            self.ptr = core::ptr::null_mut();
        }
    }
}

/// Every handle exposing `guid`. None registered is an empty buffer.
pub fn locate_handles<'a>(bs: &'a BootServices, guid: &Guid) -> Result<HandleBuffer<'a>> {
    match bs.locate_handle_buffer(SearchType::ByProtocol, Some(guid)) {
        Ok((len, ptr)) => Ok(HandleBuffer { bs, ptr, len }),
        Err(err) if err.kind() == ErrorKind::NotFound => {
            log::debug!("no handles for {}", guid);
            Ok(HandleBuffer::empty(bs))
        }
        Err(err) => Err(err),
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// BINDING
// ═══════════════════════════════════════════════════════════════════════════

/// Untyped projection of `handle` onto `guid`.
///
/// `NOT_FOUND` when the handle lacks the protocol (firmware reports either
/// `NOT_FOUND` or `UNSUPPORTED`); `DEVICE_ERROR` when firmware claims
/// success but hands back nothing.
pub fn bind_guid(bs: &BootServices, handle: Handle, guid: &Guid) -> Result<NonNull<c_void>> {
    let ptr = match bs.handle_protocol(handle, guid) {
        Ok(ptr) => ptr,
        Err(err) if matches!(err.kind(), ErrorKind::NotFound | ErrorKind::Unsupported) => {
            return Err(EfiError::new(Status::NOT_FOUND));
        }
        Err(err) => return Err(err),
    };
    NonNull::new(ptr).ok_or(EfiError::new(Status::DEVICE_ERROR))
}

pub fn bind_protocol<P: Protocol>(bs: &BootServices, handle: Handle) -> Result<Interface<P>> {
    let ptr = bind_guid(bs, handle, &P::GUID)?;
    unsafe { Interface::from_raw(handle, ptr.as_ptr()) }
}

/// The single registered instance of `P`.
pub fn locate_singleton<P: Protocol>(bs: &BootServices) -> Result<Interface<P>> {
    let ptr = match bs.locate_protocol(&P::GUID) {
        Ok(ptr) => ptr,
        Err(err) if err.kind() == ErrorKind::Unsupported => {
            return Err(EfiError::new(Status::NOT_FOUND));
        }
        Err(err) => return Err(err),
    };
    if ptr.is_null() {
        return Err(EfiError::new(Status::NOT_FOUND));
    }
    unsafe { Interface::from_raw(Handle::NULL, ptr) }
}

/// Bind `P` on every handle that exposes it.
pub fn find_all<P: Protocol>(bs: &BootServices) -> Result<Vec<Interface<P>>> {
    let handles = locate_handles(bs, &P::GUID)?;
    let mut found = Vec::with_capacity(handles.len());
    for &handle in handles.iter() {
        match bind_protocol::<P>(bs, handle) {
            Ok(iface) => found.push(iface),
            // Handle went away between enumeration and binding
            Err(err) if err.kind() == ErrorKind::NotFound => continue,
            Err(err) => return Err(err),
        }
    }
    log::debug!("found {} {} instance(s)", found.len(), P::NAME);
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeFirmware;

    #[repr(C)]
    struct Dummy {
        revision: u64,
    }

    impl Protocol for Dummy {
        const GUID: Guid = Guid::from_values(0x1234_5678, 1, 2, [3; 8]);
        const NAME: &'static str = "Dummy";
    }

    #[test]
    fn test_locate_handles_empty_when_none() {
        let fw = FakeFirmware::new();
        let handles = locate_handles(fw.boot_services(), &Dummy::GUID).unwrap();
        assert!(handles.is_empty());
    }

    #[test]
    fn test_locate_handles_frees_buffer() {
        let fw = FakeFirmware::new();
        let mut a = Dummy { revision: 1 };
        let mut b = Dummy { revision: 2 };
        fw.install(&Dummy::GUID, &mut a as *mut Dummy as *mut c_void);
        fw.install(&Dummy::GUID, &mut b as *mut Dummy as *mut c_void);
        {
            let handles = locate_handles(fw.boot_services(), &Dummy::GUID).unwrap();
            assert_eq!(handles.len(), 2);
            assert_eq!(fw.live_allocations(), 1);
        }
        assert_eq!(fw.live_allocations(), 0);
    }

    #[test]
    fn test_bind_missing_protocol_is_not_found() {
        let fw = FakeFirmware::new();
        let handle = fw.new_handle();
        let err = bind_protocol::<Dummy>(fw.boot_services(), handle).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_bind_unsupported_is_not_found() {
        let fw = FakeFirmware::new();
        fw.fail_next("handle_protocol", Status::UNSUPPORTED);
        let handle = fw.new_handle();
        let err = bind_protocol::<Dummy>(fw.boot_services(), handle).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_bind_device_error_passes_through() {
        let fw = FakeFirmware::new();
        fw.fail_next("handle_protocol", Status::DEVICE_ERROR);
        let handle = fw.new_handle();
        let err = bind_protocol::<Dummy>(fw.boot_services(), handle).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DeviceError);
    }

    #[test]
    fn test_bind_reads_table() {
        let fw = FakeFirmware::new();
        let mut table = Dummy { revision: 7 };
        let handle = fw.install(&Dummy::GUID, &mut table as *mut Dummy as *mut c_void);
        let iface = bind_protocol::<Dummy>(fw.boot_services(), handle).unwrap();
        assert_eq!(iface.revision, 7);
        assert_eq!(iface.handle(), handle);
    }

    #[test]
    fn test_singleton() {
        let fw = FakeFirmware::new();
        assert_eq!(
            locate_singleton::<Dummy>(fw.boot_services()).unwrap_err().kind(),
            ErrorKind::NotFound
        );
        let mut table = Dummy { revision: 3 };
        fw.install(&Dummy::GUID, &mut table as *mut Dummy as *mut c_void);
        let iface = locate_singleton::<Dummy>(fw.boot_services()).unwrap();
        assert_eq!(iface.revision, 3);
    }

    #[test]
    fn test_find_all() {
        let fw = FakeFirmware::new();
        let mut tables = [Dummy { revision: 1 }, Dummy { revision: 2 }];
        for t in tables.iter_mut() {
            fw.install(&Dummy::GUID, t as *mut Dummy as *mut c_void);
        }
        let all = find_all::<Dummy>(fw.boot_services()).unwrap();
        let revisions: Vec<u64> = all.iter().map(|i| i.revision).collect();
        assert_eq!(revisions, [1, 2]);
    }
}
