//! System, boot services and runtime services table layouts.
//!
//! Field order and width follow the published firmware contract exactly.
//! Every call slot is a [`FnRef`] so calls can only go through the bridge.
//! Offsets used by the rest of the workspace are asserted at compile time
//! on 64-bit targets.

use core::ffi::c_void;
use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};

use crate::call::{FirmwareLayout, FnRef, Ref, Word};
use crate::proto::console::{TextInputProtocol, TextOutputProtocol};
use crate::status::{EfiError, Result, Status};

/// Opaque firmware object identifier.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Handle(pub(crate) *mut c_void);

impl Handle {
    pub const NULL: Self = Self(ptr::null_mut());

    #[inline]
    pub const fn from_ptr(p: *mut c_void) -> Self {
        Self(p)
    }

    #[inline]
    pub const fn as_ptr(self) -> *mut c_void {
        self.0
    }

    #[inline]
    pub fn is_null(self) -> bool {
        self.0.is_null()
    }
}

impl From<Handle> for Word {
    fn from(h: Handle) -> Self {
        Word(h.0 as usize)
    }
}

impl<'a> From<&'a mut Handle> for Ref<'a> {
    fn from(h: &'a mut Handle) -> Self {
        Ref::Out(&mut h.0)
    }
}

/// Opaque firmware event.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Event(pub(crate) *mut c_void);

impl Event {
    pub const NULL: Self = Self(ptr::null_mut());

    #[inline]
    pub const fn from_ptr(p: *mut c_void) -> Self {
        Self(p)
    }

    #[inline]
    pub fn is_null(self) -> bool {
        self.0.is_null()
    }
}

impl From<Event> for Word {
    fn from(e: Event) -> Self {
        Word(e.0 as usize)
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct TableHeader {
    pub signature: u64,
    pub revision: u32,
    pub header_size: u32,
    pub crc32: u32,
    pub reserved: u32,
}

// ═══════════════════════════════════════════════════════════════════════════
// SYSTEM TABLE
// ═══════════════════════════════════════════════════════════════════════════

#[repr(C)]
pub struct SystemTable {
    pub hdr: TableHeader,
    pub firmware_vendor: *const u16,
    pub firmware_revision: u32,
    pub console_in_handle: Handle,
    pub con_in: *mut TextInputProtocol,
    pub console_out_handle: Handle,
    pub con_out: *mut TextOutputProtocol,
    pub standard_error_handle: Handle,
    pub std_err: *mut TextOutputProtocol,
    pub runtime_services: *const RuntimeServices,
    pub boot_services: *const BootServices,
    pub number_of_table_entries: usize,
    pub configuration_table: *const c_void,
}

impl SystemTable {
    pub const SIGNATURE: u64 = 0x5453_5953_2049_4249;

    /// Boot services, or `None` once firmware has withdrawn them.
    pub fn boot_services(&self) -> Option<&BootServices> {
        let p = unsafe { ptr::read_volatile(&self.boot_services) };
        unsafe { p.as_ref() }
    }

    pub fn runtime_services(&self) -> Option<&RuntimeServices> {
        let p = unsafe { ptr::read_volatile(&self.runtime_services) };
        unsafe { p.as_ref() }
    }

    pub fn con_out(&self) -> *mut TextOutputProtocol {
        unsafe { ptr::read_volatile(&self.con_out) }
    }

    pub fn con_in(&self) -> *mut TextInputProtocol {
        unsafe { ptr::read_volatile(&self.con_in) }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// BOOT SERVICES
// ═══════════════════════════════════════════════════════════════════════════

#[repr(C)]
pub struct BootServices {
    pub hdr: TableHeader,
    // Task priority
    pub raise_tpl: FnRef,
    pub restore_tpl: FnRef,
    // Memory
    pub allocate_pages: FnRef,
    pub free_pages: FnRef,
    pub get_memory_map: FnRef,
    pub allocate_pool: FnRef,
    pub free_pool: FnRef,
    // Events and timers
    pub create_event: FnRef,
    pub set_timer: FnRef,
    pub wait_for_event: FnRef,
    pub signal_event: FnRef,
    pub close_event: FnRef,
    pub check_event: FnRef,
    // Protocol handlers
    pub install_protocol_interface: FnRef,
    pub reinstall_protocol_interface: FnRef,
    pub uninstall_protocol_interface: FnRef,
    pub handle_protocol: FnRef,
    pub reserved: FnRef,
    pub register_protocol_notify: FnRef,
    pub locate_handle: FnRef,
    pub locate_device_path: FnRef,
    pub install_configuration_table: FnRef,
    // Images
    pub load_image: FnRef,
    pub start_image: FnRef,
    pub exit: FnRef,
    pub unload_image: FnRef,
    pub exit_boot_services: FnRef,
    // Miscellaneous
    pub get_next_monotonic_count: FnRef,
    pub stall: FnRef,
    pub set_watchdog_timer: FnRef,
    // Driver support
    pub connect_controller: FnRef,
    pub disconnect_controller: FnRef,
    // Open and close protocol
    pub open_protocol: FnRef,
    pub close_protocol: FnRef,
    pub open_protocol_information: FnRef,
    // Library
    pub protocols_per_handle: FnRef,
    pub locate_handle_buffer: FnRef,
    pub locate_protocol: FnRef,
    pub install_multiple_protocol_interfaces: FnRef,
    pub uninstall_multiple_protocol_interfaces: FnRef,
    // CRC and memory helpers
    pub calculate_crc32: FnRef,
    pub copy_mem: FnRef,
    pub set_mem: FnRef,
    pub create_event_ex: FnRef,
}

impl BootServices {
    pub const SIGNATURE: u64 = 0x5652_4553_544f_4f42;

    /// A table with every slot empty. Calls through it report `UNSUPPORTED`.
    pub const fn empty() -> Self {
        Self {
            hdr: TableHeader {
                signature: Self::SIGNATURE,
                revision: 0,
                header_size: core::mem::size_of::<Self>() as u32,
                crc32: 0,
                reserved: 0,
            },
            raise_tpl: FnRef::NULL,
            restore_tpl: FnRef::NULL,
            allocate_pages: FnRef::NULL,
            free_pages: FnRef::NULL,
            get_memory_map: FnRef::NULL,
            allocate_pool: FnRef::NULL,
            free_pool: FnRef::NULL,
            create_event: FnRef::NULL,
            set_timer: FnRef::NULL,
            wait_for_event: FnRef::NULL,
            signal_event: FnRef::NULL,
            close_event: FnRef::NULL,
            check_event: FnRef::NULL,
            install_protocol_interface: FnRef::NULL,
            reinstall_protocol_interface: FnRef::NULL,
            uninstall_protocol_interface: FnRef::NULL,
            handle_protocol: FnRef::NULL,
            reserved: FnRef::NULL,
            register_protocol_notify: FnRef::NULL,
            locate_handle: FnRef::NULL,
            locate_device_path: FnRef::NULL,
            install_configuration_table: FnRef::NULL,
            load_image: FnRef::NULL,
            start_image: FnRef::NULL,
            exit: FnRef::NULL,
            unload_image: FnRef::NULL,
            exit_boot_services: FnRef::NULL,
            get_next_monotonic_count: FnRef::NULL,
            stall: FnRef::NULL,
            set_watchdog_timer: FnRef::NULL,
            connect_controller: FnRef::NULL,
            disconnect_controller: FnRef::NULL,
            open_protocol: FnRef::NULL,
            close_protocol: FnRef::NULL,
            open_protocol_information: FnRef::NULL,
            protocols_per_handle: FnRef::NULL,
            locate_handle_buffer: FnRef::NULL,
            locate_protocol: FnRef::NULL,
            install_multiple_protocol_interfaces: FnRef::NULL,
            uninstall_multiple_protocol_interfaces: FnRef::NULL,
            calculate_crc32: FnRef::NULL,
            copy_mem: FnRef::NULL,
            set_mem: FnRef::NULL,
            create_event_ex: FnRef::NULL,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// RUNTIME SERVICES
// ═══════════════════════════════════════════════════════════════════════════

#[repr(C)]
pub struct RuntimeServices {
    pub hdr: TableHeader,
    // Time
    pub get_time: FnRef,
    pub set_time: FnRef,
    pub get_wakeup_time: FnRef,
    pub set_wakeup_time: FnRef,
    // Virtual memory
    pub set_virtual_address_map: FnRef,
    pub convert_pointer: FnRef,
    // Variables
    pub get_variable: FnRef,
    pub get_next_variable_name: FnRef,
    pub set_variable: FnRef,
    // Miscellaneous
    pub get_next_high_monotonic_count: FnRef,
    pub reset_system: FnRef,
    // Capsules
    pub update_capsule: FnRef,
    pub query_capsule_capabilities: FnRef,
    pub query_variable_info: FnRef,
}

impl RuntimeServices {
    pub const SIGNATURE: u64 = 0x5652_4553_544e_5552;

    pub const fn empty() -> Self {
        Self {
            hdr: TableHeader {
                signature: Self::SIGNATURE,
                revision: 0,
                header_size: core::mem::size_of::<Self>() as u32,
                crc32: 0,
                reserved: 0,
            },
            get_time: FnRef::NULL,
            set_time: FnRef::NULL,
            get_wakeup_time: FnRef::NULL,
            set_wakeup_time: FnRef::NULL,
            set_virtual_address_map: FnRef::NULL,
            convert_pointer: FnRef::NULL,
            get_variable: FnRef::NULL,
            get_next_variable_name: FnRef::NULL,
            set_variable: FnRef::NULL,
            get_next_high_monotonic_count: FnRef::NULL,
            reset_system: FnRef::NULL,
            update_capsule: FnRef::NULL,
            query_capsule_capabilities: FnRef::NULL,
            query_variable_info: FnRef::NULL,
        }
    }
}

unsafe impl FirmwareLayout for SystemTable {}
unsafe impl FirmwareLayout for BootServices {}
unsafe impl FirmwareLayout for RuntimeServices {}

#[cfg(target_pointer_width = "64")]
const _: () = {
    use core::mem::{offset_of, size_of};

    assert!(size_of::<TableHeader>() == 24);

    assert!(offset_of!(SystemTable, con_in) == 0x30);
    assert!(offset_of!(SystemTable, con_out) == 0x40);
    assert!(offset_of!(SystemTable, runtime_services) == 0x58);
    assert!(offset_of!(SystemTable, boot_services) == 0x60);
    assert!(size_of::<SystemTable>() == 120);

    assert!(offset_of!(BootServices, allocate_pool) == 0x40);
    assert!(offset_of!(BootServices, check_event) == 0x78);
    assert!(offset_of!(BootServices, handle_protocol) == 0x98);
    assert!(offset_of!(BootServices, load_image) == 0xc8);
    assert!(offset_of!(BootServices, start_image) == 0xd0);
    assert!(offset_of!(BootServices, set_watchdog_timer) == 0x100);
    assert!(offset_of!(BootServices, open_protocol) == 0x118);
    assert!(offset_of!(BootServices, locate_handle_buffer) == 0x138);
    assert!(offset_of!(BootServices, locate_protocol) == 0x140);
    assert!(size_of::<BootServices>() == 0x178);

    assert!(offset_of!(RuntimeServices, get_variable) == 0x48);
    assert!(offset_of!(RuntimeServices, get_next_variable_name) == 0x50);
    assert!(offset_of!(RuntimeServices, set_variable) == 0x58);
    assert!(offset_of!(RuntimeServices, reset_system) == 0x68);
    assert!(offset_of!(RuntimeServices, query_variable_info) == 0x80);
};

// ═══════════════════════════════════════════════════════════════════════════
// PROCESS GLOBALS
// ═══════════════════════════════════════════════════════════════════════════

static SYSTEM_TABLE: AtomicPtr<SystemTable> = AtomicPtr::new(ptr::null_mut());
static IMAGE_HANDLE: AtomicPtr<c_void> = AtomicPtr::new(ptr::null_mut());

/// Record the image handle and system table handed to the entry point.
///
/// # Safety
/// `system_table` must be the table firmware passed to the entry point.
pub unsafe fn init(image: Handle, system_table: *const SystemTable) {
    IMAGE_HANDLE.store(image.0, Ordering::Release);
    SYSTEM_TABLE.store(system_table as *mut SystemTable, Ordering::Release);
}

pub fn system_table() -> Result<&'static SystemTable> {
    let p = SYSTEM_TABLE.load(Ordering::Acquire);
    unsafe { p.as_ref() }.ok_or(EfiError::new(Status::NOT_READY))
}

/// Boot services, re-read from the system table on every call.
pub fn boot_services() -> Result<&'static BootServices> {
    system_table()?
        .boot_services()
        .ok_or(EfiError::new(Status::NOT_READY))
}

pub fn runtime_services() -> Result<&'static RuntimeServices> {
    system_table()?
        .runtime_services()
        .ok_or(EfiError::new(Status::NOT_READY))
}

pub fn image_handle() -> Handle {
    Handle(IMAGE_HANDLE.load(Ordering::Acquire))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_table_reports_unsupported() {
        let bs = BootServices::empty();
        let status = unsafe { crate::call::issue(bs.stall, [Word(1)]) };
        assert_eq!(status, Status::UNSUPPORTED);
    }

    #[test]
    fn test_handle_out_slot() {
        let mut handle = Handle::NULL;
        let word = crate::call::addr(&mut handle);
        assert_eq!(word.0, &handle as *const Handle as usize);
    }

    #[test]
    fn test_header_sizes() {
        assert_eq!(
            BootServices::empty().hdr.header_size as usize,
            core::mem::size_of::<BootServices>()
        );
        assert_eq!(RuntimeServices::empty().hdr.signature, RuntimeServices::SIGNATURE);
    }

    #[test]
    fn test_tables_match_published_offsets() {
        use core::mem::offset_of;
        assert_eq!(offset_of!(BootServices, load_image), 0xc8);
        assert_eq!(offset_of!(BootServices, start_image), 0xd0);
        assert_eq!(offset_of!(RuntimeServices, reset_system), 0x68);
        assert_eq!(offset_of!(SystemTable, boot_services), 0x60);
    }
}
