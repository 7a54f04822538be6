//! Host-side firmware fakes.
//!
//! Real `#[repr(C)]` tables filled with `extern "efiapi"` functions, so the
//! call bridge, locator and wrappers run unmodified in host tests. State for
//! the boot and runtime service fakes is per thread; each test builds its
//! own [`FakeFirmware`]. Fakes never call back through the bridge.

extern crate std;

use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use core::cell::{Cell, RefCell, UnsafeCell};
use core::ffi::c_void;
use core::mem::offset_of;
use core::ptr;
use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::collections::HashMap;

use crate::call::FnRef;
use crate::guid::{self, Guid};
use crate::proto::block_io::{BlockIoMedia, BlockIoProtocol};
use crate::proto::console::{ConsoleIn, ConsoleOut, InputKey, TextInputProtocol, TextOutputProtocol};
use crate::proto::disk_io::DiskIoProtocol;
use crate::proto::file_system::{FileAttribute, FileInfo, FileMode, FileProtocol, SimpleFileSystemProtocol};
use crate::proto::loaded_image::LoadedImageProtocol;
use crate::status::Status;
use crate::table::{BootServices, Event, Handle, RuntimeServices, SystemTable, TableHeader};
use crate::wide::WideString;

const POOL_ALIGN: usize = 8;

enum EventKind {
    Countdown(usize),
    Keys(*const RefCell<VecDeque<InputKey>>),
}

struct Installed {
    handle: usize,
    guid: Guid,
    interface: usize,
}

#[derive(Default)]
struct State {
    allocations: HashMap<usize, usize>,
    next_handle: usize,
    protocols: Vec<Installed>,
    events: HashMap<usize, EventKind>,
    next_event: usize,
    failures: Vec<(&'static str, Status)>,
    calls: Vec<&'static str>,
    loaded: Vec<u8>,
    images: Vec<Box<LoadedImageProtocol>>,
    start_status: Option<Status>,
    started_options: Option<String>,
    initrd_at_start: Option<Vec<u8>>,
    unloaded: Vec<usize>,
    exits: Vec<usize>,
    watchdog: Option<usize>,
    variables: Vec<(String, Guid, Vec<u8>)>,
    resets: Vec<u32>,
}

std::thread_local! {
    static STATE: RefCell<State> = RefCell::new(State::default());
}

fn with_state<R>(f: impl FnOnce(&mut State) -> R) -> R {
    STATE.with(|s| f(&mut s.borrow_mut()))
}

/// Record the call and return an injected failure, if one is queued.
fn enter(name: &'static str) -> Option<Status> {
    with_state(|s| {
        s.calls.push(name);
        let at = s.failures.iter().position(|(n, _)| *n == name)?;
        Some(s.failures.remove(at).1)
    })
}

fn pool_alloc(size: usize) -> *mut u8 {
    let layout = Layout::from_size_align(size.max(1), POOL_ALIGN).unwrap();
    let p = unsafe { alloc_zeroed(layout) };
    with_state(|s| s.allocations.insert(p as usize, size.max(1)));
    p
}

fn pool_free(p: *mut u8) -> bool {
    match with_state(|s| s.allocations.remove(&(p as usize))) {
        Some(size) => {
            unsafe { dealloc(p, Layout::from_size_align(size, POOL_ALIGN).unwrap()) };
            true
        }
        None => false,
    }
}

unsafe fn read_wide(p: *const u16) -> String {
    let mut units = Vec::new();
    let mut i = 0;
    while *p.add(i) != 0 {
        units.push(*p.add(i));
        i += 1;
    }
    WideString::decode(&units)
}

unsafe fn read_guid(p: usize) -> Guid {
    *(p as *const Guid)
}

// ═══════════════════════════════════════════════════════════════════════════
// BOOT SERVICES FAKES
// ═══════════════════════════════════════════════════════════════════════════

extern "efiapi" fn fake_allocate_pool(_pool_type: usize, size: usize, out: usize) -> usize {
    if let Some(status) = enter("allocate_pool") {
        return status.0;
    }
    unsafe { *(out as *mut *mut u8) = pool_alloc(size) };
    0
}

extern "efiapi" fn fake_free_pool(buffer: usize) -> usize {
    if let Some(status) = enter("free_pool") {
        return status.0;
    }
    if pool_free(buffer as *mut u8) {
        0
    } else {
        Status::INVALID_PARAMETER.0
    }
}

extern "efiapi" fn fake_check_event(event: usize) -> usize {
    if let Some(status) = enter("check_event") {
        return status.0;
    }
    with_state(|s| match s.events.get_mut(&event) {
        Some(EventKind::Countdown(0)) => 0,
        Some(EventKind::Countdown(n)) => {
            *n -= 1;
            Status::NOT_READY.0
        }
        Some(EventKind::Keys(keys)) => {
            if unsafe { (**keys).borrow().is_empty() } {
                Status::NOT_READY.0
            } else {
                0
            }
        }
        None => Status::INVALID_PARAMETER.0,
    })
}

extern "efiapi" fn fake_handle_protocol(handle: usize, guid: usize, out: usize) -> usize {
    if let Some(status) = enter("handle_protocol") {
        return status.0;
    }
    let guid = unsafe { read_guid(guid) };
    let found = with_state(|s| {
        s.protocols
            .iter()
            .find(|p| p.handle == handle && p.guid == guid)
            .map(|p| p.interface)
    });
    match found {
        Some(iface) => {
            unsafe { *(out as *mut usize) = iface };
            0
        }
        None => Status::UNSUPPORTED.0,
    }
}

extern "efiapi" fn fake_locate_protocol(guid: usize, _registration: usize, out: usize) -> usize {
    if let Some(status) = enter("locate_protocol") {
        return status.0;
    }
    let guid = unsafe { read_guid(guid) };
    let found = with_state(|s| s.protocols.iter().find(|p| p.guid == guid).map(|p| p.interface));
    match found {
        Some(iface) => {
            unsafe { *(out as *mut usize) = iface };
            0
        }
        None => Status::NOT_FOUND.0,
    }
}

extern "efiapi" fn fake_locate_handle_buffer(
    _search: usize,
    guid: usize,
    _key: usize,
    count_out: usize,
    buffer_out: usize,
) -> usize {
    if let Some(status) = enter("locate_handle_buffer") {
        return status.0;
    }
    let guid = unsafe { read_guid(guid) };
    let handles: Vec<usize> = with_state(|s| {
        let mut seen = Vec::new();
        for p in s.protocols.iter().filter(|p| p.guid == guid) {
            if !seen.contains(&p.handle) {
                seen.push(p.handle);
            }
        }
        seen
    });
    if handles.is_empty() {
        return Status::NOT_FOUND.0;
    }
    let buffer = pool_alloc(handles.len() * core::mem::size_of::<usize>()) as *mut usize;
    unsafe {
        for (i, h) in handles.iter().enumerate() {
            *buffer.add(i) = *h;
        }
        *(count_out as *mut usize) = handles.len();
        *(buffer_out as *mut *mut usize) = buffer;
    }
    0
}

extern "efiapi" fn fake_install_protocol_interface(
    handle_inout: usize,
    guid: usize,
    _interface_type: usize,
    interface: usize,
) -> usize {
    if let Some(status) = enter("install_protocol_interface") {
        return status.0;
    }
    let guid = unsafe { read_guid(guid) };
    let slot = handle_inout as *mut usize;
    let handle = unsafe { *slot };
    let handle = if handle == 0 {
        let h = with_state(next_handle);
        unsafe { *slot = h };
        h
    } else {
        handle
    };
    with_state(|s| {
        s.protocols.push(Installed {
            handle,
            guid,
            interface,
        })
    });
    0
}

extern "efiapi" fn fake_uninstall_protocol_interface(handle: usize, guid: usize, interface: usize) -> usize {
    if let Some(status) = enter("uninstall_protocol_interface") {
        return status.0;
    }
    let guid = unsafe { read_guid(guid) };
    with_state(|s| {
        let at = s
            .protocols
            .iter()
            .position(|p| p.handle == handle && p.guid == guid && p.interface == interface);
        match at {
            Some(at) => {
                s.protocols.remove(at);
                0
            }
            None => Status::NOT_FOUND.0,
        }
    })
}

extern "efiapi" fn fake_load_image(
    _boot_policy: usize,
    _parent: usize,
    _device_path: usize,
    source: usize,
    size: usize,
    image_out: usize,
) -> usize {
    if let Some(status) = enter("load_image") {
        return status.0;
    }
    let bytes = unsafe { core::slice::from_raw_parts(source as *const u8, size) }.to_vec();
    let mut record = Box::new(blank_loaded_image());
    record.image_base = source as *mut c_void;
    record.image_size = size as u64;
    let iface = &mut *record as *mut LoadedImageProtocol as usize;
    let handle = with_state(|s| {
        let h = next_handle(s);
        s.loaded = bytes;
        s.images.push(record);
        s.protocols.push(Installed {
            handle: h,
            guid: guid::LOADED_IMAGE_PROTOCOL,
            interface: iface,
        });
        h
    });
    unsafe { *(image_out as *mut usize) = handle };
    0
}

extern "efiapi" fn fake_start_image(handle: usize, _exit_size: usize, _exit_data: usize) -> usize {
    if let Some(status) = enter("start_image") {
        return status.0;
    }
    // What the kernel would see: its load options and any LoadFile2 initrd
    let (record, load_file) = with_state(|s| {
        let record = s
            .protocols
            .iter()
            .find(|p| p.handle == handle && p.guid == guid::LOADED_IMAGE_PROTOCOL)
            .map(|p| p.interface);
        let load_file = s
            .protocols
            .iter()
            .find(|p| p.guid == guid::LOAD_FILE2_PROTOCOL)
            .map(|p| p.interface);
        (record, load_file)
    });
    let Some(record) = record else {
        return Status::INVALID_PARAMETER.0;
    };
    let record = unsafe { &*(record as *const LoadedImageProtocol) };
    let options = if record.load_options.is_null() {
        None
    } else {
        let units = record.load_options_size as usize / 2;
        let slice = unsafe { core::slice::from_raw_parts(record.load_options as *const u16, units + 1) };
        assert_eq!(slice[units], 0, "load options must keep their terminator");
        Some(WideString::decode(&slice[..units]))
    };
    let initrd = load_file.map(|iface| unsafe { drain_load_file(iface) });
    with_state(|s| {
        s.started_options = options;
        s.initrd_at_start = initrd;
        s.start_status.unwrap_or(Status::SUCCESS).0
    })
}

/// Pull the whole file out of a LoadFile2 table the way an OS loader does.
unsafe fn drain_load_file(iface: usize) -> Vec<u8> {
    type LoadFile = unsafe extern "efiapi" fn(usize, usize, usize, usize, usize) -> usize;
    let entry: LoadFile = core::mem::transmute::<usize, LoadFile>(*(iface as *const usize));
    let mut size = 0usize;
    let status = entry(iface, 0, 0, &mut size as *mut usize as usize, 0);
    assert_eq!(status, Status::BUFFER_TOO_SMALL.0);
    let mut data = vec![0u8; size];
    let status = entry(
        iface,
        0,
        0,
        &mut size as *mut usize as usize,
        data.as_mut_ptr() as usize,
    );
    assert_eq!(status, 0);
    data
}

extern "efiapi" fn fake_unload_image(handle: usize) -> usize {
    if let Some(status) = enter("unload_image") {
        return status.0;
    }
    with_state(|s| {
        s.unloaded.push(handle);
        s.protocols
            .retain(|p| !(p.handle == handle && p.guid == guid::LOADED_IMAGE_PROTOCOL));
    });
    0
}

extern "efiapi" fn fake_exit(handle: usize, _status: usize, _size: usize, _data: usize) -> usize {
    if let Some(status) = enter("exit") {
        return status.0;
    }
    with_state(|s| s.exits.push(handle));
    0
}

extern "efiapi" fn fake_stall(_microseconds: usize) -> usize {
    if let Some(status) = enter("stall") {
        return status.0;
    }
    0
}

extern "efiapi" fn fake_set_watchdog_timer(seconds: usize, _code: usize, _size: usize, _data: usize) -> usize {
    if let Some(status) = enter("set_watchdog_timer") {
        return status.0;
    }
    with_state(|s| s.watchdog = Some(seconds));
    0
}

// ═══════════════════════════════════════════════════════════════════════════
// RUNTIME SERVICES FAKES
// ═══════════════════════════════════════════════════════════════════════════

extern "efiapi" fn fake_get_variable(name: usize, vendor: usize, attributes: usize, size: usize, data: usize) -> usize {
    if let Some(status) = enter("get_variable") {
        return status.0;
    }
    let name = unsafe { read_wide(name as *const u16) };
    let vendor = unsafe { read_guid(vendor) };
    let value = with_state(|s| {
        s.variables
            .iter()
            .find(|(n, g, _)| *n == name && *g == vendor)
            .map(|(_, _, d)| d.clone())
    });
    let Some(value) = value else {
        return Status::NOT_FOUND.0;
    };
    unsafe {
        if attributes != 0 {
            *(attributes as *mut u32) = 0x07;
        }
        let size = size as *mut usize;
        if *size < value.len() {
            *size = value.len();
            return Status::BUFFER_TOO_SMALL.0;
        }
        ptr::copy_nonoverlapping(value.as_ptr(), data as *mut u8, value.len());
        *size = value.len();
    }
    0
}

extern "efiapi" fn fake_get_next_variable_name(size: usize, name: usize, vendor: usize) -> usize {
    if let Some(status) = enter("get_next_variable_name") {
        return status.0;
    }
    let current = unsafe { read_wide(name as *const u16) };
    let current_vendor = unsafe { read_guid(vendor) };
    let next = with_state(|s| {
        let index = if current.is_empty() {
            0
        } else {
            match s
                .variables
                .iter()
                .position(|(n, g, _)| *n == current && *g == current_vendor)
            {
                Some(at) => at + 1,
                None => return Err(Status::INVALID_PARAMETER),
            }
        };
        Ok(s.variables.get(index).map(|(n, g, _)| (n.clone(), *g)))
    });
    let (next_name, next_vendor) = match next {
        Ok(Some(found)) => found,
        Ok(None) => return Status::NOT_FOUND.0,
        Err(status) => return status.0,
    };
    let Ok(wide) = WideString::new(&next_name) else {
        return Status::DEVICE_ERROR.0;
    };
    let units = wide.as_slice_with_nul();
    unsafe {
        let size = size as *mut usize;
        if *size < units.len() * 2 {
            *size = units.len() * 2;
            return Status::BUFFER_TOO_SMALL.0;
        }
        ptr::copy_nonoverlapping(units.as_ptr(), name as *mut u16, units.len());
        *size = units.len() * 2;
        *(vendor as *mut Guid) = next_vendor;
    }
    0
}

extern "efiapi" fn fake_reset_system(kind: usize, _status: usize, _size: usize, _data: usize) -> usize {
    if let Some(status) = enter("reset_system") {
        return status.0;
    }
    with_state(|s| s.resets.push(kind as u32));
    0
}

fn next_handle(s: &mut State) -> usize {
    s.next_handle += 1;
    0x1000 + s.next_handle * 0x10
}

fn fnref(addr: usize) -> FnRef {
    FnRef::from_raw(addr)
}

/// A loaded image record with every field empty.
pub fn blank_loaded_image() -> LoadedImageProtocol {
    LoadedImageProtocol {
        revision: 0x1000,
        parent_handle: Handle::NULL,
        system_table: ptr::null(),
        device_handle: Handle::NULL,
        file_path: ptr::null(),
        reserved: ptr::null(),
        load_options_size: 0,
        load_options: ptr::null(),
        image_base: ptr::null_mut(),
        image_size: 0,
        image_code_type: 1,
        image_data_type: 2,
        unload: FnRef::NULL,
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// FAKE FIRMWARE
// ═══════════════════════════════════════════════════════════════════════════

/// Boot and runtime service tables backed by per-thread fake state.
pub struct FakeFirmware {
    bs: Box<BootServices>,
    rt: Box<RuntimeServices>,
    st: Box<SystemTable>,
}

impl FakeFirmware {
    pub fn new() -> Self {
        STATE.with(|s| *s.borrow_mut() = State::default());

        let mut bs = Box::new(BootServices::empty());
        bs.allocate_pool = fnref(fake_allocate_pool as usize);
        bs.free_pool = fnref(fake_free_pool as usize);
        bs.check_event = fnref(fake_check_event as usize);
        bs.handle_protocol = fnref(fake_handle_protocol as usize);
        bs.locate_protocol = fnref(fake_locate_protocol as usize);
        bs.locate_handle_buffer = fnref(fake_locate_handle_buffer as usize);
        bs.install_protocol_interface = fnref(fake_install_protocol_interface as usize);
        bs.uninstall_protocol_interface = fnref(fake_uninstall_protocol_interface as usize);
        bs.load_image = fnref(fake_load_image as usize);
        bs.start_image = fnref(fake_start_image as usize);
        bs.unload_image = fnref(fake_unload_image as usize);
        bs.exit = fnref(fake_exit as usize);
        bs.stall = fnref(fake_stall as usize);
        bs.set_watchdog_timer = fnref(fake_set_watchdog_timer as usize);

        let mut rt = Box::new(RuntimeServices::empty());
        rt.get_variable = fnref(fake_get_variable as usize);
        rt.get_next_variable_name = fnref(fake_get_next_variable_name as usize);
        rt.reset_system = fnref(fake_reset_system as usize);

        let st = Box::new(SystemTable {
            hdr: TableHeader {
                signature: SystemTable::SIGNATURE,
                ..TableHeader::default()
            },
            firmware_vendor: ptr::null(),
            firmware_revision: 0,
            console_in_handle: Handle::NULL,
            con_in: ptr::null_mut(),
            console_out_handle: Handle::NULL,
            con_out: ptr::null_mut(),
            standard_error_handle: Handle::NULL,
            std_err: ptr::null_mut(),
            runtime_services: &*rt as *const RuntimeServices,
            boot_services: &*bs as *const BootServices,
            number_of_table_entries: 0,
            configuration_table: ptr::null(),
        });

        Self { bs, rt, st }
    }

    pub fn boot_services(&self) -> &BootServices {
        &self.bs
    }

    pub fn runtime_services(&self) -> &RuntimeServices {
        &self.rt
    }

    pub fn system_table(&self) -> &SystemTable {
        &self.st
    }

    pub fn new_handle(&self) -> Handle {
        Handle::from_ptr(with_state(next_handle) as *mut c_void)
    }

    /// Install `interface` on a fresh handle.
    pub fn install(&self, guid: &Guid, interface: *mut c_void) -> Handle {
        let handle = self.new_handle();
        self.install_on(handle, guid, interface);
        handle
    }

    pub fn install_on(&self, handle: Handle, guid: &Guid, interface: *mut c_void) {
        with_state(|s| {
            s.protocols.push(Installed {
                handle: handle.as_ptr() as usize,
                guid: *guid,
                interface: interface as usize,
            })
        });
    }

    pub fn has_protocol(&self, guid: &Guid) -> bool {
        with_state(|s| s.protocols.iter().any(|p| p.guid == *guid))
    }

    /// Make the next call to `name` fail with `status`.
    pub fn fail_next(&self, name: &'static str, status: Status) {
        with_state(|s| s.failures.push((name, status)));
    }

    pub fn calls(&self) -> Vec<&'static str> {
        with_state(|s| s.calls.clone())
    }

    pub fn calls_named(&self, name: &str) -> usize {
        with_state(|s| s.calls.iter().filter(|c| **c == name).count())
    }

    pub fn live_allocations(&self) -> usize {
        with_state(|s| s.allocations.len())
    }

    /// An event that reports pending `n` times, then signalled.
    pub fn event_signalled_after(&self, n: usize) -> Event {
        with_state(|s| {
            s.next_event += 1;
            let id = 0xe000 + s.next_event * 8;
            s.events.insert(id, EventKind::Countdown(n));
            Event::from_ptr(id as *mut c_void)
        })
    }

    fn register_key_event(&self, event: Event, keys: *const RefCell<VecDeque<InputKey>>) {
        with_state(|s| s.events.insert(event.0 as usize, EventKind::Keys(keys)));
    }

    pub fn loaded_bytes(&self) -> Vec<u8> {
        with_state(|s| s.loaded.clone())
    }

    pub fn set_start_status(&self, status: Status) {
        with_state(|s| s.start_status = Some(status));
    }

    /// Load options the started image saw.
    pub fn started_options(&self) -> Option<String> {
        with_state(|s| s.started_options.clone())
    }

    /// Initrd bytes served over LoadFile2 while the image was starting.
    pub fn initrd_at_start(&self) -> Option<Vec<u8>> {
        with_state(|s| s.initrd_at_start.clone())
    }

    pub fn unloaded_images(&self) -> usize {
        with_state(|s| s.unloaded.len())
    }

    pub fn exits(&self) -> usize {
        with_state(|s| s.exits.len())
    }

    pub fn watchdog_seconds(&self) -> Option<usize> {
        with_state(|s| s.watchdog)
    }

    pub fn set_variable(&self, name: &str, vendor: Guid, data: &[u8]) {
        with_state(|s| s.variables.push((String::from(name), vendor, data.to_vec())));
    }

    pub fn resets(&self) -> Vec<u32> {
        with_state(|s| s.resets.clone())
    }
}

impl Default for FakeFirmware {
    fn default() -> Self {
        Self::new()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// FAKE DISK
// ═══════════════════════════════════════════════════════════════════════════

#[repr(C)]
struct DiskInner {
    disk_io: DiskIoProtocol,
    block_io: BlockIoProtocol,
    media: UnsafeCell<BlockIoMedia>,
    data: RefCell<Vec<u8>>,
    flushes: Cell<usize>,
}

/// In-memory disk exposing Disk I/O and Block I/O.
pub struct FakeDisk {
    inner: Box<DiskInner>,
}

extern "efiapi" fn fake_read_disk(this: usize, _media_id: usize, offset: usize, size: usize, buffer: usize) -> usize {
    let inner = unsafe { &*(this as *const DiskInner) };
    let data = inner.data.borrow();
    let Some(end) = offset.checked_add(size).filter(|end| *end <= data.len()) else {
        return Status::INVALID_PARAMETER.0;
    };
    unsafe { ptr::copy_nonoverlapping(data[offset..end].as_ptr(), buffer as *mut u8, size) };
    0
}

extern "efiapi" fn fake_write_disk(this: usize, _media_id: usize, offset: usize, size: usize, buffer: usize) -> usize {
    let inner = unsafe { &*(this as *const DiskInner) };
    let mut data = inner.data.borrow_mut();
    let Some(end) = offset.checked_add(size).filter(|end| *end <= data.len()) else {
        return Status::INVALID_PARAMETER.0;
    };
    let src = unsafe { core::slice::from_raw_parts(buffer as *const u8, size) };
    data[offset..end].copy_from_slice(src);
    0
}

extern "efiapi" fn fake_flush_blocks(this: usize) -> usize {
    let inner = unsafe { &*((this - offset_of!(DiskInner, block_io)) as *const DiskInner) };
    inner.flushes.set(inner.flushes.get() + 1);
    0
}

impl FakeDisk {
    pub fn new(size: usize, read_only: bool) -> Self {
        let mut inner = Box::new(DiskInner {
            disk_io: DiskIoProtocol {
                revision: 0x10000,
                read_disk: fnref(fake_read_disk as usize),
                write_disk: fnref(fake_write_disk as usize),
            },
            block_io: BlockIoProtocol {
                revision: 0x10000,
                media: ptr::null(),
                reset: FnRef::NULL,
                read_blocks: FnRef::NULL,
                write_blocks: FnRef::NULL,
                flush_blocks: fnref(fake_flush_blocks as usize),
            },
            media: UnsafeCell::new(BlockIoMedia {
                media_id: 1,
                media_present: true,
                read_only,
                block_size: 512,
                last_block: (size / 512) as u64 - 1,
                ..BlockIoMedia::default()
            }),
            data: RefCell::new(vec![0u8; size]),
            flushes: Cell::new(0),
        });
        inner.block_io.media = inner.media.get();
        Self { inner }
    }

    pub fn install(&self, fw: &FakeFirmware) -> Handle {
        let handle = fw.install(
            &guid::DISK_IO_PROTOCOL,
            &self.inner.disk_io as *const DiskIoProtocol as *mut c_void,
        );
        fw.install_on(
            handle,
            &guid::BLOCK_IO_PROTOCOL,
            &self.inner.block_io as *const BlockIoProtocol as *mut c_void,
        );
        handle
    }

    pub fn eject(&self) {
        unsafe { (*self.inner.media.get()).media_present = false };
    }

    pub fn flushes(&self) -> usize {
        self.inner.flushes.get()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// FAKE VOLUME
// ═══════════════════════════════════════════════════════════════════════════

#[repr(C)]
struct VolumeInner {
    fs: SimpleFileSystemProtocol,
    files: RefCell<HashMap<String, Vec<u8>>>,
    // GetInfo sizes that disagree with the stored bytes
    reported_sizes: RefCell<HashMap<String, u64>>,
    opened: Cell<usize>,
    closed: Cell<usize>,
}

#[repr(C)]
struct FileNode {
    proto: FileProtocol,
    volume: *const VolumeInner,
    path: String,
    position: usize,
    directory: bool,
}

fn file_table() -> FileProtocol {
    FileProtocol {
        revision: 0x10000,
        open: fnref(fake_file_open as usize),
        close: fnref(fake_file_close as usize),
        delete: fnref(fake_file_delete as usize),
        read: fnref(fake_file_read as usize),
        write: fnref(fake_file_write as usize),
        get_position: fnref(fake_file_get_position as usize),
        set_position: fnref(fake_file_set_position as usize),
        get_info: fnref(fake_file_get_info as usize),
        set_info: FnRef::NULL,
        flush: fnref(fake_file_flush as usize),
    }
}

fn normalize(path: &str) -> String {
    path.trim_start_matches('\\').trim_end_matches('\\').into()
}

fn new_node(volume: *const VolumeInner, path: String, directory: bool) -> *mut FileNode {
    unsafe { (*volume).opened.set((*volume).opened.get() + 1) };
    Box::into_raw(Box::new(FileNode {
        proto: file_table(),
        volume,
        path,
        position: 0,
        directory,
    }))
}

extern "efiapi" fn fake_open_volume(this: usize, out: usize) -> usize {
    let volume = this as *const VolumeInner;
    let node = new_node(volume, String::new(), true);
    unsafe { *(out as *mut *mut FileNode) = node };
    0
}

extern "efiapi" fn fake_file_open(this: usize, out: usize, name: usize, mode: usize, _attrs: usize) -> usize {
    let node = unsafe { &*(this as *const FileNode) };
    let volume = unsafe { &*node.volume };
    let name = unsafe { read_wide(name as *const u16) };
    let path = if name.starts_with('\\') || node.path.is_empty() {
        normalize(&name)
    } else {
        normalize(&std::format!("{}\\{}", node.path, name))
    };
    let mode = FileMode::from_bits_retain(mode as u64);
    let mut files = volume.files.borrow_mut();
    let directory = if files.contains_key(&path) {
        false
    } else if files.keys().any(|k| k.starts_with(&std::format!("{}\\", path))) {
        true
    } else if mode.contains(FileMode::CREATE) {
        files.insert(path.clone(), Vec::new());
        false
    } else {
        return Status::NOT_FOUND.0;
    };
    drop(files);
    let child = new_node(node.volume, path, directory);
    unsafe { *(out as *mut *mut FileNode) = child };
    0
}

extern "efiapi" fn fake_file_close(this: usize) -> usize {
    let node = unsafe { Box::from_raw(this as *mut FileNode) };
    let volume = unsafe { &*node.volume };
    volume.closed.set(volume.closed.get() + 1);
    0
}

extern "efiapi" fn fake_file_delete(this: usize) -> usize {
    let node = unsafe { Box::from_raw(this as *mut FileNode) };
    let volume = unsafe { &*node.volume };
    volume.files.borrow_mut().remove(&node.path);
    volume.closed.set(volume.closed.get() + 1);
    0
}

extern "efiapi" fn fake_file_read(this: usize, size: usize, buffer: usize) -> usize {
    let node = unsafe { &mut *(this as *mut FileNode) };
    let size = size as *mut usize;
    if node.directory {
        unsafe { *size = 0 };
        return 0;
    }
    let volume = unsafe { &*node.volume };
    let files = volume.files.borrow();
    let Some(data) = files.get(&node.path) else {
        return Status::DEVICE_ERROR.0;
    };
    let start = node.position.min(data.len());
    let n = unsafe { *size }.min(data.len() - start);
    unsafe {
        ptr::copy_nonoverlapping(data[start..].as_ptr(), buffer as *mut u8, n);
        *size = n;
    }
    node.position = start + n;
    0
}

extern "efiapi" fn fake_file_write(this: usize, size: usize, buffer: usize) -> usize {
    let node = unsafe { &mut *(this as *mut FileNode) };
    if node.directory {
        return Status::UNSUPPORTED.0;
    }
    let volume = unsafe { &*node.volume };
    let mut files = volume.files.borrow_mut();
    let Some(data) = files.get_mut(&node.path) else {
        return Status::DEVICE_ERROR.0;
    };
    let n = unsafe { *(size as *const usize) };
    let src = unsafe { core::slice::from_raw_parts(buffer as *const u8, n) };
    let end = node.position + n;
    if data.len() < end {
        data.resize(end, 0);
    }
    data[node.position..end].copy_from_slice(src);
    node.position = end;
    0
}

extern "efiapi" fn fake_file_get_position(this: usize, out: usize) -> usize {
    let node = unsafe { &*(this as *const FileNode) };
    unsafe { *(out as *mut u64) = node.position as u64 };
    0
}

extern "efiapi" fn fake_file_set_position(this: usize, position: usize) -> usize {
    let node = unsafe { &mut *(this as *mut FileNode) };
    let volume = unsafe { &*node.volume };
    let len = volume.files.borrow().get(&node.path).map_or(0, |d| d.len());
    node.position = if position == usize::MAX { len } else { position };
    0
}

extern "efiapi" fn fake_file_get_info(this: usize, kind: usize, size: usize, buffer: usize) -> usize {
    let node = unsafe { &*(this as *const FileNode) };
    if unsafe { read_guid(kind) } != guid::FILE_INFO {
        return Status::UNSUPPORTED.0;
    }
    let volume = unsafe { &*node.volume };
    let len = volume.files.borrow().get(&node.path).map_or(0, |d| d.len()) as u64;
    let info = FileInfo {
        file_size: volume.reported_sizes.borrow().get(&node.path).copied().unwrap_or(len),
        physical_size: len.div_ceil(512) * 512,
        attribute: if node.directory {
            FileAttribute::DIRECTORY
        } else {
            FileAttribute::ARCHIVE
        },
        name: node.path.rsplit('\\').next().unwrap_or("").into(),
    };
    let raw = info.encode();
    let size = size as *mut usize;
    unsafe {
        if *size < raw.len() {
            *size = raw.len();
            return Status::BUFFER_TOO_SMALL.0;
        }
        ptr::copy_nonoverlapping(raw.as_ptr(), buffer as *mut u8, raw.len());
        *size = raw.len();
    }
    0
}

extern "efiapi" fn fake_file_flush(_this: usize) -> usize {
    0
}

/// In-memory volume exposing the simple file system protocol.
pub struct FakeVolume {
    inner: Box<VolumeInner>,
}

impl FakeVolume {
    pub fn new() -> Self {
        Self {
            inner: Box::new(VolumeInner {
                fs: SimpleFileSystemProtocol {
                    revision: 0x10000,
                    open_volume: fnref(fake_open_volume as usize),
                },
                files: RefCell::new(HashMap::new()),
                reported_sizes: RefCell::new(HashMap::new()),
                opened: Cell::new(0),
                closed: Cell::new(0),
            }),
        }
    }

    pub fn add_file(&self, path: &str, data: &[u8]) {
        self.inner
            .files
            .borrow_mut()
            .insert(normalize(path), data.to_vec());
    }

    /// Make GetInfo report `size` for `path` whatever its contents.
    pub fn report_size(&self, path: &str, size: u64) {
        self.inner
            .reported_sizes
            .borrow_mut()
            .insert(normalize(path), size);
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.inner.files.borrow().get(&normalize(path)).cloned()
    }

    pub fn install(&self, fw: &FakeFirmware) -> Handle {
        fw.install(
            &guid::SIMPLE_FILE_SYSTEM_PROTOCOL,
            &self.inner.fs as *const SimpleFileSystemProtocol as *mut c_void,
        )
    }

    pub fn opened(&self) -> usize {
        self.inner.opened.get()
    }

    pub fn closed(&self) -> usize {
        self.inner.closed.get()
    }
}

impl Default for FakeVolume {
    fn default() -> Self {
        Self::new()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// FAKE CONSOLE
// ═══════════════════════════════════════════════════════════════════════════

#[repr(C)]
struct ConsoleInner {
    output: TextOutputProtocol,
    input: TextInputProtocol,
    written: RefCell<String>,
    output_calls: Cell<usize>,
    keys: RefCell<VecDeque<InputKey>>,
}

extern "efiapi" fn fake_output_string(this: usize, text: usize) -> usize {
    let inner = unsafe { &*(this as *const ConsoleInner) };
    let text = unsafe { read_wide(text as *const u16) };
    inner.written.borrow_mut().push_str(&text);
    inner.output_calls.set(inner.output_calls.get() + 1);
    0
}

extern "efiapi" fn fake_read_key_stroke(this: usize, key: usize) -> usize {
    let inner = unsafe { &*((this - offset_of!(ConsoleInner, input)) as *const ConsoleInner) };
    match inner.keys.borrow_mut().pop_front() {
        Some(k) => {
            unsafe { *(key as *mut InputKey) = k };
            0
        }
        None => Status::NOT_READY.0,
    }
}

/// Text console recording output and replaying queued keys.
pub struct FakeConsole {
    inner: Box<ConsoleInner>,
}

impl FakeConsole {
    pub fn new() -> Self {
        let mut inner = Box::new(ConsoleInner {
            output: TextOutputProtocol {
                reset: FnRef::NULL,
                output_string: fnref(fake_output_string as usize),
                test_string: FnRef::NULL,
                query_mode: FnRef::NULL,
                set_mode: FnRef::NULL,
                set_attribute: FnRef::NULL,
                clear_screen: FnRef::NULL,
                set_cursor_position: FnRef::NULL,
                enable_cursor: FnRef::NULL,
                mode: ptr::null(),
            },
            input: TextInputProtocol {
                reset: FnRef::NULL,
                read_key_stroke: fnref(fake_read_key_stroke as usize),
                wait_for_key: Event::NULL,
            },
            written: RefCell::new(String::new()),
            output_calls: Cell::new(0),
            keys: RefCell::new(VecDeque::new()),
        });
        let event = &inner.keys as *const RefCell<VecDeque<InputKey>> as *mut c_void;
        inner.input.wait_for_key = Event::from_ptr(event);
        Self { inner }
    }

    pub fn output(&self) -> ConsoleOut {
        let table = &self.inner.output as *const TextOutputProtocol as *mut TextOutputProtocol;
        unsafe { ConsoleOut::from_raw(Handle::NULL, table) }.unwrap()
    }

    /// Input stream whose key event is checked by `fw`.
    pub fn input(&self, fw: &FakeFirmware) -> ConsoleIn {
        fw.register_key_event(self.inner.input.wait_for_key, &self.inner.keys);
        let table = &self.inner.input as *const TextInputProtocol as *mut TextInputProtocol;
        unsafe { ConsoleIn::from_raw(Handle::NULL, table) }.unwrap()
    }

    pub fn push_keys(&self, keys: &[InputKey]) {
        self.inner.keys.borrow_mut().extend(keys.iter().copied());
    }

    /// Queue `text` as typed characters.
    pub fn type_text(&self, text: &str) {
        let keys: Vec<InputKey> = text
            .encode_utf16()
            .map(|u| InputKey {
                scan_code: 0,
                unicode_char: if u == b'\n' as u16 { 0x0d } else { u },
            })
            .collect();
        self.push_keys(&keys);
    }

    pub fn written(&self) -> String {
        self.inner.written.borrow().clone()
    }

    pub fn output_calls(&self) -> usize {
        self.inner.output_calls.get()
    }
}

impl Default for FakeConsole {
    fn default() -> Self {
        Self::new()
    }
}
