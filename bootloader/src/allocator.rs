//! Global allocator over firmware pool memory.
//!
//! Every allocation is an `AllocatePool` of loader data. Pool memory is
//! 8-byte aligned; larger alignments over-allocate and keep the pool
//! pointer in the word just below the block handed out.

use core::alloc::{GlobalAlloc, Layout};
use core::ptr;

use keel_firmware::boot_services::MemoryType;
use keel_firmware::table;

const POOL_ALIGN: usize = 8;

pub struct PoolAllocator;

impl PoolAllocator {
    fn pool_alloc(size: usize) -> *mut u8 {
        match table::boot_services().and_then(|bs| bs.allocate_pool(MemoryType::LoaderData, size)) {
            Ok(p) => p.as_ptr(),
            Err(_) => ptr::null_mut(),
        }
    }

    unsafe fn pool_free(p: *mut u8) {
        if let Ok(bs) = table::boot_services() {
            let _ = bs.free_pool(p);
        }
    }
}

unsafe impl GlobalAlloc for PoolAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() <= POOL_ALIGN {
            return Self::pool_alloc(layout.size());
        }
        let Some(size) = layout.size().checked_add(layout.align()) else {
            return ptr::null_mut();
        };
        let raw = Self::pool_alloc(size);
        if raw.is_null() {
            return raw;
        }
        // Pool alignment leaves at least one word below the aligned block
        let aligned = raw.add(layout.align() - raw as usize % layout.align());
        (aligned as *mut *mut u8).sub(1).write(raw);
        aligned
    }

    unsafe fn dealloc(&self, p: *mut u8, layout: Layout) {
        if p.is_null() {
            return;
        }
        if layout.align() <= POOL_ALIGN {
            Self::pool_free(p);
        } else {
            Self::pool_free((p as *mut *mut u8).sub(1).read());
        }
    }
}

#[global_allocator]
static ALLOCATOR: PoolAllocator = PoolAllocator;
