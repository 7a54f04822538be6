//! Firmware call bridge
//!
//! Every firmware call in the workspace is issued through [`issue`]. The
//! bridge owns three concerns:
//!
//! - argument marshalling: every argument is a machine [`Word`], either a
//!   scalar or an address produced by [`addr`] from the closed [`Ref`] set
//! - the switch to the firmware calling convention (`efiapi`), done in
//!   exactly one place, [`dispatch`]
//! - serialization: one global lock, held for the duration of the call, so
//!   at most one firmware call is in flight
//!
//! The raw return word is handed back as a [`Status`] and classified by
//! [`call`] before anyone interprets it.
//!
//! Callbacks handed to firmware (for example a LoadFile2 implementation)
//! run while the lock is held by whoever entered firmware, so they must not
//! issue firmware calls of their own.

use core::ffi::c_void;
use core::fmt;

use spin::Mutex;

use crate::guid::Guid;
use crate::status::{Result, Status};

/// Highest arity the firmware ABI uses.
pub const MAX_ARGS: usize = 10;

/// Serializes all firmware calls.
static CALL_LOCK: Mutex<()> = Mutex::new(());

// ═══════════════════════════════════════════════════════════════════════════
// CALL TARGETS AND ARGUMENTS
// ═══════════════════════════════════════════════════════════════════════════

/// A call target read out of a firmware operation table.
///
/// Layout-compatible with the function pointer slot it is read from. A zero
/// slot is a valid value: some firmware leaves optional services empty.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct FnRef(usize);

impl FnRef {
    pub const NULL: Self = Self(0);

    /// Wrap a raw entry point address.
    #[inline]
    pub const fn from_raw(addr: usize) -> Self {
        Self(addr)
    }

    #[inline]
    pub const fn addr(self) -> usize {
        self.0
    }

    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for FnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FnRef({:#x})", self.0)
    }
}

/// One machine-word argument.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Word(pub(crate) usize);

impl Word {
    pub const NULL: Self = Self(0);
}

impl From<usize> for Word {
    fn from(v: usize) -> Self {
        Self(v)
    }
}

impl From<u32> for Word {
    fn from(v: u32) -> Self {
        Self(v as usize)
    }
}

impl From<u16> for Word {
    fn from(v: u16) -> Self {
        Self(v as usize)
    }
}

#[cfg(target_pointer_width = "64")]
impl From<u64> for Word {
    fn from(v: u64) -> Self {
        Self(v as usize)
    }
}

impl From<bool> for Word {
    fn from(v: bool) -> Self {
        Self(v as usize)
    }
}

impl From<Status> for Word {
    fn from(v: Status) -> Self {
        Self(v.0)
    }
}

impl From<FnRef> for Word {
    fn from(v: FnRef) -> Self {
        Self(v.0)
    }
}

/// Marker for `#[repr(C)]` structures firmware reads or writes in place.
///
/// # Safety
/// Implementors must be `#[repr(C)]` (or transparent) with a layout that
/// matches the published firmware contract.
pub unsafe trait FirmwareLayout {}

unsafe impl FirmwareLayout for Guid {}

/// An address that passed one of the checked constructors on [`Ref`].
/// Only this module can build one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Checked(*mut c_void);

/// The closed set of references whose address may be handed to firmware.
///
/// Conversions exist only for these kinds; anything else fails to convert
/// and never reaches the bridge.
pub enum Ref<'a> {
    /// Input buffer.
    Bytes(&'a [u8]),
    /// Output buffer.
    BytesMut(&'a mut [u8]),
    /// NUL-terminated UTF-16 string.
    Wide(&'a [u16]),
    /// UTF-16 buffer firmware writes a string into.
    WideMut(&'a mut [u16]),
    U32(&'a mut u32),
    U64(&'a mut u64),
    Usize(&'a mut usize),
    /// Pointer-sized out slot firmware fills with an address.
    Out(&'a mut *mut c_void),
    /// A firmware-defined structure passed by address. Built by [`Ref::layout`].
    Layout(Checked),
    /// A firmware-defined structure firmware fills in. Built by [`Ref::layout_mut`].
    LayoutMut(Checked),
    /// An address firmware owns or was handed: an interface table, a pool
    /// buffer. Built by [`Ref::firmware`].
    Firmware(Checked),
}

impl<'a> Ref<'a> {
    /// Address of a read-only firmware structure.
    pub fn layout<T: FirmwareLayout>(value: &'a T) -> Self {
        Ref::Layout(Checked(value as *const T as *mut c_void))
    }

    /// Address of a firmware structure firmware may write to.
    pub fn layout_mut<T: FirmwareLayout>(value: &'a mut T) -> Self {
        Ref::LayoutMut(Checked(value as *mut T as *mut c_void))
    }

    /// Pass a firmware-owned address back to firmware unchanged.
    ///
    /// # Safety
    /// `p` must be null, come from firmware, or be a table the caller has
    /// installed (or is installing) with firmware.
    pub unsafe fn firmware<T>(p: *mut T) -> Self {
        Ref::Firmware(Checked(p as *mut c_void))
    }

    /// Address as a call argument.
    ///
    /// # Panics
    /// On a wide string without a terminating NUL; firmware would read past
    /// the end of the buffer.
    pub fn word(self) -> Word {
        match self {
            Ref::Bytes(b) => Word(b.as_ptr() as usize),
            Ref::BytesMut(b) => Word(b.as_mut_ptr() as usize),
            Ref::Wide(w) => {
                if w.last() != Some(&0) {
                    panic!("wide string handed to firmware is not NUL-terminated");
                }
                Word(w.as_ptr() as usize)
            }
            Ref::WideMut(w) => Word(w.as_mut_ptr() as usize),
            Ref::U32(v) => Word(v as *mut u32 as usize),
            Ref::U64(v) => Word(v as *mut u64 as usize),
            Ref::Usize(v) => Word(v as *mut usize as usize),
            Ref::Out(v) => Word(v as *mut *mut c_void as usize),
            Ref::Layout(p) | Ref::LayoutMut(p) | Ref::Firmware(p) => Word(p.0 as usize),
        }
    }
}

impl<'a> From<&'a [u8]> for Ref<'a> {
    fn from(v: &'a [u8]) -> Self {
        Ref::Bytes(v)
    }
}

impl<'a> From<&'a mut [u8]> for Ref<'a> {
    fn from(v: &'a mut [u8]) -> Self {
        Ref::BytesMut(v)
    }
}

impl<'a> From<&'a [u16]> for Ref<'a> {
    fn from(v: &'a [u16]) -> Self {
        Ref::Wide(v)
    }
}

impl<'a> From<&'a mut [u16]> for Ref<'a> {
    fn from(v: &'a mut [u16]) -> Self {
        Ref::WideMut(v)
    }
}

impl<'a> From<&'a mut u32> for Ref<'a> {
    fn from(v: &'a mut u32) -> Self {
        Ref::U32(v)
    }
}

impl<'a> From<&'a mut u64> for Ref<'a> {
    fn from(v: &'a mut u64) -> Self {
        Ref::U64(v)
    }
}

impl<'a> From<&'a mut usize> for Ref<'a> {
    fn from(v: &'a mut usize) -> Self {
        Ref::Usize(v)
    }
}

impl<'a> From<&'a mut *mut c_void> for Ref<'a> {
    fn from(v: &'a mut *mut c_void) -> Self {
        Ref::Out(v)
    }
}

impl<'a> From<&'a Guid> for Ref<'a> {
    fn from(v: &'a Guid) -> Self {
        Ref::layout(v)
    }
}

/// Address-of helper for call arguments.
///
/// The referent must stay alive until the call it is passed to returns.
#[inline]
pub fn addr<'a>(r: impl Into<Ref<'a>>) -> Word {
    r.into().word()
}

// ═══════════════════════════════════════════════════════════════════════════
// ISSUING CALLS
// ═══════════════════════════════════════════════════════════════════════════

/// Issue a firmware call with `N` word arguments and return its raw status.
///
/// Blocks until no other firmware call is in flight. A null target yields
/// `UNSUPPORTED` without entering firmware.
///
/// # Safety
/// `f` must come from a live firmware operation table and the arguments
/// must match the prototype of that entry. Pointer arguments must stay valid
/// for the duration of the call.
pub unsafe fn issue<const N: usize>(f: FnRef, args: [Word; N]) -> Status {
    const { assert!(N <= MAX_ARGS, "firmware calls take at most ten arguments") };
    if f.is_null() {
        log::warn!("firmware call through empty table slot");
        return Status::UNSUPPORTED;
    }
    let _guard = CALL_LOCK.lock();
    Status(dispatch(f.0, &args))
}

/// Issue a firmware call and classify the result.
///
/// # Safety
/// Same contract as [`issue`].
#[inline]
pub unsafe fn call<const N: usize>(f: FnRef, args: [Word; N]) -> Result<()> {
    issue(f, args).to_result()
}

/// Transfer control through the firmware calling convention.
///
/// The only place the workspace switches to `efiapi` for outbound calls.
unsafe fn dispatch(target: usize, args: &[Word]) -> usize {
    macro_rules! arity {
        (@word $i:tt) => { usize };
        ($($i:tt),*) => {{
            type Target = unsafe extern "efiapi" fn($(arity!(@word $i)),*) -> usize;
            let f: Target = core::mem::transmute::<usize, Target>(target);
            f($(args[$i].0),*)
        }};
    }

    match args.len() {
        0 => arity!(),
        1 => arity!(0),
        2 => arity!(0, 1),
        3 => arity!(0, 1, 2),
        4 => arity!(0, 1, 2, 3),
        5 => arity!(0, 1, 2, 3, 4),
        6 => arity!(0, 1, 2, 3, 4, 5),
        7 => arity!(0, 1, 2, 3, 4, 5, 6),
        8 => arity!(0, 1, 2, 3, 4, 5, 6, 7),
        9 => arity!(0, 1, 2, 3, 4, 5, 6, 7, 8),
        10 => arity!(0, 1, 2, 3, 4, 5, 6, 7, 8, 9),
        _ => Status::INVALID_PARAMETER.0,
    }
}
