//! Keel firmware layer
//!
//! Everything that touches the UEFI call surface lives here:
//! - `status` - status words and the structured error domain
//! - `call` - the call bridge every firmware call goes through
//! - `table` - system, boot and runtime service table layouts
//! - `locator` - handle database walking and protocol binding
//! - `proto` - typed wrappers over individual protocol tables
//!
//! Designed to be no_std compatible; host tests build fake firmware
//! tables out of `extern "efiapi"` functions.

#![cfg_attr(not(test), no_std)]
#![allow(clippy::missing_safety_doc)]

extern crate alloc;

pub mod boot_services;
pub mod call;
pub mod guid;
pub mod locator;
pub mod logger;
pub mod poll;
pub mod proto;
pub mod runtime;
pub mod status;
pub mod table;
pub mod wide;

pub use call::{FnRef, Ref, Word};
pub use guid::Guid;
pub use locator::{Interface, Protocol};
pub use status::{EfiError, ErrorKind, Result, Status};
pub use table::{BootServices, Event, Handle, RuntimeServices, SystemTable};
pub use wide::WideString;

#[cfg(any(test, feature = "testing"))]
pub mod testing;
