//! Typed wrappers over individual protocol tables.
//!
//! Each wrapper is a `#[repr(C)]` table layout implementing
//! [`Protocol`](crate::locator::Protocol) plus accessor methods that issue
//! calls through the bridge. Wrappers never retry.

pub mod block_io;
pub mod console;
pub mod device_path;
pub mod disk_io;
pub mod file_system;
pub mod load_file;
pub mod loaded_image;
