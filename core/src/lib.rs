//! Keel Core Library
//!
//! The verified boot flow and everything it decides with:
//! - `flow` - root volume to started image, as a state machine
//! - `trust` / `digest` - payload hashing and the trust-anchor seam
//! - `policy` - what to do given the platform's secure boot state
//! - `platform` - the firmware surface the flow runs against
//! - `command` - named actions for the shell
//!
//! Designed to be no_std compatible.

#![cfg_attr(not(test), no_std)]
#![allow(clippy::new_without_default)]

extern crate alloc;

pub mod command;
pub mod config;
pub mod digest;
pub mod error;
pub mod flow;
pub mod initrd;
pub mod platform;
pub mod policy;
pub mod trust;

pub use config::{BootConfig, MissingSignaturePolicy};
pub use digest::Digest;
pub use error::{BootError, Result};
pub use flow::{BootFailure, BootFlow, BootReport, BootRequest, BootStage};
pub use platform::{EfiFirmware, Firmware, Volume};
pub use policy::{BootAction, KeyEnrollment, TrustState};
pub use trust::{PayloadRole, PinnedDigests, TrustAnchor, TrustError};
