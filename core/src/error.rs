//! Boot flow error types

use core::fmt;

use keel_firmware::wide::WideError;
use keel_firmware::{EfiError, ErrorKind};

use crate::policy::BootAction;
use crate::trust::{PayloadRole, TrustError};

pub type Result<T> = core::result::Result<T, BootError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootError {
    /// The boot device's root volume could not be opened.
    RootVolume(EfiError),
    /// The kernel file could not be read.
    KernelRead(EfiError),
    /// A signature companion required by policy is absent.
    MissingSignature(PayloadRole),
    /// The trust anchor rejected a payload.
    IntegrityViolation(PayloadRole),
    /// The trust anchor could not decide on a payload.
    TrustAnchor(PayloadRole, TrustError),
    /// A key enrollment step failed.
    Enrollment(BootAction, EfiError),
    /// The command line cannot be handed to firmware.
    CommandLine(WideError),
    LoadImage(EfiError),
    /// The loaded image's record could not be bound or patched.
    LoadedImage(EfiError),
    Initrd(EfiError),
    StartImage(EfiError),
}

impl BootError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::RootVolume(e)
            | Self::KernelRead(e)
            | Self::Enrollment(_, e)
            | Self::LoadImage(e)
            | Self::LoadedImage(e)
            | Self::Initrd(e) => e.kind(),
            Self::MissingSignature(_) | Self::IntegrityViolation(_) | Self::TrustAnchor(..) => {
                ErrorKind::SecurityViolation
            }
            Self::CommandLine(_) => ErrorKind::InvalidParameter,
            Self::StartImage(_) => ErrorKind::LoadError,
        }
    }

    /// Integrity failures are never downgraded to a fallback.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(
            self,
            Self::IntegrityViolation(_) | Self::TrustAnchor(..) | Self::MissingSignature(_)
        )
    }
}

impl fmt::Display for BootError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RootVolume(e) => write!(f, "Could not open root volume: {}", e),
            Self::KernelRead(e) => write!(f, "Could not read kernel: {}", e),
            Self::MissingSignature(role) => write!(f, "No signature for {}", role),
            Self::IntegrityViolation(role) => write!(f, "Integrity violation: {} rejected", role),
            Self::TrustAnchor(role, e) => write!(f, "Could not verify {}: {}", role, e),
            Self::Enrollment(action, e) => write!(f, "Could not {}: {}", action, e),
            Self::CommandLine(e) => write!(f, "Invalid command line: {}", e),
            Self::LoadImage(e) => write!(f, "Could not load image: {}", e),
            Self::LoadedImage(e) => write!(f, "Could not prepare loaded image: {}", e),
            Self::Initrd(e) => write!(f, "Could not publish initrd: {}", e),
            Self::StartImage(e) => write!(f, "Image failed to start: {}", e),
        }
    }
}
