//! Firmware status words and the structured error domain.
//!
//! A status is a single machine word: zero is success, the top bit marks an
//! error, anything else is a warning. Raw words never leave the call bridge
//! unclassified; callers see either `Ok` or an [`EfiError`] with a
//! [`ErrorKind`] they can branch on.

use core::fmt;

/// Bit that marks a status word as an error.
pub const ERROR_BIT: usize = 1usize << (usize::BITS - 1);

pub type Result<T> = core::result::Result<T, EfiError>;

/// Raw firmware status word.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Status(pub usize);

impl Status {
    pub const SUCCESS: Self = Self(0);

    // Warnings
    pub const WARN_UNKNOWN_GLYPH: Self = Self(1);
    pub const WARN_DELETE_FAILURE: Self = Self(2);
    pub const WARN_WRITE_FAILURE: Self = Self(3);
    pub const WARN_BUFFER_TOO_SMALL: Self = Self(4);
    pub const WARN_STALE_DATA: Self = Self(5);

    // Errors
    pub const LOAD_ERROR: Self = Self::error(1);
    pub const INVALID_PARAMETER: Self = Self::error(2);
    pub const UNSUPPORTED: Self = Self::error(3);
    pub const BAD_BUFFER_SIZE: Self = Self::error(4);
    pub const BUFFER_TOO_SMALL: Self = Self::error(5);
    pub const NOT_READY: Self = Self::error(6);
    pub const DEVICE_ERROR: Self = Self::error(7);
    pub const WRITE_PROTECTED: Self = Self::error(8);
    pub const OUT_OF_RESOURCES: Self = Self::error(9);
    pub const VOLUME_CORRUPTED: Self = Self::error(10);
    pub const VOLUME_FULL: Self = Self::error(11);
    pub const NO_MEDIA: Self = Self::error(12);
    pub const MEDIA_CHANGED: Self = Self::error(13);
    pub const NOT_FOUND: Self = Self::error(14);
    pub const ACCESS_DENIED: Self = Self::error(15);
    pub const NO_RESPONSE: Self = Self::error(16);
    pub const NO_MAPPING: Self = Self::error(17);
    pub const TIMEOUT: Self = Self::error(18);
    pub const NOT_STARTED: Self = Self::error(19);
    pub const ALREADY_STARTED: Self = Self::error(20);
    pub const ABORTED: Self = Self::error(21);
    pub const ICMP_ERROR: Self = Self::error(22);
    pub const TFTP_ERROR: Self = Self::error(23);
    pub const PROTOCOL_ERROR: Self = Self::error(24);
    pub const INCOMPATIBLE_VERSION: Self = Self::error(25);
    pub const SECURITY_VIOLATION: Self = Self::error(26);
    pub const CRC_ERROR: Self = Self::error(27);
    pub const END_OF_MEDIA: Self = Self::error(28);
    pub const END_OF_FILE: Self = Self::error(31);
    pub const INVALID_LANGUAGE: Self = Self::error(32);
    pub const COMPROMISED_DATA: Self = Self::error(33);
    pub const IP_ADDRESS_CONFLICT: Self = Self::error(34);
    pub const HTTP_ERROR: Self = Self::error(35);

    /// Build an error status from its numeric code.
    #[inline]
    pub const fn error(code: usize) -> Self {
        Self(ERROR_BIT | code)
    }

    #[inline]
    pub const fn is_success(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn is_error(self) -> bool {
        self.0 & ERROR_BIT != 0
    }

    #[inline]
    pub const fn is_warning(self) -> bool {
        self.0 != 0 && !self.is_error()
    }

    /// Numeric code with the error bit stripped.
    #[inline]
    pub const fn code(self) -> usize {
        self.0 & !ERROR_BIT
    }

    /// Classify the status. Warnings count as success.
    #[inline]
    pub fn to_result(self) -> Result<()> {
        if self.is_error() {
            Err(EfiError::new(self))
        } else {
            if self.is_warning() {
                log::debug!("firmware warning {:#x}", self.0);
            }
            Ok(())
        }
    }

    /// Classify the status, yielding `value` on success.
    #[inline]
    pub fn to_result_with<T>(self, value: T) -> Result<T> {
        self.to_result().map(|()| value)
    }

    /// Human-readable description of the status.
    pub const fn message(self) -> &'static str {
        match self {
            Self::SUCCESS => "success",
            Self::WARN_UNKNOWN_GLYPH => "unknown glyph",
            Self::WARN_DELETE_FAILURE => "delete failure",
            Self::WARN_WRITE_FAILURE => "write failure",
            Self::WARN_BUFFER_TOO_SMALL => "buffer truncated",
            Self::WARN_STALE_DATA => "stale data",
            Self::LOAD_ERROR => "image failed to load",
            Self::INVALID_PARAMETER => "a parameter was incorrect",
            Self::UNSUPPORTED => "operation not supported",
            Self::BAD_BUFFER_SIZE => "buffer size incorrect for request",
            Self::BUFFER_TOO_SMALL => "buffer too small; size returned in parameter",
            Self::NOT_READY => "no data pending",
            Self::DEVICE_ERROR => "physical device reported an error",
            Self::WRITE_PROTECTED => "device is write-protected",
            Self::OUT_OF_RESOURCES => "out of resources",
            Self::VOLUME_CORRUPTED => "filesystem inconsistency detected",
            Self::VOLUME_FULL => "no more space on filesystem",
            Self::NO_MEDIA => "device contains no medium",
            Self::MEDIA_CHANGED => "medium changed since last access",
            Self::NOT_FOUND => "item not found",
            Self::ACCESS_DENIED => "access denied",
            Self::NO_RESPONSE => "server not found or no response",
            Self::NO_MAPPING => "no device mapping exists",
            Self::TIMEOUT => "timeout expired",
            Self::NOT_STARTED => "protocol not started",
            Self::ALREADY_STARTED => "protocol already started",
            Self::ABORTED => "operation aborted",
            Self::ICMP_ERROR => "ICMP error during network operation",
            Self::TFTP_ERROR => "TFTP error during network operation",
            Self::PROTOCOL_ERROR => "protocol error during network operation",
            Self::INCOMPATIBLE_VERSION => "requested version incompatible",
            Self::SECURITY_VIOLATION => "security violation",
            Self::CRC_ERROR => "CRC error detected",
            Self::END_OF_MEDIA => "beginning or end of media reached",
            Self::END_OF_FILE => "end of file reached",
            Self::INVALID_LANGUAGE => "invalid language specified",
            Self::COMPROMISED_DATA => "data security status unknown or compromised",
            Self::IP_ADDRESS_CONFLICT => "IP address conflict detected",
            Self::HTTP_ERROR => "HTTP error during network operation",
            _ => "unknown firmware status",
        }
    }
}

impl fmt::Debug for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_error() {
            write!(f, "Status(error {})", self.code())
        } else {
            write!(f, "Status({})", self.0)
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Coarse classification of firmware errors.
///
/// Callers decide retry and fallback policy on the kind, never on the raw
/// code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// No such handle, protocol, file or variable.
    NotFound,
    /// Hardware or firmware fault.
    DeviceError,
    /// Caller passed something the firmware rejected. A bug.
    InvalidParameter,
    /// Re-issue with the size the firmware reported.
    BufferTooSmall,
    /// Nothing pending yet; poll again.
    NotReady,
    Timeout,
    AccessDenied,
    SecurityViolation,
    Unsupported,
    OutOfResources,
    LoadError,
    Aborted,
    Other,
}

impl ErrorKind {
    /// Whether a caller can reasonably try again or fall back.
    pub const fn is_recoverable(self) -> bool {
        matches!(
            self,
            Self::NotFound | Self::BufferTooSmall | Self::NotReady | Self::Timeout
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "not found"),
            Self::DeviceError => write!(f, "device error"),
            Self::InvalidParameter => write!(f, "invalid parameter"),
            Self::BufferTooSmall => write!(f, "buffer too small"),
            Self::NotReady => write!(f, "not ready"),
            Self::Timeout => write!(f, "timeout"),
            Self::AccessDenied => write!(f, "access denied"),
            Self::SecurityViolation => write!(f, "security violation"),
            Self::Unsupported => write!(f, "unsupported"),
            Self::OutOfResources => write!(f, "out of resources"),
            Self::LoadError => write!(f, "load error"),
            Self::Aborted => write!(f, "aborted"),
            Self::Other => write!(f, "firmware error"),
        }
    }
}

/// A classified firmware error.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct EfiError {
    status: Status,
}

impl EfiError {
    /// Wrap an error status. Non-error words are coerced to `DEVICE_ERROR`
    /// so an `EfiError` never claims success.
    pub const fn new(status: Status) -> Self {
        if status.is_error() {
            Self { status }
        } else {
            Self {
                status: Status::DEVICE_ERROR,
            }
        }
    }

    pub const fn status(&self) -> Status {
        self.status
    }

    pub const fn kind(&self) -> ErrorKind {
        match self.status {
            Status::NOT_FOUND => ErrorKind::NotFound,
            Status::DEVICE_ERROR
            | Status::VOLUME_CORRUPTED
            | Status::NO_MEDIA
            | Status::MEDIA_CHANGED
            | Status::NO_RESPONSE
            | Status::NO_MAPPING
            | Status::CRC_ERROR
            | Status::END_OF_MEDIA
            | Status::ICMP_ERROR
            | Status::TFTP_ERROR
            | Status::PROTOCOL_ERROR
            | Status::HTTP_ERROR => ErrorKind::DeviceError,
            Status::INVALID_PARAMETER | Status::BAD_BUFFER_SIZE | Status::INVALID_LANGUAGE => {
                ErrorKind::InvalidParameter
            }
            Status::BUFFER_TOO_SMALL => ErrorKind::BufferTooSmall,
            Status::NOT_READY => ErrorKind::NotReady,
            Status::TIMEOUT => ErrorKind::Timeout,
            Status::ACCESS_DENIED | Status::WRITE_PROTECTED => ErrorKind::AccessDenied,
            Status::SECURITY_VIOLATION | Status::COMPROMISED_DATA => {
                ErrorKind::SecurityViolation
            }
            Status::UNSUPPORTED | Status::INCOMPATIBLE_VERSION => ErrorKind::Unsupported,
            Status::OUT_OF_RESOURCES | Status::VOLUME_FULL => ErrorKind::OutOfResources,
            Status::LOAD_ERROR | Status::NOT_STARTED | Status::ALREADY_STARTED => {
                ErrorKind::LoadError
            }
            Status::ABORTED => ErrorKind::Aborted,
            _ => ErrorKind::Other,
        }
    }

    pub const fn message(&self) -> &'static str {
        self.status.message()
    }
}

impl From<Status> for EfiError {
    fn from(status: Status) -> Self {
        Self::new(status)
    }
}

impl fmt::Debug for EfiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EfiError")
            .field("kind", &self.kind())
            .field("code", &self.status.code())
            .finish()
    }
}

impl fmt::Display for EfiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (status {:#x})", self.message(), self.status.0)
    }
}
