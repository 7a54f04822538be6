//! Trust-anchor seam.
//!
//! The flow hashes every payload and asks a [`TrustAnchor`] whether it is
//! authentic. Which keys or digests are trusted is the anchor's business;
//! a `false` answer or an error stops the boot.

use core::fmt;

use crate::digest::Digest;

/// What a payload is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadRole {
    Kernel,
    CommandLine,
    Initrd,
}

impl PayloadRole {
    pub const ALL: [PayloadRole; 3] = [Self::Kernel, Self::CommandLine, Self::Initrd];

    pub fn name(self) -> &'static str {
        match self {
            Self::Kernel => "kernel",
            Self::CommandLine => "command line",
            Self::Initrd => "initrd",
        }
    }
}

impl fmt::Display for PayloadRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A loaded payload as presented for verification.
#[derive(Debug, Clone, Copy)]
pub struct Payload<'a> {
    pub role: PayloadRole,
    pub path: &'a str,
    pub bytes: &'a [u8],
    pub digest: Digest,
    /// Contents of the `.sig` companion, if one was found.
    pub signature: Option<&'a [u8]>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustError {
    /// No trust material covers this role.
    NoTrustMaterial,
    /// Trust material could not be parsed.
    MalformedDigest,
    /// The anchor could not be consulted.
    Unavailable,
}

impl fmt::Display for TrustError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoTrustMaterial => write!(f, "no trust material for payload"),
            Self::MalformedDigest => write!(f, "malformed trusted digest"),
            Self::Unavailable => write!(f, "trust anchor unavailable"),
        }
    }
}

impl From<hex::FromHexError> for TrustError {
    fn from(_: hex::FromHexError) -> Self {
        Self::MalformedDigest
    }
}

pub trait TrustAnchor {
    /// `Ok(true)` only if the payload is authentic for its role.
    fn verify(&self, payload: &Payload<'_>) -> Result<bool, TrustError>;
}

impl<T: TrustAnchor + ?Sized> TrustAnchor for &T {
    fn verify(&self, payload: &Payload<'_>) -> Result<bool, TrustError> {
        (**self).verify(payload)
    }
}

/// Trust anchor holding one expected digest per role.
///
/// Signature companions are not consulted; a payload is authentic iff its
/// SHA-256 equals the pinned value. Roles without a pin are refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PinnedDigests {
    kernel: Option<Digest>,
    command_line: Option<Digest>,
    initrd: Option<Digest>,
}

impl PinnedDigests {
    pub const fn empty() -> Self {
        Self {
            kernel: None,
            command_line: None,
            initrd: None,
        }
    }

    pub fn pin(mut self, role: PayloadRole, digest: Digest) -> Self {
        *self.slot(role) = Some(digest);
        self
    }

    pub fn pin_hex(self, role: PayloadRole, hex: &str) -> Result<Self, TrustError> {
        Ok(self.pin(role, Digest::from_hex(hex)?))
    }

    pub fn pinned(&self, role: PayloadRole) -> Option<Digest> {
        match role {
            PayloadRole::Kernel => self.kernel,
            PayloadRole::CommandLine => self.command_line,
            PayloadRole::Initrd => self.initrd,
        }
    }

    fn slot(&mut self, role: PayloadRole) -> &mut Option<Digest> {
        match role {
            PayloadRole::Kernel => &mut self.kernel,
            PayloadRole::CommandLine => &mut self.command_line,
            PayloadRole::Initrd => &mut self.initrd,
        }
    }
}

impl TrustAnchor for PinnedDigests {
    fn verify(&self, payload: &Payload<'_>) -> Result<bool, TrustError> {
        let expected = self.pinned(payload.role).ok_or(TrustError::NoTrustMaterial)?;
        let diff = expected
            .as_bytes()
            .iter()
            .zip(payload.digest.as_bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b));
        Ok(diff == 0)
    }
}
