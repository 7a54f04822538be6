//! Boot decisions from platform secure boot state.
//!
//! An unlocked platform (no platform key) gets the trust anchor installed,
//! an enforcing one gets its keys rotated, and a permissive one goes
//! straight to the kernel. Enrollment itself is delegated to a
//! [`KeyEnrollment`] collaborator; every path ends by loading the kernel.

use core::fmt;

use keel_firmware::Result;

/// Platform secure boot state, from the `SecureBoot` and `SetupMode`
/// global variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustState {
    /// No platform key enrolled; key databases are writable.
    SetupMode,
    /// Keys enrolled and image signatures enforced.
    Enforcing,
    /// Secure boot off, or its state could not be read.
    Permissive,
}

impl TrustState {
    /// Classify from the first byte of each variable, `None` if absent.
    pub fn from_variables(secure_boot: Option<u8>, setup_mode: Option<u8>) -> Self {
        match (setup_mode, secure_boot) {
            (Some(1), _) => Self::SetupMode,
            (_, Some(1)) => Self::Enforcing,
            _ => Self::Permissive,
        }
    }
}

impl fmt::Display for TrustState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SetupMode => write!(f, "setup mode"),
            Self::Enforcing => write!(f, "secure boot enforcing"),
            Self::Permissive => write!(f, "secure boot off"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootAction {
    InstallTrustAnchor,
    RotateKeys,
    LoadKernel,
}

impl fmt::Display for BootAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InstallTrustAnchor => write!(f, "install trust anchor"),
            Self::RotateKeys => write!(f, "rotate keys"),
            Self::LoadKernel => write!(f, "load kernel"),
        }
    }
}

pub fn plan(state: TrustState) -> BootAction {
    match state {
        TrustState::SetupMode => BootAction::InstallTrustAnchor,
        TrustState::Enforcing => BootAction::RotateKeys,
        TrustState::Permissive => BootAction::LoadKernel,
    }
}

/// Writes platform key material. Which keys is outside this crate.
pub trait KeyEnrollment {
    /// Enroll the user's key as platform key on an unlocked platform.
    fn install_anchor(&mut self) -> Result<()>;

    /// Replace enrolled keys on an enforcing platform.
    fn rotate_keys(&mut self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_variables() {
        assert_eq!(TrustState::from_variables(Some(0), Some(1)), TrustState::SetupMode);
        assert_eq!(TrustState::from_variables(Some(1), Some(0)), TrustState::Enforcing);
        assert_eq!(TrustState::from_variables(Some(0), Some(0)), TrustState::Permissive);
        assert_eq!(TrustState::from_variables(None, None), TrustState::Permissive);
    }

    #[test]
    fn test_plan() {
        assert_eq!(plan(TrustState::SetupMode), BootAction::InstallTrustAnchor);
        assert_eq!(plan(TrustState::Enforcing), BootAction::RotateKeys);
        assert_eq!(plan(TrustState::Permissive), BootAction::LoadKernel);
    }
}
