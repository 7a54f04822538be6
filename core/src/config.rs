//! Boot configuration.
//!
//! Everything is decided at build time: [`BootConfig::DEFAULT`] carries the
//! on-disk layout and fallbacks, and the loader adjusts it with the
//! builder-style setters before the first boot attempt.

use alloc::format;
use alloc::string::String;

use keel_firmware::poll::Budget;
use log::LevelFilter;

pub const DEFAULT_KERNEL_PATH: &str = "\\EFI\\linux\\kernel.efi";
pub const DEFAULT_CMDLINE_PATH: &str = "\\EFI\\linux\\cmdline";
pub const SIGNATURE_SUFFIX: &str = ".sig";

/// Used when no detached command line is present or readable.
pub const DEFAULT_CMDLINE: &str = " initrd=\\initrd.img console=tty1 rdinit=/sbin/initos-initrd net.ifnames=0 panic=0 init=/bin/sh console=ttyS0 initos_sidecar=/dev/sdb initos_debug=1 ";

/// What to do with a detached command line that has no signature companion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingSignaturePolicy {
    /// Hand the file to the trust anchor with no signature material.
    Ignore,
    /// Discard the file and boot with the compiled-in default.
    FallbackToDefault,
    /// Fail the boot.
    Abort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootConfig {
    pub kernel_path: &'static str,
    pub cmdline_path: &'static str,
    pub initrd_path: Option<&'static str>,
    pub signature_suffix: &'static str,
    pub default_cmdline: &'static str,
    pub missing_signature: MissingSignaturePolicy,
    /// Reset the platform after a failed boot instead of returning.
    pub reset_on_failure: bool,
    pub watchdog_disabled: bool,
    pub log_level: LevelFilter,
    /// Checks per wait on console input.
    pub input_budget: Budget,
}

impl BootConfig {
    pub const DEFAULT: BootConfig = BootConfig {
        kernel_path: DEFAULT_KERNEL_PATH,
        cmdline_path: DEFAULT_CMDLINE_PATH,
        initrd_path: None,
        signature_suffix: SIGNATURE_SUFFIX,
        default_cmdline: DEFAULT_CMDLINE,
        missing_signature: MissingSignaturePolicy::Ignore,
        reset_on_failure: false,
        watchdog_disabled: true,
        log_level: LevelFilter::Info,
        input_budget: Budget::Unbounded,
    };

    pub const fn kernel_path(mut self, path: &'static str) -> Self {
        self.kernel_path = path;
        self
    }

    pub const fn cmdline_path(mut self, path: &'static str) -> Self {
        self.cmdline_path = path;
        self
    }

    pub const fn initrd_path(mut self, path: Option<&'static str>) -> Self {
        self.initrd_path = path;
        self
    }

    pub const fn signature_suffix(mut self, suffix: &'static str) -> Self {
        self.signature_suffix = suffix;
        self
    }

    pub const fn default_cmdline(mut self, cmdline: &'static str) -> Self {
        self.default_cmdline = cmdline;
        self
    }

    pub const fn missing_signature(mut self, policy: MissingSignaturePolicy) -> Self {
        self.missing_signature = policy;
        self
    }

    pub const fn reset_on_failure(mut self, reset: bool) -> Self {
        self.reset_on_failure = reset;
        self
    }

    pub const fn watchdog_disabled(mut self, disabled: bool) -> Self {
        self.watchdog_disabled = disabled;
        self
    }

    pub const fn log_level(mut self, level: LevelFilter) -> Self {
        self.log_level = level;
        self
    }

    pub const fn input_budget(mut self, budget: Budget) -> Self {
        self.input_budget = budget;
        self
    }

    /// Path of the signature companion for `path`.
    pub fn signature_path(&self, path: &str) -> String {
        format!("{}{}", path, self.signature_suffix)
    }
}

impl Default for BootConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}
