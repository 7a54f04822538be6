//! Verified boot flow.
//!
//! ```text
//! Start -> RootOpened -> PayloadLoaded -> PayloadVerified
//!       -> CommandLineResolved -> ImagePrepared -> ImageStarted
//! ```
//!
//! Any stage can end in failure. The kernel is read once, hashed, checked
//! by the trust anchor and handed to firmware from that same buffer; the
//! flow never loads anything the anchor has not accepted. It never resets
//! the platform either, that is left to the caller.

use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::fmt;

use keel_firmware::{EfiError, ErrorKind, Handle, WideString};

use crate::config::{BootConfig, MissingSignaturePolicy};
use crate::digest::{self, Digest};
use crate::error::{BootError, Result};
use crate::platform::{Firmware, Volume};
use crate::policy::{self, BootAction, KeyEnrollment};
use crate::trust::{Payload, PayloadRole, TrustAnchor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootStage {
    Start,
    RootOpened,
    PayloadLoaded,
    PayloadVerified,
    CommandLineResolved,
    ImagePrepared,
    ImageStarted,
}

/// One boot attempt. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootRequest {
    kernel_path: String,
    cmdline: Option<String>,
    kernel: Option<Vec<u8>>,
}

impl BootRequest {
    pub fn new(kernel_path: impl Into<String>) -> Self {
        Self {
            kernel_path: kernel_path.into(),
            cmdline: None,
            kernel: None,
        }
    }

    /// Use `cmdline` instead of the detached command line.
    pub fn with_cmdline(mut self, cmdline: impl Into<String>) -> Self {
        self.cmdline = Some(cmdline.into());
        self
    }

    /// Kernel bytes already in memory; the kernel file is not read.
    pub fn with_kernel(mut self, kernel: Vec<u8>) -> Self {
        self.kernel = Some(kernel);
        self
    }

    pub fn kernel_path(&self) -> &str {
        &self.kernel_path
    }

    pub fn cmdline(&self) -> Option<&str> {
        self.cmdline.as_deref()
    }
}

/// A payload the trust anchor accepted.
#[derive(Debug)]
pub struct VerifiedPayload {
    pub role: PayloadRole,
    pub path: String,
    pub bytes: Vec<u8>,
    pub digest: Digest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandLineSource {
    Override,
    File,
    Default,
}

/// What a successful run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootReport {
    pub action: BootAction,
    pub stages: Vec<BootStage>,
    pub kernel_digest: Digest,
    pub cmdline: String,
    pub cmdline_source: CommandLineSource,
}

/// A failed run: the last stage reached and why it stopped there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootFailure {
    pub stage: BootStage,
    pub error: BootError,
    pub stages: Vec<BootStage>,
}

impl fmt::Display for BootFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (after {:?})", self.error, self.stage)
    }
}

/// A payload read from disk, not yet verified.
struct Candidate {
    role: PayloadRole,
    path: String,
    bytes: Vec<u8>,
    signature: Option<Vec<u8>>,
}

struct Loaded {
    kernel: Candidate,
    cmdline: Option<Candidate>,
    initrd: Option<Candidate>,
}

struct Verified {
    kernel: VerifiedPayload,
    cmdline: Option<VerifiedPayload>,
    initrd: Option<VerifiedPayload>,
}

pub struct BootFlow<'a, F: Firmware, T: TrustAnchor + ?Sized> {
    fw: &'a mut F,
    anchor: &'a T,
    config: BootConfig,
    enrollment: Option<&'a mut dyn KeyEnrollment>,
    stage: BootStage,
    stages: Vec<BootStage>,
}

impl<'a, F: Firmware, T: TrustAnchor + ?Sized> BootFlow<'a, F, T> {
    pub fn new(fw: &'a mut F, anchor: &'a T, config: BootConfig) -> Self {
        Self {
            fw,
            anchor,
            config,
            enrollment: None,
            stage: BootStage::Start,
            stages: alloc::vec![BootStage::Start],
        }
    }

    pub fn with_enrollment(mut self, enrollment: &'a mut dyn KeyEnrollment) -> Self {
        self.enrollment = Some(enrollment);
        self
    }

    pub fn stage(&self) -> BootStage {
        self.stage
    }

    pub fn run(mut self, request: BootRequest) -> core::result::Result<BootReport, BootFailure> {
        match self.drive(request) {
            Ok(report) => Ok(report),
            Err(error) => {
                log::error!("boot failed at {:?}: {}", self.stage, error);
                Err(BootFailure {
                    stage: self.stage,
                    error,
                    stages: self.stages,
                })
            }
        }
    }

    fn advance(&mut self, next: BootStage) {
        log::debug!("{:?} -> {:?}", self.stage, next);
        self.stage = next;
        self.stages.push(next);
    }

    fn drive(&mut self, request: BootRequest) -> Result<BootReport> {
        let action = self.enroll()?;

        let mut root = self.fw.open_root().map_err(BootError::RootVolume)?;
        self.advance(BootStage::RootOpened);

        let loaded = self.load(&mut root, request.kernel_path, request.kernel, request.cmdline.is_none())?;
        drop(root);
        self.advance(BootStage::PayloadLoaded);

        let verified = self.verify(loaded)?;
        self.advance(BootStage::PayloadVerified);

        let (cmdline, cmdline_source) = match (request.cmdline, verified.cmdline) {
            (Some(cmdline), _) => (cmdline, CommandLineSource::Override),
            (None, Some(file)) => (
                String::from_utf8_lossy(&file.bytes).into_owned(),
                CommandLineSource::File,
            ),
            (None, None) => (self.config.default_cmdline.to_string(), CommandLineSource::Default),
        };
        let options = WideString::new(&cmdline).map_err(BootError::CommandLine)?;
        log::info!("command line ({:?}): {}", cmdline_source, cmdline);
        self.advance(BootStage::CommandLineResolved);

        let VerifiedPayload {
            path: kernel_path,
            bytes: kernel,
            digest: kernel_digest,
            ..
        } = verified.kernel;
        let image = self.fw.load_image(&kernel_path, &kernel).map_err(BootError::LoadImage)?;
        // Firmware holds its own copy now
        drop(kernel);

        if let Err(err) = unsafe { self.fw.set_load_options(image, &options) } {
            self.discard(image);
            return Err(BootError::LoadedImage(err));
        }
        if let Some(initrd) = verified.initrd {
            if let Err(err) = self.fw.install_initrd(initrd.bytes) {
                self.discard(image);
                return Err(BootError::Initrd(err));
            }
        }
        self.advance(BootStage::ImagePrepared);

        let started = self.fw.start_image(image);
        if let Err(err) = self.fw.uninstall_initrd() {
            log::warn!("could not withdraw initrd: {}", err);
        }
        if let Err(err) = started {
            self.discard(image);
            return Err(BootError::StartImage(err));
        }
        self.advance(BootStage::ImageStarted);

        // `options` backs the image's load options until here
        drop(options);
        Ok(BootReport {
            action,
            stages: core::mem::take(&mut self.stages),
            kernel_digest,
            cmdline,
            cmdline_source,
        })
    }

    /// Run the enrollment step the platform's trust state calls for.
    fn enroll(&mut self) -> Result<BootAction> {
        let state = self.fw.trust_state();
        let action = policy::plan(state);
        log::info!("platform is in {}: {}", state, action);

        let step = match (action, self.enrollment.as_deref_mut()) {
            (BootAction::LoadKernel, _) => return Ok(action),
            (_, None) => {
                log::warn!("no key enrollment configured, skipping {}", action);
                return Ok(action);
            }
            (BootAction::InstallTrustAnchor, Some(enrollment)) => enrollment.install_anchor(),
            (BootAction::RotateKeys, Some(enrollment)) => enrollment.rotate_keys(),
        };
        step.map_err(|err| BootError::Enrollment(action, err))?;
        Ok(action)
    }

    fn load(
        &self,
        root: &mut F::Volume,
        kernel_path: String,
        preloaded: Option<Vec<u8>>,
        want_cmdline: bool,
    ) -> Result<Loaded> {
        let kernel_bytes = match preloaded {
            Some(bytes) => bytes,
            None => root.read_file(&kernel_path).map_err(BootError::KernelRead)?,
        };
        let kernel_signature = read_optional(root, &self.config.signature_path(&kernel_path));
        let kernel = Candidate {
            role: PayloadRole::Kernel,
            path: kernel_path,
            bytes: kernel_bytes,
            signature: kernel_signature,
        };

        let cmdline = if want_cmdline {
            self.load_cmdline(root)?
        } else {
            None
        };

        let mut initrd = None;
        if let Some(path) = self.config.initrd_path {
            if let Some(bytes) = read_optional(root, path) {
                initrd = Some(Candidate {
                    role: PayloadRole::Initrd,
                    path: path.to_string(),
                    bytes,
                    signature: read_optional(root, &self.config.signature_path(path)),
                });
            }
        }

        Ok(Loaded {
            kernel,
            cmdline,
            initrd,
        })
    }

    fn load_cmdline(&self, root: &mut F::Volume) -> Result<Option<Candidate>> {
        let path = self.config.cmdline_path;
        let Some(bytes) = read_optional(root, path) else {
            return Ok(None);
        };
        let signature = read_optional(root, &self.config.signature_path(path));
        if signature.is_none() {
            match self.config.missing_signature {
                MissingSignaturePolicy::Ignore => {}
                MissingSignaturePolicy::FallbackToDefault => {
                    log::warn!("{} has no signature, using the default command line", path);
                    return Ok(None);
                }
                MissingSignaturePolicy::Abort => {
                    return Err(BootError::MissingSignature(PayloadRole::CommandLine));
                }
            }
        }
        Ok(Some(Candidate {
            role: PayloadRole::CommandLine,
            path: path.to_string(),
            bytes,
            signature,
        }))
    }

    fn verify(&self, loaded: Loaded) -> Result<Verified> {
        Ok(Verified {
            kernel: self.check(loaded.kernel)?,
            cmdline: loaded.cmdline.map(|c| self.check(c)).transpose()?,
            initrd: loaded.initrd.map(|c| self.check(c)).transpose()?,
        })
    }

    fn check(&self, candidate: Candidate) -> Result<VerifiedPayload> {
        let digest = digest::sha256(&candidate.bytes);
        let payload = Payload {
            role: candidate.role,
            path: &candidate.path,
            bytes: &candidate.bytes,
            digest,
            signature: candidate.signature.as_deref(),
        };
        match self.anchor.verify(&payload) {
            Ok(true) => {
                log::info!("{} {} verified, sha256 {}", candidate.role, candidate.path, digest);
                Ok(VerifiedPayload {
                    role: candidate.role,
                    path: candidate.path,
                    bytes: candidate.bytes,
                    digest,
                })
            }
            Ok(false) => {
                log::error!("{} {} rejected, sha256 {}", candidate.role, candidate.path, digest);
                Err(BootError::IntegrityViolation(candidate.role))
            }
            Err(err) => Err(BootError::TrustAnchor(candidate.role, err)),
        }
    }

    /// Drop a loaded image that will not be started.
    fn discard(&mut self, image: Handle) {
        if let Err(err) = self.fw.uninstall_initrd() {
            log::warn!("could not withdraw initrd: {}", err);
        }
        if let Err(err) = self.fw.unload_image(image) {
            log::warn!("could not unload image: {}", err);
        }
    }
}

/// Contents of an optional file; absence and read errors both give `None`.
fn read_optional<V: Volume>(root: &mut V, path: &str) -> Option<Vec<u8>> {
    match root.read_file(path) {
        Ok(bytes) => Some(bytes),
        Err(err) if err.kind() == ErrorKind::NotFound => {
            log::debug!("{} not present", path);
            None
        }
        Err(err) => {
            log::warn!("could not read {}: {}", path, err);
            None
        }
    }
}

impl From<BootFailure> for EfiError {
    fn from(failure: BootFailure) -> Self {
        match failure.error {
            BootError::RootVolume(e)
            | BootError::KernelRead(e)
            | BootError::Enrollment(_, e)
            | BootError::LoadImage(e)
            | BootError::LoadedImage(e)
            | BootError::Initrd(e)
            | BootError::StartImage(e) => e,
            BootError::CommandLine(_) => EfiError::new(keel_firmware::Status::INVALID_PARAMETER),
            _ => EfiError::new(keel_firmware::Status::SECURITY_VIOLATION),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DEFAULT_CMDLINE, DEFAULT_CMDLINE_PATH, DEFAULT_KERNEL_PATH};
    use crate::digest::sha256;
    use crate::policy::TrustState;
    use crate::trust::{PinnedDigests, TrustError};
    use core::cell::RefCell;
    use keel_firmware::Status;
    use std::collections::HashMap;
    use std::rc::Rc;

    const KERNEL: &[u8] = b"MZ kernel image";
    const CMDLINE: &[u8] = b"root=/dev/vda ro";

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Op {
        OpenRoot,
        Read(String),
        LoadImage(Vec<u8>),
        SetLoadOptions { size: usize, text: String },
        InstallInitrd(Vec<u8>),
        UninstallInitrd,
        Start,
        Unload,
    }

    type Log = Rc<RefCell<Vec<Op>>>;

    struct MockVolume {
        ops: Log,
        files: HashMap<String, Vec<u8>>,
    }

    impl Volume for MockVolume {
        fn read_file(&mut self, path: &str) -> keel_firmware::Result<Vec<u8>> {
            self.ops.borrow_mut().push(Op::Read(path.to_string()));
            self.files
                .get(path)
                .cloned()
                .ok_or(EfiError::new(Status::NOT_FOUND))
        }
    }

    /// Records every operation the flow performs.
    struct MockFirmware {
        ops: Log,
        files: HashMap<String, Vec<u8>>,
        root_error: Option<Status>,
        trust: TrustState,
        start_status: Option<Status>,
        initrd_installed: bool,
    }

    impl MockFirmware {
        fn new() -> Self {
            let mut fw = Self {
                ops: Rc::new(RefCell::new(Vec::new())),
                files: HashMap::new(),
                root_error: None,
                trust: TrustState::Permissive,
                start_status: None,
                initrd_installed: false,
            };
            fw.add(DEFAULT_KERNEL_PATH, KERNEL);
            fw
        }

        fn add(&mut self, path: &str, data: &[u8]) {
            self.files.insert(path.to_string(), data.to_vec());
        }

        fn ops(&self) -> Vec<Op> {
            self.ops.borrow().clone()
        }

        fn loaded_image(&self) -> bool {
            self.ops().iter().any(|op| matches!(op, Op::LoadImage(_)))
        }
    }

    impl Firmware for MockFirmware {
        type Volume = MockVolume;

        fn open_root(&mut self) -> keel_firmware::Result<MockVolume> {
            self.ops.borrow_mut().push(Op::OpenRoot);
            if let Some(status) = self.root_error {
                return Err(EfiError::new(status));
            }
            Ok(MockVolume {
                ops: self.ops.clone(),
                files: self.files.clone(),
            })
        }

        fn trust_state(&mut self) -> TrustState {
            self.trust
        }

        fn load_image(&mut self, _path: &str, image: &[u8]) -> keel_firmware::Result<Handle> {
            self.ops.borrow_mut().push(Op::LoadImage(image.to_vec()));
            Ok(Handle::from_ptr(0x4000 as *mut core::ffi::c_void))
        }

        unsafe fn set_load_options(&mut self, _image: Handle, options: &WideString) -> keel_firmware::Result<()> {
            assert_eq!(options.as_slice_with_nul().last(), Some(&0));
            self.ops.borrow_mut().push(Op::SetLoadOptions {
                size: options.byte_len(),
                text: options.to_string(),
            });
            Ok(())
        }

        fn install_initrd(&mut self, initrd: Vec<u8>) -> keel_firmware::Result<()> {
            self.initrd_installed = true;
            self.ops.borrow_mut().push(Op::InstallInitrd(initrd));
            Ok(())
        }

        fn uninstall_initrd(&mut self) -> keel_firmware::Result<()> {
            if core::mem::take(&mut self.initrd_installed) {
                self.ops.borrow_mut().push(Op::UninstallInitrd);
            }
            Ok(())
        }

        fn start_image(&mut self, _image: Handle) -> keel_firmware::Result<()> {
            self.ops.borrow_mut().push(Op::Start);
            match self.start_status {
                Some(status) => Err(EfiError::new(status)),
                None => Ok(()),
            }
        }

        fn unload_image(&mut self, _image: Handle) -> keel_firmware::Result<()> {
            self.ops.borrow_mut().push(Op::Unload);
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingEnrollment {
        installs: usize,
        rotations: usize,
        fail: bool,
    }

    impl KeyEnrollment for RecordingEnrollment {
        fn install_anchor(&mut self) -> keel_firmware::Result<()> {
            self.installs += 1;
            if self.fail {
                return Err(EfiError::new(Status::WRITE_PROTECTED));
            }
            Ok(())
        }

        fn rotate_keys(&mut self) -> keel_firmware::Result<()> {
            self.rotations += 1;
            Ok(())
        }
    }

    fn kernel_anchor() -> PinnedDigests {
        PinnedDigests::empty().pin(PayloadRole::Kernel, sha256(KERNEL))
    }

    fn full_anchor() -> PinnedDigests {
        kernel_anchor().pin(PayloadRole::CommandLine, sha256(CMDLINE))
    }

    fn run(
        fw: &mut MockFirmware,
        anchor: &PinnedDigests,
        config: BootConfig,
        request: BootRequest,
    ) -> core::result::Result<BootReport, BootFailure> {
        BootFlow::new(fw, anchor, config).run(request)
    }

    fn default_request() -> BootRequest {
        BootRequest::new(DEFAULT_KERNEL_PATH)
    }

    #[test]
    fn test_default_cmdline_when_no_file() {
        let mut fw = MockFirmware::new();
        let report = run(&mut fw, &kernel_anchor(), BootConfig::DEFAULT, default_request()).unwrap();

        assert_eq!(report.cmdline, DEFAULT_CMDLINE);
        assert_eq!(report.cmdline_source, CommandLineSource::Default);
        assert_eq!(
            report.stages,
            [
                BootStage::Start,
                BootStage::RootOpened,
                BootStage::PayloadLoaded,
                BootStage::PayloadVerified,
                BootStage::CommandLineResolved,
                BootStage::ImagePrepared,
                BootStage::ImageStarted,
            ]
        );
        let size = DEFAULT_CMDLINE.encode_utf16().count() * 2;
        assert!(fw.ops().contains(&Op::SetLoadOptions {
            size,
            text: DEFAULT_CMDLINE.to_string()
        }));
        assert_eq!(fw.ops().last(), Some(&Op::Start));
    }

    #[test]
    fn test_kernel_mismatch_never_loads() {
        let mut fw = MockFirmware::new();
        fw.add(DEFAULT_KERNEL_PATH, b"MZ tampered kernel");
        let failure = run(&mut fw, &kernel_anchor(), BootConfig::DEFAULT, default_request()).unwrap_err();

        assert_eq!(failure.error, BootError::IntegrityViolation(PayloadRole::Kernel));
        assert_eq!(failure.stage, BootStage::PayloadLoaded);
        assert!(!fw.loaded_image());
        assert!(!fw.ops().contains(&Op::Start));
    }

    #[test]
    fn test_root_volume_failure_before_any_read() {
        for status in [Status::NOT_FOUND, Status::DEVICE_ERROR] {
            let mut fw = MockFirmware::new();
            fw.root_error = Some(status);
            let failure = run(&mut fw, &kernel_anchor(), BootConfig::DEFAULT, default_request()).unwrap_err();

            assert_eq!(failure.error, BootError::RootVolume(EfiError::new(status)));
            assert_eq!(failure.stage, BootStage::Start);
            assert_eq!(fw.ops(), [Op::OpenRoot]);
        }
    }

    #[test]
    fn test_missing_kernel_is_fatal() {
        let mut fw = MockFirmware::new();
        fw.files.clear();
        let failure = run(&mut fw, &kernel_anchor(), BootConfig::DEFAULT, default_request()).unwrap_err();
        assert_eq!(failure.error.kind(), ErrorKind::NotFound);
        assert!(matches!(failure.error, BootError::KernelRead(_)));
    }

    #[test]
    fn test_signed_cmdline_used_verbatim() {
        let mut fw = MockFirmware::new();
        fw.add(DEFAULT_CMDLINE_PATH, CMDLINE);
        fw.add("\\EFI\\linux\\cmdline.sig", b"detached signature");
        let report = run(&mut fw, &full_anchor(), BootConfig::DEFAULT, default_request()).unwrap();

        assert_eq!(report.cmdline, "root=/dev/vda ro");
        assert_eq!(report.cmdline_source, CommandLineSource::File);
        assert!(fw.ops().contains(&Op::SetLoadOptions {
            size: CMDLINE.len() * 2,
            text: "root=/dev/vda ro".to_string()
        }));
    }

    #[test]
    fn test_tampered_cmdline_is_not_downgraded() {
        let mut fw = MockFirmware::new();
        fw.add(DEFAULT_CMDLINE_PATH, b"init=/bin/sh");
        fw.add("\\EFI\\linux\\cmdline.sig", b"sig");
        let failure = run(&mut fw, &full_anchor(), BootConfig::DEFAULT, default_request()).unwrap_err();

        assert_eq!(failure.error, BootError::IntegrityViolation(PayloadRole::CommandLine));
        assert!(!fw.loaded_image());
    }

    #[test]
    fn test_unsigned_pinned_cmdline_used_by_default() {
        let mut fw = MockFirmware::new();
        fw.add(DEFAULT_CMDLINE_PATH, CMDLINE);
        let report = run(&mut fw, &full_anchor(), BootConfig::DEFAULT, default_request()).unwrap();

        assert_eq!(report.cmdline_source, CommandLineSource::File);
        assert_eq!(report.cmdline, "root=/dev/vda ro");
        assert!(fw.ops().contains(&Op::SetLoadOptions {
            size: CMDLINE.len() * 2,
            text: "root=/dev/vda ro".to_string()
        }));
    }

    #[test]
    fn test_unsigned_tampered_cmdline_is_fatal_by_default() {
        let mut fw = MockFirmware::new();
        fw.add(DEFAULT_CMDLINE_PATH, b"init=/bin/sh");
        let failure = run(&mut fw, &full_anchor(), BootConfig::DEFAULT, default_request()).unwrap_err();

        assert_eq!(failure.error, BootError::IntegrityViolation(PayloadRole::CommandLine));
        assert!(!fw.loaded_image());
    }

    #[test]
    fn test_unsigned_cmdline_policies() {
        let config = BootConfig::DEFAULT;

        let mut fw = MockFirmware::new();
        fw.add(DEFAULT_CMDLINE_PATH, CMDLINE);
        let fallback = config.missing_signature(MissingSignaturePolicy::FallbackToDefault);
        let report = run(&mut fw, &full_anchor(), fallback, default_request()).unwrap();
        assert_eq!(report.cmdline_source, CommandLineSource::Default);

        let mut fw = MockFirmware::new();
        fw.add(DEFAULT_CMDLINE_PATH, CMDLINE);
        let abort = config.missing_signature(MissingSignaturePolicy::Abort);
        let failure = run(&mut fw, &full_anchor(), abort, default_request()).unwrap_err();
        assert_eq!(failure.error, BootError::MissingSignature(PayloadRole::CommandLine));
        assert_eq!(failure.stage, BootStage::RootOpened);
        assert!(!fw.loaded_image());
    }

    #[test]
    fn test_unpinned_payload_is_fatal() {
        let mut fw = MockFirmware::new();
        fw.add(DEFAULT_CMDLINE_PATH, CMDLINE);
        fw.add("\\EFI\\linux\\cmdline.sig", b"sig");
        let failure = run(&mut fw, &kernel_anchor(), BootConfig::DEFAULT, default_request()).unwrap_err();
        assert_eq!(
            failure.error,
            BootError::TrustAnchor(PayloadRole::CommandLine, TrustError::NoTrustMaterial)
        );
        assert!(!fw.loaded_image());
    }

    #[test]
    fn test_override_skips_cmdline_file() {
        let mut fw = MockFirmware::new();
        fw.add(DEFAULT_CMDLINE_PATH, CMDLINE);
        let request = default_request().with_cmdline("console=tty0");
        let report = run(&mut fw, &kernel_anchor(), BootConfig::DEFAULT, request).unwrap();

        assert_eq!(report.cmdline, "console=tty0");
        assert_eq!(report.cmdline_source, CommandLineSource::Override);
        assert!(!fw.ops().contains(&Op::Read(DEFAULT_CMDLINE_PATH.to_string())));
    }

    #[test]
    fn test_interior_nul_cmdline_rejected() {
        let mut fw = MockFirmware::new();
        let request = default_request().with_cmdline("quiet\0init=/bin/sh");
        let failure = run(&mut fw, &kernel_anchor(), BootConfig::DEFAULT, request).unwrap_err();
        assert!(matches!(failure.error, BootError::CommandLine(_)));
        assert_eq!(failure.stage, BootStage::PayloadVerified);
        assert!(!fw.loaded_image());
    }

    #[test]
    fn test_preloaded_kernel_not_reread() {
        let mut fw = MockFirmware::new();
        fw.files.clear();
        let request = default_request().with_kernel(KERNEL.to_vec());
        run(&mut fw, &kernel_anchor(), BootConfig::DEFAULT, request).unwrap();

        assert!(!fw.ops().contains(&Op::Read(DEFAULT_KERNEL_PATH.to_string())));
        assert!(fw.ops().contains(&Op::LoadImage(KERNEL.to_vec())));
    }

    #[test]
    fn test_initrd_published_around_start() {
        let mut fw = MockFirmware::new();
        fw.add("\\EFI\\linux\\initrd.img", b"cpio");
        let anchor = kernel_anchor().pin(PayloadRole::Initrd, sha256(b"cpio"));
        let config = BootConfig::DEFAULT.initrd_path(Some("\\EFI\\linux\\initrd.img"));
        run(&mut fw, &anchor, config, default_request()).unwrap();

        let ops = fw.ops();
        let tail: Vec<_> = ops
            .iter()
            .filter(|op| !matches!(op, Op::OpenRoot | Op::Read(_)))
            .cloned()
            .collect();
        assert!(matches!(tail[0], Op::LoadImage(_)));
        assert!(matches!(tail[1], Op::SetLoadOptions { .. }));
        assert_eq!(tail[2..], [Op::InstallInitrd(b"cpio".to_vec()), Op::Start, Op::UninstallInitrd]);
    }

    #[test]
    fn test_initrd_mismatch_never_loads() {
        let mut fw = MockFirmware::new();
        fw.add("\\EFI\\linux\\initrd.img", b"tampered cpio");
        let anchor = kernel_anchor().pin(PayloadRole::Initrd, sha256(b"cpio"));
        let config = BootConfig::DEFAULT.initrd_path(Some("\\EFI\\linux\\initrd.img"));
        let failure = run(&mut fw, &anchor, config, default_request()).unwrap_err();

        assert_eq!(failure.error, BootError::IntegrityViolation(PayloadRole::Initrd));
        assert_eq!(failure.stage, BootStage::PayloadLoaded);
        assert!(!fw.loaded_image());
        assert!(!fw.ops().iter().any(|op| matches!(op, Op::InstallInitrd(_))));
        assert!(!fw.ops().contains(&Op::Start));
    }

    #[test]
    fn test_missing_initrd_is_not_fatal() {
        let mut fw = MockFirmware::new();
        let config = BootConfig::DEFAULT.initrd_path(Some("\\EFI\\linux\\initrd.img"));
        run(&mut fw, &kernel_anchor(), config, default_request()).unwrap();
        assert!(!fw.ops().iter().any(|op| matches!(op, Op::InstallInitrd(_))));
    }

    #[test]
    fn test_start_failure_unloads() {
        let mut fw = MockFirmware::new();
        fw.start_status = Some(Status::LOAD_ERROR);
        let failure = run(&mut fw, &kernel_anchor(), BootConfig::DEFAULT, default_request()).unwrap_err();

        assert_eq!(failure.error.kind(), ErrorKind::LoadError);
        assert_eq!(failure.stage, BootStage::ImagePrepared);
        assert_eq!(fw.ops().last(), Some(&Op::Unload));
    }

    #[test]
    fn test_digest_stable_across_runs() {
        let mut fw = MockFirmware::new();
        let first = run(&mut fw, &kernel_anchor(), BootConfig::DEFAULT, default_request()).unwrap();
        let second = run(&mut fw, &kernel_anchor(), BootConfig::DEFAULT, default_request()).unwrap();
        assert_eq!(first.kernel_digest, second.kernel_digest);
        assert_eq!(first.kernel_digest, sha256(KERNEL));
    }

    #[test]
    fn test_setup_mode_installs_anchor() {
        let mut fw = MockFirmware::new();
        fw.trust = TrustState::SetupMode;
        let mut enrollment = RecordingEnrollment::default();
        let anchor = kernel_anchor();
        let report = BootFlow::new(&mut fw, &anchor, BootConfig::DEFAULT)
            .with_enrollment(&mut enrollment)
            .run(default_request())
            .unwrap();

        assert_eq!(report.action, BootAction::InstallTrustAnchor);
        assert_eq!(enrollment.installs, 1);
        assert_eq!(enrollment.rotations, 0);
    }

    #[test]
    fn test_enrollment_failure_stops_before_root() {
        let mut fw = MockFirmware::new();
        fw.trust = TrustState::SetupMode;
        let mut enrollment = RecordingEnrollment {
            fail: true,
            ..Default::default()
        };
        let anchor = kernel_anchor();
        let failure = BootFlow::new(&mut fw, &anchor, BootConfig::DEFAULT)
            .with_enrollment(&mut enrollment)
            .run(default_request())
            .unwrap_err();

        assert!(matches!(
            failure.error,
            BootError::Enrollment(BootAction::InstallTrustAnchor, _)
        ));
        assert!(fw.ops().is_empty());
    }

    #[test]
    fn test_enforcing_without_enrollment_still_boots() {
        let mut fw = MockFirmware::new();
        fw.trust = TrustState::Enforcing;
        let report = run(&mut fw, &kernel_anchor(), BootConfig::DEFAULT, default_request()).unwrap();
        assert_eq!(report.action, BootAction::RotateKeys);
        assert_eq!(report.stages.last(), Some(&BootStage::ImageStarted));
    }
}
