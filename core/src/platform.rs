//! The firmware surface the boot flow runs against.
//!
//! [`Firmware`] and [`Volume`] are the seams the flow is written over;
//! [`EfiFirmware`] implements them on the real boot and runtime service
//! tables.

use alloc::vec::Vec;

use keel_firmware::guid;
use keel_firmware::locator::bind_protocol;
use keel_firmware::proto::device_path::MemoryMappedPath;
use keel_firmware::proto::file_system::{File, FileAttribute, FileMode, SimpleFileSystemProtocol};
use keel_firmware::proto::loaded_image::LoadedImageProtocol;
use keel_firmware::{logger, table, BootServices, ErrorKind, Handle, Result, RuntimeServices, WideString};

use crate::initrd::InitrdRegistration;
use crate::policy::TrustState;

pub trait Volume {
    /// Whole contents of the file at `path`.
    fn read_file(&mut self, path: &str) -> Result<Vec<u8>>;
}

pub trait Firmware {
    type Volume: Volume;

    /// Root directory of the volume this loader was started from.
    fn open_root(&mut self) -> Result<Self::Volume>;

    fn trust_state(&mut self) -> TrustState;

    /// Load an executable image from a buffer already in memory.
    fn load_image(&mut self, path: &str, image: &[u8]) -> Result<Handle>;

    /// Point the loaded image's command-line fields at `options`.
    ///
    /// # Safety
    /// `image` must be loaded and not yet started, and `options` must stay
    /// alive until `start_image` on it returns.
    unsafe fn set_load_options(&mut self, image: Handle, options: &WideString) -> Result<()>;

    /// Publish initrd bytes for the next image to pick up.
    fn install_initrd(&mut self, initrd: Vec<u8>) -> Result<()>;

    fn uninstall_initrd(&mut self) -> Result<()>;

    fn start_image(&mut self, image: Handle) -> Result<()>;

    fn unload_image(&mut self, image: Handle) -> Result<()>;
}

// ═══════════════════════════════════════════════════════════════════════════
// UEFI IMPLEMENTATION
// ═══════════════════════════════════════════════════════════════════════════

pub struct EfiVolume {
    root: File,
}

impl Volume for EfiVolume {
    fn read_file(&mut self, path: &str) -> Result<Vec<u8>> {
        let mut file = self.root.open(path, FileMode::READ, FileAttribute::empty())?;
        let data = file.read_to_end()?;
        log::debug!("read {} ({} bytes)", path, data.len());
        Ok(data)
    }
}

pub struct EfiFirmware<'a> {
    bs: &'a BootServices,
    rt: &'a RuntimeServices,
    image: Handle,
    initrd: Option<InitrdRegistration<'a>>,
}

impl<'a> EfiFirmware<'a> {
    pub fn new(bs: &'a BootServices, rt: &'a RuntimeServices, image: Handle) -> Self {
        Self {
            bs,
            rt,
            image,
            initrd: None,
        }
    }

    pub fn boot_services(&self) -> &'a BootServices {
        self.bs
    }

    pub fn runtime_services(&self) -> &'a RuntimeServices {
        self.rt
    }

    /// First byte of a global variable, `None` if it is absent or unreadable.
    fn global_flag(&self, name: &str) -> Option<u8> {
        let wide = WideString::new(name).ok()?;
        match self.rt.get_variable(&wide, &guid::GLOBAL_VARIABLE) {
            Ok(var) => var.data.first().copied(),
            Err(err) if err.kind() == ErrorKind::NotFound => None,
            Err(err) => {
                log::warn!("could not read {}: {}", name, err);
                None
            }
        }
    }
}

impl EfiFirmware<'static> {
    /// Firmware from the tables recorded at entry.
    pub fn from_globals() -> Result<Self> {
        Ok(Self::new(
            table::boot_services()?,
            table::runtime_services()?,
            table::image_handle(),
        ))
    }
}

impl<'a> Firmware for EfiFirmware<'a> {
    type Volume = EfiVolume;

    fn open_root(&mut self) -> Result<EfiVolume> {
        let me = bind_protocol::<LoadedImageProtocol>(self.bs, self.image)?;
        let fs = bind_protocol::<SimpleFileSystemProtocol>(self.bs, me.device_handle())?;
        Ok(EfiVolume {
            root: fs.open_volume()?,
        })
    }

    fn trust_state(&mut self) -> TrustState {
        TrustState::from_variables(self.global_flag("SecureBoot"), self.global_flag("SetupMode"))
    }

    fn load_image(&mut self, path: &str, image: &[u8]) -> Result<Handle> {
        log::info!("loading {} ({} bytes)", path, image.len());
        let source = MemoryMappedPath::new(image);
        self.bs.load_image(self.image, Some(source.as_device_path()), image)
    }

    unsafe fn set_load_options(&mut self, image: Handle, options: &WideString) -> Result<()> {
        let loaded = bind_protocol::<LoadedImageProtocol>(self.bs, image)?;
        loaded.set_load_options(options)
    }

    fn install_initrd(&mut self, initrd: Vec<u8>) -> Result<()> {
        self.uninstall_initrd()?;
        self.initrd = Some(InitrdRegistration::install(self.bs, initrd)?);
        Ok(())
    }

    fn uninstall_initrd(&mut self) -> Result<()> {
        match self.initrd.take() {
            Some(reg) => reg.uninstall(),
            None => Ok(()),
        }
    }

    fn start_image(&mut self, image: Handle) -> Result<()> {
        log::info!("starting image");
        // The console belongs to the image until it returns
        let console = logger::detach_console();
        let started = self.bs.start_image(image);
        logger::attach_console(console);
        started
    }

    fn unload_image(&mut self, image: Handle) -> Result<()> {
        self.bs.unload_image(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BootConfig, DEFAULT_CMDLINE};
    use crate::digest::sha256;
    use crate::flow::{BootFlow, BootRequest, BootStage};
    use crate::trust::{PayloadRole, PinnedDigests};
    use core::ffi::c_void;
    use keel_firmware::proto::loaded_image::LoadedImageProtocol;
    use keel_firmware::testing::{blank_loaded_image, FakeFirmware, FakeVolume};
    use keel_firmware::Status;

    const KERNEL: &[u8] = b"MZ\x90\x00 pretend kernel image";

    /// Firmware whose running image was loaded from `vol`.
    fn boot_device(fw: &FakeFirmware, vol: &FakeVolume, me: &mut LoadedImageProtocol) -> Handle {
        me.device_handle = vol.install(fw);
        fw.install(
            &guid::LOADED_IMAGE_PROTOCOL,
            me as *mut LoadedImageProtocol as *mut c_void,
        )
    }

    #[test]
    fn test_end_to_end_with_detached_cmdline() {
        let fw = FakeFirmware::new();
        let vol = FakeVolume::new();
        vol.add_file("\\EFI\\linux\\kernel.efi", KERNEL);
        vol.add_file("\\EFI\\linux\\cmdline", b"console=ttyS0 quiet");
        vol.add_file("\\EFI\\linux\\cmdline.sig", b"sig");
        let mut me = blank_loaded_image();
        let image = boot_device(&fw, &vol, &mut me);

        let anchor = PinnedDigests::empty()
            .pin(PayloadRole::Kernel, sha256(KERNEL))
            .pin(PayloadRole::CommandLine, sha256(b"console=ttyS0 quiet"));
        let mut efi = EfiFirmware::new(fw.boot_services(), fw.runtime_services(), image);
        let report = BootFlow::new(&mut efi, &anchor, BootConfig::DEFAULT)
            .run(BootRequest::new("\\EFI\\linux\\kernel.efi"))
            .unwrap();

        assert_eq!(report.stages.last(), Some(&BootStage::ImageStarted));
        assert_eq!(fw.loaded_bytes(), KERNEL);
        assert_eq!(fw.started_options().as_deref(), Some("console=ttyS0 quiet"));
        // Every file handle went back to firmware
        assert_eq!(vol.opened(), vol.closed());
    }

    #[test]
    fn test_initrd_served_while_starting() {
        let fw = FakeFirmware::new();
        let vol = FakeVolume::new();
        vol.add_file("\\EFI\\linux\\kernel.efi", KERNEL);
        vol.add_file("\\EFI\\linux\\initrd.img", b"070701 cpio");
        let mut me = blank_loaded_image();
        let image = boot_device(&fw, &vol, &mut me);

        let anchor = PinnedDigests::empty()
            .pin(PayloadRole::Kernel, sha256(KERNEL))
            .pin(PayloadRole::Initrd, sha256(b"070701 cpio"));
        let config = BootConfig::DEFAULT.initrd_path(Some("\\EFI\\linux\\initrd.img"));
        let mut efi = EfiFirmware::new(fw.boot_services(), fw.runtime_services(), image);
        BootFlow::new(&mut efi, &anchor, config)
            .run(BootRequest::new(config.kernel_path))
            .unwrap();

        assert_eq!(fw.initrd_at_start(), Some(b"070701 cpio".to_vec()));
        assert_eq!(fw.started_options().as_deref(), Some(DEFAULT_CMDLINE));
        assert!(!fw.has_protocol(&guid::LOAD_FILE2_PROTOCOL));
    }

    #[test]
    fn test_start_failure_unloads_and_withdraws() {
        let fw = FakeFirmware::new();
        let vol = FakeVolume::new();
        vol.add_file("\\EFI\\linux\\kernel.efi", KERNEL);
        vol.add_file("\\EFI\\linux\\initrd.img", b"cpio");
        let mut me = blank_loaded_image();
        let image = boot_device(&fw, &vol, &mut me);
        fw.set_start_status(Status::LOAD_ERROR);

        let anchor = PinnedDigests::empty()
            .pin(PayloadRole::Kernel, sha256(KERNEL))
            .pin(PayloadRole::Initrd, sha256(b"cpio"));
        let config = BootConfig::DEFAULT.initrd_path(Some("\\EFI\\linux\\initrd.img"));
        let mut efi = EfiFirmware::new(fw.boot_services(), fw.runtime_services(), image);
        let failure = BootFlow::new(&mut efi, &anchor, config)
            .run(BootRequest::new(config.kernel_path))
            .unwrap_err();

        assert_eq!(failure.error.kind(), ErrorKind::LoadError);
        assert_eq!(fw.unloaded_images(), 1);
        assert!(!fw.has_protocol(&guid::LOAD_FILE2_PROTOCOL));
    }

    #[test]
    fn test_root_volume_missing() {
        let fw = FakeFirmware::new();
        let mut me = blank_loaded_image();
        me.device_handle = fw.new_handle();
        let image = fw.install(
            &guid::LOADED_IMAGE_PROTOCOL,
            &mut me as *mut LoadedImageProtocol as *mut c_void,
        );
        let mut efi = EfiFirmware::new(fw.boot_services(), fw.runtime_services(), image);
        let err = efi.open_root().err().unwrap();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_trust_state_from_variables() {
        let fw = FakeFirmware::new();
        let mut efi = EfiFirmware::new(fw.boot_services(), fw.runtime_services(), Handle::NULL);
        assert_eq!(efi.trust_state(), TrustState::Permissive);

        fw.set_variable("SecureBoot", guid::GLOBAL_VARIABLE, &[1]);
        assert_eq!(efi.trust_state(), TrustState::Enforcing);

        fw.set_variable("SetupMode", guid::GLOBAL_VARIABLE, &[1]);
        assert_eq!(efi.trust_state(), TrustState::SetupMode);
    }
}
