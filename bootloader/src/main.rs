//! Keel UEFI loader entry point.
//!
//! Records the firmware tables, brings up logging on the console, then
//! hands control to the shell. Leaving the shell returns to firmware.

#![no_std]
#![no_main]

extern crate alloc;

mod allocator;
mod commands;
mod shell;

use core::panic::PanicInfo;

use keel_core::BootConfig;
use keel_firmware::proto::console::{ConsoleIn, ConsoleOut};
use keel_firmware::runtime::ResetType;
use keel_firmware::{logger, table, BootServices, Handle, Result, Status, SystemTable};
use log::LevelFilter;

use commands::Session;

const CONFIG: BootConfig = BootConfig::DEFAULT
    .reset_on_failure(cfg!(feature = "reset-on-failure"))
    .log_level(if cfg!(feature = "verbose") {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    });

/// # Safety
/// `st` must be the system table firmware passed to the entry point.
unsafe fn open_console(st: &SystemTable) -> Result<(ConsoleOut, ConsoleIn)> {
    Ok((
        ConsoleOut::from_raw(st.console_out_handle, st.con_out())?,
        ConsoleIn::from_raw(st.console_in_handle, st.con_in())?,
    ))
}

fn leave(bs: &BootServices, image: Handle) -> usize {
    let err = match bs.exit(image, Status::SUCCESS) {
        Ok(never) => match never {},
        Err(err) => err,
    };
    log::error!("exit failed: {}, shutting down", err);
    if let Ok(rt) = table::runtime_services() {
        let _ = rt.reset_system(ResetType::Shutdown, Status::SUCCESS);
    }
    err.status().0
}

#[no_mangle]
pub extern "efiapi" fn efi_main(image: Handle, system_table: *const SystemTable) -> usize {
    unsafe { table::init(image, system_table) };
    let (st, bs) = match table::system_table().and_then(|st| Ok((st, table::boot_services()?))) {
        Ok(tables) => tables,
        Err(err) => return err.status().0,
    };

    let console = unsafe { ConsoleOut::from_raw(st.console_out_handle, st.con_out()) }.ok();
    if logger::init(console, CONFIG.log_level).is_err() {
        return Status::ALREADY_STARTED.0;
    }
    log::info!("keel {}", env!("CARGO_PKG_VERSION"));

    if CONFIG.watchdog_disabled {
        if let Err(err) = bs.set_watchdog_timer(0) {
            log::warn!("could not disable watchdog: {}", err);
        }
    }

    let registry = commands::registry();
    match unsafe { open_console(st) } {
        Ok((out, input)) => {
            let mut session = Session::new(CONFIG, out);
            if cfg!(feature = "autoboot") {
                shell::execute(&registry, &mut session, "boot");
            }
            shell::run(&registry, &mut session, &input, bs);
        }
        Err(err) => log::error!("no console for the shell: {}", err),
    }

    leave(bs, image)
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    log::error!("panic: {}", info);
    if let Ok(rt) = table::runtime_services() {
        let _ = rt.reset_system(ResetType::Cold, Status::ABORTED);
    }
    loop {
        core::hint::spin_loop();
    }
}
