//! Shell command handlers.

use alloc::format;
use alloc::string::{String, ToString};
use core::fmt::{self, Write};

use keel_core::command::{parse_boot_args, Command, CommandError, CommandResult, Registry};
use keel_core::{BootConfig, BootFlow, EfiFirmware, PayloadRole, PinnedDigests, TrustError};
use keel_firmware::proto::console::ConsoleOut;
use keel_firmware::runtime::ResetType;
use keel_firmware::{logger, table, EfiError, Status};

/// Digests pinned at build time, one optional hex string per role.
const PINNED: [(PayloadRole, Option<&str>); 3] = [
    (PayloadRole::Kernel, option_env!("KEEL_KERNEL_SHA256")),
    (PayloadRole::CommandLine, option_env!("KEEL_CMDLINE_SHA256")),
    (PayloadRole::Initrd, option_env!("KEEL_INITRD_SHA256")),
];

/// State shared by every command.
pub struct Session {
    pub config: BootConfig,
    out: ConsoleOut,
    pub exit_requested: bool,
}

impl Session {
    pub fn new(config: BootConfig, out: ConsoleOut) -> Self {
        Self {
            config,
            out,
            exit_requested: false,
        }
    }

    pub fn write(&self, text: &str) {
        let _ = self.out.write_text(text);
    }
}

fn failed(err: impl fmt::Display) -> CommandError {
    CommandError::Failed(err.to_string())
}

fn trust_anchor() -> Result<PinnedDigests, TrustError> {
    PINNED
        .iter()
        .try_fold(PinnedDigests::empty(), |anchor, &(role, hex)| match hex {
            Some(hex) => anchor.pin_hex(role, hex),
            None => Ok(anchor),
        })
}

fn reset(kind: ResetType, status: Status) -> EfiError {
    log::warn!("{} reset requested", kind);
    match table::runtime_services().and_then(|rt| rt.reset_system(kind, status)) {
        Ok(never) => match never {},
        Err(err) => err,
    }
}

fn boot(session: &mut Session, args: &[&str]) -> CommandResult {
    let request = parse_boot_args(args).into_request(&session.config);
    let anchor = trust_anchor().map_err(|err| failed(format!("Bad pinned digest: {}", err)))?;
    let mut fw = EfiFirmware::from_globals().map_err(failed)?;

    match BootFlow::new(&mut fw, &anchor, session.config).run(request) {
        Ok(report) => Ok(format!(
            "kernel {} returned (command line from {:?})\n",
            report.kernel_digest, report.cmdline_source
        )),
        Err(failure) => {
            log::error!("boot failed: {}", failure);
            if session.config.reset_on_failure {
                let err = reset(ResetType::Cold, EfiError::from(failure.clone()).status());
                log::error!("reset failed: {}", err);
            }
            Err(failed(failure))
        }
    }
}

fn vars(_: &mut Session, _: &[&str]) -> CommandResult {
    let rt = table::runtime_services().map_err(failed)?;
    let mut out = String::new();
    for key in rt.variable_names() {
        let key = key.map_err(failed)?;
        let _ = writeln!(out, "{} {}", key.vendor, key.name);
    }
    Ok(out)
}

fn show_log(_: &mut Session, _: &[&str]) -> CommandResult {
    let mut out = String::new();
    for line in logger::recent() {
        out.push_str(&line);
        out.push('\n');
    }
    Ok(out)
}

fn reset_command(_: &mut Session, args: &[&str]) -> CommandResult {
    let kind = match args.first() {
        None => ResetType::Cold,
        Some(word) => ResetType::parse(word).ok_or(CommandError::Usage("reset", "[cold|warm|shutdown]"))?,
    };
    Err(failed(reset(kind, Status::SUCCESS)))
}

fn help(_: &mut Session, _: &[&str]) -> CommandResult {
    Ok(registry().help())
}

fn exit(session: &mut Session, _: &[&str]) -> CommandResult {
    session.exit_requested = true;
    Ok(String::new())
}

pub fn registry() -> Registry<Session> {
    let mut r = Registry::new();
    r.add(Command {
        name: "boot",
        syntax: "[kernel_path] [cmdline...]",
        help: "verify and start a kernel",
        max_args: None,
        run: boot,
    });
    r.add(Command {
        name: "vars",
        syntax: "",
        help: "list firmware variables",
        max_args: Some(0),
        run: vars,
    });
    r.add(Command {
        name: "log",
        syntax: "",
        help: "show recent log entries",
        max_args: Some(0),
        run: show_log,
    });
    r.add(Command {
        name: "reset",
        syntax: "[cold|warm|shutdown]",
        help: "reset the platform",
        max_args: Some(1),
        run: reset_command,
    });
    r.add(Command {
        name: "help",
        syntax: "",
        help: "list commands",
        max_args: Some(0),
        run: help,
    });
    r.add(Command {
        name: "exit",
        syntax: "",
        help: "return to firmware",
        max_args: Some(0),
        run: exit,
    });
    r
}
