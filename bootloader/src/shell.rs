//! Interactive prompt over the firmware console.

use alloc::string::String;

use keel_core::command::{Edit, LineBuffer, Registry};
use keel_firmware::poll::{stall_yield, Budget};
use keel_firmware::proto::console::ConsoleIn;
use keel_firmware::{BootServices, ErrorKind, Result};

use crate::commands::Session;

const PROMPT: &str = "keel> ";

/// Read one line, echoing as it is typed.
fn read_line(
    session: &Session,
    input: &ConsoleIn,
    bs: &BootServices,
    budget: Budget,
) -> Result<String> {
    let mut line = LineBuffer::new();
    loop {
        let byte = input.read_byte(bs, budget, stall_yield(bs))?;
        match line.push(byte) {
            Edit::Insert(b) => {
                let mut utf8 = [0u8; 4];
                session.write((b as char).encode_utf8(&mut utf8));
            }
            Edit::Erase => session.write("\x08 \x08"),
            Edit::Submit(text) => {
                session.write("\n");
                return Ok(text);
            }
            Edit::Ignored => {}
        }
    }
}

/// Prompt and dispatch until a command asks to leave or input runs dry.
pub fn run(registry: &Registry<Session>, session: &mut Session, input: &ConsoleIn, bs: &BootServices) {
    let budget = session.config.input_budget;
    while !session.exit_requested {
        session.write(PROMPT);
        let line = match read_line(session, input, bs, budget) {
            Ok(line) => line,
            Err(err) if err.kind() == ErrorKind::Timeout => {
                log::info!("no input, leaving shell");
                return;
            }
            Err(err) => {
                log::error!("console input failed: {}", err);
                return;
            }
        };
        execute(registry, session, &line);
    }
}

/// Dispatch one line and print what it produced.
pub fn execute(registry: &Registry<Session>, session: &mut Session, line: &str) {
    match registry.dispatch(session, line) {
        None => {}
        Some(Ok(text)) => session.write(&text),
        Some(Err(err)) => session.write(&alloc::format!("error: {}\n", err)),
    }
}
