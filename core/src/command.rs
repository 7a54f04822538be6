//! Named shell actions.
//!
//! A [`Registry`] maps a command word to a handler taking the remaining
//! whitespace-separated arguments. Handlers run against a caller-supplied
//! context and return the text to print, or an error.

use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::fmt;

use crate::config::BootConfig;
use crate::flow::BootRequest;

pub type CommandResult = core::result::Result<String, CommandError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// No command with this name.
    Unknown(String),
    /// Arguments do not fit the command; carries its syntax.
    Usage(&'static str, &'static str),
    /// The action ran and failed.
    Failed(String),
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown(name) => write!(f, "unknown command '{}', try 'help'", name),
            Self::Usage(name, syntax) => write!(f, "usage: {} {}", name, syntax),
            Self::Failed(reason) => write!(f, "{}", reason),
        }
    }
}

pub struct Command<C> {
    pub name: &'static str,
    pub syntax: &'static str,
    pub help: &'static str,
    /// Most arguments accepted; `None` for no limit.
    pub max_args: Option<usize>,
    pub run: fn(&mut C, &[&str]) -> CommandResult,
}

impl<C> Clone for Command<C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<C> Copy for Command<C> {}

pub struct Registry<C> {
    commands: Vec<Command<C>>,
}

impl<C> Registry<C> {
    pub fn new() -> Self {
        Self {
            commands: Vec::new(),
        }
    }

    /// Register `command`, replacing one with the same name.
    pub fn add(&mut self, command: Command<C>) {
        match self.commands.iter_mut().find(|c| c.name == command.name) {
            Some(slot) => *slot = command,
            None => self.commands.push(command),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Command<C>> {
        self.commands.iter().find(|c| c.name == name)
    }

    pub fn commands(&self) -> &[Command<C>] {
        &self.commands
    }

    /// Run one input line. `None` for a blank line.
    pub fn dispatch(&self, ctx: &mut C, line: &str) -> Option<CommandResult> {
        let words = split_args(line);
        let (name, args) = words.split_first()?;
        let Some(command) = self.get(name) else {
            return Some(Err(CommandError::Unknown(name.to_string())));
        };
        if command.max_args.is_some_and(|max| args.len() > max) {
            return Some(Err(CommandError::Usage(command.name, command.syntax)));
        }
        log::debug!("running '{}' with {} argument(s)", command.name, args.len());
        Some((command.run)(ctx, args))
    }

    /// One line per command: name, syntax, help.
    pub fn help(&self) -> String {
        let width = self
            .commands
            .iter()
            .map(|c| c.name.len() + c.syntax.len() + 1)
            .max()
            .unwrap_or(0);
        let mut out = String::new();
        for c in &self.commands {
            let usage = alloc::format!("{} {}", c.name, c.syntax);
            out.push_str(&alloc::format!("{:<width$}  {}\n", usage.trim_end(), c.help, width = width));
        }
        out
    }
}

impl<C> Default for Registry<C> {
    fn default() -> Self {
        Self::new()
    }
}

/// Longest input line the shell accepts.
pub const MAX_LINE: usize = 256;

/// What a key did to the line being edited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Edit {
    /// Byte appended; echo it.
    Insert(u8),
    /// Last byte removed; erase it on screen.
    Erase,
    /// Line finished.
    Submit(String),
    Ignored,
}

/// Line editing over single input bytes.
#[derive(Debug, Default)]
pub struct LineBuffer {
    line: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self { line: Vec::new() }
    }

    pub fn push(&mut self, byte: u8) -> Edit {
        match byte {
            b'\n' | b'\r' => {
                let line = core::mem::take(&mut self.line);
                Edit::Submit(String::from_utf8_lossy(&line).into_owned())
            }
            // Backspace and DEL
            0x08 | 0x7f => match self.line.pop() {
                Some(_) => Edit::Erase,
                None => Edit::Ignored,
            },
            b if b.is_ascii_graphic() || b == b' ' => {
                if self.line.len() >= MAX_LINE {
                    return Edit::Ignored;
                }
                self.line.push(b);
                Edit::Insert(b)
            }
            _ => Edit::Ignored,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.line
    }
}

pub fn split_args(line: &str) -> Vec<&str> {
    line.split_whitespace().collect()
}

/// Arguments of `boot [kernel_path] [cmdline...]`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BootArgs {
    pub kernel_path: Option<String>,
    /// Remaining words joined by single spaces.
    pub cmdline: Option<String>,
}

pub fn parse_boot_args(args: &[&str]) -> BootArgs {
    let Some((path, rest)) = args.split_first() else {
        return BootArgs::default();
    };
    BootArgs {
        kernel_path: Some(path.to_string()),
        cmdline: (!rest.is_empty()).then(|| rest.join(" ")),
    }
}

impl BootArgs {
    pub fn into_request(self, config: &BootConfig) -> BootRequest {
        let request = BootRequest::new(
            self.kernel_path
                .unwrap_or_else(|| config.kernel_path.to_string()),
        );
        match self.cmdline {
            Some(cmdline) => request.with_cmdline(cmdline),
            None => request,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Ctx {
        echoed: Vec<String>,
    }

    fn echo(ctx: &mut Ctx, args: &[&str]) -> CommandResult {
        let text = args.join(" ");
        ctx.echoed.push(text.clone());
        Ok(text)
    }

    fn fail(_: &mut Ctx, _: &[&str]) -> CommandResult {
        Err(CommandError::Failed("no root volume".to_string()))
    }

    fn registry() -> Registry<Ctx> {
        let mut r = Registry::new();
        r.add(Command {
            name: "echo",
            syntax: "[text...]",
            help: "print arguments",
            max_args: None,
            run: echo,
        });
        r.add(Command {
            name: "reset",
            syntax: "[cold|warm|shutdown]",
            help: "reset the platform",
            max_args: Some(1),
            run: fail,
        });
        r
    }

    #[test]
    fn test_dispatch() {
        let r = registry();
        let mut ctx = Ctx { echoed: Vec::new() };
        assert_eq!(r.dispatch(&mut ctx, "  echo a   b "), Some(Ok("a b".to_string())));
        assert_eq!(ctx.echoed, ["a b"]);
        assert_eq!(r.dispatch(&mut ctx, "   "), None);
        assert_eq!(
            r.dispatch(&mut ctx, "boom"),
            Some(Err(CommandError::Unknown("boom".to_string())))
        );
    }

    #[test]
    fn test_argument_limit() {
        let r = registry();
        let mut ctx = Ctx { echoed: Vec::new() };
        let err = r.dispatch(&mut ctx, "reset cold now").unwrap().unwrap_err();
        assert_eq!(err.to_string(), "usage: reset [cold|warm|shutdown]");
        let err = r.dispatch(&mut ctx, "reset cold").unwrap().unwrap_err();
        assert_eq!(err, CommandError::Failed("no root volume".to_string()));
    }

    #[test]
    fn test_add_replaces_by_name() {
        let mut r = registry();
        r.add(Command {
            name: "echo",
            syntax: "",
            help: "replaced",
            max_args: Some(0),
            run: echo,
        });
        assert_eq!(r.commands().len(), 2);
        assert_eq!(r.get("echo").unwrap().help, "replaced");
        assert!(r.help().contains("reset [cold|warm|shutdown]  reset the platform"));
    }

    #[test]
    fn test_line_editing() {
        let mut line = LineBuffer::new();
        assert_eq!(line.push(0x08), Edit::Ignored);
        for &b in b"bootx" {
            assert_eq!(line.push(b), Edit::Insert(b));
        }
        assert_eq!(line.push(0x7f), Edit::Erase);
        assert_eq!(line.push(0x1b), Edit::Ignored);
        assert_eq!(line.as_bytes(), b"boot");
        assert_eq!(line.push(b'\n'), Edit::Submit("boot".to_string()));
        assert!(line.as_bytes().is_empty());
    }

    #[test]
    fn test_line_length_capped() {
        let mut line = LineBuffer::new();
        for _ in 0..MAX_LINE {
            line.push(b'a');
        }
        assert_eq!(line.push(b'b'), Edit::Ignored);
        assert_eq!(line.as_bytes().len(), MAX_LINE);
    }

    #[test]
    fn test_parse_boot_args() {
        assert_eq!(parse_boot_args(&[]), BootArgs::default());
        let args = parse_boot_args(&["\\EFI\\alt\\kernel.efi", "console=ttyS0", "quiet"]);
        assert_eq!(args.kernel_path.as_deref(), Some("\\EFI\\alt\\kernel.efi"));
        assert_eq!(args.cmdline.as_deref(), Some("console=ttyS0 quiet"));

        let request = parse_boot_args(&[]).into_request(&BootConfig::DEFAULT);
        assert_eq!(request.kernel_path(), BootConfig::DEFAULT.kernel_path);
        assert_eq!(request.cmdline(), None);
    }
}
