//! Line-oriented operator shell shared by the serial consoles.
//!
//! [`LineEditor`] turns a byte stream into command lines and tells the
//! caller what to echo. [`ShellCommand`] parses a finished line.

use core::fmt::{self, Write};

use heapless::String;

use crate::error::{Error, Result};
use crate::pairing::OperatorCommand;
use crate::transport::PowerState;

/// Longest command line kept by the editor.
pub const LINE_LEN: usize = 32;

/// Printed by `help` and after an unknown command.
pub const USAGE: &str = "commands: help | status | [bt] passkey <n> | [bt] battery <0-100>";

/// What a single input byte did to the line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Edit {
    /// Byte appended; echo it back.
    Echo(u8),
    /// Last character removed; erase it on the terminal.
    Erase,
    /// Line finished.
    Submit(String<LINE_LEN>),
    /// Line grew past [`LINE_LEN`] and was thrown away.
    Overflow,
    /// Nothing happened.
    Ignored,
}

#[derive(Default)]
pub struct LineEditor {
    line: String<LINE_LEN>,
}

impl LineEditor {
    pub const fn new() -> Self {
        Self {
            line: String::new(),
        }
    }

    pub fn feed(&mut self, byte: u8) -> Edit {
        match byte {
            b'\r' | b'\n' => {
                if self.line.is_empty() {
                    Edit::Ignored
                } else {
                    Edit::Submit(core::mem::take(&mut self.line))
                }
            }
            0x08 | 0x7f => match self.line.pop() {
                Some(_) => Edit::Erase,
                None => Edit::Ignored,
            },
            c if c.is_ascii_graphic() || c == b' ' => {
                if self.line.push(char::from(c)).is_ok() {
                    Edit::Echo(c)
                } else {
                    self.line.clear();
                    Edit::Overflow
                }
            }
            _ => Edit::Ignored,
        }
    }

    /// Drop the partial line, e.g. after a read error.
    pub fn clear(&mut self) {
        self.line.clear();
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShellCommand {
    Help,
    /// Report link power state and granted current.
    Status,
    Operator(OperatorCommand),
}

impl ShellCommand {
    pub fn parse(line: &str) -> Result<Self> {
        match line.trim() {
            "" => Err(Error::InvalidCommand),
            "help" => Ok(ShellCommand::Help),
            "status" => Ok(ShellCommand::Status),
            other => OperatorCommand::parse(other).map(ShellCommand::Operator),
        }
    }
}

/// `status` answer line.
pub fn write_status(out: &mut impl Write, state: PowerState, granted_ua: u32) -> fmt::Result {
    let state = match state {
        PowerState::Unconfigured => "unconfigured",
        PowerState::ConfiguredActive => "active",
        PowerState::Suspended => "suspended",
    };
    write!(out, "USB power state: {}, granted current: {}uA", state, granted_ua)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(editor: &mut LineEditor, bytes: &[u8]) -> Option<String<LINE_LEN>> {
        let mut submitted = None;
        for &b in bytes {
            if let Edit::Submit(line) = editor.feed(b) {
                submitted = Some(line);
            }
        }
        submitted
    }

    #[test]
    fn line_is_submitted_on_enter() {
        let mut editor = LineEditor::new();
        assert_eq!(editor.feed(b's'), Edit::Echo(b's'));
        let line = feed_all(&mut editor, b"tatus\r").unwrap();
        assert_eq!(line.as_str(), "status");
        // Editor is empty again; a bare LF after CR does nothing.
        assert_eq!(editor.feed(b'\n'), Edit::Ignored);
    }

    #[test]
    fn backspace_edits_the_line() {
        let mut editor = LineEditor::new();
        assert_eq!(editor.feed(0x7f), Edit::Ignored);
        let line = feed_all(&mut editor, b"helx\x08p\n").unwrap();
        assert_eq!(line.as_str(), "help");
    }

    #[test]
    fn overlong_line_is_discarded() {
        let mut editor = LineEditor::new();
        for _ in 0..LINE_LEN {
            assert_eq!(editor.feed(b'a'), Edit::Echo(b'a'));
        }
        assert_eq!(editor.feed(b'a'), Edit::Overflow);
        assert_eq!(editor.feed(b'\r'), Edit::Ignored);
    }

    #[test]
    fn control_bytes_are_ignored() {
        let mut editor = LineEditor::new();
        assert_eq!(editor.feed(0x1b), Edit::Ignored);
        assert_eq!(editor.feed(0xc3), Edit::Ignored);
        assert_eq!(feed_all(&mut editor, b"help\r").unwrap().as_str(), "help");
    }

    #[test]
    fn shell_commands_parse() {
        assert_eq!(ShellCommand::parse(" help "), Ok(ShellCommand::Help));
        assert_eq!(ShellCommand::parse("status"), Ok(ShellCommand::Status));
        assert_eq!(
            ShellCommand::parse("bt battery 80"),
            Ok(ShellCommand::Operator(OperatorCommand::Battery(80)))
        );
        assert_eq!(ShellCommand::parse("status now"), Err(Error::InvalidCommand));
        assert_eq!(ShellCommand::parse("   "), Err(Error::InvalidCommand));
    }

    #[test]
    fn status_line_names_state_and_current() {
        let mut out: String<64> = String::new();
        write_status(&mut out, PowerState::ConfiguredActive, 500_000).unwrap();
        assert_eq!(
            out.as_str(),
            "USB power state: active, granted current: 500000uA"
        );
    }
}
