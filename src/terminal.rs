use std::io::Write;

use crossterm::queue;
use crossterm::style::{Attribute, Color, Print, ResetColor, SetAttribute, SetForegroundColor};

use crate::actuator::Actuator;
use crate::error::ActuatorError;
use crate::keyboard::Key;

/// Live preview of a replay in the terminal.
///
/// Typed text is echoed as it arrives; file and navigation requests are
/// shown as coloured markers. Line breaks are written as `\r\n` so output
/// stays aligned while the terminal is in raw mode.
pub struct TerminalActuator<W: Write> {
    out: W,
}

impl<W: Write> TerminalActuator<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn marker(&mut self, color: Color, text: String) -> Result<(), ActuatorError> {
        queue!(
            self.out,
            Print("\r\n"),
            SetForegroundColor(color),
            SetAttribute(Attribute::Dim),
            Print(text),
            SetAttribute(Attribute::Reset),
            ResetColor,
            Print("\r\n"),
        )?;
        self.out.flush()?;
        Ok(())
    }
}

impl<W: Write> Actuator for TerminalActuator<W> {
    fn open_file(&mut self, path: &str) -> Result<bool, ActuatorError> {
        queue!(
            self.out,
            Print("\r\n"),
            SetForegroundColor(Color::Cyan),
            SetAttribute(Attribute::Bold),
            Print(format!("==> {path}")),
            SetAttribute(Attribute::Reset),
            ResetColor,
            Print("\r\n"),
        )?;
        self.out.flush()?;
        Ok(true)
    }

    fn goto_line(&mut self, line: usize) -> Result<bool, ActuatorError> {
        self.marker(Color::DarkGrey, format!("[line {line}]"))?;
        Ok(true)
    }

    fn delete_lines(&mut self, start: usize, end: usize) -> Result<bool, ActuatorError> {
        let text = if start == end {
            format!("[delete line {start}]")
        } else {
            format!("[delete lines {start}-{end}]")
        };
        self.marker(Color::Red, text)?;
        Ok(true)
    }

    fn save(&mut self) -> Result<bool, ActuatorError> {
        self.marker(Color::Green, "[saved]".to_string())?;
        Ok(true)
    }

    fn emit_char(&mut self, c: char) -> Result<(), ActuatorError> {
        queue!(self.out, Print(c))?;
        self.out.flush()?;
        Ok(())
    }

    fn emit_control_key(&mut self, key: Key) -> Result<(), ActuatorError> {
        match key {
            Key::Return => queue!(self.out, Print("\r\n"))?,
            Key::BackSpace => queue!(self.out, Print("\u{8} \u{8}"))?,
            Key::Tab => queue!(self.out, Print("    "))?,
            // caret movement has no echo
            Key::Home | Key::End | Key::Delete | Key::Shift | Key::Ctrl => {}
        }
        self.out.flush()?;
        Ok(())
    }

    fn emit_combo(&mut self, _keys: &[Key]) -> Result<(), ActuatorError> {
        Ok(())
    }
}
