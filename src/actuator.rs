use std::collections::HashMap;

use crate::error::ActuatorError;
use crate::keyboard::Key;
use crate::runtime::CancelToken;

/// The editor surface a replay drives.
///
/// Navigation and file calls report `Ok(false)` when the editor refused the
/// request; `Err` is reserved for the actuator itself breaking.
pub trait Actuator {
    fn open_file(&mut self, path: &str) -> Result<bool, ActuatorError>;
    fn goto_line(&mut self, line: usize) -> Result<bool, ActuatorError>;
    fn delete_lines(&mut self, start: usize, end: usize) -> Result<bool, ActuatorError>;
    fn save(&mut self) -> Result<bool, ActuatorError>;

    fn emit_char(&mut self, c: char) -> Result<(), ActuatorError>;
    fn emit_control_key(&mut self, key: Key) -> Result<(), ActuatorError>;
    fn emit_combo(&mut self, keys: &[Key]) -> Result<(), ActuatorError>;

    /// Stop any work the actuator runs on its own
    fn request_cancel(&mut self) {}
    fn reset_cancel(&mut self) {}
}

/// A call received by [`RecordingActuator`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActuatorCall {
    Open(String),
    Goto(usize),
    Delete(usize, usize),
    Save,
    Char(char),
    Control(Key),
    Combo(Vec<Key>),
    RequestCancel,
    ResetCancel,
}

/// Actuator that remembers every call, with scripted failures
#[derive(Debug, Default)]
pub struct RecordingActuator {
    pub calls: Vec<ActuatorCall>,
    open_failures: HashMap<String, u32>,
    open_errors: HashMap<String, u32>,
    refuse_save: bool,
    refuse_goto: bool,
    cancel_after_chars: Option<(usize, CancelToken)>,
    chars_seen: usize,
}

impl RecordingActuator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse the next `times` opens of `path`
    pub fn failing_opens(mut self, path: impl Into<String>, times: u32) -> Self {
        self.open_failures.insert(path.into(), times);
        self
    }

    /// Fail the next `times` opens of `path` with an actuator error
    pub fn erroring_opens(mut self, path: impl Into<String>, times: u32) -> Self {
        self.open_errors.insert(path.into(), times);
        self
    }

    pub fn refusing_save(mut self) -> Self {
        self.refuse_save = true;
        self
    }

    pub fn refusing_goto(mut self) -> Self {
        self.refuse_goto = true;
        self
    }

    /// Fire `token` once `count` characters have been emitted
    pub fn cancelling_after(mut self, count: usize, token: CancelToken) -> Self {
        self.cancel_after_chars = Some((count, token));
        self
    }

    /// Characters emitted, including backspaced typos
    pub fn typed(&self) -> String {
        self.calls
            .iter()
            .filter_map(|call| match call {
                ActuatorCall::Char(c) => Some(*c),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&ActuatorCall) -> bool) -> usize {
        self.calls.iter().filter(|c| pred(c)).count()
    }
}

impl Actuator for RecordingActuator {
    fn open_file(&mut self, path: &str) -> Result<bool, ActuatorError> {
        self.calls.push(ActuatorCall::Open(path.to_string()));
        if let Some(left) = self.open_errors.get_mut(path).filter(|left| **left > 0) {
            *left -= 1;
            return Err(ActuatorError::failed("open", format!("no editor for `{path}`")));
        }
        match self.open_failures.get_mut(path) {
            Some(left) if *left > 0 => {
                *left -= 1;
                Ok(false)
            }
            _ => Ok(true),
        }
    }

    fn goto_line(&mut self, line: usize) -> Result<bool, ActuatorError> {
        self.calls.push(ActuatorCall::Goto(line));
        Ok(!self.refuse_goto)
    }

    fn delete_lines(&mut self, start: usize, end: usize) -> Result<bool, ActuatorError> {
        self.calls.push(ActuatorCall::Delete(start, end));
        Ok(true)
    }

    fn save(&mut self) -> Result<bool, ActuatorError> {
        self.calls.push(ActuatorCall::Save);
        Ok(!self.refuse_save)
    }

    fn emit_char(&mut self, c: char) -> Result<(), ActuatorError> {
        self.calls.push(ActuatorCall::Char(c));
        self.chars_seen += 1;
        if let Some((count, token)) = &self.cancel_after_chars {
            if self.chars_seen >= *count {
                token.cancel();
            }
        }
        Ok(())
    }

    fn emit_control_key(&mut self, key: Key) -> Result<(), ActuatorError> {
        self.calls.push(ActuatorCall::Control(key));
        Ok(())
    }

    fn emit_combo(&mut self, keys: &[Key]) -> Result<(), ActuatorError> {
        self.calls.push(ActuatorCall::Combo(keys.to_vec()));
        Ok(())
    }

    fn request_cancel(&mut self) {
        self.calls.push(ActuatorCall::RequestCancel);
    }

    fn reset_cancel(&mut self) {
        self.calls.push(ActuatorCall::ResetCancel);
    }
}
