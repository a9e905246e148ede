use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failure to tokenize unified diff text into files and hunks
#[derive(Debug, Error)]
pub enum DiffError {
    #[error("line {line}: invalid patch for `{path}`: {source}")]
    Patch {
        line: usize,
        path: String,
        #[source]
        source: diffy::ParsePatchError,
    },

    #[error("line {line}: hunk header outside of a file section")]
    HunkOutsideFile { line: usize },

    #[error("line {line}: `+++` header without a preceding `---`")]
    OrphanTargetHeader { line: usize },

    #[error("no file sections found in diff text")]
    NoFileSections,

    #[error("failed to read diff: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure to obtain diff text from git
#[derive(Debug, Error)]
pub enum GitError {
    #[error("failed to run git: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("`git {command}` failed: {stderr}")]
    Command { command: String, stderr: String },

    #[error("`git {command}` did not finish within {}s", timeout.as_secs())]
    Timeout { command: String, timeout: Duration },

    #[error("git output is not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Everything a caller of the replay side may need to react to
#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("session file not found: {}", path.display())]
    SessionNotFound { path: PathBuf },

    #[error("failed to parse session JSON: {0}")]
    Parse(#[source] serde_json::Error),

    #[error("invalid session: {0}")]
    Validation(String),

    #[error("failed to open file `{path}` after {attempts} attempt(s)")]
    FileOpen { path: String, attempts: u32 },

    #[error("operation failed: {message}")]
    Operation { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification of how a replay ended, for callers that must
/// finalize external state (time tracking, reporting) on every path
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum FailureKind {
    SessionNotFound,
    Parse,
    Validation,
    FileOpenExhausted,
    OperationExecution,
    Cancelled,
}

impl ReplayError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::SessionNotFound { .. } => FailureKind::SessionNotFound,
            Self::Parse(_) => FailureKind::Parse,
            Self::Validation(_) => FailureKind::Validation,
            Self::FileOpen { .. } => FailureKind::FileOpenExhausted,
            Self::Operation { .. } | Self::Io(_) => FailureKind::OperationExecution,
        }
    }

    pub fn operation(message: impl Into<String>) -> Self {
        Self::Operation {
            message: message.into(),
        }
    }
}

impl From<ActuatorError> for ReplayError {
    fn from(err: ActuatorError) -> Self {
        Self::operation(err.to_string())
    }
}

impl From<ConfigError> for ReplayError {
    fn from(err: ConfigError) -> Self {
        Self::Validation(err.to_string())
    }
}

/// Reported by an actuator when the editor surface rejects a request
#[derive(Debug, Error)]
pub enum ActuatorError {
    #[error("{action} failed: {reason}")]
    Failed { action: &'static str, reason: String },

    #[error("actuator I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ActuatorError {
    pub fn failed(action: &'static str, reason: impl Into<String>) -> Self {
        Self::Failed {
            action,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{field} must be between 0 and 1, got {value}")]
    Probability { field: &'static str, value: f64 },

    #[error("{field} must be positive, got {value}")]
    NotPositive { field: &'static str, value: f64 },

    #[error("{field} must not be negative, got {value}")]
    Negative { field: &'static str, value: f64 },

    #[error("{field} must be finite, got {value}")]
    NotFinite { field: &'static str, value: f64 },

    #[error("{field} must be at most {max}, got {value}")]
    TooLarge {
        field: &'static str,
        value: f64,
        max: f64,
    },

    #[error("invalid thinking pause range: [{min}, {max}]")]
    PauseRange { min: f64, max: f64 },
}

impl ConfigError {
    /// The problem without the field name, for reports that locate the
    /// field themselves
    pub fn reason(&self) -> String {
        match self {
            ConfigError::Probability { value, .. } => {
                format!("must be between 0 and 1, got {value}")
            }
            ConfigError::NotPositive { value, .. } => format!("must be positive, got {value}"),
            ConfigError::Negative { value, .. } => format!("must not be negative, got {value}"),
            ConfigError::NotFinite { value, .. } => format!("must be finite, got {value}"),
            ConfigError::TooLarge { value, max, .. } => {
                format!("must be at most {max}, got {value}")
            }
            ConfigError::PauseRange { min, max } => {
                format!("must be >= thinking_pause_min ({min}), got {max}")
            }
        }
    }
}

/// Applying operations to text that does not match their line numbers
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApplyError {
    #[error("delete of lines {start}-{end} exceeds document of {len} line(s)")]
    DeleteOutOfRange { start: usize, end: usize, len: usize },

    #[error("insert at line {line} exceeds document of {len} line(s)")]
    InsertOutOfRange { line: usize, len: usize },

    #[error("insert at line {line} has no content")]
    MissingContent { line: usize },
}
