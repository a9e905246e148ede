use std::fmt;
use std::fs;
use std::path::Path;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::error::Category;
use tracing::{info, warn};

use crate::config::check_knob;
use crate::error::{ApplyError, ReplayError};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum_macros::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum OperationKind {
    Navigate,
    Delete,
    Insert,
}

/// Per-operation typing behaviour for inserts
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum_macros::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TypingStyle {
    Fast,
    Slow,
    Precise,
}

/// One atomic replay instruction.
///
/// Delete lines are numbered in the document before the edit, insert lines in
/// the document after it. The two spaces are never mixed; operations are
/// replayed strictly in the order they were emitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub kind: OperationKind,
    pub line: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_end: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<TypingStyle>,
}

impl Operation {
    pub fn navigate(line: usize) -> Self {
        Self {
            kind: OperationKind::Navigate,
            line,
            line_end: None,
            content: None,
            style: None,
        }
    }

    /// Delete `start..=end`; a single-line range carries no `line_end`
    pub fn delete(start: usize, end: usize) -> Self {
        Self {
            kind: OperationKind::Delete,
            line: start,
            line_end: (end != start).then_some(end),
            content: None,
            style: None,
        }
    }

    pub fn insert(line: usize, content: impl Into<String>) -> Self {
        Self {
            kind: OperationKind::Insert,
            line,
            line_end: None,
            content: Some(content.into()),
            style: None,
        }
    }

    pub fn with_style(mut self, style: TypingStyle) -> Self {
        self.style = Some(style);
        self
    }

    /// Inclusive end of the range this operation covers
    pub fn end_line(&self) -> usize {
        self.line_end.unwrap_or(self.line)
    }

    /// Number of document lines an insert adds
    pub fn inserted_lines(&self) -> usize {
        self.content
            .as_deref()
            .map_or(0, |c| c.split_inclusive('\n').count())
    }
}

/// Tracks how far the document has drifted from its pre-edit numbering while
/// a file's operations are applied in order. Deletes are rebased by the drift;
/// inserts already speak post-edit numbering and are used as given.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LineShift {
    shift: isize,
}

impl LineShift {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current position of a delete range, or `None` if it falls before line 1
    pub fn rebase_delete(&mut self, op: &Operation) -> Option<(usize, usize)> {
        let start = usize::try_from(op.line as isize + self.shift).ok()?;
        let end = usize::try_from(op.end_line() as isize + self.shift).ok()?;
        if start == 0 {
            return None;
        }
        self.shift -= (op.end_line().saturating_sub(op.line) + 1) as isize;
        Some((start, end))
    }

    pub fn record_insert(&mut self, op: &Operation) {
        self.shift += op.inserted_lines() as isize;
    }
}

/// Ordered operations for a single file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    #[serde(default)]
    pub operations: Vec<Operation>,
}

impl FileChange {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            operations: Vec::new(),
        }
    }

    /// Apply the operations to `pre_image` in emitted order and return the
    /// resulting text. Lines keep their own terminators.
    pub fn apply_to(&self, pre_image: &str) -> Result<String, ApplyError> {
        let mut lines: Vec<String> = pre_image
            .split_inclusive('\n')
            .map(str::to_string)
            .collect();
        let mut shift = LineShift::new();

        for op in &self.operations {
            match op.kind {
                OperationKind::Navigate => {}
                OperationKind::Delete => {
                    let len = lines.len();
                    let out_of_range = ApplyError::DeleteOutOfRange {
                        start: op.line,
                        end: op.end_line(),
                        len,
                    };
                    let (start, end) = shift.rebase_delete(op).ok_or(out_of_range.clone())?;
                    if end > len || end < start {
                        return Err(out_of_range);
                    }
                    lines.drain(start - 1..end);
                }
                OperationKind::Insert => {
                    let content = op
                        .content
                        .as_deref()
                        .ok_or(ApplyError::MissingContent { line: op.line })?;
                    if op.line == 0 || op.line - 1 > lines.len() {
                        return Err(ApplyError::InsertOutOfRange {
                            line: op.line,
                            len: lines.len(),
                        });
                    }
                    let at = op.line - 1;
                    lines.splice(at..at, content.split_inclusive('\n').map(str::to_string));
                    shift.record_insert(op);
                }
            }
        }

        Ok(lines.concat())
    }
}

/// Session-level overrides of the typing configuration. Every field is
/// optional; unset fields fall back to the engine's defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_wpm: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wpm_variance: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub typo_probability: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub typo_correction_probability: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking_pause_probability: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking_pause_min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking_pause_max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fatigue_factor: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bigram_acceleration: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bigram_factor: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking_pauses_enabled: Option<bool>,
}

impl ReplayConfig {
    /// Field-wise `self` first, then `base`
    pub fn layered_over(self, base: &ReplayConfig) -> Self {
        Self {
            base_wpm: self.base_wpm.or(base.base_wpm),
            wpm_variance: self.wpm_variance.or(base.wpm_variance),
            typo_probability: self.typo_probability.or(base.typo_probability),
            typo_correction_probability: self
                .typo_correction_probability
                .or(base.typo_correction_probability),
            thinking_pause_probability: self
                .thinking_pause_probability
                .or(base.thinking_pause_probability),
            thinking_pause_min: self.thinking_pause_min.or(base.thinking_pause_min),
            thinking_pause_max: self.thinking_pause_max.or(base.thinking_pause_max),
            fatigue_factor: self.fatigue_factor.or(base.fatigue_factor),
            bigram_acceleration: self.bigram_acceleration.or(base.bigram_acceleration),
            bigram_factor: self.bigram_factor.or(base.bigram_factor),
            thinking_pauses_enabled: self
                .thinking_pauses_enabled
                .or(base.thinking_pauses_enabled),
        }
    }

    fn violations(&self, out: &mut Vec<Violation>) {
        let knobs = [
            ("base_wpm", self.base_wpm),
            ("wpm_variance", self.wpm_variance),
            ("typo_probability", self.typo_probability),
            ("typo_correction_probability", self.typo_correction_probability),
            ("thinking_pause_probability", self.thinking_pause_probability),
            ("thinking_pause_min", self.thinking_pause_min),
            ("thinking_pause_max", self.thinking_pause_max),
            ("fatigue_factor", self.fatigue_factor),
            ("bigram_factor", self.bigram_factor),
        ];
        for (field, value) in knobs {
            if let Some(Err(err)) = value.map(|v| check_knob(field, v)) {
                out.push(Violation::new(format!("config.{field}"), err.reason()));
            }
        }

        if let (Some(min), Some(max)) = (self.thinking_pause_min, self.thinking_pause_max) {
            if max < min {
                out.push(Violation::new(
                    "config.thinking_pause_max",
                    format!("must be >= thinking_pause_min ({min}), got {max}"),
                ));
            }
        }
    }
}

/// A single problem found while validating a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub location: String,
    pub message: String,
}

impl Violation {
    fn new(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.location, self.message)
    }
}

/// A compiled or hand-authored unit of replay work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplaySession {
    pub id: String,
    pub owner_tag: String,
    pub memo: String,
    pub files: Vec<FileChange>,
    #[serde(default)]
    pub config: ReplayConfig,
}

impl ReplaySession {
    pub fn total_operations(&self) -> usize {
        self.files.iter().map(|f| f.operations.len()).sum()
    }

    /// Every violation in the session, in document order
    pub fn validate(&self) -> Vec<Violation> {
        let mut out = Vec::new();

        if self.id.is_empty() {
            out.push(Violation::new("id", "must be a non-empty string"));
        }

        for (i, file) in self.files.iter().enumerate() {
            let prefix = format!("files[{i}]");
            if file.path.is_empty() {
                out.push(Violation::new(
                    format!("{prefix}.path"),
                    "must be a non-empty string",
                ));
            }
            for (j, op) in file.operations.iter().enumerate() {
                validate_operation(op, &format!("{prefix}.operations[{j}]"), &mut out);
            }
        }

        self.config.violations(&mut out);
        out
    }

    /// Strict load for execution: fails on the first problem found
    pub fn from_json(text: &str) -> Result<Self, ReplayError> {
        let session: Self = serde_json::from_str(text).map_err(|err| match err.classify() {
            Category::Data => ReplayError::Validation(err.to_string()),
            _ => ReplayError::Parse(err),
        })?;

        if let Some(first) = session.validate().into_iter().next() {
            return Err(ReplayError::Validation(first.to_string()));
        }
        Ok(session)
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

fn validate_operation(op: &Operation, prefix: &str, out: &mut Vec<Violation>) {
    if op.line < 1 {
        out.push(Violation::new(
            format!("{prefix}.line"),
            "must be a positive integer",
        ));
    }
    if let Some(end) = op.line_end {
        if end < op.line {
            out.push(Violation::new(
                format!("{prefix}.line_end"),
                format!("must be >= line ({}), got {end}", op.line),
            ));
        }
    }
    match (op.kind, &op.content) {
        (OperationKind::Insert, None) => out.push(Violation::new(
            format!("{prefix}.content"),
            "required for insert operations",
        )),
        (OperationKind::Navigate | OperationKind::Delete, Some(_)) => out.push(Violation::new(
            format!("{prefix}.content"),
            format!("only allowed on insert operations, found on {}", op.kind),
        )),
        _ => {}
    }
}

/// Read and strictly validate a session file
pub fn load_session<P: AsRef<Path>>(path: P) -> Result<ReplaySession, ReplayError> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(ReplayError::SessionNotFound {
            path: path.to_path_buf(),
        });
    }

    let text = fs::read_to_string(path)?;
    let session = ReplaySession::from_json(&text)?;

    for file in session.files.iter().filter(|f| f.path.contains("..")) {
        warn!(path = %file.path, "file path contains '..'");
    }
    info!(
        id = %session.id,
        files = session.files.len(),
        operations = session.total_operations(),
        "loaded session"
    );
    Ok(session)
}

/// `session_YYYYMMDD_HHMMSS` in UTC
pub fn generate_session_id() -> String {
    format!("session_{}", Utc::now().format("%Y%m%d_%H%M%S"))
}

/// Assembles a session around compiled file changes
#[derive(Debug, Clone)]
pub struct SessionBuilder {
    id: Option<String>,
    owner_tag: String,
    memo: String,
    config: ReplayConfig,
}

impl SessionBuilder {
    pub fn new(owner_tag: impl Into<String>, memo: impl Into<String>) -> Self {
        Self {
            id: None,
            owner_tag: owner_tag.into(),
            memo: memo.into(),
            config: ReplayConfig::default(),
        }
    }

    /// Overrides written into every captured session unless set explicitly
    pub fn default_config() -> ReplayConfig {
        ReplayConfig {
            base_wpm: Some(85.0),
            typo_probability: Some(0.02),
            thinking_pause_probability: Some(0.10),
            ..ReplayConfig::default()
        }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn config(mut self, config: ReplayConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self, files: Vec<FileChange>) -> ReplaySession {
        ReplaySession {
            id: self.id.unwrap_or_else(generate_session_id),
            owner_tag: self.owner_tag,
            memo: self.memo,
            files,
            config: self.config.layered_over(&Self::default_config()),
        }
    }
}
