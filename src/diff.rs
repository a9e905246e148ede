use std::fmt;
use std::ops::Range;

use diffy::{Hunk, Patch};

use crate::error::DiffError;

const DEV_NULL: &str = "/dev/null";

/// One file section of a diff, with its hunks parsed by `diffy`.
///
/// Hunks borrow their line text from the diff they were parsed from.
#[derive(Default)]
pub struct PatchedFile<'a> {
    pub source_path: Option<String>,
    pub target_path: Option<String>,
    pub is_new: bool,
    pub is_deleted: bool,
    pub is_binary: bool,
    patch: Option<Patch<'a, str>>,
}

impl PatchedFile<'_> {
    pub fn hunks(&self) -> &[Hunk<'_, str>] {
        match &self.patch {
            Some(patch) => patch.hunks(),
            None => &[],
        }
    }

    /// Path of the file after the change, or before it for deletions
    pub fn path(&self) -> &str {
        let preferred = if self.is_deleted {
            self.source_path.as_deref().or(self.target_path.as_deref())
        } else {
            self.target_path.as_deref().or(self.source_path.as_deref())
        };
        preferred.unwrap_or_default()
    }
}

impl fmt::Debug for PatchedFile<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatchedFile")
            .field("source_path", &self.source_path)
            .field("target_path", &self.target_path)
            .field("is_new", &self.is_new)
            .field("is_deleted", &self.is_deleted)
            .field("is_binary", &self.is_binary)
            .field("hunks", &self.hunks().len())
            .finish()
    }
}

/// Strip `a/` / `b/` prefixes, quotes and trailing timestamps from a header path
fn clean_path(raw: &str) -> String {
    let raw = raw.trim_end_matches(['\n', '\r']);
    let raw = raw.split('\t').next().unwrap_or(raw);
    let raw = raw.trim_matches('"');
    raw.strip_prefix("a/")
        .or_else(|| raw.strip_prefix("b/"))
        .unwrap_or(raw)
        .to_string()
}

/// Body line counts declared by a `@@ -a,b +c,d @@` header, used only to
/// find where the hunk ends; `diffy` does the real parsing
fn declared_counts(header: &str) -> Option<(usize, usize)> {
    let ranges = header.strip_prefix("@@ ")?.split(" @@").next()?;
    let (old, new) = ranges.split_once(' ')?;
    let count = |range: &str| match range.split_once(',') {
        Some((_, len)) => len.parse().ok(),
        None => Some(1),
    };
    Some((count(old.strip_prefix('-')?)?, count(new.strip_prefix('+')?)?))
}

struct Section {
    file: PatchedFile<'static>,
    /// byte range of the `---`/`+++`/`@@` text handed to `diffy`
    patch: Option<Range<usize>>,
    patch_line: usize,
    saw_source: bool,
    saw_target: bool,
    saw_hunk: bool,
}

impl Section {
    fn new() -> Self {
        Self {
            file: PatchedFile::default(),
            patch: None,
            patch_line: 0,
            saw_source: false,
            saw_target: false,
            saw_hunk: false,
        }
    }

    /// Section opened by `diff --git a/<src> b/<dst>`
    fn from_git_header(rest: &str) -> Self {
        let mut section = Self::new();
        let rest = rest.trim_end_matches(['\n', '\r']);
        if let Some(split) = rest.rfind(" b/") {
            section.file.source_path = Some(clean_path(&rest[..split]));
            section.file.target_path = Some(clean_path(&rest[split + 1..]));
        }
        section
    }

    fn extend_patch(&mut self, span: Range<usize>, lineno: usize) {
        match self.patch.as_mut() {
            Some(patch) => patch.end = span.end,
            None => {
                self.patch = Some(span);
                self.patch_line = lineno;
            }
        }
    }

    fn into_file(self, text: &str) -> Result<PatchedFile<'_>, DiffError> {
        let Section {
            file,
            patch,
            patch_line,
            saw_hunk,
            ..
        } = self;
        let mut parsed = PatchedFile {
            source_path: file.source_path,
            target_path: file.target_path,
            is_new: file.is_new,
            is_deleted: file.is_deleted,
            is_binary: file.is_binary,
            patch: None,
        };

        // headers without hunks carry nothing to parse
        if let Some(span) = patch.filter(|_| saw_hunk) {
            let patch = Patch::from_str(&text[span]).map_err(|source| DiffError::Patch {
                line: patch_line,
                path: parsed.path().to_string(),
                source,
            })?;
            parsed.patch = Some(patch);
        }
        Ok(parsed)
    }
}

/// Splits diff text into file sections and frames each section's patch text
#[derive(Default)]
struct Splitter {
    sections: Vec<Section>,
    current: Option<Section>,
    /// (removed, added) body lines still owed to the open hunk
    open_hunk: Option<(usize, usize)>,
}

impl Splitter {
    fn finish_section(&mut self) {
        if let Some(section) = self.current.take() {
            self.sections.push(section);
        }
    }

    fn body_line(&mut self, raw: &str, span: Range<usize>, lineno: usize) {
        let (Some(section), Some((removed, added))) =
            (self.current.as_mut(), self.open_hunk.as_mut())
        else {
            return;
        };
        match raw.as_bytes().first() {
            Some(b'-') => *removed = removed.saturating_sub(1),
            Some(b'+') => *added = added.saturating_sub(1),
            Some(b'\\') => {}
            _ => {
                *removed = removed.saturating_sub(1);
                *added = added.saturating_sub(1);
            }
        }
        section.extend_patch(span, lineno);
        if *removed == 0 && *added == 0 {
            self.open_hunk = None;
        }
    }

    fn header_line(
        &mut self,
        raw: &str,
        span: Range<usize>,
        lineno: usize,
    ) -> Result<(), DiffError> {
        if let Some(rest) = raw.strip_prefix("diff --git ") {
            self.finish_section();
            self.current = Some(Section::from_git_header(rest));
        } else if let Some(rest) = raw.strip_prefix("--- ") {
            let starts_new = match &self.current {
                Some(section) => section.saw_source || section.saw_hunk,
                None => true,
            };
            if starts_new {
                self.finish_section();
                self.current = Some(Section::new());
            }
            if let Some(section) = self.current.as_mut() {
                let path = clean_path(rest);
                section.saw_source = true;
                section.extend_patch(span, lineno);
                if path == DEV_NULL {
                    section.file.is_new = true;
                } else {
                    section.file.source_path = Some(path);
                }
            }
        } else if let Some(rest) = raw.strip_prefix("+++ ") {
            let section = match self.current.as_mut() {
                Some(section) if section.saw_source && !section.saw_target => section,
                _ => return Err(DiffError::OrphanTargetHeader { line: lineno }),
            };
            let path = clean_path(rest);
            section.saw_target = true;
            section.extend_patch(span, lineno);
            if path == DEV_NULL {
                section.file.is_deleted = true;
            } else {
                section.file.target_path = Some(path);
            }
        } else if raw.starts_with("@@") {
            let section = match self.current.as_mut() {
                Some(section) if section.saw_source && section.saw_target => section,
                _ => return Err(DiffError::HunkOutsideFile { line: lineno }),
            };
            section.saw_hunk = true;
            section.extend_patch(span, lineno);
            // a header diffy cannot read fails the whole section later
            self.open_hunk = declared_counts(raw).filter(|&(removed, added)| removed > 0 || added > 0);
        } else if let Some(section) = self.current.as_mut() {
            if section.saw_hunk && raw.starts_with('\\') {
                // `\ No newline at end of file` after the hunk's last line
                section.extend_patch(span, lineno);
            } else if raw.starts_with("new file mode") {
                section.file.is_new = true;
            } else if raw.starts_with("deleted file mode") {
                section.file.is_deleted = true;
            } else if raw.starts_with("Binary files ") || raw.starts_with("GIT binary patch") {
                section.file.is_binary = true;
            }
        }
        // Anything else (commit preamble, index lines, rename metadata) carries no edits
        Ok(())
    }
}

/// Split unified diff text (plain or git flavoured) into files and parse
/// each file's hunks with `diffy`.
///
/// Hunk bodies are framed by their declared line counts, so content lines
/// that look like `---`/`+++` headers are never misread. Blank input yields
/// no files; non-blank input without any file section is an error.
pub fn parse(text: &str) -> Result<Vec<PatchedFile<'_>>, DiffError> {
    let mut splitter = Splitter::default();
    let mut offset = 0;

    for (idx, raw) in text.split_inclusive('\n').enumerate() {
        let span = offset..offset + raw.len();
        offset = span.end;
        let lineno = idx + 1;

        if splitter.open_hunk.is_some() {
            splitter.body_line(raw, span, lineno);
        } else {
            splitter.header_line(raw, span, lineno)?;
        }
    }
    splitter.finish_section();

    if splitter.sections.is_empty() && !text.trim().is_empty() {
        return Err(DiffError::NoFileSections);
    }
    splitter
        .sections
        .into_iter()
        .map(|section| section.into_file(text))
        .collect()
}
