use std::fmt;

use diffy::{Hunk, Line};
use itertools::Itertools;
use tracing::{debug, warn};

use crate::diff::{self, PatchedFile};
use crate::error::DiffError;
use crate::grouping::group_consecutive;
use crate::session::{FileChange, Operation};

/// A file the compiler left out of the result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileWarning {
    BinaryFile(String),
    DeletedFile(String),
    NoContentChanges(String),
}

impl fmt::Display for CompileWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileWarning::BinaryFile(path) => write!(f, "skipping binary file: {path}"),
            CompileWarning::DeletedFile(path) => write!(f, "skipping deleted file: {path}"),
            CompileWarning::NoContentChanges(path) => {
                write!(f, "skipping file without content changes: {path}")
            }
        }
    }
}

/// Result of compiling one diff
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Compilation {
    /// sorted by path
    pub files: Vec<FileChange>,
    pub warnings: Vec<CompileWarning>,
}

impl Compilation {
    pub fn total_operations(&self) -> usize {
        self.files.iter().map(|f| f.operations.len()).sum()
    }
}

/// Turns unified diffs into ordered delete/insert operations
#[derive(Debug, Clone, Copy, Default)]
pub struct DiffCompiler;

impl DiffCompiler {
    pub fn compile(text: &str) -> Result<Compilation, DiffError> {
        let mut compilation = Compilation::default();

        for patched in diff::parse(text)? {
            match Self::compile_file(&patched) {
                Ok(change) => compilation.files.push(change),
                Err(warning) => {
                    warn!(%warning, "file skipped");
                    compilation.warnings.push(warning);
                }
            }
        }

        compilation.files = compilation
            .files
            .into_iter()
            .sorted_by(|a, b| a.path.cmp(&b.path))
            .collect();
        Ok(compilation)
    }

    /// Operations for one file, or the reason it cannot be replayed
    pub fn compile_file(patched: &PatchedFile<'_>) -> Result<FileChange, CompileWarning> {
        let path = patched.path().to_string();
        if patched.is_binary {
            return Err(CompileWarning::BinaryFile(path));
        }
        if patched.is_deleted {
            return Err(CompileWarning::DeletedFile(path));
        }
        if patched.hunks().is_empty() {
            return Err(CompileWarning::NoContentChanges(path));
        }

        let mut change = FileChange::new(path);
        for hunk in patched.hunks() {
            change
                .operations
                .extend(hunk_operations(hunk, patched.is_new));
        }
        debug!(
            path = %change.path,
            operations = change.operations.len(),
            "compiled file"
        );
        Ok(change)
    }
}

/// Deletes (pre-edit numbering) followed by inserts (post-edit numbering)
fn hunk_operations(hunk: &Hunk<'_, str>, is_new_file: bool) -> Vec<Operation> {
    let mut removed = Vec::new();
    let mut added = Vec::new();
    let mut source = hunk.old_range().start();
    let mut target = hunk.new_range().start();

    for line in hunk.lines() {
        match *line {
            Line::Delete(_) => {
                removed.push((source, ()));
                source = source.saturating_add(1);
            }
            Line::Insert(text) => {
                added.push((target, text));
                target = target.saturating_add(1);
            }
            Line::Context(_) => {
                source = source.saturating_add(1);
                target = target.saturating_add(1);
            }
        }
    }

    let deletes = if is_new_file {
        Vec::new()
    } else {
        group_consecutive(removed)
            .into_iter()
            .map(|group| Operation::delete(group.start, group.end()))
            .collect()
    };
    let inserts = group_consecutive(added)
        .into_iter()
        .map(|group| Operation::insert(group.start, group.items.concat()));

    deletes.into_iter().chain(inserts).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::OperationKind;

    const MODIFY: &str = "\
diff --git a/src/app.py b/src/app.py
index 1111111..2222222 100644
--- a/src/app.py
+++ b/src/app.py
@@ -1,6 +1,6 @@
 import os
-import sys
-import json
+import re

 def main():
-    pass
+    run()
+    return 0
";

    #[test]
    fn modified_file_groups_deletes_then_inserts() {
        let out = DiffCompiler::compile(MODIFY).unwrap();
        assert!(out.warnings.is_empty());
        assert_eq!(out.files.len(), 1);
        assert_eq!(
            out.files[0].operations,
            vec![
                Operation::delete(2, 3),
                Operation::delete(6, 6),
                Operation::insert(2, "import re\n"),
                Operation::insert(5, "    run()\n    return 0\n"),
            ]
        );
    }

    #[test]
    fn modified_file_round_trips() {
        let pre = "import os\nimport sys\nimport json\n\ndef main():\n    pass\n";
        let post = "import os\nimport re\n\ndef main():\n    run()\n    return 0\n";
        let out = DiffCompiler::compile(MODIFY).unwrap();
        assert_eq!(out.files[0].apply_to(pre).unwrap(), post);
    }

    #[test]
    fn new_file_is_a_single_insert() {
        let text = "\
diff --git a/hello.txt b/hello.txt
new file mode 100644
index 0000000..3333333
--- /dev/null
+++ b/hello.txt
@@ -0,0 +1,2 @@
+hello
+world
";
        let out = DiffCompiler::compile(text).unwrap();
        assert_eq!(out.files[0].path, "hello.txt");
        assert_eq!(
            out.files[0].operations,
            vec![Operation::insert(1, "hello\nworld\n")]
        );
    }

    #[test]
    fn binary_deleted_and_empty_files_are_skipped() {
        let text = "\
diff --git a/logo.png b/logo.png
index 1111111..2222222 100644
Binary files a/logo.png and b/logo.png differ
diff --git a/old.rs b/old.rs
deleted file mode 100644
index 1111111..0000000
--- a/old.rs
+++ /dev/null
@@ -1 +0,0 @@
-fn gone() {}
diff --git a/run.sh b/run.sh
old mode 100644
new mode 100755
";
        let out = DiffCompiler::compile(text).unwrap();
        assert!(out.files.is_empty());
        assert_eq!(
            out.warnings,
            vec![
                CompileWarning::BinaryFile("logo.png".into()),
                CompileWarning::DeletedFile("old.rs".into()),
                CompileWarning::NoContentChanges("run.sh".into()),
            ]
        );
        assert_eq!(
            out.warnings[0].to_string(),
            "skipping binary file: logo.png"
        );
    }

    #[test]
    fn files_come_out_sorted_by_path() {
        let text = "\
--- a/zeta.txt
+++ b/zeta.txt
@@ -1 +1 @@
-z
+Z
--- a/alpha.txt
+++ b/alpha.txt
@@ -1 +1 @@
-a
+A
";
        let out = DiffCompiler::compile(text).unwrap();
        let paths: Vec<_> = out.files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, ["alpha.txt", "zeta.txt"]);
        assert_eq!(out.total_operations(), 4);
    }

    #[test]
    fn hunks_keep_encounter_order() {
        let text = "\
--- a/f.txt
+++ b/f.txt
@@ -2 +2 @@
-b
+B
@@ -9,2 +9,3 @@
 i
+new
 j
";
        let ops = &DiffCompiler::compile(text).unwrap().files[0].operations;
        let kinds: Vec<_> = ops.iter().map(|o| (o.kind, o.line)).collect();
        assert_eq!(
            kinds,
            vec![
                (OperationKind::Delete, 2),
                (OperationKind::Insert, 2),
                (OperationKind::Insert, 10),
            ]
        );
    }

    #[test]
    fn blank_input_compiles_to_nothing() {
        assert_eq!(DiffCompiler::compile("").unwrap(), Compilation::default());
        assert_eq!(
            DiffCompiler::compile("  \n\n").unwrap(),
            Compilation::default()
        );
    }

    #[test]
    fn compilation_is_deterministic() {
        let a = DiffCompiler::compile(MODIFY).unwrap();
        let b = DiffCompiler::compile(MODIFY).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn missing_terminator_is_preserved() {
        let text = "\
--- a/f.txt
+++ b/f.txt
@@ -1 +1 @@
-old
\\ No newline at end of file
+new
\\ No newline at end of file
";
        let ops = &DiffCompiler::compile(text).unwrap().files[0].operations;
        assert_eq!(ops[1], Operation::insert(1, "new"));
        assert_eq!(
            DiffCompiler::compile(text).unwrap().files[0]
                .apply_to("old")
                .unwrap(),
            "new"
        );
    }

    #[test]
    fn parse_errors_propagate() {
        let err = DiffCompiler::compile("--- a/f\n+++ b/f\n@@ nonsense @@\n").unwrap_err();
        assert!(matches!(err, DiffError::Patch { line: 1, .. }));
        assert!(err.to_string().contains("invalid patch for `f`"));
    }
}
