//! Unified-diff rendering of edits, for hosts that show a change before applying it.

use std::collections::BTreeMap;

use carve_core::{EditError, FileId, WorkspaceEdit};
use similar::{ChangeTag, TextDiff};

use crate::LocalFunctionEdit;

const CONTEXT_LINES: usize = 3;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FilePreview {
    pub file: FileId,
    pub modified: String,
    pub unified_diff: String,
    pub lines_added: usize,
    pub lines_removed: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RefactoringPreview {
    /// Only files whose text changes, ordered by file.
    pub files: Vec<FilePreview>,
    pub edit_count: usize,
}

impl RefactoringPreview {
    pub fn file(&self, file: &FileId) -> Option<&FilePreview> {
        self.files.iter().find(|preview| &preview.file == file)
    }
}

fn diff_file(file: &FileId, original: &str, modified: String) -> FilePreview {
    let diff = TextDiff::from_lines(original, modified.as_str());
    let (mut lines_added, mut lines_removed) = (0, 0);
    for change in diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Insert => lines_added += 1,
            ChangeTag::Delete => lines_removed += 1,
            ChangeTag::Equal => {}
        }
    }
    let path = file.0.as_str();
    let unified_diff = diff
        .unified_diff()
        .context_radius(CONTEXT_LINES)
        .header(&format!("a/{path}"), &format!("b/{path}"))
        .to_string();
    FilePreview {
        file: file.clone(),
        modified,
        unified_diff,
        lines_added,
        lines_removed,
    }
}

/// Renders `edit` against `sources`. A file missing from `sources` is diffed as empty.
pub fn generate_preview(
    sources: &BTreeMap<FileId, String>,
    edit: &WorkspaceEdit,
) -> Result<RefactoringPreview, EditError> {
    let mut edit = edit.clone();
    edit.normalize()?;

    let mut files = Vec::new();
    for file in edit.edits_by_file().into_keys() {
        let original = sources.get(file).map_or("", String::as_str);
        let modified = edit.apply_to(file, original)?;
        if modified != original {
            files.push(diff_file(file, original, modified));
        }
    }
    Ok(RefactoringPreview {
        files,
        edit_count: edit.edits.len(),
    })
}

impl LocalFunctionEdit {
    /// The diff this extraction makes to `source`, the text it was computed from.
    pub fn preview(&self, file: &FileId, source: &str) -> Result<FilePreview, EditError> {
        let modified = self.edit.apply_to(file, source)?;
        Ok(diff_file(file, source, modified))
    }
}

#[cfg(test)]
mod tests {
    use carve_core::{TextEdit, TextRange};
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn changed_lines_are_counted() {
        let file = FileId::new("Program.cs");
        let sources = BTreeMap::from([(file.clone(), "a\nb\nc\n".to_owned())]);
        let edit = WorkspaceEdit::new(vec![
            TextEdit::replace(file.clone(), TextRange::new(2, 3), "B"),
            TextEdit::insert(file.clone(), 6, "d\n"),
        ]);

        let preview = generate_preview(&sources, &edit).unwrap();

        assert_eq!(preview.edit_count, 2);
        let diff = preview.file(&file).unwrap();
        assert_eq!(diff.modified, "a\nB\nc\nd\n");
        assert_eq!((diff.lines_added, diff.lines_removed), (2, 1));
        assert!(diff.unified_diff.starts_with("--- a/Program.cs\n+++ b/Program.cs\n"));
        assert!(diff.unified_diff.contains("-b\n+B\n"));
    }

    #[test]
    fn no_op_edits_are_left_out() {
        let file = FileId::new("Program.cs");
        let sources = BTreeMap::from([(file.clone(), "abc".to_owned())]);
        let edit = WorkspaceEdit::new(vec![TextEdit::replace(file, TextRange::new(0, 1), "a")]);

        let preview = generate_preview(&sources, &edit).unwrap();

        assert!(preview.files.is_empty());
        assert_eq!(preview.edit_count, 1);
    }
}
