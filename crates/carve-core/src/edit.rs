use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{TextRange, TextSize};

/// Identifier for a file the host owns.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FileId(pub String);

impl FileId {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }
}

/// A single replacement of `range` in `file` by `replacement`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextEdit {
    pub file: FileId,
    pub range: TextRange,
    pub replacement: String,
}

impl TextEdit {
    pub fn insert(file: FileId, offset: TextSize, text: impl Into<String>) -> Self {
        Self {
            file,
            range: TextRange::empty(offset),
            replacement: text.into(),
        }
    }

    pub fn replace(file: FileId, range: TextRange, text: impl Into<String>) -> Self {
        Self {
            file,
            range,
            replacement: text.into(),
        }
    }

    pub fn delete(file: FileId, range: TextRange) -> Self {
        Self::replace(file, range, String::new())
    }

    /// Change in document length caused by this edit.
    fn delta(&self) -> isize {
        self.replacement.len() as isize - self.range.len() as isize
    }
}

/// A set of edits, possibly spanning several files.
///
/// Call [`WorkspaceEdit::normalize`] before handing the edit to a host: it sorts,
/// merges inserts at the same offset and rejects overlaps.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceEdit {
    pub edits: Vec<TextEdit>,
}

impl WorkspaceEdit {
    pub fn new(edits: Vec<TextEdit>) -> Self {
        Self { edits }
    }

    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    /// Edits grouped by file, each group sorted by position.
    pub fn edits_by_file(&self) -> BTreeMap<&FileId, Vec<&TextEdit>> {
        let mut map: BTreeMap<&FileId, Vec<&TextEdit>> = BTreeMap::new();
        for edit in &self.edits {
            map.entry(&edit.file).or_default().push(edit);
        }
        for edits in map.values_mut() {
            edits.sort_by_key(|edit| (edit.range.start, edit.range.end));
        }
        map
    }

    /// Sorts by file then position, drops exact duplicates and concatenates
    /// inserts at one offset in their original order. Fails on overlapping ranges.
    ///
    /// An insert at the end of a replaced range does not overlap it.
    pub fn normalize(&mut self) -> Result<(), EditError> {
        self.edits
            .sort_by(|a, b| (&a.file, a.range.start, a.range.end).cmp(&(&b.file, b.range.start, b.range.end)));

        let mut kept: Vec<TextEdit> = Vec::with_capacity(self.edits.len());
        for edit in std::mem::take(&mut self.edits) {
            let Some(prev) = kept.last_mut().filter(|prev| prev.file == edit.file) else {
                kept.push(edit);
                continue;
            };
            if *prev == edit {
                continue;
            }
            if edit.range.is_empty() && prev.range == edit.range {
                prev.replacement.push_str(&edit.replacement);
            } else if edit.range.start < prev.range.end {
                return Err(EditError::OverlappingEdits {
                    file: edit.file,
                    first: prev.range,
                    second: edit.range,
                });
            } else {
                kept.push(edit);
            }
        }
        self.edits = kept;
        Ok(())
    }

    /// Applies the edits targeting `file` to `text`.
    pub fn apply_to(&self, file: &FileId, text: &str) -> Result<String, EditError> {
        let edits: Vec<TextEdit> = self
            .edits
            .iter()
            .filter(|edit| &edit.file == file)
            .cloned()
            .collect();
        apply_text_edits(text, &edits)
    }

    /// Maps an offset in the original text of `file` to the edited text.
    ///
    /// Offsets inside a replaced range map to the start of the replacement.
    pub fn map_offset(&self, file: &FileId, offset: TextSize) -> TextSize {
        let mut shift: isize = 0;
        for edit in self.edits.iter().filter(|edit| &edit.file == file) {
            if edit.range.end <= offset && !(edit.range.is_empty() && edit.range.start == offset) {
                shift += edit.delta();
            } else if edit.range.start < offset {
                return (edit.range.start as isize + shift) as TextSize;
            }
        }
        (offset as isize + shift).max(0) as TextSize
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EditError {
    #[error("invalid text range {range:?} in {file:?}")]
    InvalidRange { file: FileId, range: TextRange },
    #[error("overlapping edits in {file:?}: {first:?} overlaps {second:?}")]
    OverlappingEdits {
        file: FileId,
        first: TextRange,
        second: TextRange,
    },
    #[error("edit range {range:?} is outside the text (len={len}) in {file:?}")]
    OutOfBounds {
        file: FileId,
        range: TextRange,
        len: usize,
    },
}

/// Applies non-overlapping `edits` to `original`.
///
/// Inserts at one offset land in the order given, before a replacement starting there.
pub fn apply_text_edits(original: &str, edits: &[TextEdit]) -> Result<String, EditError> {
    let mut ordered: Vec<&TextEdit> = edits.iter().collect();
    ordered.sort_by_key(|edit| (edit.range.start, edit.range.end));

    let mut out = String::with_capacity(original.len());
    let mut cursor = 0;
    let mut previous = TextRange::empty(0);
    for edit in ordered {
        let TextRange { start, end } = edit.range;
        if start > end {
            return Err(EditError::InvalidRange {
                file: edit.file.clone(),
                range: edit.range,
            });
        }
        if end > original.len() || !original.is_char_boundary(start) || !original.is_char_boundary(end) {
            return Err(EditError::OutOfBounds {
                file: edit.file.clone(),
                range: edit.range,
                len: original.len(),
            });
        }
        if start < cursor {
            return Err(EditError::OverlappingEdits {
                file: edit.file.clone(),
                first: previous,
                second: edit.range,
            });
        }
        out.push_str(&original[cursor..start]);
        out.push_str(&edit.replacement);
        cursor = end;
        previous = edit.range;
    }
    out.push_str(&original[cursor..]);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    use super::*;

    fn file() -> FileId {
        FileId::new("Main.cs")
    }

    #[test]
    fn edits_apply_in_position_order() {
        let edits = vec![
            TextEdit::insert(file(), 7, "!"),
            TextEdit::replace(file(), TextRange::new(0, 3), "bar"),
            TextEdit::insert(file(), 3, "s"),
        ];
        assert_eq!(apply_text_edits("foo baz", &edits).unwrap(), "bars baz!");
    }

    #[test]
    fn ranges_must_fall_on_char_boundaries() {
        let edits = vec![TextEdit::replace(file(), TextRange::new(0, 1), "x")];
        assert!(matches!(
            apply_text_edits("é", &edits),
            Err(EditError::OutOfBounds { len: 2, .. })
        ));
    }

    #[test]
    fn normalize_rejects_overlaps() {
        let mut edit = WorkspaceEdit::new(vec![
            TextEdit::replace(file(), TextRange::new(0, 4), "a"),
            TextEdit::replace(file(), TextRange::new(2, 6), "b"),
        ]);
        assert!(matches!(
            edit.normalize(),
            Err(EditError::OverlappingEdits { .. })
        ));
    }

    #[test]
    fn normalize_merges_inserts_at_same_offset() {
        let mut edit = WorkspaceEdit::new(vec![
            TextEdit::insert(file(), 1, "x"),
            TextEdit::insert(file(), 1, "y"),
        ]);
        edit.normalize().unwrap();
        assert_eq!(edit.edits.len(), 1);
        assert_eq!(edit.apply_to(&file(), "ab").unwrap(), "axyb");
    }

    #[test]
    fn map_offset_accounts_for_preceding_edits() {
        let mut edit = WorkspaceEdit::new(vec![
            TextEdit::replace(file(), TextRange::new(0, 1), "long"),
            TextEdit::insert(file(), 10, "tail"),
        ]);
        edit.normalize().unwrap();
        assert_eq!(edit.map_offset(&file(), 5), 8);
        assert_eq!(edit.map_offset(&file(), 10), 13);
    }

    proptest! {
        #[test]
        fn disjoint_replacements_preserve_untouched_text(
            text in "[a-z]{8,40}",
            cut in 0usize..4,
            replacement in "[A-Z]{0,5}",
        ) {
            let mid = text.len() / 2;
            let range = TextRange::new(mid - cut, mid);
            let mut edit = WorkspaceEdit::new(vec![TextEdit::replace(file(), range, replacement.clone())]);
            edit.normalize().unwrap();
            let out = edit.apply_to(&file(), &text).unwrap();
            prop_assert_eq!(&out[..range.start], &text[..range.start]);
            prop_assert_eq!(&out[range.start + replacement.len()..], &text[range.end..]);
            prop_assert_eq!(edit.map_offset(&file(), text.len()), out.len());
        }
    }
}
