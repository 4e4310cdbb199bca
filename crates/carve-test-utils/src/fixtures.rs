use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};

use carve_core::TextRange;

const SELECTION: (&str, &str) = ("[|", "|]");
const RENAME: (&str, &str) = ("{|Rename:", "|}");

/// Removes the first `open ... close` pair, returning the text and the range the pair enclosed.
fn strip_marker(text: &str, (open, close): (&str, &str)) -> Option<(String, TextRange)> {
    let open_at = text.find(open)?;
    let inner_start = open_at + open.len();
    let inner_len = text[inner_start..]
        .find(close)
        .unwrap_or_else(|| panic!("`{open}` at offset {open_at} is never closed by `{close}`"));
    let inner_end = inner_start + inner_len;

    let stripped = [&text[..open_at], &text[inner_start..inner_end], &text[inner_end + close.len()..]].concat();
    Some((stripped, TextRange::new(open_at, open_at + inner_len)))
}

/// Splits a fixture with one `[|...|]` pair into its source and the selected range.
#[track_caller]
pub fn extract_selection(fixture: &str) -> (String, TextRange) {
    let Some((source, selection)) = strip_marker(fixture, SELECTION) else {
        panic!("fixture has no `[|` selection:\n{fixture}");
    };
    assert!(!source.contains(SELECTION.0), "fixture has more than one selection:\n{fixture}");
    (source, selection)
}

/// Splits an expected output into its text and the range marked `{|Rename:...|}`, if any.
pub fn extract_rename(expected: &str) -> (String, Option<TextRange>) {
    match strip_marker(expected, RENAME) {
        Some((text, range)) => (text, Some(range)),
        None => (expected.to_owned(), None),
    }
}

/// Wraps `range` of `text` in a `{|Rename:...|}` marker.
#[must_use]
pub fn mark_rename(text: &str, range: TextRange) -> String {
    let (open, close) = RENAME;
    [
        &text[..range.start],
        open,
        &text[range.start..range.end],
        close,
        &text[range.end..],
    ]
    .concat()
}

/// Compares `actual`, with `rename` marked, against `expected`.
///
/// Surrounding whitespace is ignored on both sides so raw-string fixtures can open on their own line.
#[track_caller]
pub fn assert_text_with_rename(actual: &str, rename: Option<TextRange>, expected: &str) {
    let actual = rename.map_or_else(|| actual.to_owned(), |range| mark_rename(actual, range));
    pretty_assertions::assert_eq!(actual.trim(), expected.trim());
}

/// Every file under `dir`, keyed by its path relative to `dir`.
pub fn load_fixture_dir(dir: &Path) -> BTreeMap<PathBuf, String> {
    let mut files = BTreeMap::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(next) = pending.pop() {
        let entries = fs::read_dir(&next).unwrap_or_else(|err| panic!("cannot list {}: {err}", next.display()));
        for entry in entries {
            let path = entry.unwrap_or_else(|err| panic!("cannot list {}: {err}", next.display())).path();
            if path.is_dir() {
                pending.push(path);
                continue;
            }
            let text = fs::read_to_string(&path).unwrap_or_else(|err| panic!("cannot read {}: {err}", path.display()));
            let relative = path.strip_prefix(dir).unwrap_or(&path).to_path_buf();
            files.insert(relative, text);
        }
    }
    files
}

/// Applies `transform` to every file under `before` and compares the results with `after`.
///
/// With `BLESS` set to anything but empty, `0` or `false`, `after` is rewritten instead of compared.
#[track_caller]
pub fn assert_fixture_transformed(before: &Path, after: &Path, mut transform: impl FnMut(&Path, &str) -> String) {
    let actual: BTreeMap<PathBuf, String> = load_fixture_dir(before)
        .into_iter()
        .map(|(path, text)| {
            let transformed = transform(&path, &text);
            (path, transformed)
        })
        .collect();

    if bless_requested() {
        write_fixture_dir(after, &actual);
        return;
    }
    assert!(
        after.is_dir(),
        "expected fixtures {} are missing; rerun with BLESS=1 to create them",
        after.display()
    );
    pretty_assertions::assert_eq!(actual, load_fixture_dir(after));
}

fn bless_requested() -> bool {
    std::env::var("BLESS")
        .map(|value| !matches!(value.trim().to_ascii_lowercase().as_str(), "" | "0" | "false"))
        .unwrap_or(false)
}

fn write_fixture_dir(dir: &Path, files: &BTreeMap<PathBuf, String>) {
    if dir.exists() {
        fs::remove_dir_all(dir).unwrap_or_else(|err| panic!("cannot clear {}: {err}", dir.display()));
    }
    for (relative, text) in files {
        assert!(
            !relative.components().any(|part| part == Component::ParentDir),
            "fixture path escapes the fixture dir: {}",
            relative.display()
        );
        let path = dir.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap_or_else(|err| panic!("cannot create {}: {err}", parent.display()));
        }
        fs::write(&path, text).unwrap_or_else(|err| panic!("cannot write {}: {err}", path.display()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_markers_are_removed() {
        let (text, range) = extract_selection("a [|b c|] d");
        assert_eq!(text, "a b c d");
        assert_eq!(range.slice(&text), "b c");
    }

    #[test]
    fn empty_selection_is_a_caret() {
        let (text, range) = extract_selection("ab[||]c");
        assert_eq!(text, "abc");
        assert_eq!(range, TextRange::empty(2));
    }

    #[test]
    fn rename_marker_is_stripped_and_restored() {
        let (text, range) = extract_rename("x = {|Rename:NewMethod|}();");
        assert_eq!(text, "x = NewMethod();");
        let range = range.unwrap();
        assert_eq!(range.slice(&text), "NewMethod");
        assert_eq!(mark_rename(&text, range), "x = {|Rename:NewMethod|}();");
    }

    #[test]
    fn text_without_rename_marker() {
        assert_eq!(extract_rename("plain"), ("plain".to_owned(), None));
    }

    #[test]
    #[should_panic(expected = "more than one selection")]
    fn two_selections_are_rejected() {
        extract_selection("[|a|] [|b|]");
    }
}
