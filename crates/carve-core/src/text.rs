use serde::{Deserialize, Serialize};

/// A UTF-8 byte offset into a source file.
pub type TextSize = usize;

/// A half-open text range `[start, end)` in UTF-8 byte offsets.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TextRange {
    pub start: TextSize,
    pub end: TextSize,
}

impl TextRange {
    pub fn new(start: TextSize, end: TextSize) -> Self {
        assert!(start <= end, "invalid range: {start}..{end}");
        Self { start, end }
    }

    pub fn empty(offset: TextSize) -> Self {
        Self {
            start: offset,
            end: offset,
        }
    }

    pub fn len(self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(self) -> bool {
        self.start == self.end
    }

    pub fn contains(self, offset: TextSize) -> bool {
        self.start <= offset && offset < self.end
    }

    /// Whether `other` lies completely inside `self` (bounds inclusive).
    pub fn contains_range(self, other: TextRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn intersects(self, other: TextRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Smallest range covering both `self` and `other`.
    pub fn cover(self, other: TextRange) -> TextRange {
        TextRange {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    pub fn slice(self, text: &str) -> &str {
        &text[self.start.min(text.len())..self.end.min(text.len())]
    }
}

/// Shrinks `range` so it neither starts nor ends with ASCII whitespace.
pub fn trim_range(source: &str, mut range: TextRange) -> TextRange {
    let bytes = source.as_bytes();
    range.end = range.end.min(bytes.len());
    range.start = range.start.min(range.end);
    while range.start < range.end && bytes[range.start].is_ascii_whitespace() {
        range.start += 1;
    }
    while range.start < range.end && bytes[range.end - 1].is_ascii_whitespace() {
        range.end -= 1;
    }
    range
}

pub fn line_start_offset(source: &str, offset: TextSize) -> TextSize {
    source[..offset].rfind('\n').map(|p| p + 1).unwrap_or(0)
}

/// The leading whitespace of the line containing `offset`, up to `offset`.
pub fn indentation_at(source: &str, offset: TextSize) -> String {
    let start = line_start_offset(source, offset);
    source[start..offset]
        .chars()
        .take_while(|c| c.is_whitespace() && *c != '\n' && *c != '\r')
        .collect()
}

/// Re-indents every non-blank line of `block` from `old_indent` to `new_indent`.
///
/// Lines that do not start with `old_indent` (typically the first line of a
/// selection that began mid-line) only receive `new_indent`.
pub fn reindent(block: &str, old_indent: &str, new_indent: &str) -> String {
    let mut out = String::new();
    for line in block.split_inclusive('\n') {
        let has_newline = line.ends_with('\n');
        let line = line.strip_suffix('\n').unwrap_or(line);
        let line = line.strip_suffix('\r').unwrap_or(line);
        let line = line.strip_prefix(old_indent).unwrap_or(line);
        if !line.trim().is_empty() {
            out.push_str(new_indent);
            out.push_str(line);
        }
        if has_newline {
            out.push('\n');
        }
    }
    if !block.ends_with('\n') && out.ends_with('\n') {
        out.pop();
    }
    out
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn trim_range_skips_surrounding_whitespace() {
        let text = "  foo();\n  ";
        assert_eq!(trim_range(text, TextRange::new(0, text.len())), TextRange::new(2, 8));
    }

    #[test]
    fn reindent_moves_nested_lines() {
        let block = "if (a)\n        {\n            b();\n        }";
        assert_eq!(
            reindent(block, "        ", "    "),
            "    if (a)\n    {\n        b();\n    }"
        );
    }

    #[test]
    fn cover_and_containment() {
        let a = TextRange::new(2, 4);
        let b = TextRange::new(6, 9);
        assert_eq!(a.cover(b), TextRange::new(2, 9));
        assert!(a.cover(b).contains_range(b));
        assert!(!a.intersects(b));
    }
}
