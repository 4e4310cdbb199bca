//! Core shared types for carve.
//!
//! This crate is intentionally small: it holds the text and edit primitives
//! every other crate speaks, and nothing that knows about syntax.

mod edit;
mod name;
mod text;

pub use edit::{apply_text_edits, EditError, FileId, TextEdit, WorkspaceEdit};
pub use name::Name;
pub use text::{indentation_at, line_start_offset, reindent, trim_range, TextRange, TextSize};
