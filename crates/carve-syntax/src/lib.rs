//! Syntax layer: lexer, arena syntax tree and a recursive-descent parser for a
//! small C#-flavoured imperative language.
//!
//! The tree keeps exact source ranges for every node, and the token stream keeps
//! comments, so refactorings can slice and splice the original text.

pub mod ast;
mod lexer;
mod parser;
mod syntax_kind;
mod visit;

pub use ast::*;
pub use lexer::{lex, Lexer, Token};
pub use parser::parse;
pub use syntax_kind::SyntaxKind;
pub use visit::{NodeId, ParentMap};

use carve_core::TextRange;

/// A syntax error. Parsing always produces a tree; errors are collected alongside it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message} at {}..{}", range.start, range.end)]
pub struct ParseError {
    pub message: String,
    pub range: TextRange,
}
