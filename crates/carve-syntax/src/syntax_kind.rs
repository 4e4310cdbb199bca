use serde::{Deserialize, Serialize};

/// Token kinds produced by the lexer.
///
/// Only reserved keywords get their own kind. Contextual keywords (`var`, `get`,
/// `set`, `nameof`, `not`, ...) lex as [`SyntaxKind::Ident`] and are recognised by
/// the parser from their text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SyntaxKind {
    // --- Trivia ---
    Whitespace,
    LineComment,
    BlockComment,
    /// `#nullable enable` and friends, up to the end of the line.
    Directive,

    // --- Identifiers & literals ---
    Ident,
    IntLiteral,
    LongLiteral,
    DoubleLiteral,
    CharLiteral,
    StringLiteral,

    // --- Keywords ---
    AbstractKw,
    AsKw,
    BaseKw,
    BoolKw,
    BreakKw,
    ByteKw,
    CaseKw,
    CatchKw,
    CharKw,
    ClassKw,
    ConstKw,
    ContinueKw,
    DefaultKw,
    DelegateKw,
    DoKw,
    DoubleKw,
    ElseKw,
    FalseKw,
    FinallyKw,
    ForKw,
    ForeachKw,
    GotoKw,
    IfKw,
    InKw,
    IntKw,
    InternalKw,
    IsKw,
    LongKw,
    NamespaceKw,
    NewKw,
    NullKw,
    ObjectKw,
    OutKw,
    OverrideKw,
    ParamsKw,
    PrivateKw,
    ProtectedKw,
    PublicKw,
    ReadonlyKw,
    RefKw,
    ReturnKw,
    SealedKw,
    ShortKw,
    StaticKw,
    StringKw,
    StructKw,
    SwitchKw,
    ThisKw,
    ThrowKw,
    TrueKw,
    TryKw,
    UsingKw,
    VirtualKw,
    VoidKw,
    WhileKw,

    // --- Punctuation ---
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Semicolon,
    Comma,
    Dot,
    DotDot,
    Colon,
    Question,
    QuestionDot,
    QuestionQuestion,
    QuestionQuestionEq,
    Arrow,
    Eq,
    EqEq,
    Bang,
    BangEq,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    PlusPlus,
    PlusEq,
    Minus,
    MinusMinus,
    MinusEq,
    Star,
    StarEq,
    Slash,
    SlashEq,
    Percent,
    PercentEq,
    Amp,
    AmpAmp,
    AmpEq,
    Pipe,
    PipePipe,
    PipeEq,
    Caret,
    CaretEq,
    Tilde,
    LtLt,
    LtLtEq,

    Error,
    Eof,
}

/// Reserved keywords, sorted by text.
const KEYWORDS: &[(&str, SyntaxKind)] = &[
    ("abstract", SyntaxKind::AbstractKw),
    ("as", SyntaxKind::AsKw),
    ("base", SyntaxKind::BaseKw),
    ("bool", SyntaxKind::BoolKw),
    ("break", SyntaxKind::BreakKw),
    ("byte", SyntaxKind::ByteKw),
    ("case", SyntaxKind::CaseKw),
    ("catch", SyntaxKind::CatchKw),
    ("char", SyntaxKind::CharKw),
    ("class", SyntaxKind::ClassKw),
    ("const", SyntaxKind::ConstKw),
    ("continue", SyntaxKind::ContinueKw),
    ("default", SyntaxKind::DefaultKw),
    ("delegate", SyntaxKind::DelegateKw),
    ("do", SyntaxKind::DoKw),
    ("double", SyntaxKind::DoubleKw),
    ("else", SyntaxKind::ElseKw),
    ("false", SyntaxKind::FalseKw),
    ("finally", SyntaxKind::FinallyKw),
    ("for", SyntaxKind::ForKw),
    ("foreach", SyntaxKind::ForeachKw),
    ("goto", SyntaxKind::GotoKw),
    ("if", SyntaxKind::IfKw),
    ("in", SyntaxKind::InKw),
    ("int", SyntaxKind::IntKw),
    ("internal", SyntaxKind::InternalKw),
    ("is", SyntaxKind::IsKw),
    ("long", SyntaxKind::LongKw),
    ("namespace", SyntaxKind::NamespaceKw),
    ("new", SyntaxKind::NewKw),
    ("null", SyntaxKind::NullKw),
    ("object", SyntaxKind::ObjectKw),
    ("out", SyntaxKind::OutKw),
    ("override", SyntaxKind::OverrideKw),
    ("params", SyntaxKind::ParamsKw),
    ("private", SyntaxKind::PrivateKw),
    ("protected", SyntaxKind::ProtectedKw),
    ("public", SyntaxKind::PublicKw),
    ("readonly", SyntaxKind::ReadonlyKw),
    ("ref", SyntaxKind::RefKw),
    ("return", SyntaxKind::ReturnKw),
    ("sealed", SyntaxKind::SealedKw),
    ("short", SyntaxKind::ShortKw),
    ("static", SyntaxKind::StaticKw),
    ("string", SyntaxKind::StringKw),
    ("struct", SyntaxKind::StructKw),
    ("switch", SyntaxKind::SwitchKw),
    ("this", SyntaxKind::ThisKw),
    ("throw", SyntaxKind::ThrowKw),
    ("true", SyntaxKind::TrueKw),
    ("try", SyntaxKind::TryKw),
    ("using", SyntaxKind::UsingKw),
    ("virtual", SyntaxKind::VirtualKw),
    ("void", SyntaxKind::VoidKw),
    ("while", SyntaxKind::WhileKw),
];

impl SyntaxKind {
    pub fn is_trivia(self) -> bool {
        matches!(
            self,
            SyntaxKind::Whitespace
                | SyntaxKind::LineComment
                | SyntaxKind::BlockComment
                | SyntaxKind::Directive
        )
    }

    pub fn is_comment(self) -> bool {
        matches!(self, SyntaxKind::LineComment | SyntaxKind::BlockComment)
    }

    /// Keywords that name a predefined type.
    pub fn is_predefined_type(self) -> bool {
        matches!(
            self,
            SyntaxKind::BoolKw
                | SyntaxKind::ByteKw
                | SyntaxKind::CharKw
                | SyntaxKind::DoubleKw
                | SyntaxKind::IntKw
                | SyntaxKind::LongKw
                | SyntaxKind::ObjectKw
                | SyntaxKind::ShortKw
                | SyntaxKind::StringKw
                | SyntaxKind::VoidKw
        )
    }

    pub fn is_modifier(self) -> bool {
        matches!(
            self,
            SyntaxKind::AbstractKw
                | SyntaxKind::ConstKw
                | SyntaxKind::InternalKw
                | SyntaxKind::OverrideKw
                | SyntaxKind::PrivateKw
                | SyntaxKind::ProtectedKw
                | SyntaxKind::PublicKw
                | SyntaxKind::ReadonlyKw
                | SyntaxKind::SealedKw
                | SyntaxKind::StaticKw
                | SyntaxKind::VirtualKw
        )
    }

    pub fn from_keyword(text: &str) -> Option<SyntaxKind> {
        KEYWORDS
            .binary_search_by_key(&text, |&(keyword, _)| keyword)
            .ok()
            .map(|index| KEYWORDS[index].1)
    }

    /// Whether `text` is a legal identifier (and not a reserved keyword).
    pub fn is_valid_identifier(text: &str) -> bool {
        let mut chars = text.chars();
        let Some(first) = chars.next() else {
            return false;
        };
        (first == '_' || first.is_alphabetic())
            && chars.all(|c| c == '_' || c.is_alphanumeric())
            && SyntaxKind::from_keyword(text).is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_table_is_sorted() {
        assert!(KEYWORDS.windows(2).all(|pair| pair[0].0 < pair[1].0));
    }

    #[test]
    fn contextual_keywords_are_identifiers() {
        assert_eq!(SyntaxKind::from_keyword("foreach"), Some(SyntaxKind::ForeachKw));
        assert_eq!(SyntaxKind::from_keyword("var"), None);
        assert!(SyntaxKind::is_valid_identifier("nameof"));
        assert!(!SyntaxKind::is_valid_identifier("class"));
        assert!(!SyntaxKind::is_valid_identifier("1x"));
    }
}
