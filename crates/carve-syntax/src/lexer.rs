use carve_core::TextRange;
use serde::{Deserialize, Serialize};

use crate::SyntaxKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub kind: SyntaxKind,
    pub range: TextRange,
}

impl Token {
    pub fn text(self, source: &str) -> &str {
        self.range.slice(source)
    }
}

/// Tokenizes `text`, trivia included. The result always ends with an `Eof` token.
///
/// Lexing never fails: unrecognised characters become `Error` tokens and an
/// unterminated comment or literal extends to the end of input.
pub fn lex(text: &str) -> Vec<Token> {
    let mut lexer = Lexer::new(text);
    let mut out = Vec::new();
    loop {
        let token = lexer.next_token();
        out.push(token);
        if token.kind == SyntaxKind::Eof {
            return out;
        }
    }
}

pub struct Lexer<'a> {
    text: &'a str,
    pos: usize,
    /// True when only whitespace has been seen since the last newline.
    at_line_start: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(text: &'a str) -> Self {
        Self {
            text,
            pos: 0,
            at_line_start: true,
        }
    }

    fn peek(&self) -> Option<char> {
        self.text[self.pos..].chars().next()
    }

    fn peek_nth(&self, n: usize) -> Option<char> {
        self.text[self.pos..].chars().nth(n)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn bump_while(&mut self, pred: impl Fn(char) -> bool) {
        while let Some(c) = self.peek() {
            if !pred(c) {
                break;
            }
            self.pos += c.len_utf8();
        }
    }

    pub fn next_token(&mut self) -> Token {
        let start = self.pos;
        let kind = self.scan();
        let line_start = self.at_line_start;
        self.at_line_start = match kind {
            SyntaxKind::Whitespace => line_start || self.text[start..self.pos].contains('\n'),
            SyntaxKind::Directive => true,
            _ => false,
        };
        Token {
            kind,
            range: TextRange::new(start, self.pos),
        }
    }

    fn scan(&mut self) -> SyntaxKind {
        let Some(c) = self.bump() else {
            return SyntaxKind::Eof;
        };

        match c {
            c if c.is_whitespace() => {
                self.bump_while(char::is_whitespace);
                SyntaxKind::Whitespace
            }
            '#' if self.at_line_start => {
                self.bump_while(|c| c != '\n');
                SyntaxKind::Directive
            }
            '/' if self.peek() == Some('/') => {
                self.bump_while(|c| c != '\n');
                SyntaxKind::LineComment
            }
            '/' if self.peek() == Some('*') => {
                self.bump();
                while let Some(c) = self.bump() {
                    if c == '*' && self.peek() == Some('/') {
                        self.bump();
                        break;
                    }
                }
                SyntaxKind::BlockComment
            }
            '@' if self.peek() == Some('"') => {
                self.bump();
                self.scan_verbatim_string()
            }
            '@' if self.peek().is_some_and(is_ident_start) => {
                // `@class` escapes a keyword into an identifier.
                self.bump_while(is_ident_continue);
                SyntaxKind::Ident
            }
            '"' => self.scan_quoted('"', SyntaxKind::StringLiteral),
            '\'' => self.scan_quoted('\'', SyntaxKind::CharLiteral),
            c if c.is_ascii_digit() => self.scan_number(),
            c if is_ident_start(c) => {
                let start = self.pos - c.len_utf8();
                self.bump_while(is_ident_continue);
                SyntaxKind::from_keyword(&self.text[start..self.pos]).unwrap_or(SyntaxKind::Ident)
            }
            _ => self.scan_punct(c),
        }
    }

    fn scan_quoted(&mut self, quote: char, kind: SyntaxKind) -> SyntaxKind {
        while let Some(c) = self.bump() {
            match c {
                '\\' => {
                    self.bump();
                }
                '\n' => break,
                c if c == quote => break,
                _ => {}
            }
        }
        kind
    }

    fn scan_verbatim_string(&mut self) -> SyntaxKind {
        while let Some(c) = self.bump() {
            if c == '"' {
                if self.peek() == Some('"') {
                    self.bump();
                    continue;
                }
                break;
            }
        }
        SyntaxKind::StringLiteral
    }

    fn scan_number(&mut self) -> SyntaxKind {
        self.bump_while(|c| c.is_ascii_digit() || c == '_');
        let mut kind = SyntaxKind::IntLiteral;
        if self.peek() == Some('.') && self.peek_nth(1).is_some_and(|c| c.is_ascii_digit()) {
            self.bump();
            self.bump_while(|c| c.is_ascii_digit() || c == '_');
            kind = SyntaxKind::DoubleLiteral;
        }
        match self.peek() {
            Some('L' | 'l') => {
                self.bump();
                SyntaxKind::LongLiteral
            }
            Some('d' | 'D' | 'f' | 'F' | 'm' | 'M') => {
                self.bump();
                SyntaxKind::DoubleLiteral
            }
            _ => kind,
        }
    }

    fn scan_punct(&mut self, c: char) -> SyntaxKind {
        use SyntaxKind::*;

        let next = self.peek();
        let (kind, extra) = match (c, next) {
            ('(', _) => (LParen, 0),
            (')', _) => (RParen, 0),
            ('{', _) => (LBrace, 0),
            ('}', _) => (RBrace, 0),
            ('[', _) => (LBracket, 0),
            (']', _) => (RBracket, 0),
            (';', _) => (Semicolon, 0),
            (',', _) => (Comma, 0),
            ('.', Some('.')) => (DotDot, 1),
            ('.', _) => (Dot, 0),
            (':', _) => (Colon, 0),
            ('?', Some('.')) if !self.peek_nth(1).is_some_and(|c| c.is_ascii_digit()) => {
                (QuestionDot, 1)
            }
            ('?', Some('?')) if self.peek_nth(1) == Some('=') => (QuestionQuestionEq, 2),
            ('?', Some('?')) => (QuestionQuestion, 1),
            ('?', _) => (Question, 0),
            ('=', Some('>')) => (Arrow, 1),
            ('=', Some('=')) => (EqEq, 1),
            ('=', _) => (Eq, 0),
            ('!', Some('=')) => (BangEq, 1),
            ('!', _) => (Bang, 0),
            ('<', Some('<')) if self.peek_nth(1) == Some('=') => (LtLtEq, 2),
            ('<', Some('<')) => (LtLt, 1),
            ('<', Some('=')) => (Le, 1),
            ('<', _) => (Lt, 0),
            // `>>` is assembled by the parser so nested generic argument lists close cleanly.
            ('>', Some('=')) => (Ge, 1),
            ('>', _) => (Gt, 0),
            ('+', Some('+')) => (PlusPlus, 1),
            ('+', Some('=')) => (PlusEq, 1),
            ('+', _) => (Plus, 0),
            ('-', Some('-')) => (MinusMinus, 1),
            ('-', Some('=')) => (MinusEq, 1),
            ('-', _) => (Minus, 0),
            ('*', Some('=')) => (StarEq, 1),
            ('*', _) => (Star, 0),
            ('/', Some('=')) => (SlashEq, 1),
            ('/', _) => (Slash, 0),
            ('%', Some('=')) => (PercentEq, 1),
            ('%', _) => (Percent, 0),
            ('&', Some('&')) => (AmpAmp, 1),
            ('&', Some('=')) => (AmpEq, 1),
            ('&', _) => (Amp, 0),
            ('|', Some('|')) => (PipePipe, 1),
            ('|', Some('=')) => (PipeEq, 1),
            ('|', _) => (Pipe, 0),
            ('^', Some('=')) => (CaretEq, 1),
            ('^', _) => (Caret, 0),
            ('~', _) => (Tilde, 0),
            _ => (Error, 0),
        };
        for _ in 0..extra {
            self.bump();
        }
        kind
    }
}

fn is_ident_start(c: char) -> bool {
    c == '_' || c.is_alphabetic()
}

fn is_ident_continue(c: char) -> bool {
    c == '_' || c.is_alphanumeric()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn kinds(text: &str) -> Vec<SyntaxKind> {
        lex(text)
            .into_iter()
            .map(|t| t.kind)
            .filter(|k| !k.is_trivia())
            .collect()
    }

    #[test]
    fn lexes_operators_greedily() {
        use SyntaxKind::*;
        assert_eq!(
            kinds("a ??= b?.c ?? d => e..f"),
            vec![Ident, QuestionQuestionEq, Ident, QuestionDot, Ident, QuestionQuestion, Ident, Arrow, Ident, DotDot, Ident, Eof]
        );
    }

    #[test]
    fn directive_only_at_line_start() {
        let tokens = lex("#nullable enable\nint x;");
        assert_eq!(tokens[0].kind, SyntaxKind::Directive);
        assert_eq!(tokens[0].text("#nullable enable\nint x;"), "#nullable enable");
    }

    #[test]
    fn comments_are_trivia_tokens() {
        let text = "/*a*/ x // tail";
        let tokens = lex(text);
        assert_eq!(tokens[0].kind, SyntaxKind::BlockComment);
        assert_eq!(tokens[2].kind, SyntaxKind::Ident);
        assert_eq!(tokens[4].kind, SyntaxKind::LineComment);
    }

    #[test]
    fn literals() {
        use SyntaxKind::*;
        assert_eq!(
            kinds(r#"1 2L 3.5 'c' "s\"t" @"v""w""#),
            vec![IntLiteral, LongLiteral, DoubleLiteral, CharLiteral, StringLiteral, StringLiteral, Eof]
        );
    }
}
