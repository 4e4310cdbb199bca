use carve_core::{Name, TextRange};

use crate::ast::*;
use crate::lexer::{lex, Token};
use crate::{ParseError, SyntaxKind};

use SyntaxKind as K;

/// Parses a whole file. Never fails; syntax errors end up in [`SourceFile::errors`].
pub fn parse(text: &str) -> SourceFile {
    let _span = tracing::trace_span!(target: "carve.syntax", "parse", len = text.len()).entered();
    Parser::new(text).parse_file()
}

struct Parser<'a> {
    text: &'a str,
    all_tokens: Vec<Token>,
    tokens: Vec<Token>,
    pos: usize,
    stmts: Arena<StmtId, Stmt>,
    exprs: Arena<ExprId, Expr>,
    errors: Vec<ParseError>,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str) -> Self {
        let all_tokens = lex(text);
        let tokens = all_tokens
            .iter()
            .copied()
            .filter(|t| !t.kind.is_trivia())
            .collect();
        Self {
            text,
            all_tokens,
            tokens,
            pos: 0,
            stmts: Arena::default(),
            exprs: Arena::default(),
            errors: Vec::new(),
        }
    }

    fn parse_file(mut self) -> SourceFile {
        let mut types = Vec::new();
        let mut delegates = Vec::new();
        let mut usings = Vec::new();
        self.parse_namespace_items(&mut types, &mut delegates, &mut usings, None);

        let nullable_directives = self
            .all_tokens
            .iter()
            .filter(|t| t.kind == K::Directive)
            .filter_map(|t| {
                let mut words = t.text(self.text).trim_start_matches('#').split_whitespace();
                match (words.next(), words.next()) {
                    (Some("nullable"), Some("enable")) => Some((t.range.start, true)),
                    (Some("nullable"), Some("disable" | "restore")) => Some((t.range.start, false)),
                    _ => None,
                }
            })
            .collect();

        SourceFile {
            text: self.text.to_owned(),
            tokens: self.all_tokens,
            usings,
            types,
            delegates,
            stmts: self.stmts,
            exprs: self.exprs,
            nullable_directives,
            errors: self.errors,
        }
    }

    // --- Token plumbing ---

    fn nth_token(&self, n: usize) -> Token {
        self.tokens
            .get(self.pos + n)
            .or_else(|| self.tokens.last())
            .copied()
            .unwrap_or(Token {
                kind: K::Eof,
                range: TextRange::empty(self.text.len()),
            })
    }

    fn nth(&self, n: usize) -> SyntaxKind {
        self.nth_token(n).kind
    }

    fn peek(&self) -> SyntaxKind {
        self.nth(0)
    }

    fn at(&self, kind: SyntaxKind) -> bool {
        self.peek() == kind
    }

    fn nth_text(&self, n: usize) -> &'a str {
        let text: &'a str = self.text;
        self.nth_token(n).range.slice(text)
    }

    fn at_contextual(&self, word: &str) -> bool {
        self.at(K::Ident) && self.nth_text(0) == word
    }

    fn bump(&mut self) -> Token {
        let token = self.nth_token(0);
        if token.kind != K::Eof {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, kind: SyntaxKind) -> bool {
        if self.at(kind) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: SyntaxKind) -> bool {
        if self.eat(kind) {
            return true;
        }
        self.error(format!("expected {kind:?}, found {:?}", self.peek()));
        false
    }

    fn error(&mut self, message: String) {
        let range = self.nth_token(0).range;
        // One error per position keeps cascades readable.
        if self.errors.last().is_some_and(|e| e.range == range) {
            return;
        }
        self.errors.push(ParseError { message, range });
    }

    fn start(&self) -> usize {
        self.nth_token(0).range.start
    }

    /// End offset of the most recently consumed token.
    fn prev_end(&self) -> usize {
        if self.pos == 0 {
            return 0;
        }
        self.tokens[self.pos - 1].range.end
    }

    fn range_from(&self, start: usize) -> TextRange {
        TextRange::new(start, self.prev_end().max(start))
    }

    fn ident(&mut self) -> Option<(Name, TextRange)> {
        if self.at(K::Ident) {
            let token = self.bump();
            let text = token.text(self.text).trim_start_matches('@');
            Some((Name::new(text), token.range))
        } else {
            self.error(format!("expected identifier, found {:?}", self.peek()));
            None
        }
    }

    fn alloc_stmt(&mut self, kind: StmtKind, range: TextRange) -> StmtId {
        self.stmts.alloc(Stmt { kind, range })
    }

    fn alloc_expr(&mut self, kind: ExprKind, range: TextRange) -> ExprId {
        self.exprs.alloc(Expr { kind, range })
    }

    fn error_expr(&mut self) -> ExprId {
        let start = self.start();
        self.alloc_expr(ExprKind::Error, TextRange::empty(start))
    }

    /// Skips tokens until one of `kinds` (not consumed) or the end of input.
    fn recover_to(&mut self, kinds: &[SyntaxKind]) {
        while !self.at(K::Eof) && !kinds.contains(&self.peek()) {
            self.bump();
        }
    }

    // --- Declarations ---

    fn parse_namespace_items(
        &mut self,
        types: &mut Vec<TypeDecl>,
        delegates: &mut Vec<DelegateDecl>,
        usings: &mut Vec<Name>,
        namespace: Option<&Name>,
    ) {
        loop {
            match self.peek() {
                K::Eof => return,
                K::RBrace if namespace.is_some() => return,
                K::UsingKw => {
                    self.bump();
                    if self.at(K::Ident) && self.nth(1) != K::Eq {
                        let name = self.parse_qualified_name();
                        if self.at(K::Semicolon) {
                            usings.push(name);
                        }
                    }
                    self.recover_to(&[K::Semicolon]);
                    self.bump();
                }
                K::NamespaceKw => {
                    self.bump();
                    let local = self.parse_qualified_name();
                    let full = match namespace {
                        Some(outer) => Name::new(&format!("{outer}.{local}")),
                        None => local,
                    };
                    if self.eat(K::Semicolon) {
                        // File-scoped: the rest of the file belongs to it.
                        self.parse_namespace_items(types, delegates, usings, Some(&full));
                        continue;
                    }
                    self.expect(K::LBrace);
                    self.parse_namespace_items(types, delegates, usings, Some(&full));
                    self.expect(K::RBrace);
                }
                _ => {
                    let before = self.pos;
                    let start = self.start();
                    let modifiers = self.parse_modifiers();
                    match self.peek() {
                        K::ClassKw | K::StructKw => {
                            let mut decl = self.parse_type_decl(start, modifiers);
                            decl.namespace = namespace.cloned();
                            types.push(decl);
                        }
                        K::DelegateKw => {
                            if let Some(delegate) = self.parse_delegate(start) {
                                delegates.push(delegate);
                            }
                        }
                        _ => {
                            self.error(format!("expected type declaration, found {:?}", self.peek()));
                            if self.pos == before {
                                self.bump();
                            }
                        }
                    }
                }
            }
        }
    }

    fn parse_qualified_name(&mut self) -> Name {
        let mut text = String::new();
        if let Some((name, _)) = self.ident() {
            text.push_str(name.as_str());
        }
        while self.eat(K::Dot) {
            if let Some((name, _)) = self.ident() {
                text.push('.');
                text.push_str(name.as_str());
            }
        }
        Name::new(&text)
    }

    fn parse_modifiers(&mut self) -> Modifiers {
        let mut list = Vec::new();
        loop {
            let modifier = match self.peek() {
                K::PublicKw => Modifier::Public,
                K::PrivateKw => Modifier::Private,
                K::ProtectedKw => Modifier::Protected,
                K::InternalKw => Modifier::Internal,
                K::StaticKw => Modifier::Static,
                K::ReadonlyKw => Modifier::Readonly,
                K::ConstKw => Modifier::Const,
                K::AbstractKw => Modifier::Abstract,
                K::VirtualKw => Modifier::Virtual,
                K::OverrideKw => Modifier::Override,
                K::SealedKw => Modifier::Sealed,
                K::Ident if self.nth_text(0) == "partial" && self.nth(1) != K::Eq => Modifier::Partial,
                K::Ident
                    if self.nth_text(0) == "async"
                        && (self.nth(1) == K::Ident || self.nth(1).is_predefined_type()) =>
                {
                    Modifier::Async
                }
                _ => return Modifiers { list },
            };
            let token = self.bump();
            list.push((modifier, token.range));
        }
    }

    fn parse_type_params(&mut self) -> Vec<(Name, TextRange)> {
        let mut params = Vec::new();
        if !self.eat(K::Lt) {
            return params;
        }
        loop {
            if let Some(param) = self.ident() {
                params.push(param);
            }
            if !self.eat(K::Comma) {
                break;
            }
        }
        self.expect(K::Gt);
        params
    }

    fn skip_constraints(&mut self) {
        while self.at_contextual("where") {
            self.recover_to(&[K::LBrace, K::Arrow, K::Semicolon]);
        }
    }

    fn parse_type_decl(&mut self, start: usize, modifiers: Modifiers) -> TypeDecl {
        let kind = if self.bump().kind == K::StructKw {
            TypeDeclKind::Struct
        } else {
            TypeDeclKind::Class
        };
        let (name, name_range) = self
            .ident()
            .unwrap_or_else(|| (Name::new(""), TextRange::empty(self.start())));
        let type_params = self.parse_type_params();
        let mut bases = Vec::new();
        if self.eat(K::Colon) {
            loop {
                match self.parse_type() {
                    Some(ty) => bases.push(ty),
                    None => break,
                }
                if !self.eat(K::Comma) {
                    break;
                }
            }
        }
        self.skip_constraints();
        let mut members = Vec::new();
        if self.expect(K::LBrace) {
            while !self.at(K::RBrace) && !self.at(K::Eof) {
                let before = self.pos;
                if let Some(member) = self.parse_member(&name) {
                    members.push(member);
                }
                if self.pos == before {
                    self.bump();
                }
            }
            self.expect(K::RBrace);
        }
        self.eat(K::Semicolon);
        TypeDecl {
            kind,
            modifiers,
            namespace: None,
            name,
            name_range,
            type_params,
            bases,
            members,
            range: self.range_from(start),
        }
    }

    fn parse_delegate(&mut self, start: usize) -> Option<DelegateDecl> {
        self.bump();
        let ret = self.parse_type_or_error()?;
        let (name, _) = self.ident()?;
        let type_params = self.parse_type_params();
        let params = self.parse_params(K::LParen, K::RParen);
        self.expect(K::Semicolon);
        Some(DelegateDecl {
            ret,
            name,
            type_params,
            params,
            range: self.range_from(start),
        })
    }

    fn parse_member(&mut self, type_name: &Name) -> Option<Member> {
        let start = self.start();
        let modifiers = self.parse_modifiers();
        match self.peek() {
            K::ClassKw | K::StructKw => return Some(Member::Type(self.parse_type_decl(start, modifiers))),
            K::DelegateKw => return self.parse_delegate(start).map(Member::Delegate),
            K::Ident if self.nth_text(0) == type_name.as_str() && self.nth(1) == K::LParen => {
                let (name, name_range) = self.ident()?;
                let params = self.parse_params(K::LParen, K::RParen);
                if self.eat(K::Colon) {
                    // Constructor initializer: `: base(...)` / `: this(...)`.
                    self.bump();
                    self.parse_args(K::LParen, K::RParen);
                }
                let body = self.parse_function_body();
                return Some(Member::Method(FunctionDecl {
                    modifiers,
                    ret: None,
                    name,
                    name_range,
                    type_params: Vec::new(),
                    params,
                    body,
                    range: self.range_from(start),
                }));
            }
            _ => {}
        }

        let Some(ty) = self.parse_type_or_error() else {
            self.recover_to(&[K::Semicolon, K::RBrace]);
            self.eat(K::Semicolon);
            return None;
        };

        if self.at(K::ThisKw) {
            let this = self.bump();
            let params = self.parse_params(K::LBracket, K::RBracket);
            let body = self.parse_property_body();
            return Some(Member::Property(PropertyDecl {
                modifiers,
                ty,
                name: Name::new("this"),
                name_range: this.range,
                indexer_params: Some(params),
                body,
                range: self.range_from(start),
            }));
        }

        let (name, name_range) = self.ident()?;
        match self.peek() {
            K::Lt | K::LParen => {
                let type_params = self.parse_type_params();
                let params = self.parse_params(K::LParen, K::RParen);
                self.skip_constraints();
                let body = self.parse_function_body();
                Some(Member::Method(FunctionDecl {
                    modifiers,
                    ret: Some(ty),
                    name,
                    name_range,
                    type_params,
                    params,
                    body,
                    range: self.range_from(start),
                }))
            }
            K::LBrace | K::Arrow => {
                let body = self.parse_property_body();
                Some(Member::Property(PropertyDecl {
                    modifiers,
                    ty,
                    name,
                    name_range,
                    indexer_params: None,
                    body,
                    range: self.range_from(start),
                }))
            }
            _ => {
                let declarators = self.parse_declarators_after_first(name, name_range);
                self.expect(K::Semicolon);
                Some(Member::Field(FieldDecl {
                    modifiers,
                    ty,
                    declarators,
                    range: self.range_from(start),
                }))
            }
        }
    }

    fn parse_function_body(&mut self) -> FunctionBody {
        match self.peek() {
            K::LBrace => FunctionBody::Block(self.parse_block()),
            K::Arrow => {
                self.bump();
                let expr = self.parse_expr();
                self.expect(K::Semicolon);
                FunctionBody::Expr(expr)
            }
            _ => {
                self.expect(K::Semicolon);
                FunctionBody::None
            }
        }
    }

    fn parse_property_body(&mut self) -> PropertyBody {
        if self.eat(K::Arrow) {
            let expr = self.parse_expr();
            self.expect(K::Semicolon);
            return PropertyBody::Expr(expr);
        }
        let mut accessors = Vec::new();
        if self.expect(K::LBrace) {
            while !self.at(K::RBrace) && !self.at(K::Eof) {
                let start = self.start();
                let modifiers = self.parse_modifiers();
                let kind = match self.nth_text(0) {
                    "get" => AccessorKind::Get,
                    "set" => AccessorKind::Set,
                    "init" => AccessorKind::Init,
                    _ => {
                        self.error("expected accessor".to_string());
                        self.bump();
                        continue;
                    }
                };
                self.bump();
                let body = self.parse_function_body();
                accessors.push(Accessor {
                    kind,
                    modifiers,
                    body,
                    range: self.range_from(start),
                });
            }
            self.expect(K::RBrace);
        }
        if self.eat(K::Eq) {
            self.parse_expr();
            self.expect(K::Semicolon);
        }
        PropertyBody::Accessors(accessors)
    }

    fn parse_params(&mut self, open: SyntaxKind, close: SyntaxKind) -> Vec<Param> {
        let mut params = Vec::new();
        if !self.expect(open) {
            return params;
        }
        while !self.at(close) && !self.at(K::Eof) {
            let start = self.start();
            let modifier = self.parse_param_modifier();
            let ty = self.parse_type_or_error();
            let Some((name, name_range)) = self.ident() else {
                self.recover_to(&[K::Comma, close]);
                if !self.eat(K::Comma) {
                    break;
                }
                continue;
            };
            let default = if self.eat(K::Eq) {
                Some(self.parse_expr())
            } else {
                None
            };
            params.push(Param {
                modifier,
                ty,
                name,
                name_range,
                default,
                range: self.range_from(start),
            });
            if !self.eat(K::Comma) {
                break;
            }
        }
        self.expect(close);
        params
    }

    fn parse_param_modifier(&mut self) -> Option<ParamModifier> {
        let modifier = match self.peek() {
            K::RefKw => ParamModifier::Ref,
            K::OutKw => ParamModifier::Out,
            K::InKw => ParamModifier::In,
            K::ThisKw => ParamModifier::This,
            K::ParamsKw => ParamModifier::Params,
            _ => return None,
        };
        self.bump();
        Some(modifier)
    }

    fn parse_declarators_after_first(&mut self, name: Name, name_range: TextRange) -> Vec<Declarator> {
        let mut declarators = Vec::new();
        let mut current = Some((name, name_range));
        while let Some((name, name_range)) = current.take() {
            let init = if self.eat(K::Eq) {
                Some(self.parse_expr())
            } else {
                None
            };
            declarators.push(Declarator {
                name,
                name_range,
                init,
                range: self.range_from(name_range.start),
            });
            if self.eat(K::Comma) {
                current = self.ident();
            }
        }
        declarators
    }

    // --- Types ---

    fn parse_type_or_error(&mut self) -> Option<TypeRef> {
        let ty = self.parse_type();
        if ty.is_none() {
            self.error(format!("expected type, found {:?}", self.peek()));
        }
        ty
    }

    fn parse_type(&mut self) -> Option<TypeRef> {
        self.parse_type_with(true)
    }

    /// Parses a type without recording errors; on failure the position is restored.
    fn parse_type_with(&mut self, allow_nullable: bool) -> Option<TypeRef> {
        let checkpoint = self.pos;
        let ty = self.parse_type_inner(allow_nullable);
        if ty.is_none() {
            self.pos = checkpoint;
        }
        ty
    }

    fn parse_type_inner(&mut self, allow_nullable: bool) -> Option<TypeRef> {
        let start = self.start();
        let mut ty = match self.peek() {
            kind if kind.is_predefined_type() => {
                let token = self.bump();
                let predefined = match token.kind {
                    K::BoolKw => PredefinedType::Bool,
                    K::ByteKw => PredefinedType::Byte,
                    K::CharKw => PredefinedType::Char,
                    K::DoubleKw => PredefinedType::Double,
                    K::IntKw => PredefinedType::Int,
                    K::LongKw => PredefinedType::Long,
                    K::ObjectKw => PredefinedType::Object,
                    K::ShortKw => PredefinedType::Short,
                    K::StringKw => PredefinedType::String,
                    _ => PredefinedType::Void,
                };
                TypeRef {
                    kind: TypeRefKind::Predefined(predefined),
                    range: token.range,
                }
            }
            K::Ident if self.nth_text(0) == "var" && self.nth(1) != K::Dot && self.nth(1) != K::Lt => {
                let token = self.bump();
                TypeRef {
                    kind: TypeRefKind::Implicit,
                    range: token.range,
                }
            }
            K::Ident => {
                let mut segments = Vec::new();
                loop {
                    let token = self.bump();
                    let name = Name::new(token.text(self.text).trim_start_matches('@'));
                    let args = if self.at(K::Lt) {
                        self.parse_type_args()?
                    } else {
                        Vec::new()
                    };
                    segments.push(TypeSegment { name, args });
                    if self.at(K::Dot) && self.nth(1) == K::Ident {
                        self.bump();
                        continue;
                    }
                    break;
                }
                TypeRef {
                    kind: TypeRefKind::Named(segments),
                    range: self.range_from(start),
                }
            }
            K::LParen => {
                self.bump();
                let mut elements = Vec::new();
                loop {
                    let ty = self.parse_type_inner(true)?;
                    let name = if self.at(K::Ident) {
                        Some(Name::new(self.bump().text(self.text)))
                    } else {
                        None
                    };
                    elements.push(TupleTypeElement { ty, name });
                    if !self.eat(K::Comma) {
                        break;
                    }
                }
                if elements.len() < 2 || !self.eat(K::RParen) {
                    return None;
                }
                TypeRef {
                    kind: TypeRefKind::Tuple(elements),
                    range: self.range_from(start),
                }
            }
            _ => return None,
        };

        loop {
            if allow_nullable && self.at(K::Question) && !matches!(ty.kind, TypeRefKind::Nullable(_)) {
                self.bump();
                ty = TypeRef {
                    kind: TypeRefKind::Nullable(Box::new(ty)),
                    range: self.range_from(start),
                };
            } else if self.at(K::LBracket) && self.nth(1) == K::RBracket {
                self.bump();
                self.bump();
                ty = TypeRef {
                    kind: TypeRefKind::Array(Box::new(ty)),
                    range: self.range_from(start),
                };
            } else {
                return Some(ty);
            }
        }
    }

    fn parse_type_args(&mut self) -> Option<Vec<TypeRef>> {
        if !self.eat(K::Lt) {
            return None;
        }
        let mut args = Vec::new();
        loop {
            args.push(self.parse_type_inner(true)?);
            if !self.eat(K::Comma) {
                break;
            }
        }
        if !self.eat(K::Gt) {
            return None;
        }
        Some(args)
    }

    // --- Statements ---

    fn parse_block(&mut self) -> StmtId {
        let start = self.start();
        self.expect(K::LBrace);
        let mut stmts = Vec::new();
        while !self.at(K::RBrace) && !self.at(K::Eof) {
            let before = self.pos;
            stmts.push(self.parse_stmt());
            if self.pos == before {
                self.bump();
            }
        }
        self.expect(K::RBrace);
        self.alloc_stmt(StmtKind::Block(stmts), self.range_from(start))
    }

    fn parse_embedded_stmt(&mut self) -> StmtId {
        self.parse_stmt()
    }

    fn parse_stmt(&mut self) -> StmtId {
        let start = self.start();
        match self.peek() {
            K::LBrace => self.parse_block(),
            K::Semicolon => {
                self.bump();
                self.alloc_stmt(StmtKind::Empty, self.range_from(start))
            }
            K::IfKw => {
                self.bump();
                self.expect(K::LParen);
                let condition = self.parse_expr();
                self.expect(K::RParen);
                let then_branch = self.parse_embedded_stmt();
                let else_branch = if self.eat(K::ElseKw) {
                    Some(self.parse_embedded_stmt())
                } else {
                    None
                };
                self.alloc_stmt(
                    StmtKind::If {
                        condition,
                        then_branch,
                        else_branch,
                    },
                    self.range_from(start),
                )
            }
            K::WhileKw => {
                self.bump();
                self.expect(K::LParen);
                let condition = self.parse_expr();
                self.expect(K::RParen);
                let body = self.parse_embedded_stmt();
                self.alloc_stmt(StmtKind::While { condition, body }, self.range_from(start))
            }
            K::DoKw => {
                self.bump();
                let body = self.parse_embedded_stmt();
                self.expect(K::WhileKw);
                self.expect(K::LParen);
                let condition = self.parse_expr();
                self.expect(K::RParen);
                self.expect(K::Semicolon);
                self.alloc_stmt(StmtKind::DoWhile { body, condition }, self.range_from(start))
            }
            K::ForKw => self.parse_for(start),
            K::ForeachKw => {
                self.bump();
                self.expect(K::LParen);
                let ty = self.parse_type_or_error().unwrap_or(TypeRef {
                    kind: TypeRefKind::Implicit,
                    range: TextRange::empty(self.start()),
                });
                let (name, name_range) = self
                    .ident()
                    .unwrap_or_else(|| (Name::new(""), TextRange::empty(self.start())));
                self.expect(K::InKw);
                let iterable = self.parse_expr();
                self.expect(K::RParen);
                let body = self.parse_embedded_stmt();
                self.alloc_stmt(
                    StmtKind::Foreach {
                        ty,
                        name,
                        name_range,
                        iterable,
                        body,
                    },
                    self.range_from(start),
                )
            }
            K::SwitchKw => self.parse_switch(start),
            K::BreakKw => {
                self.bump();
                self.expect(K::Semicolon);
                self.alloc_stmt(StmtKind::Break, self.range_from(start))
            }
            K::ContinueKw => {
                self.bump();
                self.expect(K::Semicolon);
                self.alloc_stmt(StmtKind::Continue, self.range_from(start))
            }
            K::ReturnKw => {
                self.bump();
                let expr = if self.at(K::Semicolon) {
                    None
                } else {
                    Some(self.parse_expr())
                };
                self.expect(K::Semicolon);
                self.alloc_stmt(StmtKind::Return(expr), self.range_from(start))
            }
            K::ThrowKw => {
                self.bump();
                let expr = if self.at(K::Semicolon) {
                    None
                } else {
                    Some(self.parse_expr())
                };
                self.expect(K::Semicolon);
                self.alloc_stmt(StmtKind::Throw(expr), self.range_from(start))
            }
            K::GotoKw => {
                self.bump();
                let (label, label_range) = self
                    .ident()
                    .unwrap_or_else(|| (Name::new(""), TextRange::empty(self.start())));
                self.expect(K::Semicolon);
                self.alloc_stmt(StmtKind::Goto { label, label_range }, self.range_from(start))
            }
            K::TryKw => self.parse_try(start),
            K::Ident if self.nth(1) == K::Colon => {
                let (label, label_range) = self
                    .ident()
                    .unwrap_or_else(|| (Name::new(""), TextRange::empty(start)));
                self.bump();
                let stmt = self.parse_stmt();
                self.alloc_stmt(
                    StmtKind::Labeled {
                        label,
                        label_range,
                        stmt,
                    },
                    self.range_from(start),
                )
            }
            K::ConstKw => {
                self.bump();
                let stmt = self.parse_local_decl_or_function(start, Modifiers::default(), true);
                stmt.unwrap_or_else(|| self.parse_expr_stmt(start))
            }
            K::StaticKw => {
                let modifiers = self.parse_modifiers();
                self.parse_local_decl_or_function(start, modifiers, false)
                    .unwrap_or_else(|| self.parse_expr_stmt(start))
            }
            K::Ident if self.nth_text(0) == "async" && self.nth(1) != K::Eq => {
                let modifiers = self.parse_modifiers();
                self.parse_local_decl_or_function(start, modifiers, false)
                    .unwrap_or_else(|| self.parse_expr_stmt(start))
            }
            K::Ident if self.nth_text(0) == "var" && self.nth(1) == K::LParen => {
                // `var (x, y) = e;`
                let ty_token = self.bump();
                let ty = TypeRef {
                    kind: TypeRefKind::Implicit,
                    range: ty_token.range,
                };
                let designation = self.parse_designation();
                let decl_range = self.range_from(start);
                let lhs = self.alloc_expr(ExprKind::Declaration { ty, designation }, decl_range);
                self.expect(K::Eq);
                let rhs = self.parse_expr();
                let assign = self.alloc_expr(
                    ExprKind::Assign {
                        op: AssignOp::Assign,
                        lhs,
                        rhs,
                    },
                    self.range_from(start),
                );
                self.expect(K::Semicolon);
                self.alloc_stmt(StmtKind::Expr(assign), self.range_from(start))
            }
            _ => match self.parse_local_decl_or_function(start, Modifiers::default(), false) {
                Some(stmt) => stmt,
                None => self.parse_expr_stmt(start),
            },
        }
    }

    fn parse_expr_stmt(&mut self, start: usize) -> StmtId {
        let expr = self.parse_expr();
        self.expect(K::Semicolon);
        self.alloc_stmt(StmtKind::Expr(expr), self.range_from(start))
    }

    /// Tries `T x = ...;` or `T F(...) { }`. Restores the position and returns `None`
    /// when the tokens do not start a declaration.
    fn parse_local_decl_or_function(&mut self, start: usize, modifiers: Modifiers, is_const: bool) -> Option<StmtId> {
        let checkpoint = self.pos;
        let Some(ty) = self.parse_type() else {
            self.pos = checkpoint;
            return None;
        };
        if !self.at(K::Ident) {
            self.pos = checkpoint;
            return None;
        }
        match self.nth(1) {
            K::LParen | K::Lt if !is_const => {
                let (name, name_range) = self.ident()?;
                let type_params = self.parse_type_params();
                let params = self.parse_params(K::LParen, K::RParen);
                self.skip_constraints();
                let body = self.parse_function_body();
                let decl = FunctionDecl {
                    modifiers,
                    ret: Some(ty),
                    name,
                    name_range,
                    type_params,
                    params,
                    body,
                    range: self.range_from(start),
                };
                Some(self.alloc_stmt(StmtKind::LocalFunction(Box::new(decl)), self.range_from(start)))
            }
            K::Eq | K::Semicolon | K::Comma => {
                let (name, name_range) = self.ident()?;
                let declarators = self.parse_declarators_after_first(name, name_range);
                self.expect(K::Semicolon);
                Some(self.alloc_stmt(
                    StmtKind::LocalDecl {
                        is_const,
                        ty,
                        declarators,
                    },
                    self.range_from(start),
                ))
            }
            _ => {
                self.pos = checkpoint;
                None
            }
        }
    }

    fn parse_for(&mut self, start: usize) -> StmtId {
        self.bump();
        self.expect(K::LParen);
        let mut init = Vec::new();
        if !self.at(K::Semicolon) {
            let init_start = self.start();
            let checkpoint = self.pos;
            let decl = match self.parse_type() {
                Some(ty) if self.at(K::Ident) && matches!(self.nth(1), K::Eq | K::Comma | K::Semicolon) => {
                    self.ident().map(|(name, name_range)| {
                        let declarators = self.parse_declarators_after_first(name, name_range);
                        (ty, declarators)
                    })
                }
                _ => None,
            };
            match decl {
                Some((ty, declarators)) => {
                    let range = self.range_from(init_start);
                    init.push(self.alloc_stmt(
                        StmtKind::LocalDecl {
                            is_const: false,
                            ty,
                            declarators,
                        },
                        range,
                    ));
                }
                None => {
                    self.pos = checkpoint;
                    loop {
                        let expr_start = self.start();
                        let expr = self.parse_expr();
                        init.push(self.alloc_stmt(StmtKind::Expr(expr), self.range_from(expr_start)));
                        if !self.eat(K::Comma) {
                            break;
                        }
                    }
                }
            }
        }
        self.expect(K::Semicolon);
        let condition = if self.at(K::Semicolon) {
            None
        } else {
            Some(self.parse_expr())
        };
        self.expect(K::Semicolon);
        let mut update = Vec::new();
        while !self.at(K::RParen) && !self.at(K::Eof) {
            update.push(self.parse_expr());
            if !self.eat(K::Comma) {
                break;
            }
        }
        self.expect(K::RParen);
        let body = self.parse_embedded_stmt();
        self.alloc_stmt(
            StmtKind::For {
                init,
                condition,
                update,
                body,
            },
            self.range_from(start),
        )
    }

    fn parse_switch(&mut self, start: usize) -> StmtId {
        self.bump();
        self.expect(K::LParen);
        let scrutinee = self.parse_expr();
        self.expect(K::RParen);
        self.expect(K::LBrace);
        let mut sections = Vec::new();
        while !self.at(K::RBrace) && !self.at(K::Eof) {
            let section_start = self.start();
            let mut labels = Vec::new();
            loop {
                if self.eat(K::CaseKw) {
                    labels.push(SwitchLabel::Case(self.parse_expr()));
                    self.expect(K::Colon);
                } else if self.at(K::DefaultKw) && self.nth(1) == K::Colon {
                    self.bump();
                    self.bump();
                    labels.push(SwitchLabel::Default);
                } else {
                    break;
                }
            }
            if labels.is_empty() {
                self.error("expected `case` or `default`".to_string());
                self.bump();
                continue;
            }
            let mut stmts = Vec::new();
            while !matches!(self.peek(), K::CaseKw | K::RBrace | K::Eof)
                && !(self.at(K::DefaultKw) && self.nth(1) == K::Colon)
            {
                let before = self.pos;
                stmts.push(self.parse_stmt());
                if self.pos == before {
                    self.bump();
                }
            }
            sections.push(SwitchSection {
                labels,
                stmts,
                range: self.range_from(section_start),
            });
        }
        self.expect(K::RBrace);
        self.alloc_stmt(StmtKind::Switch { scrutinee, sections }, self.range_from(start))
    }

    fn parse_try(&mut self, start: usize) -> StmtId {
        self.bump();
        let body = self.parse_block();
        let mut catches = Vec::new();
        while self.at(K::CatchKw) {
            let catch_start = self.start();
            self.bump();
            let mut ty = None;
            let mut name = None;
            if self.eat(K::LParen) {
                ty = self.parse_type_or_error();
                if self.at(K::Ident) {
                    name = self.ident();
                }
                self.expect(K::RParen);
            }
            let body = self.parse_block();
            catches.push(CatchClause {
                ty,
                name,
                body,
                range: self.range_from(catch_start),
            });
        }
        let finally = if self.eat(K::FinallyKw) {
            Some(self.parse_block())
        } else {
            None
        };
        self.alloc_stmt(StmtKind::Try { body, catches, finally }, self.range_from(start))
    }

    fn parse_designation(&mut self) -> Designation {
        let start = self.start();
        if self.eat(K::LParen) {
            let mut items = Vec::new();
            loop {
                items.push(self.parse_designation());
                if !self.eat(K::Comma) {
                    break;
                }
            }
            self.expect(K::RParen);
            return Designation::Parenthesized {
                items,
                range: self.range_from(start),
            };
        }
        match self.ident() {
            Some((name, range)) if name == "_" => Designation::Discard { range },
            Some((name, range)) => Designation::Single { name, range },
            None => Designation::Discard {
                range: TextRange::empty(start),
            },
        }
    }

    // --- Expressions ---

    fn parse_expr(&mut self) -> ExprId {
        if self.is_lambda_start() {
            return self.parse_lambda();
        }
        let start = self.start();
        let lhs = self.parse_conditional();
        let op = match self.peek() {
            K::Eq => AssignOp::Assign,
            K::PlusEq => AssignOp::Compound(BinaryOp::Add),
            K::MinusEq => AssignOp::Compound(BinaryOp::Sub),
            K::StarEq => AssignOp::Compound(BinaryOp::Mul),
            K::SlashEq => AssignOp::Compound(BinaryOp::Div),
            K::PercentEq => AssignOp::Compound(BinaryOp::Rem),
            K::AmpEq => AssignOp::Compound(BinaryOp::BitAnd),
            K::PipeEq => AssignOp::Compound(BinaryOp::BitOr),
            K::CaretEq => AssignOp::Compound(BinaryOp::BitXor),
            K::LtLtEq => AssignOp::Compound(BinaryOp::Shl),
            K::QuestionQuestionEq => AssignOp::Compound(BinaryOp::Coalesce),
            _ => return lhs,
        };
        self.bump();
        let rhs = self.parse_expr();
        self.alloc_expr(ExprKind::Assign { op, lhs, rhs }, self.range_from(start))
    }

    fn parse_conditional(&mut self) -> ExprId {
        let start = self.start();
        let condition = self.parse_coalesce();
        if !self.eat(K::Question) {
            return condition;
        }
        let then_expr = self.parse_expr();
        self.expect(K::Colon);
        let else_expr = self.parse_expr();
        self.alloc_expr(
            ExprKind::Conditional {
                condition,
                then_expr,
                else_expr,
            },
            self.range_from(start),
        )
    }

    fn parse_coalesce(&mut self) -> ExprId {
        let start = self.start();
        let lhs = self.parse_binary(0);
        if !self.eat(K::QuestionQuestion) {
            return lhs;
        }
        let rhs = self.parse_coalesce();
        self.alloc_expr(
            ExprKind::Binary {
                op: BinaryOp::Coalesce,
                lhs,
                rhs,
            },
            self.range_from(start),
        )
    }

    /// The binary operator at the cursor, with its precedence and token count.
    fn peek_binary_op(&self) -> Option<(BinaryOp, u8, usize)> {
        let op = match self.peek() {
            K::PipePipe => (BinaryOp::Or, 1, 1),
            K::AmpAmp => (BinaryOp::And, 2, 1),
            K::Pipe => (BinaryOp::BitOr, 3, 1),
            K::Caret => (BinaryOp::BitXor, 4, 1),
            K::Amp => (BinaryOp::BitAnd, 5, 1),
            K::EqEq => (BinaryOp::Eq, 6, 1),
            K::BangEq => (BinaryOp::Ne, 6, 1),
            K::Lt => (BinaryOp::Lt, 7, 1),
            K::Le => (BinaryOp::Le, 7, 1),
            K::Ge => (BinaryOp::Ge, 7, 1),
            K::Gt if self.nth(1) == K::Gt && self.nth_token(0).range.end == self.nth_token(1).range.start => {
                (BinaryOp::Shr, 8, 2)
            }
            K::Gt => (BinaryOp::Gt, 7, 1),
            K::LtLt => (BinaryOp::Shl, 8, 1),
            K::Plus => (BinaryOp::Add, 9, 1),
            K::Minus => (BinaryOp::Sub, 9, 1),
            K::Star => (BinaryOp::Mul, 10, 1),
            K::Slash => (BinaryOp::Div, 10, 1),
            K::Percent => (BinaryOp::Rem, 10, 1),
            _ => return None,
        };
        Some(op)
    }

    fn parse_binary(&mut self, min_prec: u8) -> ExprId {
        let start = self.start();
        let mut lhs = self.parse_range();
        loop {
            // `is` and `as` share relational precedence.
            if min_prec <= 7 && self.at(K::IsKw) {
                self.bump();
                let pattern = self.parse_pattern();
                lhs = self.alloc_expr(ExprKind::Is { expr: lhs, pattern }, self.range_from(start));
                continue;
            }
            if min_prec <= 7 && self.at(K::AsKw) {
                self.bump();
                let ty = self.parse_type_with(false).unwrap_or(TypeRef {
                    kind: TypeRefKind::Predefined(PredefinedType::Object),
                    range: TextRange::empty(self.start()),
                });
                lhs = self.alloc_expr(ExprKind::As { expr: lhs, ty }, self.range_from(start));
                continue;
            }
            let Some((op, prec, width)) = self.peek_binary_op() else {
                return lhs;
            };
            if prec < min_prec.max(1) {
                return lhs;
            }
            for _ in 0..width {
                self.bump();
            }
            let rhs = self.parse_binary(prec + 1);
            lhs = self.alloc_expr(ExprKind::Binary { op, lhs, rhs }, self.range_from(start));
        }
    }

    fn can_start_operand(&self) -> bool {
        !matches!(
            self.peek(),
            K::RParen | K::RBracket | K::RBrace | K::Comma | K::Semicolon | K::Colon | K::Eof
        )
    }

    fn parse_range(&mut self) -> ExprId {
        let start = self.start();
        if self.eat(K::DotDot) {
            let end = self.can_start_operand().then(|| self.parse_unary());
            return self.alloc_expr(ExprKind::Range { start: None, end }, self.range_from(start));
        }
        let lhs = self.parse_unary();
        if !self.eat(K::DotDot) {
            return lhs;
        }
        let end = self.can_start_operand().then(|| self.parse_unary());
        self.alloc_expr(
            ExprKind::Range {
                start: Some(lhs),
                end,
            },
            self.range_from(start),
        )
    }

    fn parse_unary(&mut self) -> ExprId {
        let start = self.start();
        let op = match self.peek() {
            K::Bang => Some(UnaryOp::Not),
            K::Minus => Some(UnaryOp::Neg),
            K::Plus => Some(UnaryOp::Plus),
            K::Tilde => Some(UnaryOp::BitNot),
            K::PlusPlus => Some(UnaryOp::PreInc),
            K::MinusMinus => Some(UnaryOp::PreDec),
            K::Caret => Some(UnaryOp::Hat),
            _ => None,
        };
        if let Some(op) = op {
            self.bump();
            let expr = self.parse_unary();
            return self.alloc_expr(ExprKind::Unary { op, expr }, self.range_from(start));
        }
        if self.at(K::ThrowKw) {
            self.bump();
            let expr = self.parse_expr();
            return self.alloc_expr(ExprKind::Throw(expr), self.range_from(start));
        }
        if self.at(K::LParen) {
            if let Some(cast) = self.try_parse_cast(start) {
                return cast;
            }
        }
        let primary = self.parse_primary();
        self.parse_postfix(start, primary)
    }

    fn try_parse_cast(&mut self, start: usize) -> Option<ExprId> {
        let checkpoint = self.pos;
        self.bump();
        let ty = match self.parse_type() {
            Some(ty) if self.at(K::RParen) => ty,
            _ => {
                self.pos = checkpoint;
                return None;
            }
        };
        let is_predefined = match &ty.kind {
            TypeRefKind::Predefined(_) => true,
            TypeRefKind::Nullable(inner) => matches!(inner.kind, TypeRefKind::Predefined(_)),
            _ => false,
        };
        let next = self.nth(1);
        let is_cast = match next {
            K::Ident
            | K::IntLiteral
            | K::LongLiteral
            | K::DoubleLiteral
            | K::CharLiteral
            | K::StringLiteral
            | K::ThisKw
            | K::BaseKw
            | K::NewKw
            | K::LParen
            | K::TrueKw
            | K::FalseKw
            | K::NullKw
            | K::DefaultKw
            | K::Bang
            | K::Tilde => true,
            K::Minus | K::Plus | K::PlusPlus | K::MinusMinus => is_predefined,
            kind => kind.is_predefined_type(),
        };
        if !is_cast {
            self.pos = checkpoint;
            return None;
        }
        self.bump();
        let expr = self.parse_unary();
        Some(self.alloc_expr(ExprKind::Cast { ty, expr }, self.range_from(start)))
    }

    fn parse_postfix(&mut self, start: usize, mut expr: ExprId) -> ExprId {
        loop {
            match self.peek() {
                K::Dot | K::QuestionDot if self.nth(1) == K::Ident => {
                    let conditional = self.bump().kind == K::QuestionDot;
                    let Some((name, name_range)) = self.ident() else {
                        return expr;
                    };
                    let type_args = self.try_parse_call_type_args();
                    expr = self.alloc_expr(
                        ExprKind::Member {
                            receiver: expr,
                            name,
                            name_range,
                            type_args,
                            conditional,
                        },
                        self.range_from(start),
                    );
                }
                K::QuestionDot if self.nth(1) == K::LBracket => {
                    self.bump();
                    let args = self.parse_args(K::LBracket, K::RBracket);
                    expr = self.alloc_expr(
                        ExprKind::ElementAccess {
                            receiver: expr,
                            args,
                            conditional: true,
                        },
                        self.range_from(start),
                    );
                }
                K::LParen => {
                    let args = self.parse_args(K::LParen, K::RParen);
                    expr = self.alloc_expr(ExprKind::Invocation { callee: expr, args }, self.range_from(start));
                }
                K::LBracket => {
                    let args = self.parse_args(K::LBracket, K::RBracket);
                    expr = self.alloc_expr(
                        ExprKind::ElementAccess {
                            receiver: expr,
                            args,
                            conditional: false,
                        },
                        self.range_from(start),
                    );
                }
                K::PlusPlus | K::MinusMinus => {
                    let op = if self.bump().kind == K::PlusPlus {
                        UnaryOp::PostInc
                    } else {
                        UnaryOp::PostDec
                    };
                    expr = self.alloc_expr(ExprKind::Unary { op, expr }, self.range_from(start));
                }
                _ => return expr,
            }
        }
    }

    /// `<T, U>` directly followed by `(`, as in `M<int>(x)`.
    fn try_parse_call_type_args(&mut self) -> Vec<TypeRef> {
        if !self.at(K::Lt) {
            return Vec::new();
        }
        let checkpoint = self.pos;
        match self.parse_type_args() {
            Some(args) if self.at(K::LParen) => args,
            _ => {
                self.pos = checkpoint;
                Vec::new()
            }
        }
    }

    fn parse_args(&mut self, open: SyntaxKind, close: SyntaxKind) -> Vec<Argument> {
        let mut args = Vec::new();
        if !self.expect(open) {
            return args;
        }
        while !self.at(close) && !self.at(K::Eof) {
            args.push(self.parse_argument());
            if !self.eat(K::Comma) {
                break;
            }
        }
        self.expect(close);
        args
    }

    fn parse_argument(&mut self) -> Argument {
        let start = self.start();
        let name = if self.at(K::Ident) && self.nth(1) == K::Colon {
            let name = self.ident();
            self.bump();
            name
        } else {
            None
        };
        let modifier = match self.peek() {
            K::RefKw => Some(ArgModifier::Ref),
            K::OutKw => Some(ArgModifier::Out),
            K::InKw => Some(ArgModifier::In),
            _ => None,
        };
        if modifier.is_some() {
            self.bump();
        }
        let expr = if modifier == Some(ArgModifier::Out) {
            self.try_parse_declaration_expr().unwrap_or_else(|| self.parse_expr())
        } else {
            self.parse_expr()
        };
        Argument {
            name,
            modifier,
            expr,
            range: self.range_from(start),
        }
    }

    /// `T x`, `var x` or `var (a, b)` followed by `,` or `)`.
    fn try_parse_declaration_expr(&mut self) -> Option<ExprId> {
        let start = self.start();
        let checkpoint = self.pos;
        if self.at_contextual("var") && self.nth(1) == K::LParen {
            let token = self.bump();
            let designation = self.parse_designation();
            let ty = TypeRef {
                kind: TypeRefKind::Implicit,
                range: token.range,
            };
            return Some(self.alloc_expr(ExprKind::Declaration { ty, designation }, self.range_from(start)));
        }
        let ty = self.parse_type()?;
        if self.at(K::Ident) && matches!(self.nth(1), K::Comma | K::RParen) {
            let designation = self.parse_designation();
            return Some(self.alloc_expr(ExprKind::Declaration { ty, designation }, self.range_from(start)));
        }
        self.pos = checkpoint;
        None
    }

    fn parse_pattern(&mut self) -> Pattern {
        let start = self.start();
        if self.at_contextual("not") {
            self.bump();
            let inner = self.parse_pattern();
            return Pattern {
                kind: PatternKind::Not(Box::new(inner)),
                range: self.range_from(start),
            };
        }
        let is_constant = matches!(
            self.peek(),
            K::NullKw
                | K::TrueKw
                | K::FalseKw
                | K::IntLiteral
                | K::LongLiteral
                | K::DoubleLiteral
                | K::CharLiteral
                | K::StringLiteral
                | K::Minus
        );
        if !is_constant {
            if let Some(ty) = self.parse_type_with(false) {
                if self.at(K::Ident) && !matches!(self.nth_text(0), "and" | "or" | "when") {
                    if let Some((name, name_range)) = self.ident() {
                        return Pattern {
                            kind: PatternKind::Declaration { ty, name, name_range },
                            range: self.range_from(start),
                        };
                    }
                }
                return Pattern {
                    kind: PatternKind::Type(ty),
                    range: self.range_from(start),
                };
            }
        }
        let expr = self.parse_range();
        Pattern {
            kind: PatternKind::Constant(expr),
            range: self.range_from(start),
        }
    }

    fn is_lambda_start(&self) -> bool {
        let offset = usize::from(self.at(K::StaticKw));
        match self.nth(offset) {
            K::Ident => self.nth(offset + 1) == K::Arrow,
            K::LParen => {
                let mut depth = 0usize;
                let mut n = offset;
                loop {
                    match self.nth(n) {
                        K::LParen => depth += 1,
                        K::RParen => {
                            depth -= 1;
                            if depth == 0 {
                                return self.nth(n + 1) == K::Arrow;
                            }
                        }
                        K::Eof | K::Semicolon | K::LBrace | K::RBrace => return false,
                        _ => {}
                    }
                    n += 1;
                }
            }
            _ => false,
        }
    }

    fn parse_lambda(&mut self) -> ExprId {
        let start = self.start();
        let is_static = self.eat(K::StaticKw);
        let mut params = Vec::new();
        if self.at(K::Ident) {
            if let Some((name, name_range)) = self.ident() {
                params.push(Param {
                    modifier: None,
                    ty: None,
                    name,
                    name_range,
                    default: None,
                    range: name_range,
                });
            }
        } else {
            self.expect(K::LParen);
            while !self.at(K::RParen) && !self.at(K::Eof) {
                let param_start = self.start();
                let modifier = self.parse_param_modifier();
                let ty = if self.at(K::Ident) && matches!(self.nth(1), K::Comma | K::RParen) {
                    None
                } else {
                    self.parse_type_or_error()
                };
                let Some((name, name_range)) = self.ident() else {
                    break;
                };
                params.push(Param {
                    modifier,
                    ty,
                    name,
                    name_range,
                    default: None,
                    range: self.range_from(param_start),
                });
                if !self.eat(K::Comma) {
                    break;
                }
            }
            self.expect(K::RParen);
        }
        self.expect(K::Arrow);
        let body = if self.at(K::LBrace) {
            LambdaBody::Block(self.parse_block())
        } else {
            LambdaBody::Expr(self.parse_expr())
        };
        self.alloc_expr(
            ExprKind::Lambda {
                is_static,
                params,
                body,
            },
            self.range_from(start),
        )
    }

    fn parse_primary(&mut self) -> ExprId {
        let start = self.start();
        let literal = match self.peek() {
            K::IntLiteral => Some(LiteralKind::Int),
            K::LongLiteral => Some(LiteralKind::Long),
            K::DoubleLiteral => Some(LiteralKind::Double),
            K::CharLiteral => Some(LiteralKind::Char),
            K::StringLiteral => Some(LiteralKind::String),
            K::TrueKw | K::FalseKw => Some(LiteralKind::Bool),
            K::NullKw => Some(LiteralKind::Null),
            _ => None,
        };
        if let Some(kind) = literal {
            let token = self.bump();
            return self.alloc_expr(ExprKind::Literal(kind), token.range);
        }

        match self.peek() {
            K::DefaultKw => {
                self.bump();
                let ty = if self.at(K::LParen) {
                    self.bump();
                    let ty = self.parse_type_or_error();
                    self.expect(K::RParen);
                    ty
                } else {
                    None
                };
                self.alloc_expr(ExprKind::Default(ty), self.range_from(start))
            }
            K::ThisKw => {
                let token = self.bump();
                self.alloc_expr(ExprKind::This, token.range)
            }
            K::BaseKw => {
                let token = self.bump();
                self.alloc_expr(ExprKind::Base, token.range)
            }
            kind if kind.is_predefined_type() => {
                let Some(TypeRef {
                    kind: TypeRefKind::Predefined(ty),
                    range,
                }) = self.parse_type_with(false)
                else {
                    return self.error_expr();
                };
                self.alloc_expr(ExprKind::PredefinedType(ty), range)
            }
            K::Ident if self.nth_text(0) == "nameof" && self.nth(1) == K::LParen => {
                self.bump();
                self.bump();
                let operand = self.parse_expr();
                self.expect(K::RParen);
                self.alloc_expr(ExprKind::NameOf(operand), self.range_from(start))
            }
            K::Ident => {
                let Some((name, _)) = self.ident() else {
                    return self.error_expr();
                };
                let type_args = self.try_parse_call_type_args();
                self.alloc_expr(ExprKind::Name { name, type_args }, self.range_from(start))
            }
            K::NewKw => self.parse_new(start),
            K::LParen => self.parse_paren_or_tuple(start),
            _ => {
                self.error(format!("expected expression, found {:?}", self.peek()));
                if !matches!(
                    self.peek(),
                    K::Semicolon | K::RParen | K::RBrace | K::RBracket | K::Comma | K::Eof
                ) {
                    self.bump();
                }
                self.alloc_expr(ExprKind::Error, self.range_from(start))
            }
        }
    }

    fn parse_new(&mut self, start: usize) -> ExprId {
        self.bump();
        let Some(ty) = self.parse_type_with(false) else {
            self.error("expected type after `new`".to_string());
            return self.alloc_expr(ExprKind::Error, self.range_from(start));
        };
        match ty.kind {
            TypeRefKind::Array(element) => {
                // `new T[] { a, b }`
                let items = self.parse_collection_initializer();
                self.alloc_expr(
                    ExprKind::NewArray {
                        element: *element,
                        size: None,
                        items,
                    },
                    self.range_from(start),
                )
            }
            _ if self.at(K::LBracket) => {
                self.bump();
                let size = Some(self.parse_expr());
                self.expect(K::RBracket);
                let items = self.parse_collection_initializer();
                self.alloc_expr(
                    ExprKind::NewArray {
                        element: ty,
                        size,
                        items,
                    },
                    self.range_from(start),
                )
            }
            _ => {
                let args = if self.at(K::LParen) {
                    self.parse_args(K::LParen, K::RParen)
                } else {
                    Vec::new()
                };
                // Object initializers are accepted and ignored.
                if self.at(K::LBrace) {
                    self.parse_collection_initializer();
                }
                self.alloc_expr(ExprKind::New { ty, args }, self.range_from(start))
            }
        }
    }

    fn parse_collection_initializer(&mut self) -> Vec<ExprId> {
        let mut items = Vec::new();
        if !self.eat(K::LBrace) {
            return items;
        }
        while !self.at(K::RBrace) && !self.at(K::Eof) {
            items.push(self.parse_expr());
            if !self.eat(K::Comma) {
                break;
            }
        }
        self.expect(K::RBrace);
        items
    }

    fn parse_paren_or_tuple(&mut self, start: usize) -> ExprId {
        self.bump();
        let mut elements = Vec::new();
        let mut saw_comma = false;
        loop {
            let element_start = self.start();
            let name = if self.at(K::Ident) && self.nth(1) == K::Colon {
                let name = self.ident();
                self.bump();
                name
            } else {
                None
            };
            let expr = self
                .try_parse_declaration_expr()
                .unwrap_or_else(|| self.parse_expr());
            elements.push(Argument {
                name,
                modifier: None,
                expr,
                range: self.range_from(element_start),
            });
            if !self.eat(K::Comma) {
                break;
            }
            saw_comma = true;
        }
        self.expect(K::RParen);
        let range = self.range_from(start);
        if !saw_comma && elements.len() == 1 && elements[0].name.is_none() {
            let inner = elements[0].expr;
            return self.alloc_expr(ExprKind::Paren(inner), range);
        }
        self.alloc_expr(ExprKind::Tuple(elements), range)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn method_body(file: &SourceFile) -> &[StmtId] {
        let Member::Method(method) = &file.types[0].members[0] else {
            panic!("expected method");
        };
        let FunctionBody::Block(block) = method.body else {
            panic!("expected block body");
        };
        match &file.stmt(block).kind {
            StmtKind::Block(stmts) => stmts,
            other => panic!("unexpected {other:?}"),
        }
    }

    fn parse_ok(text: &str) -> SourceFile {
        let file = parse(text);
        assert_eq!(file.errors, Vec::new(), "{text}");
        file
    }

    #[test]
    fn parses_class_with_members() {
        let file = parse_ok(
            r#"
using System;
class C
{
    int field = 1, other;
    public static int P => 1;
    string Q { get; set; }
    int this[int i] => i;
    C() { }
    void M<T>(ref int a, out string b, int c = 3) { b = ""; }
}"#,
        );
        let members = &file.types[0].members;
        assert_eq!(members.len(), 6);
        assert!(matches!(&members[0], Member::Field(f) if f.declarators.len() == 2));
        assert!(matches!(&members[3], Member::Property(p) if p.indexer_params.is_some()));
        assert!(matches!(&members[4], Member::Method(m) if m.ret.is_none()));
        assert!(matches!(&members[5], Member::Method(m) if m.type_params.len() == 1 && m.params.len() == 3));
    }

    #[test]
    fn distinguishes_declarations_from_expressions() {
        let file = parse_ok(
            r#"
class C
{
    void M()
    {
        int a = 1, b;
        string? s = null;
        Func<int, int> f = x => x + 1;
        (int, int) t = (1, 2);
        a = b;
        M();
        var (x, y) = (1, 2);
        (var p, int q) = t;
        static int Local(int v) => v;
        a = (int)s.Length + (a) - 1;
    }
}"#,
        );
        let stmts = method_body(&file);
        let kinds: Vec<&str> = stmts
            .iter()
            .map(|s| match &file.stmt(*s).kind {
                StmtKind::LocalDecl { .. } => "decl",
                StmtKind::LocalFunction(_) => "fn",
                StmtKind::Expr(_) => "expr",
                _ => "other",
            })
            .collect();
        assert_eq!(
            kinds,
            vec!["decl", "decl", "decl", "decl", "expr", "expr", "expr", "expr", "fn", "expr"]
        );
    }

    #[test]
    fn parses_out_declarations_and_patterns() {
        let file = parse_ok(
            r#"
class C
{
    void M(object o)
    {
        N(out int y, out var z, out _);
        if (o is string s && o is not null) { }
    }
}"#,
        );
        let stmts = method_body(&file);
        let StmtKind::Expr(call) = file.stmt(stmts[0]).kind else {
            panic!()
        };
        let ExprKind::Invocation { args, .. } = &file.expr(call).kind else {
            panic!()
        };
        assert!(matches!(file.expr(args[0].expr).kind, ExprKind::Declaration { .. }));
        assert!(matches!(file.expr(args[1].expr).kind, ExprKind::Declaration { .. }));
        assert!(matches!(file.expr(args[2].expr).kind, ExprKind::Name { .. }));
    }

    #[test]
    fn parses_control_flow() {
        let file = parse_ok(
            r#"
class C
{
    int M(int x)
    {
        label: x++;
        for (int i = 0; i < 10; i++) { if (i > 3) break; else continue; }
        switch (x) { case 1: case 2: goto label; default: return 0; }
        try { throw null; } catch (Exception e) { } finally { }
        do { x--; } while (x > 0);
        foreach (var c in "abc") { }
        return x >> 1;
    }
}"#,
        );
        assert_eq!(method_body(&file).len(), 7);
    }

    #[test]
    fn generic_invocation_and_ranges() {
        let file = parse_ok(
            r#"
class C
{
    void M(int[] a)
    {
        var x = a.Ex<int>();
        var r = a[1..^1];
        var s = ..;
        var t = x?.ToString() ?? string.Empty;
    }
}"#,
        );
        assert_eq!(method_body(&file).len(), 4);
    }

    #[test]
    fn records_errors_and_recovers() {
        let file = parse("class C { void M() { int = ; } void N() { } }");
        assert!(!file.errors.is_empty());
        assert_eq!(file.types[0].members.len(), 2);
    }

    #[test]
    fn nullable_directive() {
        let file = parse_ok("class A { }\n#nullable enable\nclass C { }");
        assert_eq!(file.nullable_directives, vec![(12, true)]);
        assert!(!file.nullable_enabled_at(5));
        assert!(file.nullable_enabled_at(30));
    }

    #[test]
    fn records_usings_and_namespaces() {
        let file = parse_ok("using System;\nusing X = Y.Z;\nnamespace System { struct Index { } }\nclass P { }");
        assert_eq!(file.usings, vec![Name::new("System")]);
        assert_eq!(file.types[0].namespace, Some(Name::new("System")));
        assert_eq!(file.types[1].namespace, None);
    }
}
