//! Arena-allocated syntax tree.
//!
//! Statements and expressions live in per-file arenas and refer to each other by
//! [`StmtId`]/[`ExprId`]. Declarations (types, members, parameters) are owned
//! inline since they are few and never shared.

use std::fmt;
use std::marker::PhantomData;

use carve_core::{Name, TextRange};

use crate::{ParseError, Token};

/// A typed index into an [`Arena`].
pub trait ArenaId: Copy {
    fn from_index(index: usize) -> Self;
    fn idx(self) -> usize;
}

macro_rules! arena_id {
    ($name:ident) => {
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u32);

        impl ArenaId for $name {
            fn from_index(index: usize) -> Self {
                $name(index as u32)
            }

            fn idx(self) -> usize {
                self.0 as usize
            }
        }

        impl $name {
            #[must_use]
            pub fn idx(self) -> usize {
                ArenaId::idx(self)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}#{}", stringify!($name), self.0)
            }
        }
    };
}

arena_id!(ExprId);
arena_id!(StmtId);

/// Append-only storage addressed by `I`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Arena<I, T> {
    items: Vec<T>,
    _id: PhantomData<I>,
}

impl<I: ArenaId, T> Arena<I, T> {
    pub fn alloc(&mut self, item: T) -> I {
        self.items.push(item);
        I::from_index(self.items.len() - 1)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Ids in allocation order.
    pub fn ids(&self) -> impl Iterator<Item = I> {
        (0..self.items.len()).map(I::from_index)
    }

    pub fn iter(&self) -> impl Iterator<Item = (I, &T)> {
        self.items.iter().enumerate().map(|(index, item)| (I::from_index(index), item))
    }
}

impl<I, T> Default for Arena<I, T> {
    fn default() -> Self {
        Arena {
            items: Vec::new(),
            _id: PhantomData,
        }
    }
}

impl<I: ArenaId, T> std::ops::Index<I> for Arena<I, T> {
    type Output = T;

    fn index(&self, id: I) -> &T {
        &self.items[id.idx()]
    }
}

/// A parsed file.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub text: String,
    /// Every token, trivia included, in source order.
    pub tokens: Vec<Token>,
    /// Namespaces imported by plain `using N;` directives.
    pub usings: Vec<Name>,
    pub types: Vec<TypeDecl>,
    pub delegates: Vec<DelegateDecl>,
    pub stmts: Arena<StmtId, Stmt>,
    pub exprs: Arena<ExprId, Expr>,
    /// `(offset, enabled)` for each `#nullable` directive.
    pub nullable_directives: Vec<(usize, bool)>,
    pub errors: Vec<ParseError>,
}

impl SourceFile {
    pub fn stmt(&self, id: StmtId) -> &Stmt {
        &self.stmts[id]
    }

    pub fn expr(&self, id: ExprId) -> &Expr {
        &self.exprs[id]
    }

    pub fn text_of(&self, range: TextRange) -> &str {
        range.slice(&self.text)
    }

    pub fn expr_ids(&self) -> impl Iterator<Item = ExprId> {
        self.exprs.ids()
    }

    pub fn stmt_ids(&self) -> impl Iterator<Item = StmtId> {
        self.stmts.ids()
    }

    /// Whether nullable annotations are enabled at `offset`.
    pub fn nullable_enabled_at(&self, offset: usize) -> bool {
        self.nullable_directives
            .iter()
            .take_while(|(at, _)| *at <= offset)
            .last()
            .is_some_and(|(_, enabled)| *enabled)
    }

    /// Comment tokens between `start` and `end`.
    pub fn comments_in(&self, range: TextRange) -> impl Iterator<Item = &Token> {
        self.tokens
            .iter()
            .filter(move |t| t.kind.is_comment() && range.contains_range(t.range))
    }

    /// Index of the first non-trivia token starting at or after `offset`.
    pub fn token_index_at(&self, offset: usize) -> Option<usize> {
        self.tokens
            .iter()
            .position(|t| !t.kind.is_trivia() && t.range.start >= offset)
    }

    /// The closest non-trivia token ending at or before `offset`.
    pub fn token_before(&self, offset: usize) -> Option<&Token> {
        self.tokens
            .iter()
            .rev()
            .find(|t| !t.kind.is_trivia() && t.kind != crate::SyntaxKind::Eof && t.range.end <= offset)
    }

    pub fn token_after(&self, offset: usize) -> Option<&Token> {
        self.tokens
            .iter()
            .find(|t| !t.kind.is_trivia() && t.range.start >= offset)
    }

    /// Every type declaration in the file, nested ones included, outermost first.
    pub fn all_types(&self) -> Vec<&TypeDecl> {
        fn walk<'a>(ty: &'a TypeDecl, out: &mut Vec<&'a TypeDecl>) {
            out.push(ty);
            for member in &ty.members {
                if let Member::Type(nested) = member {
                    walk(nested, out);
                }
            }
        }
        let mut out = Vec::new();
        for ty in &self.types {
            walk(ty, &mut out);
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Modifier {
    Public,
    Private,
    Protected,
    Internal,
    Static,
    Readonly,
    Const,
    Abstract,
    Virtual,
    Override,
    Sealed,
    Partial,
    Async,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Modifiers {
    pub list: Vec<(Modifier, TextRange)>,
}

impl Modifiers {
    pub fn has(&self, modifier: Modifier) -> bool {
        self.list.iter().any(|(m, _)| *m == modifier)
    }

    pub fn is_static(&self) -> bool {
        self.has(Modifier::Static) || self.has(Modifier::Const)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeDeclKind {
    Class,
    Struct,
}

#[derive(Debug, Clone)]
pub struct TypeDecl {
    pub kind: TypeDeclKind,
    pub modifiers: Modifiers,
    /// Enclosing namespace of a top-level type.
    pub namespace: Option<Name>,
    pub name: Name,
    pub name_range: TextRange,
    pub type_params: Vec<(Name, TextRange)>,
    pub bases: Vec<TypeRef>,
    pub members: Vec<Member>,
    pub range: TextRange,
}

#[derive(Debug, Clone)]
pub struct DelegateDecl {
    pub ret: TypeRef,
    pub name: Name,
    pub type_params: Vec<(Name, TextRange)>,
    pub params: Vec<Param>,
    pub range: TextRange,
}

#[derive(Debug, Clone)]
pub enum Member {
    Field(FieldDecl),
    Method(FunctionDecl),
    Property(PropertyDecl),
    Type(TypeDecl),
    Delegate(DelegateDecl),
}

#[derive(Debug, Clone)]
pub struct FieldDecl {
    pub modifiers: Modifiers,
    pub ty: TypeRef,
    pub declarators: Vec<Declarator>,
    pub range: TextRange,
}

/// A method, constructor or local function.
#[derive(Debug, Clone)]
pub struct FunctionDecl {
    pub modifiers: Modifiers,
    /// `None` for constructors.
    pub ret: Option<TypeRef>,
    pub name: Name,
    pub name_range: TextRange,
    pub type_params: Vec<(Name, TextRange)>,
    pub params: Vec<Param>,
    pub body: FunctionBody,
    pub range: TextRange,
}

impl FunctionDecl {
    pub fn is_extension(&self) -> bool {
        self.params
            .first()
            .is_some_and(|p| p.modifier == Some(ParamModifier::This))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionBody {
    Block(StmtId),
    Expr(ExprId),
    /// Abstract/extern members and auto-accessors.
    None,
}

#[derive(Debug, Clone)]
pub struct PropertyDecl {
    pub modifiers: Modifiers,
    pub ty: TypeRef,
    pub name: Name,
    pub name_range: TextRange,
    /// `Some` for indexers (`this[...]`).
    pub indexer_params: Option<Vec<Param>>,
    pub body: PropertyBody,
    pub range: TextRange,
}

#[derive(Debug, Clone)]
pub enum PropertyBody {
    /// `T P => expr;`
    Expr(ExprId),
    Accessors(Vec<Accessor>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessorKind {
    Get,
    Set,
    Init,
}

#[derive(Debug, Clone)]
pub struct Accessor {
    pub kind: AccessorKind,
    pub modifiers: Modifiers,
    pub body: FunctionBody,
    pub range: TextRange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamModifier {
    Ref,
    Out,
    In,
    This,
    Params,
}

#[derive(Debug, Clone)]
pub struct Param {
    pub modifier: Option<ParamModifier>,
    /// `None` for implicitly typed lambda parameters.
    pub ty: Option<TypeRef>,
    pub name: Name,
    pub name_range: TextRange,
    pub default: Option<ExprId>,
    pub range: TextRange,
}

#[derive(Debug, Clone)]
pub struct Declarator {
    pub name: Name,
    pub name_range: TextRange,
    pub init: Option<ExprId>,
    pub range: TextRange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PredefinedType {
    Bool,
    Byte,
    Char,
    Double,
    Int,
    Long,
    Object,
    Short,
    String,
    Void,
}

impl PredefinedType {
    pub fn keyword(self) -> &'static str {
        match self {
            PredefinedType::Bool => "bool",
            PredefinedType::Byte => "byte",
            PredefinedType::Char => "char",
            PredefinedType::Double => "double",
            PredefinedType::Int => "int",
            PredefinedType::Long => "long",
            PredefinedType::Object => "object",
            PredefinedType::Short => "short",
            PredefinedType::String => "string",
            PredefinedType::Void => "void",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeRef {
    pub kind: TypeRefKind,
    pub range: TextRange,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeRefKind {
    Predefined(PredefinedType),
    /// `var`
    Implicit,
    /// `A.B<C>.D`, one entry per dotted segment.
    Named(Vec<TypeSegment>),
    Nullable(Box<TypeRef>),
    Array(Box<TypeRef>),
    Tuple(Vec<TupleTypeElement>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeSegment {
    pub name: Name,
    pub args: Vec<TypeRef>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TupleTypeElement {
    pub ty: TypeRef,
    pub name: Option<Name>,
}

impl TypeRef {
    pub fn is_implicit(&self) -> bool {
        matches!(self.kind, TypeRefKind::Implicit)
    }
}

#[derive(Debug, Clone)]
pub struct Stmt {
    pub kind: StmtKind,
    pub range: TextRange,
}

#[derive(Debug, Clone)]
pub enum StmtKind {
    Block(Vec<StmtId>),
    LocalDecl {
        is_const: bool,
        ty: TypeRef,
        declarators: Vec<Declarator>,
    },
    LocalFunction(Box<FunctionDecl>),
    Expr(ExprId),
    If {
        condition: ExprId,
        then_branch: StmtId,
        else_branch: Option<StmtId>,
    },
    While {
        condition: ExprId,
        body: StmtId,
    },
    DoWhile {
        body: StmtId,
        condition: ExprId,
    },
    For {
        init: Vec<StmtId>,
        condition: Option<ExprId>,
        update: Vec<ExprId>,
        body: StmtId,
    },
    Foreach {
        ty: TypeRef,
        name: Name,
        name_range: TextRange,
        iterable: ExprId,
        body: StmtId,
    },
    Switch {
        scrutinee: ExprId,
        sections: Vec<SwitchSection>,
    },
    Break,
    Continue,
    Return(Option<ExprId>),
    Throw(Option<ExprId>),
    Goto {
        label: Name,
        label_range: TextRange,
    },
    Labeled {
        label: Name,
        label_range: TextRange,
        stmt: StmtId,
    },
    Try {
        body: StmtId,
        catches: Vec<CatchClause>,
        finally: Option<StmtId>,
    },
    Empty,
}

#[derive(Debug, Clone)]
pub struct SwitchSection {
    pub labels: Vec<SwitchLabel>,
    pub stmts: Vec<StmtId>,
    pub range: TextRange,
}

#[derive(Debug, Clone)]
pub enum SwitchLabel {
    Case(ExprId),
    Default,
}

#[derive(Debug, Clone)]
pub struct CatchClause {
    pub ty: Option<TypeRef>,
    pub name: Option<(Name, TextRange)>,
    pub body: StmtId,
    pub range: TextRange,
}

#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub range: TextRange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiteralKind {
    Int,
    Long,
    Double,
    Char,
    String,
    Bool,
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgModifier {
    Ref,
    Out,
    In,
}

#[derive(Debug, Clone)]
pub struct Argument {
    pub name: Option<(Name, TextRange)>,
    pub modifier: Option<ArgModifier>,
    pub expr: ExprId,
    pub range: TextRange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    Plus,
    BitNot,
    PreInc,
    PreDec,
    PostInc,
    PostDec,
    /// `^n`, an index from the end.
    Hat,
}

impl UnaryOp {
    pub fn is_increment(self) -> bool {
        matches!(
            self,
            UnaryOp::PreInc | UnaryOp::PreDec | UnaryOp::PostInc | UnaryOp::PostDec
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Shl,
    Shr,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    BitAnd,
    BitOr,
    BitXor,
    And,
    Or,
    Coalesce,
}

impl BinaryOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge | BinaryOp::Eq | BinaryOp::Ne
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Assign,
    Compound(BinaryOp),
}

#[derive(Debug, Clone)]
pub enum Designation {
    Single { name: Name, range: TextRange },
    Discard { range: TextRange },
    Parenthesized { items: Vec<Designation>, range: TextRange },
}

impl Designation {
    pub fn range(&self) -> TextRange {
        match self {
            Designation::Single { range, .. }
            | Designation::Discard { range }
            | Designation::Parenthesized { range, .. } => *range,
        }
    }

    /// Every named designation, in source order.
    pub fn names(&self) -> Vec<(&Name, TextRange)> {
        let mut out = Vec::new();
        fn walk<'a>(d: &'a Designation, out: &mut Vec<(&'a Name, TextRange)>) {
            match d {
                Designation::Single { name, range } => out.push((name, *range)),
                Designation::Discard { .. } => {}
                Designation::Parenthesized { items, .. } => {
                    for item in items {
                        walk(item, out);
                    }
                }
            }
        }
        walk(self, &mut out);
        out
    }
}

#[derive(Debug, Clone)]
pub struct Pattern {
    pub kind: PatternKind,
    pub range: TextRange,
}

#[derive(Debug, Clone)]
pub enum PatternKind {
    Constant(ExprId),
    Type(TypeRef),
    /// `T x` or `var x`
    Declaration {
        ty: TypeRef,
        name: Name,
        name_range: TextRange,
    },
    Not(Box<Pattern>),
}

#[derive(Debug, Clone)]
pub enum LambdaBody {
    Expr(ExprId),
    Block(StmtId),
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Literal(LiteralKind),
    /// `default` or `default(T)`
    Default(Option<TypeRef>),
    Name {
        name: Name,
        type_args: Vec<TypeRef>,
    },
    /// A predefined type keyword used as an expression receiver (`string.Empty`).
    PredefinedType(PredefinedType),
    This,
    Base,
    Member {
        receiver: ExprId,
        name: Name,
        name_range: TextRange,
        type_args: Vec<TypeRef>,
        /// `a?.b`
        conditional: bool,
    },
    ElementAccess {
        receiver: ExprId,
        args: Vec<Argument>,
        conditional: bool,
    },
    Invocation {
        callee: ExprId,
        args: Vec<Argument>,
    },
    New {
        ty: TypeRef,
        args: Vec<Argument>,
    },
    NewArray {
        element: TypeRef,
        size: Option<ExprId>,
        items: Vec<ExprId>,
    },
    Tuple(Vec<Argument>),
    Paren(ExprId),
    Cast {
        ty: TypeRef,
        expr: ExprId,
    },
    Unary {
        op: UnaryOp,
        expr: ExprId,
    },
    Binary {
        op: BinaryOp,
        lhs: ExprId,
        rhs: ExprId,
    },
    Range {
        start: Option<ExprId>,
        end: Option<ExprId>,
    },
    Is {
        expr: ExprId,
        pattern: Pattern,
    },
    As {
        expr: ExprId,
        ty: TypeRef,
    },
    Conditional {
        condition: ExprId,
        then_expr: ExprId,
        else_expr: ExprId,
    },
    Assign {
        op: AssignOp,
        lhs: ExprId,
        rhs: ExprId,
    },
    Lambda {
        is_static: bool,
        params: Vec<Param>,
        body: LambdaBody,
    },
    /// `out int x`, `var (a, b)`, `int y` inside a deconstructing tuple.
    Declaration {
        ty: TypeRef,
        designation: Designation,
    },
    /// `nameof(x)`; kept separate because it does not evaluate its operand.
    NameOf(ExprId),
    Throw(ExprId),
    Error,
}
