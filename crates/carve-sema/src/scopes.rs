//! Lexical scopes, locals, functions and simple-name resolution.
//!
//! Scoping follows the order-sensitive block discipline:
//! - A local is in scope after its declarator (its own initializer included).
//! - Out-variable and pattern designations stay in scope for the rest of the
//!   enclosing statement list.
//! - Local functions are in scope for the whole enclosing block.
//! - Lambda and local-function parameters open a new scope.
//!
//! Every method, accessor, field initializer, local function and lambda is a
//! [`FunctionId`]; each statement and expression records the innermost one
//! containing it.

use std::collections::{HashMap, HashSet};

use carve_core::{Name, TextRange};
use carve_syntax::{
    AccessorKind, Argument, ArgModifier, Designation, ExprId, ExprKind, FunctionBody, FunctionDecl, LambdaBody, Member,
    Modifier, NodeId, Param, Pattern, PatternKind, PropertyBody, SourceFile, StmtId, StmtKind, TypeRef,
};
use carve_types::RefKind;

use crate::items::{param_ref_kind, ItemTree, TypeId};
use crate::library;

macro_rules! index_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u32);

        impl $name {
            #[must_use]
            pub const fn idx(self) -> usize {
                self.0 as usize
            }
        }
    };
}

index_id!(ScopeId);
index_id!(LocalId);
index_id!(FunctionId);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalKind {
    Param,
    Local,
    Const,
    /// `e is T x`
    PatternVar,
    /// `out var x` / `out T x`
    OutVar,
    /// `var (x, y) = e` / `(var x, int y) = e`
    Deconstruction,
    Foreach,
    Catch,
}

#[derive(Debug, Clone)]
pub struct LocalData {
    pub name: Name,
    pub name_range: TextRange,
    pub kind: LocalKind,
    /// Declared type syntax; `None` for `var` and implicitly typed lambda parameters.
    pub ty: Option<TypeRef>,
    pub ref_kind: RefKind,
    pub function: FunctionId,
    /// The statement or expression introducing the local. `None` for member parameters.
    pub decl: Option<NodeId>,
    pub has_initializer: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    Method,
    Constructor,
    Accessor,
    /// `T P => e;` or an indexer with an expression body.
    ExpressionProperty,
    FieldInitializer,
    LocalFunction,
    Lambda,
}

#[derive(Debug, Clone)]
pub struct FunctionData {
    pub kind: FunctionKind,
    pub name: Option<Name>,
    pub parent: Option<FunctionId>,
    pub owner: Option<TypeId>,
    /// Declared `static`: a static member, local function or lambda.
    pub is_static: bool,
    /// A `readonly` member, or any member of a readonly struct.
    pub is_readonly: bool,
    pub params: Vec<LocalId>,
    /// Type parameters introduced by this function itself.
    pub type_params: Vec<Name>,
    pub ret: Option<TypeRef>,
    pub body: Option<NodeId>,
    /// The `LocalFunction` statement or `Lambda` expression.
    pub node: Option<NodeId>,
    pub range: TextRange,
}

impl FunctionData {
    pub fn is_nested(&self) -> bool {
        matches!(self.kind, FunctionKind::LocalFunction | FunctionKind::Lambda)
    }

    /// The body is a block statement.
    pub fn block_body(&self) -> Option<StmtId> {
        match self.body {
            Some(NodeId::Stmt(stmt)) => Some(stmt),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeEntry {
    Local(LocalId),
    Function(FunctionId),
}

#[derive(Debug, Clone, Default)]
pub struct ScopeData {
    parent: Option<ScopeId>,
    function: Option<FunctionId>,
    entries: HashMap<Name, ScopeEntry>,
}

impl ScopeData {
    #[must_use]
    pub fn parent(&self) -> Option<ScopeId> {
        self.parent
    }

    #[must_use]
    pub fn entries(&self) -> &HashMap<Name, ScopeEntry> {
        &self.entries
    }
}

/// What a simple name refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Local(LocalId),
    LocalFunction(FunctionId),
    Field { owner: TypeId, index: usize },
    Property { owner: TypeId, index: usize },
    /// A method group on `owner` (or one of its base types).
    Methods { owner: TypeId, name: Name },
    Type(TypeId),
    Namespace(Name),
    Unresolved,
}

#[derive(Debug, Clone, Default)]
pub struct Scopes {
    scopes: Vec<ScopeData>,
    locals: Vec<LocalData>,
    functions: Vec<FunctionData>,
    node_scopes: HashMap<NodeId, ScopeId>,
    node_functions: HashMap<NodeId, FunctionId>,
    resolutions: HashMap<ExprId, Resolution>,
    locals_by_offset: HashMap<usize, LocalId>,
    captures: Vec<Vec<LocalId>>,
}

impl Scopes {
    pub fn build(file: &SourceFile, items: &ItemTree) -> Scopes {
        let mut builder = Builder {
            file,
            items,
            out: Scopes::default(),
            local_function_ids: HashMap::new(),
            function_refs: HashMap::new(),
        };
        builder.visit_file();
        builder.finish()
    }

    pub fn local(&self, id: LocalId) -> &LocalData {
        &self.locals[id.idx()]
    }

    pub fn locals(&self) -> impl Iterator<Item = (LocalId, &LocalData)> {
        self.locals.iter().enumerate().map(|(i, l)| (LocalId(i as u32), l))
    }

    pub fn function(&self, id: FunctionId) -> &FunctionData {
        &self.functions[id.idx()]
    }

    pub fn functions(&self) -> impl Iterator<Item = (FunctionId, &FunctionData)> {
        self.functions.iter().enumerate().map(|(i, f)| (FunctionId(i as u32), f))
    }

    pub fn scope_data(&self, scope: ScopeId) -> &ScopeData {
        &self.scopes[scope.idx()]
    }

    pub fn scope_at(&self, node: NodeId) -> Option<ScopeId> {
        self.node_scopes.get(&node).copied()
    }

    /// The innermost function containing `node`.
    pub fn function_of(&self, node: NodeId) -> Option<FunctionId> {
        self.node_functions.get(&node).copied()
    }

    /// The function declared by a `LocalFunction` statement or `Lambda` expression.
    pub fn function_declared_by(&self, node: NodeId) -> Option<FunctionId> {
        self.functions
            .iter()
            .position(|f| f.node == Some(node))
            .map(|idx| FunctionId(idx as u32))
    }

    pub fn resolution(&self, expr: ExprId) -> Option<&Resolution> {
        self.resolutions.get(&expr)
    }

    /// The local whose name token starts at `offset`.
    pub fn local_declared_at(&self, offset: usize) -> Option<LocalId> {
        self.locals_by_offset.get(&offset).copied()
    }

    /// Locals of enclosing functions that `function` (or anything it calls
    /// among local functions) reads or writes.
    pub fn captures(&self, function: FunctionId) -> &[LocalId] {
        &self.captures[function.idx()]
    }

    /// Walks `scope` and its parents looking for `name`.
    pub fn resolve_in_scope(&self, scope: ScopeId, name: &str) -> Option<ScopeEntry> {
        let mut current = Some(scope);
        while let Some(id) = current {
            let data = &self.scopes[id.idx()];
            if let Some(&entry) = data.entries.get(name) {
                return Some(entry);
            }
            current = data.parent;
        }
        None
    }

    /// `function` followed by its enclosing functions.
    pub fn function_chain(&self, function: FunctionId) -> impl Iterator<Item = FunctionId> + '_ {
        std::iter::successors(Some(function), move |f| self.function(*f).parent)
    }

    /// Whether `inner` is `outer` or nested inside it.
    pub fn function_within(&self, inner: FunctionId, outer: FunctionId) -> bool {
        self.function_chain(inner).any(|f| f == outer)
    }

    /// The member-level function (method, accessor, ...) that `function` is nested in.
    pub fn member_function(&self, function: FunctionId) -> FunctionId {
        self.function_chain(function).last().unwrap_or(function)
    }

    /// Names of every local and local function declared in `function` or
    /// any function nested in it.
    pub fn names_declared_within(&self, function: FunctionId) -> HashSet<Name> {
        let mut names: HashSet<Name> = self
            .locals
            .iter()
            .filter(|l| self.function_within(l.function, function))
            .map(|l| l.name.clone())
            .collect();
        names.extend(
            self.functions
                .iter()
                .enumerate()
                .filter(|(idx, f)| {
                    f.kind == FunctionKind::LocalFunction && self.function_within(FunctionId(*idx as u32), function)
                })
                .filter_map(|(_, f)| f.name.clone()),
        );
        names
    }
}

struct Builder<'a> {
    file: &'a SourceFile,
    items: &'a ItemTree,
    out: Scopes,
    local_function_ids: HashMap<StmtId, FunctionId>,
    /// Local functions referenced by name inside each function.
    function_refs: HashMap<FunctionId, Vec<FunctionId>>,
}

impl<'a> Builder<'a> {
    fn alloc_scope(&mut self, parent: Option<ScopeId>, function: Option<FunctionId>) -> ScopeId {
        let id = ScopeId(self.out.scopes.len() as u32);
        self.out.scopes.push(ScopeData {
            parent,
            function,
            entries: HashMap::new(),
        });
        id
    }

    fn alloc_function(&mut self, data: FunctionData) -> FunctionId {
        let id = FunctionId(self.out.functions.len() as u32);
        self.out.functions.push(data);
        id
    }

    fn alloc_local(&mut self, data: LocalData) -> LocalId {
        let id = LocalId(self.out.locals.len() as u32);
        self.out.locals_by_offset.insert(data.name_range.start, id);
        self.out.locals.push(data);
        id
    }

    /// Declares a local in a fresh child scope and returns that scope.
    fn declare(&mut self, scope: ScopeId, data: LocalData) -> ScopeId {
        let function = self.out.scopes[scope.idx()].function;
        let name = data.name.clone();
        let local = self.alloc_local(data);
        let child = self.alloc_scope(Some(scope), function);
        self.out.scopes[child.idx()].entries.insert(name, ScopeEntry::Local(local));
        child
    }

    fn member_function(
        &mut self,
        kind: FunctionKind,
        name: Option<Name>,
        owner: Option<TypeId>,
        is_static: bool,
        is_readonly: bool,
        range: TextRange,
    ) -> FunctionId {
        self.alloc_function(FunctionData {
            kind,
            name,
            parent: None,
            owner,
            is_static,
            is_readonly,
            params: Vec::new(),
            type_params: Vec::new(),
            ret: None,
            body: None,
            node: None,
            range,
        })
    }

    fn visit_file(&mut self) {
        let file = self.file;
        for (ordinal, decl) in file.all_types().into_iter().enumerate() {
            let owner = self.items.source_type(ordinal);
            let readonly_type = decl.modifiers.has(Modifier::Readonly);
            for member in &decl.members {
                match member {
                    Member::Field(field) => {
                        for declarator in &field.declarators {
                            let Some(init) = declarator.init else { continue };
                            let f = self.member_function(
                                FunctionKind::FieldInitializer,
                                Some(declarator.name.clone()),
                                owner,
                                field.modifiers.is_static(),
                                true,
                                declarator.range,
                            );
                            self.out.functions[f.idx()].body = Some(NodeId::Expr(init));
                            let root = self.alloc_scope(None, Some(f));
                            self.visit_expr(init, root, f);
                        }
                    }
                    Member::Method(method) => {
                        let kind = if method.ret.is_some() {
                            FunctionKind::Method
                        } else {
                            FunctionKind::Constructor
                        };
                        let f = self.member_function(
                            kind,
                            Some(method.name.clone()),
                            owner,
                            method.modifiers.is_static(),
                            readonly_type || method.modifiers.has(Modifier::Readonly),
                            method.range,
                        );
                        self.visit_function_decl(f, method, None);
                    }
                    Member::Property(property) => {
                        let is_static = property.modifiers.is_static();
                        let readonly = readonly_type || property.modifiers.has(Modifier::Readonly);
                        let params = property.indexer_params.as_deref().unwrap_or_default();
                        match &property.body {
                            PropertyBody::Expr(expr) => {
                                let f = self.member_function(
                                    FunctionKind::ExpressionProperty,
                                    Some(property.name.clone()),
                                    owner,
                                    is_static,
                                    readonly,
                                    property.range,
                                );
                                self.out.functions[f.idx()].ret = Some(property.ty.clone());
                                self.out.functions[f.idx()].body = Some(NodeId::Expr(*expr));
                                let scope = self.function_scope(f, params, None);
                                self.visit_expr(*expr, scope, f);
                            }
                            PropertyBody::Accessors(accessors) => {
                                for accessor in accessors {
                                    let f = self.member_function(
                                        FunctionKind::Accessor,
                                        Some(property.name.clone()),
                                        owner,
                                        is_static,
                                        readonly || accessor.modifiers.has(Modifier::Readonly),
                                        accessor.range,
                                    );
                                    let mut scope = self.function_scope(f, params, None);
                                    if matches!(accessor.kind, AccessorKind::Set | AccessorKind::Init) {
                                        scope = self.declare(
                                            scope,
                                            LocalData {
                                                name: Name::new("value"),
                                                name_range: TextRange::empty(accessor.range.start),
                                                kind: LocalKind::Param,
                                                ty: Some(property.ty.clone()),
                                                ref_kind: RefKind::None,
                                                function: f,
                                                decl: None,
                                                has_initializer: true,
                                            },
                                        );
                                    } else {
                                        self.out.functions[f.idx()].ret = Some(property.ty.clone());
                                    }
                                    self.visit_body(f, accessor.body, scope);
                                }
                            }
                        }
                    }
                    Member::Type(_) | Member::Delegate(_) => {}
                }
            }
        }
    }

    /// Opens the root scope of `f` with `params` declared in it.
    fn function_scope(&mut self, f: FunctionId, params: &[Param], parent: Option<ScopeId>) -> ScopeId {
        let mut scope = self.alloc_scope(parent, Some(f));
        let decl = self.out.functions[f.idx()].node;
        for param in params {
            if let Some(default) = param.default {
                self.visit_expr(default, scope, f);
            }
            let local = LocalData {
                name: param.name.clone(),
                name_range: param.name_range,
                kind: LocalKind::Param,
                ty: param.ty.clone(),
                ref_kind: param_ref_kind(param.modifier),
                function: f,
                decl,
                has_initializer: true,
            };
            scope = self.declare(scope, local);
            let id = LocalId(self.out.locals.len() as u32 - 1);
            self.out.functions[f.idx()].params.push(id);
        }
        scope
    }

    fn visit_function_decl(&mut self, f: FunctionId, decl: &FunctionDecl, parent: Option<ScopeId>) {
        {
            let data = &mut self.out.functions[f.idx()];
            data.type_params = decl.type_params.iter().map(|(n, _)| n.clone()).collect();
            data.ret = decl.ret.clone();
        }
        let scope = self.function_scope(f, &decl.params, parent);
        self.visit_body(f, decl.body, scope);
    }

    fn visit_body(&mut self, f: FunctionId, body: FunctionBody, scope: ScopeId) {
        match body {
            FunctionBody::Block(stmt) => {
                self.out.functions[f.idx()].body = Some(NodeId::Stmt(stmt));
                self.visit_stmt(stmt, scope, f);
            }
            FunctionBody::Expr(expr) => {
                self.out.functions[f.idx()].body = Some(NodeId::Expr(expr));
                self.visit_expr(expr, scope, f);
            }
            FunctionBody::None => {}
        }
    }

    fn record(&mut self, node: NodeId, scope: ScopeId, f: FunctionId) {
        self.out.node_scopes.insert(node, scope);
        self.out.node_functions.insert(node, f);
    }

    /// Allocates functions for the local function statements of a statement
    /// list and makes them visible in `scope`.
    fn predeclare_local_functions(&mut self, stmts: &[StmtId], scope: ScopeId, parent: FunctionId) {
        let owner = self.out.functions[parent.idx()].owner;
        for &stmt in stmts {
            let target = match &self.file.stmt(stmt).kind {
                StmtKind::Labeled { stmt: inner, .. } => *inner,
                _ => stmt,
            };
            let StmtKind::LocalFunction(decl) = &self.file.stmt(target).kind else {
                continue;
            };
            let f = self.alloc_function(FunctionData {
                kind: FunctionKind::LocalFunction,
                name: Some(decl.name.clone()),
                parent: Some(parent),
                owner,
                is_static: decl.modifiers.has(Modifier::Static),
                is_readonly: false,
                params: Vec::new(),
                type_params: Vec::new(),
                ret: None,
                body: None,
                node: Some(NodeId::Stmt(target)),
                range: decl.range,
            });
            self.local_function_ids.insert(target, f);
            self.out.scopes[scope.idx()]
                .entries
                .insert(decl.name.clone(), ScopeEntry::Function(f));
        }
    }

    fn visit_stmt_list(&mut self, stmts: &[StmtId], scope: ScopeId, f: FunctionId) -> ScopeId {
        let mut current = scope;
        for &stmt in stmts {
            current = self.visit_stmt(stmt, current, f);
        }
        current
    }

    /// Visits `stmt` in `scope`; returns the scope in effect after it.
    fn visit_stmt(&mut self, stmt: StmtId, scope: ScopeId, f: FunctionId) -> ScopeId {
        let file = self.file;
        self.record(NodeId::Stmt(stmt), scope, f);
        match &file.stmt(stmt).kind {
            StmtKind::Block(stmts) => {
                let block = self.alloc_scope(Some(scope), Some(f));
                self.predeclare_local_functions(stmts, block, f);
                self.visit_stmt_list(stmts, block, f);
                scope
            }
            StmtKind::LocalDecl {
                is_const,
                ty,
                declarators,
            } => {
                let mut current = scope;
                for declarator in declarators {
                    let local = LocalData {
                        name: declarator.name.clone(),
                        name_range: declarator.name_range,
                        kind: if *is_const { LocalKind::Const } else { LocalKind::Local },
                        ty: (!ty.is_implicit()).then(|| ty.clone()),
                        ref_kind: RefKind::None,
                        function: f,
                        decl: Some(NodeId::Stmt(stmt)),
                        has_initializer: declarator.init.is_some(),
                    };
                    current = self.declare(current, local);
                    if let Some(init) = declarator.init {
                        current = self.visit_expr(init, current, f);
                    }
                }
                current
            }
            StmtKind::LocalFunction(decl) => {
                let local_fn = match self.local_function_ids.get(&stmt) {
                    Some(&id) => id,
                    None => {
                        // An embedded local function (no enclosing block); give it an id now.
                        let tmp = self.alloc_scope(Some(scope), Some(f));
                        self.predeclare_local_functions(&[stmt], tmp, f);
                        match self.local_function_ids.get(&stmt) {
                            Some(&id) => id,
                            None => return scope,
                        }
                    }
                };
                self.visit_function_decl(local_fn, decl, Some(scope));
                scope
            }
            StmtKind::Expr(expr) => self.visit_expr(*expr, scope, f),
            StmtKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                let after_condition = self.visit_expr(*condition, scope, f);
                self.visit_embedded(*then_branch, after_condition, f);
                if let Some(else_branch) = else_branch {
                    self.visit_embedded(*else_branch, after_condition, f);
                }
                after_condition
            }
            StmtKind::While { condition, body } => {
                let inner = self.visit_expr(*condition, scope, f);
                self.visit_embedded(*body, inner, f);
                scope
            }
            StmtKind::DoWhile { body, condition } => {
                self.visit_embedded(*body, scope, f);
                self.visit_expr(*condition, scope, f);
                scope
            }
            StmtKind::For {
                init,
                condition,
                update,
                body,
            } => {
                let for_scope = self.alloc_scope(Some(scope), Some(f));
                let mut inner = self.visit_stmt_list(init, for_scope, f);
                if let Some(condition) = condition {
                    inner = self.visit_expr(*condition, inner, f);
                }
                for expr in update {
                    self.visit_expr(*expr, inner, f);
                }
                self.visit_embedded(*body, inner, f);
                scope
            }
            StmtKind::Foreach {
                ty,
                name,
                name_range,
                iterable,
                body,
            } => {
                self.visit_expr(*iterable, scope, f);
                let inner = self.declare(
                    scope,
                    LocalData {
                        name: name.clone(),
                        name_range: *name_range,
                        kind: LocalKind::Foreach,
                        ty: (!ty.is_implicit()).then(|| ty.clone()),
                        ref_kind: RefKind::None,
                        function: f,
                        decl: Some(NodeId::Stmt(stmt)),
                        has_initializer: true,
                    },
                );
                self.visit_embedded(*body, inner, f);
                scope
            }
            StmtKind::Switch { scrutinee, sections } => {
                let after = self.visit_expr(*scrutinee, scope, f);
                let switch_scope = self.alloc_scope(Some(after), Some(f));
                let all: Vec<StmtId> = sections.iter().flat_map(|s| s.stmts.iter().copied()).collect();
                self.predeclare_local_functions(&all, switch_scope, f);
                let mut current = switch_scope;
                for section in sections {
                    for label in &section.labels {
                        if let carve_syntax::SwitchLabel::Case(expr) = label {
                            self.visit_expr(*expr, current, f);
                        }
                    }
                    current = self.visit_stmt_list(&section.stmts, current, f);
                }
                after
            }
            StmtKind::Return(expr) | StmtKind::Throw(expr) => {
                if let Some(expr) = expr {
                    self.visit_expr(*expr, scope, f);
                }
                scope
            }
            StmtKind::Labeled { stmt: inner, .. } => self.visit_stmt(*inner, scope, f),
            StmtKind::Try {
                body,
                catches,
                finally,
            } => {
                self.visit_embedded(*body, scope, f);
                for clause in catches {
                    let inner = match &clause.name {
                        Some((name, range)) => self.declare(
                            scope,
                            LocalData {
                                name: name.clone(),
                                name_range: *range,
                                kind: LocalKind::Catch,
                                ty: clause.ty.clone(),
                                ref_kind: RefKind::None,
                                function: f,
                                decl: Some(NodeId::Stmt(stmt)),
                                has_initializer: true,
                            },
                        ),
                        None => scope,
                    };
                    self.visit_embedded(clause.body, inner, f);
                }
                if let Some(finally) = finally {
                    self.visit_embedded(*finally, scope, f);
                }
                scope
            }
            StmtKind::Break | StmtKind::Continue | StmtKind::Goto { .. } | StmtKind::Empty => scope,
        }
    }

    /// An embedded statement: whatever it declares does not leak out.
    fn visit_embedded(&mut self, stmt: StmtId, scope: ScopeId, f: FunctionId) {
        let inner = self.alloc_scope(Some(scope), Some(f));
        self.visit_stmt(stmt, inner, f);
    }

    fn declare_designation(
        &mut self,
        designation: &Designation,
        ty: &TypeRef,
        kind: LocalKind,
        expr: ExprId,
        scope: ScopeId,
        f: FunctionId,
    ) -> ScopeId {
        let mut current = scope;
        // `int x` declares a typed local; `var (a, b)` leaves every element implicit.
        let declared_ty = match designation {
            Designation::Single { .. } if !ty.is_implicit() => Some(ty.clone()),
            _ => None,
        };
        for (name, range) in designation.names() {
            current = self.declare(
                current,
                LocalData {
                    name: name.clone(),
                    name_range: range,
                    kind,
                    ty: declared_ty.clone(),
                    ref_kind: RefKind::None,
                    function: f,
                    decl: Some(NodeId::Expr(expr)),
                    has_initializer: false,
                },
            );
        }
        current
    }

    fn visit_args(&mut self, args: &[Argument], scope: ScopeId, f: FunctionId) -> ScopeId {
        let mut current = scope;
        for arg in args {
            let is_out = arg.modifier == Some(ArgModifier::Out);
            match &self.file.expr(arg.expr).kind {
                ExprKind::Declaration { ty, designation } if is_out => {
                    self.record(NodeId::Expr(arg.expr), current, f);
                    current = self.declare_designation(designation, ty, LocalKind::OutVar, arg.expr, current, f);
                }
                _ => current = self.visit_expr(arg.expr, current, f),
            }
        }
        current
    }

    fn visit_pattern(&mut self, pattern: &Pattern, expr: ExprId, scope: ScopeId, f: FunctionId) -> ScopeId {
        match &pattern.kind {
            PatternKind::Constant(constant) => self.visit_expr(*constant, scope, f),
            PatternKind::Type(_) => scope,
            PatternKind::Declaration { ty, name, name_range } => self.declare(
                scope,
                LocalData {
                    name: name.clone(),
                    name_range: *name_range,
                    kind: LocalKind::PatternVar,
                    ty: (!ty.is_implicit()).then(|| ty.clone()),
                    ref_kind: RefKind::None,
                    function: f,
                    decl: Some(NodeId::Expr(expr)),
                    has_initializer: true,
                },
            ),
            PatternKind::Not(inner) => self.visit_pattern(inner, expr, scope, f),
        }
    }

    /// Visits `expr` in `scope`; returns the scope in effect after it, which
    /// includes any designations the expression introduced.
    fn visit_expr(&mut self, expr: ExprId, scope: ScopeId, f: FunctionId) -> ScopeId {
        let file = self.file;
        self.record(NodeId::Expr(expr), scope, f);
        match &file.expr(expr).kind {
            ExprKind::Name { name, .. } => {
                let resolution = self.resolve_name(scope, f, name);
                if let Resolution::LocalFunction(target) = resolution {
                    self.function_refs.entry(f).or_default().push(target);
                }
                self.out.resolutions.insert(expr, resolution);
                scope
            }
            ExprKind::Declaration { ty, designation } => {
                self.declare_designation(designation, ty, LocalKind::Deconstruction, expr, scope, f)
            }
            ExprKind::Is { expr: operand, pattern } => {
                let after = self.visit_expr(*operand, scope, f);
                self.visit_pattern(pattern, expr, after, f)
            }
            ExprKind::Invocation { callee, args } => {
                let after = self.visit_expr(*callee, scope, f);
                self.visit_args(args, after, f)
            }
            ExprKind::ElementAccess { receiver, args, .. } => {
                let after = self.visit_expr(*receiver, scope, f);
                self.visit_args(args, after, f)
            }
            ExprKind::New { args, .. } | ExprKind::Tuple(args) => self.visit_args(args, scope, f),
            ExprKind::Lambda { is_static, params, body } => {
                let owner = self.out.functions[f.idx()].owner;
                let lambda = self.alloc_function(FunctionData {
                    kind: FunctionKind::Lambda,
                    name: None,
                    parent: Some(f),
                    owner,
                    is_static: *is_static,
                    is_readonly: false,
                    params: Vec::new(),
                    type_params: Vec::new(),
                    ret: None,
                    body: None,
                    node: Some(NodeId::Expr(expr)),
                    range: file.expr(expr).range,
                });
                let inner = self.function_scope(lambda, params, Some(scope));
                match body {
                    LambdaBody::Expr(body) => {
                        self.out.functions[lambda.idx()].body = Some(NodeId::Expr(*body));
                        self.visit_expr(*body, inner, lambda);
                    }
                    LambdaBody::Block(body) => {
                        self.out.functions[lambda.idx()].body = Some(NodeId::Stmt(*body));
                        self.visit_stmt(*body, inner, lambda);
                    }
                }
                scope
            }
            _ => {
                let mut current = scope;
                for child in file.children(NodeId::Expr(expr)) {
                    if let NodeId::Expr(child) = child {
                        current = self.visit_expr(child, current, f);
                    }
                }
                current
            }
        }
    }

    fn resolve_name(&self, scope: ScopeId, f: FunctionId, name: &Name) -> Resolution {
        match self.out.resolve_in_scope(scope, name.as_str()) {
            Some(ScopeEntry::Local(local)) => return Resolution::Local(local),
            Some(ScopeEntry::Function(function)) => return Resolution::LocalFunction(function),
            None => {}
        }
        let mut owner = self.out.functions[f.idx()].owner;
        while let Some(ty) = owner {
            if let Some(found) = self.resolve_member(ty, name) {
                return found;
            }
            owner = self.items.ty(ty).outer;
        }
        if let Some(ty) = self.items.type_by_name(name.as_str()) {
            return Resolution::Type(ty);
        }
        if self.is_namespace(name.as_str()) {
            return Resolution::Namespace(name.clone());
        }
        Resolution::Unresolved
    }

    /// Looks `name` up among the members of `ty` and its base classes.
    fn resolve_member(&self, ty: TypeId, name: &Name) -> Option<Resolution> {
        let self_ty = self.items.ty(ty).self_ty();
        for current in self.items.base_chain(&self_ty) {
            let Some(id) = self.items.type_of(&current) else { continue };
            let item = self.items.ty(id);
            if let Some(index) = item.fields.iter().position(|f| &f.name == name) {
                return Some(Resolution::Field { owner: id, index });
            }
            if let Some(index) = item.properties.iter().position(|p| &p.name == name && !p.is_indexer) {
                return Some(Resolution::Property { owner: id, index });
            }
            if item.methods.iter().any(|m| &m.name == name) {
                return Some(Resolution::Methods {
                    owner: id,
                    name: name.clone(),
                });
            }
            for (nested_id, nested) in self.items.iter() {
                if nested.outer == Some(id) && &nested.name == name {
                    return Some(Resolution::Type(nested_id));
                }
            }
        }
        None
    }

    fn is_namespace(&self, name: &str) -> bool {
        let root = |ns: &str| ns.split('.').next() == Some(name);
        library::NAMESPACES.iter().any(|ns| root(ns))
            || self
                .items
                .iter()
                .filter_map(|(_, t)| t.namespace.as_ref())
                .any(|ns| root(ns.as_str()))
    }

    fn finish(mut self) -> Scopes {
        let count = self.out.functions.len();
        let mut captures: Vec<HashSet<LocalId>> = vec![HashSet::new(); count];

        for (&expr, resolution) in &self.out.resolutions {
            let Resolution::Local(local) = resolution else { continue };
            let Some(&user) = self.out.node_functions.get(&NodeId::Expr(expr)) else { continue };
            let owner = self.out.locals[local.idx()].function;
            for f in self.out.function_chain(user) {
                if f == owner {
                    break;
                }
                captures[f.idx()].insert(*local);
            }
        }

        // Calling a local function captures what it captures, minus what the caller owns.
        loop {
            let mut changed = false;
            for (&caller, callees) in &self.function_refs {
                for &callee in callees {
                    let inherited: Vec<LocalId> = captures[callee.idx()].iter().copied().collect();
                    for local in inherited {
                        let owner = self.out.locals[local.idx()].function;
                        for f in self.out.function_chain(caller) {
                            if self.out.function_within(owner, f) {
                                break;
                            }
                            changed |= captures[f.idx()].insert(local);
                        }
                    }
                }
            }
            if !changed {
                break;
            }
        }

        self.out.captures = captures
            .into_iter()
            .map(|set| {
                let mut list: Vec<LocalId> = set.into_iter().collect();
                list.sort();
                list
            })
            .collect();
        tracing::debug!(
            target: "carve.sema",
            locals = self.out.locals.len(),
            functions = count,
            "built scopes"
        );
        self.out
    }
}

#[cfg(test)]
mod tests {
    use carve_syntax::parse;
    use pretty_assertions::assert_eq;

    use super::*;

    fn build(text: &str) -> (SourceFile, Scopes) {
        let file = parse(text);
        let items = ItemTree::lower(&file);
        let scopes = Scopes::build(&file, &items);
        (file, scopes)
    }

    fn resolution_of(file: &SourceFile, scopes: &Scopes, offset: usize) -> Resolution {
        let id = file
            .expr_ids()
            .find(|&e| file.expr(e).range.start == offset && matches!(file.expr(e).kind, ExprKind::Name { .. }))
            .unwrap_or_else(|| panic!("no name at {offset}"));
        scopes.resolution(id).cloned().unwrap()
    }

    #[test]
    fn locals_shadow_members_and_out_vars_leak() {
        let text = "class C { int x; void M() { x = 1; int x = 2; if (int.TryParse(\"\", out var y)) { } y = x; } }";
        let (file, scopes) = build(text);
        let first = text.find("x = 1").unwrap();
        assert!(matches!(
            resolution_of(&file, &scopes, first),
            Resolution::Field { .. }
        ));
        let later = text.find("y = x").unwrap();
        let Resolution::Local(y) = resolution_of(&file, &scopes, later) else {
            panic!("y should resolve to a local");
        };
        assert_eq!(scopes.local(y).kind, LocalKind::OutVar);
        let Resolution::Local(x) = resolution_of(&file, &scopes, later + 4) else {
            panic!("x should resolve to a local");
        };
        assert_eq!(scopes.local(x).kind, LocalKind::Local);
    }

    #[test]
    fn local_functions_are_visible_in_the_whole_block() {
        let text = "class C { void M() { Local(); void Local() { } } }";
        let (file, scopes) = build(text);
        let offset = text.find("Local()").unwrap();
        assert!(matches!(
            resolution_of(&file, &scopes, offset),
            Resolution::LocalFunction(_)
        ));
    }

    #[test]
    fn captures_include_called_local_functions() {
        let text = "class C { void M() { int a = 0; int b = 0; void F() { a++; } void G() { F(); b++; } G(); } }";
        let (_, scopes) = build(text);
        let g = scopes
            .functions()
            .find(|(_, f)| f.name.as_ref().is_some_and(|n| n == "G"))
            .map(|(id, _)| id)
            .unwrap();
        let names: Vec<&str> = scopes.captures(g).iter().map(|l| scopes.local(*l).name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn names_resolve_to_types_and_namespaces() {
        let text = "class C { void M() { System.Console.WriteLine(); Console.WriteLine(); } }";
        let (file, scopes) = build(text);
        assert_eq!(
            resolution_of(&file, &scopes, text.find("System").unwrap()),
            Resolution::Namespace(Name::new("System"))
        );
        let console = text.rfind("Console").unwrap();
        assert!(matches!(
            resolution_of(&file, &scopes, console),
            Resolution::Type(_)
        ));
    }

    #[test]
    fn lambda_parameters_belong_to_the_lambda() {
        let text = "class C { void M() { System.Func<int, int> f = x => x + 1; } }";
        let (_, scopes) = build(text);
        let (x, data) = scopes.locals().find(|(_, l)| l.name == "x").unwrap();
        let lambda = scopes.function(data.function);
        assert_eq!(lambda.kind, FunctionKind::Lambda);
        assert_eq!(lambda.params, vec![x]);
        assert!(scopes.names_declared_within(lambda.parent.unwrap()).contains("x"));
    }
}
