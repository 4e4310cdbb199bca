//! Expression typing and call binding.
//!
//! Bodies are typed in source order. Lambda arguments have no type of their
//! own: overload resolution binds them through [`LambdaOracle`], which types
//! the body against each candidate's parameter types in a throwaway typer.
//! Once a call resolves, the lambda body is typed for real against the
//! chosen delegate type.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

use carve_core::Name;
use carve_syntax::{
    Argument, ArgModifier, AssignOp, BinaryOp, Designation, ExprId, ExprKind, LiteralKind, NodeId,
    PatternKind, SourceFile, StmtId, StmtKind, SwitchLabel, TypeRef, UnaryOp,
};
use carve_types::{
    argument_conversion, implicit_conversion, resolve_overload, ArgTy, CallArg, Conversion, LambdaArg, LambdaBinding,
    OverloadResolution, ParamSig, Prim, RefKind, Signature, TupleElem, Ty, TypeEnv,
};

use crate::items::{lower_params, lower_predefined, lower_type_ref, ItemTree, MethodItem, TypeId};
use crate::scopes::{FunctionId, FunctionKind, LocalId, Resolution, Scopes};

/// A compile-time constant value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Constant {
    Int(i64),
    Bool(bool),
}

impl Constant {
    pub fn as_int(self) -> Option<i64> {
        match self {
            Constant::Int(value) => Some(value),
            Constant::Bool(_) => None,
        }
    }

    pub fn as_bool(self) -> Option<bool> {
        match self {
            Constant::Bool(value) => Some(value),
            Constant::Int(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExprInfo {
    /// The natural type. `Ty::Null` for the null literal, `Ty::Unknown` for
    /// lambdas and method groups.
    pub ty: Ty,
    /// The type the context converts the expression to, when it has one.
    pub converted: Option<Ty>,
    pub constant: Option<Constant>,
}

impl ExprInfo {
    pub fn converted_or_natural(&self) -> &Ty {
        self.converted.as_ref().unwrap_or(&self.ty)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodKey {
    pub owner: TypeId,
    pub index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallTarget {
    Method(MethodKey),
    LocalFunction(FunctionId),
    /// Invocation of a delegate-typed value.
    Delegate(Ty),
    Constructor { owner: TypeId, index: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallBinding {
    pub target: CallTarget,
    pub type_args: Vec<Ty>,
    /// Instantiated parameter type for each argument, in argument order.
    pub param_types: Vec<Ty>,
    pub ret: Ty,
    pub conversions: Vec<Option<Conversion>>,
}

/// The member a name or member access binds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberRef {
    Field { owner: TypeId, index: usize },
    Property { owner: TypeId, index: usize },
    Method(MethodKey),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindErrorKind {
    Ambiguous,
    NoApplicable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindError {
    pub expr: ExprId,
    pub kind: BindErrorKind,
}

#[derive(Debug, Clone, Default)]
pub struct TypeTables {
    pub exprs: HashMap<ExprId, ExprInfo>,
    pub locals: HashMap<LocalId, Ty>,
    pub local_constants: HashMap<LocalId, Constant>,
    /// Keyed by the invocation or object creation expression.
    pub calls: HashMap<ExprId, CallBinding>,
    pub members: HashMap<ExprId, MemberRef>,
    pub errors: Vec<BindError>,
    /// Return type of every typed function; lambdas get their delegate's.
    pub returns: HashMap<FunctionId, Ty>,
}

/// Types every body in the file.
pub fn infer(file: &SourceFile, items: &ItemTree, scopes: &Scopes) -> TypeTables {
    let cx = Cx { file, items, scopes };
    let mut typer = Typer::new(cx, HashMap::new());
    let members: Vec<FunctionId> = scopes
        .functions()
        .filter(|(_, f)| f.parent.is_none())
        .map(|(id, _)| id)
        .collect();
    for function in members {
        typer.function_body(function);
    }
    // Lambdas no call ever bound, and local functions nothing reached.
    let rest: Vec<FunctionId> = scopes.functions().map(|(id, _)| id).collect();
    for function in rest {
        if !typer.typed.contains(&function) {
            if scopes.function(function).kind == FunctionKind::Lambda {
                let params = typer.lambda_explicit_params(function).unwrap_or_default();
                typer.bind_lambda(function, &params, None);
            } else {
                typer.function_body(function);
            }
        }
    }
    tracing::debug!(
        target: "carve.sema",
        exprs = typer.tables.exprs.len(),
        calls = typer.tables.calls.len(),
        errors = typer.tables.errors.len(),
        "typed file"
    );
    typer.tables
}

#[derive(Clone, Copy)]
struct Cx<'a> {
    file: &'a SourceFile,
    items: &'a ItemTree,
    scopes: &'a Scopes,
}

/// A receiver as member lookup sees it.
#[derive(Debug, Clone)]
enum Operand {
    Value(Ty),
    Type(Ty),
    Namespace(String),
}

/// Per-function return bookkeeping.
struct Frame {
    function: FunctionId,
    expected: Option<Ty>,
    returns: Vec<(Ty, Option<i64>)>,
}

/// How an argument looks before its call is resolved.
enum ArgShape {
    Expr { ty: Ty, constant: Option<i64> },
    Null,
    Lambda(FunctionId),
    /// `out var x` / `out T x`
    OutVar { ty: Ty, locals: Vec<LocalId> },
}

struct Typer<'a> {
    cx: Cx<'a>,
    tables: TypeTables,
    frames: Vec<Frame>,
    typed: HashSet<FunctionId>,
}

impl<'a> Typer<'a> {
    fn new(cx: Cx<'a>, locals: HashMap<LocalId, Ty>) -> Self {
        Typer {
            cx,
            tables: TypeTables {
                locals,
                ..TypeTables::default()
            },
            frames: Vec::new(),
            typed: HashSet::new(),
        }
    }

    fn record(&mut self, expr: ExprId, ty: Ty, converted: Option<&Ty>, constant: Option<Constant>) {
        let converted = converted.filter(|t| !t.is_unknown() && !t.is_void()).cloned();
        self.tables.exprs.insert(
            expr,
            ExprInfo {
                ty,
                converted,
                constant,
            },
        );
    }

    fn set_converted(&mut self, expr: ExprId, to: &Ty) {
        if to.is_unknown() {
            return;
        }
        if let Some(info) = self.tables.exprs.get_mut(&expr) {
            info.converted = Some(to.clone());
        }
    }

    fn constant_of(&self, expr: ExprId) -> Option<Constant> {
        self.tables.exprs.get(&expr).and_then(|i| i.constant)
    }

    fn int_constant(&self, expr: ExprId) -> Option<i64> {
        self.constant_of(expr).and_then(Constant::as_int)
    }

    fn type_params_in_scope(&self, function: FunctionId) -> Vec<Name> {
        let scopes = self.cx.scopes;
        let mut out: Vec<Name> = scopes
            .function_chain(function)
            .flat_map(|f| scopes.function(f).type_params.iter().cloned())
            .collect();
        let mut owner = scopes.function(function).owner;
        while let Some(id) = owner {
            let item = self.cx.items.ty(id);
            out.extend(item.type_params.iter().cloned());
            owner = item.outer;
        }
        out
    }

    fn lower(&self, ty: &TypeRef, function: FunctionId) -> Ty {
        lower_type_ref(ty, &self.type_params_in_scope(function))
    }

    fn local_ty(&mut self, local: LocalId) -> Ty {
        if let Some(ty) = self.tables.locals.get(&local) {
            return ty.clone();
        }
        let data = self.cx.scopes.local(local);
        match &data.ty {
            Some(ty) => {
                let lowered = self.lower(ty, data.function);
                self.tables.locals.insert(local, lowered.clone());
                lowered
            }
            None => Ty::Unknown,
        }
    }

    fn set_local(&mut self, local: LocalId, ty: Ty) {
        self.tables.locals.insert(local, ty);
    }

    fn owner_ty(&self, function: FunctionId) -> Ty {
        self.cx
            .scopes
            .function(function)
            .owner
            .map_or(Ty::Unknown, |id| self.cx.items.ty(id).self_ty())
    }

    fn function_of(&self, expr: ExprId) -> Option<FunctionId> {
        self.cx.scopes.function_of(NodeId::Expr(expr))
    }

    fn declared_return(&self, function: FunctionId) -> Option<Ty> {
        let data = self.cx.scopes.function(function);
        match data.kind {
            FunctionKind::Constructor => Some(Ty::Void),
            FunctionKind::Lambda | FunctionKind::FieldInitializer => None,
            FunctionKind::Accessor => Some(data.ret.as_ref().map_or(Ty::Void, |r| self.lower(r, function))),
            FunctionKind::Method | FunctionKind::LocalFunction | FunctionKind::ExpressionProperty => {
                Some(data.ret.as_ref().map_or(Ty::Void, |r| self.lower(r, function)))
            }
        }
    }

    fn function_body(&mut self, function: FunctionId) {
        if !self.typed.insert(function) {
            return;
        }
        let expected = self.declared_return(function);
        let body = self.cx.scopes.function(function).body;
        self.frames.push(Frame {
            function,
            expected: expected.clone(),
            returns: Vec::new(),
        });
        match body {
            Some(NodeId::Stmt(stmt)) => self.stmt(stmt),
            Some(NodeId::Expr(expr)) => {
                let target = expected.as_ref().filter(|t| !t.is_void());
                self.expr(expr, target);
            }
            None => {}
        }
        self.frames.pop();
        self.tables.returns.insert(function, expected.unwrap_or(Ty::Unknown));
    }

    fn lambda_explicit_params(&self, function: FunctionId) -> Option<Vec<Ty>> {
        let scopes = self.cx.scopes;
        let params = &scopes.function(function).params;
        let mut out = Vec::with_capacity(params.len());
        for local in params {
            let ty = scopes.local(*local).ty.as_ref()?;
            out.push(self.lower(ty, function));
        }
        Some(out)
    }

    /// Types a lambda body with the given parameter types. `ret` is the
    /// delegate's return type when the lambda is target-typed.
    fn bind_lambda(&mut self, function: FunctionId, params: &[Ty], ret: Option<Ty>) -> Vec<(Ty, Option<i64>)> {
        self.typed.insert(function);
        let data = self.cx.scopes.function(function);
        let explicit = self.lambda_explicit_params(function);
        for (idx, local) in data.params.iter().enumerate() {
            let ty = explicit
                .as_ref()
                .and_then(|e| e.get(idx).cloned())
                .or_else(|| params.get(idx).cloned())
                .unwrap_or(Ty::Unknown);
            self.set_local(*local, ty);
        }
        let expected = ret.clone().filter(|t| !t.is_void());
        self.frames.push(Frame {
            function,
            expected: expected.clone(),
            returns: Vec::new(),
        });
        match data.body {
            Some(NodeId::Expr(body)) => {
                let ty = self.expr(body, expected.as_ref());
                let constant = self.int_constant(body);
                if let Some(frame) = self.frames.last_mut() {
                    frame.returns.push((ty, constant));
                }
            }
            Some(NodeId::Stmt(body)) => self.stmt(body),
            None => {}
        }
        let frame = self.frames.pop();
        self.tables.returns.insert(function, ret.unwrap_or(Ty::Unknown));
        frame.map(|f| f.returns).unwrap_or_default()
    }

    // Statements

    fn stmt(&mut self, stmt: StmtId) {
        let file = self.cx.file;
        let Some(function) = self.cx.scopes.function_of(NodeId::Stmt(stmt)) else {
            return;
        };
        match &file.stmt(stmt).kind {
            StmtKind::Block(stmts) => {
                for s in stmts {
                    self.stmt(*s);
                }
            }
            StmtKind::LocalDecl {
                is_const,
                ty,
                declarators,
            } => {
                let declared = (!ty.is_implicit()).then(|| self.lower(ty, function));
                for declarator in declarators {
                    let local = self.cx.scopes.local_declared_at(declarator.name_range.start);
                    let Some(init) = declarator.init else { continue };
                    let init_ty = self.expr(init, declared.as_ref());
                    if let Some(local) = local {
                        if declared.is_none() {
                            self.set_local(local, var_type(init_ty));
                        }
                        if *is_const {
                            if let Some(constant) = self.constant_of(init) {
                                self.tables.local_constants.insert(local, constant);
                            }
                        }
                    }
                }
            }
            StmtKind::LocalFunction(_) => {
                if let Some(local_fn) = self.cx.scopes.function_declared_by(NodeId::Stmt(stmt)) {
                    self.function_body(local_fn);
                }
            }
            StmtKind::Expr(expr) => {
                self.expr(*expr, None);
            }
            StmtKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                self.expr(*condition, Some(&Ty::bool()));
                self.stmt(*then_branch);
                if let Some(else_branch) = else_branch {
                    self.stmt(*else_branch);
                }
            }
            StmtKind::While { condition, body } => {
                self.expr(*condition, Some(&Ty::bool()));
                self.stmt(*body);
            }
            StmtKind::DoWhile { body, condition } => {
                self.stmt(*body);
                self.expr(*condition, Some(&Ty::bool()));
            }
            StmtKind::For {
                init,
                condition,
                update,
                body,
            } => {
                for s in init {
                    self.stmt(*s);
                }
                if let Some(condition) = condition {
                    self.expr(*condition, Some(&Ty::bool()));
                }
                for e in update {
                    self.expr(*e, None);
                }
                self.stmt(*body);
            }
            StmtKind::Foreach {
                ty,
                name_range,
                iterable,
                body,
                ..
            } => {
                let collection = self.expr(*iterable, None);
                let element = if ty.is_implicit() {
                    element_type(&collection)
                } else {
                    self.lower(ty, function)
                };
                if let Some(local) = self.cx.scopes.local_declared_at(name_range.start) {
                    self.set_local(local, element);
                }
                self.stmt(*body);
            }
            StmtKind::Switch { scrutinee, sections } => {
                let ty = self.expr(*scrutinee, None);
                for section in sections {
                    for label in &section.labels {
                        if let SwitchLabel::Case(expr) = label {
                            self.expr(*expr, Some(&ty));
                        }
                    }
                    for s in &section.stmts {
                        self.stmt(*s);
                    }
                }
            }
            StmtKind::Return(expr) => {
                let Some(expr) = expr else { return };
                let expected = self
                    .frames
                    .iter()
                    .rev()
                    .find(|f| f.function == function)
                    .and_then(|f| f.expected.clone());
                let ty = self.expr(*expr, expected.as_ref());
                let constant = self.int_constant(*expr);
                if let Some(frame) = self.frames.iter_mut().rev().find(|f| f.function == function) {
                    frame.returns.push((ty, constant));
                }
            }
            StmtKind::Throw(expr) => {
                if let Some(expr) = expr {
                    self.expr(*expr, None);
                }
            }
            StmtKind::Labeled { stmt: inner, .. } => self.stmt(*inner),
            StmtKind::Try {
                body,
                catches,
                finally,
            } => {
                self.stmt(*body);
                for clause in catches {
                    if let Some((_, range)) = &clause.name {
                        let ty = clause
                            .ty
                            .as_ref()
                            .map_or_else(|| Ty::named("Exception", vec![]), |t| self.lower(t, function));
                        if let Some(local) = self.cx.scopes.local_declared_at(range.start) {
                            self.set_local(local, ty);
                        }
                    }
                    self.stmt(clause.body);
                }
                if let Some(finally) = finally {
                    self.stmt(*finally);
                }
            }
            StmtKind::Break | StmtKind::Continue | StmtKind::Goto { .. } | StmtKind::Empty => {}
        }
    }

    // Expressions

    fn expr(&mut self, expr: ExprId, expected: Option<&Ty>) -> Ty {
        let (ty, constant) = self.expr_inner(expr, expected);
        self.record(expr, ty.clone(), expected, constant);
        ty
    }

    fn expr_inner(&mut self, expr: ExprId, expected: Option<&Ty>) -> (Ty, Option<Constant>) {
        let file = self.cx.file;
        let function = self.function_of(expr);
        let node = file.expr(expr);
        match &node.kind {
            ExprKind::Literal(kind) => literal(*kind, file.text_of(node.range)),
            ExprKind::Default(ty) => {
                let ty = match (ty, function) {
                    (Some(ty), Some(f)) => self.lower(ty, f),
                    _ => expected.cloned().unwrap_or(Ty::Unknown),
                };
                (ty, None)
            }
            ExprKind::Name { .. } => self.name(expr),
            ExprKind::PredefinedType(p) => (lower_predefined(*p), None),
            ExprKind::This => (function.map_or(Ty::Unknown, |f| self.owner_ty(f)), None),
            ExprKind::Base => {
                let owner = function.map_or(Ty::Unknown, |f| self.owner_ty(f));
                (self.cx.items.base_class(&owner).unwrap_or(Ty::Object), None)
            }
            ExprKind::Member { .. } => match self.operand(expr) {
                Operand::Value(ty) | Operand::Type(ty) => (ty, None),
                Operand::Namespace(_) => (Ty::Unknown, None),
            },
            ExprKind::ElementAccess {
                receiver,
                args,
                conditional,
            } => {
                let receiver_ty = self.expr(*receiver, None);
                let arg_tys: Vec<Ty> = args.iter().map(|a| self.expr(a.expr, None)).collect();
                let ty = self.element_access(expr, &receiver_ty, &arg_tys);
                (if *conditional { ty.make_nullable() } else { ty }, None)
            }
            ExprKind::Invocation { callee, args } => (self.invocation(expr, *callee, args), None),
            ExprKind::New { ty, args } => {
                let ty = function.map_or(Ty::Unknown, |f| self.lower(ty, f));
                self.object_creation(expr, &ty, args);
                (ty, None)
            }
            ExprKind::NewArray { element, size, items } => {
                let element = function.map_or(Ty::Unknown, |f| self.lower(element, f));
                if let Some(size) = size {
                    self.expr(*size, Some(&Ty::int()));
                }
                for item in items {
                    self.expr(*item, Some(&element));
                }
                (Ty::Array(Box::new(element)), None)
            }
            ExprKind::Tuple(args) => (self.tuple(args, expected), None),
            ExprKind::Paren(inner) => {
                let ty = self.expr(*inner, expected);
                (ty, self.constant_of(*inner))
            }
            ExprKind::Cast { ty, expr: operand } => {
                let target = function.map_or(Ty::Unknown, |f| self.lower(ty, f));
                self.expr(*operand, None);
                let constant = match (&target, self.constant_of(*operand)) {
                    (Ty::Prim(p), Some(Constant::Int(v))) if p.is_integral() => Some(Constant::Int(v)),
                    _ => None,
                };
                (target, constant)
            }
            ExprKind::Unary { op, expr: operand } => self.unary(*op, *operand),
            ExprKind::Binary { op, lhs, rhs } => self.binary(*op, *lhs, *rhs),
            ExprKind::Range { start, end } => {
                for bound in [start, end].into_iter().flatten() {
                    self.expr(*bound, None);
                }
                (Ty::named("Range", vec![]), None)
            }
            ExprKind::Is { expr: operand, pattern } => {
                let operand_ty = self.expr(*operand, None);
                match &pattern.kind {
                    PatternKind::Declaration { ty, name_range, .. } => {
                        let declared = if ty.is_implicit() {
                            operand_ty
                        } else {
                            function.map_or(Ty::Unknown, |f| self.lower(ty, f))
                        };
                        if let Some(local) = self.cx.scopes.local_declared_at(name_range.start) {
                            self.set_local(local, declared);
                        }
                    }
                    PatternKind::Constant(constant) => {
                        self.expr(*constant, Some(&operand_ty));
                    }
                    PatternKind::Not(inner) => {
                        if let PatternKind::Constant(constant) = &inner.kind {
                            self.expr(*constant, Some(&operand_ty));
                        }
                    }
                    PatternKind::Type(_) => {}
                }
                (Ty::bool(), None)
            }
            ExprKind::As { expr: operand, ty } => {
                self.expr(*operand, None);
                let target = function.map_or(Ty::Unknown, |f| self.lower(ty, f));
                (target.make_nullable(), None)
            }
            ExprKind::Conditional {
                condition,
                then_expr,
                else_expr,
            } => {
                self.expr(*condition, Some(&Ty::bool()));
                let a = self.expr(*then_expr, None);
                let b = self.expr(*else_expr, None);
                let ty = self.conditional_type(&a, &b, expected);
                self.set_converted(*then_expr, &ty);
                self.set_converted(*else_expr, &ty);
                (ty, None)
            }
            ExprKind::Assign { op, lhs, rhs } => (self.assignment(*op, *lhs, *rhs), None),
            ExprKind::Lambda { .. } => {
                let Some(lambda) = self.cx.scopes.function_declared_by(NodeId::Expr(expr)) else {
                    return (Ty::Unknown, None);
                };
                match expected.and_then(|t| self.cx.items.delegate_signature(t.strip_nullable())) {
                    Some(sig) => {
                        self.bind_lambda(lambda, &sig.params, Some(sig.ret));
                    }
                    None => {
                        let params = self.lambda_explicit_params(lambda).unwrap_or_default();
                        self.bind_lambda(lambda, &params, None);
                    }
                }
                (Ty::Unknown, None)
            }
            ExprKind::Declaration { ty, .. } => (function.map_or(Ty::Unknown, |f| self.lower(ty, f)), None),
            ExprKind::NameOf(inner) => {
                self.expr(*inner, None);
                (Ty::String, None)
            }
            ExprKind::Throw(inner) => {
                self.expr(*inner, None);
                (Ty::Unknown, None)
            }
            ExprKind::Error => (Ty::Unknown, None),
        }
    }

    fn name(&mut self, expr: ExprId) -> (Ty, Option<Constant>) {
        let items = self.cx.items;
        match self.cx.scopes.resolution(expr).cloned() {
            Some(Resolution::Local(local)) => {
                let constant = self.tables.local_constants.get(&local).copied();
                (self.local_ty(local), constant)
            }
            Some(Resolution::Field { owner, index }) => {
                self.tables.members.insert(expr, MemberRef::Field { owner, index });
                (items.ty(owner).fields[index].ty.clone(), None)
            }
            Some(Resolution::Property { owner, index }) => {
                self.tables.members.insert(expr, MemberRef::Property { owner, index });
                (items.ty(owner).properties[index].ty.clone(), None)
            }
            Some(Resolution::Type(id)) => (items.ty(id).self_ty(), None),
            _ => (Ty::Unknown, None),
        }
    }

    /// Classifies `expr` as a value, a type or a namespace, typing it when it is a value.
    fn operand(&mut self, expr: ExprId) -> Operand {
        let file = self.cx.file;
        let items = self.cx.items;
        match &file.expr(expr).kind {
            ExprKind::Name { .. } => match self.cx.scopes.resolution(expr) {
                Some(Resolution::Type(id)) => {
                    let ty = items.ty(*id).self_ty();
                    self.record(expr, ty.clone(), None, None);
                    Operand::Type(ty)
                }
                Some(Resolution::Namespace(name)) => Operand::Namespace(name.to_string()),
                _ => Operand::Value(self.expr(expr, None)),
            },
            ExprKind::PredefinedType(p) => {
                let ty = lower_predefined(*p);
                self.record(expr, ty.clone(), None, None);
                Operand::Type(ty)
            }
            ExprKind::Member {
                receiver,
                name,
                conditional,
                ..
            } => {
                let receiver = self.operand(*receiver);
                if let Operand::Namespace(ns) = &receiver {
                    let qualified = format!("{ns}.{name}");
                    let in_namespace = items
                        .iter()
                        .find(|(_, t)| &t.name == name && t.namespace.as_ref().is_some_and(|n| n == ns.as_str()));
                    return match in_namespace {
                        Some((_, item)) => {
                            let ty = item.self_ty();
                            self.record(expr, ty.clone(), None, None);
                            Operand::Type(ty)
                        }
                        None => Operand::Namespace(qualified),
                    };
                }
                if let Operand::Type(outer) = &receiver {
                    let nested = items.type_of(outer).and_then(|outer_id| {
                        items
                            .iter()
                            .find(|(_, t)| t.outer == Some(outer_id) && &t.name == name)
                            .map(|(_, t)| t.self_ty())
                    });
                    if let Some(ty) = nested {
                        self.record(expr, ty.clone(), None, None);
                        return Operand::Type(ty);
                    }
                }
                let ty = self.member_access(expr, &receiver, name);
                let ty = if *conditional { ty.make_nullable() } else { ty };
                self.record(expr, ty.clone(), None, None);
                Operand::Value(ty)
            }
            _ => Operand::Value(self.expr(expr, None)),
        }
    }

    /// Field or property `name` on the receiver; method groups type as unknown.
    fn member_access(&mut self, expr: ExprId, receiver: &Operand, name: &Name) -> Ty {
        let items = self.cx.items;
        let (ty, want_static) = match receiver {
            Operand::Value(ty) => (ty.strip_nullable().clone(), false),
            Operand::Type(ty) => (ty.clone(), true),
            Operand::Namespace(_) => return Ty::Unknown,
        };
        for base in items.base_chain(&ty) {
            let Some(id) = items.type_of(&base) else { continue };
            let item = items.ty(id);
            let subst = items.substitution(&base);
            if let Some(index) = item.fields.iter().position(|f| &f.name == name && f.is_static == want_static) {
                self.tables.members.insert(expr, MemberRef::Field { owner: id, index });
                return item.fields[index].ty.substitute(&subst);
            }
            if let Some(index) = item
                .properties
                .iter()
                .position(|p| &p.name == name && !p.is_indexer && p.is_static == want_static)
            {
                self.tables.members.insert(expr, MemberRef::Property { owner: id, index });
                return item.properties[index].ty.substitute(&subst);
            }
        }
        Ty::Unknown
    }

    fn element_access(&mut self, expr: ExprId, receiver: &Ty, args: &[Ty]) -> Ty {
        let items = self.cx.items;
        if args.len() == 1 && matches!(args[0].named_parts(), Some((name, _)) if name == "Range") {
            return receiver.strip_nullable().clone();
        }
        match receiver.strip_nullable() {
            Ty::Array(element) => (**element).clone(),
            Ty::String => Ty::Prim(Prim::Char),
            other => {
                for base in items.base_chain(other) {
                    let Some(id) = items.type_of(&base) else { continue };
                    let item = items.ty(id);
                    if let Some(index) = item.properties.iter().position(|p| p.is_indexer) {
                        self.tables.members.insert(expr, MemberRef::Property { owner: id, index });
                        return item.properties[index].ty.substitute(&items.substitution(&base));
                    }
                }
                Ty::Unknown
            }
        }
    }

    fn unary(&mut self, op: UnaryOp, operand: ExprId) -> (Ty, Option<Constant>) {
        match op {
            UnaryOp::Not => {
                self.expr(operand, Some(&Ty::bool()));
                let constant = self.constant_of(operand).and_then(Constant::as_bool).map(|b| Constant::Bool(!b));
                (Ty::bool(), constant)
            }
            UnaryOp::Neg | UnaryOp::Plus | UnaryOp::BitNot => {
                let ty = promote(&self.expr(operand, None));
                let constant = self.int_constant(operand).and_then(|v| match op {
                    UnaryOp::Neg => v.checked_neg(),
                    UnaryOp::BitNot => Some(!v),
                    _ => Some(v),
                });
                (ty, constant.map(Constant::Int))
            }
            UnaryOp::PreInc | UnaryOp::PreDec | UnaryOp::PostInc | UnaryOp::PostDec => (self.expr(operand, None), None),
            UnaryOp::Hat => {
                self.expr(operand, Some(&Ty::int()));
                (Ty::named("Index", vec![]), None)
            }
        }
    }

    fn binary(&mut self, op: BinaryOp, lhs: ExprId, rhs: ExprId) -> (Ty, Option<Constant>) {
        let env = self.cx.items;
        match op {
            BinaryOp::And | BinaryOp::Or => {
                self.expr(lhs, Some(&Ty::bool()));
                self.expr(rhs, Some(&Ty::bool()));
                let constant = match (
                    self.constant_of(lhs).and_then(Constant::as_bool),
                    self.constant_of(rhs).and_then(Constant::as_bool),
                ) {
                    (Some(a), Some(b)) => Some(Constant::Bool(if op == BinaryOp::And { a && b } else { a || b })),
                    _ => None,
                };
                (Ty::bool(), constant)
            }
            BinaryOp::Coalesce => {
                let left = self.expr(lhs, None);
                let target = left.strip_nullable().clone();
                let right = self.expr(rhs, (!target.is_unknown()).then_some(&target));
                let ty = if target.is_unknown() {
                    right
                } else if implicit_conversion(env, &right, &target).is_some() {
                    target
                } else {
                    right
                };
                (ty, None)
            }
            _ => {
                let a = self.expr(lhs, None);
                let b = self.expr(rhs, None);
                let constant = fold(op, self.constant_of(lhs), self.constant_of(rhs));
                if op.is_comparison() {
                    return (Ty::bool(), constant);
                }
                let is_string = |ty: &Ty| matches!(ty.strip_nullable(), Ty::String);
                if op == BinaryOp::Add && (is_string(&a) || is_string(&b)) {
                    return (Ty::String, None);
                }
                let ty = match (&a, &b) {
                    (Ty::Prim(Prim::Bool), Ty::Prim(Prim::Bool)) => Ty::bool(),
                    _ if matches!(op, BinaryOp::Shl | BinaryOp::Shr) => promote(&a),
                    (Ty::Prim(x), Ty::Prim(y)) => Ty::Prim(wider(*x, *y)),
                    (Ty::Nullable(_), _) | (_, Ty::Nullable(_)) => {
                        match (promote(a.strip_nullable()), promote(b.strip_nullable())) {
                            (Ty::Prim(x), Ty::Prim(y)) => Ty::Prim(wider(x, y)).make_nullable(),
                            _ => Ty::Unknown,
                        }
                    }
                    _ => Ty::Unknown,
                };
                (ty, constant)
            }
        }
    }

    fn conditional_type(&self, a: &Ty, b: &Ty, expected: Option<&Ty>) -> Ty {
        let env = self.cx.items;
        match (a, b) {
            (Ty::Null, Ty::Null) => expected.cloned().unwrap_or(Ty::Unknown),
            (Ty::Null, other) | (other, Ty::Null) => other.clone().make_nullable(),
            _ if implicit_conversion(env, b, a).is_some() => a.clone(),
            _ if implicit_conversion(env, a, b).is_some() => b.clone(),
            _ => expected.cloned().unwrap_or(Ty::Unknown),
        }
    }

    fn tuple(&mut self, args: &[Argument], expected: Option<&Ty>) -> Ty {
        let file = self.cx.file;
        let expected_elems = match expected {
            Some(Ty::Tuple(elems)) if elems.len() == args.len() => Some(elems.clone()),
            _ => None,
        };
        let mut elems = Vec::with_capacity(args.len());
        for (idx, arg) in args.iter().enumerate() {
            let target = expected_elems.as_ref().map(|e| e[idx].ty.clone());
            let ty = self.expr(arg.expr, target.as_ref());
            let name = match &arg.name {
                Some((name, _)) => Some(name.clone()),
                None => match &file.expr(arg.expr).kind {
                    ExprKind::Name { name, .. } => Some(name.clone()),
                    ExprKind::Member { name, .. } => Some(name.clone()),
                    _ => None,
                },
            };
            elems.push(TupleElem { ty, name });
        }
        Ty::Tuple(elems)
    }

    fn assignment(&mut self, op: AssignOp, lhs: ExprId, rhs: ExprId) -> Ty {
        let file = self.cx.file;
        let deconstructs = match &file.expr(lhs).kind {
            ExprKind::Tuple(_) => true,
            ExprKind::Declaration { designation, .. } => matches!(designation, Designation::Parenthesized { .. }),
            _ => false,
        };
        if deconstructs && op == AssignOp::Assign {
            let value = self.expr(rhs, None);
            self.deconstruct(lhs, &value);
            return value;
        }
        let target = self.expr(lhs, None);
        match op {
            AssignOp::Assign => {
                self.expr(rhs, Some(&target));
                target
            }
            AssignOp::Compound(BinaryOp::Coalesce) => {
                let inner = target.strip_nullable().clone();
                self.expr(rhs, Some(&inner));
                inner
            }
            AssignOp::Compound(_) => {
                self.expr(rhs, None);
                target
            }
        }
    }

    /// Assigns element types of `value` to the deconstruction target `target`.
    fn deconstruct(&mut self, target: ExprId, value: &Ty) {
        let file = self.cx.file;
        let function = self.function_of(target);
        match &file.expr(target).kind {
            ExprKind::Tuple(args) => {
                let elems = tuple_elems(value, args.len());
                for (arg, ty) in args.iter().zip(elems) {
                    self.deconstruct(arg.expr, &ty);
                }
                self.record(target, value.clone(), None, None);
            }
            ExprKind::Declaration { ty, designation } => {
                let declared = match (ty.is_implicit(), function) {
                    (false, Some(f)) => Some(self.lower(ty, f)),
                    _ => None,
                };
                self.designate(designation, declared.as_ref().unwrap_or(value));
                self.record(target, declared.unwrap_or_else(|| value.clone()), None, None);
            }
            _ => {
                self.expr(target, None);
            }
        }
    }

    fn designate(&mut self, designation: &Designation, value: &Ty) {
        match designation {
            Designation::Single { range, .. } => {
                if let Some(local) = self.cx.scopes.local_declared_at(range.start) {
                    self.set_local(local, var_type(value.clone()));
                }
            }
            Designation::Discard { .. } => {}
            Designation::Parenthesized { items, .. } => {
                let elems = tuple_elems(value, items.len());
                for (item, ty) in items.iter().zip(elems) {
                    self.designate(item, &ty);
                }
            }
        }
    }

    // Calls

    fn method_candidates(
        &self,
        ty: &Ty,
        name: &Name,
        filter: impl Fn(&MethodItem) -> bool,
    ) -> Vec<(CallTarget, Signature)> {
        let items = self.cx.items;
        let mut out: Vec<(CallTarget, Signature)> = Vec::new();
        for base in items.base_chain(ty.strip_nullable()) {
            let Some(owner) = items.type_of(&base) else { continue };
            let subst = items.substitution(&base);
            for (index, method) in items.ty(owner).methods_named(name) {
                if !filter(method) {
                    continue;
                }
                let sig = substitute_sig(&method.sig, &subst);
                // A base method with the same parameter list is hidden.
                let hidden = out.iter().any(|(_, s)| {
                    s.params.len() == sig.params.len() && s.params.iter().zip(&sig.params).all(|(a, b)| a.ty == b.ty)
                });
                if !hidden {
                    out.push((CallTarget::Method(MethodKey { owner, index }), sig));
                }
            }
        }
        out
    }

    fn local_function_sig(&self, function: FunctionId) -> Option<Signature> {
        let data = self.cx.scopes.function(function);
        let Some(NodeId::Stmt(stmt)) = data.node else {
            return None;
        };
        let StmtKind::LocalFunction(decl) = &self.cx.file.stmt(stmt).kind else {
            return None;
        };
        let in_scope = self.type_params_in_scope(function);
        Some(Signature {
            type_params: data.type_params.clone(),
            params: lower_params(&decl.params, &in_scope),
            ret: decl.ret.as_ref().map_or(Ty::Void, |r| lower_type_ref(r, &in_scope)),
        })
    }

    fn delegate_candidate(&self, ty: &Ty) -> Vec<(CallTarget, Signature)> {
        let Some(sig) = self.cx.items.delegate_signature(ty.strip_nullable()) else {
            return Vec::new();
        };
        let params = sig
            .params
            .into_iter()
            .enumerate()
            .map(|(idx, ty)| ParamSig {
                name: Name::new(&format!("arg{}", idx + 1)),
                ty,
                ref_kind: RefKind::None,
                has_default: false,
                is_params: false,
            })
            .collect();
        vec![(
            CallTarget::Delegate(ty.clone()),
            Signature {
                type_params: Vec::new(),
                params,
                ret: sig.ret,
            },
        )]
    }

    fn explicit_type_args(&self, type_args: &[TypeRef], function: Option<FunctionId>) -> Vec<Ty> {
        match function {
            Some(f) => type_args.iter().map(|t| self.lower(t, f)).collect(),
            None => Vec::new(),
        }
    }

    fn invocation(&mut self, expr: ExprId, callee: ExprId, args: &[Argument]) -> Ty {
        let file = self.cx.file;
        let function = self.function_of(expr);
        let mut extension_receiver: Option<(Ty, Name)> = None;
        let (candidates, explicit) = match &file.expr(callee).kind {
            ExprKind::Name { name, type_args } => {
                let explicit = self.explicit_type_args(type_args, function);
                let candidates = match self.cx.scopes.resolution(callee).cloned() {
                    Some(Resolution::LocalFunction(local_fn)) => {
                        self.record(callee, Ty::Unknown, None, None);
                        self.local_function_sig(local_fn)
                            .map(|sig| vec![(CallTarget::LocalFunction(local_fn), sig)])
                            .unwrap_or_default()
                    }
                    Some(Resolution::Methods { owner, name: _ }) => {
                        self.record(callee, Ty::Unknown, None, None);
                        let owner_ty = self.cx.items.ty(owner).self_ty();
                        self.method_candidates(&owner_ty, name, |_| true)
                    }
                    _ => {
                        let ty = self.expr(callee, None);
                        self.delegate_candidate(&ty)
                    }
                };
                (candidates, explicit)
            }
            ExprKind::Member {
                receiver,
                name,
                type_args,
                ..
            } => {
                let explicit = self.explicit_type_args(type_args, function);
                let receiver_operand = self.operand(*receiver);
                let mut callee_ty = Ty::Unknown;
                let candidates = match &receiver_operand {
                    Operand::Type(ty) => {
                        let methods = self.method_candidates(ty, name, |m| m.is_static);
                        if methods.is_empty() {
                            callee_ty = self.member_access(callee, &receiver_operand, name);
                            self.delegate_candidate(&callee_ty)
                        } else {
                            methods
                        }
                    }
                    Operand::Value(ty) => {
                        let methods = self.method_candidates(ty, name, |m| !m.is_static);
                        if methods.is_empty() && self.cx.items.extension_methods(name).next().is_none() {
                            // A delegate-typed field or property.
                            callee_ty = self.member_access(callee, &receiver_operand, name);
                            self.delegate_candidate(&callee_ty)
                        } else {
                            extension_receiver = Some((ty.clone(), name.clone()));
                            methods
                        }
                    }
                    Operand::Namespace(_) => Vec::new(),
                };
                self.record(callee, callee_ty, None, None);
                (candidates, explicit)
            }
            _ => {
                let ty = self.expr(callee, None);
                (self.delegate_candidate(&ty), Vec::new())
            }
        };
        self.resolve_call(expr, candidates, args, &explicit, extension_receiver)
            .unwrap_or(Ty::Unknown)
    }

    fn object_creation(&mut self, expr: ExprId, ty: &Ty, args: &[Argument]) {
        let items = self.cx.items;
        let Some(owner) = items.type_of(ty).filter(|_| matches!(ty, Ty::Named { .. } | Ty::Object)) else {
            self.shape_args(args);
            return;
        };
        let subst = items.substitution(ty);
        let candidates: Vec<(CallTarget, Signature)> = items
            .ty(owner)
            .constructors
            .iter()
            .enumerate()
            .map(|(index, ctor)| (CallTarget::Constructor { owner, index }, substitute_sig(&ctor.sig, &subst)))
            .collect();
        if candidates.is_empty() {
            self.shape_args(args);
            return;
        }
        self.resolve_call(expr, candidates, args, &[], None);
    }

    /// Types arguments ahead of resolution.
    fn shape_args(&mut self, args: &[Argument]) -> Vec<ArgShape> {
        let file = self.cx.file;
        let mut shapes = Vec::with_capacity(args.len());
        for arg in args {
            let node = file.expr(arg.expr);
            let shape = match &node.kind {
                ExprKind::Literal(LiteralKind::Null) => {
                    self.record(arg.expr, Ty::Null, None, None);
                    ArgShape::Null
                }
                ExprKind::Lambda { .. } => match self.cx.scopes.function_declared_by(NodeId::Expr(arg.expr)) {
                    Some(lambda) => ArgShape::Lambda(lambda),
                    None => ArgShape::Expr {
                        ty: Ty::Unknown,
                        constant: None,
                    },
                },
                ExprKind::Declaration { ty, designation } if arg.modifier == Some(ArgModifier::Out) => {
                    let declared = match (ty.is_implicit(), self.function_of(arg.expr)) {
                        (false, Some(f)) => self.lower(ty, f),
                        _ => Ty::Unknown,
                    };
                    let locals: Vec<LocalId> = designation
                        .names()
                        .into_iter()
                        .filter_map(|(_, range)| self.cx.scopes.local_declared_at(range.start))
                        .collect();
                    ArgShape::OutVar { ty: declared, locals }
                }
                _ => {
                    let ty = self.expr(arg.expr, None);
                    ArgShape::Expr {
                        ty,
                        constant: self.int_constant(arg.expr),
                    }
                }
            };
            shapes.push(shape);
        }
        shapes
    }

    /// Resolves a call and commits argument typing. Returns the call's type,
    /// or `None` when it does not bind.
    fn resolve_call(
        &mut self,
        expr: ExprId,
        candidates: Vec<(CallTarget, Signature)>,
        args: &[Argument],
        explicit: &[Ty],
        extension_receiver: Option<(Ty, Name)>,
    ) -> Option<Ty> {
        let shapes = self.shape_args(args);
        let cx = self.cx;
        let env: &dyn TypeEnv = cx.items;

        let oracles: Vec<Option<LambdaOracle<'a>>> = shapes
            .iter()
            .map(|shape| match shape {
                ArgShape::Lambda(lambda) => Some(LambdaOracle::new(cx, *lambda, self.tables.locals.clone())),
                _ => None,
            })
            .collect();
        let arg_tys: Vec<ArgTy<'_>> = shapes
            .iter()
            .zip(&oracles)
            .map(|(shape, oracle)| match (shape, oracle) {
                (ArgShape::Expr { ty, constant }, _) => ArgTy::Expr { ty, constant: *constant },
                (ArgShape::OutVar { ty, .. }, _) => ArgTy::Expr { ty, constant: None },
                (ArgShape::Lambda(_), Some(oracle)) => ArgTy::Lambda(oracle),
                _ => ArgTy::Null,
            })
            .collect();
        let call_args: Vec<CallArg<'_>> = args
            .iter()
            .zip(&arg_tys)
            .map(|(arg, ty)| CallArg {
                arg: *ty,
                ref_kind: match arg.modifier {
                    Some(ArgModifier::Ref) => RefKind::Ref,
                    Some(ArgModifier::Out) => RefKind::Out,
                    Some(ArgModifier::In) => RefKind::In,
                    None => RefKind::None,
                },
                name: arg.name.as_ref().map(|(n, _)| n),
            })
            .collect();

        let sigs: Vec<Signature> = candidates.iter().map(|(_, s)| s.clone()).collect();
        let mut resolution = resolve_overload(env, &sigs, &call_args, explicit);
        let mut targets: Vec<CallTarget> = candidates.into_iter().map(|(t, _)| t).collect();
        let mut param_offset = 0;

        if !resolution.is_resolved() {
            if let Some((receiver, name)) = &extension_receiver {
                let extensions: Vec<(CallTarget, Signature)> = cx
                    .items
                    .extension_methods(name)
                    .map(|(owner, index, m)| (CallTarget::Method(MethodKey { owner, index }), m.sig.clone()))
                    .collect();
                if !extensions.is_empty() {
                    let mut with_receiver = vec![CallArg {
                        arg: ArgTy::Expr {
                            ty: receiver,
                            constant: None,
                        },
                        ref_kind: RefKind::None,
                        name: None,
                    }];
                    with_receiver.extend(call_args.iter().copied());
                    let ext_sigs: Vec<Signature> = extensions.iter().map(|(_, s)| s.clone()).collect();
                    let ext = resolve_overload(env, &ext_sigs, &with_receiver, explicit);
                    if ext.is_resolved() || sigs.is_empty() {
                        resolution = ext;
                        targets = extensions.into_iter().map(|(t, _)| t).collect();
                        param_offset = 1;
                    }
                }
            }
        }

        match resolution {
            OverloadResolution::Resolved {
                candidate,
                type_args,
                param_types,
                ret,
            } => {
                let param_types: Vec<Ty> = param_types.into_iter().skip(param_offset).collect();
                let conversions: Vec<Option<Conversion>> = arg_tys
                    .iter()
                    .zip(&param_types)
                    .map(|(arg, param)| argument_conversion(env, *arg, param))
                    .collect();
                drop(call_args);
                drop(arg_tys);
                drop(oracles);
                self.commit_args(args, shapes, &param_types);
                let target = targets.get(candidate).cloned()?;
                tracing::trace!(target: "carve.sema", ?expr, ?target, "bound call");
                self.tables.calls.insert(
                    expr,
                    CallBinding {
                        target,
                        type_args,
                        param_types,
                        ret: ret.clone(),
                        conversions,
                    },
                );
                Some(ret)
            }
            failed => {
                drop(call_args);
                drop(arg_tys);
                drop(oracles);
                if !targets.is_empty() {
                    let kind = if matches!(failed, OverloadResolution::Ambiguous(_)) {
                        BindErrorKind::Ambiguous
                    } else {
                        BindErrorKind::NoApplicable
                    };
                    self.tables.errors.push(BindError { expr, kind });
                }
                self.commit_args(args, shapes, &[]);
                None
            }
        }
    }

    fn commit_args(&mut self, args: &[Argument], shapes: Vec<ArgShape>, param_types: &[Ty]) {
        for (idx, (arg, shape)) in args.iter().zip(shapes).enumerate() {
            let param = param_types.get(idx);
            match shape {
                ArgShape::Lambda(lambda) => {
                    let sig = param.and_then(|p| self.cx.items.delegate_signature(p.strip_nullable()));
                    match sig {
                        Some(sig) => {
                            self.bind_lambda(lambda, &sig.params, Some(sig.ret));
                        }
                        None => {
                            let params = self.lambda_explicit_params(lambda).unwrap_or_default();
                            self.bind_lambda(lambda, &params, None);
                        }
                    }
                    self.record(arg.expr, Ty::Unknown, param, None);
                }
                ArgShape::OutVar { ty, locals } => {
                    let ty = if ty.is_unknown() {
                        param.cloned().unwrap_or(Ty::Unknown)
                    } else {
                        ty
                    };
                    for local in locals {
                        self.set_local(local, ty.clone());
                    }
                    self.record(arg.expr, ty, None, None);
                }
                ArgShape::Null | ArgShape::Expr { .. } => {
                    if let Some(param) = param {
                        self.set_converted(arg.expr, param);
                    }
                }
            }
        }
    }
}

/// Binds a lambda argument in a throwaway typer, once per parameter list.
struct LambdaOracle<'a> {
    cx: Cx<'a>,
    function: FunctionId,
    locals: HashMap<LocalId, Ty>,
    cache: RefCell<HashMap<Vec<Ty>, Option<LambdaBinding>>>,
}

impl<'a> LambdaOracle<'a> {
    fn new(cx: Cx<'a>, function: FunctionId, locals: HashMap<LocalId, Ty>) -> Self {
        LambdaOracle {
            cx,
            function,
            locals,
            cache: RefCell::new(HashMap::new()),
        }
    }
}

impl LambdaArg for LambdaOracle<'_> {
    fn param_count(&self) -> usize {
        self.cx.scopes.function(self.function).params.len()
    }

    fn explicit_params(&self) -> Option<Vec<Ty>> {
        Typer::new(self.cx, HashMap::new()).lambda_explicit_params(self.function)
    }

    fn bind(&self, params: &[Ty]) -> Option<LambdaBinding> {
        if let Some(cached) = self.cache.borrow().get(params) {
            return cached.clone();
        }
        let mut trial = Typer::new(self.cx, self.locals.clone());
        let returns = trial.bind_lambda(self.function, params, None);
        let binding = trial.tables.errors.is_empty().then(|| LambdaBinding {
            void_compatible: void_compatible(self.cx, self.function, &returns),
            returns,
        });
        self.cache.borrow_mut().insert(params.to_vec(), binding.clone());
        binding
    }
}

fn void_compatible(cx: Cx<'_>, function: FunctionId, returns: &[(Ty, Option<i64>)]) -> bool {
    match cx.scopes.function(function).body {
        Some(NodeId::Expr(body)) => matches!(
            &cx.file.expr(body).kind,
            ExprKind::Invocation { .. } | ExprKind::Assign { .. } | ExprKind::New { .. }
        ) || matches!(&cx.file.expr(body).kind, ExprKind::Unary { op, .. } if op.is_increment()),
        Some(NodeId::Stmt(_)) => returns.is_empty(),
        None => true,
    }
}

fn literal(kind: LiteralKind, text: &str) -> (Ty, Option<Constant>) {
    match kind {
        LiteralKind::Int => (Ty::int(), parse_int(text).map(Constant::Int)),
        LiteralKind::Long => (Ty::Prim(Prim::Long), None),
        LiteralKind::Double => (Ty::Prim(Prim::Double), None),
        LiteralKind::Char => (Ty::Prim(Prim::Char), None),
        LiteralKind::String => (Ty::String, None),
        LiteralKind::Bool => (Ty::bool(), Some(Constant::Bool(text == "true"))),
        LiteralKind::Null => (Ty::Null, None),
    }
}

fn parse_int(text: &str) -> Option<i64> {
    let digits: String = text.chars().filter(|c| *c != '_').collect();
    match digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        Some(hex) => i64::from_str_radix(hex, 16).ok(),
        None => digits.parse().ok(),
    }
}

fn fold(op: BinaryOp, a: Option<Constant>, b: Option<Constant>) -> Option<Constant> {
    match (a?, b?) {
        (Constant::Int(x), Constant::Int(y)) => match op {
            BinaryOp::Add => x.checked_add(y).map(Constant::Int),
            BinaryOp::Sub => x.checked_sub(y).map(Constant::Int),
            BinaryOp::Mul => x.checked_mul(y).map(Constant::Int),
            BinaryOp::Div => x.checked_div(y).map(Constant::Int),
            BinaryOp::Rem => x.checked_rem(y).map(Constant::Int),
            BinaryOp::BitAnd => Some(Constant::Int(x & y)),
            BinaryOp::BitOr => Some(Constant::Int(x | y)),
            BinaryOp::BitXor => Some(Constant::Int(x ^ y)),
            BinaryOp::Eq => Some(Constant::Bool(x == y)),
            BinaryOp::Ne => Some(Constant::Bool(x != y)),
            BinaryOp::Lt => Some(Constant::Bool(x < y)),
            BinaryOp::Le => Some(Constant::Bool(x <= y)),
            BinaryOp::Gt => Some(Constant::Bool(x > y)),
            BinaryOp::Ge => Some(Constant::Bool(x >= y)),
            _ => None,
        },
        (Constant::Bool(x), Constant::Bool(y)) => match op {
            BinaryOp::Eq => Some(Constant::Bool(x == y)),
            BinaryOp::Ne => Some(Constant::Bool(x != y)),
            BinaryOp::BitAnd => Some(Constant::Bool(x & y)),
            BinaryOp::BitOr => Some(Constant::Bool(x | y)),
            BinaryOp::BitXor => Some(Constant::Bool(x ^ y)),
            _ => None,
        },
        _ => None,
    }
}

/// Unary numeric promotion: small integral types widen to `int`.
fn promote(ty: &Ty) -> Ty {
    match ty {
        Ty::Prim(Prim::Byte | Prim::Short | Prim::Char) => Ty::int(),
        other => other.clone(),
    }
}

fn wider(a: Prim, b: Prim) -> Prim {
    let rank = |p: Prim| match p {
        Prim::Double => 3,
        Prim::Long => 2,
        _ => 1,
    };
    match rank(a).max(rank(b)) {
        3 => Prim::Double,
        2 => Prim::Long,
        _ => Prim::Int,
    }
}

/// The type a `var` local takes from its initializer.
fn var_type(ty: Ty) -> Ty {
    match ty {
        Ty::Null => Ty::Unknown,
        other => other,
    }
}

fn element_type(collection: &Ty) -> Ty {
    match collection.strip_nullable() {
        Ty::Array(element) => (**element).clone(),
        Ty::String => Ty::Prim(Prim::Char),
        Ty::Named { name, args } if args.len() == 1 && matches!(name.as_str(), "List" | "IEnumerable") => {
            args[0].clone()
        }
        _ => Ty::Unknown,
    }
}

fn tuple_elems(ty: &Ty, len: usize) -> Vec<Ty> {
    match ty {
        Ty::Tuple(elems) if elems.len() == len => elems.iter().map(|e| e.ty.clone()).collect(),
        _ => vec![Ty::Unknown; len],
    }
}

fn substitute_sig(sig: &Signature, subst: &HashMap<Name, Ty>) -> Signature {
    if subst.is_empty() {
        return sig.clone();
    }
    Signature {
        type_params: sig.type_params.clone(),
        params: sig
            .params
            .iter()
            .map(|p| ParamSig {
                ty: p.ty.substitute(subst),
                ..p.clone()
            })
            .collect(),
        ret: sig.ret.substitute(subst),
    }
}

#[cfg(test)]
mod tests {
    use carve_syntax::parse;
    use pretty_assertions::assert_eq;

    use super::*;

    struct Fixture {
        file: SourceFile,
        items: ItemTree,
        scopes: Scopes,
        tables: TypeTables,
    }

    fn fixture(text: &str) -> Fixture {
        let file = parse(text);
        assert!(file.errors.is_empty(), "{:?}", file.errors);
        let items = ItemTree::lower(&file);
        let scopes = Scopes::build(&file, &items);
        let tables = infer(&file, &items, &scopes);
        Fixture {
            file,
            items,
            scopes,
            tables,
        }
    }

    impl Fixture {
        /// The outermost expression starting at the first occurrence of `needle`.
        fn expr_at(&self, needle: &str) -> ExprId {
            let offset = self.file.text.find(needle).unwrap();
            self.file
                .expr_ids()
                .filter(|&e| self.file.expr(e).range.start == offset)
                .max_by_key(|&e| self.file.expr(e).range.len())
                .unwrap()
        }

        fn ty(&self, needle: &str) -> String {
            self.tables.exprs[&self.expr_at(needle)].ty.to_string()
        }

        fn local(&self, name: &str) -> String {
            let (id, _) = self.scopes.locals().find(|(_, l)| l.name == name).unwrap();
            self.tables.locals[&id].to_string()
        }
    }

    #[test]
    fn infers_var_locals_and_tuple_names() {
        let f = fixture("class C { void M(int a) { var t = (a, b: 2); var s = \"x\" + a; var n = a > 1; } }");
        assert_eq!(f.local("t"), "(int a, int b)");
        assert_eq!(f.local("s"), "string");
        assert_eq!(f.local("n"), "bool");
    }

    #[test]
    fn concatenation_with_nullable_strings_is_a_string() {
        let f = fixture("#nullable enable\nclass C { string M(string? a, string? b, int n) { var c = a + b; var d = n + a; return c; } }");
        assert_eq!(f.local("c"), "string");
        assert_eq!(f.local("d"), "string");
    }

    #[test]
    fn binds_overloads_by_argument_type() {
        let f = fixture(
            "class C { void M() { System.Console.WriteLine(1); System.Console.WriteLine(\"s\"); } }",
        );
        let first = f.tables.calls[&f.expr_at("System.Console.WriteLine(1)")].clone();
        let second = f.tables.calls[&f.expr_at("System.Console.WriteLine(\"s\")")].clone();
        assert_ne!(first.target, second.target);
        assert_eq!(first.param_types, vec![Ty::int()]);
        assert_eq!(f.ty("System.Console.WriteLine(1)"), "void");
    }

    #[test]
    fn lambda_parameters_take_the_delegate_types() {
        let f = fixture(
            "using System; class C { void M() { Run(x => x + 1); } static void Run(Func<byte, int> f) { } }",
        );
        assert_eq!(f.local("x"), "byte");
        assert!(f.tables.errors.is_empty());
        let lambda = f.expr_at("x => x + 1");
        assert_eq!(
            f.tables.exprs[&lambda].converted,
            Some(Ty::named("Func", vec![Ty::Prim(Prim::Byte), Ty::int()]))
        );
    }

    #[test]
    fn generic_calls_infer_type_arguments() {
        let f = fixture("class C { void M() { var r = Id(\"a\"); } static T Id<T>(T value) => value; }");
        assert_eq!(f.local("r"), "string");
        let binding = &f.tables.calls[&f.expr_at("Id(\"a\")")];
        assert_eq!(binding.type_args, vec![Ty::String]);
        assert!(matches!(binding.target, CallTarget::Method(_)));
    }

    #[test]
    fn ambiguous_calls_are_recorded() {
        let f = fixture("class C { void M() { F(null); } static void F(string s) { } static void F(C c) { } }");
        assert_eq!(
            f.tables.errors,
            vec![BindError {
                expr: f.expr_at("F(null)"),
                kind: BindErrorKind::Ambiguous
            }]
        );
    }

    #[test]
    fn out_vars_and_constants() {
        let f = fixture(
            "class C { void M() { const int k = 2 * 3; Try(out var v); var w = k; } static void Try(out long x) { x = 0; } }",
        );
        assert_eq!(f.local("v"), "long");
        let (k, _) = f.scopes.locals().find(|(_, l)| l.name == "k").unwrap();
        assert_eq!(f.tables.local_constants[&k], Constant::Int(6));
        assert_eq!(f.local("w"), "int");
    }

    #[test]
    fn members_of_library_and_source_types() {
        let f = fixture(
            "class P { public string Name; } class C { void M(P p, string s) { var a = p.Name; var b = s.Length; var c = string.Empty; } }",
        );
        assert_eq!(f.local("a"), "string");
        assert_eq!(f.local("b"), "int");
        assert_eq!(f.local("c"), "string");
        let access = f.expr_at("p.Name");
        let p = f.items.type_by_name("P").unwrap();
        assert_eq!(f.tables.members[&access], MemberRef::Field { owner: p, index: 0 });
    }

    #[test]
    fn static_delegate_property_called_through_its_type() {
        let f = fixture("class C { static System.Func<int> X { get; } void M() { var a = C.X(); } }");
        assert_eq!(f.local("a"), "int");
        let ExprKind::Invocation { callee, .. } = &f.file.expr(f.expr_at("C.X()")).kind else {
            panic!("expected an invocation");
        };
        let c = f.items.type_by_name("C").unwrap();
        assert_eq!(f.tables.members[callee], MemberRef::Property { owner: c, index: 0 });
        assert!(!f.tables.exprs[callee].ty.is_unknown());
    }
}
