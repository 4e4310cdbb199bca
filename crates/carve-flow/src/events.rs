//! Local reads, writes and dereferences of statements and expressions, in
//! evaluation order.
//!
//! Every analysis in this crate walks the same event stream, so they agree
//! on what an expression does to a local no matter how it is nested.

use std::collections::{BTreeSet, HashSet};

use carve_core::TextRange;
use carve_sema::{FunctionId, LocalId, Resolution, SemanticModel};
use carve_syntax::{
    ArgModifier, Argument, AssignOp, BinaryOp, Designation, ExprId, ExprKind, NodeId, PatternKind, StmtKind,
};

use crate::cfg::{BasicBlock, Element, Terminator};
use crate::null::{local_of, state_of_type, NullState};

/// Where the value stored by a write comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullSource {
    Expr(ExprId),
    State(NullState),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Read(LocalId),
    Write {
        local: LocalId,
        value: NullSource,
        /// `false` when the write sits behind `&&`, `||`, `??` or `?:` and
        /// may not happen.
        definite: bool,
    },
    /// Member or element access through the local.
    Deref(LocalId),
    /// A call to a local function or to a lambda bound to a local.
    Invoke(FunctionId),
    /// A local function or lambda leaves as a value and may run later.
    Escape(FunctionId),
    /// Start of code that only runs when `condition` evaluated to `sense`.
    Assume { condition: ExprId, sense: bool },
    /// End of the innermost [`EventKind::Assume`] span.
    Unassume,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub kind: EventKind,
    /// The name for reads and writes, the call for invocations, the
    /// condition for assumption markers.
    pub range: TextRange,
}

impl Event {
    /// Assumption markers bracket conditional code and do not touch a local.
    pub fn is_marker(&self) -> bool {
        matches!(self.kind, EventKind::Assume { .. } | EventKind::Unassume)
    }

    /// Whether this is an access of the code in `range`.
    pub fn accesses_within(&self, range: TextRange) -> bool {
        !self.is_marker() && range.contains_range(self.range)
    }
}

/// Events of every element of `block`, terminator expressions last.
pub fn block_events(model: &SemanticModel<'_>, block: &BasicBlock) -> Vec<Event> {
    let mut collector = Collector::new(model);
    for element in &block.elements {
        collector.element(*element);
    }
    collector.terminator(&block.terminator);
    collector.out
}

pub fn element_events(model: &SemanticModel<'_>, element: Element) -> Vec<Event> {
    let mut collector = Collector::new(model);
    collector.element(element);
    collector.out
}

pub fn expr_events(model: &SemanticModel<'_>, expr: ExprId) -> Vec<Event> {
    let mut collector = Collector::new(model);
    collector.expr(expr);
    collector.out
}

/// The lambda a local is initialized with, when its declarator binds one.
pub fn lambda_of_local(model: &SemanticModel<'_>, local: LocalId) -> Option<FunctionId> {
    let data = model.scopes().local(local);
    let Some(NodeId::Stmt(stmt)) = data.decl else {
        return None;
    };
    let StmtKind::LocalDecl { declarators, .. } = &model.file().stmt(stmt).kind else {
        return None;
    };
    let init = declarators.iter().find(|d| d.name_range == data.name_range)?.init?;
    match model.file().expr(init).kind {
        ExprKind::Lambda { .. } => model.scopes().function_declared_by(NodeId::Expr(init)),
        _ => None,
    }
}

struct Collector<'m, 'a> {
    model: &'m SemanticModel<'a>,
    out: Vec<Event>,
    definite: bool,
}

impl<'m, 'a> Collector<'m, 'a> {
    fn new(model: &'m SemanticModel<'a>) -> Self {
        Self {
            model,
            out: Vec::new(),
            definite: true,
        }
    }

    fn push(&mut self, kind: EventKind, range: TextRange) {
        self.out.push(Event { kind, range });
    }

    fn write(&mut self, local: LocalId, value: NullSource, range: TextRange) {
        let definite = self.definite;
        self.push(EventKind::Write { local, value, definite }, range);
    }

    fn maybe(&mut self, f: impl FnOnce(&mut Self)) {
        let saved = self.definite;
        self.definite = false;
        f(self);
        self.definite = saved;
    }

    fn assuming(&mut self, condition: ExprId, sense: bool, f: impl FnOnce(&mut Self)) {
        let range = self.model.file().expr(condition).range;
        self.push(EventKind::Assume { condition, sense }, range);
        self.maybe(f);
        self.push(EventKind::Unassume, range);
    }

    fn element(&mut self, element: Element) {
        let model = self.model;
        let file = model.file();
        match element {
            Element::Stmt(stmt) => match &file.stmt(stmt).kind {
                StmtKind::LocalDecl { declarators, .. } => {
                    for declarator in declarators {
                        let Some(init) = declarator.init else { continue };
                        if !matches!(file.expr(init).kind, ExprKind::Lambda { .. }) {
                            self.expr(init);
                        }
                        if let Some(local) = model.scopes().local_declared_at(declarator.name_range.start) {
                            self.write(local, NullSource::Expr(init), declarator.name_range);
                        }
                    }
                }
                StmtKind::Expr(expr) => self.expr(*expr),
                _ => {}
            },
            Element::Expr(expr) => self.expr(expr),
            Element::ForeachVar(stmt) => {
                if let StmtKind::Foreach { name_range, .. } = &file.stmt(stmt).kind {
                    if let Some(local) = model.scopes().local_declared_at(name_range.start) {
                        let state = state_of_type(&model.local_type(local));
                        self.write(local, NullSource::State(state), *name_range);
                    }
                }
            }
            Element::CatchVar { stmt, clause } => {
                if let StmtKind::Try { catches, .. } = &file.stmt(stmt).kind {
                    if let Some((_, range)) = catches.get(clause).and_then(|c| c.name.as_ref()) {
                        if let Some(local) = model.scopes().local_declared_at(range.start) {
                            self.write(local, NullSource::State(NullState::NotNull), *range);
                        }
                    }
                }
            }
        }
    }

    fn terminator(&mut self, terminator: &Terminator) {
        match terminator {
            Terminator::If { condition, .. } => self.expr(*condition),
            Terminator::Switch { expression, .. } => self.expr(*expression),
            Terminator::Return { value: Some(value), .. } | Terminator::Throw {
                exception: Some(value),
                ..
            } => self.expr(*value),
            _ => {}
        }
    }

    fn name(&mut self, expr: ExprId) {
        let range = self.model.file().expr(expr).range;
        match self.model.resolution(expr) {
            Some(Resolution::Local(local)) => {
                self.push(EventKind::Read(*local), range);
                if let Some(lambda) = lambda_of_local(self.model, *local) {
                    self.push(EventKind::Escape(lambda), range);
                }
            }
            Some(Resolution::LocalFunction(function)) => self.push(EventKind::Escape(*function), range),
            _ => {}
        }
    }

    /// The receiver of a member or element access.
    fn receiver(&mut self, receiver: ExprId, conditional: bool) {
        self.expr(receiver);
        if conditional {
            return;
        }
        if let Some(local) = local_of(self.model, receiver) {
            let range = self.model.file().expr(receiver).range;
            self.push(EventKind::Deref(local), range);
        }
    }

    fn expr(&mut self, expr: ExprId) {
        let model = self.model;
        let file = model.file();
        let range = file.expr(expr).range;
        match &file.expr(expr).kind {
            ExprKind::Name { .. } => self.name(expr),
            ExprKind::NameOf(_) => {}
            ExprKind::Lambda { .. } => {
                if let Some(lambda) = model.scopes().function_declared_by(NodeId::Expr(expr)) {
                    self.push(EventKind::Escape(lambda), range);
                }
            }
            ExprKind::Member {
                receiver, conditional, ..
            } => self.receiver(*receiver, *conditional),
            ExprKind::ElementAccess {
                receiver,
                args,
                conditional,
            } => {
                self.receiver(*receiver, *conditional);
                self.args(args);
            }
            ExprKind::Invocation { callee, args } => self.invocation(expr, *callee, args),
            ExprKind::New { args, .. } => self.args(args),
            ExprKind::Binary {
                op: op @ (BinaryOp::And | BinaryOp::Or),
                lhs,
                rhs,
            } => {
                self.expr(*lhs);
                self.assuming(*lhs, *op == BinaryOp::And, |this| this.expr(*rhs));
            }
            ExprKind::Binary {
                op: BinaryOp::Coalesce,
                lhs,
                rhs,
            } => {
                self.expr(*lhs);
                self.maybe(|this| this.expr(*rhs));
            }
            ExprKind::Conditional {
                condition,
                then_expr,
                else_expr,
            } => {
                self.expr(*condition);
                self.assuming(*condition, true, |this| this.expr(*then_expr));
                self.assuming(*condition, false, |this| this.expr(*else_expr));
            }
            ExprKind::Unary { op, expr: operand } if op.is_increment() => {
                self.expr(*operand);
                if let Some(local) = local_of(model, *operand) {
                    let range = file.expr(*operand).range;
                    self.write(local, NullSource::State(NullState::NotNull), range);
                }
            }
            ExprKind::Assign { op, lhs, rhs } => self.assign(expr, *op, *lhs, *rhs),
            ExprKind::Is { expr: operand, pattern } => {
                self.expr(*operand);
                let mut pattern = pattern;
                while let PatternKind::Not(inner) = &pattern.kind {
                    pattern = inner;
                }
                match &pattern.kind {
                    PatternKind::Constant(value) => self.expr(*value),
                    PatternKind::Declaration { name_range, .. } => {
                        if let Some(local) = model.scopes().local_declared_at(name_range.start) {
                            self.write(local, NullSource::State(NullState::NotNull), *name_range);
                        }
                    }
                    PatternKind::Type(_) | PatternKind::Not(_) => {}
                }
            }
            _ => {
                for child in file.children(NodeId::Expr(expr)) {
                    if let NodeId::Expr(child) = child {
                        self.expr(child);
                    }
                }
            }
        }
    }

    fn invocation(&mut self, expr: ExprId, callee: ExprId, args: &[Argument]) {
        let model = self.model;
        let file = model.file();
        let range = file.expr(expr).range;
        let mut invoked = None;
        match (&file.expr(callee).kind, model.resolution(callee)) {
            (ExprKind::Name { .. }, Some(Resolution::LocalFunction(function))) => invoked = Some(*function),
            (ExprKind::Name { .. }, Some(Resolution::Local(local))) => {
                self.push(EventKind::Read(*local), file.expr(callee).range);
                invoked = lambda_of_local(model, *local);
            }
            (
                ExprKind::Member {
                    receiver, conditional, ..
                },
                _,
            ) => self.receiver(*receiver, *conditional),
            _ => self.expr(callee),
        }
        self.args(args);
        if let Some(function) = invoked {
            self.push(EventKind::Invoke(function), range);
        }
        self.arg_writes(expr, args);
    }

    fn args(&mut self, args: &[Argument]) {
        for arg in args {
            match arg.modifier {
                Some(ArgModifier::Out) => {
                    // The target's receiver still evaluates before the call.
                    match &self.model.file().expr(arg.expr).kind {
                        ExprKind::Member {
                            receiver, conditional, ..
                        } => self.receiver(*receiver, *conditional),
                        ExprKind::ElementAccess {
                            receiver,
                            args,
                            conditional,
                        } => {
                            self.receiver(*receiver, *conditional);
                            self.args(args);
                        }
                        _ => {}
                    }
                }
                _ => self.expr(arg.expr),
            }
        }
    }

    /// Writes through `out` and `ref` arguments, which land after the call.
    fn arg_writes(&mut self, call: ExprId, args: &[Argument]) {
        let model = self.model;
        let file = model.file();
        let binding = model.call(call);
        for (idx, arg) in args.iter().enumerate() {
            if !matches!(arg.modifier, Some(ArgModifier::Out | ArgModifier::Ref)) {
                continue;
            }
            let state = |fallback: carve_types::Ty| {
                let ty = binding.and_then(|b| b.param_types.get(idx)).cloned().unwrap_or(fallback);
                NullSource::State(state_of_type(&ty))
            };
            match &file.expr(arg.expr).kind {
                ExprKind::Declaration { designation, .. } => {
                    for (_, name_range) in designation.names() {
                        if let Some(local) = model.scopes().local_declared_at(name_range.start) {
                            let value = state(model.local_type(local));
                            self.write(local, value, name_range);
                        }
                    }
                }
                _ => {
                    if let Some(local) = local_of(model, arg.expr) {
                        let value = state(model.local_type(local));
                        self.write(local, value, file.expr(arg.expr).range);
                    }
                }
            }
        }
    }

    fn assign(&mut self, expr: ExprId, op: AssignOp, lhs: ExprId, rhs: ExprId) {
        let model = self.model;
        let file = model.file();
        if let Some(local) = local_of(model, lhs) {
            let range = file.expr(lhs).range;
            match op {
                AssignOp::Assign => {
                    self.expr(rhs);
                    self.write(local, NullSource::Expr(rhs), range);
                }
                AssignOp::Compound(BinaryOp::Coalesce) => {
                    self.push(EventKind::Read(local), range);
                    self.maybe(|this| this.expr(rhs));
                    self.write(local, NullSource::Expr(expr), range);
                }
                AssignOp::Compound(_) => {
                    self.push(EventKind::Read(local), range);
                    self.expr(rhs);
                    self.write(local, NullSource::State(NullState::NotNull), range);
                }
            }
            return;
        }

        match &file.expr(lhs).kind {
            ExprKind::Tuple(_) | ExprKind::Declaration { .. } if op == AssignOp::Assign => {
                self.deconstruction_receivers(lhs);
                self.expr(rhs);
                self.deconstruct(lhs, Some(rhs));
            }
            ExprKind::Member {
                receiver, conditional, ..
            } => {
                self.receiver(*receiver, *conditional);
                self.expr(rhs);
            }
            ExprKind::ElementAccess {
                receiver,
                args,
                conditional,
            } => {
                self.receiver(*receiver, *conditional);
                self.args(args);
                self.expr(rhs);
            }
            _ => {
                self.expr(lhs);
                self.expr(rhs);
            }
        }
    }

    fn deconstruction_receivers(&mut self, target: ExprId) {
        match &self.model.file().expr(target).kind {
            ExprKind::Tuple(items) => {
                for item in items {
                    self.deconstruction_receivers(item.expr);
                }
            }
            ExprKind::Member {
                receiver, conditional, ..
            } => self.receiver(*receiver, *conditional),
            _ => {}
        }
    }

    /// Writes of a deconstructing assignment. `value` is the matching
    /// source element when the right side is a tuple literal.
    fn deconstruct(&mut self, target: ExprId, value: Option<ExprId>) {
        let model = self.model;
        let file = model.file();
        let value = value.map(|v| strip(model, v));
        let elements = value.and_then(|v| match &file.expr(v).kind {
            ExprKind::Tuple(items) => Some(items.iter().map(|i| i.expr).collect::<Vec<_>>()),
            _ => None,
        });
        match &file.expr(target).kind {
            ExprKind::Tuple(items) => {
                for (idx, item) in items.iter().enumerate() {
                    let source = elements.as_ref().and_then(|e| e.get(idx).copied());
                    self.deconstruct(item.expr, source);
                }
            }
            ExprKind::Declaration { designation, .. } => self.designation(designation, value),
            _ => {
                if let Some(local) = local_of(model, target) {
                    let source = match value {
                        Some(value) => NullSource::Expr(value),
                        None => NullSource::State(state_of_type(&model.type_of(target))),
                    };
                    self.write(local, source, file.expr(target).range);
                }
            }
        }
    }

    fn designation(&mut self, designation: &Designation, value: Option<ExprId>) {
        let model = self.model;
        let file = model.file();
        match designation {
            Designation::Single { range, .. } => {
                if let Some(local) = model.scopes().local_declared_at(range.start) {
                    let source = match value {
                        Some(value) => NullSource::Expr(value),
                        None => NullSource::State(state_of_type(&model.local_type(local))),
                    };
                    self.write(local, source, *range);
                }
            }
            Designation::Discard { .. } => {}
            Designation::Parenthesized { items, .. } => {
                let elements = value.and_then(|v| match &file.expr(v).kind {
                    ExprKind::Tuple(args) => Some(args.iter().map(|a| a.expr).collect::<Vec<_>>()),
                    _ => None,
                });
                for (idx, item) in items.iter().enumerate() {
                    let source = elements.as_ref().and_then(|e| e.get(idx).copied());
                    self.designation(item, source);
                }
            }
        }
    }
}

fn strip(model: &SemanticModel<'_>, mut expr: ExprId) -> ExprId {
    while let ExprKind::Paren(inner) = model.file().expr(expr).kind {
        expr = inner;
    }
    expr
}

/// Captured locals a local function or lambda touches when it runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClosureSummary {
    pub reads: BTreeSet<LocalId>,
    pub writes: BTreeSet<LocalId>,
}

/// Summarizes `function`, following calls to other local functions.
pub fn closure_summary(model: &SemanticModel<'_>, function: FunctionId) -> ClosureSummary {
    let mut summary = ClosureSummary::default();
    let mut visited = HashSet::new();
    summarize(model, function, function, &mut visited, &mut summary);
    summary
}

fn summarize(
    model: &SemanticModel<'_>,
    root: FunctionId,
    function: FunctionId,
    visited: &mut HashSet<FunctionId>,
    out: &mut ClosureSummary,
) {
    if !visited.insert(function) {
        return;
    }
    let scopes = model.scopes();
    let file = model.file();
    let Some(body) = scopes.function(function).body else {
        return;
    };
    for node in file.descendants(body) {
        let NodeId::Expr(expr) = node else { continue };
        if !matches!(file.expr(expr).kind, ExprKind::Name { .. }) {
            continue;
        }
        match model.resolution(expr) {
            Some(Resolution::Local(local)) => {
                if scopes.function_within(scopes.local(*local).function, root) {
                    continue;
                }
                let (read, written) = access_of(model, expr);
                if read {
                    out.reads.insert(*local);
                }
                if written {
                    out.writes.insert(*local);
                }
            }
            Some(Resolution::LocalFunction(callee)) => summarize(model, root, *callee, visited, out),
            _ => {}
        }
    }
}

/// Whether the name at `expr` is read, written, or both.
pub(crate) fn access_of(model: &SemanticModel<'_>, expr: ExprId) -> (bool, bool) {
    let file = model.file();
    let mut node = expr;
    while let Some(NodeId::Expr(parent)) = model.parents().parent(NodeId::Expr(node)) {
        match &file.expr(parent).kind {
            ExprKind::Paren(_) => node = parent,
            ExprKind::Assign { op, lhs, .. } if *lhs == node => {
                return (!matches!(op, AssignOp::Assign), true);
            }
            ExprKind::Tuple(_) => {
                // Part of a deconstruction target when the tuple is assigned to.
                match model.parents().parent(NodeId::Expr(parent)) {
                    Some(NodeId::Expr(grand)) => match &file.expr(grand).kind {
                        ExprKind::Assign { lhs, .. } if *lhs == parent => return (false, true),
                        _ => return (true, false),
                    },
                    _ => return (true, false),
                }
            }
            ExprKind::Unary { op, .. } if op.is_increment() => return (true, true),
            ExprKind::Invocation { args, .. } | ExprKind::New { args, .. } => {
                let modifier = args.iter().find(|a| a.expr == node).and_then(|a| a.modifier);
                return match modifier {
                    Some(ArgModifier::Out) => (false, true),
                    Some(ArgModifier::Ref) => (true, true),
                    _ => (true, false),
                };
            }
            _ => return (true, false),
        }
    }
    (true, false)
}

#[cfg(test)]
mod tests {
    use carve_syntax::parse;
    use pretty_assertions::assert_eq;

    use super::*;

    fn kinds(model: &SemanticModel<'_>, stmt_text: &str) -> Vec<String> {
        let file = model.file();
        let stmt = file
            .stmt_ids()
            .find(|&s| file.text_of(file.stmt(s).range) == stmt_text)
            .unwrap();
        element_events(model, Element::Stmt(stmt))
            .into_iter()
            .filter_map(|event| {
                let name = |l: LocalId| model.scopes().local(l).name.to_string();
                Some(match event.kind {
                    EventKind::Read(l) => format!("read {}", name(l)),
                    EventKind::Write { local, definite, .. } => {
                        format!("write {}{}", name(local), if definite { "" } else { "?" })
                    }
                    EventKind::Deref(l) => format!("deref {}", name(l)),
                    EventKind::Invoke(_) => "invoke".to_string(),
                    EventKind::Escape(_) => "escape".to_string(),
                    EventKind::Assume { .. } | EventKind::Unassume => return None,
                })
            })
            .collect()
    }

    #[test]
    fn assignments_read_the_value_first() {
        let text = "class C { void M(int a, int b) { a = b + a; b += 1; } }";
        let file = parse(text);
        let model = SemanticModel::new(&file);
        assert_eq!(kinds(&model, "a = b + a;"), vec!["read b", "read a", "write a"]);
        assert_eq!(kinds(&model, "b += 1;"), vec!["read b", "write b"]);
    }

    #[test]
    fn out_arguments_write_after_the_call() {
        let text = "class C { void M(string s) { int.TryParse(s, out var n); } }";
        let file = parse(text);
        let model = SemanticModel::new(&file);
        assert_eq!(kinds(&model, "int.TryParse(s, out var n);"), vec!["read s", "write n"]);
    }

    #[test]
    fn short_circuits_make_writes_conditional() {
        let text = "class C { bool F(out int x) { x = 1; return true; } void M(bool c, int y) { var ok = c && F(out y); } }";
        let file = parse(text);
        let model = SemanticModel::new(&file);
        assert_eq!(kinds(&model, "var ok = c && F(out y);"), vec!["read c", "write y?", "write ok"]);
    }

    #[test]
    fn member_access_dereferences_the_receiver() {
        let text = "class C { void M(string s, string t) { var n = s.Length + t?.Length; } }";
        let file = parse(text);
        let model = SemanticModel::new(&file);
        assert_eq!(kinds(&model, "var n = s.Length + t?.Length;"), vec!["read s", "deref s", "read t", "write n"]);
    }

    #[test]
    fn local_functions_invoke_and_escape() {
        let text = "class C { void M(int x) { int F() => x; var a = F(); System.Func<int> f = F; } }";
        let file = parse(text);
        let model = SemanticModel::new(&file);
        assert_eq!(kinds(&model, "var a = F();"), vec!["invoke", "write a"]);
        assert_eq!(kinds(&model, "System.Func<int> f = F;"), vec!["escape", "write f"]);
    }

    #[test]
    fn closures_summarize_captured_locals() {
        let text = "class C { void M(int x, int y) { int z = 0; void G() { y = x; } void F() { G(); z++; } } }";
        let file = parse(text);
        let model = SemanticModel::new(&file);
        let f = model
            .scopes()
            .functions()
            .find(|(_, data)| data.name.as_ref().is_some_and(|n| n == "F"))
            .map(|(id, _)| id)
            .unwrap();
        let summary = closure_summary(&model, f);
        let names = |set: &BTreeSet<LocalId>| {
            set.iter()
                .map(|l| model.scopes().local(*l).name.to_string())
                .collect::<Vec<_>>()
        };
        assert_eq!(names(&summary.reads), vec!["x", "z"]);
        assert_eq!(names(&summary.writes), vec!["y", "z"]);
    }
}
