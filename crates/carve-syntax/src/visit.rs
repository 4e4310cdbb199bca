//! Generic traversal over statement and expression nodes.

use std::collections::HashMap;

use carve_core::TextRange;

use crate::ast::*;

/// A statement or expression in a [`SourceFile`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeId {
    Stmt(StmtId),
    Expr(ExprId),
}

impl From<StmtId> for NodeId {
    fn from(id: StmtId) -> Self {
        NodeId::Stmt(id)
    }
}

impl From<ExprId> for NodeId {
    fn from(id: ExprId) -> Self {
        NodeId::Expr(id)
    }
}

fn push_args(out: &mut Vec<NodeId>, args: &[Argument]) {
    out.extend(args.iter().map(|a| NodeId::Expr(a.expr)));
}

fn push_params(out: &mut Vec<NodeId>, params: &[Param]) {
    out.extend(params.iter().filter_map(|p| p.default).map(NodeId::Expr));
}

fn push_pattern(out: &mut Vec<NodeId>, pattern: &Pattern) {
    match &pattern.kind {
        PatternKind::Constant(expr) => out.push(NodeId::Expr(*expr)),
        PatternKind::Not(inner) => push_pattern(out, inner),
        PatternKind::Type(_) | PatternKind::Declaration { .. } => {}
    }
}

fn push_body(out: &mut Vec<NodeId>, body: FunctionBody) {
    match body {
        FunctionBody::Block(stmt) => out.push(NodeId::Stmt(stmt)),
        FunctionBody::Expr(expr) => out.push(NodeId::Expr(expr)),
        FunctionBody::None => {}
    }
}

impl SourceFile {
    pub fn node_range(&self, node: NodeId) -> TextRange {
        match node {
            NodeId::Stmt(id) => self.stmt(id).range,
            NodeId::Expr(id) => self.expr(id).range,
        }
    }

    /// Direct children of `node` in source order. Local function and lambda
    /// bodies are children of their declaring node.
    pub fn children(&self, node: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        match node {
            NodeId::Stmt(id) => self.stmt_children(id, &mut out),
            NodeId::Expr(id) => self.expr_children(id, &mut out),
        }
        out
    }

    fn stmt_children(&self, id: StmtId, out: &mut Vec<NodeId>) {
        match &self.stmt(id).kind {
            StmtKind::Block(stmts) => out.extend(stmts.iter().copied().map(NodeId::Stmt)),
            StmtKind::LocalDecl { declarators, .. } => {
                out.extend(declarators.iter().filter_map(|d| d.init).map(NodeId::Expr));
            }
            StmtKind::LocalFunction(decl) => {
                push_params(out, &decl.params);
                push_body(out, decl.body);
            }
            StmtKind::Expr(expr) => out.push(NodeId::Expr(*expr)),
            StmtKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                out.push(NodeId::Expr(*condition));
                out.push(NodeId::Stmt(*then_branch));
                out.extend(else_branch.map(NodeId::Stmt));
            }
            StmtKind::While { condition, body } => {
                out.push(NodeId::Expr(*condition));
                out.push(NodeId::Stmt(*body));
            }
            StmtKind::DoWhile { body, condition } => {
                out.push(NodeId::Stmt(*body));
                out.push(NodeId::Expr(*condition));
            }
            StmtKind::For {
                init,
                condition,
                update,
                body,
            } => {
                out.extend(init.iter().copied().map(NodeId::Stmt));
                out.extend(condition.map(NodeId::Expr));
                out.extend(update.iter().copied().map(NodeId::Expr));
                out.push(NodeId::Stmt(*body));
            }
            StmtKind::Foreach { iterable, body, .. } => {
                out.push(NodeId::Expr(*iterable));
                out.push(NodeId::Stmt(*body));
            }
            StmtKind::Switch { scrutinee, sections } => {
                out.push(NodeId::Expr(*scrutinee));
                for section in sections {
                    for label in &section.labels {
                        if let SwitchLabel::Case(expr) = label {
                            out.push(NodeId::Expr(*expr));
                        }
                    }
                    out.extend(section.stmts.iter().copied().map(NodeId::Stmt));
                }
            }
            StmtKind::Return(expr) | StmtKind::Throw(expr) => out.extend(expr.map(NodeId::Expr)),
            StmtKind::Labeled { stmt, .. } => out.push(NodeId::Stmt(*stmt)),
            StmtKind::Try {
                body,
                catches,
                finally,
            } => {
                out.push(NodeId::Stmt(*body));
                out.extend(catches.iter().map(|c| NodeId::Stmt(c.body)));
                out.extend(finally.map(NodeId::Stmt));
            }
            StmtKind::Break | StmtKind::Continue | StmtKind::Goto { .. } | StmtKind::Empty => {}
        }
    }

    fn expr_children(&self, id: ExprId, out: &mut Vec<NodeId>) {
        match &self.expr(id).kind {
            ExprKind::Member { receiver, .. } => out.push(NodeId::Expr(*receiver)),
            ExprKind::ElementAccess { receiver, args, .. } => {
                out.push(NodeId::Expr(*receiver));
                push_args(out, args);
            }
            ExprKind::Invocation { callee, args } => {
                out.push(NodeId::Expr(*callee));
                push_args(out, args);
            }
            ExprKind::New { args, .. } | ExprKind::Tuple(args) => push_args(out, args),
            ExprKind::NewArray { size, items, .. } => {
                out.extend(size.map(NodeId::Expr));
                out.extend(items.iter().copied().map(NodeId::Expr));
            }
            ExprKind::Paren(expr)
            | ExprKind::Cast { expr, .. }
            | ExprKind::Unary { expr, .. }
            | ExprKind::As { expr, .. }
            | ExprKind::NameOf(expr)
            | ExprKind::Throw(expr) => out.push(NodeId::Expr(*expr)),
            ExprKind::Binary { lhs, rhs, .. } | ExprKind::Assign { lhs, rhs, .. } => {
                out.push(NodeId::Expr(*lhs));
                out.push(NodeId::Expr(*rhs));
            }
            ExprKind::Range { start, end } => {
                out.extend(start.map(NodeId::Expr));
                out.extend(end.map(NodeId::Expr));
            }
            ExprKind::Is { expr, pattern } => {
                out.push(NodeId::Expr(*expr));
                push_pattern(out, pattern);
            }
            ExprKind::Conditional {
                condition,
                then_expr,
                else_expr,
            } => {
                out.push(NodeId::Expr(*condition));
                out.push(NodeId::Expr(*then_expr));
                out.push(NodeId::Expr(*else_expr));
            }
            ExprKind::Lambda { body, .. } => match body {
                LambdaBody::Expr(expr) => out.push(NodeId::Expr(*expr)),
                LambdaBody::Block(stmt) => out.push(NodeId::Stmt(*stmt)),
            },
            ExprKind::Literal(_)
            | ExprKind::Default(_)
            | ExprKind::Name { .. }
            | ExprKind::PredefinedType(_)
            | ExprKind::This
            | ExprKind::Base
            | ExprKind::Declaration { .. }
            | ExprKind::Error => {}
        }
    }

    /// Top-level nodes owned by declarations: member bodies, accessor bodies,
    /// field initializers and parameter defaults.
    pub fn roots(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        for delegate in &self.delegates {
            push_params(&mut out, &delegate.params);
        }
        for ty in self.all_types() {
            for member in &ty.members {
                match member {
                    Member::Field(field) => {
                        out.extend(field.declarators.iter().filter_map(|d| d.init).map(NodeId::Expr));
                    }
                    Member::Method(method) => {
                        push_params(&mut out, &method.params);
                        push_body(&mut out, method.body);
                    }
                    Member::Property(property) => {
                        if let Some(params) = &property.indexer_params {
                            push_params(&mut out, params);
                        }
                        match &property.body {
                            PropertyBody::Expr(expr) => out.push(NodeId::Expr(*expr)),
                            PropertyBody::Accessors(accessors) => {
                                for accessor in accessors {
                                    push_body(&mut out, accessor.body);
                                }
                            }
                        }
                    }
                    Member::Delegate(delegate) => push_params(&mut out, &delegate.params),
                    Member::Type(_) => {}
                }
            }
        }
        out
    }

    /// `node` and everything below it, in pre-order.
    pub fn descendants(&self, node: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![node];
        while let Some(node) = stack.pop() {
            out.push(node);
            let children = self.children(node);
            stack.extend(children.into_iter().rev());
        }
        out
    }
}

/// Parent links for every statement and expression reachable from
/// [`SourceFile::roots`].
#[derive(Debug, Clone, Default)]
pub struct ParentMap {
    parents: HashMap<NodeId, NodeId>,
}

impl ParentMap {
    pub fn new(file: &SourceFile) -> Self {
        let mut parents = HashMap::new();
        let mut stack = file.roots();
        while let Some(node) = stack.pop() {
            for child in file.children(node) {
                parents.insert(child, node);
                stack.push(child);
            }
        }
        Self { parents }
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.parents.get(&node).copied()
    }

    /// Strict ancestors of `node`, innermost first.
    pub fn ancestors(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.parent(node), move |n| self.parent(*n))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::parse;

    use super::*;

    #[test]
    fn parent_map_links_lambda_bodies() {
        let text = "class C { void M() { System.Func<int> f = () => 1 + 2; } }";
        let file = parse(text);
        let parents = ParentMap::new(&file);
        let literal = file
            .exprs
            .iter()
            .find(|(_, e)| e.range.slice(text) == "2")
            .map(|(id, _)| id)
            .unwrap();
        let chain: Vec<&str> = parents
            .ancestors(NodeId::Expr(literal))
            .map(|n| file.node_range(n).slice(text))
            .collect();
        assert_eq!(
            chain,
            vec![
                "1 + 2",
                "() => 1 + 2",
                "System.Func<int> f = () => 1 + 2;",
                "{ System.Func<int> f = () => 1 + 2; }"
            ]
        );
    }

    #[test]
    fn descendants_are_preorder() {
        let text = "class C { int M(int a) => a * (a + 1); }";
        let file = parse(text);
        let root = file.roots()[0];
        let texts: Vec<&str> = file
            .descendants(root)
            .into_iter()
            .map(|n| file.node_range(n).slice(text))
            .collect();
        assert_eq!(texts, vec!["a * (a + 1)", "a", "(a + 1)", "a + 1", "a", "1"]);
    }
}
