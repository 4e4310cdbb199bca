//! Selection validation.
//!
//! A raw text range is normalised into either a run of statements from one
//! statement list (or a single embedded statement), or a single value
//! expression. Everything here is a pure query over the semantic model; a
//! selection that cannot be extracted yields an [`ExtractIssue`].

use std::collections::HashSet;

use carve_core::{trim_range, Name, TextRange};
use carve_flow::{Region, RegionFacts};
use carve_sema::{FunctionId, FunctionKind, Resolution, SemanticModel};
use carve_syntax::{
    ArgModifier, Argument, AssignOp, ExprId, ExprKind, NodeId, PatternKind, StmtId, StmtKind, SwitchLabel,
    SyntaxKind,
};
use serde::{Deserialize, Serialize};

use crate::ExtractIssue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelectionKind {
    Statements,
    Expression,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedSelection {
    pub kind: SelectionKind,
    /// The normalised selection.
    pub range: TextRange,
    /// What flow analysis runs over. For a selected `x = e` this is `e` alone.
    pub region: Region,
    /// Text the call site replaces.
    pub replace_range: TextRange,
    /// `false` when a single statement sits in an embedded position such as an `if` branch.
    pub in_statement_list: bool,
    /// Innermost function containing the selection.
    pub function: FunctionId,
    /// Block-bodied function the new local function is appended to.
    pub host: FunctionId,
    pub host_block: StmtId,
}

impl ValidatedSelection {
    pub fn stmts(&self) -> &[StmtId] {
        match &self.region {
            Region::Stmts(stmts) => stmts,
            Region::Expr(_) => &[],
        }
    }

    pub fn expr(&self) -> Option<ExprId> {
        match self.region {
            Region::Expr(expr) => Some(expr),
            Region::Stmts(_) => None,
        }
    }

    pub fn root_nodes(&self) -> Vec<NodeId> {
        match &self.region {
            Region::Stmts(stmts) => stmts.iter().copied().map(NodeId::Stmt).collect(),
            Region::Expr(expr) => vec![NodeId::Expr(*expr)],
        }
    }
}

struct StatementRun {
    stmts: Vec<StmtId>,
    in_statement_list: bool,
}

pub fn validate(model: &SemanticModel<'_>, selection: TextRange) -> Result<ValidatedSelection, ExtractIssue> {
    let file = model.file();
    if selection.start > selection.end
        || selection.end > file.text.len()
        || !file.text.is_char_boundary(selection.start)
        || !file.text.is_char_boundary(selection.end)
    {
        return Err(ExtractIssue::InvalidSelection);
    }
    if !file.errors.is_empty() {
        return Err(ExtractIssue::ParseErrors);
    }
    let range = trim_range(&file.text, selection);
    if range.is_empty() {
        return Err(ExtractIssue::EmptySelection);
    }

    if let Some(run) = statement_run(model, range) {
        return statements(model, range, run);
    }
    if let Some(expr) = exact_expr(model, range) {
        return expression(model, range, expr);
    }

    // `var z = [|3;|]` selects the whole declaration.
    if file.text[..range.end].ends_with(';') {
        let inner = trim_range(&file.text, TextRange::new(range.start, range.end - 1));
        if let Some(stmt) = exact_expr(model, inner).and_then(|expr| enclosing_stmt(model, expr)) {
            let stmt_range = file.stmt(stmt).range;
            if stmt_range.end == range.end {
                if let Some(run) = statement_run(model, stmt_range) {
                    return statements(model, stmt_range, run);
                }
            }
        }
    }

    // `[|int i = 0|];` takes the terminating semicolon along.
    if let Some(semi) = file.token_after(range.end).filter(|t| t.kind == SyntaxKind::Semicolon) {
        let extended = TextRange::new(range.start, semi.range.end);
        if let Some(run) = statement_run(model, extended) {
            return statements(model, extended, run);
        }
    }

    Err(ExtractIssue::InvalidSelection)
}

/// Rejects regions whose control flow cannot move into a function of its own.
pub(crate) fn check_control_flow(facts: &RegionFacts) -> Result<(), ExtractIssue> {
    if !facts.leaves.is_empty() {
        return Err(ExtractIssue::JumpOutOfSelection);
    }
    if !facts.returns.is_empty() && facts.end_reachable {
        return Err(ExtractIssue::ReturnWithReachableEnd);
    }
    Ok(())
}

fn statements(model: &SemanticModel<'_>, range: TextRange, run: StatementRun) -> Result<ValidatedSelection, ExtractIssue> {
    let file = model.file();
    let first = *run.stmts.first().ok_or(ExtractIssue::InvalidSelection)?;
    let function = model
        .function_of(NodeId::Stmt(first))
        .ok_or(ExtractIssue::NotInFunction)?;
    let (host, host_block) = host_of(model, function)?;

    if run
        .stmts
        .iter()
        .all(|stmt| matches!(file.stmt(*stmt).kind, StmtKind::LocalFunction(_)))
    {
        return Err(ExtractIssue::DeclarationOnly);
    }

    let mut labels: HashSet<&Name> = HashSet::new();
    let mut declared_functions: Vec<FunctionId> = Vec::new();
    for node in run.stmts.iter().flat_map(|stmt| file.descendants(NodeId::Stmt(*stmt))) {
        let NodeId::Stmt(stmt) = node else { continue };
        match &file.stmt(stmt).kind {
            StmtKind::Labeled { label, .. } => {
                labels.insert(label);
            }
            StmtKind::LocalFunction(_) => declared_functions.extend(model.scopes().function_declared_by(node)),
            _ => {}
        }
    }

    if !labels.is_empty() {
        let jumps_in = file.stmt_ids().any(|stmt| {
            let data = file.stmt(stmt);
            matches!(&data.kind, StmtKind::Goto { label, .. } if labels.contains(label))
                && !range.contains_range(data.range)
                && model.function_of(NodeId::Stmt(stmt)) == Some(function)
        });
        if jumps_in {
            return Err(ExtractIssue::JumpIntoSelection);
        }
    }

    let used_outside = file.expr_ids().any(|expr| {
        !range.contains_range(file.expr(expr).range)
            && matches!(model.resolution(expr), Some(Resolution::LocalFunction(f)) if declared_functions.contains(f))
    });
    if used_outside {
        return Err(ExtractIssue::DeclarationUsedOutside);
    }

    Ok(ValidatedSelection {
        kind: SelectionKind::Statements,
        range,
        region: Region::Stmts(run.stmts),
        replace_range: range,
        in_statement_list: run.in_statement_list,
        function,
        host,
        host_block,
    })
}

fn expression(model: &SemanticModel<'_>, range: TextRange, expr: ExprId) -> Result<ValidatedSelection, ExtractIssue> {
    let file = model.file();
    let node = NodeId::Expr(expr);
    let function = model.function_of(node).ok_or(ExtractIssue::NotInFunction)?;

    // A namespace, type or `base` cannot be extracted on its own; take the statement using it.
    if names_type_or_namespace(model, expr) || matches!(file.expr(expr).kind, ExprKind::Base) {
        let stmt = enclosing_stmt(model, expr).ok_or(ExtractIssue::InvalidSelection)?;
        if !matches!(file.stmt(stmt).kind, StmtKind::Expr(_)) {
            return Err(ExtractIssue::InvalidSelection);
        }
        let stmt_range = file.stmt(stmt).range;
        let run = statement_run(model, stmt_range).ok_or(ExtractIssue::InvalidSelection)?;
        return statements(model, stmt_range, run);
    }

    if let Some(NodeId::Stmt(stmt)) = model.parents().parent(node) {
        let ty = model.type_of(expr);
        let untyped = ty.is_void() || (ty.is_unknown() && model.converted_type(expr).is_none());
        if matches!(file.stmt(stmt).kind, StmtKind::Expr(e) if e == expr) && untyped {
            let stmt_range = file.stmt(stmt).range;
            let run = statement_run(model, stmt_range).ok_or(ExtractIssue::InvalidSelection)?;
            return statements(model, stmt_range, run);
        }
    }

    check_expression_role(model, expr)?;

    let region_expr = match &file.expr(expr).kind {
        ExprKind::Assign {
            op: AssignOp::Assign,
            lhs,
            rhs,
        } if matches!(file.expr(*lhs).kind, ExprKind::Name { .. })
            && matches!(model.resolution(*lhs), Some(Resolution::Local(_))) =>
        {
            *rhs
        }
        _ => expr,
    };

    let ty = model.type_of(region_expr);
    if ty.is_unknown() && model.converted_type(region_expr).is_none() {
        return Err(ExtractIssue::UnknownType);
    }

    let (host, host_block) = host_of(model, function)?;
    Ok(ValidatedSelection {
        kind: SelectionKind::Expression,
        range,
        region: Region::Expr(region_expr),
        replace_range: file.expr(region_expr).range,
        in_statement_list: false,
        function,
        host,
        host_block,
    })
}

fn check_expression_role(model: &SemanticModel<'_>, expr: ExprId) -> Result<(), ExtractIssue> {
    let file = model.file();
    if matches!(
        file.expr(expr).kind,
        ExprKind::Declaration { .. } | ExprKind::Throw(_) | ExprKind::Error
    ) {
        return Err(ExtractIssue::InvalidSelection);
    }

    let is_ref_target = |args: &[Argument]| {
        args.iter()
            .any(|arg| arg.expr == expr && matches!(arg.modifier, Some(ArgModifier::Ref | ArgModifier::Out)))
    };

    match model.parents().parent(NodeId::Expr(expr)) {
        Some(NodeId::Expr(parent)) => match &file.expr(parent).kind {
            ExprKind::Assign { lhs, .. } if *lhs == expr => Err(ExtractIssue::AssignmentTarget),
            ExprKind::Unary { op, .. } if op.is_increment() => Err(ExtractIssue::AssignmentTarget),
            ExprKind::Tuple(_) if is_deconstruction_target(model, parent) => Err(ExtractIssue::AssignmentTarget),
            ExprKind::Invocation { callee, .. } if *callee == expr && model.type_of(expr).is_unknown() => {
                Err(ExtractIssue::MethodGroup)
            }
            ExprKind::Invocation { args, .. } | ExprKind::New { args, .. } | ExprKind::ElementAccess { args, .. }
                if is_ref_target(args) =>
            {
                Err(ExtractIssue::RefArgument)
            }
            ExprKind::NameOf(_) => Err(ExtractIssue::InvalidSelection),
            ExprKind::Is { pattern, .. } if pattern_constant(&pattern.kind) == Some(expr) => {
                Err(ExtractIssue::InvalidSelection)
            }
            _ => Ok(()),
        },
        Some(NodeId::Stmt(parent)) => match &file.stmt(parent).kind {
            StmtKind::Switch { sections, .. }
                if sections
                    .iter()
                    .flat_map(|s| &s.labels)
                    .any(|label| matches!(label, SwitchLabel::Case(e) if *e == expr)) =>
            {
                Err(ExtractIssue::InvalidSelection)
            }
            _ => Ok(()),
        },
        None => Err(ExtractIssue::NoHostBlock),
    }
}

fn pattern_constant(pattern: &PatternKind) -> Option<ExprId> {
    match pattern {
        PatternKind::Constant(expr) => Some(*expr),
        PatternKind::Not(inner) => pattern_constant(&inner.kind),
        PatternKind::Type(_) | PatternKind::Declaration { .. } => None,
    }
}

fn is_deconstruction_target(model: &SemanticModel<'_>, tuple: ExprId) -> bool {
    let file = model.file();
    match model.parents().parent(NodeId::Expr(tuple)) {
        Some(NodeId::Expr(parent)) => match &file.expr(parent).kind {
            ExprKind::Assign { lhs, .. } => *lhs == tuple,
            ExprKind::Tuple(_) => is_deconstruction_target(model, parent),
            _ => false,
        },
        _ => false,
    }
}

/// Names a namespace or a type rather than a value.
fn names_type_or_namespace(model: &SemanticModel<'_>, expr: ExprId) -> bool {
    match &model.file().expr(expr).kind {
        ExprKind::Name { .. } => matches!(
            model.resolution(expr),
            Some(Resolution::Type(_) | Resolution::Namespace(_))
        ),
        ExprKind::PredefinedType(_) => true,
        ExprKind::Member { receiver, .. } => model.member(expr).is_none() && names_type_or_namespace(model, *receiver),
        _ => false,
    }
}

/// The outermost expression spanning exactly `range`.
fn exact_expr(model: &SemanticModel<'_>, range: TextRange) -> Option<ExprId> {
    let file = model.file();
    let candidates: Vec<ExprId> = file.expr_ids().filter(|e| file.expr(*e).range == range).collect();
    candidates.iter().copied().find(|candidate| {
        !matches!(
            model.parents().parent(NodeId::Expr(*candidate)),
            Some(NodeId::Expr(parent)) if candidates.contains(&parent)
        )
    })
}

fn enclosing_stmt(model: &SemanticModel<'_>, expr: ExprId) -> Option<StmtId> {
    model.parents().ancestors(NodeId::Expr(expr)).find_map(|node| match node {
        NodeId::Stmt(stmt) => Some(stmt),
        NodeId::Expr(_) => None,
    })
}

fn statement_run(model: &SemanticModel<'_>, range: TextRange) -> Option<StatementRun> {
    let file = model.file();
    let mut best: Option<(usize, Vec<StmtId>)> = None;
    for id in file.stmt_ids() {
        let stmt = file.stmt(id);
        if !stmt.range.contains_range(range) {
            continue;
        }
        let lists: Vec<&[StmtId]> = match &stmt.kind {
            StmtKind::Block(stmts) => vec![stmts.as_slice()],
            StmtKind::Switch { sections, .. } => sections.iter().map(|s| s.stmts.as_slice()).collect(),
            _ => continue,
        };
        for list in lists {
            let Some(run) = run_in_list(model, list, range) else { continue };
            if best.as_ref().map_or(true, |(len, _)| *len > stmt.range.len()) {
                best = Some((stmt.range.len(), run));
            }
        }
    }
    if let Some((_, stmts)) = best {
        return Some(StatementRun {
            stmts,
            in_statement_list: true,
        });
    }

    let embedded = file
        .stmt_ids()
        .find(|id| file.stmt(*id).range == range && is_embedded(model, *id))?;
    Some(StatementRun {
        stmts: vec![embedded],
        in_statement_list: false,
    })
}

fn run_in_list(model: &SemanticModel<'_>, list: &[StmtId], range: TextRange) -> Option<Vec<StmtId>> {
    let file = model.file();
    let first = list.iter().position(|s| file.stmt(*s).range.start == range.start)?;
    let last = list.iter().position(|s| file.stmt(*s).range.end == range.end)?;
    (first <= last).then(|| list[first..=last].to_vec())
}

/// The body of an `if`, loop or labeled statement.
fn is_embedded(model: &SemanticModel<'_>, stmt: StmtId) -> bool {
    let file = model.file();
    let Some(NodeId::Stmt(parent)) = model.parents().parent(NodeId::Stmt(stmt)) else {
        return false;
    };
    match &file.stmt(parent).kind {
        StmtKind::If {
            then_branch,
            else_branch,
            ..
        } => *then_branch == stmt || *else_branch == Some(stmt),
        StmtKind::While { body, .. }
        | StmtKind::DoWhile { body, .. }
        | StmtKind::For { body, .. }
        | StmtKind::Foreach { body, .. } => *body == stmt,
        StmtKind::Labeled { stmt: inner, .. } => *inner == stmt,
        _ => false,
    }
}

/// The function the extracted local function is declared in, with its body block.
///
/// Lambdas and expression-bodied local functions have no block to host a
/// declaration, so the search moves outwards; an expression-bodied member ends it.
fn host_of(model: &SemanticModel<'_>, function: FunctionId) -> Result<(FunctionId, StmtId), ExtractIssue> {
    let scopes = model.scopes();
    for candidate in scopes.function_chain(function) {
        let data = scopes.function(candidate);
        match data.kind {
            FunctionKind::Lambda => continue,
            FunctionKind::LocalFunction => {
                if let Some(block) = data.block_body() {
                    return Ok((candidate, block));
                }
            }
            FunctionKind::Method | FunctionKind::Constructor | FunctionKind::Accessor => {
                return data
                    .block_body()
                    .map(|block| (candidate, block))
                    .ok_or(ExtractIssue::NoHostBlock);
            }
            FunctionKind::ExpressionProperty | FunctionKind::FieldInitializer => {
                return Err(ExtractIssue::NoHostBlock);
            }
        }
    }
    Err(ExtractIssue::NoHostBlock)
}

#[cfg(test)]
mod tests {
    use carve_syntax::parse;
    use pretty_assertions::assert_eq;

    use super::*;

    fn select(fixture: &str) -> Result<ValidatedSelection, ExtractIssue> {
        let (text, range) = carve_test_utils::extract_selection(fixture);
        let file = parse(&text);
        let model = SemanticModel::new(&file);
        validate(&model, range)
    }

    #[test]
    fn selection_before_semicolon_takes_the_statement() {
        let selection = select("class C { void M() { [|int i = 1 + 2|]; } }").unwrap();
        assert_eq!(selection.kind, SelectionKind::Statements);
        assert_eq!(selection.stmts().len(), 1);
    }

    #[test]
    fn initializer_with_semicolon_takes_the_declaration() {
        let selection = select("class C { void M() { var z = [|3;|] } }").unwrap();
        assert_eq!(selection.kind, SelectionKind::Statements);
    }

    #[test]
    fn exact_expression_is_an_expression_selection() {
        let selection = select("class C { void M(bool b) { System.Console.WriteLine([|b != true|]); } }").unwrap();
        assert_eq!(selection.kind, SelectionKind::Expression);
        assert!(selection.expr().is_some());
    }

    #[test]
    fn void_expression_statement_becomes_a_statement() {
        let selection = select("class C { void M() { [|System.Console.WriteLine(1)|]; } }").unwrap();
        assert_eq!(selection.kind, SelectionKind::Statements);
    }

    #[test]
    fn simple_assignment_peels_the_target() {
        let fixture = "class C { void M(int i) { int v = 0; [|v = v + i|]; } }";
        let (text, _) = carve_test_utils::extract_selection(fixture);
        let selection = select(fixture).unwrap();
        assert_eq!(selection.replace_range.slice(&text), "v + i");
    }

    #[test]
    fn rejections() {
        assert_eq!(
            select("class C { void M(int x) { [|x|] = 1; } }"),
            Err(ExtractIssue::AssignmentTarget)
        );
        assert_eq!(
            select("class C { void M() { [|void L() { }|] } }"),
            Err(ExtractIssue::DeclarationOnly)
        );
        assert_eq!(
            select("class C { int P => [|1 + 2|]; }"),
            Err(ExtractIssue::NoHostBlock)
        );
        assert_eq!(
            select("class C { void M() { goto L; [|L: return;|] } }"),
            Err(ExtractIssue::JumpIntoSelection)
        );
        assert_eq!(
            select("class C { void M() { int x = 1; [|M|](); } }"),
            Err(ExtractIssue::MethodGroup)
        );
        assert_eq!(select("class C { void M() { [|  |] } }"), Err(ExtractIssue::EmptySelection));
    }

    #[test]
    fn offsets_inside_a_character_are_invalid() {
        let text = "class C { void M() { var s = \"é\"; } }";
        let file = parse(text);
        let model = SemanticModel::new(&file);
        let inside = text.find('é').unwrap() + 1;
        let statement = text.find("var").unwrap();
        assert_eq!(
            validate(&model, TextRange::new(statement, inside)),
            Err(ExtractIssue::InvalidSelection)
        );
        assert_eq!(
            validate(&model, TextRange::new(inside, text.len())),
            Err(ExtractIssue::InvalidSelection)
        );
        assert_eq!(
            validate(&model, TextRange::new(0, text.len() + 1)),
            Err(ExtractIssue::InvalidSelection)
        );
    }

    #[test]
    fn embedded_statement_is_accepted() {
        let selection = select("class C { void M(bool b) { if (b) [|System.Console.WriteLine(1);|] } }").unwrap();
        assert!(!selection.in_statement_list);
    }
}
