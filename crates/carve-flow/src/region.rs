//! Data flow facts about a region of statements or a single expression,
//! relative to the function containing it.

use std::collections::{BTreeMap, BTreeSet};

use carve_core::TextRange;
use carve_sema::{FunctionId, FunctionKind, LocalId, Resolution, SemanticModel};
use carve_syntax::{ExprId, ExprKind, NodeId, StmtId};

use crate::cfg::{BlockId, Element, JumpKind, Terminator};
use crate::events::{access_of, EventKind};
use crate::flow::{FunctionFlow, NullSnapshot};
use crate::lower::build_region;
use crate::null::{expr_state, NullState};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Region {
    /// Consecutive statements of one statement list.
    Stmts(Vec<StmtId>),
    Expr(ExprId),
}

/// What happens to one local in and around the region.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LocalFlow {
    pub declared_inside: bool,
    pub read_inside: bool,
    pub written_inside: bool,
    /// Read inside before the region definitely writes it.
    pub flows_in: bool,
    /// Live right after the region completes normally.
    pub live_after: bool,
    pub definitely_written: bool,
    /// Definitely assigned when the region starts.
    pub assigned_before: bool,
    /// Mentioned anywhere after the region's end.
    pub referenced_after: bool,
    /// Referenced from a lambda or local function inside the region.
    pub captured_inside: bool,
    /// Joined state over every reference inside the region.
    pub ref_state: Option<NullState>,
    /// State when the region completes normally.
    pub exit_state: Option<NullState>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionFacts {
    pub function: FunctionId,
    pub range: TextRange,
    pub end_reachable: bool,
    /// `return` statements inside the region, not counting nested functions.
    pub returns: Vec<StmtId>,
    /// Jumps to targets outside the region.
    pub leaves: Vec<(StmtId, JumpKind)>,
    pub locals: BTreeMap<LocalId, LocalFlow>,
    /// Null state of an expression region's value.
    pub value_state: Option<NullState>,
}

impl RegionFacts {
    pub fn local(&self, local: LocalId) -> LocalFlow {
        self.locals.get(&local).copied().unwrap_or_default()
    }
}

/// `None` when the region is empty or sits outside any function body.
pub fn analyze_region(model: &SemanticModel<'_>, region: &Region) -> Option<RegionFacts> {
    let file = model.file();
    let (first, range) = match region {
        Region::Stmts(stmts) => {
            let first = *stmts.first()?;
            let last = *stmts.last()?;
            let range = file.stmt(first).range.cover(file.stmt(last).range);
            (NodeId::Stmt(first), range)
        }
        Region::Expr(expr) => (NodeId::Expr(*expr), file.expr(*expr).range),
    };
    let function = model.function_of(first)?;
    let outer = outer_null_states(model, function);

    let mut facts = RegionFacts {
        function,
        range,
        end_reachable: true,
        returns: Vec::new(),
        leaves: Vec::new(),
        locals: syntactic_locals(model, function, region, range),
        value_state: None,
    };

    match region {
        Region::Stmts(stmts) => {
            let standalone = build_region(model, stmts);
            facts.end_reachable = standalone.end_point_reachable();
            facts.returns = standalone.returns();
            facts.leaves = standalone.leaves();

            let flow = FunctionFlow::new(model, function, Some((stmts[0], stmts[stmts.len() - 1])))?;
            statement_flow(&flow, outer.as_deref(), &mut facts);
        }
        Region::Expr(expr) => {
            let flow = FunctionFlow::new(model, function, None)?;
            expression_flow(model, &flow, *expr, outer.as_deref(), &mut facts);
        }
    }

    tracing::debug!(
        target: "carve.flow",
        function = function.idx(),
        locals = facts.locals.len(),
        end_reachable = facts.end_reachable,
        "analyzed region"
    );
    Some(facts)
}

/// States of captured locals where a nested function may start running,
/// taken from the enclosing functions' analyses.
fn outer_null_states(model: &SemanticModel<'_>, function: FunctionId) -> Option<Vec<NullState>> {
    let data = model.scopes().function(function);
    if !matches!(data.kind, FunctionKind::LocalFunction | FunctionKind::Lambda) {
        return None;
    }
    let parent = data.parent?;
    let parent_flow = FunctionFlow::new(model, parent, None)?;
    let parent_outer = outer_null_states(model, parent);
    let mut states = parent_flow.null_states(parent_outer.as_deref(), None);
    states.closure_entries.remove(&function)
}

fn syntactic_locals(
    model: &SemanticModel<'_>,
    function: FunctionId,
    region: &Region,
    range: TextRange,
) -> BTreeMap<LocalId, LocalFlow> {
    let file = model.file();
    let scopes = model.scopes();
    let mut locals: BTreeMap<LocalId, LocalFlow> = BTreeMap::new();

    let roots: Vec<NodeId> = match region {
        Region::Stmts(stmts) => stmts.iter().copied().map(NodeId::Stmt).collect(),
        Region::Expr(expr) => vec![NodeId::Expr(*expr)],
    };
    for node in roots.into_iter().flat_map(|root| file.descendants(root)) {
        let NodeId::Expr(expr) = node else { continue };
        if !matches!(file.expr(expr).kind, ExprKind::Name { .. }) {
            continue;
        }
        let Some(Resolution::Local(local)) = model.resolution(expr) else {
            continue;
        };
        let (read, written) = access_of(model, expr);
        let entry = locals.entry(*local).or_default();
        entry.read_inside |= read;
        entry.written_inside |= written;
        if model.function_of(node) != Some(function) {
            entry.captured_inside = true;
        }
    }

    for (id, data) in scopes.locals() {
        if range.contains_range(data.name_range) && scopes.function_within(data.function, function) {
            locals.entry(id).or_default().declared_inside = true;
        }
    }

    for expr in file.expr_ids() {
        let expr_range = file.expr(expr).range;
        if expr_range.start < range.end {
            continue;
        }
        if let Some(Resolution::Local(local)) = model.resolution(expr) {
            if let Some(flow) = locals.get_mut(local) {
                flow.referenced_after = true;
            }
        }
    }

    locals
}

fn statement_flow(flow: &FunctionFlow<'_, '_>, outer: Option<&[NullState]>, facts: &mut RegionFacts) {
    let (Some(entry), exit) = (flow.region_entry(), flow.region_exit()) else {
        return;
    };
    let writes = flow.region_writes().unwrap_or_default();
    let liveness = flow.liveness();
    let assigned = flow.definite_assignment();
    let null = flow.null_states(outer, None);

    let live_after = exit.map(|exit| &liveness.live_in[exit.index()]);
    let assigned_before = assigned[entry.index()].as_ref();
    let exit_states = exit.and_then(|exit| null.block_in[exit.index()].as_ref());

    for (local, data) in facts.locals.iter_mut() {
        let idx = local.idx();
        data.flows_in = writes.flows_in.contains(local);
        data.written_inside |= writes.written.contains(local);
        data.definitely_written = writes.definitely_written.as_ref().is_some_and(|w| w[idx]);
        data.live_after = live_after.is_some_and(|live| live[idx]);
        data.assigned_before = assigned_before.is_some_and(|a| a[idx]);
        data.exit_state = exit_states.map(|states| states[idx]);
    }
    collect_ref_states(facts, &null.refs);
}

fn expression_flow(
    model: &SemanticModel<'_>,
    flow: &FunctionFlow<'_, '_>,
    expr: ExprId,
    outer: Option<&[NullState]>,
    facts: &mut RegionFacts,
) {
    let range = facts.range;
    let Some(bb) = block_containing(model, flow, range) else {
        return;
    };
    let events = flow.events(bb);
    let inside: Vec<usize> = (0..events.len())
        .filter(|&i| events[i].accesses_within(range))
        .collect();
    let (first, last) = match (inside.first(), inside.last()) {
        (Some(first), Some(last)) => (*first, *last),
        _ => (events.len(), events.len()),
    };

    let assigned = flow.definite_assignment();
    let mut before: Vec<bool> = assigned[bb.index()].clone().unwrap_or_default();
    for event in &events[..first] {
        if let EventKind::Write {
            local, definite: true, ..
        } = event.kind
        {
            before[local.idx()] = true;
        }
    }

    let mut written = BTreeSet::new();
    let mut flows_in = BTreeSet::new();
    let mut definitely = BTreeSet::new();
    for event in events.iter().take(last + 1).skip(first) {
        if !event.accesses_within(range) {
            continue;
        }
        match event.kind {
            EventKind::Read(local) => {
                if !definitely.contains(&local) {
                    flows_in.insert(local);
                }
            }
            EventKind::Write { local, definite, .. } => {
                written.insert(local);
                if definite {
                    definitely.insert(local);
                }
            }
            EventKind::Invoke(function) | EventKind::Escape(function) => {
                let summary = flow.summary(function);
                flows_in.extend(summary.reads.iter().copied().filter(|l| !definitely.contains(l)));
                written.extend(summary.writes.iter().copied());
            }
            EventKind::Deref(_) | EventKind::Assume { .. } | EventKind::Unassume => {}
        }
    }

    let liveness = flow.liveness();
    let after = events.get(last + 1..).unwrap_or(&[]);
    let live_after = flow.live_before(after, liveness.live_out[bb.index()].clone());

    let null = flow.null_states(outer, Some(NullSnapshot { block: bb, range }));
    if let Some(states) = &null.snapshot {
        facts.value_state = Some(expr_state(model, expr, &|l| states[l.idx()]));
    }

    for (local, data) in facts.locals.iter_mut() {
        let idx = local.idx();
        data.flows_in = flows_in.contains(local);
        data.written_inside |= written.contains(local);
        data.definitely_written = definitely.contains(local);
        data.live_after = live_after.get(idx).copied().unwrap_or(false);
        data.assigned_before = before.get(idx).copied().unwrap_or(false);
        data.exit_state = null.snapshot.as_ref().map(|states| states[idx]);
    }
    collect_ref_states(facts, &null.refs);
}

fn collect_ref_states(
    facts: &mut RegionFacts,
    refs: &std::collections::HashMap<TextRange, (LocalId, NullState)>,
) {
    for (range, (local, state)) in refs {
        if !facts.range.contains_range(*range) {
            continue;
        }
        if let Some(data) = facts.locals.get_mut(local) {
            data.ref_state = Some(match data.ref_state {
                Some(existing) => existing.join(*state),
                None => *state,
            });
        }
    }
}

/// The reachable block evaluating the code at `range`.
fn block_containing(model: &SemanticModel<'_>, flow: &FunctionFlow<'_, '_>, range: TextRange) -> Option<BlockId> {
    let file = model.file();
    let cfg = flow.cfg();
    cfg.block_ids().filter(|bb| flow.reachable()[bb.index()]).find(|&bb| {
        let block = cfg.block(bb);
        let in_element = block.elements.iter().any(|element| match element {
            Element::Stmt(stmt) => file.stmt(*stmt).range.contains_range(range),
            Element::Expr(expr) => file.expr(*expr).range.contains_range(range),
            Element::ForeachVar(_) | Element::CatchVar { .. } => false,
        });
        let in_terminator = match &block.terminator {
            Terminator::If { condition: expr, .. }
            | Terminator::Switch { expression: expr, .. }
            | Terminator::Return { value: Some(expr), .. }
            | Terminator::Throw {
                exception: Some(expr), ..
            } => file.expr(*expr).range.contains_range(range),
            _ => false,
        };
        in_element || in_terminator
    })
}

#[cfg(test)]
mod tests {
    use carve_syntax::{parse, StmtKind};
    use pretty_assertions::assert_eq;

    use super::*;

    fn local(model: &SemanticModel<'_>, name: &str) -> LocalId {
        model
            .scopes()
            .locals()
            .find(|(_, l)| l.name == name)
            .map(|(id, _)| id)
            .unwrap()
    }

    fn stmts_between(model: &SemanticModel<'_>, from: &str, to: &str) -> Vec<StmtId> {
        let file = model.file();
        let start = file.text.find(from).unwrap();
        let end = file.text.find(to).unwrap() + to.len();
        let block = file
            .stmt_ids()
            .filter(|s| matches!(file.stmt(*s).kind, StmtKind::Block(_)))
            .filter(|s| file.stmt(*s).range.contains_range(TextRange::new(start, end)))
            .min_by_key(|s| file.stmt(*s).range.len())
            .unwrap();
        let StmtKind::Block(stmts) = &file.stmt(block).kind else {
            unreachable!()
        };
        stmts
            .iter()
            .copied()
            .filter(|s| TextRange::new(start, end).contains_range(file.stmt(*s).range))
            .collect()
    }

    fn find_expr(model: &SemanticModel<'_>, text: &str) -> ExprId {
        let file = model.file();
        file.expr_ids()
            .find(|&e| file.text_of(file.expr(e).range) == text)
            .unwrap()
    }

    #[test]
    fn classifies_inputs_outputs_and_declarations() {
        let text = "class C { int M(int a) { int b = 1; int c; b = a + b; c = b * 2; int d = c; return d + b; } }";
        let file = parse(text);
        let model = SemanticModel::new(&file);
        let stmts = stmts_between(&model, "b = a + b;", "int d = c;");
        let facts = analyze_region(&model, &Region::Stmts(stmts)).unwrap();

        let a = facts.local(local(&model, "a"));
        assert!(a.read_inside && !a.written_inside && a.flows_in);

        let b = facts.local(local(&model, "b"));
        assert!(b.flows_in && b.written_inside && b.live_after && b.definitely_written);

        let c = facts.local(local(&model, "c"));
        assert!(!c.flows_in && c.written_inside && !c.live_after);

        let d = facts.local(local(&model, "d"));
        assert!(d.declared_inside && d.referenced_after && d.live_after);
        assert!(facts.end_reachable);
    }

    #[test]
    fn conditional_writes_are_not_definite() {
        let text = "class C { void M(bool f) { int x = 0; if (f) { x = 1; } System.Console.WriteLine(x); } }";
        let file = parse(text);
        let model = SemanticModel::new(&file);
        let stmts = stmts_between(&model, "if (f)", "x = 1; }");
        let facts = analyze_region(&model, &Region::Stmts(stmts)).unwrap();
        let x = facts.local(local(&model, "x"));
        assert!(x.written_inside && !x.definitely_written && x.live_after && x.assigned_before);
    }

    #[test]
    fn returns_and_jumps_are_reported() {
        let text = "class C { int M(int a) { while (a > 0) { if (a == 3) break; if (a == 5) return a; a--; } return 0; } }";
        let file = parse(text);
        let model = SemanticModel::new(&file);
        let stmts = stmts_between(&model, "if (a == 3)", "a--;");
        let facts = analyze_region(&model, &Region::Stmts(stmts)).unwrap();
        assert_eq!(facts.returns.len(), 1);
        assert_eq!(facts.leaves.iter().map(|(_, k)| *k).collect::<Vec<_>>(), vec![JumpKind::Break]);
        assert!(facts.end_reachable);
    }

    #[test]
    fn expression_regions_capture_the_value_state() {
        let text = "#nullable enable\nclass C { int M(string? s) { if (s == null) return 0; var n = s.Length + 1; return n; } }";
        let file = parse(text);
        let model = SemanticModel::new(&file);
        let expr = find_expr(&model, "s.Length + 1");
        let facts = analyze_region(&model, &Region::Expr(expr)).unwrap();
        let s = facts.local(local(&model, "s"));
        assert!(s.read_inside && s.flows_in && !s.written_inside);
        assert_eq!(s.ref_state, Some(NullState::NotNull));
        assert_eq!(facts.value_state, Some(NullState::NotNull));
    }

    #[test]
    fn condition_of_a_conditional_excludes_its_branches() {
        let text = "class C { void M() { bool b = true; System.Console.WriteLine(b != true ? b = true : b = false); } }";
        let file = parse(text);
        let model = SemanticModel::new(&file);
        let expr = find_expr(&model, "b != true");
        let facts = analyze_region(&model, &Region::Expr(expr)).unwrap();
        let b = facts.local(local(&model, "b"));
        assert!(b.read_inside && b.flows_in);
        assert!(!b.written_inside && !b.definitely_written);
    }

    #[test]
    fn lambda_bodies_see_the_state_where_they_escape() {
        let text = "#nullable enable\nclass C { void Run(System.Func<int> f) { } void M(string? s) { if (s != null) { Run(() => s.Length); } } }";
        let file = parse(text);
        let model = SemanticModel::new(&file);
        let expr = find_expr(&model, "s.Length");
        let facts = analyze_region(&model, &Region::Expr(expr)).unwrap();
        let s = facts.local(local(&model, "s"));
        assert!(s.read_inside);
        assert_eq!(s.ref_state, Some(NullState::NotNull));
    }
}
