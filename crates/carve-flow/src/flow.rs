use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::rc::Rc;

use carve_core::TextRange;
use carve_sema::{FunctionId, LocalId, SemanticModel};
use carve_syntax::StmtId;
use carve_types::RefKind;

use crate::cfg::{BlockId, ControlFlowGraph, Terminator};
use crate::events::{block_events, closure_summary, ClosureSummary, Event, EventKind, NullSource};
use crate::lower::{build_body, BodyCfg};
use crate::null::{expr_state, narrow, state_of_type, NullState};

/// A function body lowered to a CFG with the events of every block, ready
/// for the dataflow analyses below.
pub struct FunctionFlow<'m, 'a> {
    model: &'m SemanticModel<'a>,
    function: FunctionId,
    body: BodyCfg,
    reachable: Vec<bool>,
    events: Vec<Vec<Event>>,
    n_locals: usize,
    summaries: RefCell<HashMap<FunctionId, Rc<ClosureSummary>>>,
    nested: RefCell<HashMap<FunctionId, Option<Rc<FunctionFlow<'m, 'a>>>>>,
}

impl<'m, 'a> FunctionFlow<'m, 'a> {
    /// `None` when `function` has no body.
    pub fn new(model: &'m SemanticModel<'a>, function: FunctionId, region: Option<(StmtId, StmtId)>) -> Option<Self> {
        let root = model.scopes().function(function).body?;
        let body = build_body(model, root, region);
        let reachable = body.cfg.reachable_blocks();
        let events = body.cfg.blocks.iter().map(|block| block_events(model, block)).collect();
        tracing::trace!(
            target: "carve.flow",
            function = function.idx(),
            blocks = body.cfg.blocks.len(),
            "lowered function body"
        );
        Some(Self {
            model,
            function,
            body,
            reachable,
            events,
            n_locals: model.scopes().locals().count(),
            summaries: RefCell::new(HashMap::new()),
            nested: RefCell::new(HashMap::new()),
        })
    }

    pub fn function(&self) -> FunctionId {
        self.function
    }

    pub fn cfg(&self) -> &ControlFlowGraph {
        &self.body.cfg
    }

    pub fn region_entry(&self) -> Option<BlockId> {
        self.body.region_entry
    }

    pub fn region_exit(&self) -> Option<BlockId> {
        self.body.region_exit
    }

    pub fn reachable(&self) -> &[bool] {
        &self.reachable
    }

    pub fn events(&self, bb: BlockId) -> &[Event] {
        &self.events[bb.index()]
    }

    fn declared_within(&self, local: LocalId) -> bool {
        let scopes = self.model.scopes();
        scopes.function_within(scopes.local(local).function, self.function)
    }

    pub fn summary(&self, function: FunctionId) -> Rc<ClosureSummary> {
        self.summaries
            .borrow_mut()
            .entry(function)
            .or_insert_with(|| Rc::new(closure_summary(self.model, function)))
            .clone()
    }

    fn nested_flow(&self, function: FunctionId) -> Option<Rc<FunctionFlow<'m, 'a>>> {
        self.nested
            .borrow_mut()
            .entry(function)
            .or_insert_with(|| FunctionFlow::new(self.model, function, None).map(Rc::new))
            .clone()
    }

    /// Locals definitely assigned on entry to each block.
    pub fn definite_assignment(&self) -> Vec<Option<Vec<bool>>> {
        let scopes = self.model.scopes();
        let params = &scopes.function(self.function).params;
        let init: Vec<bool> = scopes
            .locals()
            .map(|(id, local)| {
                if params.contains(&id) {
                    local.ref_kind != RefKind::Out
                } else {
                    !self.declared_within(id)
                }
            })
            .collect();
        let within = vec![true; self.body.cfg.blocks.len()];
        let (in_states, _) = solve_forward(
            &self.body.cfg,
            &within,
            self.body.cfg.entry,
            None,
            init,
            meet_assigned,
            |bb, state| self.transfer_assigned(bb, state),
            |_, _, state| state,
        );
        in_states
    }

    fn transfer_assigned(&self, bb: BlockId, in_state: &[bool]) -> Vec<bool> {
        let mut state = in_state.to_vec();
        for event in self.events(bb) {
            if let EventKind::Write {
                local, definite: true, ..
            } = event.kind
            {
                state[local.idx()] = true;
            }
        }
        state
    }

    /// Blocks reachable from `start` without passing through `stop`.
    fn reachable_until(&self, start: BlockId, stop: Option<BlockId>) -> Vec<bool> {
        let mut seen = vec![false; self.body.cfg.blocks.len()];
        let mut stack = vec![start];
        while let Some(bb) = stack.pop() {
            if seen[bb.index()] {
                continue;
            }
            seen[bb.index()] = true;
            if Some(bb) != stop {
                stack.extend(self.body.cfg.successors(bb));
            }
        }
        seen
    }

    /// Writes made between the region's entry and exit blocks. `None` when
    /// the body was lowered without a region.
    pub fn region_writes(&self) -> Option<RegionWrites> {
        let entry = self.body.region_entry?;
        let exit = self.body.region_exit;
        let within = self.reachable_until(entry, exit);
        let (in_states, _) = solve_forward(
            &self.body.cfg,
            &within,
            entry,
            exit,
            vec![false; self.n_locals],
            meet_assigned,
            |bb, state| {
                if Some(bb) == exit {
                    state.to_vec()
                } else {
                    self.transfer_assigned(bb, state)
                }
            },
            |_, _, state| state,
        );

        let mut out = RegionWrites::default();
        for bb in self.body.cfg.block_ids() {
            if !within[bb.index()] || Some(bb) == exit {
                continue;
            }
            let Some(mut state) = in_states[bb.index()].clone() else {
                continue;
            };
            for event in self.events(bb) {
                match event.kind {
                    EventKind::Read(local) => {
                        if !state[local.idx()] {
                            out.flows_in.insert(local);
                        }
                    }
                    EventKind::Write { local, definite, .. } => {
                        out.written.insert(local);
                        if definite {
                            state[local.idx()] = true;
                        }
                    }
                    EventKind::Invoke(function) | EventKind::Escape(function) => {
                        let summary = self.summary(function);
                        out.flows_in
                            .extend(summary.reads.iter().copied().filter(|l| !state[l.idx()]));
                        out.written.extend(summary.writes.iter().copied());
                    }
                    EventKind::Deref(_) | EventKind::Assume { .. } | EventKind::Unassume => {}
                }
            }
        }
        out.definitely_written = exit.and_then(|exit| in_states[exit.index()].clone());
        Some(out)
    }

    fn exit_live(&self) -> Vec<bool> {
        let scopes = self.model.scopes();
        let params = &scopes.function(self.function).params;
        scopes
            .locals()
            .map(|(id, local)| {
                if params.contains(&id) {
                    matches!(local.ref_kind, RefKind::Ref | RefKind::Out)
                } else {
                    !self.declared_within(id)
                }
            })
            .collect()
    }

    /// Backward may-liveness of every local.
    pub fn liveness(&self) -> Liveness {
        let n_blocks = self.body.cfg.blocks.len();
        let exit_live = self.exit_live();
        let mut live_in = vec![vec![false; self.n_locals]; n_blocks];
        let mut live_out = vec![vec![false; self.n_locals]; n_blocks];

        let mut worklist: VecDeque<BlockId> = self
            .body
            .cfg
            .block_ids()
            .filter(|bb| self.reachable[bb.index()])
            .collect();
        while let Some(bb) = worklist.pop_front() {
            let out = match self.body.cfg.block(bb).terminator {
                Terminator::Return { .. } | Terminator::Exit | Terminator::Leave { .. } => exit_live.clone(),
                Terminator::Throw { .. } => vec![false; self.n_locals],
                _ => {
                    let mut out = vec![false; self.n_locals];
                    for succ in self.body.cfg.successors(bb) {
                        for (slot, v) in out.iter_mut().zip(&live_in[succ.index()]) {
                            *slot |= *v;
                        }
                    }
                    out
                }
            };
            let new_in = self.live_before(self.events(bb), out.clone());
            live_out[bb.index()] = out;
            if new_in != live_in[bb.index()] {
                live_in[bb.index()] = new_in;
                for pred in self.body.cfg.predecessors(bb) {
                    if self.reachable[pred.index()] {
                        worklist.push_back(*pred);
                    }
                }
            }
        }

        Liveness { live_in, live_out }
    }

    /// Walks `events` backwards from the locals live after them.
    pub fn live_before(&self, events: &[Event], mut live: Vec<bool>) -> Vec<bool> {
        for event in events.iter().rev() {
            match event.kind {
                EventKind::Write {
                    local, definite: true, ..
                } => live[local.idx()] = false,
                EventKind::Read(local) | EventKind::Deref(local) => live[local.idx()] = true,
                EventKind::Invoke(function) | EventKind::Escape(function) => {
                    for local in &self.summary(function).reads {
                        live[local.idx()] = true;
                    }
                }
                EventKind::Write { .. } | EventKind::Assume { .. } | EventKind::Unassume => {}
            }
        }
        live
    }

    /// Entry null states: parameters by annotation, captured locals from
    /// `outer` (or by annotation), everything else not yet assigned.
    fn initial_null_state(&self, outer: Option<&[NullState]>) -> Vec<NullState> {
        let model = self.model;
        let params = &model.scopes().function(self.function).params;
        model
            .scopes()
            .locals()
            .map(|(id, _)| {
                if params.contains(&id) {
                    state_of_type(&model.local_type(id))
                } else if self.declared_within(id) {
                    NullState::NotNull
                } else {
                    match outer {
                        Some(outer) => outer[id.idx()],
                        None => state_of_type(&model.local_type(id)),
                    }
                }
            })
            .collect()
    }

    /// Null states through the body, replaying local functions and lambdas
    /// where they are called or escape.
    pub fn null_states(&self, outer: Option<&[NullState]>, snapshot: Option<NullSnapshot>) -> NullStates {
        let mut runner = NullRunner {
            root: self,
            stack: vec![self.function],
            record: Recording::default(),
            snapshot,
        };
        let entry = self.initial_null_state(outer);
        let run = runner.run(self, entry, true);
        tracing::trace!(
            target: "carve.flow",
            function = self.function.idx(),
            refs = runner.record.refs.len(),
            "null states computed"
        );
        NullStates {
            block_in: run.block_in,
            exit: run.exit,
            refs: runner.record.refs,
            closure_entries: runner.record.closure_entries,
            snapshot: runner.record.snapshot,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegionWrites {
    /// Locals read inside the region before any definite write there.
    pub flows_in: BTreeSet<LocalId>,
    /// Locals any write inside the region may touch.
    pub written: BTreeSet<LocalId>,
    /// Locals definitely written by the region when it completes normally.
    pub definitely_written: Option<Vec<bool>>,
}

#[derive(Debug, Clone)]
pub struct Liveness {
    pub live_in: Vec<Vec<bool>>,
    pub live_out: Vec<Vec<bool>>,
}

/// Requests the states right after the last event of `block` that lies in
/// `range`.
#[derive(Debug, Clone, Copy)]
pub struct NullSnapshot {
    pub block: BlockId,
    pub range: TextRange,
}

#[derive(Debug, Clone)]
pub struct NullStates {
    pub block_in: Vec<Option<Vec<NullState>>>,
    /// Joined over every normal exit.
    pub exit: Option<Vec<NullState>>,
    /// State of the local at each read, write and dereference, closure
    /// bodies included.
    pub refs: HashMap<TextRange, (LocalId, NullState)>,
    /// Joined states at the points each local function or lambda may run.
    pub closure_entries: HashMap<FunctionId, Vec<NullState>>,
    pub snapshot: Option<Vec<NullState>>,
}

#[derive(Default)]
struct Recording {
    refs: HashMap<TextRange, (LocalId, NullState)>,
    closure_entries: HashMap<FunctionId, Vec<NullState>>,
    snapshot: Option<Vec<NullState>>,
}

impl Recording {
    fn reference(&mut self, range: TextRange, local: LocalId, state: NullState) {
        self.refs
            .entry(range)
            .and_modify(|(_, existing)| *existing = existing.join(state))
            .or_insert((local, state));
    }
}

struct Run {
    block_in: Vec<Option<Vec<NullState>>>,
    exit: Option<Vec<NullState>>,
}

struct NullRunner<'r, 'm, 'a> {
    root: &'r FunctionFlow<'m, 'a>,
    /// Functions being replayed; a call back into one of them is recursion.
    stack: Vec<FunctionId>,
    record: Recording,
    snapshot: Option<NullSnapshot>,
}

impl<'r, 'm, 'a> NullRunner<'r, 'm, 'a> {
    fn run(&mut self, flow: &FunctionFlow<'m, 'a>, entry: Vec<NullState>, record: bool) -> Run {
        let model = flow.model;
        let within = flow.reachable.clone();
        let (block_in, block_out) = solve_forward(
            &flow.body.cfg,
            &within,
            flow.body.cfg.entry,
            None,
            entry,
            join_null,
            |bb, state| self.transfer(flow, bb, state, false),
            |pred, succ, state| edge_narrow_null(model, &flow.body.cfg, pred, succ, state),
        );

        if record {
            for bb in flow.body.cfg.block_ids() {
                if let Some(state) = &block_in[bb.index()] {
                    let state = state.clone();
                    self.transfer(flow, bb, &state, true);
                }
            }
        }

        let exits = flow.body.cfg.block_ids().filter_map(|bb| {
            match flow.body.cfg.block(bb).terminator {
                Terminator::Return { .. } | Terminator::Exit => block_out[bb.index()].clone(),
                _ => None,
            }
        });
        Run {
            block_in,
            exit: join_all(exits),
        }
    }

    fn transfer(&mut self, flow: &FunctionFlow<'m, 'a>, bb: BlockId, in_state: &[NullState], record: bool) -> Vec<NullState> {
        let model = flow.model;
        let mut state = in_state.to_vec();
        let mut assumed: Vec<Vec<NullState>> = Vec::new();
        let capturing = record && flow.function == self.root.function && self.snapshot.is_some_and(|p| p.block == bb);
        if capturing {
            self.record.snapshot = Some(state.clone());
        }

        for event in flow.events(bb) {
            match event.kind {
                EventKind::Read(local) => {
                    if record {
                        self.record.reference(event.range, local, state[local.idx()]);
                    }
                }
                EventKind::Deref(local) => state[local.idx()] = NullState::NotNull,
                EventKind::Write { local, value, .. } => {
                    let value = match value {
                        NullSource::Expr(expr) => expr_state(model, expr, &|l| state[l.idx()]),
                        NullSource::State(value) => value,
                    };
                    state[local.idx()] = value;
                    if record {
                        self.record.reference(event.range, local, value);
                    }
                }
                EventKind::Invoke(function) | EventKind::Escape(function) => {
                    self.closure_effect(function, &mut state, record);
                }
                EventKind::Assume { condition, sense } => {
                    assumed.push(state.clone());
                    for (local, value) in narrow(model, condition, sense) {
                        state[local.idx()] = value;
                    }
                }
                EventKind::Unassume => {
                    if let Some(before) = assumed.pop() {
                        for (slot, v) in state.iter_mut().zip(before) {
                            *slot = slot.join(v);
                        }
                    }
                }
            }
            if capturing && self.snapshot.is_some_and(|p| event.accesses_within(p.range)) {
                self.record.snapshot = Some(state.clone());
            }
        }

        state
    }

    fn closure_effect(&mut self, function: FunctionId, state: &mut [NullState], record: bool) {
        if record {
            self.record
                .closure_entries
                .entry(function)
                .and_modify(|existing| {
                    for (slot, v) in existing.iter_mut().zip(state.iter()) {
                        *slot = slot.join(*v);
                    }
                })
                .or_insert_with(|| state.to_vec());
        }

        let summary = self.root.summary(function);
        if summary.writes.is_empty() && !record {
            return;
        }
        if self.stack.contains(&function) {
            for local in &summary.writes {
                state[local.idx()] = NullState::MaybeNull;
            }
            return;
        }
        let Some(flow) = self.root.nested_flow(function) else {
            return;
        };

        self.stack.push(function);
        let entry = flow.initial_null_state(Some(&*state));
        let run = self.run(&flow, entry, record);
        self.stack.pop();

        if let Some(exit) = run.exit {
            for local in &summary.writes {
                state[local.idx()] = state[local.idx()].join(exit[local.idx()]);
            }
        }
    }
}

fn edge_narrow_null(
    model: &SemanticModel<'_>,
    cfg: &ControlFlowGraph,
    pred: BlockId,
    succ: BlockId,
    mut state: Vec<NullState>,
) -> Vec<NullState> {
    let Terminator::If {
        condition,
        then_target,
        else_target,
        ..
    } = cfg.block(pred).terminator
    else {
        return state;
    };
    if then_target == else_target {
        return state;
    }
    let branch = if succ == then_target {
        true
    } else if succ == else_target {
        false
    } else {
        return state;
    };
    for (local, value) in narrow(model, condition, branch) {
        state[local.idx()] = value;
    }
    state
}

fn meet_assigned(out: &mut Vec<bool>, other: &Vec<bool>) {
    for (slot, v) in out.iter_mut().zip(other.iter().copied()) {
        *slot &= v;
    }
}

fn join_null(out: &mut Vec<NullState>, other: &Vec<NullState>) {
    for (slot, v) in out.iter_mut().zip(other.iter().copied()) {
        *slot = slot.join(v);
    }
}

fn join_all(mut states: impl Iterator<Item = Vec<NullState>>) -> Option<Vec<NullState>> {
    let mut out = states.next()?;
    for state in states {
        join_null(&mut out, &state);
    }
    Some(out)
}

/// Forward worklist solver over the blocks marked in `within`.
///
/// Blocks start without a state until a predecessor reaches them, so
/// unreachable code never weakens a join. `stop` receives a state but does
/// not propagate it.
#[allow(clippy::too_many_arguments)]
fn solve_forward<S: Clone + PartialEq>(
    cfg: &ControlFlowGraph,
    within: &[bool],
    entry: BlockId,
    stop: Option<BlockId>,
    init: S,
    mut join: impl FnMut(&mut S, &S),
    mut transfer: impl FnMut(BlockId, &S) -> S,
    mut edge: impl FnMut(BlockId, BlockId, S) -> S,
) -> (Vec<Option<S>>, Vec<Option<S>>) {
    let n_blocks = cfg.blocks.len();
    let mut in_states: Vec<Option<S>> = vec![None; n_blocks];
    let mut out_states: Vec<Option<S>> = vec![None; n_blocks];

    let mut worklist = VecDeque::new();
    worklist.push_back(entry);

    while let Some(bb) = worklist.pop_front() {
        if !within[bb.index()] {
            continue;
        }

        let mut new_in = if bb == entry { Some(init.clone()) } else { None };
        for pred in cfg.predecessors(bb) {
            if !within[pred.index()] || Some(*pred) == stop {
                continue;
            }
            let Some(out) = &out_states[pred.index()] else {
                continue;
            };
            let incoming = edge(*pred, bb, out.clone());
            match &mut new_in {
                Some(state) => join(state, &incoming),
                None => new_in = Some(incoming),
            }
        }
        let Some(new_in) = new_in else { continue };

        if in_states[bb.index()].as_ref() == Some(&new_in) && out_states[bb.index()].is_some() {
            continue;
        }
        let new_out = transfer(bb, &new_in);
        in_states[bb.index()] = Some(new_in);

        if out_states[bb.index()].as_ref() != Some(&new_out) {
            out_states[bb.index()] = Some(new_out);
            if Some(bb) != stop {
                worklist.extend(cfg.successors(bb));
            }
        }
    }

    (in_states, out_states)
}

#[cfg(test)]
mod tests {
    use carve_sema::FunctionKind;
    use carve_syntax::{parse, StmtKind};
    use pretty_assertions::assert_eq;

    use super::*;

    fn method(model: &SemanticModel<'_>, name: &str) -> FunctionId {
        model
            .scopes()
            .functions()
            .find(|(_, f)| f.kind == FunctionKind::Method && f.name.as_ref().is_some_and(|n| n == name))
            .map(|(id, _)| id)
            .unwrap()
    }

    fn local(model: &SemanticModel<'_>, name: &str) -> LocalId {
        model
            .scopes()
            .locals()
            .find(|(_, l)| l.name == name)
            .map(|(id, _)| id)
            .unwrap()
    }

    fn body_stmts(model: &SemanticModel<'_>, function: FunctionId) -> Vec<StmtId> {
        let body = model.scopes().function(function).block_body().unwrap();
        match &model.file().stmt(body).kind {
            StmtKind::Block(stmts) => stmts.clone(),
            _ => unreachable!(),
        }
    }

    #[test]
    fn definite_assignment_if_else() {
        let text = "class C { void M(bool c) { int x; if (c) { x = 1; } else { x = 2; } int y; if (c) { y = 1; } } }";
        let file = parse(text);
        let model = SemanticModel::new(&file);
        let m = method(&model, "M");
        let stmts = body_stmts(&model, m);
        let flow = FunctionFlow::new(&model, m, Some((stmts[3], stmts[3]))).unwrap();
        let assigned = flow.definite_assignment();
        let before = assigned[flow.region_entry().unwrap().index()].as_ref().unwrap();
        assert!(before[local(&model, "x").idx()]);
        assert!(!before[local(&model, "y").idx()]);
        assert!(before[local(&model, "c").idx()]);
        let after = assigned[flow.region_exit().unwrap().index()].as_ref().unwrap();
        assert!(!after[local(&model, "y").idx()]);
    }

    #[test]
    fn region_reads_before_writes_flow_in() {
        let text = "class C { void M(int a, int b) { int x = 0; x = a + x; b = 2; x = b; System.Console.WriteLine(x); } }";
        let file = parse(text);
        let model = SemanticModel::new(&file);
        let m = method(&model, "M");
        let stmts = body_stmts(&model, m);
        let flow = FunctionFlow::new(&model, m, Some((stmts[1], stmts[3]))).unwrap();
        let writes = flow.region_writes().unwrap();
        let names = |set: &BTreeSet<LocalId>| {
            set.iter()
                .map(|l| model.scopes().local(*l).name.to_string())
                .collect::<Vec<_>>()
        };
        assert_eq!(names(&writes.flows_in), vec!["a", "x"]);
        assert_eq!(names(&writes.written), vec!["b", "x"]);

        let liveness = flow.liveness();
        let live_after = &liveness.live_in[flow.region_exit().unwrap().index()];
        assert!(live_after[local(&model, "x").idx()]);
        assert!(!live_after[local(&model, "b").idx()]);
    }

    #[test]
    fn unreachable_after_return() {
        let text = "class C { int M(int a) { return a; a = 2; } }";
        let file = parse(text);
        let model = SemanticModel::new(&file);
        let m = method(&model, "M");
        let stmts = body_stmts(&model, m);
        let flow = FunctionFlow::new(&model, m, Some((stmts[1], stmts[1]))).unwrap();
        let entry = flow.region_entry().unwrap();
        assert!(!flow.reachable()[entry.index()]);
    }

    #[test]
    fn null_check_narrows_then_branch() {
        let text = "#nullable enable\nclass C { void M(string? s) { if (s != null) { var n = s.Length; } var m = s; } }";
        let file = parse(text);
        let model = SemanticModel::new(&file);
        let m = method(&model, "M");
        let flow = FunctionFlow::new(&model, m, None).unwrap();
        let states = flow.null_states(None, None);
        let at = |needle: &str| {
            let start = text.find(needle).unwrap();
            states.refs[&TextRange::new(start, start + 1)].1
        };
        assert_eq!(at("s.Length"), NullState::NotNull);
        assert_eq!(at("s; }"), NullState::MaybeNull);
    }

    #[test]
    fn dereference_makes_the_local_not_null() {
        let text = "#nullable enable\nclass C { void M(string? s) { var n = s.Length; var t = s; } }";
        let file = parse(text);
        let model = SemanticModel::new(&file);
        let m = method(&model, "M");
        let flow = FunctionFlow::new(&model, m, None).unwrap();
        let states = flow.null_states(None, None);
        let first = text.find("s.Length").unwrap();
        let second = text.find("s; }").unwrap();
        assert_eq!(states.refs[&TextRange::new(first, first + 1)].1, NullState::MaybeNull);
        assert_eq!(states.refs[&TextRange::new(second, second + 1)].1, NullState::NotNull);
    }

    #[test]
    fn local_function_calls_replay_their_writes() {
        let text = "#nullable enable\nclass C { void M() { string? s = \"a\"; void Clear() { s = null; } Clear(); var t = s; } }";
        let file = parse(text);
        let model = SemanticModel::new(&file);
        let m = method(&model, "M");
        let flow = FunctionFlow::new(&model, m, None).unwrap();
        let states = flow.null_states(None, None);
        let read = text.find("s; }").unwrap();
        assert_eq!(states.refs[&TextRange::new(read, read + 1)].1, NullState::MaybeNull);
        let write = text.find("s = null").unwrap();
        assert_eq!(states.refs[&TextRange::new(write, write + 1)].1, NullState::Null);
    }

    #[test]
    fn captured_and_ref_locals_stay_live_at_exit() {
        let text = "class C { void M(ref int r, int p) { int x = 0; void F() { x = 1; r = p; } F(); } }";
        let file = parse(text);
        let model = SemanticModel::new(&file);
        let f = model
            .scopes()
            .functions()
            .find(|(_, f)| f.kind == FunctionKind::LocalFunction)
            .map(|(id, _)| id)
            .unwrap();
        let flow = FunctionFlow::new(&model, f, None).unwrap();
        let live = flow.exit_live();
        assert!(live[local(&model, "x").idx()]);
        assert!(live[local(&model, "r").idx()]);

        let m = method(&model, "M");
        let flow = FunctionFlow::new(&model, m, None).unwrap();
        let live = flow.exit_live();
        assert!(live[local(&model, "r").idx()]);
        assert!(!live[local(&model, "p").idx()]);
        assert!(!live[local(&model, "x").idx()]);
    }
}
