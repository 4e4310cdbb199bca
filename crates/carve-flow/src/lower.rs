//! Lowering of statement trees into [`ControlFlowGraph`]s.

use std::collections::HashMap;

use carve_core::Name;
use carve_sema::SemanticModel;
use carve_syntax::{NodeId, StmtId, StmtKind};

use crate::cfg::{BlockId, CfgBuilder, ControlFlowGraph, Element, JumpKind, Terminator};

/// The CFG of a function body, optionally split around a statement region.
#[derive(Debug, Clone)]
pub struct BodyCfg {
    pub cfg: ControlFlowGraph,
    /// Block the region's first statement starts in.
    pub region_entry: Option<BlockId>,
    /// Block control reaches when the region's last statement completes
    /// normally. `None` when it never does.
    pub region_exit: Option<BlockId>,
}

/// Builds the CFG of a body (`Block` statement or expression body).
///
/// With `region`, the statements from `first` to `last` (siblings in one
/// statement list, or one embedded statement) get their own entry and exit
/// blocks so states before and after the region can be read off block
/// boundaries.
pub fn build_body(model: &SemanticModel<'_>, body: NodeId, region: Option<(StmtId, StmtId)>) -> BodyCfg {
    let mut lowering = Lowering::new(model, region, false);
    let entry = lowering.cfg.new_block();
    match body {
        NodeId::Stmt(stmt) => {
            lowering.collect_labels(stmt);
            if let Some(end) = lowering.build_stmt(stmt, entry) {
                lowering.cfg.set_terminator(end, Terminator::Exit);
            }
        }
        NodeId::Expr(expr) => {
            lowering.cfg.set_terminator(
                entry,
                Terminator::Return {
                    value: Some(expr),
                    from: None,
                },
            );
        }
    }
    BodyCfg {
        cfg: lowering.cfg.build(entry),
        region_entry: lowering.region_entry,
        region_exit: lowering.region_exit,
    }
}

/// The CFG of a statement list lowered on its own.
#[derive(Debug, Clone)]
pub struct RegionCfg {
    pub cfg: ControlFlowGraph,
    /// Where control goes when the last statement completes normally.
    pub exit: BlockId,
}

impl RegionCfg {
    /// Whether control can fall out of the end of the region.
    pub fn end_point_reachable(&self) -> bool {
        self.cfg.reachable_blocks()[self.exit.index()]
    }

    /// Reachable jumps whose target lies outside the region.
    pub fn leaves(&self) -> Vec<(StmtId, JumpKind)> {
        let reachable = self.cfg.reachable_blocks();
        self.cfg
            .block_ids()
            .filter(|bb| reachable[bb.index()])
            .filter_map(|bb| match self.cfg.block(bb).terminator {
                Terminator::Leave { kind, from } => Some((from, kind)),
                _ => None,
            })
            .collect()
    }

    /// Reachable `return` statements.
    pub fn returns(&self) -> Vec<StmtId> {
        let reachable = self.cfg.reachable_blocks();
        self.cfg
            .block_ids()
            .filter(|bb| reachable[bb.index()])
            .filter_map(|bb| match self.cfg.block(bb).terminator {
                Terminator::Return { from, .. } => from,
                _ => None,
            })
            .collect()
    }
}

/// Lowers `stmts` as a standalone region. Jumps to targets outside the
/// region end in [`Terminator::Leave`].
pub fn build_region(model: &SemanticModel<'_>, stmts: &[StmtId]) -> RegionCfg {
    let mut lowering = Lowering::new(model, None, true);
    let entry = lowering.cfg.new_block();
    for stmt in stmts {
        lowering.collect_labels(*stmt);
    }
    let exit = lowering.cfg.new_block();
    if let Some(end) = lowering.build_seq(stmts, entry) {
        lowering.cfg.goto(end, exit);
    }
    RegionCfg {
        cfg: lowering.cfg.build(entry),
        exit,
    }
}

#[derive(Debug, Clone, Copy)]
struct JumpContext {
    break_target: BlockId,
    /// `None` for `switch`, which only captures `break`.
    continue_target: Option<BlockId>,
}

struct Lowering<'m, 'a> {
    model: &'m SemanticModel<'a>,
    cfg: CfgBuilder,
    jump_stack: Vec<JumpContext>,
    labels: HashMap<Name, BlockId>,
    region: Option<(StmtId, StmtId)>,
    region_entry: Option<BlockId>,
    region_exit: Option<BlockId>,
    /// Region mode: unresolved jumps leave instead of looping in place.
    standalone: bool,
}

impl<'m, 'a> Lowering<'m, 'a> {
    fn new(model: &'m SemanticModel<'a>, region: Option<(StmtId, StmtId)>, standalone: bool) -> Self {
        Self {
            model,
            cfg: CfgBuilder::new(),
            jump_stack: Vec::new(),
            labels: HashMap::new(),
            region,
            region_entry: None,
            region_exit: None,
            standalone,
        }
    }

    /// Pre-allocates a block for every label so forward `goto`s can target it.
    fn collect_labels(&mut self, root: StmtId) {
        let file = self.model.file();
        for node in file.descendants(NodeId::Stmt(root)) {
            if let NodeId::Stmt(stmt) = node {
                if let StmtKind::Labeled { label, .. } = &file.stmt(stmt).kind {
                    let bb = self.cfg.new_block();
                    self.labels.entry(label.clone()).or_insert(bb);
                }
            }
        }
    }

    fn build_seq(&mut self, stmts: &[StmtId], entry: BlockId) -> Option<BlockId> {
        let mut reachable_current: Option<BlockId> = Some(entry);
        let mut unreachable_current: Option<BlockId> = None;

        for &stmt in stmts {
            if let Some(cur) = reachable_current {
                reachable_current = self.build_stmt(stmt, cur);
                continue;
            }

            let cur = match unreachable_current {
                Some(bb) => bb,
                None => self.cfg.new_block(),
            };
            unreachable_current = self.build_stmt(stmt, cur);
        }

        reachable_current
    }

    fn build_stmt(&mut self, stmt: StmtId, entry: BlockId) -> Option<BlockId> {
        let Some((first, last)) = self.region else {
            return self.build_stmt_inner(stmt, entry);
        };
        let entry = if stmt == first {
            let region_entry = self.cfg.new_block();
            self.cfg.goto(entry, region_entry);
            self.region_entry = Some(region_entry);
            region_entry
        } else {
            entry
        };
        let fallthrough = self.build_stmt_inner(stmt, entry);
        if stmt != last {
            return fallthrough;
        }
        let end = fallthrough?;
        let region_exit = self.cfg.new_block();
        self.cfg.goto(end, region_exit);
        self.region_exit = Some(region_exit);
        Some(region_exit)
    }

    fn jump_target(&self, kind: JumpKind) -> Option<BlockId> {
        match kind {
            JumpKind::Break => self.jump_stack.last().map(|ctx| ctx.break_target),
            JumpKind::Continue => self.jump_stack.iter().rev().find_map(|ctx| ctx.continue_target),
            JumpKind::Goto => None,
        }
    }

    fn jump(&mut self, stmt: StmtId, entry: BlockId, kind: JumpKind, target: Option<BlockId>) {
        let term = match target {
            Some(target) => Terminator::Goto {
                target,
                from: Some(stmt),
            },
            None if self.standalone => Terminator::Leave { kind, from: stmt },
            // Invalid code: treat as the end of the body.
            None => Terminator::Exit,
        };
        self.cfg.set_terminator(entry, term);
    }

    /// Branches on `condition`, or jumps straight to the taken side when the
    /// condition is a constant.
    fn branch(&mut self, stmt: StmtId, entry: BlockId, condition: carve_syntax::ExprId, then_target: BlockId, else_target: BlockId) {
        match self.model.constant_bool(condition) {
            Some(value) => {
                self.cfg.push(entry, Element::Expr(condition));
                let target = if value { then_target } else { else_target };
                self.cfg.set_terminator(
                    entry,
                    Terminator::Goto {
                        target,
                        from: Some(stmt),
                    },
                );
            }
            None => self.cfg.set_terminator(
                entry,
                Terminator::If {
                    condition,
                    then_target,
                    else_target,
                    from: stmt,
                },
            ),
        }
    }

    fn build_stmt_inner(&mut self, stmt: StmtId, entry: BlockId) -> Option<BlockId> {
        let file = self.model.file();
        match &file.stmt(stmt).kind {
            StmtKind::Block(stmts) => self.build_seq(stmts, entry),

            StmtKind::LocalDecl { .. } | StmtKind::LocalFunction(_) | StmtKind::Expr(_) | StmtKind::Empty => {
                self.cfg.push(entry, Element::Stmt(stmt));
                Some(entry)
            }

            StmtKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                let then_entry = self.cfg.new_block();
                let else_entry = self.cfg.new_block();
                let join = self.cfg.new_block();
                self.branch(stmt, entry, *condition, then_entry, else_entry);

                let then_fallthrough = self.build_stmt(*then_branch, then_entry);
                if let Some(bb) = then_fallthrough {
                    self.cfg.goto(bb, join);
                }
                let else_fallthrough = match else_branch {
                    Some(else_branch) => self.build_stmt(*else_branch, else_entry),
                    None => Some(else_entry),
                };
                if let Some(bb) = else_fallthrough {
                    self.cfg.goto(bb, join);
                }
                (then_fallthrough.is_some() || else_fallthrough.is_some()).then_some(join)
            }

            StmtKind::While { condition, body } => {
                let cond_bb = self.cfg.new_block();
                let body_bb = self.cfg.new_block();
                let after_bb = self.cfg.new_block();
                self.cfg.goto(entry, cond_bb);
                self.branch(stmt, cond_bb, *condition, body_bb, after_bb);

                self.jump_stack.push(JumpContext {
                    break_target: after_bb,
                    continue_target: Some(cond_bb),
                });
                let body_fallthrough = self.build_stmt(*body, body_bb);
                self.jump_stack.pop();
                if let Some(bb) = body_fallthrough {
                    self.cfg.goto(bb, cond_bb);
                }
                Some(after_bb)
            }

            StmtKind::DoWhile { body, condition } => {
                let body_bb = self.cfg.new_block();
                let cond_bb = self.cfg.new_block();
                let after_bb = self.cfg.new_block();
                self.cfg.goto(entry, body_bb);

                self.jump_stack.push(JumpContext {
                    break_target: after_bb,
                    continue_target: Some(cond_bb),
                });
                let body_fallthrough = self.build_stmt(*body, body_bb);
                self.jump_stack.pop();
                if let Some(bb) = body_fallthrough {
                    self.cfg.goto(bb, cond_bb);
                }
                self.branch(stmt, cond_bb, *condition, body_bb, after_bb);
                Some(after_bb)
            }

            StmtKind::For {
                init,
                condition,
                update,
                body,
            } => {
                let init_end = self.build_seq(init, entry)?;
                let cond_bb = self.cfg.new_block();
                let body_bb = self.cfg.new_block();
                let update_bb = self.cfg.new_block();
                let after_bb = self.cfg.new_block();
                self.cfg.goto(init_end, cond_bb);

                match condition {
                    Some(condition) => self.branch(stmt, cond_bb, *condition, body_bb, after_bb),
                    None => self.cfg.set_terminator(
                        cond_bb,
                        Terminator::Goto {
                            target: body_bb,
                            from: Some(stmt),
                        },
                    ),
                }

                self.jump_stack.push(JumpContext {
                    break_target: after_bb,
                    continue_target: Some(update_bb),
                });
                let body_fallthrough = self.build_stmt(*body, body_bb);
                self.jump_stack.pop();
                if let Some(bb) = body_fallthrough {
                    self.cfg.goto(bb, update_bb);
                }
                for expr in update {
                    self.cfg.push(update_bb, Element::Expr(*expr));
                }
                self.cfg.goto(update_bb, cond_bb);

                Some(after_bb)
            }

            StmtKind::Foreach { iterable, body, .. } => {
                self.cfg.push(entry, Element::Expr(*iterable));
                let head_bb = self.cfg.new_block();
                let body_bb = self.cfg.new_block();
                let after_bb = self.cfg.new_block();
                self.cfg.goto(entry, head_bb);
                self.cfg.set_terminator(
                    head_bb,
                    Terminator::Multi {
                        targets: vec![body_bb, after_bb],
                        from: stmt,
                    },
                );
                self.cfg.push(body_bb, Element::ForeachVar(stmt));

                self.jump_stack.push(JumpContext {
                    break_target: after_bb,
                    continue_target: Some(head_bb),
                });
                let body_fallthrough = self.build_stmt(*body, body_bb);
                self.jump_stack.pop();
                if let Some(bb) = body_fallthrough {
                    self.cfg.goto(bb, head_bb);
                }
                Some(after_bb)
            }

            StmtKind::Switch { scrutinee, sections } => {
                let after_bb = self.cfg.new_block();
                let section_bbs: Vec<BlockId> = sections.iter().map(|_| self.cfg.new_block()).collect();
                let mut targets = section_bbs.clone();
                let has_default = sections
                    .iter()
                    .any(|s| s.labels.iter().any(|l| matches!(l, carve_syntax::SwitchLabel::Default)));
                if !has_default {
                    targets.push(after_bb);
                }
                self.cfg.set_terminator(
                    entry,
                    Terminator::Switch {
                        expression: *scrutinee,
                        targets,
                        from: stmt,
                    },
                );

                self.jump_stack.push(JumpContext {
                    break_target: after_bb,
                    continue_target: None,
                });
                for (section, bb) in sections.iter().zip(section_bbs) {
                    if let Some(end) = self.build_seq(&section.stmts, bb) {
                        self.cfg.goto(end, after_bb);
                    }
                }
                self.jump_stack.pop();
                Some(after_bb)
            }

            StmtKind::Try {
                body,
                catches,
                finally,
            } => {
                let body_bb = self.cfg.new_block();
                let join = self.cfg.new_block();
                let mut targets = vec![body_bb];
                let mut any_fallthrough = false;

                let catch_bbs: Vec<BlockId> = catches.iter().map(|_| self.cfg.new_block()).collect();
                targets.extend(catch_bbs.iter().copied());
                self.cfg.set_terminator(entry, Terminator::Multi { targets, from: stmt });

                if let Some(end) = self.build_stmt(*body, body_bb) {
                    self.cfg.goto(end, join);
                    any_fallthrough = true;
                }
                for (clause, (catch, bb)) in catches.iter().zip(catch_bbs).enumerate() {
                    if catch.name.is_some() {
                        self.cfg.push(bb, Element::CatchVar { stmt, clause });
                    }
                    if let Some(end) = self.build_stmt(catch.body, bb) {
                        self.cfg.goto(end, join);
                        any_fallthrough = true;
                    }
                }

                match finally {
                    Some(finally) if any_fallthrough => self.build_stmt(*finally, join),
                    Some(finally) => {
                        let bb = self.cfg.new_block();
                        let _ = self.build_stmt(*finally, bb);
                        None
                    }
                    None => any_fallthrough.then_some(join),
                }
            }

            StmtKind::Return(value) => {
                self.cfg.set_terminator(
                    entry,
                    Terminator::Return {
                        value: *value,
                        from: Some(stmt),
                    },
                );
                None
            }

            StmtKind::Throw(exception) => {
                self.cfg.set_terminator(
                    entry,
                    Terminator::Throw {
                        exception: *exception,
                        from: stmt,
                    },
                );
                None
            }

            StmtKind::Break => {
                let target = self.jump_target(JumpKind::Break);
                self.jump(stmt, entry, JumpKind::Break, target);
                None
            }

            StmtKind::Continue => {
                let target = self.jump_target(JumpKind::Continue);
                self.jump(stmt, entry, JumpKind::Continue, target);
                None
            }

            StmtKind::Goto { label, .. } => {
                let target = self.labels.get(label).copied();
                self.jump(stmt, entry, JumpKind::Goto, target);
                None
            }

            StmtKind::Labeled { label, stmt: inner, .. } => {
                let label_bb = match self.labels.get(label) {
                    Some(bb) => *bb,
                    None => {
                        let bb = self.cfg.new_block();
                        self.labels.insert(label.clone(), bb);
                        bb
                    }
                };
                self.cfg.goto(entry, label_bb);
                self.build_stmt(*inner, label_bb)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use carve_syntax::parse;

    use super::*;

    fn method_body(model: &SemanticModel<'_>) -> StmtId {
        model
            .scopes()
            .functions()
            .find_map(|(_, f)| (f.kind == carve_sema::FunctionKind::Method).then(|| f.block_body()).flatten())
            .unwrap()
    }

    fn body_stmts(model: &SemanticModel<'_>) -> Vec<StmtId> {
        match &model.file().stmt(method_body(model)).kind {
            StmtKind::Block(stmts) => stmts.clone(),
            _ => unreachable!(),
        }
    }

    fn region(text: &str, range: std::ops::Range<usize>) -> RegionCfg {
        let file = parse(text);
        let model = SemanticModel::new(&file);
        let stmts = body_stmts(&model)[range].to_vec();
        build_region(&model, &stmts)
    }

    #[test]
    fn return_on_every_path_makes_the_end_unreachable() {
        let text = "class C { int M(bool b) { if (b) { return 1; } else { return 2; } } }";
        let cfg = region(text, 0..1);
        assert!(!cfg.end_point_reachable());
        assert_eq!(cfg.returns().len(), 2);
    }

    #[test]
    fn constant_conditions_take_one_edge() {
        let text = "class C { void M() { while (true) { } } }";
        let cfg = region(text, 0..1);
        assert!(!cfg.end_point_reachable());
    }

    #[test]
    fn jumps_out_of_the_region_leave() {
        let text = "class C { void M(int i) { while (i > 0) { if (i == 2) break; i--; } L: goto L; } }";
        let file = parse(text);
        let model = SemanticModel::new(&file);
        let outer = body_stmts(&model);
        // The loop body on its own: `break` targets the enclosing loop.
        let StmtKind::While { body, .. } = &file.stmt(outer[0]).kind else {
            unreachable!()
        };
        let StmtKind::Block(inner) = &file.stmt(*body).kind else {
            unreachable!()
        };
        let cfg = build_region(&model, inner);
        assert_eq!(cfg.leaves().iter().map(|(_, k)| *k).collect::<Vec<_>>(), vec![JumpKind::Break]);
        assert!(cfg.end_point_reachable());

        // The whole loop keeps its `break` inside.
        let cfg = build_region(&model, &outer[..1]);
        assert!(cfg.leaves().is_empty());

        // `goto L` with its label inside the region loops forever.
        let cfg = build_region(&model, &outer[1..]);
        assert!(cfg.leaves().is_empty());
        assert!(!cfg.end_point_reachable());
    }

    #[test]
    fn region_split_has_its_own_blocks() {
        let text = "class C { void M(int x) { x = 1; x = 2; x = 3; } }";
        let file = parse(text);
        let model = SemanticModel::new(&file);
        let stmts = body_stmts(&model);
        let root = method_body(&model);
        let body = build_body(&model, NodeId::Stmt(root), Some((stmts[1], stmts[1])));
        let entry = body.region_entry.unwrap();
        let exit = body.region_exit.unwrap();
        assert_eq!(body.cfg.block(entry).elements, vec![Element::Stmt(stmts[1])]);
        assert_eq!(body.cfg.block(exit).elements, vec![Element::Stmt(stmts[2])]);
    }
}
