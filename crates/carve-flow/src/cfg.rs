use carve_syntax::{ExprId, StmtId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub usize);

impl BlockId {
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// Something a block evaluates, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Element {
    /// A simple statement: local declaration, expression statement, local
    /// function declaration or empty statement.
    Stmt(StmtId),
    /// An expression evaluated for its effects: `for` updates, `foreach`
    /// collections, constant conditions.
    Expr(ExprId),
    /// Assignment of the iteration variable of a `foreach` statement.
    ForeachVar(StmtId),
    /// Binding of the exception variable of the `clause`-th catch of a `try`.
    CatchVar { stmt: StmtId, clause: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicBlock {
    /// Evaluated sequentially. Control flow is represented by the `terminator`.
    pub elements: Vec<Element>,
    pub terminator: Terminator,
}

impl BasicBlock {
    pub fn successors(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.terminator.successors()
    }
}

/// Why a jump left a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JumpKind {
    Break,
    Continue,
    Goto,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Terminator {
    /// Unconditional jump.
    Goto {
        target: BlockId,
        from: Option<StmtId>,
    },
    /// Jump to one of several targets with no condition to narrow on.
    ///
    /// Models `foreach` iteration and exception edges from a `try` block
    /// into its `catch` clauses.
    Multi {
        targets: Vec<BlockId>,
        from: StmtId,
    },
    /// Conditional branch on a boolean condition expression.
    If {
        condition: ExprId,
        then_target: BlockId,
        else_target: BlockId,
        from: StmtId,
    },
    /// Multi-way branch on a `switch` scrutinee.
    Switch {
        expression: ExprId,
        targets: Vec<BlockId>,
        from: StmtId,
    },
    Return {
        value: Option<ExprId>,
        from: Option<StmtId>,
    },
    Throw {
        exception: Option<ExprId>,
        from: StmtId,
    },
    /// A jump whose target lies outside the region being built.
    Leave {
        kind: JumpKind,
        from: StmtId,
    },
    Exit,
}

impl Terminator {
    /// Targets in edge order: `then` before `else`, switch sections in source order.
    pub fn successors(&self) -> impl Iterator<Item = BlockId> + '_ {
        const NONE: &[BlockId] = &[];
        let (direct, listed) = match self {
            Terminator::Goto { target, .. } => ([Some(*target), None], NONE),
            Terminator::If {
                then_target,
                else_target,
                ..
            } => ([Some(*then_target), Some(*else_target)], NONE),
            Terminator::Multi { targets, .. } | Terminator::Switch { targets, .. } => ([None, None], targets.as_slice()),
            Terminator::Return { .. } | Terminator::Throw { .. } | Terminator::Leave { .. } | Terminator::Exit => {
                ([None, None], NONE)
            }
        };
        direct.into_iter().flatten().chain(listed.iter().copied())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlFlowGraph {
    pub entry: BlockId,
    pub blocks: Vec<BasicBlock>,
    preds: Vec<Vec<BlockId>>,
}

impl ControlFlowGraph {
    #[must_use]
    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.index()]
    }

    #[must_use]
    pub fn predecessors(&self, id: BlockId) -> &[BlockId] {
        &self.preds[id.index()]
    }

    pub fn successors(&self, id: BlockId) -> impl Iterator<Item = BlockId> + '_ {
        self.blocks[id.index()].successors()
    }

    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> {
        (0..self.blocks.len()).map(BlockId)
    }

    /// Blocks reachable from the entry, indexed by block.
    #[must_use]
    pub fn reachable_blocks(&self) -> Vec<bool> {
        let mut seen = vec![false; self.blocks.len()];
        let mut work = vec![self.entry];
        while let Some(bb) = work.pop() {
            if !std::mem::replace(&mut seen[bb.index()], true) {
                work.extend(self.successors(bb));
            }
        }
        seen
    }
}

/// Blocks under construction. Every new block ends in [`Terminator::Exit`] until it is wired.
#[derive(Default)]
pub(crate) struct CfgBuilder {
    blocks: Vec<BasicBlock>,
}

impl CfgBuilder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn new_block(&mut self) -> BlockId {
        self.blocks.push(BasicBlock {
            elements: Vec::new(),
            terminator: Terminator::Exit,
        });
        BlockId(self.blocks.len() - 1)
    }

    pub(crate) fn push(&mut self, bb: BlockId, element: Element) {
        self.blocks[bb.index()].elements.push(element);
    }

    pub(crate) fn set_terminator(&mut self, bb: BlockId, terminator: Terminator) {
        self.blocks[bb.index()].terminator = terminator;
    }

    pub(crate) fn goto(&mut self, bb: BlockId, target: BlockId) {
        self.set_terminator(bb, Terminator::Goto { target, from: None });
    }

    pub(crate) fn build(self, entry: BlockId) -> ControlFlowGraph {
        let mut preds: Vec<Vec<BlockId>> = self.blocks.iter().map(|_| Vec::new()).collect();
        for (from, block) in self.blocks.iter().enumerate() {
            block.successors().for_each(|to| preds[to.index()].push(BlockId(from)));
        }
        ControlFlowGraph {
            entry,
            blocks: self.blocks,
            preds,
        }
    }
}

#[cfg(test)]
mod tests {
    use carve_syntax::parse;

    use super::*;

    #[test]
    fn predecessors_follow_terminators() {
        let file = parse("class C { void M() { } }");
        let stmt = file.stmt_ids().next().unwrap();
        let mut b = CfgBuilder::new();
        let entry = b.new_block();
        let left = b.new_block();
        let right = b.new_block();
        let join = b.new_block();
        b.set_terminator(
            entry,
            Terminator::Multi {
                targets: vec![left, right],
                from: stmt,
            },
        );
        b.goto(left, join);
        b.goto(right, join);
        let cfg = b.build(entry);
        assert_eq!(cfg.predecessors(join), &[left, right]);
        assert_eq!(cfg.successors(entry).collect::<Vec<_>>(), vec![left, right]);
        assert!(cfg.reachable_blocks().iter().all(|r| *r));
    }

    #[test]
    fn unwired_blocks_are_unreachable() {
        let file = parse("class C { void M() { } }");
        let stmt = file.stmt_ids().next().unwrap();
        let mut b = CfgBuilder::new();
        let entry = b.new_block();
        let dead = b.new_block();
        let exit = b.new_block();
        b.set_terminator(entry, Terminator::Return { value: None, from: Some(stmt) });
        b.goto(dead, exit);
        let cfg = b.build(entry);
        assert_eq!(cfg.reachable_blocks(), vec![true, false, false]);
        assert_eq!(cfg.predecessors(exit), &[dead]);
        assert_eq!(cfg.successors(entry).count(), 0);
    }
}
