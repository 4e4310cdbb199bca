//! Flow analysis: CFG construction, definite assignment, liveness, null
//! states and the per-region facts extraction needs.

mod cfg;
mod events;
mod flow;
mod lower;
mod null;
mod region;

pub use crate::cfg::{BasicBlock, BlockId, ControlFlowGraph, Element, JumpKind, Terminator};
pub use crate::events::{
    block_events, closure_summary, element_events, expr_events, lambda_of_local, ClosureSummary, Event, EventKind,
    NullSource,
};
pub use crate::flow::{FunctionFlow, Liveness, NullSnapshot, NullStates, RegionWrites};
pub use crate::lower::{build_body, build_region, BodyCfg, RegionCfg};
pub use crate::null::{expr_state, narrow, state_of_type, NullState};
pub use crate::region::{analyze_region, LocalFlow, Region, RegionFacts};
