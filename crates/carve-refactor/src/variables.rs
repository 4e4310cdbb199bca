//! Variable flow classification.
//!
//! Turns the region facts from `carve-flow` into a role per variable: which
//! ones become parameters (and in which direction), which one is returned,
//! which declarations must move before the call site and which outer locals
//! are merely scratch space for the selection.

use carve_core::Name;
use carve_flow::{LocalFlow, RegionFacts};
use carve_sema::{CallTarget, FunctionId, LocalId, SemanticModel};
use carve_syntax::{ExprKind, NodeId};
use serde::{Deserialize, Serialize};

use crate::selection::{SelectionKind, ValidatedSelection};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    In,
    Out,
    Ref,
}

impl Direction {
    pub fn keyword(self) -> Option<&'static str> {
        match self {
            Direction::In => None,
            Direction::Out => Some("out"),
            Direction::Ref => Some("ref"),
        }
    }
}

/// How one variable touched by the selection is wired into the new function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableRole {
    /// Lives and dies inside the selection.
    Internal,
    Parameter(Direction),
    /// Carried out as the return value. `passed_in` when its incoming value is needed too.
    Returned { passed_in: bool },
    /// Declared outside but only used as scratch space: re-declared at the top of the body.
    Redeclared,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableFlowFact {
    pub local: LocalId,
    pub name: Name,
    pub flow: LocalFlow,
    pub role: VariableRole,
    /// Declared inside and used after the selection.
    pub hoisted: bool,
    /// Not mentioned by the selection; read through an outer local function it calls.
    pub via_local_function: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariableFlow {
    /// In declaration order.
    pub facts: Vec<VariableFlowFact>,
}

impl VariableFlow {
    pub fn fact(&self, local: LocalId) -> Option<&VariableFlowFact> {
        self.facts.iter().find(|fact| fact.local == local)
    }

    pub fn returned(&self) -> Option<&VariableFlowFact> {
        self.facts
            .iter()
            .find(|fact| matches!(fact.role, VariableRole::Returned { .. }))
    }

    /// Parameters in declaration order, cancellation tokens last.
    pub fn parameters(&self, model: &SemanticModel<'_>) -> Vec<(&VariableFlowFact, Direction)> {
        let mut params: Vec<(&VariableFlowFact, Direction)> = self
            .facts
            .iter()
            .filter_map(|fact| match fact.role {
                VariableRole::Parameter(direction) => Some((fact, direction)),
                VariableRole::Returned { passed_in: true } => Some((fact, Direction::In)),
                _ => None,
            })
            .collect();
        params.sort_by_key(|(fact, _)| is_cancellation_token(model, fact.local));
        params
    }

    pub fn hoisted(&self) -> impl Iterator<Item = &VariableFlowFact> {
        self.facts.iter().filter(|fact| fact.hoisted)
    }

    pub fn redeclared(&self) -> impl Iterator<Item = &VariableFlowFact> {
        self.facts
            .iter()
            .filter(|fact| fact.role == VariableRole::Redeclared)
    }
}

pub fn analyze_variables(
    model: &SemanticModel<'_>,
    selection: &ValidatedSelection,
    facts: &RegionFacts,
) -> VariableFlow {
    let scopes = model.scopes();
    let mut entries: Vec<(LocalId, LocalFlow, bool)> = facts
        .locals
        .iter()
        .map(|(local, flow)| (*local, *flow, false))
        .collect();

    for function in called_outer_local_functions(model, selection) {
        for &captured in scopes.captures(function) {
            if entries.iter().any(|(local, _, _)| *local == captured) {
                continue;
            }
            let flow = LocalFlow {
                read_inside: true,
                flows_in: true,
                ..LocalFlow::default()
            };
            entries.push((captured, flow, true));
        }
    }
    entries.sort_by_key(|(local, _, _)| scopes.local(*local).name_range.start);

    let mut outputs: Vec<usize> = Vec::new();
    let mut out = VariableFlow::default();
    for (idx, (local, flow, via_local_function)) in entries.into_iter().enumerate() {
        let role = if via_local_function {
            VariableRole::Parameter(Direction::In)
        } else if flow.declared_inside {
            if flow.referenced_after {
                outputs.push(idx);
            }
            VariableRole::Internal
        } else if flow.written_inside && flow.live_after {
            outputs.push(idx);
            VariableRole::Internal
        } else if flow.written_inside && flow.flows_in {
            VariableRole::Parameter(Direction::Ref)
        } else if flow.written_inside {
            VariableRole::Redeclared
        } else if flow.read_inside || flow.captured_inside {
            VariableRole::Parameter(Direction::In)
        } else {
            VariableRole::Internal
        };
        out.facts.push(VariableFlowFact {
            local,
            name: scopes.local(local).name.clone(),
            flow,
            role,
            hoisted: false,
            via_local_function,
        });
    }

    let single_return = selection.kind == SelectionKind::Statements && outputs.len() == 1;
    for idx in outputs {
        let fact = &mut out.facts[idx];
        let flow = fact.flow;
        if single_return {
            fact.role = VariableRole::Returned {
                passed_in: !flow.declared_inside && (flow.flows_in || !flow.definitely_written),
            };
            continue;
        }
        fact.hoisted = flow.declared_inside;
        let needs_incoming = !flow.declared_inside && flow.flows_in;
        fact.role = if flow.definitely_written && !needs_incoming {
            VariableRole::Parameter(Direction::Out)
        } else {
            VariableRole::Parameter(Direction::Ref)
        };
    }

    for fact in &out.facts {
        tracing::trace!(
            target: "carve.refactor",
            name = %fact.name,
            role = ?fact.role,
            hoisted = fact.hoisted,
            "classified variable"
        );
    }
    out
}

/// Local functions declared outside the selection that it invokes.
pub(crate) fn called_outer_local_functions(model: &SemanticModel<'_>, selection: &ValidatedSelection) -> Vec<FunctionId> {
    let file = model.file();
    let mut out = Vec::new();
    for node in selection.root_nodes().into_iter().flat_map(|root| file.descendants(root)) {
        let NodeId::Expr(expr) = node else { continue };
        if !matches!(file.expr(expr).kind, ExprKind::Invocation { .. }) {
            continue;
        }
        let Some(CallTarget::LocalFunction(function)) = model.call(expr).map(|call| &call.target) else {
            continue;
        };
        let declared_outside = !selection
            .range
            .contains_range(model.scopes().function(*function).range);
        if declared_outside && !out.contains(function) {
            out.push(*function);
        }
    }
    out
}

fn is_cancellation_token(model: &SemanticModel<'_>, local: LocalId) -> bool {
    matches!(
        model.local_type(local).strip_nullable().named_parts(),
        Some((name, _)) if name == "CancellationToken"
    )
}
