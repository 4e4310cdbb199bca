//! Flow-sensitive nullability of parameter and return types.
//!
//! Narrowing only ever touches reference types, and only where nullable
//! annotations are enabled at the selection. Declared types are never
//! mutated; the narrowed type is computed from the region's null states.

use carve_flow::{NullState, RegionFacts};
use carve_sema::{LocalId, SemanticModel};
use carve_syntax::ExprId;
use carve_types::Ty;

use crate::variables::{Direction, VariableFlowFact};

pub(crate) struct Narrower<'m, 'a> {
    model: &'m SemanticModel<'a>,
    enabled: bool,
}

impl<'m, 'a> Narrower<'m, 'a> {
    pub(crate) fn new(model: &'m SemanticModel<'a>, offset: usize) -> Self {
        Narrower {
            model,
            enabled: model.file().nullable_enabled_at(offset),
        }
    }

    pub(crate) fn parameter_type(&self, fact: &VariableFlowFact, direction: Direction) -> Ty {
        let declared = self.model.local_type(fact.local);
        let state = match direction {
            Direction::In => fact.flow.ref_state,
            // Wider of the entry and exit states.
            Direction::Ref => join(fact.flow.ref_state, fact.flow.exit_state),
            Direction::Out => None,
        };
        self.apply(declared, state, false)
    }

    pub(crate) fn returned_variable_type(&self, local: LocalId, exit_state: Option<NullState>) -> Ty {
        self.apply(self.model.local_type(local), exit_state, false)
    }

    /// Type of an extracted expression: its natural type, or the converted
    /// type when it has none (lambdas), narrowed by the value's null state.
    pub(crate) fn expression_type(&self, expr: ExprId, facts: &RegionFacts) -> Ty {
        let natural = self.model.type_of(expr);
        let ty = if natural.is_unknown() {
            self.model.converted_type(expr).cloned().unwrap_or(Ty::Unknown)
        } else {
            natural
        };
        self.apply(ty, facts.value_state, true)
    }

    fn apply(&self, ty: Ty, state: Option<NullState>, widen: bool) -> Ty {
        if !self.enabled || !ty.strip_nullable().is_reference_type(self.model.items()) {
            return ty;
        }
        match state {
            Some(NullState::NotNull) => ty.strip_nullable().clone(),
            Some(state) if widen && state.may_be_null() => ty.make_nullable(),
            _ => ty,
        }
    }
}

fn join(a: Option<NullState>, b: Option<NullState>) -> Option<NullState> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.join(b)),
        (a, None) => a,
        (None, b) => b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_prefers_known_states() {
        assert_eq!(join(None, Some(NullState::NotNull)), Some(NullState::NotNull));
        assert_eq!(
            join(Some(NullState::NotNull), Some(NullState::Null)),
            Some(NullState::MaybeNull)
        );
        assert_eq!(join(None, None), None);
    }
}
