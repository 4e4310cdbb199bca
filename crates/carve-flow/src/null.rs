//! Null states of expressions and the narrowing null tests perform.

use carve_sema::{LocalId, Resolution, SemanticModel};
use carve_syntax::{AssignOp, BinaryOp, ExprId, ExprKind, LiteralKind, PatternKind, UnaryOp};
use carve_types::Ty;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NullState {
    NotNull,
    MaybeNull,
    Null,
}

impl NullState {
    #[must_use]
    pub fn join(self, other: Self) -> Self {
        if self == other {
            self
        } else {
            Self::MaybeNull
        }
    }

    /// Whether a value in this state may be null.
    #[must_use]
    pub fn may_be_null(self) -> bool {
        !matches!(self, Self::NotNull)
    }
}

/// The state a value of type `ty` starts in when nothing more is known.
#[must_use]
pub fn state_of_type(ty: &Ty) -> NullState {
    if ty.is_nullable() {
        NullState::MaybeNull
    } else {
        NullState::NotNull
    }
}

fn strip_parens(model: &SemanticModel<'_>, mut expr: ExprId) -> ExprId {
    while let ExprKind::Paren(inner) = model.file().expr(expr).kind {
        expr = inner;
    }
    expr
}

fn is_null_literal(model: &SemanticModel<'_>, expr: ExprId) -> bool {
    matches!(
        model.file().expr(strip_parens(model, expr)).kind,
        ExprKind::Literal(LiteralKind::Null)
    )
}

/// The local `expr` names, looking through parentheses.
pub(crate) fn local_of(model: &SemanticModel<'_>, expr: ExprId) -> Option<LocalId> {
    let expr = strip_parens(model, expr);
    match (&model.file().expr(expr).kind, model.resolution(expr)) {
        (ExprKind::Name { .. }, Some(Resolution::Local(local))) => Some(*local),
        _ => None,
    }
}

/// Whether `expr` ends a chain with a `?.` or `?[` link, which
/// short-circuits the whole chain to null.
fn in_conditional_chain(model: &SemanticModel<'_>, mut expr: ExprId) -> bool {
    let file = model.file();
    loop {
        expr = match &file.expr(expr).kind {
            ExprKind::Member { conditional: true, .. } | ExprKind::ElementAccess { conditional: true, .. } => {
                return true
            }
            ExprKind::Member { receiver, .. } | ExprKind::ElementAccess { receiver, .. } => *receiver,
            ExprKind::Invocation { callee, .. } => *callee,
            _ => return false,
        };
    }
}

/// The null state of `expr`'s value, reading locals from `lookup`.
pub fn expr_state(model: &SemanticModel<'_>, expr: ExprId, lookup: &dyn Fn(LocalId) -> NullState) -> NullState {
    let file = model.file();
    match &file.expr(expr).kind {
        ExprKind::Literal(LiteralKind::Null) => NullState::Null,
        ExprKind::Default(_) => {
            let info = model.expr_info(expr);
            let ty = info.map_or(Ty::Unknown, |info| info.converted_or_natural().clone());
            if ty.is_value_type(model.items()) && !ty.is_nullable() {
                NullState::NotNull
            } else {
                NullState::Null
            }
        }
        ExprKind::Literal(_)
        | ExprKind::New { .. }
        | ExprKind::NewArray { .. }
        | ExprKind::Tuple(_)
        | ExprKind::Lambda { .. }
        | ExprKind::NameOf(_)
        | ExprKind::This
        | ExprKind::Base
        | ExprKind::PredefinedType(_)
        | ExprKind::Unary { .. }
        | ExprKind::Is { .. }
        | ExprKind::Range { .. } => NullState::NotNull,
        ExprKind::Name { .. } => match model.resolution(expr) {
            Some(Resolution::Local(local)) => lookup(*local),
            _ => state_of_type(&model.type_of(expr)),
        },
        ExprKind::Paren(inner) => expr_state(model, *inner, lookup),
        ExprKind::Cast { expr: inner, .. } => {
            if model.type_of(expr).is_nullable() {
                NullState::MaybeNull
            } else {
                expr_state(model, *inner, lookup)
            }
        }
        ExprKind::As { .. } => NullState::MaybeNull,
        ExprKind::Member { .. } | ExprKind::ElementAccess { .. } | ExprKind::Invocation { .. }
            if in_conditional_chain(model, expr) =>
        {
            NullState::MaybeNull
        }
        ExprKind::Member { receiver, name, .. } => {
            let on_string = matches!(
                file.expr(*receiver).kind,
                ExprKind::PredefinedType(carve_syntax::PredefinedType::String)
            );
            if on_string && name == "Empty" {
                NullState::NotNull
            } else {
                state_of_type(&model.type_of(expr))
            }
        }
        ExprKind::Invocation { callee, .. } => match &file.expr(*callee).kind {
            ExprKind::Member { name, .. } if name == "ToString" => NullState::NotNull,
            _ => state_of_type(&model.type_of(expr)),
        },
        ExprKind::ElementAccess { .. } => state_of_type(&model.type_of(expr)),
        ExprKind::Binary {
            op: BinaryOp::Coalesce,
            lhs,
            rhs,
        } => coalesce(model, *lhs, *rhs, lookup),
        ExprKind::Binary { .. } => NullState::NotNull,
        ExprKind::Conditional {
            condition,
            then_expr,
            else_expr,
        } => {
            let when_true = narrow(model, *condition, true);
            let when_false = narrow(model, *condition, false);
            let on_true = expr_state(model, *then_expr, &|local| overlay(&when_true, local, lookup));
            let on_false = expr_state(model, *else_expr, &|local| overlay(&when_false, local, lookup));
            on_true.join(on_false)
        }
        ExprKind::Assign {
            op: AssignOp::Assign,
            rhs,
            ..
        } => expr_state(model, *rhs, lookup),
        ExprKind::Assign {
            op: AssignOp::Compound(BinaryOp::Coalesce),
            lhs,
            rhs,
        } => coalesce(model, *lhs, *rhs, lookup),
        ExprKind::Assign { .. } => NullState::NotNull,
        ExprKind::Declaration { .. } | ExprKind::Throw(_) | ExprKind::Error => state_of_type(&model.type_of(expr)),
    }
}

fn coalesce(
    model: &SemanticModel<'_>,
    lhs: ExprId,
    rhs: ExprId,
    lookup: &dyn Fn(LocalId) -> NullState,
) -> NullState {
    if expr_state(model, lhs, lookup) == NullState::NotNull {
        NullState::NotNull
    } else {
        expr_state(model, rhs, lookup)
    }
}

fn overlay(narrowed: &[(LocalId, NullState)], local: LocalId, lookup: &dyn Fn(LocalId) -> NullState) -> NullState {
    narrowed
        .iter()
        .rev()
        .find(|(l, _)| *l == local)
        .map_or_else(|| lookup(local), |(_, state)| *state)
}

/// Locals whose state is known after `condition` evaluates to `sense`.
pub fn narrow(model: &SemanticModel<'_>, condition: ExprId, sense: bool) -> Vec<(LocalId, NullState)> {
    let file = model.file();
    let condition = strip_parens(model, condition);
    match &file.expr(condition).kind {
        ExprKind::Unary {
            op: UnaryOp::Not,
            expr,
        } => narrow(model, *expr, !sense),
        ExprKind::Binary {
            op: BinaryOp::And,
            lhs,
            rhs,
        } if sense => {
            let mut out = narrow(model, *lhs, true);
            out.extend(narrow(model, *rhs, true));
            out
        }
        ExprKind::Binary {
            op: BinaryOp::Or,
            lhs,
            rhs,
        } if !sense => {
            let mut out = narrow(model, *lhs, false);
            out.extend(narrow(model, *rhs, false));
            out
        }
        ExprKind::Binary {
            op: op @ (BinaryOp::Eq | BinaryOp::Ne),
            lhs,
            rhs,
        } => {
            let local = if is_null_literal(model, *rhs) {
                local_of(model, *lhs)
            } else if is_null_literal(model, *lhs) {
                local_of(model, *rhs)
            } else {
                None
            };
            let Some(local) = local else { return Vec::new() };
            let is_null = (*op == BinaryOp::Eq) == sense;
            vec![(local, if is_null { NullState::Null } else { NullState::NotNull })]
        }
        ExprKind::Is { expr, pattern } => {
            let Some(local) = local_of(model, *expr) else {
                return Vec::new();
            };
            let (pattern, sense) = match &pattern.kind {
                PatternKind::Not(inner) => (&**inner, !sense),
                _ => (pattern, sense),
            };
            match &pattern.kind {
                PatternKind::Constant(value) if is_null_literal(model, *value) => {
                    vec![(local, if sense { NullState::Null } else { NullState::NotNull })]
                }
                PatternKind::Type(_) | PatternKind::Declaration { .. } if sense => vec![(local, NullState::NotNull)],
                _ => Vec::new(),
            }
        }
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use carve_syntax::parse;
    use pretty_assertions::assert_eq;

    use super::*;

    fn find_expr(model: &SemanticModel<'_>, text: &str) -> ExprId {
        let file = model.file();
        file.expr_ids()
            .find(|&e| file.text_of(file.expr(e).range) == text)
            .unwrap()
    }

    #[test]
    fn join_is_least_precise() {
        assert_eq!(NullState::NotNull.join(NullState::NotNull), NullState::NotNull);
        assert_eq!(NullState::NotNull.join(NullState::Null), NullState::MaybeNull);
        assert_eq!(NullState::Null.join(NullState::Null), NullState::Null);
        assert_eq!(NullState::MaybeNull.join(NullState::NotNull), NullState::MaybeNull);
    }

    #[test]
    fn literal_and_operator_states() {
        let text = "#nullable enable\nclass C { void M(string? s, object o) { var a = s ?? \"x\"; var b = o as string; var c = s?.Length; var d = default(string); var e = (s); } }";
        let file = parse(text);
        let model = SemanticModel::new(&file);
        let lookup = |_: LocalId| NullState::MaybeNull;
        assert_eq!(expr_state(&model, find_expr(&model, "s ?? \"x\""), &lookup), NullState::NotNull);
        assert_eq!(expr_state(&model, find_expr(&model, "o as string"), &lookup), NullState::MaybeNull);
        assert_eq!(expr_state(&model, find_expr(&model, "s?.Length"), &lookup), NullState::MaybeNull);
        assert_eq!(expr_state(&model, find_expr(&model, "default(string)"), &lookup), NullState::Null);
        assert_eq!(expr_state(&model, find_expr(&model, "(s)"), &lookup), NullState::MaybeNull);
    }

    #[test]
    fn conditional_access_chains_stay_maybe_null() {
        let text = "#nullable enable\nclass C { void M(string? a, string b) { var x = a?.ToString(); var y = a?.Trim().ToString(); var z = b.ToString(); } }";
        let file = parse(text);
        let model = SemanticModel::new(&file);
        let lookup = |_: LocalId| NullState::NotNull;
        assert_eq!(expr_state(&model, find_expr(&model, "a?.ToString()"), &lookup), NullState::MaybeNull);
        assert_eq!(expr_state(&model, find_expr(&model, "a?.Trim().ToString()"), &lookup), NullState::MaybeNull);
        assert_eq!(expr_state(&model, find_expr(&model, "b.ToString()"), &lookup), NullState::NotNull);
    }

    #[test]
    fn null_tests_narrow_both_branches() {
        let text = "class C { void M(string s, string t) { if (s != null && !(t is null)) { } if (s == null || t is not null) { } } }";
        let file = parse(text);
        let model = SemanticModel::new(&file);
        let and = find_expr(&model, "s != null && !(t is null)");
        let narrowed = narrow(&model, and, true);
        assert_eq!(narrowed.iter().map(|(_, s)| *s).collect::<Vec<_>>(), vec![NullState::NotNull, NullState::NotNull]);
        assert!(narrow(&model, and, false).is_empty());

        let or = find_expr(&model, "s == null || t is not null");
        let narrowed = narrow(&model, or, false);
        assert_eq!(narrowed.iter().map(|(_, s)| *s).collect::<Vec<_>>(), vec![NullState::NotNull, NullState::Null]);
    }

    #[test]
    fn conditional_joins_narrowed_branches() {
        let text = "class C { string M(string? s) { return s != null ? s : \"\"; } }";
        let file = parse(text);
        let model = SemanticModel::new(&file);
        let conditional = find_expr(&model, "s != null ? s : \"\"");
        let state = expr_state(&model, conditional, &|_| NullState::MaybeNull);
        assert_eq!(state, NullState::NotNull);
    }
}
