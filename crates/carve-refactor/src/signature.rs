//! Signature synthesis: modifiers, parameters, return type and body form of
//! the extracted function.

use carve_config::{BodyForm, StaticPreference};
use carve_core::Name;
use carve_sema::{CallTarget, LocalId, Resolution, SemanticModel};
use carve_syntax::{ArgModifier, ExprId, ExprKind, NodeId};
use carve_types::Ty;
use serde::{Deserialize, Serialize};

use crate::selection::ValidatedSelection;
use crate::variables::Direction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CaptureMode {
    /// Declared `static`.
    NoEnclosingState,
    UsesEnclosingState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BodyShape {
    /// `=> expr;`
    Expression,
    Block,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub local: LocalId,
    pub name: Name,
    pub ty: Ty,
    pub direction: Direction,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateSignature {
    pub name: Name,
    pub params: Vec<Parameter>,
    /// `Ty::Void` when nothing is returned.
    pub return_type: Ty,
    pub capture: CaptureMode,
    pub is_readonly: bool,
    pub body: BodyShape,
}

impl CandidateSignature {
    pub fn is_static(&self) -> bool {
        self.capture == CaptureMode::NoEnclosingState
    }

    /// `static int NewMethod(int a, out string b)`, with types spelled as they must be at `offset`.
    pub fn header(&self, model: &SemanticModel<'_>, offset: usize) -> String {
        let mut out = String::new();
        if self.is_static() {
            out.push_str("static ");
        } else if self.is_readonly {
            out.push_str("readonly ");
        }
        out.push_str(&model.display_ty(&self.return_type, offset));
        out.push(' ');
        out.push_str(self.name.as_str());
        out.push('(');
        for (idx, param) in self.params.iter().enumerate() {
            if idx > 0 {
                out.push_str(", ");
            }
            if let Some(keyword) = param.direction.keyword() {
                out.push_str(keyword);
                out.push(' ');
            }
            out.push_str(&model.display_ty(&param.ty, offset));
            out.push(' ');
            out.push_str(param.name.as_str());
        }
        out.push(')');
        out
    }

    /// `NewMethod(a, out b)`
    pub fn call(&self) -> String {
        let args: Vec<String> = self
            .params
            .iter()
            .map(|param| match param.direction.keyword() {
                Some(keyword) => format!("{keyword} {}", param.name),
                None => param.name.to_string(),
            })
            .collect();
        format!("{}({})", self.name, args.join(", "))
    }
}

/// How the selection touches the instance it runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StateUsage {
    pub uses_state: bool,
    /// Every use is a field read or a call of a readonly member.
    pub readonly_safe: bool,
}

pub(crate) fn enclosing_state_usage(model: &SemanticModel<'_>, selection: &ValidatedSelection) -> StateUsage {
    let file = model.file();
    let items = model.items();
    let scopes = model.scopes();
    let mut usage = StateUsage {
        uses_state: false,
        readonly_safe: true,
    };
    let mut note = |safe: bool| {
        usage.uses_state = true;
        usage.readonly_safe &= safe;
    };

    for node in selection.root_nodes().into_iter().flat_map(|root| file.descendants(root)) {
        let NodeId::Expr(expr) = node else { continue };
        match &file.expr(expr).kind {
            ExprKind::This => note(this_use_is_readonly(model, expr)),
            ExprKind::Base => note(false),
            ExprKind::Name { .. } => match model.resolution(expr) {
                Some(Resolution::Field { owner, index }) if !items.ty(*owner).fields[*index].is_static => {
                    note(!is_written(model, expr));
                }
                Some(Resolution::Property { owner, index }) => {
                    let property = &items.ty(*owner).properties[*index];
                    if !property.is_static {
                        note(property.is_readonly && !is_written(model, expr));
                    }
                }
                Some(Resolution::Methods { owner, name }) if !is_callee(model, expr) => {
                    if items.ty(*owner).methods_named(name).any(|(_, method)| !method.is_static) {
                        note(false);
                    }
                }
                _ => {}
            },
            ExprKind::Invocation { callee, .. } => match model.call(expr).map(|call| &call.target) {
                Some(CallTarget::Method(key)) if matches!(file.expr(*callee).kind, ExprKind::Name { .. }) => {
                    let method = &items.ty(key.owner).methods[key.index];
                    if !method.is_static {
                        note(method.is_readonly);
                    }
                }
                Some(CallTarget::LocalFunction(function)) => {
                    let data = scopes.function(*function);
                    if !data.is_static && !selection.range.contains_range(data.range) {
                        note(false);
                    }
                }
                _ => {}
            },
            _ => {}
        }
    }
    usage
}

pub(crate) fn capture_mode(preference: StaticPreference, usage: StateUsage) -> CaptureMode {
    if usage.uses_state || !preference.prefers_static() {
        CaptureMode::UsesEnclosingState
    } else {
        CaptureMode::NoEnclosingState
    }
}

/// `readonly` applies to instance functions of mutable structs that only read instance state.
pub(crate) fn wants_readonly(
    model: &SemanticModel<'_>,
    selection: &ValidatedSelection,
    usage: StateUsage,
    capture: CaptureMode,
) -> bool {
    if capture == CaptureMode::NoEnclosingState || !usage.uses_state || !usage.readonly_safe {
        return false;
    }
    let scopes = model.scopes();
    let member = scopes.member_function(selection.function);
    scopes.function(member).owner.is_some_and(|owner| {
        let item = model.items().ty(owner);
        item.is_struct() && !item.is_readonly
    })
}

/// `=>` when the body is one returned expression and the style allows it.
pub(crate) fn body_shape(style: BodyForm, single_expression: Option<&str>) -> BodyShape {
    match single_expression {
        Some(text) if style.allows_expression_body(!text.contains('\n')) => BodyShape::Expression,
        _ => BodyShape::Block,
    }
}

fn this_use_is_readonly(model: &SemanticModel<'_>, this: ExprId) -> bool {
    let file = model.file();
    let items = model.items();
    let Some(NodeId::Expr(member)) = model.parents().parent(NodeId::Expr(this)) else {
        return false;
    };
    if !matches!(&file.expr(member).kind, ExprKind::Member { receiver, .. } if *receiver == this) {
        return false;
    }
    if let Some(NodeId::Expr(call)) = model.parents().parent(NodeId::Expr(member)) {
        if let Some(CallTarget::Method(key)) = model.call(call).map(|c| &c.target) {
            return is_callee(model, member) && items.ty(key.owner).methods[key.index].is_readonly;
        }
    }
    match model.member(member) {
        Some(carve_sema::MemberRef::Field { .. }) => !is_written(model, member),
        Some(carve_sema::MemberRef::Property { owner, index }) => {
            items.ty(owner).properties[index].is_readonly && !is_written(model, member)
        }
        _ => false,
    }
}

fn is_callee(model: &SemanticModel<'_>, expr: ExprId) -> bool {
    matches!(
        model.parents().parent(NodeId::Expr(expr)),
        Some(NodeId::Expr(parent)) if matches!(&model.file().expr(parent).kind, ExprKind::Invocation { callee, .. } if *callee == expr)
    )
}

/// Assigned, incremented or passed by reference.
pub(crate) fn is_written(model: &SemanticModel<'_>, expr: ExprId) -> bool {
    let file = model.file();
    let Some(NodeId::Expr(parent)) = model.parents().parent(NodeId::Expr(expr)) else {
        return false;
    };
    match &file.expr(parent).kind {
        ExprKind::Assign { lhs, .. } => *lhs == expr,
        ExprKind::Unary { op, .. } => op.is_increment(),
        ExprKind::Invocation { args, .. } | ExprKind::New { args, .. } => args
            .iter()
            .any(|arg| arg.expr == expr && matches!(arg.modifier, Some(ArgModifier::Ref | ArgModifier::Out))),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_overrides_the_static_preference() {
        let needs_state = StateUsage {
            uses_state: true,
            readonly_safe: true,
        };
        let stateless = StateUsage {
            uses_state: false,
            readonly_safe: true,
        };
        assert_eq!(capture_mode(StaticPreference::Always, needs_state), CaptureMode::UsesEnclosingState);
        assert_eq!(capture_mode(StaticPreference::Always, stateless), CaptureMode::NoEnclosingState);
        assert_eq!(capture_mode(StaticPreference::Default, stateless), CaptureMode::NoEnclosingState);
        assert_eq!(capture_mode(StaticPreference::Never, stateless), CaptureMode::UsesEnclosingState);
    }

    #[test]
    fn expression_bodies_follow_the_style() {
        assert_eq!(body_shape(BodyForm::Block, Some("a")), BodyShape::Block);
        assert_eq!(body_shape(BodyForm::WhenPossible, Some("a\n+ b")), BodyShape::Expression);
        assert_eq!(body_shape(BodyForm::WhenOnSingleLine, Some("a\n+ b")), BodyShape::Block);
        assert_eq!(body_shape(BodyForm::WhenOnSingleLine, Some("a + b")), BodyShape::Expression);
        assert_eq!(body_shape(BodyForm::WhenPossible, None), BodyShape::Block);
    }
}
