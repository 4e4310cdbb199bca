//! Overload and generic-inference drift at the call site.
//!
//! An extracted lambda or literal takes part in the resolution of every call
//! it is an argument of. Once it is replaced by an invocation with a fixed
//! type, those calls may bind differently. Each enclosing call is re-resolved
//! in the edited text and compared with its original binding.

use carve_core::{FileId, Name, TextEdit, TextRange, WorkspaceEdit};
use carve_sema::{CallBinding, CallTarget, MethodKey, SemanticModel, TypeId};
use carve_syntax::{parse, Argument, ExprId, ExprKind, LambdaBody, NodeId, StmtKind, UnaryOp};
use carve_types::{Ty, TypeEnv};

use crate::selection::ValidatedSelection;

#[derive(Debug, Clone, PartialEq, Eq)]
enum BoundTarget {
    Method(MethodKey),
    /// Local function ids shift when a function is added, names do not.
    LocalFunction(Option<Name>),
    Delegate(Ty),
    Constructor { owner: TypeId, index: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Binding {
    target: BoundTarget,
    type_args: Vec<Ty>,
}

impl Binding {
    fn of(model: &SemanticModel<'_>, call: &CallBinding) -> Self {
        let target = match &call.target {
            CallTarget::Method(key) => BoundTarget::Method(*key),
            CallTarget::LocalFunction(function) => {
                BoundTarget::LocalFunction(model.scopes().function(*function).name.clone())
            }
            CallTarget::Delegate(ty) => BoundTarget::Delegate(ty.clone()),
            CallTarget::Constructor { owner, index } => BoundTarget::Constructor {
                owner: *owner,
                index: *index,
            },
        };
        Binding {
            target,
            type_args: call.type_args.clone(),
        }
    }
}

/// A call enclosing the selection whose binding must survive the rewrite.
#[derive(Debug, Clone)]
pub(crate) struct WatchedCall {
    expr: ExprId,
    range: TextRange,
    binding: Binding,
}

/// Invocations and object creations the selected expression is an argument of, at any depth.
pub(crate) fn watched_calls(model: &SemanticModel<'_>, selection: &ValidatedSelection) -> Vec<WatchedCall> {
    let Some(expr) = selection.expr() else {
        return Vec::new();
    };
    let file = model.file();
    model
        .parents()
        .ancestors(NodeId::Expr(expr))
        .filter_map(|node| match node {
            NodeId::Expr(call) if matches!(file.expr(call).kind, ExprKind::Invocation { .. } | ExprKind::New { .. }) => {
                let binding = model.call(call)?;
                Some(WatchedCall {
                    expr: call,
                    range: file.expr(call).range,
                    binding: Binding::of(model, binding),
                })
            }
            _ => None,
        })
        .collect()
}

/// The calls in `watched` that bind differently once `edit` is applied to `source`.
pub(crate) fn drifted<'w>(
    watched: &'w [WatchedCall],
    edit: &WorkspaceEdit,
    file_id: &FileId,
    source: &str,
) -> Vec<&'w WatchedCall> {
    if watched.is_empty() {
        return Vec::new();
    }
    let Ok(text) = edit.apply_to(file_id, source) else {
        return watched.iter().collect();
    };
    let file = parse(&text);
    let model = SemanticModel::new(&file);
    watched
        .iter()
        .filter(|call| {
            let range = TextRange::new(
                edit.map_offset(file_id, call.range.start),
                edit.map_offset(file_id, call.range.end),
            );
            let rebound = file
                .expr_ids()
                .filter(|expr| file.expr(*expr).range == range)
                .find_map(|expr| model.call(expr))
                .map(|binding| Binding::of(&model, binding));
            rebound.as_ref() != Some(&call.binding)
        })
        .collect()
}

/// The type the context converted the selected expression to, when using it as
/// the return type could restore the original binding.
pub(crate) fn converted_return_type(model: &SemanticModel<'_>, selection: &ValidatedSelection) -> Option<Ty> {
    let expr = selection.expr()?;
    let natural = model.type_of(expr);
    let converted = model.converted_type(expr)?;
    (!natural.is_unknown() && *converted != natural).then(|| converted.clone())
}

/// Casts pinning the other arguments of `call` to the types they were originally converted to.
pub(crate) fn cast_edits(
    model: &SemanticModel<'_>,
    selection: &ValidatedSelection,
    call: &WatchedCall,
    file_id: &FileId,
) -> Vec<TextEdit> {
    let file = model.file();
    let (ExprKind::Invocation { args, .. } | ExprKind::New { args, .. }) = &file.expr(call.expr).kind else {
        return Vec::new();
    };
    let Some(binding) = model.call(call.expr) else {
        return Vec::new();
    };
    let mut edits = Vec::new();
    for (arg, param_ty) in args.iter().zip(&binding.param_types) {
        if arg.range.contains_range(selection.range) || arg.modifier.is_some() || param_ty.is_unknown() {
            continue;
        }
        for (expr, target) in cast_targets(model, arg, param_ty) {
            tracing::debug!(
                target: "carve.refactor",
                arg = file.text_of(file.expr(expr).range),
                ty = %target,
                "disambiguating cast"
            );
            edits.extend(cast(model, expr, &target, file_id));
        }
    }
    edits
}

/// Expressions inside `arg` that need a cast, with the type to cast to.
fn cast_targets(model: &SemanticModel<'_>, arg: &Argument, param_ty: &Ty) -> Vec<(ExprId, Ty)> {
    let file = model.file();
    let ExprKind::Lambda { body, .. } = &file.expr(arg.expr).kind else {
        return if model.type_of(arg.expr) == *param_ty {
            Vec::new()
        } else {
            vec![(arg.expr, param_ty.clone())]
        };
    };
    let Some(ret) = model.items().delegate_signature(param_ty).map(|sig| sig.ret) else {
        return Vec::new();
    };
    if ret.is_void() || ret.is_unknown() {
        return Vec::new();
    }
    let returned: Vec<ExprId> = match body {
        LambdaBody::Expr(expr) => vec![*expr],
        LambdaBody::Block(block) => {
            let lambda = model.scopes().function_declared_by(NodeId::Expr(arg.expr));
            file.descendants(NodeId::Stmt(*block))
                .into_iter()
                .filter_map(|node| match node {
                    NodeId::Stmt(stmt) => match file.stmt(stmt).kind {
                        StmtKind::Return(Some(expr)) if model.function_of(node) == lambda => Some(expr),
                        _ => None,
                    },
                    NodeId::Expr(_) => None,
                })
                .collect()
        }
    };
    returned
        .into_iter()
        .filter(|expr| model.type_of(*expr) != ret)
        .map(|expr| (expr, ret.clone()))
        .collect()
}

fn cast(model: &SemanticModel<'_>, expr: ExprId, ty: &Ty, file_id: &FileId) -> Vec<TextEdit> {
    let range = model.file().expr(expr).range;
    let ty_text = model.display_ty(ty, range.start);
    let predefined = matches!(ty, Ty::Prim(_) | Ty::Object | Ty::String);
    if needs_parens(&model.file().expr(expr).kind, predefined) {
        vec![
            TextEdit::insert(file_id.clone(), range.start, format!("({ty_text})(")),
            TextEdit::insert(file_id.clone(), range.end, ")"),
        ]
    } else {
        vec![TextEdit::insert(file_id.clone(), range.start, format!("({ty_text})"))]
    }
}

/// Whether `(T)operand` would not parse as a cast of the whole operand.
fn needs_parens(kind: &ExprKind, predefined: bool) -> bool {
    match kind {
        ExprKind::Literal(_)
        | ExprKind::Default(_)
        | ExprKind::Name { .. }
        | ExprKind::PredefinedType(_)
        | ExprKind::This
        | ExprKind::Base
        | ExprKind::Member { .. }
        | ExprKind::ElementAccess { .. }
        | ExprKind::Invocation { .. }
        | ExprKind::New { .. }
        | ExprKind::NewArray { .. }
        | ExprKind::Tuple(_)
        | ExprKind::Paren(_)
        | ExprKind::NameOf(_)
        | ExprKind::Cast { .. } => false,
        ExprKind::Unary {
            op: UnaryOp::Neg | UnaryOp::Plus,
            ..
        } => !predefined,
        ExprKind::Unary { op, .. } => op.is_increment() && !predefined,
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind_of<'f>(file: &'f carve_syntax::SourceFile, text: &str) -> &'f ExprKind {
        let expr = file
            .expr_ids()
            .find(|expr| file.text_of(file.expr(*expr).range) == text)
            .unwrap();
        &file.expr(expr).kind
    }

    #[test]
    fn operators_are_parenthesized_under_a_cast() {
        let file = parse("class C { void M(int a) { var x = a + 1; var y = -a; var z = !true; M(a); } }");
        assert!(!needs_parens(kind_of(&file, "1"), false));
        assert!(!needs_parens(kind_of(&file, "M(a)"), false));
        assert!(!needs_parens(kind_of(&file, "!true"), false));
        assert!(needs_parens(kind_of(&file, "a + 1"), true));
        assert!(!needs_parens(kind_of(&file, "-a"), true));
        assert!(needs_parens(kind_of(&file, "-a"), false));
    }
}
