//! Naming of the extracted function.

use std::collections::HashSet;

use carve_core::Name;
use carve_sema::{FunctionKind, SemanticModel};
use carve_syntax::{ExprKind, NodeId, StmtKind};

use crate::selection::{SelectionKind, ValidatedSelection};

pub const DEFAULT_BASE_NAME: &str = "NewMethod";

/// Base name for an extraction, before uniqueness is enforced.
///
/// A selected name or member access `x` suggests `GetX`, as does an
/// expression that is the whole initializer of a single variable `x`.
pub fn suggest_base_name(model: &SemanticModel<'_>, selection: &ValidatedSelection) -> String {
    get_name(model, selection)
        .map(|name| format!("Get{}", name.capitalized()))
        .unwrap_or_else(|| DEFAULT_BASE_NAME.to_owned())
}

fn get_name<'a>(model: &SemanticModel<'a>, selection: &ValidatedSelection) -> Option<&'a Name> {
    if selection.kind != SelectionKind::Expression || selection.replace_range != selection.range {
        return None;
    }
    let file = model.file();
    let expr = selection.expr()?;
    match &file.expr(expr).kind {
        ExprKind::Name { name, .. } | ExprKind::Member { name, .. } => return Some(name),
        _ => {}
    }
    let Some(NodeId::Stmt(parent)) = model.parents().parent(NodeId::Expr(expr)) else {
        return None;
    };
    match &file.stmt(parent).kind {
        StmtKind::LocalDecl { declarators, .. } if declarators.len() == 1 && declarators[0].init == Some(expr) => {
            Some(&declarators[0].name)
        }
        _ => None,
    }
}

/// `base` if it is free, otherwise `base` with the smallest positive suffix that is.
pub fn allocate_name(base: &str, taken: &HashSet<String>) -> String {
    if !taken.contains(base) {
        return base.to_owned();
    }
    (1usize..)
        .map(|suffix| format!("{base}{suffix}"))
        .find(|candidate| !taken.contains(candidate))
        .unwrap_or_else(|| base.to_owned())
}

/// Function names a new local function in the selection's host could collide with.
///
/// That is the enclosing functions, every local function of the enclosing
/// member, and the methods of the member's type.
pub(crate) fn function_names_in_scope(model: &SemanticModel<'_>, selection: &ValidatedSelection) -> HashSet<String> {
    let scopes = model.scopes();
    let member = scopes.member_function(selection.function);
    let mut taken: HashSet<String> = scopes
        .function_chain(selection.function)
        .filter_map(|f| scopes.function(f).name.as_ref())
        .map(|name| name.as_str().to_owned())
        .collect();
    taken.extend(
        scopes
            .functions()
            .filter(|(id, data)| data.kind == FunctionKind::LocalFunction && scopes.function_within(*id, member))
            .filter_map(|(_, data)| data.name.as_ref())
            .map(|name| name.as_str().to_owned()),
    );
    if let Some(owner) = scopes.function(member).owner {
        taken.extend(
            model
                .items()
                .ty(owner)
                .methods
                .iter()
                .map(|method| method.name.as_str().to_owned()),
        );
    }
    taken
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn suffixes_start_at_one() {
        let taken: HashSet<String> = ["NewMethod".to_owned()].into_iter().collect();
        assert_eq!(allocate_name("NewMethod", &taken), "NewMethod1");

        let taken: HashSet<String> = ["NewMethod", "NewMethod1"].iter().map(|s| (*s).to_owned()).collect();
        assert_eq!(allocate_name("NewMethod", &taken), "NewMethod2");
        assert_eq!(allocate_name("GetX", &taken), "GetX");
    }

    proptest! {
        #[test]
        fn allocated_name_is_free_and_minimal(suffixes in proptest::collection::hash_set(0usize..12, 0..12)) {
            let taken: HashSet<String> = suffixes
                .iter()
                .map(|n| if *n == 0 { "NewMethod".to_owned() } else { format!("NewMethod{n}") })
                .collect();
            let name = allocate_name("NewMethod", &taken);
            prop_assert!(!taken.contains(&name));
            let expected = (0usize..).find(|n| !suffixes.contains(n)).unwrap();
            let expected = if expected == 0 { "NewMethod".to_owned() } else { format!("NewMethod{expected}") };
            prop_assert_eq!(name, expected);
        }
    }
}
