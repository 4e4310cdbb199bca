//! A fully analysed file: items, scopes, types and the parent map, behind
//! one query surface.

use std::fmt::Write as _;

use carve_core::Name;
use carve_syntax::{ExprId, NodeId, ParentMap, SourceFile};
use carve_types::Ty;

use crate::items::{ItemOrigin, ItemTree};
use crate::scopes::{FunctionId, LocalId, Resolution, Scopes};
use crate::typer::{self, BindError, CallBinding, Constant, ExprInfo, MemberRef, TypeTables};

pub struct SemanticModel<'a> {
    file: &'a SourceFile,
    items: ItemTree,
    scopes: Scopes,
    types: TypeTables,
    parents: ParentMap,
}

impl<'a> SemanticModel<'a> {
    pub fn new(file: &'a SourceFile) -> Self {
        let items = ItemTree::lower(file);
        let scopes = Scopes::build(file, &items);
        let types = typer::infer(file, &items, &scopes);
        let parents = ParentMap::new(file);
        SemanticModel {
            file,
            items,
            scopes,
            types,
            parents,
        }
    }

    pub fn file(&self) -> &'a SourceFile {
        self.file
    }

    pub fn items(&self) -> &ItemTree {
        &self.items
    }

    pub fn scopes(&self) -> &Scopes {
        &self.scopes
    }

    pub fn types(&self) -> &TypeTables {
        &self.types
    }

    pub fn parents(&self) -> &ParentMap {
        &self.parents
    }

    pub fn expr_info(&self, expr: ExprId) -> Option<&ExprInfo> {
        self.types.exprs.get(&expr)
    }

    /// The natural type of `expr`, `Ty::Unknown` when it has none.
    pub fn type_of(&self, expr: ExprId) -> Ty {
        self.expr_info(expr).map_or(Ty::Unknown, |info| info.ty.clone())
    }

    pub fn converted_type(&self, expr: ExprId) -> Option<&Ty> {
        self.expr_info(expr).and_then(|info| info.converted.as_ref())
    }

    pub fn constant(&self, expr: ExprId) -> Option<Constant> {
        self.expr_info(expr).and_then(|info| info.constant)
    }

    /// The value of a constant boolean expression, `const bool` locals included.
    pub fn constant_bool(&self, expr: ExprId) -> Option<bool> {
        self.constant(expr).and_then(Constant::as_bool)
    }

    pub fn local_type(&self, local: LocalId) -> Ty {
        self.types.locals.get(&local).cloned().unwrap_or(Ty::Unknown)
    }

    pub fn call(&self, expr: ExprId) -> Option<&CallBinding> {
        self.types.calls.get(&expr)
    }

    pub fn member(&self, expr: ExprId) -> Option<MemberRef> {
        self.types.members.get(&expr).copied()
    }

    pub fn resolution(&self, expr: ExprId) -> Option<&Resolution> {
        self.scopes.resolution(expr)
    }

    pub fn errors(&self) -> &[BindError] {
        &self.types.errors
    }

    /// Return type of a function; lambdas report their delegate's.
    pub fn return_type_of(&self, function: FunctionId) -> Ty {
        self.types.returns.get(&function).cloned().unwrap_or(Ty::Unknown)
    }

    pub fn function_of(&self, node: NodeId) -> Option<FunctionId> {
        self.scopes.function_of(node)
    }

    /// Namespace of the top-level type declaration containing `offset`.
    pub fn namespace_at(&self, offset: usize) -> Option<&'a Name> {
        self.file
            .types
            .iter()
            .find(|t| t.range.contains(offset))
            .and_then(|t| t.namespace.as_ref())
    }

    /// Renders `ty` as it must be spelled at `offset`.
    ///
    /// Types from a namespace that is neither imported nor enclosing are
    /// qualified. `?` on reference types is printed only where nullable
    /// annotations are enabled; value-type nullables always keep it.
    pub fn display_ty(&self, ty: &Ty, offset: usize) -> String {
        let mut out = String::new();
        self.write_ty(&mut out, ty, offset);
        out
    }

    fn write_ty(&self, out: &mut String, ty: &Ty, offset: usize) {
        match ty {
            Ty::Nullable(inner) => {
                self.write_ty(out, inner, offset);
                if inner.is_value_type(&self.items) || self.file.nullable_enabled_at(offset) {
                    out.push('?');
                }
            }
            Ty::Named { name, args } => {
                if let Some(namespace) = self.namespace_of(name) {
                    if !self.namespace_in_scope(namespace, offset) {
                        out.push_str(namespace);
                        out.push('.');
                    }
                }
                out.push_str(name.as_str());
                if !args.is_empty() {
                    out.push('<');
                    for (idx, arg) in args.iter().enumerate() {
                        if idx > 0 {
                            out.push_str(", ");
                        }
                        self.write_ty(out, arg, offset);
                    }
                    out.push('>');
                }
            }
            Ty::Array(inner) => {
                self.write_ty(out, inner, offset);
                out.push_str("[]");
            }
            // A single element has no tuple syntax.
            Ty::Tuple(elems) if elems.len() == 1 => {
                let args = elems.iter().map(|elem| elem.ty.clone()).collect();
                self.write_ty(out, &Ty::named("ValueTuple", args), offset);
            }
            Ty::Tuple(elems) => {
                out.push('(');
                for (idx, elem) in elems.iter().enumerate() {
                    if idx > 0 {
                        out.push_str(", ");
                    }
                    self.write_ty(out, &elem.ty, offset);
                    if let Some(name) = &elem.name {
                        let _ = write!(out, " {name}");
                    }
                }
                out.push(')');
            }
            other => {
                let _ = write!(out, "{other}");
            }
        }
    }

    fn namespace_of(&self, name: &Name) -> Option<&str> {
        match name.as_str() {
            "Func" | "Action" | "ValueTuple" => return Some("System"),
            "IEnumerable" => return Some("System.Collections.Generic"),
            _ => {}
        }
        let id = self.items.type_by_name(name.as_str())?;
        let item = self.items.ty(id);
        if matches!(item.origin, ItemOrigin::Source(_)) && item.outer.is_some() {
            return None;
        }
        item.namespace.as_ref().map(Name::as_str)
    }

    fn namespace_in_scope(&self, namespace: &str, offset: usize) -> bool {
        if self.file.usings.iter().any(|u| u == namespace) {
            return true;
        }
        self.namespace_at(offset).is_some_and(|current| {
            current == namespace
                || current
                    .as_str()
                    .strip_prefix(namespace)
                    .is_some_and(|rest| rest.starts_with('.'))
        })
    }
}

#[cfg(test)]
mod tests {
    use carve_syntax::parse;
    use carve_types::{Prim, TupleElem};
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn qualifies_types_from_unimported_namespaces() {
        let file = parse("class C { void M() { } }");
        let model = SemanticModel::new(&file);
        let func = Ty::named("Func", vec![Ty::int(), Ty::named("CancellationToken", vec![])]);
        assert_eq!(
            model.display_ty(&func, 12),
            "System.Func<int, System.Threading.CancellationToken>"
        );

        let file = parse("using System; class C { void M() { } }");
        let model = SemanticModel::new(&file);
        assert_eq!(
            model.display_ty(&func, 25),
            "Func<int, System.Threading.CancellationToken>"
        );
    }

    #[test]
    fn types_inside_their_namespace_print_unqualified() {
        let file = parse("namespace System.Threading { class C { void M() { } } }");
        let model = SemanticModel::new(&file);
        let offset = file.text.find("void").unwrap();
        assert_eq!(model.display_ty(&Ty::named("CancellationToken", vec![]), offset), "CancellationToken");
        assert_eq!(model.display_ty(&Ty::named("Action", vec![]), offset), "Action");
    }

    #[test]
    fn reference_nullability_follows_the_context() {
        let text = "class C { void A() { }\n#nullable enable\nvoid B() { } }";
        let file = parse(text);
        let model = SemanticModel::new(&file);
        let a = text.find("A()").unwrap();
        let b = text.find("B()").unwrap();
        let ty = Ty::Tuple(vec![
            TupleElem {
                ty: Ty::String.make_nullable(),
                name: Some(Name::new("s")),
            },
            TupleElem {
                ty: Ty::Prim(Prim::Int).make_nullable(),
                name: None,
            },
        ]);
        assert_eq!(model.display_ty(&ty, a), "(string s, int?)");
        assert_eq!(model.display_ty(&ty, b), "(string? s, int?)");
        assert_eq!(model.display_ty(&Ty::Null, b), "object");
    }

    #[test]
    fn one_element_tuples_print_as_value_tuple() {
        let ty = Ty::Tuple(vec![TupleElem {
            ty: Ty::int(),
            name: None,
        }]);
        let file = parse("class C { void M() { } }");
        let model = SemanticModel::new(&file);
        assert_eq!(model.display_ty(&ty, 12), "System.ValueTuple<int>");

        let file = parse("using System; class C { void M() { } }");
        let model = SemanticModel::new(&file);
        assert_eq!(model.display_ty(&ty, 25), "ValueTuple<int>");
    }

    #[test]
    fn const_bool_locals_are_constant_conditions() {
        let file = parse("class C { void M() { const bool flag = true; if (!flag) { } } }");
        let model = SemanticModel::new(&file);
        let condition = file
            .expr_ids()
            .find(|&e| file.text_of(file.expr(e).range) == "!flag")
            .unwrap();
        assert_eq!(model.constant_bool(condition), Some(false));
        assert!(model.errors().is_empty());
    }
}
