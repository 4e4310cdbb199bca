//! Declaration-level item tree: types, their members and delegates.
//!
//! Items are lowered once per file. Source types are numbered in
//! [`SourceFile::all_types`] order, so the n-th declaration there is
//! `TypeId(n)`; library types follow.

use std::collections::HashMap;

use carve_core::{Name, TextRange};
use carve_syntax::{
    DelegateDecl, FunctionDecl, Member, Modifier, Param, ParamModifier, PredefinedType, PropertyBody, SourceFile,
    TypeDecl, TypeDeclKind, TypeRef, TypeRefKind,
};
use carve_types::{is_library_struct, DelegateSig, ParamSig, Prim, RefKind, Signature, TupleElem, Ty, TypeEnv};

use crate::library;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(u32);

impl TypeId {
    #[must_use]
    pub const fn idx(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOrigin {
    Source(TextRange),
    Library,
}

#[derive(Debug, Clone)]
pub struct FieldItem {
    pub name: Name,
    pub ty: Ty,
    pub is_static: bool,
    pub is_readonly: bool,
}

#[derive(Debug, Clone)]
pub struct PropertyItem {
    pub name: Name,
    pub ty: Ty,
    /// Indexer parameters; empty for plain properties.
    pub params: Vec<ParamSig>,
    pub is_indexer: bool,
    pub is_static: bool,
    pub is_readonly: bool,
}

#[derive(Debug, Clone)]
pub struct MethodItem {
    pub name: Name,
    pub sig: Signature,
    pub is_static: bool,
    pub is_readonly: bool,
    pub is_extension: bool,
}

#[derive(Debug, Clone)]
pub struct TypeItem {
    pub name: Name,
    pub namespace: Option<Name>,
    pub kind: TypeDeclKind,
    pub is_static: bool,
    pub is_readonly: bool,
    pub type_params: Vec<Name>,
    pub base: Option<Ty>,
    pub outer: Option<TypeId>,
    pub fields: Vec<FieldItem>,
    pub properties: Vec<PropertyItem>,
    pub methods: Vec<MethodItem>,
    pub constructors: Vec<MethodItem>,
    pub origin: ItemOrigin,
}

impl TypeItem {
    pub(crate) fn library(name: &str, namespace: &str, kind: TypeDeclKind) -> Self {
        TypeItem {
            name: Name::new(name),
            namespace: Some(Name::new(namespace)),
            kind,
            is_static: false,
            is_readonly: false,
            type_params: Vec::new(),
            base: None,
            outer: None,
            fields: Vec::new(),
            properties: Vec::new(),
            methods: Vec::new(),
            constructors: Vec::new(),
            origin: ItemOrigin::Library,
        }
    }

    /// The type as seen from inside its own declaration.
    pub fn self_ty(&self) -> Ty {
        match self.name.as_str() {
            "String" if self.origin == ItemOrigin::Library => Ty::String,
            "Object" if self.origin == ItemOrigin::Library => Ty::Object,
            _ => Ty::Named {
                name: self.name.clone(),
                args: self.type_params.iter().cloned().map(Ty::TypeParam).collect(),
            },
        }
    }

    pub fn is_struct(&self) -> bool {
        self.kind == TypeDeclKind::Struct
    }

    pub fn methods_named<'a>(&'a self, name: &'a Name) -> impl Iterator<Item = (usize, &'a MethodItem)> + 'a {
        self.methods.iter().enumerate().filter(move |(_, m)| &m.name == name)
    }

    /// Whether the type declares any member called `name`.
    pub fn declares(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name == name)
            || self.properties.iter().any(|p| p.name == name)
            || self.methods.iter().any(|m| m.name == name)
    }
}

#[derive(Debug, Clone)]
pub struct DelegateItem {
    pub name: Name,
    pub type_params: Vec<Name>,
    pub params: Vec<ParamSig>,
    pub ret: Ty,
}

/// Every type and delegate visible to a file: its own declarations plus the
/// well-known library surface.
#[derive(Debug, Clone, Default)]
pub struct ItemTree {
    types: Vec<TypeItem>,
    delegates: Vec<DelegateItem>,
    by_name: HashMap<Name, Vec<TypeId>>,
    source_types: usize,
}

impl ItemTree {
    pub fn lower(file: &SourceFile) -> ItemTree {
        let mut tree = ItemTree::default();

        // Same pre-order as `SourceFile::all_types`, remembering the outer type.
        fn walk<'a>(decl: &'a TypeDecl, outer: Option<TypeId>, out: &mut Vec<(&'a TypeDecl, Option<TypeId>)>) {
            let id = TypeId(out.len() as u32);
            out.push((decl, outer));
            for member in &decl.members {
                if let Member::Type(nested) = member {
                    walk(nested, Some(id), out);
                }
            }
        }
        let mut decls = Vec::new();
        for decl in &file.types {
            walk(decl, None, &mut decls);
        }
        for (decl, outer) in &decls {
            let item = lower_type_decl(decl, *outer);
            tree.push_type(item);
        }
        tree.source_types = tree.types.len();

        for decl in &file.delegates {
            tree.delegates.push(lower_delegate(decl));
        }
        for (decl, _) in &decls {
            for member in &decl.members {
                if let Member::Delegate(delegate) = member {
                    tree.delegates.push(lower_delegate(delegate));
                }
            }
        }

        for item in library::types() {
            tree.push_type(item);
        }
        tracing::debug!(
            target: "carve.sema",
            source_types = tree.source_types,
            delegates = tree.delegates.len(),
            "lowered item tree"
        );
        tree
    }

    fn push_type(&mut self, item: TypeItem) {
        let id = TypeId(self.types.len() as u32);
        self.by_name.entry(item.name.clone()).or_default().push(id);
        self.types.push(item);
    }

    pub fn ty(&self, id: TypeId) -> &TypeItem {
        &self.types[id.idx()]
    }

    pub fn iter(&self) -> impl Iterator<Item = (TypeId, &TypeItem)> {
        self.types.iter().enumerate().map(|(i, t)| (TypeId(i as u32), t))
    }

    /// The id of the n-th type in [`SourceFile::all_types`] order.
    pub fn source_type(&self, ordinal: usize) -> Option<TypeId> {
        (ordinal < self.source_types).then_some(TypeId(ordinal as u32))
    }

    /// Looks a type up by simple name. Source declarations shadow library ones.
    pub fn type_by_name(&self, name: &str) -> Option<TypeId> {
        self.by_name.get(name).and_then(|ids| ids.first().copied())
    }

    pub fn delegate_by_name(&self, name: &str) -> Option<&DelegateItem> {
        self.delegates.iter().find(|d| d.name == name)
    }

    /// The item behind a type, for member lookup. Predefined types map to
    /// their library counterparts.
    pub fn type_of(&self, ty: &Ty) -> Option<TypeId> {
        match ty {
            Ty::String => self.type_by_name("String"),
            Ty::Object | Ty::TypeParam(_) | Ty::Array(_) | Ty::Tuple(_) => self.type_by_name("Object"),
            Ty::Prim(Prim::Int) => self.type_by_name("Int32"),
            Ty::Prim(_) => self.type_by_name("Object"),
            Ty::Named { name, .. } => self.type_by_name(name.as_str()),
            Ty::Nullable(inner) => self.type_of(inner),
            Ty::Unknown | Ty::Void | Ty::Null => None,
        }
    }

    /// Type-argument substitution for members of `ty`'s declaration.
    pub fn substitution(&self, ty: &Ty) -> HashMap<Name, Ty> {
        let Some((name, args)) = ty.strip_nullable().named_parts() else {
            return HashMap::new();
        };
        let Some(id) = self.type_by_name(name.as_str()) else {
            return HashMap::new();
        };
        self.ty(id).type_params.iter().cloned().zip(args.iter().cloned()).collect()
    }

    /// `ty` followed by its base classes, ending with `object`.
    pub fn base_chain(&self, ty: &Ty) -> Vec<Ty> {
        let mut out = vec![ty.clone()];
        let mut current = ty.clone();
        while let Some(base) = self.base_class(&current) {
            if out.contains(&base) || out.len() > 32 {
                break;
            }
            out.push(base.clone());
            current = base;
        }
        if !matches!(ty, Ty::Object) {
            out.push(Ty::Object);
        }
        out
    }

    /// Static extension methods called `name`, with their declaring type.
    pub fn extension_methods<'a>(&'a self, name: &'a Name) -> impl Iterator<Item = (TypeId, usize, &'a MethodItem)> + 'a {
        self.iter().flat_map(move |(id, item)| {
            item.methods_named(name)
                .filter(|(_, m)| m.is_extension)
                .map(move |(idx, m)| (id, idx, m))
        })
    }

    pub fn is_readonly_struct(&self, ty: &Ty) -> bool {
        self.type_of(ty)
            .map(|id| self.ty(id))
            .is_some_and(|item| item.is_struct() && item.is_readonly)
    }
}

impl TypeEnv for ItemTree {
    fn base_class(&self, ty: &Ty) -> Option<Ty> {
        let (name, args) = ty.named_parts()?;
        let item = self.ty(self.type_by_name(name.as_str())?);
        let subst: HashMap<Name, Ty> = item.type_params.iter().cloned().zip(args.iter().cloned()).collect();
        item.base.as_ref().map(|b| b.substitute(&subst))
    }

    fn is_struct(&self, ty: &Ty) -> bool {
        match ty.named_parts() {
            Some((name, _)) => match self.type_by_name(name.as_str()) {
                Some(id) => self.ty(id).is_struct(),
                None => is_library_struct(ty),
            },
            None => false,
        }
    }

    fn declared_delegate(&self, ty: &Ty) -> Option<DelegateSig> {
        let (name, args) = ty.named_parts()?;
        let item = self.delegate_by_name(name.as_str())?;
        if item.type_params.len() != args.len() {
            return None;
        }
        let subst: HashMap<Name, Ty> = item.type_params.iter().cloned().zip(args.iter().cloned()).collect();
        Some(DelegateSig {
            params: item.params.iter().map(|p| p.ty.substitute(&subst)).collect(),
            ret: item.ret.substitute(&subst),
        })
    }
}

fn lower_type_decl(decl: &TypeDecl, outer: Option<TypeId>) -> TypeItem {
    let type_params: Vec<Name> = decl.type_params.iter().map(|(n, _)| n.clone()).collect();
    let is_readonly = decl.modifiers.has(Modifier::Readonly);
    let lower = |ty: &TypeRef, extra: &[Name]| {
        let mut in_scope = type_params.clone();
        in_scope.extend(extra.iter().cloned());
        lower_type_ref(ty, &in_scope)
    };

    let mut item = TypeItem {
        name: decl.name.clone(),
        namespace: decl.namespace.clone(),
        kind: decl.kind,
        is_static: decl.modifiers.has(Modifier::Static),
        is_readonly,
        type_params: type_params.clone(),
        base: decl
            .bases
            .first()
            .map(|b| lower(b, &[]))
            .filter(|b| matches!(b, Ty::Named { .. })),
        outer,
        fields: Vec::new(),
        properties: Vec::new(),
        methods: Vec::new(),
        constructors: Vec::new(),
        origin: ItemOrigin::Source(decl.range),
    };

    for member in &decl.members {
        match member {
            Member::Field(field) => {
                let ty = lower(&field.ty, &[]);
                for declarator in &field.declarators {
                    item.fields.push(FieldItem {
                        name: declarator.name.clone(),
                        ty: ty.clone(),
                        is_static: field.modifiers.is_static(),
                        is_readonly: is_readonly || field.modifiers.has(Modifier::Readonly),
                    });
                }
            }
            Member::Property(property) => {
                let params = property
                    .indexer_params
                    .as_deref()
                    .map(|ps| lower_params(ps, &type_params))
                    .unwrap_or_default();
                let getter_only = match &property.body {
                    PropertyBody::Expr(_) => false,
                    PropertyBody::Accessors(accessors) => {
                        !accessors.is_empty() && accessors.iter().all(|a| a.modifiers.has(Modifier::Readonly))
                    }
                };
                item.properties.push(PropertyItem {
                    name: property.name.clone(),
                    ty: lower(&property.ty, &[]),
                    params,
                    is_indexer: property.indexer_params.is_some(),
                    is_static: property.modifiers.is_static(),
                    is_readonly: is_readonly || property.modifiers.has(Modifier::Readonly) || getter_only,
                });
            }
            Member::Method(method) => {
                let lowered = lower_method(method, &type_params, is_readonly);
                if method.ret.is_none() {
                    item.constructors.push(lowered);
                } else {
                    item.methods.push(lowered);
                }
            }
            Member::Type(_) | Member::Delegate(_) => {}
        }
    }
    item
}

fn lower_delegate(decl: &DelegateDecl) -> DelegateItem {
    let type_params: Vec<Name> = decl.type_params.iter().map(|(n, _)| n.clone()).collect();
    DelegateItem {
        name: decl.name.clone(),
        params: lower_params(&decl.params, &type_params),
        ret: lower_type_ref(&decl.ret, &type_params),
        type_params,
    }
}

pub(crate) fn lower_method(method: &FunctionDecl, outer_params: &[Name], in_readonly_type: bool) -> MethodItem {
    let mut in_scope = outer_params.to_vec();
    let type_params: Vec<Name> = method.type_params.iter().map(|(n, _)| n.clone()).collect();
    in_scope.extend(type_params.iter().cloned());
    MethodItem {
        name: method.name.clone(),
        sig: Signature {
            type_params,
            params: lower_params(&method.params, &in_scope),
            ret: method.ret.as_ref().map_or(Ty::Void, |r| lower_type_ref(r, &in_scope)),
        },
        is_static: method.modifiers.is_static(),
        is_readonly: in_readonly_type || method.modifiers.has(Modifier::Readonly),
        is_extension: method.is_extension(),
    }
}

pub(crate) fn lower_params(params: &[Param], type_params: &[Name]) -> Vec<ParamSig> {
    params
        .iter()
        .map(|p| ParamSig {
            name: p.name.clone(),
            ty: p.ty.as_ref().map_or(Ty::Unknown, |t| lower_type_ref(t, type_params)),
            ref_kind: param_ref_kind(p.modifier),
            has_default: p.default.is_some(),
            is_params: p.modifier == Some(ParamModifier::Params),
        })
        .collect()
}

pub fn param_ref_kind(modifier: Option<ParamModifier>) -> RefKind {
    match modifier {
        Some(ParamModifier::Ref) => RefKind::Ref,
        Some(ParamModifier::Out) => RefKind::Out,
        Some(ParamModifier::In) => RefKind::In,
        Some(ParamModifier::This | ParamModifier::Params) | None => RefKind::None,
    }
}

/// Lowers type syntax. `type_params` are the type parameter names in scope.
///
/// `T?` always lowers to a nullable type; whether the annotation is printed
/// depends on the nullable context of the use site.
pub fn lower_type_ref(ty: &TypeRef, type_params: &[Name]) -> Ty {
    match &ty.kind {
        TypeRefKind::Predefined(p) => lower_predefined(*p),
        TypeRefKind::Implicit => Ty::Unknown,
        TypeRefKind::Nullable(inner) => lower_type_ref(inner, type_params).make_nullable(),
        TypeRefKind::Array(elem) => Ty::Array(Box::new(lower_type_ref(elem, type_params))),
        TypeRefKind::Tuple(elems) => Ty::Tuple(
            elems
                .iter()
                .map(|e| TupleElem {
                    ty: lower_type_ref(&e.ty, type_params),
                    name: e.name.clone(),
                })
                .collect(),
        ),
        TypeRefKind::Named(segments) => {
            let Some(last) = segments.last() else {
                return Ty::Unknown;
            };
            let args: Vec<Ty> = last
                .args
                .iter()
                .map(|a| lower_type_ref(a, type_params))
                .collect();
            named_ty(&last.name, args, type_params)
        }
    }
}

fn named_ty(name: &Name, args: Vec<Ty>, type_params: &[Name]) -> Ty {
    match (name.as_str(), args.len()) {
        (_, 0) if type_params.contains(name) => Ty::TypeParam(name.clone()),
        ("String", 0) => Ty::String,
        ("Object", 0) => Ty::Object,
        ("Int32", 0) => Ty::int(),
        ("Boolean", 0) => Ty::bool(),
        ("Nullable", 1) => args.into_iter().next().map_or(Ty::Unknown, Ty::make_nullable),
        ("ValueTuple", n) if n > 0 => tuple_from_args(args),
        _ => Ty::Named {
            name: name.clone(),
            args,
        },
    }
}

/// `ValueTuple<T1..T7, TRest>` flattens its eighth argument. Names written
/// inside `TRest` do not carry over to the flattened elements.
fn tuple_from_args(args: Vec<Ty>) -> Ty {
    let mut elems = Vec::new();
    for (idx, arg) in args.into_iter().enumerate() {
        match arg {
            Ty::Tuple(rest) if idx == 7 => elems.extend(rest.into_iter().map(|e| TupleElem { name: None, ..e })),
            other => elems.push(TupleElem { ty: other, name: None }),
        }
    }
    Ty::Tuple(elems)
}

pub fn lower_predefined(p: PredefinedType) -> Ty {
    match p {
        PredefinedType::Bool => Ty::Prim(Prim::Bool),
        PredefinedType::Byte => Ty::Prim(Prim::Byte),
        PredefinedType::Char => Ty::Prim(Prim::Char),
        PredefinedType::Double => Ty::Prim(Prim::Double),
        PredefinedType::Int => Ty::Prim(Prim::Int),
        PredefinedType::Long => Ty::Prim(Prim::Long),
        PredefinedType::Short => Ty::Prim(Prim::Short),
        PredefinedType::Object => Ty::Object,
        PredefinedType::String => Ty::String,
        PredefinedType::Void => Ty::Void,
    }
}

#[cfg(test)]
mod tests {
    use carve_syntax::parse;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn lowers_members_and_bases() {
        let file = parse(
            "class A { } class B : A { int x; static string Y => \"\"; void M<T>(T t, out int r) { r = 0; } B() { } }",
        );
        let tree = ItemTree::lower(&file);
        let b = tree.ty(tree.type_by_name("B").unwrap());
        assert_eq!(b.base, Some(Ty::named("A", vec![])));
        assert_eq!(b.fields[0].ty, Ty::int());
        assert!(b.properties[0].is_static);
        assert_eq!(b.methods[0].sig.params[0].ty, Ty::TypeParam(Name::new("T")));
        assert_eq!(b.methods[0].sig.params[1].ref_kind, RefKind::Out);
        assert_eq!(b.constructors.len(), 1);
        assert_eq!(tree.base_class(&Ty::named("B", vec![])), Some(Ty::named("A", vec![])));
    }

    #[test]
    fn lowers_nullable_and_tuple_types() {
        let file = parse("class C { string? a; int? b; System.ValueTuple<int, string> c; (int x, bool) d; }");
        let tree = ItemTree::lower(&file);
        let c = tree.ty(tree.type_by_name("C").unwrap());
        assert_eq!(c.fields[0].ty, Ty::String.make_nullable());
        assert_eq!(c.fields[1].ty, Ty::int().make_nullable());
        assert_eq!(c.fields[2].ty.to_string(), "(int, string)");
        assert_eq!(c.fields[3].ty.to_string(), "(int x, bool)");
    }

    #[test]
    fn long_value_tuples_flatten_their_rest_unnamed() {
        let file = parse(
            "class C { System.ValueTuple<int, int, int, int, int, int, int, (string a, bool b)> t; }",
        );
        let tree = ItemTree::lower(&file);
        let c = tree.ty(tree.type_by_name("C").unwrap());
        assert_eq!(
            c.fields[0].ty.to_string(),
            "(int, int, int, int, int, int, int, string, bool)"
        );
    }

    #[test]
    fn source_types_shadow_library_types() {
        let file = parse("namespace System { public readonly struct Index { } }");
        let tree = ItemTree::lower(&file);
        let id = tree.type_by_name("Index").unwrap();
        assert!(matches!(tree.ty(id).origin, ItemOrigin::Source(_)));
        assert!(tree.is_readonly_struct(&Ty::named("Index", vec![])));
    }

    #[test]
    fn declared_delegates_substitute_type_arguments() {
        let file = parse("delegate R Map<T, R>(T value); class C { }");
        let tree = ItemTree::lower(&file);
        let sig = tree
            .delegate_signature(&Ty::named("Map", vec![Ty::String, Ty::int()]))
            .unwrap();
        assert_eq!(sig.params, vec![Ty::String]);
        assert_eq!(sig.ret, Ty::int());
    }
}
