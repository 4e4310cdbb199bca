//! The slice of the base library that fixtures lean on.

use carve_core::Name;
use carve_syntax::TypeDeclKind;
use carve_types::{ParamSig, Prim, RefKind, Signature, Ty};

use crate::items::{FieldItem, MethodItem, PropertyItem, TypeItem};

fn param(name: &str, ty: Ty) -> ParamSig {
    ParamSig {
        name: Name::new(name),
        ty,
        ref_kind: RefKind::None,
        has_default: false,
        is_params: false,
    }
}

fn method(name: &str, params: Vec<ParamSig>, ret: Ty) -> MethodItem {
    MethodItem {
        name: Name::new(name),
        sig: Signature {
            type_params: Vec::new(),
            params,
            ret,
        },
        is_static: false,
        is_readonly: true,
        is_extension: false,
    }
}

fn static_method(name: &str, params: Vec<ParamSig>, ret: Ty) -> MethodItem {
    MethodItem {
        is_static: true,
        ..method(name, params, ret)
    }
}

fn property(name: &str, ty: Ty, is_static: bool) -> PropertyItem {
    PropertyItem {
        name: Name::new(name),
        ty,
        params: Vec::new(),
        is_indexer: false,
        is_static,
        is_readonly: true,
    }
}

fn indexer(ty: Ty, index: Ty) -> PropertyItem {
    PropertyItem {
        name: Name::new("this"),
        params: vec![param("index", index)],
        is_indexer: true,
        ..property("this", ty, false)
    }
}

fn ctor(params: Vec<ParamSig>) -> MethodItem {
    method(".ctor", params, Ty::Void)
}

fn prim(p: Prim) -> Ty {
    Ty::Prim(p)
}

fn class(name: &str, namespace: &str) -> TypeItem {
    TypeItem {
        base: Some(Ty::Object).filter(|_| name != "Object"),
        ..TypeItem::library(name, namespace, TypeDeclKind::Class)
    }
}

fn structure(name: &str, namespace: &str) -> TypeItem {
    TypeItem {
        is_readonly: true,
        ..TypeItem::library(name, namespace, TypeDeclKind::Struct)
    }
}

fn writers(name: &str) -> Vec<MethodItem> {
    let nullable_string = Ty::String.make_nullable();
    let nullable_object = Ty::Object.make_nullable();
    [
        nullable_string,
        nullable_object,
        Ty::int(),
        prim(Prim::Long),
        prim(Prim::Double),
        Ty::bool(),
        prim(Prim::Char),
    ]
    .into_iter()
    .map(|ty| static_method(name, vec![param("value", ty)], Ty::Void))
    .collect()
}

pub(crate) fn types() -> Vec<TypeItem> {
    let t = Ty::TypeParam(Name::new("T"));

    let object = TypeItem {
        methods: vec![
            method("ToString", vec![], Ty::String),
            method("GetHashCode", vec![], Ty::int()),
            method("Equals", vec![param("obj", Ty::Object.make_nullable())], Ty::bool()),
        ],
        constructors: vec![ctor(vec![])],
        ..class("Object", "System")
    };

    let string = TypeItem {
        fields: vec![FieldItem {
            name: Name::new("Empty"),
            ty: Ty::String,
            is_static: true,
            is_readonly: true,
        }],
        properties: vec![property("Length", Ty::int(), false), indexer(prim(Prim::Char), Ty::int())],
        methods: vec![
            method("Contains", vec![param("value", Ty::String)], Ty::bool()),
            method("StartsWith", vec![param("value", Ty::String)], Ty::bool()),
            method("Substring", vec![param("startIndex", Ty::int())], Ty::String),
            method("Trim", vec![], Ty::String),
            method("ToUpper", vec![], Ty::String),
            static_method("IsNullOrEmpty", vec![param("value", Ty::String.make_nullable())], Ty::bool()),
            static_method(
                "Concat",
                vec![
                    param("str0", Ty::String.make_nullable()),
                    param("str1", Ty::String.make_nullable()),
                ],
                Ty::String,
            ),
        ],
        ..class("String", "System")
    };

    let int32 = TypeItem {
        fields: vec![FieldItem {
            name: Name::new("MaxValue"),
            ty: Ty::int(),
            is_static: true,
            is_readonly: true,
        }],
        methods: vec![static_method("Parse", vec![param("s", Ty::String)], Ty::int())],
        ..structure("Int32", "System")
    };

    let mut console_methods = vec![static_method("WriteLine", vec![], Ty::Void)];
    console_methods.extend(writers("WriteLine"));
    console_methods.extend(writers("Write"));
    console_methods.push(static_method("ReadLine", vec![], Ty::String.make_nullable()));
    let console = TypeItem {
        is_static: true,
        methods: console_methods,
        ..class("Console", "System")
    };

    let math = TypeItem {
        is_static: true,
        methods: vec![
            static_method("Max", vec![param("a", Ty::int()), param("b", Ty::int())], Ty::int()),
            static_method(
                "Max",
                vec![param("a", prim(Prim::Double)), param("b", prim(Prim::Double))],
                prim(Prim::Double),
            ),
            static_method("Min", vec![param("a", Ty::int()), param("b", Ty::int())], Ty::int()),
            static_method("Abs", vec![param("value", Ty::int())], Ty::int()),
        ],
        ..class("Math", "System")
    };

    let cancellation_token = TypeItem {
        properties: vec![
            property("IsCancellationRequested", Ty::bool(), false),
            property("None", Ty::named("CancellationToken", vec![]), true),
        ],
        methods: vec![method("ThrowIfCancellationRequested", vec![], Ty::Void)],
        ..structure("CancellationToken", "System.Threading")
    };

    let exception = TypeItem {
        properties: vec![property("Message", Ty::String, false)],
        constructors: vec![
            ctor(vec![]),
            ctor(vec![param("message", Ty::String.make_nullable())]),
        ],
        ..class("Exception", "System")
    };
    let invalid_operation = TypeItem {
        base: Some(Ty::named("Exception", vec![])),
        constructors: exception.constructors.clone(),
        ..class("InvalidOperationException", "System")
    };

    let index = TypeItem {
        properties: vec![
            property("Value", Ty::int(), false),
            property("IsFromEnd", Ty::bool(), false),
        ],
        constructors: vec![ctor(vec![
            param("value", Ty::int()),
            ParamSig {
                has_default: true,
                ..param("fromEnd", Ty::bool())
            },
        ])],
        ..structure("Index", "System")
    };
    let range = TypeItem {
        properties: vec![
            property("Start", Ty::named("Index", vec![]), false),
            property("End", Ty::named("Index", vec![]), false),
            property("All", Ty::named("Range", vec![]), true),
        ],
        ..structure("Range", "System")
    };

    let list = TypeItem {
        type_params: vec![Name::new("T")],
        properties: vec![property("Count", Ty::int(), false), indexer(t.clone(), Ty::int())],
        methods: vec![
            MethodItem {
                is_readonly: false,
                ..method("Add", vec![param("item", t.clone())], Ty::Void)
            },
            method("Contains", vec![param("item", t.clone())], Ty::bool()),
        ],
        constructors: vec![ctor(vec![])],
        ..class("List", "System.Collections.Generic")
    };

    vec![
        object,
        string,
        int32,
        console,
        math,
        cancellation_token,
        exception,
        invalid_operation,
        index,
        range,
        list,
    ]
}

/// Namespaces the library types live in; a qualified name whose prefix is
/// one of these resolves through them.
pub(crate) const NAMESPACES: &[&str] = &[
    "System",
    "System.Threading",
    "System.Collections",
    "System.Collections.Generic",
    "System.Linq",
    "System.Threading.Tasks",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn console_has_writeline_overloads() {
        let types = types();
        let console = types.iter().find(|t| t.name == "Console").unwrap();
        let count = console.methods.iter().filter(|m| m.name == "WriteLine").count();
        assert_eq!(count, 8);
        assert!(console.methods.iter().all(|m| m.is_static));
    }
}
