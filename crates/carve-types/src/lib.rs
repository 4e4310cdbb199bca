//! Types, implicit conversions, generic inference and overload resolution.
//!
//! The model is deliberately small: predefined types, named (class, struct,
//! delegate) types with type arguments, nullable wrappers, arrays and tuples.
//! Everything that needs declarations (base classes, struct-ness, delegate
//! shapes) goes through [`TypeEnv`], which the semantic layer implements.

mod conversion;
mod infer;
mod overload;

use std::collections::HashMap;
use std::fmt;

use carve_core::Name;
use serde::{Deserialize, Serialize};

pub use conversion::{argument_conversion, implicit_conversion, Conversion};
pub use infer::infer_type_args;
pub use overload::{
    better_function, resolve_overload, CallArg, OverloadResolution, ParamSig, RefKind, Signature,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Prim {
    Bool,
    Byte,
    Short,
    Char,
    Int,
    Long,
    Double,
}

impl Prim {
    pub fn keyword(self) -> &'static str {
        match self {
            Prim::Bool => "bool",
            Prim::Byte => "byte",
            Prim::Short => "short",
            Prim::Char => "char",
            Prim::Int => "int",
            Prim::Long => "long",
            Prim::Double => "double",
        }
    }

    pub fn is_numeric(self) -> bool {
        !matches!(self, Prim::Bool)
    }

    pub fn is_integral(self) -> bool {
        matches!(self, Prim::Byte | Prim::Short | Prim::Char | Prim::Int | Prim::Long)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TupleElem {
    pub ty: Ty,
    pub name: Option<Name>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Ty {
    /// A type we could not determine. Prints as `object`.
    Unknown,
    Void,
    /// The type of the `null` literal.
    Null,
    Prim(Prim),
    Object,
    String,
    /// A class, struct or delegate, by simple name.
    Named { name: Name, args: Vec<Ty> },
    TypeParam(Name),
    /// `T?`. For value types this is a distinct type; for reference types it is
    /// an annotation that conversions ignore.
    Nullable(Box<Ty>),
    Array(Box<Ty>),
    Tuple(Vec<TupleElem>),
}

impl Ty {
    pub fn named(name: &str, args: Vec<Ty>) -> Ty {
        Ty::Named {
            name: Name::new(name),
            args,
        }
    }

    pub fn int() -> Ty {
        Ty::Prim(Prim::Int)
    }

    pub fn bool() -> Ty {
        Ty::Prim(Prim::Bool)
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Ty::Unknown)
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Ty::Void)
    }

    pub fn is_nullable(&self) -> bool {
        matches!(self, Ty::Nullable(_))
    }

    pub fn named_parts(&self) -> Option<(&Name, &[Ty])> {
        match self {
            Ty::Named { name, args } => Some((name, args)),
            _ => None,
        }
    }

    /// `T` for `T?`, otherwise `self`.
    pub fn strip_nullable(&self) -> &Ty {
        match self {
            Ty::Nullable(inner) => inner,
            other => other,
        }
    }

    pub fn make_nullable(self) -> Ty {
        match self {
            Ty::Nullable(_) | Ty::Unknown | Ty::Void | Ty::Null => self,
            other => Ty::Nullable(Box::new(other)),
        }
    }

    pub fn is_value_type(&self, env: &dyn TypeEnv) -> bool {
        match self {
            Ty::Prim(_) | Ty::Tuple(_) => true,
            Ty::Nullable(inner) => inner.is_value_type(env),
            Ty::Named { .. } => env.is_struct(self),
            _ => false,
        }
    }

    pub fn is_reference_type(&self, env: &dyn TypeEnv) -> bool {
        match self {
            Ty::Object | Ty::String | Ty::Array(_) => true,
            Ty::Named { .. } => !env.is_struct(self),
            Ty::Nullable(inner) => inner.is_reference_type(env),
            _ => false,
        }
    }

    /// Drops `?` annotations on reference types, recursively. Value-type
    /// nullables are kept since they are distinct types.
    pub fn erase_annotations(&self, env: &dyn TypeEnv) -> Ty {
        match self {
            Ty::Nullable(inner) if !inner.is_value_type(env) => inner.erase_annotations(env),
            Ty::Nullable(inner) => Ty::Nullable(Box::new(inner.erase_annotations(env))),
            Ty::Named { name, args } => Ty::Named {
                name: name.clone(),
                args: args.iter().map(|a| a.erase_annotations(env)).collect(),
            },
            Ty::Array(elem) => Ty::Array(Box::new(elem.erase_annotations(env))),
            Ty::Tuple(elems) => Ty::Tuple(
                elems
                    .iter()
                    .map(|e| TupleElem {
                        ty: e.ty.erase_annotations(env),
                        name: None,
                    })
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Whether any type parameter in `params` occurs in `self`.
    pub fn mentions_any(&self, params: &[Name]) -> bool {
        match self {
            Ty::TypeParam(name) => params.contains(name),
            Ty::Named { args, .. } => args.iter().any(|a| a.mentions_any(params)),
            Ty::Nullable(inner) | Ty::Array(inner) => inner.mentions_any(params),
            Ty::Tuple(elems) => elems.iter().any(|e| e.ty.mentions_any(params)),
            _ => false,
        }
    }

    pub fn substitute(&self, subst: &HashMap<Name, Ty>) -> Ty {
        match self {
            Ty::TypeParam(name) => subst.get(name).cloned().unwrap_or_else(|| self.clone()),
            Ty::Named { name, args } => Ty::Named {
                name: name.clone(),
                args: args.iter().map(|a| a.substitute(subst)).collect(),
            },
            Ty::Nullable(inner) => Ty::Nullable(Box::new(inner.substitute(subst))),
            Ty::Array(inner) => Ty::Array(Box::new(inner.substitute(subst))),
            Ty::Tuple(elems) => Ty::Tuple(
                elems
                    .iter()
                    .map(|e| TupleElem {
                        ty: e.ty.substitute(subst),
                        name: e.name.clone(),
                    })
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// A predefined type spelled with a keyword (`int`, `string`, `object`, ...).
    pub fn is_builtin(&self) -> bool {
        match self {
            Ty::Prim(_) | Ty::Object | Ty::String => true,
            Ty::Nullable(inner) | Ty::Array(inner) => inner.is_builtin(),
            _ => false,
        }
    }
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ty::Unknown | Ty::Null | Ty::Object => f.write_str("object"),
            Ty::Void => f.write_str("void"),
            Ty::Prim(prim) => f.write_str(prim.keyword()),
            Ty::String => f.write_str("string"),
            Ty::Named { name, args } => {
                f.write_str(name.as_str())?;
                if !args.is_empty() {
                    f.write_str("<")?;
                    for (idx, arg) in args.iter().enumerate() {
                        if idx > 0 {
                            f.write_str(", ")?;
                        }
                        write!(f, "{arg}")?;
                    }
                    f.write_str(">")?;
                }
                Ok(())
            }
            Ty::TypeParam(name) => f.write_str(name.as_str()),
            Ty::Nullable(inner) => write!(f, "{inner}?"),
            Ty::Array(inner) => write!(f, "{inner}[]"),
            Ty::Tuple(elems) => {
                f.write_str("(")?;
                for (idx, elem) in elems.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", elem.ty)?;
                    if let Some(name) = &elem.name {
                        write!(f, " {name}")?;
                    }
                }
                f.write_str(")")
            }
        }
    }
}

/// Parameter and return types of a delegate type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelegateSig {
    pub params: Vec<Ty>,
    pub ret: Ty,
}

/// Declaration-level questions the type algorithms need answered.
pub trait TypeEnv {
    /// The direct base class of a named type, if it has one besides `object`.
    fn base_class(&self, ty: &Ty) -> Option<Ty>;

    fn is_struct(&self, ty: &Ty) -> bool;

    /// Shape of a user-declared delegate type.
    fn declared_delegate(&self, ty: &Ty) -> Option<DelegateSig>;

    /// Shape of any delegate type, `Func<..>`/`Action<..>` included.
    fn delegate_signature(&self, ty: &Ty) -> Option<DelegateSig> {
        builtin_delegate_signature(ty).or_else(|| self.declared_delegate(ty))
    }
}

/// A [`TypeEnv`] with no declarations; useful for library types and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyEnv;

impl TypeEnv for EmptyEnv {
    fn base_class(&self, _ty: &Ty) -> Option<Ty> {
        None
    }

    fn is_struct(&self, ty: &Ty) -> bool {
        is_library_struct(ty)
    }

    fn declared_delegate(&self, _ty: &Ty) -> Option<DelegateSig> {
        None
    }
}

/// Well-known library value types.
pub fn is_library_struct(ty: &Ty) -> bool {
    matches!(
        ty.named_parts(),
        Some((name, [])) if matches!(name.as_str(), "CancellationToken" | "Index" | "Range" | "DateTime" | "TimeSpan")
    )
}

/// `Func<T1.., R>` and `Action<T1..>`.
pub fn builtin_delegate_signature(ty: &Ty) -> Option<DelegateSig> {
    let (name, args) = ty.named_parts()?;
    match name.as_str() {
        "Func" if !args.is_empty() => {
            let (ret, params) = args.split_last()?;
            Some(DelegateSig {
                params: params.to_vec(),
                ret: ret.clone(),
            })
        }
        "Action" => Some(DelegateSig {
            params: args.to_vec(),
            ret: Ty::Void,
        }),
        _ => None,
    }
}

/// Variance of the type parameters of a generic type, per position.
pub(crate) fn variance(name: &str, arity: usize) -> Vec<Variance> {
    match name {
        "Func" => {
            let mut out = vec![Variance::Contravariant; arity.saturating_sub(1)];
            out.push(Variance::Covariant);
            out
        }
        "Action" => vec![Variance::Contravariant; arity],
        "IEnumerable" => vec![Variance::Covariant; arity],
        _ => vec![Variance::Invariant; arity],
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Variance {
    Invariant,
    Covariant,
    Contravariant,
}

/// The type of an argument as overload resolution sees it.
#[derive(Clone, Copy)]
pub enum ArgTy<'a> {
    Expr {
        ty: &'a Ty,
        /// Value of an integral constant expression, for constant conversions.
        constant: Option<i64>,
    },
    Null,
    Lambda(&'a dyn LambdaArg),
}

impl fmt::Debug for ArgTy<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgTy::Expr { ty, constant } => f
                .debug_struct("Expr")
                .field("ty", ty)
                .field("constant", constant)
                .finish(),
            ArgTy::Null => f.write_str("Null"),
            ArgTy::Lambda(lambda) => f.debug_tuple("Lambda").field(&lambda.param_count()).finish(),
        }
    }
}

/// A lambda argument. Lambdas have no type of their own; they are bound
/// against each candidate delegate's parameter types.
pub trait LambdaArg {
    fn param_count(&self) -> usize;

    /// Declared parameter types, if the lambda spells them out.
    fn explicit_params(&self) -> Option<Vec<Ty>>;

    /// Binds the body with the given parameter types. `None` when the body
    /// does not bind (for example an overload inside it becomes ambiguous).
    fn bind(&self, params: &[Ty]) -> Option<LambdaBinding>;
}

/// What a lambda body produces once bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LambdaBinding {
    /// Types (and integral constant values) of every returned expression.
    pub returns: Vec<(Ty, Option<i64>)>,
    /// The body may be treated as returning nothing.
    pub void_compatible: bool,
}

impl LambdaBinding {
    /// The inferred return type: the return expression type every other
    /// return converts to.
    pub fn inferred_return(&self, env: &dyn TypeEnv) -> Option<Ty> {
        let candidates: Vec<&Ty> = self.returns.iter().map(|(ty, _)| ty).collect();
        candidates
            .iter()
            .find(|cand| {
                candidates
                    .iter()
                    .all(|other| implicit_conversion(env, other, cand).is_some())
            })
            .map(|ty| (*ty).clone())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn displays_like_source() {
        let func = Ty::named("Func", vec![Ty::Prim(Prim::Byte), Ty::Prim(Prim::Byte)]);
        assert_eq!(func.to_string(), "Func<byte, byte>");
        assert_eq!(Ty::String.make_nullable().to_string(), "string?");
        assert_eq!(Ty::Array(Box::new(Ty::int())).to_string(), "int[]");
        let tuple = Ty::Tuple(vec![
            TupleElem {
                ty: Ty::int(),
                name: Some(Name::new("a")),
            },
            TupleElem {
                ty: Ty::String,
                name: None,
            },
        ]);
        assert_eq!(tuple.to_string(), "(int a, string)");
        assert_eq!(Ty::Unknown.to_string(), "object");
    }

    #[test]
    fn builtin_delegates() {
        let func = Ty::named("Func", vec![Ty::String, Ty::int()]);
        let sig = builtin_delegate_signature(&func).unwrap();
        assert_eq!(sig.params, vec![Ty::String]);
        assert_eq!(sig.ret, Ty::int());
        let action = Ty::named("Action", vec![]);
        assert_eq!(builtin_delegate_signature(&action).unwrap().ret, Ty::Void);
    }

    #[test]
    fn erase_annotations_keeps_value_nullables() {
        let env = EmptyEnv;
        let ty = Ty::named("Func", vec![Ty::String.make_nullable(), Ty::int().make_nullable()]);
        assert_eq!(
            ty.erase_annotations(&env),
            Ty::named("Func", vec![Ty::String, Ty::int().make_nullable()])
        );
    }
}
