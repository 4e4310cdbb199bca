use crate::{variance, ArgTy, Prim, Ty, TypeEnv, Variance};

/// Kinds of implicit conversion, as classified for overload resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conversion {
    Identity,
    Numeric,
    /// An in-range integral constant converted to a smaller integral type.
    Constant,
    NullLiteral,
    Nullable,
    Boxing,
    Reference,
    Tuple,
    AnonymousFunction,
}

impl Conversion {
    pub fn is_identity(self) -> bool {
        self == Conversion::Identity
    }
}

fn widens_to(from: Prim, to: Prim) -> bool {
    use Prim::*;
    match from {
        Byte => matches!(to, Short | Int | Long | Double),
        Short => matches!(to, Int | Long | Double),
        Char => matches!(to, Int | Long | Double),
        Int => matches!(to, Long | Double),
        Long => matches!(to, Double),
        Double | Bool => false,
    }
}

/// Implicit conversion from a value of type `from` to `to`.
pub fn implicit_conversion(env: &dyn TypeEnv, from: &Ty, to: &Ty) -> Option<Conversion> {
    if from.is_unknown() || to.is_unknown() {
        return Some(Conversion::Identity);
    }
    let from = from.erase_annotations(env);
    let to = to.erase_annotations(env);
    if from == to {
        return Some(Conversion::Identity);
    }

    match (&from, &to) {
        (Ty::Null, to) => {
            (to.is_reference_type(env) || to.is_nullable() || matches!(to, Ty::TypeParam(_)))
                .then_some(Conversion::NullLiteral)
        }
        (Ty::Prim(a), Ty::Prim(b)) => widens_to(*a, *b).then_some(Conversion::Numeric),
        (Ty::Nullable(a), Ty::Nullable(b)) => match implicit_conversion(env, a, b)? {
            Conversion::Identity | Conversion::Numeric => Some(Conversion::Nullable),
            _ => None,
        },
        (from, Ty::Nullable(inner)) => match implicit_conversion(env, from, inner)? {
            Conversion::Identity | Conversion::Numeric => Some(Conversion::Nullable),
            _ => None,
        },
        (from, Ty::Object) => {
            if from.is_value_type(env) || matches!(from, Ty::TypeParam(_)) {
                Some(Conversion::Boxing)
            } else if from.is_void() {
                None
            } else {
                Some(Conversion::Reference)
            }
        }
        (Ty::Array(a), Ty::Array(b)) => {
            (a.is_reference_type(env)
                && b.is_reference_type(env)
                && implicit_conversion(env, a, b) == Some(Conversion::Reference))
            .then_some(Conversion::Reference)
        }
        (Ty::Tuple(a), Ty::Tuple(b)) if a.len() == b.len() => a
            .iter()
            .zip(b)
            .all(|(x, y)| implicit_conversion(env, &x.ty, &y.ty).is_some())
            .then_some(Conversion::Tuple),
        (Ty::Named { .. }, Ty::Named { .. }) => named_conversion(env, &from, &to),
        _ => None,
    }
}

fn named_conversion(env: &dyn TypeEnv, from: &Ty, to: &Ty) -> Option<Conversion> {
    let (from_name, from_args) = from.named_parts()?;
    let (to_name, to_args) = to.named_parts()?;

    if from_name == to_name && from_args.len() == to_args.len() && !from_args.is_empty() {
        let variances = variance(from_name.as_str(), from_args.len());
        let ok = from_args
            .iter()
            .zip(to_args)
            .zip(variances)
            .all(|((a, b), v)| variant_arg_converts(env, a, b, v));
        if ok {
            return Some(Conversion::Reference);
        }
    }

    let mut current = env.base_class(from);
    let mut depth = 0;
    while let Some(base) = current {
        if base.erase_annotations(env) == *to {
            return Some(Conversion::Reference);
        }
        depth += 1;
        if depth > 32 {
            break;
        }
        current = env.base_class(&base);
    }
    None
}

fn variant_arg_converts(env: &dyn TypeEnv, a: &Ty, b: &Ty, variance: Variance) -> bool {
    if a == b {
        return true;
    }
    let reference = |x: &Ty, y: &Ty| {
        x.is_reference_type(env)
            && matches!(
                implicit_conversion(env, x, y),
                Some(Conversion::Reference | Conversion::Identity)
            )
    };
    match variance {
        Variance::Invariant => false,
        Variance::Covariant => reference(a, b),
        Variance::Contravariant => reference(b, a),
    }
}

fn constant_fits(value: i64, to: &Ty) -> bool {
    match to.strip_nullable() {
        Ty::Prim(Prim::Byte) => (0..=255).contains(&value),
        Ty::Prim(Prim::Short) => (-32768..=32767).contains(&value),
        _ => false,
    }
}

/// Implicit conversion from an argument expression to a parameter type.
pub fn argument_conversion(env: &dyn TypeEnv, arg: ArgTy<'_>, to: &Ty) -> Option<Conversion> {
    match arg {
        ArgTy::Expr { ty, constant } => {
            if let Some(conv) = implicit_conversion(env, ty, to) {
                return Some(conv);
            }
            match (ty, constant) {
                (Ty::Prim(Prim::Int), Some(value)) if constant_fits(value, to) => Some(Conversion::Constant),
                _ => None,
            }
        }
        ArgTy::Null => implicit_conversion(env, &Ty::Null, to),
        ArgTy::Lambda(lambda) => {
            if to.is_unknown() {
                return Some(Conversion::AnonymousFunction);
            }
            let sig = env.delegate_signature(to.strip_nullable())?;
            if sig.params.len() != lambda.param_count() {
                return None;
            }
            if let Some(explicit) = lambda.explicit_params() {
                let same = explicit
                    .iter()
                    .zip(&sig.params)
                    .all(|(a, b)| implicit_conversion(env, a, b) == Some(Conversion::Identity));
                if !same {
                    return None;
                }
            }
            let binding = lambda.bind(&sig.params)?;
            let ok = if sig.ret.is_void() {
                binding.void_compatible
            } else if binding.returns.is_empty() {
                !binding.void_compatible
            } else {
                binding.returns.iter().all(|(ty, constant)| {
                    argument_conversion(
                        env,
                        ArgTy::Expr {
                            ty,
                            constant: *constant,
                        },
                        &sig.ret,
                    )
                    .is_some()
                })
            };
            ok.then_some(Conversion::AnonymousFunction)
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{EmptyEnv, LambdaArg, LambdaBinding};

    struct ConstLambda(i64);

    impl LambdaArg for ConstLambda {
        fn param_count(&self) -> usize {
            1
        }

        fn explicit_params(&self) -> Option<Vec<Ty>> {
            None
        }

        fn bind(&self, _params: &[Ty]) -> Option<LambdaBinding> {
            Some(LambdaBinding {
                returns: vec![(Ty::int(), Some(self.0))],
                void_compatible: false,
            })
        }
    }

    #[test]
    fn numeric_widening_is_one_way() {
        let env = EmptyEnv;
        let byte = Ty::Prim(Prim::Byte);
        assert_eq!(implicit_conversion(&env, &byte, &Ty::int()), Some(Conversion::Numeric));
        assert_eq!(implicit_conversion(&env, &Ty::int(), &byte), None);
    }

    #[test]
    fn boxing_and_nullable_lifting() {
        let env = EmptyEnv;
        assert_eq!(implicit_conversion(&env, &Ty::int(), &Ty::Object), Some(Conversion::Boxing));
        assert_eq!(
            implicit_conversion(&env, &Ty::int(), &Ty::int().make_nullable()),
            Some(Conversion::Nullable)
        );
        assert_eq!(
            implicit_conversion(&env, &Ty::String, &Ty::String.make_nullable()),
            Some(Conversion::Identity)
        );
        assert_eq!(implicit_conversion(&env, &Ty::Null, &Ty::int()), None);
        assert_eq!(implicit_conversion(&env, &Ty::Null, &Ty::String), Some(Conversion::NullLiteral));
    }

    #[test]
    fn constants_narrow_when_in_range() {
        let env = EmptyEnv;
        let byte = Ty::Prim(Prim::Byte);
        let int = Ty::int();
        let small = ArgTy::Expr {
            ty: &int,
            constant: Some(7),
        };
        let large = ArgTy::Expr {
            ty: &int,
            constant: Some(300),
        };
        assert_eq!(argument_conversion(&env, small, &byte), Some(Conversion::Constant));
        assert_eq!(argument_conversion(&env, large, &byte), None);
    }

    #[test]
    fn lambda_returns_convert_to_delegate_return() {
        let env = EmptyEnv;
        let lambda = ConstLambda(0);
        let func = Ty::named("Func", vec![Ty::Prim(Prim::Byte), Ty::Prim(Prim::Byte)]);
        assert_eq!(
            argument_conversion(&env, ArgTy::Lambda(&lambda), &func),
            Some(Conversion::AnonymousFunction)
        );
        let action = Ty::named("Action", vec![]);
        assert_eq!(argument_conversion(&env, ArgTy::Lambda(&lambda), &action), None);
    }

    #[test]
    fn func_is_covariant_in_its_result() {
        let env = EmptyEnv;
        let from = Ty::named("Func", vec![Ty::String]);
        let to = Ty::named("Func", vec![Ty::Object]);
        assert_eq!(implicit_conversion(&env, &from, &to), Some(Conversion::Reference));
        assert_eq!(implicit_conversion(&env, &to, &from), None);
    }
}
