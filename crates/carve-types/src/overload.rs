use std::cmp::Ordering;
use std::collections::HashMap;

use carve_core::Name;

use crate::{argument_conversion, implicit_conversion, infer_type_args, ArgTy, Conversion, Ty, TypeEnv};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum RefKind {
    #[default]
    None,
    Ref,
    Out,
    In,
}

impl RefKind {
    pub fn keyword(self) -> Option<&'static str> {
        match self {
            RefKind::None => None,
            RefKind::Ref => Some("ref"),
            RefKind::Out => Some("out"),
            RefKind::In => Some("in"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamSig {
    pub name: Name,
    pub ty: Ty,
    pub ref_kind: RefKind,
    pub has_default: bool,
    pub is_params: bool,
}

/// A callable candidate: method, local function, delegate invocation or
/// extension method (with the receiver as its first parameter).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub type_params: Vec<Name>,
    pub params: Vec<ParamSig>,
    pub ret: Ty,
}

#[derive(Debug, Clone, Copy)]
pub struct CallArg<'a> {
    pub arg: ArgTy<'a>,
    pub ref_kind: RefKind,
    pub name: Option<&'a Name>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverloadResolution {
    Resolved {
        candidate: usize,
        type_args: Vec<Ty>,
        /// Instantiated parameter type for each argument, in argument order.
        param_types: Vec<Ty>,
        ret: Ty,
    },
    Ambiguous(Vec<usize>),
    NoApplicable,
}

impl OverloadResolution {
    pub fn is_resolved(&self) -> bool {
        matches!(self, OverloadResolution::Resolved { .. })
    }
}

struct Applicable {
    candidate: usize,
    type_args: Vec<Ty>,
    param_types: Vec<Ty>,
    ret: Ty,
    is_generic: bool,
    expanded: bool,
}

/// Maps each argument to a parameter index; `None` when the call shape does not fit.
fn map_arguments(sig: &Signature, args: &[CallArg<'_>], expanded: bool) -> Option<Vec<usize>> {
    let params = &sig.params;
    let mut mapping = Vec::with_capacity(args.len());
    let mut used = vec![false; params.len()];
    let mut seen_named = false;
    for (pos, arg) in args.iter().enumerate() {
        let idx = match arg.name {
            Some(name) => {
                seen_named = true;
                params.iter().position(|p| &p.name == name)?
            }
            None if seen_named => return None,
            None if expanded && pos + 1 >= params.len() => params.len().checked_sub(1)?,
            None => {
                if pos >= params.len() {
                    return None;
                }
                pos
            }
        };
        if used[idx] && !(expanded && idx + 1 == params.len()) {
            return None;
        }
        used[idx] = true;
        mapping.push(idx);
    }
    let complete = params
        .iter()
        .enumerate()
        .all(|(idx, p)| used[idx] || p.has_default || p.is_params);
    complete.then_some(mapping)
}

fn element_type(ty: &Ty) -> Ty {
    match ty {
        Ty::Array(elem) => (**elem).clone(),
        other => other.clone(),
    }
}

fn check_candidate(
    env: &dyn TypeEnv,
    idx: usize,
    sig: &Signature,
    args: &[CallArg<'_>],
    explicit_type_args: &[Ty],
    expanded: bool,
) -> Option<Applicable> {
    if expanded && !sig.params.last().is_some_and(|p| p.is_params) {
        return None;
    }
    let mapping = map_arguments(sig, args, expanded)?;
    let formal: Vec<Ty> = mapping
        .iter()
        .map(|&p| {
            let param = &sig.params[p];
            if expanded && param.is_params {
                element_type(&param.ty)
            } else {
                param.ty.clone()
            }
        })
        .collect();

    let type_args = if sig.type_params.is_empty() {
        Vec::new()
    } else if !explicit_type_args.is_empty() {
        if explicit_type_args.len() != sig.type_params.len() {
            return None;
        }
        explicit_type_args.to_vec()
    } else {
        let pairs: Vec<(ArgTy<'_>, Ty)> = args.iter().zip(&formal).map(|(a, t)| (a.arg, t.clone())).collect();
        infer_type_args(env, &sig.type_params, &pairs)?
    };
    let subst: HashMap<Name, Ty> = sig.type_params.iter().cloned().zip(type_args.iter().cloned()).collect();
    let param_types: Vec<Ty> = formal.iter().map(|t| t.substitute(&subst)).collect();

    for ((arg, &p), ty) in args.iter().zip(&mapping).zip(&param_types) {
        let param = &sig.params[p];
        let wanted = if expanded && param.is_params {
            RefKind::None
        } else {
            param.ref_kind
        };
        let arg_ref = if arg.ref_kind == RefKind::In { RefKind::None } else { arg.ref_kind };
        let wanted_ref = if wanted == RefKind::In { RefKind::None } else { wanted };
        if arg_ref != wanted_ref {
            return None;
        }
        match arg.ref_kind {
            RefKind::Ref | RefKind::Out => {
                let ArgTy::Expr { ty: arg_ty, .. } = arg.arg else {
                    return None;
                };
                if implicit_conversion(env, arg_ty, ty) != Some(Conversion::Identity) {
                    return None;
                }
            }
            _ => {
                argument_conversion(env, arg.arg, ty)?;
            }
        }
    }

    Some(Applicable {
        candidate: idx,
        ret: sig.ret.substitute(&subst),
        type_args,
        param_types,
        is_generic: !sig.type_params.is_empty(),
        expanded,
    })
}

/// Whether `t1` is a better conversion target than `t2` for `arg`.
fn better_target(env: &dyn TypeEnv, arg: ArgTy<'_>, t1: &Ty, t2: &Ty) -> bool {
    let one_way = implicit_conversion(env, t1, t2).is_some() && implicit_conversion(env, t2, t1).is_none();
    if one_way {
        return true;
    }
    let (Some(d1), Some(d2)) = (env.delegate_signature(t1), env.delegate_signature(t2)) else {
        return false;
    };
    let same_params = d1.params.len() == d2.params.len()
        && d1
            .params
            .iter()
            .zip(&d2.params)
            .all(|(a, b)| implicit_conversion(env, a, b) == Some(Conversion::Identity));
    if !same_params {
        return false;
    }
    if !d1.ret.is_void() && d2.ret.is_void() {
        return true;
    }
    let ArgTy::Lambda(lambda) = arg else {
        return false;
    };
    let Some(inferred) = lambda.bind(&d1.params).and_then(|b| b.inferred_return(env)) else {
        return false;
    };
    let inferred_arg = ArgTy::Expr {
        ty: &inferred,
        constant: None,
    };
    better_conversion(env, inferred_arg, &d1.ret, &d2.ret) == Ordering::Greater
}

fn exactly_matches(env: &dyn TypeEnv, arg: ArgTy<'_>, target: &Ty) -> bool {
    match arg {
        ArgTy::Expr { ty, .. } => implicit_conversion(env, ty, target) == Some(Conversion::Identity),
        ArgTy::Null => false,
        ArgTy::Lambda(lambda) => {
            let Some(sig) = env.delegate_signature(target) else {
                return false;
            };
            if sig.ret.is_void() {
                return lambda.bind(&sig.params).is_some_and(|b| b.returns.is_empty());
            }
            lambda
                .bind(&sig.params)
                .and_then(|b| b.inferred_return(env))
                .is_some_and(|ret| implicit_conversion(env, &ret, &sig.ret) == Some(Conversion::Identity))
        }
    }
}

/// Compares conversions of `arg` to `t1` and `t2`: `Greater` when `t1` is better.
fn better_conversion(env: &dyn TypeEnv, arg: ArgTy<'_>, t1: &Ty, t2: &Ty) -> Ordering {
    if implicit_conversion(env, t1, t2) == Some(Conversion::Identity) {
        return Ordering::Equal;
    }
    let e1 = exactly_matches(env, arg, t1);
    let e2 = exactly_matches(env, arg, t2);
    if e1 != e2 {
        return if e1 { Ordering::Greater } else { Ordering::Less };
    }
    if better_target(env, arg, t1, t2) {
        Ordering::Greater
    } else if better_target(env, arg, t2, t1) {
        Ordering::Less
    } else {
        Ordering::Equal
    }
}

fn better(env: &dyn TypeEnv, args: &[CallArg<'_>], a: &Applicable, b: &Applicable) -> bool {
    let mut any_better = false;
    for (idx, arg) in args.iter().enumerate() {
        match better_conversion(env, arg.arg, &a.param_types[idx], &b.param_types[idx]) {
            Ordering::Greater => any_better = true,
            Ordering::Less => return false,
            Ordering::Equal => {}
        }
    }
    if any_better {
        return true;
    }
    (!a.is_generic && b.is_generic) || (!a.expanded && b.expanded)
}

/// Whether candidate `a` of a previous resolution is better than `b` for `args`.
///
/// Exposed for callers that compare two already-instantiated parameter lists.
pub fn better_function(env: &dyn TypeEnv, args: &[CallArg<'_>], a: &[Ty], b: &[Ty]) -> bool {
    let wrap = |param_types: &[Ty]| Applicable {
        candidate: 0,
        type_args: Vec::new(),
        param_types: param_types.to_vec(),
        ret: Ty::Unknown,
        is_generic: false,
        expanded: false,
    };
    better(env, args, &wrap(a), &wrap(b))
}

/// Resolves a call against `candidates`.
pub fn resolve_overload(
    env: &dyn TypeEnv,
    candidates: &[Signature],
    args: &[CallArg<'_>],
    explicit_type_args: &[Ty],
) -> OverloadResolution {
    let mut applicable: Vec<Applicable> = Vec::new();
    for (idx, sig) in candidates.iter().enumerate() {
        if let Some(found) = check_candidate(env, idx, sig, args, explicit_type_args, false)
            .or_else(|| check_candidate(env, idx, sig, args, explicit_type_args, true))
        {
            applicable.push(found);
        }
    }

    let best: Vec<&Applicable> = applicable
        .iter()
        .filter(|a| {
            applicable
                .iter()
                .all(|b| a.candidate == b.candidate || better(env, args, a, b))
        })
        .collect();

    let result = match best.as_slice() {
        [single] => OverloadResolution::Resolved {
            candidate: single.candidate,
            type_args: single.type_args.clone(),
            param_types: single.param_types.clone(),
            ret: single.ret.clone(),
        },
        _ if applicable.is_empty() => OverloadResolution::NoApplicable,
        _ => OverloadResolution::Ambiguous(applicable.iter().map(|a| a.candidate).collect()),
    };
    tracing::trace!(target: "carve.sema", candidates = candidates.len(), ?result, "overload resolution");
    result
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{EmptyEnv, LambdaArg, LambdaBinding, Prim};

    fn param(name: &str, ty: Ty) -> ParamSig {
        ParamSig {
            name: Name::new(name),
            ty,
            ref_kind: RefKind::None,
            has_default: false,
            is_params: false,
        }
    }

    fn sig(params: Vec<ParamSig>) -> Signature {
        Signature {
            type_params: Vec::new(),
            params,
            ret: Ty::Void,
        }
    }

    fn arg<'a>(ty: &'a Ty) -> CallArg<'a> {
        CallArg {
            arg: ArgTy::Expr { ty, constant: None },
            ref_kind: RefKind::None,
            name: None,
        }
    }

    struct ZeroLambda;

    impl LambdaArg for ZeroLambda {
        fn param_count(&self) -> usize {
            1
        }

        fn explicit_params(&self) -> Option<Vec<Ty>> {
            None
        }

        fn bind(&self, _params: &[Ty]) -> Option<LambdaBinding> {
            Some(LambdaBinding {
                returns: vec![(Ty::int(), Some(0))],
                void_compatible: false,
            })
        }
    }

    #[test]
    fn identity_beats_boxing() {
        let env = EmptyEnv;
        let candidates = vec![
            sig(vec![param("x", Ty::Object)]),
            sig(vec![param("x", Ty::int())]),
        ];
        let int = Ty::int();
        let result = resolve_overload(&env, &candidates, &[arg(&int)], &[]);
        assert!(matches!(result, OverloadResolution::Resolved { candidate: 1, .. }));
    }

    #[test]
    fn unrelated_targets_are_ambiguous() {
        let env = EmptyEnv;
        let candidates = vec![
            sig(vec![param("x", Ty::String.make_nullable())]),
            sig(vec![param("x", Ty::named("Foo", vec![]))]),
        ];
        let result = resolve_overload(
            &env,
            &candidates,
            &[CallArg {
                arg: ArgTy::Null,
                ref_kind: RefKind::None,
                name: None,
            }],
            &[],
        );
        assert_eq!(result, OverloadResolution::Ambiguous(vec![0, 1]));
    }

    #[test]
    fn generic_candidate_wins_on_more_specific_arguments() {
        let env = EmptyEnv;
        let byte = Ty::Prim(Prim::Byte);
        let t = Ty::TypeParam(Name::new("T"));
        let s = Ty::TypeParam(Name::new("S"));
        let func = |a: &Ty, b: &Ty| Ty::named("Func", vec![a.clone(), b.clone()]);
        let generic = Signature {
            type_params: vec![Name::new("T"), Name::new("S")],
            params: vec![
                param("p", func(&s, &t)),
                param("q", func(&t, &s)),
                param("r", t.clone()),
                param("s", s.clone()),
            ],
            ret: Ty::Void,
        };
        let plain = sig(vec![
            param("p", func(&byte, &byte)),
            param("q", func(&byte, &byte)),
            param("r", Ty::int()),
            param("s", Ty::int()),
        ]);
        let lambda = ZeroLambda;
        let lambda_arg = CallArg {
            arg: ArgTy::Lambda(&lambda),
            ref_kind: RefKind::None,
            name: None,
        };
        let args = [lambda_arg, lambda_arg, arg(&byte), arg(&byte)];
        let result = resolve_overload(&env, &[generic.clone(), plain.clone()], &args, &[]);
        assert!(matches!(result, OverloadResolution::Resolved { candidate: 0, .. }));

        let func_byte = func(&byte, &byte);
        let args = [arg(&func_byte), lambda_arg, arg(&byte), arg(&byte)];
        let result = resolve_overload(&env, &[generic, plain], &args, &[]);
        assert!(matches!(result, OverloadResolution::Resolved { candidate: 1, .. }));
    }

    #[test]
    fn out_arguments_need_identity() {
        let env = EmptyEnv;
        let mut p = param("x", Ty::int());
        p.ref_kind = RefKind::Out;
        let candidates = vec![sig(vec![p])];
        let long = Ty::Prim(Prim::Long);
        let out_arg = CallArg {
            arg: ArgTy::Expr { ty: &long, constant: None },
            ref_kind: RefKind::Out,
            name: None,
        };
        assert_eq!(
            resolve_overload(&env, &candidates, &[out_arg], &[]),
            OverloadResolution::NoApplicable
        );
    }

    #[test]
    fn named_and_default_arguments() {
        let env = EmptyEnv;
        let mut b = param("b", Ty::String);
        b.has_default = true;
        let candidates = vec![sig(vec![param("a", Ty::int()), b])];
        let int = Ty::int();
        let name = Name::new("a");
        let named = CallArg {
            arg: ArgTy::Expr { ty: &int, constant: None },
            ref_kind: RefKind::None,
            name: Some(&name),
        };
        assert!(resolve_overload(&env, &candidates, &[named], &[]).is_resolved());
    }
}
