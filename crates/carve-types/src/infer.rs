//! Generic method type-argument inference.
//!
//! Two phases: bounds are first collected from typed arguments and explicitly
//! typed lambda parameters; then type parameters are fixed in dependency order,
//! with lambdas whose inputs are fixed contributing their inferred return type
//! as a lower bound on their output.

use std::collections::{HashMap, HashSet};

use carve_core::Name;

use crate::{implicit_conversion, variance, ArgTy, Conversion, Ty, TypeEnv, Variance};

#[derive(Debug, Default, Clone)]
struct Bounds {
    exact: Vec<Ty>,
    lower: Vec<Ty>,
    upper: Vec<Ty>,
}

impl Bounds {
    fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.lower.is_empty() && self.upper.is_empty()
    }
}

struct Inferrer<'e> {
    env: &'e dyn TypeEnv,
    params: &'e [Name],
    bounds: Vec<Bounds>,
    fixed: Vec<Option<Ty>>,
}

#[derive(Clone, Copy)]
enum BoundKind {
    Exact,
    Lower,
    Upper,
}

impl<'e> Inferrer<'e> {
    fn index_of(&self, ty: &Ty) -> Option<usize> {
        match ty {
            Ty::TypeParam(name) => self.params.iter().position(|p| p == name),
            _ => None,
        }
    }

    fn unfixed(&self, idx: usize) -> bool {
        self.fixed[idx].is_none()
    }

    fn add_bound(&mut self, idx: usize, kind: BoundKind, ty: &Ty) {
        let ty = ty.erase_annotations(self.env);
        let bounds = &mut self.bounds[idx];
        let list = match kind {
            BoundKind::Exact => &mut bounds.exact,
            BoundKind::Lower => &mut bounds.lower,
            BoundKind::Upper => &mut bounds.upper,
        };
        if !list.contains(&ty) {
            list.push(ty);
        }
    }

    /// Infers from argument type `u` into parameter type `v`.
    fn infer(&mut self, kind: BoundKind, u: &Ty, v: &Ty) {
        if u.is_unknown() {
            return;
        }
        if let Some(idx) = self.index_of(v) {
            if self.unfixed(idx) {
                self.add_bound(idx, kind, u);
            }
            return;
        }
        match (u, v) {
            (Ty::Nullable(u1), Ty::Nullable(v1)) => self.infer(kind, u1, v1),
            (u, Ty::Nullable(v1)) if matches!(kind, BoundKind::Lower) => self.infer(kind, u, v1),
            (Ty::Array(u1), Ty::Array(v1)) => {
                let kind = match kind {
                    BoundKind::Exact => BoundKind::Exact,
                    _ if u1.is_reference_type(self.env) => kind,
                    _ => BoundKind::Exact,
                };
                self.infer(kind, u1, v1);
            }
            (Ty::Tuple(us), Ty::Tuple(vs)) if us.len() == vs.len() => {
                for (a, b) in us.iter().zip(vs) {
                    self.infer(kind, &a.ty, &b.ty);
                }
            }
            (Ty::Named { .. }, Ty::Named { name: v_name, args: v_args }) => {
                let Some(u_args) = self.matching_args(u, v_name, v_args.len(), kind) else {
                    return;
                };
                let variances = variance(v_name.as_str(), v_args.len());
                for ((ua, va), var) in u_args.iter().zip(v_args).zip(variances) {
                    let sub = match (kind, var) {
                        (BoundKind::Exact, _) | (_, Variance::Invariant) => BoundKind::Exact,
                        _ if !ua.is_reference_type(self.env) => BoundKind::Exact,
                        (BoundKind::Lower, Variance::Covariant) | (BoundKind::Upper, Variance::Contravariant) => {
                            BoundKind::Lower
                        }
                        (BoundKind::Lower, Variance::Contravariant) | (BoundKind::Upper, Variance::Covariant) => {
                            BoundKind::Upper
                        }
                    };
                    self.infer(sub, ua, va);
                }
            }
            _ => {}
        }
    }

    /// Type arguments of `u`, or of its nearest base class, named `name`.
    fn matching_args(&self, u: &Ty, name: &Name, arity: usize, kind: BoundKind) -> Option<Vec<Ty>> {
        let mut current = Some(u.clone());
        let mut depth = 0;
        while let Some(ty) = current {
            if let Some((n, args)) = ty.named_parts() {
                if n == name && args.len() == arity {
                    return Some(args.to_vec());
                }
            }
            if !matches!(kind, BoundKind::Lower) || depth > 32 {
                return None;
            }
            depth += 1;
            current = self.env.base_class(&ty);
        }
        None
    }

    fn fix(&mut self, idx: usize) -> bool {
        let bounds = self.bounds[idx].clone();
        let mut candidates: Vec<Ty> = Vec::new();
        for ty in bounds.exact.iter().chain(&bounds.lower).chain(&bounds.upper) {
            if !candidates.contains(ty) {
                candidates.push(ty.clone());
            }
        }
        let env = self.env;
        candidates.retain(|cand| {
            bounds.exact.iter().all(|u| implicit_conversion(env, u, cand) == Some(Conversion::Identity))
                && bounds.lower.iter().all(|u| implicit_conversion(env, u, cand).is_some())
                && bounds.upper.iter().all(|u| implicit_conversion(env, cand, u).is_some())
        });
        let chosen: Vec<&Ty> = candidates
            .iter()
            .filter(|cand| {
                candidates
                    .iter()
                    .all(|other| implicit_conversion(env, other, cand).is_some())
            })
            .collect();
        match chosen.as_slice() {
            [single] => {
                tracing::trace!(target: "carve.sema", param = %self.params[idx], fixed = %single, "fixed type parameter");
                self.fixed[idx] = Some((*single).clone());
                true
            }
            _ => false,
        }
    }

    fn substitution(&self) -> HashMap<Name, Ty> {
        self.params
            .iter()
            .zip(&self.fixed)
            .filter_map(|(name, ty)| ty.clone().map(|ty| (name.clone(), ty)))
            .collect()
    }

    fn unfixed_in(&self, ty: &Ty) -> Vec<usize> {
        (0..self.params.len())
            .filter(|idx| self.unfixed(*idx) && ty.mentions_any(std::slice::from_ref(&self.params[*idx])))
            .collect()
    }
}

/// Infers the type arguments of a generic candidate.
///
/// `args` pairs each argument with the (uninstantiated) parameter type it maps
/// to. Returns `None` when inference fails.
pub fn infer_type_args(env: &dyn TypeEnv, type_params: &[Name], args: &[(ArgTy<'_>, Ty)]) -> Option<Vec<Ty>> {
    let mut inf = Inferrer {
        env,
        params: type_params,
        bounds: vec![Bounds::default(); type_params.len()],
        fixed: vec![None; type_params.len()],
    };

    // Phase one.
    for (arg, param_ty) in args {
        match arg {
            ArgTy::Expr { ty, .. } => inf.infer(BoundKind::Lower, ty, param_ty),
            ArgTy::Null => {}
            ArgTy::Lambda(lambda) => {
                if let (Some(explicit), Some(sig)) = (lambda.explicit_params(), env.delegate_signature(param_ty)) {
                    for (u, v) in explicit.iter().zip(&sig.params) {
                        inf.infer(BoundKind::Exact, u, v);
                    }
                }
            }
        }
    }

    // Phase two.
    let lambda_args: Vec<(usize, Vec<Ty>, Ty)> = args
        .iter()
        .enumerate()
        .filter_map(|(idx, (arg, param_ty))| match arg {
            ArgTy::Lambda(_) => env
                .delegate_signature(param_ty)
                .map(|sig| (idx, sig.params, sig.ret)),
            _ => None,
        })
        .collect();
    let mut output_done: HashSet<usize> = HashSet::new();

    loop {
        if inf.fixed.iter().all(Option::is_some) {
            break;
        }

        // Output type inference for lambdas whose inputs are fixed.
        let subst = inf.substitution();
        for (arg_idx, inputs, output) in &lambda_args {
            if output_done.contains(arg_idx) {
                continue;
            }
            let inputs_fixed = inputs.iter().all(|t| inf.unfixed_in(t).is_empty());
            if !inputs_fixed || inf.unfixed_in(output).is_empty() {
                continue;
            }
            output_done.insert(*arg_idx);
            let ArgTy::Lambda(lambda) = args[*arg_idx].0 else {
                continue;
            };
            let inputs: Vec<Ty> = inputs.iter().map(|t| t.substitute(&subst)).collect();
            if let Some(ret) = lambda.bind(&inputs).and_then(|b| b.inferred_return(env)) {
                inf.infer(BoundKind::Lower, &ret, output);
            }
        }

        // `depends[i]` holds the type parameters `i` depends on, transitively.
        let n = type_params.len();
        let mut depends = vec![HashSet::new(); n];
        for (arg_idx, inputs, output) in &lambda_args {
            if output_done.contains(arg_idx) {
                continue;
            }
            let ins: Vec<usize> = inputs.iter().flat_map(|t| inf.unfixed_in(t)).collect();
            for out in inf.unfixed_in(output) {
                depends[out].extend(ins.iter().copied());
            }
        }
        loop {
            let mut changed = false;
            for i in 0..n {
                let via: Vec<usize> = depends[i].iter().flat_map(|j| depends[*j].iter().copied()).collect();
                for k in via {
                    changed |= depends[i].insert(k);
                }
            }
            if !changed {
                break;
            }
        }

        let unfixed: Vec<usize> = (0..n).filter(|i| inf.unfixed(*i)).collect();
        let mut to_fix: Vec<usize> = unfixed
            .iter()
            .copied()
            .filter(|i| !inf.bounds[*i].is_empty() && depends[*i].iter().all(|j| !inf.unfixed(*j)))
            .collect();
        if to_fix.is_empty() {
            to_fix = unfixed
                .iter()
                .copied()
                .filter(|i| !inf.bounds[*i].is_empty() && unfixed.iter().any(|j| depends[*j].contains(i)))
                .collect();
        }
        if to_fix.is_empty() {
            return None;
        }
        for idx in to_fix {
            if !inf.fix(idx) {
                return None;
            }
        }
    }

    inf.fixed.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{EmptyEnv, LambdaArg, LambdaBinding, Prim};

    /// `x => 0` or `x => x`.
    struct Lambda {
        returns_param: bool,
    }

    impl LambdaArg for Lambda {
        fn param_count(&self) -> usize {
            1
        }

        fn explicit_params(&self) -> Option<Vec<Ty>> {
            None
        }

        fn bind(&self, params: &[Ty]) -> Option<LambdaBinding> {
            let ret = if self.returns_param {
                (params[0].clone(), None)
            } else {
                (Ty::int(), Some(0))
            };
            Some(LambdaBinding {
                returns: vec![ret],
                void_compatible: false,
            })
        }
    }

    fn tp(name: &str) -> Ty {
        Ty::TypeParam(Name::new(name))
    }

    fn func(a: Ty, b: Ty) -> Ty {
        Ty::named("Func", vec![a, b])
    }

    #[test]
    fn mutually_dependent_lambdas_fix_together() {
        // Goo<T, S>(Func<S, T> p, Func<T, S> q, T r, S s) called as Goo(x => 0, y => 0, z, z)
        let env = EmptyEnv;
        let byte = Ty::Prim(Prim::Byte);
        let lambda = Lambda { returns_param: false };
        let params = [Name::new("T"), Name::new("S")];
        let args = vec![
            (ArgTy::Lambda(&lambda), func(tp("S"), tp("T"))),
            (ArgTy::Lambda(&lambda), func(tp("T"), tp("S"))),
            (ArgTy::Expr { ty: &byte, constant: None }, tp("T")),
            (ArgTy::Expr { ty: &byte, constant: None }, tp("S")),
        ];
        assert_eq!(infer_type_args(&env, &params, &args), Some(vec![byte.clone(), byte.clone()]));
    }

    #[test]
    fn lambda_output_conflicting_with_exact_bound_fails() {
        // Same call with the first lambda replaced by a `Func<byte, byte>` value.
        let env = EmptyEnv;
        let byte = Ty::Prim(Prim::Byte);
        let func_byte = func(byte.clone(), byte.clone());
        let lambda = Lambda { returns_param: false };
        let params = [Name::new("T"), Name::new("S")];
        let args = vec![
            (ArgTy::Expr { ty: &func_byte, constant: None }, func(tp("S"), tp("T"))),
            (ArgTy::Lambda(&lambda), func(tp("T"), tp("S"))),
            (ArgTy::Expr { ty: &byte, constant: None }, tp("T")),
            (ArgTy::Expr { ty: &byte, constant: None }, tp("S")),
        ];
        assert_eq!(infer_type_args(&env, &params, &args), None);
    }

    #[test]
    fn lambda_return_flows_into_output() {
        // Select<T, R>(T source, Func<T, R> f) called as Select("s", x => x)
        let env = EmptyEnv;
        let lambda = Lambda { returns_param: true };
        let params = [Name::new("T"), Name::new("R")];
        let args = vec![
            (ArgTy::Expr { ty: &Ty::String, constant: None }, tp("T")),
            (ArgTy::Lambda(&lambda), func(tp("T"), tp("R"))),
        ];
        assert_eq!(infer_type_args(&env, &params, &args), Some(vec![Ty::String, Ty::String]));
    }

    #[test]
    fn lower_bounds_pick_the_widest() {
        let env = EmptyEnv;
        let byte = Ty::Prim(Prim::Byte);
        let int = Ty::int();
        let params = [Name::new("T")];
        let args = vec![
            (ArgTy::Expr { ty: &byte, constant: None }, tp("T")),
            (ArgTy::Expr { ty: &int, constant: None }, tp("T")),
        ];
        assert_eq!(infer_type_args(&env, &params, &args), Some(vec![Ty::int()]));
    }
}
