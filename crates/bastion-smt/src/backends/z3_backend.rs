//! In-process Z3 backend (cargo feature `z3`, links against libz3).

use std::collections::{BTreeMap, HashMap};

use thiserror::Error;
use z3::ast::{Ast, Bool, Real};
use z3::{Config, Context, Params, SatResult as Z3SatResult, Solver};

use crate::backends::values::{decimal_to_fraction, parse_value};
use crate::solver::{Model, ModelValue, SatResult, SmtSolver};
use crate::sorts::SmtSort;
use crate::terms::SmtTerm;

#[derive(Debug, Error)]
pub enum Z3Error {
    #[error("Z3 error: {0}")]
    Internal(String),
    #[error("Unknown variable: {0}")]
    UnknownVariable(String),
}

pub struct Z3Solver {
    // Leaked so the solver and the ASTs can be `'static` without a
    // self-referential struct. One context per solver, kept for the process.
    ctx: &'static Context,
    solver: Solver<'static>,
    real_vars: HashMap<String, Real<'static>>,
    bool_vars: HashMap<String, Bool<'static>>,
    timeout_ms: Option<u32>,
}

impl Z3Solver {
    pub fn new() -> Self {
        Self::build(None)
    }

    pub fn with_timeout_secs(timeout_secs: u64) -> Self {
        if timeout_secs == 0 {
            return Self::new();
        }
        let timeout_ms = u32::try_from(timeout_secs.saturating_mul(1000)).unwrap_or(u32::MAX);
        Self::build(Some(timeout_ms))
    }

    fn build(timeout_ms: Option<u32>) -> Self {
        let mut cfg = Config::new();
        cfg.set_model_generation(true);
        let ctx: &'static Context = Box::leak(Box::new(Context::new(&cfg)));
        let solver = Solver::new(ctx);
        let mut this = Self {
            ctx,
            solver,
            real_vars: HashMap::new(),
            bool_vars: HashMap::new(),
            timeout_ms,
        };
        this.apply_params();
        this
    }

    fn apply_params(&mut self) {
        if let Some(ms) = self.timeout_ms {
            let mut params = Params::new(self.ctx);
            params.set_u32("timeout", ms);
            self.solver.set_params(&params);
        }
    }

    fn real_literal(&self, value: f64) -> Result<Real<'static>, Z3Error> {
        let text = value.abs().to_string();
        let (num, den) = decimal_to_fraction(&text)
            .ok_or_else(|| Z3Error::Internal(format!("unrepresentable literal {value}")))?;
        let lit = Real::from_real_str(self.ctx, &num, &den)
            .ok_or_else(|| Z3Error::Internal(format!("unrepresentable literal {value}")))?;
        Ok(if value.is_sign_negative() && value != 0.0 {
            lit.unary_minus()
        } else {
            lit
        })
    }

    fn translate(
        &self,
        term: &SmtTerm,
        bound: &HashMap<String, Real<'static>>,
    ) -> Result<Z3Term, Z3Error> {
        let real = |t: &SmtTerm| self.translate(t, bound).and_then(Z3Term::into_real);
        let boolean = |t: &SmtTerm| self.translate(t, bound).and_then(Z3Term::into_bool);
        let ctx = self.ctx;

        Ok(match term {
            SmtTerm::Var(name) => {
                if let Some(v) = bound.get(name).or_else(|| self.real_vars.get(name)) {
                    Z3Term::Real(v.clone())
                } else if let Some(v) = self.bool_vars.get(name) {
                    Z3Term::Bool(v.clone())
                } else {
                    return Err(Z3Error::UnknownVariable(name.clone()));
                }
            }
            SmtTerm::RealLit(v) => Z3Term::Real(self.real_literal(*v)?),
            SmtTerm::BoolLit(b) => Z3Term::Bool(Bool::from_bool(ctx, *b)),
            SmtTerm::Add(l, r) => Z3Term::Real(Real::add(ctx, &[&real(l)?, &real(r)?])),
            SmtTerm::Sub(l, r) => Z3Term::Real(Real::sub(ctx, &[&real(l)?, &real(r)?])),
            SmtTerm::Mul(l, r) => Z3Term::Real(Real::mul(ctx, &[&real(l)?, &real(r)?])),
            SmtTerm::Div(l, r) => Z3Term::Real(real(l)?.div(&real(r)?)),
            SmtTerm::Neg(inner) => Z3Term::Real(real(inner)?.unary_minus()),
            SmtTerm::Eq(l, r) => {
                match (self.translate(l, bound)?, self.translate(r, bound)?) {
                    (Z3Term::Real(a), Z3Term::Real(b)) => Z3Term::Bool(a._eq(&b)),
                    (Z3Term::Bool(a), Z3Term::Bool(b)) => Z3Term::Bool(a._eq(&b)),
                    _ => return Err(Z3Error::Internal("Sort mismatch in Eq".into())),
                }
            }
            SmtTerm::Lt(l, r) => Z3Term::Bool(real(l)?.lt(&real(r)?)),
            SmtTerm::Le(l, r) => Z3Term::Bool(real(l)?.le(&real(r)?)),
            SmtTerm::Gt(l, r) => Z3Term::Bool(real(l)?.gt(&real(r)?)),
            SmtTerm::Ge(l, r) => Z3Term::Bool(real(l)?.ge(&real(r)?)),
            SmtTerm::And(terms) => {
                let bools = terms.iter().map(boolean).collect::<Result<Vec<_>, _>>()?;
                let refs: Vec<&Bool<'static>> = bools.iter().collect();
                Z3Term::Bool(Bool::and(ctx, &refs))
            }
            SmtTerm::Or(terms) => {
                let bools = terms.iter().map(boolean).collect::<Result<Vec<_>, _>>()?;
                let refs: Vec<&Bool<'static>> = bools.iter().collect();
                Z3Term::Bool(Bool::or(ctx, &refs))
            }
            SmtTerm::Not(inner) => Z3Term::Bool(boolean(inner)?.not()),
            SmtTerm::Implies(l, r) => Z3Term::Bool(boolean(l)?.implies(&boolean(r)?)),
            SmtTerm::Ite(c, t, e) => {
                let c = boolean(c)?;
                match (self.translate(t, bound)?, self.translate(e, bound)?) {
                    (Z3Term::Real(a), Z3Term::Real(b)) => Z3Term::Real(c.ite(&a, &b)),
                    (Z3Term::Bool(a), Z3Term::Bool(b)) => Z3Term::Bool(c.ite(&a, &b)),
                    _ => return Err(Z3Error::Internal("Sort mismatch in ITE".into())),
                }
            }
            SmtTerm::Exists(bindings, body) => {
                let mut scoped = bound.clone();
                let mut consts = Vec::with_capacity(bindings.len());
                for (name, sort) in bindings {
                    if *sort != SmtSort::Real {
                        return Err(Z3Error::Internal(format!(
                            "only Real binders are supported, got {name}: {sort}"
                        )));
                    }
                    let c = Real::new_const(ctx, name.as_str());
                    scoped.insert(name.clone(), c.clone());
                    consts.push(c);
                }
                let body = self.translate(body, &scoped)?.into_bool()?;
                let dyn_consts: Vec<&dyn Ast<'static>> =
                    consts.iter().map(|c| c as &dyn Ast<'static>).collect();
                Z3Term::Bool(z3::ast::exists_const(ctx, &dyn_consts, &[], &body))
            }
        })
    }

    fn model_real(value: &Real<'static>) -> Option<f64> {
        if let Some((num, den)) = value.as_real() {
            return Some(num as f64 / den as f64);
        }
        match parse_value(&value.to_string(), &SmtSort::Real) {
            Some(ModelValue::Real(v)) => Some(v),
            _ => None,
        }
    }
}

enum Z3Term {
    Real(Real<'static>),
    Bool(Bool<'static>),
}

impl Z3Term {
    fn into_real(self) -> Result<Real<'static>, Z3Error> {
        match self {
            Z3Term::Real(r) => Ok(r),
            Z3Term::Bool(_) => Err(Z3Error::Internal("Expected Real, got Bool".into())),
        }
    }

    fn into_bool(self) -> Result<Bool<'static>, Z3Error> {
        match self {
            Z3Term::Bool(b) => Ok(b),
            Z3Term::Real(_) => Err(Z3Error::Internal("Expected Bool, got Real".into())),
        }
    }
}

impl Default for Z3Solver {
    fn default() -> Self {
        Self::new()
    }
}

impl SmtSolver for Z3Solver {
    type Error = Z3Error;

    fn declare_var(&mut self, name: &str, sort: &SmtSort) -> Result<(), Z3Error> {
        match sort {
            SmtSort::Real => {
                let v = Real::new_const(self.ctx, name);
                self.real_vars.insert(name.to_string(), v);
            }
            SmtSort::Bool => {
                let v = Bool::new_const(self.ctx, name);
                self.bool_vars.insert(name.to_string(), v);
            }
        }
        Ok(())
    }

    fn assert(&mut self, term: &SmtTerm) -> Result<(), Z3Error> {
        let z3_term = self.translate(term, &HashMap::new())?.into_bool()?;
        self.solver.assert(&z3_term);
        Ok(())
    }

    fn check_sat(&mut self) -> Result<SatResult, Z3Error> {
        match self.solver.check() {
            Z3SatResult::Sat => Ok(SatResult::Sat),
            Z3SatResult::Unsat => Ok(SatResult::Unsat),
            Z3SatResult::Unknown => Ok(SatResult::Unknown(
                self.solver
                    .get_reason_unknown()
                    .unwrap_or_else(|| "Z3 returned unknown".into()),
            )),
        }
    }

    fn check_sat_with_model(
        &mut self,
        var_names: &[(&str, &SmtSort)],
    ) -> Result<(SatResult, Option<Model>), Z3Error> {
        let result = self.check_sat()?;
        if result != SatResult::Sat {
            return Ok((result, None));
        }
        let z3_model = self
            .solver
            .get_model()
            .ok_or_else(|| Z3Error::Internal("SAT but no model available".into()))?;
        let mut values = BTreeMap::new();

        for &(name, sort) in var_names {
            match sort {
                SmtSort::Real => {
                    if let Some(v) = self.real_vars.get(name) {
                        if let Some(val) = z3_model.eval(v, true).as_ref().and_then(Self::model_real)
                        {
                            values.insert(name.to_string(), ModelValue::Real(val));
                        }
                    }
                }
                SmtSort::Bool => {
                    if let Some(v) = self.bool_vars.get(name) {
                        if let Some(b) = z3_model.eval(v, true).and_then(|val| val.as_bool()) {
                            values.insert(name.to_string(), ModelValue::Bool(b));
                        }
                    }
                }
            }
        }

        Ok((SatResult::Sat, Some(Model { values })))
    }

    fn reset(&mut self) -> Result<(), Z3Error> {
        self.solver.reset();
        // Z3 drops per-solver parameters on reset; reapply the timeout.
        self.apply_params();
        self.real_vars.clear();
        self.bool_vars.clear();
        Ok(())
    }

    fn name(&self) -> &str {
        "z3"
    }
}
