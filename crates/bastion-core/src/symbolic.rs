//! Immutable records produced by symbolic model evaluation.
//!
//! Solver terms cannot contain `sqrt`. A model that needs `√y` introduces a
//! fresh variable `s` together with the side constraints `s·s = y ∧ s ≥ 0`.
//! [`Symbolic`] carries the value term alongside every side constraint and
//! fresh variable accumulated while building it, and composes functionally so
//! no builder ever mutates a shared list.

use bastion_smt::eval::{evaluate_real, Env, EvalError};
use bastion_smt::terms::SmtTerm;

/// Prefix for fresh variable names.
///
/// Evaluating the same model twice in one formula (say `h(x)` and `h(x⁺)`)
/// must use two different scopes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Scope {
    prefix: String,
}

impl Scope {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn child(&self, name: &str) -> Scope {
        Scope::new(format!("{}_{name}", self.prefix))
    }

    pub fn fresh(&self, name: &str) -> String {
        format!("{}__{name}", self.prefix)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

/// A solver variable that stands for `sqrt(radicand)`.
#[derive(Debug, Clone, PartialEq)]
pub struct FreshVar {
    pub name: String,
    pub radicand: SmtTerm,
}

impl FreshVar {
    pub fn term(&self) -> SmtTerm {
        SmtTerm::var(self.name.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Symbolic<T> {
    pub value: T,
    pub constraints: Vec<SmtTerm>,
    pub fresh_vars: Vec<FreshVar>,
}

impl<T> Symbolic<T> {
    /// A value with no side conditions.
    pub fn pure(value: T) -> Self {
        Self {
            value,
            constraints: Vec::new(),
            fresh_vars: Vec::new(),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Symbolic<U> {
        Symbolic {
            value: f(self.value),
            constraints: self.constraints,
            fresh_vars: self.fresh_vars,
        }
    }

    pub fn and_then<U>(self, f: impl FnOnce(T) -> Symbolic<U>) -> Symbolic<U> {
        let next = f(self.value);
        let mut merged = Symbolic {
            value: next.value,
            constraints: self.constraints,
            fresh_vars: self.fresh_vars,
        };
        merged.absorb(next.constraints, next.fresh_vars);
        merged
    }

    /// Fallible [`Symbolic::and_then`].
    pub fn try_and_then<U, E>(
        self,
        f: impl FnOnce(T) -> Result<Symbolic<U>, E>,
    ) -> Result<Symbolic<U>, E> {
        let next = f(self.value)?;
        let mut merged = Symbolic {
            value: next.value,
            constraints: self.constraints,
            fresh_vars: self.fresh_vars,
        };
        merged.absorb(next.constraints, next.fresh_vars);
        Ok(merged)
    }

    pub fn zip<U>(self, other: Symbolic<U>) -> Symbolic<(T, U)> {
        let mut merged = Symbolic {
            value: (self.value, other.value),
            constraints: self.constraints,
            fresh_vars: self.fresh_vars,
        };
        merged.absorb(other.constraints, other.fresh_vars);
        merged
    }

    pub fn fresh_names(&self) -> Vec<String> {
        self.fresh_vars.iter().map(|v| v.name.clone()).collect()
    }

    /// Conjunction of every side constraint.
    pub fn side_condition(&self) -> SmtTerm {
        SmtTerm::and(self.constraints.clone())
    }

    /// Extend `env` with the value of every fresh variable, in the order they
    /// were introduced. Radicands that round below zero are clipped.
    pub fn solve_fresh(&self, env: &Env) -> Result<Env, EvalError> {
        let mut env = env.clone();
        for var in &self.fresh_vars {
            let y = evaluate_real(&var.radicand, &env)?;
            env.insert(var.name.clone(), y.max(0.0).sqrt());
        }
        Ok(env)
    }

    // Variables with the same name were introduced by the same builder
    // under the same scope, so the first definition wins.
    fn absorb(&mut self, constraints: Vec<SmtTerm>, fresh_vars: Vec<FreshVar>) {
        for c in constraints {
            if !self.constraints.contains(&c) {
                self.constraints.push(c);
            }
        }
        for v in fresh_vars {
            if !self.fresh_vars.iter().any(|w| w.name == v.name) {
                self.fresh_vars.push(v);
            }
        }
    }
}

impl Symbolic<SmtTerm> {
    /// `sqrt(radicand)` as a fresh variable named `name`.
    pub fn sqrt(radicand: SmtTerm, name: String) -> Self {
        let s = SmtTerm::var(name.as_str());
        Symbolic {
            constraints: vec![
                s.clone().mul(s.clone()).eq(radicand.clone()),
                s.clone().ge(SmtTerm::zero()),
            ],
            fresh_vars: vec![FreshVar { name, radicand }],
            value: s,
        }
    }

    /// Numeric value at `env`, resolving fresh variables first.
    pub fn evaluate(&self, env: &Env) -> Result<f64, EvalError> {
        let env = self.solve_fresh(env)?;
        evaluate_real(&self.value, &env)
    }
}

impl Symbolic<Vec<SmtTerm>> {
    pub fn evaluate(&self, env: &Env) -> Result<Vec<f64>, EvalError> {
        let env = self.solve_fresh(env)?;
        self.value.iter().map(|t| evaluate_real(t, &env)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bastion_smt::eval::{env_from, evaluate_bool};

    #[test]
    fn scopes_produce_distinct_names() {
        let root = Scope::new("h");
        let next = root.child("next");
        assert_ne!(root.fresh("norm"), next.fresh("norm"));
        assert_eq!(next.prefix(), "h_next");
    }

    #[test]
    fn sqrt_introduces_side_constraints_that_hold_at_the_root() {
        let x = SmtTerm::var("x");
        let s = Symbolic::sqrt(x.clone().mul(x), "s".into());
        assert_eq!(s.constraints.len(), 2);
        let env = env_from(&["x".to_string()], &[-3.0]);
        assert_eq!(s.evaluate(&env).unwrap(), 3.0);
        let solved = s.solve_fresh(&env).unwrap();
        assert!(evaluate_bool(&s.side_condition(), &solved).unwrap());
    }

    #[test]
    fn composition_keeps_fresh_variables_in_dependency_order() {
        let a = Symbolic::sqrt(SmtTerm::real(16.0), "a".into());
        let b = a.and_then(|a| Symbolic::sqrt(a, "b".into()));
        assert_eq!(b.fresh_names(), vec!["a", "b"]);
        assert_eq!(b.evaluate(&Env::new()).unwrap(), 2.0);
    }

    #[test]
    fn zip_deduplicates_shared_definitions() {
        let a = Symbolic::sqrt(SmtTerm::real(4.0), "n".into());
        let b = Symbolic::sqrt(SmtTerm::real(4.0), "n".into());
        let both = a.zip(b).map(|(l, r)| l.add(r));
        assert_eq!(both.fresh_vars.len(), 1);
        assert_eq!(both.constraints.len(), 2);
        assert_eq!(both.evaluate(&Env::new()).unwrap(), 4.0);
    }

    #[test]
    fn pure_values_have_no_side_conditions() {
        let p = Symbolic::pure(SmtTerm::real(1.5));
        assert!(p.constraints.is_empty());
        assert_eq!(p.side_condition(), SmtTerm::and(vec![]));
    }
}
