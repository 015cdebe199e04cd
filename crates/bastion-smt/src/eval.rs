//! Numeric evaluation of terms at a concrete point.
//!
//! Used to check that symbolic model translations agree with their numeric
//! counterparts, and to test domain constraints against sampled points.

use std::collections::HashMap;

use thiserror::Error;

use crate::terms::SmtTerm;

#[derive(Debug, Error, PartialEq)]
pub enum EvalError {
    #[error("Unbound variable: {0}")]
    UnboundVariable(String),
    #[error("Sort mismatch: expected {expected}")]
    SortMismatch { expected: &'static str },
    #[error("Quantified terms cannot be evaluated at a point")]
    Quantifier,
}

/// Value of an evaluated term.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Real(f64),
    Bool(bool),
}

impl Value {
    pub fn as_real(self) -> Result<f64, EvalError> {
        match self {
            Value::Real(v) => Ok(v),
            Value::Bool(_) => Err(EvalError::SortMismatch { expected: "Real" }),
        }
    }

    pub fn as_bool(self) -> Result<bool, EvalError> {
        match self {
            Value::Bool(b) => Ok(b),
            Value::Real(_) => Err(EvalError::SortMismatch { expected: "Bool" }),
        }
    }
}

/// Variable assignment used for evaluation.
pub type Env = HashMap<String, f64>;

pub fn evaluate(term: &SmtTerm, env: &Env) -> Result<Value, EvalError> {
    let real = |t: &SmtTerm| evaluate(t, env).and_then(Value::as_real);
    let boolean = |t: &SmtTerm| evaluate(t, env).and_then(Value::as_bool);

    Ok(match term {
        SmtTerm::Var(name) => Value::Real(
            *env.get(name)
                .ok_or_else(|| EvalError::UnboundVariable(name.clone()))?,
        ),
        SmtTerm::RealLit(v) => Value::Real(*v),
        SmtTerm::BoolLit(b) => Value::Bool(*b),
        SmtTerm::Add(l, r) => Value::Real(real(l)? + real(r)?),
        SmtTerm::Sub(l, r) => Value::Real(real(l)? - real(r)?),
        SmtTerm::Mul(l, r) => Value::Real(real(l)? * real(r)?),
        SmtTerm::Div(l, r) => Value::Real(real(l)? / real(r)?),
        SmtTerm::Neg(inner) => Value::Real(-real(inner)?),
        SmtTerm::Eq(l, r) => {
            let (l, r) = (evaluate(l, env)?, evaluate(r, env)?);
            match (l, r) {
                (Value::Real(a), Value::Real(b)) => Value::Bool(a == b),
                (Value::Bool(a), Value::Bool(b)) => Value::Bool(a == b),
                _ => return Err(EvalError::SortMismatch { expected: "matching sorts" }),
            }
        }
        SmtTerm::Lt(l, r) => Value::Bool(real(l)? < real(r)?),
        SmtTerm::Le(l, r) => Value::Bool(real(l)? <= real(r)?),
        SmtTerm::Gt(l, r) => Value::Bool(real(l)? > real(r)?),
        SmtTerm::Ge(l, r) => Value::Bool(real(l)? >= real(r)?),
        SmtTerm::And(terms) => {
            let mut acc = true;
            for t in terms {
                acc &= boolean(t)?;
            }
            Value::Bool(acc)
        }
        SmtTerm::Or(terms) => {
            let mut acc = false;
            for t in terms {
                acc |= boolean(t)?;
            }
            Value::Bool(acc)
        }
        SmtTerm::Not(inner) => Value::Bool(!boolean(inner)?),
        SmtTerm::Implies(l, r) => Value::Bool(!boolean(l)? || boolean(r)?),
        SmtTerm::Ite(c, t, e) => {
            if boolean(c)? {
                evaluate(t, env)?
            } else {
                evaluate(e, env)?
            }
        }
        SmtTerm::Exists(..) => return Err(EvalError::Quantifier),
    })
}

/// Evaluate a real-sorted term.
pub fn evaluate_real(term: &SmtTerm, env: &Env) -> Result<f64, EvalError> {
    evaluate(term, env)?.as_real()
}

/// Evaluate a bool-sorted term.
pub fn evaluate_bool(term: &SmtTerm, env: &Env) -> Result<bool, EvalError> {
    evaluate(term, env)?.as_bool()
}

/// Build an environment from parallel name/value slices.
pub fn env_from(names: &[String], values: &[f64]) -> Env {
    names
        .iter()
        .cloned()
        .zip(values.iter().copied())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, f64)]) -> Env {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn evaluates_arithmetic_and_comparisons() {
        let t = SmtTerm::var("x")
            .square()
            .add(SmtTerm::var("y"))
            .le(SmtTerm::real(5.0));
        assert_eq!(evaluate_bool(&t, &env(&[("x", 2.0), ("y", 1.0)])), Ok(true));
        assert_eq!(evaluate_bool(&t, &env(&[("x", 2.0), ("y", 1.5)])), Ok(false));
    }

    #[test]
    fn ite_selects_branch() {
        let relu = SmtTerm::var("x").max(SmtTerm::zero());
        assert_eq!(evaluate_real(&relu, &env(&[("x", -3.0)])), Ok(0.0));
        assert_eq!(evaluate_real(&relu, &env(&[("x", 3.0)])), Ok(3.0));
    }

    #[test]
    fn unbound_variable_is_reported() {
        let err = evaluate_real(&SmtTerm::var("z"), &Env::new()).unwrap_err();
        assert_eq!(err, EvalError::UnboundVariable("z".into()));
    }

    #[test]
    fn quantifiers_are_rejected() {
        let t = SmtTerm::exists(vec!["u".into()], SmtTerm::var("u").ge(SmtTerm::zero()));
        assert_eq!(evaluate(&t, &Env::new()), Err(EvalError::Quantifier));
    }
}
