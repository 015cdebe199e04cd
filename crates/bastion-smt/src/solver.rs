//! The narrow interface every decision procedure sits behind.
//!
//! A query is one-shot: `reset`, declare the variables, assert the
//! refutation, then `check_sat_with_model` for the variables whose values
//! make up a counterexample.

use std::collections::BTreeMap;

use crate::sorts::SmtSort;
use crate::terms::SmtTerm;

#[derive(Debug, Clone, PartialEq)]
pub enum SatResult {
    Sat,
    Unsat,
    /// The solver gave up; carries its reason (timeout, incomplete, ...).
    Unknown(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ModelValue {
    Real(f64),
    Bool(bool),
}

/// Values the solver reported for the requested variables. Variables the
/// backend could not read back are absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Model {
    pub values: BTreeMap<String, ModelValue>,
}

impl Model {
    pub fn get_real(&self, name: &str) -> Option<f64> {
        match self.values.get(name) {
            Some(ModelValue::Real(v)) => Some(*v),
            _ => None,
        }
    }

    /// Real values of `names`, in order. On failure returns the first name
    /// without a real value.
    pub fn point<'n>(&self, names: &'n [String]) -> Result<Vec<f64>, &'n str> {
        names
            .iter()
            .map(|name| self.get_real(name).ok_or(name.as_str()))
            .collect()
    }
}

pub trait SmtSolver {
    type Error: std::error::Error;

    fn declare_var(&mut self, name: &str, sort: &SmtSort) -> Result<(), Self::Error>;

    fn assert(&mut self, term: &SmtTerm) -> Result<(), Self::Error>;

    fn check_sat(&mut self) -> Result<SatResult, Self::Error>;

    /// `check_sat`, and on SAT the values of `var_names`.
    fn check_sat_with_model(
        &mut self,
        var_names: &[(&str, &SmtSort)],
    ) -> Result<(SatResult, Option<Model>), Self::Error>;

    /// Drop every declaration and assertion.
    fn reset(&mut self) -> Result<(), Self::Error>;

    /// Short backend name for logs.
    fn name(&self) -> &str {
        "smt"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(values: &[(&str, ModelValue)]) -> Model {
        Model {
            values: values
                .iter()
                .map(|(name, v)| (name.to_string(), v.clone()))
                .collect(),
        }
    }

    #[test]
    fn point_follows_the_requested_order() {
        let m = model(&[
            ("x1", ModelValue::Real(-2.0)),
            ("x0", ModelValue::Real(0.25)),
        ]);
        let names = vec!["x0".to_string(), "x1".to_string()];
        assert_eq!(m.point(&names), Ok(vec![0.25, -2.0]));
    }

    #[test]
    fn point_names_the_first_missing_variable() {
        let m = model(&[("x0", ModelValue::Real(1.0)), ("b", ModelValue::Bool(true))]);
        let names = vec!["x0".to_string(), "b".to_string(), "x2".to_string()];
        assert_eq!(m.point(&names), Err("b"));
        assert_eq!(m.get_real("x2"), None);
    }
}
