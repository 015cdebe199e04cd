//! Scripted solver for unit tests.

use std::collections::VecDeque;
use std::io;

use bastion_smt::solver::{Model, ModelValue, SatResult, SmtSolver};
use bastion_smt::sorts::SmtSort;
use bastion_smt::terms::SmtTerm;

/// Replays queued answers, one per `check_sat_with_model`, then repeats the
/// fallback answer (UNSAT unless set).
#[derive(Debug, Default)]
pub struct ScriptedSolver {
    script: VecDeque<(SatResult, Option<Model>)>,
    fallback: Option<(SatResult, Option<Model>)>,
    pub declared: Vec<String>,
    pub asserted: Vec<SmtTerm>,
    pub resets: usize,
    pub checks: usize,
}

pub fn model(values: &[(&str, f64)]) -> Model {
    Model {
        values: values
            .iter()
            .map(|(name, v)| (name.to_string(), ModelValue::Real(*v)))
            .collect(),
    }
}

impl ScriptedSolver {
    pub fn then(mut self, result: SatResult, model: Option<Model>) -> Self {
        self.script.push_back((result, model));
        self
    }

    pub fn then_counterexample(self, values: &[(&str, f64)]) -> Self {
        self.then(SatResult::Sat, Some(model(values)))
    }

    pub fn otherwise(mut self, result: SatResult, model: Option<Model>) -> Self {
        self.fallback = Some((result, model));
        self
    }
}

impl SmtSolver for ScriptedSolver {
    type Error = io::Error;

    fn declare_var(&mut self, name: &str, _sort: &SmtSort) -> Result<(), Self::Error> {
        self.declared.push(name.to_string());
        Ok(())
    }

    fn assert(&mut self, term: &SmtTerm) -> Result<(), Self::Error> {
        self.asserted.push(term.clone());
        Ok(())
    }

    fn check_sat(&mut self) -> Result<SatResult, Self::Error> {
        Ok(self.check_sat_with_model(&[])?.0)
    }

    fn check_sat_with_model(
        &mut self,
        _var_names: &[(&str, &SmtSort)],
    ) -> Result<(SatResult, Option<Model>), Self::Error> {
        self.checks += 1;
        Ok(self
            .script
            .pop_front()
            .or_else(|| self.fallback.clone())
            .unwrap_or((SatResult::Unsat, None)))
    }

    fn reset(&mut self) -> Result<(), Self::Error> {
        self.resets += 1;
        self.declared.clear();
        self.asserted.clear();
        Ok(())
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
