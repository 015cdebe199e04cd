//! Submits certificate conditions to an SMT solver.
//!
//! Each condition is checked in a fresh solver context: declare the point
//! and fresh variables, assert `domain ∧ side constraints ∧ ¬claim`, and
//! ask for a model. UNSAT means the clause holds everywhere; a model is a
//! counterexample.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use bastion_core::consts::VerifierType;
use bastion_smt::backends::process_backend::ProcessSolver;
use bastion_smt::backends::smtlib_printer::to_script;
use bastion_smt::solver::{SatResult, SmtSolver};
use bastion_smt::sorts::SmtSort;
use bastion_smt::terms::SmtTerm;

use crate::translator::{CertificateConditions, Condition, ConditionKind};

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("Solver error: {0}")]
    Solver(String),
    #[error("Could not write SMT dump {path}: {source}")]
    Dump {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{0} cannot run as an incremental SMT-LIB process")]
    UnsupportedBackend(VerifierType),
}

/// A point where a condition fails, in the condition's `point_vars` order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Counterexample {
    pub kind: ConditionKind,
    pub vars: Vec<String>,
    pub point: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConditionOutcome {
    Valid,
    Counterexample(Counterexample),
    Unknown(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum VerificationOutcome {
    Valid,
    Counterexamples(Vec<Counterexample>),
    Unknown(String),
}

impl VerificationOutcome {
    pub fn is_valid(&self) -> bool {
        matches!(self, VerificationOutcome::Valid)
    }
}

/// Start a z3 or cvc5 child process. dReal has no incremental SMT-LIB mode
/// and is refused.
pub fn process_solver(
    verifier: VerifierType,
    timeout_secs: u64,
) -> Result<ProcessSolver, VerifyError> {
    let spawned = match verifier {
        VerifierType::Z3 => ProcessSolver::z3(timeout_secs),
        VerifierType::Cvc5 => ProcessSolver::cvc5(timeout_secs),
        VerifierType::DReal => return Err(VerifyError::UnsupportedBackend(verifier)),
    };
    spawned.map_err(|e| VerifyError::Solver(e.to_string()))
}

pub struct Verifier<S> {
    solver: S,
    dump_smt: Option<PathBuf>,
    queries: usize,
}

impl<S: SmtSolver> Verifier<S> {
    pub fn new(solver: S) -> Self {
        Self {
            solver,
            dump_smt: None,
            queries: 0,
        }
    }

    /// Write every query as an SMT-LIB2 script into `dir`.
    pub fn with_dump_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dump_smt = Some(dir.into());
        self
    }

    /// Number of solver queries issued so far.
    pub fn queries(&self) -> usize {
        self.queries
    }

    pub fn solver(&self) -> &S {
        &self.solver
    }

    pub fn check(&mut self, condition: &Condition) -> Result<ConditionOutcome, VerifyError> {
        let kind = condition.kind;
        self.queries += 1;
        debug!(%kind, solver = self.solver.name(), "checking condition");

        self.solver.reset().map_err(solver_error)?;
        let declarations = condition.declarations();
        for (name, sort) in &declarations {
            self.solver.declare_var(name, sort).map_err(solver_error)?;
        }
        let assertions = condition.refutation_query();
        if let Some(dir) = &self.dump_smt {
            let path = dir.join(format!("{:04}_{kind}.smt2", self.queries));
            write_dump(&path, &declarations, &assertions)?;
        }
        for assertion in &assertions {
            self.solver.assert(assertion).map_err(solver_error)?;
        }

        let point_vars: Vec<(&str, &SmtSort)> = condition
            .point_vars
            .iter()
            .map(|name| (name.as_str(), &SmtSort::Real))
            .collect();
        let (result, model) = self
            .solver
            .check_sat_with_model(&point_vars)
            .map_err(solver_error)?;

        match result {
            SatResult::Unsat => {
                info!(%kind, "condition holds");
                Ok(ConditionOutcome::Valid)
            }
            SatResult::Sat => {
                let Some(model) = model else {
                    warn!(%kind, "solver returned SAT without a model");
                    return Ok(ConditionOutcome::Unknown(
                        "solver returned SAT without a model".into(),
                    ));
                };
                let point = match model.point(&condition.point_vars) {
                    Ok(point) => point,
                    Err(name) => {
                        warn!(%kind, var = %name, "model has no value for variable");
                        return Ok(ConditionOutcome::Unknown(format!(
                            "model has no value for `{name}`"
                        )));
                    }
                };
                info!(%kind, ?point, "counterexample found");
                Ok(ConditionOutcome::Counterexample(Counterexample {
                    kind,
                    vars: condition.point_vars.clone(),
                    point,
                }))
            }
            SatResult::Unknown(reason) => {
                info!(%kind, %reason, "solver answered unknown");
                Ok(ConditionOutcome::Unknown(reason))
            }
        }
    }

    /// Check every condition. Counterexamples take precedence over unknowns.
    pub fn verify(
        &mut self,
        conditions: &CertificateConditions,
    ) -> Result<VerificationOutcome, VerifyError> {
        let mut counterexamples = Vec::new();
        let mut unknown = None;
        for condition in &conditions.conditions {
            match self.check(condition)? {
                ConditionOutcome::Valid => {}
                ConditionOutcome::Counterexample(cex) => counterexamples.push(cex),
                ConditionOutcome::Unknown(reason) => {
                    unknown.get_or_insert(format!("{}: {reason}", condition.kind));
                }
            }
        }
        Ok(match (counterexamples.is_empty(), unknown) {
            (false, _) => VerificationOutcome::Counterexamples(counterexamples),
            (true, Some(reason)) => VerificationOutcome::Unknown(reason),
            (true, None) => VerificationOutcome::Valid,
        })
    }
}

fn solver_error<E: std::error::Error>(e: E) -> VerifyError {
    VerifyError::Solver(e.to_string())
}

fn write_dump(
    path: &Path,
    declarations: &[(&str, SmtSort)],
    assertions: &[SmtTerm],
) -> Result<(), VerifyError> {
    let dump_error = |source| VerifyError::Dump {
        path: path.display().to_string(),
        source,
    };
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(dump_error)?;
    }
    let decls: Vec<(&str, &SmtSort)> = declarations.iter().map(|(n, s)| (*n, s)).collect();
    fs::write(path, to_script(&decls, assertions)).map_err(dump_error)?;
    info!("SMT dump written to {}", path.display());
    Ok(())
}
