//! Control-affine dynamical systems `ẋ = f(x) + g(x)·u`.
//!
//! Every system exposes its dynamics twice: numerically on batches of states
//! and symbolically on solver terms. Discrete-time systems read `f(x) + g(x)·u`
//! as the successor state.

mod library;
mod spec;
mod uncertainty;

pub use library::{make_system, SYSTEM_IDS};
pub use spec::{
    DynamicsFn, NumericDrift, NumericInput, SymbolicDrift, SymbolicInput, System, SystemSpec,
};
pub use uncertainty::{add_uncertainty, AdditiveBounded, UNCERTAINTY_IDS};

use ndarray::{Array2, Array3, ArrayView2};
use thiserror::Error;

use bastion_smt::terms::SmtTerm;

use crate::consts::{DomainName, TimeDomain};
use crate::domains::Set;
use crate::error::ShapeError;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SystemError {
    #[error("system `{system}` is missing the `{domain}` domain")]
    MissingDomain { system: String, domain: DomainName },
    #[error("system `{system}` is missing the `{key}` dynamics")]
    MissingDynamics { system: String, key: String },
    #[error("dynamics `{key}` of system `{system}` has the wrong kind: expected {expected}")]
    WrongDynamicsKind {
        system: String,
        key: String,
        expected: &'static str,
    },
    #[error("unknown system `{0}`")]
    UnknownSystem(String),
    #[error("unknown uncertainty `{0}`")]
    UnknownUncertainty(String),
    #[error(transparent)]
    Shape(#[from] ShapeError),
}

/// A control-affine system with named domains.
pub trait ControlAffineDynamics {
    fn id(&self) -> &str;
    fn vars(&self) -> &[String];
    fn controls(&self) -> &[String];
    fn time_domain(&self) -> TimeDomain;

    /// The set registered under `name`, if any.
    fn domain(&self, name: DomainName) -> Option<&Set>;

    fn fx_numeric(&self, x: ArrayView2<'_, f64>) -> Result<Array2<f64>, ShapeError>;
    /// Input matrix of every state in the batch, shape `(batch, n_vars, n_controls)`.
    fn gx_numeric(&self, x: ArrayView2<'_, f64>) -> Result<Array3<f64>, ShapeError>;
    fn fx_symbolic(&self, x: &[SmtTerm]) -> Result<Vec<SmtTerm>, ShapeError>;
    /// Input matrix as `n_vars` rows of `n_controls` terms.
    fn gx_symbolic(&self, x: &[SmtTerm]) -> Result<Vec<Vec<SmtTerm>>, ShapeError>;

    fn uncertainty(&self) -> Option<&dyn Uncertainty> {
        None
    }

    fn n_vars(&self) -> usize {
        self.vars().len()
    }

    fn n_controls(&self) -> usize {
        self.controls().len()
    }

    /// `f(x) + g(x)·u` for row-aligned batches of states and controls.
    fn closed_loop_numeric(
        &self,
        x: ArrayView2<'_, f64>,
        u: ArrayView2<'_, f64>,
    ) -> Result<Array2<f64>, ShapeError> {
        if u.dim() != (x.nrows(), self.n_controls()) {
            return Err(ShapeError::new(
                "control batch",
                format!("({}, {})", x.nrows(), self.n_controls()),
                format!("{:?}", u.dim()),
            ));
        }
        let mut out = self.fx_numeric(x)?;
        let g = self.gx_numeric(x)?;
        for b in 0..x.nrows() {
            for i in 0..self.n_vars() {
                for j in 0..self.n_controls() {
                    out[[b, i]] += g[[b, i, j]] * u[[b, j]];
                }
            }
        }
        Ok(out)
    }

    /// `f(x) + g(x)·u` as terms.
    fn closed_loop_symbolic(
        &self,
        x: &[SmtTerm],
        u: &[SmtTerm],
    ) -> Result<Vec<SmtTerm>, ShapeError> {
        crate::error::check_len("control terms", u, self.n_controls())?;
        let f = self.fx_symbolic(x)?;
        let g = self.gx_symbolic(x)?;
        Ok(f.into_iter()
            .zip(g)
            .map(|(fi, gi)| fi.add(SmtTerm::dot(&gi, u)))
            .collect())
    }
}

/// Bounded disturbance `z` entering the dynamics as an additive term `Δ(x, z)`.
pub trait Uncertainty {
    fn uncertainty_vars(&self) -> &[String];
    fn uncertainty_domain(&self) -> &Set;
    /// State coordinates the disturbance acts on.
    fn channels(&self) -> &[usize];
    fn fz_numeric(
        &self,
        x: ArrayView2<'_, f64>,
        z: ArrayView2<'_, f64>,
    ) -> Result<Array2<f64>, ShapeError>;
    fn fz_symbolic(&self, x: &[SmtTerm], z: &[SmtTerm]) -> Result<Vec<SmtTerm>, ShapeError>;

    fn n_uncertainty(&self) -> usize {
        self.uncertainty_vars().len()
    }
}

pub(crate) fn check_batch(
    context: &str,
    x: &ArrayView2<'_, f64>,
    cols: usize,
) -> Result<(), ShapeError> {
    if x.ncols() == cols {
        Ok(())
    } else {
        Err(ShapeError::new(
            context,
            format!("{cols} columns"),
            format!("{} columns", x.ncols()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bastion_smt::eval::{env_from, evaluate_real};
    use ndarray::array;

    #[test]
    fn closed_loop_matches_symbolic_form() {
        let system = make_system("DoubleIntegrator").unwrap();
        let x = array![[1.0, -2.0, 0.5, 0.25]];
        let u = array![[3.0, -1.0]];
        let numeric = system.closed_loop_numeric(x.view(), u.view()).unwrap();

        let xs: Vec<SmtTerm> = system.vars().iter().map(|v| SmtTerm::var(v.as_str())).collect();
        let us: Vec<SmtTerm> = system
            .controls()
            .iter()
            .map(|v| SmtTerm::var(v.as_str()))
            .collect();
        let symbolic = system.closed_loop_symbolic(&xs, &us).unwrap();
        let mut env = env_from(system.vars(), x.row(0).as_slice().unwrap());
        env.extend(env_from(system.controls(), u.row(0).as_slice().unwrap()));
        for (i, term) in symbolic.iter().enumerate() {
            assert_eq!(evaluate_real(term, &env).unwrap(), numeric[[0, i]]);
        }
    }

    #[test]
    fn closed_loop_rejects_misaligned_controls() {
        let system = make_system("SingleIntegrator").unwrap();
        let x = array![[0.0, 0.0], [1.0, 1.0]];
        let u = array![[1.0, 1.0]];
        assert!(system.closed_loop_numeric(x.view(), u.view()).is_err());
    }
}
