//! Barrier candidate models and compensators.
//!
//! A model is a scalar function `h: Rⁿ → R`. The numeric side evaluates
//! batches of points (one per row) together with the input Jacobian. The
//! symbolic side builds solver terms for the same function; anything a
//! solver cannot express natively is introduced as a fresh variable with
//! side constraints (see [`crate::symbolic`]).

mod activations;
mod constant;
mod double_integrator;
mod mlp;
mod persistence;

pub use constant::ConstantModel;
pub use double_integrator::{
    k_function, k_function_symbolic, DoubleIntegratorCbf, DoubleIntegratorCompensator,
    GradientNormCompensator, TunableCompensator, TUNABLE_K_EPSILON,
};
pub use mlp::{Dense, Mlp};
pub use persistence::{MlpParams, MODEL_BLOB, MODEL_PARAMS};

use std::path::Path;

use ndarray::{Array1, Array2, ArrayView2};
use thiserror::Error;
use tracing::warn;

use bastion_smt::terms::SmtTerm;

use crate::error::{ShapeError, Unimplemented};
use crate::symbolic::{Scope, Symbolic};

/// Floor applied to norms and clipped distances before dividing by them.
pub const EPS: f64 = 1e-6;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error(transparent)]
    Shape(#[from] ShapeError),
    #[error(transparent)]
    Unimplemented(#[from] Unimplemented),
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed model file {path}: {reason}")]
    Format { path: String, reason: String },
    #[error("invalid model parameters: {0}")]
    Json(#[from] serde_json::Error),
}

impl ModelError {
    pub(crate) fn unimplemented(model: &str, what: &str) -> Self {
        ModelError::Unimplemented(Unimplemented::new(format!("{what} for {model}")))
    }
}

/// Outcome of a save or load request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persistence {
    Written,
    Loaded,
    /// The model has no learned state; nothing was read or written.
    Skipped,
}

/// Numeric evaluation on batches of points.
pub trait NumericModel {
    fn input_size(&self) -> usize;

    fn output_size(&self) -> usize {
        1
    }

    /// `h` at every row of `x`, shape `(batch,)`.
    fn forward(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>, ModelError>;

    /// `∇h` at every row of `x`, shape `(batch, input_size)`.
    fn gradient(&self, x: ArrayView2<'_, f64>) -> Result<Array2<f64>, ModelError>;

    /// Directional derivative `∇h(x)·v` for row-aligned `x` and `v`.
    fn directional_derivative(
        &self,
        x: ArrayView2<'_, f64>,
        v: ArrayView2<'_, f64>,
    ) -> Result<Array1<f64>, ModelError> {
        if v.dim() != x.dim() {
            return Err(ShapeError::new(
                "tangent batch",
                format!("{:?}", x.dim()),
                format!("{:?}", v.dim()),
            )
            .into());
        }
        let grad = self.gradient(x)?;
        Ok((&grad * &v).sum_axis(ndarray::Axis(1)))
    }
}

/// Solver-term evaluation.
pub trait SymbolicModel {
    fn forward_symbolic(&self, x: &[SmtTerm], scope: &Scope)
        -> Result<Symbolic<SmtTerm>, ModelError>;

    fn gradient_symbolic(
        &self,
        x: &[SmtTerm],
        scope: &Scope,
    ) -> Result<Symbolic<Vec<SmtTerm>>, ModelError>;
}

/// Models with learned parameters.
pub trait TrainableModel {
    fn num_parameters(&self) -> usize;

    /// Flattened parameters, layer by layer, weights row-major before biases.
    fn parameters(&self) -> Vec<f64>;

    fn set_parameters(&mut self, params: &[f64]) -> Result<(), ShapeError>;

    /// `h(x)` and `∇h(x)·v` in a single pass.
    fn forward_with_tangent(
        &self,
        x: ArrayView2<'_, f64>,
        v: ArrayView2<'_, f64>,
    ) -> Result<(Array1<f64>, Array1<f64>), ModelError>;

    /// Gradient with respect to the parameters of
    /// `Σ_b grad_value[b]·h(x_b) + grad_tangent[b]·∇h(x_b)·v_b`.
    fn parameter_gradient(
        &self,
        x: ArrayView2<'_, f64>,
        v: ArrayView2<'_, f64>,
        grad_value: &Array1<f64>,
        grad_tangent: &Array1<f64>,
    ) -> Result<Vec<f64>, ModelError>;
}

/// A candidate certificate or compensator as used by the synthesis loop.
pub trait BarrierModel: NumericModel {
    fn name(&self) -> &str;

    fn as_symbolic(&self) -> Option<&dyn SymbolicModel> {
        None
    }

    fn as_trainable(&self) -> Option<&dyn TrainableModel> {
        None
    }

    fn as_trainable_mut(&mut self) -> Option<&mut dyn TrainableModel> {
        None
    }

    /// The symbolic view, or `Unimplemented` when the model has none.
    fn symbolic(&self) -> Result<&dyn SymbolicModel, ModelError> {
        self.as_symbolic()
            .ok_or_else(|| ModelError::unimplemented(self.name(), "symbolic evaluation"))
    }

    fn save(&self, dir: &Path) -> Result<Persistence, ModelError> {
        warn!(model = self.name(), dir = %dir.display(), "model has no parameters to save");
        Ok(Persistence::Skipped)
    }

    fn load(&mut self, dir: &Path) -> Result<Persistence, ModelError> {
        warn!(model = self.name(), dir = %dir.display(), "model has no parameters to load");
        Ok(Persistence::Skipped)
    }
}

pub(crate) fn check_input(
    model: &str,
    x: &ArrayView2<'_, f64>,
    input_size: usize,
) -> Result<(), ShapeError> {
    if x.ncols() == input_size {
        Ok(())
    } else {
        Err(ShapeError::new(
            format!("{model} input"),
            format!("(batch, {input_size})"),
            format!("{:?}", x.dim()),
        ))
    }
}

pub(crate) fn check_output(model: &str, out: &Array1<f64>, batch: usize) -> Result<(), ShapeError> {
    if out.len() == batch {
        Ok(())
    } else {
        Err(ShapeError::new(
            format!("{model} output"),
            format!("({batch},)"),
            format!("({},)", out.len()),
        ))
    }
}

pub(crate) fn check_symbolic_input(
    model: &str,
    x: &[SmtTerm],
    input_size: usize,
) -> Result<(), ShapeError> {
    crate::error::check_len(&format!("{model} symbolic input"), x, input_size)
}
