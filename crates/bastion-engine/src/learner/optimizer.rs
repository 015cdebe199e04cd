use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use bastion_core::error::{ShapeError, Unimplemented};

const BETA1: f64 = 0.9;
const BETA2: f64 = 0.999;
const ADAM_EPS: f64 = 1e-8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerKind {
    #[default]
    Adam,
    Sgd,
}

impl fmt::Display for OptimizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptimizerKind::Adam => write!(f, "adam"),
            OptimizerKind::Sgd => write!(f, "sgd"),
        }
    }
}

impl FromStr for OptimizerKind {
    type Err = Unimplemented;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "adam" => Ok(OptimizerKind::Adam),
            "sgd" => Ok(OptimizerKind::Sgd),
            _ => Err(Unimplemented::new(format!("optimizer `{s}`"))),
        }
    }
}

/// First-order optimizer over a flat parameter vector. Weight decay is an
/// L2 term added to the gradient before the update.
#[derive(Debug, Clone)]
pub struct Optimizer {
    kind: OptimizerKind,
    lr: f64,
    weight_decay: f64,
    step: i32,
    m: Vec<f64>,
    v: Vec<f64>,
}

impl Optimizer {
    pub fn new(kind: OptimizerKind, lr: f64, weight_decay: f64, num_parameters: usize) -> Self {
        Self {
            kind,
            lr,
            weight_decay,
            step: 0,
            m: vec![0.0; num_parameters],
            v: vec![0.0; num_parameters],
        }
    }

    pub fn kind(&self) -> OptimizerKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.m.len()
    }

    pub fn is_empty(&self) -> bool {
        self.m.is_empty()
    }

    pub fn steps(&self) -> i32 {
        self.step
    }

    pub fn step(&mut self, params: &mut [f64], grad: &[f64]) -> Result<(), ShapeError> {
        if params.len() != self.m.len() || grad.len() != self.m.len() {
            return Err(ShapeError::new(
                "optimizer step",
                format!("{} parameters and gradients", self.m.len()),
                format!("{} parameters, {} gradients", params.len(), grad.len()),
            ));
        }
        self.step = self.step.saturating_add(1);
        match self.kind {
            OptimizerKind::Sgd => {
                for (p, g) in params.iter_mut().zip(grad) {
                    *p -= self.lr * (g + self.weight_decay * *p);
                }
            }
            OptimizerKind::Adam => {
                let c1 = 1.0 - BETA1.powi(self.step);
                let c2 = 1.0 - BETA2.powi(self.step);
                for i in 0..params.len() {
                    let g = grad[i] + self.weight_decay * params[i];
                    self.m[i] = BETA1 * self.m[i] + (1.0 - BETA1) * g;
                    self.v[i] = BETA2 * self.v[i] + (1.0 - BETA2) * g * g;
                    let m_hat = self.m[i] / c1;
                    let v_hat = self.v[i] / c2;
                    params[i] -= self.lr * m_hat / (v_hat.sqrt() + ADAM_EPS);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sgd_applies_weight_decay() {
        let mut opt = Optimizer::new(OptimizerKind::Sgd, 0.1, 0.5, 2);
        let mut params = [1.0, -2.0];
        opt.step(&mut params, &[1.0, 0.0]).unwrap();
        assert!((params[0] - (1.0 - 0.1 * 1.5)).abs() < 1e-12);
        assert!((params[1] - (-2.0 + 0.1)).abs() < 1e-12);
    }

    #[test]
    fn first_adam_step_moves_by_the_learning_rate() {
        let mut opt = Optimizer::new(OptimizerKind::Adam, 1e-2, 0.0, 3);
        let mut params = [0.0, 0.0, 0.0];
        opt.step(&mut params, &[3.0, -0.2, 0.0]).unwrap();
        assert!((params[0] + 1e-2).abs() < 1e-6);
        assert!((params[1] - 1e-2).abs() < 1e-6);
        assert_eq!(params[2], 0.0);
        assert_eq!(opt.steps(), 1);
    }

    #[test]
    fn adam_minimises_a_quadratic() {
        let mut opt = Optimizer::new(OptimizerKind::Adam, 0.05, 0.0, 2);
        let mut params = [3.0, -4.0];
        for _ in 0..2000 {
            let grad = [2.0 * (params[0] - 1.0), 2.0 * (params[1] + 0.5)];
            opt.step(&mut params, &grad).unwrap();
        }
        assert!((params[0] - 1.0).abs() < 1e-2);
        assert!((params[1] + 0.5).abs() < 1e-2);
    }

    #[test]
    fn length_mismatch_is_a_shape_error() {
        let mut opt = Optimizer::new(OptimizerKind::Adam, 1e-3, 0.0, 2);
        assert!(opt.step(&mut [0.0; 3], &[0.0; 3]).is_err());
        assert_eq!(opt.steps(), 0);
        assert_eq!("SGD".parse::<OptimizerKind>().unwrap(), OptimizerKind::Sgd);
        assert!("lbfgs".parse::<OptimizerKind>().is_err());
    }
}
