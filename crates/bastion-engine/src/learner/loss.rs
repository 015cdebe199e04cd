use std::fmt;
use std::str::FromStr;

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use bastion_core::error::Unimplemented;

/// Penalty applied to `margin − value`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LossActivation {
    Relu,
    #[default]
    Softplus,
}

impl LossActivation {
    pub fn apply(self, t: f64) -> f64 {
        match self {
            LossActivation::Relu => t.max(0.0),
            LossActivation::Softplus => t.max(0.0) + (-t.abs()).exp().ln_1p(),
        }
    }

    pub fn derivative(self, t: f64) -> f64 {
        match self {
            LossActivation::Relu => {
                if t > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            LossActivation::Softplus => 1.0 / (1.0 + (-t).exp()),
        }
    }
}

impl fmt::Display for LossActivation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LossActivation::Relu => write!(f, "relu"),
            LossActivation::Softplus => write!(f, "softplus"),
        }
    }
}

impl FromStr for LossActivation {
    type Err = Unimplemented;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "relu" => Ok(LossActivation::Relu),
            "softplus" => Ok(LossActivation::Softplus),
            _ => Err(Unimplemented::new(format!("loss activation `{s}`"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LossWeights {
    pub init: f64,
    #[serde(rename = "unsafe")]
    pub unsafe_set: f64,
    pub lie: f64,
    pub robust: f64,
    pub conservative_b: f64,
    pub conservative_sigma: f64,
}

impl Default for LossWeights {
    fn default() -> Self {
        Self {
            init: 1.0,
            unsafe_set: 1.0,
            lie: 1.0,
            robust: 1.0,
            conservative_b: 0.0,
            conservative_sigma: 0.0,
        }
    }
}

/// Mean of `act(margin − value)` over the selected points, and its
/// derivative with respect to every value. Unselected points contribute
/// nothing; with no selected point the loss is zero.
pub(crate) fn hinge(
    act: LossActivation,
    margin: f64,
    values: &Array1<f64>,
    mask: Option<&[bool]>,
) -> (f64, Array1<f64>) {
    let selected = |b: usize| mask.map_or(true, |m| m[b]);
    let count = (0..values.len()).filter(|&b| selected(b)).count();
    let mut grad = Array1::zeros(values.len());
    if count == 0 {
        return (0.0, grad);
    }
    let scale = 1.0 / count as f64;
    let mut loss = 0.0;
    for (b, &v) in values.iter().enumerate() {
        if selected(b) {
            let t = margin - v;
            loss += act.apply(t) * scale;
            grad[b] = -act.derivative(t) * scale;
        }
    }
    (loss, grad)
}
