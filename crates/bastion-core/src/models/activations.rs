use bastion_smt::terms::SmtTerm;

use crate::consts::ActivationType;
use crate::error::Unimplemented;

fn relu(z: f64) -> f64 {
    z.max(0.0)
}

fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

/// `1 + |z|`, the denominator of the rational activation.
fn rational_den(z: f64) -> f64 {
    1.0 + z.abs()
}

fn step(z: f64) -> f64 {
    if z > 0.0 {
        1.0
    } else {
        0.0
    }
}

fn inside(z: f64, lo: f64, hi: f64) -> f64 {
    if lo < z && z < hi {
        1.0
    } else {
        0.0
    }
}

impl ActivationType {
    pub fn apply(self, z: f64) -> f64 {
        match self {
            ActivationType::Identity | ActivationType::Linear => z,
            ActivationType::Relu => relu(z),
            ActivationType::Square => z * z,
            ActivationType::Requ => relu(z) * relu(z),
            ActivationType::Rational => z / rational_den(z),
            ActivationType::HSigmoid => (z / 6.0 + 0.5).clamp(0.0, 1.0),
            ActivationType::HTanh => z.clamp(-1.0, 1.0),
            ActivationType::Tanh => z.tanh(),
            ActivationType::Sigmoid => sigmoid(z),
            ActivationType::Softplus => relu(z) + (-z.abs()).exp().ln_1p(),
            ActivationType::Cosh => z.cosh(),
        }
    }

    /// First derivative. At kinks the right-hand side is excluded, matching
    /// the `ite` conditions of the symbolic form.
    pub fn derivative(self, z: f64) -> f64 {
        match self {
            ActivationType::Identity | ActivationType::Linear => 1.0,
            ActivationType::Relu => step(z),
            ActivationType::Square => 2.0 * z,
            ActivationType::Requ => 2.0 * relu(z),
            ActivationType::Rational => rational_den(z).powi(-2),
            ActivationType::HSigmoid => inside(z, -3.0, 3.0) / 6.0,
            ActivationType::HTanh => inside(z, -1.0, 1.0),
            ActivationType::Tanh => 1.0 - z.tanh().powi(2),
            ActivationType::Sigmoid => {
                let s = sigmoid(z);
                s * (1.0 - s)
            }
            ActivationType::Softplus => sigmoid(z),
            ActivationType::Cosh => z.sinh(),
        }
    }

    pub fn second_derivative(self, z: f64) -> f64 {
        match self {
            ActivationType::Identity
            | ActivationType::Linear
            | ActivationType::Relu
            | ActivationType::HSigmoid
            | ActivationType::HTanh => 0.0,
            ActivationType::Square => 2.0,
            ActivationType::Requ => 2.0 * step(z),
            ActivationType::Rational => -2.0 * z.signum() * rational_den(z).powi(-3),
            ActivationType::Tanh => {
                let t = z.tanh();
                -2.0 * t * (1.0 - t * t)
            }
            ActivationType::Sigmoid => {
                let s = sigmoid(z);
                s * (1.0 - s) * (1.0 - 2.0 * s)
            }
            ActivationType::Softplus => {
                let s = sigmoid(z);
                s * (1.0 - s)
            }
            ActivationType::Cosh => z.cosh(),
        }
    }

    pub fn symbolic(self, z: SmtTerm) -> Result<SmtTerm, Unimplemented> {
        Ok(match self {
            ActivationType::Identity | ActivationType::Linear => z,
            ActivationType::Relu => z.max(SmtTerm::zero()),
            ActivationType::Square => z.square(),
            ActivationType::Requ => z.max(SmtTerm::zero()).square(),
            ActivationType::Rational => z.clone().div(symbolic_rational_den(z)),
            ActivationType::HSigmoid => SmtTerm::ite(
                z.clone().le(SmtTerm::real(-3.0)),
                SmtTerm::zero(),
                SmtTerm::ite(
                    z.clone().ge(SmtTerm::real(3.0)),
                    SmtTerm::real(1.0),
                    z.div(SmtTerm::real(6.0)).add(SmtTerm::real(0.5)),
                ),
            ),
            ActivationType::HTanh => SmtTerm::ite(
                z.clone().le(SmtTerm::real(-1.0)),
                SmtTerm::real(-1.0),
                SmtTerm::ite(z.clone().ge(SmtTerm::real(1.0)), SmtTerm::real(1.0), z),
            ),
            other => return Err(other.transcendental()),
        })
    }

    pub fn symbolic_derivative(self, z: SmtTerm) -> Result<SmtTerm, Unimplemented> {
        Ok(match self {
            ActivationType::Identity | ActivationType::Linear => SmtTerm::real(1.0),
            ActivationType::Relu => {
                SmtTerm::ite(z.gt(SmtTerm::zero()), SmtTerm::real(1.0), SmtTerm::zero())
            }
            ActivationType::Square => SmtTerm::real(2.0).mul(z),
            ActivationType::Requ => SmtTerm::ite(
                z.clone().gt(SmtTerm::zero()),
                SmtTerm::real(2.0).mul(z),
                SmtTerm::zero(),
            ),
            ActivationType::Rational => {
                let den = symbolic_rational_den(z);
                SmtTerm::real(1.0).div(den.clone().mul(den))
            }
            ActivationType::HSigmoid => SmtTerm::ite(
                SmtTerm::and(vec![
                    z.clone().gt(SmtTerm::real(-3.0)),
                    z.lt(SmtTerm::real(3.0)),
                ]),
                SmtTerm::real(1.0 / 6.0),
                SmtTerm::zero(),
            ),
            ActivationType::HTanh => SmtTerm::ite(
                SmtTerm::and(vec![
                    z.clone().gt(SmtTerm::real(-1.0)),
                    z.lt(SmtTerm::real(1.0)),
                ]),
                SmtTerm::real(1.0),
                SmtTerm::zero(),
            ),
            other => return Err(other.transcendental()),
        })
    }

    fn transcendental(self) -> Unimplemented {
        Unimplemented::new(format!("symbolic `{self}` activation"))
    }
}

/// `1 + |z|` with the absolute value as an `ite`; always at least one, so
/// the division needs no floor.
fn symbolic_rational_den(z: SmtTerm) -> SmtTerm {
    let abs = SmtTerm::ite(z.clone().ge(SmtTerm::zero()), z.clone(), z.neg());
    SmtTerm::real(1.0).add(abs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bastion_smt::eval::{env_from, evaluate_real};

    const GRID: [f64; 9] = [-4.0, -3.0, -1.5, -1.0, -0.25, 0.0, 0.7, 2.0, 3.5];

    #[test]
    fn symbolic_forms_match_numeric_ones() {
        let names = vec!["z".to_string()];
        for act in ActivationType::ALL.into_iter().filter(|a| a.is_symbolic()) {
            let f = act.symbolic(SmtTerm::var("z")).unwrap();
            let df = act.symbolic_derivative(SmtTerm::var("z")).unwrap();
            for z in GRID {
                let env = env_from(&names, &[z]);
                let fz = evaluate_real(&f, &env).unwrap();
                let dfz = evaluate_real(&df, &env).unwrap();
                assert!((fz - act.apply(z)).abs() < 1e-12, "{act}({z})");
                assert!((dfz - act.derivative(z)).abs() < 1e-12, "{act}'({z})");
            }
        }
    }

    #[test]
    fn transcendental_activations_have_no_symbolic_form() {
        for act in [
            ActivationType::Tanh,
            ActivationType::Sigmoid,
            ActivationType::Softplus,
            ActivationType::Cosh,
        ] {
            assert!(act.symbolic(SmtTerm::var("z")).is_err());
            assert!(act.symbolic_derivative(SmtTerm::var("z")).is_err());
        }
    }

    #[test]
    fn derivatives_match_finite_differences_away_from_kinks() {
        let h = 1e-6;
        for act in ActivationType::ALL {
            for z in [-2.3, -0.6, 0.4, 1.7, 2.9] {
                let fd = (act.apply(z + h) - act.apply(z - h)) / (2.0 * h);
                assert!((fd - act.derivative(z)).abs() < 1e-5, "{act}'({z})");
                let fd2 = (act.derivative(z + h) - act.derivative(z - h)) / (2.0 * h);
                assert!((fd2 - act.second_derivative(z)).abs() < 1e-4, "{act}''({z})");
            }
        }
    }

    #[test]
    fn rational_saturates_like_tanh() {
        let r = ActivationType::Rational;
        assert_eq!(r.apply(0.0), 0.0);
        assert_eq!(r.derivative(0.0), 1.0);
        assert!((r.apply(3.0) - 0.75).abs() < 1e-12);
        assert!((r.apply(-3.0) + 0.75).abs() < 1e-12);
        assert!(r.apply(1e9) < 1.0 && r.apply(-1e9) > -1.0);
        assert!((r.derivative(-1.0) - 0.25).abs() < 1e-12);

        let names = vec!["z".to_string()];
        let f = r.symbolic(SmtTerm::var("z")).unwrap();
        for z in [-50.0, -1e-3, 1e-3, 50.0] {
            let fz = evaluate_real(&f, &env_from(&names, &[z])).unwrap();
            assert!((fz - r.apply(z)).abs() < 1e-12, "rational({z})");
        }
    }

    #[test]
    fn softplus_is_stable_for_large_inputs() {
        let s = ActivationType::Softplus;
        assert!((s.apply(800.0) - 800.0).abs() < 1e-9);
        assert!(s.apply(-800.0) >= 0.0);
    }
}
