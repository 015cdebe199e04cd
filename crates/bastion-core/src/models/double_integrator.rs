//! Hand-derived certificate and compensators for the double integrator.

use ndarray::{Array1, Array2, ArrayView2};

use bastion_smt::terms::SmtTerm;

use crate::error::ShapeError;
use crate::models::{
    check_input, check_output, check_symbolic_input, BarrierModel, ModelError, NumericModel,
    SymbolicModel, EPS,
};
use crate::symbolic::{Scope, Symbolic};
use crate::systems::ControlAffineDynamics;

/// Offset of [`k_function`] so that the compensator stays active on the whole
/// safe set.
pub const TUNABLE_K_EPSILON: f64 = 0.1;

/// `k(r) = ε + 1/(r² + 1)`: continuous, non-increasing on `r ≥ 0`,
/// `k(0) = 1 + ε`.
pub fn k_function(r: f64, epsilon: f64) -> f64 {
    epsilon + 1.0 / (r * r + 1.0)
}

pub fn k_function_symbolic(r: SmtTerm, epsilon: f64) -> SmtTerm {
    SmtTerm::real(epsilon).add(SmtTerm::real(1.0).div(r.square().add(SmtTerm::real(1.0))))
}

/// `h(x) = p·v / ‖p‖ + √(a_max · max(0, ‖p‖ − d))` for relative position
/// `p = (x0, x1)` and velocity `v = (x2, x3)`.
///
/// Positive when the obstacle can still be avoided by braking at `a_max`.
#[derive(Debug, Clone, PartialEq)]
pub struct DoubleIntegratorCbf {
    safety_dist: f64,
    a_max: f64,
}

impl DoubleIntegratorCbf {
    pub const SAFETY_DIST: f64 = 1.5;
    pub const A_MAX: f64 = 5.0;

    pub fn new(system: &dyn ControlAffineDynamics) -> Result<Self, ShapeError> {
        if system.n_vars() != 4 {
            return Err(ShapeError::new(
                format!("double integrator certificate for `{}`", system.id()),
                "4 state variables",
                system.n_vars(),
            ));
        }
        Ok(Self::with_params(Self::SAFETY_DIST, Self::A_MAX))
    }

    pub fn with_params(safety_dist: f64, a_max: f64) -> Self {
        Self { safety_dist, a_max }
    }

    /// Fresh `n = ‖p‖`.
    fn norm_symbolic(x: &[SmtTerm], scope: &Scope) -> Symbolic<SmtTerm> {
        Symbolic::sqrt(
            x[0].clone().square().add(x[1].clone().square()),
            scope.fresh("pos_norm"),
        )
    }
}

impl NumericModel for DoubleIntegratorCbf {
    fn input_size(&self) -> usize {
        4
    }

    fn forward(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>, ModelError> {
        check_input("double integrator cbf", &x, 4)?;
        let out: Array1<f64> = x
            .rows()
            .into_iter()
            .map(|r| {
                let n = (r[0] * r[0] + r[1] * r[1]).sqrt();
                let vrel = (r[0] * r[2] + r[1] * r[3]) / n.max(EPS);
                let cap = (n - self.safety_dist).max(0.0);
                vrel + (self.a_max * cap).sqrt()
            })
            .collect();
        check_output("double integrator cbf", &out, x.nrows())?;
        Ok(out)
    }

    fn gradient(&self, x: ArrayView2<'_, f64>) -> Result<Array2<f64>, ModelError> {
        check_input("double integrator cbf", &x, 4)?;
        let mut grad = Array2::zeros(x.raw_dim());
        for (b, r) in x.rows().into_iter().enumerate() {
            let n = (r[0] * r[0] + r[1] * r[1]).sqrt().max(EPS);
            let dc = (n - self.safety_dist).max(EPS);
            let root = (self.a_max * dc).sqrt();
            let pv = r[0] * r[2] + r[1] * r[3];
            let n3 = n * n * n;
            grad[[b, 0]] = r[0] * root / (2.0 * dc * n) - r[0] * pv / n3 + r[2] / n;
            grad[[b, 1]] = r[1] * root / (2.0 * dc * n) - r[1] * pv / n3 + r[3] / n;
            grad[[b, 2]] = r[0] / n;
            grad[[b, 3]] = r[1] / n;
        }
        Ok(grad)
    }
}

impl SymbolicModel for DoubleIntegratorCbf {
    fn forward_symbolic(
        &self,
        x: &[SmtTerm],
        scope: &Scope,
    ) -> Result<Symbolic<SmtTerm>, ModelError> {
        check_symbolic_input("double integrator cbf", x, 4)?;
        let (a_max, d) = (self.a_max, self.safety_dist);
        Ok(Self::norm_symbolic(x, scope).and_then(|n| {
            let vrel = x[0]
                .clone()
                .mul(x[2].clone())
                .add(x[1].clone().mul(x[3].clone()))
                .div(n.clone().max(SmtTerm::real(EPS)));
            let cap = n.sub(SmtTerm::real(d)).max(SmtTerm::zero());
            Symbolic::sqrt(SmtTerm::real(a_max).mul(cap), scope.fresh("brake_root"))
                .map(|root| vrel.add(root))
        }))
    }

    fn gradient_symbolic(
        &self,
        x: &[SmtTerm],
        scope: &Scope,
    ) -> Result<Symbolic<Vec<SmtTerm>>, ModelError> {
        check_symbolic_input("double integrator cbf", x, 4)?;
        let (a_max, d) = (self.a_max, self.safety_dist);
        Ok(Self::norm_symbolic(x, scope).and_then(|raw| {
            let n = raw.max(SmtTerm::real(EPS));
            let dc = n.clone().sub(SmtTerm::real(d)).max(SmtTerm::real(EPS));
            Symbolic::sqrt(SmtTerm::real(a_max).mul(dc.clone()), scope.fresh("brake_root_grad"))
                .map(|root| {
                    let pv = x[0]
                        .clone()
                        .mul(x[2].clone())
                        .add(x[1].clone().mul(x[3].clone()));
                    let n3 = n.clone().mul(n.clone()).mul(n.clone());
                    let two_dc_n = SmtTerm::real(2.0).mul(dc).mul(n.clone());
                    let position = |xi: &SmtTerm, vi: &SmtTerm| {
                        xi.clone()
                            .mul(root.clone())
                            .div(two_dc_n.clone())
                            .sub(xi.clone().mul(pv.clone()).div(n3.clone()))
                            .add(vi.clone().div(n.clone()))
                    };
                    vec![
                        position(&x[0], &x[2]),
                        position(&x[1], &x[3]),
                        x[0].clone().div(n.clone()),
                        x[1].clone().div(n.clone()),
                    ]
                })
        }))
    }
}

impl BarrierModel for DoubleIntegratorCbf {
    fn name(&self) -> &str {
        "double_integrator_cbf"
    }

    fn as_symbolic(&self) -> Option<&dyn SymbolicModel> {
        Some(self)
    }
}

/// `σ(x) = ‖∇h(x) restricted to the disturbed coordinates‖ · z_bound`,
/// optionally scaled by [`k_function`] of `h(x)`.
///
/// Holds its own copy of `h`, so it only fits certificates that are not
/// trained.
#[derive(Debug, Clone, PartialEq)]
pub struct GradientNormCompensator<H> {
    h: H,
    channels: Vec<usize>,
    z_bound: f64,
    k_epsilon: Option<f64>,
}

pub type DoubleIntegratorCompensator = GradientNormCompensator<DoubleIntegratorCbf>;
pub type TunableCompensator = GradientNormCompensator<DoubleIntegratorCbf>;

impl<H: NumericModel> GradientNormCompensator<H> {
    pub fn new(h: H, channels: Vec<usize>, z_bound: f64) -> Result<Self, ShapeError> {
        if let Some(&bad) = channels.iter().find(|&&c| c >= h.input_size()) {
            return Err(ShapeError::new(
                "compensator channel",
                format!("an index below {}", h.input_size()),
                bad,
            ));
        }
        Ok(Self {
            h,
            channels,
            z_bound,
            k_epsilon: None,
        })
    }

    /// Scale by `k(h(x))` with offset `epsilon`.
    pub fn tunable(mut self, epsilon: f64) -> Self {
        self.k_epsilon = Some(epsilon);
        self
    }

    pub fn is_tunable(&self) -> bool {
        self.k_epsilon.is_some()
    }

    pub fn certificate(&self) -> &H {
        &self.h
    }
}

impl<H: NumericModel> NumericModel for GradientNormCompensator<H> {
    fn input_size(&self) -> usize {
        self.h.input_size()
    }

    fn forward(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>, ModelError> {
        check_input("compensator", &x, self.input_size())?;
        let grad = self.h.gradient(x)?;
        let mut sigma: Array1<f64> = grad
            .rows()
            .into_iter()
            .map(|g| {
                let sq: f64 = self.channels.iter().map(|&c| g[c] * g[c]).sum();
                sq.sqrt() * self.z_bound
            })
            .collect();
        if let Some(eps) = self.k_epsilon {
            let hx = self.h.forward(x)?;
            sigma.zip_mut_with(&hx, |s, &r| *s *= k_function(r, eps));
        }
        check_output("compensator", &sigma, x.nrows())?;
        Ok(sigma)
    }

    fn gradient(&self, _x: ArrayView2<'_, f64>) -> Result<Array2<f64>, ModelError> {
        Err(ModelError::unimplemented("compensator", "gradient"))
    }
}

impl<H: NumericModel + SymbolicModel> SymbolicModel for GradientNormCompensator<H> {
    fn forward_symbolic(
        &self,
        x: &[SmtTerm],
        scope: &Scope,
    ) -> Result<Symbolic<SmtTerm>, ModelError> {
        check_symbolic_input("compensator", x, self.input_size())?;
        let grad = self.h.gradient_symbolic(x, &scope.child("grad"))?;
        let channels = &self.channels;
        let z_bound = self.z_bound;
        let sigma = grad.and_then(|g| {
            let sq = SmtTerm::sum(channels.iter().map(|&c| g[c].clone().square()));
            Symbolic::sqrt(sq, scope.fresh("grad_norm"))
                .map(|norm| norm.mul(SmtTerm::real(z_bound)))
        });
        match self.k_epsilon {
            None => Ok(sigma),
            Some(eps) => {
                let hx = self.h.forward_symbolic(x, &scope.child("value"))?;
                Ok(sigma
                    .zip(hx)
                    .map(|(s, r)| s.mul(k_function_symbolic(r, eps))))
            }
        }
    }

    fn gradient_symbolic(
        &self,
        _x: &[SmtTerm],
        _scope: &Scope,
    ) -> Result<Symbolic<Vec<SmtTerm>>, ModelError> {
        Err(ModelError::unimplemented("compensator", "symbolic gradient"))
    }
}

impl<H: NumericModel + SymbolicModel> BarrierModel for GradientNormCompensator<H> {
    fn name(&self) -> &str {
        if self.is_tunable() {
            "tunable_compensator"
        } else {
            "compensator"
        }
    }

    fn as_symbolic(&self) -> Option<&dyn SymbolicModel> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::testing::{assert_dual_agreement, close, finite_difference, vars};
    use crate::models::Persistence;
    use crate::systems::{make_system, AdditiveBounded, Uncertainty};
    use bastion_smt::eval::{env_from, evaluate_bool};
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn cbf() -> DoubleIntegratorCbf {
        DoubleIntegratorCbf::new(&make_system("DoubleIntegrator").unwrap()).unwrap()
    }

    /// States with `‖p‖ ∈ [2.5, 8]`, away from the kink at `‖p‖ = d`.
    fn states(seed: u64, n: usize) -> Array2<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut x = Array2::zeros((n, 4));
        for mut row in x.rows_mut() {
            let radius = rng.gen_range(2.5..8.0);
            let angle = rng.gen_range(0.0..std::f64::consts::TAU);
            row[0] = radius * angle.cos();
            row[1] = radius * angle.sin();
            row[2] = rng.gen_range(-5.0..5.0);
            row[3] = rng.gen_range(-5.0..5.0);
        }
        x
    }

    #[test]
    fn reference_value() {
        let h = cbf().forward(array![[3.0, 4.0, 1.0, 0.0]].view()).unwrap();
        assert!((h[0] - 4.783_300_132_67).abs() < 1e-6, "got {}", h[0]);
    }

    #[test]
    fn requires_a_four_dimensional_state() {
        let si = make_system("SingleIntegrator").unwrap();
        assert!(DoubleIntegratorCbf::new(&si).is_err());
        let err = cbf().forward(array![[1.0, 2.0]].view()).unwrap_err();
        assert!(matches!(err, ModelError::Shape(_)));
    }

    #[test]
    fn origin_does_not_divide_by_zero() {
        let h = cbf();
        let x = array![[0.0, 0.0, 1.0, 1.0]];
        assert!(h.forward(x.view()).unwrap()[0].is_finite());
        assert!(h.gradient(x.view()).unwrap().iter().all(|g| g.is_finite()));
    }

    #[test]
    fn gradient_matches_finite_differences() {
        let h = cbf();
        let x = states(1, 128);
        let grad = h.gradient(x.view()).unwrap();
        for (b, row) in x.rows().into_iter().enumerate() {
            let fd = finite_difference(&h, row, 1e-6);
            for j in 0..4 {
                assert!(
                    (fd[j] - grad[[b, j]]).abs() < 1e-3,
                    "d/dx{j} at {row}: fd {} vs {}",
                    fd[j],
                    grad[[b, j]]
                );
            }
        }
    }

    #[test]
    fn symbolic_forms_agree_with_numeric_ones() {
        let mut x = states(2, 64);
        // inside the safety distance the square-root term vanishes
        x.row_mut(0).assign(&array![0.5, -0.25, 2.0, 1.0]);
        assert_dual_agreement(&cbf(), &x, true);
    }

    #[test]
    fn side_constraints_hold_at_the_solved_fresh_variables() {
        let h = cbf();
        let (names, terms) = vars(4);
        let sym = h.forward_symbolic(&terms, &Scope::new("h")).unwrap();
        assert_eq!(sym.fresh_vars.len(), 2);
        for row in states(3, 16).rows() {
            let env = sym
                .solve_fresh(&env_from(&names, row.as_slice().unwrap()))
                .unwrap();
            for c in &sym.constraints {
                if let SmtTerm::Eq(..) = c {
                    continue;
                }
                assert!(evaluate_bool(c, &env).unwrap());
            }
        }
    }

    #[test]
    fn scopes_keep_fresh_variables_apart() {
        let h = cbf();
        let (_, terms) = vars(4);
        let a = h.forward_symbolic(&terms, &Scope::new("h")).unwrap();
        let b = h.forward_symbolic(&terms, &Scope::new("h_next")).unwrap();
        let both = a.zip(b);
        assert_eq!(both.fresh_vars.len(), 4);
    }

    #[test]
    fn k_function_properties() {
        let delta = 0.2;
        let k0 = k_function(0.0, TUNABLE_K_EPSILON);
        assert!(k0 > 1.0 - delta);
        assert_ne!(k0, 1.0);
        let mut previous = k0;
        for i in 1..=500 {
            let r = f64::from(i) * 0.1;
            let k = k_function(r, TUNABLE_K_EPSILON);
            assert!(k <= previous);
            assert!(k > TUNABLE_K_EPSILON);
            previous = k;
        }
    }

    fn compensator() -> DoubleIntegratorCompensator {
        let system = AdditiveBounded::new(make_system("DoubleIntegrator").unwrap(), 1.0).unwrap();
        DoubleIntegratorCompensator::new(cbf(), system.channels().to_vec(), system.z_bound())
            .unwrap()
    }

    #[test]
    fn compensator_is_the_velocity_gradient_norm() {
        let sigma = compensator();
        let x = array![[3.0, 4.0, 1.0, 0.0]];
        // ∂h/∂v = p / ‖p‖, a unit vector
        let s = sigma.forward(x.view()).unwrap();
        assert!((s[0] - 1.0).abs() < 1e-12);
        assert!(sigma.gradient(x.view()).is_err());
        let (_, terms) = vars(4);
        assert!(matches!(
            sigma.gradient_symbolic(&terms, &Scope::new("s")),
            Err(ModelError::Unimplemented(_))
        ));
    }

    #[test]
    fn compensators_agree_symbolically() {
        let x = states(4, 32);
        assert_dual_agreement(&compensator(), &x, false);
        let tunable: TunableCompensator = compensator().tunable(TUNABLE_K_EPSILON);
        assert_eq!(tunable.name(), "tunable_compensator");
        assert_dual_agreement(&tunable, &x, false);
    }

    #[test]
    fn tunable_compensator_scales_by_k() {
        let plain = compensator();
        let tunable = compensator().tunable(TUNABLE_K_EPSILON);
        let x = states(5, 8);
        let s = plain.forward(x.view()).unwrap();
        let t = tunable.forward(x.view()).unwrap();
        let h = cbf().forward(x.view()).unwrap();
        for b in 0..8 {
            assert!(close(t[b], s[b] * k_function(h[b], TUNABLE_K_EPSILON), 1e-12));
        }
    }

    #[test]
    fn hand_crafted_models_warn_instead_of_saving() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(cbf().save(dir.path()).unwrap(), Persistence::Skipped);
        assert_eq!(compensator().save(dir.path()).unwrap(), Persistence::Skipped);
    }
}
