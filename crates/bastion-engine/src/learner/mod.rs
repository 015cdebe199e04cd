//! Gradient training of candidate certificates on sampled data.
//!
//! Every certificate clause becomes a hinge penalty `act(margin − value)`
//! averaged over the points of its dataset. The existential over controls
//! in the invariance clauses is approximated by the best of a fixed set of
//! trial controls: the corners of a box-shaped input set plus a few samples.

mod loss;
mod optimizer;

pub use loss::{LossActivation, LossWeights};
pub use optimizer::{Optimizer, OptimizerKind};

use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::Rng;
use serde::Serialize;
use tracing::debug;

use bastion_core::consts::{DomainName, TimeDomain};
use bastion_core::error::ShapeError;
use bastion_core::models::{BarrierModel, ModelError, TrainableModel};
use bastion_core::systems::{ControlAffineDynamics, SystemError, Uncertainty};

use crate::dataset::Dataset;
use loss::hinge;

#[derive(Debug, Clone, PartialEq)]
pub struct LearnerConfig {
    pub optimizer: OptimizerKind,
    pub lr: f64,
    pub weight_decay: f64,
    pub n_epochs: usize,
    pub loss_act: LossActivation,
    pub weights: LossWeights,
    pub margin: f64,
    pub alpha: f64,
    /// Sampled trial controls, on top of the corners of a box input set.
    pub n_trial_controls: usize,
}

impl Default for LearnerConfig {
    fn default() -> Self {
        Self {
            optimizer: OptimizerKind::Adam,
            lr: 1e-3,
            weight_decay: 1e-4,
            n_epochs: 1000,
            loss_act: LossActivation::Softplus,
            weights: LossWeights::default(),
            margin: 0.1,
            alpha: 0.0,
            n_trial_controls: 8,
        }
    }
}

/// Unweighted clause losses of one evaluation, and their weighted total.
/// `conservative` already carries its weights.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LossReport {
    pub total: f64,
    pub init: f64,
    #[serde(rename = "unsafe")]
    pub unsafe_set: f64,
    pub lie: f64,
    pub robust: f64,
    pub conservative: f64,
}

pub struct Learner {
    config: LearnerConfig,
    trials: Array2<f64>,
    h_opt: Option<Optimizer>,
    sigma_opt: Option<Optimizer>,
}

impl Learner {
    pub fn new<R: Rng + ?Sized>(
        config: LearnerConfig,
        system: &dyn ControlAffineDynamics,
        rng: &mut R,
    ) -> Result<Self, SystemError> {
        let input = system
            .domain(DomainName::Input)
            .ok_or_else(|| SystemError::MissingDomain {
                system: system.id().to_string(),
                domain: DomainName::Input,
            })?;
        let m = system.n_controls();
        let mut trials = input
            .vertices()
            .unwrap_or_else(|| Array2::zeros((0, m)));
        let samples = input.generate_data(config.n_trial_controls, rng);
        trials
            .append(Axis(0), samples.view())
            .map_err(|e| ShapeError::new("trial controls", format!("{m} columns"), e))?;
        if trials.nrows() == 0 {
            trials = Array2::zeros((1, m));
        }
        Ok(Self {
            config,
            trials,
            h_opt: None,
            sigma_opt: None,
        })
    }

    pub fn config(&self) -> &LearnerConfig {
        &self.config
    }

    pub fn trial_controls(&self) -> ArrayView2<'_, f64> {
        self.trials.view()
    }

    /// Run `n_epochs` optimizer steps on every trainable model and report the
    /// loss after the last step. `None` when neither model is trainable.
    ///
    /// Optimizer state is kept between calls.
    pub fn train(
        &mut self,
        h: &mut dyn BarrierModel,
        mut sigma: Option<&mut dyn BarrierModel>,
        system: &dyn ControlAffineDynamics,
        dataset: &Dataset,
    ) -> Result<Option<LossReport>, ModelError> {
        let h_params = h.as_trainable().map(|t| t.num_parameters());
        let sigma_params = sigma
            .as_deref()
            .and_then(|s| s.as_trainable())
            .map(|t| t.num_parameters());
        if h_params.is_none() && sigma_params.is_none() {
            debug!("no trainable model, skipping training");
            return Ok(None);
        }
        ensure_optimizer(&mut self.h_opt, h_params, &self.config);
        ensure_optimizer(&mut self.sigma_opt, sigma_params, &self.config);

        for epoch in 0..self.config.n_epochs {
            let (report, grad_h, grad_sigma) =
                self.loss_and_gradients(&*h, sigma.as_deref(), system, dataset)?;
            if epoch % 100 == 0 {
                debug!(epoch, loss = report.total, "training");
            }
            if let (Some(opt), Some(model)) = (self.h_opt.as_mut(), h.as_trainable_mut()) {
                apply_step(opt, model, &grad_h)?;
            }
            let sigma_model = sigma.as_deref_mut().and_then(|s| s.as_trainable_mut());
            if let (Some(opt), Some(model)) = (self.sigma_opt.as_mut(), sigma_model) {
                apply_step(opt, model, &grad_sigma)?;
            }
        }
        let (report, _, _) = self.loss_and_gradients(&*h, sigma.as_deref(), system, dataset)?;
        Ok(Some(report))
    }

    /// Loss of the current models and its gradients with respect to the
    /// parameters of `h` and `σ` (empty for models that are not trainable).
    pub fn loss_and_gradients(
        &self,
        h: &dyn BarrierModel,
        sigma: Option<&dyn BarrierModel>,
        system: &dyn ControlAffineDynamics,
        dataset: &Dataset,
    ) -> Result<(LossReport, Vec<f64>, Vec<f64>), ModelError> {
        let cfg = &self.config;
        let w = &cfg.weights;
        let mut gh = GradientSink::new(h.as_trainable());
        let mut gs = GradientSink::new(sigma.and_then(|s| s.as_trainable()));
        let mut report = LossReport::default();

        if let Some(x) = rows(dataset, DomainName::Init) {
            let hv = h.forward(x)?;
            let (l, d) = hinge(cfg.loss_act, cfg.margin, &hv, None);
            report.init = l;
            gh.add_value(x, &(d * w.init))?;
        }
        if let Some(x) = rows(dataset, DomainName::Unsafe) {
            let hv = h.forward(x)?;
            let (l, d) = hinge(cfg.loss_act, cfg.margin, &(-&hv), None);
            report.unsafe_set = l;
            gh.add_value(x, &(d * -w.unsafe_set))?;
        }
        if let Some(x) = rows(dataset, DomainName::Lie) {
            report.lie = match system.time_domain() {
                TimeDomain::Continuous => self.lie_continuous(h, sigma, system, x, &mut gh, &mut gs)?,
                TimeDomain::Discrete => self.lie_discrete(h, sigma, system, x, &mut gh, &mut gs)?,
            };
            report.conservative = conservative(h, x, w.conservative_b, &mut gh)?;
            if let Some(sigma) = sigma {
                report.conservative += conservative(sigma, x, w.conservative_sigma, &mut gs)?;
            }
        }
        if let (Some(data), Some(uncertainty)) =
            (rows(dataset, DomainName::Uncertainty), system.uncertainty())
        {
            report.robust =
                self.robust(h, sigma, system, uncertainty, data, &mut gh, &mut gs)?;
        }

        report.total = w.init * report.init
            + w.unsafe_set * report.unsafe_set
            + w.lie * report.lie
            + w.robust * report.robust
            + report.conservative;
        Ok((report, gh.grad, gs.grad))
    }

    /// `max_k ∇h·(f + g·u_k) − σ + α·h` on points with `h ≥ 0`.
    fn lie_continuous(
        &self,
        h: &dyn BarrierModel,
        sigma: Option<&dyn BarrierModel>,
        system: &dyn ControlAffineDynamics,
        x: ArrayView2<'_, f64>,
        gh: &mut GradientSink<'_>,
        gs: &mut GradientSink<'_>,
    ) -> Result<f64, ModelError> {
        let cfg = &self.config;
        let hv = h.forward(x)?;
        let sv = sigma_values(sigma, x)?;
        let mask: Vec<bool> = hv.iter().map(|&v| v >= 0.0).collect();
        let (rate, direction) = self.best_trial(x, |u| {
            let xdot = system.closed_loop_numeric(x, u)?;
            let rate = h.directional_derivative(x, xdot.view())?;
            Ok((rate, xdot))
        })?;

        let value = &rate - &sv + &hv * cfg.alpha;
        let (l, d) = hinge(cfg.loss_act, cfg.margin, &value, Some(&mask));
        let d = d * cfg.weights.lie;
        gh.add(x, direction.view(), &(&d * cfg.alpha), &d)?;
        gs.add_value(x, &(-&d))?;
        Ok(l)
    }

    /// `max_k h(f + g·u_k) − σ − h + α·h` on points with `h ≥ 0`.
    fn lie_discrete(
        &self,
        h: &dyn BarrierModel,
        sigma: Option<&dyn BarrierModel>,
        system: &dyn ControlAffineDynamics,
        x: ArrayView2<'_, f64>,
        gh: &mut GradientSink<'_>,
        gs: &mut GradientSink<'_>,
    ) -> Result<f64, ModelError> {
        let cfg = &self.config;
        let hv = h.forward(x)?;
        let sv = sigma_values(sigma, x)?;
        let mask: Vec<bool> = hv.iter().map(|&v| v >= 0.0).collect();
        let (h_next, next) = self.best_trial(x, |u| {
            let next = system.closed_loop_numeric(x, u)?;
            let h_next = h.forward(next.view())?;
            Ok((h_next, next))
        })?;

        let value = &h_next - &sv + &hv * (cfg.alpha - 1.0);
        let (l, d) = hinge(cfg.loss_act, cfg.margin, &value, Some(&mask));
        let d = d * cfg.weights.lie;
        gh.add_value(next.view(), &d)?;
        gh.add_value(x, &(&d * (cfg.alpha - 1.0)))?;
        gs.add_value(x, &(-&d))?;
        Ok(l)
    }

    /// The compensator must cover what the disturbance takes away from the
    /// nominal rate: `∇h·Δ(x, z) + σ ≥ 0` in continuous time,
    /// `h(x⁺ + Δ) − h(x⁺) + σ ≥ 0` in discrete time, on points with `h ≥ 0`.
    /// Wherever this holds the robust clause holds too.
    #[allow(clippy::too_many_arguments)]
    fn robust(
        &self,
        h: &dyn BarrierModel,
        sigma: Option<&dyn BarrierModel>,
        system: &dyn ControlAffineDynamics,
        uncertainty: &dyn Uncertainty,
        data: ArrayView2<'_, f64>,
        gh: &mut GradientSink<'_>,
        gs: &mut GradientSink<'_>,
    ) -> Result<f64, ModelError> {
        let cfg = &self.config;
        let (n, m) = (system.n_vars(), system.n_controls());
        let width = n + m + uncertainty.n_uncertainty();
        if data.ncols() != width {
            return Err(ShapeError::new("robust data", format!("{width} columns"), data.ncols()).into());
        }
        let x = data.slice(s![.., ..n]);
        let u = data.slice(s![.., n..n + m]);
        let z = data.slice(s![.., n + m..]);

        let hv = h.forward(x)?;
        let sv = sigma_values(sigma, x)?;
        let mask: Vec<bool> = hv.iter().map(|&v| v >= 0.0).collect();
        let delta = uncertainty.fz_numeric(x, z)?;

        match system.time_domain() {
            TimeDomain::Continuous => {
                let drift = h.directional_derivative(x, delta.view())?;
                let (l, d) = hinge(cfg.loss_act, cfg.margin, &(&drift + &sv), Some(&mask));
                let d = d * cfg.weights.robust;
                gh.add(x, delta.view(), &Array1::zeros(d.len()), &d)?;
                gs.add_value(x, &d)?;
                Ok(l)
            }
            TimeDomain::Discrete => {
                let nominal = system.closed_loop_numeric(x, u)?;
                let disturbed = &nominal + &delta;
                let h_nom = h.forward(nominal.view())?;
                let h_dist = h.forward(disturbed.view())?;
                let value = &h_dist - &h_nom + &sv;
                let (l, d) = hinge(cfg.loss_act, cfg.margin, &value, Some(&mask));
                let d = d * cfg.weights.robust;
                gh.add_value(disturbed.view(), &d)?;
                gh.add_value(nominal.view(), &(-&d))?;
                gs.add_value(x, &d)?;
                Ok(l)
            }
        }
    }

    /// Per row, the best score over all trial controls, together with the
    /// row `score` produced alongside it.
    fn best_trial<F>(
        &self,
        x: ArrayView2<'_, f64>,
        mut score: F,
    ) -> Result<(Array1<f64>, Array2<f64>), ModelError>
    where
        F: FnMut(ArrayView2<'_, f64>) -> Result<(Array1<f64>, Array2<f64>), ModelError>,
    {
        let batch = x.nrows();
        let mut best = Array1::from_elem(batch, f64::NEG_INFINITY);
        let mut carried: Option<Array2<f64>> = None;
        for trial in self.trials.rows() {
            let u = broadcast(trial, batch);
            let (values, rows) = score(u.view())?;
            let target = carried.get_or_insert_with(|| Array2::zeros(rows.dim()));
            for b in 0..batch {
                if values[b] > best[b] {
                    best[b] = values[b];
                    target.row_mut(b).assign(&rows.row(b));
                }
            }
        }
        Ok((best, carried.unwrap_or_else(|| Array2::zeros(x.dim()))))
    }
}

/// Accumulates the parameter gradient of one model.
struct GradientSink<'m> {
    model: Option<&'m dyn TrainableModel>,
    grad: Vec<f64>,
}

impl<'m> GradientSink<'m> {
    fn new(model: Option<&'m dyn TrainableModel>) -> Self {
        let grad = vec![0.0; model.map_or(0, |m| m.num_parameters())];
        Self { model, grad }
    }

    fn add(
        &mut self,
        x: ArrayView2<'_, f64>,
        v: ArrayView2<'_, f64>,
        grad_value: &Array1<f64>,
        grad_tangent: &Array1<f64>,
    ) -> Result<(), ModelError> {
        let Some(model) = self.model else {
            return Ok(());
        };
        let g = model.parameter_gradient(x, v, grad_value, grad_tangent)?;
        for (acc, gi) in self.grad.iter_mut().zip(g) {
            *acc += gi;
        }
        Ok(())
    }

    fn add_value(&mut self, x: ArrayView2<'_, f64>, grad_value: &Array1<f64>) -> Result<(), ModelError> {
        if self.model.is_none() {
            return Ok(());
        }
        let v = Array2::zeros(x.dim());
        self.add(x, v.view(), grad_value, &Array1::zeros(x.nrows()))
    }
}

/// `weight · mean(model)` over `x`.
fn conservative(
    model: &dyn BarrierModel,
    x: ArrayView2<'_, f64>,
    weight: f64,
    sink: &mut GradientSink<'_>,
) -> Result<f64, ModelError> {
    if weight == 0.0 {
        return Ok(0.0);
    }
    let values = model.forward(x)?;
    let n = values.len() as f64;
    sink.add_value(x, &Array1::from_elem(values.len(), weight / n))?;
    Ok(weight * values.sum() / n)
}

fn ensure_optimizer(slot: &mut Option<Optimizer>, params: Option<usize>, config: &LearnerConfig) {
    match params {
        None => *slot = None,
        Some(n) => {
            if slot.as_ref().map_or(true, |opt| opt.kind() != config.optimizer || opt.len() != n) {
                *slot = Some(Optimizer::new(config.optimizer, config.lr, config.weight_decay, n));
            }
        }
    }
}

fn apply_step(opt: &mut Optimizer, model: &mut dyn TrainableModel, grad: &[f64]) -> Result<(), ShapeError> {
    let mut params = model.parameters();
    opt.step(&mut params, grad)?;
    model.set_parameters(&params)
}

fn rows(dataset: &Dataset, name: DomainName) -> Option<ArrayView2<'_, f64>> {
    dataset
        .get(name)
        .filter(|d| d.nrows() > 0)
        .map(|d| d.view())
}

fn sigma_values(
    sigma: Option<&dyn BarrierModel>,
    x: ArrayView2<'_, f64>,
) -> Result<Array1<f64>, ModelError> {
    match sigma {
        Some(sigma) => sigma.forward(x),
        None => Ok(Array1::zeros(x.nrows())),
    }
}

fn broadcast(row: ArrayView1<'_, f64>, batch: usize) -> Array2<f64> {
    Array2::from_shape_fn((batch, row.len()), |(_, j)| row[j])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translator::ConditionKind;
    use bastion_core::models::{ConstantModel, Mlp};
    use bastion_core::systems::{add_uncertainty, make_system};
    use bastion_core::ActivationType;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const STANDARD: [ConditionKind; 3] =
        [ConditionKind::Init, ConditionKind::Unsafe, ConditionKind::Lie];

    fn config(n_epochs: usize) -> LearnerConfig {
        LearnerConfig {
            n_epochs,
            lr: 1e-2,
            ..LearnerConfig::default()
        }
    }

    #[test]
    fn trial_controls_contain_the_input_corners() {
        let system = make_system("SingleIntegrator").unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let learner = Learner::new(config(0), &system, &mut rng).unwrap();
        let trials = learner.trial_controls();
        assert_eq!(trials.dim(), (4 + 8, 2));
        assert!(trials
            .rows()
            .into_iter()
            .any(|p| p[0] == 5.0 && p[1] == -5.0));
    }

    #[test]
    fn nothing_to_train_is_skipped() {
        let system = make_system("SingleIntegrator").unwrap();
        let mut rng = StdRng::seed_from_u64(2);
        let data = Dataset::generate(&system, &STANDARD, 20, &mut rng).unwrap();
        let mut learner = Learner::new(config(10), &system, &mut rng).unwrap();
        let mut h = ConstantModel::new(2, 1.0);
        assert!(learner.train(&mut h, None, &system, &data).unwrap().is_none());
    }

    #[test]
    fn training_reduces_the_loss() {
        let system = make_system("SingleIntegrator").unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let data = Dataset::generate(&system, &STANDARD, 300, &mut rng).unwrap();
        let mut h = Mlp::random(
            2,
            &[5, 5],
            &[ActivationType::Square, ActivationType::Linear],
            &mut rng,
        )
        .unwrap();
        let mut learner = Learner::new(config(300), &system, &mut rng).unwrap();
        let (before, _, _) = learner
            .loss_and_gradients(&h, None, &system, &data)
            .unwrap();
        let after = learner
            .train(&mut h, None, &system, &data)
            .unwrap()
            .unwrap();
        assert!(after.total < before.total, "{after:?} vs {before:?}");
    }

    fn finite_difference_check(system: &dyn ControlAffineDynamics, kinds: &[ConditionKind]) {
        let mut rng = StdRng::seed_from_u64(11);
        let data = Dataset::generate(system, kinds, 40, &mut rng).unwrap();
        let h = Mlp::random(
            system.n_vars(),
            &[4],
            &[ActivationType::Square],
            &mut rng,
        )
        .unwrap();
        let sigma = Mlp::random(system.n_vars(), &[3], &[ActivationType::Relu], &mut rng).unwrap();
        let cfg = LearnerConfig {
            alpha: 0.3,
            weights: LossWeights {
                conservative_b: 0.2,
                conservative_sigma: 0.1,
                ..LossWeights::default()
            },
            ..config(0)
        };
        let learner = Learner::new(cfg, system, &mut rng).unwrap();
        let (_, grad_h, grad_sigma) = learner
            .loss_and_gradients(&h, Some(&sigma), system, &data)
            .unwrap();

        let total = |h: &Mlp, sigma: &Mlp| {
            learner
                .loss_and_gradients(h, Some(sigma), system, &data)
                .unwrap()
                .0
                .total
        };
        let eps = 1e-6;
        let params = h.parameters();
        for (i, &analytic) in grad_h.iter().enumerate() {
            let mut plus = h.clone();
            let mut minus = h.clone();
            let mut p = params.clone();
            p[i] += eps;
            plus.set_parameters(&p).unwrap();
            p[i] -= 2.0 * eps;
            minus.set_parameters(&p).unwrap();
            let numeric = (total(&plus, &sigma) - total(&minus, &sigma)) / (2.0 * eps);
            assert!(
                (numeric - analytic).abs() <= 1e-4 * (1.0 + numeric.abs()),
                "h parameter {i}: {numeric} vs {analytic}"
            );
        }
        let params = sigma.parameters();
        for (i, &analytic) in grad_sigma.iter().enumerate() {
            let mut plus = sigma.clone();
            let mut minus = sigma.clone();
            let mut p = params.clone();
            p[i] += eps;
            plus.set_parameters(&p).unwrap();
            p[i] -= 2.0 * eps;
            minus.set_parameters(&p).unwrap();
            let numeric = (total(&h, &plus) - total(&h, &minus)) / (2.0 * eps);
            assert!(
                (numeric - analytic).abs() <= 1e-4 * (1.0 + numeric.abs()),
                "sigma parameter {i}: {numeric} vs {analytic}"
            );
        }
    }

    #[test]
    fn continuous_gradients_match_finite_differences() {
        let system = add_uncertainty(
            Some("AdditiveBounded"),
            make_system("SingleIntegrator").unwrap(),
        )
        .unwrap();
        finite_difference_check(system.as_ref(), &ConditionKind::ALL);
    }

    #[test]
    fn discrete_gradients_match_finite_differences() {
        let system = add_uncertainty(
            Some("AdditiveBounded"),
            make_system("SingleIntegratorDT").unwrap(),
        )
        .unwrap();
        finite_difference_check(system.as_ref(), &ConditionKind::ALL);
    }

    #[test]
    fn robust_data_width_is_checked() {
        let system = add_uncertainty(
            Some("AdditiveBounded"),
            make_system("SingleIntegrator").unwrap(),
        )
        .unwrap();
        let mut rng = StdRng::seed_from_u64(4);
        let mut data = Dataset::new();
        data.append(DomainName::Uncertainty, Array2::zeros((3, 5)).view())
            .unwrap();
        let learner = Learner::new(config(0), system.as_ref(), &mut rng).unwrap();
        let h = Mlp::random(2, &[3], &[ActivationType::Square], &mut rng).unwrap();
        assert!(matches!(
            learner.loss_and_gradients(&h, None, system.as_ref(), &data),
            Err(ModelError::Shape(_))
        ));
    }
}
