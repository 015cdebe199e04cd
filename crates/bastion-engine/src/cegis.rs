//! Counterexample-guided synthesis loop.
//!
//! Each round trains the candidate on the current dataset, translates it
//! into solver conditions and verifies them. Counterexamples are jittered
//! into small clouds of points and appended to the dataset of the clause
//! they violate. The loop ends when every condition holds, when the solver
//! cannot decide, when the same counterexamples keep coming back, or when
//! the iteration budget runs out.

use std::collections::{BTreeMap, HashSet};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::NormalError;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use bastion_core::consts::DomainName;
use bastion_core::domains::Set;
use bastion_core::error::{ShapeError, Unimplemented};
use bastion_core::models::{
    BarrierModel, DoubleIntegratorCbf, GradientNormCompensator, Mlp, ModelError,
    TUNABLE_K_EPSILON,
};
use bastion_core::systems::{add_uncertainty, make_system, ControlAffineDynamics, SystemError};
use bastion_smt::solver::SmtSolver;

use crate::config::{CegisConfig, ConfigError};
use crate::consolidator::resample;
use crate::dataset::{sampling_set, Dataset};
use crate::learner::{Learner, LossReport};
use crate::translator::{make_translator, ConditionKind, TranslateError, Translator};
use crate::verifier::{Counterexample, VerificationOutcome, Verifier, VerifyError};

#[derive(Debug, Error)]
pub enum CegisError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    System(#[from] SystemError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Shape(#[from] ShapeError),
    #[error(transparent)]
    Unimplemented(#[from] Unimplemented),
    #[error(transparent)]
    Translate(#[from] TranslateError),
    #[error(transparent)]
    Verify(#[from] VerifyError),
    #[error("Invalid resampling spread: {0}")]
    Resample(#[from] NormalError),
}

/// The certificate candidate and, for robust certificates, its compensator.
pub struct Candidates {
    pub h: Box<dyn BarrierModel>,
    pub sigma: Option<Box<dyn BarrierModel>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum CegisStatus {
    Verified,
    IterationsExhausted,
    Stagnated,
    Inconclusive(String),
}

impl CegisStatus {
    pub fn is_verified(&self) -> bool {
        matches!(self, CegisStatus::Verified)
    }
}

pub struct CegisResult {
    pub status: CegisStatus,
    pub iterations: usize,
    /// Counterexamples returned by the solver over the whole run.
    pub counterexamples: usize,
    pub h: Box<dyn BarrierModel>,
    pub sigma: Option<Box<dyn BarrierModel>>,
    pub loss_history: Vec<LossReport>,
    pub dataset: Dataset,
    pub solver_queries: usize,
}

/// Serializable digest of a [`CegisResult`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CegisSummary {
    #[serde(flatten)]
    pub status: CegisStatus,
    pub iterations: usize,
    pub counterexamples: usize,
    pub solver_queries: usize,
    pub certificate_model: String,
    pub compensator_model: Option<String>,
    pub dataset_sizes: BTreeMap<DomainName, usize>,
    pub loss_history: Vec<LossReport>,
}

impl CegisResult {
    pub fn summary(&self) -> CegisSummary {
        CegisSummary {
            status: self.status.clone(),
            iterations: self.iterations,
            counterexamples: self.counterexamples,
            solver_queries: self.solver_queries,
            certificate_model: self.h.name().to_string(),
            compensator_model: self.sigma.as_ref().map(|s| s.name().to_string()),
            dataset_sizes: self.dataset.sizes(),
            loss_history: self.loss_history.clone(),
        }
    }
}

/// The configured system, wrapped with its uncertainty when one is named.
pub fn build_system(config: &CegisConfig) -> Result<Box<dyn ControlAffineDynamics>, SystemError> {
    add_uncertainty(config.uncertainty.as_deref(), make_system(&config.system)?)
}

/// Initial models: the hand-crafted double-integrator certificate (and
/// tunable compensator) when requested and available, randomly initialised
/// networks otherwise.
pub fn build_candidates<R: Rng + ?Sized>(
    config: &CegisConfig,
    system: &dyn ControlAffineDynamics,
    rng: &mut R,
) -> Result<Candidates, CegisError> {
    let robust = config.certificate.is_robust();
    if config.use_init_models {
        if config.system == "DoubleIntegrator" {
            let h = DoubleIntegratorCbf::new(system)?;
            let sigma: Option<Box<dyn BarrierModel>> = match system.uncertainty() {
                Some(uncertainty) if robust => {
                    let bound = disturbance_bound(uncertainty.uncertainty_domain())?;
                    let sigma = GradientNormCompensator::new(
                        h.clone(),
                        uncertainty.channels().to_vec(),
                        bound,
                    )?
                    .tunable(TUNABLE_K_EPSILON);
                    Some(Box::new(sigma))
                }
                _ => None,
            };
            info!(system = %config.system, "starting from hand-crafted models");
            return Ok(Candidates {
                h: Box::new(h),
                sigma,
            });
        }
        warn!(system = %config.system, "no hand-crafted models for this system, using networks");
    }

    let n = system.n_vars();
    let h = Mlp::random(n, &config.n_hiddens, &config.activations, rng)?;
    let sigma: Option<Box<dyn BarrierModel>> = if robust {
        Some(Box::new(Mlp::random(
            n,
            &config.n_hiddens,
            &config.activations,
            rng,
        )?))
    } else {
        None
    };
    Ok(Candidates {
        h: Box::new(h),
        sigma,
    })
}

/// Largest norm of a disturbance in `set`.
fn disturbance_bound(set: &Set) -> Result<f64, Unimplemented> {
    match set {
        Set::Sphere { center, radius, .. } => {
            let offset: f64 = center.iter().map(|c| c * c).sum::<f64>().sqrt();
            Ok(offset + radius)
        }
        Set::Rectangle { lower, upper, .. } => Ok(lower
            .iter()
            .zip(upper)
            .map(|(lo, hi)| lo.abs().max(hi.abs()).powi(2))
            .sum::<f64>()
            .sqrt()),
        _ => Err(Unimplemented::new("compensator bound for this disturbance set")),
    }
}

pub struct Cegis<'s, S> {
    config: CegisConfig,
    system: &'s dyn ControlAffineDynamics,
    translator: Translator,
    verifier: Verifier<S>,
    learner: Learner,
    rng: StdRng,
}

impl<'s, S: SmtSolver> Cegis<'s, S> {
    pub fn new(
        config: CegisConfig,
        system: &'s dyn ControlAffineDynamics,
        solver: S,
    ) -> Result<Self, CegisError> {
        config.validate()?;
        let translator = make_translator(
            config.certificate,
            config.verifier,
            system.time_domain(),
            config.translator_config(),
        )?;
        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let learner = Learner::new(config.learner_config(), system, &mut rng)?;
        let mut verifier = Verifier::new(solver);
        if let Some(dir) = &config.dump_smt {
            verifier = verifier.with_dump_dir(dir.clone());
        }
        Ok(Self {
            config,
            system,
            translator,
            verifier,
            learner,
            rng,
        })
    }

    pub fn config(&self) -> &CegisConfig {
        &self.config
    }

    pub fn translator(&self) -> &Translator {
        &self.translator
    }

    /// [`build_candidates`] with the run's own random state.
    pub fn initial_candidates(&mut self) -> Result<Candidates, CegisError> {
        build_candidates(&self.config, self.system, &mut self.rng)
    }

    pub fn solve(&mut self, candidates: Candidates) -> Result<CegisResult, CegisError> {
        let kinds: Vec<ConditionKind> = ConditionKind::ALL
            .into_iter()
            .filter(|k| *k != ConditionKind::Robust || self.translator.variant().is_robust())
            .collect();
        let mut dataset = Dataset::generate(
            self.system,
            &kinds,
            self.config.n_data_samples,
            &mut self.rng,
        )?;
        let Candidates { mut h, mut sigma } = candidates;
        info!(
            exp = %self.config.exp_name,
            system = self.system.id(),
            certificate = %self.config.certificate,
            verifier = %self.config.verifier,
            "starting synthesis"
        );

        let mut loss_history = Vec::new();
        let mut seen: HashSet<(ConditionKind, Vec<u64>)> = HashSet::new();
        let mut stale_rounds = 0;
        let mut counterexamples = 0;
        let mut iterations = 0;
        let mut status = CegisStatus::IterationsExhausted;

        for iteration in 1..=self.config.max_iters {
            iterations = iteration;
            let sigma_mut = sigma.as_deref_mut().map(|s| s as &mut dyn BarrierModel);
            if let Some(report) = self
                .learner
                .train(h.as_mut(), sigma_mut, self.system, &dataset)?
            {
                info!(iteration, loss = report.total, "training finished");
                loss_history.push(report);
            }

            let conditions = self
                .translator
                .translate(h.as_ref(), sigma.as_deref(), self.system)?;
            match self.verifier.verify(&conditions)? {
                VerificationOutcome::Valid => {
                    info!(iteration, "certificate verified");
                    status = CegisStatus::Verified;
                    break;
                }
                VerificationOutcome::Unknown(reason) => {
                    warn!(iteration, %reason, "solver could not decide, stopping");
                    status = CegisStatus::Inconclusive(reason);
                    break;
                }
                VerificationOutcome::Counterexamples(found) => {
                    counterexamples += found.len();
                    let mut novel = false;
                    for cex in &found {
                        novel |= seen.insert(fingerprint(cex));
                        self.consolidate(cex, &mut dataset)?;
                    }
                    info!(
                        iteration,
                        found = found.len(),
                        sizes = ?dataset.sizes(),
                        "counterexamples added"
                    );
                    if novel {
                        stale_rounds = 0;
                    } else {
                        stale_rounds += 1;
                    }
                    let patience = self.config.stagnation_patience;
                    if patience > 0 && stale_rounds >= patience {
                        warn!(iteration, stale_rounds, "no new counterexamples, stopping");
                        status = CegisStatus::Stagnated;
                        break;
                    }
                }
            }
        }
        if status == CegisStatus::IterationsExhausted {
            info!(iterations, "iteration budget exhausted");
        }

        Ok(CegisResult {
            status,
            iterations,
            counterexamples,
            h,
            sigma,
            loss_history,
            dataset,
            solver_queries: self.verifier.queries(),
        })
    }

    fn consolidate(&mut self, cex: &Counterexample, dataset: &mut Dataset) -> Result<(), CegisError> {
        let set = sampling_set(self.system, cex.kind)?;
        let point = ndarray::Array1::from(cex.point.clone());
        let cloud = resample(
            point.view(),
            &set,
            self.config.resampling_n,
            self.config.resampling_std,
            &mut self.rng,
        )?;
        dataset.append(cex.kind.dataset(), cloud.view())?;
        Ok(())
    }
}

fn fingerprint(cex: &Counterexample) -> (ConditionKind, Vec<u64>) {
    (cex.kind, cex.point.iter().map(|v| v.to_bits()).collect())
}
