//! Certificate conditions as solver formulas.
//!
//! A translator turns a candidate `h` (and, for robust certificates, a
//! compensator `σ`) plus the system dynamics into one [`Condition`] per
//! certificate clause. Each condition is valid iff
//! `domain ∧ side constraints ∧ ¬claim` is unsatisfiable.

mod continuous;
mod discrete;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use bastion_core::consts::{CertificateType, DomainName, TimeDomain, VerifierType};
use bastion_core::domains::Set;
use bastion_core::error::{ShapeError, Unimplemented};
use bastion_core::models::{BarrierModel, ModelError, SymbolicModel};
use bastion_core::symbolic::{FreshVar, Scope, Symbolic};
use bastion_core::systems::ControlAffineDynamics;
use bastion_smt::eval::{evaluate_bool, evaluate_real, Env, EvalError};
use bastion_smt::sorts::SmtSort;
use bastion_smt::terms::SmtTerm;

#[derive(Debug, Error)]
pub enum TranslateError {
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Shape(#[from] ShapeError),
    #[error(transparent)]
    Unimplemented(#[from] Unimplemented),
    #[error("System `{system}` has no `{domain}` domain")]
    MissingDomain { system: String, domain: DomainName },
    #[error("Robust certificates need a compensator model")]
    MissingCompensator,
    #[error("Robust certificates need a system with uncertainty, `{0}` has none")]
    MissingUncertainty(String),
    #[error("The {kind} condition contains the non-finite constant {value}")]
    NonFiniteConstant { kind: ConditionKind, value: f64 },
}

/// Which certificate clause a condition encodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionKind {
    Init,
    Unsafe,
    Lie,
    Robust,
}

impl ConditionKind {
    pub const ALL: [ConditionKind; 4] = [
        ConditionKind::Init,
        ConditionKind::Unsafe,
        ConditionKind::Lie,
        ConditionKind::Robust,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ConditionKind::Init => "init",
            ConditionKind::Unsafe => "unsafe",
            ConditionKind::Lie => "lie",
            ConditionKind::Robust => "robust",
        }
    }

    /// Training set that collects this clause's counterexamples. Robust
    /// points `(x, u, z)` are stored under the uncertainty domain.
    pub fn dataset(self) -> DomainName {
        match self {
            ConditionKind::Init => DomainName::Init,
            ConditionKind::Unsafe => DomainName::Unsafe,
            ConditionKind::Lie => DomainName::Lie,
            ConditionKind::Robust => DomainName::Uncertainty,
        }
    }
}

impl fmt::Display for ConditionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One certificate clause.
///
/// `point_vars` are the universally quantified variables a counterexample is
/// reported over: the state, and for robust clauses also the control and the
/// disturbance. `fresh_vars` stand for square roots the models introduced;
/// they are declared next to the point variables and pinned down by
/// `side_constraints`.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub kind: ConditionKind,
    pub point_vars: Vec<String>,
    pub fresh_vars: Vec<FreshVar>,
    pub domain: SmtTerm,
    pub side_constraints: Vec<SmtTerm>,
    pub claim: SmtTerm,
}

impl Condition {
    fn new(
        kind: ConditionKind,
        point_vars: Vec<String>,
        domain: SmtTerm,
        claim: Symbolic<SmtTerm>,
    ) -> Self {
        Self {
            kind,
            point_vars,
            fresh_vars: claim.fresh_vars,
            domain,
            side_constraints: claim.constraints,
            claim: claim.value,
        }
    }

    /// Every variable the solver must know about, all of sort `Real`.
    pub fn declarations(&self) -> Vec<(&str, SmtSort)> {
        self.point_vars
            .iter()
            .map(String::as_str)
            .chain(self.fresh_vars.iter().map(|v| v.name.as_str()))
            .map(|name| (name, SmtSort::Real))
            .collect()
    }

    /// Assertions whose satisfying assignments are counterexamples.
    pub fn refutation_query(&self) -> Vec<SmtTerm> {
        let mut assertions = Vec::with_capacity(self.side_constraints.len() + 2);
        assertions.push(self.domain.clone());
        assertions.extend(self.side_constraints.iter().cloned());
        assertions.push(self.claim.clone().not());
        assertions
    }

    /// The first NaN or infinite constant in the domain, side constraints or
    /// claim. Radicands are covered by the side constraints.
    pub fn first_non_finite(&self) -> Option<f64> {
        std::iter::once(&self.domain)
            .chain(&self.side_constraints)
            .chain(std::iter::once(&self.claim))
            .find_map(SmtTerm::first_non_finite)
    }

    /// Whether the clause holds at a concrete point (in `point_vars` order).
    /// Points outside the domain hold vacuously. Fails on quantified claims.
    pub fn holds_at(&self, point: &[f64]) -> Result<bool, EvalError> {
        let mut env = Env::new();
        for (name, value) in self.point_vars.iter().zip(point) {
            env.insert(name.clone(), *value);
        }
        for var in &self.fresh_vars {
            let y = evaluate_real(&var.radicand, &env)?;
            env.insert(var.name.clone(), y.max(0.0).sqrt());
        }
        if !evaluate_bool(&self.domain, &env)? {
            return Ok(true);
        }
        evaluate_bool(&self.claim, &env)
    }
}

/// All clauses of one certificate, in checking order.
#[derive(Debug, Clone, PartialEq)]
pub struct CertificateConditions {
    pub variant: TranslatorVariant,
    pub conditions: Vec<Condition>,
}

impl CertificateConditions {
    pub fn get(&self, kind: ConditionKind) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.kind == kind)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TranslatorVariant {
    StandardContinuous,
    StandardDiscrete,
    RobustContinuous,
    RobustDiscrete,
}

impl TranslatorVariant {
    pub fn is_robust(self) -> bool {
        matches!(
            self,
            TranslatorVariant::RobustContinuous | TranslatorVariant::RobustDiscrete
        )
    }

    pub fn time_domain(self) -> TimeDomain {
        match self {
            TranslatorVariant::StandardContinuous | TranslatorVariant::RobustContinuous => {
                TimeDomain::Continuous
            }
            TranslatorVariant::StandardDiscrete | TranslatorVariant::RobustDiscrete => {
                TimeDomain::Discrete
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslatorConfig {
    /// Class-κ rate: the invariance clauses require `… + alpha·h ≥ 0`.
    pub alpha: f64,
    /// Keep `∃u` quantifiers even when the input set is a box. By default a
    /// continuous-time `∃u ∈ box` over a term affine in `u` is replaced by
    /// its maximum over the box, which is exact and quantifier free.
    pub quantify_inputs: bool,
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            alpha: 0.0,
            quantify_inputs: false,
        }
    }
}

type TranslatorCtor = fn(TranslatorConfig) -> Translator;

fn standard_continuous(config: TranslatorConfig) -> Translator {
    Translator::new(TranslatorVariant::StandardContinuous, config)
}

fn standard_discrete(config: TranslatorConfig) -> Translator {
    Translator::new(TranslatorVariant::StandardDiscrete, config)
}

fn robust_continuous(config: TranslatorConfig) -> Translator {
    Translator::new(TranslatorVariant::RobustContinuous, config)
}

fn robust_discrete(config: TranslatorConfig) -> Translator {
    Translator::new(TranslatorVariant::RobustDiscrete, config)
}

const TRANSLATORS: [((CertificateType, TimeDomain), TranslatorCtor); 4] = [
    ((CertificateType::Cbf, TimeDomain::Continuous), standard_continuous),
    ((CertificateType::Cbf, TimeDomain::Discrete), standard_discrete),
    ((CertificateType::Rcbf, TimeDomain::Continuous), robust_continuous),
    ((CertificateType::Rcbf, TimeDomain::Discrete), robust_discrete),
];

/// Select the translator for a certificate and time domain.
///
/// Every [`VerifierType`] is a symbolic-logic solver, so any of them is
/// accepted here; backend availability is checked when the solver starts.
pub fn make_translator(
    certificate: CertificateType,
    verifier: VerifierType,
    time_domain: TimeDomain,
    config: TranslatorConfig,
) -> Result<Translator, Unimplemented> {
    let ctor = TRANSLATORS
        .iter()
        .find(|(key, _)| *key == (certificate, time_domain))
        .map(|(_, ctor)| *ctor)
        .ok_or_else(|| {
            Unimplemented::new(format!(
                "translator for {certificate} in {time_domain} time with {verifier}"
            ))
        })?;
    Ok(ctor(config))
}

/// [`make_translator`] from textual names, as they appear on the command line.
pub fn make_translator_from_names(
    certificate: &str,
    verifier: &str,
    time_domain: &str,
    config: TranslatorConfig,
) -> Result<Translator, Unimplemented> {
    make_translator(
        CertificateType::from_str(certificate)?,
        VerifierType::from_str(verifier)?,
        TimeDomain::from_str(time_domain)?,
        config,
    )
}

/// Stateless: holds the variant and its configuration only.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Translator {
    variant: TranslatorVariant,
    config: TranslatorConfig,
}

impl Translator {
    fn new(variant: TranslatorVariant, config: TranslatorConfig) -> Self {
        Self { variant, config }
    }

    pub fn variant(&self) -> TranslatorVariant {
        self.variant
    }

    pub fn config(&self) -> &TranslatorConfig {
        &self.config
    }

    pub fn translate(
        &self,
        h: &dyn BarrierModel,
        sigma: Option<&dyn BarrierModel>,
        system: &dyn ControlAffineDynamics,
    ) -> Result<CertificateConditions, TranslateError> {
        if system.time_domain() != self.variant.time_domain() {
            return Err(Unimplemented::new(format!(
                "{:?} translator for the {} time system `{}`",
                self.variant,
                system.time_domain(),
                system.id()
            ))
            .into());
        }
        let ctx = Context::new(h, sigma, system, self.config)?;
        let mut conditions = vec![ctx.init_condition()?, ctx.unsafe_condition()?];
        match self.variant {
            TranslatorVariant::StandardContinuous => {
                conditions.push(continuous::lie_condition(&ctx)?);
            }
            TranslatorVariant::StandardDiscrete => {
                conditions.push(discrete::lie_condition(&ctx)?);
            }
            TranslatorVariant::RobustContinuous => {
                ctx.require_robust()?;
                conditions.push(continuous::lie_condition(&ctx)?);
                conditions.push(continuous::robust_condition(&ctx)?);
            }
            TranslatorVariant::RobustDiscrete => {
                ctx.require_robust()?;
                conditions.push(discrete::lie_condition(&ctx)?);
                conditions.push(discrete::robust_condition(&ctx)?);
            }
        }
        for condition in &conditions {
            if let Some(value) = condition.first_non_finite() {
                return Err(TranslateError::NonFiniteConstant {
                    kind: condition.kind,
                    value,
                });
            }
        }
        Ok(CertificateConditions {
            variant: self.variant,
            conditions,
        })
    }
}

/// Everything the clause builders share.
pub(crate) struct Context<'a> {
    pub h: &'a dyn SymbolicModel,
    pub sigma: Option<&'a dyn SymbolicModel>,
    pub system: &'a dyn ControlAffineDynamics,
    pub config: TranslatorConfig,
    pub x: Vec<SmtTerm>,
    pub u: Vec<SmtTerm>,
}

impl<'a> Context<'a> {
    fn new(
        h: &'a dyn BarrierModel,
        sigma: Option<&'a dyn BarrierModel>,
        system: &'a dyn ControlAffineDynamics,
        config: TranslatorConfig,
    ) -> Result<Self, TranslateError> {
        Ok(Self {
            h: h.symbolic()?,
            sigma: sigma.map(|s| s.symbolic()).transpose()?,
            system,
            config,
            x: terms(system.vars()),
            u: terms(system.controls()),
        })
    }

    fn require_robust(&self) -> Result<(), TranslateError> {
        if self.sigma.is_none() {
            return Err(TranslateError::MissingCompensator);
        }
        if self.system.uncertainty().is_none() {
            return Err(TranslateError::MissingUncertainty(self.system.id().to_string()));
        }
        Ok(())
    }

    pub fn domain(&self, name: DomainName) -> Result<&'a Set, TranslateError> {
        self.system
            .domain(name)
            .ok_or_else(|| TranslateError::MissingDomain {
                system: self.system.id().to_string(),
                domain: name,
            })
    }

    pub fn alpha(&self) -> SmtTerm {
        SmtTerm::real(self.config.alpha)
    }

    /// `σ(x)` under the `sigma` scope, or zero without a compensator.
    pub fn sigma_at(&self, x: &[SmtTerm]) -> Result<Symbolic<SmtTerm>, TranslateError> {
        match self.sigma {
            Some(sigma) => Ok(sigma.forward_symbolic(x, &Scope::new("sigma"))?),
            None => Ok(Symbolic::pure(SmtTerm::zero())),
        }
    }

    pub fn h_at(&self, x: &[SmtTerm], scope: &str) -> Result<Symbolic<SmtTerm>, TranslateError> {
        Ok(self.h.forward_symbolic(x, &Scope::new(scope))?)
    }

    fn init_condition(&self) -> Result<Condition, TranslateError> {
        let domain = self.domain(DomainName::Init)?.symbolic_constraints(&self.x)?;
        let claim = self.h_at(&self.x, "h")?.map(|h| h.ge(SmtTerm::zero()));
        Ok(Condition::new(
            ConditionKind::Init,
            self.system.vars().to_vec(),
            domain,
            claim,
        ))
    }

    fn unsafe_condition(&self) -> Result<Condition, TranslateError> {
        let domain = self
            .domain(DomainName::Unsafe)?
            .symbolic_constraints(&self.x)?;
        let claim = self.h_at(&self.x, "h")?.map(|h| h.lt(SmtTerm::zero()));
        Ok(Condition::new(
            ConditionKind::Unsafe,
            self.system.vars().to_vec(),
            domain,
            claim,
        ))
    }

    /// Variables and domain constraint of a robust clause: `(x, u, z)`.
    pub fn robust_point(&self) -> Result<(Vec<String>, Vec<SmtTerm>, SmtTerm), TranslateError> {
        let uncertainty = self
            .system
            .uncertainty()
            .ok_or_else(|| TranslateError::MissingUncertainty(self.system.id().to_string()))?;
        let z = terms(uncertainty.uncertainty_vars());
        let domain = SmtTerm::and(vec![
            self.domain(DomainName::Lie)?.symbolic_constraints(&self.x)?,
            self.domain(DomainName::Input)?.symbolic_constraints(&self.u)?,
            uncertainty.uncertainty_domain().symbolic_constraints(&z)?,
        ]);
        let vars = self
            .system
            .vars()
            .iter()
            .chain(self.system.controls())
            .chain(uncertainty.uncertainty_vars())
            .cloned()
            .collect();
        Ok((vars, z, domain))
    }
}

fn terms(names: &[String]) -> Vec<SmtTerm> {
    names.iter().map(|n| SmtTerm::var(n.as_str())).collect()
}
