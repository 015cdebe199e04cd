//! Run configuration of a synthesis experiment.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use bastion_core::consts::{ActivationType, CertificateType, VerifierType};

use crate::learner::{LearnerConfig, LossActivation, LossWeights, OptimizerKind};
use crate::translator::TranslatorConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Could not read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid config {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Everything a synthesis run needs. Missing JSON fields take their
/// defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CegisConfig {
    pub exp_name: String,
    pub seed: Option<u64>,
    pub system: String,
    pub uncertainty: Option<String>,
    pub certificate: CertificateType,
    pub verifier: VerifierType,
    /// Jittered copies added around every counterexample.
    pub resampling_n: usize,
    pub resampling_std: f64,
    /// Start from the hand-crafted models of the system, when it has them.
    pub use_init_models: bool,
    pub activations: Vec<ActivationType>,
    pub n_hiddens: Vec<usize>,
    pub n_data_samples: usize,
    pub max_iters: usize,
    pub n_epochs: usize,
    pub optimizer: OptimizerKind,
    pub lr: f64,
    pub wd: f64,
    pub loss_act: LossActivation,
    pub loss_weights: LossWeights,
    pub loss_margin: f64,
    pub alpha: f64,
    pub quantify_inputs: bool,
    pub n_trial_controls: usize,
    /// Rounds in a row that only return known counterexamples before the
    /// run stops. Zero disables the check.
    pub stagnation_patience: usize,
    pub timeout_secs: u64,
    pub dump_smt: Option<PathBuf>,
}

impl Default for CegisConfig {
    fn default() -> Self {
        Self {
            exp_name: "exp".into(),
            seed: None,
            system: "SingleIntegrator".into(),
            uncertainty: None,
            certificate: CertificateType::Cbf,
            verifier: VerifierType::Z3,
            resampling_n: 100,
            resampling_std: 5e-3,
            use_init_models: false,
            activations: vec![ActivationType::Square, ActivationType::Linear],
            n_hiddens: vec![5, 5],
            n_data_samples: 5000,
            max_iters: 100,
            n_epochs: 1000,
            optimizer: OptimizerKind::Adam,
            lr: 1e-3,
            wd: 1e-4,
            loss_act: LossActivation::Softplus,
            loss_weights: LossWeights::default(),
            loss_margin: 0.1,
            alpha: 0.0,
            quantify_inputs: false,
            n_trial_controls: 8,
            stagnation_patience: 10,
            timeout_secs: 60,
            dump_smt: None,
        }
    }
}

impl CegisConfig {
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Json {
            path: path.display().to_string(),
            source,
        })
    }

    /// Consistency checks that do not need the system registry.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.activations.len() != self.n_hiddens.len() {
            return Err(ConfigError::Invalid(format!(
                "{} activations for {} hidden layers",
                self.activations.len(),
                self.n_hiddens.len()
            )));
        }
        if self.n_hiddens.contains(&0) {
            return Err(ConfigError::Invalid("hidden layers must not be empty".into()));
        }
        match (self.certificate.is_robust(), &self.uncertainty) {
            (false, Some(u)) => {
                return Err(ConfigError::Invalid(format!(
                    "uncertainty `{u}` needs a robust certificate (rcbf)"
                )))
            }
            (true, None) => {
                return Err(ConfigError::Invalid(
                    "robust certificates need an uncertainty model".into(),
                ))
            }
            _ => {}
        }
        if !(self.resampling_std.is_finite() && self.resampling_std >= 0.0) {
            return Err(ConfigError::Invalid(format!(
                "resampling_std must be a non-negative number, got {}",
                self.resampling_std
            )));
        }
        if !(self.lr.is_finite() && self.lr > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "lr must be positive, got {}",
                self.lr
            )));
        }
        Ok(())
    }

    pub fn translator_config(&self) -> TranslatorConfig {
        TranslatorConfig {
            alpha: self.alpha,
            quantify_inputs: self.quantify_inputs,
        }
    }

    pub fn learner_config(&self) -> LearnerConfig {
        LearnerConfig {
            optimizer: self.optimizer,
            lr: self.lr,
            weight_decay: self.wd,
            n_epochs: self.n_epochs,
            loss_act: self.loss_act,
            weights: self.loss_weights,
            margin: self.loss_margin,
            alpha: self.alpha,
            n_trial_controls: self.n_trial_controls,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = CegisConfig::default();
        config.validate().unwrap();
        assert_eq!(config.learner_config().n_epochs, 1000);
        assert_eq!(config.translator_config(), TranslatorConfig::default());
    }

    #[test]
    fn json_files_fill_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");
        fs::write(
            &path,
            r#"{
                "system": "DoubleIntegrator",
                "uncertainty": "AdditiveBounded",
                "certificate": "rcbf",
                "activations": ["relu"],
                "n_hiddens": [8],
                "loss_weights": {"robust": 2.0},
                "dump_smt": "smt"
            }"#,
        )
        .unwrap();
        let config = CegisConfig::from_json_file(&path).unwrap();
        config.validate().unwrap();
        assert_eq!(config.certificate, CertificateType::Rcbf);
        assert_eq!(config.activations, vec![ActivationType::Relu]);
        assert_eq!(config.loss_weights.robust, 2.0);
        assert_eq!(config.loss_weights.lie, 1.0);
        assert_eq!(config.max_iters, 100);
        assert_eq!(config.dump_smt, Some(PathBuf::from("smt")));
    }

    #[test]
    fn broken_files_are_reported_with_their_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, "{ not json").unwrap();
        let err = CegisConfig::from_json_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Json { .. }));
        assert!(err.to_string().contains("bad.json"));
        assert!(matches!(
            CegisConfig::from_json_file(&dir.path().join("missing.json")),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn inconsistent_settings_are_rejected() {
        let layers = CegisConfig {
            n_hiddens: vec![5],
            ..CegisConfig::default()
        };
        assert!(layers.validate().is_err());

        let nominal_with_uncertainty = CegisConfig {
            uncertainty: Some("AdditiveBounded".into()),
            ..CegisConfig::default()
        };
        assert!(nominal_with_uncertainty.validate().is_err());

        let robust_without = CegisConfig {
            certificate: CertificateType::Rcbf,
            ..CegisConfig::default()
        };
        assert!(robust_without.validate().is_err());

        let spread = CegisConfig {
            resampling_std: f64::NAN,
            ..CegisConfig::default()
        };
        assert!(spread.validate().is_err());
    }
}
