//! Barrier certificate synthesis engine.
//!
//! This crate turns candidate models into solver conditions, checks them,
//! trains candidates on sampled data, and drives the counterexample-guided
//! loop that alternates between the two.

pub mod cegis;
pub mod config;
pub mod consolidator;
pub mod dataset;
pub mod learner;
pub mod translator;
pub mod verifier;

#[cfg(test)]
mod testing;

pub use cegis::{
    build_candidates, build_system, Candidates, Cegis, CegisError, CegisResult, CegisStatus,
    CegisSummary,
};
pub use config::{CegisConfig, ConfigError};
pub use translator::{make_translator, make_translator_from_names, Translator, TranslatorConfig};
pub use verifier::{process_solver, Verifier};
