pub(crate) mod synth;
pub(crate) mod systems;

use miette::Diagnostic;
use thiserror::Error;

use bastion_core::models::ModelError;
use bastion_core::systems::SystemError;
use bastion_engine::verifier::VerifyError;
use bastion_engine::{CegisError, ConfigError};

#[derive(Debug, Error, Diagnostic)]
pub(crate) enum CliError {
    #[error(transparent)]
    #[diagnostic(
        code(bastion::config),
        help("flags override the config file; see `bastion synth --help`")
    )]
    Config(#[from] ConfigError),

    #[error(transparent)]
    #[diagnostic(
        code(bastion::system),
        help("run `bastion systems` to list the registered systems")
    )]
    System(#[from] SystemError),

    #[error(transparent)]
    #[diagnostic(
        code(bastion::solver),
        help("install z3 or cvc5 and make sure the binary is on PATH")
    )]
    Solver(#[from] VerifyError),

    #[error(transparent)]
    #[diagnostic(code(bastion::synthesis))]
    Synthesis(#[from] CegisError),

    #[error("Could not save model to {path}: {source}")]
    #[diagnostic(code(bastion::output))]
    SaveModel {
        path: String,
        #[source]
        source: ModelError,
    },

    #[error("Could not write {path}: {source}")]
    #[diagnostic(code(bastion::output))]
    Output {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not serialize report: {0}")]
    #[diagnostic(code(bastion::output))]
    Serialize(#[from] serde_json::Error),

    #[error("Unknown output format `{0}` (expected text or json)")]
    #[diagnostic(code(bastion::cli))]
    Format(String),
}
