//! CLI argument definitions: top-level `Cli` struct and `Commands` enum.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use bastion_core::consts::{ActivationType, CertificateType, VerifierType};
use bastion_engine::learner::{LossActivation, OptimizerKind};

pub(crate) const CLI_LONG_ABOUT: &str =
    "Counterexample-guided synthesis of control barrier certificates.\n\n\
    A candidate certificate is trained on sampled states, checked by an SMT\n\
    solver, and retrained on the counterexamples the solver returns until it\n\
    verifies or the iteration budget runs out.\n\n\
    Typical run:\n  \
    bastion synth --system SingleIntegrator --max-iters 50 --out runs/si\n\n\
    Use `bastion systems` to list the registered systems and uncertainties.";

#[derive(Parser)]
#[command(name = "bastion")]
#[command(about = "Counterexample-guided synthesis of control barrier certificates")]
#[command(long_about = CLI_LONG_ABOUT)]
#[command(version)]
pub(crate) struct Cli {
    /// Log filter used when RUST_LOG is unset (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    pub verbose: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Synthesize a barrier certificate for a registered system
    #[command(display_order = 10)]
    Synth(Box<SynthArgs>),

    /// List registered systems and uncertainty models
    #[command(display_order = 11)]
    Systems,
}

/// Every flag is optional: unset flags keep the value from `--config`, or
/// the default when no config file is given.
#[derive(Args, Debug, Default)]
pub(crate) struct SynthArgs {
    /// JSON run configuration
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Experiment name, used in logs and the report
    #[arg(long)]
    pub exp_name: Option<String>,

    /// Seed for sampling and initialisation
    #[arg(long)]
    pub seed: Option<u64>,

    /// Registered system id
    #[arg(long)]
    pub system: Option<String>,

    /// Uncertainty model wrapped around the system (robust certificates only)
    #[arg(long)]
    pub uncertainty: Option<String>,

    /// Certificate kind: cbf | rcbf
    #[arg(long)]
    pub certificate: Option<CertificateType>,

    /// Verifier backend: z3 | cvc5 | dreal
    #[arg(long)]
    pub verifier: Option<VerifierType>,

    /// Jittered copies added around every counterexample
    #[arg(long)]
    pub resampling_n: Option<usize>,

    /// Standard deviation of the counterexample jitter
    #[arg(long)]
    pub resampling_std: Option<f64>,

    /// Start from the hand-crafted models of the system when it has them
    #[arg(long, default_value_t = false)]
    pub use_init_models: bool,

    /// Hidden-layer activations, one per layer
    #[arg(long, num_args = 1.., value_delimiter = ',')]
    pub activations: Option<Vec<ActivationType>>,

    /// Hidden-layer widths
    #[arg(long, num_args = 1.., value_delimiter = ',')]
    pub n_hiddens: Option<Vec<usize>>,

    /// Initial samples per domain
    #[arg(long)]
    pub n_data_samples: Option<usize>,

    /// Optimizer: adam | sgd
    #[arg(long)]
    pub optimizer: Option<OptimizerKind>,

    /// Learning rate
    #[arg(long)]
    pub lr: Option<f64>,

    /// Weight decay
    #[arg(long)]
    pub wd: Option<f64>,

    /// Loss activation: relu | softplus
    #[arg(long)]
    pub loss_act: Option<LossActivation>,

    #[arg(long)]
    pub loss_init_weight: Option<f64>,

    #[arg(long)]
    pub loss_unsafe_weight: Option<f64>,

    #[arg(long)]
    pub loss_lie_weight: Option<f64>,

    #[arg(long)]
    pub loss_robust_weight: Option<f64>,

    #[arg(long)]
    pub loss_conservative_b_weight: Option<f64>,

    #[arg(long)]
    pub loss_conservative_sigma_weight: Option<f64>,

    /// Margin the losses ask of every clause
    #[arg(long)]
    pub loss_margin: Option<f64>,

    /// Maximum CEGIS iterations
    #[arg(long)]
    pub max_iters: Option<usize>,

    /// Training epochs per iteration
    #[arg(long)]
    pub n_epochs: Option<usize>,

    /// Solver timeout per query, in seconds
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Class-K rate in the invariance clauses
    #[arg(long)]
    pub alpha: Option<f64>,

    /// Keep the existential over controls instead of eliminating it on boxes
    #[arg(long, default_value_t = false)]
    pub quantify_inputs: bool,

    /// Rounds without new counterexamples before giving up (0 disables)
    #[arg(long)]
    pub stagnation_patience: Option<usize>,

    /// Write every solver query as an SMT-LIB2 script into this directory
    #[arg(long)]
    pub dump_smt: Option<PathBuf>,

    /// Directory receiving the trained models and a JSON report
    #[arg(long)]
    pub out: Option<PathBuf>,

    /// Output format: text | json
    #[arg(long, default_value = "text")]
    pub format: String,
}
