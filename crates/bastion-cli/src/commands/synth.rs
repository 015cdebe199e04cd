// Command handler for: Synth
//
// Resolves the run configuration, picks a solver backend, runs the
// synthesis loop and writes the trained models and a JSON report.

use std::fs;
use std::path::Path;

use miette::IntoDiagnostic;
use serde_json::json;
use tracing::{info, warn};

use bastion_core::consts::VerifierType;
use bastion_core::models::BarrierModel;
use bastion_core::systems::ControlAffineDynamics;
use bastion_engine::{build_system, process_solver, Cegis, CegisConfig, CegisResult, CegisStatus};
#[cfg(feature = "z3")]
use bastion_smt::backends::z3_backend::Z3Solver;
use bastion_smt::solver::SmtSolver;

use super::CliError;
use crate::cli::SynthArgs;

pub(crate) const CERTIFICATE_DIR: &str = "certificate";
pub(crate) const COMPENSATOR_DIR: &str = "compensator";
pub(crate) const REPORT_FILE: &str = "report.json";
pub(crate) const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

pub(crate) fn parse_output_format(raw: &str) -> Result<OutputFormat, CliError> {
    match raw {
        "text" => Ok(OutputFormat::Text),
        "json" => Ok(OutputFormat::Json),
        other => Err(CliError::Format(other.to_string())),
    }
}

/// Config file (or defaults), then every flag that was given, then
/// validation.
pub(crate) fn resolve_config(args: &SynthArgs) -> Result<CegisConfig, CliError> {
    let mut config = match &args.config {
        Some(path) => CegisConfig::from_json_file(path)?,
        None => CegisConfig::default(),
    };
    apply_overrides(&mut config, args);
    config.validate()?;
    Ok(config)
}

fn apply_overrides(config: &mut CegisConfig, args: &SynthArgs) {
    if let Some(v) = &args.exp_name {
        config.exp_name = v.clone();
    }
    if args.seed.is_some() {
        config.seed = args.seed;
    }
    if let Some(v) = &args.system {
        config.system = v.clone();
    }
    if let Some(v) = &args.uncertainty {
        config.uncertainty = Some(v.clone());
    }
    if let Some(v) = args.certificate {
        config.certificate = v;
    }
    if let Some(v) = args.verifier {
        config.verifier = v;
    }
    if let Some(v) = args.resampling_n {
        config.resampling_n = v;
    }
    if let Some(v) = args.resampling_std {
        config.resampling_std = v;
    }
    if args.use_init_models {
        config.use_init_models = true;
    }
    if let Some(v) = &args.activations {
        config.activations = v.clone();
    }
    if let Some(v) = &args.n_hiddens {
        config.n_hiddens = v.clone();
    }
    if let Some(v) = args.n_data_samples {
        config.n_data_samples = v;
    }
    if let Some(v) = args.optimizer {
        config.optimizer = v;
    }
    if let Some(v) = args.lr {
        config.lr = v;
    }
    if let Some(v) = args.wd {
        config.wd = v;
    }
    if let Some(v) = args.loss_act {
        config.loss_act = v;
    }
    let weights = &mut config.loss_weights;
    if let Some(v) = args.loss_init_weight {
        weights.init = v;
    }
    if let Some(v) = args.loss_unsafe_weight {
        weights.unsafe_set = v;
    }
    if let Some(v) = args.loss_lie_weight {
        weights.lie = v;
    }
    if let Some(v) = args.loss_robust_weight {
        weights.robust = v;
    }
    if let Some(v) = args.loss_conservative_b_weight {
        weights.conservative_b = v;
    }
    if let Some(v) = args.loss_conservative_sigma_weight {
        weights.conservative_sigma = v;
    }
    if let Some(v) = args.loss_margin {
        config.loss_margin = v;
    }
    if let Some(v) = args.max_iters {
        config.max_iters = v;
    }
    if let Some(v) = args.n_epochs {
        config.n_epochs = v;
    }
    if let Some(v) = args.timeout_secs {
        config.timeout_secs = v;
    }
    if let Some(v) = args.alpha {
        config.alpha = v;
    }
    if args.quantify_inputs {
        config.quantify_inputs = true;
    }
    if let Some(v) = args.stagnation_patience {
        config.stagnation_patience = v;
    }
    if let Some(v) = &args.dump_smt {
        config.dump_smt = Some(v.clone());
    }
}

fn run_cegis<S: SmtSolver>(
    config: CegisConfig,
    system: &dyn ControlAffineDynamics,
    solver: S,
) -> Result<CegisResult, CliError> {
    let mut cegis = Cegis::new(config, system, solver)?;
    let candidates = cegis.initial_candidates()?;
    Ok(cegis.solve(candidates)?)
}

fn run_with_backend(
    config: CegisConfig,
    system: &dyn ControlAffineDynamics,
) -> Result<CegisResult, CliError> {
    #[cfg(feature = "z3")]
    {
        if config.verifier == VerifierType::Z3 {
            let solver = Z3Solver::with_timeout_secs(config.timeout_secs);
            return run_cegis(config, system, solver);
        }
    }
    if config.verifier == VerifierType::DReal {
        warn!("dreal has no incremental SMT-LIB mode; use z3 or cvc5");
    }
    let solver = process_solver(config.verifier, config.timeout_secs)?;
    run_cegis(config, system, solver)
}

pub(crate) fn render_text_summary(config: &CegisConfig, result: &CegisResult) -> String {
    let summary = result.summary();
    let mut out = String::new();
    out.push_str(&format!("Experiment: {}\n", config.exp_name));
    out.push_str(&format!(
        "System: {} ({}, {})\n",
        config.system, config.certificate, config.verifier
    ));
    let status = match &summary.status {
        CegisStatus::Verified => "VERIFIED".to_string(),
        CegisStatus::IterationsExhausted => "NOT VERIFIED (iterations exhausted)".to_string(),
        CegisStatus::Stagnated => "NOT VERIFIED (no new counterexamples)".to_string(),
        CegisStatus::Inconclusive(reason) => format!("INCONCLUSIVE ({reason})"),
    };
    out.push_str(&format!("Result: {status}\n"));
    out.push_str(&format!(
        "Iterations: {}  counterexamples: {}  solver queries: {}\n",
        summary.iterations, summary.counterexamples, summary.solver_queries
    ));
    out.push_str(&format!("Certificate: {}\n", summary.certificate_model));
    if let Some(sigma) = &summary.compensator_model {
        out.push_str(&format!("Compensator: {sigma}\n"));
    }
    let sizes: Vec<String> = summary
        .dataset_sizes
        .iter()
        .map(|(domain, n)| format!("{}={n}", domain.as_str()))
        .collect();
    out.push_str(&format!("Dataset: {}\n", sizes.join(" ")));
    if let Some(last) = summary.loss_history.last() {
        out.push_str(&format!(
            "Final loss: {:.6} (init {:.4}, unsafe {:.4}, lie {:.4}, robust {:.4})\n",
            last.total, last.init, last.unsafe_set, last.lie, last.robust
        ));
    }
    out
}

fn write_file(path: &Path, contents: &str) -> Result<(), CliError> {
    fs::write(path, contents).map_err(|source| CliError::Output {
        path: path.display().to_string(),
        source,
    })
}

/// Models under `certificate/` and `compensator/`, plus `report.json` and
/// the resolved `config.json`.
pub(crate) fn write_outputs(
    dir: &Path,
    config: &CegisConfig,
    result: &CegisResult,
) -> Result<(), CliError> {
    fs::create_dir_all(dir).map_err(|source| CliError::Output {
        path: dir.display().to_string(),
        source,
    })?;
    let save = |model: &dyn BarrierModel, sub: &str| {
        let path = dir.join(sub);
        model.save(&path).map_err(|source| CliError::SaveModel {
            path: path.display().to_string(),
            source,
        })
    };
    save(result.h.as_ref(), CERTIFICATE_DIR)?;
    if let Some(sigma) = &result.sigma {
        save(sigma.as_ref(), COMPENSATOR_DIR)?;
    }

    let report = json!({
        "summary": result.summary(),
        "config": config,
    });
    write_file(&dir.join(REPORT_FILE), &serde_json::to_string_pretty(&report)?)?;
    write_file(&dir.join(CONFIG_FILE), &serde_json::to_string_pretty(config)?)?;
    info!(dir = %dir.display(), "wrote run outputs");
    Ok(())
}

/// Runs synthesis and reports whether the certificate was verified.
pub(crate) fn run_synth_command(args: &SynthArgs) -> miette::Result<bool> {
    let format = parse_output_format(&args.format)?;
    let config = resolve_config(args)?;
    let system = build_system(&config).map_err(CliError::from)?;
    info!(
        exp = %config.exp_name,
        system = %config.system,
        certificate = %config.certificate,
        verifier = %config.verifier,
        "starting synthesis"
    );

    let result = run_with_backend(config.clone(), system.as_ref())?;

    match format {
        OutputFormat::Text => print!("{}", render_text_summary(&config, &result)),
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&result.summary()).into_diagnostic()?;
            println!("{json}");
        }
    }
    if let Some(dir) = &args.out {
        write_outputs(dir, &config, &result)?;
    }
    Ok(result.status.is_verified())
}
