//! Full synthesis runs against real solver binaries.

use bastion_core::consts::{DomainName, VerifierType};
use bastion_core::domains::Set;
use bastion_core::models::ConstantModel;
use bastion_core::systems::make_system;
use bastion_engine::{process_solver, Candidates, Cegis, CegisConfig, CegisStatus};

fn config(verifier: VerifierType) -> CegisConfig {
    CegisConfig {
        seed: Some(1),
        verifier,
        n_data_samples: 50,
        n_epochs: 10,
        max_iters: 3,
        timeout_secs: 20,
        ..CegisConfig::default()
    }
}

#[test]
fn dreal_cannot_be_started_as_a_process() {
    assert!(process_solver(VerifierType::DReal, 5).is_err());
}

#[test]
#[ignore = "requires z3 on PATH"]
fn z3_verifies_a_constant_when_nothing_is_unsafe() {
    let system = make_system("SingleIntegrator")
        .unwrap()
        .with_domain(
            DomainName::Unsafe,
            Set::empty(vec!["x0".into(), "x1".into()]),
        )
        .unwrap();
    let config = config(VerifierType::Z3);
    let solver = process_solver(config.verifier, config.timeout_secs).unwrap();
    let mut cegis = Cegis::new(config, &system, solver).unwrap();
    let result = cegis
        .solve(Candidates {
            h: Box::new(ConstantModel::new(2, 1.0)),
            sigma: None,
        })
        .unwrap();
    assert_eq!(result.status, CegisStatus::Verified);
    assert_eq!(result.iterations, 1);
    assert_eq!(result.counterexamples, 0);
}

#[test]
#[ignore = "requires z3 on PATH"]
fn z3_counterexamples_land_in_the_unsafe_dataset() {
    let system = make_system("SingleIntegrator").unwrap();
    let config = CegisConfig {
        max_iters: 1,
        ..config(VerifierType::Z3)
    };
    let solver = process_solver(config.verifier, config.timeout_secs).unwrap();
    let mut cegis = Cegis::new(config, &system, solver).unwrap();
    let result = cegis
        .solve(Candidates {
            h: Box::new(ConstantModel::new(2, 1.0)),
            sigma: None,
        })
        .unwrap();
    assert_eq!(result.status, CegisStatus::IterationsExhausted);
    assert_eq!(result.counterexamples, 1);
    assert!(result.dataset.len(DomainName::Unsafe) > 50);
}

#[test]
#[ignore = "requires cvc5 on PATH"]
fn cvc5_runs_the_same_loop() {
    let system = make_system("SingleIntegrator")
        .unwrap()
        .with_domain(
            DomainName::Unsafe,
            Set::empty(vec!["x0".into(), "x1".into()]),
        )
        .unwrap();
    let config = config(VerifierType::Cvc5);
    let solver = process_solver(config.verifier, config.timeout_secs).unwrap();
    let mut cegis = Cegis::new(config, &system, solver).unwrap();
    let result = cegis
        .solve(Candidates {
            h: Box::new(ConstantModel::new(2, 1.0)),
            sigma: None,
        })
        .unwrap();
    assert!(result.status.is_verified());
}
