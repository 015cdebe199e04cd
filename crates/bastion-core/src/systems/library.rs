//! Built-in benchmark systems.

use std::collections::{BTreeMap, HashMap};

use ndarray::{s, Array2, Array3};

use bastion_smt::terms::SmtTerm;

use crate::consts::{DomainName, TimeDomain};
use crate::domains::Set;
use crate::systems::{DynamicsFn, System, SystemError, SystemSpec};

pub const SYSTEM_IDS: [&str; 3] = ["SingleIntegrator", "DoubleIntegrator", "SingleIntegratorDT"];

const SINGLE_INTEGRATOR_DT: f64 = 0.1;

pub fn make_system(id: &str) -> Result<System, SystemError> {
    match id {
        "SingleIntegrator" => single_integrator(),
        "DoubleIntegrator" => double_integrator(),
        "SingleIntegratorDT" => single_integrator_dt(SINGLE_INTEGRATOR_DT),
        other => Err(SystemError::UnknownSystem(other.to_string())),
    }
}

fn names(prefix: &str, n: usize) -> Vec<String> {
    (0..n).map(|i| format!("{prefix}{i}")).collect()
}

/// Planar point robot avoiding a unit disc at the origin, starting from a
/// strip on the left edge.
fn single_integrator_domains() -> Result<BTreeMap<DomainName, Set>, SystemError> {
    let x = names("x", 2);
    let u = names("u", 2);
    Ok(BTreeMap::from([
        (DomainName::Lie, Set::cube(x.clone(), -5.0, 5.0)?),
        (DomainName::Input, Set::cube(u, -5.0, 5.0)?),
        (
            DomainName::Init,
            Set::rectangle(x.clone(), vec![-5.0, -5.0], vec![-4.0, 5.0])?,
        ),
        (DomainName::Unsafe, Set::sphere(x, vec![0.0, 0.0], 1.0)?),
    ]))
}

/// `ẋ = u`.
fn single_integrator() -> Result<System, SystemError> {
    let mut dynamics = HashMap::new();
    dynamics.insert(
        "fx_numeric".to_string(),
        DynamicsFn::numeric_drift(|x| Array2::zeros(x.raw_dim())),
    );
    dynamics.insert(
        "fx_symbolic".to_string(),
        DynamicsFn::symbolic_drift(|x| vec![SmtTerm::zero(); x.len()]),
    );
    dynamics.insert(
        "gx_numeric".to_string(),
        DynamicsFn::numeric_input(|x| identity_batch(x.nrows(), 2, 1.0)),
    );
    dynamics.insert(
        "gx_symbolic".to_string(),
        DynamicsFn::symbolic_input(|_| identity_terms(2, 1.0)),
    );
    System::from_spec(SystemSpec {
        id: "SingleIntegrator".into(),
        vars: names("x", 2),
        controls: names("u", 2),
        time_domain: TimeDomain::Continuous,
        domains: single_integrator_domains()?,
        dynamics,
    })
}

/// `x⁺ = x + dt·u`.
fn single_integrator_dt(dt: f64) -> Result<System, SystemError> {
    let mut dynamics = HashMap::new();
    dynamics.insert(
        "fx_numeric".to_string(),
        DynamicsFn::numeric_drift(|x| x.to_owned()),
    );
    dynamics.insert(
        "fx_symbolic".to_string(),
        DynamicsFn::symbolic_drift(|x| x.to_vec()),
    );
    dynamics.insert(
        "gx_numeric".to_string(),
        DynamicsFn::numeric_input(move |x| identity_batch(x.nrows(), 2, dt)),
    );
    dynamics.insert(
        "gx_symbolic".to_string(),
        DynamicsFn::symbolic_input(move |_| identity_terms(2, dt)),
    );
    System::from_spec(SystemSpec {
        id: "SingleIntegratorDT".into(),
        vars: names("x", 2),
        controls: names("u", 2),
        time_domain: TimeDomain::Discrete,
        domains: single_integrator_domains()?,
        dynamics,
    })
}

/// Relative position `p = (x0, x1)` and velocity `v = (x2, x3)` of a point
/// mass with respect to an obstacle at the origin: `ṗ = v`, `v̇ = u`.
fn double_integrator() -> Result<System, SystemError> {
    let p = names("x", 2);
    let v = vec!["x2".to_string(), "x3".to_string()];
    let x = names("x", 4);
    let u = names("u", 2);

    let domains = BTreeMap::from([
        (DomainName::Lie, Set::cube(x.clone(), -5.0, 5.0)?),
        (DomainName::Input, Set::cube(u.clone(), -5.0, 5.0)?),
        (
            DomainName::Init,
            Set::product(vec![
                Set::rectangle(p.clone(), vec![-5.0, -5.0], vec![-4.0, 5.0])?,
                Set::cube(v.clone(), -1.0, 1.0)?,
            ])?,
        ),
        (
            DomainName::Unsafe,
            Set::product(vec![
                Set::sphere(p, vec![0.0, 0.0], 1.0)?,
                Set::cube(v, -5.0, 5.0)?,
            ])?,
        ),
    ]);

    let mut dynamics = HashMap::new();
    dynamics.insert(
        "fx_numeric".to_string(),
        DynamicsFn::numeric_drift(|x| {
            let mut out = Array2::zeros(x.raw_dim());
            out.slice_mut(s![.., 0..2]).assign(&x.slice(s![.., 2..4]));
            out
        }),
    );
    dynamics.insert(
        "fx_symbolic".to_string(),
        DynamicsFn::symbolic_drift(|x| {
            vec![x[2].clone(), x[3].clone(), SmtTerm::zero(), SmtTerm::zero()]
        }),
    );
    dynamics.insert(
        "gx_numeric".to_string(),
        DynamicsFn::numeric_input(|x| {
            let mut g = Array3::zeros((x.nrows(), 4, 2));
            g.slice_mut(s![.., 2, 0]).fill(1.0);
            g.slice_mut(s![.., 3, 1]).fill(1.0);
            g
        }),
    );
    dynamics.insert(
        "gx_symbolic".to_string(),
        DynamicsFn::symbolic_input(|_| {
            let mut g = vec![vec![SmtTerm::zero(); 2]; 4];
            g[2][0] = SmtTerm::real(1.0);
            g[3][1] = SmtTerm::real(1.0);
            g
        }),
    );
    System::from_spec(SystemSpec {
        id: "DoubleIntegrator".into(),
        vars: x,
        controls: u,
        time_domain: TimeDomain::Continuous,
        domains,
        dynamics,
    })
}

fn identity_batch(batch: usize, n: usize, scale: f64) -> Array3<f64> {
    Array3::from_shape_fn((batch, n, n), |(_, i, j)| if i == j { scale } else { 0.0 })
}

fn identity_terms(n: usize, scale: f64) -> Vec<Vec<SmtTerm>> {
    (0..n)
        .map(|i| {
            (0..n)
                .map(|j| SmtTerm::real(if i == j { scale } else { 0.0 }))
                .collect()
        })
        .collect()
}
