use ndarray::{Array2, Array3, ArrayView2};

use bastion_smt::terms::SmtTerm;

use crate::consts::{DomainName, TimeDomain};
use crate::domains::Set;
use crate::error::{check_len, ShapeError};
use crate::systems::{check_batch, ControlAffineDynamics, System, SystemError, Uncertainty};

pub const UNCERTAINTY_IDS: [&str; 1] = ["AdditiveBounded"];

/// Radius of the disturbance ball used by [`add_uncertainty`].
pub const DEFAULT_Z_BOUND: f64 = 1.0;

/// Wrap `system` with the named uncertainty. `None` returns the nominal system.
pub fn add_uncertainty(
    id: Option<&str>,
    system: System,
) -> Result<Box<dyn ControlAffineDynamics>, SystemError> {
    match id {
        None => Ok(Box::new(system)),
        Some("AdditiveBounded") => Ok(Box::new(AdditiveBounded::new(system, DEFAULT_Z_BOUND)?)),
        Some(other) => Err(SystemError::UnknownUncertainty(other.to_string())),
    }
}

/// `ẋ = f(x) + g(x)·u + Δ(x, z)` where `Δ` places `z` on the last
/// `n_controls` state coordinates (the actuated ones) and `‖z‖ ≤ z_bound`.
#[derive(Debug, Clone)]
pub struct AdditiveBounded {
    nominal: System,
    channels: Vec<usize>,
    z_vars: Vec<String>,
    z_domain: Set,
    z_bound: f64,
}

impl AdditiveBounded {
    pub fn new(nominal: System, z_bound: f64) -> Result<Self, SystemError> {
        let n = nominal.n_vars();
        let m = nominal.n_controls().min(n);
        Self::on_channels(nominal, (n - m..n).collect(), z_bound)
    }

    pub fn on_channels(
        nominal: System,
        channels: Vec<usize>,
        z_bound: f64,
    ) -> Result<Self, SystemError> {
        if let Some(&bad) = channels.iter().find(|&&c| c >= nominal.n_vars()) {
            return Err(ShapeError::new(
                "uncertainty channel",
                format!("an index below {}", nominal.n_vars()),
                bad,
            )
            .into());
        }
        let z_vars: Vec<String> = (0..channels.len()).map(|i| format!("z{i}")).collect();
        let z_domain = Set::sphere(z_vars.clone(), vec![0.0; channels.len()], z_bound)?;
        let nominal = nominal.with_domain(DomainName::Uncertainty, z_domain.clone())?;
        Ok(Self {
            nominal,
            channels,
            z_vars,
            z_domain,
            z_bound,
        })
    }

    pub fn z_bound(&self) -> f64 {
        self.z_bound
    }

    pub fn nominal(&self) -> &System {
        &self.nominal
    }
}

impl ControlAffineDynamics for AdditiveBounded {
    fn id(&self) -> &str {
        self.nominal.id()
    }

    fn vars(&self) -> &[String] {
        self.nominal.vars()
    }

    fn controls(&self) -> &[String] {
        self.nominal.controls()
    }

    fn time_domain(&self) -> TimeDomain {
        self.nominal.time_domain()
    }

    fn domain(&self, name: DomainName) -> Option<&Set> {
        self.nominal.domain(name)
    }

    fn fx_numeric(&self, x: ArrayView2<'_, f64>) -> Result<Array2<f64>, ShapeError> {
        self.nominal.fx_numeric(x)
    }

    fn gx_numeric(&self, x: ArrayView2<'_, f64>) -> Result<Array3<f64>, ShapeError> {
        self.nominal.gx_numeric(x)
    }

    fn fx_symbolic(&self, x: &[SmtTerm]) -> Result<Vec<SmtTerm>, ShapeError> {
        self.nominal.fx_symbolic(x)
    }

    fn gx_symbolic(&self, x: &[SmtTerm]) -> Result<Vec<Vec<SmtTerm>>, ShapeError> {
        self.nominal.gx_symbolic(x)
    }

    fn uncertainty(&self) -> Option<&dyn Uncertainty> {
        Some(self)
    }
}

impl Uncertainty for AdditiveBounded {
    fn uncertainty_vars(&self) -> &[String] {
        &self.z_vars
    }

    fn uncertainty_domain(&self) -> &Set {
        &self.z_domain
    }

    fn channels(&self) -> &[usize] {
        &self.channels
    }

    fn fz_numeric(
        &self,
        x: ArrayView2<'_, f64>,
        z: ArrayView2<'_, f64>,
    ) -> Result<Array2<f64>, ShapeError> {
        check_batch("fz_numeric state", &x, self.n_vars())?;
        check_batch("fz_numeric disturbance", &z, self.channels.len())?;
        if z.nrows() != x.nrows() {
            return Err(ShapeError::new(
                "fz_numeric disturbance rows",
                x.nrows(),
                z.nrows(),
            ));
        }
        let mut out = Array2::zeros(x.raw_dim());
        for (k, &c) in self.channels.iter().enumerate() {
            out.column_mut(c).assign(&z.column(k));
        }
        Ok(out)
    }

    fn fz_symbolic(&self, x: &[SmtTerm], z: &[SmtTerm]) -> Result<Vec<SmtTerm>, ShapeError> {
        check_len("fz_symbolic state", x, self.n_vars())?;
        check_len("fz_symbolic disturbance", z, self.channels.len())?;
        let mut out = vec![SmtTerm::zero(); x.len()];
        for (k, &c) in self.channels.iter().enumerate() {
            out[c] = z[k].clone();
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::systems::make_system;
    use ndarray::array;

    #[test]
    fn disturbance_acts_on_the_actuated_coordinates() {
        let system = AdditiveBounded::new(make_system("DoubleIntegrator").unwrap(), 0.5).unwrap();
        assert_eq!(system.channels(), &[2, 3]);
        let x = array![[1.0, 2.0, 3.0, 4.0]];
        let z = array![[0.1, -0.2]];
        let d = system.fz_numeric(x.view(), z.view()).unwrap();
        assert_eq!(d, array![[0.0, 0.0, 0.1, -0.2]]);

        let zs = vec![SmtTerm::var("z0"), SmtTerm::var("z1")];
        let xs: Vec<SmtTerm> = (0..4).map(|i| SmtTerm::var(format!("x{i}"))).collect();
        let sym = system.fz_symbolic(&xs, &zs).unwrap();
        assert_eq!(sym[0], SmtTerm::zero());
        assert_eq!(sym[3], SmtTerm::var("z1"));
    }

    #[test]
    fn uncertainty_domain_is_registered_on_the_system() {
        let system = AdditiveBounded::new(make_system("SingleIntegrator").unwrap(), 2.0).unwrap();
        let z = system.domain(DomainName::Uncertainty).unwrap();
        assert_eq!(z, system.uncertainty_domain());
        assert!(z.contains(array![2.0, 0.0].view()));
        assert!(!z.contains(array![2.0, 0.1].view()));
    }

    #[test]
    fn registry_wraps_or_rejects() {
        let nominal = add_uncertainty(None, make_system("SingleIntegrator").unwrap()).unwrap();
        assert!(nominal.uncertainty().is_none());
        let robust = add_uncertainty(
            Some("AdditiveBounded"),
            make_system("SingleIntegrator").unwrap(),
        )
        .unwrap();
        assert_eq!(robust.uncertainty().unwrap().n_uncertainty(), 2);
        assert!(matches!(
            add_uncertainty(Some("Multiplicative"), make_system("SingleIntegrator").unwrap()),
            Err(SystemError::UnknownUncertainty(_))
        ));
    }

    #[test]
    fn out_of_range_channel_is_a_shape_error() {
        let err = AdditiveBounded::on_channels(make_system("SingleIntegrator").unwrap(), vec![5], 1.0)
            .unwrap_err();
        assert!(matches!(err, SystemError::Shape(_)));
    }
}
