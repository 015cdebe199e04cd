use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use ndarray::{Array2, Array3, ArrayView2};

use bastion_smt::terms::SmtTerm;

use crate::consts::{DomainName, TimeDomain};
use crate::domains::Set;
use crate::error::{check_len, ShapeError};
use crate::systems::{check_batch, ControlAffineDynamics, SystemError};

pub type NumericDrift = Arc<dyn Fn(ArrayView2<'_, f64>) -> Array2<f64> + Send + Sync>;
pub type NumericInput = Arc<dyn Fn(ArrayView2<'_, f64>) -> Array3<f64> + Send + Sync>;
pub type SymbolicDrift = Arc<dyn Fn(&[SmtTerm]) -> Vec<SmtTerm> + Send + Sync>;
pub type SymbolicInput = Arc<dyn Fn(&[SmtTerm]) -> Vec<Vec<SmtTerm>> + Send + Sync>;

/// One named dynamics callable of a [`SystemSpec`].
#[derive(Clone)]
pub enum DynamicsFn {
    NumericDrift(NumericDrift),
    NumericInput(NumericInput),
    SymbolicDrift(SymbolicDrift),
    SymbolicInput(SymbolicInput),
}

impl DynamicsFn {
    pub fn numeric_drift(
        f: impl Fn(ArrayView2<'_, f64>) -> Array2<f64> + Send + Sync + 'static,
    ) -> Self {
        DynamicsFn::NumericDrift(Arc::new(f))
    }

    pub fn numeric_input(
        f: impl Fn(ArrayView2<'_, f64>) -> Array3<f64> + Send + Sync + 'static,
    ) -> Self {
        DynamicsFn::NumericInput(Arc::new(f))
    }

    pub fn symbolic_drift(f: impl Fn(&[SmtTerm]) -> Vec<SmtTerm> + Send + Sync + 'static) -> Self {
        DynamicsFn::SymbolicDrift(Arc::new(f))
    }

    pub fn symbolic_input(
        f: impl Fn(&[SmtTerm]) -> Vec<Vec<SmtTerm>> + Send + Sync + 'static,
    ) -> Self {
        DynamicsFn::SymbolicInput(Arc::new(f))
    }
}

impl fmt::Debug for DynamicsFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            DynamicsFn::NumericDrift(_) => "NumericDrift",
            DynamicsFn::NumericInput(_) => "NumericInput",
            DynamicsFn::SymbolicDrift(_) => "SymbolicDrift",
            DynamicsFn::SymbolicInput(_) => "SymbolicInput",
        };
        write!(f, "DynamicsFn::{kind}")
    }
}

/// Unvalidated description of a system, turned into a [`System`] by
/// [`System::from_spec`].
#[derive(Debug, Clone)]
pub struct SystemSpec {
    pub id: String,
    pub vars: Vec<String>,
    pub controls: Vec<String>,
    pub time_domain: TimeDomain,
    pub domains: BTreeMap<DomainName, Set>,
    /// Keys `fx_numeric`, `fx_symbolic`, `gx_numeric` and `gx_symbolic`.
    pub dynamics: HashMap<String, DynamicsFn>,
}

const REQUIRED_DOMAINS: [DomainName; 4] = [
    DomainName::Lie,
    DomainName::Input,
    DomainName::Init,
    DomainName::Unsafe,
];

#[derive(Clone)]
pub struct System {
    id: String,
    vars: Vec<String>,
    controls: Vec<String>,
    time_domain: TimeDomain,
    domains: BTreeMap<DomainName, Set>,
    fx: NumericDrift,
    gx: NumericInput,
    fx_sym: SymbolicDrift,
    gx_sym: SymbolicInput,
}

impl fmt::Debug for System {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("System")
            .field("id", &self.id)
            .field("vars", &self.vars)
            .field("controls", &self.controls)
            .field("time_domain", &self.time_domain)
            .field("domains", &self.domains.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl System {
    /// Validate a spec: the four dynamics keys must be present with the
    /// right kind, the lie/input/init/unsafe domains must exist, and every
    /// domain must match the state (or control) dimension.
    pub fn from_spec(spec: SystemSpec) -> Result<Self, SystemError> {
        let SystemSpec {
            id,
            vars,
            controls,
            time_domain,
            domains,
            mut dynamics,
        } = spec;

        for domain in REQUIRED_DOMAINS {
            if !domains.contains_key(&domain) {
                return Err(SystemError::MissingDomain {
                    system: id.clone(),
                    domain,
                });
            }
        }
        for (name, set) in &domains {
            set.validate()?;
            let expected = match name {
                DomainName::Input => controls.len(),
                DomainName::Uncertainty => continue,
                _ => vars.len(),
            };
            if set.dimension() != expected {
                return Err(ShapeError::new(
                    format!("`{name}` domain of `{id}`"),
                    format!("dimension {expected}"),
                    format!("dimension {}", set.dimension()),
                )
                .into());
            }
        }

        let mut take = |key: &str| {
            dynamics
                .remove(key)
                .ok_or_else(|| SystemError::MissingDynamics {
                    system: id.clone(),
                    key: key.to_string(),
                })
        };
        let wrong = |key: &str, expected| SystemError::WrongDynamicsKind {
            system: id.clone(),
            key: key.to_string(),
            expected,
        };

        let DynamicsFn::NumericDrift(fx) = take("fx_numeric")? else {
            return Err(wrong("fx_numeric", "a numeric drift"));
        };
        let DynamicsFn::SymbolicDrift(fx_sym) = take("fx_symbolic")? else {
            return Err(wrong("fx_symbolic", "a symbolic drift"));
        };
        let DynamicsFn::NumericInput(gx) = take("gx_numeric")? else {
            return Err(wrong("gx_numeric", "a numeric input matrix"));
        };
        let DynamicsFn::SymbolicInput(gx_sym) = take("gx_symbolic")? else {
            return Err(wrong("gx_symbolic", "a symbolic input matrix"));
        };

        Ok(Self {
            id,
            vars,
            controls,
            time_domain,
            domains,
            fx,
            gx,
            fx_sym,
            gx_sym,
        })
    }

    pub fn domains(&self) -> &BTreeMap<DomainName, Set> {
        &self.domains
    }

    /// Replace or add a domain, keeping the dimension checks of `from_spec`.
    pub fn with_domain(mut self, name: DomainName, set: Set) -> Result<Self, SystemError> {
        set.validate()?;
        let expected = match name {
            DomainName::Input => Some(self.controls.len()),
            DomainName::Uncertainty => None,
            _ => Some(self.vars.len()),
        };
        if let Some(expected) = expected.filter(|&e| e != set.dimension()) {
            return Err(ShapeError::new(
                format!("`{name}` domain of `{}`", self.id),
                format!("dimension {expected}"),
                format!("dimension {}", set.dimension()),
            )
            .into());
        }
        self.domains.insert(name, set);
        Ok(self)
    }
}

impl ControlAffineDynamics for System {
    fn id(&self) -> &str {
        &self.id
    }

    fn vars(&self) -> &[String] {
        &self.vars
    }

    fn controls(&self) -> &[String] {
        &self.controls
    }

    fn time_domain(&self) -> TimeDomain {
        self.time_domain
    }

    fn domain(&self, name: DomainName) -> Option<&Set> {
        self.domains.get(&name)
    }

    fn fx_numeric(&self, x: ArrayView2<'_, f64>) -> Result<Array2<f64>, ShapeError> {
        check_batch("fx_numeric input", &x, self.vars.len())?;
        let out = (self.fx)(x.view());
        let expected = (x.nrows(), self.vars.len());
        if out.dim() != expected {
            return Err(ShapeError::new(
                format!("fx_numeric output of `{}`", self.id),
                format!("{expected:?}"),
                format!("{:?}", out.dim()),
            ));
        }
        Ok(out)
    }

    fn gx_numeric(&self, x: ArrayView2<'_, f64>) -> Result<Array3<f64>, ShapeError> {
        check_batch("gx_numeric input", &x, self.vars.len())?;
        let out = (self.gx)(x.view());
        let expected = (x.nrows(), self.vars.len(), self.controls.len());
        if out.dim() != expected {
            return Err(ShapeError::new(
                format!("gx_numeric output of `{}`", self.id),
                format!("{expected:?}"),
                format!("{:?}", out.dim()),
            ));
        }
        Ok(out)
    }

    fn fx_symbolic(&self, x: &[SmtTerm]) -> Result<Vec<SmtTerm>, ShapeError> {
        check_len("fx_symbolic input", x, self.vars.len())?;
        let out = (self.fx_sym)(x);
        check_len("fx_symbolic output", &out, self.vars.len())?;
        Ok(out)
    }

    fn gx_symbolic(&self, x: &[SmtTerm]) -> Result<Vec<Vec<SmtTerm>>, ShapeError> {
        check_len("gx_symbolic input", x, self.vars.len())?;
        let out = (self.gx_sym)(x);
        check_len("gx_symbolic rows", &out, self.vars.len())?;
        for row in &out {
            check_len("gx_symbolic columns", row, self.controls.len())?;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn names(prefix: &str, n: usize) -> Vec<String> {
        (0..n).map(|i| format!("{prefix}{i}")).collect()
    }

    fn scalar_spec() -> SystemSpec {
        let x = names("x", 1);
        let u = names("u", 1);
        let mut domains = BTreeMap::new();
        for d in [DomainName::Lie, DomainName::Init, DomainName::Unsafe] {
            domains.insert(d, Set::cube(x.clone(), -1.0, 1.0).unwrap());
        }
        domains.insert(DomainName::Input, Set::cube(u.clone(), -1.0, 1.0).unwrap());
        let mut dynamics = HashMap::new();
        dynamics.insert(
            "fx_numeric".to_string(),
            DynamicsFn::numeric_drift(|x| x.mapv(|v| -v)),
        );
        dynamics.insert(
            "fx_symbolic".to_string(),
            DynamicsFn::symbolic_drift(|x| vec![x[0].clone().neg()]),
        );
        dynamics.insert(
            "gx_numeric".to_string(),
            DynamicsFn::numeric_input(|x| Array3::ones((x.nrows(), 1, 1))),
        );
        dynamics.insert(
            "gx_symbolic".to_string(),
            DynamicsFn::symbolic_input(|_| vec![vec![SmtTerm::real(1.0)]]),
        );
        SystemSpec {
            id: "Scalar".into(),
            vars: x,
            controls: u,
            time_domain: TimeDomain::Continuous,
            domains,
            dynamics,
        }
    }

    #[test]
    fn valid_spec_builds_a_system() {
        let system = System::from_spec(scalar_spec()).unwrap();
        assert_eq!(system.n_vars(), 1);
        let f = system.fx_numeric(array![[2.0], [-3.0]].view()).unwrap();
        assert_eq!(f, array![[-2.0], [3.0]]);
        assert_eq!(system.gx_numeric(array![[0.0]].view()).unwrap().dim(), (1, 1, 1));
    }

    #[test]
    fn missing_dynamics_key_is_rejected() {
        let mut spec = scalar_spec();
        spec.dynamics.remove("gx_symbolic");
        match System::from_spec(spec) {
            Err(SystemError::MissingDynamics { key, .. }) => assert_eq!(key, "gx_symbolic"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn dynamics_of_the_wrong_kind_are_rejected() {
        let mut spec = scalar_spec();
        let swapped = spec.dynamics["fx_symbolic"].clone();
        spec.dynamics.insert("fx_numeric".into(), swapped);
        assert!(matches!(
            System::from_spec(spec),
            Err(SystemError::WrongDynamicsKind { .. })
        ));
    }

    #[test]
    fn missing_domain_is_rejected() {
        let mut spec = scalar_spec();
        spec.domains.remove(&DomainName::Unsafe);
        assert!(matches!(
            System::from_spec(spec),
            Err(SystemError::MissingDomain {
                domain: DomainName::Unsafe,
                ..
            })
        ));
    }

    #[test]
    fn domain_dimension_must_match_the_state() {
        let mut spec = scalar_spec();
        spec.domains
            .insert(DomainName::Init, Set::cube(names("x", 2), 0.0, 1.0).unwrap());
        assert!(matches!(System::from_spec(spec), Err(SystemError::Shape(_))));
    }

    #[test]
    fn wrong_batch_width_is_a_shape_error() {
        let system = System::from_spec(scalar_spec()).unwrap();
        assert!(system.fx_numeric(array![[1.0, 2.0]].view()).is_err());
        assert!(system
            .fx_symbolic(&[SmtTerm::var("a"), SmtTerm::var("b")])
            .is_err());
    }

    #[test]
    fn bad_output_shape_is_a_shape_error() {
        let mut spec = scalar_spec();
        spec.dynamics.insert(
            "fx_numeric".into(),
            DynamicsFn::numeric_drift(|x| Array2::zeros((x.nrows() + 1, 1))),
        );
        let system = System::from_spec(spec).unwrap();
        let err = system.fx_numeric(array![[1.0]].view()).unwrap_err();
        assert!(err.context.contains("fx_numeric output"));
    }
}
