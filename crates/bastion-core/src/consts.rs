//! Closed enumerations shared by every crate in the workspace.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Unimplemented;

/// Named regions of the state, input and uncertainty spaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DomainName {
    Lie,
    Unsafe,
    Init,
    Input,
    Uncertainty,
}

impl DomainName {
    pub const ALL: [DomainName; 5] = [
        DomainName::Lie,
        DomainName::Unsafe,
        DomainName::Init,
        DomainName::Input,
        DomainName::Uncertainty,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DomainName::Lie => "lie",
            DomainName::Unsafe => "unsafe",
            DomainName::Init => "init",
            DomainName::Input => "input",
            DomainName::Uncertainty => "uncertainty",
        }
    }
}

impl fmt::Display for DomainName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DomainName {
    type Err = Unimplemented;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DomainName::ALL
            .into_iter()
            .find(|d| d.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Unimplemented::new(format!("domain `{s}`")))
    }
}

/// Kind of barrier certificate being synthesized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CertificateType {
    /// Control barrier function.
    Cbf,
    /// Robust control barrier function, with a compensator for bounded uncertainty.
    Rcbf,
}

impl CertificateType {
    pub fn required_domains(self) -> &'static [DomainName] {
        match self {
            CertificateType::Cbf => &[
                DomainName::Lie,
                DomainName::Input,
                DomainName::Init,
                DomainName::Unsafe,
            ],
            CertificateType::Rcbf => &[
                DomainName::Lie,
                DomainName::Input,
                DomainName::Init,
                DomainName::Unsafe,
                DomainName::Uncertainty,
            ],
        }
    }

    pub fn is_robust(self) -> bool {
        matches!(self, CertificateType::Rcbf)
    }
}

impl fmt::Display for CertificateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CertificateType::Cbf => write!(f, "cbf"),
            CertificateType::Rcbf => write!(f, "rcbf"),
        }
    }
}

impl FromStr for CertificateType {
    type Err = Unimplemented;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cbf" => Ok(CertificateType::Cbf),
            "rcbf" => Ok(CertificateType::Rcbf),
            _ => Err(Unimplemented::new(format!("certificate type `{s}`"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeDomain {
    #[default]
    Continuous,
    Discrete,
}

impl fmt::Display for TimeDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeDomain::Continuous => write!(f, "continuous"),
            TimeDomain::Discrete => write!(f, "discrete"),
        }
    }
}

impl FromStr for TimeDomain {
    type Err = Unimplemented;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "continuous" => Ok(TimeDomain::Continuous),
            "discrete" => Ok(TimeDomain::Discrete),
            _ => Err(Unimplemented::new(format!("time domain `{s}`"))),
        }
    }
}

/// Decision procedures the translator can target. All of them accept
/// quantified nonlinear real arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerifierType {
    #[default]
    Z3,
    Cvc5,
    DReal,
}

impl fmt::Display for VerifierType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerifierType::Z3 => write!(f, "z3"),
            VerifierType::Cvc5 => write!(f, "cvc5"),
            VerifierType::DReal => write!(f, "dreal"),
        }
    }
}

impl FromStr for VerifierType {
    type Err = Unimplemented;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "z3" => Ok(VerifierType::Z3),
            "cvc5" => Ok(VerifierType::Cvc5),
            "dreal" => Ok(VerifierType::DReal),
            _ => Err(Unimplemented::new(format!("verifier `{s}`"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivationType {
    Identity,
    Relu,
    Linear,
    Square,
    Requ,
    /// `x / (1 + |x|)`, a rational approximation of `tanh`.
    Rational,
    HSigmoid,
    HTanh,
    Tanh,
    Sigmoid,
    Softplus,
    Cosh,
}

impl ActivationType {
    pub const ALL: [ActivationType; 12] = [
        ActivationType::Identity,
        ActivationType::Relu,
        ActivationType::Linear,
        ActivationType::Square,
        ActivationType::Requ,
        ActivationType::Rational,
        ActivationType::HSigmoid,
        ActivationType::HTanh,
        ActivationType::Tanh,
        ActivationType::Sigmoid,
        ActivationType::Softplus,
        ActivationType::Cosh,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ActivationType::Identity => "identity",
            ActivationType::Relu => "relu",
            ActivationType::Linear => "linear",
            ActivationType::Square => "square",
            ActivationType::Requ => "requ",
            ActivationType::Rational => "rational",
            ActivationType::HSigmoid => "hsigmoid",
            ActivationType::HTanh => "htanh",
            ActivationType::Tanh => "tanh",
            ActivationType::Sigmoid => "sigmoid",
            ActivationType::Softplus => "softplus",
            ActivationType::Cosh => "cosh",
        }
    }

    /// Whether the activation has a closed form in polynomial arithmetic with `ite`.
    pub fn is_symbolic(self) -> bool {
        !matches!(
            self,
            ActivationType::Tanh
                | ActivationType::Sigmoid
                | ActivationType::Softplus
                | ActivationType::Cosh
        )
    }
}

impl fmt::Display for ActivationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActivationType {
    type Err = Unimplemented;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ActivationType::ALL
            .into_iter()
            .find(|a| a.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Unimplemented::new(format!("activation `{s}`")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn robust_certificates_need_an_uncertainty_domain() {
        assert!(!CertificateType::Cbf
            .required_domains()
            .contains(&DomainName::Uncertainty));
        assert!(CertificateType::Rcbf
            .required_domains()
            .contains(&DomainName::Uncertainty));
        assert_eq!(CertificateType::Rcbf.required_domains().len(), 5);
    }

    #[test]
    fn names_parse_case_insensitively() {
        assert_eq!("RCBF".parse::<CertificateType>(), Ok(CertificateType::Rcbf));
        assert_eq!("dReal".parse::<VerifierType>(), Ok(VerifierType::DReal));
        assert_eq!("HTanh".parse::<ActivationType>(), Ok(ActivationType::HTanh));
        assert_eq!("unsafe".parse::<DomainName>(), Ok(DomainName::Unsafe));
    }

    #[test]
    fn unknown_verifier_is_unimplemented() {
        let err = "mathsat".parse::<VerifierType>().unwrap_err();
        assert!(err.to_string().contains("mathsat"));
    }

    #[test]
    fn transcendental_activations_are_numeric_only() {
        let numeric_only: Vec<_> = ActivationType::ALL
            .into_iter()
            .filter(|a| !a.is_symbolic())
            .collect();
        assert_eq!(
            numeric_only,
            vec![
                ActivationType::Tanh,
                ActivationType::Sigmoid,
                ActivationType::Softplus,
                ActivationType::Cosh
            ]
        );
    }

    #[test]
    fn serde_uses_lowercase_names() {
        let json = serde_json::to_string(&ActivationType::HSigmoid).unwrap();
        assert_eq!(json, "\"hsigmoid\"");
        let d: DomainName = serde_json::from_str("\"lie\"").unwrap();
        assert_eq!(d, DomainName::Lie);
        let r: ActivationType = serde_json::from_str("\"rational\"").unwrap();
        assert_eq!(r, ActivationType::Rational);
        assert!(r.is_symbolic());
    }
}
