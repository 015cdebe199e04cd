//! Core data model for barrier certificate synthesis.
//!
//! This crate defines the geometric domains a certificate is checked over,
//! control-affine dynamical systems (with optional additive uncertainty),
//! and candidate models that are evaluated twice: numerically on batches of
//! points for training, and symbolically as solver terms for verification.

pub mod consts;
pub mod domains;
pub mod error;
pub mod models;
pub mod symbolic;
pub mod systems;

pub use consts::{ActivationType, CertificateType, DomainName, TimeDomain, VerifierType};
pub use error::{ShapeError, Unimplemented};
