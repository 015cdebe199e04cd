//! SMT term language and solver integration for barrier certificate checks.
//!
//! Terms are built over real arithmetic (QF_NRA plus the occasional
//! quantifier over control inputs). They can be printed as SMT-LIB2,
//! evaluated numerically at a point, and submitted to a pluggable
//! solver backend: a z3/cvc5 child process, or in-process Z3 behind the
//! `z3` feature.

pub mod backends;
pub mod eval;
pub mod solver;
pub mod sorts;
pub mod terms;
