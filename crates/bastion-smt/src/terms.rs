use crate::sorts::SmtSort;

/// Abstract SMT term representation, solver-agnostic.
///
/// Arithmetic is over the reals. The builder methods fold literal operands
/// (`x + 0`, `1 * x`, `0 * x`, literal-literal arithmetic) so that dynamics
/// with many zero entries do not bloat the formulas sent to the solver.
#[derive(Debug, Clone, PartialEq)]
pub enum SmtTerm {
    /// Variable reference by name.
    Var(String),
    /// Real literal.
    RealLit(f64),
    /// Boolean literal.
    BoolLit(bool),

    // Arithmetic
    Add(Box<SmtTerm>, Box<SmtTerm>),
    Sub(Box<SmtTerm>, Box<SmtTerm>),
    Mul(Box<SmtTerm>, Box<SmtTerm>),
    Div(Box<SmtTerm>, Box<SmtTerm>),
    Neg(Box<SmtTerm>),

    // Comparison
    Eq(Box<SmtTerm>, Box<SmtTerm>),
    Lt(Box<SmtTerm>, Box<SmtTerm>),
    Le(Box<SmtTerm>, Box<SmtTerm>),
    Gt(Box<SmtTerm>, Box<SmtTerm>),
    Ge(Box<SmtTerm>, Box<SmtTerm>),

    // Boolean logic
    And(Vec<SmtTerm>),
    Or(Vec<SmtTerm>),
    Not(Box<SmtTerm>),
    Implies(Box<SmtTerm>, Box<SmtTerm>),

    // Existential control inputs in Lie conditions
    Exists(Vec<(String, SmtSort)>, Box<SmtTerm>),

    // If-then-else
    Ite(Box<SmtTerm>, Box<SmtTerm>, Box<SmtTerm>),
}

#[allow(clippy::should_implement_trait)]
impl SmtTerm {
    pub fn var(name: impl Into<String>) -> Self {
        SmtTerm::Var(name.into())
    }

    pub fn real(value: f64) -> Self {
        SmtTerm::RealLit(value)
    }

    pub fn zero() -> Self {
        SmtTerm::RealLit(0.0)
    }

    pub fn bool(b: bool) -> Self {
        SmtTerm::BoolLit(b)
    }

    /// Literal value, if the term is a real literal.
    pub fn as_real(&self) -> Option<f64> {
        match self {
            SmtTerm::RealLit(v) => Some(*v),
            _ => None,
        }
    }

    pub fn add(self, other: SmtTerm) -> Self {
        match (self.as_real(), other.as_real()) {
            (Some(a), Some(b)) => SmtTerm::RealLit(a + b),
            (Some(a), None) if a == 0.0 => other,
            (None, Some(b)) if b == 0.0 => self,
            _ => SmtTerm::Add(Box::new(self), Box::new(other)),
        }
    }

    pub fn sub(self, other: SmtTerm) -> Self {
        match (self.as_real(), other.as_real()) {
            (Some(a), Some(b)) => SmtTerm::RealLit(a - b),
            (Some(a), None) if a == 0.0 => other.neg(),
            (None, Some(b)) if b == 0.0 => self,
            _ => SmtTerm::Sub(Box::new(self), Box::new(other)),
        }
    }

    pub fn mul(self, other: SmtTerm) -> Self {
        match (self.as_real(), other.as_real()) {
            (Some(a), Some(b)) => SmtTerm::RealLit(a * b),
            (Some(a), None) | (None, Some(a)) if a == 0.0 => SmtTerm::RealLit(0.0),
            (Some(a), None) if a == 1.0 => other,
            (None, Some(b)) if b == 1.0 => self,
            _ => SmtTerm::Mul(Box::new(self), Box::new(other)),
        }
    }

    pub fn div(self, other: SmtTerm) -> Self {
        match (self.as_real(), other.as_real()) {
            (Some(a), Some(b)) if b != 0.0 => SmtTerm::RealLit(a / b),
            (None, Some(b)) if b == 1.0 => self,
            _ => SmtTerm::Div(Box::new(self), Box::new(other)),
        }
    }

    pub fn neg(self) -> Self {
        match self {
            SmtTerm::RealLit(v) => SmtTerm::RealLit(-v),
            SmtTerm::Neg(inner) => *inner,
            other => SmtTerm::Neg(Box::new(other)),
        }
    }

    pub fn square(self) -> Self {
        self.clone().mul(self)
    }

    /// Sum of terms; the empty sum is `0`.
    pub fn sum(terms: impl IntoIterator<Item = SmtTerm>) -> Self {
        terms
            .into_iter()
            .fold(SmtTerm::zero(), |acc, term| acc.add(term))
    }

    /// Inner product of two equally long term vectors.
    pub fn dot(lhs: &[SmtTerm], rhs: &[SmtTerm]) -> Self {
        debug_assert_eq!(lhs.len(), rhs.len(), "dot product of unequal lengths");
        SmtTerm::sum(
            lhs.iter()
                .zip(rhs)
                .map(|(a, b)| a.clone().mul(b.clone())),
        )
    }

    /// `max(self, other)` as an if-then-else.
    pub fn max(self, other: SmtTerm) -> Self {
        match (self.as_real(), other.as_real()) {
            (Some(a), Some(b)) => SmtTerm::RealLit(a.max(b)),
            _ => SmtTerm::ite(self.clone().ge(other.clone()), self, other),
        }
    }

    pub fn eq(self, other: SmtTerm) -> Self {
        SmtTerm::Eq(Box::new(self), Box::new(other))
    }

    pub fn lt(self, other: SmtTerm) -> Self {
        SmtTerm::Lt(Box::new(self), Box::new(other))
    }

    pub fn le(self, other: SmtTerm) -> Self {
        SmtTerm::Le(Box::new(self), Box::new(other))
    }

    pub fn gt(self, other: SmtTerm) -> Self {
        SmtTerm::Gt(Box::new(self), Box::new(other))
    }

    pub fn ge(self, other: SmtTerm) -> Self {
        SmtTerm::Ge(Box::new(self), Box::new(other))
    }

    pub fn and(terms: Vec<SmtTerm>) -> Self {
        SmtTerm::And(terms)
    }

    pub fn or(terms: Vec<SmtTerm>) -> Self {
        SmtTerm::Or(terms)
    }

    pub fn not(self) -> Self {
        SmtTerm::Not(Box::new(self))
    }

    pub fn implies(self, other: SmtTerm) -> Self {
        SmtTerm::Implies(Box::new(self), Box::new(other))
    }

    pub fn ite(cond: SmtTerm, then: SmtTerm, els: SmtTerm) -> Self {
        SmtTerm::Ite(Box::new(cond), Box::new(then), Box::new(els))
    }

    /// Existential over real variables; an empty binder list is the body itself.
    pub fn exists(vars: Vec<String>, body: SmtTerm) -> Self {
        if vars.is_empty() {
            return body;
        }
        let bindings = vars.into_iter().map(|v| (v, SmtSort::Real)).collect();
        SmtTerm::Exists(bindings, Box::new(body))
    }

    /// True if the term contains a quantifier anywhere.
    pub fn has_quantifier(&self) -> bool {
        match self {
            SmtTerm::Exists(..) => true,
            SmtTerm::Var(_) | SmtTerm::RealLit(_) | SmtTerm::BoolLit(_) => false,
            SmtTerm::Neg(inner) | SmtTerm::Not(inner) => inner.has_quantifier(),
            SmtTerm::Add(l, r)
            | SmtTerm::Sub(l, r)
            | SmtTerm::Mul(l, r)
            | SmtTerm::Div(l, r)
            | SmtTerm::Eq(l, r)
            | SmtTerm::Lt(l, r)
            | SmtTerm::Le(l, r)
            | SmtTerm::Gt(l, r)
            | SmtTerm::Ge(l, r)
            | SmtTerm::Implies(l, r) => l.has_quantifier() || r.has_quantifier(),
            SmtTerm::And(terms) | SmtTerm::Or(terms) => terms.iter().any(SmtTerm::has_quantifier),
            SmtTerm::Ite(c, t, e) => c.has_quantifier() || t.has_quantifier() || e.has_quantifier(),
        }
    }

    /// The first NaN or infinite literal, in pre-order. Such a value has no
    /// SMT-LIB rendering and no meaning to a solver.
    pub fn first_non_finite(&self) -> Option<f64> {
        match self {
            SmtTerm::RealLit(v) if !v.is_finite() => Some(*v),
            SmtTerm::Var(_) | SmtTerm::RealLit(_) | SmtTerm::BoolLit(_) => None,
            SmtTerm::Neg(inner) | SmtTerm::Not(inner) | SmtTerm::Exists(_, inner) => {
                inner.first_non_finite()
            }
            SmtTerm::Add(l, r)
            | SmtTerm::Sub(l, r)
            | SmtTerm::Mul(l, r)
            | SmtTerm::Div(l, r)
            | SmtTerm::Eq(l, r)
            | SmtTerm::Lt(l, r)
            | SmtTerm::Le(l, r)
            | SmtTerm::Gt(l, r)
            | SmtTerm::Ge(l, r)
            | SmtTerm::Implies(l, r) => l.first_non_finite().or_else(|| r.first_non_finite()),
            SmtTerm::And(terms) | SmtTerm::Or(terms) => {
                terms.iter().find_map(SmtTerm::first_non_finite)
            }
            SmtTerm::Ite(c, t, e) => c
                .first_non_finite()
                .or_else(|| t.first_non_finite())
                .or_else(|| e.first_non_finite()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_arithmetic_folds() {
        let t = SmtTerm::real(2.0).mul(SmtTerm::real(3.0)).add(SmtTerm::real(1.0));
        assert_eq!(t, SmtTerm::real(7.0));
    }

    #[test]
    fn identities_are_dropped() {
        let x = SmtTerm::var("x");
        assert_eq!(x.clone().add(SmtTerm::zero()), x);
        assert_eq!(SmtTerm::real(1.0).mul(x.clone()), x);
        assert_eq!(x.clone().mul(SmtTerm::zero()), SmtTerm::zero());
        assert_eq!(SmtTerm::zero().sub(x.clone()), x.clone().neg());
        assert_eq!(x.clone().neg().neg(), x);
    }

    #[test]
    fn dot_of_empty_vectors_is_zero() {
        assert_eq!(SmtTerm::dot(&[], &[]), SmtTerm::zero());
    }

    #[test]
    fn empty_binders_do_not_introduce_quantifiers() {
        let body = SmtTerm::var("x").ge(SmtTerm::zero());
        assert_eq!(SmtTerm::exists(vec![], body.clone()), body);
        assert!(!body.has_quantifier());
        assert!(SmtTerm::exists(vec!["u".into()], body).has_quantifier());
    }

    #[test]
    fn non_finite_literals_are_found_under_binders() {
        let x = SmtTerm::var("x");
        let clean = x.clone().mul(SmtTerm::real(2.0)).ge(SmtTerm::zero());
        assert_eq!(clean.first_non_finite(), None);

        let weight = SmtTerm::real(f64::NAN).mul(SmtTerm::var("u"));
        let nested = SmtTerm::exists(
            vec!["u".into()],
            SmtTerm::and(vec![clean.clone(), x.add(weight).le(SmtTerm::real(1.0))]),
        );
        assert!(nested.first_non_finite().is_some_and(f64::is_nan));

        let bound = SmtTerm::ite(clean, SmtTerm::zero(), SmtTerm::real(f64::NEG_INFINITY));
        assert_eq!(bound.first_non_finite(), Some(f64::NEG_INFINITY));
    }
}
