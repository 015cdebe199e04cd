use crate::sorts::SmtSort;
use crate::terms::SmtTerm;

/// Print a real as an SMT-LIB2 decimal. Negative values use unary minus.
pub fn real_to_smtlib(value: f64) -> String {
    let magnitude = decimal(value.abs());
    if value.is_sign_negative() && value != 0.0 {
        format!("(- {magnitude})")
    } else {
        magnitude
    }
}

fn decimal(value: f64) -> String {
    // `Display` for f64 never uses exponent notation.
    let mut s = value.to_string();
    if !s.contains('.') {
        s.push_str(".0");
    }
    s
}

/// Print an SmtTerm as SMT-LIB2 format.
pub fn to_smtlib(term: &SmtTerm) -> String {
    match term {
        SmtTerm::Var(name) => name.clone(),
        SmtTerm::RealLit(v) => real_to_smtlib(*v),
        SmtTerm::BoolLit(b) => {
            if *b {
                "true".to_string()
            } else {
                "false".to_string()
            }
        }
        SmtTerm::Add(lhs, rhs) => format!("(+ {} {})", to_smtlib(lhs), to_smtlib(rhs)),
        SmtTerm::Sub(lhs, rhs) => format!("(- {} {})", to_smtlib(lhs), to_smtlib(rhs)),
        SmtTerm::Mul(lhs, rhs) => format!("(* {} {})", to_smtlib(lhs), to_smtlib(rhs)),
        SmtTerm::Div(lhs, rhs) => format!("(/ {} {})", to_smtlib(lhs), to_smtlib(rhs)),
        SmtTerm::Neg(inner) => format!("(- {})", to_smtlib(inner)),
        SmtTerm::Eq(lhs, rhs) => format!("(= {} {})", to_smtlib(lhs), to_smtlib(rhs)),
        SmtTerm::Lt(lhs, rhs) => format!("(< {} {})", to_smtlib(lhs), to_smtlib(rhs)),
        SmtTerm::Le(lhs, rhs) => format!("(<= {} {})", to_smtlib(lhs), to_smtlib(rhs)),
        SmtTerm::Gt(lhs, rhs) => format!("(> {} {})", to_smtlib(lhs), to_smtlib(rhs)),
        SmtTerm::Ge(lhs, rhs) => format!("(>= {} {})", to_smtlib(lhs), to_smtlib(rhs)),
        SmtTerm::And(terms) => {
            if terms.is_empty() {
                "true".to_string()
            } else if terms.len() == 1 {
                to_smtlib(&terms[0])
            } else {
                let inner: Vec<String> = terms.iter().map(to_smtlib).collect();
                format!("(and {})", inner.join(" "))
            }
        }
        SmtTerm::Or(terms) => {
            if terms.is_empty() {
                "false".to_string()
            } else if terms.len() == 1 {
                to_smtlib(&terms[0])
            } else {
                let inner: Vec<String> = terms.iter().map(to_smtlib).collect();
                format!("(or {})", inner.join(" "))
            }
        }
        SmtTerm::Not(inner) => format!("(not {})", to_smtlib(inner)),
        SmtTerm::Implies(lhs, rhs) => {
            format!("(=> {} {})", to_smtlib(lhs), to_smtlib(rhs))
        }
        SmtTerm::Exists(bindings, body) => {
            let vars: Vec<String> = bindings.iter().map(|(n, s)| format!("({n} {s})")).collect();
            format!("(exists ({}) {})", vars.join(" "), to_smtlib(body))
        }
        SmtTerm::Ite(cond, then, els) => {
            format!(
                "(ite {} {} {})",
                to_smtlib(cond),
                to_smtlib(then),
                to_smtlib(els)
            )
        }
    }
}

/// Print a sort as SMT-LIB2 format.
pub fn sort_to_smtlib(sort: &SmtSort) -> &'static str {
    match sort {
        SmtSort::Bool => "Bool",
        SmtSort::Real => "Real",
    }
}

/// Render a standalone query script (declarations, assertions, check-sat).
pub fn to_script(decls: &[(&str, &SmtSort)], assertions: &[SmtTerm]) -> String {
    let mut out = String::new();
    for (name, sort) in decls {
        out.push_str(&format!("(declare-const {name} {})\n", sort_to_smtlib(sort)));
    }
    for assertion in assertions {
        out.push_str(&format!("(assert {})\n", to_smtlib(assertion)));
    }
    out.push_str("(check-sat)\n(get-model)\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn print_simple_term() {
        let term = SmtTerm::var("x").add(SmtTerm::real(1.0)).ge(SmtTerm::zero());
        assert_eq!(to_smtlib(&term), "(>= (+ x 1.0) 0.0)");
    }

    #[test]
    fn print_and_term() {
        let term = SmtTerm::and(vec![
            SmtTerm::var("a").gt(SmtTerm::zero()),
            SmtTerm::var("b").lt(SmtTerm::real(10.0)),
        ]);
        assert_eq!(to_smtlib(&term), "(and (> a 0.0) (< b 10.0))");
    }

    #[test]
    fn print_small_and_negative_reals_without_exponent() {
        assert_eq!(real_to_smtlib(1e-6), "0.000001");
        assert_eq!(real_to_smtlib(-2.5), "(- 2.5)");
        assert_eq!(real_to_smtlib(-0.0), "0.0");
    }

    #[test]
    fn print_existential_over_reals() {
        let term = SmtTerm::exists(
            vec!["u0".into()],
            SmtTerm::var("u0").le(SmtTerm::real(1.0)),
        );
        assert_eq!(to_smtlib(&term), "(exists ((u0 Real)) (<= u0 1.0))");
    }

    #[test]
    fn script_declares_before_asserting() {
        let script = to_script(
            &[("x0", &SmtSort::Real)],
            &[SmtTerm::var("x0").ge(SmtTerm::zero())],
        );
        assert_eq!(
            script,
            "(declare-const x0 Real)\n(assert (>= x0 0.0))\n(check-sat)\n(get-model)\n"
        );
    }
}
