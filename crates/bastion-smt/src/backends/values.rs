//! Parsing of solver-printed values (`get-value` responses, model literals).

use crate::solver::ModelValue;
use crate::sorts::SmtSort;

#[derive(Debug, Clone, PartialEq)]
enum Sexp {
    Atom(String),
    List(Vec<Sexp>),
}

fn tokenize(input: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut buf = String::new();
    let mut in_quoted_symbol = false;
    for ch in input.chars() {
        match ch {
            '|' => {
                in_quoted_symbol = !in_quoted_symbol;
                buf.push(ch);
            }
            '(' | ')' if !in_quoted_symbol => {
                if !buf.is_empty() {
                    out.push(std::mem::take(&mut buf));
                }
                out.push(ch.to_string());
            }
            c if c.is_whitespace() && !in_quoted_symbol => {
                if !buf.is_empty() {
                    out.push(std::mem::take(&mut buf));
                }
            }
            other => buf.push(other),
        }
    }
    if !buf.is_empty() {
        out.push(buf);
    }
    out
}

fn parse_tokens(tokens: &[String], pos: &mut usize) -> Option<Sexp> {
    let token = tokens.get(*pos)?;
    *pos += 1;
    match token.as_str() {
        "(" => {
            let mut items = Vec::new();
            loop {
                match tokens.get(*pos)?.as_str() {
                    ")" => {
                        *pos += 1;
                        return Some(Sexp::List(items));
                    }
                    _ => items.push(parse_tokens(tokens, pos)?),
                }
            }
        }
        ")" => None,
        atom => Some(Sexp::Atom(atom.to_string())),
    }
}

fn parse_sexp(input: &str) -> Option<Sexp> {
    let tokens = tokenize(input);
    let mut pos = 0;
    let sexp = parse_tokens(&tokens, &mut pos)?;
    (pos == tokens.len()).then_some(sexp)
}

fn real_of(sexp: &Sexp) -> Option<f64> {
    match sexp {
        // z3 marks truncated decimals of irrational values with a trailing `?`.
        Sexp::Atom(atom) => atom.trim_end_matches('?').parse::<f64>().ok(),
        Sexp::List(items) => {
            let (head, args) = items.split_first()?;
            let Sexp::Atom(op) = head else {
                return None;
            };
            let args: Option<Vec<f64>> = args.iter().map(real_of).collect();
            let args = args?;
            match (op.as_str(), args.as_slice()) {
                ("-", [x]) => Some(-x),
                ("-", [x, rest @ ..]) => Some(rest.iter().fold(*x, |acc, v| acc - v)),
                ("+", _) => Some(args.iter().sum()),
                ("*", _) => Some(args.iter().product()),
                ("/", [a, b]) => Some(a / b),
                _ => None,
            }
        }
    }
}

/// Parse a single printed value of the given sort.
pub fn parse_value(text: &str, sort: &SmtSort) -> Option<ModelValue> {
    let sexp = parse_sexp(text.trim())?;
    value_of(&sexp, sort)
}

fn value_of(sexp: &Sexp, sort: &SmtSort) -> Option<ModelValue> {
    match sort {
        SmtSort::Real => real_of(sexp).map(ModelValue::Real),
        SmtSort::Bool => match sexp {
            Sexp::Atom(a) if a == "true" => Some(ModelValue::Bool(true)),
            Sexp::Atom(a) if a == "false" => Some(ModelValue::Bool(false)),
            _ => None,
        },
    }
}

/// Parse a `get-value` response of the form `((name value))`.
pub fn parse_get_value_response(response: &str, name: &str, sort: &SmtSort) -> Option<ModelValue> {
    let Sexp::List(pairs) = parse_sexp(response.trim())? else {
        return None;
    };
    pairs.iter().find_map(|pair| match pair {
        Sexp::List(items) if items.len() == 2 => match &items[0] {
            Sexp::Atom(n) if n.trim_matches('|') == name => value_of(&items[1], sort),
            _ => None,
        },
        _ => None,
    })
}

/// True once every opened parenthesis in `text` has been closed.
pub fn parens_balanced(text: &str) -> bool {
    let mut depth: i64 = 0;
    let mut in_string = false;
    let mut in_quoted_symbol = false;
    for ch in text.chars() {
        match ch {
            '"' if !in_quoted_symbol => in_string = !in_string,
            '|' if !in_string => in_quoted_symbol = !in_quoted_symbol,
            '(' if !in_string && !in_quoted_symbol => depth += 1,
            ')' if !in_string && !in_quoted_symbol => depth -= 1,
            _ => {}
        }
    }
    depth <= 0
}

/// Split a decimal literal into an exact numerator/denominator pair.
pub fn decimal_to_fraction(text: &str) -> Option<(String, String)> {
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let (int_part, frac_part) = digits.split_once('.').unwrap_or((digits, ""));
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    if !int_part.chars().chain(frac_part.chars()).all(|c| c.is_ascii_digit()) {
        return None;
    }
    let mut numerator = format!("{int_part}{frac_part}")
        .trim_start_matches('0')
        .to_string();
    if numerator.is_empty() {
        numerator.push('0');
    }
    if negative && numerator != "0" {
        numerator.insert(0, '-');
    }
    let denominator = format!("1{}", "0".repeat(frac_part.len()));
    Some((numerator, denominator))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn real(text: &str) -> Option<f64> {
        match parse_value(text, &SmtSort::Real) {
            Some(ModelValue::Real(v)) => Some(v),
            _ => None,
        }
    }

    #[test]
    fn parses_plain_and_negative_decimals() {
        assert_eq!(real("1.5"), Some(1.5));
        assert_eq!(real("(- 2.0)"), Some(-2.0));
        assert_eq!(real("3"), Some(3.0));
    }

    #[test]
    fn parses_rationals_and_truncated_decimals() {
        assert_eq!(real("(/ 3.0 2.0)"), Some(1.5));
        assert_eq!(real("(- (/ 1 4))"), Some(-0.25));
        assert_eq!(real("1.4142135623?"), Some(1.4142135623));
    }

    #[test]
    fn algebraic_numbers_are_not_parsed() {
        assert_eq!(real("(root-obj (+ (^ x 2) (- 2)) 1)"), None);
    }

    #[test]
    fn parses_get_value_responses() {
        let v = parse_get_value_response("((x0 (/ 1.0 2.0)))", "x0", &SmtSort::Real);
        assert_eq!(v, Some(ModelValue::Real(0.5)));
        let b = parse_get_value_response("((flag true))", "flag", &SmtSort::Bool);
        assert_eq!(b, Some(ModelValue::Bool(true)));
        assert_eq!(
            parse_get_value_response("((x1 1.0))", "x0", &SmtSort::Real),
            None
        );
    }

    #[test]
    fn balanced_parens_detects_incomplete_responses() {
        assert!(parens_balanced("((x0 1.0))"));
        assert!(!parens_balanced("((x0 (/ 1.0"));
        assert!(parens_balanced("sat"));
    }

    #[test]
    fn decimal_fraction_split() {
        assert_eq!(
            decimal_to_fraction("12.345"),
            Some(("12345".to_string(), "1000".to_string()))
        );
        assert_eq!(
            decimal_to_fraction("-0.5"),
            Some(("-5".to_string(), "10".to_string()))
        );
        assert_eq!(
            decimal_to_fraction("7"),
            Some(("7".to_string(), "1".to_string()))
        );
        assert_eq!(decimal_to_fraction("1e5"), None);
    }
}
