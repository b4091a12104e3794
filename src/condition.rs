//! Guard conditions for step `when` fields.
//!
//! Grammar, evaluated strictly left to right with short-circuit:
//!
//! ```text
//! expr    := term (("&&" | "||") term)*
//! term    := operand (("==" | "!=") operand)?
//! operand := template text or a quoted literal
//! ```
//!
//! A bare operand is tested for truthiness; `""`, `"null"`, `"undefined"`
//! and `"false"` are falsy. Operators inside quotes are literal text.

use serde_json::{Map, Value};

use crate::template;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Connective {
    And,
    Or,
}

/// Evaluate a `when` expression against the bindings.
pub fn evaluate(expr: &str, vars: &Map<String, Value>) -> bool {
    let (first, rest) = split_connectives(expr);
    let mut acc = evaluate_term(first, vars);
    for (op, term) in rest {
        acc = match op {
            Connective::And if !acc => false,
            Connective::Or if acc => true,
            _ => evaluate_term(term, vars),
        };
    }
    acc
}

/// Whether a rendered value counts as true.
pub fn is_truthy(text: &str) -> bool {
    !matches!(text.trim(), "" | "null" | "undefined" | "false")
}

fn evaluate_term(term: &str, vars: &Map<String, Value>) -> bool {
    match find_outside_quotes(term, &["==", "!="]) {
        Some((idx, op)) => {
            let left = operand(&term[..idx], vars);
            let right = operand(&term[idx + op.len()..], vars);
            let equal = values_equal(&left, &right);
            if op == "==" {
                equal
            } else {
                !equal
            }
        }
        None => is_truthy(&operand(term, vars)),
    }
}

/// Render an operand: quoted literals lose their quotes, everything else
/// goes through template substitution.
fn operand(text: &str, vars: &Map<String, Value>) -> String {
    let text = text.trim();
    if let Some(inner) = unquote(text) {
        return template::render(inner, vars);
    }
    template::render(text, vars).trim().to_string()
}

fn unquote(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if (first == b'"' || first == b'\'') && first == last {
            return Some(&text[1..text.len() - 1]);
        }
    }
    None
}

/// Numeric comparison when both sides parse as finite numbers, string
/// otherwise. `NaN` and `inf` compare as text.
fn values_equal(left: &str, right: &str) -> bool {
    match (left.parse::<f64>(), right.parse::<f64>()) {
        (Ok(a), Ok(b)) if a.is_finite() && b.is_finite() => a == b,
        _ => left == right,
    }
}

fn split_connectives(expr: &str) -> (&str, Vec<(Connective, &str)>) {
    let mut rest = Vec::new();
    let mut remaining = expr;
    let mut first: Option<&str> = None;
    let mut pending: Option<Connective> = None;

    loop {
        let found = find_outside_quotes(remaining, &["&&", "||"]);
        let (term, next) = match found {
            Some((idx, op)) => (&remaining[..idx], Some((idx, op))),
            None => (remaining, None),
        };

        match pending {
            None => first = Some(term),
            Some(op) => rest.push((op, term)),
        }

        match next {
            Some((idx, op)) => {
                pending = Some(if op == "&&" { Connective::And } else { Connective::Or });
                remaining = &remaining[idx + op.len()..];
            }
            None => break,
        }
    }

    (first.unwrap_or(expr), rest)
}

/// Byte index and text of the first operator outside quotes.
fn find_outside_quotes<'o>(text: &str, ops: &[&'o str]) -> Option<(usize, &'o str)> {
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (idx, ch) in text.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == q {
                quote = None;
            }
            continue;
        }
        if ch == '"' || ch == '\'' {
            quote = Some(ch);
            continue;
        }
        if let Some(op) = ops.iter().find(|op| text[idx..].starts_with(**op)) {
            return Some((idx, op));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_equality_with_literal() {
        let b = vars(json!({"label": "greeting"}));
        assert!(evaluate("{label} == 'greeting'", &b));
        assert!(evaluate("{label} == \"greeting\"", &b));
        assert!(!evaluate("{label} != 'greeting'", &b));
        assert!(evaluate("{label} == greeting", &b));
    }

    #[test]
    fn test_numeric_comparison() {
        let b = vars(json!({"n": 5, "f": "5.0"}));
        assert!(evaluate("{n} == 5", &b));
        assert!(evaluate("{n} == 5.0", &b));
        assert!(evaluate("{f} == {n}", &b));
        assert!(evaluate("{n} != '6'", &b));
    }

    #[test]
    fn test_non_finite_numbers_compare_as_text() {
        let b = vars(json!({"x": "NaN", "y": "inf"}));
        assert!(evaluate("{x} == 'NaN'", &b));
        assert!(!evaluate("{x} != 'NaN'", &b));
        assert!(evaluate("{y} == 'inf'", &b));
        assert!(!evaluate("{y} == 'infinity'", &b));
    }

    #[test]
    fn test_truthiness() {
        let b = vars(json!({"t": true, "f": false, "e": "", "z": 0, "nul": null, "s": "undefined"}));
        assert!(evaluate("{t}", &b));
        assert!(!evaluate("{f}", &b));
        assert!(!evaluate("{e}", &b));
        assert!(evaluate("{z}", &b));
        assert!(!evaluate("{nul}", &b));
        assert!(!evaluate("{s}", &b));
        assert!(!evaluate("{missing}", &b));
    }

    #[test]
    fn test_missing_variable_compares_as_empty() {
        let b = vars(json!({}));
        assert!(evaluate("{x} == ''", &b));
        assert!(!evaluate("{x} == 'a'", &b));
    }

    #[test]
    fn test_left_to_right_without_precedence() {
        let b = vars(json!({"t": true, "f": false}));
        // (t || f) && f
        assert!(!evaluate("{t} || {f} && {f}", &b));
        // (f && t) || t
        assert!(evaluate("{f} && {t} || {t}", &b));
        assert!(evaluate("{t} && {t} && {t}", &b));
    }

    #[test]
    fn test_operators_inside_quotes_not_split() {
        let b = vars(json!({"x": "a && b", "y": "p==q"}));
        assert!(evaluate("{x} == 'a && b'", &b));
        assert!(evaluate("{y} == \"p==q\"", &b));
        assert!(evaluate("'a || b' == 'a || b'", &b));
    }

    #[test]
    fn test_split_connectives() {
        let (first, rest) = split_connectives("a && b || c");
        assert_eq!(first, "a ");
        assert_eq!(rest, vec![(Connective::And, " b "), (Connective::Or, " c")]);
    }
}
