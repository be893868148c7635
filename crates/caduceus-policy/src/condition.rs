//! The rule condition language.
//!
//! Conditions are written in policy TOML as a minimal expression over
//! dotted paths into the evaluation document:
//!
//!   classification == "phi" && action == "read"
//!
//! Supported: equality (`==`, with `===` accepted as an alias) against a
//! string, number, or boolean literal, and conjunction (`&&`). The
//! expression is compiled ONCE at policy registration into a typed
//! `Condition` tree; malformed expressions fail registration loudly
//! instead of surprising the hot path. Evaluation cannot throw — a missing
//! path or a type mismatch simply evaluates to `false`, the safe default
//! for access-denying purposes.

use serde_json::Value;

use caduceus_contracts::error::{CaduceusError, CaduceusResult};
use caduceus_contracts::paths;

/// A compiled rule condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Matches every document. Spelled `"always"` (or left empty) in TOML.
    Always,
    /// The value at `path` equals `literal`.
    Eq { path: String, literal: Value },
    /// Every sub-condition matches.
    All(Vec<Condition>),
}

impl Condition {
    /// Compile an expression string.
    ///
    /// Returns `CaduceusError::Config` for anything the grammar does not
    /// cover — unbalanced quotes, missing operators, empty paths.
    pub fn parse(expr: &str) -> CaduceusResult<Self> {
        let trimmed = expr.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("always") {
            return Ok(Condition::Always);
        }

        let clauses: Vec<&str> = trimmed.split("&&").collect();
        let mut compiled = Vec::with_capacity(clauses.len());
        for clause in clauses {
            compiled.push(Self::parse_clause(clause.trim())?);
        }

        if compiled.len() == 1 {
            Ok(compiled.remove(0))
        } else {
            Ok(Condition::All(compiled))
        }
    }

    fn parse_clause(clause: &str) -> CaduceusResult<Condition> {
        let bad = |reason: String| CaduceusError::Config { reason };

        // `===` first so splitting on `==` never leaves a dangling `=`.
        let (path, literal) = if let Some((l, r)) = clause.split_once("===") {
            (l, r)
        } else if let Some((l, r)) = clause.split_once("==") {
            (l, r)
        } else {
            return Err(bad(format!(
                "condition clause '{clause}' has no equality operator"
            )));
        };

        let path = path.trim();
        if path.is_empty()
            || !path
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-')
        {
            return Err(bad(format!("condition clause '{clause}' has an invalid path")));
        }

        let literal = Self::parse_literal(literal.trim())
            .ok_or_else(|| bad(format!("condition clause '{clause}' has an invalid literal")))?;

        Ok(Condition::Eq {
            path: path.to_string(),
            literal,
        })
    }

    fn parse_literal(raw: &str) -> Option<Value> {
        if raw.len() >= 2 {
            let bytes = raw.as_bytes();
            if (bytes[0] == b'"' && bytes[raw.len() - 1] == b'"')
                || (bytes[0] == b'\'' && bytes[raw.len() - 1] == b'\'')
            {
                return Some(Value::String(raw[1..raw.len() - 1].to_string()));
            }
        }
        match raw {
            "true" => return Some(Value::Bool(true)),
            "false" => return Some(Value::Bool(false)),
            "" => return None,
            _ => {}
        }
        raw.parse::<f64>()
            .ok()
            .and_then(|n| serde_json::Number::from_f64(n).map(Value::Number))
    }

    /// Evaluate against the document. Never errors; a missing path or a
    /// type mismatch is `false`.
    pub fn evaluate(&self, doc: &Value) -> bool {
        match self {
            Condition::Always => true,
            Condition::All(conditions) => conditions.iter().all(|c| c.evaluate(doc)),
            Condition::Eq { path, literal } => match paths::resolve(doc, path) {
                Some(found) => Self::values_equal(found, literal),
                None => false,
            },
        }
    }

    fn values_equal(found: &Value, literal: &Value) -> bool {
        match (found, literal) {
            // Numbers compare by value so `42` matches `42.0`.
            (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
            (a, b) => a == b,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::Condition;

    #[test]
    fn always_matches_everything() {
        for spelling in ["", "  ", "always", "ALWAYS"] {
            let condition = Condition::parse(spelling).unwrap();
            assert!(condition.evaluate(&json!({})));
            assert!(condition.evaluate(&json!({ "anything": 1 })));
        }
    }

    #[test]
    fn equality_over_dotted_paths() {
        let condition = Condition::parse(r#"actor.role == "physician""#).unwrap();
        assert!(condition.evaluate(&json!({ "actor": { "role": "physician" } })));
        assert!(!condition.evaluate(&json!({ "actor": { "role": "clerk" } })));
    }

    #[test]
    fn triple_equals_is_an_alias() {
        let condition = Condition::parse(r#"classification === "phi""#).unwrap();
        assert!(condition.evaluate(&json!({ "classification": "phi" })));
    }

    #[test]
    fn conjunction_requires_all_clauses() {
        let condition =
            Condition::parse(r#"classification == "phi" && action == "read""#).unwrap();
        assert!(condition.evaluate(&json!({ "classification": "phi", "action": "read" })));
        assert!(!condition.evaluate(&json!({ "classification": "phi", "action": "write" })));
        assert!(!condition.evaluate(&json!({ "action": "read" })));
    }

    #[test]
    fn boolean_and_numeric_literals() {
        let flagged = Condition::parse("actor.mfa_verified == true").unwrap();
        assert!(flagged.evaluate(&json!({ "actor": { "mfa_verified": true } })));
        assert!(!flagged.evaluate(&json!({ "actor": { "mfa_verified": false } })));

        let count = Condition::parse("retries == 3").unwrap();
        assert!(count.evaluate(&json!({ "retries": 3 })));
        assert!(count.evaluate(&json!({ "retries": 3.0 })));
        assert!(!count.evaluate(&json!({ "retries": 4 })));
    }

    #[test]
    fn missing_path_is_false_not_error() {
        let condition = Condition::parse(r#"nested.deep.path == "x""#).unwrap();
        assert!(!condition.evaluate(&json!({})));
        // Type mismatch is also just false.
        let numeric = Condition::parse("field == 7").unwrap();
        assert!(!numeric.evaluate(&json!({ "field": "seven" })));
    }

    #[test]
    fn malformed_expressions_fail_compilation() {
        for bad in [
            "no operator here",
            r#"== "orphan""#,
            "field ==",
            r#"bad path! == "x""#,
            r#"a == "unterminated"#,
        ] {
            assert!(
                Condition::parse(bad).is_err(),
                "expected parse failure for {bad:?}"
            );
        }
    }
}
