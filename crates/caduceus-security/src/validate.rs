//! Declared-rule validation for inbound payloads.
//!
//! Validation runs in two phases, mirroring the rest of the pipeline's
//! collect-everything discipline:
//!
//! 1. **Structural** — `Schema` rules validate the whole payload against a
//!    JSON Schema document via the `jsonschema` crate.
//! 2. **Per-field** — `Required`, `Format`, `Range`, and `Custom` rules
//!    evaluate against individual dotted-path fields.
//!
//! All failures are collected before returning so callers see the full
//! failure set in one pass. Only rules marked `mandatory` abort the
//! operation; the rest surface as metadata.

use std::collections::HashMap;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use caduceus_contracts::paths;

/// A caller-supplied validation function.
///
/// Receives the field's value. Returns `Some(message)` when the check
/// fails with a human-readable explanation, or `None` on success.
pub type CustomValidatorFn = Box<dyn Fn(&Value) -> Option<String> + Send + Sync>;

/// What a single rule checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "kind")]
pub enum ValidationKind {
    /// The field must be present and non-null.
    Required,
    /// The field's string form must match `pattern` in full.
    Format { pattern: String },
    /// The field must be numeric and fall within the closed range.
    Range { min: Option<f64>, max: Option<f64> },
    /// The whole payload must validate against this JSON Schema document.
    Schema { schema: Value },
    /// Delegate to the named registered function.
    Custom { name: String },
}

/// One validation rule over a payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationRule {
    /// Dotted field path. Ignored by `Schema` rules, which see the payload.
    pub field: String,
    #[serde(flatten)]
    pub kind: ValidationKind,
    /// When true, a failure aborts processing before any side effect.
    #[serde(default)]
    pub mandatory: bool,
}

/// One collected failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationFailure {
    pub field: String,
    pub message: String,
    /// Whether the failing rule was mandatory.
    pub mandatory: bool,
}

/// Evaluates validation rules against payloads.
///
/// Custom rules are registered at startup by the hosting application —
/// domain knowledge stays out of the security core.
pub struct Validator {
    custom: HashMap<String, CustomValidatorFn>,
}

impl Validator {
    pub fn new() -> Self {
        Self {
            custom: HashMap::new(),
        }
    }

    /// Register a custom validation function under `name`.
    ///
    /// The name must match `ValidationKind::Custom { name }`. Registering
    /// the same name twice replaces the previous function.
    pub fn register(&mut self, name: impl Into<String>, f: CustomValidatorFn) {
        self.custom.insert(name.into(), f);
    }

    /// Evaluate every rule; return all failures in rule order.
    pub fn run(&self, data: &Value, rules: &[ValidationRule]) -> Vec<ValidationFailure> {
        let mut failures = Vec::new();

        for rule in rules {
            match &rule.kind {
                ValidationKind::Schema { schema } => {
                    self.check_schema(data, schema, rule, &mut failures);
                }
                _ => self.check_field(data, rule, &mut failures),
            }
        }

        failures
    }

    fn check_schema(
        &self,
        data: &Value,
        schema: &Value,
        rule: &ValidationRule,
        failures: &mut Vec<ValidationFailure>,
    ) {
        match jsonschema::validator_for(schema) {
            Ok(validator) => {
                for error in validator.iter_errors(data) {
                    failures.push(ValidationFailure {
                        field: error.instance_path.to_string(),
                        message: format!("schema violation: {error}"),
                        mandatory: rule.mandatory,
                    });
                }
            }
            Err(e) => {
                // A malformed schema document is a configuration problem;
                // record it as a single failure so the run stays inspectable.
                warn!(error = %e, "validation schema document is itself invalid");
                failures.push(ValidationFailure {
                    field: rule.field.clone(),
                    message: format!("invalid schema document: {e}"),
                    mandatory: rule.mandatory,
                });
            }
        }
    }

    fn check_field(
        &self,
        data: &Value,
        rule: &ValidationRule,
        failures: &mut Vec<ValidationFailure>,
    ) {
        let value = paths::resolve(data, &rule.field);
        let mut fail = |message: String| {
            failures.push(ValidationFailure {
                field: rule.field.clone(),
                message,
                mandatory: rule.mandatory,
            });
        };

        match &rule.kind {
            ValidationKind::Required => {
                if value.is_none() {
                    fail("required field is missing".to_string());
                }
            }

            ValidationKind::Format { pattern } => {
                let Some(value) = value else { return };
                match Regex::new(&format!("^(?:{pattern})$")) {
                    Ok(re) => {
                        let text = match value.as_str() {
                            Some(s) => s.to_string(),
                            None => value.to_string(),
                        };
                        if !re.is_match(&text) {
                            fail(format!("value does not match format '{pattern}'"));
                        }
                    }
                    Err(e) => fail(format!("invalid format pattern '{pattern}': {e}")),
                }
            }

            ValidationKind::Range { min, max } => {
                let Some(value) = value else { return };
                match value.as_f64() {
                    Some(n) => {
                        if min.map_or(false, |lo| n < lo) || max.map_or(false, |hi| n > hi) {
                            fail(format!(
                                "value {n} outside range [{}, {}]",
                                min.map_or("-inf".to_string(), |v| v.to_string()),
                                max.map_or("+inf".to_string(), |v| v.to_string()),
                            ));
                        }
                    }
                    None => fail("value is not numeric".to_string()),
                }
            }

            ValidationKind::Custom { name } => {
                let Some(value) = value else { return };
                match self.custom.get(name) {
                    Some(f) => {
                        if let Some(message) = f(value) {
                            fail(message);
                        }
                    }
                    None => {
                        warn!(rule = %name, "custom validator not registered");
                        fail(format!("custom validator '{name}' is not registered"));
                    }
                }
            }

            // Handled in run().
            ValidationKind::Schema { .. } => {}
        }
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}
