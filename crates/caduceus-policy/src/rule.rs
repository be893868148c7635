//! Policy and rule configuration schema.
//!
//! A `PolicySet` is deserialized from TOML and compiled into
//! `CompiledPolicy` values at registration: condition strings become
//! `Condition` trees and directive strings become typed `Directive` lists.
//! Policies are registered once at startup and are read-only during
//! evaluation.
//!
//! Example:
//! ```toml
//! [[policies]]
//! id = "hipaa"
//! framework = "HIPAA"
//! description = "HIPAA privacy and security rules"
//!
//! [[policies.rules]]
//! id = "phi-read-mfa"
//! description = "Reading PHI requires MFA"
//! applies_to = "access"
//! condition = 'classification == "phi" && action == "read"'
//! directives = "require-authentication, require-mfa, log-access"
//! severity = "high"
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use caduceus_contracts::classification::TransformationKind;
use caduceus_contracts::compliance::Severity;
use caduceus_contracts::error::{CaduceusError, CaduceusResult};

use crate::condition::Condition;

/// Which evaluation path a rule participates in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuleKind {
    /// Evaluated by `evaluate_access`; directives are requirements.
    Access,
    /// Evaluated by `evaluate_data_handling`; directives are
    /// transformations.
    DataHandling,
}

/// One parsed directive from a rule's `directives` string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    /// The actor must be authenticated. Follow-up: "authenticate".
    RequireAuthentication,
    /// The actor must have verified a second factor. Follow-up:
    /// "enable-mfa".
    RequireMfa,
    /// The request must declare a purpose and a bounded field list.
    /// Follow-up: "restrict-fields".
    MinimumNecessary,
    /// Emit an audit entry naming the rule when it matches.
    LogAccess,
    /// The security layer must apply this transformation.
    Transform(TransformationKind),
}

/// Parse a comma-separated directive string.
///
/// Unknown directives are logged and skipped — one bad word should not
/// invalidate an otherwise sound policy file.
pub fn parse_directives(raw: &str) -> Vec<Directive> {
    let mut out = Vec::new();
    for word in raw.split(',') {
        let word = word.trim().to_ascii_lowercase();
        if word.is_empty() {
            continue;
        }
        let directive = match word.as_str() {
            "require-authentication" | "require-auth" => Directive::RequireAuthentication,
            "require-mfa" | "require-multi-factor" => Directive::RequireMfa,
            "minimum-necessary" | "check-minimum-necessary" => Directive::MinimumNecessary,
            "log-access" => Directive::LogAccess,
            "sanitize" => Directive::Transform(TransformationKind::Sanitize),
            "tokenize" => Directive::Transform(TransformationKind::Tokenize),
            "encrypt" => Directive::Transform(TransformationKind::Encrypt),
            "anonymize" => Directive::Transform(TransformationKind::Anonymize),
            "pseudonymize" => Directive::Transform(TransformationKind::Pseudonymize),
            other => {
                warn!(directive = %other, "unknown policy directive; skipped");
                continue;
            }
        };
        out.push(directive);
    }
    out
}

// ── Raw TOML schema ───────────────────────────────────────────────────────────

/// The top-level structure deserialized from a TOML policy file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicySet {
    pub policies: Vec<PolicyConfig>,
}

/// A policy groups rules under a named regulatory framework.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Stable identifier used in violation records.
    pub id: String,
    /// The framework this policy implements, e.g. "HIPAA", "GDPR", "CMMC".
    pub framework: String,
    pub description: String,
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

/// One rule as written in TOML, before compilation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Stable identifier used in violation records and audit entries.
    pub id: String,
    pub description: String,
    pub applies_to: RuleKind,
    /// Condition expression; empty or "always" matches everything.
    #[serde(default)]
    pub condition: String,
    /// Comma-separated directive string.
    pub directives: String,
    #[serde(default = "default_severity")]
    pub severity: Severity,
}

fn default_severity() -> Severity {
    Severity::Medium
}

impl PolicySet {
    /// Parse `s` as TOML.
    ///
    /// Returns `CaduceusError::Config` if the TOML is malformed or does
    /// not match the expected schema.
    pub fn from_toml_str(s: &str) -> CaduceusResult<Self> {
        toml::from_str(s).map_err(|e| CaduceusError::Config {
            reason: format!("failed to parse policy TOML: {e}"),
        })
    }

    /// Read the file at `path` and parse it as TOML policy configuration.
    pub fn from_file(path: &Path) -> CaduceusResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| CaduceusError::Config {
            reason: format!("failed to read policy file '{}': {e}", path.display()),
        })?;
        Self::from_toml_str(&contents)
    }
}

// ── Compiled form ─────────────────────────────────────────────────────────────

/// A rule after compilation: typed condition, typed directives.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub id: String,
    pub description: String,
    pub kind: RuleKind,
    pub condition: Condition,
    pub directives: Vec<Directive>,
    pub severity: Severity,
}

/// A policy after compilation.
#[derive(Debug, Clone)]
pub struct CompiledPolicy {
    pub id: String,
    pub framework: String,
    pub description: String,
    pub rules: Vec<CompiledRule>,
}

impl PolicySet {
    /// Compile every policy. A malformed condition fails loudly here, at
    /// registration time, never during evaluation.
    pub fn compile(self) -> CaduceusResult<Vec<CompiledPolicy>> {
        let mut compiled = Vec::with_capacity(self.policies.len());
        for policy in self.policies {
            let mut rules = Vec::with_capacity(policy.rules.len());
            for rule in policy.rules {
                let condition = Condition::parse(&rule.condition).map_err(|e| {
                    CaduceusError::Config {
                        reason: format!("rule '{}': {e}", rule.id),
                    }
                })?;
                rules.push(CompiledRule {
                    id: rule.id,
                    description: rule.description,
                    kind: rule.applies_to,
                    condition,
                    directives: parse_directives(&rule.directives),
                    severity: rule.severity,
                });
            }
            compiled.push(CompiledPolicy {
                id: policy.id,
                framework: policy.framework,
                description: policy.description,
                rules,
            });
        }
        Ok(compiled)
    }
}
