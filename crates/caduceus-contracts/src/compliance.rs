//! Compliance decisions, violations, and the acting principal.
//!
//! The policy engine consumes an `Actor` plus an evaluation context and
//! produces an `AccessDecision` or `HandlingDecision`. Violations are
//! append-only records; resolving one is the only mutation path and
//! requires a remediation note.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classification::TransformationKind;

/// Unique identifier for a recorded compliance violation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ViolationId(pub uuid::Uuid);

impl ViolationId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for ViolationId {
    fn default() -> Self {
        Self::new()
    }
}

/// Severity of a compliance rule or violation.
///
/// `Critical` is a data/audit signal, never a signal to halt the process.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// The principal on whose behalf an operation runs.
///
/// `attributes` carries free-form evaluation context (purpose of use,
/// requested fields, department, …) that policy conditions can address by
/// dotted path, e.g. `actor.attributes.purpose`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    /// Role label, e.g. "physician", "researcher", "billing-clerk".
    pub role: String,
    pub authenticated: bool,
    pub mfa_verified: bool,
    #[serde(default)]
    pub attributes: serde_json::Value,
}

impl Actor {
    /// An authenticated actor with no MFA and no extra attributes.
    pub fn new(id: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: role.into(),
            authenticated: true,
            mfa_verified: false,
            attributes: serde_json::Value::Null,
        }
    }

    pub fn with_mfa(mut self) -> Self {
        self.mfa_verified = true;
        self
    }

    pub fn with_attributes(mut self, attributes: serde_json::Value) -> Self {
        self.attributes = attributes;
        self
    }
}

/// A recorded failure of a compliance rule's requirement.
///
/// Created by the policy engine when a rule's condition matches but one of
/// its requirements is unmet. Append-only; `resolve()` on the violation
/// store is the only mutation and sets `resolved` plus the remediation note.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceViolation {
    pub id: ViolationId,
    /// The policy (framework grouping) the violated rule belongs to.
    pub policy_id: String,
    pub rule_id: String,
    pub severity: Severity,
    /// The actor id the evaluation ran for.
    pub actor: String,
    /// The action name that was evaluated.
    pub action: String,
    /// Free-text description of the unmet requirement.
    pub detail: String,
    pub timestamp: DateTime<Utc>,
    pub resolved: bool,
    pub remediation: Option<String>,
}

impl ComplianceViolation {
    pub fn new(
        policy_id: impl Into<String>,
        rule_id: impl Into<String>,
        severity: Severity,
        actor: impl Into<String>,
        action: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            id: ViolationId::new(),
            policy_id: policy_id.into(),
            rule_id: rule_id.into(),
            severity,
            actor: actor.into(),
            action: action.into(),
            detail: detail.into(),
            timestamp: Utc::now(),
            resolved: false,
            remediation: None,
        }
    }
}

/// The outcome of `evaluate_access`.
///
/// Every matching rule is evaluated — a single call can carry multiple
/// violations and required follow-up actions (e.g. "enable-mfa").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessDecision {
    pub allowed: bool,
    pub violations: Vec<ComplianceViolation>,
    /// Deduplicated follow-up directives for the caller.
    pub required_actions: Vec<String>,
}

impl AccessDecision {
    /// An unconditional allow with nothing outstanding.
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            violations: Vec::new(),
            required_actions: Vec::new(),
        }
    }
}

/// The outcome of `evaluate_data_handling`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlingDecision {
    pub compliant: bool,
    /// Transformations the security layer must apply for the operation to
    /// be compliant, in rule declaration order, deduplicated.
    pub required_transformations: Vec<TransformationKind>,
    pub violations: Vec<ComplianceViolation>,
}
