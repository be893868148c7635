//! Compliance policy evaluation.
//!
//! `PolicyEngine` evaluates every operation against every registered
//! policy's rules — deliberately NOT short-circuiting, so a single call
//! can surface multiple violations and required follow-up actions.
//!
//! Evaluation algorithm (both paths):
//!
//! 1. Determine the data classification: an explicit `classification`
//!    context field wins, otherwise the content classifier runs over the
//!    payload, otherwise `internal`.
//! 2. Build the evaluation document `{actor, resource, action,
//!    classification, ...context}`.
//! 3. For every rule of the matching kind whose compiled condition
//!    matches the document, check each directive: requirements either
//!    pass, fail (one violation each, `allowed = false`), or contribute a
//!    follow-up action. Handling rules contribute transformation
//!    directives instead.
//! 4. Violations land in the append-only store, the
//!    `compliance_violation` metric increments, and exactly one decision
//!    audit record is emitted per call.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use caduceus_audit::{AuditSink, MetricsSink};
use caduceus_contracts::audit::{AuditOutcome, AuditRecord};
use caduceus_contracts::classification::DataClassification;
use caduceus_contracts::compliance::{
    AccessDecision, Actor, ComplianceViolation, HandlingDecision,
};
use caduceus_contracts::error::CaduceusResult;
use caduceus_contracts::paths;

use crate::rule::{CompiledPolicy, CompiledRule, Directive, PolicySet, RuleKind};
use crate::violations::ViolationStore;

use caduceus_security::ContentClassifier;

/// The outcome of checking one requirement directive.
struct RequirementFailure {
    detail: String,
    required_action: &'static str,
}

/// The compliance policy engine.
///
/// Policies are registered at startup and read-only afterwards, so
/// evaluation takes `&self` and is safe from concurrent dispatch workers.
pub struct PolicyEngine {
    policies: Vec<CompiledPolicy>,
    classifier: ContentClassifier,
    violations: Arc<ViolationStore>,
    audit: Arc<dyn AuditSink>,
    metrics: Arc<dyn MetricsSink>,
}

impl PolicyEngine {
    pub fn new(audit: Arc<dyn AuditSink>, metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            policies: Vec::new(),
            classifier: ContentClassifier::new(),
            violations: Arc::new(ViolationStore::new()),
            audit,
            metrics,
        }
    }

    /// Compile and register a policy set. Malformed conditions fail here,
    /// never during evaluation.
    pub fn register_set(&mut self, set: PolicySet) -> CaduceusResult<()> {
        let compiled = set.compile()?;
        debug!(policies = compiled.len(), "policy set registered");
        self.policies.extend(compiled);
        Ok(())
    }

    pub fn policies(&self) -> &[CompiledPolicy] {
        &self.policies
    }

    /// Shared handle to the append-only violation store.
    pub fn violations(&self) -> Arc<ViolationStore> {
        Arc::clone(&self.violations)
    }

    // ── Access evaluation ─────────────────────────────────────────────────────

    /// Evaluate whether `actor` may perform `action` on `resource`.
    ///
    /// All matching access rules are evaluated; each failed requirement
    /// produces one violation. The decision is audited exactly once.
    pub fn evaluate_access(
        &self,
        actor: &Actor,
        resource: &str,
        action: &str,
        context: &Value,
    ) -> AccessDecision {
        let classification = self.resolve_classification(context, None);
        let doc = build_document(Some(actor), resource, action, classification, context);

        let mut violations: Vec<ComplianceViolation> = Vec::new();
        let mut required_actions: Vec<String> = Vec::new();
        let mut logged_rules: Vec<String> = Vec::new();

        for (policy, rule) in self.rules_of_kind(RuleKind::Access) {
            if !rule.condition.evaluate(&doc) {
                continue;
            }
            debug!(rule_id = %rule.id, action = %action, resource = %resource, "access rule matched");

            for directive in &rule.directives {
                match directive {
                    Directive::LogAccess => logged_rules.push(rule.id.clone()),

                    Directive::Transform(kind) => warn!(
                        rule_id = %rule.id,
                        kind = %kind,
                        "transformation directive in access rule; ignored"
                    ),

                    requirement => {
                        if let Some(failure) = check_requirement(requirement, &doc) {
                            violations.push(ComplianceViolation::new(
                                &policy.id,
                                &rule.id,
                                rule.severity,
                                &actor.id,
                                action,
                                failure.detail,
                            ));
                            required_actions.push(failure.required_action.to_string());
                        }
                    }
                }
            }
        }

        dedup_in_order(&mut required_actions);
        self.record_violations(&violations);

        let allowed = violations.is_empty();
        let outcome = if allowed {
            AuditOutcome::Allowed
        } else {
            AuditOutcome::Denied {
                reason: format!("{} rule requirement(s) unmet", violations.len()),
            }
        };
        self.audit.record(
            AuditRecord::new(&actor.id, action, resource, outcome)
                .with_classification(classification)
                .with_detail(decision_detail(&violations, &logged_rules)),
        );

        AccessDecision {
            allowed,
            violations,
            required_actions,
        }
    }

    // ── Data-handling evaluation ──────────────────────────────────────────────

    /// Evaluate which transformations `operation` must apply to `data`.
    ///
    /// The same evaluation path as access, over rules whose directive
    /// vocabulary is transformations. Requirement directives in handling
    /// rules are checked against the document (the actor, when relevant,
    /// rides in on the context).
    pub fn evaluate_data_handling(
        &self,
        operation: &str,
        data: &Value,
        context: &Value,
    ) -> HandlingDecision {
        let classification = self.resolve_classification(context, Some(data));
        let mut doc = build_document(None, "payload", operation, classification, context);
        if let Some(map) = doc.as_object_mut() {
            map.insert("operation".to_string(), Value::String(operation.to_string()));
            map.insert("data".to_string(), data.clone());
        }

        let actor_id = paths::resolve(&doc, "actor.id")
            .and_then(|v| v.as_str())
            .unwrap_or("system")
            .to_string();

        let mut violations: Vec<ComplianceViolation> = Vec::new();
        let mut transformations = Vec::new();
        let mut logged_rules: Vec<String> = Vec::new();

        for (policy, rule) in self.rules_of_kind(RuleKind::DataHandling) {
            if !rule.condition.evaluate(&doc) {
                continue;
            }
            debug!(rule_id = %rule.id, operation = %operation, "data-handling rule matched");

            for directive in &rule.directives {
                match directive {
                    Directive::Transform(kind) => {
                        if !transformations.contains(kind) {
                            transformations.push(*kind);
                        }
                    }

                    Directive::LogAccess => logged_rules.push(rule.id.clone()),

                    requirement => {
                        if let Some(failure) = check_requirement(requirement, &doc) {
                            violations.push(ComplianceViolation::new(
                                &policy.id,
                                &rule.id,
                                rule.severity,
                                &actor_id,
                                operation,
                                failure.detail,
                            ));
                        }
                    }
                }
            }
        }

        self.record_violations(&violations);

        let compliant = violations.is_empty();
        let outcome = if compliant {
            AuditOutcome::Allowed
        } else {
            AuditOutcome::Denied {
                reason: format!("{} rule requirement(s) unmet", violations.len()),
            }
        };
        self.audit.record(
            AuditRecord::new(&actor_id, operation, "payload", outcome)
                .with_classification(classification)
                .with_detail(decision_detail(&violations, &logged_rules)),
        );

        HandlingDecision {
            compliant,
            required_transformations: transformations,
            violations,
        }
    }

    // ── Internal helpers ──────────────────────────────────────────────────────

    fn rules_of_kind(
        &self,
        kind: RuleKind,
    ) -> impl Iterator<Item = (&CompiledPolicy, &CompiledRule)> {
        self.policies.iter().flat_map(move |policy| {
            policy
                .rules
                .iter()
                .filter(move |rule| rule.kind == kind)
                .map(move |rule| (policy, rule))
        })
    }

    /// An explicit `classification` context field wins; otherwise the
    /// content classifier runs over `data` (parameter or context field);
    /// otherwise `Internal`.
    fn resolve_classification(
        &self,
        context: &Value,
        data: Option<&Value>,
    ) -> DataClassification {
        if let Some(tag) = context.get("classification").and_then(|v| v.as_str()) {
            if let Ok(parsed) =
                serde_json::from_value::<DataClassification>(Value::String(tag.to_string()))
            {
                return parsed;
            }
            warn!(classification = %tag, "unknown classification tag in context; reclassifying");
        }

        if let Some(payload) = data.or_else(|| context.get("data")) {
            return self.classifier.classify(payload);
        }

        DataClassification::Internal
    }

    fn record_violations(&self, violations: &[ComplianceViolation]) {
        for violation in violations {
            self.violations.append(violation.clone());
            self.metrics.incr(
                "compliance_violation",
                &[
                    ("rule", violation.rule_id.as_str()),
                    ("severity", &violation.severity.to_string()),
                ],
            );
        }
    }
}

/// Assemble `{actor, resource, action, classification, ...context}`.
fn build_document(
    actor: Option<&Actor>,
    resource: &str,
    action: &str,
    classification: DataClassification,
    context: &Value,
) -> Value {
    let mut map = match context {
        Value::Object(m) => m.clone(),
        Value::Null => Map::new(),
        other => {
            let mut m = Map::new();
            m.insert("context".to_string(), other.clone());
            m
        }
    };

    if let Some(actor) = actor {
        map.insert(
            "actor".to_string(),
            serde_json::to_value(actor).unwrap_or(Value::Null),
        );
    }
    map.insert("resource".to_string(), Value::String(resource.to_string()));
    map.insert("action".to_string(), Value::String(action.to_string()));
    map.insert(
        "classification".to_string(),
        Value::String(classification.to_string()),
    );

    Value::Object(map)
}

/// Check one requirement directive against the evaluation document.
///
/// Returns `None` when satisfied. Absence of the relevant fields is a
/// failure — requirements never pass by default.
fn check_requirement(directive: &Directive, doc: &Value) -> Option<RequirementFailure> {
    match directive {
        Directive::RequireAuthentication => {
            let authenticated = paths::resolve(doc, "actor.authenticated")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            if authenticated {
                None
            } else {
                Some(RequirementFailure {
                    detail: "actor is not authenticated".to_string(),
                    required_action: "authenticate",
                })
            }
        }

        Directive::RequireMfa => {
            let verified = paths::resolve(doc, "actor.mfa_verified")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            if verified {
                None
            } else {
                Some(RequirementFailure {
                    detail: "multi-factor authentication is not verified".to_string(),
                    required_action: "enable-mfa",
                })
            }
        }

        Directive::MinimumNecessary => {
            let purpose = paths::resolve(doc, "purpose")
                .or_else(|| paths::resolve(doc, "actor.attributes.purpose"))
                .and_then(|v| v.as_str())
                .map_or(false, |p| !p.trim().is_empty());
            let bounded_fields = paths::resolve(doc, "fields_requested")
                .or_else(|| paths::resolve(doc, "actor.attributes.fields_requested"))
                .and_then(|v| v.as_array())
                .map_or(false, |fields| {
                    !fields.is_empty() && !fields.iter().any(|f| f.as_str() == Some("*"))
                });

            if purpose && bounded_fields {
                None
            } else {
                Some(RequirementFailure {
                    detail: "request does not declare a purpose and bounded field list"
                        .to_string(),
                    required_action: "restrict-fields",
                })
            }
        }

        // Not requirements; handled by the callers.
        Directive::LogAccess | Directive::Transform(_) => None,
    }
}

fn dedup_in_order(items: &mut Vec<String>) {
    let mut seen = std::collections::HashSet::new();
    items.retain(|item| seen.insert(item.clone()));
}

fn decision_detail(violations: &[ComplianceViolation], logged_rules: &[String]) -> String {
    let mut parts = Vec::new();
    if !violations.is_empty() {
        let rules: Vec<&str> = violations.iter().map(|v| v.rule_id.as_str()).collect();
        parts.push(format!("violated rules: {}", rules.join(", ")));
    }
    if !logged_rules.is_empty() {
        parts.push(format!("logged by rules: {}", logged_rules.join(", ")));
    }
    if parts.is_empty() {
        "no rules matched with requirements".to_string()
    } else {
        parts.join("; ")
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use caduceus_audit::{AuditSink, BufferedAuditSink, ChainedAuditLog, InMemoryMetrics};
    use caduceus_contracts::classification::TransformationKind;
    use caduceus_contracts::compliance::Actor;

    use crate::rule::PolicySet;

    use super::PolicyEngine;

    const HIPAA_ACCESS: &str = r#"
        [[policies]]
        id = "hipaa"
        framework = "HIPAA"
        description = "HIPAA access rules"

        [[policies.rules]]
        id = "phi-read-mfa"
        description = "Reading PHI requires MFA"
        applies_to = "access"
        condition = 'classification == "phi" && action == "read"'
        directives = "require-mfa, log-access"
        severity = "high"

        [[policies.rules]]
        id = "phi-read-auth"
        description = "Reading PHI requires authentication"
        applies_to = "access"
        condition = 'classification == "phi" && action == "read"'
        directives = "require-authentication"
        severity = "critical"
    "#;

    const HIPAA_HANDLING: &str = r#"
        [[policies]]
        id = "hipaa"
        framework = "HIPAA"
        description = "HIPAA handling rules"

        [[policies.rules]]
        id = "phi-encrypt-at-rest"
        description = "PHI must be encrypted before storage"
        applies_to = "data-handling"
        condition = 'classification == "phi"'
        directives = "encrypt, log-access"
        severity = "critical"

        [[policies.rules]]
        id = "phi-store-encrypted"
        description = "Duplicate encrypt directive from a second rule"
        applies_to = "data-handling"
        condition = 'operation == "store"'
        directives = "encrypt, pseudonymize"
    "#;

    fn engine(toml: &str) -> (PolicyEngine, Arc<ChainedAuditLog>, Arc<InMemoryMetrics>) {
        let log = Arc::new(ChainedAuditLog::new());
        let sink = Arc::new(BufferedAuditSink::new(Arc::clone(&log), 1));
        let metrics = Arc::new(InMemoryMetrics::new());
        let mut engine =
            PolicyEngine::new(sink as Arc<dyn AuditSink>, Arc::clone(&metrics) as _);
        engine
            .register_set(PolicySet::from_toml_str(toml).unwrap())
            .unwrap();
        (engine, log, metrics)
    }

    /// End-to-end MFA scenario: an actor without MFA reading PHI is denied
    /// with a violation naming the rule and an "enable-mfa" follow-up.
    #[test]
    fn test_phi_read_without_mfa_denied() {
        let (engine, _log, _metrics) = engine(HIPAA_ACCESS);
        let actor = Actor::new("dr-chen", "physician"); // authenticated, no MFA

        let decision = engine.evaluate_access(
            &actor,
            "patient/1001",
            "read",
            &json!({ "classification": "phi" }),
        );

        assert!(!decision.allowed);
        assert_eq!(decision.violations.len(), 1);
        assert_eq!(decision.violations[0].rule_id, "phi-read-mfa");
        assert!(decision.required_actions.contains(&"enable-mfa".to_string()));
    }

    /// Two independent rule requirements failing in one call yield exactly
    /// two violations, both referencing the same actor and action.
    #[test]
    fn test_two_failed_requirements_two_violations() {
        let (engine, _log, metrics) = engine(HIPAA_ACCESS);
        let mut actor = Actor::new("intruder", "unknown");
        actor.authenticated = false;

        let decision = engine.evaluate_access(
            &actor,
            "patient/1001",
            "read",
            &json!({ "classification": "phi" }),
        );

        assert!(!decision.allowed);
        assert_eq!(decision.violations.len(), 2);
        for violation in &decision.violations {
            assert_eq!(violation.actor, "intruder");
            assert_eq!(violation.action, "read");
        }
        // Both land in the store and the metric.
        assert_eq!(engine.violations().active().len(), 2);
        assert_eq!(metrics.total("compliance_violation"), 2);
    }

    /// With every requirement satisfied the same call is allowed and
    /// records nothing.
    #[test]
    fn test_satisfied_requirements_allow() {
        let (engine, _log, _metrics) = engine(HIPAA_ACCESS);
        let actor = Actor::new("dr-chen", "physician").with_mfa();

        let decision = engine.evaluate_access(
            &actor,
            "patient/1001",
            "read",
            &json!({ "classification": "phi" }),
        );

        assert!(decision.allowed);
        assert!(decision.violations.is_empty());
        assert!(engine.violations().is_empty());
    }

    /// Denial is monotonic: adding more context fields never flips a
    /// denial to allowed.
    #[test]
    fn test_denial_monotonic_under_added_context() {
        let (engine, _log, _metrics) = engine(HIPAA_ACCESS);
        let actor = Actor::new("dr-chen", "physician"); // no MFA

        let base = engine.evaluate_access(
            &actor,
            "patient/1001",
            "read",
            &json!({ "classification": "phi" }),
        );
        assert!(!base.allowed);

        let restricted = engine.evaluate_access(
            &actor,
            "patient/1001",
            "read",
            &json!({
                "classification": "phi",
                "department": "external-research",
                "after_hours": true,
            }),
        );
        assert!(!restricted.allowed, "extra context must not flip a denial");
    }

    /// A non-matching condition leaves the call allowed; rules for other
    /// actions never fire.
    #[test]
    fn test_non_matching_condition_is_allowed() {
        let (engine, _log, _metrics) = engine(HIPAA_ACCESS);
        let actor = Actor::new("dr-chen", "physician");

        let decision = engine.evaluate_access(
            &actor,
            "schedule/today",
            "read",
            &json!({ "classification": "internal" }),
        );

        assert!(decision.allowed);
        assert!(decision.violations.is_empty());
    }

    /// Classification falls back to the content classifier when the
    /// context carries data instead of a tag.
    #[test]
    fn test_classifier_fallback() {
        let (engine, _log, _metrics) = engine(HIPAA_ACCESS);
        let actor = Actor::new("dr-chen", "physician"); // no MFA

        let decision = engine.evaluate_access(
            &actor,
            "patient/1001",
            "read",
            &json!({ "data": { "ssn": "123-45-6789" } }),
        );

        // The classifier tags the payload PHI, so the MFA rule fires.
        assert!(!decision.allowed);
        assert_eq!(decision.violations[0].rule_id, "phi-read-mfa");
    }

    /// Handling rules surface transformation directives, deduplicated
    /// across rules in declaration order.
    #[test]
    fn test_handling_transformations_dedup() {
        let (engine, _log, _metrics) = engine(HIPAA_HANDLING);

        let decision = engine.evaluate_data_handling(
            "store",
            &json!({ "diagnosis": "hypertension" }),
            &json!({}),
        );

        assert!(decision.compliant);
        assert_eq!(
            decision.required_transformations,
            vec![TransformationKind::Encrypt, TransformationKind::Pseudonymize]
        );
    }

    /// Every evaluate call emits exactly one decision audit record.
    #[test]
    fn test_one_decision_record_per_call() {
        let (engine, log, _metrics) = engine(HIPAA_ACCESS);
        let actor = Actor::new("dr-chen", "physician").with_mfa();

        engine.evaluate_access(&actor, "patient/1", "read", &json!({ "classification": "phi" }));
        engine.evaluate_access(&actor, "patient/2", "read", &json!({ "classification": "phi" }));

        assert_eq!(log.len(), 2);
        assert!(log.verify_integrity());
    }

    /// Repeated unmet requirements of the same kind dedup the follow-up
    /// action list but never the violations.
    #[test]
    fn test_required_actions_deduped() {
        let toml = r#"
            [[policies]]
            id = "gdpr"
            framework = "GDPR"
            description = "two rules, both wanting MFA"

            [[policies.rules]]
            id = "rule-a"
            description = "d"
            applies_to = "access"
            condition = 'action == "export"'
            directives = "require-mfa"

            [[policies.rules]]
            id = "rule-b"
            description = "d"
            applies_to = "access"
            condition = 'action == "export"'
            directives = "require-mfa"
        "#;
        let (engine, _log, _metrics) = engine(toml);
        let actor = Actor::new("analyst", "researcher");

        let decision = engine.evaluate_access(&actor, "cohort/42", "export", &json!({}));

        assert_eq!(decision.violations.len(), 2, "violations are per rule");
        assert_eq!(decision.required_actions, vec!["enable-mfa"]);
    }

    /// The minimum-necessary requirement passes only with a purpose and a
    /// bounded field list.
    #[test]
    fn test_minimum_necessary() {
        let toml = r#"
            [[policies]]
            id = "hipaa"
            framework = "HIPAA"
            description = "minimum necessary"

            [[policies.rules]]
            id = "min-necessary"
            description = "PHI reads must be minimum-necessary"
            applies_to = "access"
            condition = 'classification == "phi"'
            directives = "minimum-necessary"
        "#;
        let (engine, _log, _metrics) = engine(toml);
        let actor = Actor::new("dr-chen", "physician").with_mfa();

        let unbounded = engine.evaluate_access(
            &actor,
            "patient/1",
            "read",
            &json!({ "classification": "phi" }),
        );
        assert!(!unbounded.allowed);
        assert_eq!(unbounded.required_actions, vec!["restrict-fields"]);

        let bounded = engine.evaluate_access(
            &actor,
            "patient/1",
            "read",
            &json!({
                "classification": "phi",
                "purpose": "treatment",
                "fields_requested": ["medications", "allergies"],
            }),
        );
        assert!(bounded.allowed);
    }
}
