//! Compliance report generation.
//!
//! A point-in-time rollup of the violation store: totals, active count,
//! and breakdowns by severity and framework. Reports carry violation
//! metadata only — rule ids, actors, actions — never payload data.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use caduceus_contracts::compliance::Severity;
use caduceus_policy::{CompiledPolicy, ViolationStore};

/// A compact view of one violation for the report's recent list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViolationSummary {
    pub rule_id: String,
    pub policy_id: String,
    pub severity: Severity,
    pub actor: String,
    pub action: String,
    pub resolved: bool,
    pub timestamp: DateTime<Utc>,
}

/// The report handed back by `generate_compliance_report`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceReport {
    pub generated_at: DateTime<Utc>,
    pub total_violations: usize,
    pub active_violations: usize,
    /// Counts keyed by severity label ("low" … "critical").
    pub by_severity: BTreeMap<String, usize>,
    /// Counts keyed by framework name ("HIPAA", "GDPR", …).
    pub by_framework: BTreeMap<String, usize>,
    /// The most recent violations, newest last, capped at `RECENT_CAP`.
    pub recent: Vec<ViolationSummary>,
}

impl ComplianceReport {
    const RECENT_CAP: usize = 10;

    /// Roll up the violation store. `policies` resolves policy ids to
    /// framework names; an unknown policy id counts under its own id.
    pub fn build(store: &ViolationStore, policies: &[CompiledPolicy]) -> Self {
        let all = store.all();
        let active = all.iter().filter(|v| !v.resolved).count();

        let mut by_severity: BTreeMap<String, usize> = BTreeMap::new();
        let mut by_framework: BTreeMap<String, usize> = BTreeMap::new();
        for violation in &all {
            *by_severity
                .entry(violation.severity.to_string())
                .or_insert(0) += 1;

            let framework = policies
                .iter()
                .find(|p| p.id == violation.policy_id)
                .map(|p| p.framework.clone())
                .unwrap_or_else(|| violation.policy_id.clone());
            *by_framework.entry(framework).or_insert(0) += 1;
        }

        let recent = all
            .iter()
            .rev()
            .take(Self::RECENT_CAP)
            .rev()
            .map(|v| ViolationSummary {
                rule_id: v.rule_id.clone(),
                policy_id: v.policy_id.clone(),
                severity: v.severity,
                actor: v.actor.clone(),
                action: v.action.clone(),
                resolved: v.resolved,
                timestamp: v.timestamp,
            })
            .collect();

        Self {
            generated_at: Utc::now(),
            total_violations: all.len(),
            active_violations: active,
            by_severity,
            by_framework,
            recent,
        }
    }
}

#[cfg(test)]
mod tests {
    use caduceus_contracts::compliance::{ComplianceViolation, Severity};
    use caduceus_policy::{PolicySet, ViolationStore};

    use super::ComplianceReport;

    fn policies() -> Vec<caduceus_policy::CompiledPolicy> {
        PolicySet::from_toml_str(
            r#"
            [[policies]]
            id = "hipaa"
            framework = "HIPAA"
            description = "d"
        "#,
        )
        .unwrap()
        .compile()
        .unwrap()
    }

    #[test]
    fn report_rolls_up_by_severity_and_framework() {
        let store = ViolationStore::new();
        store.append(ComplianceViolation::new(
            "hipaa", "r1", Severity::High, "a", "read", "d",
        ));
        store.append(ComplianceViolation::new(
            "hipaa", "r2", Severity::High, "a", "read", "d",
        ));
        store.append(ComplianceViolation::new(
            "unregistered", "r3", Severity::Low, "b", "export", "d",
        ));

        let id = store.all()[0].id.clone();
        store.resolve(&id, "re-trained staff").unwrap();

        let report = ComplianceReport::build(&store, &policies());
        assert_eq!(report.total_violations, 3);
        assert_eq!(report.active_violations, 2);
        assert_eq!(report.by_severity["high"], 2);
        assert_eq!(report.by_severity["low"], 1);
        assert_eq!(report.by_framework["HIPAA"], 2);
        assert_eq!(report.by_framework["unregistered"], 1);
        assert_eq!(report.recent.len(), 3);
    }

    #[test]
    fn recent_list_is_capped() {
        let store = ViolationStore::new();
        for i in 0..15 {
            store.append(ComplianceViolation::new(
                "hipaa",
                format!("rule-{i}"),
                Severity::Medium,
                "a",
                "read",
                "d",
            ));
        }

        let report = ComplianceReport::build(&store, &policies());
        assert_eq!(report.recent.len(), 10);
        // Newest last: the final entry is the last appended.
        assert_eq!(report.recent.last().unwrap().rule_id, "rule-14");
    }
}
