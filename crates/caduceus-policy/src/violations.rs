//! The violation store.
//!
//! Violations are append-only and queryable by unresolved status.
//! `resolve()` is the only mutation path and requires a remediation note.
//! The narrow surface allows a later swap to persistent storage without
//! touching call sites.

use std::sync::Mutex;

use tracing::info;

use caduceus_contracts::compliance::{ComplianceViolation, ViolationId};
use caduceus_contracts::error::{CaduceusError, CaduceusResult};

/// Key-indexed, append-only store of compliance violations.
pub struct ViolationStore {
    inner: Mutex<Vec<ComplianceViolation>>,
}

impl ViolationStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Vec::new()),
        }
    }

    /// Append one violation. Never fails; a poisoned lock panics because
    /// losing violation records silently is worse than dying loudly in a
    /// corrupted process.
    pub fn append(&self, violation: ComplianceViolation) {
        self.inner
            .lock()
            .expect("violation store lock poisoned")
            .push(violation);
    }

    /// Every recorded violation, in append order.
    pub fn all(&self) -> Vec<ComplianceViolation> {
        self.inner
            .lock()
            .expect("violation store lock poisoned")
            .clone()
    }

    /// Unresolved violations only.
    pub fn active(&self) -> Vec<ComplianceViolation> {
        self.inner
            .lock()
            .expect("violation store lock poisoned")
            .iter()
            .filter(|v| !v.resolved)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("violation store lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close a violation with a remediation note.
    ///
    /// The only mutation the store supports. Fails when the id is unknown,
    /// the violation is already resolved, or the note is empty.
    pub fn resolve(&self, id: &ViolationId, remediation: &str) -> CaduceusResult<()> {
        if remediation.trim().is_empty() {
            return Err(CaduceusError::Validation {
                reason: "a remediation note is required to resolve a violation".to_string(),
            });
        }

        let mut inner = self.inner.lock().expect("violation store lock poisoned");
        let violation = inner
            .iter_mut()
            .find(|v| &v.id == id)
            .ok_or_else(|| CaduceusError::Validation {
                reason: format!("no violation with id {}", id.0),
            })?;

        if violation.resolved {
            return Err(CaduceusError::Validation {
                reason: format!("violation {} is already resolved", id.0),
            });
        }

        violation.resolved = true;
        violation.remediation = Some(remediation.trim().to_string());

        info!(violation = %id.0, rule = %violation.rule_id, "violation resolved");
        Ok(())
    }
}

impl Default for ViolationStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use caduceus_contracts::compliance::{ComplianceViolation, Severity, ViolationId};

    use super::ViolationStore;

    fn violation(rule: &str) -> ComplianceViolation {
        ComplianceViolation::new("hipaa", rule, Severity::High, "dr-chen", "read", "unmet")
    }

    #[test]
    fn active_filters_resolved() {
        let store = ViolationStore::new();
        store.append(violation("a"));
        store.append(violation("b"));

        let id = store.all()[0].id.clone();
        store.resolve(&id, "re-trained staff and enabled MFA").unwrap();

        assert_eq!(store.len(), 2);
        let active = store.active();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].rule_id, "b");
    }

    #[test]
    fn resolve_requires_a_note() {
        let store = ViolationStore::new();
        store.append(violation("a"));
        let id = store.all()[0].id.clone();

        assert!(store.resolve(&id, "   ").is_err());
        assert!(store.resolve(&id, "added field-level encryption").is_ok());
        // A second resolve is rejected.
        assert!(store.resolve(&id, "again").is_err());
    }

    #[test]
    fn resolve_unknown_id_fails() {
        let store = ViolationStore::new();
        assert!(store.resolve(&ViolationId::new(), "note").is_err());
    }
}
