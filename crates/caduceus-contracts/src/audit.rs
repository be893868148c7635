//! Audit record types.
//!
//! Every access/operation decision produces exactly one `AuditRecord`:
//! who, what, when, allowed/denied, and which fields were touched. Records
//! are immutable and append-only; they never contain plaintext PHI/PII
//! values — only field names and transformation names.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classification::DataClassification;

/// The decision outcome an audit record captures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "outcome")]
pub enum AuditOutcome {
    /// The operation was permitted and ran.
    Allowed,
    /// Policy evaluation rejected the operation before any side effect.
    Denied { reason: String },
    /// The operation was permitted but failed while running.
    Error { detail: String },
}

/// One immutable audit entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: uuid::Uuid,
    pub timestamp: DateTime<Utc>,
    /// The acting principal (actor id, agent id, or "system").
    pub actor: String,
    /// Operation name, e.g. "process-data", "detokenize", "dispatch".
    pub action: String,
    /// What the operation targeted, e.g. "patient/1234", "field:ssn".
    pub resource: String,
    pub outcome: AuditOutcome,
    /// Classification of the data the operation touched, when known.
    pub classification: Option<DataClassification>,
    /// Names of the fields touched. Never field values.
    pub fields: Vec<String>,
    /// Free-text context: transformation list, violation rule ids, ….
    pub detail: Option<String>,
}

impl AuditRecord {
    /// Build a record with the mandatory fields; optional ones default off.
    pub fn new(
        actor: impl Into<String>,
        action: impl Into<String>,
        resource: impl Into<String>,
        outcome: AuditOutcome,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            timestamp: Utc::now(),
            actor: actor.into(),
            action: action.into(),
            resource: resource.into(),
            outcome,
            classification: None,
            fields: Vec::new(),
            detail: None,
        }
    }

    pub fn with_classification(mut self, classification: DataClassification) -> Self {
        self.classification = Some(classification);
        self
    }

    pub fn with_fields(mut self, fields: Vec<String>) -> Self {
        self.fields = fields;
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}
