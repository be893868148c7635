//! External collaborator interfaces and their mock stand-ins.
//!
//! The platform consumes two outside services behind narrow async traits:
//! the health-record connector (every field PHI by contract) and the
//! knowledge-query service. The mocks ship hardcoded, entirely fictional
//! data — no external systems are contacted — and stand in for real
//! connectors in tests and the demo.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use caduceus_contracts::error::{CaduceusError, CaduceusResult};

// ── Health-record connector ───────────────────────────────────────────────────

/// A patient summary as returned by the connector.
///
/// Every field is classification = PHI by contract; the platform runs the
/// whole summary through the security pipeline before it leaves the
/// boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientSummary {
    pub patient: Value,
    pub recent_labs: Value,
    pub active_medications: Value,
    pub allergies: Value,
}

/// Resource-fetch service keyed by patient identifier.
#[async_trait]
pub trait HealthRecordConnector: Send + Sync {
    async fn get_patient_summary(&self, patient_id: &str) -> CaduceusResult<PatientSummary>;
}

/// In-memory connector with two fictional patients.
pub struct MockHealthRecords;

#[async_trait]
impl HealthRecordConnector for MockHealthRecords {
    async fn get_patient_summary(&self, patient_id: &str) -> CaduceusResult<PatientSummary> {
        match patient_id {
            "patient-1001" => Ok(PatientSummary {
                patient: json!({
                    "patient_id": "patient-1001",
                    "full_name": "Margaret Yoon",
                    "date_of_birth": "1961-03-14",
                    "ssn": "123-45-6789",
                }),
                recent_labs: json!([
                    { "test": "HbA1c", "value": 7.2, "unit": "%", "collected": "2026-07-28" },
                    { "test": "LDL", "value": 131, "unit": "mg/dL", "collected": "2026-07-28" },
                ]),
                active_medications: json!([
                    { "medication": "metformin", "dose": "500 mg", "frequency": "twice daily" },
                    { "medication": "lisinopril", "dose": "10 mg", "frequency": "daily" },
                ]),
                allergies: json!(["penicillin"]),
            }),
            "patient-2002" => Ok(PatientSummary {
                patient: json!({
                    "patient_id": "patient-2002",
                    "full_name": "Dev Okafor",
                    "date_of_birth": "1988-11-02",
                    "ssn": "987-65-4321",
                }),
                recent_labs: json!([
                    { "test": "TSH", "value": 2.1, "unit": "mIU/L", "collected": "2026-08-01" },
                ]),
                active_medications: json!([]),
                allergies: json!([]),
            }),
            other => Err(CaduceusError::Validation {
                reason: format!("no record for patient '{other}'"),
            }),
        }
    }
}

// ── Knowledge-query service ───────────────────────────────────────────────────

/// The answer shape of the retrieval-augmented knowledge service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryAnswer {
    pub answer: String,
    pub sources: Vec<String>,
    pub confidence: f64,
}

/// Black-box query/result service.
#[async_trait]
pub trait KnowledgeQuery: Send + Sync {
    async fn query(&self, text: &str, filters: &Value) -> CaduceusResult<QueryAnswer>;
}

/// Canned-answer knowledge service for tests and the demo.
pub struct MockKnowledge;

#[async_trait]
impl KnowledgeQuery for MockKnowledge {
    async fn query(&self, text: &str, _filters: &Value) -> CaduceusResult<QueryAnswer> {
        Ok(QueryAnswer {
            answer: format!("No curated guidance found for: {text}"),
            sources: vec!["internal-formulary-v12".to_string()],
            confidence: 0.42,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{HealthRecordConnector, MockHealthRecords};

    #[tokio::test]
    async fn mock_returns_known_patient_and_rejects_unknown() {
        let connector = MockHealthRecords;
        let summary = connector.get_patient_summary("patient-1001").await.unwrap();
        assert_eq!(summary.patient["patient_id"], "patient-1001");
        assert!(connector.get_patient_summary("patient-9999").await.is_err());
    }
}
