//! Content-based sensitivity classification.
//!
//! Used only when a caller has not already supplied a classification.
//! The heuristics combine field-name matching with value-pattern matching:
//! government ID numbers, medical record numbers, and clinical vocabulary
//! classify PHI; contact identifiers classify PII; configured keywords
//! classify Confidential; everything else falls back to Internal.

use std::collections::BTreeMap;

use regex::Regex;
use serde_json::Value;

use caduceus_contracts::classification::DataClassification;
use caduceus_contracts::paths;

/// Field names that are PHI regardless of value, in a healthcare context.
const PHI_FIELD_NAMES: &[&str] = &[
    "ssn",
    "social_security",
    "social_security_number",
    "mrn",
    "medical_record_number",
    "diagnosis",
    "diagnoses",
    "condition",
    "conditions",
    "medication",
    "medications",
    "active_medications",
    "prescription",
    "allergies",
    "lab_results",
    "recent_labs",
    "treatment",
];

/// Field names that are PII regardless of value.
const PII_FIELD_NAMES: &[&str] = &[
    "email",
    "phone",
    "phone_number",
    "address",
    "street_address",
    "date_of_birth",
    "dob",
    "full_name",
];

/// Clinical vocabulary that marks free text as PHI.
const PHI_TERMS: &[&str] = &[
    "diagnosis",
    "diagnosed",
    "prescribed",
    "prescription",
    "medication",
    "dosage",
    "symptom",
    "oncology",
    "chemotherapy",
    "biopsy",
    "hypertension",
    "diabetes",
    "insulin",
];

/// Keywords that mark a value as business-confidential.
const CONFIDENTIAL_TERMS: &[&str] = &["confidential", "restricted", "do not distribute"];

/// The heuristic classifier.
///
/// Patterns compile once at construction; classification itself is pure
/// and safe to call from concurrent dispatch workers.
pub struct ContentClassifier {
    ssn: Regex,
    mrn: Regex,
    email: Regex,
    phone: Regex,
}

impl ContentClassifier {
    pub fn new() -> Self {
        Self {
            ssn: Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").expect("ssn pattern"),
            mrn: Regex::new(r"\bMRN[-:]?\s?\d{4,}\b").expect("mrn pattern"),
            email: Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b")
                .expect("email pattern"),
            phone: Regex::new(r"\b\d{3}[-.]\d{3}[-.]\d{4}\b").expect("phone pattern"),
        }
    }

    /// Classify every leaf field of `data` by dotted path.
    pub fn classify_fields(&self, data: &Value) -> BTreeMap<String, DataClassification> {
        let mut tags = BTreeMap::new();
        for (path, value) in paths::flatten(data) {
            let leaf = path.rsplit('.').next().unwrap_or(&path);
            tags.insert(path.clone(), self.classify_leaf(leaf, value));
        }
        tags
    }

    /// The payload-level classification: the most sensitive field tag,
    /// or `Internal` for data with no leaves.
    pub fn classify(&self, data: &Value) -> DataClassification {
        DataClassification::most_sensitive(self.classify_fields(data).into_values())
    }

    fn classify_leaf(&self, field: &str, value: &Value) -> DataClassification {
        let name = field.to_ascii_lowercase();

        if PHI_FIELD_NAMES.contains(&name.as_str()) {
            return DataClassification::Phi;
        }
        if PII_FIELD_NAMES.contains(&name.as_str()) {
            return DataClassification::Pii;
        }

        if let Some(text) = value.as_str() {
            if self.ssn.is_match(text) || self.mrn.is_match(text) {
                return DataClassification::Phi;
            }
            let lowered = text.to_ascii_lowercase();
            if PHI_TERMS.iter().any(|term| lowered.contains(term)) {
                return DataClassification::Phi;
            }
            if self.email.is_match(text) || self.phone.is_match(text) {
                return DataClassification::Pii;
            }
            if CONFIDENTIAL_TERMS.iter().any(|term| lowered.contains(term)) {
                return DataClassification::Confidential;
            }
        }

        DataClassification::Internal
    }
}

impl Default for ContentClassifier {
    fn default() -> Self {
        Self::new()
    }
}
