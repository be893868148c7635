//! The ordered data-protection pipeline.
//!
//! `SecurityProcessor::process` runs, in order:
//!
//! 1. validation against declared rules (mandatory failures abort before
//!    any side effect),
//! 2. classification (caller override wins; the content classifier fills
//!    the gap),
//! 3. caller-requested per-field transformations,
//! 4. classification-driven defaults — PHI fields are encrypted and PII
//!    fields tokenized even when nothing was requested for them,
//! 5. one audit emission naming the operation, classification, and
//!    transformation list. Never the raw values.

use std::collections::BTreeMap;
use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use caduceus_audit::AuditSink;
use caduceus_contracts::audit::{AuditOutcome, AuditRecord};
use caduceus_contracts::classification::{DataClassification, TransformationKind};
use caduceus_contracts::error::{CaduceusError, CaduceusResult};
use caduceus_contracts::paths;

use crate::classify::ContentClassifier;
use crate::crypto::FieldCipher;
use crate::keys::FieldKeyring;
use crate::transform::{anonymize, display_form, pseudonymize, AnonymizeStrategy, Sanitizer};
use crate::validate::{ValidationFailure, ValidationRule, Validator};
use crate::vault::TokenVault;

/// One caller-requested transformation of a named field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldTransform {
    /// Dotted path of the field to transform.
    pub field: String,
    pub kind: TransformationKind,
    /// Only meaningful for `Anonymize`; defaults to hash truncation.
    #[serde(default)]
    pub strategy: Option<AnonymizeStrategy>,
}

/// Everything a caller can ask of one `process` run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Operation label for the audit record, e.g. "ingest-lab-results".
    pub operation: String,
    #[serde(default)]
    pub validation: Vec<ValidationRule>,
    #[serde(default)]
    pub transformations: Vec<FieldTransform>,
    /// Caller-supplied payload classification. When present the content
    /// classifier is not consulted for the payload-level tag.
    #[serde(default)]
    pub classification: Option<DataClassification>,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            operation: "process-data".to_string(),
            validation: Vec::new(),
            transformations: Vec::new(),
            classification: None,
        }
    }
}

/// One transformation the pipeline actually performed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedTransform {
    pub field: String,
    pub kind: TransformationKind,
}

/// What `process` learned and did, minus the data itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingMetadata {
    pub classification: DataClassification,
    pub field_classifications: BTreeMap<String, DataClassification>,
    pub applied: Vec<AppliedTransform>,
    /// Non-mandatory validation failures. Mandatory ones abort instead.
    pub validation_failures: Vec<ValidationFailure>,
}

/// The pipeline output: transformed data plus metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Processed {
    pub data: Value,
    pub metadata: ProcessingMetadata,
}

/// The security layer's front door.
///
/// Synchronous and safe to call from multiple dispatch workers: the token
/// vault and field-key cache are the only shared mutable state, each
/// behind its own coarse lock.
pub struct SecurityProcessor {
    classifier: ContentClassifier,
    keyring: Arc<FieldKeyring>,
    cipher: FieldCipher,
    vault: Arc<TokenVault>,
    sanitizer: Sanitizer,
    validator: Validator,
    audit: Arc<dyn AuditSink>,
}

impl SecurityProcessor {
    pub fn new(
        keyring: Arc<FieldKeyring>,
        vault: Arc<TokenVault>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            classifier: ContentClassifier::new(),
            cipher: FieldCipher::new(Arc::clone(&keyring)),
            keyring,
            vault,
            sanitizer: Sanitizer::new(),
            validator: Validator::new(),
            audit,
        }
    }

    /// Register a custom validation function (see `Validator::register`).
    pub fn register_validator(
        &mut self,
        name: impl Into<String>,
        f: crate::validate::CustomValidatorFn,
    ) {
        self.validator.register(name, f);
    }

    pub fn classifier(&self) -> &ContentClassifier {
        &self.classifier
    }

    pub fn cipher(&self) -> &FieldCipher {
        &self.cipher
    }

    pub fn vault(&self) -> &TokenVault {
        &self.vault
    }

    /// Run the full pipeline over `data` on behalf of `actor`.
    pub fn process(
        &self,
        actor: &str,
        data: &Value,
        config: &ProcessingConfig,
    ) -> CaduceusResult<Processed> {
        // ── Phase 1: validation ───────────────────────────────────────────────
        let failures = self.validator.run(data, &config.validation);
        let (mandatory, advisory): (Vec<_>, Vec<_>) =
            failures.into_iter().partition(|f| f.mandatory);

        if !mandatory.is_empty() {
            let reason = mandatory
                .iter()
                .map(|f| format!("{}: {}", f.field, f.message))
                .collect::<Vec<_>>()
                .join("; ");

            self.audit.record(
                AuditRecord::new(
                    actor,
                    &config.operation,
                    "payload",
                    AuditOutcome::Error {
                        detail: format!("validation failed: {reason}"),
                    },
                )
                .with_fields(mandatory.iter().map(|f| f.field.clone()).collect()),
            );

            return Err(CaduceusError::Validation { reason });
        }

        // ── Phase 2: classification ───────────────────────────────────────────
        let field_classifications = self.classifier.classify_fields(data);
        let classification = config.classification.unwrap_or_else(|| {
            DataClassification::most_sensitive(field_classifications.values().copied())
        });

        debug!(
            operation = %config.operation,
            classification = %classification,
            "payload classified"
        );

        // ── Phase 3: requested transformations ───────────────────────────────
        let mut out = data.clone();
        let mut applied: Vec<AppliedTransform> = Vec::new();
        let mut touched: HashSet<String> = HashSet::new();

        for transform in &config.transformations {
            let Some(current) = paths::resolve(&out, &transform.field).cloned() else {
                warn!(
                    field = %transform.field,
                    kind = %transform.kind,
                    "transformation target missing; skipped"
                );
                continue;
            };

            let replacement = self.apply(&transform.field, &current, transform)?;
            paths::set(&mut out, &transform.field, replacement);
            touched.insert(transform.field.clone());
            applied.push(AppliedTransform {
                field: transform.field.clone(),
                kind: transform.kind,
            });
        }

        // ── Phase 4: classification-driven defaults ───────────────────────────
        //
        // PHI encrypts and PII tokenizes even when not explicitly requested.
        // A field the caller already transformed is left alone.
        for (path, tag) in &field_classifications {
            if touched.contains(path) {
                continue;
            }
            let default_kind = match tag {
                DataClassification::Phi => TransformationKind::Encrypt,
                DataClassification::Pii => TransformationKind::Tokenize,
                _ => continue,
            };
            let Some(current) = paths::resolve(&out, path).cloned() else {
                continue;
            };

            let transform = FieldTransform {
                field: path.clone(),
                kind: default_kind,
                strategy: None,
            };
            let replacement = self.apply(path, &current, &transform)?;
            paths::set(&mut out, path, replacement);
            touched.insert(path.clone());
            applied.push(AppliedTransform {
                field: path.clone(),
                kind: default_kind,
            });
        }

        // ── Phase 5: audit emission ───────────────────────────────────────────
        let summary = applied
            .iter()
            .map(|a| format!("{}({})", a.kind, a.field))
            .collect::<Vec<_>>()
            .join(", ");

        self.audit.record(
            AuditRecord::new(actor, &config.operation, "payload", AuditOutcome::Allowed)
                .with_classification(classification)
                .with_fields(applied.iter().map(|a| a.field.clone()).collect())
                .with_detail(if summary.is_empty() {
                    "no transformations applied".to_string()
                } else {
                    format!("transformations: {summary}")
                }),
        );

        Ok(Processed {
            data: out,
            metadata: ProcessingMetadata {
                classification,
                field_classifications,
                applied,
                validation_failures: advisory,
            },
        })
    }

    fn apply(
        &self,
        field: &str,
        value: &Value,
        transform: &FieldTransform,
    ) -> CaduceusResult<Value> {
        let rendered = display_form(value);
        let out = match transform.kind {
            TransformationKind::Sanitize => Value::String(self.sanitizer.sanitize(&rendered)),
            TransformationKind::Tokenize => Value::String(self.vault.tokenize(field, &rendered)),
            TransformationKind::Encrypt => Value::String(self.cipher.encrypt(field, &rendered)?),
            TransformationKind::Anonymize => anonymize(
                value,
                transform.strategy.unwrap_or(AnonymizeStrategy::HashTruncate),
            ),
            TransformationKind::Pseudonymize => Value::String(pseudonymize(
                &self.keyring.pseudonym_key(),
                field,
                &rendered,
            )),
        };
        Ok(out)
    }

    /// Resolve a vault token back to its original value. Audited.
    pub fn detokenize(&self, actor: &str, token: &str) -> CaduceusResult<String> {
        let field = self.vault.field_of(token);
        let result = self.vault.detokenize(token);

        let outcome = match &result {
            Ok(_) => AuditOutcome::Allowed,
            Err(e) => AuditOutcome::Error {
                detail: e.to_string(),
            },
        };
        self.audit.record(
            AuditRecord::new(actor, "detokenize", "vault", outcome)
                .with_fields(field.into_iter().collect()),
        );

        result
    }

    /// Rotate field keys (all known fields when `fields` is `None`). Audited.
    ///
    /// Values encrypted under the old keys become undecryptable unless they
    /// were re-encrypted before rotation.
    pub fn rotate_keys(&self, actor: &str, fields: Option<&[String]>) -> Vec<String> {
        let rotated = self.keyring.rotate(fields);

        self.audit.record(
            AuditRecord::new(actor, "rotate-keys", "keyring", AuditOutcome::Allowed)
                .with_fields(rotated.clone())
                .with_detail(format!("{} field key(s) rotated", rotated.len())),
        );

        rotated
    }
}
