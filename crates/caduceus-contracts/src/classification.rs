//! Data sensitivity classification.
//!
//! A classification tag attached to a payload drives which default
//! protections the security layer applies. Variants are ordered by
//! sensitivity so `max()` over per-field tags yields the payload-level tag.

use serde::{Deserialize, Serialize};

/// Sensitivity tag for a payload or a single field.
///
/// Ordering is by sensitivity: `Public < Internal < Confidential < Pii < Phi`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum DataClassification {
    /// Freely shareable.
    Public,
    /// Internal operational data; the fallback when nothing matches.
    Internal,
    /// Business-confidential, not individually identifying.
    Confidential,
    /// Personally identifiable information. Tokenized by default.
    Pii,
    /// Protected health information. Encrypted by default.
    Phi,
}

impl DataClassification {
    /// True for classifications that must never leave the boundary
    /// unprotected.
    pub fn is_sensitive(self) -> bool {
        matches!(self, DataClassification::Pii | DataClassification::Phi)
    }

    /// The most sensitive tag among `tags`, or `Internal` when empty.
    pub fn most_sensitive(tags: impl IntoIterator<Item = DataClassification>) -> Self {
        tags.into_iter()
            .max()
            .unwrap_or(DataClassification::Internal)
    }
}

impl std::fmt::Display for DataClassification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DataClassification::Public => "public",
            DataClassification::Internal => "internal",
            DataClassification::Confidential => "confidential",
            DataClassification::Pii => "pii",
            DataClassification::Phi => "phi",
        };
        f.write_str(s)
    }
}

/// A field-level protection the security layer can apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransformationKind {
    /// Pattern-replace identifiable substrings with masked placeholders.
    /// Purely textual and irreversible.
    Sanitize,
    /// Replace the value with an opaque vault-backed token. Reversible
    /// through `detokenize`, which is itself audited.
    Tokenize,
    /// Authenticated symmetric encryption under a field-derived key.
    /// Reversible only with the same field key.
    Encrypt,
    /// One-way reduction (hash truncation, generalization, suppression).
    Anonymize,
    /// Deterministic keyed hash of `field:value` — stable pseudonyms that
    /// preserve linkage without revealing the value.
    Pseudonymize,
}

impl std::fmt::Display for TransformationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TransformationKind::Sanitize => "sanitize",
            TransformationKind::Tokenize => "tokenize",
            TransformationKind::Encrypt => "encrypt",
            TransformationKind::Anonymize => "anonymize",
            TransformationKind::Pseudonymize => "pseudonymize",
        };
        f.write_str(s)
    }
}
