//! Irreversible and deterministic field transforms.
//!
//! - `Sanitizer` — pattern-replaces identifiable substrings with masked
//!   placeholders. Purely textual, irreversible.
//! - `anonymize` — one-way reduction: hash truncation, value
//!   generalization (age buckets, partial postal codes), or suppression.
//! - `pseudonymize` — deterministic HMAC-SHA-256 of `field:value`, so the
//!   same input always yields the same pseudonym (linkage across records
//!   without revealing the value).

use hmac::{Hmac, Mac};
use regex::Regex;
use serde_json::Value;
use sha2::{Digest, Sha256};

use serde::{Deserialize, Serialize};

type HmacSha256 = Hmac<Sha256>;

// ── Sanitizer ─────────────────────────────────────────────────────────────────

/// Masks common identifiable substrings in free text.
///
/// Patterns are compiled once at construction. Replacement order matters:
/// payment cards run before phone numbers so a 16-digit card is never
/// partially matched as a phone.
pub struct Sanitizer {
    rules: Vec<(Regex, &'static str)>,
}

impl Sanitizer {
    pub fn new() -> Self {
        // The patterns are deliberately conservative; a sanitizer that
        // over-matches destroys clinical text it was meant to preserve.
        let rules = vec![
            (
                Regex::new(r"\b(?:\d{4}[- ]){3}\d{4}\b").expect("card pattern"),
                "[REDACTED-CARD]",
            ),
            (
                Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").expect("ssn pattern"),
                "[REDACTED-SSN]",
            ),
            (
                Regex::new(r"\b\d{3}[-.]\d{3}[-.]\d{4}\b").expect("phone pattern"),
                "[REDACTED-PHONE]",
            ),
            (
                Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b")
                    .expect("email pattern"),
                "[REDACTED-EMAIL]",
            ),
        ];
        Self { rules }
    }

    /// Replace every match of every pattern with its placeholder.
    pub fn sanitize(&self, text: &str) -> String {
        let mut out = text.to_string();
        for (pattern, placeholder) in &self.rules {
            out = pattern.replace_all(&out, *placeholder).into_owned();
        }
        out
    }
}

impl Default for Sanitizer {
    fn default() -> Self {
        Self::new()
    }
}

// ── Anonymization ─────────────────────────────────────────────────────────────

/// How `anonymize` reduces a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnonymizeStrategy {
    /// `anon-` plus the first 12 hex chars of SHA-256(value).
    HashTruncate,
    /// Generalize a numeric age into a decade bucket, e.g. `"40-49"`.
    AgeBucket,
    /// Keep the first 3 characters of a postal code, mask the rest.
    ZipTruncate,
    /// Drop the value entirely (JSON null).
    Suppress,
}

/// One-way reduce `value` according to `strategy`. Never reversible.
///
/// Strategies that need a particular shape (a number for `AgeBucket`, a
/// string for `ZipTruncate`) fall back to `HashTruncate` when the value
/// does not fit — losing precision is acceptable, leaking is not.
pub fn anonymize(value: &Value, strategy: AnonymizeStrategy) -> Value {
    match strategy {
        AnonymizeStrategy::Suppress => Value::Null,

        AnonymizeStrategy::AgeBucket => match value.as_f64() {
            Some(age) if age >= 0.0 => {
                let decade = (age as u64 / 10) * 10;
                Value::String(format!("{}-{}", decade, decade + 9))
            }
            _ => hash_truncate(value),
        },

        AnonymizeStrategy::ZipTruncate => match value.as_str() {
            Some(zip) if zip.chars().count() >= 3 => {
                let prefix: String = zip.chars().take(3).collect();
                Value::String(format!("{prefix}**"))
            }
            _ => hash_truncate(value),
        },

        AnonymizeStrategy::HashTruncate => hash_truncate(value),
    }
}

fn hash_truncate(value: &Value) -> Value {
    let rendered = display_form(value);
    let digest = Sha256::digest(rendered.as_bytes());
    Value::String(format!("anon-{}", &hex::encode(digest)[..12]))
}

// ── Pseudonymization ──────────────────────────────────────────────────────────

/// Deterministic keyed pseudonym for `field:value`.
///
/// The same (key, field, value) triple always yields the same `psn-`
/// string; distinct fields yield distinct pseudonyms for the same value.
pub fn pseudonymize(key: &[u8; 32], field: &str, value: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(field.as_bytes());
    mac.update(b":");
    mac.update(value.as_bytes());
    let digest = mac.finalize().into_bytes();
    format!("psn-{}", &hex::encode(digest)[..32])
}

/// The string form used for hashing and transforms of non-string values.
pub fn display_form(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
