//! # caduceus-security
//!
//! Classification, applied cryptography, and field-level protection for
//! the CADUCEUS platform.
//!
//! ## Overview
//!
//! The security layer is the leaf of the platform: it depends on nothing
//! but the contracts and the audit sink. It provides:
//!
//! - a content-based [`ContentClassifier`] (PHI/PII/Confidential/Internal/
//!   Public) used when callers do not supply a classification,
//! - authenticated per-field encryption ([`FieldCipher`]) under keys
//!   derived per field and rotation epoch ([`FieldKeyring`]),
//! - vault-backed tokenization ([`TokenVault`]),
//! - irreversible transforms (sanitize / anonymize / pseudonymize),
//! - the ordered [`SecurityProcessor`] pipeline that ties them together
//!   and emits one audit record per operation.
//!
//! The invariant the whole crate serves: a field classified PHI or PII
//! never leaves `process()` in plaintext, and no audit entry ever carries
//! a raw value.

pub mod classify;
pub mod crypto;
pub mod keys;
pub mod pipeline;
pub mod transform;
pub mod validate;
pub mod vault;

pub use classify::ContentClassifier;
pub use crypto::FieldCipher;
pub use keys::FieldKeyring;
pub use pipeline::{
    AppliedTransform, FieldTransform, Processed, ProcessingConfig, ProcessingMetadata,
    SecurityProcessor,
};
pub use transform::{anonymize, pseudonymize, AnonymizeStrategy, Sanitizer};
pub use validate::{CustomValidatorFn, ValidationFailure, ValidationKind, ValidationRule, Validator};
pub use vault::TokenVault;
