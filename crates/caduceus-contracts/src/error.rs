//! Runtime error taxonomy for the CADUCEUS platform.
//!
//! All fallible operations return `CaduceusResult<T>`. Variants carry
//! enough context to produce actionable audit entries. Propagation policy:
//! validation and access errors are synchronous and returned directly to
//! the caller; handler and crypto errors inside the dispatch loop are
//! caught at the loop boundary and converted into audit events plus metric
//! updates — nothing in this taxonomy is fatal to the process.

use thiserror::Error;

/// Failures inside the field-encryption layer.
///
/// `KeyUnavailable` and `TagVerification` are deliberately distinct:
/// a missing key (e.g. after rotation without migration) is an operational
/// condition, while a failed tag is tamper/corruption. Neither ever
/// returns plaintext.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// No key is available for the field at the requested epoch.
    #[error("no key available for field '{field}' at epoch {epoch}")]
    KeyUnavailable { field: String, epoch: u32 },

    /// The authentication tag did not verify. Treated as tamper/corruption.
    #[error("authentication tag verification failed for field '{field}'")]
    TagVerification { field: String },

    /// The encrypted value could not be parsed into nonce/tag/ciphertext.
    #[error("malformed encrypted value for field '{field}': {reason}")]
    Malformed { field: String, reason: String },
}

/// The unified error type for the CADUCEUS platform.
#[derive(Debug, Error)]
pub enum CaduceusError {
    /// Malformed input data; reported to the caller before any side effect.
    #[error("validation failed: {reason}")]
    Validation { reason: String },

    /// Policy evaluation rejected the operation. Carries the ids of the
    /// violated rules; the full records live in the violation store.
    #[error("access denied for '{action}': {reason}")]
    AccessDenied {
        action: String,
        reason: String,
        rule_ids: Vec<String>,
    },

    /// A field-encryption failure. Never silently yields plaintext.
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// The vault holds no mapping for the presented token.
    #[error("unknown token '{token}'")]
    UnknownToken { token: String },

    /// A message addressed an unknown or offline agent. Recorded as an
    /// orchestrator-level error; never stops the dispatch loop.
    #[error("agent '{agent}' is unknown or offline")]
    AgentUnavailable { agent: String },

    /// An agent's own processing failed. The agent transitions to the
    /// error state and the loop continues.
    #[error("handler for agent '{agent}' failed: {reason}")]
    HandlerFailure { agent: String, reason: String },

    /// A bounded wait expired.
    #[error("'{operation}' timed out after {millis} ms")]
    Timeout { operation: String, millis: u64 },

    /// A workflow step failed or timed out; remaining steps were aborted.
    #[error("workflow '{workflow}' failed at step '{step}': {reason}")]
    WorkflowFailed {
        workflow: String,
        step: String,
        reason: String,
    },

    /// A required configuration value is missing or invalid.
    #[error("configuration error: {reason}")]
    Config { reason: String },

    /// The audit log could not persist a record.
    #[error("audit write failed: {reason}")]
    AuditWriteFailed { reason: String },
}

/// Convenience alias used throughout the CADUCEUS crates.
pub type CaduceusResult<T> = Result<T, CaduceusError>;
