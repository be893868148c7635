//! Audit chain entry types.
//!
//! `ChainEntry` wraps an `AuditRecord` with sequence numbering and the
//! SHA-256 hashes that make tampering detectable. `AuditExport` is the
//! snapshot handed to an external archiver — compaction and rotation are
//! external concerns, the runtime only appends.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use caduceus_contracts::audit::AuditRecord;

/// A single entry in the platform-wide SHA-256 hash chain.
///
/// Each entry commits to the previous entry via `prev_hash`, forming an
/// append-only chain. Modifying any field — including those of the
/// embedded `record` — invalidates `this_hash` and every subsequent
/// `prev_hash`, which `verify_chain` detects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainEntry {
    /// Monotonically increasing position in the chain, starting at 0.
    pub sequence: u64,

    /// The immutable decision record.
    pub record: AuditRecord,

    /// SHA-256 hash (hex) of the previous entry, or `GENESIS_HASH` for
    /// the first entry.
    pub prev_hash: String,

    /// SHA-256 hash (hex) of this entry's canonical content, computed by
    /// `hash_entry()` over (sequence, prev_hash, canonical JSON of record).
    pub this_hash: String,
}

impl ChainEntry {
    /// The sentinel `prev_hash` used for the first entry in every chain.
    ///
    /// 64 hex zeros — a value that can never be the SHA-256 of real data,
    /// making genesis detection unambiguous.
    pub const GENESIS_HASH: &'static str =
        "0000000000000000000000000000000000000000000000000000000000000000";
}

/// A point-in-time snapshot of the audit chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditExport {
    /// All entries in chain order (sequence 0 first).
    pub entries: Vec<ChainEntry>,

    /// Wall-clock time (UTC) the snapshot was taken.
    pub exported_at: DateTime<Utc>,

    /// The `this_hash` of the last entry. Empty string when the chain is
    /// empty. A compact commitment to the entire log.
    pub terminal_hash: String,

    /// Records the sink failed to persist (buffer overruns, poisoned
    /// locks). Surfaced here instead of erroring into caller control flow.
    pub dropped: u64,
}
