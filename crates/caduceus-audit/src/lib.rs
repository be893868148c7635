//! # caduceus-audit
//!
//! Immutable, append-only, SHA-256 hash-chained audit trail plus the
//! metrics-sink contract for the CADUCEUS platform.
//!
//! ## Overview
//!
//! Every access/operation decision the platform makes is wrapped in a
//! `ChainEntry` that links to the previous entry via its SHA-256 hash.
//! Tampering with any entry — even a single byte — breaks the chain and is
//! detected by `verify_chain`.
//!
//! The sink contract is deliberately one-way: `AuditSink::record` never
//! fails into the caller. Persistence failures are counted and surfaced
//! through the export snapshot.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use caduceus_audit::{AuditSink, BufferedAuditSink, ChainedAuditLog};
//!
//! let log = Arc::new(ChainedAuditLog::new());
//! let sink = BufferedAuditSink::new(Arc::clone(&log), 32);
//! sink.record(record);
//! sink.flush();
//!
//! assert!(log.verify_integrity());
//! let export = log.export();
//! ```

pub mod chain;
pub mod event;
pub mod metrics;
pub mod sink;

pub use chain::{hash_entry, verify_chain};
pub use event::{AuditExport, ChainEntry};
pub use metrics::{InMemoryMetrics, MetricsSink, NullMetrics};
pub use sink::{AuditSink, BufferedAuditSink, ChainedAuditLog};

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use caduceus_contracts::audit::{AuditOutcome, AuditRecord};
    use caduceus_contracts::classification::DataClassification;

    use super::{
        AuditSink, BufferedAuditSink, ChainEntry, ChainedAuditLog, InMemoryMetrics, MetricsSink,
    };

    // ── Helpers ───────────────────────────────────────────────────────────────

    /// Build a minimal record with a distinguishable resource.
    fn make_record(resource: &str) -> AuditRecord {
        AuditRecord::new("dr-chen", "read", resource, AuditOutcome::Allowed)
            .with_classification(DataClassification::Phi)
            .with_fields(vec!["diagnosis".to_string()])
    }

    // ── Chain tests ───────────────────────────────────────────────────────────

    /// Appending three records produces a valid chain.
    #[test]
    fn test_hash_chain_integrity() {
        let log = ChainedAuditLog::new();
        log.append(make_record("patient/1"));
        log.append(make_record("patient/2"));
        log.append(make_record("patient/3"));

        assert!(log.verify_integrity(), "chain must be valid after sequential appends");
        assert_eq!(log.len(), 3);
    }

    /// Mutating any entry's record breaks verification on the exported copy.
    #[test]
    fn test_tamper_detection() {
        let log = ChainedAuditLog::new();
        log.append(make_record("patient/1"));
        log.append(make_record("patient/2"));

        let mut export = log.export();
        export.entries[0].record.resource = "patient/TAMPERED".to_string();

        assert!(
            !super::verify_chain(&export.entries),
            "chain must detect a mutated record"
        );
    }

    /// The first entry's `prev_hash` must equal the genesis sentinel.
    #[test]
    fn test_genesis_hash() {
        let log = ChainedAuditLog::new();
        log.append(make_record("patient/1"));

        let export = log.export();
        assert_eq!(export.entries.len(), 1);
        assert_eq!(export.entries[0].prev_hash, ChainEntry::GENESIS_HASH);
    }

    /// Sequence numbers are 0, 1, 2, … with no gaps.
    #[test]
    fn test_sequence_monotonic() {
        let log = ChainedAuditLog::new();
        for i in 0..4 {
            log.append(make_record(&format!("patient/{i}")));
        }

        let export = log.export();
        for (idx, entry) in export.entries.iter().enumerate() {
            assert_eq!(entry.sequence, idx as u64);
        }
        assert_eq!(export.terminal_hash, export.entries.last().unwrap().this_hash);
    }

    /// An empty chain is trivially valid.
    #[test]
    fn test_verify_empty() {
        let log = ChainedAuditLog::new();
        assert!(log.verify_integrity());
        assert!(super::verify_chain(&[]));
    }

    // ── Buffered sink tests ───────────────────────────────────────────────────

    /// Records stay buffered below the capacity threshold and land in the
    /// chain once the batch fills.
    #[test]
    fn test_buffer_flushes_at_capacity() {
        let log = Arc::new(ChainedAuditLog::new());
        let sink = BufferedAuditSink::new(Arc::clone(&log), 3);

        sink.record(make_record("patient/1"));
        sink.record(make_record("patient/2"));
        assert_eq!(log.len(), 0, "below capacity nothing is flushed");
        assert_eq!(sink.pending(), 2);

        sink.record(make_record("patient/3"));
        assert_eq!(log.len(), 3, "hitting capacity flushes the batch");
        assert_eq!(sink.pending(), 0);
    }

    /// An explicit flush drains a partial batch.
    #[test]
    fn test_explicit_flush() {
        let log = Arc::new(ChainedAuditLog::new());
        let sink = BufferedAuditSink::new(Arc::clone(&log), 100);

        sink.record(make_record("patient/1"));
        sink.flush();

        assert_eq!(log.len(), 1);
        assert!(log.verify_integrity());
        assert_eq!(sink.dropped(), 0);
    }

    // ── Metrics tests ─────────────────────────────────────────────────────────

    /// Tag order never splits a series.
    #[test]
    fn test_metrics_tag_order_is_canonical() {
        let metrics = InMemoryMetrics::new();
        metrics.incr("agent_error", &[("agent", "imaging-1"), ("role", "imaging")]);
        metrics.incr("agent_error", &[("role", "imaging"), ("agent", "imaging-1")]);

        assert_eq!(
            metrics.count("agent_error", &[("agent", "imaging-1"), ("role", "imaging")]),
            2
        );
    }

    /// `total` sums across differently-tagged series of the same name.
    #[test]
    fn test_metrics_total_across_tags() {
        let metrics = InMemoryMetrics::new();
        metrics.incr("compliance_violation", &[("rule", "phi-mfa")]);
        metrics.incr("compliance_violation", &[("rule", "phi-auth")]);
        metrics.incr("workflow_execution", &[]);

        assert_eq!(metrics.total("compliance_violation"), 2);
        assert_eq!(metrics.total("workflow_execution"), 1);
    }
}
