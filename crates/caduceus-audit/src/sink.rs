//! The audit sink: buffered, append-only, never in the caller's way.
//!
//! `AuditSink` is deliberately infallible from the caller's perspective —
//! a component that cannot write audit must not take the platform down
//! with it. Failures are swallowed, counted, and surfaced through
//! `dropped()` and the export snapshot instead.
//!
//! `ChainedAuditLog` is the reference store: a `Vec` of hash-chained
//! entries behind a `Mutex`, safe to share across dispatch workers.
//! `BufferedAuditSink` batches records in front of it and flushes on a
//! size threshold or an explicit `flush()`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::{debug, warn};

use caduceus_contracts::audit::AuditRecord;

use crate::{
    chain::{hash_entry, verify_chain},
    event::{AuditExport, ChainEntry},
};

/// Append-only consumer of structured audit events.
///
/// Implementations must never throw back into the caller's control flow:
/// persistence failures are swallowed and surfaced separately. There is no
/// deletion API — rotation and archival are external concerns.
pub trait AuditSink: Send + Sync {
    /// Accept one record. Must not block on I/O in the caller's path and
    /// must not fail visibly.
    fn record(&self, record: AuditRecord);

    /// Force any buffered records into the underlying store.
    fn flush(&self);
}

// ── Chained store ─────────────────────────────────────────────────────────────

/// The mutable interior of a `ChainedAuditLog`.
struct ChainState {
    /// All entries appended so far, in chain order.
    entries: Vec<ChainEntry>,

    /// The next sequence number to assign (starts at 0).
    sequence: u64,

    /// The `this_hash` of the last appended entry, or `GENESIS_HASH`
    /// before any entry exists.
    last_hash: String,
}

/// An in-memory, append-only audit store backed by a SHA-256 hash chain.
///
/// # Thread safety
///
/// `append()` acquires a `Mutex` internally; clones of the wrapping `Arc`
/// may be held by multiple dispatch workers without extra synchronization.
pub struct ChainedAuditLog {
    state: Mutex<ChainState>,
    /// Records that could not be appended (poisoned lock). Never resets.
    dropped: AtomicU64,
}

impl ChainedAuditLog {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ChainState {
                entries: Vec::new(),
                sequence: 0,
                last_hash: ChainEntry::GENESIS_HASH.to_string(),
            }),
            dropped: AtomicU64::new(0),
        }
    }

    /// Append one record to the hash chain.
    ///
    /// Computes `this_hash` from (sequence, prev_hash, record), wraps the
    /// record in a `ChainEntry`, appends it, then advances the sequence
    /// counter and `last_hash`. A poisoned lock drops the record and bumps
    /// the drop counter — append never propagates failure.
    pub fn append(&self, record: AuditRecord) {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(e) => {
                warn!(error = %e, "audit chain lock poisoned; dropping record");
                self.dropped.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        let prev_hash = state.last_hash.clone();
        let sequence = state.sequence;
        let this_hash = hash_entry(sequence, &record, &prev_hash);

        state.entries.push(ChainEntry {
            sequence,
            record,
            prev_hash,
            this_hash: this_hash.clone(),
        });
        state.sequence += 1;
        state.last_hash = this_hash;
    }

    /// Number of entries appended so far.
    pub fn len(&self) -> usize {
        self.state.lock().map(|s| s.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Verify that the in-memory chain has not been tampered with.
    pub fn verify_integrity(&self) -> bool {
        match self.state.lock() {
            Ok(state) => verify_chain(&state.entries),
            Err(_) => false,
        }
    }

    /// Snapshot the chain for an external archiver.
    pub fn export(&self) -> AuditExport {
        let (entries, terminal_hash) = match self.state.lock() {
            Ok(state) => {
                let terminal = state
                    .entries
                    .last()
                    .map(|e| e.this_hash.clone())
                    .unwrap_or_default();
                (state.entries.clone(), terminal)
            }
            Err(_) => (Vec::new(), String::new()),
        };

        AuditExport {
            entries,
            exported_at: Utc::now(),
            terminal_hash,
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

impl Default for ChainedAuditLog {
    fn default() -> Self {
        Self::new()
    }
}

// ── Buffered sink ─────────────────────────────────────────────────────────────

/// A batching front for `ChainedAuditLog`.
///
/// Records accumulate in a buffer and flush into the chain when the
/// buffer reaches `capacity` or on an explicit `flush()`. Buffer failures
/// never reach the caller; they increment the shared drop counter.
pub struct BufferedAuditSink {
    buffer: Mutex<Vec<AuditRecord>>,
    capacity: usize,
    log: Arc<ChainedAuditLog>,
    dropped: AtomicU64,
}

impl BufferedAuditSink {
    /// `capacity` is the batch size that triggers an automatic flush.
    /// A capacity of 1 makes every record flush immediately.
    pub fn new(log: Arc<ChainedAuditLog>, capacity: usize) -> Self {
        Self {
            buffer: Mutex::new(Vec::new()),
            capacity: capacity.max(1),
            log,
            dropped: AtomicU64::new(0),
        }
    }

    /// Records this sink failed to buffer. Surfaced separately from the
    /// caller's control flow.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Number of records currently buffered and not yet in the chain.
    pub fn pending(&self) -> usize {
        self.buffer.lock().map(|b| b.len()).unwrap_or(0)
    }

    fn drain(&self) {
        let batch: Vec<AuditRecord> = match self.buffer.lock() {
            Ok(mut buffer) => buffer.drain(..).collect(),
            Err(e) => {
                warn!(error = %e, "audit buffer lock poisoned; nothing flushed");
                return;
            }
        };

        if batch.is_empty() {
            return;
        }

        debug!(batch_size = batch.len(), "flushing audit batch");
        for record in batch {
            self.log.append(record);
        }
    }
}

impl AuditSink for BufferedAuditSink {
    fn record(&self, record: AuditRecord) {
        let should_flush = match self.buffer.lock() {
            Ok(mut buffer) => {
                buffer.push(record);
                buffer.len() >= self.capacity
            }
            Err(e) => {
                warn!(error = %e, "audit buffer lock poisoned; dropping record");
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        };

        if should_flush {
            self.drain();
        }
    }

    fn flush(&self) {
        self.drain();
    }
}
