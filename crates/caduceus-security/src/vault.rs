//! The token vault.
//!
//! Tokenization replaces a value with an opaque reference resolvable only
//! through the vault. Tokens are 128 bits of randomness rendered as
//! `tok_<hex>` — never guessable, never derived from the value, and never
//! reused across fields (each tokenize call draws fresh material and the
//! vault rejects collisions by redrawing).

use std::collections::HashMap;
use std::sync::Mutex;

use rand::RngCore;
use tracing::debug;

use caduceus_contracts::error::{CaduceusError, CaduceusResult};

/// Prefix marking a vault token.
const TOKEN_PREFIX: &str = "tok_";

struct VaultEntry {
    field: String,
    value: String,
}

/// Key-indexed store mapping token → (field, original value).
///
/// A single coarse `Mutex` is sufficient: tokenization is not a hot path
/// and the single-writer-many-reader discipline keeps invariants local.
/// The narrow surface (tokenize/detokenize/len) allows a later swap to
/// persistent storage without touching call sites.
pub struct TokenVault {
    entries: Mutex<HashMap<String, VaultEntry>>,
}

impl TokenVault {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Store `value` for `field` and return the fresh opaque token.
    pub fn tokenize(&self, field: &str, value: &str) -> String {
        let mut entries = self.entries.lock().expect("vault lock poisoned");

        // Redraw on collision. With 128-bit tokens this loop effectively
        // never repeats; the check keeps the no-reuse invariant explicit.
        let token = loop {
            let mut raw = [0u8; 16];
            rand::thread_rng().fill_bytes(&mut raw);
            let candidate = format!("{TOKEN_PREFIX}{}", hex::encode(raw));
            if !entries.contains_key(&candidate) {
                break candidate;
            }
        };

        debug!(field = %field, "value tokenized");
        entries.insert(
            token.clone(),
            VaultEntry {
                field: field.to_string(),
                value: value.to_string(),
            },
        );
        token
    }

    /// Resolve a token back to its original value.
    ///
    /// Callers go through `SecurityProcessor::detokenize` so the reversal
    /// is audited; this method only does the lookup.
    pub fn detokenize(&self, token: &str) -> CaduceusResult<String> {
        let entries = self.entries.lock().expect("vault lock poisoned");
        entries
            .get(token)
            .map(|entry| entry.value.clone())
            .ok_or_else(|| CaduceusError::UnknownToken {
                token: token.to_string(),
            })
    }

    /// The field a token was issued for, when it exists.
    pub fn field_of(&self, token: &str) -> Option<String> {
        let entries = self.entries.lock().expect("vault lock poisoned");
        entries.get(token).map(|entry| entry.field.clone())
    }

    /// True when `value` carries the token prefix.
    pub fn is_token(value: &str) -> bool {
        value.starts_with(TOKEN_PREFIX)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TokenVault {
    fn default() -> Self {
        Self::new()
    }
}
