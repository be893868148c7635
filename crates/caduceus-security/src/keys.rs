//! Field-key derivation, caching, and rotation.
//!
//! Every field gets its own encryption key, derived from the master key,
//! the field name, and a per-epoch random salt:
//!
//!   field_key = SHA-256(master ‖ 0x1f ‖ field ‖ 0x1f ‖ salt)
//!
//! The salt exists so rotation is real: `rotate()` draws a fresh salt and
//! discards the old one, making values encrypted under the previous epoch
//! undecryptable unless they were re-encrypted first. That is a documented
//! operational constraint, not an automatic migration.
//!
//! The pseudonym key is derived once from the master key alone and never
//! rotates — pseudonyms must stay linkable across records.

use std::collections::HashMap;
use std::sync::RwLock;

use rand::RngCore;
use sha2::{Digest, Sha256};
use tracing::info;

use caduceus_contracts::error::CryptoError;

/// Length in bytes of a derived field key (SHA-256 output).
pub const KEY_LEN: usize = 32;

/// One field's current key material.
#[derive(Clone)]
struct FieldKey {
    /// Rotation epoch, starting at 1. Recorded in every encrypted value.
    epoch: u32,
    key: [u8; KEY_LEN],
}

/// Derives and caches per-field keys under a single coarse lock.
///
/// Read-heavy: encryption looks keys up far more often than rotation
/// replaces them, so the map sits behind an `RwLock`.
pub struct FieldKeyring {
    master: [u8; KEY_LEN],
    pseudonym_key: [u8; KEY_LEN],
    fields: RwLock<HashMap<String, FieldKey>>,
}

impl FieldKeyring {
    pub fn new(master: [u8; KEY_LEN]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(master);
        hasher.update(b"pseudonym");
        let pseudonym_key: [u8; KEY_LEN] = hasher.finalize().into();

        Self {
            master,
            pseudonym_key,
            fields: RwLock::new(HashMap::new()),
        }
    }

    /// A keyring with a random master key. Suitable for a process whose
    /// encrypted values never need to outlive it (tests, demos).
    pub fn ephemeral() -> Self {
        let mut master = [0u8; KEY_LEN];
        rand::thread_rng().fill_bytes(&mut master);
        Self::new(master)
    }

    fn derive(&self, field: &str, salt: &[u8; 16]) -> [u8; KEY_LEN] {
        let mut hasher = Sha256::new();
        hasher.update(self.master);
        hasher.update([0x1f]);
        hasher.update(field.as_bytes());
        hasher.update([0x1f]);
        hasher.update(salt);
        hasher.finalize().into()
    }

    fn fresh_key(&self, field: &str, epoch: u32) -> FieldKey {
        let mut salt = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut salt);
        FieldKey {
            epoch,
            key: self.derive(field, &salt),
        }
    }

    /// The current (epoch, key) for `field`, deriving it on first use.
    pub fn current_key(&self, field: &str) -> (u32, [u8; KEY_LEN]) {
        {
            let fields = self.fields.read().expect("keyring lock poisoned");
            if let Some(fk) = fields.get(field) {
                return (fk.epoch, fk.key);
            }
        }

        let mut fields = self.fields.write().expect("keyring lock poisoned");
        // Re-check under the write lock; another worker may have derived it.
        let fk = fields
            .entry(field.to_string())
            .or_insert_with(|| self.fresh_key(field, 1));
        (fk.epoch, fk.key)
    }

    /// The key for `field` at `epoch`, which must be the current epoch.
    ///
    /// Old epochs are gone by construction — their salts were discarded at
    /// rotation — so a stale epoch yields `CryptoError::KeyUnavailable`.
    pub fn key_for(&self, field: &str, epoch: u32) -> Result<[u8; KEY_LEN], CryptoError> {
        let fields = self.fields.read().expect("keyring lock poisoned");
        match fields.get(field) {
            Some(fk) if fk.epoch == epoch => Ok(fk.key),
            _ => Err(CryptoError::KeyUnavailable {
                field: field.to_string(),
                epoch,
            }),
        }
    }

    /// Rotate the named fields (or every known field when `None`).
    ///
    /// Each rotated field's epoch increments and a new salt/key replaces
    /// the old material. Returns the names of the fields rotated.
    pub fn rotate(&self, fields: Option<&[String]>) -> Vec<String> {
        let mut map = self.fields.write().expect("keyring lock poisoned");

        let targets: Vec<String> = match fields {
            Some(names) => names.to_vec(),
            None => map.keys().cloned().collect(),
        };

        let mut rotated = Vec::new();
        for field in targets {
            let next_epoch = map.get(&field).map(|fk| fk.epoch + 1).unwrap_or(1);
            map.insert(field.clone(), self.fresh_key(&field, next_epoch));
            rotated.push(field);
        }

        info!(fields = rotated.len(), "field keys rotated");
        rotated
    }

    /// The stable key for deterministic pseudonymization.
    pub fn pseudonym_key(&self) -> [u8; KEY_LEN] {
        self.pseudonym_key
    }

    /// Field names with derived keys, for whole-keyring rotation audits.
    pub fn known_fields(&self) -> Vec<String> {
        self.fields
            .read()
            .map(|f| f.keys().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::FieldKeyring;

    /// The same field resolves to the same key until rotation.
    #[test]
    fn current_key_is_stable_per_field() {
        let keyring = FieldKeyring::ephemeral();
        let (epoch_a, key_a) = keyring.current_key("ssn");
        let (epoch_b, key_b) = keyring.current_key("ssn");
        assert_eq!(epoch_a, 1);
        assert_eq!(epoch_a, epoch_b);
        assert_eq!(key_a, key_b);
    }

    /// Distinct fields never share a key.
    #[test]
    fn keys_are_field_scoped() {
        let keyring = FieldKeyring::ephemeral();
        let (_, ssn_key) = keyring.current_key("ssn");
        let (_, mrn_key) = keyring.current_key("mrn");
        assert_ne!(ssn_key, mrn_key);
    }

    /// Rotation bumps the epoch, replaces the key, and invalidates the
    /// previous epoch.
    #[test]
    fn rotation_invalidates_old_epoch() {
        let keyring = FieldKeyring::ephemeral();
        let (epoch, old_key) = keyring.current_key("ssn");

        let rotated = keyring.rotate(Some(&["ssn".to_string()]));
        assert_eq!(rotated, vec!["ssn"]);

        let (new_epoch, new_key) = keyring.current_key("ssn");
        assert_eq!(new_epoch, epoch + 1);
        assert_ne!(old_key, new_key);
        assert!(keyring.key_for("ssn", epoch).is_err());
        assert!(keyring.key_for("ssn", new_epoch).is_ok());
    }

    /// Rotating with `None` touches every known field.
    #[test]
    fn rotate_all_covers_known_fields() {
        let keyring = FieldKeyring::ephemeral();
        keyring.current_key("ssn");
        keyring.current_key("mrn");

        let mut rotated = keyring.rotate(None);
        rotated.sort();
        assert_eq!(rotated, vec!["mrn", "ssn"]);
    }
}
