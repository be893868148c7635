//! Authenticated per-field encryption.
//!
//! AES-256-GCM under a field-derived key. The wire form is
//!
//!   enc:<epoch>:<hex(nonce ‖ tag ‖ ciphertext)>
//!
//! with a 12-byte nonce and 16-byte authentication tag. Decryption fails
//! with `CryptoError::KeyUnavailable` when the field's key for that epoch
//! is gone (rotation without migration) and `CryptoError::TagVerification`
//! when the tag does not verify — tamper is an error, never silently
//! ignored, and plaintext is never returned on failure.

use std::sync::Arc;

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce};
use rand::RngCore;

use caduceus_contracts::error::CryptoError;

use crate::keys::FieldKeyring;

/// Prefix marking an encrypted value.
const ENC_PREFIX: &str = "enc:";

/// AES-GCM nonce length in bytes.
const NONCE_LEN: usize = 12;

/// AES-GCM authentication tag length in bytes.
const TAG_LEN: usize = 16;

/// Encrypts and decrypts individual field values with field-scoped keys.
pub struct FieldCipher {
    keyring: Arc<FieldKeyring>,
}

impl FieldCipher {
    pub fn new(keyring: Arc<FieldKeyring>) -> Self {
        Self { keyring }
    }

    /// True when `value` carries the encrypted-value wire prefix.
    pub fn is_encrypted(value: &str) -> bool {
        value.starts_with(ENC_PREFIX)
    }

    /// Encrypt `plaintext` under the field's current key.
    pub fn encrypt(&self, field: &str, plaintext: &str) -> Result<String, CryptoError> {
        let (epoch, key_bytes) = self.keyring.current_key(field);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes));

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        // aes-gcm appends the tag to the ciphertext; split it back out so
        // the wire layout is nonce ‖ tag ‖ ciphertext.
        let ct_and_tag = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| CryptoError::Malformed {
                field: field.to_string(),
                reason: "encryption failed".to_string(),
            })?;
        let split = ct_and_tag.len() - TAG_LEN;
        let (ciphertext, tag) = ct_and_tag.split_at(split);

        let mut wire = Vec::with_capacity(NONCE_LEN + TAG_LEN + ciphertext.len());
        wire.extend_from_slice(&nonce_bytes);
        wire.extend_from_slice(tag);
        wire.extend_from_slice(ciphertext);

        Ok(format!("{ENC_PREFIX}{epoch}:{}", hex::encode(wire)))
    }

    /// Decrypt a value produced by `encrypt` for the same field.
    pub fn decrypt(&self, field: &str, value: &str) -> Result<String, CryptoError> {
        let (epoch, wire) = Self::parse_wire(field, value)?;

        let nonce_bytes = &wire[..NONCE_LEN];
        let tag = &wire[NONCE_LEN..NONCE_LEN + TAG_LEN];
        let ciphertext = &wire[NONCE_LEN + TAG_LEN..];

        let key_bytes = self.keyring.key_for(field, epoch)?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes));

        // Reassemble ciphertext ‖ tag for the aead API.
        let mut ct_and_tag = Vec::with_capacity(ciphertext.len() + TAG_LEN);
        ct_and_tag.extend_from_slice(ciphertext);
        ct_and_tag.extend_from_slice(tag);

        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ct_and_tag.as_slice())
            .map_err(|_| CryptoError::TagVerification {
                field: field.to_string(),
            })?;

        String::from_utf8(plaintext).map_err(|_| CryptoError::Malformed {
            field: field.to_string(),
            reason: "decrypted bytes are not valid UTF-8".to_string(),
        })
    }

    /// Parse `enc:<epoch>:<hex>` into (epoch, raw bytes).
    fn parse_wire(field: &str, value: &str) -> Result<(u32, Vec<u8>), CryptoError> {
        let malformed = |reason: &str| CryptoError::Malformed {
            field: field.to_string(),
            reason: reason.to_string(),
        };

        let rest = value
            .strip_prefix(ENC_PREFIX)
            .ok_or_else(|| malformed("missing enc: prefix"))?;
        let (epoch_str, hex_str) = rest
            .split_once(':')
            .ok_or_else(|| malformed("missing epoch separator"))?;
        let epoch: u32 = epoch_str
            .parse()
            .map_err(|_| malformed("epoch is not a number"))?;
        let wire = hex::decode(hex_str).map_err(|_| malformed("payload is not hex"))?;

        if wire.len() < NONCE_LEN + TAG_LEN {
            return Err(malformed("payload shorter than nonce + tag"));
        }
        Ok((epoch, wire))
    }
}
