use std::collections::BTreeSet;

use crate::crypto::{CryptoError, FieldCipher};
use crate::domain::fields::{merge_fields, FieldMap, FieldValue};

/// Merges per-turn submissions and seals sensitive keys for storage.
///
/// Callers merge and validate on plaintext, `seal` right before persisting,
/// and `reveal` on every read.
#[derive(Debug)]
pub struct FieldNormalizer {
    cipher: FieldCipher,
    sensitive_fields: BTreeSet<String>,
}

impl FieldNormalizer {
    pub fn new<I, S>(cipher: FieldCipher, sensitive_fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { cipher, sensitive_fields: sensitive_fields.into_iter().map(Into::into).collect() }
    }

    pub fn is_sensitive(&self, key: &str) -> bool {
        self.sensitive_fields.contains(key)
    }

    pub fn merge(&self, existing: &FieldMap, incoming: &FieldMap) -> FieldMap {
        merge_fields(existing, incoming)
    }

    /// Encrypts non-empty text under sensitive keys. Other value kinds are
    /// stored as submitted so they read back with their original type.
    pub fn seal(&self, fields: &FieldMap) -> Result<FieldMap, CryptoError> {
        let mut sealed = FieldMap::new();
        for (key, value) in fields {
            let stored = match value {
                FieldValue::Text(plain) if self.is_sensitive(key) && !plain.is_empty() => {
                    FieldValue::Text(self.cipher.encrypt(plain)?)
                }
                _ => value.clone(),
            };
            sealed.insert(key.clone(), stored);
        }
        Ok(sealed)
    }

    /// Seals `merged` for a write over `stored`. Sealed values the turn did
    /// not resubmit keep their stored ciphertext, so a value this key cannot
    /// open is never replaced by its empty read-side placeholder.
    pub fn seal_over(
        &self,
        stored: &FieldMap,
        merged: &FieldMap,
        incoming: &FieldMap,
    ) -> Result<FieldMap, CryptoError> {
        let mut sealed = self.seal(merged)?;
        for (key, value) in stored {
            let untouched = !incoming.contains_key(key) && merged.contains_key(key);
            let sealed_text =
                matches!(value, FieldValue::Text(text) if FieldCipher::is_encrypted(text));
            if untouched && sealed_text {
                sealed.insert(key.clone(), value.clone());
            }
        }
        Ok(sealed)
    }

    /// Any prefixed value is decrypted, whether or not its key is still
    /// configured as sensitive. Failures yield an empty string.
    pub fn reveal(&self, stored: &FieldMap) -> FieldMap {
        stored
            .iter()
            .map(|(key, value)| {
                let revealed = match value {
                    FieldValue::Text(text) if FieldCipher::is_encrypted(text) => {
                        FieldValue::Text(self.cipher.decrypt_or_empty(key, text))
                    }
                    other => other.clone(),
                };
                (key.clone(), revealed)
            })
            .collect()
    }

    pub fn decrypt_failures(&self) -> u64 {
        self.cipher.decrypt_failures()
    }
}
