use std::sync::atomic::{AtomicU64, Ordering};

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::{Rng, RngCore};
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

/// Marker carried by every value sealed with [`FieldCipher`].
pub const ENCRYPTED_PREFIX: &str = "enc:v1:";
const NONCE_LEN: usize = 12;
const SESSION_TOKEN_BYTES: usize = 32;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("encryption secret is empty")]
    EmptySecret,
    #[error("stored value is not valid base64: {0}")]
    Encoding(String),
    #[error("cipher operation failed")]
    Cipher,
}

/// Reversible AES-256-GCM encryption for sensitive conversation fields.
///
/// The key is the SHA-256 digest of the operator secret. Sealed values look
/// like `enc:v1:<base64(nonce || ciphertext)>`; anything without the prefix is
/// treated as legacy plaintext.
pub struct FieldCipher {
    cipher: Aes256Gcm,
    decrypt_failures: AtomicU64,
}

impl std::fmt::Debug for FieldCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldCipher")
            .field("decrypt_failures", &self.decrypt_failures())
            .finish_non_exhaustive()
    }
}

impl FieldCipher {
    pub fn from_secret(secret: &SecretString) -> Result<Self, CryptoError> {
        let raw = secret.expose_secret();
        if raw.trim().is_empty() {
            return Err(CryptoError::EmptySecret);
        }
        let key = Sha256::digest(raw.as_bytes());
        let cipher = Aes256Gcm::new_from_slice(key.as_slice()).map_err(|_| CryptoError::Cipher)?;
        Ok(Self { cipher, decrypt_failures: AtomicU64::new(0) })
    }

    pub fn is_encrypted(value: &str) -> bool {
        value.starts_with(ENCRYPTED_PREFIX)
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        if Self::is_encrypted(plaintext) {
            return Ok(plaintext.to_string());
        }

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext =
            self.cipher.encrypt(nonce, plaintext.as_bytes()).map_err(|_| CryptoError::Cipher)?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(format!("{ENCRYPTED_PREFIX}{}", BASE64.encode(sealed)))
    }

    pub fn decrypt(&self, stored: &str) -> Result<String, CryptoError> {
        let Some(encoded) = stored.strip_prefix(ENCRYPTED_PREFIX) else {
            return Ok(stored.to_string());
        };

        let raw = BASE64
            .decode(encoded.as_bytes())
            .map_err(|error| CryptoError::Encoding(error.to_string()))?;
        if raw.len() <= NONCE_LEN {
            return Err(CryptoError::Cipher);
        }
        let (nonce_bytes, ciphertext) = raw.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| CryptoError::Cipher)?;
        String::from_utf8(plaintext).map_err(|_| CryptoError::Cipher)
    }

    /// Read-path decrypt: failures (wrong key after rotation, corrupt data)
    /// degrade to an empty string and are counted.
    pub fn decrypt_or_empty(&self, field: &str, stored: &str) -> String {
        match self.decrypt(stored) {
            Ok(value) => value,
            Err(error) => {
                let total = self.decrypt_failures.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    event_name = "security.field_decrypt_failed",
                    field = %field,
                    decrypt_failures = total,
                    error = %error,
                    "sensitive field could not be decrypted; returning empty value"
                );
                String::new()
            }
        }
    }

    pub fn decrypt_failures(&self) -> u64 {
        self.decrypt_failures.load(Ordering::Relaxed)
    }
}

/// Keyed hashing for one-time passcodes, bound to the challenge id.
pub struct OtpHasher {
    pepper: SecretString,
}

impl OtpHasher {
    pub fn new(pepper: SecretString) -> Result<Self, CryptoError> {
        if pepper.expose_secret().trim().is_empty() {
            return Err(CryptoError::EmptySecret);
        }
        Ok(Self { pepper })
    }

    fn mac(&self, challenge_id: &str, code: &str) -> Result<HmacSha256, CryptoError> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(self.pepper.expose_secret().as_bytes())
            .map_err(|_| CryptoError::Cipher)?;
        mac.update(challenge_id.as_bytes());
        mac.update(b":");
        mac.update(code.trim().as_bytes());
        Ok(mac)
    }

    pub fn hash(&self, challenge_id: &str, code: &str) -> Result<String, CryptoError> {
        let mac = self.mac(challenge_id, code)?;
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Constant-time comparison against a stored hex digest.
    pub fn verify(&self, challenge_id: &str, code: &str, expected_hex: &str) -> bool {
        let Ok(expected) = hex::decode(expected_hex) else {
            return false;
        };
        match self.mac(challenge_id, code) {
            Ok(mac) => mac.verify_slice(&expected).is_ok(),
            Err(_) => false,
        }
    }
}

pub fn generate_otp_code() -> String {
    let code: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("{code:06}")
}

pub fn generate_session_token() -> String {
    let mut bytes = [0u8; SESSION_TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub fn sha256_hex(payload: &[u8]) -> String {
    hex::encode(Sha256::digest(payload))
}

/// Fresh random token used to mark an in-flight claim on a row.
pub fn generate_claim_token() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;

    use super::{
        generate_otp_code, generate_session_token, CryptoError, FieldCipher, OtpHasher,
        ENCRYPTED_PREFIX,
    };

    fn cipher(secret: &str) -> FieldCipher {
        FieldCipher::from_secret(&SecretString::from(secret.to_string())).expect("cipher")
    }

    #[test]
    fn encrypt_then_decrypt_restores_plaintext() {
        let cipher = cipher("field-key");
        let sealed = cipher.encrypt("ada@example.com").expect("encrypt");

        assert!(sealed.starts_with(ENCRYPTED_PREFIX));
        assert!(!sealed.contains("ada@example.com"));
        assert_eq!(cipher.decrypt(&sealed).expect("decrypt"), "ada@example.com");
    }

    #[test]
    fn already_sealed_values_are_not_sealed_twice() {
        let cipher = cipher("field-key");
        let sealed = cipher.encrypt("555-0100").expect("encrypt");
        assert_eq!(cipher.encrypt(&sealed).expect("re-encrypt"), sealed);
    }

    #[test]
    fn legacy_plaintext_passes_through() {
        let cipher = cipher("field-key");
        assert_eq!(cipher.decrypt("legacy@example.com").expect("plain"), "legacy@example.com");
        assert_eq!(cipher.decrypt_or_empty("email", "legacy@example.com"), "legacy@example.com");
        assert_eq!(cipher.decrypt_failures(), 0);
    }

    #[test]
    fn rotated_key_degrades_to_empty_and_is_counted() {
        let old = cipher("old-key");
        let new = cipher("new-key");
        let sealed = old.encrypt("ada@example.com").expect("encrypt");

        assert_eq!(new.decrypt(&sealed), Err(CryptoError::Cipher));
        assert_eq!(new.decrypt_or_empty("email", &sealed), "");
        assert_eq!(new.decrypt_or_empty("email", "enc:v1:!!notbase64"), "");
        assert_eq!(new.decrypt_failures(), 2);
    }

    #[test]
    fn empty_secret_is_rejected() {
        let result = FieldCipher::from_secret(&SecretString::from("  ".to_string()));
        assert!(matches!(result, Err(CryptoError::EmptySecret)));
    }

    #[test]
    fn otp_hash_is_bound_to_challenge_and_verifies() {
        let hasher = OtpHasher::new(SecretString::from("pepper".to_string())).expect("hasher");
        let digest = hasher.hash("challenge-1", "123456").expect("hash");

        assert!(hasher.verify("challenge-1", "123456", &digest));
        assert!(hasher.verify("challenge-1", " 123456 ", &digest));
        assert!(!hasher.verify("challenge-1", "654321", &digest));
        assert!(!hasher.verify("challenge-2", "123456", &digest));
        assert!(!hasher.verify("challenge-1", "123456", "not-hex"));
    }

    #[test]
    fn generated_codes_and_tokens_have_expected_shape() {
        let code = generate_otp_code();
        assert_eq!(code.len(), 6);
        assert!(code.chars().all(|ch| ch.is_ascii_digit()));

        let token = generate_session_token();
        assert_eq!(token.len(), 64);
        assert_ne!(token, generate_session_token());
    }
}
