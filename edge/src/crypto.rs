//! Secrets-at-rest encryption for endpoint signing secrets and custom
//! verification config, adapted from the teacher's `StorageEncryption`
//! (AES-256-GCM with a random nonce prepended to the ciphertext).

use aes_gcm::aead::{Aead, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, KeyInit};
use zeroize::Zeroize;

const NONCE_LEN: usize = 12;

#[derive(thiserror::Error, Debug)]
pub enum CryptoError {
    #[error("encryption key must be 32 bytes, hex-encoded (64 characters)")]
    InvalidKeyLength,
    #[error("encryption key is not valid hex")]
    InvalidKeyEncoding,
    #[error("ciphertext is too short to contain a nonce")]
    Truncated,
    #[error("decryption failed: ciphertext or key is invalid")]
    DecryptionFailed,
}

/// A 32-byte AES-256-GCM key, held only in memory and zeroed on drop.
pub struct SecretKey([u8; 32]);

impl SecretKey {
    pub fn from_hex(hex_key: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(hex_key).map_err(|_| CryptoError::InvalidKeyEncoding)?;
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyLength)?;
        Ok(Self(array))
    }

    pub fn generate() -> Self {
        use aes_gcm::aead::rand_core::RngCore;
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        Self(key)
    }
}

impl Drop for SecretKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Encrypts and decrypts endpoint secrets before they touch the queue
/// store. A webhook's raw payload is never encrypted by this type; only
/// long-lived endpoint configuration (signing secrets, custom
/// verification JSON) is.
#[derive(Clone)]
pub struct SecretCodec {
    cipher: Aes256Gcm,
}

impl SecretCodec {
    pub fn new(key: &SecretKey) -> Self {
        Self {
            cipher: Aes256Gcm::new_from_slice(&key.0).expect("key is exactly 32 bytes"),
        }
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .expect("AES-256-GCM encryption does not fail for valid inputs");
        let mut out = nonce.to_vec();
        out.extend_from_slice(&ciphertext);
        out
    }

    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if data.len() < NONCE_LEN {
            return Err(CryptoError::Truncated);
        }
        let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);
        let nonce: [u8; NONCE_LEN] = nonce_bytes.try_into().expect("checked length above");
        self.cipher
            .decrypt(&nonce.into(), ciphertext)
            .map_err(|_| CryptoError::DecryptionFailed)
    }
}

impl std::fmt::Debug for SecretCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretCodec").field("cipher", &"[redacted]").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_plaintext() {
        let key = SecretKey::generate();
        let codec = SecretCodec::new(&key);
        let plaintext = b"whsec_abcdef1234567890";
        let ciphertext = codec.encrypt(plaintext);
        assert_ne!(ciphertext, plaintext);
        let decrypted = codec.decrypt(&ciphertext).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn rejects_truncated_ciphertext() {
        let key = SecretKey::generate();
        let codec = SecretCodec::new(&key);
        assert!(matches!(codec.decrypt(&[0u8; 4]), Err(CryptoError::Truncated)));
    }

    #[test]
    fn rejects_tampered_ciphertext() {
        let key = SecretKey::generate();
        let codec = SecretCodec::new(&key);
        let mut ciphertext = codec.encrypt(b"secret-value");
        let last = ciphertext.len() - 1;
        ciphertext[last] ^= 0xFF;
        assert!(matches!(
            codec.decrypt(&ciphertext),
            Err(CryptoError::DecryptionFailed)
        ));
    }

    #[test]
    fn from_hex_rejects_wrong_length() {
        assert!(matches!(
            SecretKey::from_hex("abcd"),
            Err(CryptoError::InvalidKeyLength)
        ));
    }

    #[test]
    fn from_hex_rejects_non_hex() {
        let not_hex = "z".repeat(64);
        assert!(matches!(
            SecretKey::from_hex(&not_hex),
            Err(CryptoError::InvalidKeyEncoding)
        ));
    }
}
