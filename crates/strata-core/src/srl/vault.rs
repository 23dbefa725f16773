//! # Credential Vault
//!
//! Symmetric, authenticated encryption for SRL credentials.
//!
//! The key is derived once per process via PBKDF2-HMAC-SHA256 from a
//! master passphrase loaded from the environment. Decrypted credentials
//! exist only inside a `with_decrypted` scope; the plaintext buffer is
//! zeroed when the scope exits and never logged, returned, or stored.

use crate::types::CoreError;
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use pbkdf2::pbkdf2_hmac;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroizing;

/// PBKDF2 iteration count. High enough to make passphrase brute force
/// expensive; the derivation runs once per process.
pub const PBKDF2_ITERATIONS: u32 = 150_000;

const KEY_LENGTH_BYTES: usize = 32;
const NONCE_LENGTH_BYTES: usize = 12;

/// An encrypted credential blob.
///
/// Serializable for the durable store only; it never appears in any
/// externally visible view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedCredentials {
    /// AES-256-GCM ciphertext (includes the auth tag), base64.
    pub ciphertext: String,
    /// The 96-bit nonce, base64.
    pub nonce: String,
}

/// The process-wide credential vault.
///
/// Holds only the derived key, wrapped in a zeroizing buffer.
pub struct CredentialVault {
    key: Zeroizing<[u8; KEY_LENGTH_BYTES]>,
}

impl std::fmt::Debug for CredentialVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The key never appears in debug output.
        f.debug_struct("CredentialVault").finish_non_exhaustive()
    }
}

impl CredentialVault {
    /// Derive a vault from a master passphrase and a deployment salt.
    #[must_use]
    pub fn derive(master_key: &str, salt: &str) -> Self {
        let mut key = Zeroizing::new([0u8; KEY_LENGTH_BYTES]);
        pbkdf2_hmac::<Sha256>(
            master_key.as_bytes(),
            salt.as_bytes(),
            PBKDF2_ITERATIONS,
            key.as_mut_slice(),
        );
        Self { key }
    }

    /// Load the master passphrase from an environment variable and derive
    /// the vault. The passphrase buffer is zeroed after derivation.
    pub fn from_env(var: &str, salt: &str) -> Result<Self, CoreError> {
        let passphrase = Zeroizing::new(
            std::env::var(var).map_err(|_| CoreError::MasterKeyUnavailable(var.to_string()))?,
        );
        if passphrase.is_empty() {
            return Err(CoreError::MasterKeyUnavailable(var.to_string()));
        }
        Ok(Self::derive(&passphrase, salt))
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(self.key.as_slice()))
    }

    /// Encrypt a credential string under a fresh random nonce.
    pub fn encrypt(&self, plaintext: &str) -> Result<EncryptedCredentials, CoreError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher()
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| CoreError::CredentialDecryptionFailed)?;
        Ok(EncryptedCredentials {
            ciphertext: BASE64.encode(ciphertext),
            nonce: BASE64.encode(nonce),
        })
    }

    /// Run a closure over the decrypted credentials.
    ///
    /// The plaintext lives in a zeroizing buffer for the duration of the
    /// closure and is wiped on every exit path. The closure's return value
    /// must not smuggle the plaintext out; adapters receive `&str` and
    /// return fetched bytes.
    pub fn with_decrypted<R>(
        &self,
        encrypted: &EncryptedCredentials,
        scope: impl FnOnce(&str) -> R,
    ) -> Result<R, CoreError> {
        let ciphertext = BASE64
            .decode(&encrypted.ciphertext)
            .map_err(|_| CoreError::CredentialDecryptionFailed)?;
        let nonce_bytes = BASE64
            .decode(&encrypted.nonce)
            .map_err(|_| CoreError::CredentialDecryptionFailed)?;
        if nonce_bytes.len() != NONCE_LENGTH_BYTES {
            return Err(CoreError::CredentialDecryptionFailed);
        }

        let plaintext = Zeroizing::new(
            self.cipher()
                .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_ref())
                .map_err(|_| CoreError::CredentialDecryptionFailed)?,
        );
        let text =
            std::str::from_utf8(&plaintext).map_err(|_| CoreError::CredentialDecryptionFailed)?;
        Ok(scope(text))
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let vault = CredentialVault::derive("correct horse battery staple", "test-salt");
        let encrypted = vault.encrypt("user:hunter2").expect("encrypt");

        let seen = vault
            .with_decrypted(&encrypted, |creds| creds.to_string())
            .expect("decrypt");
        assert_eq!(seen, "user:hunter2");
    }

    #[test]
    fn blob_does_not_contain_plaintext() {
        let vault = CredentialVault::derive("passphrase", "salt");
        let encrypted = vault.encrypt("super-secret-token").expect("encrypt");
        assert!(!encrypted.ciphertext.contains("super-secret-token"));
        assert!(!encrypted.nonce.contains("super-secret-token"));
    }

    #[test]
    fn nonces_differ_between_encryptions() {
        let vault = CredentialVault::derive("passphrase", "salt");
        let a = vault.encrypt("same").expect("encrypt");
        let b = vault.encrypt("same").expect("encrypt");
        assert_ne!(a.nonce, b.nonce);
    }

    #[test]
    fn wrong_key_fails_authentication() {
        let vault = CredentialVault::derive("right key", "salt");
        let other = CredentialVault::derive("wrong key", "salt");
        let encrypted = vault.encrypt("secret").expect("encrypt");

        assert!(matches!(
            other.with_decrypted(&encrypted, |_| ()),
            Err(CoreError::CredentialDecryptionFailed)
        ));
    }

    #[test]
    fn tampered_ciphertext_rejected() {
        let vault = CredentialVault::derive("key", "salt");
        let mut encrypted = vault.encrypt("secret").expect("encrypt");
        encrypted.ciphertext = BASE64.encode(b"forged bytes that were never sealed");

        assert!(matches!(
            vault.with_decrypted(&encrypted, |_| ()),
            Err(CoreError::CredentialDecryptionFailed)
        ));
    }

    #[test]
    fn missing_env_key_is_reported() {
        assert!(matches!(
            CredentialVault::from_env("STRATA_TEST_KEY_THAT_DOES_NOT_EXIST", "salt"),
            Err(CoreError::MasterKeyUnavailable(_))
        ));
    }
}
