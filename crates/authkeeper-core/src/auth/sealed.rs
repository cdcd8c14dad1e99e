//! At-rest sealing for file-backed credential storage.
//!
//! Layout of a sealed blob: `salt (16) | nonce (12) | ciphertext`. The key is
//! derived from a passphrase with Argon2id (default parameters) and the salt;
//! the cipher is ChaCha20-Poly1305 with a fresh random nonce per write.

use argon2::Argon2;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;

use super::storage::StorageError;

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

pub struct Sealer {
    salt: [u8; SALT_LEN],
    cipher: ChaCha20Poly1305,
}

impl Sealer {
    /// New sealer with a random salt
    pub fn new(passphrase: &str) -> Result<Self, StorageError> {
        let mut salt = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        Self::with_salt(passphrase, salt)
    }

    /// Sealer able to open `blob`, reusing the salt stored in its header
    pub fn for_blob(passphrase: &str, blob: &[u8]) -> Result<Self, StorageError> {
        let salt = Self::header_salt(blob)?;
        Self::with_salt(passphrase, salt)
    }

    fn with_salt(passphrase: &str, salt: [u8; SALT_LEN]) -> Result<Self, StorageError> {
        let mut key = [0u8; KEY_LEN];
        Argon2::default()
            .hash_password_into(passphrase.as_bytes(), &salt, &mut key)
            .map_err(|e| StorageError::Crypto(format!("Key derivation failed: {}", e)))?;

        Ok(Self {
            salt,
            cipher: ChaCha20Poly1305::new(Key::from_slice(&key)),
        })
    }

    fn header_salt(blob: &[u8]) -> Result<[u8; SALT_LEN], StorageError> {
        if blob.len() < SALT_LEN + NONCE_LEN {
            return Err(StorageError::Corrupt(format!(
                "sealed blob too short ({} bytes)",
                blob.len()
            )));
        }
        let mut salt = [0u8; SALT_LEN];
        salt.copy_from_slice(&blob[..SALT_LEN]);
        Ok(salt)
    }

    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, StorageError> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|e| StorageError::Crypto(format!("Encryption failed: {}", e)))?;

        let mut blob = Vec::with_capacity(SALT_LEN + NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&self.salt);
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);
        Ok(blob)
    }

    pub fn open(&self, blob: &[u8]) -> Result<Vec<u8>, StorageError> {
        let salt = Self::header_salt(blob)?;
        if salt != self.salt {
            return Err(StorageError::Crypto(
                "blob was sealed under a different salt".to_string(),
            ));
        }
        let nonce = &blob[SALT_LEN..SALT_LEN + NONCE_LEN];
        self.cipher
            .decrypt(Nonce::from_slice(nonce), &blob[SALT_LEN + NONCE_LEN..])
            .map_err(|_| StorageError::Crypto("Decryption failed (wrong passphrase?)".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_and_open() {
        let sealer = Sealer::new("correct horse").unwrap();
        let blob = sealer.seal(b"{\"access_token\":\"a\"}").unwrap();

        assert!(!blob.windows(12).any(|w| w == b"access_token"));
        assert_eq!(sealer.open(&blob).unwrap(), b"{\"access_token\":\"a\"}");

        let reopened = Sealer::for_blob("correct horse", &blob).unwrap();
        assert_eq!(reopened.open(&blob).unwrap(), b"{\"access_token\":\"a\"}");
    }

    #[test]
    fn test_wrong_passphrase_fails() {
        let blob = Sealer::new("right").unwrap().seal(b"secret").unwrap();
        let wrong = Sealer::for_blob("wrong", &blob).unwrap();
        assert!(matches!(wrong.open(&blob), Err(StorageError::Crypto(_))));
    }

    #[test]
    fn test_short_blob_is_corrupt() {
        assert!(matches!(
            Sealer::for_blob("x", &[0u8; 5]),
            Err(StorageError::Corrupt(_))
        ));
    }
}
