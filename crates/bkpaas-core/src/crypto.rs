// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! At-rest encryption for credential secrets.
//!
//! Registry passwords are sealed with AES-256-GCM before they reach the
//! database. The sealed form is `base64(nonce || ciphertext)` with a fresh
//! random nonce per seal, so sealing the same password twice yields
//! different rows.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::error::{CoreError, Result};

/// AES-GCM nonce length in bytes.
const NONCE_LEN: usize = 12;

/// Seals and opens credential secrets with a process-wide key.
#[derive(Clone)]
pub struct SecretBox {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for SecretBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never expose key material through Debug.
        f.write_str("SecretBox")
    }
}

impl SecretBox {
    /// Create a secret box from a base64-encoded 32-byte key.
    pub fn new(key_b64: &str) -> Result<Self> {
        let key_bytes = BASE64
            .decode(key_b64)
            .map_err(|e| CoreError::Crypto(format!("secret key is not valid base64: {}", e)))?;
        if key_bytes.len() != 32 {
            return Err(CoreError::Crypto(format!(
                "secret key must decode to 32 bytes, got {}",
                key_bytes.len()
            )));
        }
        Ok(Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes)),
        })
    }

    /// Seal a plaintext secret for storage.
    pub fn seal(&self, plaintext: &str) -> Result<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| CoreError::Crypto("encryption failed".to_string()))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(sealed))
    }

    /// Open a sealed secret read from storage.
    pub fn open(&self, sealed: &str) -> Result<String> {
        let bytes = BASE64
            .decode(sealed)
            .map_err(|e| CoreError::Crypto(format!("sealed secret is not valid base64: {}", e)))?;
        if bytes.len() < NONCE_LEN {
            return Err(CoreError::Crypto("sealed secret is truncated".to_string()));
        }
        let (nonce, ciphertext) = bytes.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CoreError::Crypto("decryption failed".to_string()))?;
        String::from_utf8(plaintext)
            .map_err(|_| CoreError::Crypto("decrypted secret is not UTF-8".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 32 zero bytes, base64-encoded. Test-only key.
    const TEST_KEY: &str = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=";

    #[test]
    fn test_seal_open_round_trip() {
        let secrets = SecretBox::new(TEST_KEY).unwrap();
        let sealed = secrets.seal("hunter2").unwrap();
        assert_ne!(sealed, "hunter2");
        assert_eq!(secrets.open(&sealed).unwrap(), "hunter2");
    }

    #[test]
    fn test_fresh_nonce_per_seal() {
        let secrets = SecretBox::new(TEST_KEY).unwrap();
        let a = secrets.seal("same").unwrap();
        let b = secrets.seal("same").unwrap();
        assert_ne!(a, b);
        assert_eq!(secrets.open(&a).unwrap(), secrets.open(&b).unwrap());
    }

    #[test]
    fn test_rejects_bad_keys() {
        assert!(SecretBox::new("not-base64!!!").is_err());
        // Valid base64 but wrong length.
        assert!(SecretBox::new("c2hvcnQ=").is_err());
    }

    #[test]
    fn test_open_rejects_tampered_input() {
        let secrets = SecretBox::new(TEST_KEY).unwrap();
        let sealed = secrets.seal("hunter2").unwrap();
        let mut bytes = BASE64.decode(&sealed).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        assert!(secrets.open(&BASE64.encode(bytes)).is_err());
        assert!(secrets.open("AAAA").is_err());
    }
}
