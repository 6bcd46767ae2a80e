//! Client-side sealing of the vault password for the secure unlock path.
//!
//! A fresh key and IV are generated for every request and sent alongside the
//! ciphertext, since there is no pre-shared secret. This keeps the password
//! out of request-body logs; it is not confidentiality against anyone who
//! can read the whole request.

use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::Aes256Gcm;
use base64::{engine::general_purpose::STANDARD, Engine};
use chacha20poly1305::ChaCha20Poly1305;
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::AuthError;

/// Symmetric key size in bytes (256-bit).
const KEY_LEN: usize = 32;

/// Nonce size in bytes (96-bit), shared by both suites.
const IV_LEN: usize = 12;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CipherSuite {
    #[default]
    #[serde(rename = "aes-256-gcm")]
    Aes256Gcm,
    #[serde(rename = "chacha20-poly1305")]
    ChaCha20Poly1305,
}

impl CipherSuite {
    /// Algorithm name announced in the encryption metadata.
    pub fn algorithm(&self) -> &'static str {
        match self {
            CipherSuite::Aes256Gcm => "AES-GCM",
            CipherSuite::ChaCha20Poly1305 => "ChaCha20-Poly1305",
        }
    }
}

/// Ciphertext (with auth tag appended) plus the per-request key material.
pub struct SealedPassword {
    pub suite: CipherSuite,
    pub ciphertext: Vec<u8>,
    pub key: Zeroizing<Vec<u8>>,
    pub iv: Vec<u8>,
}

impl SealedPassword {
    pub fn ciphertext_b64(&self) -> String {
        STANDARD.encode(&self.ciphertext)
    }

    pub fn key_b64(&self) -> Zeroizing<String> {
        Zeroizing::new(STANDARD.encode(self.key.as_slice()))
    }

    pub fn iv_b64(&self) -> String {
        STANDARD.encode(&self.iv)
    }
}

pub trait PasswordSealer: Send + Sync {
    /// Encrypt under a fresh key. Fails with `AuthError::CryptoUnavailable`.
    fn seal(&self, password: &str) -> Result<SealedPassword, AuthError>;
}

/// AEAD sealer backed by the configured suite.
#[derive(Debug, Clone, Copy, Default)]
pub struct AeadSealer {
    suite: CipherSuite,
}

impl AeadSealer {
    pub fn new(suite: CipherSuite) -> Self {
        Self { suite }
    }

    fn random(len: usize) -> Result<Vec<u8>, AuthError> {
        let mut bytes = vec![0u8; len];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|e| AuthError::CryptoUnavailable(format!("random source: {}", e)))?;
        Ok(bytes)
    }
}

impl PasswordSealer for AeadSealer {
    fn seal(&self, password: &str) -> Result<SealedPassword, AuthError> {
        let key = Zeroizing::new(Self::random(KEY_LEN)?);
        let iv = Self::random(IV_LEN)?;
        let nonce = GenericArray::from_slice(&iv);

        let ciphertext = match self.suite {
            CipherSuite::Aes256Gcm => Aes256Gcm::new_from_slice(&key)
                .map_err(|e| AuthError::CryptoUnavailable(format!("invalid key length: {e}")))?
                .encrypt(nonce, password.as_bytes()),
            CipherSuite::ChaCha20Poly1305 => ChaCha20Poly1305::new_from_slice(&key)
                .map_err(|e| AuthError::CryptoUnavailable(format!("invalid key length: {e}")))?
                .encrypt(nonce, password.as_bytes()),
        }
        .map_err(|e| AuthError::CryptoUnavailable(format!("encryption error: {e}")))?;

        Ok(SealedPassword {
            suite: self.suite,
            ciphertext,
            key,
            iv,
        })
    }
}
