//! RSA key material for the key exchange.
//!
//! The client holds a `KeyPair` and sends its SubjectPublicKeyInfo DER; the
//! server wraps that in a `PeerPublicKey` and returns the session key under
//! RSA-OAEP (SHA-1). Private keys persist as base64 PKCS#8 DER.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::rngs::OsRng;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;
use std::fmt;

use crate::error::CryptoError;

pub const DEFAULT_KEY_BITS: usize = 1024;

#[derive(Clone)]
pub struct KeyPair {
    private: RsaPrivateKey,
}

impl KeyPair {
    /// CPU-heavy; async callers should run it on a blocking thread.
    pub fn generate(bits: usize) -> Result<Self, CryptoError> {
        RsaPrivateKey::new(&mut OsRng, bits)
            .map(|private| Self { private })
            .map_err(|source| CryptoError::KeyGeneration { bits, source })
    }

    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        let der = STANDARD
            .decode(encoded.trim())
            .map_err(|e| CryptoError::InvalidKeyEncoding(e.to_string()))?;
        RsaPrivateKey::from_pkcs8_der(&der)
            .map(|private| Self { private })
            .map_err(|e| CryptoError::InvalidKeyEncoding(e.to_string()))
    }

    pub fn to_base64(&self) -> Result<String, CryptoError> {
        let der = self
            .private
            .to_pkcs8_der()
            .map_err(|e| CryptoError::InvalidKeyEncoding(e.to_string()))?;
        Ok(STANDARD.encode(der.as_bytes()))
    }

    pub fn public_key_der(&self) -> Result<Vec<u8>, CryptoError> {
        RsaPublicKey::from(&self.private)
            .to_public_key_der()
            .map(|doc| doc.as_bytes().to_vec())
            .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))
    }

    pub fn bits(&self) -> usize {
        self.private.size() * 8
    }

    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.private
            .decrypt(Oaep::new::<Sha1>(), ciphertext)
            .map_err(|e| CryptoError::Decrypt(e.to_string()))
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("bits", &self.bits())
            .finish_non_exhaustive()
    }
}

/// A client's public key as seen by the server
#[derive(Debug, Clone)]
pub struct PeerPublicKey {
    key: RsaPublicKey,
}

impl PeerPublicKey {
    pub fn from_der(der: &[u8]) -> Result<Self, CryptoError> {
        RsaPublicKey::from_public_key_der(der)
            .map(|key| Self { key })
            .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))
    }

    pub fn to_der(&self) -> Result<Vec<u8>, CryptoError> {
        self.key
            .to_public_key_der()
            .map(|doc| doc.as_bytes().to_vec())
            .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.key
            .encrypt(&mut OsRng, Oaep::new::<Sha1>(), plaintext)
            .map_err(|e| CryptoError::Encrypt(e.to_string()))
    }
}
