//! AES-128-CBC session cipher.
//!
//! The IV is fixed at zero to stay compatible with existing peers, so equal
//! plaintexts under one key encrypt identically. Every key exchange issues a
//! fresh key, which keeps that repetition inside a single session.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::rngs::OsRng;
use rand::RngCore;
use std::fmt;

use crate::error::CryptoError;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

pub const SYMMETRIC_KEY_SIZE: usize = 16;

const ZERO_IV: [u8; 16] = [0u8; 16];

#[derive(Clone, PartialEq, Eq)]
pub struct SymmetricKey([u8; SYMMETRIC_KEY_SIZE]);

impl SymmetricKey {
    pub fn generate() -> Self {
        let mut key = [0u8; SYMMETRIC_KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        Self(key)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        <[u8; SYMMETRIC_KEY_SIZE]>::try_from(bytes)
            .map(Self)
            .map_err(|_| CryptoError::InvalidSymmetricKeyLength {
                expected: SYMMETRIC_KEY_SIZE,
                actual: bytes.len(),
            })
    }

    pub fn as_bytes(&self) -> &[u8; SYMMETRIC_KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SymmetricKey(..)")
    }
}

#[derive(Debug, Clone)]
pub struct SymmetricCipher {
    key: SymmetricKey,
}

impl SymmetricCipher {
    /// Fails unless `key` is exactly 16 bytes.
    pub fn new(key: &[u8]) -> Result<Self, CryptoError> {
        Ok(Self::from_key(SymmetricKey::from_slice(key)?))
    }

    pub fn from_key(key: SymmetricKey) -> Self {
        Self { key }
    }

    pub fn key(&self) -> &SymmetricKey {
        &self.key
    }

    /// PKCS#7-padded ciphertext; always a non-empty multiple of 16 bytes.
    pub fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        Aes128CbcEnc::new(&self.key.0.into(), &ZERO_IV.into())
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext)
    }

    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        Aes128CbcDec::new(&self.key.0.into(), &ZERO_IV.into())
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| {
                CryptoError::Decrypt(format!(
                    "invalid padding in {}-byte ciphertext",
                    ciphertext.len()
                ))
            })
    }
}
