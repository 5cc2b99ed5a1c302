//! Key material, the session cipher and the upload checksum.

pub mod checksum;
pub mod cipher;
pub mod keypair;

pub use checksum::cksum;
pub use cipher::{SymmetricCipher, SymmetricKey, SYMMETRIC_KEY_SIZE};
pub use keypair::{KeyPair, PeerPublicKey, DEFAULT_KEY_BITS};
