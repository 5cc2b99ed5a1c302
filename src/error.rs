//! Error types
//!
//! One enum per concern. Storage errors are matched by the session dispatcher
//! and turned into protocol responses; everything else ends the session.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::protocol::UserId;

/// Framing, protocol and field validation errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The byte source ended before a fixed-size field was complete
    #[error("Short read: stream ended before {needed} bytes were available")]
    ShortRead { needed: usize },

    /// Declared payload length disagrees with what the message decoded
    #[error("Payload length mismatch: declared {declared} bytes, decoded {consumed}")]
    LengthMismatch { declared: u32, consumed: usize },

    #[error("Payload size {len} exceeds maximum allowed size {max}")]
    PayloadTooLarge { len: u64, max: u32 },

    #[error("Protocol version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: u8, actual: u8 },

    #[error("Invalid request opcode: {0}")]
    InvalidOpcode(u8),

    #[error("Invalid response code: {0}")]
    InvalidResponseCode(u16),

    #[error("Invalid message code: {0}")]
    InvalidMessageCode(u16),

    /// A valid message arrived at the wrong step of a conversation
    #[error("Unexpected message: expected {expected}, got code {actual}")]
    UnexpectedMessage { expected: &'static str, actual: u16 },

    #[error("Name is {len} bytes, capacity is {capacity}")]
    NameTooLong { len: usize, capacity: usize },

    #[error("{field} is {len} bytes, maximum is {max}")]
    FieldTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },

    #[error("Invalid text in {field}")]
    InvalidText { field: &'static str },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Key material and cipher errors
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Failed to generate {bits}-bit RSA key: {source}")]
    KeyGeneration {
        bits: usize,
        #[source]
        source: rsa::Error,
    },

    #[error("Invalid private key encoding: {0}")]
    InvalidKeyEncoding(String),

    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("Symmetric key must be {expected} bytes, got {actual}")]
    InvalidSymmetricKeyLength { expected: usize, actual: usize },

    #[error("Encryption failed: {0}")]
    Encrypt(String),

    #[error("Decryption failed: {0}")]
    Decrypt(String),
}

/// Backup storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("No backup directory for user {0}")]
    UserNotFound(UserId),

    #[error("File not found: {}", path.display())]
    FileNotFound { path: PathBuf },

    #[error("File already exists: {}", path.display())]
    AlreadyExists { path: PathBuf },

    #[error("Failed to delete {}: {source}", path.display())]
    DeleteFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid filename: {0:?}")]
    InvalidFilename(String),

    #[error("Invalid client directory {}: {reason}", path.display())]
    InvalidClientDirectory { path: PathBuf, reason: String },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Errors surfaced to client code
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("Server rejected registration of {name:?}")]
    RegistrationRejected { name: String },

    #[error("Server answered for {actual}, expected {expected}")]
    IdentityMismatch { expected: String, actual: String },

    #[error("File not found on server: {0}")]
    FileNotFound(String),

    #[error("Server has no backup files for this user")]
    NoBackupFiles,

    #[error("Server failed to handle the request")]
    ServerFailure,

    #[error("Unexpected response code {0}")]
    UnexpectedResponse(u16),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Errors that end a server-side session
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Unknown client {0}")]
    UnknownClient(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Configuration and local identity file errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid {}: {reason}", path.display())]
    InvalidFile { path: PathBuf, reason: String },

    #[error("Invalid config {}: {source}", path.display())]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

pub type Result<T, E = ProtocolError> = std::result::Result<T, E>;
