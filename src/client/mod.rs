//! Client side of both protocols.

pub mod backup;
pub mod session;
pub mod upload;

pub use backup::BackupClient;
pub use session::SecureChannel;
pub use upload::{ClientIdentity, UploadEngine, UploadOutcome, UploadState, DEFAULT_MAX_ATTEMPTS};
