//! Per-user backup storage
//!
//! Files live at `<root>/<user_id>/<filename>`. The registry hands out one
//! shared directory object per user; each directory serializes its own
//! filesystem operations while different users proceed in parallel.

pub mod directory;
pub mod registry;

pub use directory::{validate_filename, UserBackupDirectory};
pub use registry::BackupRegistry;
