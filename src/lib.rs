//! strongbox - encrypted file backup over TCP
//!
//! Two wire protocols share one storage engine:
//!
//! - the backup protocol (`protocol::request` / `protocol::response`):
//!   one request per connection to back up, restore, delete or list files
//! - the secure upload protocol (`protocol::message`): registration,
//!   RSA key exchange, then an AES-encrypted upload verified by checksum

pub mod client;
pub mod config;
pub mod crypto;
pub mod error;
pub mod protocol;
pub mod server;
pub mod storage;
