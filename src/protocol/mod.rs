//! Wire protocols
//!
//! All multi-byte integers are little-endian. Two protocols share the codec:
//!
//! - Backup protocol: `user_id:u32 | version:u8 | op:u8 | ...` requests,
//!   `version:u8 | code:u16 | ...` responses
//! - Secure upload protocol: `client_id:[u8;16] | version:u8 | code:u16 | size:u32`
//!   client headers, `version:u8 | code:u16 | size:u32` server headers

pub mod codec;
pub mod message;
pub mod name;
pub mod request;
pub mod response;

use std::fmt;
use uuid::Uuid;

pub use codec::{FrameBuilder, FrameReader, MAX_PAYLOAD_SIZE};
pub use message::{ClientBody, ClientCode, ClientMessage, ServerBody, ServerCode, ServerMessage};
pub use name::{NameField, NAME_CAPACITY};
pub use request::{Request, RequestKind, RequestOp};
pub use response::{Response, ResponseCode, ResponseKind};

/// Default backup protocol version
pub const BACKUP_PROTOCOL_VERSION: u8 = 1;

/// Default secure upload protocol version
pub const HANDSHAKE_PROTOCOL_VERSION: u8 = 3;

/// Numeric user id keying a backup directory
pub type UserId = u32;

/// Client identity assigned by the server at registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ClientId(Uuid);

impl ClientId {
    /// Identity sent before registration completes
    pub const UNREGISTERED: ClientId = ClientId(Uuid::nil());

    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    pub fn is_registered(&self) -> bool {
        !self.0.is_nil()
    }

    /// Backup directory id for files uploaded by this client: the first
    /// four identity bytes read little-endian.
    pub fn storage_id(&self) -> UserId {
        let b = self.0.as_bytes();
        u32::from_le_bytes([b[0], b[1], b[2], b[3]])
    }

    /// Parse the 32-character hex form (hyphenated form is accepted too).
    pub fn parse_hex(text: &str) -> Option<Self> {
        Uuid::try_parse(text.trim()).ok().map(Self)
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}
