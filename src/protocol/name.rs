//! Fixed-capacity name field: client names and filenames in the secure
//! upload protocol occupy exactly 255 bytes, zero-padded.

use std::fmt;

use crate::error::{ProtocolError, Result};

pub const NAME_CAPACITY: usize = 255;

#[derive(Clone, PartialEq, Eq)]
pub struct NameField {
    bytes: [u8; NAME_CAPACITY],
}

impl NameField {
    /// Fails if `text` does not fit; content is never truncated.
    pub fn new(text: &str) -> Result<Self> {
        Self::from_content(text.as_bytes())
    }

    pub fn from_content(content: &[u8]) -> Result<Self> {
        if content.len() > NAME_CAPACITY {
            return Err(ProtocolError::NameTooLong {
                len: content.len(),
                capacity: NAME_CAPACITY,
            });
        }
        // NUL terminates the content on the wire
        if content.contains(&0) {
            return Err(ProtocolError::InvalidText { field: "name" });
        }
        let mut bytes = [0u8; NAME_CAPACITY];
        bytes[..content.len()].copy_from_slice(content);
        Ok(Self { bytes })
    }

    /// Take a field exactly as received, padding included.
    pub fn from_wire(bytes: [u8; NAME_CAPACITY]) -> Self {
        Self { bytes }
    }

    /// Content up to the first NUL
    pub fn content(&self) -> &[u8] {
        let end = self
            .bytes
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(NAME_CAPACITY);
        &self.bytes[..end]
    }

    pub fn to_text(&self) -> Result<String> {
        String::from_utf8(self.content().to_vec())
            .map_err(|_| ProtocolError::InvalidText { field: "name" })
    }

    pub fn is_empty(&self) -> bool {
        self.bytes[0] == 0
    }

    pub fn as_bytes(&self) -> &[u8; NAME_CAPACITY] {
        &self.bytes
    }
}

impl fmt::Debug for NameField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NameField({:?})", String::from_utf8_lossy(self.content()))
    }
}

impl fmt::Display for NameField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(self.content()))
    }
}
