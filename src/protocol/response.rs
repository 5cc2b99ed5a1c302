//! Backup protocol responses.
//!
//! Wire format: `version:u8 | code:u16`, then per code
//! `name_len:u16 | name` and `payload_len:u32 | payload`.

use bytes::Bytes;
use tokio::io::AsyncRead;

use super::codec::{FrameBuilder, FrameReader};
use crate::error::{ProtocolError, Result};

// =============================================================================
// Response Codes
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ResponseCode {
    SuccessfulRestore = 210,
    SuccessfulListFiles = 211,
    SuccessfulBackupOrDelete = 212,
    FileNotFound = 1001,
    NoBackupFilesForClient = 1002,
    ServerError = 1003,
}

impl ResponseCode {
    pub fn from_u16(v: u16) -> Option<Self> {
        match v {
            210 => Some(Self::SuccessfulRestore),
            211 => Some(Self::SuccessfulListFiles),
            212 => Some(Self::SuccessfulBackupOrDelete),
            1001 => Some(Self::FileNotFound),
            1002 => Some(Self::NoBackupFilesForClient),
            1003 => Some(Self::ServerError),
            _ => None,
        }
    }
}

// =============================================================================
// Response
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseKind {
    SuccessfulRestore { filename: String, payload: Bytes },
    /// `filename` is a random label; `payload` holds one name per line
    SuccessfulListFiles { filename: String, payload: Bytes },
    SuccessfulBackupOrDelete { filename: String },
    FileNotFound { filename: String },
    NoBackupFilesForClient,
    ServerError,
}

impl ResponseKind {
    pub fn code(&self) -> ResponseCode {
        match self {
            Self::SuccessfulRestore { .. } => ResponseCode::SuccessfulRestore,
            Self::SuccessfulListFiles { .. } => ResponseCode::SuccessfulListFiles,
            Self::SuccessfulBackupOrDelete { .. } => ResponseCode::SuccessfulBackupOrDelete,
            Self::FileNotFound { .. } => ResponseCode::FileNotFound,
            Self::NoBackupFilesForClient => ResponseCode::NoBackupFilesForClient,
            Self::ServerError => ResponseCode::ServerError,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub version: u8,
    pub kind: ResponseKind,
}

fn pack_header(frame: &mut FrameBuilder, version: u8, code: ResponseCode) {
    frame.put_u8(version).put_u16(code as u16);
}

impl Response {
    pub fn new(version: u8, kind: ResponseKind) -> Self {
        Self { version, kind }
    }

    pub fn pack(&self) -> Result<Bytes> {
        let mut frame = FrameBuilder::new();
        pack_header(&mut frame, self.version, self.kind.code());

        match &self.kind {
            ResponseKind::SuccessfulRestore { filename, payload }
            | ResponseKind::SuccessfulListFiles { filename, payload } => {
                frame.put_string("filename", filename)?;
                frame.put_blob("payload", payload)?;
            }
            ResponseKind::SuccessfulBackupOrDelete { filename }
            | ResponseKind::FileNotFound { filename } => {
                frame.put_string("filename", filename)?;
            }
            ResponseKind::NoBackupFilesForClient | ResponseKind::ServerError => {}
        }

        Ok(frame.freeze())
    }

    pub async fn parse<R: AsyncRead + Unpin>(
        reader: &mut FrameReader<R>,
        expected_version: u8,
    ) -> Result<Self> {
        let version = reader.read_u8().await?;
        if version != expected_version {
            return Err(ProtocolError::VersionMismatch {
                expected: expected_version,
                actual: version,
            });
        }

        let raw = reader.read_u16().await?;
        let code = ResponseCode::from_u16(raw).ok_or(ProtocolError::InvalidResponseCode(raw))?;

        let kind = match code {
            ResponseCode::SuccessfulRestore => {
                let filename = reader.read_prefixed_string("filename").await?;
                let payload = reader.read_blob().await?;
                ResponseKind::SuccessfulRestore { filename, payload }
            }
            ResponseCode::SuccessfulListFiles => {
                let filename = reader.read_prefixed_string("filename").await?;
                let payload = reader.read_blob().await?;
                ResponseKind::SuccessfulListFiles { filename, payload }
            }
            ResponseCode::SuccessfulBackupOrDelete => ResponseKind::SuccessfulBackupOrDelete {
                filename: reader.read_prefixed_string("filename").await?,
            },
            ResponseCode::FileNotFound => ResponseKind::FileNotFound {
                filename: reader.read_prefixed_string("filename").await?,
            },
            ResponseCode::NoBackupFilesForClient => ResponseKind::NoBackupFilesForClient,
            ResponseCode::ServerError => ResponseKind::ServerError,
        };

        Ok(Self { version, kind })
    }
}
