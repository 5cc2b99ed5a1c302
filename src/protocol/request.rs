//! Backup protocol requests.
//!
//! Wire format: `user_id:u32 | version:u8 | op:u8`, then per op
//! `name_len:u16 | name` and `payload_len:u32 | payload`.

use bytes::Bytes;
use tokio::io::AsyncRead;

use super::codec::{FrameBuilder, FrameReader};
use super::UserId;
use crate::error::{ProtocolError, Result};

// =============================================================================
// Opcodes
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RequestOp {
    BackupFile = 100,
    RestoreFile = 200,
    DeleteFile = 201,
    ListFiles = 202,
}

impl RequestOp {
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            100 => Some(Self::BackupFile),
            200 => Some(Self::RestoreFile),
            201 => Some(Self::DeleteFile),
            202 => Some(Self::ListFiles),
            _ => None,
        }
    }
}

// =============================================================================
// Request
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestKind {
    BackupFile { filename: String, payload: Bytes },
    RestoreFile { filename: String },
    DeleteFile { filename: String },
    ListFiles,
}

impl RequestKind {
    pub fn op(&self) -> RequestOp {
        match self {
            Self::BackupFile { .. } => RequestOp::BackupFile,
            Self::RestoreFile { .. } => RequestOp::RestoreFile,
            Self::DeleteFile { .. } => RequestOp::DeleteFile,
            Self::ListFiles => RequestOp::ListFiles,
        }
    }

    pub fn filename(&self) -> Option<&str> {
        match self {
            Self::BackupFile { filename, .. }
            | Self::RestoreFile { filename }
            | Self::DeleteFile { filename } => Some(filename.as_str()),
            Self::ListFiles => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub user_id: UserId,
    pub version: u8,
    pub kind: RequestKind,
}

fn pack_header(frame: &mut FrameBuilder, user_id: UserId, version: u8, op: RequestOp) {
    frame.put_u32(user_id).put_u8(version).put_u8(op as u8);
}

impl Request {
    pub fn new(user_id: UserId, version: u8, kind: RequestKind) -> Self {
        Self {
            user_id,
            version,
            kind,
        }
    }

    pub fn pack(&self) -> Result<Bytes> {
        let mut frame = FrameBuilder::new();
        pack_header(&mut frame, self.user_id, self.version, self.kind.op());

        match &self.kind {
            RequestKind::BackupFile { filename, payload } => {
                frame.put_string("filename", filename)?;
                frame.put_blob("payload", payload)?;
            }
            RequestKind::RestoreFile { filename } | RequestKind::DeleteFile { filename } => {
                frame.put_string("filename", filename)?;
            }
            RequestKind::ListFiles => {}
        }

        Ok(frame.freeze())
    }

    /// Parse one request. The version is checked before the opcode or any
    /// payload byte is read.
    pub async fn parse<R: AsyncRead + Unpin>(
        reader: &mut FrameReader<R>,
        expected_version: u8,
    ) -> Result<Self> {
        let user_id = reader.read_u32().await?;
        let version = reader.read_u8().await?;
        if version != expected_version {
            return Err(ProtocolError::VersionMismatch {
                expected: expected_version,
                actual: version,
            });
        }

        let raw = reader.read_u8().await?;
        let op = RequestOp::from_u8(raw).ok_or(ProtocolError::InvalidOpcode(raw))?;

        let kind = match op {
            RequestOp::BackupFile => {
                let filename = reader.read_prefixed_string("filename").await?;
                let payload = reader.read_blob().await?;
                RequestKind::BackupFile { filename, payload }
            }
            RequestOp::RestoreFile => RequestKind::RestoreFile {
                filename: reader.read_prefixed_string("filename").await?,
            },
            RequestOp::DeleteFile => RequestKind::DeleteFile {
                filename: reader.read_prefixed_string("filename").await?,
            },
            RequestOp::ListFiles => RequestKind::ListFiles,
        };

        Ok(Self {
            user_id,
            version,
            kind,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn roundtrip(request: &Request) -> Request {
        let packed = request.pack().unwrap();
        let mut reader = FrameReader::new(&packed[..]);
        let parsed = Request::parse(&mut reader, request.version).await.unwrap();
        assert_eq!(reader.remaining(), 0);
        parsed
    }

    #[tokio::test]
    async fn test_backup_roundtrip() {
        let request = Request::new(
            1234,
            1,
            RequestKind::BackupFile {
                filename: "report.pdf".to_string(),
                payload: Bytes::from_static(b"%PDF-1.4 ..."),
            },
        );
        assert_eq!(roundtrip(&request).await, request);
    }

    #[tokio::test]
    async fn test_empty_filename_and_payload() {
        let request = Request::new(
            1,
            1,
            RequestKind::BackupFile {
                filename: String::new(),
                payload: Bytes::new(),
            },
        );
        assert_eq!(roundtrip(&request).await, request);
    }

    #[tokio::test]
    async fn test_list_has_no_body() {
        let request = Request::new(99, 1, RequestKind::ListFiles);
        let packed = request.pack().unwrap();
        assert_eq!(packed.as_ref(), &[99, 0, 0, 0, 1, 202]);
        assert_eq!(roundtrip(&request).await, request);
    }

    #[tokio::test]
    async fn test_restore_and_delete_roundtrip() {
        for kind in [
            RequestKind::RestoreFile {
                filename: "a.txt".to_string(),
            },
            RequestKind::DeleteFile {
                filename: "b.txt".to_string(),
            },
        ] {
            let request = Request::new(7, 1, kind);
            assert_eq!(roundtrip(&request).await, request);
        }
    }

    #[tokio::test]
    async fn test_version_mismatch_stops_before_payload() {
        let request = Request::new(
            5,
            2,
            RequestKind::RestoreFile {
                filename: "x".to_string(),
            },
        );
        let packed = request.pack().unwrap();
        let mut reader = FrameReader::new(&packed[..]);
        match Request::parse(&mut reader, 1).await {
            Err(ProtocolError::VersionMismatch { expected, actual }) => {
                assert_eq!(expected, 1);
                assert_eq!(actual, 2);
            }
            other => panic!("expected VersionMismatch, got {:?}", other),
        }
        // user_id + version only
        assert_eq!(reader.consumed(), 5);
    }

    #[tokio::test]
    async fn test_unknown_opcode() {
        let data = [1u8, 0, 0, 0, 1, 150];
        let mut reader = FrameReader::new(&data[..]);
        assert!(matches!(
            Request::parse(&mut reader, 1).await,
            Err(ProtocolError::InvalidOpcode(150))
        ));
    }

    #[tokio::test]
    async fn test_truncated_filename() {
        let data = [1u8, 0, 0, 0, 1, 200, 10, 0, b'a', b'b'];
        let mut reader = FrameReader::new(&data[..]);
        assert!(matches!(
            Request::parse(&mut reader, 1).await,
            Err(ProtocolError::ShortRead { .. })
        ));
    }

    #[test]
    fn test_op_from_u8() {
        assert_eq!(RequestOp::from_u8(100), Some(RequestOp::BackupFile));
        assert_eq!(RequestOp::from_u8(202), Some(RequestOp::ListFiles));
        assert_eq!(RequestOp::from_u8(0), None);
    }
}
