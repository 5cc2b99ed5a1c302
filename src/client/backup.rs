//! Backup protocol client: one connection per request.

use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::ClientError;
use crate::protocol::{FrameReader, Request, RequestKind, Response, ResponseKind, UserId};

#[derive(Debug, Clone)]
pub struct BackupClient {
    addr: String,
    user_id: UserId,
    version: u8,
}

/// Turn a non-success response into the matching error.
fn failure(kind: ResponseKind) -> ClientError {
    match kind {
        ResponseKind::FileNotFound { filename } => ClientError::FileNotFound(filename),
        ResponseKind::NoBackupFilesForClient => ClientError::NoBackupFiles,
        ResponseKind::ServerError => ClientError::ServerFailure,
        other => ClientError::UnexpectedResponse(other.code() as u16),
    }
}

impl BackupClient {
    pub fn new(addr: impl Into<String>, user_id: UserId, version: u8) -> Self {
        Self {
            addr: addr.into(),
            user_id,
            version,
        }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    async fn exchange(&self, kind: RequestKind) -> Result<ResponseKind, ClientError> {
        let packed = Request::new(self.user_id, self.version, kind).pack()?;

        let mut stream = TcpStream::connect(&self.addr).await?;
        stream.write_all(&packed).await?;
        stream.flush().await?;

        let mut reader = FrameReader::new(&mut stream);
        let response = Response::parse(&mut reader, self.version).await?;
        debug!("{} answered {:?}", self.addr, response.kind.code());
        Ok(response.kind)
    }

    pub async fn backup(&self, filename: &str, content: impl Into<Bytes>) -> Result<(), ClientError> {
        let kind = RequestKind::BackupFile {
            filename: filename.to_string(),
            payload: content.into(),
        };
        match self.exchange(kind).await? {
            ResponseKind::SuccessfulBackupOrDelete { .. } => Ok(()),
            other => Err(failure(other)),
        }
    }

    pub async fn restore(&self, filename: &str) -> Result<Bytes, ClientError> {
        let kind = RequestKind::RestoreFile {
            filename: filename.to_string(),
        };
        match self.exchange(kind).await? {
            ResponseKind::SuccessfulRestore { payload, .. } => Ok(payload),
            other => Err(failure(other)),
        }
    }

    pub async fn delete(&self, filename: &str) -> Result<(), ClientError> {
        let kind = RequestKind::DeleteFile {
            filename: filename.to_string(),
        };
        match self.exchange(kind).await? {
            ResponseKind::SuccessfulBackupOrDelete { .. } => Ok(()),
            other => Err(failure(other)),
        }
    }

    pub async fn list(&self) -> Result<Vec<String>, ClientError> {
        match self.exchange(RequestKind::ListFiles).await? {
            ResponseKind::SuccessfulListFiles { payload, .. } => Ok(String::from_utf8_lossy(&payload)
                .lines()
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect()),
            other => Err(failure(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_mapping() {
        assert!(matches!(
            failure(ResponseKind::FileNotFound {
                filename: "a".to_string()
            }),
            ClientError::FileNotFound(ref f) if f == "a"
        ));
        assert!(matches!(
            failure(ResponseKind::NoBackupFilesForClient),
            ClientError::NoBackupFiles
        ));
        assert!(matches!(
            failure(ResponseKind::ServerError),
            ClientError::ServerFailure
        ));
        assert!(matches!(
            failure(ResponseKind::SuccessfulRestore {
                filename: String::new(),
                payload: Bytes::new()
            }),
            ClientError::UnexpectedResponse(210)
        ));
    }
}
