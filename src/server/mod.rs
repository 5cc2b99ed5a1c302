//! TCP servers
//!
//! `BackupServer` answers one backup-protocol request per connection.
//! `SecureUploadServer` runs the registration, key exchange and verified
//! upload conversation. Both spawn one task per accepted connection and share
//! a single `BackupRegistry`.

pub mod secure;

use bytes::Bytes;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::error::StorageError;
use crate::protocol::{FrameReader, Request, RequestKind, Response, ResponseKind, UserId};
use crate::storage::BackupRegistry;

pub use secure::{ClientDirectory, ClientRecord, SecureUploadServer};

/// Length of the random label on a file list response
pub const LIST_LABEL_LEN: usize = 32;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Accept forever, handing each connection to its own task. A failed accept
/// is logged and never ends the loop.
pub(crate) async fn accept_loop<F, Fut>(listener: TcpListener, label: &'static str, handler: F)
where
    F: Fn(TcpStream, SocketAddr) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!("{} server listening on {}", label, addr);
    }
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                debug!("{} connection from {}", label, peer);
                tokio::spawn(handler(stream, peer));
            }
            Err(e) => {
                warn!("{} accept failed: {}", label, e);
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}

// =============================================================================
// Backup protocol
// =============================================================================

#[derive(Debug, Clone)]
pub struct BackupServer {
    registry: Arc<BackupRegistry>,
    version: u8,
}

impl BackupServer {
    pub fn new(registry: Arc<BackupRegistry>, version: u8) -> Self {
        Self { registry, version }
    }

    pub async fn serve(self, listener: TcpListener) {
        accept_loop(listener, "Backup", move |stream, peer| {
            let server = self.clone();
            async move { server.handle_connection(stream, peer).await }
        })
        .await
    }

    /// One request, one response, then close.
    pub async fn handle_connection<S>(&self, mut stream: S, peer: SocketAddr)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let parsed = {
            let mut reader = FrameReader::new(&mut stream);
            Request::parse(&mut reader, self.version).await
        };

        let response = match parsed {
            Ok(request) => {
                info!(
                    "{:?} from {} (user {})",
                    request.kind.op(),
                    peer,
                    request.user_id
                );
                handle_request(&self.registry, request, self.version).await
            }
            Err(e) => {
                warn!("Bad request from {}: {}", peer, e);
                Response::new(self.version, ResponseKind::ServerError)
            }
        };

        if let Err(e) = send_response(&mut stream, &response).await {
            debug!("Failed to answer {}: {}", peer, e);
        }
    }
}

async fn send_response<W: AsyncWrite + Unpin>(
    stream: &mut W,
    response: &Response,
) -> std::io::Result<()> {
    let packed = match response.pack() {
        Ok(packed) => packed,
        Err(e) => {
            error!("Failed to pack response: {}", e);
            Response::new(response.version, ResponseKind::ServerError)
                .pack()
                .unwrap_or_default()
        }
    };
    stream.write_all(&packed).await?;
    stream.flush().await?;
    stream.shutdown().await
}

/// Route a parsed request to storage and turn the outcome into a response.
///
/// Not-found conditions become their dedicated responses; every other
/// storage failure becomes `ServerError`.
pub async fn handle_request(registry: &BackupRegistry, request: Request, version: u8) -> Response {
    let user_id = request.user_id;

    let kind = match request.kind {
        RequestKind::BackupFile { filename, payload } => {
            match registry.store(user_id, &filename, &payload).await {
                Ok(_) => ResponseKind::SuccessfulBackupOrDelete { filename },
                Err(e) => storage_failure(user_id, e),
            }
        }
        RequestKind::RestoreFile { filename } => match registry.read(user_id, &filename).await {
            Ok(content) => ResponseKind::SuccessfulRestore {
                filename,
                payload: Bytes::from(content),
            },
            Err(StorageError::UserNotFound(_) | StorageError::FileNotFound { .. }) => {
                ResponseKind::FileNotFound { filename }
            }
            Err(e) => storage_failure(user_id, e),
        },
        RequestKind::DeleteFile { filename } => match registry.delete(user_id, &filename).await {
            Ok(()) => ResponseKind::SuccessfulBackupOrDelete { filename },
            Err(StorageError::UserNotFound(_) | StorageError::FileNotFound { .. }) => {
                ResponseKind::FileNotFound { filename }
            }
            Err(e) => storage_failure(user_id, e),
        },
        RequestKind::ListFiles => match registry.list(user_id).await {
            Ok(names) => ResponseKind::SuccessfulListFiles {
                filename: list_label(),
                payload: list_payload(&names),
            },
            Err(StorageError::UserNotFound(_)) => ResponseKind::NoBackupFilesForClient,
            Err(e) => storage_failure(user_id, e),
        },
    };

    Response::new(version, kind)
}

fn storage_failure(user_id: UserId, e: StorageError) -> ResponseKind {
    error!("Storage failure for user {}: {}", user_id, e);
    ResponseKind::ServerError
}

fn list_label() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(LIST_LABEL_LEN)
        .map(char::from)
        .collect()
}

/// Each name followed by `\n`
fn list_payload(names: &[String]) -> Bytes {
    let mut payload = String::with_capacity(names.iter().map(|n| n.len() + 1).sum());
    for name in names {
        payload.push_str(name);
        payload.push('\n');
    }
    Bytes::from(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn registry() -> (TempDir, BackupRegistry) {
        let temp = TempDir::new().unwrap();
        let registry = BackupRegistry::new(temp.path()).await.unwrap();
        (temp, registry)
    }

    fn request(user_id: UserId, kind: RequestKind) -> Request {
        Request::new(user_id, 1, kind)
    }

    #[tokio::test]
    async fn test_backup_then_restore() {
        let (_temp, registry) = registry().await;

        let response = handle_request(
            &registry,
            request(
                10,
                RequestKind::BackupFile {
                    filename: "a.txt".to_string(),
                    payload: Bytes::from_static(b"alpha"),
                },
            ),
            1,
        )
        .await;
        assert_eq!(
            response.kind,
            ResponseKind::SuccessfulBackupOrDelete {
                filename: "a.txt".to_string()
            }
        );

        let response = handle_request(
            &registry,
            request(
                10,
                RequestKind::RestoreFile {
                    filename: "a.txt".to_string(),
                },
            ),
            1,
        )
        .await;
        assert_eq!(
            response.kind,
            ResponseKind::SuccessfulRestore {
                filename: "a.txt".to_string(),
                payload: Bytes::from_static(b"alpha"),
            }
        );
    }

    #[tokio::test]
    async fn test_restore_and_delete_missing_map_to_file_not_found() {
        let (_temp, registry) = registry().await;
        let not_found = ResponseKind::FileNotFound {
            filename: "ghost".to_string(),
        };

        for kind in [
            RequestKind::RestoreFile {
                filename: "ghost".to_string(),
            },
            RequestKind::DeleteFile {
                filename: "ghost".to_string(),
            },
        ] {
            // unknown user
            let response = handle_request(&registry, request(20, kind.clone()), 1).await;
            assert_eq!(response.kind, not_found);
        }

        registry.store(20, "real", b"r").await.unwrap();
        let response = handle_request(
            &registry,
            request(
                20,
                RequestKind::DeleteFile {
                    filename: "ghost".to_string(),
                },
            ),
            1,
        )
        .await;
        assert_eq!(response.kind, not_found);
    }

    #[tokio::test]
    async fn test_list_unknown_user_vs_empty() {
        let (_temp, registry) = registry().await;

        let response = handle_request(&registry, request(30, RequestKind::ListFiles), 1).await;
        assert_eq!(response.kind, ResponseKind::NoBackupFilesForClient);

        registry.get_or_create(30).await.unwrap();
        let response = handle_request(&registry, request(30, RequestKind::ListFiles), 1).await;
        match response.kind {
            ResponseKind::SuccessfulListFiles { filename, payload } => {
                assert_eq!(filename.len(), LIST_LABEL_LEN);
                assert!(payload.is_empty());
            }
            other => panic!("expected list, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_list_payload_newline_terminated() {
        let (_temp, registry) = registry().await;
        registry.store(31, "b", b"").await.unwrap();
        registry.store(31, "a", b"").await.unwrap();

        let response = handle_request(&registry, request(31, RequestKind::ListFiles), 1).await;
        match response.kind {
            ResponseKind::SuccessfulListFiles { filename, payload } => {
                assert!(filename.chars().all(|c| c.is_ascii_alphanumeric()));
                assert_eq!(payload.as_ref(), b"a\nb\n");
            }
            other => panic!("expected list, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_duplicate_and_invalid_backup_are_server_errors() {
        let (_temp, registry) = registry().await;
        let backup = |filename: &str| {
            request(
                40,
                RequestKind::BackupFile {
                    filename: filename.to_string(),
                    payload: Bytes::from_static(b"x"),
                },
            )
        };

        handle_request(&registry, backup("dup"), 1).await;
        let response = handle_request(&registry, backup("dup"), 1).await;
        assert_eq!(response.kind, ResponseKind::ServerError);

        let response = handle_request(&registry, backup("../escape"), 1).await;
        assert_eq!(response.kind, ResponseKind::ServerError);
    }

    #[tokio::test]
    async fn test_failed_delete_is_server_error() {
        let (_temp, registry) = registry().await;
        let dir = registry.get_or_create(50).await.unwrap();
        std::fs::create_dir(dir.path().join("subdir")).unwrap();

        let response = handle_request(
            &registry,
            request(
                50,
                RequestKind::DeleteFile {
                    filename: "subdir".to_string(),
                },
            ),
            1,
        )
        .await;
        assert_eq!(response.kind, ResponseKind::ServerError);
    }

    #[tokio::test]
    async fn test_bad_request_gets_server_error() {
        let (_temp, registry) = registry().await;
        let server = BackupServer::new(Arc::new(registry), 1);
        let (mut client, server_end) = tokio::io::duplex(1024);

        let session = tokio::spawn(async move {
            server
                .handle_connection(server_end, "127.0.0.1:9".parse().unwrap())
                .await
        });

        // wrong version
        client.write_all(&[1, 0, 0, 0, 9, 202]).await.unwrap();
        let mut reader = FrameReader::new(&mut client);
        let response = Response::parse(&mut reader, 1).await.unwrap();
        assert_eq!(response.kind, ResponseKind::ServerError);
        session.await.unwrap();
    }

    #[test]
    fn test_list_label_shape() {
        let a = list_label();
        let b = list_label();
        assert_eq!(a.len(), LIST_LABEL_LEN);
        assert_ne!(a, b);
    }
}
