//! Secure upload endpoint.
//!
//! Per connection: optional registration, RSA key exchange, then uploads
//! until the client accepts the checksum (stored, `Success`), asks to retry
//! (pending upload discarded, wait for the next one) or gives up (discarded,
//! session ends).

use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::accept_loop;
use crate::crypto::{cksum, PeerPublicKey, SymmetricCipher, SymmetricKey};
use crate::error::{CryptoError, ProtocolError, SessionError, StorageError};
use crate::protocol::{ClientBody, ClientId, ClientMessage, FrameReader, ServerBody, ServerMessage};
use crate::storage::BackupRegistry;

// =============================================================================
// Client directory
// =============================================================================

/// File under the backup root that holds the client directory
pub const CLIENTS_FILE: &str = "clients.toml";

#[derive(Debug, Clone)]
pub struct ClientRecord {
    pub id: ClientId,
    pub name: String,
    pub public_key: Option<PeerPublicKey>,
    pub session_key: Option<SymmetricKey>,
    pub last_seen: DateTime<Utc>,
}

/// On-disk form of one record; keys are base64 DER and raw AES bytes
#[derive(Debug, Serialize, Deserialize)]
struct StoredClient {
    id: String,
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    public_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    session_key: Option<String>,
    last_seen: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ClientFile {
    #[serde(default)]
    clients: Vec<StoredClient>,
}

impl StoredClient {
    fn from_record(record: &ClientRecord) -> Result<Self, CryptoError> {
        let public_key = match &record.public_key {
            Some(key) => Some(STANDARD.encode(key.to_der()?)),
            None => None,
        };
        Ok(Self {
            id: record.id.to_string(),
            name: record.name.clone(),
            public_key,
            session_key: record.session_key.as_ref().map(|k| STANDARD.encode(k.as_bytes())),
            last_seen: record.last_seen,
        })
    }

    fn into_record(self) -> Result<ClientRecord, String> {
        let id = ClientId::parse_hex(&self.id)
            .filter(|id| id.is_registered())
            .ok_or_else(|| format!("invalid client id {:?}", self.id))?;
        let decode = |field: &str, text: &str| {
            STANDARD
                .decode(text)
                .map_err(|e| format!("{} of {}: {}", field, self.id, e))
        };
        let public_key = match &self.public_key {
            Some(text) => Some(
                PeerPublicKey::from_der(&decode("public key", text)?)
                    .map_err(|e| format!("public key of {}: {}", self.id, e))?,
            ),
            None => None,
        };
        let session_key = match &self.session_key {
            Some(text) => Some(
                SymmetricKey::from_slice(&decode("session key", text)?)
                    .map_err(|e| format!("session key of {}: {}", self.id, e))?,
            ),
            None => None,
        };
        Ok(ClientRecord {
            id,
            name: self.name,
            public_key,
            session_key,
            last_seen: self.last_seen,
        })
    }
}

/// Registered clients. Opened from a backup root, every change is written
/// back to `clients.toml` so identities survive a restart.
#[derive(Debug, Default)]
pub struct ClientDirectory {
    clients: Mutex<HashMap<ClientId, ClientRecord>>,
    path: Option<PathBuf>,
}

impl ClientDirectory {
    /// A directory that lives only as long as the process
    pub fn new() -> Self {
        Self::default()
    }

    /// Load `<root>/clients.toml`, starting empty if it does not exist yet.
    pub async fn open(root: &Path) -> Result<Self, StorageError> {
        let path = root.join(CLIENTS_FILE);
        let invalid = |reason: String| StorageError::InvalidClientDirectory {
            path: path.clone(),
            reason,
        };

        let file = match fs::read_to_string(&path).await {
            Ok(text) => toml::from_str::<ClientFile>(&text).map_err(|e| invalid(e.to_string()))?,
            Err(e) if e.kind() == ErrorKind::NotFound => ClientFile::default(),
            Err(source) => {
                return Err(StorageError::Io {
                    path: path.clone(),
                    source,
                })
            }
        };

        let mut clients = HashMap::with_capacity(file.clients.len());
        for stored in file.clients {
            let record = stored.into_record().map_err(&invalid)?;
            if clients.values().any(|c: &ClientRecord| c.name == record.name) {
                return Err(invalid(format!("duplicate name {:?}", record.name)));
            }
            clients.insert(record.id, record);
        }
        info!("Loaded {} clients from {}", clients.len(), path.display());

        Ok(Self {
            clients: Mutex::new(clients),
            path: Some(path),
        })
    }

    /// Assign an identity to `name`. `None` if the name is empty or taken.
    ///
    /// Issued identities never share a storage id with another client and
    /// never map to storage id 0.
    pub async fn register(&self, name: &str) -> Result<Option<ClientId>, StorageError> {
        let mut clients = self.clients.lock().await;
        if name.is_empty() || clients.values().any(|c| c.name == name) {
            return Ok(None);
        }

        let id = loop {
            let candidate = ClientId::random();
            let storage_id = candidate.storage_id();
            if storage_id != 0 && !clients.keys().any(|k| k.storage_id() == storage_id) {
                break candidate;
            }
        };

        clients.insert(
            id,
            ClientRecord {
                id,
                name: name.to_string(),
                public_key: None,
                session_key: None,
                last_seen: Utc::now(),
            },
        );
        if let Err(e) = self.save(&clients).await {
            clients.remove(&id);
            return Err(e);
        }
        Ok(Some(id))
    }

    pub async fn get(&self, id: ClientId) -> Option<ClientRecord> {
        self.clients.lock().await.get(&id).cloned()
    }

    pub async fn set_keys(
        &self,
        id: ClientId,
        public_key: PeerPublicKey,
        session_key: SymmetricKey,
    ) -> Result<(), SessionError> {
        let mut clients = self.clients.lock().await;
        let record = clients
            .get_mut(&id)
            .ok_or_else(|| SessionError::UnknownClient(id.to_string()))?;
        record.public_key = Some(public_key);
        record.session_key = Some(session_key);
        record.last_seen = Utc::now();
        self.save(&clients).await?;
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.clients.lock().await.len()
    }

    /// Write the whole directory to a temp file and rename it into place.
    /// Called with the lock held so writes never interleave.
    async fn save(&self, clients: &HashMap<ClientId, ClientRecord>) -> Result<(), StorageError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let invalid = |reason: String| StorageError::InvalidClientDirectory {
            path: path.clone(),
            reason,
        };

        let mut records: Vec<&ClientRecord> = clients.values().collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        let file = ClientFile {
            clients: records
                .into_iter()
                .map(StoredClient::from_record)
                .collect::<Result<_, _>>()
                .map_err(|e| invalid(e.to_string()))?,
        };
        let text = toml::to_string(&file).map_err(|e| invalid(e.to_string()))?;

        let temp = path.with_extension("tmp");
        fs::write(&temp, text)
            .await
            .map_err(|source| StorageError::Io {
                path: temp.clone(),
                source,
            })?;
        fs::rename(&temp, path)
            .await
            .map_err(|source| StorageError::Io {
                path: path.clone(),
                source,
            })?;
        debug!("Saved {} clients to {}", clients.len(), path.display());
        Ok(())
    }
}

// =============================================================================
// Server
// =============================================================================

#[derive(Debug, Clone)]
pub struct SecureUploadServer {
    registry: Arc<BackupRegistry>,
    clients: Arc<ClientDirectory>,
    version: u8,
}

fn unexpected(expected: &'static str, body: &ClientBody) -> SessionError {
    ProtocolError::UnexpectedMessage {
        expected,
        actual: body.code() as u16,
    }
    .into()
}

impl SecureUploadServer {
    pub fn new(registry: Arc<BackupRegistry>, clients: Arc<ClientDirectory>, version: u8) -> Self {
        Self {
            registry,
            clients,
            version,
        }
    }

    pub async fn serve(self, listener: TcpListener) {
        accept_loop(listener, "Secure upload", move |stream, peer| {
            let server = self.clone();
            async move { server.handle_connection(stream, peer).await }
        })
        .await
    }

    pub async fn handle_connection<S>(&self, stream: S, peer: SocketAddr)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        match self.handle_session(stream).await {
            Ok(()) => debug!("Secure session with {} finished", peer),
            Err(e) => warn!("Secure session with {} aborted: {}", peer, e),
        }
    }

    /// Drive one client conversation to completion.
    pub async fn handle_session<S>(&self, stream: S) -> Result<(), SessionError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut conn = FrameReader::new(stream);

        let first = self.receive(&mut conn).await?;
        let key_exchange = match first.body {
            ClientBody::Registration { name } => {
                let name = name.to_text()?;
                match self.clients.register(&name).await? {
                    Some(client_id) => {
                        info!("Registered {:?} as {}", name, client_id);
                        self.send(&mut conn, ServerBody::RegistrationSuccessful { client_id })
                            .await?;
                        self.receive(&mut conn).await?
                    }
                    None => {
                        warn!("Registration refused for {:?}", name);
                        self.send(&mut conn, ServerBody::RegistrationFailed).await?;
                        return Ok(());
                    }
                }
            }
            body @ ClientBody::PublicKey { .. } => {
                ClientMessage::new(first.client_id, first.version, body)
            }
            other => return Err(unexpected("Registration or PublicKey", &other)),
        };

        let (client_id, cipher) = self.exchange_keys(&mut conn, key_exchange).await?;
        self.receive_uploads(&mut conn, client_id, &cipher).await
    }

    async fn exchange_keys<S>(
        &self,
        conn: &mut FrameReader<S>,
        message: ClientMessage,
    ) -> Result<(ClientId, SymmetricCipher), SessionError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let client_id = message.client_id;
        let (name, public_key) = match message.body {
            ClientBody::PublicKey { name, public_key } => (name, public_key),
            other => return Err(unexpected("PublicKey", &other)),
        };

        let record = self
            .clients
            .get(client_id)
            .await
            .ok_or_else(|| SessionError::UnknownClient(client_id.to_string()))?;
        let name = name.to_text()?;
        if record.name != name {
            return Err(SessionError::UnknownClient(format!("{} ({:?})", client_id, name)));
        }

        let peer_key = PeerPublicKey::from_der(&public_key)?;
        let session_key = SymmetricKey::generate();
        let encrypted_key = peer_key.encrypt(session_key.as_bytes())?;
        self.clients
            .set_keys(client_id, peer_key, session_key.clone())
            .await?;

        self.send(
            conn,
            ServerBody::SymmetricKey {
                client_id,
                encrypted_key: Bytes::from(encrypted_key),
            },
        )
        .await?;
        debug!("Issued session key to {}", client_id);

        Ok((client_id, SymmetricCipher::from_key(session_key)))
    }

    async fn receive_uploads<S>(
        &self,
        conn: &mut FrameReader<S>,
        client_id: ClientId,
        cipher: &SymmetricCipher,
    ) -> Result<(), SessionError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        loop {
            let message = self.receive_from(conn, client_id).await?;
            let (filename, content) = match message.body {
                ClientBody::UploadFile { filename, content } => (filename, content),
                other => return Err(unexpected("UploadFile", &other)),
            };

            // An undecryptable upload is acknowledged with the checksum of the
            // raw bytes so the client's verification fails and it retries.
            let plaintext = match cipher.decrypt(&content) {
                Ok(plaintext) => plaintext,
                Err(e) => {
                    warn!("Upload {} from {} did not decrypt: {}", filename, client_id, e);
                    content.to_vec()
                }
            };
            let checksum = cksum(&plaintext);
            debug!(
                "Received {} ({} bytes, cksum {}) from {}",
                filename,
                content.len(),
                checksum,
                client_id
            );

            self.send(
                conn,
                ServerBody::UploadSuccessful {
                    client_id,
                    content_size: plaintext.len() as u32,
                    filename: filename.clone(),
                    checksum,
                },
            )
            .await?;

            let verdict = self.receive_from(conn, client_id).await?;
            match verdict.body {
                ClientBody::ChecksumOk { .. } => {
                    let name = filename.to_text()?;
                    let path = self
                        .registry
                        .store(client_id.storage_id(), &name, &plaintext)
                        .await?;
                    info!("Stored {} for {} at {}", name, client_id, path.display());
                    self.send(conn, ServerBody::Success).await?;
                    return Ok(());
                }
                ClientBody::ChecksumRetry { .. } => {
                    debug!("{} will retry {}", client_id, filename);
                }
                ClientBody::ChecksumGiveUp { .. } => {
                    warn!("{} gave up uploading {}", client_id, filename);
                    return Ok(());
                }
                other => return Err(unexpected("checksum verdict", &other)),
            }
        }
    }

    async fn receive<S>(&self, conn: &mut FrameReader<S>) -> Result<ClientMessage, SessionError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        Ok(ClientMessage::parse(conn, self.version).await?)
    }

    /// Receive a message that must come from the identity this session belongs to.
    async fn receive_from<S>(
        &self,
        conn: &mut FrameReader<S>,
        client_id: ClientId,
    ) -> Result<ClientMessage, SessionError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let message = self.receive(conn).await?;
        if message.client_id != client_id {
            return Err(SessionError::UnknownClient(message.client_id.to_string()));
        }
        Ok(message)
    }

    async fn send<S>(&self, conn: &mut FrameReader<S>, body: ServerBody) -> Result<(), SessionError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let packed = ServerMessage::new(self.version, body).pack()?;
        let stream = conn.get_mut();
        stream.write_all(&packed).await?;
        stream.flush().await?;
        Ok(())
    }
}
