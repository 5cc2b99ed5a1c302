//! Upload engine
//!
//! Drives one upload over the secure protocol:
//!
//! ```text
//! Idle -> Registering -> ExchangingKeys -> Uploading -> Validating -> Done
//!                                             ^             |
//!                                             +-- retry ----+--> GivingUp
//! ```
//!
//! Registration is skipped for an identity that already has a client id.
//! The file is read, checksummed and encrypted once; every attempt resends
//! the identical message.

use bytes::Bytes;
use std::path::Path;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

use super::session::{unexpected, SecureChannel};
use crate::config::UserInfo;
use crate::crypto::{cksum, KeyPair};
use crate::error::ClientError;
use crate::protocol::{ClientBody, ClientId, NameField, ServerBody};

/// Upload attempts before giving up
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    Idle,
    Registering,
    ExchangingKeys,
    Uploading,
    Validating { attempt: u32 },
    Done,
    GivingUp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    /// Server checksum matched on attempt `attempts`
    Verified { attempts: u32, checksum: u32 },
    /// Every attempt mismatched; the server was told to give up
    GaveUp { attempts: u32 },
}

/// Who we are to the server
#[derive(Debug, Clone)]
pub struct ClientIdentity {
    pub name: String,
    pub client_id: Option<ClientId>,
    pub keypair: KeyPair,
}

impl ClientIdentity {
    /// Not yet registered
    pub fn new(name: impl Into<String>, keypair: KeyPair) -> Self {
        Self {
            name: name.into(),
            client_id: None,
            keypair,
        }
    }

    pub fn from_user_info(info: UserInfo) -> Self {
        Self {
            name: info.name,
            client_id: Some(info.client_id),
            keypair: info.keypair,
        }
    }

    /// Identity to persist, once registered
    pub fn to_user_info(&self) -> Option<UserInfo> {
        self.client_id.map(|client_id| UserInfo {
            name: self.name.clone(),
            client_id,
            keypair: self.keypair.clone(),
        })
    }
}

pub struct UploadEngine<S> {
    channel: SecureChannel<S>,
    max_attempts: u32,
    state: UploadState,
}

impl<S: AsyncRead + AsyncWrite + Unpin> UploadEngine<S> {
    pub fn new(stream: S, version: u8) -> Self {
        Self {
            channel: SecureChannel::new(stream, version),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            state: UploadState::Idle,
        }
    }

    /// At least one attempt is always made.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn state(&self) -> UploadState {
        self.state
    }

    fn transition(&mut self, next: UploadState) {
        debug!("Upload state {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Read `path` once and upload it under its file name.
    pub async fn upload_path(
        &mut self,
        identity: &mut ClientIdentity,
        path: &Path,
    ) -> Result<UploadOutcome, ClientError> {
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("{} has no usable file name", path.display()),
                )
            })?
            .to_string();
        let plaintext = tokio::fs::read(path).await?;
        self.run(identity, &filename, &plaintext).await
    }

    /// Run the whole conversation. On first registration the assigned id is
    /// written back into `identity`.
    pub async fn run(
        &mut self,
        identity: &mut ClientIdentity,
        filename: &str,
        plaintext: &[u8],
    ) -> Result<UploadOutcome, ClientError> {
        let name = NameField::new(&identity.name)?;
        let file_field = NameField::new(filename)?;

        let client_id = match identity.client_id {
            Some(id) => id,
            None => {
                self.transition(UploadState::Registering);
                let id = self.channel.register(&name).await?;
                identity.client_id = Some(id);
                id
            }
        };

        self.transition(UploadState::ExchangingKeys);
        let cipher = self
            .channel
            .exchange_keys(client_id, &name, &identity.keypair)
            .await?;

        self.transition(UploadState::Uploading);
        let expected = cksum(plaintext);
        let encrypted = Bytes::from(cipher.encrypt(plaintext));
        let upload = ClientBody::UploadFile {
            filename: file_field.clone(),
            content: encrypted,
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            self.channel.send(client_id, upload.clone()).await?;
            self.transition(UploadState::Validating { attempt });

            let verified = match self.channel.receive().await? {
                ServerBody::UploadSuccessful {
                    content_size,
                    filename,
                    checksum,
                    ..
                } => {
                    // only the checksum decides the attempt
                    if filename != file_field || content_size as usize != plaintext.len() {
                        debug!(
                            "Acknowledgement names {} ({} bytes), uploaded {} ({} bytes)",
                            filename,
                            content_size,
                            file_field,
                            plaintext.len()
                        );
                    }
                    if checksum != expected {
                        warn!(
                            "Checksum mismatch on attempt {}: server {}, local {}",
                            attempt, checksum, expected
                        );
                    }
                    checksum == expected
                }
                other => return Err(unexpected("UploadSuccessful", &other)),
            };

            if verified {
                self.channel
                    .send(
                        client_id,
                        ClientBody::ChecksumOk {
                            filename: file_field.clone(),
                        },
                    )
                    .await?;
                self.transition(UploadState::Done);

                return match self.channel.receive().await? {
                    ServerBody::Success => {
                        info!("Uploaded {} after {} attempt(s)", filename, attempt);
                        Ok(UploadOutcome::Verified {
                            attempts: attempt,
                            checksum: expected,
                        })
                    }
                    other => Err(unexpected("Success", &other)),
                };
            }

            if attempt >= self.max_attempts {
                self.channel
                    .send(
                        client_id,
                        ClientBody::ChecksumGiveUp {
                            filename: file_field.clone(),
                        },
                    )
                    .await?;
                self.transition(UploadState::GivingUp);
                warn!("Giving up on {} after {} attempts", filename, attempt);
                return Ok(UploadOutcome::GaveUp { attempts: attempt });
            }

            self.channel
                .send(
                    client_id,
                    ClientBody::ChecksumRetry {
                        filename: file_field.clone(),
                    },
                )
                .await?;
            self.transition(UploadState::Uploading);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{PeerPublicKey, SymmetricCipher, SymmetricKey};
    use crate::protocol::{ClientCode, ClientMessage, FrameReader, ServerMessage};
    use tokio::io::{AsyncWriteExt, DuplexStream};

    const VERSION: u8 = 3;

    fn identity(name: &str) -> ClientIdentity {
        ClientIdentity::new(name, KeyPair::generate(512).unwrap())
    }

    /// Minimal server: `correct[i]` decides whether upload `i` is
    /// acknowledged with the right checksum. Returns the codes it received.
    async fn fake_server(
        stream: DuplexStream,
        reject_registration: bool,
        correct: Vec<bool>,
    ) -> Vec<ClientCode> {
        let mut conn = FrameReader::new(stream);
        let assigned = ClientId::random();
        let mut cipher: Option<SymmetricCipher> = None;
        let mut uploads = 0;
        let mut seen = Vec::new();

        while let Ok(message) = ClientMessage::parse(&mut conn, VERSION).await {
            seen.push(message.body.code());
            let reply = match message.body {
                ClientBody::Registration { .. } if reject_registration => {
                    Some(ServerBody::RegistrationFailed)
                }
                ClientBody::Registration { .. } => Some(ServerBody::RegistrationSuccessful {
                    client_id: assigned,
                }),
                ClientBody::PublicKey { public_key, .. } => {
                    let key = SymmetricKey::generate();
                    let wrapped = PeerPublicKey::from_der(&public_key)
                        .unwrap()
                        .encrypt(key.as_bytes())
                        .unwrap();
                    cipher = Some(SymmetricCipher::from_key(key));
                    Some(ServerBody::SymmetricKey {
                        client_id: message.client_id,
                        encrypted_key: wrapped.into(),
                    })
                }
                ClientBody::UploadFile { filename, content } => {
                    let plain = cipher.as_ref().unwrap().decrypt(&content).unwrap();
                    let good = correct.get(uploads).copied().unwrap_or(false);
                    uploads += 1;
                    let checksum = if good { cksum(&plain) } else { cksum(&plain) ^ 1 };
                    Some(ServerBody::UploadSuccessful {
                        client_id: message.client_id,
                        content_size: plain.len() as u32,
                        filename,
                        checksum,
                    })
                }
                ClientBody::ChecksumOk { .. } => Some(ServerBody::Success),
                ClientBody::ChecksumRetry { .. } => None,
                ClientBody::ChecksumGiveUp { .. } => None,
            };
            if let Some(body) = reply {
                let packed = ServerMessage::new(VERSION, body).pack().unwrap();
                if conn.get_mut().write_all(&packed).await.is_err() {
                    break;
                }
            }
        }
        seen
    }

    #[tokio::test]
    async fn test_first_attempt_verified() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let server = tokio::spawn(fake_server(server, false, vec![true]));

        let mut me = identity("alice");
        let mut engine = UploadEngine::new(client, VERSION);
        let data = vec![0x5Au8; 100];
        let outcome = engine.run(&mut me, "data.bin", &data).await.unwrap();

        assert_eq!(
            outcome,
            UploadOutcome::Verified {
                attempts: 1,
                checksum: cksum(&data)
            }
        );
        assert_eq!(engine.state(), UploadState::Done);
        assert!(me.client_id.is_some());

        drop(engine);
        let seen = server.await.unwrap();
        assert_eq!(
            seen,
            vec![
                ClientCode::Registration,
                ClientCode::PublicKey,
                ClientCode::UploadFile,
                ClientCode::ChecksumOk
            ]
        );
    }

    #[tokio::test]
    async fn test_plaintext_size_acknowledgement_verifies() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let server = tokio::spawn(fake_server(server, false, vec![true]));

        // one full block of plaintext pads to two blocks of ciphertext
        let data = [0x11u8; 16];
        let cipher = SymmetricCipher::from_key(SymmetricKey::generate());
        assert_ne!(cipher.encrypt(&data).len(), data.len());

        let mut me = identity("frank");
        let mut engine = UploadEngine::new(client, VERSION);
        let outcome = engine.run(&mut me, "block.bin", &data).await.unwrap();
        assert_eq!(
            outcome,
            UploadOutcome::Verified {
                attempts: 1,
                checksum: cksum(&data)
            }
        );

        drop(engine);
        let seen = server.await.unwrap();
        assert_eq!(seen.last(), Some(&ClientCode::ChecksumOk));
    }

    #[tokio::test]
    async fn test_gives_up_after_exactly_max_attempts() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let server = tokio::spawn(fake_server(server, false, vec![]));

        let mut me = identity("bob");
        let mut engine = UploadEngine::new(client, VERSION);
        let outcome = engine.run(&mut me, "doomed.txt", b"never matches").await.unwrap();

        assert_eq!(outcome, UploadOutcome::GaveUp { attempts: 3 });
        assert_eq!(engine.state(), UploadState::GivingUp);

        drop(engine);
        let seen = server.await.unwrap();
        let uploads = seen.iter().filter(|c| **c == ClientCode::UploadFile).count();
        let retries = seen.iter().filter(|c| **c == ClientCode::ChecksumRetry).count();
        assert_eq!(uploads, 3);
        assert_eq!(retries, 2);
        assert_eq!(seen.last(), Some(&ClientCode::ChecksumGiveUp));
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let server = tokio::spawn(fake_server(server, false, vec![false, true]));

        let mut me = identity("carol");
        let mut engine = UploadEngine::new(client, VERSION).with_max_attempts(5);
        let outcome = engine.run(&mut me, "f", b"second time lucky").await.unwrap();
        assert!(matches!(outcome, UploadOutcome::Verified { attempts: 2, .. }));

        drop(engine);
        let seen = server.await.unwrap();
        assert_eq!(
            seen.iter().filter(|c| **c == ClientCode::UploadFile).count(),
            2
        );
    }

    #[tokio::test]
    async fn test_rejected_registration_aborts() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let server = tokio::spawn(fake_server(server, true, vec![true]));

        let mut me = identity("taken");
        let mut engine = UploadEngine::new(client, VERSION);
        let result = engine.run(&mut me, "f", b"x").await;

        assert!(matches!(
            result,
            Err(ClientError::RegistrationRejected { ref name }) if name == "taken"
        ));
        assert_eq!(engine.state(), UploadState::Registering);
        assert!(me.client_id.is_none());

        drop(engine);
        assert_eq!(server.await.unwrap(), vec![ClientCode::Registration]);
    }

    #[tokio::test]
    async fn test_registered_identity_skips_registration() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let server = tokio::spawn(fake_server(server, false, vec![true]));

        let mut me = identity("dave");
        me.client_id = Some(ClientId::random());
        let mut engine = UploadEngine::new(client, VERSION);
        engine.run(&mut me, "f", b"payload").await.unwrap();

        drop(engine);
        let seen = server.await.unwrap();
        assert_eq!(seen.first(), Some(&ClientCode::PublicKey));
    }

    #[tokio::test]
    async fn test_name_too_long_fails_before_sending() {
        let (client, _server) = tokio::io::duplex(1024);
        let mut me = identity(&"x".repeat(300));
        let mut engine = UploadEngine::new(client, VERSION);
        assert!(matches!(
            engine.run(&mut me, "f", b"").await,
            Err(ClientError::Protocol(_))
        ));
        assert_eq!(engine.state(), UploadState::Idle);
    }
}
