//! Secure upload protocol messages.
//!
//! Client header: `client_id:[u8;16] | version:u8 | code:u16 | payload_size:u32`
//! Server header: `version:u8 | code:u16 | payload_size:u32`
//!
//! Every payload is read as one declared-length block and must decode to
//! exactly that many bytes.

use bytes::Bytes;
use tokio::io::AsyncRead;

use super::codec::{checked_len, read_payload, FrameBuilder, FrameReader};
use super::name::NameField;
use super::ClientId;
use crate::error::{ProtocolError, Result};

pub const CLIENT_HEADER_SIZE: usize = 16 + 1 + 2 + 4;
pub const SERVER_HEADER_SIZE: usize = 1 + 2 + 4;

// =============================================================================
// Message Codes
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ClientCode {
    Registration = 1100,
    PublicKey = 1101,
    UploadFile = 1103,
    ChecksumOk = 1104,
    ChecksumRetry = 1105,
    ChecksumGiveUp = 1106,
}

impl ClientCode {
    pub fn from_u16(v: u16) -> Option<Self> {
        match v {
            1100 => Some(Self::Registration),
            1101 => Some(Self::PublicKey),
            1103 => Some(Self::UploadFile),
            1104 => Some(Self::ChecksumOk),
            1105 => Some(Self::ChecksumRetry),
            1106 => Some(Self::ChecksumGiveUp),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ServerCode {
    RegistrationSuccessful = 2100,
    RegistrationFailed = 2101,
    SymmetricKey = 2102,
    UploadSuccessful = 2103,
    Success = 2104,
}

impl ServerCode {
    pub fn from_u16(v: u16) -> Option<Self> {
        match v {
            2100 => Some(Self::RegistrationSuccessful),
            2101 => Some(Self::RegistrationFailed),
            2102 => Some(Self::SymmetricKey),
            2103 => Some(Self::UploadSuccessful),
            2104 => Some(Self::Success),
            _ => None,
        }
    }
}

// =============================================================================
// Client -> Server
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientBody {
    Registration { name: NameField },
    /// `public_key` is SubjectPublicKeyInfo DER filling the rest of the payload
    PublicKey { name: NameField, public_key: Bytes },
    /// `content` is AES ciphertext
    UploadFile { filename: NameField, content: Bytes },
    ChecksumOk { filename: NameField },
    ChecksumRetry { filename: NameField },
    ChecksumGiveUp { filename: NameField },
}

impl ClientBody {
    pub fn code(&self) -> ClientCode {
        match self {
            Self::Registration { .. } => ClientCode::Registration,
            Self::PublicKey { .. } => ClientCode::PublicKey,
            Self::UploadFile { .. } => ClientCode::UploadFile,
            Self::ChecksumOk { .. } => ClientCode::ChecksumOk,
            Self::ChecksumRetry { .. } => ClientCode::ChecksumRetry,
            Self::ChecksumGiveUp { .. } => ClientCode::ChecksumGiveUp,
        }
    }

    fn pack_payload(&self) -> Result<FrameBuilder> {
        let mut payload = FrameBuilder::new();
        match self {
            Self::Registration { name } => {
                payload.put_name(name);
            }
            Self::PublicKey { name, public_key } => {
                payload.put_name(name).put_slice(public_key);
            }
            Self::UploadFile { filename, content } => {
                let size = checked_len("content", content.len())?;
                payload.put_u32(size).put_name(filename).put_slice(content);
            }
            Self::ChecksumOk { filename }
            | Self::ChecksumRetry { filename }
            | Self::ChecksumGiveUp { filename } => {
                payload.put_name(filename);
            }
        }
        Ok(payload)
    }

    async fn decode(code: ClientCode, body: &mut FrameReader<&[u8]>) -> Result<Self> {
        Ok(match code {
            ClientCode::Registration => Self::Registration {
                name: body.read_name().await?,
            },
            ClientCode::PublicKey => {
                let name = body.read_name().await?;
                let rest = body.remaining();
                let public_key = body.read_bytes(rest).await?;
                Self::PublicKey { name, public_key }
            }
            ClientCode::UploadFile => {
                let size = body.read_u32().await?;
                let filename = body.read_name().await?;
                let content = body.read_bytes(size as usize).await?;
                Self::UploadFile { filename, content }
            }
            ClientCode::ChecksumOk => Self::ChecksumOk {
                filename: body.read_name().await?,
            },
            ClientCode::ChecksumRetry => Self::ChecksumRetry {
                filename: body.read_name().await?,
            },
            ClientCode::ChecksumGiveUp => Self::ChecksumGiveUp {
                filename: body.read_name().await?,
            },
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientMessage {
    pub client_id: ClientId,
    pub version: u8,
    pub body: ClientBody,
}

impl ClientMessage {
    pub fn new(client_id: ClientId, version: u8, body: ClientBody) -> Self {
        Self {
            client_id,
            version,
            body,
        }
    }

    pub fn pack(&self) -> Result<Bytes> {
        let payload = self.body.pack_payload()?;
        let size = checked_len("payload", payload.len())?;

        let mut frame = FrameBuilder::with_capacity(CLIENT_HEADER_SIZE + payload.len());
        frame
            .put_client_id(self.client_id)
            .put_u8(self.version)
            .put_u16(self.body.code() as u16)
            .put_u32(size)
            .put_frame(&payload);
        Ok(frame.freeze())
    }

    pub async fn parse<R: AsyncRead + Unpin>(
        reader: &mut FrameReader<R>,
        expected_version: u8,
    ) -> Result<Self> {
        let client_id = reader.read_client_id().await?;
        let version = reader.read_u8().await?;
        if version != expected_version {
            return Err(ProtocolError::VersionMismatch {
                expected: expected_version,
                actual: version,
            });
        }

        let raw = reader.read_u16().await?;
        let code = ClientCode::from_u16(raw).ok_or(ProtocolError::InvalidMessageCode(raw))?;
        let declared = reader.read_u32().await?;
        let payload = read_payload(reader, declared).await?;

        let mut body = FrameReader::new(&payload[..]);
        let decoded = ClientBody::decode(code, &mut body).await;
        let body = body.finish(decoded, declared)?;

        Ok(Self {
            client_id,
            version,
            body,
        })
    }
}

// =============================================================================
// Server -> Client
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerBody {
    RegistrationSuccessful {
        client_id: ClientId,
    },
    RegistrationFailed,
    /// `encrypted_key` is the session key under the client's RSA public key
    SymmetricKey {
        client_id: ClientId,
        encrypted_key: Bytes,
    },
    UploadSuccessful {
        client_id: ClientId,
        content_size: u32,
        filename: NameField,
        checksum: u32,
    },
    Success,
}

impl ServerBody {
    pub fn code(&self) -> ServerCode {
        match self {
            Self::RegistrationSuccessful { .. } => ServerCode::RegistrationSuccessful,
            Self::RegistrationFailed => ServerCode::RegistrationFailed,
            Self::SymmetricKey { .. } => ServerCode::SymmetricKey,
            Self::UploadSuccessful { .. } => ServerCode::UploadSuccessful,
            Self::Success => ServerCode::Success,
        }
    }

    fn pack_payload(&self) -> FrameBuilder {
        let mut payload = FrameBuilder::new();
        match self {
            Self::RegistrationSuccessful { client_id } => {
                payload.put_client_id(*client_id);
            }
            Self::SymmetricKey {
                client_id,
                encrypted_key,
            } => {
                payload.put_client_id(*client_id).put_slice(encrypted_key);
            }
            Self::UploadSuccessful {
                client_id,
                content_size,
                filename,
                checksum,
            } => {
                payload
                    .put_client_id(*client_id)
                    .put_u32(*content_size)
                    .put_name(filename)
                    .put_u32(*checksum);
            }
            Self::RegistrationFailed | Self::Success => {}
        }
        payload
    }

    async fn decode(code: ServerCode, body: &mut FrameReader<&[u8]>) -> Result<Self> {
        Ok(match code {
            ServerCode::RegistrationSuccessful => Self::RegistrationSuccessful {
                client_id: body.read_client_id().await?,
            },
            ServerCode::RegistrationFailed => Self::RegistrationFailed,
            ServerCode::SymmetricKey => {
                let client_id = body.read_client_id().await?;
                let rest = body.remaining();
                let encrypted_key = body.read_bytes(rest).await?;
                Self::SymmetricKey {
                    client_id,
                    encrypted_key,
                }
            }
            ServerCode::UploadSuccessful => {
                let client_id = body.read_client_id().await?;
                let content_size = body.read_u32().await?;
                let filename = body.read_name().await?;
                let checksum = body.read_u32().await?;
                Self::UploadSuccessful {
                    client_id,
                    content_size,
                    filename,
                    checksum,
                }
            }
            ServerCode::Success => Self::Success,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerMessage {
    pub version: u8,
    pub body: ServerBody,
}

impl ServerMessage {
    pub fn new(version: u8, body: ServerBody) -> Self {
        Self { version, body }
    }

    pub fn pack(&self) -> Result<Bytes> {
        let payload = self.body.pack_payload();
        let size = checked_len("payload", payload.len())?;

        let mut frame = FrameBuilder::with_capacity(SERVER_HEADER_SIZE + payload.len());
        frame
            .put_u8(self.version)
            .put_u16(self.body.code() as u16)
            .put_u32(size)
            .put_frame(&payload);
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
        let code = ServerCode::from_u16(raw).ok_or(ProtocolError::InvalidMessageCode(raw))?;
        let declared = reader.read_u32().await?;
        let payload = read_payload(reader, declared).await?;

        let mut body = FrameReader::new(&payload[..]);
        let decoded = ServerBody::decode(code, &mut body).await;
        let body = body.finish(decoded, declared)?;

        Ok(Self { version, body })
    }
}
