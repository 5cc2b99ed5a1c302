//! Message exchange and the handshake steps of the secure upload protocol.

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::crypto::{KeyPair, SymmetricCipher};
use crate::error::{ClientError, ProtocolError};
use crate::protocol::{ClientBody, ClientId, ClientMessage, FrameReader, NameField, ServerBody, ServerMessage};

pub(crate) fn unexpected(expected: &'static str, body: &ServerBody) -> ClientError {
    ProtocolError::UnexpectedMessage {
        expected,
        actual: body.code() as u16,
    }
    .into()
}

pub struct SecureChannel<S> {
    conn: FrameReader<S>,
    version: u8,
}

impl<S: AsyncRead + AsyncWrite + Unpin> SecureChannel<S> {
    pub fn new(stream: S, version: u8) -> Self {
        Self {
            conn: FrameReader::new(stream),
            version,
        }
    }

    pub async fn send(&mut self, client_id: ClientId, body: ClientBody) -> Result<(), ClientError> {
        let packed = ClientMessage::new(client_id, self.version, body).pack()?;
        let stream = self.conn.get_mut();
        stream.write_all(&packed).await?;
        stream.flush().await?;
        Ok(())
    }

    pub async fn receive(&mut self) -> Result<ServerBody, ClientError> {
        Ok(ServerMessage::parse(&mut self.conn, self.version).await?.body)
    }

    /// Ask the server for an identity under `name`.
    pub async fn register(&mut self, name: &NameField) -> Result<ClientId, ClientError> {
        self.send(
            ClientId::UNREGISTERED,
            ClientBody::Registration { name: name.clone() },
        )
        .await?;

        match self.receive().await? {
            ServerBody::RegistrationSuccessful { client_id } => {
                debug!("Registered as {}", client_id);
                Ok(client_id)
            }
            ServerBody::RegistrationFailed => Err(ClientError::RegistrationRejected {
                name: name.to_string(),
            }),
            other => Err(unexpected("RegistrationSuccessful", &other)),
        }
    }

    /// Send our public key and unwrap the session key the server returns.
    pub async fn exchange_keys(
        &mut self,
        client_id: ClientId,
        name: &NameField,
        keypair: &KeyPair,
    ) -> Result<SymmetricCipher, ClientError> {
        let public_key = keypair.public_key_der()?;
        self.send(
            client_id,
            ClientBody::PublicKey {
                name: name.clone(),
                public_key: public_key.into(),
            },
        )
        .await?;

        match self.receive().await? {
            ServerBody::SymmetricKey {
                client_id: echoed,
                encrypted_key,
            } => {
                if echoed != client_id {
                    return Err(ClientError::IdentityMismatch {
                        expected: client_id.to_string(),
                        actual: echoed.to_string(),
                    });
                }
                let key = keypair.decrypt(&encrypted_key)?;
                debug!("Received {}-byte session key", key.len());
                Ok(SymmetricCipher::new(&key)?)
            }
            other => Err(unexpected("SymmetricKey", &other)),
        }
    }
}
