//! Little-endian frame building and reading.
//!
//! `FrameBuilder` appends fields to a `BytesMut`; `FrameReader` pulls the same
//! fields off any `AsyncRead`. Lengths always come from the wire, never from
//! content, and a source that ends early is a `ShortRead`, never zero-filled.

use bytes::{BufMut, Bytes, BytesMut};
use std::io::ErrorKind;
use tokio::io::{AsyncRead, AsyncReadExt};

use super::name::{NameField, NAME_CAPACITY};
use super::ClientId;
use crate::error::{ProtocolError, Result};

/// Largest payload or blob accepted from the wire (64 MiB)
pub const MAX_PAYLOAD_SIZE: u32 = 64 * 1024 * 1024;

// =============================================================================
// Builder
// =============================================================================

#[derive(Debug, Default)]
pub struct FrameBuilder {
    buf: BytesMut,
}

impl FrameBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    pub fn put_u8(&mut self, v: u8) -> &mut Self {
        self.buf.put_u8(v);
        self
    }

    pub fn put_u16(&mut self, v: u16) -> &mut Self {
        self.buf.put_u16_le(v);
        self
    }

    pub fn put_u32(&mut self, v: u32) -> &mut Self {
        self.buf.put_u32_le(v);
        self
    }

    /// Raw bytes, no length prefix and no terminator
    pub fn put_slice(&mut self, data: &[u8]) -> &mut Self {
        self.buf.put_slice(data);
        self
    }

    /// Append another frame's contents
    pub fn put_frame(&mut self, other: &FrameBuilder) -> &mut Self {
        self.buf.put_slice(&other.buf);
        self
    }

    /// Fixed 255-byte zero-padded field
    pub fn put_name(&mut self, name: &NameField) -> &mut Self {
        self.buf.put_slice(name.as_bytes());
        self
    }

    pub fn put_client_id(&mut self, id: ClientId) -> &mut Self {
        self.buf.put_slice(id.as_bytes());
        self
    }

    /// `len:u16 | utf8`
    pub fn put_string(&mut self, field: &'static str, text: &str) -> Result<&mut Self> {
        let len = u16::try_from(text.len()).map_err(|_| ProtocolError::FieldTooLong {
            field,
            len: text.len(),
            max: u16::MAX as usize,
        })?;
        self.buf.put_u16_le(len);
        self.buf.put_slice(text.as_bytes());
        Ok(self)
    }

    /// `len:u32 | bytes`
    pub fn put_blob(&mut self, field: &'static str, data: &[u8]) -> Result<&mut Self> {
        let len = checked_len(field, data.len())?;
        self.buf.put_u32_le(len);
        self.buf.put_slice(data);
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }
}

/// Length of an outgoing field as a wire `u32`, bounded by `MAX_PAYLOAD_SIZE`.
pub fn checked_len(field: &'static str, len: usize) -> Result<u32> {
    match u32::try_from(len) {
        Ok(n) if n <= MAX_PAYLOAD_SIZE => Ok(n),
        _ => Err(ProtocolError::FieldTooLong {
            field,
            len,
            max: MAX_PAYLOAD_SIZE as usize,
        }),
    }
}

// =============================================================================
// Reader
// =============================================================================

pub struct FrameReader<R> {
    inner: R,
    consumed: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, consumed: 0 }
    }

    /// Bytes successfully read so far
    pub fn consumed(&self) -> usize {
        self.consumed
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    pub async fn read_u8(&mut self) -> Result<u8> {
        let mut b = [0u8; 1];
        self.fill(&mut b).await?;
        Ok(b[0])
    }

    pub async fn read_u16(&mut self) -> Result<u16> {
        let mut b = [0u8; 2];
        self.fill(&mut b).await?;
        Ok(u16::from_le_bytes(b))
    }

    pub async fn read_u32(&mut self) -> Result<u32> {
        let mut b = [0u8; 4];
        self.fill(&mut b).await?;
        Ok(u32::from_le_bytes(b))
    }

    /// Exactly `len` bytes. Lengths above `MAX_PAYLOAD_SIZE` are refused
    /// before anything is allocated.
    pub async fn read_bytes(&mut self, len: usize) -> Result<Bytes> {
        if len > MAX_PAYLOAD_SIZE as usize {
            return Err(ProtocolError::PayloadTooLarge {
                len: len as u64,
                max: MAX_PAYLOAD_SIZE,
            });
        }
        let mut buf = vec![0u8; len];
        self.fill(&mut buf).await?;
        Ok(Bytes::from(buf))
    }

    pub async fn read_string(&mut self, len: usize, field: &'static str) -> Result<String> {
        let bytes = self.read_bytes(len).await?;
        String::from_utf8(bytes.to_vec()).map_err(|_| ProtocolError::InvalidText { field })
    }

    /// `len:u16 | utf8`
    pub async fn read_prefixed_string(&mut self, field: &'static str) -> Result<String> {
        let len = self.read_u16().await? as usize;
        self.read_string(len, field).await
    }

    /// `len:u32 | bytes`
    pub async fn read_blob(&mut self) -> Result<Bytes> {
        let len = self.read_u32().await?;
        self.read_bytes(len as usize).await
    }

    pub async fn read_name(&mut self) -> Result<NameField> {
        let mut b = [0u8; NAME_CAPACITY];
        self.fill(&mut b).await?;
        Ok(NameField::from_wire(b))
    }

    pub async fn read_client_id(&mut self) -> Result<ClientId> {
        let mut b = [0u8; 16];
        self.fill(&mut b).await?;
        Ok(ClientId::from_bytes(b))
    }

    async fn fill(&mut self, buf: &mut [u8]) -> Result<()> {
        match self.inner.read_exact(buf).await {
            Ok(_) => {
                self.consumed += buf.len();
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                Err(ProtocolError::ShortRead { needed: buf.len() })
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl FrameReader<&[u8]> {
    /// Bytes left in an in-memory payload
    pub fn remaining(&self) -> usize {
        self.inner.len()
    }

    /// Close out a declared-length payload decode. Running past the end or
    /// leaving bytes unread both mean the declared length was wrong.
    pub fn finish<T>(&self, decoded: Result<T>, declared: u32) -> Result<T> {
        match decoded {
            Err(ProtocolError::ShortRead { .. }) => Err(ProtocolError::LengthMismatch {
                declared,
                consumed: self.consumed,
            }),
            Err(e) => Err(e),
            Ok(_) if self.remaining() != 0 => Err(ProtocolError::LengthMismatch {
                declared,
                consumed: self.consumed,
            }),
            Ok(value) => Ok(value),
        }
    }
}

/// Read a `declared`-byte payload block, refusing oversized declarations.
pub async fn read_payload<R: AsyncRead + Unpin>(
    reader: &mut FrameReader<R>,
    declared: u32,
) -> Result<Bytes> {
    if declared > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::PayloadTooLarge {
            len: declared as u64,
            max: MAX_PAYLOAD_SIZE,
        });
    }
    reader.read_bytes(declared as usize).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_builder_little_endian() {
        let mut frame = FrameBuilder::new();
        frame.put_u8(0xAB).put_u16(0x0102).put_u32(0x0A0B0C0D);
        assert_eq!(
            frame.freeze().as_ref(),
            &[0xAB, 0x02, 0x01, 0x0D, 0x0C, 0x0B, 0x0A]
        );
    }

    #[test]
    fn test_put_frame_appends() {
        let mut inner = FrameBuilder::new();
        inner.put_slice(b"abc");
        let mut outer = FrameBuilder::new();
        outer.put_u8(1).put_frame(&inner).put_u8(2);
        assert_eq!(outer.len(), 5);
        assert_eq!(outer.freeze().as_ref(), b"\x01abc\x02");
    }

    #[tokio::test]
    async fn test_reader_primitives() {
        let mut frame = FrameBuilder::new();
        frame
            .put_u8(7)
            .put_u16(300)
            .put_u32(70_000)
            .put_string("filename", "notes.txt")
            .unwrap()
            .put_blob("payload", b"hello")
            .unwrap();
        let bytes = frame.freeze();

        let mut reader = FrameReader::new(&bytes[..]);
        assert_eq!(reader.read_u8().await.unwrap(), 7);
        assert_eq!(reader.read_u16().await.unwrap(), 300);
        assert_eq!(reader.read_u32().await.unwrap(), 70_000);
        assert_eq!(
            reader.read_prefixed_string("filename").await.unwrap(),
            "notes.txt"
        );
        assert_eq!(reader.read_blob().await.unwrap().as_ref(), b"hello");
        assert_eq!(reader.consumed(), bytes.len());
        assert_eq!(reader.remaining(), 0);
    }

    #[tokio::test]
    async fn test_short_read_is_error() {
        let data = [1u8, 2, 3];
        let mut reader = FrameReader::new(&data[..]);
        match reader.read_u32().await {
            Err(ProtocolError::ShortRead { needed }) => assert_eq!(needed, 4),
            other => panic!("expected ShortRead, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_short_blob_is_error() {
        let mut frame = FrameBuilder::new();
        frame.put_u32(10).put_slice(b"abc");
        let bytes = frame.freeze();
        let mut reader = FrameReader::new(&bytes[..]);
        assert!(matches!(
            reader.read_blob().await,
            Err(ProtocolError::ShortRead { needed: 10 })
        ));
    }

    #[tokio::test]
    async fn test_oversized_payload_refused() {
        let data = [0u8; 4];
        let mut reader = FrameReader::new(&data[..]);
        assert!(matches!(
            read_payload(&mut reader, MAX_PAYLOAD_SIZE + 1).await,
            Err(ProtocolError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn test_string_too_long() {
        let long = "x".repeat(u16::MAX as usize + 1);
        let mut frame = FrameBuilder::new();
        assert!(matches!(
            frame.put_string("filename", &long),
            Err(ProtocolError::FieldTooLong { field: "filename", .. })
        ));
    }

    #[tokio::test]
    async fn test_finish_detects_leftover_and_overrun() {
        let data = [1u8, 2, 3];

        let mut reader = FrameReader::new(&data[..]);
        let decoded = reader.read_u16().await;
        assert!(matches!(
            reader.finish(decoded, 3),
            Err(ProtocolError::LengthMismatch { declared: 3, consumed: 2 })
        ));

        let mut reader = FrameReader::new(&data[..]);
        let _ = reader.read_u16().await;
        let decoded = reader.read_u16().await;
        assert!(matches!(
            reader.finish(decoded, 3),
            Err(ProtocolError::LengthMismatch { declared: 3, .. })
        ));
    }

    proptest! {
        #[test]
        fn prop_string_and_blob_roundtrip(text in ".{0,64}", blob in proptest::collection::vec(any::<u8>(), 0..256)) {
            let mut frame = FrameBuilder::new();
            frame.put_string("text", &text).unwrap();
            frame.put_blob("blob", &blob).unwrap();
            let bytes = frame.freeze();

            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let (t, b) = rt.block_on(async {
                let mut reader = FrameReader::new(&bytes[..]);
                let t = reader.read_prefixed_string("text").await.unwrap();
                let b = reader.read_blob().await.unwrap();
                (t, b)
            });
            prop_assert_eq!(t, text);
            prop_assert_eq!(b.as_ref(), &blob[..]);
        }
    }
}
