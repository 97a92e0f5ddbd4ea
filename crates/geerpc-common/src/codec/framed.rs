use std::io;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tracing::debug;

use super::CodecType;
use crate::protocol::error::{Result, RpcError};
use crate::protocol::{Header, Options, MAGIC_NUMBER};

/// Maximum frame size (16 MiB). Bounds per-frame allocation so a corrupt or
/// hostile length prefix cannot exhaust memory.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Reads length-prefixed frames from an async byte stream.
pub struct FrameReader<R> {
    inner: R,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Reads one frame. Returns `Ok(None)` on clean EOF at a frame boundary;
    /// a stream that ends inside a frame is an error.
    pub async fn read_frame(&mut self) -> Result<Option<Vec<u8>>> {
        let mut len_buf = [0u8; 4];
        match self.inner.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let len = u32::from_be_bytes(len_buf) as usize;
        if len > MAX_FRAME_SIZE {
            return Err(RpcError::Codec(format!(
                "frame too large: {} bytes (max {} bytes)",
                len, MAX_FRAME_SIZE
            )));
        }

        let mut payload = vec![0u8; len];
        self.inner.read_exact(&mut payload).await?;
        Ok(Some(payload))
    }
}

/// Writes length-prefixed frames to an async byte stream.
///
/// Writes are buffered; callers must [`flush`](Self::flush) once a logically
/// complete message has been written so the peer sees whole frames.
pub struct FrameWriter<W: AsyncWrite + Unpin> {
    inner: BufWriter<W>,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner: BufWriter::new(inner),
        }
    }

    pub async fn write_frame(&mut self, payload: &[u8]) -> Result<()> {
        if payload.len() > MAX_FRAME_SIZE {
            return Err(RpcError::Codec(format!(
                "frame too large: {} bytes (max {} bytes)",
                payload.len(),
                MAX_FRAME_SIZE
            )));
        }
        self.inner.write_all(&(payload.len() as u32).to_be_bytes()).await?;
        self.inner.write_all(payload).await?;
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.inner.flush().await?;
        Ok(())
    }

    /// Flushes what it can and shuts the underlying stream down.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

/// Sends the handshake record as one JSON frame, regardless of which codec
/// the record selects for the rest of the connection.
pub async fn send_options<W: AsyncWrite + Unpin>(
    frames: &mut FrameWriter<W>,
    opt: &Options,
) -> Result<()> {
    let payload = serde_json::to_vec(opt)?;
    frames.write_frame(&payload).await?;
    frames.flush().await
}

/// Receives and validates the handshake record.
pub async fn recv_options<R: AsyncRead + Unpin>(frames: &mut FrameReader<R>) -> Result<Options> {
    let payload = frames
        .read_frame()
        .await?
        .ok_or_else(|| RpcError::Handshake("connection closed before options".to_string()))?;
    let opt: Options = serde_json::from_slice(&payload)
        .map_err(|e| RpcError::Handshake(format!("options decode: {}", e)))?;
    if opt.magic_number != MAGIC_NUMBER {
        return Err(RpcError::InvalidMagic(opt.magic_number));
    }
    Ok(opt)
}

/// The read half of one connection: frames plus the negotiated codec.
pub struct CodecReader<R> {
    frames: FrameReader<R>,
    codec: CodecType,
}

impl<R: AsyncRead + Unpin> CodecReader<R> {
    pub fn new(frames: FrameReader<R>, codec: CodecType) -> Self {
        Self { frames, codec }
    }

    /// Reads one header frame. `Ok(None)` means the peer closed the
    /// connection cleanly between requests.
    pub async fn read_header(&mut self) -> Result<Option<Header>> {
        match self.frames.read_frame().await? {
            None => Ok(None),
            Some(payload) => Ok(Some(self.codec.decode(&payload)?)),
        }
    }

    /// Reads the raw body frame belonging to the last header.
    pub async fn read_body(&mut self) -> Result<Vec<u8>> {
        self.frames.read_frame().await?.ok_or_else(|| {
            RpcError::Codec("connection closed before body frame".to_string())
        })
    }

    /// Reads and decodes the body frame into a typed value.
    pub async fn read_body_as<T: DeserializeOwned>(&mut self) -> Result<T> {
        let payload = self.read_body().await?;
        self.codec.decode(&payload)
    }

    /// Consumes the body frame without decoding it, keeping the stream
    /// aligned for the next header.
    pub async fn discard_body(&mut self) -> Result<()> {
        self.read_body().await.map(drop)
    }
}

/// The write half of one connection: frames plus the negotiated codec.
///
/// A write emits the header frame and the body frame, then flushes, so the
/// pair is visible to the peer before the call returns. A failed write shuts
/// the stream down; a connection with a half-written message on it cannot be
/// reused.
pub struct CodecWriter<W: AsyncWrite + Unpin> {
    frames: FrameWriter<W>,
    codec: CodecType,
}

impl<W: AsyncWrite + Unpin> CodecWriter<W> {
    pub fn new(frames: FrameWriter<W>, codec: CodecType) -> Self {
        Self { frames, codec }
    }

    /// Encodes and writes one `(header, body)` pair.
    pub async fn write<T: Serialize>(&mut self, header: &Header, body: &T) -> Result<()> {
        let payload = self.codec.encode(body)?;
        self.write_raw(header, &payload).await
    }

    /// Writes one `(header, body)` pair where the body is already encoded.
    pub async fn write_raw(&mut self, header: &Header, body: &[u8]) -> Result<()> {
        let result = self.try_write(header, body).await;
        if result.is_err() {
            debug!("closing connection after failed write");
            let _ = self.frames.shutdown().await;
        }
        result
    }

    async fn try_write(&mut self, header: &Header, body: &[u8]) -> Result<()> {
        let head = self.codec.encode(header)?;
        self.frames.write_frame(&head).await?;
        self.frames.write_frame(body).await?;
        self.frames.flush().await
    }

    /// Releases the underlying stream.
    pub async fn close(&mut self) -> Result<()> {
        self.frames.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frame_round_trip() {
        let (client, server) = tokio::io::duplex(1024);
        let mut writer = FrameWriter::new(client);
        let mut reader = FrameReader::new(server);

        writer.write_frame(b"hello").await.unwrap();
        writer.write_frame(b"").await.unwrap();
        writer.flush().await.unwrap();

        assert_eq!(reader.read_frame().await.unwrap().unwrap(), b"hello");
        assert_eq!(reader.read_frame().await.unwrap().unwrap(), b"");

        drop(writer);
        assert!(reader.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_truncated_frame_is_an_error() {
        let (client, server) = tokio::io::duplex(1024);
        let mut reader = FrameReader::new(server);

        let mut client = client;
        // Announce 100 bytes, deliver 3, hang up.
        client.write_all(&100u32.to_be_bytes()).await.unwrap();
        client.write_all(b"abc").await.unwrap();
        drop(client);

        assert!(reader.read_frame().await.is_err());
    }

    #[tokio::test]
    async fn test_handshake_round_trip() {
        let (client, server) = tokio::io::duplex(1024);
        let mut writer = FrameWriter::new(client);
        let mut reader = FrameReader::new(server);

        let opt = Options::default().with_codec(CodecType::Postcard);
        send_options(&mut writer, &opt).await.unwrap();

        let received = recv_options(&mut reader).await.unwrap();
        assert_eq!(received.codec_type, CodecType::Postcard);
    }

    #[tokio::test]
    async fn test_handshake_rejects_bad_magic() {
        let (client, server) = tokio::io::duplex(1024);
        let mut writer = FrameWriter::new(client);
        let mut reader = FrameReader::new(server);

        let mut opt = Options::default();
        opt.magic_number = 0xdeadbeef;
        send_options(&mut writer, &opt).await.unwrap();

        match recv_options(&mut reader).await {
            Err(RpcError::InvalidMagic(m)) => assert_eq!(m, 0xdeadbeef),
            other => panic!("expected InvalidMagic, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_header_body_pairs_over_duplex() {
        let (client, server) = tokio::io::duplex(1024);
        let mut writer = CodecWriter::new(FrameWriter::new(client), CodecType::Json);
        let mut reader = CodecReader::new(FrameReader::new(server), CodecType::Json);

        let header = Header {
            service_method: "Arith.Add".to_string(),
            seq: 1,
            error: String::new(),
        };
        writer.write(&header, &41i32).await.unwrap();

        let received = reader.read_header().await.unwrap().unwrap();
        assert_eq!(received, header);
        let body: i32 = reader.read_body_as().await.unwrap();
        assert_eq!(body, 41);
    }

    #[tokio::test]
    async fn test_discard_body_keeps_alignment() {
        let (client, server) = tokio::io::duplex(1024);
        let mut writer = CodecWriter::new(FrameWriter::new(client), CodecType::Json);
        let mut reader = CodecReader::new(FrameReader::new(server), CodecType::Json);

        let first = Header {
            service_method: "Svc.Skipped".to_string(),
            seq: 1,
            error: String::new(),
        };
        let second = Header {
            service_method: "Svc.Wanted".to_string(),
            seq: 2,
            error: String::new(),
        };
        writer.write(&first, &"ignored").await.unwrap();
        writer.write(&second, &7i32).await.unwrap();

        reader.read_header().await.unwrap().unwrap();
        reader.discard_body().await.unwrap();

        let h = reader.read_header().await.unwrap().unwrap();
        assert_eq!(h.seq, 2);
        assert_eq!(reader.read_body_as::<i32>().await.unwrap(), 7);
    }
}
