use crate::codec::{read_varint, varint_len, write_varint, CodecError};
use bytes::{Buf, BytesMut};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Read as _, Write as _};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::trace;

/// Largest frame the protocol allows (3-byte VarInt length).
pub const MAX_FRAME_LEN: usize = 2_097_151;
/// Largest uncompressed packet accepted from a compressed frame.
pub const MAX_UNCOMPRESSED_LEN: usize = 8 * 1024 * 1024;

/// Length-prefixed packet framing, optionally zlib-compressed above a threshold.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameCodec {
    threshold: Option<usize>,
}

impl FrameCodec {
    /// Negative thresholds turn compression off, as the set-compression packet does.
    pub fn set_compression(&mut self, threshold: i32) {
        self.threshold = usize::try_from(threshold).ok();
    }

    pub fn compression(&self) -> Option<usize> {
        self.threshold
    }

    /// Take one whole frame off the front of `buf`. `None` means more bytes are needed
    /// and leaves `buf` untouched.
    pub fn decode(&self, buf: &mut BytesMut) -> anyhow::Result<Option<(i32, BytesMut)>> {
        let mut peek = &buf[..];
        let len = match read_varint_slice(&mut peek) {
            Ok(len) => len,
            Err(CodecError::NotEnoughData) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let len = usize::try_from(len)
            .ok()
            .filter(|&len| len <= MAX_FRAME_LEN)
            .ok_or_else(|| anyhow::anyhow!("Invalid frame length {}", len))?;
        if peek.len() < len {
            return Ok(None);
        }

        let header = buf.len() - peek.len();
        buf.advance(header);
        let mut body = buf.split_to(len);
        if self.threshold.is_some() {
            body = inflate(body)?;
        }

        let id = read_varint(&mut body)?;
        trace!("Read packet id=0x{:02X} len={}", id, body.len());
        Ok(Some((id, body)))
    }

    pub fn encode(&self, id: i32, payload: &[u8]) -> anyhow::Result<BytesMut> {
        let mut packet = BytesMut::with_capacity(payload.len() + 5);
        write_varint(&mut packet, id);
        packet.extend_from_slice(payload);

        let mut frame = BytesMut::with_capacity(packet.len() + 8);
        match self.threshold {
            None => {
                write_varint(&mut frame, packet.len() as i32);
                frame.extend_from_slice(&packet);
            }
            Some(threshold) if packet.len() < threshold => {
                // Data length 0 marks an uncompressed body.
                write_varint(&mut frame, packet.len() as i32 + 1);
                write_varint(&mut frame, 0);
                frame.extend_from_slice(&packet);
            }
            Some(_) => {
                let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(&packet)?;
                let compressed = encoder.finish()?;
                let data_len = packet.len() as i32;
                write_varint(&mut frame, (varint_len(data_len) + compressed.len()) as i32);
                write_varint(&mut frame, data_len);
                frame.extend_from_slice(&compressed);
            }
        }
        Ok(frame)
    }
}

fn read_varint_slice(buf: &mut &[u8]) -> Result<i32, CodecError> {
    let mut value = 0i32;
    for i in 0..5 {
        let Some((&byte, rest)) = buf.split_first() else {
            return Err(CodecError::NotEnoughData);
        };
        *buf = rest;
        value |= ((byte & 0x7F) as i32) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(CodecError::VarIntTooBig)
}

fn inflate(mut body: BytesMut) -> anyhow::Result<BytesMut> {
    let data_len = read_varint(&mut body)?;
    if data_len == 0 {
        return Ok(body);
    }
    let data_len = usize::try_from(data_len)
        .ok()
        .filter(|&len| len <= MAX_UNCOMPRESSED_LEN)
        .ok_or_else(|| anyhow::anyhow!("Invalid uncompressed length {}", data_len))?;
    let mut out = vec![0u8; data_len];
    ZlibDecoder::new(&body[..]).read_exact(&mut out)?;
    Ok(BytesMut::from(&out[..]))
}

async fn read_frame<R: AsyncRead + Unpin>(
    stream: &mut R,
    buf: &mut BytesMut,
    codec: &FrameCodec,
) -> anyhow::Result<(i32, BytesMut)> {
    loop {
        if let Some(frame) = codec.decode(buf)? {
            return Ok(frame);
        }
        // Cancel-safe: bytes are only appended once the read completes.
        if stream.read_buf(buf).await? == 0 {
            anyhow::bail!("Connection closed");
        }
    }
}

async fn write_frame<W: AsyncWrite + Unpin>(
    stream: &mut W,
    codec: &FrameCodec,
    id: i32,
    payload: &[u8],
) -> anyhow::Result<()> {
    let frame = codec.encode(id, payload)?;
    stream.write_all(&frame).await?;
    Ok(())
}

/// One framed TCP connection, used whole until login settles and then split.
pub struct Connection {
    stream: TcpStream,
    buf: BytesMut,
    codec: FrameCodec,
}

impl Connection {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            buf: BytesMut::with_capacity(4096),
            codec: FrameCodec::default(),
        }
    }

    pub async fn connect(addr: impl ToSocketAddrs) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self::new(stream))
    }

    pub fn set_compression(&mut self, threshold: i32) {
        self.codec.set_compression(threshold);
    }

    pub async fn read_packet(&mut self) -> anyhow::Result<(i32, BytesMut)> {
        read_frame(&mut self.stream, &mut self.buf, &self.codec).await
    }

    pub async fn write_packet(&mut self, id: i32, payload: &[u8]) -> anyhow::Result<()> {
        write_frame(&mut self.stream, &self.codec, id, payload).await
    }

    /// Separate halves so both directions can be awaited at once. Buffered
    /// input and the compression setting carry over.
    pub fn into_split(self) -> (ConnectionReader, ConnectionWriter) {
        let (read, write) = self.stream.into_split();
        (
            ConnectionReader {
                stream: read,
                buf: self.buf,
                codec: self.codec,
            },
            ConnectionWriter {
                stream: write,
                codec: self.codec,
            },
        )
    }
}

pub struct ConnectionReader {
    stream: OwnedReadHalf,
    buf: BytesMut,
    codec: FrameCodec,
}

impl ConnectionReader {
    pub async fn read_packet(&mut self) -> anyhow::Result<(i32, BytesMut)> {
        read_frame(&mut self.stream, &mut self.buf, &self.codec).await
    }

    pub fn set_compression(&mut self, threshold: i32) {
        self.codec.set_compression(threshold);
    }
}

pub struct ConnectionWriter {
    stream: OwnedWriteHalf,
    codec: FrameCodec,
}

impl ConnectionWriter {
    pub async fn write_packet(&mut self, id: i32, payload: &[u8]) -> anyhow::Result<()> {
        write_frame(&mut self.stream, &self.codec, id, payload).await
    }

    pub fn set_compression(&mut self, threshold: i32) {
        self.codec.set_compression(threshold);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compressed(threshold: i32) -> FrameCodec {
        let mut codec = FrameCodec::default();
        codec.set_compression(threshold);
        codec
    }

    #[test]
    fn test_plain_frame() {
        let codec = FrameCodec::default();
        let mut buf = codec.encode(0x26, &[1, 2, 3]).unwrap();
        assert_eq!(buf.to_vec(), vec![4, 0x26, 1, 2, 3]);
        let (id, payload) = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(id, 0x26);
        assert_eq!(payload.to_vec(), vec![1, 2, 3]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_compressed_frames_back_to_back() {
        let codec = compressed(256);
        let big = vec![7u8; 600];
        let mut buf = codec.encode(0x15, &big).unwrap();
        buf.extend_from_slice(&codec.encode(0x01, &[9]).unwrap());
        assert!(buf.len() < 600);

        let (id, data) = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(id, 0x15);
        assert_eq!(data.to_vec(), big);
        let (id, data) = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(id, 0x01);
        assert_eq!(data.to_vec(), vec![9]);
    }

    #[test]
    fn test_small_packet_under_threshold_stays_raw() {
        let codec = compressed(256);
        let buf = codec.encode(0x03, &[5]).unwrap();
        assert_eq!(buf.to_vec(), vec![3, 0, 0x03, 5]);
    }

    #[test]
    fn test_negative_threshold_disables() {
        let mut codec = compressed(64);
        assert_eq!(codec.compression(), Some(64));
        codec.set_compression(-1);
        assert_eq!(codec.compression(), None);
    }

    #[test]
    fn test_partial_frame_waits() {
        let codec = FrameCodec::default();
        let frame = codec.encode(0x00, &[1, 2, 3, 4]).unwrap();
        let mut buf = BytesMut::from(&frame[..3]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 3);

        let mut buf = BytesMut::from(&[0x80u8][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut buf = BytesMut::new();
        write_varint(&mut buf, (MAX_FRAME_LEN + 1) as i32);
        assert!(FrameCodec::default().decode(&mut buf).is_err());
    }
}
