//! Duplex byte-stream transport with exact-length reads and complete writes.
//!
//! Sockets only promise "some bytes" per call. Every header and body read in
//! the protocol assumes exact-length delivery, so both primitives loop until
//! satisfied or a hard error.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};

use crate::error::{BspError, Result};
use crate::protocol::{DISCARD_CHUNK, HEADER_PREFIX_LEN};
use crate::protocol_core::{
    check_content_length, decode_header, decode_header_length, encode_header,
    validate_body_size, Header,
};
use crate::url::FrameAddr;

pub struct Transport<S = TcpStream> {
    stream: Option<S>,
    peer: String,
}

impl Transport<TcpStream> {
    /// Open a TCP stream to the appliance, bounded by `connect_ms`.
    pub async fn connect(host: &str, port: u16, connect_ms: u64) -> Result<Self> {
        let peer = FrameAddr {
            host: host.to_string(),
            port,
        }
        .to_string();
        let deadline = Duration::from_millis(connect_ms);
        let stream = match timeout(deadline, TcpStream::connect((host, port))).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(BspError::Connect(e)),
            Err(_) => return Err(BspError::Timeout(connect_ms)),
        };
        let _ = stream.set_nodelay(true);
        Ok(Self::from_stream(stream, peer))
    }
}

impl<S> Transport<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn from_stream(stream: S, peer: impl Into<String>) -> Self {
        Self {
            stream: Some(stream),
            peer: peer.into(),
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }

    fn stream(&mut self) -> Result<&mut S> {
        self.stream.as_mut().ok_or(BspError::Closed)
    }

    /// Read exactly `n` bytes. A zero-byte read means the peer closed and is
    /// an error; a short result is never returned.
    pub async fn read_exact(&mut self, n: usize) -> Result<Vec<u8>> {
        let stream = self.stream()?;
        let mut buf = vec![0u8; n];
        let mut filled = 0;
        while filled < n {
            match stream.read(&mut buf[filled..]).await {
                Ok(0) => {
                    return Err(BspError::Io(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("peer closed after {} of {} bytes", filled, n),
                    )))
                }
                Ok(k) => filled += k,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(buf)
    }

    /// Consume and drop exactly `n` bytes without buffering them all.
    pub async fn discard(&mut self, n: usize) -> Result<()> {
        let mut left = n;
        while left > 0 {
            let chunk = left.min(DISCARD_CHUNK);
            self.read_exact(chunk).await?;
            left -= chunk;
        }
        Ok(())
    }

    /// Write every byte of `buf`, retrying partial writes.
    pub async fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        let stream = self.stream()?;
        let mut written = 0;
        while written < buf.len() {
            match stream.write(&buf[written..]).await {
                Ok(0) => {
                    return Err(BspError::Io(io::Error::new(
                        io::ErrorKind::WriteZero,
                        format!("stream accepted 0 bytes after {} of {}", written, buf.len()),
                    )))
                }
                Ok(k) => written += k,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        stream.flush().await?;
        Ok(())
    }

    /// Write one frame: prefix, header, then body. The header's
    /// Content-Length must match `body`.
    pub async fn write_frame(&mut self, header: &Header, body: &[u8]) -> Result<()> {
        check_content_length(header, body.len())?;
        let hdr = encode_header(header)?;
        self.write_all(&hdr).await?;
        if !body.is_empty() {
            self.write_all(body).await?;
        }
        Ok(())
    }

    /// Read a length prefix and the JSON header it describes.
    ///
    /// A prefix that is not three digits leaves the header length unknown,
    /// so nothing after it can be framed: that is `Desync`, not `Framing`.
    pub async fn read_header(&mut self) -> Result<Header> {
        let prefix = self.read_exact(HEADER_PREFIX_LEN).await?;
        let len = match decode_header_length(&prefix) {
            Ok(len) => len,
            Err(BspError::Framing(msg)) => return Err(BspError::Desync(msg)),
            Err(e) => return Err(e),
        };
        let json = self.read_exact(len).await?;
        decode_header(&json)
    }

    /// Read a header and exactly Content-Length bytes of body. No body read
    /// is attempted when Content-Length is 0.
    ///
    /// An oversized body is drained before the `Framing` error is returned,
    /// so the stream stays on a frame boundary.
    pub async fn read_frame(&mut self) -> Result<(Header, Vec<u8>)> {
        let header = self.read_header().await?;
        if let Err(e) = validate_body_size(header.content_length) {
            self.discard(header.content_length).await?;
            return Err(e);
        }
        let body = if header.content_length > 0 {
            self.read_exact(header.content_length).await?
        } else {
            Vec::new()
        };
        Ok((header, body))
    }

    /// One-byte read used while idle to notice unsolicited data or a closed
    /// peer. `None` means the peer closed.
    pub async fn probe(&mut self) -> Result<Option<u8>> {
        let stream = self.stream()?;
        let mut byte = [0u8; 1];
        match stream.read(&mut byte).await? {
            0 => Ok(None),
            _ => Ok(Some(byte[0])),
        }
    }

    /// Release both halves. Safe to call more than once.
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
    }
}
