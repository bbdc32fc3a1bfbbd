//! Framing for the two wire message shapes: CRLF-terminated lines and
//! big-endian u32 binary fields.
//!
//! Each connection owns one [`FrameCodec`]. Bytes read past the end of a
//! line stay in its reservoir and are handed out first by the binary reads
//! and by the codec's own [`AsyncRead`] impl, so a file body that arrives in
//! the same segment as its size header is never lost.

use crate::error::{Error, FramingAnomaly, Result};
use crate::protocol::{
    decode_u32, encode_u32, BINARY_FIELD_LEN, BUFFER_BLEED_OFF, END_OF_MESSAGE,
    RECEIVE_BUFFER_SIZE,
};
use bytes::{Buf, BytesMut};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};

/// Bounded reservoir that extracts CRLF-terminated lines from raw bytes.
#[derive(Debug)]
pub struct LineBuffer {
    buf: BytesMut,
    capacity: usize,
    bleed: usize,
}

impl LineBuffer {
    pub fn new(capacity: usize, bleed: usize) -> Self {
        let capacity = capacity.max(END_OF_MESSAGE.len());
        Self {
            buf: BytesMut::with_capacity(capacity),
            capacity,
            bleed: bleed.clamp(1, capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Free space before the reservoir is full.
    pub fn spare(&self) -> usize {
        self.capacity - self.buf.len()
    }

    /// Append as much of `data` as fits; returns the number of bytes taken.
    pub fn extend(&mut self, data: &[u8]) -> usize {
        let take = data.len().min(self.spare());
        self.buf.extend_from_slice(&data[..take]);
        take
    }

    /// Pop the next complete line with its terminator stripped.
    pub fn next_line(&mut self) -> Option<Vec<u8>> {
        let end = self
            .buf
            .windows(END_OF_MESSAGE.len())
            .position(|w| w == END_OF_MESSAGE)?;
        let line = self.buf.split_to(end).to_vec();
        self.buf.advance(END_OF_MESSAGE.len());
        Some(line)
    }

    /// If the reservoir is full and holds no terminator, discard its oldest
    /// bytes so scanning can continue.
    pub fn relieve(&mut self) -> Option<FramingAnomaly> {
        if self.spare() > 0 {
            return None;
        }
        self.buf.advance(self.bleed);
        Some(FramingAnomaly {
            capacity: self.capacity,
            discarded: self.bleed,
        })
    }

    /// Move up to `out.len()` buffered bytes into `out`.
    pub fn take_into(&mut self, out: &mut [u8]) -> usize {
        let n = out.len().min(self.buf.len());
        out[..n].copy_from_slice(&self.buf[..n]);
        self.buf.advance(n);
        n
    }
}

/// Per-connection codec owning the transport and its receive reservoir.
pub struct FrameCodec<S> {
    io: S,
    lines: LineBuffer,
    anomalies: u64,
}

impl<S> FrameCodec<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(io: S) -> Self {
        Self::with_capacity(io, RECEIVE_BUFFER_SIZE, BUFFER_BLEED_OFF)
    }

    pub fn with_capacity(io: S, capacity: usize, bleed: usize) -> Self {
        Self {
            io,
            lines: LineBuffer::new(capacity, bleed),
            anomalies: 0,
        }
    }

    /// Number of times the reservoir had to be bled.
    pub fn anomalies(&self) -> u64 {
        self.anomalies
    }

    /// Read the next line. `Ok(None)` means the peer closed the stream.
    pub async fn next_line(&mut self) -> Result<Option<String>> {
        let mut scratch = [0u8; 1024];
        loop {
            if let Some(line) = self.lines.next_line() {
                return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
            }
            if let Some(anomaly) = self.lines.relieve() {
                self.anomalies += 1;
                tracing::warn!(%anomaly, "bleeding receive buffer, this shouldn't happen");
                continue;
            }
            let want = self.lines.spare().min(scratch.len());
            let n = self.io.read(&mut scratch[..want]).await?;
            if n == 0 {
                if !self.lines.is_empty() {
                    tracing::debug!(
                        pending = self.lines.len(),
                        "peer closed with an unterminated line"
                    );
                }
                return Ok(None);
            }
            self.lines.extend(&scratch[..n]);
        }
    }

    /// Read a big-endian u32, consuming already-buffered bytes first.
    pub async fn read_u32(&mut self) -> Result<u32> {
        let mut raw = [0u8; BINARY_FIELD_LEN];
        let seeded = self.lines.take_into(&mut raw);
        if seeded < BINARY_FIELD_LEN {
            self.io
                .read_exact(&mut raw[seeded..])
                .await
                .map_err(|e| match e.kind() {
                    io::ErrorKind::UnexpectedEof => {
                        Error::Protocol("connection closed inside a binary field".into())
                    }
                    _ => Error::Io(e),
                })?;
        }
        Ok(decode_u32(raw))
    }

    /// Write one line message; the terminator is appended here.
    pub async fn write_line(&mut self, line: &str) -> Result<()> {
        let mut out = Vec::with_capacity(line.len() + END_OF_MESSAGE.len());
        out.extend_from_slice(line.as_bytes());
        out.extend_from_slice(END_OF_MESSAGE);
        self.io.write_all(&out).await?;
        Ok(())
    }

    pub async fn write_u32(&mut self, value: u32) -> Result<()> {
        self.io.write_all(&encode_u32(value)).await?;
        Ok(())
    }

    pub async fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.io.write_all(bytes).await?;
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.io.flush().await?;
        Ok(())
    }
}

// Raw body reads drain the reservoir before touching the transport.
impl<S: AsyncRead + Unpin> AsyncRead for FrameCodec<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if !this.lines.is_empty() {
            let n = buf.remaining().min(this.lines.len());
            let dst = buf.initialize_unfilled_to(n);
            let taken = this.lines.take_into(dst);
            buf.advance(taken);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.io).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for FrameCodec<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().io).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().io).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().io).poll_shutdown(cx)
    }
}
