//! Multiplexed one-to-many byte relay
//!
//! One source is read in bounded chunks into a growable reservoir and the
//! reservoir is written out to every attached sink with independent
//! cursors. All endpoints are polled from a single task; a wake-up may find
//! any subset of them ready. Partial writes are normal and only advance the
//! writing sink's cursor. Bytes are retired once the slowest open sink has
//! taken them.
//!
//! A source failure or premature end of stream fails the session. A sink
//! failure only closes that sink.

use crate::error::{SinkError, TransferError};
use bytes::{Buf, BytesMut};
use std::future::poll_fn;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};

/// A destination for relayed bytes (file, playback pipe, socket).
pub struct Sink<'a> {
    label: String,
    writer: Box<dyn AsyncWrite + Send + Unpin + 'a>,
    delivered: u64,
    failure: Option<SinkError>,
}

impl<'a> Sink<'a> {
    pub fn new<W>(label: impl Into<String>, writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'a,
    {
        Self {
            label: label.into(),
            writer: Box::new(writer),
            delivered: 0,
            failure: None,
        }
    }

    fn is_open(&self) -> bool {
        self.failure.is_none()
    }

    fn close(&mut self, reason: impl Into<String>) {
        let err = SinkError {
            sink: self.label.clone(),
            delivered: self.delivered,
            reason: reason.into(),
        };
        tracing::warn!(error = %err, "sink closed, continuing with remaining sinks");
        self.failure = Some(err);
    }
}

#[derive(Debug, Clone)]
pub struct SinkReport {
    pub label: String,
    pub delivered: u64,
    pub error: Option<SinkError>,
}

/// Outcome of a finished session.
#[derive(Debug, Clone)]
pub struct RelayReport {
    pub consumed: u64,
    pub peak_buffered: usize,
    pub sinks: Vec<SinkReport>,
}

impl RelayReport {
    pub fn sink(&self, label: &str) -> Option<&SinkReport> {
        self.sinks.iter().find(|s| s.label == label)
    }

    /// True when every sink took every consumed byte.
    pub fn fully_delivered(&self) -> bool {
        self.sinks
            .iter()
            .all(|s| s.error.is_none() && s.delivered == self.consumed)
    }
}

type ProgressFn<'a> = Box<dyn FnMut(u64) + Send + 'a>;

/// One in-flight relay from a source of known length to 1..n sinks.
pub struct TransferSession<'a> {
    expected: u64,
    consumed: u64,
    chunk: usize,
    scratch: Vec<u8>,
    reservoir: BytesMut,
    // Absolute stream offset of reservoir[0]
    retired: u64,
    peak: usize,
    sinks: Vec<Sink<'a>>,
    progress: Option<ProgressFn<'a>>,
}

impl<'a> TransferSession<'a> {
    pub fn new(expected: u64, chunk_size: usize) -> Self {
        let chunk = chunk_size.max(1);
        Self {
            expected,
            consumed: 0,
            chunk,
            scratch: vec![0u8; chunk],
            reservoir: BytesMut::new(),
            retired: 0,
            peak: 0,
            sinks: Vec::new(),
            progress: None,
        }
    }

    pub fn sink(mut self, sink: Sink<'a>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Called with the running total of bytes consumed from the source.
    pub fn on_progress(mut self, f: impl FnMut(u64) + Send + 'a) -> Self {
        self.progress = Some(Box::new(f));
        self
    }

    pub async fn run<R>(mut self, source: &mut R) -> Result<RelayReport, TransferError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        if self.sinks.is_empty() {
            return Err(TransferError::NoSinks);
        }
        tracing::debug!(
            expected = self.expected,
            sinks = self.sinks.len(),
            chunk = self.chunk,
            "relay started"
        );

        poll_fn(|cx| self.poll_relay(cx, &mut *source)).await?;

        for sink in self.sinks.iter_mut().filter(|s| s.is_open()) {
            if let Err(e) = sink.writer.flush().await {
                sink.close(e.to_string());
            }
        }

        let report = RelayReport {
            consumed: self.consumed,
            peak_buffered: self.peak,
            sinks: self
                .sinks
                .into_iter()
                .map(|s| SinkReport {
                    label: s.label,
                    delivered: s.delivered,
                    error: s.failure,
                })
                .collect(),
        };
        tracing::debug!(consumed = report.consumed, peak = report.peak_buffered, "relay finished");
        Ok(report)
    }

    fn poll_relay<R>(
        &mut self,
        cx: &mut Context<'_>,
        source: &mut R,
    ) -> Poll<Result<(), TransferError>>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        loop {
            let mut progressed = false;

            if self.consumed < self.expected {
                let want = (self.expected - self.consumed).min(self.chunk as u64) as usize;
                let mut buf = ReadBuf::new(&mut self.scratch[..want]);
                match Pin::new(&mut *source).poll_read(cx, &mut buf) {
                    Poll::Ready(Ok(())) => {
                        let n = buf.filled().len();
                        if n == 0 {
                            return Poll::Ready(Err(TransferError::PrematureEof {
                                consumed: self.consumed,
                                expected: self.expected,
                            }));
                        }
                        self.reservoir.extend_from_slice(buf.filled());
                        self.consumed += n as u64;
                        if let Some(progress) = self.progress.as_mut() {
                            progress(self.consumed);
                        }
                        progressed = true;
                    }
                    Poll::Ready(Err(e)) if e.kind() == io::ErrorKind::Interrupted => {
                        progressed = true
                    }
                    Poll::Ready(Err(e)) => return Poll::Ready(Err(TransferError::Source(e))),
                    Poll::Pending => {}
                }
            }
            self.peak = self.peak.max(self.reservoir.len());

            for sink in self.sinks.iter_mut() {
                if !sink.is_open() {
                    continue;
                }
                let start = (sink.delivered - self.retired) as usize;
                if start >= self.reservoir.len() {
                    continue;
                }
                let end = self.reservoir.len().min(start + self.chunk);
                match Pin::new(&mut sink.writer).poll_write(cx, &self.reservoir[start..end]) {
                    Poll::Ready(Ok(0)) => {
                        sink.close("sink accepted no bytes");
                        progressed = true;
                    }
                    Poll::Ready(Ok(n)) => {
                        sink.delivered += n as u64;
                        progressed = true;
                    }
                    Poll::Ready(Err(e)) if e.kind() == io::ErrorKind::Interrupted => {
                        progressed = true
                    }
                    Poll::Ready(Err(e)) => {
                        sink.close(e.to_string());
                        progressed = true;
                    }
                    Poll::Pending => {}
                }
            }

            self.retire();

            if self.consumed == self.expected && self.reservoir.is_empty() {
                return Poll::Ready(Ok(()));
            }
            if !progressed {
                return Poll::Pending;
            }
        }
    }

    // Drop everything the slowest open sink already has. With no open sinks
    // left the source is still drained so the stream stays framed.
    fn retire(&mut self) {
        let floor = self
            .sinks
            .iter()
            .filter(|s| s.is_open())
            .map(|s| s.delivered)
            .min()
            .unwrap_or(self.consumed);
        if floor > self.retired {
            self.reservoir.advance((floor - self.retired) as usize);
            self.retired = floor;
        }
    }
}

/// Relay exactly `expected` bytes from `source` to `sinks`.
pub async fn relay<'a, R>(
    source: &mut R,
    expected: u64,
    sinks: Vec<Sink<'a>>,
    chunk_size: usize,
) -> Result<RelayReport, TransferError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    sinks
        .into_iter()
        .fold(TransferSession::new(expected, chunk_size), TransferSession::sink)
        .run(source)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    #[derive(Default)]
    struct RecordingSink {
        data: Vec<u8>,
        writes: Vec<usize>,
    }

    impl AsyncWrite for RecordingSink {
        fn poll_write(
            self: Pin<&mut Self>,
            _: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            let this = self.get_mut();
            this.data.extend_from_slice(buf);
            this.writes.push(buf.len());
            Poll::Ready(Ok(buf.len()))
        }
        fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
        fn poll_shutdown(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    // Accepts `per_write` bytes at a time and is busy on every other poll.
    struct TrickleSink {
        data: Vec<u8>,
        per_write: usize,
        busy: bool,
    }

    impl AsyncWrite for TrickleSink {
        fn poll_write(
            self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            let this = self.get_mut();
            this.busy = !this.busy;
            if this.busy {
                cx.waker().wake_by_ref();
                return Poll::Pending;
            }
            let n = buf.len().min(this.per_write);
            this.data.extend_from_slice(&buf[..n]);
            Poll::Ready(Ok(n))
        }
        fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
        fn poll_shutdown(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    // Takes `allowance` bytes, then fails like a reader that went away.
    struct BrokenSink {
        allowance: usize,
    }

    impl AsyncWrite for BrokenSink {
        fn poll_write(
            self: Pin<&mut Self>,
            _: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            let this = self.get_mut();
            if this.allowance == 0 {
                return Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "reader gone")));
            }
            let n = buf.len().min(this.allowance);
            this.allowance -= n;
            Poll::Ready(Ok(n))
        }
        fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
        fn poll_shutdown(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    #[tokio::test]
    async fn ten_bytes_leave_in_chunks_of_four() {
        let body = pattern(10);
        let mut source = Cursor::new(body.clone());
        let mut out = RecordingSink::default();
        let report = relay(&mut source, 10, vec![Sink::new("socket", &mut out)], 4)
            .await
            .unwrap();
        assert_eq!(report.consumed, 10);
        assert!(report.fully_delivered());
        assert_eq!(out.writes, vec![4, 4, 2]);
        assert_eq!(out.data, body);
    }

    #[tokio::test]
    async fn fast_and_slow_sinks_get_identical_bytes() {
        let body = pattern(64 * 1024);

        // Bursty network-like source.
        let (mut feed, mut source) = duplex(512);
        let upstream = body.clone();
        let feeder = tokio::spawn(async move {
            for piece in upstream.chunks(1500) {
                feed.write_all(piece).await.unwrap();
                tokio::task::yield_now().await;
            }
            feed
        });

        // Bounded pipe drained slowly, like a playback process.
        let (pipe_in, mut pipe_out) = duplex(16);
        let player = tokio::spawn(async move {
            let mut got = Vec::new();
            let mut buf = [0u8; 7];
            loop {
                let n = pipe_out.read(&mut buf).await.unwrap();
                if n == 0 {
                    break got;
                }
                got.extend_from_slice(&buf[..n]);
                tokio::task::yield_now().await;
            }
        });

        let mut file = RecordingSink::default();
        let report = TransferSession::new(body.len() as u64, 1024)
            .sink(Sink::new("file", &mut file))
            .sink(Sink::new("playback", pipe_in))
            .run(&mut source)
            .await
            .unwrap();

        assert!(report.fully_delivered());
        assert_eq!(file.data, body);
        assert_eq!(player.await.unwrap(), body);
        drop(feeder.await.unwrap());
    }

    #[tokio::test]
    async fn reservoir_grows_behind_a_slow_sink() {
        let body = pattern(4096);
        let mut source = Cursor::new(body.clone());
        let mut slow = TrickleSink {
            data: Vec::new(),
            per_write: 3,
            busy: false,
        };
        let report = relay(&mut source, 4096, vec![Sink::new("slow", &mut slow)], 64)
            .await
            .unwrap();
        assert!(report.peak_buffered > 64);
        assert_eq!(slow.data, body);
    }

    #[tokio::test]
    async fn closed_sink_does_not_stop_the_others() {
        let body = pattern(1000);
        let mut source = Cursor::new(body.clone());
        let mut file = RecordingSink::default();
        let report = TransferSession::new(1000, 64)
            .sink(Sink::new("playback", BrokenSink { allowance: 100 }))
            .sink(Sink::new("file", &mut file))
            .run(&mut source)
            .await
            .unwrap();

        let playback = report.sink("playback").unwrap();
        assert_eq!(playback.delivered, 100);
        assert!(playback.error.is_some());
        let saved = report.sink("file").unwrap();
        assert_eq!(saved.delivered, 1000);
        assert!(saved.error.is_none());
        assert!(!report.fully_delivered());
        assert_eq!(file.data, body);
    }

    #[tokio::test]
    async fn source_is_drained_after_every_sink_closed() {
        let mut source = Cursor::new(pattern(300));
        let gone = Sink::new("gone", BrokenSink { allowance: 0 });
        let report = relay(&mut source, 300, vec![gone], 32)
            .await
            .unwrap();
        assert_eq!(report.consumed, 300);
        assert_eq!(source.position(), 300);
        assert_eq!(report.sinks[0].delivered, 0);
    }

    #[tokio::test]
    async fn short_source_is_a_transfer_error() {
        let body = pattern(5);
        let mut source = Cursor::new(body.clone());
        let mut out = RecordingSink::default();
        let err = relay(&mut source, 10, vec![Sink::new("file", &mut out)], 4)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::PrematureEof { consumed: 5, expected: 10 }));
        assert!(out.data.len() <= 5);
        assert_eq!(out.data[..], body[..out.data.len()]);
    }

    #[tokio::test]
    async fn relay_requires_a_sink() {
        let mut source = Cursor::new(pattern(4));
        assert!(matches!(relay(&mut source, 4, Vec::new(), 4).await, Err(TransferError::NoSinks)));
    }

    #[tokio::test]
    async fn empty_transfer_finishes_immediately() {
        let mut source = Cursor::new(Vec::<u8>::new());
        let mut out = RecordingSink::default();
        let report = relay(&mut source, 0, vec![Sink::new("file", &mut out)], 4).await.unwrap();
        assert_eq!(report.consumed, 0);
        assert!(out.writes.is_empty());
    }

    #[tokio::test]
    async fn progress_reports_running_total() {
        let seen = Arc::new(AtomicU64::new(0));
        let hook = seen.clone();
        let mut source = Cursor::new(pattern(100));
        let mut out = RecordingSink::default();
        TransferSession::new(100, 30)
            .sink(Sink::new("file", &mut out))
            .on_progress(move |n| hook.store(n, Ordering::Relaxed))
            .run(&mut source)
            .await
            .unwrap();
        assert_eq!(seen.load(Ordering::Relaxed), 100);
    }
}
