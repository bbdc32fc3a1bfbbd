//! Client half: one connection, one outstanding request at a time
//!
//! `get` relays the file body from the socket into a local file, `stream`
//! into the stdin of a playback process, and `stream+` into both at once
//! within a single relay.

use crate::catalog::decode_list;
use crate::codec::FrameCodec;
use crate::config::ClientConfig;
use crate::dest::ensure_destination;
use crate::error::{Error, Result};
use crate::player::{PlaybackExit, PlaybackProcess};
use crate::progress::TransferProgress;
use crate::protocol::{REQUEST_LIST, REQUEST_STREAM};
use crate::relay::{RelayReport, Sink, TransferSession};
use std::io;
use std::path::PathBuf;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::process::ChildStdin;

pub const FILE_SINK: &str = "file";
pub const PLAYBACK_SINK: &str = "playback";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    Save,
    Play,
    PlayAndSave,
}

impl Delivery {
    fn saves(self) -> bool {
        matches!(self, Delivery::Save | Delivery::PlayAndSave)
    }

    fn plays(self) -> bool {
        matches!(self, Delivery::Play | Delivery::PlayAndSave)
    }
}

/// Result of one get/stream/stream+ command.
#[derive(Debug, Clone)]
pub struct TransferOutcome {
    pub index: u32,
    pub name: String,
    pub size: u64,
    pub saved_to: Option<PathBuf>,
    pub playback: Option<PlaybackExit>,
    pub report: RelayReport,
}

impl TransferOutcome {
    /// True when the local copy holds the whole file.
    pub fn saved_completely(&self) -> bool {
        self.report
            .sink(FILE_SINK)
            .is_some_and(|s| s.error.is_none() && s.delivered == self.size)
    }
}

pub struct ClientSession<S> {
    codec: FrameCodec<S>,
    library: Vec<String>,
    config: ClientConfig,
    in_sync: bool,
}

impl ClientSession<TcpStream> {
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let addr = format!("{}:{}", config.address, config.port);
        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|e| Error::Io(io::Error::new(e.kind(), format!("connect {addr}: {e}"))))?;
        let _ = stream.set_nodelay(true);
        tracing::info!(%addr, "connected to server");
        Ok(Self::new(stream, config))
    }
}

impl<S> ClientSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(io: S, config: ClientConfig) -> Self {
        Self {
            codec: FrameCodec::with_capacity(io, config.receive_buffer, config.bleed_off),
            library: Vec::new(),
            config,
            in_sync: true,
        }
    }

    /// Catalog from the most recent `list`.
    pub fn library(&self) -> &[String] {
        &self.library
    }

    /// False once a request failed midway; the connection must be replaced.
    pub fn is_usable(&self) -> bool {
        self.in_sync
    }

    pub async fn list(&mut self) -> Result<&[String]> {
        self.in_sync = false;
        self.codec.write_line(REQUEST_LIST).await?;
        self.codec.flush().await?;
        self.library = decode_list(&mut self.codec, Some(self.config.empty_list_grace())).await?;
        self.in_sync = true;
        tracing::debug!(files = self.library.len(), "received library");
        Ok(&self.library)
    }

    pub async fn get(&mut self, index: u32) -> Result<TransferOutcome> {
        self.fetch(index, Delivery::Save).await
    }

    pub async fn stream(&mut self, index: u32) -> Result<TransferOutcome> {
        self.fetch(index, Delivery::Play).await
    }

    pub async fn stream_and_get(&mut self, index: u32) -> Result<TransferOutcome> {
        self.fetch(index, Delivery::PlayAndSave).await
    }

    fn name_for(&self, index: u32) -> Result<String> {
        self.library
            .get(index as usize)
            .cloned()
            .ok_or(Error::Index {
                index,
                len: self.library.len(),
            })
    }

    async fn fetch(&mut self, index: u32, delivery: Delivery) -> Result<TransferOutcome> {
        let name = self.name_for(index)?;

        // Local preparation; failures here leave the connection untouched.
        let saved_to = if delivery.saves() {
            Some(ensure_destination(&self.config.library, &name)?)
        } else {
            None
        };
        let file = match &saved_to {
            Some(path) => Some(File::create(path).await?),
            None => None,
        };
        let mut player = if delivery.plays() {
            Some(PlaybackProcess::spawn(&self.config.player)?)
        } else {
            None
        };
        let pipe = match player.as_mut() {
            Some(p) => Some(p.take_input()?),
            None => None,
        };

        let result = self.transfer(index, &name, file, pipe).await;

        let playback = match (player, &result) {
            (Some(p), Ok(_)) => match p.wait().await {
                Ok(exit) => {
                    if !exit.success() {
                        tracing::warn!(%exit, "audio player did not exit cleanly");
                    }
                    Some(exit)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "could not wait for audio player");
                    None
                }
            },
            (Some(p), Err(_)) => {
                p.abort().await;
                None
            }
            (None, _) => None,
        };

        let report = result?;
        Ok(TransferOutcome {
            index,
            name,
            size: report.consumed,
            saved_to,
            playback,
            report,
        })
    }

    async fn transfer(
        &mut self,
        index: u32,
        name: &str,
        file: Option<File>,
        pipe: Option<ChildStdin>,
    ) -> Result<RelayReport> {
        self.in_sync = false;
        self.codec.write_line(REQUEST_STREAM).await?;
        self.codec.write_u32(index).await?;
        self.codec.flush().await?;
        let size = u64::from(self.codec.read_u32().await?);
        tracing::debug!(index, name, size, "receiving file");

        let progress = TransferProgress::new(name, size, self.config.progress);
        let bar = progress.handle();
        let mut session = TransferSession::new(size, self.config.read_chunk)
            .on_progress(move |n| bar.set_position(n));
        if let Some(pipe) = pipe {
            session = session.sink(Sink::new(PLAYBACK_SINK, pipe));
        }
        if let Some(file) = file {
            session = session.sink(Sink::new(FILE_SINK, file));
        }

        match session.run(&mut self.codec).await {
            Ok(report) => {
                progress.finish(report.consumed);
                self.in_sync = true;
                Ok(report)
            }
            Err(e) => {
                progress.fail(&e.to_string());
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

    fn config(library: PathBuf) -> ClientConfig {
        ClientConfig {
            library,
            progress: false,
            empty_list_grace_ms: 50,
            ..ClientConfig::default()
        }
    }

    async fn expect(server: &mut DuplexStream, bytes: &[u8]) {
        let mut got = vec![0u8; bytes.len()];
        server.read_exact(&mut got).await.unwrap();
        assert_eq!(got, bytes);
    }

    #[tokio::test]
    async fn list_orders_entries_by_index() {
        let tmp = tempfile::tempdir().unwrap();
        let (client, mut server) = duplex(1024);
        let mut session = ClientSession::new(client, config(tmp.path().into()));

        let fake = tokio::spawn(async move {
            expect(&mut server, b"LIST\r\n").await;
            server.write_all(b"1:sub/b.wav\r\n0:a.wav\r\n").await.unwrap();
            server
        });
        let library = session.list().await.unwrap().to_vec();
        assert_eq!(library, vec!["a.wav", "sub/b.wav"]);
        drop(fake.await.unwrap());
    }

    #[tokio::test]
    async fn get_saves_under_library_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let saved = tmp.path().join("saved");
        let (client, mut server) = duplex(1024);
        let mut session = ClientSession::new(client, config(saved.clone()));

        let fake = tokio::spawn(async move {
            expect(&mut server, b"LIST\r\n").await;
            server.write_all(b"1:sub/b.wav\r\n0:a.wav\r\n").await.unwrap();
            expect(&mut server, b"STREAM\r\n\x00\x00\x00\x01").await;
            // Header and body in one segment.
            server.write_all(b"\x00\x00\x00\x05hello").await.unwrap();
            server
        });

        session.list().await.unwrap();
        let outcome = session.get(1).await.unwrap();
        assert_eq!(outcome.size, 5);
        assert!(outcome.saved_completely());
        assert!(outcome.playback.is_none());
        assert_eq!(std::fs::read(saved.join("sub/b.wav")).unwrap(), b"hello");
        assert!(session.is_usable());
        drop(fake.await.unwrap());
    }

    #[tokio::test]
    async fn index_outside_cached_library_is_rejected_locally() {
        let tmp = tempfile::tempdir().unwrap();
        let (client, _server) = duplex(64);
        let mut session = ClientSession::new(client, config(tmp.path().into()));
        assert!(matches!(session.get(0).await, Err(Error::Index { index: 0, len: 0 })));
        assert!(session.is_usable());
    }

    #[tokio::test]
    async fn truncated_body_marks_session_unusable() {
        let tmp = tempfile::tempdir().unwrap();
        let (client, mut server) = duplex(1024);
        let mut session = ClientSession::new(client, config(tmp.path().join("saved")));

        let fake = tokio::spawn(async move {
            expect(&mut server, b"LIST\r\n").await;
            server.write_all(b"0:a.wav\r\n").await.unwrap();
            expect(&mut server, b"STREAM\r\n\x00\x00\x00\x00").await;
            server.write_all(b"\x00\x00\x00\x0Ashort").await.unwrap();
        });

        session.list().await.unwrap();
        fake.await.unwrap();
        let err = session.get(0).await.unwrap_err();
        assert!(matches!(err, Error::Transfer(_)));
        assert!(!session.is_usable());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stream_and_get_feeds_player_and_file() {
        let tmp = tempfile::tempdir().unwrap();
        let saved = tmp.path().join("saved");
        let heard = tmp.path().join("heard.raw");
        let mut cfg = config(saved.clone());
        cfg.player = crate::config::PlayerConfig {
            program: "sh".into(),
            args: vec!["-c".into(), format!("cat > '{}'", heard.display())],
        };
        let body: Vec<u8> = (0..50_000u32).map(|i| (i % 253) as u8).collect();
        let (client, mut server) = duplex(4096);
        let mut session = ClientSession::new(client, cfg);

        let sent = body.clone();
        let fake = tokio::spawn(async move {
            expect(&mut server, b"LIST\r\n").await;
            server.write_all(b"0:song.wav\r\n").await.unwrap();
            expect(&mut server, b"STREAM\r\n\x00\x00\x00\x00").await;
            server.write_all(&(sent.len() as u32).to_be_bytes()).await.unwrap();
            for chunk in sent.chunks(1000) {
                server.write_all(chunk).await.unwrap();
            }
            server
        });

        session.list().await.unwrap();
        let outcome = session.stream_and_get(0).await.unwrap();
        assert!(outcome.report.fully_delivered());
        assert_eq!(outcome.playback, Some(PlaybackExit::Exited(0)));
        assert_eq!(std::fs::read(saved.join("song.wav")).unwrap(), body);
        assert_eq!(std::fs::read(&heard).unwrap(), body);
        drop(fake.await.unwrap());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn player_quitting_early_does_not_fail_the_save() {
        let tmp = tempfile::tempdir().unwrap();
        let saved = tmp.path().join("saved");
        let mut cfg = config(saved.clone());
        cfg.player = crate::config::PlayerConfig {
            program: "sh".into(),
            args: vec!["-c".into(), "exit 0".into()],
        };
        let body: Vec<u8> = vec![7u8; 256 * 1024];
        let (client, mut server) = duplex(8192);
        let mut session = ClientSession::new(client, cfg);

        let sent = body.clone();
        let fake = tokio::spawn(async move {
            expect(&mut server, b"LIST\r\n").await;
            server.write_all(b"0:song.wav\r\n").await.unwrap();
            expect(&mut server, b"STREAM\r\n\x00\x00\x00\x00").await;
            server.write_all(&(sent.len() as u32).to_be_bytes()).await.unwrap();
            server.write_all(&sent).await.unwrap();
            server
        });

        session.list().await.unwrap();
        let outcome = session.stream_and_get(0).await.unwrap();
        assert!(outcome.saved_completely());
        assert!(outcome.report.sink(PLAYBACK_SINK).unwrap().error.is_some());
        assert_eq!(std::fs::read(saved.join("song.wav")).unwrap(), body);
        assert!(session.is_usable());
        drop(fake.await.unwrap());
    }
}
