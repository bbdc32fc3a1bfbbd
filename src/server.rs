//! Catalog server: the accept loop and the per-connection request handler
//!
//! The supervisor owns the listening socket and the current catalog. Each
//! accepted connection runs in its own task holding an `Arc` snapshot of
//! the catalog taken at accept time; rescans swap in a new `Arc` and never
//! touch a snapshot a worker already holds. A worker that fails or panics
//! is reaped and reported without affecting its siblings.

use crate::catalog::{Catalog, ExtensionFilter};
use crate::codec::FrameCodec;
use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::logger::Logger;
use crate::protocol::Command;
use crate::relay::{relay, Sink};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};

/// Requests to the supervisor from the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminCommand {
    Shutdown,
    Rescan,
}

/// What one connection did before it ended.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConnectionSummary {
    pub lists: u64,
    pub streams: u64,
    pub rejected: u64,
    pub ignored: u64,
    pub bytes_sent: u64,
}

pub struct ConnectionHandler<S> {
    codec: FrameCodec<S>,
    peer: SocketAddr,
    catalog: Arc<Catalog>,
    chunk_size: usize,
    logger: Arc<dyn Logger>,
}

impl<S> ConnectionHandler<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(
        io: S,
        peer: SocketAddr,
        catalog: Arc<Catalog>,
        config: &ServerConfig,
        logger: Arc<dyn Logger>,
    ) -> Self {
        Self {
            codec: FrameCodec::with_capacity(io, config.receive_buffer, config.bleed_off),
            peer,
            catalog,
            chunk_size: config.chunk_size,
            logger,
        }
    }

    /// Serve requests in arrival order until the peer disconnects or an
    /// I/O error ends the connection.
    pub async fn run(mut self) -> Result<ConnectionSummary> {
        self.logger.connect(self.peer);
        let result = self.serve().await;
        match &result {
            Ok(summary) => {
                tracing::info!(peer = %self.peer, ?summary, "client disconnected");
                self.logger.disconnect(self.peer);
            }
            Err(e) => {
                tracing::warn!(peer = %self.peer, error = %e, "connection ended with error");
                self.logger.error(&format!("connection {}", self.peer), &e.to_string());
            }
        }
        result
    }

    async fn serve(&mut self) -> Result<ConnectionSummary> {
        let mut summary = ConnectionSummary::default();
        while let Some(line) = self.codec.next_line().await? {
            match Command::parse(&line) {
                Some(Command::List) => {
                    self.send_list().await?;
                    summary.lists += 1;
                }
                Some(Command::Stream) => match self.send_stream().await? {
                    Some(bytes) => {
                        summary.streams += 1;
                        summary.bytes_sent += bytes;
                    }
                    None => summary.rejected += 1,
                },
                None => {
                    tracing::warn!(peer = %self.peer, request = %line, "unknown request");
                    summary.ignored += 1;
                }
            }
        }
        Ok(summary)
    }

    async fn send_list(&mut self) -> Result<()> {
        let wire = self.catalog.encode_list();
        self.codec.write_raw(&wire).await?;
        self.codec.flush().await?;
        tracing::debug!(peer = %self.peer, entries = self.catalog.len(), "sent list");
        self.logger.list(self.peer, self.catalog.len());
        Ok(())
    }

    /// Returns the number of body bytes sent, or `None` if the index was
    /// rejected (answered with an empty stream).
    async fn send_stream(&mut self) -> Result<Option<u64>> {
        let index = self.codec.read_u32().await?;
        let path = match self.catalog.resolve(index) {
            Ok(path) => path,
            Err(Error::Index { index, len }) => {
                tracing::warn!(peer = %self.peer, index, len, "stream request for unknown index");
                self.logger.reject(self.peer, index, len);
                self.codec.write_u32(0).await?;
                self.codec.flush().await?;
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let mut file = tokio::fs::File::open(&path).await?;
        let size = file.metadata().await?.len();
        let header = u32::try_from(size).map_err(|_| {
            Error::Protocol(format!("{} is too large to stream ({size} bytes)", path.display()))
        })?;
        tracing::debug!(peer = %self.peer, index, file = %path.display(), size, "streaming file");

        self.codec.write_u32(header).await?;
        let report = relay(
            &mut file,
            size,
            vec![Sink::new("client", &mut self.codec)],
            self.chunk_size,
        )
        .await?;
        if let Some(err) = report.sinks.iter().find_map(|s| s.error.as_ref()) {
            return Err(Error::Io(io::Error::new(io::ErrorKind::BrokenPipe, err.to_string())));
        }

        self.logger.stream(self.peer, index, &path, size);
        Ok(Some(size))
    }
}

/// Counters reported when the supervisor stops.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SupervisorStats {
    pub accepted: u64,
    pub rescans: u64,
    pub failed_rescans: u64,
    pub failed_workers: u64,
}

enum Wake {
    Accepted(io::Result<(TcpStream, SocketAddr)>),
    Admin(Option<AdminCommand>),
    Tick,
}

pub struct Supervisor {
    listener: TcpListener,
    config: ServerConfig,
    filter: ExtensionFilter,
    catalog: Arc<Catalog>,
    workers: JoinSet<Result<ConnectionSummary>>,
    logger: Arc<dyn Logger>,
    stats: SupervisorStats,
}

impl Supervisor {
    /// Scan the library and bind the listening socket. A library that
    /// cannot be scanned here is fatal.
    pub async fn bind(config: ServerConfig, logger: Arc<dyn Logger>) -> Result<Self> {
        config.validate()?;
        let filter = config.filter();
        let root = config.library.clone();
        let scan_filter = filter.clone();
        let catalog = off_thread(move || Catalog::scan(&root, &scan_filter)).await?;

        let listener = TcpListener::bind(config.listen_addr()).await?;
        let addr = listener.local_addr()?;
        tracing::info!(
            %addr,
            library = %config.library.display(),
            files = catalog.len(),
            "listening for connections"
        );
        logger.listening(addr, &config.library, catalog.len());

        Ok(Self {
            listener,
            config,
            filter,
            catalog: Arc::new(catalog),
            workers: JoinSet::new(),
            logger,
            stats: SupervisorStats::default(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Current catalog snapshot.
    pub fn catalog(&self) -> Arc<Catalog> {
        Arc::clone(&self.catalog)
    }

    /// Accept loop. Returns after a shutdown request (or the admin channel
    /// closing) once every worker has finished.
    pub async fn run(mut self, mut admin: mpsc::Receiver<AdminCommand>) -> Result<SupervisorStats> {
        let wake_interval = self.config.wake_interval();
        let mut wakes_since_scan: u32 = 0;

        loop {
            if wakes_since_scan >= self.config.rescan_interval {
                self.rescan().await;
                wakes_since_scan = 0;
            }

            let wake = tokio::select! {
                accepted = self.listener.accept() => Wake::Accepted(accepted),
                cmd = admin.recv() => Wake::Admin(cmd),
                _ = tokio::time::sleep(wake_interval) => Wake::Tick,
            };

            match wake {
                Wake::Accepted(Ok((stream, peer))) => self.spawn_worker(stream, peer),
                Wake::Accepted(Err(e)) => {
                    tracing::warn!(error = %e, "accept failed");
                    self.logger.error("accept", &e.to_string());
                }
                Wake::Admin(Some(AdminCommand::Rescan)) => {
                    self.rescan().await;
                    wakes_since_scan = 0;
                }
                Wake::Admin(Some(AdminCommand::Shutdown)) | Wake::Admin(None) => break,
                Wake::Tick => {}
            }

            wakes_since_scan += 1;
            while let Some(done) = self.workers.try_join_next() {
                self.record(done);
            }
        }

        tracing::info!(active = self.workers.len(), "quitting server");
        while let Some(done) = self.workers.join_next().await {
            self.record(done);
        }
        self.logger.shutdown(self.stats.accepted);
        Ok(self.stats)
    }

    fn spawn_worker(&mut self, stream: TcpStream, peer: SocketAddr) {
        let _ = stream.set_nodelay(true);
        tracing::info!(%peer, "server got a connection");
        self.stats.accepted += 1;
        let handler = ConnectionHandler::new(
            stream,
            peer,
            Arc::clone(&self.catalog),
            &self.config,
            Arc::clone(&self.logger),
        );
        self.workers.spawn(handler.run());
    }

    fn record(&mut self, done: std::result::Result<Result<ConnectionSummary>, JoinError>) {
        match done {
            Ok(Ok(summary)) => tracing::debug!(?summary, "connection worker finished"),
            Ok(Err(e)) => {
                self.stats.failed_workers += 1;
                tracing::warn!(error = %e, "connection worker exited with error");
            }
            Err(e) if e.is_panic() => {
                self.stats.failed_workers += 1;
                tracing::error!("connection worker terminated abnormally");
                self.logger.error("worker", "terminated abnormally");
            }
            Err(e) => tracing::warn!(error = %e, "connection worker cancelled"),
        }
    }

    // A failed rescan keeps serving the previous catalog.
    async fn rescan(&mut self) {
        // Workers keep their snapshot; the rebuilt copy replaces the Arc.
        let mut next = Catalog::clone(&self.catalog);
        let filter = self.filter.clone();
        let rebuilt = off_thread(move || {
            next.rebuild(&filter)?;
            Ok(next)
        })
        .await;
        match rebuilt {
            Ok(catalog) => {
                tracing::debug!(files = catalog.len(), "library rescanned");
                self.logger.rescan(catalog.len());
                self.catalog = Arc::new(catalog);
                self.stats.rescans += 1;
            }
            Err(e) => {
                tracing::warn!(error = %e, "library rescan failed, keeping previous catalog");
                self.logger.error("rescan", &e.to_string());
                self.stats.failed_rescans += 1;
            }
        }
    }
}

// Directory walks run on the blocking pool.
async fn off_thread<F>(walk: F) -> Result<Catalog>
where
    F: FnOnce() -> Result<Catalog> + Send + 'static,
{
    tokio::task::spawn_blocking(walk)
        .await
        .map_err(|e| Error::Io(io::Error::new(io::ErrorKind::Other, e)))?
}

/// Bind and run a supervisor until `admin` asks it to stop.
pub async fn serve(
    config: ServerConfig,
    logger: Arc<dyn Logger>,
    admin: mpsc::Receiver<AdminCommand>,
) -> Result<SupervisorStats> {
    Supervisor::bind(config, logger).await?.run(admin).await
}
