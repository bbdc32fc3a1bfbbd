//! Tunables for both binaries, loadable from a TOML file
//!
//! ```toml
//! [server]
//! port = 2209
//! library = "library"
//! chunk_size = 1024
//!
//! [client]
//! address = "localhost"
//! player = { program = "ffplay", args = ["-nodisp", "-autoexit", "-"] }
//! ```
//!
//! Every field is optional; command-line flags override file values.

use crate::catalog::ExtensionFilter;
use crate::error::{Error, Result};
use crate::protocol::{self, timeouts};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    pub server: ServerConfig,
    pub client: ClientConfig,
}

impl ConfigFile {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Interface to listen on
    pub bind: String,
    pub port: u16,
    /// Catalog root directory
    pub library: PathBuf,
    /// Largest single read/write while streaming a file
    pub chunk_size: usize,
    /// Bounded wait of the accept loop (ms)
    pub wake_interval_ms: u64,
    /// Wake-ups between catalog rescans
    pub rescan_interval: u32,
    pub extensions: Vec<String>,
    pub receive_buffer: usize,
    pub bleed_off: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: protocol::DEFAULT_PORT,
            library: PathBuf::from(protocol::DEFAULT_SERVER_LIBRARY),
            chunk_size: protocol::STREAM_CHUNK_SIZE,
            wake_interval_ms: timeouts::WAKE_INTERVAL_MS,
            rescan_interval: timeouts::LIBRARY_SCAN_INTERVAL,
            extensions: protocol::SUPPORTED_FILE_EXTS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            receive_buffer: protocol::RECEIVE_BUFFER_SIZE,
            bleed_off: protocol::BUFFER_BLEED_OFF,
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::Config("chunk_size must be positive".into()));
        }
        if self.rescan_interval == 0 {
            return Err(Error::Config("rescan_interval must be positive".into()));
        }
        if self.wake_interval_ms == 0 {
            return Err(Error::Config("wake_interval_ms must be positive".into()));
        }
        if self.extensions.is_empty() {
            return Err(Error::Config("at least one file extension is required".into()));
        }
        validate_buffer(self.receive_buffer, self.bleed_off)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wake_interval(&self) -> Duration {
        Duration::from_millis(self.wake_interval_ms)
    }

    pub fn filter(&self) -> ExtensionFilter {
        ExtensionFilter::new(&self.extensions)
    }
}

/// External player command. A `[client.player]` table replaces the default
/// command as a whole, so omitted `args` means no arguments.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlayerConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            program: protocol::AUDIO_PLAYER.into(),
            args: protocol::AUDIO_PLAYER_ARGS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl PlayerConfig {
    /// Parse a whitespace-separated command line such as `"mpv --no-video -"`.
    pub fn from_command_line(line: &str) -> Result<Self> {
        let mut words = line.split_whitespace().map(str::to_string);
        let program = words
            .next()
            .ok_or_else(|| Error::Config("player command is empty".into()))?;
        Ok(Self {
            program,
            args: words.collect(),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    pub address: String,
    pub port: u16,
    /// Where `get` and `stream+` save files
    pub library: PathBuf,
    pub read_chunk: usize,
    /// How long `list` waits for a first entry before assuming an empty catalog (ms)
    pub empty_list_grace_ms: u64,
    pub receive_buffer: usize,
    pub bleed_off: usize,
    pub player: PlayerConfig,
    pub progress: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: "localhost".into(),
            port: protocol::DEFAULT_PORT,
            library: PathBuf::from(protocol::DEFAULT_CLIENT_LIBRARY),
            read_chunk: protocol::CLIENT_READ_CHUNK,
            empty_list_grace_ms: timeouts::EMPTY_LIST_GRACE_MS,
            receive_buffer: protocol::RECEIVE_BUFFER_SIZE,
            bleed_off: protocol::BUFFER_BLEED_OFF,
            player: PlayerConfig::default(),
            progress: true,
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Result<()> {
        if self.read_chunk == 0 {
            return Err(Error::Config("read_chunk must be positive".into()));
        }
        if self.player.program.is_empty() {
            return Err(Error::Config("player program is empty".into()));
        }
        validate_buffer(self.receive_buffer, self.bleed_off)
    }

    pub fn empty_list_grace(&self) -> Duration {
        Duration::from_millis(self.empty_list_grace_ms)
    }
}

fn validate_buffer(capacity: usize, bleed: usize) -> Result<()> {
    if capacity < 2 {
        return Err(Error::Config("receive_buffer must hold at least a line terminator".into()));
    }
    if bleed == 0 || bleed > capacity {
        return Err(Error::Config(format!(
            "bleed_off must be in 1..={capacity}, got {bleed}"
        )));
    }
    Ok(())
}
