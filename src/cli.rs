//! Shared CLI definitions for the client and the daemon

use crate::config::{ClientConfig, ConfigFile, PlayerConfig, ServerConfig};
use crate::error::Result;
use clap::{ArgAction, Parser};
use std::path::PathBuf;

/// Catalog server options (audiostreamd)
#[derive(Clone, Debug, Parser)]
#[command(author, version, about = "Serve a directory of audio files to audiostream clients")]
pub struct ServerOpts {
    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Directory containing the library
    #[arg(short, long)]
    pub library: Option<PathBuf>,

    /// Interface to bind (default 0.0.0.0)
    #[arg(long)]
    pub bind: Option<String>,

    /// TOML configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Append activity events to this file
    #[arg(long = "log-file")]
    pub log_file: Option<PathBuf>,

    /// More diagnostics (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

impl ServerOpts {
    /// Config file values with command-line flags applied on top.
    pub fn resolve(&self) -> Result<ServerConfig> {
        let mut cfg = match &self.config {
            Some(path) => ConfigFile::load(path)?.server,
            None => ServerConfig::default(),
        };
        if let Some(port) = self.port {
            cfg.port = port;
        }
        if let Some(library) = &self.library {
            cfg.library = library.clone();
        }
        if let Some(bind) = &self.bind {
            cfg.bind = bind.clone();
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

/// Interactive client options (audiostream)
#[derive(Clone, Debug, Parser)]
#[command(author, version, about = "Browse, save and play audio files from an audiostream server")]
pub struct ClientOpts {
    /// Server network address
    #[arg(short = 'a', long = "address")]
    pub address: Option<String>,

    /// Server port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Local directory where fetched files are saved
    #[arg(short, long)]
    pub library: Option<PathBuf>,

    /// Playback command reading audio on stdin, e.g. "mpv --no-video -"
    #[arg(long)]
    pub player: Option<String>,

    /// TOML configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Hide the transfer progress bar
    #[arg(long = "no-progress")]
    pub no_progress: bool,

    /// More diagnostics (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

impl ClientOpts {
    pub fn resolve(&self) -> Result<ClientConfig> {
        let mut cfg = match &self.config {
            Some(path) => ConfigFile::load(path)?.client,
            None => ClientConfig::default(),
        };
        if let Some(address) = &self.address {
            cfg.address = address.clone();
        }
        if let Some(port) = self.port {
            cfg.port = port;
        }
        if let Some(library) = &self.library {
            cfg.library = library.clone();
        }
        if let Some(player) = &self.player {
            cfg.player = PlayerConfig::from_command_line(player)?;
        }
        if self.no_progress {
            cfg.progress = false;
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

/// Default `tracing` filter for a `-v` count, overridden by RUST_LOG.
pub fn log_filter(verbose: u8) -> String {
    std::env::var("RUST_LOG").unwrap_or_else(|_| {
        match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
        .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_flags_override_defaults() {
        let opts = ServerOpts::parse_from(["audiostreamd", "-p", "4100", "-l", "/srv/music"]);
        let cfg = opts.resolve().unwrap();
        assert_eq!(cfg.port, 4100);
        assert_eq!(cfg.library, PathBuf::from("/srv/music"));
        assert_eq!(cfg.listen_addr(), "0.0.0.0:4100");
    }

    #[test]
    fn client_flags_override_config_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("as.toml");
        std::fs::write(&path, "[client]\naddress = \"media.lan\"\nport = 9000\n").unwrap();
        let opts = ClientOpts::parse_from([
            "audiostream",
            "--config",
            path.to_str().unwrap(),
            "-p",
            "9001",
            "--player",
            "aplay -q",
            "--no-progress",
        ]);
        let cfg = opts.resolve().unwrap();
        assert_eq!(cfg.address, "media.lan");
        assert_eq!(cfg.port, 9001);
        assert_eq!(cfg.player.program, "aplay");
        assert!(!cfg.progress);
    }

    #[test]
    fn help_is_available() {
        let err = ClientOpts::try_parse_from(["audiostream", "-h"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }
}
