//! Error types shared by the server and client halves

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the library
#[derive(Error, Debug)]
pub enum Error {
    #[error("catalog scan of {} failed: {source}", .path.display())]
    Scan {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("file index {index} is outside the catalog (0..{len})")]
    Index { index: u32, len: usize },

    #[error("transfer failed: {0}")]
    Transfer(#[from] TransferError),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures that end a whole transfer session
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("source closed after {consumed} of {expected} bytes")]
    PrematureEof { consumed: u64, expected: u64 },

    #[error("source read failed: {0}")]
    Source(#[source] std::io::Error),

    #[error("relay needs at least one sink")]
    NoSinks,
}

/// One sink stopped accepting bytes. The session continues for the others.
#[derive(Error, Debug, Clone)]
#[error("sink `{sink}` closed after {delivered} bytes: {reason}")]
pub struct SinkError {
    pub sink: String,
    pub delivered: u64,
    pub reason: String,
}

/// The line reservoir filled up without a terminator and was partially
/// discarded to keep scanning.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("receive buffer filled ({capacity} bytes) without a line terminator, discarded {discarded} bytes")]
pub struct FramingAnomaly {
    pub capacity: usize,
    pub discarded: usize,
}

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;
