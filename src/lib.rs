//! audiostream: a small TCP audio library server and its client
//!
//! The server shares a directory of audio files; clients list the catalog,
//! download entries, or pipe them into a local player while they arrive.

pub mod catalog;
pub mod cli;
pub mod client;
pub mod codec;
pub mod config;
pub mod dest;
pub mod error;
pub mod logger;
pub mod player;
pub mod progress;
pub mod protocol;
pub mod relay;
pub mod server;
pub mod shell;

pub use error::{Error, Result};
