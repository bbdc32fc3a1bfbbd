//! Shared protocol constants for the audiostream line/binary transport

// Request tokens (client -> server), each terminated by END_OF_MESSAGE
pub const REQUEST_LIST: &str = "LIST";
pub const REQUEST_STREAM: &str = "STREAM";

// Network newline terminating every line message
pub const END_OF_MESSAGE: &[u8; 2] = b"\r\n";

// Separator between index and relative path in a list entry
pub const LIST_SEPARATOR: char = ':';

// Width of every binary field on the wire (big-endian u32)
pub const BINARY_FIELD_LEN: usize = 4;

pub const DEFAULT_PORT: u16 = 2209;

// Server writes file bodies in chunks of at most this many bytes
pub const STREAM_CHUNK_SIZE: usize = 1024;

// Client pulls at most this many bytes from the socket per read
pub const CLIENT_READ_CHUNK: usize = 1024;

// Line framing reservoir. When it fills without a terminator the oldest
// BUFFER_BLEED_OFF bytes are discarded.
pub const RECEIVE_BUFFER_SIZE: usize = 4096;
pub const BUFFER_BLEED_OFF: usize = 1024;

// Audio file extensions the server catalogs (compared case-insensitively)
pub const SUPPORTED_FILE_EXTS: &[&str] = &["wav", "mp3", "flac", "ogg"];

pub const DEFAULT_SERVER_LIBRARY: &str = "library";
pub const DEFAULT_CLIENT_LIBRARY: &str = "saved";

// External playback process fed through its stdin
pub const AUDIO_PLAYER: &str = "ffplay";
pub const AUDIO_PLAYER_ARGS: &[&str] = &["-nodisp", "-autoexit", "-loglevel", "quiet", "-"];

// Supervisor and client timing
pub mod timeouts {
    // Bounded readiness wait of the supervisor loop (ms)
    pub const WAKE_INTERVAL_MS: u64 = 1000;

    // Supervisor wake-ups between catalog rescans
    pub const LIBRARY_SCAN_INTERVAL: u32 = 30;

    // How long the client waits for the first list entry before
    // concluding the server catalog is empty (ms)
    pub const EMPTY_LIST_GRACE_MS: u64 = 1500;
}

/// Encode a binary field in network byte order.
#[inline]
pub fn encode_u32(value: u32) -> [u8; BINARY_FIELD_LEN] {
    value.to_be_bytes()
}

/// Decode a binary field from network byte order.
#[inline]
pub fn decode_u32(raw: [u8; BINARY_FIELD_LEN]) -> u32 {
    u32::from_be_bytes(raw)
}

/// A request recognised by the server on its command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    List,
    Stream,
}

impl Command {
    /// Map a decoded command line (terminator already stripped) to a request.
    pub fn parse(line: &str) -> Option<Self> {
        match line {
            REQUEST_LIST => Some(Command::List),
            REQUEST_STREAM => Some(Command::Stream),
            _ => None,
        }
    }
}
