use anyhow::Result;
use chrono::Utc;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Mutex;

/// Server activity log. Every hook defaults to doing nothing.
pub trait Logger: Send + Sync {
    fn listening(&self, _addr: SocketAddr, _library: &Path, _files: usize) {}
    fn connect(&self, _peer: SocketAddr) {}
    fn list(&self, _peer: SocketAddr, _entries: usize) {}
    fn stream(&self, _peer: SocketAddr, _index: u32, _path: &Path, _bytes: u64) {}
    fn reject(&self, _peer: SocketAddr, _index: u32, _len: usize) {}
    fn disconnect(&self, _peer: SocketAddr) {}
    fn error(&self, _context: &str, _msg: &str) {}
    fn rescan(&self, _files: usize) {}
    fn shutdown(&self, _connections: u64) {}
}

pub struct NoopLogger;
impl Logger for NoopLogger {}

pub struct TextLogger {
    file: Mutex<File>,
}

impl TextLogger {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let f = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(f),
        })
    }

    fn line(&self, s: &str) {
        if let Ok(mut f) = self.file.lock() {
            let _ = writeln!(f, "[{}] {}", Utc::now().to_rfc3339(), s);
        }
    }
}

impl Logger for TextLogger {
    fn listening(&self, addr: SocketAddr, library: &Path, files: usize) {
        self.line(&format!(
            "LISTEN addr={} library={} files={}",
            addr,
            library.display(),
            files
        ));
    }
    fn connect(&self, peer: SocketAddr) {
        self.line(&format!("CONNECT peer={peer}"));
    }
    fn list(&self, peer: SocketAddr, entries: usize) {
        self.line(&format!("LIST peer={peer} entries={entries}"));
    }
    fn stream(&self, peer: SocketAddr, index: u32, path: &Path, bytes: u64) {
        self.line(&format!(
            "STREAM peer={} index={} path={} bytes={}",
            peer,
            index,
            path.display(),
            bytes
        ));
    }
    fn reject(&self, peer: SocketAddr, index: u32, len: usize) {
        self.line(&format!("REJECT peer={peer} index={index} catalog={len}"));
    }
    fn disconnect(&self, peer: SocketAddr) {
        self.line(&format!("DISCONNECT peer={peer}"));
    }
    fn error(&self, context: &str, msg: &str) {
        self.line(&format!("ERROR ctx={context} msg={msg}"));
    }
    fn rescan(&self, files: usize) {
        self.line(&format!("RESCAN files={files}"));
    }
    fn shutdown(&self, connections: u64) {
        self.line(&format!("SHUTDOWN connections={connections}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_logger_appends_timestamped_events() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("logs/server.log");
        let logger = TextLogger::new(&path).unwrap();
        let peer: SocketAddr = "127.0.0.1:5000".parse().unwrap();
        logger.connect(peer);
        logger.stream(peer, 3, Path::new("/lib/a.wav"), 10);

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with('['));
        assert!(lines[0].ends_with("CONNECT peer=127.0.0.1:5000"));
        assert!(lines[1].ends_with("STREAM peer=127.0.0.1:5000 index=3 path=/lib/a.wav bytes=10"));
    }
}
