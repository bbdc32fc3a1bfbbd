//! Server-side catalog of audio files and the list wire format
//!
//! The catalog is an ordered, zero-based index of paths relative to the
//! library root. It is replaced wholesale by every scan; indices carry no
//! meaning across rescans.

use crate::codec::FrameCodec;
use crate::error::{Error, Result};
use crate::protocol::{END_OF_MESSAGE, LIST_SEPARATOR, SUPPORTED_FILE_EXTS};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use walkdir::WalkDir;

/// Which files a scan picks up
#[derive(Debug, Clone)]
pub struct ExtensionFilter {
    extensions: Vec<String>,
}

impl Default for ExtensionFilter {
    fn default() -> Self {
        Self::new(SUPPORTED_FILE_EXTS.iter().copied())
    }
}

impl ExtensionFilter {
    pub fn new<I, T>(extensions: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        Self {
            extensions: extensions
                .into_iter()
                .map(|e| e.as_ref().trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        }
    }

    fn accepts(&self, path: &Path) -> bool {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) => self.extensions.iter().any(|s| s.eq_ignore_ascii_case(ext)),
            None => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Catalog {
    root: PathBuf,
    files: Vec<String>,
}

impl Catalog {
    /// Walk `root` depth-first and index every supported regular file.
    pub fn scan(root: &Path, filter: &ExtensionFilter) -> Result<Self> {
        Ok(Self {
            root: root.to_path_buf(),
            files: scan_entries(root, filter)?,
        })
    }

    /// Build a catalog from an already-ordered list of relative paths.
    pub fn from_entries(root: impl Into<PathBuf>, files: Vec<String>) -> Self {
        Self {
            root: root.into(),
            files,
        }
    }

    /// Rescan in place. On failure the current entries are left untouched.
    pub fn rebuild(&mut self, filter: &ExtensionFilter) -> Result<()> {
        let fresh = scan_entries(&self.root, filter)?;
        self.files = fresh;
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn entries(&self) -> &[String] {
        &self.files
    }

    pub fn path_for(&self, index: u32) -> Result<&str> {
        self.files
            .get(index as usize)
            .map(String::as_str)
            .ok_or(Error::Index {
                index,
                len: self.files.len(),
            })
    }

    /// Absolute location of the file at `index`.
    pub fn resolve(&self, index: u32) -> Result<PathBuf> {
        Ok(self.root.join(self.path_for(index)?))
    }

    /// Wire form of the whole catalog, highest index first.
    pub fn encode_list(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for (index, path) in self.files.iter().enumerate().rev() {
            out.extend_from_slice(encode_entry(index, path).as_bytes());
            out.extend_from_slice(END_OF_MESSAGE);
        }
        out
    }
}

fn scan_entries(root: &Path, filter: &ExtensionFilter) -> Result<Vec<String>> {
    // Only an unreadable root aborts the scan.
    std::fs::read_dir(root).map_err(|source| Error::Scan {
        path: root.to_path_buf(),
        source,
    })?;

    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(false).min_depth(1) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable library entry");
                continue;
            }
        };
        if !entry.file_type().is_file() || !filter.accepts(entry.path()) {
            continue;
        }
        match relative_name(root, entry.path()) {
            Some(rel) => {
                tracing::trace!(file = %rel, "found library file");
                files.push(rel);
            }
            None => tracing::warn!(path = %entry.path().display(), "skipping unnamed library file"),
        }
    }
    Ok(files)
}

// Relative path with '/' separators regardless of platform.
fn relative_name(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for comp in rel.components() {
        match comp {
            Component::Normal(s) => parts.push(s.to_string_lossy().into_owned()),
            _ => return None,
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// `<index>:<relative path>` without the line terminator.
pub fn encode_entry(index: usize, path: &str) -> String {
    format!("{index}{LIST_SEPARATOR}{path}")
}

/// Split a list line into its index and path. The path may itself contain
/// the separator; only the first one delimits the index.
pub fn parse_entry(line: &str) -> Result<(u32, String)> {
    let (idx, path) = line
        .split_once(LIST_SEPARATOR)
        .ok_or_else(|| Error::Protocol(format!("malformed list entry {line:?}")))?;
    let index = idx
        .trim()
        .parse::<u32>()
        .map_err(|_| Error::Protocol(format!("bad index in list entry {line:?}")))?;
    Ok((index, path.to_string()))
}

/// Read a list response. The first entry's index gives the catalog size;
/// entries arrive highest index first and are placed by arrival order.
///
/// With `first_entry_wait` set, a server that sends nothing within that
/// window is taken to have an empty catalog.
pub async fn decode_list<S>(
    codec: &mut FrameCodec<S>,
    first_entry_wait: Option<Duration>,
) -> Result<Vec<String>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let first = match first_entry_wait {
        Some(wait) => match tokio::time::timeout(wait, codec.next_line()).await {
            Ok(line) => line?,
            Err(_) => {
                tracing::debug!(?wait, "no list entries arrived, catalog is empty");
                None
            }
        },
        None => codec.next_line().await?,
    };
    let Some(first) = first else {
        return Ok(Vec::new());
    };

    // The count comes off the wire, so entries are collected as they
    // arrive rather than preallocated.
    let (top, path) = parse_entry(&first)?;
    let count = u64::from(top) + 1;
    let mut files = vec![path];

    while (files.len() as u64) < count {
        let received = files.len();
        let line = codec.next_line().await?.ok_or_else(|| {
            Error::Protocol(format!("list ended after {received} of {count} entries"))
        })?;
        let (index, path) = parse_entry(&line)?;
        let position = count - 1 - received as u64;
        if u64::from(index) != position {
            tracing::warn!(index, position, "list entry out of order, placing by position");
        }
        files.push(path);
    }
    files.reverse();
    Ok(files)
}
