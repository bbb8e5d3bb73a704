use once_cell::unsync::OnceCell;
use serde_json::Value;
use std::borrow::Cow;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::errors::{SearchError, SearchResult};
use crate::walker::extension_of;

/// Size of the window parsers may sniff before committing to a full read
pub const SNIFF_BYTES: usize = 64 * 1024;

const UTF8_BOM: &[u8] = b"\xef\xbb\xbf";

/// A candidate chat file shared by every parser tried on it.
///
/// Only the first [`SNIFF_BYTES`] are read up front. The full contents and the
/// parsed JSON document are loaded lazily, at most once, and reused by every
/// parser that asks for them.
pub struct SourceFile {
    path: PathBuf,
    file_name: String,
    extension: String,
    prefix: Vec<u8>,
    complete: bool,
    bytes: OnceCell<Vec<u8>>,
    json: OnceCell<Option<Value>>,
}

impl SourceFile {
    pub fn open(path: &Path) -> SearchResult<Self> {
        let file = File::open(path).map_err(|e| SearchError::from_io(path, e))?;
        let mut prefix = Vec::with_capacity(SNIFF_BYTES.min(8192));
        file.take(SNIFF_BYTES as u64)
            .read_to_end(&mut prefix)
            .map_err(|e| SearchError::from_io(path, e))?;
        let complete = prefix.len() < SNIFF_BYTES;
        Ok(Self::build(path, prefix, complete))
    }

    /// Wraps contents that are already in memory
    pub fn from_bytes(path: &Path, bytes: Vec<u8>) -> Self {
        Self::build(path, bytes, true)
    }

    fn build(path: &Path, prefix: Vec<u8>, complete: bool) -> Self {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        Self {
            path: path.to_path_buf(),
            file_name,
            extension: extension_of(path),
            prefix,
            complete,
            bytes: OnceCell::new(),
            json: OnceCell::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lower-cased file name
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Lower-cased extension without the dot
    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// True when the sniff window holds the entire file
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn prefix(&self) -> &[u8] {
        strip_bom(&self.prefix)
    }

    pub fn prefix_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.prefix())
    }

    /// True when every needle occurs somewhere in the sniff window
    pub fn prefix_contains_all(&self, needles: &[&str]) -> bool {
        let text = self.prefix_text();
        needles.iter().all(|n| text.contains(n))
    }

    /// Full file contents, read on first use
    pub fn bytes(&self) -> SearchResult<&[u8]> {
        if self.complete {
            return Ok(self.prefix());
        }
        let bytes = self.bytes.get_or_try_init(|| {
            std::fs::read(&self.path).map_err(|e| SearchError::from_io(&self.path, e))
        })?;
        Ok(strip_bom(bytes))
    }

    pub fn text(&self) -> SearchResult<Cow<'_, str>> {
        Ok(String::from_utf8_lossy(self.bytes()?))
    }

    /// The whole file parsed as one JSON document, `None` if it is not JSON
    pub fn json(&self) -> Option<&Value> {
        self.json
            .get_or_init(|| {
                self.bytes()
                    .ok()
                    .and_then(|bytes| serde_json::from_slice(bytes).ok())
            })
            .as_ref()
    }
}

fn strip_bom(bytes: &[u8]) -> &[u8] {
    bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes)
}
