use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tempfile::NamedTempFile;
use tracing::{debug, trace};

use crate::errors::{unify_path, SearchError, SearchResult};

/// Bumped whenever the rendered canonical text changes shape
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampPolicy {
    Keep,
    Drop,
}

impl TimestampPolicy {
    pub fn from_keep(keep: bool) -> Self {
        if keep {
            Self::Keep
        } else {
            Self::Drop
        }
    }

    pub fn keeps(&self) -> bool {
        matches!(self, Self::Keep)
    }
}

/// Sidecar record deciding whether a cached rendering is still valid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheMetadata {
    pub format_version: u32,
    pub timestamp_policy: TimestampPolicy,
    pub mtime: SystemTime,
    pub size: u64,
}

impl CacheMetadata {
    /// Describes the current state of `path`
    pub fn current(path: &Path, policy: TimestampPolicy) -> SearchResult<Self> {
        let metadata = fs::metadata(path).map_err(|e| SearchError::from_io(path, e))?;
        Ok(Self {
            format_version: FORMAT_VERSION,
            timestamp_policy: policy,
            mtime: metadata.modified().map_err(SearchError::IoError)?,
            size: metadata.len(),
        })
    }
}

/// Directory of rendered chat files.
///
/// Entries are never deleted: a stale entry is simply not used and is
/// overwritten by the next successful normalization of the same path.
#[derive(Debug, Clone)]
pub struct ChatCache {
    dir: PathBuf,
}

impl ChatCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// SHA-256 of the canonical path string, hex encoded
    pub fn key(path: &Path) -> String {
        let path = unify_path(path);
        format!("{:x}", Sha256::digest(path.to_string_lossy().as_bytes()))
    }

    fn data_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.chat"))
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    /// Returns the cached rendering when its sidecar matches `expected`
    pub fn lookup(&self, path: &Path, expected: &CacheMetadata) -> Option<String> {
        let key = Self::key(path);
        let stored: CacheMetadata = match fs::read(self.meta_path(&key))
            .ok()
            .and_then(|data| serde_json::from_slice(&data).ok())
        {
            Some(meta) => meta,
            None => {
                trace!("No cache entry for {}", path.display());
                return None;
            }
        };
        if &stored != expected {
            debug!("Stale cache entry for {}", path.display());
            return None;
        }
        fs::read_to_string(self.data_path(&key)).ok()
    }

    /// Writes the rendering to a temp file, renames it into place, then
    /// writes the sidecar the same way
    pub fn store(&self, path: &Path, metadata: &CacheMetadata, rendered: &str) -> SearchResult<()> {
        fs::create_dir_all(&self.dir).map_err(|e| SearchError::from_io(&self.dir, e))?;
        let key = Self::key(path);

        self.write_atomically(&self.data_path(&key), rendered.as_bytes())?;
        let sidecar =
            serde_json::to_vec(metadata).map_err(|e| SearchError::cache_error(e.to_string()))?;
        self.write_atomically(&self.meta_path(&key), &sidecar)?;

        debug!("Cached {} as {}", path.display(), key);
        Ok(())
    }

    fn write_atomically(&self, target: &Path, data: &[u8]) -> SearchResult<()> {
        let mut tmp = NamedTempFile::new_in(&self.dir).map_err(SearchError::IoError)?;
        tmp.write_all(data).map_err(SearchError::IoError)?;
        tmp.persist(target)
            .map_err(|e| SearchError::cache_error(format!("{}: {}", target.display(), e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_key_is_stable_hex() {
        let key = ChatCache::key(Path::new("/exports/chat.txt"));
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(key, ChatCache::key(Path::new("/exports/chat.txt")));
        assert_ne!(key, ChatCache::key(Path::new("/exports/chat2.txt")));
    }

    #[test]
    fn test_store_then_lookup() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("chat.txt");
        fs::write(&source, "1/2/23, 10:00 - A: hi").unwrap();
        let cache = ChatCache::new(dir.path().join("cache"));

        let meta = CacheMetadata::current(&source, TimestampPolicy::Keep).unwrap();
        assert!(cache.lookup(&source, &meta).is_none());

        cache.store(&source, &meta, "rendered\n").unwrap();
        assert_eq!(cache.lookup(&source, &meta).as_deref(), Some("rendered\n"));

        // A different timestamp policy never reuses the entry
        let dropped = CacheMetadata {
            timestamp_policy: TimestampPolicy::Drop,
            ..meta.clone()
        };
        assert!(cache.lookup(&source, &dropped).is_none());

        let grown = CacheMetadata {
            size: meta.size + 1,
            ..meta
        };
        assert!(cache.lookup(&source, &grown).is_none());
    }

    #[test]
    fn test_corrupt_sidecar_is_a_miss() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("chat.txt");
        fs::write(&source, "x").unwrap();
        let cache = ChatCache::new(dir.path());
        let meta = CacheMetadata::current(&source, TimestampPolicy::Keep).unwrap();
        cache.store(&source, &meta, "x\n").unwrap();

        let key = ChatCache::key(&source);
        fs::write(dir.path().join(format!("{key}.json")), "{broken").unwrap();
        assert!(cache.lookup(&source, &meta).is_none());
    }
}
