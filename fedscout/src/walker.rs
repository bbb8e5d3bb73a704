use ignore::WalkBuilder;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::errors::{SearchError, SearchResult};
use crate::filters;

/// One enumerated file. Immutable once produced; consumed once by the router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub path: PathBuf,
    /// Lower-cased extension without the dot, empty when there is none
    pub extension: String,
    pub is_hidden: bool,
    pub size_bytes: u64,
}

impl FileRecord {
    /// Builds a record from a path on disk, relative to the root it was found under
    pub fn from_path(path: &Path, root: &Path) -> SearchResult<Self> {
        let metadata = std::fs::metadata(path).map_err(|e| SearchError::from_io(path, e))?;
        Ok(Self {
            path: path.to_path_buf(),
            extension: extension_of(path),
            is_hidden: filters::is_hidden(path, root),
            size_bytes: metadata.len(),
        })
    }
}

pub(crate) fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default()
}

/// Enumerates every regular file under `roots`.
///
/// Hidden files are always enumerated (and flagged) so the router can count
/// them; only `.git` internals are pruned during the walk. Ignore files are
/// honored unless `no_ignore` is set.
pub fn enumerate(roots: &[PathBuf], no_ignore: bool) -> SearchResult<Vec<FileRecord>> {
    let mut records = Vec::new();

    for root in roots {
        if !root.exists() {
            return Err(SearchError::file_not_found(root));
        }

        if root.is_file() {
            let parent = root.parent().unwrap_or_else(|| Path::new(""));
            records.push(FileRecord::from_path(root, parent)?);
            continue;
        }

        let mut walker = WalkBuilder::new(root);
        walker
            .hidden(false)
            .ignore(!no_ignore)
            .git_ignore(!no_ignore)
            .git_global(!no_ignore)
            .git_exclude(!no_ignore)
            .parents(!no_ignore)
            .filter_entry(|entry| entry.file_name() != ".git");

        for entry in walker.build() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry under {}: {}", root.display(), e);
                    continue;
                }
            };
            if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                continue;
            }
            match FileRecord::from_path(entry.path(), root) {
                Ok(record) => records.push(record),
                Err(e) => warn!("Skipping {}: {}", entry.path().display(), e),
            }
        }
    }

    debug!("Enumerated {} files", records.len());
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_enumerate_flags_hidden_files() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "alpha").unwrap();
        fs::create_dir(dir.path().join(".hidden")).unwrap();
        fs::write(dir.path().join(".hidden/b.txt"), "beta").unwrap();
        fs::create_dir(dir.path().join(".git")).unwrap();
        fs::write(dir.path().join(".git/HEAD"), "ref").unwrap();

        let mut records = enumerate(&[dir.path().to_path_buf()], true).unwrap();
        records.sort_by(|a, b| a.path.cmp(&b.path));

        assert_eq!(records.len(), 2);
        let hidden: Vec<_> = records.iter().filter(|r| r.is_hidden).collect();
        assert_eq!(hidden.len(), 1);
        assert!(hidden[0].path.ends_with(".hidden/b.txt"));
        let visible = records.iter().find(|r| !r.is_hidden).unwrap();
        assert_eq!(visible.extension, "txt");
        assert_eq!(visible.size_bytes, 5);
    }

    #[test]
    fn test_enumerate_single_file_root() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("Report.PDF");
        fs::write(&file, "%PDF").unwrap();

        let records = enumerate(&[file.clone()], false).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].path, file);
        assert_eq!(records[0].extension, "pdf");
    }

    #[test]
    fn test_enumerate_missing_root() {
        let result = enumerate(&[PathBuf::from("/definitely/not/here")], false);
        assert!(matches!(result, Err(SearchError::FileNotFound(_))));
    }
}
