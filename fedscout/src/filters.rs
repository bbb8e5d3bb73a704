/// Path gating helpers used by the router before any content is read.
///
/// These are free functions rather than a trait: every gate is a pure
/// predicate over a path (and sometimes its root), which keeps the router's
/// first-match-wins ordering easy to read.
use glob::Pattern;
use std::path::Path;

/// Prefix office suites use for owner/lock files (e.g. `~$report.docx`)
pub const OFFICE_LOCK_PREFIX: &str = "~$";

/// Checks if a file passes the extension allow-list
pub fn has_valid_extension(path: &Path, extensions: &Option<Vec<String>>) -> bool {
    match extensions {
        None => true,
        Some(exts) => {
            if let Some(ext) = path.extension() {
                if let Some(ext_str) = ext.to_str() {
                    return exts.iter().any(|e| e.eq_ignore_ascii_case(ext_str));
                }
            }
            false
        }
    }
}

/// Checks if a file's extension is on the deny-list
pub fn has_denied_extension(path: &Path, denied: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| denied.iter().any(|d| d.eq_ignore_ascii_case(ext)))
}

/// Checks if a file should be ignored based on glob ignore patterns
pub fn should_ignore(path: &Path, ignore_patterns: &[String]) -> bool {
    let path_str = path.to_string_lossy();
    let normalized_path = path_str.replace('\\', "/");

    ignore_patterns.iter().any(|pattern| match Pattern::new(pattern) {
        Ok(p) => p.matches(&normalized_path),
        Err(_) => false,
    })
}

/// True when any component of `path` below `root` starts with a dot
pub fn is_hidden(path: &Path, root: &Path) -> bool {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative.components().any(|c| {
        let name = c.as_os_str().to_string_lossy();
        name.starts_with('.') && name != "." && name != ".."
    })
}

/// True for office owner/lock files
pub fn is_office_lock_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with(OFFICE_LOCK_PREFIX))
}

/// Combined allow/deny gate
pub fn is_blacklisted(
    path: &Path,
    extensions: &Option<Vec<String>>,
    denied: &[String],
    ignore_patterns: &[String],
) -> bool {
    !has_valid_extension(path, extensions)
        || has_denied_extension(path, denied)
        || should_ignore(path, ignore_patterns)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_valid_extension() {
        let path = Path::new("notes.txt");
        let extensions = Some(vec!["txt".to_string()]);
        assert!(has_valid_extension(path, &extensions));

        let path = Path::new("chat.json");
        assert!(!has_valid_extension(path, &extensions));

        let path = Path::new("notes.TXT"); // Test case insensitivity
        assert!(has_valid_extension(path, &extensions));

        let path = Path::new("README"); // No extension
        assert!(!has_valid_extension(path, &extensions));

        let path = Path::new("notes.txt");
        assert!(has_valid_extension(path, &None));
    }

    #[test]
    fn test_has_denied_extension() {
        let denied = vec!["exe".to_string(), "zip".to_string()];
        assert!(has_denied_extension(Path::new("setup.EXE"), &denied));
        assert!(has_denied_extension(Path::new("a/b/archive.zip"), &denied));
        assert!(!has_denied_extension(Path::new("notes.txt"), &denied));
        assert!(!has_denied_extension(Path::new("Makefile"), &denied));
    }

    #[test]
    fn test_should_ignore() {
        let ignore_patterns = vec![
            "**/test_[0-4].txt".to_string(),
            "target/**/*.rs".to_string(),
            "**/*.tmp".to_string(),
        ];

        assert!(should_ignore(Path::new("test_0.txt"), &ignore_patterns));
        assert!(should_ignore(Path::new("dir/test_2.txt"), &ignore_patterns));
        assert!(should_ignore(
            Path::new("target/debug/main.rs"),
            &ignore_patterns
        ));
        assert!(should_ignore(Path::new("src/temp.tmp"), &ignore_patterns));

        assert!(!should_ignore(Path::new("test_5.txt"), &ignore_patterns));
        assert!(!should_ignore(Path::new("src/main.rs"), &ignore_patterns));
    }

    #[test]
    fn test_is_hidden() {
        let root = Path::new("/data");
        assert!(is_hidden(Path::new("/data/.secret/a.txt"), root));
        assert!(is_hidden(Path::new("/data/dir/.env"), root));
        assert!(!is_hidden(Path::new("/data/dir/a.txt"), root));
        // Only components below the root count
        assert!(!is_hidden(
            Path::new("/home/u/.config/x/a.txt"),
            Path::new("/home/u/.config")
        ));
        assert!(!is_hidden(Path::new("./notes.txt"), Path::new(".")));
    }

    #[test]
    fn test_office_lock_files() {
        assert!(is_office_lock_file(Path::new("docs/~$report.docx")));
        assert!(!is_office_lock_file(Path::new("docs/report.docx")));
    }

    #[test]
    fn test_is_blacklisted() {
        let allow = Some(vec!["txt".to_string(), "exe".to_string()]);
        let denied = vec!["exe".to_string()];
        let ignore = vec!["**/skip/**".to_string()];

        assert!(!is_blacklisted(Path::new("a.txt"), &allow, &denied, &ignore));
        assert!(is_blacklisted(Path::new("a.exe"), &allow, &denied, &ignore));
        assert!(is_blacklisted(Path::new("a.md"), &allow, &denied, &ignore));
        assert!(is_blacklisted(
            Path::new("x/skip/a.txt"),
            &allow,
            &denied,
            &ignore
        ));
    }
}
