//! Numbered continuation files.
//!
//! Large exports are split into numbered pieces (`message_1.html`,
//! `message_2.html`, ... or `messages.html`, `messages2.html`, ...). When a
//! chat window runs past the end of one piece, the formatter continues into
//! the next one.

use std::path::{Path, PathBuf};

/// Name the next piece would have. A stem ending in digits is incremented
/// (keeping zero padding), any other stem gets a `2` appended.
pub fn candidate(path: &Path) -> Option<PathBuf> {
    let stem = path.file_stem()?.to_str()?;
    let digits = stem
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .count();
    let (base, number) = stem.split_at(stem.len() - digits);

    let next_stem = if number.is_empty() {
        format!("{base}2")
    } else {
        let next = number.parse::<u64>().ok()?.checked_add(1)?;
        format!("{base}{next:0width$}", width = number.len())
    };

    let name = match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{next_stem}.{ext}"),
        None => next_stem,
    };
    Some(path.with_file_name(name))
}

/// The next piece of `path` when it exists on disk
pub fn next_sibling(path: &Path) -> Option<PathBuf> {
    candidate(path).filter(|next| next.is_file())
}
