//! Raw-byte prefilter for the chat lane.
//!
//! Chat files are expensive to dispatch because every one of them goes
//! through the normalizer hook. The prefilter tests the undecoded bytes
//! against the pattern first and drops files that cannot contain a hit.
//! Content that the export escapes (HTML entities, JSON `\u` sequences) can
//! only be found after normalization, so the pass is opt-in.

use memmap2::Mmap;
use rayon::prelude::*;
use regex::bytes::{Regex, RegexBuilder};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::SearchConfig;
use crate::errors::{SearchError, SearchResult};
use crate::metrics::{SearchMetrics, MMAP_THRESHOLD};
use crate::router::RoutedFile;

#[derive(Debug, Clone)]
pub struct Prefilter {
    regex: Regex,
    metrics: SearchMetrics,
}

impl Prefilter {
    /// Compiles the pattern with the same literal and case semantics the
    /// engine receives
    pub fn new(config: &SearchConfig, metrics: SearchMetrics) -> SearchResult<Self> {
        let pattern = if config.literal {
            regex::escape(&config.pattern)
        } else {
            config.pattern.clone()
        };
        let regex = RegexBuilder::new(&pattern)
            .case_insensitive(config.case_insensitive)
            .build()
            .map_err(|e| SearchError::invalid_pattern(e.to_string()))?;
        Ok(Self { regex, metrics })
    }

    /// Whether the raw bytes of `path` contain the pattern. Unreadable files
    /// are kept so the engine reports them.
    pub fn may_match(&self, path: &Path) -> bool {
        match self.scan(path) {
            Ok(hit) => hit,
            Err(e) => {
                debug!("Prefilter cannot read {}: {}", path.display(), e);
                true
            }
        }
    }

    fn scan(&self, path: &Path) -> io::Result<bool> {
        let size = fs::metadata(path)?.len();
        self.metrics.record_scan(size);

        if size >= MMAP_THRESHOLD {
            let file = File::open(path)?;
            let mmap = unsafe { Mmap::map(&file) }?;
            Ok(self.regex.is_match(&mmap))
        } else {
            let bytes = fs::read(path)?;
            Ok(self.regex.is_match(&bytes))
        }
    }

    /// Drops files without a raw hit, returning the dropped paths
    pub fn retain(&self, files: &mut Vec<RoutedFile>) -> Vec<PathBuf> {
        let keep: Vec<bool> = files.par_iter().map(|f| self.may_match(&f.path)).collect();

        let mut dropped = Vec::new();
        let mut kept = Vec::with_capacity(files.len());
        for (file, keep) in files.drain(..).zip(keep) {
            if keep {
                kept.push(file);
            } else {
                dropped.push(file.path);
            }
        }
        *files = kept;

        info!(
            "Prefilter kept {} chat files, dropped {}",
            files.len(),
            dropped.len()
        );
        dropped
    }
}

/// Builds a prefilter when the run asks for one. A pattern the prefilter
/// cannot compile leaves the lane untouched.
pub fn for_config(config: &SearchConfig, metrics: &SearchMetrics) -> Option<Prefilter> {
    if !config.chat || !config.chat_prefilter {
        return None;
    }
    match Prefilter::new(config, metrics.clone()) {
        Ok(prefilter) => Some(prefilter),
        Err(e) => {
            warn!("Prefilter disabled: {}", e);
            None
        }
    }
}
