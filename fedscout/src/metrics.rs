use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use crate::chat::ChatFormat;

/// Files at or above this size are memory mapped by the prefilter
pub const MMAP_THRESHOLD: u64 = 10 * 1024 * 1024;

/// Counters shared by the normalizer and the prefilter. Cloning shares the
/// underlying counters.
#[derive(Debug, Clone)]
pub struct SearchMetrics {
    // Chat cache
    cache_hits: Arc<AtomicU64>,
    cache_misses: Arc<AtomicU64>,

    // Normalization
    files_parsed: Arc<AtomicU64>,
    raw_fallbacks: Arc<AtomicU64>,
    messages_emitted: Arc<AtomicU64>,

    // Prefilter reads
    buffered_files: Arc<AtomicU64>,
    mmap_files: Arc<AtomicU64>,
    bytes_scanned: Arc<AtomicU64>,
}

impl SearchMetrics {
    pub fn new() -> Self {
        Self {
            cache_hits: Arc::new(AtomicU64::new(0)),
            cache_misses: Arc::new(AtomicU64::new(0)),
            files_parsed: Arc::new(AtomicU64::new(0)),
            raw_fallbacks: Arc::new(AtomicU64::new(0)),
            messages_emitted: Arc::new(AtomicU64::new(0)),
            buffered_files: Arc::new(AtomicU64::new(0)),
            mmap_files: Arc::new(AtomicU64::new(0)),
            bytes_scanned: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Records a chat cache lookup
    pub fn record_cache_lookup(&self, hit: bool) {
        if hit {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.cache_misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Records one file run through the chat parsers
    pub fn record_parse(&self, format: ChatFormat, messages: usize) {
        self.files_parsed.fetch_add(1, Ordering::Relaxed);
        if format == ChatFormat::Raw {
            self.raw_fallbacks.fetch_add(1, Ordering::Relaxed);
        }
        let total = self
            .messages_emitted
            .fetch_add(messages as u64, Ordering::Relaxed)
            + messages as u64;
        debug!("Parsed {} messages as {}, total: {}", messages, format, total);
    }

    /// Records one prefilter read
    pub fn record_scan(&self, bytes: u64) {
        if bytes >= MMAP_THRESHOLD {
            self.mmap_files.fetch_add(1, Ordering::Relaxed);
        } else {
            self.buffered_files.fetch_add(1, Ordering::Relaxed);
        }
        self.bytes_scanned.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn get_stats(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            files_parsed: self.files_parsed.load(Ordering::Relaxed),
            raw_fallbacks: self.raw_fallbacks.load(Ordering::Relaxed),
            messages_emitted: self.messages_emitted.load(Ordering::Relaxed),
            buffered_files: self.buffered_files.load(Ordering::Relaxed),
            mmap_files: self.mmap_files.load(Ordering::Relaxed),
            bytes_scanned: self.bytes_scanned.load(Ordering::Relaxed),
        }
    }

    pub fn log_stats(&self) {
        let stats = self.get_stats();
        info!(
            "Normalization stats:\n\
             Cache hits/misses: {}/{}\n\
             Files parsed (raw fallbacks): {} ({})\n\
             Messages emitted: {}\n\
             Prefilter reads (buffered/mmap): {}/{}, {} bytes",
            stats.cache_hits,
            stats.cache_misses,
            stats.files_parsed,
            stats.raw_fallbacks,
            stats.messages_emitted,
            stats.buffered_files,
            stats.mmap_files,
            stats.bytes_scanned
        );
    }
}

impl Default for SearchMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub files_parsed: u64,
    pub raw_fallbacks: u64,
    pub messages_emitted: u64,
    pub buffered_files: u64,
    pub mmap_files: u64,
    pub bytes_scanned: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_metrics() {
        let metrics = SearchMetrics::new();
        metrics.record_cache_lookup(false);
        metrics.record_cache_lookup(true);
        metrics.record_cache_lookup(true);
        let stats = metrics.get_stats();
        assert_eq!(stats.cache_hits, 2);
        assert_eq!(stats.cache_misses, 1);
    }

    #[test]
    fn test_parse_metrics() {
        let metrics = SearchMetrics::new();
        metrics.record_parse(ChatFormat::WhatsApp, 10);
        metrics.record_parse(ChatFormat::Raw, 3);
        let stats = metrics.get_stats();
        assert_eq!(stats.files_parsed, 2);
        assert_eq!(stats.raw_fallbacks, 1);
        assert_eq!(stats.messages_emitted, 13);
    }

    #[test]
    fn test_scan_metrics_are_shared_by_clones() {
        let metrics = SearchMetrics::new();
        let clone = metrics.clone();
        clone.record_scan(1000);
        clone.record_scan(20_000_000);
        let stats = metrics.get_stats();
        assert_eq!(stats.buffered_files, 1);
        assert_eq!(stats.mmap_files, 1);
        assert_eq!(stats.bytes_scanned, 20_001_000);
    }
}
