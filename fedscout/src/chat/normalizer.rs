use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::cache::{CacheMetadata, ChatCache, TimestampPolicy};
use super::{canonical, parse_file, ChatFormat, ChatMessage};
use crate::errors::{SearchError, SearchResult};
use crate::metrics::SearchMetrics;

/// Set on the chat hook's environment to switch the binary into preprocessor mode
pub const PREPROCESS_ENV: &str = "FEDSCOUT_PREPROCESS";
/// Value of [`PREPROCESS_ENV`] selecting chat normalization
pub const PREPROCESS_CHAT: &str = "chat";
/// `keep` or `drop`
pub const TIMESTAMPS_ENV: &str = "FEDSCOUT_CHAT_TIMESTAMPS";
/// Cache directory; absent disables caching
pub const CACHE_ENV: &str = "FEDSCOUT_CHAT_CACHE";

/// Serialization options. Detection is unaffected by them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizeOptions {
    pub keep_timestamps: bool,
    pub cache_dir: Option<PathBuf>,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            keep_timestamps: true,
            cache_dir: None,
        }
    }
}

impl NormalizeOptions {
    /// Environment handed to the chat hook process
    pub fn to_env(&self) -> Vec<(String, String)> {
        let mut env = vec![
            (PREPROCESS_ENV.to_string(), PREPROCESS_CHAT.to_string()),
            (
                TIMESTAMPS_ENV.to_string(),
                if self.keep_timestamps { "keep" } else { "drop" }.to_string(),
            ),
        ];
        if let Some(dir) = &self.cache_dir {
            env.push((CACHE_ENV.to_string(), dir.display().to_string()));
        }
        env
    }

    /// Reads options from a lookup function (normally `std::env::var`)
    pub fn from_env_with<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            keep_timestamps: lookup(TIMESTAMPS_ENV).map_or(true, |v| v != "drop"),
            cache_dir: lookup(CACHE_ENV)
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
        }
    }

    pub fn from_env() -> Self {
        Self::from_env_with(|key| std::env::var(key).ok())
    }
}

/// How a normalization request was served
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormalizeOutcome {
    /// The cached rendering was streamed; nothing was parsed
    CacheHit,
    Parsed { format: ChatFormat, messages: usize },
}

/// Turns chat files into canonical text, optionally through the cache
#[derive(Debug, Clone)]
pub struct ChatNormalizer {
    options: NormalizeOptions,
    cache: Option<ChatCache>,
    metrics: SearchMetrics,
}

impl ChatNormalizer {
    pub fn new(options: NormalizeOptions) -> Self {
        Self::with_metrics(options, SearchMetrics::new())
    }

    pub fn with_metrics(options: NormalizeOptions, metrics: SearchMetrics) -> Self {
        let cache = options.cache_dir.clone().map(ChatCache::new);
        Self {
            options,
            cache,
            metrics,
        }
    }

    pub fn metrics(&self) -> &SearchMetrics {
        &self.metrics
    }

    fn policy(&self) -> TimestampPolicy {
        TimestampPolicy::from_keep(self.options.keep_timestamps)
    }

    /// Canonical text of a message list, one line per message
    pub fn render(&self, messages: &[ChatMessage]) -> String {
        let keep = self.policy().keeps();
        let mut out = String::new();
        for message in messages {
            out.push_str(&canonical::encode(message, keep));
            out.push('\n');
        }
        out
    }

    /// Writes the canonical rendering of `path` to `out`
    pub fn normalize_to<W: Write>(&self, path: &Path, out: &mut W) -> SearchResult<NormalizeOutcome> {
        let cached = match &self.cache {
            Some(cache) => {
                let metadata = CacheMetadata::current(path, self.policy())?;
                let hit = cache.lookup(path, &metadata);
                self.metrics.record_cache_lookup(hit.is_some());
                match hit {
                    Some(rendered) => {
                        debug!("Cache hit for {}", path.display());
                        out.write_all(rendered.as_bytes())
                            .map_err(SearchError::IoError)?;
                        return Ok(NormalizeOutcome::CacheHit);
                    }
                    None => Some((cache, metadata)),
                }
            }
            None => None,
        };

        let parsed = parse_file(path)?;
        let rendered = self.render(&parsed.messages);
        out.write_all(rendered.as_bytes())
            .map_err(SearchError::IoError)?;
        self.metrics.record_parse(parsed.format, parsed.messages.len());

        if let Some((cache, metadata)) = cached {
            if let Err(e) = cache.store(path, &metadata, &rendered) {
                warn!("Failed to cache {}: {}", path.display(), e);
            }
        }

        Ok(NormalizeOutcome::Parsed {
            format: parsed.format,
            messages: parsed.messages.len(),
        })
    }

    /// Canonical lines of `path`, used for in-process lookahead
    pub fn canonical_lines(&self, path: &Path) -> SearchResult<Vec<String>> {
        let mut buffer = Vec::new();
        self.normalize_to(path, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer)
            .lines()
            .map(str::to_string)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_normalize_whatsapp_line() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("chat.txt");
        fs::write(&path, "[1/2/23, 10:00 AM] - Alice: hello world\n").unwrap();

        let normalizer = ChatNormalizer::new(NormalizeOptions::default());
        let mut out = Vec::new();
        let outcome = normalizer.normalize_to(&path, &mut out).unwrap();
        assert_eq!(
            outcome,
            NormalizeOutcome::Parsed {
                format: ChatFormat::WhatsApp,
                messages: 1
            }
        );
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "\u{1e}CHAT\u{1f}2023-01-02T10:00:00\u{1f}Alice\u{1f}hello world\n"
        );
    }

    #[test]
    fn test_cache_is_idempotent_and_skips_parsing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("chat.txt");
        fs::write(&path, "1/2/23, 10:00 - Alice: first\ncontinued\n1/2/23, 10:01 - Bob: second\n")
            .unwrap();
        let options = NormalizeOptions {
            keep_timestamps: false,
            cache_dir: Some(dir.path().join("cache")),
        };
        let normalizer = ChatNormalizer::new(options);

        let mut first = Vec::new();
        let outcome = normalizer.normalize_to(&path, &mut first).unwrap();
        assert!(matches!(outcome, NormalizeOutcome::Parsed { messages: 2, .. }));

        let mut second = Vec::new();
        let outcome = normalizer.normalize_to(&path, &mut second).unwrap();
        assert_eq!(outcome, NormalizeOutcome::CacheHit);
        assert_eq!(first, second);

        let stats = normalizer.metrics().get_stats();
        assert_eq!(stats.files_parsed, 1);
        assert_eq!((stats.cache_hits, stats.cache_misses), (1, 1));
    }

    #[test]
    fn test_unreadable_file_fails() {
        let normalizer = ChatNormalizer::new(NormalizeOptions::default());
        let mut out = Vec::new();
        assert!(normalizer
            .normalize_to(Path::new("/no/such/chat.txt"), &mut out)
            .is_err());
    }

    #[test]
    fn test_env_round_trip() {
        let options = NormalizeOptions {
            keep_timestamps: false,
            cache_dir: Some(PathBuf::from("/tmp/fedscout-cache")),
        };
        let env: HashMap<String, String> = options.to_env().into_iter().collect();
        assert_eq!(env[PREPROCESS_ENV], PREPROCESS_CHAT);
        let restored = NormalizeOptions::from_env_with(|key| env.get(key).cloned());
        assert_eq!(restored, options);

        let defaults = NormalizeOptions::from_env_with(|_| None);
        assert_eq!(defaults, NormalizeOptions::default());
    }
}
