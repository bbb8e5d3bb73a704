use config::{Config as ConfigBuilder, ConfigError, File};
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use crate::errors::{SearchError, SearchResult};
use crate::format::{HighlightStyle, PageCursor};
use crate::lanes::{ChatFlavor, Lane, LaneTuning};

/// Token radius used for plain-text windows when none is configured
pub const DEFAULT_TOKEN_CONTEXT: usize = 8;
/// Message radius used for chat windows when none is configured
pub const DEFAULT_MESSAGE_CONTEXT: usize = 1;

/// Configuration for a federated search run.
///
/// # Configuration Locations
///
/// The configuration can be loaded from multiple locations in order of precedence:
/// 1. Custom config file specified via `--config` flag
/// 2. Local `.fedscout.yaml` in the current directory
/// 3. Global `$HOME/.config/fedscout/config.yaml`
///
/// # Configuration Format
///
/// ```yaml
/// pattern: "invoice"
/// roots: ["~/Documents", "~/exports"]
/// case_insensitive: true
/// exclude_extensions: ["exe", "zip"]
/// chat: true
/// chat_prefilter: true
/// chat_cache: true
/// merge: true
/// page_size: 20
/// engine:
///   program: "rg"
///   spreadsheet_hook: "xlsx2csv"
/// lanes:
///   plain: { shards: 8, batch_size: 256 }
///   transcript: { shards: 2, batch_size: 4 }
/// ```
///
/// Command-line arguments take precedence over config file values; see
/// [`SearchConfig::merge_with_cli`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Pattern handed to the matching engine (regex unless `literal`)
    #[serde(default)]
    pub pattern: String,

    /// Root paths to enumerate
    #[serde(default = "default_roots")]
    pub roots: Vec<PathBuf>,

    /// Context before each match: tokens for text, messages for chat
    #[serde(default)]
    pub context_before: Option<usize>,

    /// Context after each match: tokens for text, messages for chat
    #[serde(default)]
    pub context_after: Option<usize>,

    /// Start text windows at the first token of the matching line
    #[serde(default)]
    pub from_line_start: bool,

    #[serde(default)]
    pub case_insensitive: bool,

    /// Treat the pattern as a literal string
    #[serde(default)]
    pub literal: bool,

    /// Search hidden files and directories
    #[serde(default)]
    pub include_hidden: bool,

    /// Do not respect .gitignore / .ignore files
    #[serde(default)]
    pub no_ignore: bool,

    /// Search binary files as if they were text
    #[serde(default)]
    pub binary_as_text: bool,

    /// Optional allow-list of file extensions (e.g., ["txt", "json"])
    #[serde(default)]
    pub extensions: Option<Vec<String>>,

    /// Deny-list of file extensions
    #[serde(default = "default_exclude_extensions")]
    pub exclude_extensions: Vec<String>,

    /// Glob patterns of paths to skip
    #[serde(default)]
    pub ignore_patterns: Vec<String>,

    /// Search only chat exports and LLM transcripts
    #[serde(default)]
    pub chat: bool,

    /// Skip chat files whose raw bytes cannot match before normalizing them
    #[serde(default)]
    pub chat_prefilter: bool,

    /// Cache normalized chat renderings between runs
    #[serde(default)]
    pub chat_cache: bool,

    /// Overrides the chat cache location
    #[serde(default)]
    pub chat_cache_dir: Option<PathBuf>,

    /// Keep message timestamps in normalized chat lines
    #[serde(default = "default_true")]
    pub keep_timestamps: bool,

    /// Collapse several matches on one chat message into one block
    #[serde(default)]
    pub merge: bool,

    /// 1-based page of results to show
    #[serde(default)]
    pub page: Option<NonZeroUsize>,

    #[serde(default = "default_page_size")]
    pub page_size: NonZeroUsize,

    /// Only produce per-file match counts
    #[serde(default)]
    pub counts_only: bool,

    #[serde(default)]
    pub highlight: HighlightStyle,

    /// Rich documents smaller than this are never sent to extraction
    #[serde(default = "default_rich_min_bytes")]
    pub rich_min_bytes: u64,

    /// Where run logs (failures, skips, counts) are written
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub lanes: LaneSettings,
}

/// Programs used as workers and preprocessing hooks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// ripgrep-compatible engine emitting `--json` events
    #[serde(default = "default_engine")]
    pub program: String,

    /// Engine used for rich documents (pdf, docx, epub)
    #[serde(default = "default_rich_engine")]
    pub rich_program: String,

    /// Converter taking one path and printing spreadsheet text
    #[serde(default = "default_spreadsheet_hook")]
    pub spreadsheet_hook: String,

    /// Converter taking one path and printing slide text
    #[serde(default = "default_slide_deck_hook")]
    pub slide_deck_hook: String,

    /// Converter taking one path and printing legacy document text
    #[serde(default = "default_legacy_doc_hook")]
    pub legacy_doc_hook: String,

    /// Chat normalizer executable; the CLI fills this with itself
    #[serde(default)]
    pub chat_hook: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            program: default_engine(),
            rich_program: default_rich_engine(),
            spreadsheet_hook: default_spreadsheet_hook(),
            slide_deck_hook: default_slide_deck_hook(),
            legacy_doc_hook: default_legacy_doc_hook(),
            chat_hook: None,
        }
    }
}

/// Concurrency parameters for every lane
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaneSettings {
    #[serde(default = "default_plain_tuning")]
    pub plain: LaneTuning,
    #[serde(default = "default_office_tuning")]
    pub rich: LaneTuning,
    #[serde(default = "default_chat_tuning")]
    pub chat: LaneTuning,
    #[serde(default = "default_transcript_tuning")]
    pub transcript: LaneTuning,
    #[serde(default = "default_office_tuning")]
    pub spreadsheet: LaneTuning,
    #[serde(default = "default_office_tuning")]
    pub slide_deck: LaneTuning,
    #[serde(default = "default_office_tuning")]
    pub legacy_doc: LaneTuning,
}

impl Default for LaneSettings {
    fn default() -> Self {
        Self {
            plain: default_plain_tuning(),
            rich: default_office_tuning(),
            chat: default_chat_tuning(),
            transcript: default_transcript_tuning(),
            spreadsheet: default_office_tuning(),
            slide_deck: default_office_tuning(),
            legacy_doc: default_office_tuning(),
        }
    }
}

impl LaneSettings {
    /// Picks the tuning for a lane; chat files use their flavor's tuning
    pub fn tuning(&self, lane: Lane, flavor: Option<ChatFlavor>) -> LaneTuning {
        let tuning = match lane {
            Lane::PlainText => self.plain,
            Lane::RichDocument => self.rich,
            Lane::Chat => match flavor {
                Some(ChatFlavor::Transcript) => self.transcript,
                _ => self.chat,
            },
            Lane::Spreadsheet => self.spreadsheet,
            Lane::SlideDeck => self.slide_deck,
            Lane::LegacyDoc => self.legacy_doc,
        };
        LaneTuning::new(tuning.shards.max(1), tuning.batch_size.max(1))
    }
}

fn default_true() -> bool {
    true
}

fn default_roots() -> Vec<PathBuf> {
    vec![PathBuf::from(".")]
}

fn default_page_size() -> NonZeroUsize {
    NonZeroUsize::new(10).unwrap()
}

fn default_rich_min_bytes() -> u64 {
    256
}

fn default_log_level() -> String {
    "warn".to_string()
}

fn default_engine() -> String {
    "rg".to_string()
}

fn default_rich_engine() -> String {
    "rga".to_string()
}

fn default_spreadsheet_hook() -> String {
    "xlsx2csv".to_string()
}

fn default_slide_deck_hook() -> String {
    "pptx2txt".to_string()
}

fn default_legacy_doc_hook() -> String {
    "catdoc".to_string()
}

fn default_plain_tuning() -> LaneTuning {
    LaneTuning::new(num_cpus::get(), 256)
}

fn default_chat_tuning() -> LaneTuning {
    LaneTuning::new(num_cpus::get(), 32)
}

fn default_transcript_tuning() -> LaneTuning {
    LaneTuning::new(2, 4)
}

fn default_office_tuning() -> LaneTuning {
    LaneTuning::new(2, 16)
}

/// Extensions that are never worth handing to a text engine
pub fn default_exclude_extensions() -> Vec<String> {
    [
        "exe", "dll", "so", "dylib", "bin", "obj", "o", "class", "jar", "war", "ear", "png", "jpg",
        "jpeg", "gif", "bmp", "ico", "zip", "tar", "gz", "7z", "rar", "mp3", "mp4", "mov", "iso",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            pattern: String::new(),
            roots: default_roots(),
            context_before: None,
            context_after: None,
            from_line_start: false,
            case_insensitive: false,
            literal: false,
            include_hidden: false,
            no_ignore: false,
            binary_as_text: false,
            extensions: None,
            exclude_extensions: default_exclude_extensions(),
            ignore_patterns: Vec::new(),
            chat: false,
            chat_prefilter: false,
            chat_cache: false,
            chat_cache_dir: None,
            keep_timestamps: true,
            merge: false,
            page: None,
            page_size: default_page_size(),
            counts_only: false,
            highlight: HighlightStyle::default(),
            rich_min_bytes: default_rich_min_bytes(),
            log_dir: None,
            log_level: default_log_level(),
            engine: EngineConfig::default(),
            lanes: LaneSettings::default(),
        }
    }
}

impl SearchConfig {
    /// Creates a configuration for `pattern` with every other value defaulted
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            ..Self::default()
        }
    }

    /// Loads configuration from the default locations
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Loads configuration from a specific file
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        let config_files = [
            dirs::config_dir().map(|p| p.join("fedscout/config.yaml")),
            Some(PathBuf::from(".fedscout.yaml")),
        ];

        for path in config_files.iter().flatten() {
            if path.exists() {
                builder = builder.add_source(File::from(path.as_path()));
            }
        }

        // An explicit file must exist
        if let Some(path) = config_path {
            builder = builder.add_source(File::from(path).required(true));
        }

        builder.build()?.try_deserialize()
    }

    /// Merges CLI arguments with configuration file values
    pub fn merge_with_cli(mut self, cli: SearchConfig) -> Self {
        if !cli.pattern.is_empty() {
            self.pattern = cli.pattern;
        }
        if cli.roots != default_roots() {
            self.roots = cli.roots;
        }
        if cli.context_before.is_some() {
            self.context_before = cli.context_before;
        }
        if cli.context_after.is_some() {
            self.context_after = cli.context_after;
        }
        if cli.extensions.is_some() {
            self.extensions = cli.extensions;
        }
        if cli.exclude_extensions != default_exclude_extensions() {
            self.exclude_extensions = cli.exclude_extensions;
        }
        if !cli.ignore_patterns.is_empty() {
            self.ignore_patterns = cli.ignore_patterns;
        }
        if cli.chat_cache_dir.is_some() {
            self.chat_cache_dir = cli.chat_cache_dir;
        }
        if cli.page.is_some() {
            self.page = cli.page;
        }
        if cli.page_size != default_page_size() {
            self.page_size = cli.page_size;
        }
        if cli.highlight != HighlightStyle::default() {
            self.highlight = cli.highlight;
        }
        if cli.rich_min_bytes != default_rich_min_bytes() {
            self.rich_min_bytes = cli.rich_min_bytes;
        }
        if cli.log_dir.is_some() {
            self.log_dir = cli.log_dir;
        }
        if cli.log_level != default_log_level() {
            self.log_level = cli.log_level;
        }
        if !cli.keep_timestamps {
            self.keep_timestamps = false;
        }
        if cli.engine.chat_hook.is_some() {
            self.engine.chat_hook = cli.engine.chat_hook;
        }
        if cli.engine.program != default_engine() {
            self.engine.program = cli.engine.program;
        }

        // Switches can only be turned on from the command line
        self.from_line_start |= cli.from_line_start;
        self.case_insensitive |= cli.case_insensitive;
        self.literal |= cli.literal;
        self.include_hidden |= cli.include_hidden;
        self.no_ignore |= cli.no_ignore;
        self.binary_as_text |= cli.binary_as_text;
        self.chat |= cli.chat;
        self.chat_prefilter |= cli.chat_prefilter;
        self.chat_cache |= cli.chat_cache;
        self.merge |= cli.merge;
        self.counts_only |= cli.counts_only;
        self
    }

    /// Rejects configurations that cannot produce a meaningful run
    pub fn validate(&self) -> SearchResult<()> {
        if self.pattern.is_empty() {
            return Err(SearchError::config_error("a search pattern is required"));
        }
        if self.roots.is_empty() {
            return Err(SearchError::config_error("at least one root path is required"));
        }
        if !self.literal {
            regex::Regex::new(&self.pattern)
                .map_err(|e| SearchError::invalid_pattern(e.to_string()))?;
        }
        Ok(())
    }

    /// Context sizes as `(before, after)` for the active search mode
    pub fn resolved_context(&self) -> (usize, usize) {
        let fallback = if self.chat {
            DEFAULT_MESSAGE_CONTEXT
        } else {
            DEFAULT_TOKEN_CONTEXT
        };
        (
            self.context_before.unwrap_or(fallback),
            self.context_after.unwrap_or(fallback),
        )
    }

    pub fn page_cursor(&self) -> Option<PageCursor> {
        self.page.map(|page| PageCursor::new(page, self.page_size))
    }

    /// Chat cache directory, or `None` when caching is disabled
    pub fn resolved_cache_dir(&self) -> Option<PathBuf> {
        if !self.chat_cache {
            return None;
        }
        self.chat_cache_dir.clone().or_else(|| {
            Some(
                dirs::cache_dir()
                    .unwrap_or_else(std::env::temp_dir)
                    .join("fedscout/chat"),
            )
        })
    }

    pub fn resolved_log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("fedscout/logs")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_load_config_file() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.yaml");
        let config_content = r#"
            pattern: "invoice"
            roots: ["exports"]
            extensions: ["json", "txt"]
            chat: true
            merge: true
            page_size: 20
            log_level: "debug"
            engine:
              program: "/opt/rg"
            lanes:
              transcript:
                shards: 3
                batch_size: 1
        "#;

        let mut file = File::create(&config_path).unwrap();
        file.write_all(config_content.as_bytes()).unwrap();

        let config = SearchConfig::load_from(Some(&config_path)).unwrap();
        assert_eq!(config.pattern, "invoice");
        assert_eq!(config.roots, vec![PathBuf::from("exports")]);
        assert_eq!(
            config.extensions,
            Some(vec!["json".to_string(), "txt".to_string()])
        );
        assert!(config.chat);
        assert!(config.merge);
        assert_eq!(config.page_size.get(), 20);
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.engine.program, "/opt/rg");
        assert_eq!(config.engine.rich_program, "rga");
        assert_eq!(config.lanes.transcript, LaneTuning::new(3, 1));
        assert_eq!(config.lanes.rich, default_office_tuning());
    }

    #[test]
    fn test_default_values() {
        let config = SearchConfig::new("hello");
        assert_eq!(config.roots, vec![PathBuf::from(".")]);
        assert!(config.keep_timestamps);
        assert!(!config.chat);
        assert_eq!(config.page_size.get(), 10);
        assert_eq!(config.resolved_context(), (8, 8));
        assert!(config.page_cursor().is_none());
        assert!(config.resolved_cache_dir().is_none());
    }

    #[test]
    fn test_merge_with_cli() {
        let file_config = SearchConfig {
            pattern: "TODO".to_string(),
            roots: vec![PathBuf::from("src")],
            extensions: Some(vec!["rs".to_string()]),
            chat_prefilter: true,
            log_level: "info".to_string(),
            ..SearchConfig::default()
        };

        let cli_config = SearchConfig {
            pattern: "FIXME".to_string(),
            context_before: Some(2),
            chat: true,
            keep_timestamps: false,
            page: NonZeroUsize::new(2),
            ..SearchConfig::default()
        };

        let merged = file_config.merge_with_cli(cli_config);
        assert_eq!(merged.pattern, "FIXME");
        assert_eq!(merged.roots, vec![PathBuf::from("src")]);
        assert_eq!(merged.extensions, Some(vec!["rs".to_string()]));
        assert_eq!(merged.context_before, Some(2));
        assert!(merged.chat);
        assert!(merged.chat_prefilter);
        assert!(!merged.keep_timestamps);
        assert_eq!(merged.log_level, "info");
        assert_eq!(merged.resolved_context(), (2, 1));
        let cursor = merged.page_cursor().unwrap();
        assert_eq!((cursor.page_start(), cursor.page_end()), (11, 20));
    }

    #[test]
    fn test_validate() {
        assert!(SearchConfig::default().validate().is_err());
        assert!(SearchConfig::new("(unclosed").validate().is_err());

        let mut literal = SearchConfig::new("(unclosed");
        literal.literal = true;
        assert!(literal.validate().is_ok());
    }

    #[test]
    fn test_lane_tuning_never_zero() {
        let mut settings = LaneSettings::default();
        settings.plain = LaneTuning::new(0, 0);
        assert_eq!(
            settings.tuning(Lane::PlainText, None),
            LaneTuning::new(1, 1)
        );
        assert_eq!(
            settings.tuning(Lane::Chat, Some(ChatFlavor::Transcript)),
            default_transcript_tuning()
        );
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = SearchConfig::load_from(Some(Path::new("nonexistent.yaml")));
        assert!(result.is_err());
    }
}
