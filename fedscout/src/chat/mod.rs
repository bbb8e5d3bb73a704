//! Chat export and LLM transcript normalization.
//!
//! Every supported export is turned into a stream of [`ChatMessage`]s and
//! then into canonical lines (see [`canonical`]) that a plain-text engine can
//! search. Detection is an ordered list of [`ChatParser`]s per extension
//! class; the first parser that produces at least one message wins and a raw
//! pass-through covers everything the parsers decline.

pub mod cache;
pub mod canonical;
mod detect;
mod html;
mod json_exports;
mod jsonl;
mod normalizer;
mod plaintext;
pub mod siblings;
mod source;
mod sqlite;
pub mod timestamps;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::SearchResult;
use crate::lanes::ChatFlavor;

pub use detect::{parse_file, sniff, ParsedChat};
pub use html::strip_tags;
pub use normalizer::{
    ChatNormalizer, NormalizeOptions, NormalizeOutcome, CACHE_ENV, PREPROCESS_CHAT, PREPROCESS_ENV,
    TIMESTAMPS_ENV,
};
pub use source::{SourceFile, SNIFF_BYTES};

/// One normalized message. Never mutated after a parser emits it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// ISO-8601 when the source value could be parsed, verbatim otherwise, may be empty
    pub timestamp: String,
    /// May be empty
    pub sender: String,
    pub text: String,
    pub source_format: ChatFormat,
}

impl ChatMessage {
    pub fn new(
        timestamp: impl Into<String>,
        sender: impl Into<String>,
        text: impl Into<String>,
        source_format: ChatFormat,
    ) -> Self {
        Self {
            timestamp: timestamp.into(),
            sender: sender.into(),
            text: text.into(),
            source_format,
        }
    }
}

/// Export schemas the normalizer understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatFormat {
    GeminiCli,
    ChatGpt,
    DeepSeek,
    Grok,
    ClaudeExport,
    Takeout,
    CodexSession,
    ClaudeCodeSession,
    Telegram,
    Messenger,
    WhatsApp,
    Sqlite,
    Raw,
}

impl ChatFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatFormat::GeminiCli => "gemini-cli",
            ChatFormat::ChatGpt => "chatgpt",
            ChatFormat::DeepSeek => "deepseek",
            ChatFormat::Grok => "grok",
            ChatFormat::ClaudeExport => "claude-export",
            ChatFormat::Takeout => "takeout",
            ChatFormat::CodexSession => "codex",
            ChatFormat::ClaudeCodeSession => "claude-code",
            ChatFormat::Telegram => "telegram",
            ChatFormat::Messenger => "messenger",
            ChatFormat::WhatsApp => "whatsapp",
            ChatFormat::Sqlite => "sqlite",
            ChatFormat::Raw => "raw",
        }
    }

    /// Concurrency hint for the dispatcher
    pub fn flavor(&self) -> ChatFlavor {
        match self {
            ChatFormat::GeminiCli
            | ChatFormat::ChatGpt
            | ChatFormat::DeepSeek
            | ChatFormat::Grok
            | ChatFormat::ClaudeExport
            | ChatFormat::Takeout
            | ChatFormat::CodexSession
            | ChatFormat::ClaudeCodeSession => ChatFlavor::Transcript,
            ChatFormat::Telegram
            | ChatFormat::Messenger
            | ChatFormat::WhatsApp
            | ChatFormat::Sqlite
            | ChatFormat::Raw => ChatFlavor::Messaging,
        }
    }
}

impl fmt::Display for ChatFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A format-specific parser.
///
/// `sniff` only looks at the bounded prefix held by [`SourceFile`] and must be
/// cheap. `parse` may read the whole file; returning an error or an empty list
/// means "not my format" and the next candidate is tried.
pub trait ChatParser: Send + Sync {
    fn format(&self) -> ChatFormat;

    fn sniff(&self, source: &SourceFile) -> bool;

    fn parse(&self, source: &SourceFile) -> SearchResult<Vec<ChatMessage>>;
}

/// Collapses internal whitespace runs and trims, keeping explicit line breaks
pub(crate) fn tidy_text(text: &str) -> String {
    text.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
