use std::path::Path;
use tracing::{debug, trace};

use super::html::{MessengerParser, TelegramParser};
use super::json_exports::{
    ChatGptParser, ClaudeExportParser, DeepSeekParser, GeminiCliParser, GrokParser, TakeoutParser,
};
use super::jsonl::{ClaudeCodeParser, CodexSessionParser};
use super::plaintext::{raw_messages, DelimitedTextParser};
use super::sqlite::SqliteParser;
use super::{ChatFormat, ChatMessage, ChatParser, SourceFile};
use crate::errors::SearchResult;
use crate::lanes::ChatFlavor;
use crate::walker::extension_of;

static JSON_PARSERS: &[&dyn ChatParser] = &[
    &GeminiCliParser,
    &ChatGptParser,
    &DeepSeekParser,
    &GrokParser,
    &ClaudeExportParser,
    &TakeoutParser,
];
static JSONL_PARSERS: &[&dyn ChatParser] = &[&CodexSessionParser, &ClaudeCodeParser];
static HTML_PARSERS: &[&dyn ChatParser] = &[&TelegramParser, &MessengerParser];
static TEXT_PARSERS: &[&dyn ChatParser] = &[&DelimitedTextParser];
static SQLITE_PARSERS: &[&dyn ChatParser] = &[&SqliteParser];

/// Ordered candidate parsers for an extension class
pub fn candidates(extension: &str) -> &'static [&'static dyn ChatParser] {
    match extension {
        "json" => JSON_PARSERS,
        "jsonl" | "ndjson" => JSONL_PARSERS,
        "html" | "htm" => HTML_PARSERS,
        "txt" => TEXT_PARSERS,
        "db" | "sqlite" | "sqlite3" => SQLITE_PARSERS,
        _ => &[],
    }
}

/// Structural check used for lane membership. Only the sniff window is read.
pub fn sniff(path: &Path) -> Option<ChatFlavor> {
    let parsers = candidates(&extension_of(path));
    if parsers.is_empty() {
        return None;
    }
    let source = match SourceFile::open(path) {
        Ok(source) => source,
        Err(e) => {
            debug!("Cannot sniff {}: {}", path.display(), e);
            return None;
        }
    };
    parsers
        .iter()
        .find(|parser| parser.sniff(&source))
        .map(|parser| {
            trace!("{} looks like {}", path.display(), parser.format());
            parser.format().flavor()
        })
}

/// Messages of one file plus the schema that produced them
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedChat {
    pub format: ChatFormat,
    pub messages: Vec<ChatMessage>,
}

/// Tries each candidate whose sniff matches; the first one producing at
/// least one message wins. Falls back to raw pass-through. Only an
/// unreadable file is an error.
pub fn parse_file(path: &Path) -> SearchResult<ParsedChat> {
    let source = SourceFile::open(path)?;

    for parser in candidates(source.extension()) {
        if !parser.sniff(&source) {
            continue;
        }
        match parser.parse(&source) {
            Ok(messages) if !messages.is_empty() => {
                debug!(
                    "Parsed {} messages from {} as {}",
                    messages.len(),
                    path.display(),
                    parser.format()
                );
                return Ok(ParsedChat {
                    format: parser.format(),
                    messages,
                });
            }
            Ok(_) => debug!("{} found no messages in {}", parser.format(), path.display()),
            Err(e) => debug!("{} declined {}: {}", parser.format(), path.display(), e),
        }
    }

    debug!("Passing {} through raw", path.display());
    Ok(ParsedChat {
        format: ChatFormat::Raw,
        messages: raw_messages(&source.text()?),
    })
}
