use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification bucket that decides how a file's content is obtained and
/// which worker template searches it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lane {
    PlainText,
    RichDocument,
    Chat,
    Spreadsheet,
    SlideDeck,
    LegacyDoc,
}

impl Lane {
    pub const ALL: [Lane; 6] = [
        Lane::PlainText,
        Lane::RichDocument,
        Lane::Chat,
        Lane::Spreadsheet,
        Lane::SlideDeck,
        Lane::LegacyDoc,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Lane::PlainText => "plain",
            Lane::RichDocument => "rich",
            Lane::Chat => "chat",
            Lane::Spreadsheet => "spreadsheet",
            Lane::SlideDeck => "slides",
            Lane::LegacyDoc => "legacy",
        }
    }

    /// Looks up the lane owned by an extension. Plain text and chat are never
    /// decided by extension alone, so they are absent from this table.
    pub fn for_extension(ext: &str) -> Option<Lane> {
        const SPREADSHEET: &[&str] = &["xls", "xlsx", "xlsm", "xlsb", "ods"];
        const SLIDE_DECK: &[&str] = &["ppt", "pptx", "pps", "ppsx", "odp"];
        const LEGACY_DOC: &[&str] = &["doc", "rtf", "wpd", "wps"];
        const RICH_DOCUMENT: &[&str] = &["pdf", "docx", "odt", "epub"];

        let matches = |table: &[&str]| table.iter().any(|e| e.eq_ignore_ascii_case(ext));
        if matches(SPREADSHEET) {
            Some(Lane::Spreadsheet)
        } else if matches(SLIDE_DECK) {
            Some(Lane::SlideDeck)
        } else if matches(LEGACY_DOC) {
            Some(Lane::LegacyDoc)
        } else if matches(RICH_DOCUMENT) {
            Some(Lane::RichDocument)
        } else {
            None
        }
    }
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Soft split of the chat lane. Both flavors are searched identically; the
/// flavor only selects which concurrency parameters the dispatcher uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatFlavor {
    /// Person-to-person exports (messengers, SQLite stores, text logs)
    Messaging,
    /// LLM conversation transcripts, usually few but large files
    Transcript,
}

/// Per-lane concurrency parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LaneTuning {
    /// Number of shards (concurrent workers) for the lane
    pub shards: usize,
    /// Maximum number of paths handed to one worker invocation
    pub batch_size: usize,
}

impl LaneTuning {
    pub const fn new(shards: usize, batch_size: usize) -> Self {
        Self { shards, batch_size }
    }
}
