//! Lane routing.
//!
//! Every enumerated file ends up in exactly one lane or exactly one skip
//! bucket. Gates are evaluated in a fixed order and the first one that
//! decides wins:
//!
//! 1. hidden paths (unless hidden files are included)
//! 2. extension allow/deny lists and glob ignore patterns
//! 3. chat mode only: structural chat sniff, everything else is excluded
//! 4. office owner/lock files
//! 5. extension table (spreadsheet, slide deck, legacy doc, rich document)
//! 6. rich documents below the minimum size
//! 7. plain text

use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use tracing::{debug, info};

use crate::chat;
use crate::config::SearchConfig;
use crate::filters;
use crate::lanes::{ChatFlavor, Lane};
use crate::walker::FileRecord;

/// Why a file was not routed to any lane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Hidden,
    Blacklisted,
    /// Not a chat export while searching in chat mode
    Excluded,
    /// Office owner/lock file
    SkippedOwn,
    /// Rich document too small to hold extractable text
    SkippedBadRich,
    /// Raw bytes cannot match the pattern
    Prefiltered,
    /// The engine reported the file as binary
    Binary,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::Hidden => "hidden",
            SkipReason::Blacklisted => "blacklisted",
            SkipReason::Excluded => "excluded",
            SkipReason::SkippedOwn => "skipped_own",
            SkipReason::SkippedBadRich => "skipped_bad_rich",
            SkipReason::Prefiltered => "prefiltered",
            SkipReason::Binary => "binary",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Routing decision for one file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Lane(Lane, Option<ChatFlavor>),
    Skip(SkipReason),
}

/// Aggregate routing counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RouteCounters {
    pub seen: usize,
    pub attempted: usize,
    pub hidden_skipped: usize,
    pub blacklisted: usize,
    pub excluded: usize,
    pub skipped_own: usize,
    pub skipped_bad_rich: usize,
    /// Chat files dropped by the prefilter after routing; still part of `attempted`
    pub prefiltered: usize,
}

impl RouteCounters {
    pub fn skipped(&self) -> usize {
        self.hidden_skipped
            + self.blacklisted
            + self.excluded
            + self.skipped_own
            + self.skipped_bad_rich
    }

    /// `seen == attempted + every routing skip`
    pub fn is_balanced(&self) -> bool {
        self.seen == self.attempted + self.skipped()
    }

    fn record(&mut self, route: Route) {
        self.seen += 1;
        match route {
            Route::Lane(..) => self.attempted += 1,
            Route::Skip(SkipReason::Hidden) => self.hidden_skipped += 1,
            Route::Skip(SkipReason::Blacklisted) => self.blacklisted += 1,
            Route::Skip(SkipReason::Excluded) => self.excluded += 1,
            Route::Skip(SkipReason::SkippedOwn) => self.skipped_own += 1,
            Route::Skip(SkipReason::SkippedBadRich) => self.skipped_bad_rich += 1,
            Route::Skip(SkipReason::Prefiltered) => self.prefiltered += 1,
            Route::Skip(SkipReason::Binary) => {}
        }
    }
}

/// A file assigned to a lane
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutedFile {
    pub path: PathBuf,
    pub size_bytes: u64,
    /// Set for chat lane files only
    pub flavor: Option<ChatFlavor>,
}

/// Router output: per-lane file lists, skipped paths and counters
#[derive(Debug, Default)]
pub struct RoutePlan {
    pub lanes: BTreeMap<Lane, Vec<RoutedFile>>,
    pub skipped: Vec<(SkipReason, PathBuf)>,
    pub counters: RouteCounters,
}

impl RoutePlan {
    pub fn lane(&self, lane: Lane) -> &[RoutedFile] {
        self.lanes.get(&lane).map(Vec::as_slice).unwrap_or_default()
    }

    /// Number of files per non-empty lane
    pub fn lane_sizes(&self) -> BTreeMap<Lane, usize> {
        self.lanes
            .iter()
            .filter(|(_, files)| !files.is_empty())
            .map(|(lane, files)| (*lane, files.len()))
            .collect()
    }
}

/// Decides the route of a single file
pub fn classify(record: &FileRecord, config: &SearchConfig) -> Route {
    let path = record.path.as_path();

    if record.is_hidden && !config.include_hidden {
        return Route::Skip(SkipReason::Hidden);
    }

    if filters::is_blacklisted(
        path,
        &config.extensions,
        &config.exclude_extensions,
        &config.ignore_patterns,
    ) {
        return Route::Skip(SkipReason::Blacklisted);
    }

    if config.chat {
        return match chat::sniff(path) {
            Some(flavor) => Route::Lane(Lane::Chat, Some(flavor)),
            None => Route::Skip(SkipReason::Excluded),
        };
    }

    if filters::is_office_lock_file(path) {
        return Route::Skip(SkipReason::SkippedOwn);
    }

    match Lane::for_extension(&record.extension) {
        Some(Lane::RichDocument) if record.size_bytes < config.rich_min_bytes => {
            Route::Skip(SkipReason::SkippedBadRich)
        }
        Some(lane) => Route::Lane(lane, None),
        None => Route::Lane(Lane::PlainText, None),
    }
}

/// Routes every record. Decisions run in parallel (chat sniffing reads file
/// prefixes); counting and list building stay in enumeration order.
pub fn route(records: Vec<FileRecord>, config: &SearchConfig) -> RoutePlan {
    let decisions: Vec<(FileRecord, Route)> = records
        .into_par_iter()
        .map(|record| {
            let route = classify(&record, config);
            (record, route)
        })
        .collect();

    let mut plan = RoutePlan::default();
    for (record, route) in decisions {
        plan.counters.record(route);
        match route {
            Route::Lane(lane, flavor) => {
                plan.lanes.entry(lane).or_default().push(RoutedFile {
                    path: record.path,
                    size_bytes: record.size_bytes,
                    flavor,
                });
            }
            Route::Skip(reason) => {
                debug!("Skipping {} ({})", record.path.display(), reason);
                plan.skipped.push((reason, record.path));
            }
        }
    }

    info!(
        "Routed {} files: {} attempted, {} skipped",
        plan.counters.seen,
        plan.counters.attempted,
        plan.counters.skipped()
    );
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use tempfile::tempdir;

    fn record(path: &Path, root: &Path) -> FileRecord {
        FileRecord::from_path(path, root).unwrap()
    }

    #[test]
    fn test_routing_order() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        let files = [
            ("notes.txt", "hello"),
            (".secret/notes.txt", "hello"),
            ("setup.exe", "MZ"),
            ("~$report.docx", "lock"),
            ("report.docx", "tiny"),
            ("book.xlsx", "cells"),
            ("deck.pptx", "slides"),
            ("memo.doc", "legacy"),
        ];
        for (name, body) in files {
            let path = root.join(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, body).unwrap();
        }
        let big_pdf = root.join("paper.pdf");
        fs::write(&big_pdf, vec![b'x'; 1024]).unwrap();

        let config = SearchConfig::new("hello");
        let route_of = |name: &str| classify(&record(&root.join(name), root), &config);

        assert_eq!(route_of("notes.txt"), Route::Lane(Lane::PlainText, None));
        assert_eq!(route_of(".secret/notes.txt"), Route::Skip(SkipReason::Hidden));
        assert_eq!(route_of("setup.exe"), Route::Skip(SkipReason::Blacklisted));
        assert_eq!(route_of("~$report.docx"), Route::Skip(SkipReason::SkippedOwn));
        assert_eq!(route_of("report.docx"), Route::Skip(SkipReason::SkippedBadRich));
        assert_eq!(route_of("paper.pdf"), Route::Lane(Lane::RichDocument, None));
        assert_eq!(route_of("book.xlsx"), Route::Lane(Lane::Spreadsheet, None));
        assert_eq!(route_of("deck.pptx"), Route::Lane(Lane::SlideDeck, None));
        assert_eq!(route_of("memo.doc"), Route::Lane(Lane::LegacyDoc, None));

        let hidden_allowed = SearchConfig {
            include_hidden: true,
            ..SearchConfig::new("hello")
        };
        assert_eq!(
            classify(&record(&root.join(".secret/notes.txt"), root), &hidden_allowed),
            Route::Lane(Lane::PlainText, None)
        );
    }

    #[test]
    fn test_chat_mode_excludes_non_chat_files() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::write(
            root.join("chat.txt"),
            "[1/2/23, 10:00 AM] - Alice: hello world\n",
        )
        .unwrap();
        fs::write(root.join("notes.txt"), "hello\n").unwrap();
        fs::write(
            root.join("session.json"),
            r#"{"sessionId":"s","projectHash":"p","messages":[{"type":"user","content":"hi"}]}"#,
        )
        .unwrap();

        let config = SearchConfig {
            chat: true,
            ..SearchConfig::new("hello")
        };
        let records = vec![
            record(&root.join("chat.txt"), root),
            record(&root.join("notes.txt"), root),
            record(&root.join("session.json"), root),
        ];
        let plan = route(records, &config);

        let chat = plan.lane(Lane::Chat);
        assert_eq!(chat.len(), 2);
        assert_eq!(chat[0].flavor, Some(ChatFlavor::Messaging));
        assert_eq!(chat[1].flavor, Some(ChatFlavor::Transcript));
        assert_eq!(plan.counters.excluded, 1);
        assert_eq!(
            plan.skipped,
            vec![(SkipReason::Excluded, root.join("notes.txt"))]
        );
        assert!(plan.lane(Lane::PlainText).is_empty());
    }

    #[test]
    fn test_every_file_routed_exactly_once() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        let mut records = Vec::new();
        for i in 0..60 {
            let name = match i % 6 {
                0 => format!("f{i}.txt"),
                1 => format!(".h{i}.txt"),
                2 => format!("f{i}.zip"),
                3 => format!("~$f{i}.docx"),
                4 => format!("f{i}.pdf"),
                _ => format!("f{i}.xlsx"),
            };
            let path = root.join(name);
            fs::write(&path, "content").unwrap();
            records.push(record(&path, root));
        }

        let plan = route(records, &SearchConfig::new("content"));
        let routed: usize = plan.lanes.values().map(Vec::len).sum();
        assert_eq!(plan.counters.seen, 60);
        assert_eq!(routed, plan.counters.attempted);
        assert_eq!(routed + plan.skipped.len(), 60);
        assert!(plan.counters.is_balanced());
        assert_eq!(plan.counters.hidden_skipped, 10);
        assert_eq!(plan.counters.skipped_bad_rich, 10);
    }
}
