//! Match assembly.
//!
//! The assembler consumes engine output in arrival order. Each file moves
//! through `begin -> (context | match)* -> end`; lines are buffered per file
//! and windows are rendered when the file's `end` arrives. Results are
//! numbered globally across files, which is what pagination counts.

mod chat_window;
mod highlight;
mod page;
mod window;

pub use chat_window::{render_message, Lookahead, MessageWindow};
pub use highlight::{byte_to_char, highlight_spans, HighlightStyle};
pub use page::PageCursor;
pub use window::{TokenWindow, LINE_RADIUS};

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};

use crate::chat::{ChatNormalizer, NormalizeOptions};
use crate::config::SearchConfig;
use crate::errors::{SearchError, SearchResult};
use crate::events::{parse_event, EngineEvent, MatchEvent};
use crate::metrics::SearchMetrics;

/// Whether the caller should keep feeding the assembler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// The requested page is complete or the output went away
    Stop,
}

/// How matches are turned into windows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowMode {
    Text(TokenWindow),
    Chat {
        window: MessageWindow,
        /// One block per matched message instead of one per submatch
        merge: bool,
    },
}

/// Rendering options of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblerOptions {
    pub mode: WindowMode,
    pub highlight: HighlightStyle,
    pub page: Option<PageCursor>,
    pub counts_only: bool,
}

impl AssemblerOptions {
    pub fn from_config(config: &SearchConfig) -> Self {
        let (before, after) = config.resolved_context();
        let mode = if config.chat {
            WindowMode::Chat {
                window: MessageWindow { before, after },
                merge: config.merge,
            }
        } else {
            WindowMode::Text(TokenWindow {
                before,
                after,
                from_line_start: config.from_line_start,
            })
        };
        Self {
            mode,
            highlight: config.highlight,
            page: config.page_cursor(),
            counts_only: config.counts_only,
        }
    }
}

/// Lines and matches seen for one file between `begin` and `end`
#[derive(Debug, Default)]
struct FileMatchBuffer {
    lines: BTreeMap<u64, String>,
    matches: Vec<MatchEvent>,
}

/// What the assembler produced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Assembly {
    /// Submatches counted, including those on unrendered pages
    pub total_matches: usize,
    /// Ordinals handed out (results, or messages in merge mode)
    pub results: usize,
    pub file_counts: BTreeMap<PathBuf, usize>,
    /// Files the engine reported as binary
    pub engine_skipped: BTreeSet<PathBuf>,
    /// Output lines that were not valid events
    pub malformed_lines: usize,
    pub stopped: bool,
}

impl Assembly {
    /// `(count, path)` pairs, descending by count, ties by path
    pub fn sorted_counts(&self) -> Vec<(usize, &Path)> {
        let mut counts: Vec<(usize, &Path)> = self
            .file_counts
            .iter()
            .map(|(path, count)| (*count, path.as_path()))
            .collect();
        counts.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1)));
        counts
    }
}

/// Single-threaded, one-pass consumer of engine output
pub struct MatchAssembler<W: Write> {
    out: W,
    options: AssemblerOptions,
    buffers: HashMap<PathBuf, FileMatchBuffer>,
    lookahead: Option<Lookahead>,
    assembly: Assembly,
}

impl<W: Write> MatchAssembler<W> {
    pub fn new(out: W, options: AssemblerOptions) -> Self {
        Self {
            out,
            options,
            buffers: HashMap::new(),
            lookahead: None,
            assembly: Assembly::default(),
        }
    }

    /// Enables cross-file lookahead for chat windows
    pub fn with_lookahead(mut self, normalizer: ChatNormalizer) -> Self {
        self.lookahead = Some(Lookahead::new(normalizer));
        self
    }

    /// Builds an assembler for a configured run, wiring lookahead in chat mode
    pub fn for_config(out: W, config: &SearchConfig, metrics: SearchMetrics) -> Self {
        let assembler = Self::new(out, AssemblerOptions::from_config(config));
        if config.chat {
            let options = NormalizeOptions {
                keep_timestamps: config.keep_timestamps,
                cache_dir: config.resolved_cache_dir(),
            };
            assembler.with_lookahead(ChatNormalizer::with_metrics(options, metrics))
        } else {
            assembler
        }
    }

    /// Feeds raw worker stdout, one event per line
    pub fn feed_output(&mut self, output: &[u8]) -> SearchResult<Flow> {
        for line in output.split(|&b| b == b'\n') {
            if self.assembly.stopped {
                return Ok(Flow::Stop);
            }
            let line = String::from_utf8_lossy(line);
            match parse_event(&line) {
                Ok(Some(event)) => {
                    if self.feed_event(event)? == Flow::Stop {
                        return Ok(Flow::Stop);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    self.assembly.malformed_lines += 1;
                    debug!("Skipping malformed engine output: {}", e);
                }
            }
        }
        Ok(if self.assembly.stopped {
            Flow::Stop
        } else {
            Flow::Continue
        })
    }

    pub fn feed_event(&mut self, event: EngineEvent) -> SearchResult<Flow> {
        if self.assembly.stopped {
            return Ok(Flow::Stop);
        }
        trace!("{:?}", event);

        match event {
            EngineEvent::Begin { path } => {
                self.buffers.insert(path, FileMatchBuffer::default());
            }
            EngineEvent::Context(line) => {
                self.buffers
                    .entry(line.path)
                    .or_default()
                    .lines
                    .insert(line.line_number, line.text);
            }
            EngineEvent::Match { line, submatches } => {
                let buffer = self.buffers.entry(line.path).or_default();
                buffer.lines.insert(line.line_number, line.text);
                buffer.matches.extend(submatches);
            }
            EngineEvent::Binary { path } => {
                self.buffers.remove(&path);
                self.assembly.engine_skipped.insert(path);
            }
            EngineEvent::End {
                path,
                binary_offset,
            } => {
                // Matches before the binary offset are real and still count
                let flow = match self.buffers.remove(&path) {
                    Some(buffer) => self.flush(&path, buffer)?,
                    None => Flow::Continue,
                };
                if let Some(offset) = binary_offset {
                    debug!("{} reported as binary at byte {}", path.display(), offset);
                    self.assembly.engine_skipped.insert(path);
                }
                return Ok(flow);
            }
        }
        Ok(Flow::Continue)
    }

    fn flush(&mut self, path: &Path, buffer: FileMatchBuffer) -> SearchResult<Flow> {
        if buffer.matches.is_empty() {
            return Ok(Flow::Continue);
        }
        self.assembly.total_matches += buffer.matches.len();
        *self
            .assembly
            .file_counts
            .entry(path.to_path_buf())
            .or_insert(0) += buffer.matches.len();

        if self.options.counts_only {
            return Ok(Flow::Continue);
        }

        match self.options.mode {
            WindowMode::Text(window) => {
                for m in &buffer.matches {
                    let flow = self.emit(path, m.line_number, |style, _| {
                        vec![format!(
                            "    {}",
                            window.render(&buffer.lines, m.line_number, m.byte_start, m.byte_end, style)
                        )]
                    })?;
                    if flow == Flow::Stop {
                        return Ok(Flow::Stop);
                    }
                }
            }
            WindowMode::Chat { window, merge } => {
                let blocks: Vec<(u64, Vec<(usize, usize)>)> = if merge {
                    let mut by_line: BTreeMap<u64, Vec<(usize, usize)>> = BTreeMap::new();
                    for m in &buffer.matches {
                        by_line
                            .entry(m.line_number)
                            .or_default()
                            .push((m.byte_start, m.byte_end));
                    }
                    by_line.into_iter().collect()
                } else {
                    buffer
                        .matches
                        .iter()
                        .map(|m| (m.line_number, vec![(m.byte_start, m.byte_end)]))
                        .collect()
                };

                for (line_number, spans) in blocks {
                    let flow = self.emit(path, line_number, |style, lookahead| {
                        window.render(path, &buffer.lines, line_number, &spans, style, lookahead)
                    })?;
                    if flow == Flow::Stop {
                        return Ok(Flow::Stop);
                    }
                }
            }
        }
        Ok(Flow::Continue)
    }

    /// Hands out the next ordinal and renders the block when it is on the page
    fn emit<F>(&mut self, path: &Path, line_number: u64, render: F) -> SearchResult<Flow>
    where
        F: FnOnce(HighlightStyle, Option<&mut Lookahead>) -> Vec<String>,
    {
        self.assembly.results += 1;
        let ordinal = self.assembly.results;

        let visible = self.options.page.map_or(true, |page| page.contains(ordinal));
        if visible {
            let mut block = format!("{}. {}:{}\n", ordinal, path.display(), line_number);
            for line in render(self.options.highlight, self.lookahead.as_mut()) {
                block.push_str(&line);
                block.push('\n');
            }
            if let Err(e) = self.out.write_all(block.as_bytes()) {
                return self.output_failed(e);
            }
        }

        if self
            .options
            .page
            .is_some_and(|page| page.is_exhausted(ordinal))
        {
            debug!("Page complete at result {}", ordinal);
            self.assembly.stopped = true;
            return Ok(Flow::Stop);
        }
        Ok(Flow::Continue)
    }

    fn output_failed(&mut self, e: io::Error) -> SearchResult<Flow> {
        if e.kind() == io::ErrorKind::BrokenPipe {
            debug!("Output closed, stopping");
            self.assembly.stopped = true;
            Ok(Flow::Stop)
        } else {
            Err(SearchError::IoError(e))
        }
    }

    /// Flushes the output and returns what was assembled. Files still
    /// waiting for their `end` event contribute nothing.
    pub fn finish(mut self) -> SearchResult<Assembly> {
        if !self.buffers.is_empty() {
            warn!(
                "{} files never reported an end event; their matches are dropped",
                self.buffers.len()
            );
        }
        if let Err(e) = self.out.flush() {
            if e.kind() != io::ErrorKind::BrokenPipe {
                return Err(SearchError::IoError(e));
            }
        }
        Ok(self.assembly)
    }
}
