use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::highlight::{byte_to_char, highlight_spans, HighlightStyle};
use crate::chat::{canonical, siblings, ChatNormalizer};

/// Message window shape for chat matches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageWindow {
    pub before: usize,
    pub after: usize,
}

/// Renders one canonical line as `{text, sender, timestamp}` with empty
/// fields left out. `spans` are byte ranges into the canonical line; spans
/// that end inside the prefix are not highlighted.
pub fn render_message(line: &str, spans: &[(usize, usize)], style: HighlightStyle) -> String {
    let (text, sender, timestamp, prefix_len) = match canonical::decode(line) {
        Some(fields) => (fields.text, fields.sender, fields.timestamp, fields.prefix_len),
        None => (line.trim_end_matches(['\r', '\n']), "", "", 0),
    };

    let char_spans: Vec<(usize, usize)> = spans
        .iter()
        .filter(|&&(_, end)| end > prefix_len)
        .map(|&(start, end)| {
            let start = start.saturating_sub(prefix_len);
            let end = end - prefix_len;
            (byte_to_char(text, start), byte_to_char(text, end))
        })
        .collect();
    let text = highlight_spans(text, &char_spans, style);

    let fields: Vec<&str> = [text.as_str(), sender, timestamp]
        .into_iter()
        .filter(|f| !f.is_empty())
        .collect();
    format!("{{{}}}", fields.join(", "))
}

/// Supplies trailing messages from numbered continuation files
#[derive(Debug)]
pub struct Lookahead {
    normalizer: ChatNormalizer,
    loaded: HashMap<PathBuf, Vec<String>>,
}

impl Lookahead {
    pub fn new(normalizer: ChatNormalizer) -> Self {
        Self {
            normalizer,
            loaded: HashMap::new(),
        }
    }

    /// Up to `count` canonical lines following the end of `path`
    pub fn trailing(&mut self, path: &Path, count: usize) -> Vec<String> {
        let mut found = Vec::new();
        let mut current = path.to_path_buf();
        while found.len() < count {
            let Some(next) = siblings::next_sibling(&current) else {
                break;
            };
            let lines = self.lines_of(&next);
            found.extend(lines.iter().take(count - found.len()).cloned());
            current = next;
        }
        found
    }

    fn lines_of(&mut self, path: &Path) -> &[String] {
        if !self.loaded.contains_key(path) {
            debug!("Looking ahead into {}", path.display());
            let lines = match self.normalizer.canonical_lines(path) {
                Ok(lines) => lines,
                Err(e) => {
                    warn!("Cannot read continuation {}: {}", path.display(), e);
                    Vec::new()
                }
            };
            self.loaded.insert(path.to_path_buf(), lines);
        }
        self.loaded.get(path).map(Vec::as_slice).unwrap_or_default()
    }
}

impl MessageWindow {
    /// Rendered message lines around the match line. The matched message is
    /// marked with `> `. Missing trailing context is taken from `lookahead`.
    pub fn render(
        &self,
        path: &Path,
        lines: &BTreeMap<u64, String>,
        line_number: u64,
        spans: &[(usize, usize)],
        style: HighlightStyle,
        lookahead: Option<&mut Lookahead>,
    ) -> Vec<String> {
        let mut rendered = Vec::new();

        let first = line_number.saturating_sub(self.before as u64).max(1);
        for (_, line) in lines.range(first..line_number) {
            rendered.push(format!("    {}", render_message(line, &[], style)));
        }

        if let Some(line) = lines.get(&line_number) {
            rendered.push(format!("  > {}", render_message(line, spans, style)));
        }

        let mut found = 0;
        for offset in 1..=self.after as u64 {
            match lines.get(&(line_number + offset)) {
                Some(line) => {
                    rendered.push(format!("    {}", render_message(line, &[], style)));
                    found += 1;
                }
                None => break,
            }
        }

        if found < self.after {
            if let Some(lookahead) = lookahead {
                for line in lookahead.trailing(path, self.after - found) {
                    rendered.push(format!("    {}", render_message(&line, &[], style)));
                }
            }
        }

        rendered
    }
}
