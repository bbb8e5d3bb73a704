use std::collections::BTreeMap;

use super::highlight::{byte_to_char, highlight_spans, HighlightStyle};

/// Lines on each side of the match line that feed a token window
pub const LINE_RADIUS: u64 = 2;

/// Token window shape for plain-text matches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenWindow {
    pub before: usize,
    pub after: usize,
    /// Start at the first token of the match line instead of `before` tokens back
    pub from_line_start: bool,
}

/// Whitespace-delimited tokens as char ranges
fn tokenize(chars: &[char]) -> Vec<(usize, usize)> {
    let mut tokens = Vec::new();
    let mut start = None;
    for (i, c) in chars.iter().enumerate() {
        match (c.is_whitespace(), start) {
            (false, None) => start = Some(i),
            (true, Some(s)) => {
                tokens.push((s, i));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        tokens.push((s, chars.len()));
    }
    tokens
}

impl TokenWindow {
    /// Renders the window around one submatch.
    ///
    /// `byte_start..byte_end` are offsets into the text of `line_number`,
    /// which must be present in `lines`.
    pub fn render(
        &self,
        lines: &BTreeMap<u64, String>,
        line_number: u64,
        byte_start: usize,
        byte_end: usize,
        style: HighlightStyle,
    ) -> String {
        let low = line_number.saturating_sub(LINE_RADIUS);
        let high = line_number.saturating_add(LINE_RADIUS);

        let mut joined = String::new();
        let mut line_offset = 0;
        let mut line_len = 0;
        for (&number, text) in lines.range(low..=high) {
            if !joined.is_empty() {
                joined.push('\n');
            }
            if number == line_number {
                line_offset = joined.len();
                line_len = text.len();
            }
            joined.push_str(text);
        }

        let start_in_line = byte_start.min(line_len);
        let match_start = line_offset + start_in_line;
        let match_end = line_offset + byte_end.min(line_len).max(start_in_line);
        let char_start = byte_to_char(&joined, match_start);
        let char_end = byte_to_char(&joined, match_end);
        let line_char_start = byte_to_char(&joined, line_offset);

        let chars: Vec<char> = joined.chars().collect();
        let tokens = tokenize(&chars);
        if tokens.is_empty() {
            return String::new();
        }

        let hit_end = char_end.max(char_start + 1);
        let overlaps = |&(s, e): &(usize, usize)| e > char_start && s < hit_end;
        let first = tokens.iter().position(overlaps).unwrap_or_else(|| {
            tokens
                .iter()
                .position(|&(s, _)| s >= char_start)
                .unwrap_or(tokens.len() - 1)
        });
        let last = tokens.iter().rposition(overlaps).unwrap_or(first).max(first);

        let start = if self.from_line_start {
            tokens
                .iter()
                .position(|&(s, _)| s >= line_char_start)
                .map_or(first, |line_first| line_first.min(first))
        } else {
            first.saturating_sub(self.before)
        };
        let end = last.saturating_add(self.after).min(tokens.len() - 1);

        tokens[start..=end]
            .iter()
            .map(|&(s, e)| {
                let token: String = chars[s..e].iter().collect();
                let hl_start = char_start.max(s);
                let hl_end = char_end.min(e);
                if hl_start < hl_end {
                    highlight_spans(&token, &[(hl_start - s, hl_end - s)], style)
                } else {
                    token
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}
