use colored::Colorize;
use serde::{Deserialize, Serialize};

/// How matched text is marked in rendered windows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HighlightStyle {
    /// Red, bold terminal escapes
    #[default]
    Ansi,
    /// `[[match]]`, for logs and pipes
    Brackets,
    None,
}

impl HighlightStyle {
    pub fn apply(&self, text: &str) -> String {
        if text.is_empty() {
            return String::new();
        }
        match self {
            HighlightStyle::Ansi => text.red().bold().to_string(),
            HighlightStyle::Brackets => format!("[[{text}]]"),
            HighlightStyle::None => text.to_string(),
        }
    }
}

/// Converts a byte offset into a char offset by summing encoded lengths.
/// Offsets past the end clamp to the char count; an offset inside a
/// multi-byte char rounds up to the next char boundary.
pub fn byte_to_char(text: &str, byte_offset: usize) -> usize {
    let mut bytes = 0;
    for (chars, c) in text.chars().enumerate() {
        if bytes >= byte_offset {
            return chars;
        }
        bytes += c.len_utf8();
    }
    text.chars().count()
}

/// Marks char ranges of `text`. Ranges may overlap or be unsorted.
pub fn highlight_spans(text: &str, spans: &[(usize, usize)], style: HighlightStyle) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut marked = vec![false; chars.len()];
    for &(start, end) in spans {
        let end = end.min(chars.len());
        for flag in marked.iter_mut().take(end).skip(start) {
            *flag = true;
        }
    }

    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while i < chars.len() {
        let run_start = i;
        let flag = marked[i];
        while i < chars.len() && marked[i] == flag {
            i += 1;
        }
        let run: String = chars[run_start..i].iter().collect();
        if flag {
            out.push_str(&style.apply(&run));
        } else {
            out.push_str(&run);
        }
    }
    out
}
