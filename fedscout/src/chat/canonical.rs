//! Single-line wire encoding of a chat message.
//!
//! A canonical line looks like `RS "CHAT" US timestamp US sender US text`
//! where RS/US are the ASCII record/unit separators. The matching engine
//! treats it as ordinary text, so chat search needs no custom protocol.
//! Newlines inside the text are flattened to spaces; separators that
//! appear inside a field are replaced by spaces so decoding stays exact.

use super::ChatMessage;

/// Sentinel that starts every canonical line
pub const SENTINEL: &str = "\u{1e}CHAT\u{1f}";
/// Field separator
pub const FIELD_SEP: char = '\u{1f}';

/// The three user-visible fields of a decoded canonical line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalFields<'a> {
    pub timestamp: &'a str,
    pub sender: &'a str,
    pub text: &'a str,
    /// Byte length of everything before `text`
    pub prefix_len: usize,
}

fn clean_field(value: &str) -> String {
    value
        .chars()
        .map(|c| match c {
            '\u{1e}' | '\u{1f}' | '\r' | '\n' => ' ',
            other => other,
        })
        .collect()
}

/// Collapses CR/LF runs into single spaces
pub fn flatten_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_break = false;
    for c in text.chars() {
        match c {
            '\r' | '\n' => {
                if !in_break {
                    out.push(' ');
                    in_break = true;
                }
            }
            '\u{1e}' | '\u{1f}' => {
                out.push(' ');
                in_break = false;
            }
            other => {
                out.push(other);
                in_break = false;
            }
        }
    }
    out
}

/// Encodes one message; `keep_timestamp = false` blanks the timestamp field
pub fn encode(message: &ChatMessage, keep_timestamp: bool) -> String {
    let timestamp = if keep_timestamp {
        clean_field(&message.timestamp)
    } else {
        String::new()
    };
    let sender = clean_field(&message.sender);
    let text = flatten_text(&message.text);

    let mut line = String::with_capacity(SENTINEL.len() + timestamp.len() + sender.len() + text.len() + 2);
    line.push_str(SENTINEL);
    line.push_str(&timestamp);
    line.push(FIELD_SEP);
    line.push_str(&sender);
    line.push(FIELD_SEP);
    line.push_str(&text);
    line
}

/// Splits a canonical line. Returns `None` for lines without the sentinel.
pub fn decode(line: &str) -> Option<CanonicalFields<'_>> {
    let line = line.trim_end_matches(['\n', '\r']);
    let rest = line.strip_prefix(SENTINEL)?;
    let mut parts = rest.splitn(3, FIELD_SEP);
    let timestamp = parts.next()?;
    let sender = parts.next()?;
    let text = parts.next()?;
    Some(CanonicalFields {
        timestamp,
        sender,
        text,
        prefix_len: line.len() - text.len(),
    })
}

/// Byte length of the metadata prefix of a canonical line, 0 for other lines
pub fn prefix_len(line: &str) -> usize {
    decode(line).map_or(0, |f| f.prefix_len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::ChatFormat;

    fn message(ts: &str, sender: &str, text: &str) -> ChatMessage {
        ChatMessage::new(ts, sender, text, ChatFormat::WhatsApp)
    }

    #[test]
    fn test_round_trip() {
        let cases = [
            ("2023-01-02T10:00:00", "Alice", "hello world"),
            ("", "", "no metadata at all"),
            ("2024-05-01T08:00:00Z", "Zoë", "naïve café ☕ with\ttab"),
            ("", "bob", ""),
        ];
        for (ts, sender, text) in cases {
            let line = encode(&message(ts, sender, text), true);
            let fields = decode(&line).unwrap();
            assert_eq!(fields.timestamp, ts);
            assert_eq!(fields.sender, sender);
            assert_eq!(fields.text, text);
            assert_eq!(&line[fields.prefix_len..], text);
        }
    }

    #[test]
    fn test_newlines_are_flattened() {
        let line = encode(&message("t", "s", "first\r\nsecond\n\nthird"), true);
        assert!(!line.contains('\n'));
        assert_eq!(decode(&line).unwrap().text, "first second third");
    }

    #[test]
    fn test_separators_in_fields_do_not_break_decoding() {
        let line = encode(&message("t\u{1f}x", "a\u{1f}b", "c\u{1f}d"), true);
        let fields = decode(&line).unwrap();
        assert_eq!(fields.timestamp, "t x");
        assert_eq!(fields.sender, "a b");
        assert_eq!(fields.text, "c d");
    }

    #[test]
    fn test_drop_timestamp() {
        let line = encode(&message("2023-01-02T10:00:00", "Alice", "hi"), false);
        let fields = decode(&line).unwrap();
        assert_eq!(fields.timestamp, "");
        assert_eq!(fields.sender, "Alice");
    }

    #[test]
    fn test_decode_rejects_plain_lines() {
        assert!(decode("just some text").is_none());
        assert_eq!(prefix_len("just some text"), 0);
    }

    #[test]
    fn test_decode_tolerates_trailing_newline() {
        let mut line = encode(&message("t", "s", "body"), true);
        line.push('\n');
        assert_eq!(decode(&line).unwrap().text, "body");
    }
}
