use once_cell::sync::Lazy;
use regex::Regex;

use super::timestamps;
use super::{ChatFormat, ChatMessage, ChatParser, SourceFile};
use crate::errors::SearchResult;

/// Header lines looked at when sniffing
const SNIFF_LINES: usize = 20;

const DATE: &str = r"\d{1,4}[./-]\d{1,2}[./-]\d{2,4}";
const TIME: &str = r"\d{1,2}:\d{2}(?::\d{2})?(?:[\s\x{202f}]?[AaPp]\.?[Mm]\.?)?";

/// `[1/2/23, 10:00 AM] - Alice: hi`, `1/2/23, 10:00 - Alice: hi`, `[1/2/23, 10:00:00] Alice: hi`
///
/// Senders are at most five words, so notices whose text has a colon stay notices.
static DASHED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"^\[?(?P<date>{DATE}),?\s(?P<time>{TIME})\]?\s*(?:-\s+)?(?P<sender>[^:,\s][^:\s]*(?:\s[^:\s]+){{0,4}}):\s(?P<text>.*)$"
    ))
    .unwrap()
});

/// `2023-01-02 10:00, Alice: hi`
static COMMA: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"^(?P<date>{DATE})\s(?P<time>{TIME}),\s(?P<sender>[^:]+?):\s(?P<text>.*)$"
    ))
    .unwrap()
});

/// Sender-less system notices: `1/2/23, 10:00 AM - Messages are end-to-end encrypted.`
static NOTICE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"^\[?(?P<date>{DATE}),?\s(?P<time>{TIME})\]?\s*-\s+(?P<text>.*)$"
    ))
    .unwrap()
});

/// Marks exporters put in front of lines
fn clean_line(line: &str) -> &str {
    line.trim_start_matches(['\u{200e}', '\u{200f}', '\u{feff}'])
        .trim_end_matches('\r')
}

enum Header<'a> {
    Message {
        date: &'a str,
        time: &'a str,
        sender: &'a str,
        text: &'a str,
    },
    Notice {
        date: &'a str,
        time: &'a str,
        text: &'a str,
    },
}

fn header(line: &str) -> Option<Header<'_>> {
    if let Some(caps) = DASHED.captures(line).or_else(|| COMMA.captures(line)) {
        return Some(Header::Message {
            date: caps.name("date")?.as_str(),
            time: caps.name("time")?.as_str(),
            sender: caps.name("sender")?.as_str(),
            text: caps.name("text")?.as_str(),
        });
    }
    NOTICE.captures(line).and_then(|caps| {
        Some(Header::Notice {
            date: caps.name("date")?.as_str(),
            time: caps.name("time")?.as_str(),
            text: caps.name("text")?.as_str(),
        })
    })
}

fn stamp(date: &str, time: &str) -> String {
    timestamps::whatsapp(date, time).unwrap_or_else(|| format!("{date}, {time}"))
}

/// WhatsApp-style delimited text exports. Lines without a header continue
/// the previous message.
pub struct DelimitedTextParser;

impl ChatParser for DelimitedTextParser {
    fn format(&self) -> ChatFormat {
        ChatFormat::WhatsApp
    }

    fn sniff(&self, source: &SourceFile) -> bool {
        source
            .prefix_text()
            .lines()
            .take(SNIFF_LINES)
            .map(clean_line)
            .any(|line| DASHED.is_match(line) || COMMA.is_match(line))
    }

    fn parse(&self, source: &SourceFile) -> SearchResult<Vec<ChatMessage>> {
        let text = source.text()?;
        let mut messages: Vec<ChatMessage> = Vec::new();
        let mut saw_header = false;

        for line in text.lines().map(clean_line) {
            match header(line) {
                Some(Header::Message {
                    date,
                    time,
                    sender,
                    text,
                }) => {
                    saw_header = true;
                    messages.push(ChatMessage::new(stamp(date, time), sender.trim(), text, self.format()));
                }
                Some(Header::Notice { date, time, text }) => {
                    saw_header = true;
                    messages.push(ChatMessage::new(stamp(date, time), "", text, self.format()));
                }
                None => match messages.last_mut() {
                    Some(previous) => {
                        previous.text.push('\n');
                        previous.text.push_str(line);
                    }
                    None if !line.trim().is_empty() => {
                        messages.push(ChatMessage::new("", "", line, self.format()));
                    }
                    None => {}
                },
            }
        }

        if !saw_header {
            return Ok(Vec::new());
        }
        for message in &mut messages {
            let trimmed = message.text.trim_end();
            message.text.truncate(trimmed.len());
        }
        Ok(messages)
    }
}

/// Every line verbatim, empty sender and timestamp
pub fn raw_messages(text: &str) -> Vec<ChatMessage> {
    text.lines()
        .map(|line| ChatMessage::new("", "", line.trim_end_matches('\r'), ChatFormat::Raw))
        .collect()
}
