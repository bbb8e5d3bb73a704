use serde_json::Value;

use super::timestamps::from_json;
use super::{ChatFormat, ChatMessage, ChatParser, SourceFile};
use crate::errors::SearchResult;

/// Lines inspected when sniffing a line-oriented transcript
const SNIFF_LINES: usize = 20;

/// Injected context blocks that are not part of the conversation
const SYNTHETIC_PREFIXES: &[&str] = &["<environment_context>", "<user_instructions>"];

fn records(text: &str) -> impl Iterator<Item = Value> + '_ {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| serde_json::from_str::<Value>(line).ok())
}

/// Parses complete lines of the sniff window only
fn prefix_records(source: &SourceFile) -> Vec<Value> {
    let prefix = source.prefix_text();
    let usable = match prefix.rfind('\n') {
        Some(end) if !source.is_complete() => &prefix[..end],
        _ => &prefix[..],
    };
    records(usable).take(SNIFF_LINES).collect()
}

fn type_of(record: &Value) -> &str {
    record.get("type").and_then(Value::as_str).unwrap_or_default()
}

/// Text parts of a message `content`, skipping tool calls and reasoning
fn content_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(|part| match part {
                Value::String(s) => Some(s.as_str()),
                Value::Object(_) => match type_of(part) {
                    "text" | "input_text" | "output_text" => part.get("text").and_then(Value::as_str),
                    _ => None,
                },
                _ => None,
            })
            .filter(|t| !t.trim().is_empty())
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

fn is_synthetic(text: &str) -> bool {
    let text = text.trim_start();
    SYNTHETIC_PREFIXES.iter().any(|p| text.starts_with(p))
}

/// Codex CLI session logs.
///
/// A session carries both `response_item` records (full messages) and
/// `event_msg` records (UI echoes of the same turns). Response items win when
/// present so turns are never emitted twice.
pub struct CodexSessionParser;

impl CodexSessionParser {
    fn response_item(record: &Value) -> Option<&Value> {
        let item = match type_of(record) {
            "response_item" => record.get("payload")?,
            "message" => record,
            _ => return None,
        };
        (type_of(item) == "message").then_some(item)
    }

    fn event(record: &Value) -> Option<(&'static str, &str)> {
        if type_of(record) != "event_msg" {
            return None;
        }
        let payload = record.get("payload")?;
        let sender = match type_of(payload) {
            "user_message" => "user",
            "agent_message" => "assistant",
            _ => return None,
        };
        Some((sender, payload.get("message")?.as_str()?))
    }
}

impl ChatParser for CodexSessionParser {
    fn format(&self) -> ChatFormat {
        ChatFormat::CodexSession
    }

    fn sniff(&self, source: &SourceFile) -> bool {
        prefix_records(source).iter().any(|record| {
            matches!(type_of(record), "session_meta" | "response_item" | "event_msg")
                || (type_of(record) == "message" && record.get("role").is_some())
        })
    }

    fn parse(&self, source: &SourceFile) -> SearchResult<Vec<ChatMessage>> {
        let text = source.text()?;
        let mut items = Vec::new();
        let mut events = Vec::new();

        for record in records(&text) {
            let timestamp = from_json(record.get("timestamp").unwrap_or(&Value::Null));
            if let Some(item) = Self::response_item(&record) {
                let role = item.get("role").and_then(Value::as_str).unwrap_or_default();
                if matches!(role, "system" | "developer") {
                    continue;
                }
                let body = content_text(item.get("content").unwrap_or(&Value::Null));
                if body.trim().is_empty() || is_synthetic(&body) {
                    continue;
                }
                items.push(ChatMessage::new(timestamp, role, body.trim(), self.format()));
            } else if let Some((sender, body)) = Self::event(&record) {
                if !body.trim().is_empty() {
                    events.push(ChatMessage::new(timestamp, sender, body.trim(), self.format()));
                }
            }
        }

        Ok(if items.is_empty() { events } else { items })
    }
}

/// Claude Code project transcripts: `{type: user|assistant, message: {role, content}}`
pub struct ClaudeCodeParser;

impl ChatParser for ClaudeCodeParser {
    fn format(&self) -> ChatFormat {
        ChatFormat::ClaudeCodeSession
    }

    fn sniff(&self, source: &SourceFile) -> bool {
        prefix_records(source).iter().any(|record| {
            matches!(type_of(record), "user" | "assistant")
                && record.get("sessionId").is_some()
                && record.get("message").is_some_and(Value::is_object)
        })
    }

    fn parse(&self, source: &SourceFile) -> SearchResult<Vec<ChatMessage>> {
        let text = source.text()?;
        let mut messages = Vec::new();

        for record in records(&text) {
            if !matches!(type_of(&record), "user" | "assistant") {
                continue;
            }
            if record.get("isMeta").and_then(Value::as_bool).unwrap_or(false) {
                continue;
            }
            let Some(message) = record.get("message") else {
                continue;
            };
            let sender = message
                .get("role")
                .and_then(Value::as_str)
                .unwrap_or_else(|| type_of(&record));
            let body = content_text(message.get("content").unwrap_or(&Value::Null));
            if body.trim().is_empty() {
                continue;
            }
            let timestamp = from_json(record.get("timestamp").unwrap_or(&Value::Null));
            messages.push(ChatMessage::new(timestamp, sender, body.trim(), self.format()));
        }
        Ok(messages)
    }
}
