use serde_json::Value;
use std::collections::HashSet;

use super::html::strip_tags;
use super::timestamps::from_json;
use super::{tidy_text, ChatFormat, ChatMessage, ChatParser, SourceFile};
use crate::errors::{SearchError, SearchResult};

fn document(source: &SourceFile) -> SearchResult<&Value> {
    source
        .json()
        .ok_or_else(|| SearchError::not_recognized(source.path()))
}

/// Exports come either as one conversation object or as an array of them
fn conversations(value: &Value) -> Vec<&Value> {
    match value {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    }
}

fn str_field<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(Value::as_str).unwrap_or_default()
}

/// Flattens the usual "string or list of parts" content shapes
fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(parts) => parts
            .iter()
            .map(text_of)
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Object(map) => map
            .get("text")
            .or_else(|| map.get("parts"))
            .map(text_of)
            .unwrap_or_default(),
        _ => String::new(),
    }
}

fn push(messages: &mut Vec<ChatMessage>, timestamp: String, sender: &str, text: &str, format: ChatFormat) {
    let text = text.trim();
    if !text.is_empty() {
        messages.push(ChatMessage::new(timestamp, sender, text, format));
    }
}

/// Gemini CLI saved sessions: `{sessionId, projectHash, messages: [...]}`
pub struct GeminiCliParser;

impl ChatParser for GeminiCliParser {
    fn format(&self) -> ChatFormat {
        ChatFormat::GeminiCli
    }

    fn sniff(&self, source: &SourceFile) -> bool {
        source.prefix_contains_all(&["\"messages\"", "\"sessionId\"", "\"projectHash\""])
    }

    fn parse(&self, source: &SourceFile) -> SearchResult<Vec<ChatMessage>> {
        let doc = document(source)?;
        let Some(items) = doc.get("messages").and_then(Value::as_array) else {
            return Err(SearchError::not_recognized(source.path()));
        };

        let mut messages = Vec::new();
        for item in items {
            let sender = item
                .get("type")
                .or_else(|| item.get("role"))
                .and_then(Value::as_str)
                .unwrap_or_default();
            if matches!(sender, "info" | "error" | "warning") {
                continue;
            }
            let text = item
                .get("content")
                .or_else(|| item.get("parts"))
                .map(text_of)
                .unwrap_or_default();
            let timestamp = item.get("timestamp").map(from_json).unwrap_or_default();
            push(&mut messages, timestamp, sender, &text, self.format());
        }
        Ok(messages)
    }
}

/// Walks a `mapping` tree iteratively, parents before children, siblings in
/// their stored order. Nodes unreachable from a root are ignored.
fn walk_mapping<'a>(mapping: &'a serde_json::Map<String, Value>) -> Vec<&'a Value> {
    let mut roots: Vec<&str> = mapping
        .iter()
        .filter(|(_, node)| {
            node.get("parent")
                .and_then(Value::as_str)
                .map_or(true, |parent| !mapping.contains_key(parent))
        })
        .map(|(id, _)| id.as_str())
        .collect();
    roots.sort_unstable();

    let mut ordered = Vec::with_capacity(mapping.len());
    let mut visited = HashSet::new();
    let mut stack: Vec<&str> = roots.into_iter().rev().collect();

    while let Some(id) = stack.pop() {
        if !visited.insert(id) {
            continue;
        }
        let Some(node) = mapping.get(id) else {
            continue;
        };
        ordered.push(node);
        if let Some(children) = node.get("children").and_then(Value::as_array) {
            stack.extend(children.iter().rev().filter_map(Value::as_str));
        }
    }
    ordered
}

/// ChatGPT `conversations.json`: `mapping` nodes carrying `author` and `create_time`
pub struct ChatGptParser;

impl ChatGptParser {
    fn message_text(message: &Value) -> String {
        let content = &message["content"];
        let mut pieces = Vec::new();
        if let Some(parts) = content.get("parts").and_then(Value::as_array) {
            for part in parts {
                match part {
                    Value::String(s) if !s.is_empty() => pieces.push(s.clone()),
                    Value::Object(obj) => {
                        let kind = obj
                            .get("content_type")
                            .and_then(Value::as_str)
                            .unwrap_or_default();
                        if kind.contains("image") {
                            pieces.push("[img]".to_string());
                        } else if kind.contains("audio") || kind.contains("video") {
                            pieces.push("[media]".to_string());
                        } else if let Some(text) = obj.get("text").and_then(Value::as_str) {
                            pieces.push(text.to_string());
                        }
                    }
                    _ => {}
                }
            }
        }
        if pieces.is_empty() {
            if let Some(text) = content.get("text").and_then(Value::as_str) {
                pieces.push(text.to_string());
            }
        }
        pieces.join("\n")
    }
}

impl ChatParser for ChatGptParser {
    fn format(&self) -> ChatFormat {
        ChatFormat::ChatGpt
    }

    fn sniff(&self, source: &SourceFile) -> bool {
        source.prefix_contains_all(&["\"mapping\"", "\"author\"", "\"create_time\""])
            && !source.prefix_contains_all(&["\"fragments\""])
    }

    fn parse(&self, source: &SourceFile) -> SearchResult<Vec<ChatMessage>> {
        let doc = document(source)?;
        let mut messages = Vec::new();

        for conversation in conversations(doc) {
            let Some(mapping) = conversation.get("mapping").and_then(Value::as_object) else {
                continue;
            };
            for node in walk_mapping(mapping) {
                let message = &node["message"];
                if !message.is_object() {
                    continue;
                }
                let author = &message["author"];
                let role = str_field(author, "role");
                if role == "system" {
                    continue;
                }
                let sender = author
                    .get("name")
                    .and_then(Value::as_str)
                    .filter(|n| !n.is_empty())
                    .unwrap_or(role);
                let timestamp = from_json(&message["create_time"]);
                let text = Self::message_text(message);
                push(&mut messages, timestamp, sender, &text, self.format());
            }
        }
        Ok(messages)
    }
}

/// DeepSeek export: `mapping` nodes whose messages hold tagged `fragments`
pub struct DeepSeekParser;

impl ChatParser for DeepSeekParser {
    fn format(&self) -> ChatFormat {
        ChatFormat::DeepSeek
    }

    fn sniff(&self, source: &SourceFile) -> bool {
        source.prefix_contains_all(&["\"mapping\"", "\"fragments\""])
    }

    fn parse(&self, source: &SourceFile) -> SearchResult<Vec<ChatMessage>> {
        let doc = document(source)?;
        let mut messages = Vec::new();

        for conversation in conversations(doc) {
            let Some(mapping) = conversation.get("mapping").and_then(Value::as_object) else {
                continue;
            };
            for node in walk_mapping(mapping) {
                let message = &node["message"];
                let Some(fragments) = message.get("fragments").and_then(Value::as_array) else {
                    continue;
                };
                let timestamp = from_json(&message["inserted_at"]);
                for fragment in fragments {
                    // Reasoning fragments are not part of the conversation
                    let sender = match str_field(fragment, "type") {
                        "REQUEST" => "user",
                        "RESPONSE" => "assistant",
                        _ => continue,
                    };
                    let text = str_field(fragment, "content");
                    push(&mut messages, timestamp.clone(), sender, text, self.format());
                }
            }
        }
        Ok(messages)
    }
}

/// Grok export: `conversations[].responses[].response.message`
pub struct GrokParser;

impl ChatParser for GrokParser {
    fn format(&self) -> ChatFormat {
        ChatFormat::Grok
    }

    fn sniff(&self, source: &SourceFile) -> bool {
        source.prefix_contains_all(&["\"conversations\"", "\"responses\""])
    }

    fn parse(&self, source: &SourceFile) -> SearchResult<Vec<ChatMessage>> {
        let doc = document(source)?;
        let Some(items) = doc.get("conversations").and_then(Value::as_array) else {
            return Err(SearchError::not_recognized(source.path()));
        };

        let mut messages = Vec::new();
        for conversation in items {
            let Some(responses) = conversation.get("responses").and_then(Value::as_array) else {
                continue;
            };
            for entry in responses {
                let response = &entry["response"];
                let sender = str_field(response, "sender").to_ascii_lowercase();
                let timestamp = from_json(&response["create_time"]);
                let text = str_field(response, "message");
                push(&mut messages, timestamp, &sender, text, self.format());
            }
        }
        Ok(messages)
    }
}

/// Claude.ai account export: conversations carrying `chat_messages`
pub struct ClaudeExportParser;

impl ChatParser for ClaudeExportParser {
    fn format(&self) -> ChatFormat {
        ChatFormat::ClaudeExport
    }

    fn sniff(&self, source: &SourceFile) -> bool {
        source.prefix_contains_all(&["\"chat_messages\""])
    }

    fn parse(&self, source: &SourceFile) -> SearchResult<Vec<ChatMessage>> {
        let doc = document(source)?;
        let mut messages = Vec::new();

        for conversation in conversations(doc) {
            let Some(items) = conversation.get("chat_messages").and_then(Value::as_array) else {
                continue;
            };
            for item in items {
                let text = match str_field(item, "text") {
                    "" => item.get("content").map(text_of).unwrap_or_default(),
                    text => text.to_string(),
                };
                let timestamp = from_json(&item["created_at"]);
                push(&mut messages, timestamp, str_field(item, "sender"), &text, self.format());
            }
        }
        Ok(messages)
    }
}

/// Google Takeout activity (Gemini Apps): `title` prompt plus `safeHtmlItem` reply.
/// Takeout lists newest activity first; messages are emitted oldest first.
pub struct TakeoutParser;

impl ChatParser for TakeoutParser {
    fn format(&self) -> ChatFormat {
        ChatFormat::Takeout
    }

    fn sniff(&self, source: &SourceFile) -> bool {
        source.prefix_contains_all(&["\"safeHtmlItem\"", "\"title\""])
    }

    fn parse(&self, source: &SourceFile) -> SearchResult<Vec<ChatMessage>> {
        let doc = document(source)?;
        let Some(items) = doc.as_array() else {
            return Err(SearchError::not_recognized(source.path()));
        };

        let mut messages = Vec::new();
        for item in items.iter().rev() {
            let timestamp = from_json(&item["time"]);
            let title = str_field(item, "title");
            let prompt = title.strip_prefix("Prompted ").unwrap_or(title);
            push(&mut messages, timestamp.clone(), "user", prompt, self.format());

            let responder = match str_field(item, "header") {
                "" => "assistant",
                header => header,
            };
            if let Some(replies) = item.get("safeHtmlItem").and_then(Value::as_array) {
                for reply in replies {
                    let text = tidy_text(&strip_tags(str_field(reply, "html")));
                    push(&mut messages, timestamp.clone(), responder, &text, self.format());
                }
            }
        }
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::Path;

    fn source(name: &str, value: Value) -> SourceFile {
        SourceFile::from_bytes(Path::new(name), serde_json::to_vec(&value).unwrap())
    }

    fn texts(messages: &[ChatMessage]) -> Vec<&str> {
        messages.iter().map(|m| m.text.as_str()).collect()
    }

    #[test]
    fn test_gemini_cli_session() {
        let file = source(
            "session.json",
            json!({
                "sessionId": "abc",
                "projectHash": "def",
                "messages": [
                    {"type": "user", "content": "explain lifetimes", "timestamp": "2025-01-01T10:00:00Z"},
                    {"type": "info", "content": "tool output"},
                    {"type": "gemini", "content": [{"text": "A lifetime is"}, {"text": "a scope"}]}
                ]
            }),
        );
        assert!(GeminiCliParser.sniff(&file));
        let messages = GeminiCliParser.parse(&file).unwrap();
        assert_eq!(texts(&messages), vec!["explain lifetimes", "A lifetime is\na scope"]);
        assert_eq!(messages[0].sender, "user");
        assert_eq!(messages[0].timestamp, "2025-01-01T10:00:00Z");
        assert_eq!(messages[1].sender, "gemini");
    }

    #[test]
    fn test_gemini_cli_needs_session_and_project() {
        let api_dump = source(
            "dump.json",
            json!({
                "sessionId": "abc",
                "messages": [{"role": "user", "content": "hi"}]
            }),
        );
        assert!(!GeminiCliParser.sniff(&api_dump));

        let no_session = source(
            "dump.json",
            json!({
                "projectHash": "def",
                "messages": [{"role": "user", "content": "hi"}]
            }),
        );
        assert!(!GeminiCliParser.sniff(&no_session));
    }

    #[test]
    fn test_chatgpt_tree_walk_follows_child_order() {
        let file = source(
            "conversations.json",
            json!([{
                "title": "t",
                "mapping": {
                    "root": {"id": "root", "parent": null, "children": ["a"], "message": null},
                    "a": {"id": "a", "parent": "root", "children": ["c", "b"], "message": {
                        "author": {"role": "user"}, "create_time": 1700000000.0,
                        "content": {"content_type": "text", "parts": ["question"]}}},
                    "b": {"id": "b", "parent": "a", "children": [], "message": {
                        "author": {"role": "assistant"}, "create_time": 1700000002.0,
                        "content": {"content_type": "text", "parts": ["second branch"]}}},
                    "c": {"id": "c", "parent": "a", "children": ["d"], "message": {
                        "author": {"role": "assistant"}, "create_time": 1700000001.0,
                        "content": {"content_type": "text", "parts": ["first branch"]}}},
                    "d": {"id": "d", "parent": "c", "children": [], "message": {
                        "author": {"role": "system"}, "create_time": null,
                        "content": {"content_type": "text", "parts": ["hidden"]}}}
                }
            }]),
        );
        assert!(ChatGptParser.sniff(&file));
        assert!(!DeepSeekParser.sniff(&file));
        let messages = ChatGptParser.parse(&file).unwrap();
        assert_eq!(texts(&messages), vec!["question", "first branch", "second branch"]);
        assert_eq!(messages[0].timestamp, "2023-11-14T22:13:20Z");
    }

    #[test]
    fn test_chatgpt_deep_tree_does_not_overflow() {
        let mut mapping = serde_json::Map::new();
        let depth = 20_000;
        for i in 0..depth {
            let children = if i + 1 < depth { vec![format!("n{}", i + 1)] } else { vec![] };
            let parent = if i == 0 { Value::Null } else { json!(format!("n{}", i - 1)) };
            mapping.insert(
                format!("n{i}"),
                json!({"parent": parent, "children": children, "message": {
                    "author": {"role": "user"}, "create_time": 1.0,
                    "content": {"parts": [format!("m{i}")]}}}),
            );
        }
        let file = source("deep.json", json!({"mapping": mapping}));
        let messages = ChatGptParser.parse(&file).unwrap();
        assert_eq!(messages.len(), depth);
        assert_eq!(messages.last().unwrap().text, format!("m{}", depth - 1));
    }

    #[test]
    fn test_deepseek_drops_reasoning() {
        let file = source(
            "deepseek.json",
            json!([{
                "mapping": {
                    "root": {"id": "root", "parent": null, "children": ["1"], "message": null},
                    "1": {"id": "1", "parent": "root", "children": [], "message": {
                        "inserted_at": "2025-02-01T09:00:00+00:00",
                        "fragments": [
                            {"type": "REQUEST", "content": "hi there"},
                            {"type": "THINK", "content": "internal"},
                            {"type": "RESPONSE", "content": "hello"}
                        ]}}
                }
            }]),
        );
        assert!(DeepSeekParser.sniff(&file));
        assert!(!ChatGptParser.sniff(&file));
        let messages = DeepSeekParser.parse(&file).unwrap();
        assert_eq!(texts(&messages), vec!["hi there", "hello"]);
        assert_eq!(messages[1].sender, "assistant");
    }

    #[test]
    fn test_grok_export() {
        let file = source(
            "grok.json",
            json!({"conversations": [{
                "conversation": {"title": "x"},
                "responses": [
                    {"response": {"message": "ping", "sender": "human",
                        "create_time": {"$date": {"$numberLong": "1700000000000"}}}},
                    {"response": {"message": "pong", "sender": "ASSISTANT"}}
                ]
            }]}),
        );
        assert!(GrokParser.sniff(&file));
        let messages = GrokParser.parse(&file).unwrap();
        assert_eq!(texts(&messages), vec!["ping", "pong"]);
        assert_eq!(messages[0].timestamp, "2023-11-14T22:13:20Z");
        assert_eq!(messages[1].sender, "assistant");
    }

    #[test]
    fn test_claude_export() {
        let file = source(
            "claude.json",
            json!([{"name": "c", "chat_messages": [
                {"sender": "human", "text": "draft a haiku", "created_at": "2024-06-01T12:00:00Z"},
                {"sender": "assistant", "text": "", "content": [{"type": "text", "text": "autumn moonlight"}]}
            ]}]),
        );
        let messages = ClaudeExportParser.parse(&file).unwrap();
        assert_eq!(texts(&messages), vec!["draft a haiku", "autumn moonlight"]);
    }

    #[test]
    fn test_takeout_is_reordered_oldest_first() {
        let file = source(
            "MyActivity.json",
            json!([
                {"header": "Gemini Apps", "title": "Prompted second question", "time": "2024-01-02T00:00:00Z",
                 "safeHtmlItem": [{"html": "<p>second <b>answer</b></p>"}]},
                {"header": "Gemini Apps", "title": "Prompted first question", "time": "2024-01-01T00:00:00Z",
                 "safeHtmlItem": [{"html": "<p>first&nbsp;answer</p>"}]}
            ]),
        );
        assert!(TakeoutParser.sniff(&file));
        let messages = TakeoutParser.parse(&file).unwrap();
        assert_eq!(
            texts(&messages),
            vec!["first question", "first answer", "second question", "second answer"]
        );
        assert_eq!(messages[1].sender, "Gemini Apps");
    }

    #[test]
    fn test_wrong_shape_is_not_recognized() {
        let file = source("other.json", json!({"hello": "world"}));
        assert!(GrokParser.parse(&file).is_err());
        assert!(ChatGptParser.parse(&file).unwrap().is_empty());

        let broken = SourceFile::from_bytes(Path::new("broken.json"), b"{not json".to_vec());
        assert!(GeminiCliParser.parse(&broken).is_err());
    }
}
