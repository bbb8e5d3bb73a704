//! Engine event stream.
//!
//! Workers speak ripgrep's `--json` protocol: one JSON object per line,
//! `{"type": ..., "data": {...}}`. Paths and line text arrive either as
//! `{"text": "..."}` or, for non-UTF-8 data, as `{"bytes": "<base64>"}`.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;
use tracing::trace;

use crate::errors::SearchResult;

/// Text or base64 bytes as found in the event payloads
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Data {
    Text { text: String },
    Bytes { bytes: String },
}

impl Data {
    fn into_string(self) -> String {
        match self {
            Data::Text { text } => text,
            Data::Bytes { bytes } => match STANDARD.decode(bytes.as_bytes()) {
                Ok(raw) => String::from_utf8_lossy(&raw).into_owned(),
                Err(_) => bytes,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Deserialize)]
struct PathData {
    path: Data,
}

#[derive(Debug, Deserialize)]
struct EndData {
    path: Data,
    #[serde(default)]
    binary_offset: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct LineData {
    path: Data,
    lines: Data,
    line_number: Option<u64>,
    #[serde(default)]
    submatches: Vec<RawSubmatch>,
}

#[derive(Debug, Deserialize)]
struct RawSubmatch {
    #[serde(rename = "match")]
    matched: Data,
    start: usize,
    end: usize,
}

/// A full line the engine reported, either as context or as a match line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextLine {
    pub path: PathBuf,
    pub line_number: u64,
    /// Line text without its terminator
    pub text: String,
}

/// One submatch. Offsets are byte offsets into the line text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchEvent {
    pub path: PathBuf,
    pub line_number: u64,
    pub byte_start: usize,
    pub byte_end: usize,
    pub matched_text: String,
}

/// Events the assembler consumes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    Begin {
        path: PathBuf,
    },
    Context(ContextLine),
    Match {
        line: ContextLine,
        submatches: Vec<MatchEvent>,
    },
    Binary {
        path: PathBuf,
    },
    End {
        path: PathBuf,
        binary_offset: Option<u64>,
    },
}

impl EngineEvent {
    pub fn path(&self) -> &PathBuf {
        match self {
            EngineEvent::Begin { path }
            | EngineEvent::Binary { path }
            | EngineEvent::End { path, .. } => path,
            EngineEvent::Context(line) | EngineEvent::Match { line, .. } => &line.path,
        }
    }
}

fn trim_terminator(mut text: String) -> String {
    while text.ends_with('\n') || text.ends_with('\r') {
        text.pop();
    }
    text
}

fn line_event(data: Value) -> SearchResult<(ContextLine, Vec<RawSubmatch>)> {
    let data: LineData = serde_json::from_value(data)?;
    let line = ContextLine {
        path: PathBuf::from(data.path.into_string()),
        line_number: data.line_number.unwrap_or(0),
        text: trim_terminator(data.lines.into_string()),
    };
    Ok((line, data.submatches))
}

/// Parses one line of engine output. Blank lines, summaries and unknown
/// event types yield `Ok(None)`; malformed JSON is an error.
pub fn parse_event(line: &str) -> SearchResult<Option<EngineEvent>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let raw: RawEvent = serde_json::from_str(line)?;
    let event = match raw.kind.as_str() {
        "begin" => {
            let data: PathData = serde_json::from_value(raw.data)?;
            EngineEvent::Begin {
                path: PathBuf::from(data.path.into_string()),
            }
        }
        "binary" => {
            let data: PathData = serde_json::from_value(raw.data)?;
            EngineEvent::Binary {
                path: PathBuf::from(data.path.into_string()),
            }
        }
        "end" => {
            let data: EndData = serde_json::from_value(raw.data)?;
            EngineEvent::End {
                path: PathBuf::from(data.path.into_string()),
                binary_offset: data.binary_offset,
            }
        }
        "context" => EngineEvent::Context(line_event(raw.data)?.0),
        "match" => {
            let (line, submatches) = line_event(raw.data)?;
            let submatches = submatches
                .into_iter()
                .map(|m| MatchEvent {
                    path: line.path.clone(),
                    line_number: line.line_number,
                    byte_start: m.start,
                    byte_end: m.end,
                    matched_text: m.matched.into_string(),
                })
                .collect();
            EngineEvent::Match { line, submatches }
        }
        other => {
            trace!("Ignoring engine event of type {}", other);
            return Ok(None);
        }
    };
    Ok(Some(event))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_match_event() {
        let line = r#"{"type":"match","data":{"path":{"text":"notes.txt"},"lines":{"text":"say hello world\n"},"line_number":3,"absolute_offset":40,"submatches":[{"match":{"text":"hello"},"start":4,"end":9}]}}"#;
        let event = parse_event(line).unwrap().unwrap();
        match event {
            EngineEvent::Match { line, submatches } => {
                assert_eq!(line.text, "say hello world");
                assert_eq!(line.line_number, 3);
                assert_eq!(submatches.len(), 1);
                assert_eq!(submatches[0].byte_start, 4);
                assert_eq!(submatches[0].byte_end, 9);
                assert_eq!(submatches[0].matched_text, "hello");
                assert_eq!(submatches[0].path, PathBuf::from("notes.txt"));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_parse_bytes_payloads() {
        // "caf\xe9" is not UTF-8, the path is "odd.txt"
        let line = r#"{"type":"context","data":{"path":{"bytes":"b2RkLnR4dA=="},"lines":{"bytes":"Y2Fm6Qo="},"line_number":1,"absolute_offset":0,"submatches":[]}}"#;
        let event = parse_event(line).unwrap().unwrap();
        match event {
            EngineEvent::Context(line) => {
                assert_eq!(line.path, PathBuf::from("odd.txt"));
                assert_eq!(line.text, "caf\u{fffd}");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_parse_boundaries() {
        let begin = parse_event(r#"{"type":"begin","data":{"path":{"text":"a.txt"}}}"#).unwrap();
        assert_eq!(
            begin,
            Some(EngineEvent::Begin {
                path: PathBuf::from("a.txt")
            })
        );

        let end = parse_event(
            r#"{"type":"end","data":{"path":{"text":"a.bin"},"binary_offset":12,"stats":{}}}"#,
        )
        .unwrap();
        assert_eq!(
            end,
            Some(EngineEvent::End {
                path: PathBuf::from("a.bin"),
                binary_offset: Some(12)
            })
        );
    }

    #[test]
    fn test_ignored_and_malformed_lines() {
        assert_eq!(parse_event("").unwrap(), None);
        assert_eq!(
            parse_event(r#"{"type":"summary","data":{"elapsed_total":{}}}"#).unwrap(),
            None
        );
        assert!(parse_event("{not json").is_err());
    }
}
