use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};

use super::timestamps;
use super::{ChatFormat, ChatMessage, ChatParser, SourceFile};
use crate::errors::{SearchError, SearchResult};

const SQLITE_MAGIC: &[u8] = b"SQLite format 3\0";

const TEXT_COLUMNS: &[&str] = &["text", "body", "content", "message"];
const SENDER_COLUMNS: &[&str] = &["sender", "author", "from", "sender_name", "handle", "user", "name"];
const TIMESTAMP_COLUMNS: &[&str] = &["timestamp", "date", "time", "created_at", "sent_at", "ts"];

/// Column layout of a usable `messages` table
#[derive(Debug, PartialEq, Eq)]
struct Layout {
    text: String,
    sender: Option<String>,
    timestamp: Option<String>,
}

impl Layout {
    fn detect(conn: &Connection) -> SearchResult<Option<Self>> {
        let mut stmt = conn.prepare("SELECT name FROM pragma_table_info('messages')")?;
        let columns: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<_, _>>()?;

        let pick = |candidates: &[&str]| {
            candidates.iter().find_map(|wanted| {
                columns
                    .iter()
                    .find(|c| c.eq_ignore_ascii_case(wanted))
                    .cloned()
            })
        };

        let Some(text) = pick(TEXT_COLUMNS) else {
            return Ok(None);
        };
        let sender = pick(SENDER_COLUMNS);
        let timestamp = pick(TIMESTAMP_COLUMNS);
        if sender.is_none() && timestamp.is_none() {
            return Ok(None);
        }
        Ok(Some(Self {
            text,
            sender,
            timestamp,
        }))
    }

    fn query(&self) -> String {
        let column = |name: &Option<String>| {
            name.as_deref()
                .map_or_else(|| "''".to_string(), quote_identifier)
        };
        let order = self
            .timestamp
            .as_deref()
            .map_or_else(|| "rowid".to_string(), |ts| format!("{}, rowid", quote_identifier(ts)));
        format!(
            "SELECT {}, {}, {} FROM messages ORDER BY {}",
            column(&self.timestamp),
            column(&self.sender),
            quote_identifier(&self.text),
            order
        )
    }
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn open_read_only(source: &SourceFile) -> SearchResult<Connection> {
    Ok(Connection::open_with_flags(
        source.path(),
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?)
}

fn value_text(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => String::new(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => f.to_string(),
        ValueRef::Text(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        ValueRef::Blob(_) => "[media]".to_string(),
    }
}

fn value_timestamp(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Integer(i) => timestamps::from_epoch(i as f64).unwrap_or_else(|| i.to_string()),
        ValueRef::Real(f) => timestamps::from_epoch(f).unwrap_or_else(|| f.to_string()),
        other => timestamps::normalize(&value_text(other)),
    }
}

/// Message stores kept in SQLite: a `messages` table with a text column
/// plus a sender or timestamp column. Opened read-only.
pub struct SqliteParser;

impl ChatParser for SqliteParser {
    fn format(&self) -> ChatFormat {
        ChatFormat::Sqlite
    }

    fn sniff(&self, source: &SourceFile) -> bool {
        if !source.prefix().starts_with(SQLITE_MAGIC) {
            return false;
        }
        open_read_only(source)
            .and_then(|conn| Layout::detect(&conn))
            .is_ok_and(|layout| layout.is_some())
    }

    fn parse(&self, source: &SourceFile) -> SearchResult<Vec<ChatMessage>> {
        let conn = open_read_only(source)?;
        let layout = Layout::detect(&conn)?
            .ok_or_else(|| SearchError::not_recognized(source.path()))?;

        let mut stmt = conn.prepare(&layout.query())?;
        let mut rows = stmt.query([])?;
        let mut messages = Vec::new();
        while let Some(row) = rows.next()? {
            let text = value_text(row.get_ref(2)?);
            if text.trim().is_empty() {
                continue;
            }
            messages.push(ChatMessage::new(
                value_timestamp(row.get_ref(0)?),
                value_text(row.get_ref(1)?),
                text,
                self.format(),
            ));
        }
        Ok(messages)
    }
}
