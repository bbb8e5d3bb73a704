use once_cell::sync::Lazy;
use quick_xml::escape::resolve_html5_entity;
use quick_xml::events::{BytesStart, BytesText, Event};
use quick_xml::Reader;
use regex::Regex;
use tracing::debug;

use super::timestamps::normalize;
use super::{tidy_text, ChatFormat, ChatMessage, ChatParser, SourceFile};
use crate::errors::SearchResult;

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];
const SKIPPED_ELEMENTS: &[&str] = &["script", "style", "head", "title"];
const BLOCK_ELEMENTS: &[&str] = &["div", "p", "li", "tr", "blockquote", "pre", "h1", "h2", "h3"];

static TELEGRAM_FILE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^messages\d*\.html?$").unwrap());
static MESSENGER_FILE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^message_\d+\.html?$").unwrap());
static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]*>").unwrap());

/// Export markup is rarely well-formed XML
fn lenient_reader(html: &str) -> Reader<&[u8]> {
    let mut reader = Reader::from_str(html);
    let config = reader.config_mut();
    config.trim_text(false);
    config.check_end_names = false;
    config.allow_unmatched_ends = true;
    config.check_comments = false;
    reader
}

fn element_name(name: &[u8]) -> String {
    String::from_utf8_lossy(name).to_ascii_lowercase()
}

fn attribute(e: &BytesStart, key: &str) -> Option<String> {
    e.html_attributes()
        .flatten()
        .find(|a| a.key.as_ref().eq_ignore_ascii_case(key.as_bytes()))
        .map(|a| String::from_utf8_lossy(&a.value).into_owned())
}

fn unescape(e: &BytesText) -> String {
    e.unescape_with(resolve_html5_entity)
        .map(|text| text.into_owned())
        .unwrap_or_else(|_| String::from_utf8_lossy(e).into_owned())
}

/// Reduces an HTML fragment to its text. Block boundaries become newlines.
pub fn strip_tags(html: &str) -> String {
    let mut reader = lenient_reader(html);
    let mut out = String::with_capacity(html.len());
    let mut skip_depth: Option<usize> = None;
    let mut depth = 0usize;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = element_name(e.name().as_ref());
                if name == "br" {
                    out.push('\n');
                } else if !VOID_ELEMENTS.contains(&name.as_str()) {
                    if skip_depth.is_none() && SKIPPED_ELEMENTS.contains(&name.as_str()) {
                        skip_depth = Some(depth);
                    }
                    depth += 1;
                }
            }
            Ok(Event::Empty(e)) => {
                if e.name().as_ref().eq_ignore_ascii_case(b"br") {
                    out.push('\n');
                }
            }
            Ok(Event::End(e)) => {
                let name = element_name(e.name().as_ref());
                if VOID_ELEMENTS.contains(&name.as_str()) {
                    continue;
                }
                depth = depth.saturating_sub(1);
                if skip_depth == Some(depth) {
                    skip_depth = None;
                } else if BLOCK_ELEMENTS.contains(&name.as_str()) {
                    out.push('\n');
                }
            }
            Ok(Event::Text(e)) if skip_depth.is_none() => out.push_str(&unescape(&e)),
            Ok(Event::Eof) => break,
            Err(e) => {
                debug!("Markup walk failed, falling back to tag stripping: {}", e);
                return TAG.replace_all(html, " ").into_owned();
            }
            _ => {}
        }
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Sender,
    Text,
    Timestamp,
}

/// Where one export flavor keeps its per-message pieces
struct Schema {
    format: ChatFormat,
    is_container: fn(&[&str]) -> bool,
    field: fn(&[&str]) -> Option<Field>,
    /// Attribute carrying the full timestamp on the timestamp element
    timestamp_attr: Option<&'static str>,
    /// A message without a sender continues the previous sender's run
    inherit_sender: bool,
}

#[derive(Default)]
struct Draft {
    sender: String,
    sender_done: bool,
    text: String,
    timestamp: String,
    timestamp_done: bool,
    media: Vec<&'static str>,
}

fn media_placeholder(name: &str, classes: &[&str]) -> Option<&'static str> {
    let has = |needle: &str| classes.iter().any(|c| c.contains(needle));
    if has("userpic") {
        None
    } else if name == "video" || has("video") {
        Some("[video]")
    } else if name == "img" || has("photo") {
        Some("[img]")
    } else if name == "audio" || (name == "a" && has("media")) {
        Some("[media]")
    } else {
        None
    }
}

/// Event-driven walk that tracks nesting depth to find where each message
/// container, and each labeled field inside it, opens and closes.
struct MessageWalker<'s> {
    schema: &'s Schema,
    depth: usize,
    container: Option<usize>,
    field: Option<(Field, usize)>,
    skip: Option<usize>,
    media: Option<usize>,
    draft: Draft,
    last_sender: String,
    messages: Vec<ChatMessage>,
}

impl<'s> MessageWalker<'s> {
    fn new(schema: &'s Schema) -> Self {
        Self {
            schema,
            depth: 0,
            container: None,
            field: None,
            skip: None,
            media: None,
            draft: Draft::default(),
            last_sender: String::new(),
            messages: Vec::new(),
        }
    }

    fn run(mut self, html: &str) -> Vec<ChatMessage> {
        let mut reader = lenient_reader(html);
        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => {
                    let name = element_name(e.name().as_ref());
                    let void = VOID_ELEMENTS.contains(&name.as_str());
                    self.open(&e, &name, void);
                    if !void {
                        self.depth += 1;
                    }
                }
                Ok(Event::Empty(e)) => {
                    let name = element_name(e.name().as_ref());
                    self.open(&e, &name, true);
                }
                Ok(Event::End(e)) => {
                    let name = element_name(e.name().as_ref());
                    if !VOID_ELEMENTS.contains(&name.as_str()) {
                        self.depth = self.depth.saturating_sub(1);
                        self.close(&name);
                    }
                }
                Ok(Event::Text(e)) => self.text(&unescape(&e)),
                Ok(Event::Eof) => break,
                Err(e) => {
                    debug!(
                        "Stopping {} markup walk at byte {}: {}",
                        self.schema.format,
                        reader.buffer_position(),
                        e
                    );
                    break;
                }
                _ => {}
            }
        }
        if self.container.is_some() {
            self.flush();
        }
        self.messages
    }

    /// `leaf` elements never produce a matching close event
    fn open(&mut self, e: &BytesStart, name: &str, leaf: bool) {
        if self.skip.is_some() {
            return;
        }
        if !leaf && SKIPPED_ELEMENTS.contains(&name) {
            self.skip = Some(self.depth);
            return;
        }

        let class = attribute(e, "class").unwrap_or_default();
        let classes: Vec<&str> = class.split_whitespace().collect();

        if self.container.is_none() {
            if !leaf && (self.schema.is_container)(&classes) {
                self.container = Some(self.depth);
                self.draft = Draft::default();
            }
            return;
        }

        if name == "br" {
            if self.in_field(Field::Text) {
                self.draft.text.push('\n');
            }
            return;
        }

        if self.media.is_none() {
            if let Some(placeholder) = media_placeholder(name, &classes) {
                if self.in_field(Field::Text) {
                    self.draft.text.push(' ');
                    self.draft.text.push_str(placeholder);
                    self.draft.text.push(' ');
                } else {
                    self.draft.media.push(placeholder);
                }
                if !leaf {
                    self.media = Some(self.depth);
                }
            }
        }

        if self.field.is_none() {
            if let Some(field) = (self.schema.field)(&classes) {
                if field == Field::Timestamp && !self.draft.timestamp_done {
                    if let Some(value) = self.schema.timestamp_attr.and_then(|key| attribute(e, key)) {
                        self.draft.timestamp = value;
                        self.draft.timestamp_done = true;
                    }
                }
                if !leaf {
                    self.field = Some((field, self.depth));
                }
            }
        }
    }

    fn close(&mut self, name: &str) {
        let depth = self.depth;
        if let Some(skip) = self.skip {
            if skip == depth {
                self.skip = None;
            }
            return;
        }
        if self.media == Some(depth) {
            self.media = None;
        }
        if let Some((field, opened)) = self.field {
            if opened == depth {
                self.field = None;
                match field {
                    Field::Sender => self.draft.sender_done = true,
                    Field::Timestamp => self.draft.timestamp_done = true,
                    Field::Text => {}
                }
            } else if field == Field::Text && BLOCK_ELEMENTS.contains(&name) {
                self.draft.text.push('\n');
            }
        }
        if self.container == Some(depth) {
            self.flush();
            self.container = None;
            self.field = None;
            self.media = None;
        }
    }

    fn text(&mut self, raw: &str) {
        if self.skip.is_some() || self.container.is_none() || self.media.is_some() {
            return;
        }
        let Some((field, _)) = self.field else {
            return;
        };
        let flat = raw.replace(['\n', '\r', '\t'], " ");
        match field {
            Field::Sender if !self.draft.sender_done => self.draft.sender.push_str(&flat),
            Field::Timestamp if !self.draft.timestamp_done => self.draft.timestamp.push_str(&flat),
            Field::Text => self.draft.text.push_str(&flat),
            _ => {}
        }
    }

    fn in_field(&self, wanted: Field) -> bool {
        matches!(self.field, Some((field, _)) if field == wanted)
    }

    fn flush(&mut self) {
        let draft = std::mem::take(&mut self.draft);
        let mut text = tidy_text(&draft.text);
        for placeholder in &draft.media {
            if !text.is_empty() {
                text.push(' ');
            }
            text.push_str(placeholder);
        }
        if text.is_empty() {
            return;
        }

        let mut sender = tidy_text(&draft.sender);
        if sender.is_empty() && self.schema.inherit_sender {
            sender = self.last_sender.clone();
        } else {
            self.last_sender = sender.clone();
        }
        let timestamp = normalize(&tidy_text(&draft.timestamp));
        self.messages
            .push(ChatMessage::new(timestamp, sender, text, self.schema.format));
    }
}

fn telegram_container(classes: &[&str]) -> bool {
    classes.contains(&"message") && classes.contains(&"default")
}

fn telegram_field(classes: &[&str]) -> Option<Field> {
    if classes.contains(&"from_name") {
        Some(Field::Sender)
    } else if classes.contains(&"date") {
        Some(Field::Timestamp)
    } else if classes.contains(&"text") {
        Some(Field::Text)
    } else {
        None
    }
}

fn messenger_container(classes: &[&str]) -> bool {
    classes.contains(&"uiBoxWhite") || classes.contains(&"_a6-g")
}

fn messenger_field(classes: &[&str]) -> Option<Field> {
    let any = |names: &[&str]| classes.iter().any(|c| names.contains(c));
    if any(&["_2lek", "_a6-h"]) {
        Some(Field::Sender)
    } else if any(&["_2lem", "_a6-o"]) {
        Some(Field::Timestamp)
    } else if any(&["_2let", "_a6-p"]) {
        Some(Field::Text)
    } else {
        None
    }
}

static TELEGRAM: Schema = Schema {
    format: ChatFormat::Telegram,
    is_container: telegram_container,
    field: telegram_field,
    timestamp_attr: Some("title"),
    inherit_sender: true,
};

static MESSENGER: Schema = Schema {
    format: ChatFormat::Messenger,
    is_container: messenger_container,
    field: messenger_field,
    timestamp_attr: None,
    inherit_sender: false,
};

/// Telegram Desktop HTML export (`messages.html`, `messages2.html`, ...)
pub struct TelegramParser;

impl ChatParser for TelegramParser {
    fn format(&self) -> ChatFormat {
        ChatFormat::Telegram
    }

    fn sniff(&self, source: &SourceFile) -> bool {
        TELEGRAM_FILE.is_match(source.file_name())
            || source.prefix_contains_all(&["class=\"message default"])
    }

    fn parse(&self, source: &SourceFile) -> SearchResult<Vec<ChatMessage>> {
        Ok(MessageWalker::new(&TELEGRAM).run(&source.text()?))
    }
}

/// Facebook / Instagram Messenger HTML export (`message_1.html`, ...).
/// Messages are kept in file order, which is newest first.
pub struct MessengerParser;

impl ChatParser for MessengerParser {
    fn format(&self) -> ChatFormat {
        ChatFormat::Messenger
    }

    fn sniff(&self, source: &SourceFile) -> bool {
        MESSENGER_FILE.is_match(source.file_name())
            || source.prefix_contains_all(&["uiBoxWhite"])
            || source.prefix_contains_all(&["_a6-g"])
    }

    fn parse(&self, source: &SourceFile) -> SearchResult<Vec<ChatMessage>> {
        Ok(MessageWalker::new(&MESSENGER).run(&source.text()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    const TELEGRAM_EXPORT: &str = r#"<!DOCTYPE html>
<html>
 <head><meta charset="utf-8"/><title>Exported Data</title>
  <style>.message { color: red }</style></head>
 <body>
  <div class="history">
   <div class="message service" id="message-1"><div class="body details">14 March 2023</div></div>
   <div class="message default clearfix" id="message1">
    <div class="pull_left userpic_wrap"><img class="userpic" src="pic.jpg"></div>
    <div class="body">
     <div class="pull_right date details" title="15.03.2023 14:22:05 UTC+03:00">14:22</div>
     <div class="from_name">Alice </div>
     <div class="text">Hello &amp; welcome<br>to the <b>group</b></div>
    </div>
   </div>
   <div class="message default clearfix joined" id="message2">
    <div class="body">
     <div class="pull_right date details" title="15.03.2023 14:23:00 UTC+03:00">14:23</div>
     <div class="media_wrap clearfix">
      <a class="photo_wrap clearfix pull_left" href="photos/photo_1.jpg"><img class="photo" src="photos/photo_1_thumb.jpg"></a>
     </div>
     <div class="text">look at this</div>
    </div>
   </div>
   <div class="message default clearfix" id="message3">
    <div class="body">
     <div class="pull_right date details" title="15.03.2023 14:25:00 UTC+03:00">14:25</div>
     <div class="from_name">Bob</div>
     <div class="media_wrap clearfix"><a class="media clearfix pull_left block_link media_voice_message" href="voice.ogg"><div class="title bold">Voice message</div></a></div>
    </div>
   </div>
  </div>
 </body>
</html>"#;

    const MESSENGER_EXPORT: &str = r#"<html><head><title>Chat</title></head><body>
<div class="_4t5n" role="main">
 <div class="pam _3-95 _2ph- _a6-g uiBoxWhite noborder">
  <div class="_3-96 _2pio _2lek _2lel">Carol</div>
  <div class="_3-96 _2let"><div><div></div><div>see you tomorrow</div><div></div></div></div>
  <div class="_3-94 _2lem">Jan 02, 2023 10:00:00 AM</div>
 </div>
 <div class="pam _3-95 _2ph- _a6-g uiBoxWhite noborder">
  <div class="_3-96 _2pio _2lek _2lel">Dan</div>
  <div class="_3-96 _2let"><div><div></div><div><video src="videos/clip.mp4"><a href="videos/clip.mp4">clip</a></video></div></div></div>
  <div class="_3-94 _2lem">Jan 02, 2023 09:58:10 AM</div>
 </div>
</div></body></html>"#;

    #[test]
    fn test_strip_tags() {
        assert_eq!(
            tidy_text(&strip_tags("<p>one &amp; two</p><script>var x = 1;</script><div>three<br/>four</div>")),
            "one & two\nthree\nfour"
        );
        assert_eq!(tidy_text(&strip_tags("plain text")), "plain text");
    }

    #[test]
    fn test_telegram_export() {
        let source = SourceFile::from_bytes(Path::new("messages.html"), TELEGRAM_EXPORT.as_bytes().to_vec());
        assert!(TelegramParser.sniff(&source));
        assert!(!MessengerParser.sniff(&source));

        let messages = TelegramParser.parse(&source).unwrap();
        assert_eq!(messages.len(), 3);

        assert_eq!(messages[0].sender, "Alice");
        assert_eq!(messages[0].timestamp, "2023-03-15T14:22:05+03:00");
        assert_eq!(messages[0].text, "Hello & welcome\nto the group");

        // joined messages inherit the previous sender
        assert_eq!(messages[1].sender, "Alice");
        assert_eq!(messages[1].text, "look at this [img]");

        assert_eq!(messages[2].sender, "Bob");
        assert_eq!(messages[2].text, "[media]");
    }

    #[test]
    fn test_messenger_export() {
        let source = SourceFile::from_bytes(Path::new("message_1.html"), MESSENGER_EXPORT.as_bytes().to_vec());
        assert!(MessengerParser.sniff(&source));
        assert!(!TelegramParser.sniff(&source));

        let messages = MessengerParser.parse(&source).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].sender, "Carol");
        assert_eq!(messages[0].text, "see you tomorrow");
        assert_eq!(messages[0].timestamp, "2023-01-02T10:00:00");
        assert_eq!(messages[1].sender, "Dan");
        assert_eq!(messages[1].text, "[video]");
    }

    #[test]
    fn test_unrelated_html_yields_nothing() {
        let source = SourceFile::from_bytes(
            Path::new("index.html"),
            b"<html><body><div class=\"text\">not a chat</div></body></html>".to_vec(),
        );
        assert!(!TelegramParser.sniff(&source));
        assert!(TelegramParser.parse(&source).unwrap().is_empty());
    }
}
