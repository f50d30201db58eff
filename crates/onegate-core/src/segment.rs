//! Message segments and the [`Message`] container.
//!
//! A segment is a typed fragment of a message: `{ "type": ..., "data": {...} }`.
//! Segment types are open; the constructors below cover the canonical kinds
//! every connector is expected to understand:
//!
//! | kind    | data                          |
//! |---------|-------------------------------|
//! | `text`  | `text`                        |
//! | `at`    | `user_id` (`"all"` for everyone) |
//! | `image` | `file`, optional `url`        |
//! | `reply` | `message_id`                  |
//! | `face`  | `id`                          |
//! | `record`, `video`, `file` | `file`      |
//!
//! Protocols rename kinds and fields on the way out (v12 `mention`, v11 `qq`).

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::markup::{parse_inline_markup, to_inline_markup};

/// A single message segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    /// Segment type (`text`, `at`, `image`, ...).
    #[serde(rename = "type")]
    pub kind: String,
    /// Type-specific parameters.
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl Segment {
    /// Creates a segment of an arbitrary kind.
    pub fn new(kind: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }

    /// Adds (or replaces) one data field.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// A plain text segment.
    pub fn text(text: impl Into<String>) -> Self {
        Self::new("text", Map::new()).with("text", text.into())
    }

    /// Mentions a user.
    pub fn at(user_id: impl Into<String>) -> Self {
        Self::new("at", Map::new()).with("user_id", user_id.into())
    }

    /// Mentions everyone.
    pub fn at_all() -> Self {
        Self::at("all")
    }

    /// An image, by file name, path or URL.
    pub fn image(file: impl Into<String>) -> Self {
        Self::new("image", Map::new()).with("file", file.into())
    }

    /// Quotes an earlier message.
    pub fn reply(message_id: impl Into<String>) -> Self {
        Self::new("reply", Map::new()).with("message_id", message_id.into())
    }

    /// A platform emoji.
    pub fn face(id: impl Into<String>) -> Self {
        Self::new("face", Map::new()).with("id", id.into())
    }

    /// A voice clip.
    pub fn record(file: impl Into<String>) -> Self {
        Self::new("record", Map::new()).with("file", file.into())
    }

    /// A video clip.
    pub fn video(file: impl Into<String>) -> Self {
        Self::new("video", Map::new()).with("file", file.into())
    }

    /// Returns `true` for `text` segments.
    pub fn is_text(&self) -> bool {
        self.kind == "text"
    }

    /// The text of a `text` segment.
    pub fn as_text(&self) -> Option<&str> {
        if self.is_text() {
            self.get_str("text")
        } else {
            None
        }
    }

    /// Raw data field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Data field as a string slice.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }

    /// Data field rendered as text, for ids that may arrive as numbers.
    pub fn get_string(&self, key: &str) -> Option<String> {
        match self.data.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind.as_str() {
            "text" => write!(f, "{}", self.as_text().unwrap_or_default()),
            "at" => match self.get_string("user_id").as_deref() {
                Some("all") => write!(f, "@all"),
                Some(id) => write!(f, "@{id}"),
                None => write!(f, "@"),
            },
            other => write!(f, "[{other}]"),
        }
    }
}

/// An ordered list of segments.
///
/// Serializes as an array. Deserializes from an array, a single segment
/// object, or an inline markup string.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message(Vec<Segment>);

impl Message {
    /// Creates an empty message.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses an inline markup string.
    pub fn from_markup(markup: &str) -> Self {
        Self(parse_inline_markup(markup))
    }

    /// A message holding one literal text segment (no markup parsing).
    pub fn from_text(text: impl Into<String>) -> Self {
        Self(vec![Segment::text(text)])
    }

    /// Accepts a string (markup), a single segment object or a segment array.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(Self::from_markup(s)),
            Value::Array(_) => serde_json::from_value(value.clone()).ok().map(Self),
            Value::Object(_) => serde_json::from_value(value.clone())
                .ok()
                .map(|segment| Self(vec![segment])),
            _ => None,
        }
    }

    /// Builder: appends text.
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.0.push(Segment::text(text));
        self
    }

    /// Builder: appends a mention.
    pub fn at(mut self, user_id: impl Into<String>) -> Self {
        self.0.push(Segment::at(user_id));
        self
    }

    /// Builder: appends an image.
    pub fn image(mut self, file: impl Into<String>) -> Self {
        self.0.push(Segment::image(file));
        self
    }

    /// Builder: appends a reply marker.
    pub fn reply(mut self, message_id: impl Into<String>) -> Self {
        self.0.push(Segment::reply(message_id));
        self
    }

    /// Builder: appends any segment.
    pub fn segment(mut self, segment: Segment) -> Self {
        self.0.push(segment);
        self
    }

    /// Appends a segment in place.
    pub fn push(&mut self, segment: Segment) -> &mut Self {
        self.0.push(segment);
        self
    }

    /// Inserts a segment at the front.
    pub fn prepend(&mut self, segment: Segment) -> &mut Self {
        self.0.insert(0, segment);
        self
    }

    /// The segments.
    pub fn segments(&self) -> &[Segment] {
        &self.0
    }

    /// Mutable access to the segments.
    pub fn segments_mut(&mut self) -> &mut Vec<Segment> {
        &mut self.0
    }

    /// Consumes the message.
    pub fn into_segments(self) -> Vec<Segment> {
        self.0
    }

    /// Number of segments.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if there are no segments.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates the segments.
    pub fn iter(&self) -> impl Iterator<Item = &Segment> {
        self.0.iter()
    }

    /// Concatenated text of all `text` segments.
    pub fn plain_text(&self) -> String {
        self.0.iter().filter_map(Segment::as_text).collect()
    }

    /// Renders the message as inline markup.
    pub fn to_markup(&self) -> String {
        to_inline_markup(&self.0)
    }

    /// The message id quoted by a `reply` segment, if any.
    pub fn reply_to(&self) -> Option<String> {
        self.0
            .iter()
            .find(|s| s.kind == "reply")
            .and_then(|s| s.get_string("message_id"))
    }

    /// User ids mentioned by `at` segments.
    pub fn mentions(&self) -> Vec<String> {
        self.0
            .iter()
            .filter(|s| s.kind == "at")
            .filter_map(|s| s.get_string("user_id"))
            .collect()
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.0 {
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

impl From<Vec<Segment>> for Message {
    fn from(segments: Vec<Segment>) -> Self {
        Self(segments)
    }
}

impl From<Segment> for Message {
    fn from(segment: Segment) -> Self {
        Self(vec![segment])
    }
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Self::from_text(text)
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Self::from_text(text)
    }
}

impl FromIterator<Segment> for Message {
    fn from_iter<I: IntoIterator<Item = Segment>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for Message {
    type Item = Segment;
    type IntoIter = std::vec::IntoIter<Segment>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Message {
    type Item = &'a Segment;
    type IntoIter = std::slice::Iter<'a, Segment>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl Serialize for Message {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Message {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum MessageFormat {
            Array(Vec<Segment>),
            Single(Segment),
            Markup(String),
        }

        match MessageFormat::deserialize(deserializer)? {
            MessageFormat::Array(segments) => Ok(Message(segments)),
            MessageFormat::Single(segment) => Ok(Message(vec![segment])),
            MessageFormat::Markup(markup) => Ok(Message::from_markup(&markup)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_segment_serialize() {
        let text = Segment::text("Hello");
        let json = serde_json::to_string(&text).unwrap();
        assert_eq!(json, r#"{"type":"text","data":{"text":"Hello"}}"#);

        let at = Segment::at("10001000");
        let json = serde_json::to_string(&at).unwrap();
        assert_eq!(json, r#"{"type":"at","data":{"user_id":"10001000"}}"#);
    }

    #[test]
    fn test_segment_deserialize_without_data() {
        let segment: Segment = serde_json::from_str(r#"{"type":"shake"}"#).unwrap();
        assert_eq!(segment.kind, "shake");
        assert!(segment.data.is_empty());
    }

    #[test]
    fn test_message_accepts_all_shapes() {
        let from_array: Message =
            serde_json::from_value(json!([{"type": "text", "data": {"text": "hi"}}])).unwrap();
        let from_object: Message =
            serde_json::from_value(json!({"type": "text", "data": {"text": "hi"}})).unwrap();
        let from_markup: Message = serde_json::from_value(json!("hi")).unwrap();

        assert_eq!(from_array, from_object);
        assert_eq!(from_array, from_markup);
        assert!(Message::from_value(&json!(5)).is_none());
    }

    #[test]
    fn test_builder_and_helpers() {
        let message = Message::new()
            .reply("m1")
            .at("u1")
            .text(" hello ")
            .image("a.png")
            .text("world");

        assert_eq!(message.len(), 5);
        assert_eq!(message.plain_text(), " hello world");
        assert_eq!(message.reply_to().as_deref(), Some("m1"));
        assert_eq!(message.mentions(), vec!["u1".to_string()]);
        assert_eq!(message.to_string(), "[reply]@u1 hello [image]world");
    }

    #[test]
    fn test_from_text_does_not_parse_markup() {
        let message = Message::from_text("[CQ:face,id=1]");
        assert_eq!(message.len(), 1);
        assert_eq!(message.plain_text(), "[CQ:face,id=1]");
        assert_eq!(message.to_markup(), "&#91;CQ:face,id=1&#93;");
    }
}
