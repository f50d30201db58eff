//! Inline markup codec (`[CQ:type,key=value]`).
//!
//! Plain text is escaped so that it can never be mistaken for a tag; tag
//! parameter values additionally escape `,`. Unknown tag types are kept as
//! generic segments rather than folded into text.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::segment::Segment;

const TAG_OPEN: &str = "[CQ:";
const TAG_PATTERN: &str = r"\[CQ:([A-Za-z0-9_.\-]+)((?:,[^,\[\]]*)*)\]";

static TAG_REGEX: OnceLock<Option<Regex>> = OnceLock::new();

fn tag_regex() -> Option<&'static Regex> {
    TAG_REGEX
        .get_or_init(|| Regex::new(TAG_PATTERN).ok())
        .as_ref()
}

/// Parses an inline markup string into segments.
///
/// Every non-empty input yields at least one segment. Runs of plain text
/// between tags become unescaped `text` segments; a `[CQ:` that does not
/// start a well-formed tag is kept as literal text.
pub fn parse_inline_markup(input: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut pending = String::new();
    let mut last = 0;

    if let Some(re) = tag_regex() {
        for caps in re.captures_iter(input) {
            let (Some(whole), Some(kind)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            pending.push_str(&input[last..whole.start()]);
            last = whole.end();

            let params = caps.get(2).map_or("", |m| m.as_str());
            match parse_tag(kind.as_str(), params) {
                Some(segment) => {
                    flush_text(&mut segments, &mut pending);
                    segments.push(segment);
                }
                None => pending.push_str(whole.as_str()),
            }
        }
    }
    pending.push_str(&input[last..]);
    flush_text(&mut segments, &mut pending);

    segments
}

fn flush_text(segments: &mut Vec<Segment>, pending: &mut String) {
    if !pending.is_empty() {
        segments.push(Segment::text(unescape(pending)));
        pending.clear();
    }
}

/// Builds a segment from a matched tag; `params` is the `,key=value` tail.
fn parse_tag(kind: &str, params: &str) -> Option<Segment> {
    let mut data = Map::new();
    for part in params.split(',').skip(1) {
        if part.is_empty() {
            continue;
        }
        let (key, value) = part.split_once('=').unwrap_or((part, ""));
        if key.is_empty() {
            return None;
        }
        data.insert(key.to_string(), Value::String(unescape(value)));
    }
    Some(Segment::new(kind, data))
}

fn is_valid_kind(kind: &str) -> bool {
    !kind.is_empty()
        && kind
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

fn is_valid_key(key: &str) -> bool {
    !key.is_empty() && !key.contains([',', '=', '[', ']'])
}

/// Renders segments as an inline markup string.
///
/// Non-string parameter values are written as their JSON scalar text; `null`
/// parameters are skipped. A segment whose kind or keys cannot be expressed
/// as a tag is written as escaped text instead.
pub fn to_inline_markup(segments: &[Segment]) -> String {
    let mut out = String::new();
    for segment in segments {
        if let Some(text) = segment.as_text() {
            out.push_str(&escape_text(text));
            continue;
        }

        let mut tag = String::from(TAG_OPEN);
        tag.push_str(&segment.kind);
        let mut valid = is_valid_kind(&segment.kind);
        for (key, value) in &segment.data {
            let rendered = match value {
                Value::Null => continue,
                Value::String(s) => escape_value(s),
                other => escape_value(&other.to_string()),
            };
            valid &= is_valid_key(key);
            tag.push(',');
            tag.push_str(key);
            tag.push('=');
            tag.push_str(&rendered);
        }
        tag.push(']');

        if valid {
            out.push_str(&tag);
        } else {
            out.push_str(&escape_text(&tag));
        }
    }
    out
}

/// Escapes plain text: `&` → `&amp;`, `[` → `&#91;`, `]` → `&#93;`.
pub fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('[', "&#91;")
        .replace(']', "&#93;")
}

/// Escapes a tag parameter value; like [`escape_text`] plus `,` → `&#44;`.
pub fn escape_value(value: &str) -> String {
    escape_text(value).replace(',', "&#44;")
}

/// Reverses both escape forms. `&amp;` is decoded last.
pub fn unescape(text: &str) -> String {
    text.replace("&#91;", "[")
        .replace("&#93;", "]")
        .replace("&#44;", ",")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_text_and_tags() {
        let segments = parse_inline_markup("hi [CQ:at,user_id=42] there[CQ:face,id=178]");
        assert_eq!(segments.len(), 4);
        assert_eq!(segments[0].as_text(), Some("hi "));
        assert_eq!(segments[1].kind, "at");
        assert_eq!(segments[1].get_str("user_id"), Some("42"));
        assert_eq!(segments[2].as_text(), Some(" there"));
        assert_eq!(segments[3].kind, "face");
    }

    #[test]
    fn test_plain_input_is_single_text_segment() {
        let segments = parse_inline_markup("just words");
        assert_eq!(segments, vec![Segment::text("just words")]);
        assert!(parse_inline_markup("").is_empty());
    }

    #[test]
    fn test_unknown_tag_kept_as_generic_segment() {
        let segments = parse_inline_markup("[CQ:sparkle,level=9,mode]");
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].kind, "sparkle");
        assert_eq!(segments[0].get_str("level"), Some("9"));
        assert_eq!(segments[0].get_str("mode"), Some(""));
    }

    #[test]
    fn test_malformed_tag_is_literal_text() {
        let segments = parse_inline_markup("[CQ:at,user_id=1");
        assert_eq!(segments, vec![Segment::text("[CQ:at,user_id=1")]);

        let segments = parse_inline_markup("[CQ:a[CQ:face,id=1]");
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].as_text(), Some("[CQ:a"));
        assert_eq!(segments[1].kind, "face");
    }

    #[test]
    fn test_escaping() {
        assert_eq!(escape_text("Hello [World]"), "Hello &#91;World&#93;");
        assert_eq!(escape_text("A & B"), "A &amp; B");
        assert_eq!(escape_value("a,b"), "a&#44;b");
        assert_eq!(unescape("&#91;x&#93; &amp;&#44;"), "[x] &,");
        // `&amp;#91;` must decode to the literal text `&#91;`.
        assert_eq!(unescape("&amp;#91;"), "&#91;");
    }

    #[test]
    fn test_render_skips_null_and_stringifies_scalars() {
        let segment = Segment::new("poke", Map::new())
            .with("id", 3)
            .with("strong", true)
            .with("note", Value::Null);
        let markup = to_inline_markup(&[segment]);
        assert_eq!(markup, "[CQ:poke,id=3,strong=true]");
    }

    #[test]
    fn test_round_trip() {
        let messages = vec![
            vec![Segment::text("plain")],
            vec![Segment::text("a [b] & c, d")],
            vec![
                Segment::text("see "),
                Segment::image("https://example.com/a.png?x=1,2"),
                Segment::text(" ok"),
            ],
            vec![Segment::at("u_1"), Segment::text("[CQ:fake]")],
            vec![
                Segment::reply("m-9"),
                Segment::new("custom", Map::new()).with("payload", "[1,2]&x"),
            ],
        ];

        for segments in messages {
            let markup = to_inline_markup(&segments);
            assert_eq!(parse_inline_markup(&markup), segments, "markup: {markup}");
        }
    }

    #[test]
    fn test_non_string_values_render_as_json() {
        let segment = Segment::new("location", Map::new()).with("lat", json!(39.9));
        let parsed = parse_inline_markup(&to_inline_markup(&[segment]));
        assert_eq!(parsed[0].get_str("lat"), Some("39.9"));
    }

    #[test]
    fn test_inexpressible_segments_render_as_text() {
        let bad_key = Segment::new("custom", Map::new()).with("a,b", "1");
        let bad_kind = Segment::new("my kind", Map::new()).with("x", "1");
        let segments = [Segment::text("x "), bad_key, Segment::at("u_1"), bad_kind];

        let markup = to_inline_markup(&segments);
        let parsed = parse_inline_markup(&markup);
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[0].as_text(), Some("x [CQ:custom,a,b=1]"));
        assert_eq!(parsed[1], Segment::at("u_1"));
        assert_eq!(parsed[2].as_text(), Some("[CQ:my kind,x=1]"));
    }

    #[test]
    fn test_tag_with_empty_key_is_literal_text() {
        let segments = parse_inline_markup("a[CQ:face,=1]b");
        assert_eq!(segments, vec![Segment::text("a[CQ:face,=1]b")]);
    }
}
