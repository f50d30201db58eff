//! OneBot v11 event and segment encoding.
//!
//! v11 consumers expect integer ids. Raw platform ids are replaced by their
//! aliases on the way out and restored on the way in:
//!
//! | canonical              | v11                    |
//! |------------------------|------------------------|
//! | `at { user_id }`       | `at { qq }`            |
//! | `reply { message_id }` | `reply { id }`         |
//! | `user_id: "u_abc"`     | `user_id: 17`          |

use serde_json::{Map, Value, json};

use onegate_core::identity::{GROUP_NS, MESSAGE_NS, USER_NS};
use onegate_core::{
    CommonEvent, EventKind, IdentityMap, Message, MessageEvent, MessageFormat, MessageScene,
    Segment, to_inline_markup,
};

/// Fields carrying user ids.
pub(crate) const USER_FIELDS: &[&str] = &["user_id", "operator_id", "target_id"];

/// Reads an alias from a number or numeric string.
pub(crate) fn alias_of(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Converts a canonical segment to its v11 form.
pub fn encode_segment(segment: &Segment, ids: &IdentityMap) -> Segment {
    let mut data = segment.data.clone();
    match segment.kind.as_str() {
        "at" => {
            let qq = match data.remove("user_id") {
                Some(Value::String(raw)) if raw == "all" => Value::from("all"),
                Some(Value::String(raw)) => Value::from(ids.to_alias(USER_NS, &raw)),
                Some(other) => other,
                None => Value::from("all"),
            };
            data.insert("qq".into(), qq);
        }
        "reply" => {
            if let Some(Value::String(raw)) = data.remove("message_id") {
                data.insert("id".into(), Value::from(ids.to_alias(MESSAGE_NS, &raw)));
            }
        }
        _ => {}
    }
    Segment::new(segment.kind.clone(), data)
}

/// Converts a v11 segment back to canonical form.
pub fn decode_segment(segment: Segment, ids: &IdentityMap) -> Segment {
    let Segment { kind, mut data } = segment;
    match kind.as_str() {
        "at" => {
            if let Some(qq) = data.remove("qq") {
                let user_id = match &qq {
                    Value::String(s) if s == "all" => s.clone(),
                    other => match alias_of(other) {
                        Some(alias) => ids.resolve(USER_NS, alias),
                        None => other.as_str().unwrap_or_default().to_string(),
                    },
                };
                data.insert("user_id".into(), Value::String(user_id));
            }
        }
        "reply" => {
            if let Some(id) = data.remove("id") {
                let raw = match alias_of(&id) {
                    Some(alias) => ids.resolve(MESSAGE_NS, alias),
                    None => id.as_str().unwrap_or_default().to_string(),
                };
                data.insert("message_id".into(), Value::String(raw));
            }
        }
        _ => {}
    }
    Segment::new(kind, data)
}

pub fn encode_segments(segments: &[Segment], ids: &IdentityMap) -> Vec<Segment> {
    segments.iter().map(|s| encode_segment(s, ids)).collect()
}

pub fn decode_message(message: Message, ids: &IdentityMap) -> Message {
    message
        .into_segments()
        .into_iter()
        .map(|s| decode_segment(s, ids))
        .collect()
}

/// Renders v11 segments per the configured message format.
pub fn message_value(segments: &[Segment], format: MessageFormat) -> Value {
    match format {
        MessageFormat::Array => serde_json::to_value(segments).unwrap_or(Value::Array(Vec::new())),
        MessageFormat::String => Value::String(to_inline_markup(segments)),
    }
}

/// Replaces raw ids in a notice/request payload with aliases.
fn alias_fields(value: &mut Value, ids: &IdentityMap) {
    ids.rewrite_fields(value, USER_FIELDS, USER_NS);
    ids.rewrite_fields(value, &["group_id"], GROUP_NS);
    ids.rewrite_fields(value, &["message_id"], MESSAGE_NS);
}

fn encode_message_event(message: &MessageEvent, ids: &IdentityMap, format: MessageFormat) -> Value {
    let segments = encode_segments(message.message.segments(), ids);
    let (message_type, default_sub_type) = match message.message_type {
        MessageScene::Private => ("private", "friend"),
        MessageScene::Group => ("group", "normal"),
        MessageScene::Channel => ("guild", "channel"),
        MessageScene::Direct => ("private", "guild"),
    };
    let user_id = ids.to_alias(USER_NS, message.user_id());

    let mut sender = Map::new();
    sender.insert("user_id".into(), json!(user_id));
    sender.insert(
        "nickname".into(),
        json!(message.sender.nickname.clone().unwrap_or_default()),
    );
    if let Some(card) = &message.sender.card {
        sender.insert("card".into(), json!(card));
    }
    if let Some(role) = &message.sender.role {
        sender.insert("role".into(), json!(role));
    }

    let mut payload = json!({
        "post_type": "message",
        "message_type": message_type,
        "sub_type": message.sub_type.as_deref().unwrap_or(default_sub_type),
        "message_id": ids.to_alias(MESSAGE_NS, &message.message_id),
        "user_id": user_id,
        "message": message_value(&segments, format),
        "raw_message": to_inline_markup(&segments),
        "font": 0,
        "sender": sender,
    });
    if let Value::Object(map) = &mut payload {
        if let Some(group_id) = message.group_id() {
            map.insert("group_id".into(), json!(ids.to_alias(GROUP_NS, group_id)));
        }
        if let Some(guild_id) = &message.guild_id {
            map.insert("guild_id".into(), json!(guild_id));
        }
        if let Some(channel_id) = &message.channel_id {
            map.insert("channel_id".into(), json!(channel_id));
        }
    }
    payload
}

/// Encodes an event as a v11 payload.
pub fn encode_event(event: &CommonEvent, ids: &IdentityMap, format: MessageFormat) -> Option<Value> {
    let mut payload = match &event.kind {
        EventKind::Message(message) => encode_message_event(message, ids, format),
        kind => {
            let mut value = serde_json::to_value(kind).ok()?;
            alias_fields(&mut value, ids);
            value
        }
    };
    let map = payload.as_object_mut()?;
    map.insert("time".into(), json!(event.time));
    map.insert("self_id".into(), json!(ids.to_alias(USER_NS, &event.bot_id)));
    Some(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use onegate_core::{NoticeEvent, Sender};

    fn group_event() -> CommonEvent {
        let message = Message::new()
            .segment(Segment::reply("m_prev"))
            .at("u_bob")
            .text(" hi [there]");
        CommonEvent::message(
            "qq",
            "bot_1",
            MessageEvent::group("m_1", "g_1", Sender::new("u_alice").nickname("Alice"), message),
        )
    }

    #[test]
    fn test_message_event_uses_aliases() {
        let ids = IdentityMap::new();
        let payload = encode_event(&group_event(), &ids, MessageFormat::Array).unwrap();

        assert_eq!(payload["post_type"], "message");
        assert_eq!(payload["message_type"], "group");
        assert_eq!(payload["sub_type"], "normal");
        assert_eq!(payload["self_id"], json!(ids.to_alias(USER_NS, "bot_1")));
        assert_eq!(payload["user_id"], json!(ids.to_alias(USER_NS, "u_alice")));
        assert_eq!(payload["sender"]["user_id"], payload["user_id"]);
        assert_eq!(payload["group_id"], json!(ids.to_alias(GROUP_NS, "g_1")));
        assert_eq!(payload["message_id"], json!(ids.to_alias(MESSAGE_NS, "m_1")));

        let bob = ids.to_alias(USER_NS, "u_bob");
        assert_eq!(payload["message"][0]["type"], "reply");
        assert_eq!(
            payload["message"][0]["data"]["id"],
            json!(ids.to_alias(MESSAGE_NS, "m_prev"))
        );
        assert_eq!(payload["message"][1]["data"]["qq"], json!(bob));
        assert_eq!(
            payload["raw_message"],
            format!(
                "[CQ:reply,id={}][CQ:at,qq={bob}] hi &#91;there&#93;",
                ids.to_alias(MESSAGE_NS, "m_prev")
            )
        );
    }

    #[test]
    fn test_string_format() {
        let ids = IdentityMap::new();
        let payload = encode_event(&group_event(), &ids, MessageFormat::String).unwrap();
        assert_eq!(payload["message"], payload["raw_message"]);
    }

    #[test]
    fn test_notice_ids_are_aliased() {
        let ids = IdentityMap::new();
        let mut extra = Map::new();
        extra.insert("message_id".into(), json!("m_9"));
        let event = CommonEvent::new(
            "qq",
            "bot_1",
            EventKind::Notice(NoticeEvent {
                notice_type: "group_recall".into(),
                sub_type: None,
                user_id: Some("u_alice".into()),
                operator_id: Some("u_admin".into()),
                group_id: Some("g_1".into()),
                extra,
            }),
        );

        let payload = encode_event(&event, &ids, MessageFormat::Array).unwrap();
        assert_eq!(payload["post_type"], "notice");
        assert_eq!(payload["operator_id"], json!(ids.to_alias(USER_NS, "u_admin")));
        assert_eq!(payload["group_id"], json!(ids.to_alias(GROUP_NS, "g_1")));
        assert_eq!(payload["message_id"], json!(ids.to_alias(MESSAGE_NS, "m_9")));
    }

    #[test]
    fn test_heartbeat_payload() {
        let ids = IdentityMap::new();
        let event = CommonEvent::heartbeat("qq", "bot_1", 5000, true);
        let payload = encode_event(&event, &ids, MessageFormat::Array).unwrap();
        assert_eq!(payload["post_type"], "meta_event");
        assert_eq!(payload["meta_event_type"], "heartbeat");
        assert_eq!(payload["interval"], 5000);
        assert_eq!(payload["status"]["online"], true);
    }

    #[test]
    fn test_decode_restores_raw_ids() {
        let ids = IdentityMap::new();
        let alias = ids.to_alias(USER_NS, "u_bob");
        let inbound = Message::from_markup(&format!("[CQ:at,qq={alias}][CQ:at,qq=all] yo"));

        let decoded = decode_message(inbound, &ids);
        assert_eq!(decoded.mentions(), vec!["u_bob".to_string(), "all".to_string()]);
    }
}
