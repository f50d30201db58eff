//! OneBot v12 event and segment encoding.
//!
//! v12 keeps raw string ids and nests the bot identity under `self`.
//! Segment kinds are renamed:
//!
//! | canonical              | v12                      |
//! |------------------------|--------------------------|
//! | `at { user_id }`       | `mention { user_id }`    |
//! | `at { user_id: all }`  | `mention_all {}`         |
//! | `image { file }`       | `image { file_id }`      |
//! | `record { file }`      | `voice { file_id }`      |
//! | `video { file }`       | `video { file_id }`      |

use serde_json::{Map, Value, json};

use onegate_core::{CommonEvent, EventKind, Message, MessageEvent, MessageScene, MetaEvent, Segment};

/// Implementation name reported in `connect` and `get_version`.
pub const IMPL_NAME: &str = "onegate";

fn rename_key(data: &mut Map<String, Value>, from: &str, to: &str) {
    if let Some(value) = data.remove(from) {
        data.insert(to.into(), value);
    }
}

/// Converts a canonical segment to its v12 form.
pub fn encode_segment(segment: &Segment) -> Segment {
    let mut data = segment.data.clone();
    let kind = match segment.kind.as_str() {
        "at" if segment.get_str("user_id") == Some("all") => {
            return Segment::new("mention_all", Map::new());
        }
        "at" => "mention",
        "image" | "video" => {
            rename_key(&mut data, "file", "file_id");
            segment.kind.as_str()
        }
        "record" => {
            rename_key(&mut data, "file", "file_id");
            "voice"
        }
        other => other,
    };
    Segment::new(kind, data)
}

/// Converts a v12 segment back to canonical form.
pub fn decode_segment(segment: Segment) -> Segment {
    let Segment { kind, mut data } = segment;
    let renamed = match kind.as_str() {
        "mention_all" => return Segment::at_all(),
        "mention" => Some("at"),
        "image" | "video" => {
            rename_key(&mut data, "file_id", "file");
            None
        }
        "voice" | "audio" => {
            rename_key(&mut data, "file_id", "file");
            Some("record")
        }
        _ => None,
    };
    Segment::new(renamed.map(str::to_string).unwrap_or(kind), data)
}

pub fn encode_message(message: &Message) -> Value {
    let segments: Vec<Segment> = message.iter().map(encode_segment).collect();
    serde_json::to_value(segments).unwrap_or(Value::Array(Vec::new()))
}

pub fn decode_message(message: Message) -> Message {
    message.into_iter().map(decode_segment).collect()
}

/// `detail_type` of a message scene.
pub fn detail_type(scene: MessageScene) -> &'static str {
    match scene {
        MessageScene::Private | MessageScene::Direct => "private",
        MessageScene::Group => "group",
        MessageScene::Channel => "channel",
    }
}

fn message_fields(message: &MessageEvent) -> Value {
    let mut fields = json!({
        "type": "message",
        "detail_type": detail_type(message.message_type),
        "sub_type": message.sub_type.clone().unwrap_or_default(),
        "message_id": message.message_id,
        "message": encode_message(&message.message),
        "alt_message": message.message.to_string(),
        "user_id": message.sender.user_id,
    });
    if let Value::Object(map) = &mut fields {
        if let Some(group_id) = message.group_id() {
            map.insert("group_id".into(), json!(group_id));
        }
        if let Some(guild_id) = &message.guild_id {
            map.insert("guild_id".into(), json!(guild_id));
        }
        if let Some(channel_id) = &message.channel_id {
            map.insert("channel_id".into(), json!(channel_id));
        }
    }
    fields
}

fn meta_fields(meta: &MetaEvent, event: &CommonEvent, online: bool) -> Value {
    match (meta.meta_event_type.as_str(), meta.sub_type.as_deref()) {
        ("lifecycle", Some("connect")) => json!({
            "type": "meta",
            "detail_type": "connect",
            "sub_type": "",
            "version": {
                "impl": IMPL_NAME,
                "version": env!("CARGO_PKG_VERSION"),
                "onebot_version": "12",
            },
        }),
        ("lifecycle", Some("enable")) => json!({
            "type": "meta",
            "detail_type": "status_update",
            "sub_type": "",
            "status": {
                "good": online,
                "bots": [{
                    "self": { "platform": event.platform, "user_id": event.bot_id },
                    "online": online,
                }],
            },
        }),
        ("heartbeat", _) => json!({
            "type": "meta",
            "detail_type": "heartbeat",
            "sub_type": "",
            "interval": meta.extra.get("interval").cloned().unwrap_or(Value::from(0)),
        }),
        (other, sub_type) => {
            let mut fields = json!({
                "type": "meta",
                "detail_type": other,
                "sub_type": sub_type.unwrap_or_default(),
            });
            if let Value::Object(map) = &mut fields {
                map.extend(meta.extra.clone());
            }
            fields
        }
    }
}

/// Encodes an event as a v12 payload.
///
/// `online` feeds the `status_update` event sent for `enable`.
pub fn encode_event(event: &CommonEvent, online: bool) -> Option<Value> {
    let mut payload = match &event.kind {
        EventKind::Message(message) => message_fields(message),
        EventKind::Notice(notice) => {
            let mut fields = json!({
                "type": "notice",
                "detail_type": notice.notice_type,
                "sub_type": notice.sub_type.clone().unwrap_or_default(),
            });
            let map = fields.as_object_mut()?;
            for (key, value) in [
                ("user_id", &notice.user_id),
                ("operator_id", &notice.operator_id),
                ("group_id", &notice.group_id),
            ] {
                if let Some(value) = value {
                    map.insert(key.into(), json!(value));
                }
            }
            map.extend(notice.extra.clone());
            fields
        }
        EventKind::Request(request) => {
            let mut fields = json!({
                "type": "request",
                "detail_type": request.request_type,
                "sub_type": request.sub_type.clone().unwrap_or_default(),
                "user_id": request.user_id,
                "message": request.comment.clone().unwrap_or_default(),
                "flag": request.flag,
            });
            if let (Some(group_id), Some(map)) = (&request.group_id, fields.as_object_mut()) {
                map.insert("group_id".into(), json!(group_id));
            }
            fields
        }
        EventKind::Meta(meta) => meta_fields(meta, event, online),
    };

    let map = payload.as_object_mut()?;
    map.insert("id".into(), json!(event.id));
    map.insert("time".into(), json!(event.time));
    if !event.is_meta() {
        map.insert(
            "self".into(),
            json!({ "platform": event.platform, "user_id": event.bot_id }),
        );
    }
    Some(payload)
}
