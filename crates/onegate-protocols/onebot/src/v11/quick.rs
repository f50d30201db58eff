//! OneBot v11 quick operations.
//!
//! A consumer may answer a pushed message or request event with an object
//! such as `{"reply": "pong", "at_sender": false}`. The operation is
//! translated here into ordinary v11 action calls, which the instance then
//! runs through its own dispatcher.

use serde_json::{Map, Value, json};

use onegate_core::{ActionRequest, Message, Segment};

use super::actions::DEFAULT_BAN_SECS;

fn field<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    map.get(key).filter(|v| !v.is_null())
}

fn flag(map: &Map<String, Value>, key: &str, default: bool) -> bool {
    match field(map, key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_i64().is_some_and(|n| n != 0),
        Some(Value::String(s)) => matches!(s.as_str(), "true" | "1"),
        _ => default,
    }
}

/// Builds the reply message, optionally mentioning the sender first.
fn reply_message(reply: &Value, auto_escape: bool, at_sender: Option<&Value>) -> Option<Value> {
    let mut message = match reply {
        Value::String(text) if auto_escape => Message::from_text(text.as_str()),
        other => Message::from_value(other)?,
    };
    if let Some(user_id) = at_sender {
        message.prepend(Segment::text(" "));
        message.prepend(Segment::new("at", Map::new()).with("qq", user_id.clone()));
    }
    serde_json::to_value(message).ok()
}

fn message_operations(context: &Map<String, Value>, op: &Map<String, Value>) -> Vec<ActionRequest> {
    let mut calls = Vec::new();
    let is_group = context.get("message_type").and_then(Value::as_str) == Some("group");
    let user_id = context.get("user_id").cloned().unwrap_or(Value::Null);
    let group_id = context.get("group_id").cloned().unwrap_or(Value::Null);

    if let Some(reply) = field(op, "reply") {
        let at_sender = (is_group && flag(op, "at_sender", true)).then_some(&user_id);
        if let Some(message) = reply_message(reply, flag(op, "auto_escape", false), at_sender) {
            let request = if is_group {
                ActionRequest::new(
                    "send_group_msg",
                    json!({ "group_id": group_id, "message": message }),
                )
            } else {
                ActionRequest::new(
                    "send_private_msg",
                    json!({ "user_id": user_id, "message": message }),
                )
            };
            calls.push(request);
        }
    }

    if flag(op, "delete", false) {
        if let Some(message_id) = context.get("message_id") {
            calls.push(ActionRequest::new(
                "delete_msg",
                json!({ "message_id": message_id }),
            ));
        }
    }

    if is_group && flag(op, "kick", false) {
        calls.push(ActionRequest::new(
            "set_group_kick",
            json!({ "group_id": group_id, "user_id": user_id }),
        ));
    }

    if is_group && flag(op, "ban", false) {
        let duration = field(op, "ban_duration")
            .and_then(Value::as_i64)
            .unwrap_or(DEFAULT_BAN_SECS);
        calls.push(ActionRequest::new(
            "set_group_ban",
            json!({ "group_id": group_id, "user_id": user_id, "duration": duration }),
        ));
    }

    calls
}

fn request_operations(context: &Map<String, Value>, op: &Map<String, Value>) -> Vec<ActionRequest> {
    let Some(approve) = field(op, "approve") else {
        return Vec::new();
    };
    let flag_value = context.get("flag").cloned().unwrap_or(Value::Null);
    match context.get("request_type").and_then(Value::as_str) {
        Some("friend") => {
            let mut params = json!({ "flag": flag_value, "approve": approve });
            if let (Some(remark), Value::Object(map)) = (field(op, "remark"), &mut params) {
                map.insert("remark".into(), remark.clone());
            }
            vec![ActionRequest::new("set_friend_add_request", params)]
        }
        Some("group") => {
            let mut params = json!({
                "flag": flag_value,
                "sub_type": context.get("sub_type").cloned().unwrap_or(Value::Null),
                "approve": approve,
            });
            if let (Some(reason), Value::Object(map)) = (field(op, "reason"), &mut params) {
                map.insert("reason".into(), reason.clone());
            }
            vec![ActionRequest::new("set_group_add_request", params)]
        }
        _ => Vec::new(),
    }
}

/// Translates a quick operation into v11 action calls.
///
/// `context` is the encoded event the consumer replied to.
pub fn translate(context: &Value, operation: &Value) -> Vec<ActionRequest> {
    let (Some(context), Some(op)) = (context.as_object(), operation.as_object()) else {
        return Vec::new();
    };
    match context.get("post_type").and_then(Value::as_str) {
        Some("message") => message_operations(context, op),
        Some("request") => request_operations(context, op),
        _ => Vec::new(),
    }
}
