//! The protocol-neutral event model.
//!
//! Connectors produce [`CommonEvent`]s with raw platform identifiers; every
//! protocol instance encodes the same event into its own wire format.

use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::segment::Message;

// ============================================================================
// Event Type
// ============================================================================

/// Top-level event category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Private, group and channel messages.
    Message,
    /// Group changes, recalls, friend adds, ...
    Notice,
    /// Friend and group join requests.
    Request,
    /// Lifecycle and heartbeat.
    #[serde(rename = "meta_event")]
    Meta,
}

impl EventType {
    /// Wire name as used in the `post_type` field.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Message => "message",
            EventType::Notice => "notice",
            EventType::Request => "request",
            EventType::Meta => "meta_event",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "message" => EventType::Message,
            "notice" => EventType::Notice,
            "request" => EventType::Request,
            "meta" | "meta_event" => EventType::Meta,
            _ => return Err(()),
        })
    }
}

// ============================================================================
// Message Events
// ============================================================================

/// Where a message was sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageScene {
    /// One-to-one chat.
    Private,
    /// Group chat.
    Group,
    /// A channel inside a guild.
    Channel,
    /// Guild direct message.
    Direct,
}

impl MessageScene {
    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageScene::Private => "private",
            MessageScene::Group => "group",
            MessageScene::Channel => "channel",
            MessageScene::Direct => "direct",
        }
    }
}

/// The author of a message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Sender {
    /// Raw platform user id.
    pub user_id: String,
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    /// Group card / alias.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card: Option<String>,
    /// `owner`, `admin` or `member`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl Sender {
    /// A sender known only by id.
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Self::default()
        }
    }

    /// Sets the nickname.
    pub fn nickname(mut self, nickname: impl Into<String>) -> Self {
        self.nickname = Some(nickname.into());
        self
    }
}

/// A group reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupRef {
    /// Raw platform group id.
    pub group_id: String,
    /// Group name, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
}

/// A received message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEvent {
    /// Scene the message was sent in.
    pub message_type: MessageScene,
    /// Protocol-specific refinement (`friend`, `normal`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_type: Option<String>,
    /// Raw platform message id.
    pub message_id: String,
    /// Author.
    pub sender: Sender,
    /// Group, for group messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<GroupRef>,
    /// Guild, for channel and direct messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guild_id: Option<String>,
    /// Channel, for channel messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    /// Content.
    pub message: Message,
}

impl MessageEvent {
    /// A private message.
    pub fn private(
        message_id: impl Into<String>,
        sender: Sender,
        message: impl Into<Message>,
    ) -> Self {
        Self {
            message_type: MessageScene::Private,
            sub_type: None,
            message_id: message_id.into(),
            sender,
            group: None,
            guild_id: None,
            channel_id: None,
            message: message.into(),
        }
    }

    /// A group message.
    pub fn group(
        message_id: impl Into<String>,
        group_id: impl Into<String>,
        sender: Sender,
        message: impl Into<Message>,
    ) -> Self {
        Self {
            message_type: MessageScene::Group,
            group: Some(GroupRef {
                group_id: group_id.into(),
                group_name: None,
            }),
            ..Self::private(message_id, sender, message)
        }
    }

    /// Author id.
    pub fn user_id(&self) -> &str {
        &self.sender.user_id
    }

    /// Group id, for group messages.
    pub fn group_id(&self) -> Option<&str> {
        self.group.as_ref().map(|g| g.group_id.as_str())
    }
}

// ============================================================================
// Notice / Request / Meta
// ============================================================================

/// A notice (group change, recall, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoticeEvent {
    /// Notice category (`group_increase`, `friend_recall`, ...).
    pub notice_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    /// Category-specific fields (`message_id`, `duration`, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A request awaiting approval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEvent {
    /// `friend` or `group`.
    pub request_type: String,
    /// `add` or `invite` for group requests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_type: Option<String>,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    /// Opaque handle passed back when answering the request.
    pub flag: String,
}

/// Lifecycle and heartbeat events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaEvent {
    /// `lifecycle` or `heartbeat`.
    pub meta_event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_type: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Event payload by category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "post_type", rename_all = "snake_case")]
pub enum EventKind {
    Message(MessageEvent),
    Notice(NoticeEvent),
    Request(RequestEvent),
    #[serde(rename = "meta_event")]
    Meta(MetaEvent),
}

// ============================================================================
// Common Event
// ============================================================================

/// A platform event in protocol-neutral form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommonEvent {
    /// Unique event id.
    pub id: String,
    /// Unix timestamp in seconds.
    pub time: i64,
    /// Platform name (`qq`, `discord`, ...).
    pub platform: String,
    /// Raw id of the account that observed the event.
    pub bot_id: String,
    #[serde(flatten)]
    pub kind: EventKind,
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

impl CommonEvent {
    /// Wraps `kind` with a fresh id and the current time.
    pub fn new(platform: impl Into<String>, bot_id: impl Into<String>, kind: EventKind) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            time: unix_now(),
            platform: platform.into(),
            bot_id: bot_id.into(),
            kind,
        }
    }

    /// A message event.
    pub fn message(
        platform: impl Into<String>,
        bot_id: impl Into<String>,
        message: MessageEvent,
    ) -> Self {
        Self::new(platform, bot_id, EventKind::Message(message))
    }

    /// A lifecycle meta event (`connect`, `enable`, `disable`).
    pub fn lifecycle(
        platform: impl Into<String>,
        bot_id: impl Into<String>,
        sub_type: &str,
    ) -> Self {
        Self::new(
            platform,
            bot_id,
            EventKind::Meta(MetaEvent {
                meta_event_type: "lifecycle".into(),
                sub_type: Some(sub_type.into()),
                extra: Map::new(),
            }),
        )
    }

    /// A heartbeat meta event.
    pub fn heartbeat(
        platform: impl Into<String>,
        bot_id: impl Into<String>,
        interval_ms: u64,
        online: bool,
    ) -> Self {
        let mut extra = Map::new();
        extra.insert("interval".into(), json!(interval_ms));
        extra.insert("status".into(), json!({ "online": online, "good": online }));
        Self::new(
            platform,
            bot_id,
            EventKind::Meta(MetaEvent {
                meta_event_type: "heartbeat".into(),
                sub_type: None,
                extra,
            }),
        )
    }

    /// Event category.
    pub fn event_type(&self) -> EventType {
        match self.kind {
            EventKind::Message(_) => EventType::Message,
            EventKind::Notice(_) => EventType::Notice,
            EventKind::Request(_) => EventType::Request,
            EventKind::Meta(_) => EventType::Meta,
        }
    }

    /// The message payload, for message events.
    pub fn as_message(&self) -> Option<&MessageEvent> {
        match &self.kind {
            EventKind::Message(m) => Some(m),
            _ => None,
        }
    }

    /// Returns `true` for meta events (never subject to quick operations).
    pub fn is_meta(&self) -> bool {
        matches!(self.kind, EventKind::Meta(_))
    }

    /// Flat JSON view used for filter evaluation.
    ///
    /// Canonical field names with raw ids. Message events additionally expose
    /// `user_id`, `group_id` and `raw_message` at the top level.
    pub fn to_filter_view(&self) -> Value {
        let mut view = serde_json::to_value(self).unwrap_or_default();
        if let (EventKind::Message(message), Value::Object(map)) = (&self.kind, &mut view) {
            map.insert("user_id".into(), Value::String(message.sender.user_id.clone()));
            if let Some(group_id) = message.group_id() {
                map.insert("group_id".into(), Value::String(group_id.to_string()));
            }
            map.insert("raw_message".into(), Value::String(message.message.to_markup()));
        }
        view
    }
}
