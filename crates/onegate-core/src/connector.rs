//! The platform connector interface.
//!
//! A connector is the gateway's view of one logged-in platform account. The
//! gateway never talks to a platform directly: protocol action handlers call
//! these methods with raw platform identifiers. Every method has a default
//! that reports [`ConnectorError::Unsupported`], so connectors only implement
//! what their platform can do.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{ConnectorError, ConnectorResult};
use crate::event::{MessageScene, Sender};
use crate::segment::Message;

/// Destination of an outgoing message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scene", rename_all = "snake_case")]
pub enum MessageTarget {
    Private { user_id: String },
    Group { group_id: String },
    Channel { guild_id: String, channel_id: String },
    Direct { guild_id: String, user_id: String },
}

impl MessageTarget {
    /// Scene of the target.
    pub fn scene(&self) -> MessageScene {
        match self {
            MessageTarget::Private { .. } => MessageScene::Private,
            MessageTarget::Group { .. } => MessageScene::Group,
            MessageTarget::Channel { .. } => MessageScene::Channel,
            MessageTarget::Direct { .. } => MessageScene::Direct,
        }
    }
}

/// Result of sending a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageReceipt {
    /// Raw platform message id.
    pub message_id: String,
    /// Send time (unix seconds), when the platform reports one.
    #[serde(default)]
    pub time: Option<i64>,
}

/// A stored message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageInfo {
    pub message_id: String,
    pub time: i64,
    pub scene: MessageScene,
    pub sender: Sender,
    #[serde(default)]
    pub group_id: Option<String>,
    pub message: Message,
}

/// Profile of the logged-in account or another user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserInfo {
    pub user_id: String,
    pub nickname: String,
    #[serde(default)]
    pub remark: Option<String>,
    #[serde(default)]
    pub sex: Option<String>,
    #[serde(default)]
    pub age: Option<i32>,
}

/// Group summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupInfo {
    pub group_id: String,
    pub group_name: String,
    #[serde(default)]
    pub member_count: Option<i64>,
    #[serde(default)]
    pub max_member_count: Option<i64>,
}

/// Group membership details.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupMemberInfo {
    pub group_id: String,
    pub user_id: String,
    pub nickname: String,
    #[serde(default)]
    pub card: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub join_time: Option<i64>,
}

/// Platform operations available to protocol action handlers.
///
/// All identifiers are raw platform ids; alias translation happens in the
/// protocol layer before these methods are called.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Platform name, e.g. `qq`.
    fn platform(&self) -> &str;

    /// Raw id of the logged-in account.
    fn self_id(&self) -> &str;

    /// Whether the platform session is currently usable.
    fn is_online(&self) -> bool {
        true
    }

    async fn send_message(
        &self,
        _target: MessageTarget,
        _message: Message,
    ) -> ConnectorResult<MessageReceipt> {
        Err(ConnectorError::Unsupported("send_message"))
    }

    async fn delete_message(&self, _message_id: &str) -> ConnectorResult<()> {
        Err(ConnectorError::Unsupported("delete_message"))
    }

    async fn get_message(&self, _message_id: &str) -> ConnectorResult<MessageInfo> {
        Err(ConnectorError::Unsupported("get_message"))
    }

    async fn get_self_info(&self) -> ConnectorResult<UserInfo> {
        Err(ConnectorError::Unsupported("get_self_info"))
    }

    async fn get_user(&self, _user_id: &str) -> ConnectorResult<UserInfo> {
        Err(ConnectorError::Unsupported("get_user"))
    }

    async fn list_friends(&self) -> ConnectorResult<Vec<UserInfo>> {
        Err(ConnectorError::Unsupported("list_friends"))
    }

    async fn get_group(&self, _group_id: &str) -> ConnectorResult<GroupInfo> {
        Err(ConnectorError::Unsupported("get_group"))
    }

    async fn list_groups(&self) -> ConnectorResult<Vec<GroupInfo>> {
        Err(ConnectorError::Unsupported("list_groups"))
    }

    async fn get_group_member(
        &self,
        _group_id: &str,
        _user_id: &str,
    ) -> ConnectorResult<GroupMemberInfo> {
        Err(ConnectorError::Unsupported("get_group_member"))
    }

    async fn list_group_members(&self, _group_id: &str) -> ConnectorResult<Vec<GroupMemberInfo>> {
        Err(ConnectorError::Unsupported("list_group_members"))
    }

    async fn set_group_name(&self, _group_id: &str, _name: &str) -> ConnectorResult<()> {
        Err(ConnectorError::Unsupported("set_group_name"))
    }

    async fn set_group_card(
        &self,
        _group_id: &str,
        _user_id: &str,
        _card: &str,
    ) -> ConnectorResult<()> {
        Err(ConnectorError::Unsupported("set_group_card"))
    }

    async fn set_group_admin(
        &self,
        _group_id: &str,
        _user_id: &str,
        _enable: bool,
    ) -> ConnectorResult<()> {
        Err(ConnectorError::Unsupported("set_group_admin"))
    }

    async fn kick_group_member(
        &self,
        _group_id: &str,
        _user_id: &str,
        _reject_add_request: bool,
    ) -> ConnectorResult<()> {
        Err(ConnectorError::Unsupported("kick_group_member"))
    }

    /// Mutes a member for `duration_secs` (`0` lifts the mute).
    async fn ban_group_member(
        &self,
        _group_id: &str,
        _user_id: &str,
        _duration_secs: u64,
    ) -> ConnectorResult<()> {
        Err(ConnectorError::Unsupported("ban_group_member"))
    }

    async fn leave_group(&self, _group_id: &str, _dismiss: bool) -> ConnectorResult<()> {
        Err(ConnectorError::Unsupported("leave_group"))
    }

    async fn handle_friend_request(
        &self,
        _flag: &str,
        _approve: bool,
        _remark: Option<&str>,
    ) -> ConnectorResult<()> {
        Err(ConnectorError::Unsupported("handle_friend_request"))
    }

    async fn handle_group_request(
        &self,
        _flag: &str,
        _approve: bool,
        _reason: Option<&str>,
    ) -> ConnectorResult<()> {
        Err(ConnectorError::Unsupported("handle_group_request"))
    }
}

/// Shared connector handle.
pub type BoxedConnector = Arc<dyn Connector>;
