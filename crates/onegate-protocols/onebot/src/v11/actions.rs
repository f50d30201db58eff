//! OneBot v11 action table.
//!
//! Handlers receive aliased ids from consumers and translate them back to
//! raw platform ids before calling the connector. Ids in results are aliased
//! again.

use std::future::Future;
use std::sync::Arc;

use serde_json::{Value, json};

use onegate_core::identity::{GROUP_NS, MESSAGE_NS, USER_NS};
use onegate_core::{
    ActionError, ActionResult, ActionTable, BoxedConnector, Coerce, ConnectorError, GroupInfo,
    GroupMemberInfo, IdentityMap, MessageFormat, MessageScene, MessageTarget, ParamSpec, Params, ProtocolContext,
    UserInfo,
};

use super::encode::{decode_message, encode_segments, message_value};

const GROUP_ID: ParamSpec = ParamSpec::required("group_id", Coerce::Integer);
const USER_ID: ParamSpec = ParamSpec::required("user_id", Coerce::Integer);
const MESSAGE_ID: ParamSpec = ParamSpec::required("message_id", Coerce::Integer);
const MESSAGE: ParamSpec = ParamSpec::required("message", Coerce::Message);
const AUTO_ESCAPE: ParamSpec = ParamSpec::optional("auto_escape", Coerce::Bool);
const FLAG: ParamSpec = ParamSpec::required("flag", Coerce::String);
const APPROVE: ParamSpec = ParamSpec::optional("approve", Coerce::Bool);

/// Default mute length for `set_group_ban`, in seconds.
pub const DEFAULT_BAN_SECS: i64 = 30 * 60;

/// Connector access for v11 handlers.
#[derive(Clone)]
pub(crate) struct Api {
    connector: BoxedConnector,
    ids: Arc<IdentityMap>,
    format: MessageFormat,
}

impl Api {
    pub(crate) fn new(ctx: &ProtocolContext) -> Self {
        Self {
            connector: Arc::clone(&ctx.connector),
            ids: Arc::clone(&ctx.identities),
            format: ctx.config.message_format,
        }
    }

    fn raw(&self, ns: &str, params: &Params, name: &str) -> ActionResult<String> {
        Ok(self.ids.resolve(ns, params.i64(name)?))
    }

    fn user_alias(&self, raw: &str) -> i64 {
        self.ids.to_alias(USER_NS, raw)
    }

    fn user_json(&self, user: &UserInfo) -> Value {
        json!({
            "user_id": self.user_alias(&user.user_id),
            "nickname": user.nickname,
            "remark": user.remark.clone().unwrap_or_default(),
            "sex": user.sex.clone().unwrap_or_else(|| "unknown".into()),
            "age": user.age.unwrap_or(0),
        })
    }

    fn group_json(&self, group: &GroupInfo) -> Value {
        json!({
            "group_id": self.ids.to_alias(GROUP_NS, &group.group_id),
            "group_name": group.group_name,
            "member_count": group.member_count.unwrap_or(0),
            "max_member_count": group.max_member_count.unwrap_or(0),
        })
    }

    fn member_json(&self, member: &GroupMemberInfo) -> Value {
        json!({
            "group_id": self.ids.to_alias(GROUP_NS, &member.group_id),
            "user_id": self.user_alias(&member.user_id),
            "nickname": member.nickname,
            "card": member.card.clone().unwrap_or_default(),
            "role": member.role.clone().unwrap_or_else(|| "member".into()),
            "title": member.title.clone().unwrap_or_default(),
            "join_time": member.join_time.unwrap_or(0),
        })
    }

    async fn send(&self, target: MessageTarget, params: &Params) -> ActionResult<Value> {
        let literal = params.bool_or("auto_escape", false);
        let message = decode_message(params.message("message", literal)?, &self.ids);
        if message.is_empty() {
            return Err(ActionError::bad_param("message", "message is empty"));
        }
        let receipt = self.connector.send_message(target, message).await?;
        Ok(json!({ "message_id": self.ids.to_alias(MESSAGE_NS, &receipt.message_id) }))
    }

    async fn send_private_msg(self, params: Params) -> ActionResult<Value> {
        let user_id = self.raw(USER_NS, &params, "user_id")?;
        self.send(MessageTarget::Private { user_id }, &params).await
    }

    async fn send_group_msg(self, params: Params) -> ActionResult<Value> {
        let group_id = self.raw(GROUP_NS, &params, "group_id")?;
        self.send(MessageTarget::Group { group_id }, &params).await
    }

    async fn delete_msg(self, params: Params) -> ActionResult<Value> {
        let message_id = self.raw(MESSAGE_NS, &params, "message_id")?;
        self.connector.delete_message(&message_id).await?;
        Ok(Value::Null)
    }

    async fn get_msg(self, params: Params) -> ActionResult<Value> {
        let message_id = self.raw(MESSAGE_NS, &params, "message_id")?;
        let info = self.connector.get_message(&message_id).await?;
        let alias = self.ids.to_alias(MESSAGE_NS, &info.message_id);
        let segments = encode_segments(info.message.segments(), &self.ids);
        let message_type = match info.scene {
            MessageScene::Group => "group",
            MessageScene::Channel => "guild",
            MessageScene::Private | MessageScene::Direct => "private",
        };
        let mut data = json!({
            "time": info.time,
            "message_type": message_type,
            "message_id": alias,
            "real_id": alias,
            "sender": {
                "user_id": self.user_alias(&info.sender.user_id),
                "nickname": info.sender.nickname.clone().unwrap_or_default(),
            },
            "message": message_value(&segments, self.format),
        });
        if let (Some(group_id), Value::Object(map)) = (&info.group_id, &mut data) {
            map.insert("group_id".into(), json!(self.ids.to_alias(GROUP_NS, group_id)));
        }
        Ok(data)
    }

    async fn get_login_info(self, _params: Params) -> ActionResult<Value> {
        let user = self.connector.get_self_info().await?;
        Ok(json!({
            "user_id": self.user_alias(&user.user_id),
            "nickname": user.nickname,
        }))
    }

    async fn get_stranger_info(self, params: Params) -> ActionResult<Value> {
        let user_id = self.raw(USER_NS, &params, "user_id")?;
        let user = self.connector.get_user(&user_id).await?;
        Ok(self.user_json(&user))
    }

    async fn get_friend_list(self, _params: Params) -> ActionResult<Value> {
        let friends = self.connector.list_friends().await?;
        Ok(friends.iter().map(|u| self.user_json(u)).collect())
    }

    async fn get_group_info(self, params: Params) -> ActionResult<Value> {
        let group_id = self.raw(GROUP_NS, &params, "group_id")?;
        let group = self.connector.get_group(&group_id).await?;
        Ok(self.group_json(&group))
    }

    async fn get_group_list(self, _params: Params) -> ActionResult<Value> {
        let groups = self.connector.list_groups().await?;
        Ok(groups.iter().map(|g| self.group_json(g)).collect())
    }

    async fn get_group_member_info(self, params: Params) -> ActionResult<Value> {
        let group_id = self.raw(GROUP_NS, &params, "group_id")?;
        let user_id = self.raw(USER_NS, &params, "user_id")?;
        let member = self.connector.get_group_member(&group_id, &user_id).await?;
        Ok(self.member_json(&member))
    }

    async fn get_group_member_list(self, params: Params) -> ActionResult<Value> {
        let group_id = self.raw(GROUP_NS, &params, "group_id")?;
        let members = self.connector.list_group_members(&group_id).await?;
        Ok(members.iter().map(|m| self.member_json(m)).collect())
    }

    async fn set_group_kick(self, params: Params) -> ActionResult<Value> {
        let group_id = self.raw(GROUP_NS, &params, "group_id")?;
        let user_id = self.raw(USER_NS, &params, "user_id")?;
        let reject = params.bool_or("reject_add_request", false);
        self.connector
            .kick_group_member(&group_id, &user_id, reject)
            .await?;
        Ok(Value::Null)
    }

    async fn set_group_ban(self, params: Params) -> ActionResult<Value> {
        let group_id = self.raw(GROUP_NS, &params, "group_id")?;
        let user_id = self.raw(USER_NS, &params, "user_id")?;
        let duration = params.opt_i64("duration").unwrap_or(DEFAULT_BAN_SECS).max(0);
        self.connector
            .ban_group_member(&group_id, &user_id, duration as u64)
            .await?;
        Ok(Value::Null)
    }

    async fn set_group_admin(self, params: Params) -> ActionResult<Value> {
        let group_id = self.raw(GROUP_NS, &params, "group_id")?;
        let user_id = self.raw(USER_NS, &params, "user_id")?;
        let enable = params.bool_or("enable", true);
        self.connector
            .set_group_admin(&group_id, &user_id, enable)
            .await?;
        Ok(Value::Null)
    }

    async fn set_group_card(self, params: Params) -> ActionResult<Value> {
        let group_id = self.raw(GROUP_NS, &params, "group_id")?;
        let user_id = self.raw(USER_NS, &params, "user_id")?;
        let card = params.opt_str("card").unwrap_or_default();
        self.connector
            .set_group_card(&group_id, &user_id, card)
            .await?;
        Ok(Value::Null)
    }

    async fn set_group_name(self, params: Params) -> ActionResult<Value> {
        let group_id = self.raw(GROUP_NS, &params, "group_id")?;
        let name = params.str("group_name")?;
        self.connector.set_group_name(&group_id, name).await?;
        Ok(Value::Null)
    }

    async fn set_group_leave(self, params: Params) -> ActionResult<Value> {
        let group_id = self.raw(GROUP_NS, &params, "group_id")?;
        let dismiss = params.bool_or("is_dismiss", false);
        self.connector.leave_group(&group_id, dismiss).await?;
        Ok(Value::Null)
    }

    async fn set_friend_add_request(self, params: Params) -> ActionResult<Value> {
        self.connector
            .handle_friend_request(
                params.str("flag")?,
                params.bool_or("approve", true),
                params.opt_str("remark"),
            )
            .await?;
        Ok(Value::Null)
    }

    async fn set_group_add_request(self, params: Params) -> ActionResult<Value> {
        self.connector
            .handle_group_request(
                params.str("flag")?,
                params.bool_or("approve", true),
                params.opt_str("reason"),
            )
            .await?;
        Ok(Value::Null)
    }

    async fn get_status(self, _params: Params) -> ActionResult<Value> {
        let online = self.connector.is_online();
        Ok(json!({ "online": online, "good": online }))
    }
}

/// Registers `handler` with a clone of `api` bound as its receiver.
fn route<F, Fut>(table: &mut ActionTable, api: &Api, name: &str, params: &[ParamSpec], handler: F)
where
    F: Fn(Api, Params) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ActionResult<Value>> + Send + 'static,
{
    let api = api.clone();
    table.register(name, params, move |p| handler(api.clone(), p));
}

/// Builds the v11 action table for one instance.
pub(crate) fn build(ctx: &ProtocolContext) -> ActionTable {
    let api = Api::new(ctx);
    let mut table = ActionTable::new();
    let t = &mut table;

    route(t, &api, "send_private_msg", &[USER_ID, MESSAGE, AUTO_ESCAPE], Api::send_private_msg);
    route(t, &api, "send_group_msg", &[GROUP_ID, MESSAGE, AUTO_ESCAPE], Api::send_group_msg);
    // Reached only when no scene can be inferred from the parameters.
    t.register(
        "send_msg",
        &[ParamSpec::optional("message_type", Coerce::String)],
        |_| async { Err::<Value, _>(ActionError::MissingParam("message_type".into())) },
    );
    // Discussion groups have no counterpart in the connector model.
    t.register(
        "send_discuss_msg",
        &[
            ParamSpec::required("discuss_id", Coerce::Integer),
            MESSAGE,
            AUTO_ESCAPE,
        ],
        |_| async {
            Err::<Value, ActionError>(ConnectorError::Unsupported("send_discuss_msg").into())
        },
    );
    route(t, &api, "delete_msg", &[MESSAGE_ID], Api::delete_msg);
    route(t, &api, "get_msg", &[MESSAGE_ID], Api::get_msg);

    route(t, &api, "get_login_info", &[], Api::get_login_info);
    route(t, &api, "get_stranger_info", &[USER_ID], Api::get_stranger_info);
    route(t, &api, "get_friend_list", &[], Api::get_friend_list);
    route(t, &api, "get_group_info", &[GROUP_ID], Api::get_group_info);
    route(t, &api, "get_group_list", &[], Api::get_group_list);
    route(t, &api, "get_group_member_info", &[GROUP_ID, USER_ID], Api::get_group_member_info);
    route(t, &api, "get_group_member_list", &[GROUP_ID], Api::get_group_member_list);

    route(
        t,
        &api,
        "set_group_kick",
        &[
            GROUP_ID,
            USER_ID,
            ParamSpec::optional("reject_add_request", Coerce::Bool),
        ],
        Api::set_group_kick,
    );
    route(
        t,
        &api,
        "set_group_ban",
        &[GROUP_ID, USER_ID, ParamSpec::optional("duration", Coerce::Integer)],
        Api::set_group_ban,
    );
    route(
        t,
        &api,
        "set_group_admin",
        &[GROUP_ID, USER_ID, ParamSpec::optional("enable", Coerce::Bool)],
        Api::set_group_admin,
    );
    route(
        t,
        &api,
        "set_group_card",
        &[GROUP_ID, USER_ID, ParamSpec::optional("card", Coerce::String)],
        Api::set_group_card,
    );
    route(
        t,
        &api,
        "set_group_name",
        &[GROUP_ID, ParamSpec::required("group_name", Coerce::String)],
        Api::set_group_name,
    );
    route(
        t,
        &api,
        "set_group_leave",
        &[GROUP_ID, ParamSpec::optional("is_dismiss", Coerce::Bool)],
        Api::set_group_leave,
    );
    route(
        t,
        &api,
        "set_friend_add_request",
        &[FLAG, APPROVE, ParamSpec::optional("remark", Coerce::String)],
        Api::set_friend_add_request,
    );
    route(
        t,
        &api,
        "set_group_add_request",
        &[
            FLAG,
            ParamSpec::optional("sub_type", Coerce::String),
            ParamSpec::optional("type", Coerce::String),
            APPROVE,
            ParamSpec::optional("reason", Coerce::String),
        ],
        Api::set_group_add_request,
    );

    route(t, &api, "get_status", &[], Api::get_status);
    t.register("get_version_info", &[], |_| async {
        Ok::<_, ActionError>(json!({
            "app_name": "onegate",
            "app_version": env!("CARGO_PKG_VERSION"),
            "protocol_version": "v11",
        }))
    });
    t.register("can_send_image", &[], |_| async { Ok::<_, ActionError>(json!({ "yes": true })) });
    t.register("can_send_record", &[], |_| async { Ok::<_, ActionError>(json!({ "yes": true })) });

    table
}

/// Picks the concrete send action for `send_msg`.
///
/// An explicit `message_type` wins; otherwise the first scene id present
/// decides.
pub(crate) fn resolve_send_msg(params: &Value) -> Option<&'static str> {
    let present = |key: &str| params.get(key).is_some_and(|v| !v.is_null());
    match params.get("message_type").and_then(Value::as_str) {
        Some("group") => return Some("send_group_msg"),
        Some("private") => return Some("send_private_msg"),
        Some("discuss") => return Some("send_discuss_msg"),
        _ => {}
    }
    if present("group_id") {
        Some("send_group_msg")
    } else if present("discuss_id") {
        Some("send_discuss_msg")
    } else if present("user_id") {
        Some("send_private_msg")
    } else {
        None
    }
}
