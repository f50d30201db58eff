//! OneBot v12 action table.

use std::future::Future;
use std::sync::Arc;

use serde_json::{Value, json};

use onegate_core::{
    ActionError, ActionResult, ActionTable, BoxedConnector, Coerce, GroupMemberInfo, MessageTarget,
    ParamSpec, Params, ProtocolContext, UserInfo,
};

use super::encode::{IMPL_NAME, decode_message, detail_type, encode_message};

const GROUP_ID: ParamSpec = ParamSpec::required("group_id", Coerce::String);
const USER_ID: ParamSpec = ParamSpec::required("user_id", Coerce::String);
const MESSAGE_ID: ParamSpec = ParamSpec::required("message_id", Coerce::String);

#[derive(Clone)]
pub(crate) struct Api {
    connector: BoxedConnector,
    platform: String,
}

impl Api {
    fn self_json(&self) -> Value {
        json!({ "platform": self.platform, "user_id": self.connector.self_id() })
    }

    fn user_json(user: &UserInfo) -> Value {
        json!({
            "user_id": user.user_id,
            "user_name": user.nickname,
            "user_displayname": "",
            "user_remark": user.remark.clone().unwrap_or_default(),
        })
    }

    fn member_json(member: &GroupMemberInfo) -> Value {
        json!({
            "user_id": member.user_id,
            "user_name": member.nickname,
            "user_displayname": member.card.clone().unwrap_or_default(),
        })
    }

    async fn send_message(self, params: Params) -> ActionResult<Value> {
        let target = match params.str("detail_type")? {
            "private" => MessageTarget::Private {
                user_id: params.str("user_id")?.to_string(),
            },
            "group" => MessageTarget::Group {
                group_id: params.str("group_id")?.to_string(),
            },
            "channel" => MessageTarget::Channel {
                guild_id: params.str("guild_id")?.to_string(),
                channel_id: params.str("channel_id")?.to_string(),
            },
            other => {
                return Err(ActionError::bad_param(
                    "detail_type",
                    format!("unknown detail_type '{other}'"),
                ));
            }
        };
        let message = decode_message(params.message("message", false)?);
        if message.is_empty() {
            return Err(ActionError::bad_param("message", "message is empty"));
        }
        let receipt = self.connector.send_message(target, message).await?;
        Ok(json!({
            "message_id": receipt.message_id,
            "time": receipt.time.unwrap_or_default(),
        }))
    }

    async fn delete_message(self, params: Params) -> ActionResult<Value> {
        self.connector
            .delete_message(params.str("message_id")?)
            .await?;
        Ok(Value::Null)
    }

    async fn get_message(self, params: Params) -> ActionResult<Value> {
        let info = self.connector.get_message(params.str("message_id")?).await?;
        let mut data = json!({
            "message_id": info.message_id,
            "time": info.time,
            "detail_type": detail_type(info.scene),
            "user_id": info.sender.user_id,
            "message": encode_message(&info.message),
            "alt_message": info.message.to_string(),
        });
        if let (Some(group_id), Value::Object(map)) = (&info.group_id, &mut data) {
            map.insert("group_id".into(), json!(group_id));
        }
        Ok(data)
    }

    async fn get_self_info(self, _params: Params) -> ActionResult<Value> {
        let user = self.connector.get_self_info().await?;
        Ok(json!({
            "user_id": user.user_id,
            "user_name": user.nickname,
            "user_displayname": "",
        }))
    }

    async fn get_user_info(self, params: Params) -> ActionResult<Value> {
        let user = self.connector.get_user(params.str("user_id")?).await?;
        Ok(Self::user_json(&user))
    }

    async fn get_friend_list(self, _params: Params) -> ActionResult<Value> {
        let friends = self.connector.list_friends().await?;
        Ok(friends.iter().map(Self::user_json).collect())
    }

    async fn get_group_info(self, params: Params) -> ActionResult<Value> {
        let group = self.connector.get_group(params.str("group_id")?).await?;
        Ok(json!({ "group_id": group.group_id, "group_name": group.group_name }))
    }

    async fn get_group_list(self, _params: Params) -> ActionResult<Value> {
        let groups = self.connector.list_groups().await?;
        Ok(groups
            .iter()
            .map(|g| json!({ "group_id": g.group_id, "group_name": g.group_name }))
            .collect())
    }

    async fn get_group_member_info(self, params: Params) -> ActionResult<Value> {
        let member = self
            .connector
            .get_group_member(params.str("group_id")?, params.str("user_id")?)
            .await?;
        Ok(Self::member_json(&member))
    }

    async fn get_group_member_list(self, params: Params) -> ActionResult<Value> {
        let members = self
            .connector
            .list_group_members(params.str("group_id")?)
            .await?;
        Ok(members.iter().map(Self::member_json).collect())
    }

    async fn set_group_name(self, params: Params) -> ActionResult<Value> {
        self.connector
            .set_group_name(params.str("group_id")?, params.str("group_name")?)
            .await?;
        Ok(Value::Null)
    }

    async fn leave_group(self, params: Params) -> ActionResult<Value> {
        self.connector
            .leave_group(params.str("group_id")?, false)
            .await?;
        Ok(Value::Null)
    }

    async fn get_status(self, _params: Params) -> ActionResult<Value> {
        let online = self.connector.is_online();
        Ok(json!({
            "good": online,
            "bots": [{ "self": self.self_json(), "online": online }],
        }))
    }
}

fn route<F, Fut>(table: &mut ActionTable, api: &Api, name: &str, params: &[ParamSpec], handler: F)
where
    F: Fn(Api, Params) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ActionResult<Value>> + Send + 'static,
{
    let api = api.clone();
    table.register(name, params, move |p| handler(api.clone(), p));
}

/// Builds the v12 action table for one instance.
pub(crate) fn build(ctx: &ProtocolContext) -> ActionTable {
    let api = Api {
        connector: Arc::clone(&ctx.connector),
        platform: ctx.platform.clone(),
    };
    let mut table = ActionTable::new();
    let t = &mut table;

    route(
        t,
        &api,
        "send_message",
        &[
            ParamSpec::required("detail_type", Coerce::String),
            ParamSpec::optional("user_id", Coerce::String),
            ParamSpec::optional("group_id", Coerce::String),
            ParamSpec::optional("guild_id", Coerce::String),
            ParamSpec::optional("channel_id", Coerce::String),
            ParamSpec::required("message", Coerce::Message),
        ],
        Api::send_message,
    );
    route(t, &api, "delete_message", &[MESSAGE_ID], Api::delete_message);
    route(t, &api, "get_message", &[MESSAGE_ID], Api::get_message);
    route(t, &api, "get_self_info", &[], Api::get_self_info);
    route(t, &api, "get_user_info", &[USER_ID], Api::get_user_info);
    route(t, &api, "get_friend_list", &[], Api::get_friend_list);
    route(t, &api, "get_group_info", &[GROUP_ID], Api::get_group_info);
    route(t, &api, "get_group_list", &[], Api::get_group_list);
    route(t, &api, "get_group_member_info", &[GROUP_ID, USER_ID], Api::get_group_member_info);
    route(t, &api, "get_group_member_list", &[GROUP_ID], Api::get_group_member_list);
    route(
        t,
        &api,
        "set_group_name",
        &[GROUP_ID, ParamSpec::required("group_name", Coerce::String)],
        Api::set_group_name,
    );
    route(t, &api, "leave_group", &[GROUP_ID], Api::leave_group);
    route(t, &api, "get_status", &[], Api::get_status);
    t.register("get_version", &[], |_| async {
        Ok::<_, ActionError>(json!({
            "impl": IMPL_NAME,
            "version": env!("CARGO_PKG_VERSION"),
            "onebot_version": "12",
        }))
    });

    let mut supported = table.names();
    supported.push("get_supported_actions".into());
    supported.sort();
    let supported = Value::from(supported);
    table.register("get_supported_actions", &[], move |_| {
        let supported = supported.clone();
        async move { Ok::<_, ActionError>(supported) }
    });

    table
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::{Value, json};

    use onegate_core::Protocol;

    use super::build;
    use crate::OneBotV12;
    use crate::testing::{MockConnector, call, context};

    #[tokio::test]
    async fn test_send_message_uses_raw_ids() {
        let connector = Arc::new(MockConnector::default());
        let ctx = context(Arc::clone(&connector));
        let table = build(&ctx);

        let data = call(
            &table,
            "send_message",
            json!({
                "detail_type": "group",
                "group_id": "g_1",
                "message": [{ "type": "mention", "data": { "user_id": "u_bob" } }],
            }),
        )
        .await
        .unwrap();

        assert_eq!(data["message_id"], "m_out_1");
        let sent = connector.sent.lock();
        assert_eq!(sent[0].1.mentions(), vec!["u_bob".to_string()]);
    }

    #[tokio::test]
    async fn test_unknown_detail_type_is_bad_param() {
        let ctx = context(Arc::new(MockConnector::default()));
        let table = build(&ctx);

        let err = call(
            &table,
            "send_message",
            json!({ "detail_type": "discuss", "message": "x" }),
        )
        .await
        .unwrap_err();
        assert_eq!(OneBotV12.retcode(&err), 10003);
    }

    #[tokio::test]
    async fn test_supported_actions_lists_itself() {
        let ctx = context(Arc::new(MockConnector::default()));
        let table = build(&ctx);

        let actions = call(&table, "get_supported_actions", json!({})).await.unwrap();
        let names: Vec<&str> = actions
            .as_array()
            .unwrap()
            .iter()
            .filter_map(Value::as_str)
            .collect();
        assert!(names.contains(&"get_supported_actions"));
        assert!(names.contains(&"send_message"));
        assert_eq!(names.len(), table.len());
    }
}
