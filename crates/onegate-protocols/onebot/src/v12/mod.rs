//! OneBot v12.

mod actions;
pub mod encode;

use std::sync::Arc;

use serde_json::{Map, Value, json};

use onegate_core::{
    ActionError, ActionRequest, ActionTable, BoxedProtocol, ClientIdentity, CommonEvent,
    ConnectorError, Protocol, ProtocolContext, ProtocolFactory,
};

/// The OneBot v12 dialect.
#[derive(Debug, Default, Clone, Copy)]
pub struct OneBotV12;

impl OneBotV12 {
    /// Registry factory.
    pub fn factory() -> ProtocolFactory {
        Arc::new(|| Arc::new(OneBotV12) as BoxedProtocol)
    }
}

/// Copies the scene ids of a message event into `params`.
fn scene_params(context: &Map<String, Value>) -> Map<String, Value> {
    ["detail_type", "user_id", "group_id", "guild_id", "channel_id"]
        .into_iter()
        .filter_map(|key| context.get(key).map(|v| (key.to_string(), v.clone())))
        .collect()
}

impl Protocol for OneBotV12 {
    fn name(&self) -> &'static str {
        "onebot"
    }

    fn version(&self) -> &'static str {
        "v12"
    }

    fn build_actions(&self, ctx: &ProtocolContext) -> ActionTable {
        actions::build(ctx)
    }

    fn encode_event(&self, event: &CommonEvent, ctx: &ProtocolContext) -> Option<Value> {
        encode::encode_event(event, ctx.connector.is_online())
    }

    fn quick_operation(&self, context: &Value, operation: &Value) -> Vec<ActionRequest> {
        let (Some(context), Some(op)) = (context.as_object(), operation.as_object()) else {
            return Vec::new();
        };
        if context.get("type").and_then(Value::as_str) != Some("message") {
            return Vec::new();
        }

        let mut calls = Vec::new();
        if let Some(reply) = op.get("reply").filter(|v| !v.is_null()) {
            let mut params = scene_params(context);
            params.insert("message".into(), reply.clone());
            calls.push(ActionRequest::new("send_message", Value::Object(params)));
        }
        if op.get("delete").and_then(Value::as_bool) == Some(true) {
            if let Some(message_id) = context.get("message_id") {
                calls.push(ActionRequest::new(
                    "delete_message",
                    json!({ "message_id": message_id }),
                ));
            }
        }
        calls
    }

    fn retcode(&self, error: &ActionError) -> i64 {
        match error {
            ActionError::BadRequest(_) | ActionError::Unauthorized | ActionError::Forbidden => {
                10001
            }
            ActionError::UnsupportedAction(_)
            | ActionError::Connector(ConnectorError::Unsupported(_)) => 10002,
            ActionError::MissingParam(_) | ActionError::BadParam { .. } => 10003,
            ActionError::Connector(_) | ActionError::Handler(_) => 20002,
        }
    }

    fn client_identity(&self, ctx: &ProtocolContext) -> ClientIdentity {
        ClientIdentity::default()
            .header("User-Agent", "OneBot/12 (onegate)")
            .header("X-OneBot-Version", "12")
            .header("X-Impl", encode::IMPL_NAME)
            .header("X-Platform", ctx.platform.clone())
            .header("X-Self-ID", ctx.account_id.clone())
            .token(ctx.config.token())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quick_reply_targets_scene() {
        let context = json!({
            "type": "message",
            "detail_type": "group",
            "group_id": "g_1",
            "user_id": "u_1",
            "message_id": "m_1",
        });
        let calls = OneBotV12.quick_operation(&context, &json!({ "reply": "ok", "delete": true }));
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].action, "send_message");
        assert_eq!(calls[0].params["detail_type"], "group");
        assert_eq!(calls[0].params["group_id"], "g_1");
        assert_eq!(calls[1].action, "delete_message");
        assert_eq!(calls[1].params["message_id"], "m_1");
    }

    #[test]
    fn test_retcodes() {
        let v12 = OneBotV12;
        assert_eq!(v12.retcode(&ActionError::UnsupportedAction("x".into())), 10002);
        assert_eq!(v12.retcode(&ActionError::MissingParam("x".into())), 10003);
        assert_eq!(v12.retcode(&ActionError::Handler("boom".into())), 20002);
    }
}
