//! OneBot v11.

mod actions;
pub mod encode;
pub mod quick;

use std::sync::Arc;

use serde_json::Value;

use onegate_core::identity::USER_NS;
use onegate_core::{
    ActionError, ActionRequest, ActionTable, BoxedProtocol, ClientIdentity, CommonEvent,
    ConnectorError, Protocol, ProtocolContext, ProtocolFactory,
};

pub use actions::DEFAULT_BAN_SECS;

/// The OneBot v11 dialect.
#[derive(Debug, Default, Clone, Copy)]
pub struct OneBotV11;

impl OneBotV11 {
    /// Registry factory.
    pub fn factory() -> ProtocolFactory {
        Arc::new(|| Arc::new(OneBotV11) as BoxedProtocol)
    }
}

impl Protocol for OneBotV11 {
    fn name(&self) -> &'static str {
        "onebot"
    }

    fn version(&self) -> &'static str {
        "v11"
    }

    fn build_actions(&self, ctx: &ProtocolContext) -> ActionTable {
        actions::build(ctx)
    }

    fn encode_event(&self, event: &CommonEvent, ctx: &ProtocolContext) -> Option<Value> {
        encode::encode_event(event, &ctx.identities, ctx.config.message_format)
    }

    fn resolve_alias(&self, action: &str, params: &Value) -> Option<String> {
        match action {
            "send_msg" => actions::resolve_send_msg(params).map(str::to_string),
            _ => None,
        }
    }

    fn quick_operation(&self, context: &Value, operation: &Value) -> Vec<ActionRequest> {
        quick::translate(context, operation)
    }

    fn retcode(&self, error: &ActionError) -> i64 {
        match error {
            ActionError::BadRequest(_)
            | ActionError::MissingParam(_)
            | ActionError::BadParam { .. } => 1400,
            ActionError::Unauthorized => 1401,
            ActionError::Forbidden => 1403,
            ActionError::UnsupportedAction(_)
            | ActionError::Connector(ConnectorError::Unsupported(_)) => 1404,
            ActionError::Connector(_) | ActionError::Handler(_) => 100,
        }
    }

    fn client_identity(&self, ctx: &ProtocolContext) -> ClientIdentity {
        let self_id = ctx.identities.to_alias(USER_NS, &ctx.account_id);
        ClientIdentity::default()
            .header("X-Self-ID", self_id.to_string())
            .header("X-Client-Role", "Universal")
            .header("User-Agent", "OneBot/11")
            .token(ctx.config.token())
    }
}
