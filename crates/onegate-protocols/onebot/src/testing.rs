//! Test connector shared by the v11 and v12 tests.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use onegate_core::{
    ActionError, Connector, ConnectorResult, GroupInfo, IdentityMap, InstanceConfig, Message,
    MessageReceipt, MessageTarget, ProtocolContext, UserInfo,
};

#[derive(Default)]
pub(crate) struct MockConnector {
    pub sent: Mutex<Vec<(MessageTarget, Message)>>,
    pub deleted: Mutex<Vec<String>>,
}

#[async_trait]
impl Connector for MockConnector {
    fn platform(&self) -> &str {
        "qq"
    }

    fn self_id(&self) -> &str {
        "bot_1"
    }

    async fn send_message(
        &self,
        target: MessageTarget,
        message: Message,
    ) -> ConnectorResult<MessageReceipt> {
        let mut sent = self.sent.lock();
        sent.push((target, message));
        Ok(MessageReceipt {
            message_id: format!("m_out_{}", sent.len()),
            time: Some(1_700_000_000),
        })
    }

    async fn delete_message(&self, message_id: &str) -> ConnectorResult<()> {
        self.deleted.lock().push(message_id.to_string());
        Ok(())
    }

    async fn get_self_info(&self) -> ConnectorResult<UserInfo> {
        Ok(UserInfo {
            user_id: "bot_1".into(),
            nickname: "Gate".into(),
            ..UserInfo::default()
        })
    }

    async fn list_groups(&self) -> ConnectorResult<Vec<GroupInfo>> {
        Ok(vec![GroupInfo {
            group_id: "g_1".into(),
            group_name: "Lobby".into(),
            ..GroupInfo::default()
        }])
    }
}

pub(crate) fn context(connector: Arc<MockConnector>) -> ProtocolContext {
    ProtocolContext {
        platform: "qq".into(),
        account_id: "bot_1".into(),
        connector,
        identities: Arc::new(IdentityMap::new()),
        config: InstanceConfig::default(),
    }
}

pub(crate) async fn call(
    table: &onegate_core::ActionTable,
    action: &str,
    params: Value,
) -> Result<Value, ActionError> {
    let spec = table
        .get(action)
        .ok_or_else(|| ActionError::UnsupportedAction(action.into()))?;
    spec.call(&params)?.await
}
