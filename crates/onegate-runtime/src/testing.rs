//! Test doubles shared by the runtime tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::time::Instant;

use onegate_core::{
    ActionError, ActionRequest, ActionTable, BoxedProtocol, ClientIdentity, Coerce, CommonEvent,
    Connector, ConnectorResult, EventSink, Message, MessageEvent, MessageReceipt, MessageTarget,
    ParamSpec, Protocol, ProtocolContext, ProtocolFactory, Sender,
};

pub(crate) type CallLog = Arc<Mutex<Vec<(String, Instant)>>>;

/// Minimal protocol: events are encoded as their serde form.
pub(crate) struct TestProtocol {
    pub log: CallLog,
    pub version: &'static str,
}

impl Default for TestProtocol {
    fn default() -> Self {
        Self {
            log: CallLog::default(),
            version: "v1",
        }
    }
}

impl TestProtocol {
    pub fn factory() -> ProtocolFactory {
        Self::factory_with_log(CallLog::default())
    }

    /// Factory for `test.<version>`.
    pub fn factory_for(version: &'static str) -> ProtocolFactory {
        Arc::new(move || {
            Arc::new(TestProtocol {
                version,
                ..TestProtocol::default()
            }) as BoxedProtocol
        })
    }

    pub fn factory_with_log(log: CallLog) -> ProtocolFactory {
        Arc::new(move || {
            Arc::new(TestProtocol {
                log: Arc::clone(&log),
                version: "v1",
            }) as BoxedProtocol
        })
    }
}

impl Protocol for TestProtocol {
    fn name(&self) -> &'static str {
        "test"
    }

    fn version(&self) -> &'static str {
        self.version
    }

    fn build_actions(&self, ctx: &ProtocolContext) -> ActionTable {
        let mut table = ActionTable::new();

        let log = Arc::clone(&self.log);
        table.register(
            "record",
            &[
                ParamSpec::required("tag", Coerce::String),
                ParamSpec::optional("delay_ms", Coerce::Integer),
            ],
            move |params| {
                let log = Arc::clone(&log);
                async move {
                    let tag = params.str("tag")?.to_string();
                    let delay = params.opt_i64("delay_ms").unwrap_or(0) as u64;
                    log.lock().push((format!("start:{tag}"), Instant::now()));
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    log.lock().push((format!("end:{tag}"), Instant::now()));
                    Ok(json!({ "tag": tag }))
                }
            },
        );

        table.register("fail", &[], |_| async {
            Err::<Value, _>(ActionError::Handler("boom".into()))
        });

        let connector = Arc::clone(&ctx.connector);
        table.register(
            "delete_msg",
            &[ParamSpec::required("message_id", Coerce::String)],
            move |params| {
                let connector = Arc::clone(&connector);
                async move {
                    connector.delete_message(params.str("message_id")?).await?;
                    Ok(Value::Null)
                }
            },
        );

        table
    }

    fn encode_event(&self, event: &CommonEvent, _ctx: &ProtocolContext) -> Option<Value> {
        serde_json::to_value(event).ok()
    }

    fn resolve_alias(&self, action: &str, _params: &Value) -> Option<String> {
        (action == "note").then(|| "record".to_string())
    }

    fn quick_operation(&self, context: &Value, operation: &Value) -> Vec<ActionRequest> {
        let mut calls = Vec::new();
        if operation.get("delete").and_then(Value::as_bool) == Some(true) {
            if let Some(message_id) = context.get("message_id") {
                calls.push(ActionRequest::new(
                    "delete_msg",
                    json!({ "message_id": message_id }),
                ));
            }
        }
        calls
    }

    fn retcode(&self, error: &ActionError) -> i64 {
        match error {
            ActionError::UnsupportedAction(_) => 404,
            ActionError::MissingParam(_) | ActionError::BadParam { .. } => 400,
            _ => 500,
        }
    }

    fn client_identity(&self, _ctx: &ProtocolContext) -> ClientIdentity {
        ClientIdentity::default()
    }
}

/// Connector that records deletions.
#[derive(Default)]
pub(crate) struct MockConnector {
    pub deleted: Mutex<Vec<String>>,
    pub sent: Mutex<Vec<MessageTarget>>,
}

#[async_trait]
impl Connector for MockConnector {
    fn platform(&self) -> &str {
        "qq"
    }

    fn self_id(&self) -> &str {
        "bot"
    }

    async fn send_message(
        &self,
        target: MessageTarget,
        _message: Message,
    ) -> ConnectorResult<MessageReceipt> {
        let mut sent = self.sent.lock();
        sent.push(target);
        Ok(MessageReceipt {
            message_id: format!("out_{}", sent.len()),
            time: None,
        })
    }

    async fn delete_message(&self, message_id: &str) -> ConnectorResult<()> {
        self.deleted.lock().push(message_id.to_string());
        Ok(())
    }
}

/// Sink that records payloads and answers with a fixed reply.
#[derive(Default)]
pub(crate) struct RecordingSink {
    pub payloads: Mutex<Vec<Arc<str>>>,
    pub reply: Option<Value>,
}

impl RecordingSink {
    pub fn replying(reply: Value) -> Self {
        Self {
            payloads: Mutex::default(),
            reply: Some(reply),
        }
    }

    pub fn count(&self) -> usize {
        self.payloads.lock().len()
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    fn describe(&self) -> String {
        "recording".into()
    }

    async fn push(&self, payload: Arc<str>) -> Option<Value> {
        self.payloads.lock().push(payload);
        self.reply.clone()
    }
}

pub(crate) fn group_message(message_id: &str) -> CommonEvent {
    CommonEvent::message(
        "qq",
        "bot",
        MessageEvent::group(message_id, "g1", Sender::new("u1"), "hello"),
    )
}
