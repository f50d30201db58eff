//! Action dispatch for one protocol instance.
//!
//! Every inbound call goes through the same pipeline:
//!
//! ```text
//! name ─▶ normalize ─▶ split mode suffix ─▶ quick operation? ─▶ resolve alias
//!      ─▶ table lookup ─▶ bind params ─▶ run (sync | async | rate-limited)
//! ```
//!
//! Lookup and parameter errors are reported in the response for every mode.
//! Handler outcomes of `_async` and `_rate_limited` calls only reach the log.

use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use onegate_core::{
    ActionError, ActionFuture, ActionRequest, ActionResponse, ActionResult, ActionTable,
    BoxedProtocol, CallMode, normalize_action,
};

/// Action name that applies a quick operation explicitly.
pub const QUICK_OPERATION_ACTION: &str = "handle_quick_operation";

struct QueuedCall {
    action: String,
    future: ActionFuture,
}

/// Routes action calls to an instance's action table.
pub struct ActionDispatcher {
    label: String,
    protocol: BoxedProtocol,
    table: ActionTable,
    queue: mpsc::UnboundedSender<QueuedCall>,
}

impl ActionDispatcher {
    /// Creates a dispatcher and spawns its rate-limit worker.
    ///
    /// The worker runs one queued call at a time and waits `interval` after
    /// each. It exits once the dispatcher is dropped and the queue drained.
    pub fn new(
        label: impl Into<String>,
        protocol: BoxedProtocol,
        table: ActionTable,
        interval: Duration,
    ) -> Self {
        let label = label.into();
        let (queue, rx) = mpsc::unbounded_channel();
        tokio::spawn(drain_queue(label.clone(), rx, interval));
        Self {
            label,
            protocol,
            table,
            queue,
        }
    }

    pub fn table(&self) -> &ActionTable {
        &self.table
    }

    /// Executes a call and builds its response envelope.
    pub async fn dispatch(&self, request: ActionRequest) -> ActionResponse {
        let ActionRequest {
            action,
            params,
            echo,
        } = request;
        let normalized = normalize_action(&action);
        let (name, mode) = CallMode::split(&normalized);

        let result = if name == QUICK_OPERATION_ACTION {
            self.quick_operation_call(&params, mode).await
        } else {
            self.execute(name, &params, mode).await
        };

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                debug!(instance = %self.label, action = %action, error = %e, "Action failed");
                self.failure(&e)
            }
        };
        response.with_echo(echo)
    }

    /// Failure envelope with the protocol's retcode.
    pub fn failure(&self, error: &ActionError) -> ActionResponse {
        ActionResponse::failed(self.protocol.retcode(error), error.to_string())
    }

    /// Applies a consumer's reply to a delivered event.
    ///
    /// `context` is the encoded event. Every resulting call runs
    /// synchronously; failures are logged. Returns the number of calls that
    /// succeeded.
    pub async fn apply_quick_operation(&self, context: &Value, operation: &Value) -> usize {
        let calls = self.protocol.quick_operation(context, operation);
        let mut succeeded = 0;
        for call in calls {
            let name = normalize_action(&call.action);
            match self.execute(&name, &call.params, CallMode::Sync).await {
                Ok(_) => succeeded += 1,
                Err(e) => {
                    warn!(instance = %self.label, action = %call.action, error = %e, "Quick operation failed");
                }
            }
        }
        succeeded
    }

    async fn quick_operation_call(
        &self,
        params: &Value,
        mode: CallMode,
    ) -> ActionResult<ActionResponse> {
        let context = params
            .get("context")
            .ok_or_else(|| ActionError::MissingParam("context".into()))?;
        let operation = params
            .get("operation")
            .ok_or_else(|| ActionError::MissingParam("operation".into()))?;

        for call in self.protocol.quick_operation(context, operation) {
            let name = normalize_action(&call.action);
            self.execute(&name, &call.params, mode).await?;
        }
        Ok(match mode {
            CallMode::Sync => ActionResponse::ok(Value::Null),
            CallMode::Async | CallMode::RateLimited => ActionResponse::accepted(),
        })
    }

    /// Starts the handler for an already normalized, suffix-free name.
    fn prepare(&self, name: &str, params: &Value) -> ActionResult<(String, ActionFuture)> {
        let name = self
            .protocol
            .resolve_alias(name, params)
            .unwrap_or_else(|| name.to_string());
        let spec = self
            .table
            .get(&name)
            .ok_or_else(|| ActionError::UnsupportedAction(name.clone()))?;
        let future = spec.call(params)?;
        Ok((name, future))
    }

    async fn execute(
        &self,
        name: &str,
        params: &Value,
        mode: CallMode,
    ) -> ActionResult<ActionResponse> {
        let (action, future) = self.prepare(name, params)?;
        trace!(instance = %self.label, action = %action, mode = %mode, "Dispatching action");

        match mode {
            CallMode::Sync => future.await.map(ActionResponse::ok),
            CallMode::Async => {
                let label = self.label.clone();
                tokio::spawn(async move {
                    if let Err(e) = future.await {
                        warn!(instance = %label, action = %action, error = %e, "Async action failed");
                    }
                });
                Ok(ActionResponse::accepted())
            }
            CallMode::RateLimited => {
                self.queue
                    .send(QueuedCall { action, future })
                    .map_err(|_| ActionError::Handler("rate limit queue is closed".into()))?;
                Ok(ActionResponse::accepted())
            }
        }
    }
}

async fn drain_queue(label: String, mut rx: mpsc::UnboundedReceiver<QueuedCall>, interval: Duration) {
    while let Some(QueuedCall { action, future }) = rx.recv().await {
        match future.await {
            Ok(_) => trace!(instance = %label, action = %action, "Rate-limited action done"),
            Err(e) => {
                warn!(instance = %label, action = %action, error = %e, "Rate-limited action failed");
            }
        }
        tokio::time::sleep(interval).await;
    }
    trace!(instance = %label, "Rate limit queue closed");
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use onegate_core::action::RETCODE_ASYNC;
    use onegate_core::{IdentityMap, InstanceConfig, Protocol, ProtocolContext};
    use serde_json::json;

    use super::*;
    use crate::testing::{CallLog, MockConnector, TestProtocol};

    fn dispatcher(interval: Duration) -> (ActionDispatcher, CallLog, Arc<MockConnector>) {
        let log = CallLog::default();
        let connector = Arc::new(MockConnector::default());
        let protocol: BoxedProtocol = Arc::new(TestProtocol {
            log: Arc::clone(&log),
            ..TestProtocol::default()
        });
        let ctx = ProtocolContext {
            platform: "qq".into(),
            account_id: "bot".into(),
            connector: connector.clone(),
            identities: Arc::new(IdentityMap::new()),
            config: InstanceConfig::default(),
        };
        let table = protocol.build_actions(&ctx);
        (
            ActionDispatcher::new("qq/bot/test.v1", protocol, table, interval),
            log,
            connector,
        )
    }

    fn call(action: &str, params: Value) -> ActionRequest {
        ActionRequest {
            action: action.into(),
            params,
            echo: Some(json!("e")),
        }
    }

    #[tokio::test]
    async fn test_sync_call_and_alias() {
        let (dispatcher, _, _) = dispatcher(Duration::ZERO);

        let response = dispatcher.dispatch(call("record", json!({ "tag": "a" }))).await;
        assert_eq!(response.retcode, 0);
        assert_eq!(response.data, json!({ "tag": "a" }));
        assert_eq!(response.echo, Some(json!("e")));

        let response = dispatcher.dispatch(call(".note", json!({ "tag": "b" }))).await;
        assert_eq!(response.data, json!({ "tag": "b" }));
    }

    #[tokio::test]
    async fn test_failures_use_protocol_retcodes() {
        let (dispatcher, _, _) = dispatcher(Duration::ZERO);

        let response = dispatcher.dispatch(call("nope", json!({}))).await;
        assert_eq!(response.retcode, 404);
        assert_eq!(response.echo, Some(json!("e")));

        let response = dispatcher.dispatch(call("record", json!({}))).await;
        assert_eq!(response.retcode, 400);

        let response = dispatcher.dispatch(call("fail", Value::Null)).await;
        assert_eq!(response.retcode, 500);
        assert_eq!(response.error.as_deref(), Some("boom"));

        // Lookup errors are reported even for deferred modes.
        let response = dispatcher.dispatch(call("nope_async", json!({}))).await;
        assert_eq!(response.retcode, 404);
    }

    #[tokio::test(start_paused = true)]
    async fn test_async_call_is_accepted_immediately() {
        let (dispatcher, log, _) = dispatcher(Duration::ZERO);

        let response = dispatcher
            .dispatch(call("recordAsync", json!({ "tag": "a", "delay_ms": 1000 })))
            .await;
        assert_eq!(response.retcode, RETCODE_ASYNC);
        assert!(log.lock().iter().all(|(entry, _)| entry != "end:a"));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(log.lock().iter().any(|(entry, _)| entry == "end:a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_calls_run_in_order_without_overlap() {
        let interval = Duration::from_millis(500);
        let (dispatcher, log, _) = dispatcher(interval);

        for tag in ["A", "B", "C"] {
            let response = dispatcher
                .dispatch(call(
                    "record_rate_limited",
                    json!({ "tag": tag, "delay_ms": 200 }),
                ))
                .await;
            assert_eq!(response.retcode, RETCODE_ASYNC);
        }

        tokio::time::sleep(Duration::from_secs(5)).await;

        let log = log.lock();
        let entries: Vec<&str> = log.iter().map(|(entry, _)| entry.as_str()).collect();
        assert_eq!(
            entries,
            ["start:A", "end:A", "start:B", "end:B", "start:C", "end:C"]
        );
        // Each call starts at least one interval after the previous ended.
        for pair in log.chunks(2).collect::<Vec<_>>().windows(2) {
            let previous_end = pair[0][1].1;
            let next_start = pair[1][0].1;
            assert!(next_start - previous_end >= interval);
        }
    }

    #[tokio::test]
    async fn test_explicit_quick_operation() {
        let (dispatcher, _, connector) = dispatcher(Duration::ZERO);

        let response = dispatcher
            .dispatch(call(
                ".handle_quick_operation",
                json!({ "context": { "message_id": "m9" }, "operation": { "delete": true } }),
            ))
            .await;
        assert_eq!(response.retcode, 0);
        assert_eq!(*connector.deleted.lock(), vec!["m9".to_string()]);

        let response = dispatcher
            .dispatch(call("handle_quick_operation", json!({ "context": {} })))
            .await;
        assert_eq!(response.retcode, 400);
    }

    #[tokio::test]
    async fn test_apply_quick_operation_counts_successes() {
        let (dispatcher, _, connector) = dispatcher(Duration::ZERO);

        let done = dispatcher
            .apply_quick_operation(&json!({ "message_id": "m1" }), &json!({ "delete": true }))
            .await;
        assert_eq!(done, 1);
        assert_eq!(
            dispatcher
                .apply_quick_operation(&json!({ "message_id": "m1" }), &json!({}))
                .await,
            0
        );
        assert_eq!(connector.deleted.lock().len(), 1);
    }
}
