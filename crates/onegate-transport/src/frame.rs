//! Parsing of inbound action frames shared by the WebSocket transports.

use serde_json::Value;

use onegate_core::{ActionEndpoint, ActionError, ActionRequest, ActionResponse};

/// Parses one text frame as an action call and executes it.
///
/// Unparseable frames are answered with a failure envelope; the `echo` is
/// preserved whenever the frame is at least valid JSON.
pub async fn handle_frame(endpoint: &dyn ActionEndpoint, text: &str) -> ActionResponse {
    let value = match serde_json::from_str::<Value>(text) {
        Ok(value) => value,
        Err(e) => return endpoint.reject(&ActionError::BadRequest(e.to_string()), None),
    };
    let echo = value.get("echo").cloned();
    match serde_json::from_value::<ActionRequest>(value) {
        Ok(request) => endpoint.call(request).await,
        Err(e) => endpoint.reject(&ActionError::BadRequest(e.to_string()), echo),
    }
}

/// Serializes a response for the wire.
pub fn encode_response(response: &ActionResponse) -> Option<String> {
    serde_json::to_string(response)
        .inspect_err(|e| tracing::error!(error = %e, "Failed to serialize action response"))
        .ok()
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::{Value, json};

    use onegate_core::{ActionEndpoint, ActionError, ActionRequest, ActionResponse};

    /// Endpoint that records calls and answers with the action name.
    #[derive(Default)]
    pub struct RecordingEndpoint {
        pub calls: Mutex<Vec<ActionRequest>>,
    }

    impl RecordingEndpoint {
        pub fn shared() -> Arc<Self> {
            Arc::new(Self::default())
        }
    }

    #[async_trait]
    impl ActionEndpoint for RecordingEndpoint {
        async fn call(&self, request: ActionRequest) -> ActionResponse {
            self.calls.lock().push(request.clone());
            if request.action == "hang" {
                futures::future::pending::<()>().await;
            }
            if request.action == "missing" {
                return self.reject(
                    &ActionError::UnsupportedAction(request.action),
                    request.echo,
                );
            }
            ActionResponse::ok(json!({ "action": request.action, "params": request.params }))
                .with_echo(request.echo)
        }

        fn reject(&self, error: &ActionError, echo: Option<Value>) -> ActionResponse {
            let retcode = match error {
                ActionError::UnsupportedAction(_) => 1404,
                ActionError::Unauthorized => 1401,
                ActionError::Forbidden => 1403,
                _ => 1400,
            };
            ActionResponse::failed(retcode, error.to_string()).with_echo(echo)
        }

        fn greeting_frames(&self) -> Vec<String> {
            vec![r#"{"meta_event_type":"lifecycle","sub_type":"connect"}"#.to_string()]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingEndpoint;
    use super::*;
    use onegate_core::ActionStatus;
    use serde_json::json;

    #[tokio::test]
    async fn test_frame_dispatch_keeps_echo() {
        let endpoint = RecordingEndpoint::default();
        let response = handle_frame(
            &endpoint,
            r#"{"action":"get_status","params":{},"echo":"e-1"}"#,
        )
        .await;
        assert_eq!(response.status, ActionStatus::Ok);
        assert_eq!(response.echo, Some(json!("e-1")));
        assert_eq!(endpoint.calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_bad_frames() {
        let endpoint = RecordingEndpoint::default();

        let response = handle_frame(&endpoint, "not json").await;
        assert_eq!(response.retcode, 1400);
        assert_eq!(response.echo, None);

        let response = handle_frame(&endpoint, r#"{"params":{},"echo":7}"#).await;
        assert_eq!(response.retcode, 1400);
        assert_eq!(response.echo, Some(json!(7)));
        assert!(endpoint.calls.lock().is_empty());
    }
}
