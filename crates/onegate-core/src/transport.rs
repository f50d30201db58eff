//! Transport-facing types shared by the runtime and `onegate-transport`.
//!
//! A protocol instance exposes itself to transports through two seams:
//! [`ActionEndpoint`] for inbound action calls and [`EventSink`] for outbound
//! event pushes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::action::{ActionRequest, ActionResponse};
use crate::error::ActionError;

// =============================================================================
// Instance Configuration
// =============================================================================

/// How message content is rendered in encoded events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageFormat {
    /// Segment arrays.
    #[default]
    Array,
    /// Inline markup strings.
    String,
}

/// Transport settings of one protocol instance.
///
/// Built from the gateway-wide defaults for the protocol merged with the
/// account's overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceConfig {
    /// Serve `<instance path>/<action>` over HTTP.
    pub use_http: bool,
    /// Accept forward WebSocket connections on `<instance path>`.
    pub use_ws: bool,
    /// Token required from consumers and sent to webhook/reverse targets.
    pub access_token: Option<String>,
    /// HMAC key for webhook signatures.
    pub secret: Option<String>,
    /// Webhook targets.
    pub http_reverse: Vec<String>,
    /// Additional webhook targets.
    pub webhooks: Vec<String>,
    /// Reverse WebSocket targets.
    pub ws_reverse: Vec<String>,
    /// Heartbeat period in milliseconds; `0` disables heartbeats.
    pub heartbeat_interval: u64,
    /// Webhook request timeout in seconds.
    pub post_timeout: u64,
    /// Delay between rate-limited calls in milliseconds.
    pub rate_limit_interval: u64,
    /// Delay before a reverse WebSocket reconnect in milliseconds.
    pub reconnect_interval: u64,
    /// Message rendering in encoded events.
    pub message_format: MessageFormat,
    /// Consecutive webhook failures before a target is suspended; `0` never.
    pub webhook_failure_threshold: u32,
    /// How long a suspended webhook target is skipped, in seconds.
    pub webhook_suspend_secs: u64,
    /// Event filter expression.
    pub filter: Option<Value>,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            use_http: true,
            use_ws: true,
            access_token: None,
            secret: None,
            http_reverse: Vec::new(),
            webhooks: Vec::new(),
            ws_reverse: Vec::new(),
            heartbeat_interval: 15_000,
            post_timeout: 5,
            rate_limit_interval: 500,
            reconnect_interval: 3_000,
            message_format: MessageFormat::Array,
            webhook_failure_threshold: 0,
            webhook_suspend_secs: 60,
            filter: None,
        }
    }
}

impl InstanceConfig {
    /// All webhook targets (`http_reverse` followed by `webhooks`).
    pub fn webhook_targets(&self) -> impl Iterator<Item = &str> {
        self.http_reverse
            .iter()
            .chain(self.webhooks.iter())
            .map(String::as_str)
    }

    /// The access token, ignoring empty strings.
    pub fn token(&self) -> Option<&str> {
        self.access_token.as_deref().filter(|t| !t.is_empty())
    }

    /// The webhook secret, ignoring empty strings.
    pub fn signing_secret(&self) -> Option<&str> {
        self.secret.as_deref().filter(|s| !s.is_empty())
    }

    pub fn heartbeat(&self) -> Option<Duration> {
        (self.heartbeat_interval > 0).then(|| Duration::from_millis(self.heartbeat_interval))
    }

    pub fn post_timeout(&self) -> Duration {
        Duration::from_secs(self.post_timeout.max(1))
    }

    pub fn rate_limit_interval(&self) -> Duration {
        Duration::from_millis(self.rate_limit_interval)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval)
    }
}

// =============================================================================
// Endpoint & Sink
// =============================================================================

/// Inbound side of a protocol instance, as seen by transports.
#[async_trait]
pub trait ActionEndpoint: Send + Sync {
    /// Executes an action call.
    async fn call(&self, request: ActionRequest) -> ActionResponse;

    /// Builds a failure envelope for errors raised before dispatch
    /// (unparseable frames, rejected tokens).
    fn reject(&self, error: &ActionError, echo: Option<Value>) -> ActionResponse;

    /// Encoded frames pushed to every newly opened socket.
    fn greeting_frames(&self) -> Vec<String>;
}

/// Outbound side of a transport: receives encoded event payloads.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Short label for logs.
    fn describe(&self) -> String;

    /// Pushes one encoded event. Returns the consumer's synchronous reply,
    /// if the transport carries one.
    async fn push(&self, payload: Arc<str>) -> Option<Value>;
}

/// Shared sink handle.
pub type BoxedSink = Arc<dyn EventSink>;

/// Headers identifying the gateway to outbound targets.
#[derive(Debug, Clone, Default)]
pub struct ClientIdentity {
    /// Header name/value pairs.
    pub headers: Vec<(String, String)>,
    /// Token sent as `Authorization: Bearer <token>`.
    pub access_token: Option<String>,
}

impl ClientIdentity {
    /// Adds a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sets the bearer token.
    pub fn token(mut self, token: Option<&str>) -> Self {
        self.access_token = token.map(str::to_string);
        self
    }

    /// All headers including `Authorization`.
    pub fn all_headers(&self) -> Vec<(String, String)> {
        let mut headers = self.headers.clone();
        if let Some(token) = &self.access_token {
            headers.push(("Authorization".into(), format!("Bearer {token}")));
        }
        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_instance_config_defaults_and_overrides() {
        let config: InstanceConfig = serde_json::from_value(json!({
            "use_ws": false,
            "http_reverse": ["http://a"],
            "webhooks": ["http://b"],
            "heartbeat_interval": 0,
            "message_format": "string",
            "access_token": "",
        }))
        .unwrap();

        assert!(config.use_http);
        assert!(!config.use_ws);
        assert_eq!(config.webhook_targets().collect::<Vec<_>>(), ["http://a", "http://b"]);
        assert_eq!(config.heartbeat(), None);
        assert_eq!(config.message_format, MessageFormat::String);
        assert_eq!(config.token(), None);
    }

    #[test]
    fn test_client_identity_headers() {
        let identity = ClientIdentity::default()
            .header("X-Self-ID", "1")
            .token(Some("t"));
        assert_eq!(
            identity.all_headers(),
            vec![
                ("X-Self-ID".to_string(), "1".to_string()),
                ("Authorization".to_string(), "Bearer t".to_string()),
            ]
        );
    }
}
