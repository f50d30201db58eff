//! Action calls: request/response envelopes and per-instance action tables.
//!
//! An action name may carry a mode suffix (`_async`, `_rate_limited`). Names
//! are normalized (camelCase to snake_case, leading `.` dropped, separators
//! folded to `_`) before lookup so `sendMsg`, `send-msg` and `.send_msg`
//! address the same handler.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ActionError, ActionResult};
use crate::segment::Message;

// ============================================================================
// Envelopes
// ============================================================================

/// An inbound action call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    /// Action name, possibly with a mode suffix.
    pub action: String,
    /// Parameters; `null` is treated as an empty object.
    #[serde(default)]
    pub params: Value,
    /// Opaque correlation value echoed back in the response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub echo: Option<Value>,
}

impl ActionRequest {
    /// Creates a request without an echo.
    pub fn new(action: impl Into<String>, params: Value) -> Self {
        Self {
            action: action.into(),
            params,
            echo: None,
        }
    }
}

/// Outcome classification in a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    /// Completed.
    Ok,
    /// Accepted for deferred execution.
    Async,
    /// Rejected or failed.
    Failed,
}

/// Retcode of a successful call.
pub const RETCODE_OK: i64 = 0;
/// Retcode of a call accepted for deferred execution.
pub const RETCODE_ASYNC: i64 = 1;

/// Response envelope for an action call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResponse {
    pub retcode: i64,
    pub status: ActionStatus,
    #[serde(default)]
    pub data: Value,
    /// Failure description, `null` on success.
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub echo: Option<Value>,
}

impl ActionResponse {
    /// A successful response.
    pub fn ok(data: Value) -> Self {
        Self {
            retcode: RETCODE_OK,
            status: ActionStatus::Ok,
            data,
            error: None,
            echo: None,
        }
    }

    /// Acknowledges a deferred call.
    pub fn accepted() -> Self {
        Self {
            retcode: RETCODE_ASYNC,
            status: ActionStatus::Async,
            data: Value::Null,
            error: None,
            echo: None,
        }
    }

    /// A failed response.
    pub fn failed(retcode: i64, error: impl Into<String>) -> Self {
        Self {
            retcode,
            status: ActionStatus::Failed,
            data: Value::Null,
            error: Some(error.into()),
            echo: None,
        }
    }

    /// Attaches the request's echo value.
    pub fn with_echo(mut self, echo: Option<Value>) -> Self {
        self.echo = echo;
        self
    }

    /// Returns `true` unless the call failed.
    pub fn is_success(&self) -> bool {
        self.status != ActionStatus::Failed
    }
}

// ============================================================================
// Call Modes & Names
// ============================================================================

/// How a call is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallMode {
    /// Await the handler and return its result.
    Sync,
    /// Run detached, acknowledge immediately.
    Async,
    /// Queue behind earlier rate-limited calls, acknowledge immediately.
    RateLimited,
}

impl CallMode {
    /// Splits a mode suffix off an action name.
    pub fn split(action: &str) -> (&str, CallMode) {
        if let Some(base) = action.strip_suffix("_rate_limited") {
            (base, CallMode::RateLimited)
        } else if let Some(base) = action.strip_suffix("_async") {
            (base, CallMode::Async)
        } else {
            (action, CallMode::Sync)
        }
    }
}

impl fmt::Display for CallMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CallMode::Sync => "sync",
            CallMode::Async => "async",
            CallMode::RateLimited => "rate_limited",
        })
    }
}

/// Normalizes an action name: drops leading dots, maps `-`, `.` and
/// whitespace to `_`, converts camelCase to snake_case and lowercases.
pub fn normalize_action(name: &str) -> String {
    let name = name.trim().trim_start_matches('.');
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev_lower = false;
    for c in name.chars() {
        if c == '-' || c == '.' || c.is_whitespace() {
            out.push('_');
            prev_lower = false;
        } else if c.is_ascii_uppercase() {
            if prev_lower {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
            prev_lower = false;
        } else {
            out.push(c);
            prev_lower = c.is_ascii_lowercase() || c.is_ascii_digit();
        }
    }
    out
}

// ============================================================================
// Parameters
// ============================================================================

/// Target type of a declared parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coerce {
    /// Forwarded as-is.
    Any,
    /// Strings; numbers and booleans are stringified.
    String,
    /// Integers; numeric strings are parsed.
    Integer,
    /// Booleans; `"true"`, `"1"`, `1` and friends are accepted.
    Bool,
    /// A string, segment or segment array.
    Message,
}

/// A declared action parameter.
#[derive(Debug, Clone, Copy)]
pub struct ParamSpec {
    pub name: &'static str,
    pub required: bool,
    pub coerce: Coerce,
}

impl ParamSpec {
    /// A required parameter.
    pub const fn required(name: &'static str, coerce: Coerce) -> Self {
        Self {
            name,
            required: true,
            coerce,
        }
    }

    /// An optional parameter.
    pub const fn optional(name: &'static str, coerce: Coerce) -> Self {
        Self {
            name,
            required: false,
            coerce,
        }
    }

    fn coerce(&self, value: &Value) -> ActionResult<Value> {
        let bad = |reason: &str| ActionError::bad_param(self.name, reason);
        match self.coerce {
            Coerce::Any => Ok(value.clone()),
            Coerce::String => match value {
                Value::String(_) => Ok(value.clone()),
                Value::Number(n) => Ok(Value::String(n.to_string())),
                Value::Bool(b) => Ok(Value::String(b.to_string())),
                _ => Err(bad("expected a string")),
            },
            Coerce::Integer => match value {
                Value::Number(n) => n
                    .as_i64()
                    .or_else(|| n.as_f64().map(|f| f as i64))
                    .map(Value::from)
                    .ok_or_else(|| bad("expected an integer")),
                Value::String(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(Value::from)
                    .map_err(|_| bad("expected an integer")),
                _ => Err(bad("expected an integer")),
            },
            Coerce::Bool => match value {
                Value::Bool(_) => Ok(value.clone()),
                Value::Number(n) => Ok(Value::Bool(n.as_f64().is_some_and(|f| f != 0.0))),
                Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                    "true" | "1" | "yes" | "on" => Ok(Value::Bool(true)),
                    "false" | "0" | "no" | "off" | "" => Ok(Value::Bool(false)),
                    _ => Err(bad("expected a boolean")),
                },
                _ => Err(bad("expected a boolean")),
            },
            Coerce::Message => match value {
                Value::String(_) | Value::Array(_) | Value::Object(_) => Ok(value.clone()),
                _ => Err(bad("expected a message")),
            },
        }
    }
}

/// Validated parameters handed to a handler.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params(Map<String, Value>);

impl Params {
    /// Wraps an already validated map.
    pub fn new(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// Raw value.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Returns `true` if the parameter was supplied.
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// A required string.
    pub fn str(&self, name: &str) -> ActionResult<&str> {
        self.opt_str(name)
            .ok_or_else(|| ActionError::MissingParam(name.to_string()))
    }

    /// An optional string.
    pub fn opt_str(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(Value::as_str)
    }

    /// A required integer.
    pub fn i64(&self, name: &str) -> ActionResult<i64> {
        self.opt_i64(name)
            .ok_or_else(|| ActionError::MissingParam(name.to_string()))
    }

    /// An optional integer.
    pub fn opt_i64(&self, name: &str) -> Option<i64> {
        self.0.get(name).and_then(Value::as_i64)
    }

    /// A boolean with a default.
    pub fn bool_or(&self, name: &str, default: bool) -> bool {
        self.0
            .get(name)
            .and_then(Value::as_bool)
            .unwrap_or(default)
    }

    /// A message. With `literal`, string input is taken as plain text
    /// instead of markup.
    pub fn message(&self, name: &str, literal: bool) -> ActionResult<Message> {
        match self.0.get(name) {
            Some(Value::String(s)) if literal => Ok(Message::from_text(s.as_str())),
            Some(value) => Message::from_value(value)
                .ok_or_else(|| ActionError::bad_param(name, "malformed message")),
            None => Err(ActionError::MissingParam(name.to_string())),
        }
    }

    /// The underlying map.
    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

// ============================================================================
// Action Table
// ============================================================================

/// Boxed future returned by action handlers.
pub type ActionFuture = BoxFuture<'static, ActionResult<Value>>;

/// Type-erased action handler.
pub type ActionHandler = Arc<dyn Fn(Params) -> ActionFuture + Send + Sync>;

/// A registered action: handler plus parameter schema.
#[derive(Clone)]
pub struct ActionSpec {
    pub handler: ActionHandler,
    pub params: Vec<ParamSpec>,
}

impl fmt::Debug for ActionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionSpec")
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl ActionSpec {
    /// Validates and coerces raw request parameters against the schema.
    ///
    /// Only declared parameters are forwarded; `null` counts as absent.
    pub fn bind(&self, raw: &Value) -> ActionResult<Params> {
        let empty = Map::new();
        let raw = match raw {
            Value::Object(map) => map,
            Value::Null => &empty,
            _ => return Err(ActionError::BadRequest("params must be an object".into())),
        };

        let mut bound = Map::new();
        for spec in &self.params {
            match raw.get(spec.name) {
                Some(Value::Null) | None if spec.required => {
                    return Err(ActionError::MissingParam(spec.name.to_string()));
                }
                Some(Value::Null) | None => {}
                Some(value) => {
                    bound.insert(spec.name.to_string(), spec.coerce(value)?);
                }
            }
        }
        Ok(Params(bound))
    }

    /// Binds parameters and starts the handler.
    pub fn call(&self, raw: &Value) -> ActionResult<ActionFuture> {
        let params = self.bind(raw)?;
        Ok((self.handler)(params))
    }
}

/// Per-instance table of action handlers keyed by normalized name.
#[derive(Debug, Clone, Default)]
pub struct ActionTable {
    actions: HashMap<String, ActionSpec>,
}

impl ActionTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler.
    pub fn register<F, Fut>(&mut self, name: &str, params: &[ParamSpec], handler: F) -> &mut Self
    where
        F: Fn(Params) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ActionResult<Value>> + Send + 'static,
    {
        let handler: ActionHandler = Arc::new(move |p| handler(p).boxed());
        self.actions.insert(
            normalize_action(name),
            ActionSpec {
                handler,
                params: params.to_vec(),
            },
        );
        self
    }

    /// Looks up a handler by (already normalized) name.
    pub fn get(&self, name: &str) -> Option<&ActionSpec> {
        self.actions.get(name)
    }

    /// Returns `true` if `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.actions.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered actions.
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Returns `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_mode_suffix() {
        assert_eq!(CallMode::split("send_msg"), ("send_msg", CallMode::Sync));
        assert_eq!(CallMode::split("send_msg_async"), ("send_msg", CallMode::Async));
        assert_eq!(
            CallMode::split("send_msg_rate_limited"),
            ("send_msg", CallMode::RateLimited)
        );
    }

    #[test]
    fn test_normalize_action() {
        assert_eq!(normalize_action("sendMsg"), "send_msg");
        assert_eq!(normalize_action("send_msg"), "send_msg");
        assert_eq!(normalize_action(".handle_quick_operation"), "handle_quick_operation");
        assert_eq!(normalize_action("getGroupMemberList"), "get_group_member_list");
        assert_eq!(normalize_action("get_version_info"), "get_version_info");
        assert_eq!(normalize_action("send-msg"), "send_msg");
        assert_eq!(normalize_action("send msg"), "send_msg");
        assert_eq!(normalize_action("send.group.msg"), "send_group_msg");
        assert_eq!(normalize_action("Get-Status"), "get_status");
    }

    #[test]
    fn test_envelope_serialization() {
        let ok = ActionResponse::ok(json!({"message_id": 1})).with_echo(Some(json!("e1")));
        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            json!({"retcode": 0, "status": "ok", "data": {"message_id": 1}, "error": null, "echo": "e1"})
        );

        let failed = ActionResponse::failed(1404, "nope");
        let value = serde_json::to_value(&failed).unwrap();
        assert_eq!(value["status"], "failed");
        assert!(value.get("echo").is_none());
        assert!(!failed.is_success());
        assert!(ActionResponse::accepted().is_success());
    }

    #[test]
    fn test_bind_coerces_and_drops_undeclared() {
        let spec = ActionSpec {
            handler: Arc::new(|_: Params| async { Ok::<_, ActionError>(Value::Null) }.boxed()),
            params: vec![
                ParamSpec::required("user_id", Coerce::Integer),
                ParamSpec::optional("auto_escape", Coerce::Bool),
                ParamSpec::optional("card", Coerce::String),
                ParamSpec::required("message", Coerce::Message),
            ],
        };

        let params = spec
            .bind(&json!({
                "user_id": "42",
                "auto_escape": "true",
                "card": 7,
                "message": "hi",
                "extra": 1,
            }))
            .unwrap();
        assert_eq!(params.i64("user_id").unwrap(), 42);
        assert!(params.bool_or("auto_escape", false));
        assert_eq!(params.opt_str("card"), Some("7"));
        assert!(!params.contains("extra"));

        assert!(matches!(
            spec.bind(&json!({ "message": "hi" })),
            Err(ActionError::MissingParam(name)) if name == "user_id"
        ));
        assert!(matches!(
            spec.bind(&json!({ "user_id": "abc", "message": "hi" })),
            Err(ActionError::BadParam { .. })
        ));
        assert!(matches!(
            spec.bind(&json!({ "user_id": 1, "message": 5 })),
            Err(ActionError::BadParam { .. })
        ));
    }

    #[test]
    fn test_message_param_literal() {
        let params = Params::new(
            json!({ "message": "[CQ:face,id=1]" })
                .as_object()
                .cloned()
                .unwrap(),
        );
        assert_eq!(params.message("message", true).unwrap().len(), 1);
        assert_eq!(params.message("message", true).unwrap().segments()[0].kind, "text");
        assert_eq!(params.message("message", false).unwrap().segments()[0].kind, "face");
    }

    #[tokio::test]
    async fn test_table_dispatch() {
        let mut table = ActionTable::new();
        table.register(
            "getStatus",
            &[ParamSpec::optional("verbose", Coerce::Bool)],
            |params| async move { Ok(json!({ "verbose": params.bool_or("verbose", false) })) },
        );

        assert!(table.contains("get_status"));
        assert_eq!(table.names(), vec!["get_status".to_string()]);

        let spec = table.get("get_status").unwrap();
        let data = spec.call(&json!({ "verbose": 1 })).unwrap().await.unwrap();
        assert_eq!(data, json!({ "verbose": true }));
    }
}
