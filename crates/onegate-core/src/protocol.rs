//! The protocol interface.
//!
//! A [`Protocol`] describes one consumer-facing wire dialect (OneBot v11,
//! OneBot v12, ...). It is stateless: everything an instance needs at runtime
//! is passed in through [`ProtocolContext`], and every instance builds its own
//! [`ActionTable`].

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::action::{ActionRequest, ActionTable};
use crate::connector::BoxedConnector;
use crate::error::ActionError;
use crate::event::CommonEvent;
use crate::identity::IdentityMap;
use crate::transport::{ClientIdentity, InstanceConfig};

/// Per-instance state handed to protocol hooks.
#[derive(Clone)]
pub struct ProtocolContext {
    /// Platform of the owning account.
    pub platform: String,
    /// Raw id of the owning account.
    pub account_id: String,
    /// The account's connector.
    pub connector: BoxedConnector,
    /// Process-wide identifier aliases.
    pub identities: Arc<IdentityMap>,
    /// Merged instance configuration.
    pub config: InstanceConfig,
}

impl fmt::Debug for ProtocolContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtocolContext")
            .field("platform", &self.platform)
            .field("account_id", &self.account_id)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// A consumer-facing protocol dialect.
pub trait Protocol: Send + Sync {
    /// Protocol name, e.g. `onebot`.
    fn name(&self) -> &'static str;

    /// Protocol version, e.g. `v11`.
    fn version(&self) -> &'static str;

    /// `name.version`, the key used in configuration.
    fn key(&self) -> String {
        format!("{}.{}", self.name(), self.version())
    }

    /// Builds the action table for one instance.
    fn build_actions(&self, ctx: &ProtocolContext) -> ActionTable;

    /// Encodes an event into this protocol's wire payload.
    ///
    /// Returns `None` for events the protocol has no representation for.
    fn encode_event(&self, event: &CommonEvent, ctx: &ProtocolContext) -> Option<Value>;

    /// Maps a generic action name to a specific one based on its parameters.
    /// Runs on the normalized name before handler lookup.
    fn resolve_alias(&self, _action: &str, _params: &Value) -> Option<String> {
        None
    }

    /// Translates a consumer's reply to an encoded event into follow-up
    /// action calls in this protocol's own vocabulary.
    fn quick_operation(&self, _context: &Value, _operation: &Value) -> Vec<ActionRequest> {
        Vec::new()
    }

    /// Protocol retcode for an error.
    fn retcode(&self, error: &ActionError) -> i64;

    /// Headers sent to webhook and reverse WebSocket targets.
    fn client_identity(&self, ctx: &ProtocolContext) -> ClientIdentity;
}

/// Shared protocol handle.
pub type BoxedProtocol = Arc<dyn Protocol>;

/// Creates protocol handles for the registry.
pub type ProtocolFactory = Arc<dyn Fn() -> BoxedProtocol + Send + Sync>;
