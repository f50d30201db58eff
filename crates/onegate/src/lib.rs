//! # onegate
//!
//! A bot-protocol gateway: one chat platform account, served to bot
//! programs over several protocols at once.
//!
//! ## Overview
//!
//! A platform connector produces [`CommonEvent`](onegate_core::CommonEvent)s
//! and executes outbound actions. Each account runs one protocol instance
//! per configured protocol; every instance filters, encodes and pushes
//! events to its own transports, and answers action calls coming back.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐     ┌─────────┐     ┌──────────────────────────────┐
//! │ Connector │────▶│ Account │────▶│ onebot.v11 instance          │──▶ HTTP / WS / webhooks
//! │ (platform)│     │         │────▶│ onebot.v12 instance          │──▶ HTTP / WS / webhooks
//! └───────────┘     └─────────┘     └──────────────────────────────┘
//!       ▲                                        │
//!       └────────────── action calls ────────────┘
//! ```
//!
//! - **Gateway**: account table, shared listener, configuration, logging
//! - **Account**: one platform login and its protocol instances
//! - **Protocol instance**: filter, codec, transports, action table
//! - **Connector**: your platform integration, implementing [`Connector`](onegate_core::Connector)
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//!
//! use onegate::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let gateway = Gateway::builder()
//!         .registry(onegate::default_registry())
//!         .build()?;
//!
//!     gateway.add_account(Arc::new(MyConnector::new())).await?;
//!     gateway.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `onebot`: OneBot v11 and v12 (default)
//! - `toml-config` / `yaml-config`: configuration file formats
//! - `json-log`: JSON log output
//! - `ws-server`, `http-server`, `ws-client`, `http-client`: transports

pub use onegate_core as core;
#[cfg(feature = "onebot")]
pub use onegate_protocol_onebot as onebot;
pub use onegate_runtime as runtime;
pub use onegate_transport as transport;

use onegate_runtime::ProtocolRegistry;

/// A registry with every bundled protocol.
pub fn default_registry() -> ProtocolRegistry {
    let registry = ProtocolRegistry::new();
    #[cfg(feature = "onebot")]
    {
        use onegate_protocol_onebot::{OneBotV11, OneBotV12, PROTOCOL_NAME};

        registry
            .register(PROTOCOL_NAME, "v11", OneBotV11::factory())
            .register(PROTOCOL_NAME, "v12", OneBotV12::factory());
    }
    registry
}

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use onegate::prelude::*;
/// ```
pub mod prelude {
    // Runtime - main entry point
    pub use onegate_runtime::{
        Account, AccountStatus, Gateway, GatewayBuilder, GatewayConfig, ProtocolRegistry,
        RuntimeError, RuntimeResult,
    };

    // Connector side - for platform integrations
    pub use onegate_core::{
        BoxedConnector, CommonEvent, Connector, ConnectorError, ConnectorResult, GroupInfo,
        GroupMemberInfo, Message, MessageEvent, MessageInfo, MessageReceipt, MessageTarget,
        NoticeEvent, RequestEvent, Segment, Sender, UserInfo,
    };

    // Protocol side - for custom protocols
    pub use onegate_core::{ActionTable, Protocol, ProtocolContext, ProtocolFactory};

    #[cfg(feature = "onebot")]
    pub use onegate_protocol_onebot::{OneBotV11, OneBotV12};

    pub use crate::default_registry;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(feature = "onebot")]
    #[test]
    fn test_default_registry_has_onebot() {
        let registry = default_registry();
        assert!(registry.contains("onebot", "v11"));
        assert!(registry.contains("onebot", "v12"));
        assert_eq!(registry.len(), 2);
    }
}
