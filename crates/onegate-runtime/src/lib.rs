//! onegate Runtime - Orchestration layer for the onegate gateway.
//!
//! This crate provides:
//! - Protocol registry (`ProtocolRegistry`), injected rather than global
//! - Protocol instances with their transports and heartbeat (`ProtocolInstance`)
//! - Action dispatch with call modes and the rate-limited queue (`ActionDispatcher`)
//! - Account orchestration (`Account`, `AccountStatus`)
//! - The gateway runtime (`Gateway`)
//! - Configuration loading and validation, logging
//!
//! # Transport Features
//!
//! Transports are compiled in through features passed to `onegate-transport`:
//!
//! - `ws-server`: forward WebSocket on the shared listener
//! - `http-server`: HTTP action endpoint on the shared listener
//! - `ws-client`: reverse WebSocket
//! - `http-client`: webhooks
//! - `full-transport` (default): all of the above
//!
//! An instance configured for a transport that is not compiled in logs a
//! warning and runs without it.
//!
//! ```ignore
//! use onegate_runtime::{Gateway, ProtocolRegistry};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let gateway = Gateway::builder()
//!         .protocol("onebot", "v11", OneBotV11::factory())
//!         .build()?;
//!
//!     gateway.add_account(connector).await?;
//!     gateway.run().await?;
//!     Ok(())
//! }
//! ```

pub mod account;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod instance;
pub mod logging;
pub mod registry;
pub mod runtime;

#[cfg(test)]
mod testing;

// Re-exports
pub use account::{Account, AccountStatus};
pub use config::{ConfigError, ConfigLoader, ConfigResult, GatewayConfig};
pub use dispatcher::{ActionDispatcher, QUICK_OPERATION_ACTION};
pub use error::{RuntimeError, RuntimeResult};
pub use instance::{InstanceResources, ProtocolInstance};
pub use logging::{LoggingBuilder, SpanEvents};
pub use registry::{ProtocolRegistry, protocol_key, split_key};
pub use runtime::{Gateway, GatewayBuilder};

// Re-export tracing for use by other crates
pub use tracing;
pub use tracing_subscriber;

/// Prelude module for convenient imports.
///
/// This provides all the commonly used logging macros:
/// - `trace!`, `debug!`, `info!`, `warn!`, `error!`
/// - `span`, `event`
/// - `instrument` attribute
/// - `Level` for span creation
pub mod prelude {
    pub use tracing::{Level, debug, error, event, info, instrument, span, trace, warn};
}
