//! # onegate Transport
//!
//! Network transports that carry protocol traffic between a gateway
//! instance and its consumers.
//!
//! Transports are protocol-agnostic: inbound action calls go to an
//! [`ActionEndpoint`](onegate_core::ActionEndpoint), outbound events are
//! pushed through [`EventSink`](onegate_core::EventSink)s.
//!
//! ## Features
//!
//! - `http-server`: action calls over HTTP POST/GET on the shared server
//! - `ws-server`: forward WebSocket on the shared server
//! - `ws-client`: reverse WebSocket client with reconnect
//! - `http-client`: webhook event push with HMAC signatures
//! - `full` (default): everything above
//!
//! ## Transport Map
//!
//! | Transport | Direction | Type |
//! |-----------|-----------|------|
//! | HTTP API | consumer → gateway | [`GatewayServer`] mount |
//! | Forward WS | both, consumer dials | [`GatewayServer`] mount |
//! | Reverse WS | both, gateway dials | [`ReverseWsClient`] |
//! | Webhook | gateway → consumer | [`WebhookPusher`] |
//!
//! All instances share one listening [`GatewayServer`]; each instance
//! mounts its own path and unmounts it when the [`MountHandle`] drops.

pub mod auth;
pub mod frame;
pub mod generation;
pub mod heartbeat;

#[cfg(any(feature = "http-server", feature = "ws-server"))]
pub mod server;

#[cfg(feature = "ws-client")]
pub mod ws_client;

#[cfg(feature = "http-client")]
pub mod webhook;

pub use auth::{authorize, parse_authorization};
pub use frame::{encode_response, handle_frame};
pub use generation::Generation;
pub use heartbeat::spawn_heartbeat;

#[cfg(any(feature = "http-server", feature = "ws-server"))]
pub use server::{GatewayServer, MountHandle, MountOptions, SocketSet};

#[cfg(feature = "ws-client")]
pub use ws_client::{Dialer, Duplex, LinkState, ReverseWsClient, TungsteniteDialer};

#[cfg(feature = "http-client")]
pub use webhook::{WebhookOptions, WebhookPusher, sign};
