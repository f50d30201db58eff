//! # onegate Core
//!
//! Protocol-neutral building blocks of the onegate gateway.
//!
//! onegate sits between chat platforms and bot programs. Platforms are
//! reached through [`Connector`]s; bot programs talk one of several wire
//! protocols (OneBot v11, v12), each described by a [`Protocol`].
//!
//! ```text
//! ┌───────────┐  CommonEvent  ┌──────────────────┐  encoded payload  ┌──────────┐
//! │ Connector │──────────────▶│ protocol instance│──────────────────▶│ consumer │
//! │ (platform)│◀──────────────│ (filter, codec)  │◀──────────────────│  (bot)   │
//! └───────────┘  raw-id calls └──────────────────┘   action calls    └──────────┘
//! ```
//!
//! ## Modules
//!
//! - [`event`]: the common event model ([`CommonEvent`])
//! - [`segment`] / [`markup`]: message segments and the `[CQ:...]` codec
//! - [`identity`]: raw id ↔ numeric alias mapping ([`IdentityMap`])
//! - [`filter`]: compiled event filters ([`Filter`])
//! - [`action`]: action envelopes, call modes and action tables
//! - [`connector`]: the platform interface ([`Connector`])
//! - [`protocol`]: the protocol interface ([`Protocol`])
//! - [`transport`]: instance configuration and transport seams

pub mod action;
pub mod connector;
pub mod error;
pub mod event;
pub mod filter;
pub mod identity;
pub mod markup;
pub mod protocol;
pub mod segment;
pub mod transport;

pub use action::{
    ActionFuture, ActionHandler, ActionRequest, ActionResponse, ActionSpec, ActionStatus,
    ActionTable, CallMode, Coerce, ParamSpec, Params, normalize_action,
};
pub use connector::{
    BoxedConnector, Connector, GroupInfo, GroupMemberInfo, MessageInfo, MessageReceipt,
    MessageTarget, UserInfo,
};
pub use error::{
    ActionError, ActionResult, ConnectorError, ConnectorResult, FilterError, FilterResult,
    TransportError, TransportResult,
};
pub use event::{
    CommonEvent, EventKind, EventType, GroupRef, MessageEvent, MessageScene, MetaEvent,
    NoticeEvent, RequestEvent, Sender,
};
pub use filter::Filter;
pub use identity::IdentityMap;
pub use markup::{escape_text, escape_value, parse_inline_markup, to_inline_markup, unescape};
pub use protocol::{BoxedProtocol, Protocol, ProtocolContext, ProtocolFactory};
pub use segment::{Message, Segment};
pub use transport::{
    ActionEndpoint, BoxedSink, ClientIdentity, EventSink, InstanceConfig, MessageFormat,
};
