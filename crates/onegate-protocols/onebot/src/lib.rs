//! # onegate OneBot protocols
//!
//! OneBot v11 and v12 dialects for the onegate gateway.
//!
//! | | v11 | v12 |
//! |---|---|---|
//! | ids | integer aliases | raw strings |
//! | message | segment array or `[CQ:...]` string | segment array |
//! | event tag | `post_type` | `type` / `detail_type` |
//! | quick operations | reply, delete, kick, ban, approve | reply, delete |
//!
//! ```rust,ignore
//! use onegate_protocol_onebot::{OneBotV11, OneBotV12};
//!
//! registry.register("onebot", "v11", OneBotV11::factory());
//! registry.register("onebot", "v12", OneBotV12::factory());
//! ```

pub mod v11;
pub mod v12;

#[cfg(test)]
mod testing;

pub use v11::OneBotV11;
pub use v12::OneBotV12;

/// Protocol name shared by both versions.
pub const PROTOCOL_NAME: &str = "onebot";
