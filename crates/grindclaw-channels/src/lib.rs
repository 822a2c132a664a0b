//! # GrindClaw Channels
//! Chat transports the agent can drive.
//!
//! - `discord` : REST API session: identity check, send, polling listener
//! - `loopback`: in-memory transport for dry runs and tests

pub mod discord;
pub mod loopback;

pub use discord::DiscordChannel;
pub use loopback::{FailureMode, LoopbackChannel};
