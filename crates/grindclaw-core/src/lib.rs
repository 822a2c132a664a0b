//! # GrindClaw Core
//!
//! Shared building blocks for every GrindClaw crate:
//! - `config`: typed TOML configuration, one gate per task category
//! - `error`: the error taxonomy (send failure, channel/session loss, ...)
//! - `types`: inbound chat messages and session identity
//! - `traits`: the `Transport` seam implemented by chat channels

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::GrindClawConfig;
pub use error::{GrindClawError, Result};
pub use traits::Transport;
pub use types::{InboundMessage, SessionInfo};
