//! Message and session types shared between transports and the agent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A message observed on a chat channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Transport-specific message ID.
    pub id: String,
    /// Channel the message was posted in.
    pub channel_id: String,
    /// Author identity.
    pub author_id: String,
    /// Display name of the author, if known.
    pub author_name: Option<String>,
    /// Whether the author is a bot account.
    pub is_bot: bool,
    /// Raw text content.
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl InboundMessage {
    /// Build a bot-authored message (mostly for tests and the loopback transport).
    pub fn from_bot(channel_id: &str, content: &str) -> Self {
        Self {
            id: format!("msg-{}", Utc::now().timestamp_micros()),
            channel_id: channel_id.to_string(),
            author_id: "game-bot".into(),
            author_name: Some("Game Bot".into()),
            is_bot: true,
            content: content.to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// Identity of the authenticated transport session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionInfo {
    pub user_id: String,
    pub username: String,
}
