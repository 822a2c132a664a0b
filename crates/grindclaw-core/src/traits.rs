//! Transport seam: the chat session the agent talks through.

use async_trait::async_trait;
use futures::stream::Stream;

use crate::error::Result;
use crate::types::{InboundMessage, SessionInfo};

/// Stream of inbound messages produced by [`Transport::listen`].
pub type InboundStream = Box<dyn Stream<Item = InboundMessage> + Send + Unpin>;

/// A chat transport: authenticated session, outbound send and inbound feed.
///
/// Error mapping expected from implementations:
/// - authentication/session failure → `GrindClawError::SessionUnavailable`
/// - unknown or inaccessible channel → `GrindClawError::ChannelUnavailable`
/// - any other delivery failure → `GrindClawError::SendFailed`
#[async_trait]
pub trait Transport: Send + Sync {
    /// Transport name (e.g. "discord").
    fn name(&self) -> &str;

    /// Establish/verify the session and return the agent's own identity.
    async fn connect(&self) -> Result<SessionInfo>;

    /// Send text to a channel.
    async fn send(&self, channel_id: &str, text: &str) -> Result<()>;

    /// Start listening on a channel.
    async fn listen(&self, channel_id: &str) -> Result<InboundStream>;
}
