//! Loopback transport: records outbound sends and replays injected messages.
//!
//! Used by `grindclaw run --dry-run` and as the transport double in tests.

use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use grindclaw_core::error::{GrindClawError, Result};
use grindclaw_core::traits::{InboundStream, Transport};
use grindclaw_core::types::{InboundMessage, SessionInfo};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Failure a loopback channel can be told to simulate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    /// Every send fails with `SendFailed`.
    SendFailed,
    /// Every send fails with `ChannelUnavailable`.
    ChannelUnavailable,
    /// Session is gone: connect and send fail with `SessionUnavailable`.
    SessionLost,
}

/// An outbound message captured by the loopback channel.
#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub channel_id: String,
    pub text: String,
    pub at: DateTime<Utc>,
}

pub struct LoopbackChannel {
    session: SessionInfo,
    sent: Mutex<Vec<SentMessage>>,
    failure: Mutex<Option<FailureMode>>,
    inbound_tx: mpsc::UnboundedSender<InboundMessage>,
    inbound_rx: Mutex<Option<mpsc::UnboundedReceiver<InboundMessage>>>,
}

impl Default for LoopbackChannel {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl LoopbackChannel {
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            session: SessionInfo {
                user_id: "loopback-self".into(),
                username: "grindclaw".into(),
            },
            sent: Mutex::new(Vec::new()),
            failure: Mutex::new(None),
            inbound_tx,
            inbound_rx: Mutex::new(Some(inbound_rx)),
        }
    }

    /// Identity reported by `connect`.
    pub fn session(&self) -> &SessionInfo {
        &self.session
    }

    /// Texts sent so far, oldest first.
    pub fn sent_texts(&self) -> Vec<String> {
        lock(&self.sent).iter().map(|m| m.text.clone()).collect()
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        lock(&self.sent).clone()
    }

    /// Simulate a failure (None = healthy).
    pub fn set_failure(&self, mode: Option<FailureMode>) {
        *lock(&self.failure) = mode;
    }

    /// Deliver a message to whoever is listening.
    pub fn inject(&self, message: InboundMessage) {
        if self.inbound_tx.send(message).is_err() {
            tracing::debug!("[loopback] inbound message dropped (no listener)");
        }
    }
}

#[async_trait]
impl Transport for LoopbackChannel {
    fn name(&self) -> &str {
        "loopback"
    }

    async fn connect(&self) -> Result<SessionInfo> {
        if *lock(&self.failure) == Some(FailureMode::SessionLost) {
            return Err(GrindClawError::SessionUnavailable("loopback session revoked".into()));
        }
        Ok(self.session.clone())
    }

    async fn send(&self, channel_id: &str, text: &str) -> Result<()> {
        match *lock(&self.failure) {
            Some(FailureMode::SendFailed) => {
                return Err(GrindClawError::SendFailed(format!("loopback refused '{text}'")));
            }
            Some(FailureMode::ChannelUnavailable) => {
                return Err(GrindClawError::ChannelUnavailable(format!("channel {channel_id} not found")));
            }
            Some(FailureMode::SessionLost) => {
                return Err(GrindClawError::SessionUnavailable("loopback session revoked".into()));
            }
            None => {}
        }
        tracing::debug!("📤 [loopback] #{channel_id} ← {text}");
        lock(&self.sent).push(SentMessage {
            channel_id: channel_id.to_string(),
            text: text.to_string(),
            at: Utc::now(),
        });
        Ok(())
    }

    /// Only the first listener receives injected messages; later calls get an
    /// empty pending stream.
    async fn listen(&self, _channel_id: &str) -> Result<InboundStream> {
        match lock(&self.inbound_rx).take() {
            Some(rx) => Ok(Box::new(UnboundedReceiverStream::new(rx))),
            None => Ok(Box::new(futures::stream::pending())),
        }
    }
}
