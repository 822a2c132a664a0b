//! GrindClaw error types.

/// Errors surfaced by GrindClaw crates.
#[derive(Debug, thiserror::Error)]
pub enum GrindClawError {
    #[error("Config error: {0}")]
    Config(String),

    /// The target channel handle is missing or not visible to the session.
    /// The current tick is skipped; the task resumes next tick.
    #[error("Channel unavailable: {0}")]
    ChannelUnavailable(String),

    /// The transport rejected or failed to deliver an outbound message.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// The transport session cannot be established or was revoked.
    #[error("Session unavailable: {0}")]
    SessionUnavailable(String),

    #[error("Telemetry error: {0}")]
    Telemetry(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl GrindClawError {
    /// Whether this error must halt the scheduler.
    pub fn is_fatal(&self) -> bool {
        matches!(self, GrindClawError::SessionUnavailable(_))
    }
}

pub type Result<T> = std::result::Result<T, GrindClawError>;
