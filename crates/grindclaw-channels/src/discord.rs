//! Discord channel: REST session check, message sending and a polling listener.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::Stream;
use grindclaw_core::error::{GrindClawError, Result};
use grindclaw_core::traits::{InboundStream, Transport};
use grindclaw_core::types::{InboundMessage, SessionInfo};
use reqwest::StatusCode;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

/// Messages fetched per poll.
const PAGE_SIZE: &str = "50";
/// Back-off after a failed poll.
const ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Discord REST transport.
pub struct DiscordChannel {
    client: reqwest::Client,
    api_base: String,
    token: String,
    poll_interval: Duration,
    cancel: CancellationToken,
}

impl DiscordChannel {
    pub fn new(api_base: &str, token: &str, poll_interval: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
            token: token.to_string(),
            poll_interval,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop the polling listener when `cancel` fires.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path.trim_start_matches('/'))
    }

    /// Bot tokens carry their own `Bot ` prefix; user tokens are sent bare.
    fn auth_header(&self) -> String {
        self.token.trim().to_string()
    }

    /// Fetch messages posted after `after` (oldest first), or the latest one.
    async fn fetch_messages(&self, channel_id: &str, after: Option<&str>) -> Result<Vec<DiscordMessage>> {
        let limit = if after.is_some() { PAGE_SIZE } else { "1" };
        let mut query = vec![("limit", limit.to_string())];
        if let Some(after) = after {
            query.push(("after", after.to_string()));
        }
        let response = self
            .client
            .get(self.api_url(&format!("channels/{channel_id}/messages")))
            .header("Authorization", self.auth_header())
            .query(&query)
            .send()
            .await
            .map_err(|e| GrindClawError::Http(format!("Discord fetch failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(map_status(status, &format!("channel {channel_id}")));
        }

        let mut messages: Vec<DiscordMessage> = response
            .json()
            .await
            .map_err(|e| GrindClawError::Http(format!("Invalid Discord response: {e}")))?;
        // API returns newest first
        messages.sort_by_key(|m| snowflake(&m.id));
        Ok(messages)
    }
}

/// Map a non-success HTTP status to the error taxonomy.
fn map_status(status: StatusCode, what: &str) -> GrindClawError {
    match status {
        StatusCode::UNAUTHORIZED => {
            GrindClawError::SessionUnavailable(format!("Discord rejected the token ({status})"))
        }
        StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => {
            GrindClawError::ChannelUnavailable(format!("{what}: {status}"))
        }
        _ => GrindClawError::SendFailed(format!("{what}: {status}")),
    }
}

fn snowflake(id: &str) -> u64 {
    id.parse().unwrap_or(0)
}

#[async_trait]
impl Transport for DiscordChannel {
    fn name(&self) -> &str {
        "discord"
    }

    async fn connect(&self) -> Result<SessionInfo> {
        let response = self
            .client
            .get(self.api_url("users/@me"))
            .header("Authorization", self.auth_header())
            .send()
            .await
            .map_err(|e| GrindClawError::SessionUnavailable(format!("Discord unreachable: {e}")))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(GrindClawError::SessionUnavailable(format!(
                "Discord rejected the token ({status})"
            )));
        }
        if !status.is_success() {
            return Err(GrindClawError::SessionUnavailable(format!("users/@me answered {status}")));
        }

        let me: DiscordUser = response
            .json()
            .await
            .map_err(|e| GrindClawError::SessionUnavailable(format!("Invalid users/@me response: {e}")))?;
        tracing::info!("Discord session: {} ({})", me.username, me.id);
        Ok(SessionInfo {
            user_id: me.id,
            username: me.username,
        })
    }

    async fn send(&self, channel_id: &str, text: &str) -> Result<()> {
        let body = serde_json::json!({ "content": text });
        let response = self
            .client
            .post(self.api_url(&format!("channels/{channel_id}/messages")))
            .header("Authorization", self.auth_header())
            .json(&body)
            .send()
            .await
            .map_err(|e| GrindClawError::SendFailed(format!("send to {channel_id} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(map_status(status, &format!("channel {channel_id}")));
        }
        Ok(())
    }

    async fn listen(&self, channel_id: &str) -> Result<InboundStream> {
        // Only messages newer than the latest one at start-up are delivered.
        let mut after = self
            .fetch_messages(channel_id, None)
            .await?
            .last()
            .map(|m| m.id.clone())
            .unwrap_or_else(|| "0".into());

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let poller = DiscordChannel {
            client: self.client.clone(),
            api_base: self.api_base.clone(),
            token: self.token.clone(),
            poll_interval: self.poll_interval,
            cancel: self.cancel.clone(),
        };
        let channel_id = channel_id.to_string();

        tokio::spawn(async move {
            tracing::info!("Discord polling loop started (#{channel_id})");
            loop {
                let wait = match poller.fetch_messages(&channel_id, Some(&after)).await {
                    Ok(messages) => {
                        for msg in messages {
                            after = msg.id.clone();
                            if tx.send(msg.to_inbound()).is_err() {
                                tracing::info!("Discord polling stopped (receiver dropped)");
                                return;
                            }
                        }
                        poller.poll_interval
                    }
                    Err(e) => {
                        tracing::error!("Discord polling error: {e}");
                        ERROR_BACKOFF
                    }
                };
                tokio::select! {
                    _ = poller.cancel.cancelled() => {
                        tracing::info!("Discord polling stopped");
                        return;
                    }
                    _ = tokio::time::sleep(wait) => {}
                }
            }
        });

        Ok(Box::new(DiscordPollingStream { rx }))
    }
}

/// Stream of inbound Discord messages from polling.
pub struct DiscordPollingStream {
    rx: tokio::sync::mpsc::UnboundedReceiver<InboundMessage>,
}

impl Stream for DiscordPollingStream {
    type Item = InboundMessage;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

// --- Discord API Types ---

#[derive(Debug, Clone, Deserialize)]
pub struct DiscordUser {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub bot: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscordMessage {
    pub id: String,
    pub channel_id: String,
    pub author: DiscordUser,
    #[serde(default)]
    pub content: String,
    pub timestamp: Option<String>,
    /// Embeds carry most game-bot replies.
    #[serde(default)]
    pub embeds: Vec<DiscordEmbed>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DiscordEmbed {
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub fields: Vec<DiscordEmbedField>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscordEmbedField {
    pub name: String,
    pub value: String,
}

impl DiscordMessage {
    /// Content plus any embed text, newline separated.
    pub fn full_text(&self) -> String {
        let mut parts: Vec<&str> = Vec::new();
        if !self.content.is_empty() {
            parts.push(&self.content);
        }
        for embed in &self.embeds {
            parts.extend(embed.title.as_deref());
            parts.extend(embed.description.as_deref());
            for field in &embed.fields {
                parts.push(&field.name);
                parts.push(&field.value);
            }
        }
        parts.join("\n")
    }

    pub fn to_inbound(&self) -> InboundMessage {
        let timestamp = self
            .timestamp
            .as_deref()
            .and_then(|t| chrono::DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&chrono::Utc))
            .unwrap_or_else(chrono::Utc::now);
        InboundMessage {
            id: self.id.clone(),
            channel_id: self.channel_id.clone(),
            author_id: self.author.id.clone(),
            author_name: Some(self.author.username.clone()),
            is_bot: self.author.bot,
            content: self.full_text(),
            timestamp,
        }
    }
}
