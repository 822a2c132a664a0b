//! # GrindClaw Agent
//!
//! Connects the transport, starts the scheduler and applies classified
//! replies to the shared agent state.
//!
//! ```text
//! Transport.listen() ──► filter (bot, our channel, not us)
//!                          └── classify() ──► AgentState / StatsCounters
//!                                              ├── HealNeeded → SchedulerControl::request_heal
//!                                              └── ScriptedEvent → SchedulerControl::trigger_event
//! ```

pub mod classifier;

use std::sync::Arc;

use futures::StreamExt;
use grindclaw_core::config::{GrindClawConfig, RewardKind, TaskKind};
use grindclaw_core::error::Result;
use grindclaw_core::traits::{InboundStream, Transport};
use grindclaw_core::types::InboundMessage;
use grindclaw_scheduler::{AgentHandle, SchedulerControl, SchedulerEngine};
use grindclaw_telemetry::TelemetrySync;
use tokio_util::sync::CancellationToken;

pub use classifier::{ClassifiedEvent, HorseEvent, PhraseTable, classify, parse_reward};

/// Longest message excerpt kept in the event log.
const LOG_EXCERPT_CHARS: usize = 120;

/// The running agent.
pub struct Agent {
    config: GrindClawConfig,
    transport: Arc<dyn Transport>,
    handle: AgentHandle,
    phrases: PhraseTable,
    telemetry: Option<TelemetrySync>,
}

impl Agent {
    pub fn new(config: GrindClawConfig, transport: Arc<dyn Transport>) -> Self {
        let events_enabled = config.commands.is_active(TaskKind::Events);
        let phrases = PhraseTable::from_config(&config.phrases, events_enabled);
        Self {
            config,
            transport,
            handle: AgentHandle::new(),
            phrases,
            telemetry: None,
        }
    }

    pub fn with_telemetry(mut self, sync: TelemetrySync) -> Self {
        self.telemetry = Some(sync);
        self
    }

    /// Shared state handle (counters are read from here for telemetry).
    pub fn handle(&self) -> AgentHandle {
        self.handle.clone()
    }

    /// Only bot replies in our channel, never our own messages.
    pub fn should_classify(&self, msg: &InboundMessage, self_id: &str) -> bool {
        msg.is_bot && msg.channel_id == self.config.agent.channel_id && msg.author_id != self_id
    }

    /// Classify a message and apply its events.
    pub fn apply(&self, msg: &InboundMessage, control: &SchedulerControl) -> Vec<ClassifiedEvent> {
        let events = classify(&msg.content, &self.phrases);
        if events.is_empty() {
            return events;
        }

        let mut decisions = Vec::with_capacity(events.len());
        for event in &events {
            match event {
                ClassifiedEvent::HealNeeded => {
                    if control.request_heal() {
                        tracing::info!("🩹 Low HP, heal requested");
                        decisions.push("heal".to_string());
                    } else {
                        tracing::debug!("Low HP again, heal already pending");
                    }
                }
                ClassifiedEvent::Horse(horse) => {
                    let (has_mount, tag) = match horse {
                        HorseEvent::NoMount => (Some(false), "horse: no mount"),
                        HorseEvent::OwnsMount => (Some(true), "horse: mount owned"),
                        HorseEvent::InsufficientFunds => (None, "horse: insufficient funds"),
                    };
                    if let Some(flag) = has_mount
                        && self.handle.with(|core| core.set_mount(flag))
                    {
                        tracing::info!("🐎 {tag}");
                    }
                    decisions.push(tag.to_string());
                }
                ClassifiedEvent::Reward { kind, amount } => {
                    self.handle.with(|core| core.add_reward(*kind, *amount));
                    let unit = match kind {
                        RewardKind::Resource => "resource",
                        RewardKind::Hoarded => "hoarded",
                    };
                    decisions.push(format!("reward: +{amount} {unit}"));
                }
                ClassifiedEvent::ScriptedEvent { reply } => {
                    tracing::info!("🎯 Scripted event, answering `{reply}`");
                    control.trigger_event(reply);
                    decisions.push(format!("event: {reply}"));
                }
            }
        }

        if let Some(sync) = &self.telemetry {
            let mut record = self.handle.counters_record().with_message(&excerpt(&msg.content));
            if !decisions.is_empty() {
                record = record.with_decision(&decisions.join("; "));
            }
            sync.record(record);
        }
        events
    }

    /// Run until cancelled or until the session is lost.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let session = self.transport.connect().await?;
        let channel_id = self.config.agent.channel_id.clone();
        tracing::info!(
            "🤖 Agent '{}' on {} (#{channel_id})",
            session.username,
            self.transport.name()
        );

        let mut inbound: InboundStream = match self.transport.listen(&channel_id).await {
            Ok(stream) => stream,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                tracing::warn!("⚠️ Inbound feed unavailable, running without replies: {e}");
                Box::new(futures::stream::pending())
            }
        };

        let mut engine = SchedulerEngine::from_config(&self.config, self.transport.clone(), self.handle.clone());
        if let Some(sync) = &self.telemetry {
            engine = engine.with_telemetry(sync.clone());
        }
        let mut scheduler = engine.start(cancel.child_token());
        let control = scheduler.control();

        let outcome = loop {
            tokio::select! {
                _ = cancel.cancelled() => break Ok(()),
                result = scheduler.wait() => break result,
                msg = inbound.next() => match msg {
                    Some(msg) => {
                        if self.should_classify(&msg, &session.user_id) {
                            self.apply(&msg, &control);
                        }
                    }
                    None => {
                        tracing::warn!("⚠️ Inbound feed closed");
                        inbound = Box::new(futures::stream::pending());
                    }
                },
            }
        };

        scheduler.shutdown();
        let drained = scheduler.wait().await;
        tracing::info!("🤖 Agent stopped");
        outcome.and(drained)
    }
}

fn excerpt(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= LOG_EXCERPT_CHARS {
        return flat;
    }
    let cut: String = flat.chars().take(LOG_EXCERPT_CHARS).collect();
    format!("{cut}…")
}
