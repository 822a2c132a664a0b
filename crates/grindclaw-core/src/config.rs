//! GrindClaw configuration system.
//!
//! Every section and field has a default, so an empty file is a valid config.
//! Per-task settings are optional in the file and resolved against the
//! defaults of their [`TaskKind`] via [`CommandsConfig::task`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{GrindClawError, Result};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GrindClawConfig {
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub commands: CommandsConfig,
    #[serde(default)]
    pub phrases: PhraseConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub power: PowerConfig,
}

impl GrindClawConfig {
    /// Load config from the default path (~/.grindclaw/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| GrindClawError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| GrindClawError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to a path, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = self.to_toml()?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Serialize to pretty TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| GrindClawError::Config(format!("Failed to serialize config: {e}")))
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the GrindClaw home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".grindclaw")
    }

    /// Reject settings the scheduler cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.agent.transport == TransportKind::Discord && self.agent.channel_id.trim().is_empty() {
            return Err(GrindClawError::Config(
                "agent.channel_id is required for the discord transport".into(),
            ));
        }
        for kind in TaskKind::ALL {
            let raw = self.commands.raw(kind);
            for (field, value) in [
                ("jitter_min_secs", raw.jitter_min_secs),
                ("jitter_max_secs", raw.jitter_max_secs),
            ] {
                if let Some(v) = value
                    && !(0.0..=MAX_JITTER_SECS).contains(&v)
                {
                    return Err(GrindClawError::Config(format!(
                        "commands.{kind}.{field} must be within [0, {MAX_JITTER_SECS}], got {v}"
                    )));
                }
            }
            let task = self.commands.task(kind);
            if !(0.0..=1.0).contains(&task.skip_chance) {
                return Err(GrindClawError::Config(format!(
                    "commands.{kind}.skip_chance must be within [0, 1], got {}",
                    task.skip_chance
                )));
            }
            if kind.is_periodic() && task.period.is_zero() {
                return Err(GrindClawError::Config(format!(
                    "commands.{kind}.period_secs must be greater than zero"
                )));
            }
            if task.jitter_min > task.jitter_max {
                return Err(GrindClawError::Config(format!(
                    "commands.{kind}: jitter_min_secs exceeds jitter_max_secs"
                )));
            }
        }
        if self.telemetry.push_interval_secs == 0 {
            return Err(GrindClawError::Config(
                "telemetry.push_interval_secs must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Which chat transport the agent uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Discord REST API with a user/bot token.
    Discord,
    /// In-memory transport: sends are logged, nothing is received.
    Loopback,
}

/// Agent/session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Channel the agent posts commands to and listens on.
    #[serde(default)]
    pub channel_id: String,
    #[serde(default = "default_transport")]
    pub transport: TransportKind,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// How often the inbound feed is polled.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

fn default_transport() -> TransportKind { TransportKind::Discord }
fn default_api_base() -> String { "https://discord.com/api/v10".into() }
fn default_poll_interval() -> u64 { 2 }

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            channel_id: String::new(),
            transport: default_transport(),
            api_base: default_api_base(),
            poll_interval_secs: default_poll_interval(),
        }
    }
}

/// Task categories, one gate each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Main grind loop (hunt).
    Grinding,
    /// Adventure battles.
    Battling,
    Quests,
    Daily,
    /// Horse maintenance. Only runs while no mount is owned.
    Horse,
    /// Event-triggered: runs when a low-HP reply is seen.
    Healing,
    /// Event-triggered: answers scripted in-game events.
    Events,
}

impl TaskKind {
    pub const ALL: [TaskKind; 7] = [
        TaskKind::Grinding,
        TaskKind::Battling,
        TaskKind::Quests,
        TaskKind::Daily,
        TaskKind::Horse,
        TaskKind::Healing,
        TaskKind::Events,
    ];

    /// Time-triggered tasks tick on a period; the rest wait for a trigger.
    pub fn is_periodic(&self) -> bool {
        !matches!(self, TaskKind::Healing | TaskKind::Events)
    }

    fn default_active(&self) -> bool {
        matches!(
            self,
            TaskKind::Grinding | TaskKind::Battling | TaskKind::Daily | TaskKind::Healing
        )
    }

    fn default_commands(&self) -> Vec<String> {
        let cmds: &[&str] = match self {
            TaskKind::Grinding => &["rpg hunt"],
            TaskKind::Battling => &["rpg adventure"],
            TaskKind::Quests => &["rpg quest"],
            TaskKind::Daily => &["rpg daily"],
            TaskKind::Horse => &["rpg horse"],
            TaskKind::Healing => &["rpg heal", "rpg buy life potion"],
            // Replies come from the matched phrase.
            TaskKind::Events => &[],
        };
        cmds.iter().map(|c| c.to_string()).collect()
    }

    fn default_period_secs(&self) -> u64 {
        match self {
            TaskKind::Grinding | TaskKind::Battling => 60,
            TaskKind::Quests | TaskKind::Horse => 3600,
            TaskKind::Daily => 86_400,
            TaskKind::Healing | TaskKind::Events => 0,
        }
    }

    fn default_skip_chance(&self) -> f64 {
        match self {
            TaskKind::Grinding | TaskKind::Battling => 0.10,
            TaskKind::Quests => 0.30,
            _ => 0.0,
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TaskKind::Grinding => "grinding",
            TaskKind::Battling => "battling",
            TaskKind::Quests => "quests",
            TaskKind::Daily => "daily",
            TaskKind::Horse => "horse",
            TaskKind::Healing => "healing",
            TaskKind::Events => "events",
        };
        write!(f, "{name}")
    }
}

/// One `[commands.<task>]` table. Unset fields fall back to the task's defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commands: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jitter_min_secs: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jitter_max_secs: Option<f64>,
    /// Probability that a tick is skipped outright.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_chance: Option<f64>,
}

/// Fully resolved settings for one task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskSettings {
    pub kind: TaskKind,
    pub active: bool,
    pub commands: Vec<String>,
    pub period: Duration,
    pub jitter_min: Duration,
    pub jitter_max: Duration,
    pub skip_chance: f64,
}

/// Typed per-task gates and settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandsConfig {
    #[serde(default)]
    pub grinding: TaskConfig,
    #[serde(default)]
    pub battling: TaskConfig,
    #[serde(default)]
    pub quests: TaskConfig,
    #[serde(default)]
    pub daily: TaskConfig,
    #[serde(default)]
    pub horse: TaskConfig,
    #[serde(default)]
    pub healing: TaskConfig,
    #[serde(default)]
    pub events: TaskConfig,
}

const DEFAULT_JITTER_MIN_SECS: f64 = 1.0;
const DEFAULT_JITTER_MAX_SECS: f64 = 4.0;
/// Upper bound accepted for a jitter delay (one day).
const MAX_JITTER_SECS: f64 = 86_400.0;

impl CommandsConfig {
    /// Raw table for a task kind.
    pub fn raw(&self, kind: TaskKind) -> &TaskConfig {
        match kind {
            TaskKind::Grinding => &self.grinding,
            TaskKind::Battling => &self.battling,
            TaskKind::Quests => &self.quests,
            TaskKind::Daily => &self.daily,
            TaskKind::Horse => &self.horse,
            TaskKind::Healing => &self.healing,
            TaskKind::Events => &self.events,
        }
    }

    /// Resolve a task's settings against its defaults.
    pub fn task(&self, kind: TaskKind) -> TaskSettings {
        let raw = self.raw(kind);
        let secs = |v: f64| Duration::try_from_secs_f64(v.max(0.0)).unwrap_or(Duration::ZERO);
        TaskSettings {
            kind,
            active: raw.active.unwrap_or_else(|| kind.default_active()),
            commands: raw
                .commands
                .clone()
                .filter(|c| !c.is_empty())
                .unwrap_or_else(|| kind.default_commands()),
            period: Duration::from_secs(raw.period_secs.unwrap_or_else(|| kind.default_period_secs())),
            jitter_min: secs(raw.jitter_min_secs.unwrap_or(DEFAULT_JITTER_MIN_SECS)),
            jitter_max: secs(raw.jitter_max_secs.unwrap_or(DEFAULT_JITTER_MAX_SECS)),
            skip_chance: raw.skip_chance.unwrap_or_else(|| kind.default_skip_chance()),
        }
    }

    /// Whether a task category is switched on.
    pub fn is_active(&self, kind: TaskKind) -> bool {
        self.task(kind).active
    }
}

/// Counter a reward keyword feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewardKind {
    /// The main currency (coins).
    Resource,
    /// Hoarded items.
    Hoarded,
}

/// Phrase tables for the message classifier. Matching is case-insensitive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhraseConfig {
    #[serde(default = "default_hp_phrases")]
    pub hp: Vec<String>,
    #[serde(default = "default_no_mount")]
    pub no_mount: Vec<String>,
    #[serde(default = "default_owns_mount")]
    pub owns_mount: Vec<String>,
    #[serde(default = "default_insufficient_funds")]
    pub insufficient_funds: Vec<String>,
    /// Unit keyword → counter, e.g. `coins = "resource"`.
    #[serde(default = "default_rewards")]
    pub rewards: BTreeMap<String, RewardKind>,
    /// Scripted event phrase → reply to send.
    #[serde(default = "default_events")]
    pub events: BTreeMap<String, String>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn default_hp_phrases() -> Vec<String> { strings(&["remaining hp"]) }
fn default_no_mount() -> Vec<String> {
    strings(&["you don't have a horse", "you do not have a horse"])
}
fn default_owns_mount() -> Vec<String> { strings(&["your horse", "horse tier"]) }
fn default_insufficient_funds() -> Vec<String> {
    strings(&["you don't have enough coins", "not enough coins"])
}
fn default_rewards() -> BTreeMap<String, RewardKind> {
    BTreeMap::from([
        ("coins".to_string(), RewardKind::Resource),
        ("hoarded".to_string(), RewardKind::Hoarded),
    ])
}
fn default_events() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("epic tree".to_string(), "CHOP".to_string()),
        ("megalodon".to_string(), "FISH".to_string()),
        ("raining coins".to_string(), "CATCH".to_string()),
        ("legendary boss".to_string(), "TIME TO FIGHT".to_string()),
    ])
}

impl Default for PhraseConfig {
    fn default() -> Self {
        Self {
            hp: default_hp_phrases(),
            no_mount: default_no_mount(),
            owns_mount: default_owns_mount(),
            insufficient_funds: default_insufficient_funds(),
            rewards: default_rewards(),
            events: default_events(),
        }
    }
}

/// Telemetry push configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Remote ingest URL. Empty = feed an in-process gateway store.
    #[serde(default)]
    pub endpoint: String,
    #[serde(default = "default_push_interval")]
    pub push_interval_secs: u64,
    /// Pairing code sent as `X-Pairing-Code` on pushes.
    #[serde(default)]
    pub token: String,
    /// Pending pushes beyond this are dropped.
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_push_interval() -> u64 { 5 }
fn default_queue_size() -> usize { 256 }
fn default_request_timeout() -> u64 { 5 }

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            push_interval_secs: default_push_interval(),
            token: String::new(),
            queue_size: default_queue_size(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Telemetry gateway (HTTP) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default)]
    pub require_pairing: bool,
}

fn default_port() -> u16 { 5000 }
fn default_host() -> String { "127.0.0.1".into() }

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            require_pairing: false,
        }
    }
}

/// Battery gate for phones running the agent under Termux.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PowerConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Ticks pause at or below this battery percentage.
    #[serde(default = "default_threshold")]
    pub threshold_percent: u8,
    #[serde(default = "default_probe_command")]
    pub probe_command: String,
}

fn default_threshold() -> u8 { 5 }
fn default_probe_command() -> String { "termux-battery-status".into() }

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold_percent: default_threshold(),
            probe_command: default_probe_command(),
        }
    }
}
