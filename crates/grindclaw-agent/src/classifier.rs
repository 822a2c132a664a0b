//! Reply classifier: turns game-bot text into semantic events.
//!
//! Categories are checked in a fixed order and each yields at most one event:
//! 1. low HP → `HealNeeded`
//! 2. horse ownership → `Horse(..)` (no-mount, then insufficient-funds, then owns-mount)
//! 3. reward amount → `Reward { kind, amount }`
//! 4. scripted event → `ScriptedEvent { reply }` (only when events are enabled)
//!
//! Matching is case-insensitive substring search. A reward keyword only counts
//! when the token right before it is a plain integer; anything else is ignored.

use grindclaw_core::config::{PhraseConfig, RewardKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HorseEvent {
    NoMount,
    InsufficientFunds,
    OwnsMount,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassifiedEvent {
    HealNeeded,
    Horse(HorseEvent),
    Reward { kind: RewardKind, amount: u64 },
    ScriptedEvent { reply: String },
}

/// Lower-cased phrase lists, built once from config.
#[derive(Debug, Clone)]
pub struct PhraseTable {
    hp: Vec<String>,
    no_mount: Vec<String>,
    insufficient_funds: Vec<String>,
    owns_mount: Vec<String>,
    rewards: Vec<(String, RewardKind)>,
    events: Vec<(String, String)>,
    events_enabled: bool,
}

fn lowered(items: &[String]) -> Vec<String> {
    items
        .iter()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

impl PhraseTable {
    pub fn from_config(phrases: &PhraseConfig, events_enabled: bool) -> Self {
        Self {
            hp: lowered(&phrases.hp),
            no_mount: lowered(&phrases.no_mount),
            insufficient_funds: lowered(&phrases.insufficient_funds),
            owns_mount: lowered(&phrases.owns_mount),
            rewards: phrases
                .rewards
                .iter()
                .map(|(k, v)| (k.trim().to_lowercase(), *v))
                .collect(),
            events: phrases
                .events
                .iter()
                .map(|(phrase, reply)| (phrase.trim().to_lowercase(), reply.clone()))
                .collect(),
            events_enabled,
        }
    }
}

fn contains_any(text: &str, phrases: &[String]) -> bool {
    phrases.iter().any(|p| text.contains(p.as_str()))
}

/// Classify one message.
pub fn classify(text: &str, table: &PhraseTable) -> Vec<ClassifiedEvent> {
    let lower = text.to_lowercase();
    let mut events = Vec::new();

    if contains_any(&lower, &table.hp) {
        events.push(ClassifiedEvent::HealNeeded);
    }

    let horse = if contains_any(&lower, &table.no_mount) {
        Some(HorseEvent::NoMount)
    } else if contains_any(&lower, &table.insufficient_funds) {
        Some(HorseEvent::InsufficientFunds)
    } else if contains_any(&lower, &table.owns_mount) {
        Some(HorseEvent::OwnsMount)
    } else {
        None
    };
    if let Some(h) = horse {
        events.push(ClassifiedEvent::Horse(h));
    }

    if let Some((kind, amount)) = parse_reward(&lower, &table.rewards) {
        events.push(ClassifiedEvent::Reward { kind, amount });
    }

    if table.events_enabled
        && let Some((_, reply)) = table.events.iter().find(|(phrase, _)| lower.contains(phrase.as_str()))
    {
        events.push(ClassifiedEvent::ScriptedEvent { reply: reply.clone() });
    }

    events
}

/// First `<integer> <keyword>` pair in token order.
pub fn parse_reward(text: &str, keywords: &[(String, RewardKind)]) -> Option<(RewardKind, u64)> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    tokens.iter().enumerate().skip(1).find_map(|(i, token)| {
        let word = token
            .trim_end_matches(|c: char| c.is_ascii_punctuation())
            .to_lowercase();
        let kind = keywords.iter().find(|(k, _)| *k == word).map(|(_, kind)| *kind)?;
        let amount = parse_amount(tokens[i - 1])?;
        Some((kind, amount))
    })
}

fn parse_amount(token: &str) -> Option<u64> {
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    token.parse().ok()
}
