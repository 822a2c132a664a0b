//! Telemetry ingest record: what the agent pushes and the gateway accepts.
//!
//! Every field is optional. Field names follow the dashboard's wire format
//! (`coins_earned` is accepted as an alias of `resource_earned`).

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

/// Per-field increments, used when the sender does not track cumulative totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterIncrements {
    #[serde(default)]
    pub commands: u64,
    #[serde(default)]
    pub resource: u64,
    #[serde(default)]
    pub hoarded: u64,
}

impl CounterIncrements {
    pub fn is_zero(&self) -> bool {
        self.commands == 0 && self.resource == 0 && self.hoarded == 0
    }
}

/// One telemetry push.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    /// Cumulative commands sent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commands_sent: Option<u64>,
    /// Cumulative resource (coins) earned.
    #[serde(default, alias = "coins_earned", skip_serializing_if = "Option::is_none")]
    pub resource_earned: Option<u64>,
    /// Cumulative hoarded items.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hoarded_items: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sent_command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parsed_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_time: Option<String>,
    /// Short tag describing a decision the agent took ("heal", "horse: no mount").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub critical_failure: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub increments: Option<CounterIncrements>,
    /// When the agent process started; drives uptime on the dashboard.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_started_at: Option<DateTime<Utc>>,
}

/// Wall-clock label used in event lines.
pub fn clock_label() -> String {
    Local::now().format("%H:%M:%S").to_string()
}

impl TelemetryRecord {
    /// Record carrying cumulative counters only.
    pub fn counters(commands_sent: u64, resource_earned: u64, hoarded_items: u64) -> Self {
        Self {
            commands_sent: Some(commands_sent),
            resource_earned: Some(resource_earned),
            hoarded_items: Some(hoarded_items),
            ..Default::default()
        }
    }

    pub fn with_sent(mut self, command: &str) -> Self {
        self.last_sent_command = Some(command.to_string());
        self.command_time = Some(clock_label());
        self
    }

    pub fn with_message(mut self, text: &str) -> Self {
        self.parsed_message = Some(text.to_string());
        self.message_time = Some(clock_label());
        self
    }

    pub fn with_decision(mut self, tag: &str) -> Self {
        self.decision = Some(tag.to_string());
        self
    }

    pub fn with_failure(mut self, description: &str) -> Self {
        self.critical_failure = Some(description.to_string());
        self
    }

    pub fn with_increments(mut self, increments: CounterIncrements) -> Self {
        self.increments = Some(increments);
        self
    }

    pub fn with_started_at(mut self, started_at: DateTime<Utc>) -> Self {
        self.agent_started_at = Some(started_at);
        self
    }

    /// Whether any counter (cumulative or incremental) is present.
    pub fn has_counters(&self) -> bool {
        self.commands_sent.is_some()
            || self.resource_earned.is_some()
            || self.hoarded_items.is_some()
            || self.increments.is_some_and(|i| !i.is_zero())
    }

    /// Event-log lines this record produces, oldest first.
    pub fn event_lines(&self, now_label: &str) -> Vec<String> {
        let mut lines = Vec::new();
        if let Some(cmd) = &self.last_sent_command {
            let at = self.command_time.as_deref().unwrap_or(now_label);
            lines.push(format!("{at} - Sent: `{cmd}`"));
        }
        if let Some(msg) = &self.parsed_message {
            let at = self.message_time.as_deref().unwrap_or(now_label);
            lines.push(format!("{at} - Received: \"{msg}\""));
        }
        if let Some(tag) = &self.decision {
            lines.push(format!("{now_label} - Decision: {tag}"));
        }
        if let Some(failure) = &self.critical_failure {
            lines.push(format!("{now_label} - FAILED: {failure}"));
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_dashboard_wire_names() {
        let json = r#"{"commands_sent": 12, "coins_earned": 340, "last_sent_command": "rpg hunt", "command_time": "10:00:00"}"#;
        let rec: TelemetryRecord = serde_json::from_str(json).unwrap();
        assert_eq!(rec.commands_sent, Some(12));
        assert_eq!(rec.resource_earned, Some(340));
        assert!(rec.hoarded_items.is_none());
        assert_eq!(rec.event_lines("10:00:05"), vec!["10:00:00 - Sent: `rpg hunt`"]);
    }

    #[test]
    fn test_empty_object_is_valid() {
        let rec: TelemetryRecord = serde_json::from_str("{}").unwrap();
        assert_eq!(rec, TelemetryRecord::default());
        assert!(!rec.has_counters());
        assert!(rec.event_lines("00:00:00").is_empty());
    }

    #[test]
    fn test_event_lines_order() {
        let rec = TelemetryRecord::default()
            .with_message("Your remaining HP is 20/100")
            .with_decision("heal")
            .with_failure("send failed: 429");
        let lines = rec.event_lines("12:00:00");
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("Received: \"Your remaining HP is 20/100\""));
        assert_eq!(lines[1], "12:00:00 - Decision: heal");
        assert_eq!(lines[2], "12:00:00 - FAILED: send failed: 429");
    }

    #[test]
    fn test_zero_increments_are_not_counters() {
        let rec = TelemetryRecord::default().with_increments(CounterIncrements::default());
        assert!(!rec.has_counters());
        let rec = rec.with_increments(CounterIncrements { commands: 1, ..Default::default() });
        assert!(rec.has_counters());
    }
}
