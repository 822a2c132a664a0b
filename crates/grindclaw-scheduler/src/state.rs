//! Shared agent state: flags, per-task timestamps and counters.
//!
//! All mutation goes through [`AgentHandle::with`], which holds a
//! `std::sync::Mutex` for the duration of a synchronous closure. Nothing can
//! await inside it, so state changes of two tasks never interleave.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use grindclaw_core::config::{RewardKind, TaskKind};
use grindclaw_telemetry::TelemetryRecord;
use serde::Serialize;

/// Flags the classifier and scheduler coordinate through.
#[derive(Debug, Clone, Default)]
pub struct AgentState {
    /// A low-HP reply was seen and no heal has resolved it yet.
    pub heal_needed: bool,
    /// A heal action is currently sending.
    pub heal_in_flight: bool,
    pub has_mount: bool,
    pub last_run_at: HashMap<TaskKind, DateTime<Utc>>,
}

/// Monotonic totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsCounters {
    pub commands_sent: u64,
    pub resource_earned: u64,
    pub hoarded_items: u64,
    pub heals_performed: u64,
}

#[derive(Debug, Clone, Default)]
pub struct AgentCore {
    pub state: AgentState,
    pub stats: StatsCounters,
}

impl AgentCore {
    /// Mark a heal as needed. Returns false when one is already pending.
    pub fn request_heal(&mut self) -> bool {
        if self.state.heal_needed {
            return false;
        }
        self.state.heal_needed = true;
        true
    }

    /// Claim the pending heal. Returns false if there is nothing to do or a
    /// heal is already running.
    pub fn begin_heal(&mut self) -> bool {
        if !self.state.heal_needed || self.state.heal_in_flight {
            return false;
        }
        self.state.heal_in_flight = true;
        true
    }

    /// Resolve the heal. Both flags clear either way so the next low-HP reply
    /// can trigger a fresh attempt.
    pub fn finish_heal(&mut self, succeeded: bool) {
        self.state.heal_in_flight = false;
        self.state.heal_needed = false;
        if succeeded {
            self.stats.heals_performed += 1;
        }
    }

    pub fn record_send(&mut self, kind: TaskKind, at: DateTime<Utc>) {
        self.stats.commands_sent += 1;
        self.state.last_run_at.insert(kind, at);
    }

    pub fn add_reward(&mut self, kind: RewardKind, amount: u64) {
        let counter = match kind {
            RewardKind::Resource => &mut self.stats.resource_earned,
            RewardKind::Hoarded => &mut self.stats.hoarded_items,
        };
        *counter = counter.saturating_add(amount);
    }

    /// Returns true if the flag changed.
    pub fn set_mount(&mut self, has_mount: bool) -> bool {
        let changed = self.state.has_mount != has_mount;
        self.state.has_mount = has_mount;
        changed
    }
}

/// Cloneable handle to the single shared [`AgentCore`].
#[derive(Clone)]
pub struct AgentHandle {
    inner: Arc<Mutex<AgentCore>>,
    started_at: DateTime<Utc>,
}

impl Default for AgentHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentHandle {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(AgentCore::default())),
            started_at: Utc::now(),
        }
    }

    /// Run `f` with exclusive access to the core.
    pub fn with<R>(&self, f: impl FnOnce(&mut AgentCore) -> R) -> R {
        let mut core = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut core)
    }

    pub fn snapshot(&self) -> AgentCore {
        self.with(|core| core.clone())
    }

    pub fn stats(&self) -> StatsCounters {
        self.with(|core| core.stats)
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Cumulative counters as a telemetry record.
    pub fn counters_record(&self) -> TelemetryRecord {
        let s = self.stats();
        TelemetryRecord::counters(s.commands_sent, s.resource_earned, s.hoarded_items)
            .with_started_at(self.started_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heal_flags() {
        let mut core = AgentCore::default();
        assert!(!core.begin_heal(), "nothing to heal yet");
        assert!(core.request_heal());
        assert!(!core.request_heal(), "second request while pending is a no-op");
        assert!(core.begin_heal());
        assert!(!core.begin_heal(), "already in flight");
        assert!(!core.request_heal(), "still unresolved while in flight");
        core.finish_heal(true);
        assert!(!core.state.heal_needed);
        assert!(!core.state.heal_in_flight);
        assert_eq!(core.stats.heals_performed, 1);
        assert!(core.request_heal());
    }

    #[test]
    fn test_failed_heal_clears_without_counting() {
        let mut core = AgentCore::default();
        core.request_heal();
        core.begin_heal();
        core.finish_heal(false);
        assert!(!core.state.heal_needed);
        assert_eq!(core.stats.heals_performed, 0);
    }

    #[test]
    fn test_rewards_and_sends() {
        let handle = AgentHandle::new();
        handle.with(|c| {
            c.add_reward(RewardKind::Resource, 250);
            c.add_reward(RewardKind::Hoarded, 2);
            c.record_send(TaskKind::Grinding, Utc::now());
        });
        let stats = handle.stats();
        assert_eq!(stats.resource_earned, 250);
        assert_eq!(stats.hoarded_items, 2);
        assert_eq!(stats.commands_sent, 1);
        assert!(handle.snapshot().state.last_run_at.contains_key(&TaskKind::Grinding));

        let record = handle.counters_record();
        assert_eq!(record.resource_earned, Some(250));
        assert_eq!(record.agent_started_at, Some(handle.started_at()));
    }

    #[test]
    fn test_set_mount_reports_change() {
        let mut core = AgentCore::default();
        assert!(core.set_mount(true));
        assert!(!core.set_mount(true));
        assert!(core.set_mount(false));
    }
}
