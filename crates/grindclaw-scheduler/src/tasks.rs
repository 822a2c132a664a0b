//! Task descriptors: one per task kind, built once from config.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use grindclaw_core::config::{CommandsConfig, TaskKind, TaskSettings};
use rand::Rng;

use crate::state::AgentState;

/// Enable predicate evaluated at every tick.
pub type Gate = Arc<dyn Fn(&AgentState) -> bool + Send + Sync>;

/// How a task is started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Ticks on a fixed period.
    Interval(Duration),
    /// Runs when the agent signals it (low HP, scripted event).
    Event,
}

/// Immutable description of one task.
#[derive(Clone)]
pub struct TaskDescriptor {
    pub kind: TaskKind,
    pub name: String,
    pub trigger: Trigger,
    pub jitter_min: Duration,
    pub jitter_max: Duration,
    pub skip_chance: f64,
    /// Commands sent per run, in order.
    pub commands: Vec<String>,
    gate: Gate,
}

impl fmt::Debug for TaskDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskDescriptor")
            .field("kind", &self.kind)
            .field("trigger", &self.trigger)
            .field("jitter", &(self.jitter_min..=self.jitter_max))
            .field("skip_chance", &self.skip_chance)
            .field("commands", &self.commands)
            .finish()
    }
}

impl TaskDescriptor {
    /// Build from resolved settings. The gate is the config flag, plus
    /// "no mount owned" for horse maintenance.
    pub fn from_settings(settings: &TaskSettings) -> Self {
        let active = settings.active;
        let gate: Gate = match settings.kind {
            TaskKind::Horse => Arc::new(move |state: &AgentState| active && !state.has_mount),
            _ => Arc::new(move |_: &AgentState| active),
        };
        let trigger = if settings.kind.is_periodic() {
            Trigger::Interval(settings.period)
        } else {
            Trigger::Event
        };
        Self {
            kind: settings.kind,
            name: settings.kind.to_string(),
            trigger,
            jitter_min: settings.jitter_min,
            jitter_max: settings.jitter_max,
            skip_chance: settings.skip_chance,
            commands: settings.commands.clone(),
            gate,
        }
    }

    /// Replace the enable predicate.
    pub fn with_gate(mut self, gate: impl Fn(&AgentState) -> bool + Send + Sync + 'static) -> Self {
        self.gate = Arc::new(gate);
        self
    }

    pub fn is_enabled(&self, state: &AgentState) -> bool {
        (self.gate)(state)
    }

    /// Uniform delay within the jitter range.
    pub fn jitter(&self) -> Duration {
        sample_jitter(self.jitter_min, self.jitter_max, &mut rand::thread_rng())
    }

    /// Roll the per-tick skip chance.
    pub fn should_skip(&self) -> bool {
        roll_skip(self.skip_chance, &mut rand::thread_rng())
    }
}

pub fn sample_jitter<R: Rng>(min: Duration, max: Duration, rng: &mut R) -> Duration {
    if max <= min {
        return min;
    }
    let ms = rng.gen_range(min.as_millis()..=max.as_millis());
    Duration::from_millis(ms as u64)
}

pub fn roll_skip<R: Rng>(chance: f64, rng: &mut R) -> bool {
    if !chance.is_finite() || chance <= 0.0 {
        return false;
    }
    rng.gen_bool(chance.min(1.0))
}

/// One descriptor per task kind, in [`TaskKind::ALL`] order.
pub fn build_descriptors(commands: &CommandsConfig) -> Vec<TaskDescriptor> {
    TaskKind::ALL
        .iter()
        .map(|kind| TaskDescriptor::from_settings(&commands.task(*kind)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_descriptors_follow_config() {
        let mut commands = CommandsConfig::default();
        commands.quests.active = Some(true);
        let tasks = build_descriptors(&commands);
        assert_eq!(tasks.len(), TaskKind::ALL.len());

        let state = AgentState::default();
        let by_kind = |k: TaskKind| tasks.iter().find(|t| t.kind == k).unwrap();
        assert!(by_kind(TaskKind::Grinding).is_enabled(&state));
        assert!(by_kind(TaskKind::Quests).is_enabled(&state));
        assert!(!by_kind(TaskKind::Horse).is_enabled(&state));
        assert_eq!(by_kind(TaskKind::Grinding).trigger, Trigger::Interval(Duration::from_secs(60)));
        assert_eq!(by_kind(TaskKind::Healing).trigger, Trigger::Event);
    }

    #[test]
    fn test_horse_gate_needs_no_mount() {
        let mut commands = CommandsConfig::default();
        commands.horse.active = Some(true);
        let horse = TaskDescriptor::from_settings(&commands.task(TaskKind::Horse));
        let mut state = AgentState::default();
        assert!(horse.is_enabled(&state));
        state.has_mount = true;
        assert!(!horse.is_enabled(&state));
    }

    #[test]
    fn test_jitter_within_range() {
        let mut rng = StdRng::seed_from_u64(7);
        let (min, max) = (Duration::from_secs(1), Duration::from_secs(4));
        for _ in 0..200 {
            let d = sample_jitter(min, max, &mut rng);
            assert!(d >= min && d <= max);
        }
        assert_eq!(sample_jitter(max, min, &mut rng), max);
        assert_eq!(sample_jitter(Duration::ZERO, Duration::ZERO, &mut rng), Duration::ZERO);
    }

    #[test]
    fn test_skip_chance_extremes() {
        let mut rng = StdRng::seed_from_u64(7);
        assert!((0..100).all(|_| !roll_skip(0.0, &mut rng)));
        assert!((0..100).all(|_| roll_skip(1.0, &mut rng)));
        assert!(!roll_skip(f64::NAN, &mut rng));
        let skipped = (0..10_000).filter(|_| roll_skip(0.3, &mut rng)).count();
        assert!((2_500..3_500).contains(&skipped));
    }

    #[test]
    fn test_custom_gate() {
        let task = TaskDescriptor::from_settings(&CommandsConfig::default().task(TaskKind::Grinding))
            .with_gate(|s: &AgentState| s.heal_needed);
        assert!(!task.is_enabled(&AgentState::default()));
    }
}
