//! Scheduler engine: one ticker per periodic task plus event-triggered workers.
//!
//! Every worker runs in a shared `JoinSet` and watches one cancellation token.
//! Send failures and missing channels cost a tick; a lost session halts
//! everything.

use std::sync::Arc;

use chrono::Utc;
use grindclaw_core::config::{GrindClawConfig, TaskKind};
use grindclaw_core::error::{GrindClawError, Result};
use grindclaw_core::traits::Transport;
use grindclaw_telemetry::{TelemetryRecord, TelemetrySync};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::power::PowerGate;
use crate::state::AgentHandle;
use crate::tasks::{TaskDescriptor, Trigger, build_descriptors};

/// Pending scripted-event replies beyond this are dropped.
const EVENT_QUEUE: usize = 8;

/// What happened on one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Every command was delivered.
    Sent,
    /// The skip roll came up, or there was nothing to do.
    Skipped,
    /// The gate is closed.
    Disabled,
    /// Battery gate.
    Paused,
    ChannelUnavailable,
    /// A send failed; the rest of the run was abandoned.
    Failed,
}

/// Shared context every worker runs against.
struct TaskRunner {
    transport: Arc<dyn Transport>,
    channel_id: String,
    agent: AgentHandle,
    telemetry: Option<TelemetrySync>,
    power: Option<PowerGate>,
}

impl TaskRunner {
    fn push(&self, record: TelemetryRecord) {
        if let Some(sync) = &self.telemetry {
            sync.record(record);
        }
    }

    /// Send `commands` in order, waiting a jittered delay between them.
    async fn send_all(&self, task: &TaskDescriptor, commands: &[String]) -> Result<TickOutcome> {
        for (i, command) in commands.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(task.jitter()).await;
            }
            match self.transport.send(&self.channel_id, command).await {
                Ok(()) => {
                    self.agent.with(|core| core.record_send(task.kind, Utc::now()));
                    tracing::debug!("[{}] sent `{command}`", task.name);
                    self.push(self.agent.counters_record().with_sent(command));
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(GrindClawError::ChannelUnavailable(reason)) => {
                    tracing::warn!("⚠️ [{}] channel unavailable, skipping tick: {reason}", task.name);
                    return Ok(TickOutcome::ChannelUnavailable);
                }
                Err(e) => {
                    tracing::warn!("⚠️ [{}] `{command}` failed: {e}", task.name);
                    self.push(TelemetryRecord::default().with_failure(&format!("{command}: {e}")));
                    return Ok(TickOutcome::Failed);
                }
            }
        }
        Ok(TickOutcome::Sent)
    }

    /// One tick of a periodic task: gate, battery, skip roll, jitter, send.
    async fn run_tick(&self, task: &TaskDescriptor) -> Result<TickOutcome> {
        if !self.agent.with(|core| task.is_enabled(&core.state)) {
            return Ok(TickOutcome::Disabled);
        }
        if let Some(power) = &self.power
            && power.is_low().await
        {
            return Ok(TickOutcome::Paused);
        }
        if task.should_skip() {
            tracing::debug!("[{}] tick skipped", task.name);
            return Ok(TickOutcome::Skipped);
        }
        tokio::time::sleep(task.jitter()).await;
        // state may have moved during the delay (e.g. a mount was bought)
        if !self.agent.with(|core| task.is_enabled(&core.state)) {
            return Ok(TickOutcome::Disabled);
        }
        self.send_all(task, &task.commands).await
    }

    /// Heal if one is pending and none is running.
    async fn run_heal(&self, task: &TaskDescriptor) -> Result<TickOutcome> {
        let claimed = self.agent.with(|core| {
            if !task.is_enabled(&core.state) {
                core.state.heal_needed = false;
                return None;
            }
            Some(core.begin_heal())
        });
        match claimed {
            None => return Ok(TickOutcome::Disabled),
            Some(false) => return Ok(TickOutcome::Skipped),
            Some(true) => {}
        }

        tokio::time::sleep(task.jitter()).await;
        let outcome = self.send_all(task, &task.commands).await;
        let healed = matches!(outcome, Ok(TickOutcome::Sent));
        self.agent.with(|core| core.finish_heal(healed));
        if healed {
            tracing::info!("❤️ Heal complete");
            self.push(self.agent.counters_record().with_decision("heal complete"));
        }
        outcome
    }

    async fn run_event(&self, task: &TaskDescriptor, reply: &str) -> Result<TickOutcome> {
        if !self.agent.with(|core| task.is_enabled(&core.state)) {
            return Ok(TickOutcome::Disabled);
        }
        tokio::time::sleep(task.jitter()).await;
        self.send_all(task, &[reply.to_string()]).await
    }
}

/// Builds the worker set.
pub struct SchedulerEngine {
    runner: TaskRunner,
    tasks: Vec<TaskDescriptor>,
}

impl SchedulerEngine {
    pub fn new(
        transport: Arc<dyn Transport>,
        channel_id: &str,
        agent: AgentHandle,
        tasks: Vec<TaskDescriptor>,
    ) -> Self {
        Self {
            runner: TaskRunner {
                transport,
                channel_id: channel_id.to_string(),
                agent,
                telemetry: None,
                power: None,
            },
            tasks,
        }
    }

    /// Engine with one descriptor per task kind plus the configured battery gate.
    pub fn from_config(config: &GrindClawConfig, transport: Arc<dyn Transport>, agent: AgentHandle) -> Self {
        let mut engine = Self::new(
            transport,
            &config.agent.channel_id,
            agent,
            build_descriptors(&config.commands),
        );
        engine.runner.power = PowerGate::from_config(&config.power);
        engine
    }

    pub fn with_telemetry(mut self, sync: TelemetrySync) -> Self {
        self.runner.telemetry = Some(sync);
        self
    }

    pub fn with_power_gate(mut self, gate: PowerGate) -> Self {
        self.runner.power = Some(gate);
        self
    }

    pub fn tasks(&self) -> &[TaskDescriptor] {
        &self.tasks
    }

    /// Spawn all workers. They stop when `cancel` fires.
    pub fn start(self, cancel: CancellationToken) -> SchedulerHandle {
        let runner = Arc::new(self.runner);
        let agent = runner.agent.clone();
        let (heal_tx, heal_rx) = mpsc::channel::<()>(1);
        let (event_tx, event_rx) = mpsc::channel::<String>(EVENT_QUEUE);
        let mut heal_rx = Some(heal_rx);
        let mut event_rx = Some(event_rx);
        let mut set = JoinSet::new();

        for task in self.tasks {
            match (task.trigger, task.kind) {
                (Trigger::Interval(period), _) => {
                    tracing::info!("⏰ Task '{}' every {:?}", task.name, period);
                    set.spawn(periodic_loop(runner.clone(), task, cancel.clone()));
                }
                (Trigger::Event, TaskKind::Healing) => {
                    if let Some(rx) = heal_rx.take() {
                        set.spawn(heal_loop(runner.clone(), task, rx, cancel.clone()));
                    }
                }
                (Trigger::Event, TaskKind::Events) => {
                    if let Some(rx) = event_rx.take() {
                        set.spawn(event_loop(runner.clone(), task, rx, cancel.clone()));
                    }
                }
                (Trigger::Event, kind) => {
                    tracing::warn!("No event source for task '{kind}', not started");
                }
            }
        }
        tracing::info!("⏰ Scheduler started ({} workers)", set.len());

        SchedulerHandle {
            control: SchedulerControl {
                agent,
                heal_tx,
                event_tx,
                cancel,
            },
            set,
        }
    }
}

async fn periodic_loop(runner: Arc<TaskRunner>, task: TaskDescriptor, cancel: CancellationToken) -> Result<()> {
    let Trigger::Interval(period) = task.trigger else {
        return Ok(());
    };
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = ticker.tick() => {}
        }
        let outcome = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            outcome = runner.run_tick(&task) => outcome?,
        };
        tracing::debug!("[{}] tick → {outcome:?}", task.name);
    }
}

async fn heal_loop(
    runner: Arc<TaskRunner>,
    task: TaskDescriptor,
    mut rx: mpsc::Receiver<()>,
    cancel: CancellationToken,
) -> Result<()> {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            signal = rx.recv() => {
                if signal.is_none() {
                    return Ok(());
                }
            }
        }
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            outcome = runner.run_heal(&task) => {
                tracing::debug!("[{}] → {:?}", task.name, outcome.as_ref().ok());
                outcome?;
            }
        }
    }
}

async fn event_loop(
    runner: Arc<TaskRunner>,
    task: TaskDescriptor,
    mut rx: mpsc::Receiver<String>,
    cancel: CancellationToken,
) -> Result<()> {
    loop {
        let reply = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            reply = rx.recv() => match reply {
                Some(reply) => reply,
                None => return Ok(()),
            },
        };
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            outcome = runner.run_event(&task, &reply) => {
                tracing::debug!("[{}] `{reply}` → {:?}", task.name, outcome.as_ref().ok());
                outcome?;
            }
        }
    }
}

/// Cloneable trigger surface handed to the inbound side.
#[derive(Clone)]
pub struct SchedulerControl {
    agent: AgentHandle,
    heal_tx: mpsc::Sender<()>,
    event_tx: mpsc::Sender<String>,
    cancel: CancellationToken,
}

impl SchedulerControl {
    /// Flag a heal and wake the heal worker. Returns false when a heal is
    /// already pending, in which case nothing is queued.
    pub fn request_heal(&self) -> bool {
        if !self.agent.with(|core| core.request_heal()) {
            return false;
        }
        match self.heal_tx.try_send(()) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(())) => true,
            Err(mpsc::error::TrySendError::Closed(())) => {
                // no heal worker left to clear the flag
                self.agent.with(|core| core.state.heal_needed = false);
                false
            }
        }
    }

    /// Queue a scripted-event reply. Dropped if the queue is full.
    pub fn trigger_event(&self, reply: &str) {
        if let Err(e) = self.event_tx.try_send(reply.to_string()) {
            tracing::debug!("Event reply `{reply}` dropped: {e}");
        }
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn agent(&self) -> &AgentHandle {
        &self.agent
    }
}

/// Owns the running workers.
pub struct SchedulerHandle {
    control: SchedulerControl,
    set: JoinSet<Result<()>>,
}

impl SchedulerHandle {
    pub fn control(&self) -> SchedulerControl {
        self.control.clone()
    }

    pub fn shutdown(&self) {
        self.control.shutdown();
    }

    /// Wait for every worker to finish. A fatal worker error cancels the rest
    /// and is returned. Cancel-safe.
    pub async fn wait(&mut self) -> Result<()> {
        while let Some(joined) = self.set.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::error!("🛑 Scheduler halted: {e}");
                    self.control.cancel.cancel();
                    self.set.shutdown().await;
                    return Err(e);
                }
                Err(join_err) if join_err.is_cancelled() => {}
                Err(join_err) => tracing::error!("Scheduler worker panicked: {join_err}"),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::power::PowerProbe;
    use async_trait::async_trait;
    use grindclaw_channels::{FailureMode, LoopbackChannel};
    use grindclaw_core::config::CommandsConfig;
    use grindclaw_telemetry::{HistoryStore, StoreSink};
    use std::time::Duration;

    /// Descriptor with no jitter and no skip roll.
    fn task(kind: TaskKind, active: bool, period_secs: u64) -> TaskDescriptor {
        let mut commands = CommandsConfig::default();
        let raw = match kind {
            TaskKind::Grinding => &mut commands.grinding,
            TaskKind::Battling => &mut commands.battling,
            TaskKind::Horse => &mut commands.horse,
            TaskKind::Healing => &mut commands.healing,
            TaskKind::Events => &mut commands.events,
            TaskKind::Quests => &mut commands.quests,
            TaskKind::Daily => &mut commands.daily,
        };
        raw.active = Some(active);
        raw.jitter_min_secs = Some(0.0);
        raw.jitter_max_secs = Some(0.0);
        raw.skip_chance = Some(0.0);
        if period_secs > 0 {
            raw.period_secs = Some(period_secs);
        }
        TaskDescriptor::from_settings(&commands.task(kind))
    }

    fn engine(ch: &Arc<LoopbackChannel>, agent: &AgentHandle, tasks: Vec<TaskDescriptor>) -> SchedulerEngine {
        SchedulerEngine::new(ch.clone(), "42", agent.clone(), tasks)
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_task_ticks() {
        let ch = Arc::new(LoopbackChannel::new());
        let agent = AgentHandle::new();
        let cancel = CancellationToken::new();
        let handle = engine(&ch, &agent, vec![task(TaskKind::Grinding, true, 60)]).start(cancel.clone());

        tokio::time::sleep(Duration::from_secs(130)).await;
        handle.shutdown();
        assert_eq!(ch.sent_texts(), vec!["rpg hunt"; 3]);
        assert_eq!(agent.stats().commands_sent, 3);
        assert!(agent.snapshot().state.last_run_at.contains_key(&TaskKind::Grinding));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_task_never_sends() {
        let ch = Arc::new(LoopbackChannel::new());
        let agent = AgentHandle::new();
        let scheduler = engine(
            &ch,
            &agent,
            vec![task(TaskKind::Grinding, false, 60), task(TaskKind::Horse, true, 60)],
        );
        // owning a mount closes the horse gate
        agent.with(|core| core.set_mount(true));
        let handle = scheduler.start(CancellationToken::new());
        tokio::time::sleep(Duration::from_secs(200)).await;
        handle.shutdown();
        assert!(ch.sent_texts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_heal_is_idempotent() {
        let ch = Arc::new(LoopbackChannel::new());
        let agent = AgentHandle::new();
        let handle = engine(&ch, &agent, vec![task(TaskKind::Healing, true, 0)]).start(CancellationToken::new());
        let control = handle.control();

        assert!(control.request_heal());
        assert!(agent.snapshot().state.heal_needed);
        assert!(!control.request_heal(), "duplicate low-HP must not queue a second heal");

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(ch.sent_texts(), vec!["rpg heal", "rpg buy life potion"]);
        let core = agent.snapshot();
        assert!(!core.state.heal_needed);
        assert_eq!(core.stats.heals_performed, 1);

        // resolved, so a new low-HP reply heals again
        assert!(control.request_heal());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(ch.sent_texts().len(), 4);
        assert_eq!(agent.stats().heals_performed, 2);
        handle.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_healing_clears_flag() {
        let ch = Arc::new(LoopbackChannel::new());
        let agent = AgentHandle::new();
        let handle = engine(&ch, &agent, vec![task(TaskKind::Healing, false, 0)]).start(CancellationToken::new());
        assert!(handle.control().request_heal());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!agent.snapshot().state.heal_needed);
        assert!(ch.sent_texts().is_empty());
        handle.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_event_reply_sent() {
        let ch = Arc::new(LoopbackChannel::new());
        let agent = AgentHandle::new();
        let handle = engine(&ch, &agent, vec![task(TaskKind::Events, true, 0)]).start(CancellationToken::new());
        handle.control().trigger_event("CHOP");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(ch.sent_texts(), vec!["CHOP"]);
        handle.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_failure_is_recorded_and_not_fatal() {
        let ch = Arc::new(LoopbackChannel::new());
        ch.set_failure(Some(FailureMode::SendFailed));
        let agent = AgentHandle::new();
        let store = Arc::new(HistoryStore::new());
        let cancel = CancellationToken::new();
        let (sync, _push) = TelemetrySync::spawn(
            Arc::new(StoreSink::new(store.clone())),
            Duration::from_secs(3600),
            16,
            TelemetryRecord::default,
            cancel.clone(),
        );
        let mut handle = engine(&ch, &agent, vec![task(TaskKind::Grinding, true, 60)])
            .with_telemetry(sync)
            .start(cancel.clone());

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(agent.stats().commands_sent, 0);
        let events = store.snapshot().events;
        assert!(events.iter().any(|e| e.contains("FAILED: rpg hunt")));

        ch.set_failure(None);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(agent.stats().commands_sent, 1);

        cancel.cancel();
        assert!(handle.wait().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_channel_unavailable_skips_tick() {
        let ch = Arc::new(LoopbackChannel::new());
        ch.set_failure(Some(FailureMode::ChannelUnavailable));
        let agent = AgentHandle::new();
        let handle = engine(&ch, &agent, vec![task(TaskKind::Battling, true, 60)]).start(CancellationToken::new());
        tokio::time::sleep(Duration::from_secs(10)).await;
        ch.set_failure(None);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(ch.sent_texts(), vec!["rpg adventure"]);
        handle.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_loss_halts_scheduler() {
        let ch = Arc::new(LoopbackChannel::new());
        ch.set_failure(Some(FailureMode::SessionLost));
        let agent = AgentHandle::new();
        let cancel = CancellationToken::new();
        let mut handle = engine(
            &ch,
            &agent,
            vec![task(TaskKind::Grinding, true, 60), task(TaskKind::Battling, true, 60)],
        )
        .start(cancel.clone());

        let err = handle.wait().await.unwrap_err();
        assert!(err.is_fatal());
        assert!(cancel.is_cancelled());
    }

    struct LowBattery;

    #[async_trait]
    impl PowerProbe for LowBattery {
        async fn battery_percent(&self) -> u8 {
            2
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_low_battery_pauses_ticks() {
        let ch = Arc::new(LoopbackChannel::new());
        let agent = AgentHandle::new();
        let handle = engine(&ch, &agent, vec![task(TaskKind::Grinding, true, 60)])
            .with_power_gate(PowerGate::new(Arc::new(LowBattery), 5))
            .start(CancellationToken::new());
        tokio::time::sleep(Duration::from_secs(130)).await;
        assert!(ch.sent_texts().is_empty());
        handle.shutdown();
    }

    #[test]
    fn test_from_config_builds_every_task() {
        let config = GrindClawConfig::default();
        let engine = SchedulerEngine::from_config(&config, Arc::new(LoopbackChannel::new()), AgentHandle::new());
        assert_eq!(engine.tasks().len(), TaskKind::ALL.len());
    }
}
