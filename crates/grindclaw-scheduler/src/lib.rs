//! # GrindClaw Scheduler
//!
//! Drives the agent's outbound commands.
//!
//! ```text
//! SchedulerEngine
//!   ├── periodic tasks (tokio interval each)
//!   │     grinding 60s · battling 60s · quests 1h · daily 24h · horse 1h
//!   │     tick → gate → battery → skip roll → jitter → send
//!   ├── healing (event) ← SchedulerControl::request_heal()
//!   └── events  (event) ← SchedulerControl::trigger_event(reply)
//!
//! AgentHandle (one mutex, never held across .await)
//!   ├── AgentState   heal_needed · heal_in_flight · has_mount · last_run_at
//!   └── StatsCounters commands · resource · hoarded · heals
//! ```

pub mod engine;
pub mod power;
pub mod state;
pub mod tasks;

pub use engine::{SchedulerControl, SchedulerEngine, SchedulerHandle, TickOutcome};
pub use power::{PowerGate, PowerProbe, TermuxBattery};
pub use state::{AgentCore, AgentHandle, AgentState, StatsCounters};
pub use tasks::{TaskDescriptor, Trigger, build_descriptors};
