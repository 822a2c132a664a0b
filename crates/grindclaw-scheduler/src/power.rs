//! Battery gate: pauses periodic ticks while the device battery is low.
//!
//! Meant for phones running the agent under Termux. A probe that cannot read
//! the battery reports 100%, so a missing tool never stalls the scheduler.

use std::sync::Arc;

use async_trait::async_trait;
use grindclaw_core::config::PowerConfig;

/// Reads the current battery percentage.
#[async_trait]
pub trait PowerProbe: Send + Sync {
    async fn battery_percent(&self) -> u8;
}

/// `termux-battery-status` (JSON on stdout with a `percentage` field).
pub struct TermuxBattery {
    command: String,
}

impl TermuxBattery {
    pub fn new(command: &str) -> Self {
        Self {
            command: command.to_string(),
        }
    }
}

/// Extract `percentage` from the probe's JSON output.
pub fn parse_percentage(stdout: &str) -> Option<u8> {
    let value: serde_json::Value = serde_json::from_str(stdout).ok()?;
    let pct = value.get("percentage")?.as_f64()?;
    Some(pct.clamp(0.0, 100.0) as u8)
}

#[async_trait]
impl PowerProbe for TermuxBattery {
    async fn battery_percent(&self) -> u8 {
        let output = match tokio::process::Command::new(&self.command).output().await {
            Ok(out) if out.status.success() => out,
            Ok(out) => {
                tracing::debug!("{} exited with {}", self.command, out.status);
                return 100;
            }
            Err(e) => {
                tracing::debug!("{} unavailable: {e}", self.command);
                return 100;
            }
        };
        parse_percentage(&String::from_utf8_lossy(&output.stdout)).unwrap_or(100)
    }
}

/// Probe plus threshold.
#[derive(Clone)]
pub struct PowerGate {
    probe: Arc<dyn PowerProbe>,
    threshold: u8,
}

impl PowerGate {
    pub fn new(probe: Arc<dyn PowerProbe>, threshold: u8) -> Self {
        Self { probe, threshold }
    }

    /// Gate from config; `None` when disabled.
    pub fn from_config(config: &PowerConfig) -> Option<Self> {
        config.enabled.then(|| {
            Self::new(
                Arc::new(TermuxBattery::new(&config.probe_command)),
                config.threshold_percent,
            )
        })
    }

    /// True when ticks should pause.
    pub async fn is_low(&self) -> bool {
        let pct = self.probe.battery_percent().await;
        if pct <= self.threshold {
            tracing::warn!("🔋 Battery at {pct}% (≤ {}%), pausing tick", self.threshold);
            return true;
        }
        false
    }
}
